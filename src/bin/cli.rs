use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use prettytable::{Cell, Row, Table};
use reqwest::multipart::{Form, Part};
use samvad::ml::{Segment, TranslatedSegment};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

const API_URL: &str = "http://localhost:3000";

#[derive(Parser)]
#[command(name = "samvad")]
#[command(about = "A CLI tool for the Samvad backend", long_about = None)]
struct Cli {
    #[arg(long, global = true, default_value = API_URL, help = "Base URL of the server")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List users, chats, files or models")]
    List {
        #[arg(value_enum)]
        resource: Resource,
    },

    #[command(about = "Create an account")]
    Register {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        password: String,
    },

    #[command(about = "Register a language model")]
    AddModel {
        #[arg(short, long)]
        id: String,

        #[arg(short = 'n', long, help = "Provider model name, e.g. gpt-4o-mini")]
        model_name: String,
    },

    #[command(about = "Upload a file")]
    Upload {
        path: PathBuf,

        #[arg(short, long, help = "File id; defaults to the file name")]
        id: Option<String>,

        #[arg(short, long, help = "Language tags of the document")]
        languages: Vec<String>,

        #[arg(long, help = "Id of the file this one was derived from")]
        from: Option<String>,
    },

    #[command(about = "Run OCR on an image or PDF")]
    Extract { path: PathBuf },

    #[command(about = "Run OCR on an image or PDF and translate the text")]
    Translate {
        path: PathBuf,

        #[arg(short, long, default_value = "en")]
        target: String,
    },

    #[command(about = "Ask a question in a chat")]
    Ask {
        #[arg(short, long)]
        chat: String,

        message: String,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Resource {
    Users,
    Chats,
    Files,
    Models,
}

impl Resource {
    fn path(self) -> &'static str {
        match self {
            Resource::Users => "users",
            Resource::Chats => "chats",
            Resource::Files => "files",
            Resource::Models => "models",
        }
    }

    fn columns(self) -> &'static [&'static str] {
        match self {
            Resource::Users => &["id", "username"],
            Resource::Chats => &["id", "lang_model", "created_by", "updated_at"],
            Resource::Files => &["id", "file_name", "file_type", "languages"],
            Resource::Models => &["id", "model_name"],
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::List { resource } => list(&client, &base, resource).await,
        Commands::Register { username, password } => {
            register(&client, &base, username, password).await
        }
        Commands::AddModel { id, model_name } => add_model(&client, &base, id, model_name).await,
        Commands::Upload {
            path,
            id,
            languages,
            from,
        } => upload(&client, &base, &path, id, languages, from).await,
        Commands::Extract { path } => extract(&client, &base, &path).await.map(print_segments),
        Commands::Translate { path, target } => translate(&client, &base, &path, &target).await,
        Commands::Ask { chat, message } => ask(&client, &base, &chat, &message).await,
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Decodes a success body, or turns the server's `{"error"}` envelope into an error.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response, action: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("no details");
        bail!("Failed to {}: {} ({})", action, message, status);
    }
    response
        .json()
        .await
        .with_context(|| format!("Failed to {}: unreadable response", action))
}

async fn list(client: &reqwest::Client, base: &str, resource: Resource) -> Result<()> {
    let response = client
        .get(format!("{}/{}", base, resource.path()))
        .send()
        .await?;
    let records: Vec<Value> = read_json(response, &format!("list {}", resource.path())).await?;

    if records.is_empty() {
        println!("📭 No {} found.", resource.path());
        return Ok(());
    }

    println!("\n📋 {} ({})\n", resource.path(), records.len());

    let mut table = Table::new();
    table.add_row(Row::new(
        resource.columns().iter().map(|c| Cell::new(c)).collect(),
    ));
    for record in &records {
        table.add_row(Row::new(
            resource
                .columns()
                .iter()
                .map(|column| Cell::new(&display_field(record.get(*column))))
                .collect(),
        ));
    }

    table.printstd();
    println!();
    Ok(())
}

fn display_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => match s.parse::<DateTime<Utc>>() {
            Ok(dt) => dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
            Err(_) => s.clone(),
        },
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string()))
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

async fn register(client: &reqwest::Client, base: &str, username: String, password: String) -> Result<()> {
    let response = client
        .post(format!("{}/register", base))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await?;
    let result: Value = read_json(response, "register").await?;

    println!("✅ Account created!");
    println!("   Username: {}", username);
    println!("   ID: {}", result["id"].as_str().unwrap_or("-"));
    Ok(())
}

async fn add_model(client: &reqwest::Client, base: &str, id: String, model_name: String) -> Result<()> {
    let response = client
        .post(format!("{}/models", base))
        .json(&json!({ "id": id, "model_name": model_name }))
        .send()
        .await?;
    let _: Value = read_json(response, "register model").await?;

    println!("✅ Model registered: {} → {}", id, model_name);
    Ok(())
}

fn read_file(path: &Path) -> Result<(Vec<u8>, String, String)> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    Ok((data, name, mime_type(path).to_string()))
}

fn mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

fn file_part(data: Vec<u8>, name: String, mime: &str) -> Result<Part> {
    Ok(Part::bytes(data).file_name(name).mime_str(mime)?)
}

async fn upload(
    client: &reqwest::Client,
    base: &str,
    path: &Path,
    id: Option<String>,
    languages: Vec<String>,
    from: Option<String>,
) -> Result<()> {
    let (data, name, mime) = read_file(path)?;
    let id = id.unwrap_or_else(|| name.clone());
    let meta = json!({
        "id": id,
        "file_name": name,
        "file_type": mime,
        "file_from": from,
        "languages": languages,
    });
    let size = data.len();
    let form = Form::new()
        .text("json", meta.to_string())
        .part("file", file_part(data, name.clone(), &mime)?);

    let response = client
        .post(format!("{}/files", base))
        .multipart(form)
        .send()
        .await?;
    let _: Value = read_json(response, "upload file").await?;

    println!("✅ File uploaded!");
    println!("   Name: {} ({}, {} bytes)", name, mime, size);
    println!("   ID: {}", id);
    Ok(())
}

async fn extract(client: &reqwest::Client, base: &str, path: &Path) -> Result<Vec<Segment>> {
    let (data, name, mime) = read_file(path)?;
    let form = Form::new().part("file", file_part(data, name, &mime)?);
    let response = client
        .post(format!("{}/extract_text", base))
        .multipart(form)
        .send()
        .await?;
    read_json(response, "extract text").await
}

fn print_segments(segments: Vec<Segment>) {
    if segments.is_empty() {
        println!("📭 No text found.");
        return;
    }

    let mut table = Table::new();
    table.add_row(Row::new(vec![Cell::new("Page"), Cell::new("Text")]));
    for segment in &segments {
        table.add_row(Row::new(vec![
            Cell::new(&segment.page.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())),
            Cell::new(&segment.text),
        ]));
    }
    table.printstd();
}

async fn translate(client: &reqwest::Client, base: &str, path: &Path, target: &str) -> Result<()> {
    let segments = extract(client, base, path).await?;
    if segments.is_empty() {
        println!("📭 No text found.");
        return Ok(());
    }

    let response = client
        .post(format!("{}/translate_text", base))
        .json(&json!({ "segments": segments, "target_language": target }))
        .send()
        .await?;
    let translated: Vec<TranslatedSegment> = read_json(response, "translate text").await?;

    println!("\n🌐 Translated {} segments to {}\n", translated.len(), target);
    let mut table = Table::new();
    table.add_row(Row::new(vec![Cell::new("Original"), Cell::new("Translation")]));
    for segment in &translated {
        table.add_row(Row::new(vec![
            Cell::new(&segment.original_text),
            Cell::new(&segment.translated_text),
        ]));
    }
    table.printstd();
    println!();
    Ok(())
}

async fn ask(client: &reqwest::Client, base: &str, chat: &str, message: &str) -> Result<()> {
    let response = client
        .post(format!("{}/chats/{}/query", base, chat))
        .json(&json!({ "message": message }))
        .send()
        .await?;
    let result: Value = read_json(response, "query chat").await?;

    println!("💬 {}", result["response"].as_str().unwrap_or_default());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_type_from_extension() {
        assert_eq!(mime_type(Path::new("scan.PDF")), "application/pdf");
        assert_eq!(mime_type(Path::new("photo.jpeg")), "image/jpeg");
        assert_eq!(mime_type(Path::new("notes")), "application/octet-stream");
    }

    #[test]
    fn display_field_formats_lists_and_missing_values() {
        assert_eq!(display_field(None), "-");
        assert_eq!(display_field(Some(&json!(["hi", "en"]))), "hi, en");
        assert_eq!(display_field(Some(&json!("gpt-4"))), "gpt-4");
    }
}
