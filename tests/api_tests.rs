use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use samvad::ml::{ChatCompleter, MlError, PromptMessage, Segment, TextExtractor, Translator};
use samvad::storage::{DocumentStore, LocalStore};
use samvad::user_storage::UserStorage;
use samvad::{create_router, AppState};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct FakeExtractor;

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract(&self, data: &[u8], mime_type: &str) -> Result<Vec<Segment>, MlError> {
        if !mime_type.starts_with("image/") && mime_type != "application/pdf" {
            return Err(MlError::Unsupported(mime_type.to_string()));
        }
        Ok(vec![Segment {
            text: String::from_utf8_lossy(data).into_owned(),
            bounding_box: vec![(0.0, 0.0), (10.0, 0.0), (10.0, 5.0), (0.0, 5.0)],
            page: None,
        }])
    }
}

struct FakeTranslator;

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, MlError> {
        Ok(format!("[{}] {}", target_language, text))
    }
}

/// Records every prompt it is given.
#[derive(Default)]
struct FakeCompleter {
    calls: Mutex<Vec<(String, Vec<PromptMessage>)>>,
}

#[async_trait]
impl ChatCompleter for FakeCompleter {
    async fn complete(&self, model: &str, messages: &[PromptMessage]) -> Result<String, MlError> {
        self.calls
            .lock()
            .unwrap()
            .push((model.to_string(), messages.to_vec()));
        if messages.last().map(|m| m.content.as_str()) == Some("say nothing") {
            return Ok("   ".to_string());
        }
        Ok(format!("answer from {}", model))
    }
}

struct TestApp {
    base_url: String,
    completer: Arc<FakeCompleter>,
    _tmp_dir: TempDir,
}

async fn spawn_app() -> TestApp {
    let tmp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = LocalStore::open(
        Some(tmp_dir.path().join("data.json")),
        concat!(env!("CARGO_MANIFEST_DIR"), "/schemas"),
    )
    .expect("Failed to open store");
    store.start().await.expect("Failed to start store");
    let store: Arc<dyn DocumentStore> = Arc::new(store);

    let completer = Arc::new(FakeCompleter::default());
    let mut state = AppState::new(
        store.clone(),
        Arc::new(FakeExtractor),
        Arc::new(FakeTranslator),
        completer.clone(),
    );
    state.users = UserStorage::with_cost(store, 4);
    state.default_model = "default-model".to_string();

    let app = create_router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        base_url: format!("http://{}", addr),
        completer,
        _tmp_dir: tmp_dir,
    }
}

fn client() -> Client {
    Client::builder().cookie_store(true).build().unwrap()
}

async fn error_of(response: reqwest::Response) -> String {
    let body: Value = response.json().await.unwrap();
    body["error"].as_str().unwrap().to_string()
}

fn upload_form(meta: Value, data: &[u8], mime: &str) -> Form {
    Form::new().text("json", meta.to_string()).part(
        "file",
        Part::bytes(data.to_vec())
            .file_name("upload.bin")
            .mime_str(mime)
            .unwrap(),
    )
}

async fn upload(app: &TestApp, meta: Value, data: &[u8], mime: &str) -> reqwest::Response {
    client()
        .post(format!("{}/files", app.base_url))
        .multipart(upload_form(meta, data, mime))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let app = spawn_app().await;
    let resp = client()
        .get(format!("{}/health", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn models_follow_the_crud_contract() {
    let app = spawn_app().await;
    let c = client();
    let url = format!("{}/models", app.base_url);

    let resp = c
        .post(&url)
        .json(&json!({"id": "m1", "model_name": "gpt-test"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let dup = c
        .post(&url)
        .json(&json!({"id": "m1", "model_name": "other"}))
        .send()
        .await
        .unwrap();
    assert_eq!(dup.status(), StatusCode::CONFLICT);

    let missing = c
        .post(&url)
        .json(&json!({"id": "", "model_name": "other"}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let list: Vec<Value> = c.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(list, vec![json!({"id": "m1", "model_name": "gpt-test"})]);

    let unknown = c.get(format!("{}/ghost", url)).send().await.unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_of(unknown).await, "model not found");

    let mismatched = c
        .put(format!("{}/m1", url))
        .json(&json!({"id": "m2", "model_name": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(mismatched.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_of(mismatched).await, "mismatched ids");

    let update_unknown = c
        .put(format!("{}/ghost", url))
        .json(&json!({"id": "ghost", "model_name": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(update_unknown.status(), StatusCode::NOT_FOUND);

    let updated: Value = c
        .put(format!("{}/m1", url))
        .json(&json!({"id": "m1", "model_name": "gpt-newer"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["model_name"], "gpt-newer");
}

#[tokio::test]
async fn malformed_bodies_get_the_error_envelope() {
    let app = spawn_app().await;
    let c = client();

    let no_chat_id = c
        .post(format!("{}/chats", app.base_url))
        .json(&json!({"lang_model": "m1", "created_by": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(no_chat_id.status(), StatusCode::BAD_REQUEST);
    assert!(error_of(no_chat_id).await.contains("id"));

    let no_model_id = c
        .post(format!("{}/models", app.base_url))
        .json(&json!({"model_name": "gpt-test"}))
        .send()
        .await
        .unwrap();
    assert_eq!(no_model_id.status(), StatusCode::BAD_REQUEST);
    assert!(error_of(no_model_id).await.contains("id"));

    let broken = c
        .put(format!("{}/models/m1", app.base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(broken.status(), StatusCode::BAD_REQUEST);
    assert!(!error_of(broken).await.is_empty());

    let untyped = c
        .post(format!("{}/translate_text", app.base_url))
        .body(r#"{"segments": []}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(untyped.status(), StatusCode::BAD_REQUEST);
    assert!(!error_of(untyped).await.is_empty());

    let models: Vec<Value> = c
        .get(format!("{}/models", app.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(models.is_empty());
}

#[tokio::test]
async fn file_listing_hides_content_and_data_is_served_raw() {
    let app = spawn_app().await;
    let c = client();
    let bytes = b"%PDF-1.4 fake";

    let resp = upload(
        &app,
        json!({"id": "f1", "file_name": "report \"q1\".pdf", "file_text": "quarterly numbers", "languages": ["en"]}),
        bytes,
        "application/pdf",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let list: Vec<Value> = c
        .get(format!("{}/files", app.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.len(), 1);
    assert!(list[0].get("file_data").is_none());
    assert!(list[0].get("file_text").is_none());
    assert_eq!(list[0]["file_type"], "application/pdf");

    let data = c
        .get(format!("{}/files/f1/data", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(data.status(), StatusCode::OK);
    assert_eq!(data.headers()["content-type"], "application/pdf");
    assert_eq!(
        data.headers()["content-disposition"],
        "inline; filename=\"report q1.pdf\""
    );
    assert_eq!(data.bytes().await.unwrap().as_ref(), bytes);

    let text: Value = c
        .get(format!("{}/files/f1/text", app.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(text, json!({"file_text": "quarterly numbers"}));

    let updated: Value = c
        .put(format!("{}/files/f1", app.base_url))
        .json(&json!({"id": "f1", "languages": ["en", "hi"]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["languages"], json!(["en", "hi"]));
    assert!(updated.get("file_data").is_none());
}

#[tokio::test]
async fn upload_rejects_missing_parts_and_empty_data() {
    let app = spawn_app().await;

    let empty = upload(&app, json!({"id": "f1", "file_name": "a.png"}), b"", "image/png").await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_of(empty).await, "no file data");

    let no_id = upload(&app, json!({"file_name": "a.png"}), b"img", "image/png").await;
    assert_eq!(no_id.status(), StatusCode::BAD_REQUEST);

    let meta_only = client()
        .post(format!("{}/files", app.base_url))
        .multipart(Form::new().text("json", json!({"id": "f1", "file_name": "a"}).to_string()))
        .send()
        .await
        .unwrap();
    assert_eq!(meta_only.status(), StatusCode::BAD_REQUEST);

    let missing = client()
        .get(format!("{}/files/f1/data", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn translations_are_files_derived_from_a_source() {
    let app = spawn_app().await;
    upload(&app, json!({"id": "src", "file_name": "a.png", "languages": ["hi"]}), b"img", "image/png").await;
    upload(
        &app,
        json!({"id": "tr", "file_name": "a-en.png", "file_from": "src", "languages": ["en"]}),
        b"img2",
        "image/png",
    )
    .await;
    upload(&app, json!({"id": "other", "file_name": "b.png"}), b"img3", "image/png").await;

    let derived: Vec<Value> = client()
        .get(format!("{}/files/src/translations", app.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(derived.len(), 1);
    assert_eq!(derived[0]["id"], "tr");

    let unknown = client()
        .get(format!("{}/files/ghost/translations", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn register_login_whoami_logout() {
    let app = spawn_app().await;
    let c = client();

    let registered: Value = c
        .post(format!("{}/register", app.base_url))
        .json(&json!({"username": "asha", "password": "pw"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let user_id = registered["id"].as_str().unwrap().to_string();

    let users: Vec<Value> = c
        .get(format!("{}/users", app.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(users, vec![json!({"id": user_id, "username": "asha"})]);

    let anonymous = c.get(format!("{}/whoami", app.base_url)).send().await.unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let bad = c
        .post(format!("{}/login", app.base_url))
        .json(&json!({"username": "asha", "password": "wrong"}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::UNAUTHORIZED);

    let login = c
        .post(format!("{}/login", app.base_url))
        .json(&json!({"username": "asha", "password": "pw"}))
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);

    let me: Value = c
        .get(format!("{}/whoami", app.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["user_id"], user_id.as_str());
    assert_eq!(me["username"], "asha");

    let logout = c.post(format!("{}/logout", app.base_url)).send().await.unwrap();
    assert_eq!(logout.status(), StatusCode::OK);
    let after = c.get(format!("{}/whoami", app.base_url)).send().await.unwrap();
    assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn user_routes_validate_before_storing() {
    let app = spawn_app().await;
    let c = client();
    let url = format!("{}/users", app.base_url);

    let no_id = c
        .post(&url)
        .json(&json!({"username": "asha", "password": "pw"}))
        .send()
        .await
        .unwrap();
    assert_eq!(no_id.status(), StatusCode::BAD_REQUEST);

    let no_password = c
        .post(&url)
        .json(&json!({"id": "u1", "username": "asha", "password": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(no_password.status(), StatusCode::BAD_REQUEST);

    let created = c
        .post(&url)
        .json(&json!({"id": "u1", "username": "asha", "password": "pw"}))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    let taken = c
        .post(&url)
        .json(&json!({"id": "u2", "username": "asha", "password": "pw"}))
        .send()
        .await
        .unwrap();
    assert_eq!(taken.status(), StatusCode::CONFLICT);

    let renamed: Value = c
        .put(format!("{}/u1", url))
        .json(&json!({"id": "u1", "username": "asha.k", "password": "new"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(renamed, json!({"id": "u1", "username": "asha.k"}));

    let login = c
        .post(format!("{}/login", app.base_url))
        .json(&json!({"username": "asha.k", "password": "new"}))
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);
}

#[tokio::test]
async fn extract_then_translate() {
    let app = spawn_app().await;
    let c = client();

    let form = Form::new().part(
        "file",
        Part::bytes(b"namaste".to_vec())
            .file_name("scan.png")
            .mime_str("image/png")
            .unwrap(),
    );
    let segments: Vec<Value> = c
        .post(format!("{}/extract_text", app.base_url))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0]["text"], "namaste");

    let translated: Vec<Value> = c
        .post(format!("{}/translate_text", app.base_url))
        .json(&json!({"segments": segments}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(translated[0]["original_text"], "namaste");
    assert_eq!(translated[0]["translated_text"], "[en] namaste");
    assert_eq!(translated[0]["bounding_box"], segments[0]["bounding_box"]);

    let unsupported = Form::new().part(
        "file",
        Part::bytes(b"plain".to_vec())
            .file_name("notes.txt")
            .mime_str("text/plain")
            .unwrap(),
    );
    let resp = c
        .post(format!("{}/extract_text", app.base_url))
        .multipart(unsupported)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

async fn create_chat(app: &TestApp, id: &str, lang_model: &str, files: &[&str]) {
    let resp = client()
        .post(format!("{}/chats", app.base_url))
        .json(&json!({
            "id": id,
            "user_group": ["u1"],
            "file_group": files,
            "lang_model": lang_model,
            "created_by": "u1"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
}

async fn query(app: &TestApp, chat: &str, message: &str) -> reqwest::Response {
    client()
        .post(format!("{}/chats/{}/query", app.base_url, chat))
        .json(&json!({"message": message}))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn chat_query_uses_documents_history_and_registry_model() {
    let app = spawn_app().await;
    client()
        .post(format!("{}/models", app.base_url))
        .json(&json!({"id": "m1", "model_name": "gpt-test"}))
        .send()
        .await
        .unwrap();
    upload(
        &app,
        json!({"id": "f1", "file_name": "lease.pdf", "file_text": "Rent is due monthly."}),
        b"%PDF",
        "application/pdf",
    )
    .await;
    create_chat(&app, "c1", "m1", &["f1"]).await;

    let canned: Value = query(&app, "c1", "Hello").await.json().await.unwrap();
    assert!(canned["response"].as_str().unwrap().starts_with("Hello!"));
    assert!(app.completer.calls.lock().unwrap().is_empty());

    let answer: Value = query(&app, "c1", "When is rent due?").await.json().await.unwrap();
    assert_eq!(answer["response"], "answer from gpt-test");

    {
        let calls = app.completer.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (model, prompt) = &calls[0];
        assert_eq!(model, "gpt-test");
        assert_eq!(prompt[0].role, "system");
        assert!(prompt[1].content.contains("Rent is due monthly."));
        assert_eq!(prompt[2].role, "user");
        assert_eq!(prompt[2].content, "Hello");
        assert_eq!(prompt[3].role, "assistant");
        assert_eq!(prompt.last().unwrap().content, "When is rent due?");
    }

    let chat: Value = client()
        .get(format!("{}/chats/c1", app.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let messages = chat["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2]["is_user"], true);
    assert_eq!(messages[3]["message"], "answer from gpt-test");
}

#[tokio::test]
async fn chat_query_falls_back_for_unknown_model_and_empty_reply() {
    let app = spawn_app().await;
    create_chat(&app, "c1", "unregistered", &[]).await;

    let answer: Value = query(&app, "c1", "anything").await.json().await.unwrap();
    assert_eq!(answer["response"], "answer from default-model");

    let empty: Value = query(&app, "c1", "say nothing").await.json().await.unwrap();
    assert_eq!(empty["response"], "Sorry, I couldn't generate a response.");

    let blank = query(&app, "c1", "  ").await;
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
    let unknown = query(&app, "ghost", "hi").await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chats_accept_appended_messages_and_updates() {
    let app = spawn_app().await;
    let c = client();
    create_chat(&app, "c1", "m1", &[]).await;

    let chat: Value = c
        .post(format!("{}/chats/c1/messages", app.base_url))
        .json(&json!({"message": {"message": "note to self", "is_user": true, "timestamp": "2024-05-01T10:00:00Z"}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(chat["messages"].as_array().unwrap().len(), 1);
    assert_ne!(chat["updated_at"], chat["created_at"]);

    let updated: Value = c
        .put(format!("{}/chats/c1", app.base_url))
        .json(&json!({"id": "c1", "file_group": ["f9"], "updated_by": "u2"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["file_group"], json!(["f9"]));
    assert_eq!(updated["updated_by"], "u2");
    assert_eq!(updated["messages"].as_array().unwrap().len(), 1);

    let duplicate = c
        .post(format!("{}/chats", app.base_url))
        .json(&json!({"id": "c1", "lang_model": "m1", "created_by": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
}
