//! Google Cloud Vision text detection over REST.
//!
//! Images go to `images:annotate` with `TEXT_DETECTION`. PDFs go to
//! `files:annotate` with `DOCUMENT_TEXT_DETECTION`, at most
//! [`PDF_PAGES_PER_REQUEST`] pages per call, and are split into words.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{GoogleCredentials, MlError, Segment, TextExtractor};

pub const DEFAULT_VISION_URL: &str = "https://vision.googleapis.com/v1";

/// Upper bound imposed by the synchronous `files:annotate` endpoint.
pub const PDF_PAGES_PER_REQUEST: u32 = 5;

const SERVICE: &str = "Cloud Vision";

#[derive(Debug, Deserialize)]
struct BatchAnnotateImagesResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
struct BatchAnnotateFilesResponse {
    #[serde(default)]
    responses: Vec<AnnotateFileResponse>,
}

#[derive(Debug, Deserialize)]
struct AnnotateFileResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
    #[serde(default)]
    error: Option<Status>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    text_annotations: Vec<EntityAnnotation>,
    #[serde(default)]
    full_text_annotation: Option<TextAnnotation>,
    #[serde(default)]
    context: Option<ImageAnnotationContext>,
    #[serde(default)]
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageAnnotationContext {
    #[serde(default)]
    page_number: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityAnnotation {
    #[serde(default)]
    description: String,
    #[serde(default)]
    bounding_poly: Option<BoundingPoly>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoundingPoly {
    #[serde(default)]
    vertices: Vec<Vertex>,
    #[serde(default)]
    normalized_vertices: Vec<Vertex>,
}

// Vision omits zero coordinates.
#[derive(Debug, Default, Deserialize)]
struct Vertex {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    blocks: Vec<Block>,
}

#[derive(Debug, Deserialize)]
struct Block {
    #[serde(default)]
    paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Deserialize)]
struct Paragraph {
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Word {
    #[serde(default)]
    bounding_box: Option<BoundingPoly>,
    #[serde(default)]
    symbols: Vec<Symbol>,
}

#[derive(Debug, Deserialize)]
struct Symbol {
    #[serde(default)]
    text: String,
}

impl BoundingPoly {
    fn corners(&self) -> Vec<(f64, f64)> {
        let vertices = if self.vertices.is_empty() {
            &self.normalized_vertices
        } else {
            &self.vertices
        };
        vertices.iter().map(|v| (v.x, v.y)).collect()
    }
}

fn check_status(status: Option<&Status>) -> Result<(), MlError> {
    match status {
        Some(status) if !status.message.is_empty() => Err(MlError::Api {
            status: u16::try_from(status.code).unwrap_or(500),
            message: format!("Error during Vision API call: {}", status.message),
        }),
        _ => Ok(()),
    }
}

/// Per-word segments from an image response. The first annotation covers
/// the whole page and is skipped.
fn segments_from_image(response: &AnnotateImageResponse) -> Result<Vec<Segment>, MlError> {
    check_status(response.error.as_ref())?;
    Ok(response
        .text_annotations
        .iter()
        .skip(1)
        .map(|annotation| Segment {
            text: annotation.description.clone(),
            bounding_box: annotation
                .bounding_poly
                .as_ref()
                .map(BoundingPoly::corners)
                .unwrap_or_default(),
            page: None,
        })
        .collect())
}

/// Per-word segments from a document (PDF page) response.
fn segments_from_document(
    response: &AnnotateImageResponse,
    fallback_page: u32,
) -> Result<Vec<Segment>, MlError> {
    check_status(response.error.as_ref())?;
    let page = response
        .context
        .as_ref()
        .and_then(|c| c.page_number)
        .unwrap_or(fallback_page);

    let Some(annotation) = &response.full_text_annotation else {
        return Ok(Vec::new());
    };
    let segments = annotation
        .pages
        .iter()
        .flat_map(|p| &p.blocks)
        .flat_map(|b| &b.paragraphs)
        .flat_map(|p| &p.words)
        .map(|word| Segment {
            text: word.symbols.iter().map(|s| s.text.as_str()).collect(),
            bounding_box: word
                .bounding_box
                .as_ref()
                .map(BoundingPoly::corners)
                .unwrap_or_default(),
            page: Some(page),
        })
        .filter(|segment| !segment.text.is_empty())
        .collect();
    Ok(segments)
}

fn pdf_page_count(data: &[u8]) -> Result<u32, MlError> {
    let document = lopdf::Document::load_mem(data)
        .map_err(|e| MlError::Parse(format!("unreadable PDF: {}", e)))?;
    Ok(document.get_pages().len() as u32)
}

/// Page numbers (1-based) grouped into request-sized batches.
fn page_batches(total: u32) -> Vec<Vec<u32>> {
    (1..=total)
        .collect::<Vec<_>>()
        .chunks(PDF_PAGES_PER_REQUEST as usize)
        .map(<[u32]>::to_vec)
        .collect()
}

pub struct VisionClient {
    http: Client,
    base_url: String,
    credentials: GoogleCredentials,
}

impl VisionClient {
    pub fn new(http: Client, base_url: impl Into<String>, credentials: GoogleCredentials) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<T, MlError> {
        let request = self.http.post(format!("{}/{}", self.base_url, endpoint));
        let resp = self
            .credentials
            .authorize(request, SERVICE)?
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(MlError::Api {
                status,
                message: text,
            });
        }
        Ok(resp.json().await?)
    }

    pub async fn extract_image(&self, data: &[u8]) -> Result<Vec<Segment>, MlError> {
        let body = json!({
            "requests": [{
                "image": { "content": BASE64.encode(data) },
                "features": [{ "type": "TEXT_DETECTION" }]
            }]
        });
        let batch: BatchAnnotateImagesResponse = self.post("images:annotate", body).await?;
        match batch.responses.first() {
            Some(response) => segments_from_image(response),
            None => Ok(Vec::new()),
        }
    }

    pub async fn extract_pdf(&self, data: &[u8]) -> Result<Vec<Segment>, MlError> {
        let total = pdf_page_count(data)?;
        tracing::debug!(pages = total, "ocr: annotating PDF");
        let content = BASE64.encode(data);

        let mut segments = Vec::new();
        for pages in page_batches(total) {
            let body = json!({
                "requests": [{
                    "inputConfig": { "content": content, "mimeType": "application/pdf" },
                    "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }],
                    "pages": pages
                }]
            });
            let batch: BatchAnnotateFilesResponse = self.post("files:annotate", body).await?;
            for file in &batch.responses {
                check_status(file.error.as_ref())?;
                for (response, page) in file.responses.iter().zip(&pages) {
                    segments.extend(segments_from_document(response, *page)?);
                }
            }
        }
        Ok(segments)
    }
}

#[async_trait]
impl TextExtractor for VisionClient {
    async fn extract(&self, data: &[u8], mime_type: &str) -> Result<Vec<Segment>, MlError> {
        if mime_type == "application/pdf" {
            self.extract_pdf(data).await
        } else if mime_type.starts_with("image/") {
            self.extract_image(data).await
        } else {
            Err(MlError::Unsupported(mime_type.to_string()))
        }
    }
}
