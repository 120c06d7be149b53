//! Text extraction per document format.
//!
//! Plain text and DOCX are handled locally. PDFs and images go to a remote
//! extraction/OCR endpoint as a base64 payload.

use std::io::{Cursor, Read};

use async_trait::async_trait;
use base64::Engine;
use serde_json::json;

use crate::config::IngestionConfig;
use crate::error::{AppError, BackendError};

pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PlainText,
    Pdf,
    Docx,
    Image,
}

impl DocumentKind {
    /// Maps an allowed MIME type to its kind; anything else is rejected.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "text/plain" => Some(Self::PlainText),
            "application/pdf" => Some(Self::Pdf),
            DOCX_MIME => Some(Self::Docx),
            "image/png" | "image/jpeg" | "image/gif" | "image/webp" | "image/bmp" => {
                Some(Self::Image)
            }
            _ => None,
        }
    }
}

/// Remote extraction collaborator (PDF text layer, OCR).
#[async_trait]
pub trait RemoteExtractor: Send + Sync {
    async fn extract(
        &self,
        file_name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<String, BackendError>;
}

pub struct HttpExtractor {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpExtractor {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            url: url.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RemoteExtractor for HttpExtractor {
    async fn extract(
        &self,
        file_name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<String, BackendError> {
        let payload = json!({
            "file_name": file_name,
            "mime_type": mime,
            "data": base64::engine::general_purpose::STANDARD.encode(&bytes),
        });
        let mut req = self.client.post(&self.url).json(&payload);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::http(status.as_u16(), body));
        }
        let body: serde_json::Value = response.json().await?;
        body.get("text")
            .or_else(|| body.get("content"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| BackendError::Decode("extraction response has no text field".into()))
    }
}

pub struct UnconfiguredExtractor;

#[async_trait]
impl RemoteExtractor for UnconfiguredExtractor {
    async fn extract(
        &self,
        _file_name: &str,
        _mime: &str,
        _bytes: Vec<u8>,
    ) -> Result<String, BackendError> {
        Err(BackendError::Local(
            "no extraction endpoint configured for PDFs and images".to_string(),
        ))
    }
}

pub fn from_config(config: &IngestionConfig) -> std::sync::Arc<dyn RemoteExtractor> {
    match config.extract_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => std::sync::Arc::new(HttpExtractor::new(
            url,
            config.extract_api_key.clone(),
        )),
        _ => std::sync::Arc::new(UnconfiguredExtractor),
    }
}

pub fn plain_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Paragraph text of a DOCX file, one paragraph per line.
pub fn docx_text(bytes: &[u8]) -> Result<String, AppError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| AppError::local(format!("not a valid .docx file: {e}")))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| AppError::local(format!("document body missing: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| AppError::local(format!("failed to read document body: {e}")))?;
    Ok(document_xml_text(&xml))
}

fn document_xml_text(xml: &str) -> String {
    let run = match regex_lite::Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>") {
        Ok(re) => re,
        Err(_) => return String::new(),
    };
    xml.split("</w:p>")
        .map(|paragraph| {
            run.captures_iter(paragraph)
                .filter_map(|c| c.get(1))
                .map(|m| unescape_xml(m.as_str()))
                .collect::<String>()
        })
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Shrinks an image so its longer edge is at most `max_edge`, re-encoded as
/// PNG. Images already small enough are returned untouched.
pub fn downscale_image(bytes: Vec<u8>, mime: &str, max_edge: u32) -> Result<(Vec<u8>, String), AppError> {
    let decoded = image::load_from_memory(&bytes)
        .map_err(|e| AppError::local(format!("could not decode image: {e}")))?;
    if decoded.width() <= max_edge && decoded.height() <= max_edge {
        return Ok((bytes, mime.to_string()));
    }

    tracing::debug!(
        "Downscaling {}x{} image to fit {}px",
        decoded.width(),
        decoded.height(),
        max_edge
    );
    let resized = decoded.resize(max_edge, max_edge, image::imageops::FilterType::Triangle);
    let mut out = Cursor::new(Vec::new());
    resized
        .write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| AppError::local(format!("could not re-encode image: {e}")))?;
    Ok((out.into_inner(), "image/png".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        buffer.into_inner()
    }

    #[test]
    fn allow_list_covers_documents_and_raster_images() {
        assert_eq!(DocumentKind::from_mime("text/plain"), Some(DocumentKind::PlainText));
        assert_eq!(DocumentKind::from_mime(DOCX_MIME), Some(DocumentKind::Docx));
        assert_eq!(DocumentKind::from_mime("image/webp"), Some(DocumentKind::Image));
        assert_eq!(DocumentKind::from_mime("application/zip"), None);
        assert_eq!(DocumentKind::from_mime("image/svg+xml"), None);
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = r#"<w:document><w:body>
            <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
            <w:p><w:r><w:t>Fish &amp; chips</w:t></w:r></w:p>
            <w:p></w:p>
        </w:body></w:document>"#;
        let text = docx_text(&docx_with_body(xml)).unwrap();
        assert_eq!(text, "Hello world\nFish & chips");
    }

    #[test]
    fn broken_docx_is_a_local_resource_error() {
        let error = docx_text(b"not a zip").unwrap_err();
        assert!(matches!(error, AppError::LocalResource(_)));
    }

    #[test]
    fn large_images_are_downscaled() {
        let img = image::RgbImage::new(400, 100);
        let mut png = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();

        let (bytes, mime) = downscale_image(png.into_inner(), "image/png", 200).unwrap();
        let shrunk = image::load_from_memory(&bytes).unwrap();
        assert_eq!((shrunk.width(), shrunk.height()), (200, 50));
        assert_eq!(mime, "image/png");
    }
}
