//! Document ingestion: turn an uploaded file into cached "file context" for
//! the next chat message, plus a one-shot summary.

pub mod extract;

use std::path::Path;
use std::sync::{Arc, RwLock};

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::backend::{timestamp_now, RowStore, Table};
use crate::chat::window::{ContextEntry, Role};
use crate::completion::CompletionProvider;
use crate::error::AppError;
use crate::session::SessionCache;
use extract::{DocumentKind, RemoteExtractor};

const ANALYST_PROMPT: &str =
    "You are a careful document analyst. Follow the requested structure exactly.";

/// A file picked by the user.
#[derive(Debug, Clone)]
pub struct IngestFile {
    pub name: String,
    /// MIME type reported by the picker, if any.
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}

impl IngestFile {
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let bytes = std::fs::read(path)
            .map_err(|e| AppError::local(format!("Could not read {}: {}", path.display(), e)))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        Ok(Self {
            name,
            mime: None,
            bytes,
        })
    }

    pub fn mime(&self) -> String {
        match &self.mime {
            Some(mime) if !mime.is_empty() => mime.clone(),
            _ => mime_guess::from_path(&self.name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub file_name: String,
    pub text: String,
}

impl CachedFile {
    /// Outgoing message content: the cached document ahead of the question.
    pub fn prefix(&self, question: &str) -> String {
        format!(
            "Reference document \"{}\":\n{}\n\nQuestion: {}",
            self.file_name, self.text, question
        )
    }
}

/// Most recent extracted document text. Each successful ingestion replaces
/// it; sends read it without clearing.
#[derive(Clone, Default)]
pub struct FileContext {
    inner: Arc<RwLock<Option<CachedFile>>>,
}

impl FileContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<CachedFile> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set(&self, file: CachedFile) {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(file);
    }

    pub fn clear(&self) {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Summarized { file_name: String, summary: String },
    /// Context was cached but the summary request failed.
    SummaryFailed { file_name: String, error: String },
    /// Nothing readable came out of the file; context left unchanged.
    NoText { file_name: String },
}

#[derive(Clone)]
pub struct DocumentIngestor {
    extractor: Arc<dyn RemoteExtractor>,
    completion: Arc<dyn CompletionProvider>,
    rows: Arc<dyn RowStore>,
    session: SessionCache,
    file_context: FileContext,
    max_chars: usize,
    max_image_edge: u32,
}

impl DocumentIngestor {
    pub fn new(
        extractor: Arc<dyn RemoteExtractor>,
        completion: Arc<dyn CompletionProvider>,
        rows: Arc<dyn RowStore>,
        session: SessionCache,
        file_context: FileContext,
        max_chars: usize,
        max_image_edge: u32,
    ) -> Self {
        Self {
            extractor,
            completion,
            rows,
            session,
            file_context,
            max_chars,
            max_image_edge,
        }
    }

    pub async fn ingest(&self, file: IngestFile) -> Result<IngestOutcome, AppError> {
        let mime = file.mime();
        let kind = DocumentKind::from_mime(&mime).ok_or_else(|| {
            AppError::validation(format!(
                "Unsupported file type ({mime}). Upload a text, PDF, Word (.docx) or image file."
            ))
        })?;
        let IngestFile { name, bytes, .. } = file;
        tracing::info!("Ingesting {} as {:?} ({} bytes)", name, kind, bytes.len());

        let text = match kind {
            DocumentKind::PlainText => extract::plain_text(&bytes),
            DocumentKind::Docx => extract::docx_text(&bytes)?,
            DocumentKind::Pdf => self.remote(&name, &mime, bytes).await?,
            DocumentKind::Image => {
                let (bytes, mime) = extract::downscale_image(bytes, &mime, self.max_image_edge)?;
                self.remote(&name, &mime, bytes).await?
            }
        };

        if text.trim().is_empty() {
            tracing::warn!("No text extracted from {}", name);
            return Ok(IngestOutcome::NoText { file_name: name });
        }

        let text = match kind {
            DocumentKind::Image => text,
            _ => truncate_chars(&text, self.max_chars),
        };
        self.file_context.set(CachedFile {
            file_name: name.clone(),
            text: text.clone(),
        });

        match self.summarize(&text, &name).await {
            Ok(summary) => Ok(IngestOutcome::Summarized {
                file_name: name,
                summary,
            }),
            Err(error) => {
                tracing::warn!("Summary of {} failed: {}", name, error);
                Ok(IngestOutcome::SummaryFailed {
                    file_name: name,
                    error: error.to_string(),
                })
            }
        }
    }

    async fn remote(&self, name: &str, mime: &str, bytes: Vec<u8>) -> Result<String, AppError> {
        self.extractor
            .extract(name, mime, bytes)
            .await
            .map_err(|e| AppError::local(format!("Could not extract text from {name}: {e}")))
    }

    /// One-shot structured summary; the result is stored in
    /// `document_analysis` apart from the chat history.
    pub async fn summarize(&self, text: &str, file_name: &str) -> Result<String, AppError> {
        let messages = [
            ContextEntry::new(Role::System, ANALYST_PROMPT),
            ContextEntry::new(Role::User, summary_prompt(text, file_name)),
        ];
        let summary = self
            .completion
            .complete(&messages, CancellationToken::new())
            .await?;
        self.persist_analysis(file_name, text, &summary).await;
        Ok(summary)
    }

    async fn persist_analysis(&self, file_name: &str, content: &str, analysis: &str) {
        let Some(user_id) = self.session.current_user_id() else {
            tracing::warn!("Not signed in; document analysis not saved");
            return;
        };
        let row = json!({
            "user_id": user_id,
            "file_name": file_name,
            "content": content,
            "analysis_result": analysis,
            "created_at": timestamp_now(),
        });
        match self.rows.insert(Table::DocumentAnalysis, row).await {
            Ok(_) => tracing::debug!("Saved analysis of {}", file_name),
            Err(error) => tracing::error!("Failed to save analysis of {}: {}", file_name, error),
        }
    }
}

pub fn summary_prompt(text: &str, file_name: &str) -> String {
    format!(
        "Analyse the document \"{file_name}\" below and answer in this structure:\n\
         1. Topic: one short line.\n\
         2. Key points: 3-5 bullet points.\n\
         3. Use cases: where this content is useful.\n\
         4. Risks: anything inaccurate, sensitive or worth double-checking.\n\n\
         Document:\n{text}"
    )
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => text[..byte].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::error::BackendError;

    /// Extractor returning a fixed text and recording what it was sent.
    pub struct FixedExtractor {
        pub text: String,
        pub seen: Mutex<Vec<(String, String)>>,
    }

    impl FixedExtractor {
        pub fn new(text: &str) -> Self {
            Self {
                text: text.to_string(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteExtractor for FixedExtractor {
        async fn extract(
            &self,
            file_name: &str,
            mime: &str,
            _bytes: Vec<u8>,
        ) -> Result<String, BackendError> {
            self.seen
                .lock()
                .unwrap()
                .push((file_name.to_string(), mime.to_string()));
            Ok(self.text.clone())
        }
    }
}
