use std::sync::Arc;

use anyhow::{Context, Result};

use crate::backend::sqlite::SqliteRowStore;
use crate::backend::supabase::SupabaseClient;
use crate::backend::{Backend, RowStore};
use crate::chat::history::HistoryStore;
use crate::chat::transcript::Transcript;
use crate::completion::{CompletionProvider, OpenAiCompatClient, UnconfiguredProvider};
use crate::config::{AppConfig, HistoryStoreKind};
use crate::ingest::extract::{self, RemoteExtractor};
use crate::ingest::{DocumentIngestor, FileContext};
use crate::session::SessionCache;
use crate::speech::{self, SpeechSink};

/// Everything a component needs, built once at startup and cloned into each
/// component instead of reaching for globals.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub runtime: tokio::runtime::Handle,
    pub backend: Backend,
    pub session: SessionCache,
    pub completion: Arc<dyn CompletionProvider>,
    pub speech: Arc<dyn SpeechSink>,
    pub extractor: Arc<dyn RemoteExtractor>,
    pub file_context: FileContext,
}

impl AppContext {
    pub fn build(config: AppConfig, runtime: tokio::runtime::Handle) -> Result<Self> {
        let hosted = Arc::new(SupabaseClient::new(&config.backend));
        let rows: Arc<dyn RowStore> = match config.backend.history_store {
            HistoryStoreKind::Remote => hosted.clone(),
            HistoryStoreKind::Local => {
                let path = config
                    .local_db_path()
                    .context("no data directory available for the local history store")?;
                tracing::info!("Keeping rows in {}", path.display());
                Arc::new(
                    SqliteRowStore::open(&path)
                        .with_context(|| format!("failed to open {}", path.display()))?,
                )
            }
        };
        let backend = Backend {
            auth: hosted.clone(),
            rows,
            storage: hosted,
        };

        let completion: Arc<dyn CompletionProvider> = match config.completion.active_provider() {
            Some(provider) => {
                tracing::info!("Completion provider: {} ({})", provider.name, provider.model);
                Arc::new(OpenAiCompatClient::new(provider.clone()))
            }
            None => {
                tracing::warn!("No completion provider configured");
                Arc::new(UnconfiguredProvider)
            }
        };

        let session = SessionCache::new();
        {
            let _guard = runtime.enter();
            session.listen(backend.auth.subscribe());
        }

        Ok(Self {
            speech: speech::from_config(&config.speech),
            extractor: extract::from_config(&config.ingestion),
            config: Arc::new(config),
            runtime,
            backend,
            session,
            completion,
            file_context: FileContext::new(),
        })
    }

    pub fn history_store(&self) -> HistoryStore {
        HistoryStore::new(
            Arc::clone(&self.backend.rows),
            self.session.clone(),
            self.runtime.clone(),
            self.config.chat.history_timeout(),
        )
    }

    pub fn transcript(&self) -> Transcript {
        Transcript::new(
            self.runtime.clone(),
            Arc::clone(&self.speech),
            self.config.chat.typewriter_interval(),
            self.config.chat.user_avatar.clone(),
            self.config.chat.bot_avatar.clone(),
        )
    }

    pub fn ingestor(&self) -> DocumentIngestor {
        DocumentIngestor::new(
            Arc::clone(&self.extractor),
            Arc::clone(&self.completion),
            Arc::clone(&self.backend.rows),
            self.session.clone(),
            self.file_context.clone(),
            self.config.chat.file_context_max_chars,
            self.config.ingestion.max_image_edge,
        )
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::backend::testing::{FakeAuth, FakeStorage};
    use crate::backend::AuthEvent;
    use crate::ingest::testing::FixedExtractor;
    use crate::speech::testing::RecordingSpeech;

    /// Context wired to in-memory collaborators with `u1` signed in.
    pub struct TestContext {
        pub ctx: AppContext,
        pub auth: Arc<FakeAuth>,
        pub storage: Arc<FakeStorage>,
        pub speech: Arc<RecordingSpeech>,
    }

    pub fn context(
        rows: Arc<dyn RowStore>,
        completion: Arc<dyn CompletionProvider>,
        config: AppConfig,
    ) -> TestContext {
        let auth = Arc::new(FakeAuth::new());
        let storage = Arc::new(FakeStorage::new());
        let speech = Arc::new(RecordingSpeech::default());
        let session = SessionCache::new();
        session.apply(&AuthEvent::SignedIn {
            user: FakeAuth::user("u1", "u1@example.com"),
        });
        let ctx = AppContext {
            config: Arc::new(config),
            runtime: tokio::runtime::Handle::current(),
            backend: Backend {
                auth: auth.clone(),
                rows,
                storage: storage.clone(),
            },
            session,
            completion,
            speech: speech.clone(),
            extractor: Arc::new(FixedExtractor::new("")),
            file_context: FileContext::new(),
        };
        TestContext {
            ctx,
            auth,
            storage,
            speech,
        }
    }
}
