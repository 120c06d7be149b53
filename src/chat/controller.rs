//! One send/receive cycle at a time.
//!
//! ```text
//! Idle -> Sending -> Streaming -> Idle
//!            |           |
//!            |           +-> Cancelled -> Idle
//!            +-> Cancelled -> Idle
//!            +-> Failed -> Idle
//! ```
//!
//! Network work runs on the tokio runtime and reports back through a channel;
//! the UI calls [`ConversationController::poll`] every frame to fold those
//! events (and typewriter progress) into the state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::history::{ConversationRecord, EntryId, HistoryStore};
use super::transcript::{MessageId, Recall, RenderOptions, Sender, Transcript};
use super::window::ContextWindow;
use crate::agents::AgentProfile;
use crate::app_context::AppContext;
use crate::backend::Table;
use crate::completion::CompletionProvider;
use crate::error::{AppError, CompletionError};
use crate::ingest::{DocumentIngestor, FileContext, IngestFile, IngestOutcome};

pub const CANCELLED_NOTICE: &str = "Request cancelled.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Sending,
    Streaming,
    Cancelled,
    Failed,
}

/// Which chat surface the controller is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    Default,
    Agent,
}

impl ChatMode {
    pub fn table(self) -> Table {
        match self {
            ChatMode::Default => Table::Conversations,
            ChatMode::Agent => Table::ConversationsAdd,
        }
    }
}

/// Enabled/disabled state of the composer controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlLocks {
    pub input_enabled: bool,
    pub send_enabled: bool,
    pub cancel_enabled: bool,
    pub busy: bool,
}

impl ControlLocks {
    pub const IDLE: Self = Self {
        input_enabled: true,
        send_enabled: true,
        cancel_enabled: false,
        busy: false,
    };

    pub const SENDING: Self = Self {
        input_enabled: false,
        send_enabled: false,
        cancel_enabled: true,
        busy: true,
    };

    pub const STREAMING: Self = Self {
        input_enabled: false,
        send_enabled: false,
        cancel_enabled: true,
        busy: false,
    };
}

#[derive(Debug)]
pub enum ControllerEvent {
    Completion {
        request: u64,
        result: Result<String, CompletionError>,
    },
    Ingested {
        file_name: String,
        result: Result<IngestOutcome, AppError>,
    },
}

struct InFlight {
    request: u64,
    token: CancellationToken,
    question: String,
    entry: EntryId,
    table: Table,
    reply: Option<MessageId>,
}

pub struct ConversationController {
    completion: Arc<dyn CompletionProvider>,
    runtime: tokio::runtime::Handle,
    history: HistoryStore,
    file_context: FileContext,
    ingestor: DocumentIngestor,
    default_prompt: String,
    context_cap: usize,

    transcript: Transcript,
    agent_transcript: Transcript,
    window: ContextWindow,
    saved_window: Option<ContextWindow>,
    mode: ChatMode,
    agent: Option<AgentProfile>,

    phase: TurnPhase,
    last_outcome: Option<TurnPhase>,
    locks: ControlLocks,
    focus_input: bool,
    in_flight: Option<InFlight>,
    next_request: u64,
    ingesting: usize,
    events_tx: flume::Sender<ControllerEvent>,
    events_rx: flume::Receiver<ControllerEvent>,
}

impl ConversationController {
    pub fn new(ctx: &AppContext) -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            completion: Arc::clone(&ctx.completion),
            runtime: ctx.runtime.clone(),
            history: ctx.history_store(),
            file_context: ctx.file_context.clone(),
            ingestor: ctx.ingestor(),
            default_prompt: ctx.config.chat.system_prompt.clone(),
            context_cap: ctx.config.chat.context_cap,
            transcript: ctx.transcript(),
            agent_transcript: ctx.transcript(),
            window: ContextWindow::with_cap(ctx.config.chat.context_cap),
            saved_window: None,
            mode: ChatMode::Default,
            agent: None,
            phase: TurnPhase::Idle,
            last_outcome: None,
            locks: ControlLocks::IDLE,
            focus_input: true,
            in_flight: None,
            next_request: 1,
            ingesting: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// How the last finished turn ended (`Idle` for a normal completion).
    pub fn last_outcome(&self) -> Option<TurnPhase> {
        self.last_outcome
    }

    pub fn locks(&self) -> ControlLocks {
        self.locks
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    pub fn window(&self) -> &ContextWindow {
        &self.window
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn transcript(&self) -> &Transcript {
        match self.mode {
            ChatMode::Default => &self.transcript,
            ChatMode::Agent => &self.agent_transcript,
        }
    }

    pub fn transcript_mut(&mut self) -> &mut Transcript {
        match self.mode {
            ChatMode::Default => &mut self.transcript,
            ChatMode::Agent => &mut self.agent_transcript,
        }
    }

    pub fn is_ingesting(&self) -> bool {
        self.ingesting > 0
    }

    /// True once after a turn ends, telling the UI to refocus the input.
    pub fn take_focus_request(&mut self) -> bool {
        std::mem::take(&mut self.focus_input)
    }

    fn system_prompt(&self) -> String {
        match (self.mode, &self.agent) {
            (ChatMode::Agent, Some(agent)) => agent.system_prompt.clone(),
            _ => self.default_prompt.clone(),
        }
    }

    /// Starts a turn. Blank input, or input while a turn is running, is
    /// ignored and returns `false`.
    pub fn submit(&mut self, raw: &str) -> bool {
        let question = raw.trim();
        if question.is_empty() {
            return false;
        }
        if self.phase != TurnPhase::Idle {
            tracing::debug!("Submit ignored while {:?}", self.phase);
            return false;
        }

        let outgoing = match self.file_context.get() {
            Some(file) => file.prefix(question),
            None => question.to_string(),
        };
        let system = self.system_prompt();
        self.window.push_turn(&system, &outgoing);
        // Unanswered turns add no reply; the request itself must fit the cap.
        self.trim_window();
        let entry = self.history.record_question(question);
        self.transcript_mut()
            .render(Sender::User, question, RenderOptions::default().linked(entry));

        self.phase = TurnPhase::Sending;
        self.locks = ControlLocks::SENDING;

        let request = self.next_request;
        self.next_request += 1;
        let token = CancellationToken::new();
        let messages = self.window.entries().to_vec();
        let provider = Arc::clone(&self.completion);
        let events = self.events_tx.clone();
        let task_token = token.clone();
        self.runtime.spawn(async move {
            let result = provider.complete(&messages, task_token).await;
            let _ = events.send(ControllerEvent::Completion { request, result });
        });

        tracing::debug!(
            "Request {} sent with {} context entries ({:?} mode)",
            request,
            self.window.len(),
            self.mode
        );
        self.in_flight = Some(InFlight {
            request,
            token,
            question: question.to_string(),
            entry,
            table: self.mode.table(),
            reply: None,
        });
        true
    }

    /// Folds finished network work and typewriter progress into the state.
    pub fn poll(&mut self) {
        let events: Vec<ControllerEvent> = self.events_rx.try_iter().collect();
        for event in events {
            self.handle(event);
        }

        let mut finished = self.transcript.pump();
        finished.extend(self.agent_transcript.pump());
        let reply_done = self
            .in_flight
            .as_ref()
            .and_then(|f| f.reply)
            .is_some_and(|reply| {
                finished.contains(&reply) || self.transcript().revealing_message() != Some(reply)
            });
        if self.phase == TurnPhase::Streaming && reply_done {
            self.finish_turn(TurnPhase::Idle);
        }
    }

    pub fn handle(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Completion { request, result } => self.on_completion(request, result),
            ControllerEvent::Ingested { file_name, result } => self.on_ingested(&file_name, result),
        }
    }

    fn on_completion(&mut self, request: u64, result: Result<String, CompletionError>) {
        let current = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.request == request && f.reply.is_none());
        if !current || self.phase != TurnPhase::Sending {
            tracing::debug!("Dropping stale completion for request {}", request);
            return;
        }
        let Some(flight) = self.in_flight.as_ref() else {
            return;
        };
        let (entry, table, question) = (flight.entry, flight.table, flight.question.clone());

        match result {
            Ok(reply) => {
                self.window.push_assistant(&reply);
                self.trim_window();

                let reveal = self.transcript().reveal_duration(&reply);
                let id = self
                    .transcript_mut()
                    .render(Sender::Bot, &reply, RenderOptions::reply().linked(entry));
                self.history.record_answer(&reply, Some(reveal));
                self.history.persist(table, &question, &reply);
                self.history.count_reply();

                if self.transcript().revealing_message() == Some(id) {
                    self.phase = TurnPhase::Streaming;
                    self.locks = ControlLocks::STREAMING;
                    if let Some(flight) = self.in_flight.as_mut() {
                        flight.reply = Some(id);
                    }
                } else {
                    self.finish_turn(TurnPhase::Idle);
                }
            }
            Err(error) if error.is_cancelled() => {
                tracing::debug!("Request {} reported cancellation", request);
            }
            Err(error) => {
                tracing::warn!("Request {} failed: {}", request, error);
                self.phase = TurnPhase::Failed;
                let text = format!("Request failed: {error}");
                self.transcript_mut()
                    .render(Sender::Bot, &text, RenderOptions::error().linked(entry));
                self.history.record_answer(&text, None);
                self.history.persist(table, &question, &text);
                self.finish_turn(TurnPhase::Failed);
            }
        }
    }

    /// Aborts the running turn. A reply that is still being revealed is shown
    /// in full; the notice only appears when no reply text existed yet.
    pub fn cancel(&mut self) -> bool {
        let Some(flight) = self.in_flight.as_ref() else {
            return false;
        };
        flight.token.cancel();

        match self.phase {
            TurnPhase::Sending => {
                self.transcript_mut()
                    .render(Sender::Bot, CANCELLED_NOTICE, RenderOptions::notice());
            }
            TurnPhase::Streaming => {
                self.transcript_mut().finish_reveal();
                self.history.flush_pending();
            }
            _ => return false,
        }
        self.transcript().stop_speech();
        self.phase = TurnPhase::Cancelled;
        tracing::info!("Turn cancelled");
        self.finish_turn(TurnPhase::Cancelled);
        true
    }

    fn trim_window(&mut self) {
        let evicted = self.window.trim();
        if !evicted.is_empty() {
            tracing::debug!("Context window evicted {} entries", evicted.len());
        }
    }

    fn finish_turn(&mut self, outcome: TurnPhase) {
        self.in_flight = None;
        self.last_outcome = Some(outcome);
        self.phase = TurnPhase::Idle;
        self.locks = ControlLocks::IDLE;
        self.focus_input = true;
    }

    /// Retracts a user message. Only allowed between turns so a reply in
    /// flight can never land on the wrong log entry.
    pub fn recall(&mut self, id: MessageId) -> Recall {
        if self.phase != TurnPhase::Idle {
            return Recall::NotRecallable;
        }
        let history = self.history.clone();
        self.transcript_mut().recall(id, &history)
    }

    /// Switches to the agent surface with `agent` as its system prompt. The
    /// default window is put aside and restored untouched by
    /// [`exit_agent_mode`](Self::exit_agent_mode).
    pub fn enter_agent_mode(&mut self, agent: AgentProfile) {
        self.cancel();
        tracing::info!("Entering agent mode with {}", agent.name);
        self.agent = Some(agent);
        if self.mode == ChatMode::Agent {
            return;
        }
        let fresh = ContextWindow::with_cap(self.context_cap);
        self.saved_window = Some(std::mem::replace(&mut self.window, fresh));
        self.mode = ChatMode::Agent;
    }

    /// Changes the agent used by the next agent-mode send.
    pub fn select_agent(&mut self, agent: AgentProfile) {
        self.agent = Some(agent);
    }

    pub fn agent(&self) -> Option<&AgentProfile> {
        self.agent.as_ref()
    }

    pub fn exit_agent_mode(&mut self) {
        if self.mode != ChatMode::Agent {
            return;
        }
        self.cancel();
        self.window = self
            .saved_window
            .take()
            .unwrap_or_else(|| ContextWindow::with_cap(self.context_cap));
        self.mode = ChatMode::Default;
        tracing::info!("Left agent mode");
    }

    /// Replays a stored exchange into the active transcript.
    pub fn show_record(&mut self, record: &ConversationRecord) {
        self.transcript_mut().render_record(record);
    }

    pub fn show_notice(&mut self, text: &str) {
        self.transcript_mut()
            .render(Sender::Bot, text, RenderOptions::notice());
    }

    /// Starts ingesting `file` in the background; the outcome lands in the
    /// transcript on a later [`poll`](Self::poll).
    pub fn ingest(&mut self, file: IngestFile) {
        let ingestor = self.ingestor.clone();
        let events = self.events_tx.clone();
        let file_name = file.name.clone();
        self.ingesting += 1;
        self.show_notice(&format!("Reading {file_name}..."));
        self.runtime.spawn(async move {
            let result = ingestor.ingest(file).await;
            let _ = events.send(ControllerEvent::Ingested { file_name, result });
        });
    }

    fn on_ingested(&mut self, file_name: &str, result: Result<IngestOutcome, AppError>) {
        self.ingesting = self.ingesting.saturating_sub(1);
        let (text, options) = match result {
            Ok(IngestOutcome::Summarized { summary, .. }) => (
                format!("Summary of {file_name}:\n{summary}"),
                RenderOptions::default(),
            ),
            Ok(IngestOutcome::SummaryFailed { error, .. }) => (
                format!("{file_name} is loaded for your next question, but the summary failed: {error}"),
                RenderOptions::error(),
            ),
            Ok(IngestOutcome::NoText { .. }) => (
                format!("No text could be recognised in {file_name}. Try a clearer image or a different file."),
                RenderOptions::notice(),
            ),
            Err(error) => (format!("Could not use {file_name}: {error}"), RenderOptions::error()),
        };
        self.transcript_mut().render(Sender::Bot, &text, options);
    }

    /// Starts over: clears the window, the transcript and the session log.
    pub fn new_conversation(&mut self) {
        self.cancel();
        self.window.clear();
        self.transcript_mut().clear();
        self.history.clear();
        self.file_context.clear();
        self.last_outcome = None;
    }

    pub fn set_user_avatar(&mut self, url: &str) {
        self.transcript.set_user_avatar(url);
        self.agent_transcript.set_user_avatar(url);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::app_context::testing::{context, TestContext};
    use crate::backend::sqlite::SqliteRowStore;
    use crate::backend::{Query, RowStore};
    use crate::chat::window::{ContextEntry, Role};
    use crate::completion::testing::ScriptedProvider;
    use crate::config::AppConfig;
    use crate::ingest::CachedFile;

    struct Harness {
        controller: ConversationController,
        rows: Arc<SqliteRowStore>,
        provider: Arc<ScriptedProvider>,
        test: TestContext,
    }

    fn harness(provider: ScriptedProvider) -> Harness {
        let rows = Arc::new(SqliteRowStore::open_in_memory().unwrap());
        let provider = Arc::new(provider);
        let mut config = AppConfig::default();
        config.chat.typewriter_interval_ms = 10;
        config.chat.system_prompt = "sys".to_string();
        let test = context(rows.clone(), provider.clone(), config);
        Harness {
            controller: ConversationController::new(&test.ctx),
            rows,
            provider,
            test,
        }
    }

    /// Lets spawned tasks run and folds their results in.
    async fn settle(controller: &mut ConversationController) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
            controller.poll();
        }
    }

    async fn stored(rows: &SqliteRowStore, table: Table) -> Vec<serde_json::Value> {
        rows.select(table, &Query::new()).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn blank_input_is_a_no_op() {
        let mut h = harness(ScriptedProvider::replying("unused"));
        assert!(!h.controller.submit("   \n\t"));
        assert_eq!(h.controller.phase(), TurnPhase::Idle);
        assert!(h.controller.window().is_empty());
        assert!(h.controller.transcript().is_empty());
        assert!(h.controller.history().entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_turn() {
        let mut h = harness(ScriptedProvider::replying("4"));
        assert!(h.controller.submit("What is 2+2?"));
        assert_eq!(h.controller.phase(), TurnPhase::Sending);
        assert_eq!(h.controller.locks(), ControlLocks::SENDING);

        settle(&mut h.controller).await;
        assert_eq!(h.controller.phase(), TurnPhase::Streaming);

        let calls = h.provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            vec![
                ContextEntry::new(Role::System, "sys"),
                ContextEntry::new(Role::User, "What is 2+2?"),
            ]
        );

        // Reply "4" reveals in one 10ms frame.
        tokio::time::sleep(Duration::from_millis(15)).await;
        settle(&mut h.controller).await;
        assert_eq!(h.controller.phase(), TurnPhase::Idle);
        assert_eq!(h.controller.last_outcome(), Some(TurnPhase::Idle));
        assert_eq!(h.controller.locks(), ControlLocks::IDLE);
        assert!(h.controller.take_focus_request());

        let rows = stored(&h.rows, Table::Conversations).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["user_message"], "What is 2+2?");
        assert_eq!(rows[0]["assistant_message"], "4");
        assert_eq!(rows[0]["user_id"], "u1");

        assert_eq!(h.controller.window().len(), 3);
        assert_eq!(h.controller.history().entries()[0].answer, "4");
    }

    #[tokio::test(start_paused = true)]
    async fn history_answer_waits_for_the_reveal() {
        let mut h = harness(ScriptedProvider::replying("abcdef"));
        h.controller.submit("q");
        settle(&mut h.controller).await;
        assert_eq!(h.controller.phase(), TurnPhase::Streaming);
        assert_eq!(h.controller.history().entries()[0].answer, "");

        tokio::time::sleep(Duration::from_millis(59)).await;
        settle(&mut h.controller).await;
        assert_eq!(h.controller.history().entries()[0].answer, "");

        tokio::time::sleep(Duration::from_millis(2)).await;
        settle(&mut h.controller).await;
        assert_eq!(h.controller.history().entries()[0].answer, "abcdef");
        assert_eq!(h.controller.phase(), TurnPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_reply_persists_nothing_and_unlocks() {
        let mut h = harness(ScriptedProvider::replying("late").with_delay(Duration::from_secs(5)));
        h.controller.submit("slow question");
        settle(&mut h.controller).await;
        assert_eq!(h.controller.phase(), TurnPhase::Sending);

        assert!(h.controller.cancel());
        assert_eq!(h.controller.phase(), TurnPhase::Idle);
        assert_eq!(h.controller.last_outcome(), Some(TurnPhase::Cancelled));
        let locks = h.controller.locks();
        assert!(!locks.busy);
        assert!(locks.input_enabled && locks.send_enabled);
        assert!(!locks.cancel_enabled);

        let last = h.controller.transcript().messages().last().unwrap();
        assert_eq!(last.text, CANCELLED_NOTICE);

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle(&mut h.controller).await;
        assert!(stored(&h.rows, Table::Conversations).await.is_empty());
        assert_eq!(h.controller.transcript().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_reveal_shows_full_text_without_notice() {
        let mut h = harness(ScriptedProvider::replying("a long buffered reply"));
        h.controller.submit("q");
        settle(&mut h.controller).await;
        assert_eq!(h.controller.phase(), TurnPhase::Streaming);

        assert!(h.controller.cancel());
        let messages = h.controller.transcript().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].visible_text(), "a long buffered reply");
        assert_eq!(h.controller.history().entries()[0].answer, "a long buffered reply");
        assert_eq!(*h.test.speech.stops.lock().unwrap(), 1);
        assert_eq!(h.controller.phase(), TurnPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_rendered_and_persisted_as_the_answer() {
        let mut h = harness(ScriptedProvider::new(vec![Err(CompletionError::Http {
            status: 502,
            body: "bad gateway".to_string(),
        })]));
        h.controller.submit("q");
        settle(&mut h.controller).await;

        assert_eq!(h.controller.phase(), TurnPhase::Idle);
        assert_eq!(h.controller.last_outcome(), Some(TurnPhase::Failed));
        let last = h.controller.transcript().messages().last().unwrap();
        assert!(last.text.contains("bad gateway"));

        let rows = stored(&h.rows, Table::Conversations).await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0]["assistant_message"].as_str().unwrap().contains("502"));
        // Failed turns do not add an assistant entry.
        assert_eq!(h.controller.window().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_turns_stay_within_the_window_cap() {
        let failures = (0..8)
            .map(|_| {
                Err(CompletionError::Http {
                    status: 500,
                    body: "upstream down".to_string(),
                })
            })
            .collect();
        let mut h = harness(ScriptedProvider::new(failures));
        for i in 0..8 {
            assert!(h.controller.submit(&format!("question {i}")));
            settle(&mut h.controller).await;
            assert_eq!(h.controller.last_outcome(), Some(TurnPhase::Failed));
            assert!(h.controller.window().len() <= 10);
        }
        let last_call = h.provider.calls().pop().unwrap();
        assert!(last_call.len() <= 10);
        assert_eq!(
            h.controller.window().entries().last(),
            Some(&ContextEntry::new(Role::User, "question 7"))
        );

        // Cancelled turns never get a reply either.
        for i in 0..6 {
            assert!(h.controller.submit(&format!("dropped {i}")));
            assert!(h.controller.cancel());
            assert!(h.controller.window().len() <= 10);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn replies_bump_the_conversation_count() {
        let mut h = harness(ScriptedProvider::new(vec![
            Ok("4".into()),
            Err(CompletionError::Http {
                status: 500,
                body: "down".to_string(),
            }),
        ]));
        h.rows
            .insert(Table::Users, serde_json::json!({ "id": "u1", "conversations": 2 }))
            .await
            .unwrap();

        h.controller.submit("What is 2+2?");
        settle(&mut h.controller).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        settle(&mut h.controller).await;
        h.controller.submit("again");
        settle(&mut h.controller).await;

        let users = stored(&h.rows, Table::Users).await;
        assert_eq!(users[0]["conversations"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_while_busy_is_ignored() {
        let mut h = harness(ScriptedProvider::replying("x").with_delay(Duration::from_secs(1)));
        assert!(h.controller.submit("first"));
        assert!(!h.controller.submit("second"));
        assert_eq!(h.controller.window().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn file_context_prefixes_outgoing_content_only() {
        let mut h = harness(ScriptedProvider::replying("ok"));
        h.test.ctx.file_context.set(CachedFile {
            file_name: "notes.txt".to_string(),
            text: "the notes".to_string(),
        });
        h.controller.submit("summarise");
        settle(&mut h.controller).await;

        let sent = &h.provider.calls()[0][1].content;
        assert!(sent.contains("the notes"));
        assert!(sent.ends_with("summarise"));
        assert_eq!(h.controller.transcript().messages()[0].text, "summarise");
        // Read, not consumed.
        assert!(h.test.ctx.file_context.get().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn agent_mode_restores_the_default_window() {
        let mut h = harness(ScriptedProvider::new(vec![Ok("4".into()), Ok("agent".into())]));
        h.controller.submit("What is 2+2?");
        settle(&mut h.controller).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        settle(&mut h.controller).await;
        let before = h.controller.window().clone();

        let agent = crate::agents::presets().remove(2);
        let agent_prompt = agent.system_prompt.clone();
        h.controller.enter_agent_mode(agent);
        assert!(h.controller.window().is_empty());
        h.controller.submit("translate this");
        settle(&mut h.controller).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        settle(&mut h.controller).await;

        let agent_call = &h.provider.calls()[1];
        assert_eq!(agent_call[0], ContextEntry::new(Role::System, agent_prompt));
        assert_eq!(agent_call.len(), 2);
        assert_eq!(stored(&h.rows, Table::ConversationsAdd).await.len(), 1);

        h.controller.exit_agent_mode();
        assert_eq!(h.controller.mode(), ChatMode::Default);
        assert_eq!(*h.controller.window(), before);
        assert_eq!(h.controller.transcript().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn recall_is_refused_mid_turn() {
        let mut h = harness(ScriptedProvider::replying("x").with_delay(Duration::from_secs(1)));
        h.controller.submit("q");
        let user = h.controller.transcript().messages()[0].id;
        assert_eq!(h.controller.recall(user), Recall::NotRecallable);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_ocr_result_renders_a_warning_and_writes_nothing() {
        let mut h = harness(ScriptedProvider::replying("unused"));
        let mut png = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(image::RgbImage::new(4000, 10))
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        h.controller.ingest(IngestFile {
            name: "blank.png".to_string(),
            mime: Some("image/png".to_string()),
            bytes: png.into_inner(),
        });
        for _ in 0..50 {
            settle(&mut h.controller).await;
            if !h.controller.is_ingesting() {
                break;
            }
        }

        assert!(!h.controller.is_ingesting());
        let last = h.controller.transcript().messages().last().unwrap();
        assert!(last.text.contains("No text could be recognised"));
        assert!(stored(&h.rows, Table::DocumentAnalysis).await.is_empty());
        assert!(h.test.ctx.file_context.get().is_none());
        assert!(h.provider.calls().is_empty());
    }
}
