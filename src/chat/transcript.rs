//! View model of the chat transcript.
//!
//! The egui layer draws whatever is in [`Transcript::messages`] each frame;
//! everything that changes a bubble (appending, typewriter progress, recall,
//! avatar swaps) goes through this type.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};

use super::history::{ConversationRecord, EntryId, HistoryStore};
use super::typewriter::{char_prefix, RevealEvent, RevealHandle, Typewriter};
use crate::speech::SpeechSink;

/// Distance from the bottom (in points) still counted as "at the bottom".
pub const AUTO_SCROLL_THRESHOLD: f32 = 48.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageKind {
    #[default]
    Normal,
    /// Short status line such as "cancelled" or an ingestion warning.
    Notice,
    /// A failed turn; the text carries the cause.
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub id: MessageId,
    pub sender: Sender,
    pub kind: MessageKind,
    pub text: String,
    /// Characters currently visible while a reveal runs; `None` once the
    /// whole text is shown.
    pub revealed: Option<usize>,
    pub avatar: String,
    pub timestamp: DateTime<Local>,
    pub entry: Option<EntryId>,
}

impl RenderedMessage {
    pub fn visible_text(&self) -> &str {
        match self.revealed {
            Some(shown) => char_prefix(&self.text, shown),
            None => &self.text,
        }
    }

    pub fn is_revealing(&self) -> bool {
        self.revealed.is_some()
    }

    pub fn can_recall(&self) -> bool {
        self.sender == Sender::User && self.kind == MessageKind::Normal
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub use_typewriter: bool,
    pub use_speech: bool,
    pub kind: MessageKind,
    pub entry: Option<EntryId>,
}

impl RenderOptions {
    /// A finished bot reply: typewriter reveal plus speech.
    pub fn reply() -> Self {
        Self {
            use_typewriter: true,
            use_speech: true,
            ..Self::default()
        }
    }

    pub fn notice() -> Self {
        Self {
            kind: MessageKind::Notice,
            ..Self::default()
        }
    }

    pub fn error() -> Self {
        Self {
            kind: MessageKind::Error,
            ..Self::default()
        }
    }

    pub fn linked(mut self, entry: EntryId) -> Self {
        self.entry = Some(entry);
        self
    }
}

/// Last known geometry of the scroll area, reported by the UI after each
/// frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollState {
    pub offset: f32,
    pub viewport: f32,
    pub content: f32,
}

impl ScrollState {
    pub fn distance_from_bottom(&self) -> f32 {
        (self.content - (self.offset + self.viewport)).max(0.0)
    }

    pub fn near_bottom(&self) -> bool {
        self.distance_from_bottom() <= AUTO_SCROLL_THRESHOLD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recall {
    /// Not a user message, or no such message.
    NotRecallable,
    Retracted {
        /// The paired bot bubble was removed (reply never finalised).
        reply_removed: bool,
        /// The paired bot bubble was kept but its text blanked.
        reply_blanked: bool,
    },
}

pub struct Transcript {
    messages: Vec<RenderedMessage>,
    next_id: u64,
    scroll: ScrollState,
    scroll_to_bottom: bool,
    reveal: Option<RevealHandle>,
    reveal_tx: flume::Sender<RevealEvent>,
    reveal_rx: flume::Receiver<RevealEvent>,
    runtime: tokio::runtime::Handle,
    speech: Arc<dyn SpeechSink>,
    interval: Duration,
    user_avatar: String,
    bot_avatar: String,
}

impl Transcript {
    pub fn new(
        runtime: tokio::runtime::Handle,
        speech: Arc<dyn SpeechSink>,
        interval: Duration,
        user_avatar: impl Into<String>,
        bot_avatar: impl Into<String>,
    ) -> Self {
        let (reveal_tx, reveal_rx) = flume::unbounded();
        Self {
            messages: Vec::new(),
            next_id: 1,
            scroll: ScrollState::default(),
            scroll_to_bottom: false,
            reveal: None,
            reveal_tx,
            reveal_rx,
            runtime,
            speech,
            interval,
            user_avatar: user_avatar.into(),
            bot_avatar: bot_avatar.into(),
        }
    }

    pub fn messages(&self) -> &[RenderedMessage] {
        &self.messages
    }

    #[cfg(test)]
    pub fn get(&self, id: MessageId) -> Option<&RenderedMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Time a typewriter reveal of `text` takes at the configured interval.
    pub fn reveal_duration(&self, text: &str) -> Duration {
        Typewriter::new(text, self.interval).duration()
    }

    /// Appends a bubble. Typewriter and speech only apply to bot messages.
    pub fn render(&mut self, sender: Sender, text: &str, options: RenderOptions) -> MessageId {
        let stick = self.scroll.near_bottom();
        let id = MessageId(self.next_id);
        self.next_id += 1;

        let animate = options.use_typewriter && sender == Sender::Bot && !text.is_empty();
        if animate {
            self.finish_reveal();
        }
        if options.use_speech && sender == Sender::Bot {
            self.speech.speak(text);
        }

        let avatar = match sender {
            Sender::User => self.user_avatar.clone(),
            Sender::Bot => self.bot_avatar.clone(),
        };
        self.messages.push(RenderedMessage {
            id,
            sender,
            kind: options.kind,
            text: text.to_string(),
            revealed: animate.then_some(0),
            avatar,
            timestamp: Local::now(),
            entry: options.entry,
        });

        if animate {
            self.reveal = Some(RevealHandle::spawn(
                &self.runtime,
                id,
                Typewriter::new(text, self.interval),
                self.reveal_tx.clone(),
            ));
        }
        if stick {
            self.scroll_to_bottom = true;
        }
        id
    }

    /// Renders a persisted exchange as a user bubble followed by a bot bubble.
    pub fn render_record(&mut self, record: &ConversationRecord) -> (MessageId, MessageId) {
        let user = self.render(Sender::User, &record.user_message, RenderOptions::default());
        let bot = self.render(Sender::Bot, &record.assistant_message, RenderOptions::default());
        (user, bot)
    }

    /// Applies one reveal event. Returns the message id when its reveal is
    /// complete.
    pub fn apply(&mut self, event: RevealEvent) -> Option<MessageId> {
        match event {
            RevealEvent::Frame { message, shown } => {
                if let Some(msg) = self.messages.iter_mut().find(|m| m.id == message) {
                    if msg.revealed.is_some() {
                        msg.revealed = Some(shown);
                        if self.scroll.near_bottom() {
                            self.scroll_to_bottom = true;
                        }
                    }
                }
                None
            }
            RevealEvent::Finished { message } => {
                if self.reveal.as_ref().is_some_and(|r| r.message == message) {
                    self.reveal = None;
                }
                let msg = self.messages.iter_mut().find(|m| m.id == message)?;
                msg.revealed.take().map(|_| message)
            }
        }
    }

    /// Drains pending reveal events; returns the messages whose reveal ended.
    pub fn pump(&mut self) -> Vec<MessageId> {
        let events: Vec<RevealEvent> = self.reveal_rx.try_iter().collect();
        events.into_iter().filter_map(|e| self.apply(e)).collect()
    }

    pub fn is_revealing(&self) -> bool {
        self.reveal.is_some()
    }

    pub fn revealing_message(&self) -> Option<MessageId> {
        self.reveal.as_ref().map(|r| r.message)
    }

    /// Stops the running reveal and shows its full text at once.
    pub fn finish_reveal(&mut self) -> Option<MessageId> {
        let handle = self.reveal.take()?;
        handle.cancel();
        if let Some(msg) = self.messages.iter_mut().find(|m| m.id == handle.message) {
            msg.revealed = None;
        }
        Some(handle.message)
    }

    pub fn stop_speech(&self) {
        self.speech.stop();
    }

    /// Retracts a user message and deals with the reply right after it.
    ///
    /// An unfinalised reply (its log answer still empty) is removed together
    /// with the log entry; a finalised reply keeps its bubble and log entry
    /// but the bubble text is blanked.
    pub fn recall(&mut self, id: MessageId, history: &HistoryStore) -> Recall {
        let Some(index) = self.messages.iter().position(|m| m.id == id) else {
            return Recall::NotRecallable;
        };
        if !self.messages[index].can_recall() {
            return Recall::NotRecallable;
        }

        let user = self.messages.remove(index);
        let answered = user
            .entry
            .and_then(|entry| history.entry(entry))
            .is_some_and(|e| !e.answer.is_empty());

        let reply_index = self
            .messages
            .get(index)
            .filter(|m| m.sender == Sender::Bot)
            .map(|_| index);

        let mut outcome = Recall::Retracted {
            reply_removed: false,
            reply_blanked: false,
        };
        match reply_index {
            Some(reply) if !answered => {
                let removed = self.messages.remove(reply);
                if self.revealing_message() == Some(removed.id) {
                    if let Some(handle) = self.reveal.take() {
                        handle.cancel();
                    }
                    self.speech.stop();
                }
                outcome = Recall::Retracted {
                    reply_removed: true,
                    reply_blanked: false,
                };
            }
            Some(reply) => {
                let msg = &mut self.messages[reply];
                msg.text.clear();
                msg.revealed = None;
                outcome = Recall::Retracted {
                    reply_removed: false,
                    reply_blanked: true,
                };
            }
            None => {}
        }

        if !answered {
            if let Some(entry) = user.entry {
                history.remove_entry(entry);
            }
        }
        tracing::debug!("Recalled message {:?}: {:?}", id, outcome);
        outcome
    }

    /// Swaps the avatar on every user bubble already rendered and on future
    /// ones.
    pub fn set_user_avatar(&mut self, url: impl Into<String>) {
        self.user_avatar = url.into();
        for msg in self.messages.iter_mut().filter(|m| m.sender == Sender::User) {
            msg.avatar = self.user_avatar.clone();
        }
    }

    pub fn clear(&mut self) {
        self.finish_reveal();
        self.messages.clear();
        self.scroll_to_bottom = true;
    }

    pub fn update_scroll(&mut self, offset: f32, viewport: f32, content: f32) {
        self.scroll = ScrollState {
            offset,
            viewport,
            content,
        };
    }

    /// True once after an append that should pull the view to the bottom.
    pub fn take_scroll_request(&mut self) -> bool {
        std::mem::take(&mut self.scroll_to_bottom)
    }
}
