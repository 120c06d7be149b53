//! Character-by-character reveal of a reply that has already fully arrived.
//!
//! The reveal is a lazy, finite stream of frames: frame `n` means "the first
//! `n` characters are visible". Frames are one interval apart, so the last
//! frame lands `len * interval` after the stream starts. Cancelling the token
//! closes the stream early; the renderer then shows the full text at once.

use std::time::Duration;

use futures_util::stream::{self, Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::transcript::MessageId;

#[derive(Debug, Clone)]
pub struct Typewriter {
    total: usize,
    interval: Duration,
}

impl Typewriter {
    pub fn new(text: &str, interval: Duration) -> Self {
        Self {
            total: text.chars().count(),
            interval,
        }
    }

    /// Time from start until the final character is shown.
    pub fn duration(&self) -> Duration {
        self.interval * self.total as u32
    }

    /// A fresh frame sequence starting from zero characters. Each call
    /// restarts the animation.
    pub fn frames(&self) -> impl Stream<Item = usize> + Send + 'static {
        let total = self.total;
        let interval = self.interval;
        stream::unfold(0usize, move |shown| async move {
            if shown >= total {
                return None;
            }
            tokio::time::sleep(interval).await;
            Some((shown + 1, shown + 1))
        })
    }

    /// Frames that stop as soon as `cancel` fires.
    pub fn frames_until(
        &self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = usize> + Send + 'static {
        self.frames().take_until(cancel.cancelled_owned())
    }
}

/// Progress reported by a running reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealEvent {
    Frame { message: MessageId, shown: usize },
    Finished { message: MessageId },
}

/// A reveal running on the runtime. [`RevealHandle::cancel`] lets the stream
/// close and report `Finished`; dropping the handle aborts the task outright.
#[derive(Debug)]
pub struct RevealHandle {
    pub message: MessageId,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl RevealHandle {
    pub fn spawn(
        runtime: &tokio::runtime::Handle,
        message: MessageId,
        typewriter: Typewriter,
        events: flume::Sender<RevealEvent>,
    ) -> Self {
        let token = CancellationToken::new();
        let frames = typewriter.frames_until(token.clone());
        let task = runtime.spawn(async move {
            futures_util::pin_mut!(frames);
            while let Some(shown) = frames.next().await {
                if events.send(RevealEvent::Frame { message, shown }).is_err() {
                    return;
                }
            }
            let _ = events.send(RevealEvent::Finished { message });
        });
        Self {
            message,
            token,
            task,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for RevealHandle {
    fn drop(&mut self) {
        self.token.cancel();
        self.task.abort();
    }
}

/// First `n` characters of `text`.
pub fn char_prefix(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}
