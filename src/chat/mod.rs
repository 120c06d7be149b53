//! The chat pipeline: context window, transcript rendering, the session log
//! and the controller that ties a send/receive cycle together.

pub mod controller;
pub mod history;
pub mod transcript;
pub mod typewriter;
pub mod window;
