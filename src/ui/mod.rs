//! egui desktop shell. Panels hold only form state and hand user intents back
//! to [`app::ParleyApp`], which talks to the services.

mod agents;
pub mod app;
mod auth;
mod chat;
mod history;
mod profile;
