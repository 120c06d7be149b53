use std::time::Duration;

use eframe::egui;

use super::agents::{AgentAction, AgentsPanel};
use super::auth::{AuthAction, AuthMode, AuthPanel};
use super::chat::render_transcript;
use super::history::{HistoryAction, HistoryPanel};
use super::profile::{ProfileAction, ProfilePanel};
use crate::account::{AccountService, Registration, SignedIn};
use crate::agents::AgentRegistry;
use crate::app_context::AppContext;
use crate::backend::AuthEvent;
use crate::chat::controller::{ChatMode, ConversationController, TurnPhase};
use crate::chat::transcript::Recall;
use crate::error::{AppError, Remediation};
use crate::ingest::IngestFile;
use crate::prefs::{Prefs, Theme};

const RECENT_HISTORY_LIMIT: usize = 50;
const UPLOAD_EXTENSIONS: &[&str] = &[
    "txt", "pdf", "docx", "png", "jpg", "jpeg", "gif", "webp", "bmp",
];
const AVATAR_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Auth,
    Chat,
}

pub struct ParleyApp {
    runtime: tokio::runtime::Runtime,
    app_ctx: AppContext,
    account: AccountService,
    agents: AgentRegistry,
    controller: ConversationController,
    prefs: Prefs,
    screen: Screen,
    user_input: String,
    auth_panel: AuthPanel,
    history_panel: HistoryPanel,
    agents_panel: AgentsPanel,
    profile_panel: ProfilePanel,
}

impl ParleyApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        runtime: tokio::runtime::Runtime,
        app_ctx: AppContext,
    ) -> Self {
        let prefs = Prefs::load();
        prefs.theme.apply(&cc.egui_ctx);

        let mut app = Self {
            account: AccountService::new(&app_ctx),
            agents: AgentRegistry::new(app_ctx.backend.rows.clone(), app_ctx.session.clone()),
            controller: ConversationController::new(&app_ctx),
            runtime,
            app_ctx,
            prefs,
            screen: Screen::Auth,
            user_input: String::new(),
            auth_panel: AuthPanel::new(),
            history_panel: HistoryPanel::new(),
            agents_panel: AgentsPanel::new(),
            profile_panel: ProfilePanel::new(),
        };

        if let Some(session) = app.app_ctx.backend.auth.current_session() {
            tracing::info!("Resuming session for {}", session.user.id);
            app.on_signed_in(SignedIn {
                user: session.user,
                profile: None,
            });
            app.reload_profile();
        }
        app
    }

    fn on_signed_in(&mut self, signed_in: SignedIn) {
        self.app_ctx.session.apply(&AuthEvent::SignedIn {
            user: signed_in.user.clone(),
        });
        if let Some(url) = signed_in
            .profile
            .as_ref()
            .and_then(|p| p.avatar_url.as_deref())
        {
            self.controller.set_user_avatar(url);
        }
        self.profile_panel.set_profile(signed_in.profile);
        self.refresh_agents();
        self.controller.new_conversation();
        self.auth_panel.reset();
        self.user_input.clear();
        self.screen = Screen::Chat;
    }

    fn refresh_agents(&mut self) {
        if let Err(error) = self.runtime.block_on(self.agents.refresh()).map(|_| ()) {
            tracing::warn!("Custom agents unavailable: {}", error);
        }
        if let Some(agent) = self.agents.selected().cloned() {
            self.controller.select_agent(agent);
        }
    }

    fn handle_auth(&mut self, action: AuthAction) {
        match action {
            AuthAction::Login { email, password } => {
                match self.runtime.block_on(self.account.login(&email, &password)) {
                    Ok(signed_in) => self.on_signed_in(signed_in),
                    Err(error) => self.show_auth_error(error),
                }
            }
            AuthAction::Register {
                email,
                password,
                confirm,
            } => match self
                .runtime
                .block_on(self.account.register(&email, &password, &confirm))
            {
                Ok(Registration::Complete { .. }) => {
                    self.auth_panel.switch(AuthMode::Login);
                    self.auth_panel.set_info(
                        "Account created. Open the verification link we emailed you, then sign in.",
                    );
                }
                Ok(Registration::ProfileNotSaved { warning, .. }) => {
                    self.auth_panel.switch(AuthMode::Login);
                    self.auth_panel.set_info(warning);
                }
                Err(error) => self.show_auth_error(error),
            },
            AuthAction::ResetPassword { email } => {
                match self.runtime.block_on(self.account.request_password_reset(&email)) {
                    Ok(()) => self
                        .auth_panel
                        .set_info("If that address is registered, a reset link is on its way."),
                    Err(error) => self.show_auth_error(error),
                }
            }
            AuthAction::Resend { email } => {
                match self.runtime.block_on(self.account.resend_verification(&email)) {
                    Ok(()) => self
                        .auth_panel
                        .set_info(format!("Verification email sent to {email}.")),
                    Err(error) => self.show_auth_error(error),
                }
            }
        }
    }

    fn show_auth_error(&mut self, error: AppError) {
        let (message, remediation): (String, Option<Remediation>) = match error {
            AppError::Auth {
                message,
                remediation,
            } => (message, remediation),
            other => (other.to_string(), None),
        };
        self.auth_panel.set_error(message, remediation);
    }

    fn logout(&mut self) {
        if let Err(error) = self.runtime.block_on(self.account.logout()) {
            tracing::warn!("{}", error);
        }
        self.leave_chat();
        self.auth_panel.set_info("Signed out.");
    }

    fn leave_chat(&mut self) {
        self.app_ctx.session.apply(&AuthEvent::SignedOut);
        if self.controller.mode() == ChatMode::Agent {
            self.controller.new_conversation();
            self.controller.exit_agent_mode();
        }
        self.controller.new_conversation();
        self.profile_panel.clear();
        self.history_panel.show = false;
        self.agents_panel.show = false;
        self.refresh_agents();
        self.auth_panel.reset();
        self.screen = Screen::Auth;
    }

    fn send(&mut self) {
        if self.controller.submit(&self.user_input) {
            self.user_input.clear();
        }
    }

    fn toggle_agent_mode(&mut self, enabled: bool) {
        if enabled {
            match self.agents.selected().cloned() {
                Some(agent) => self.controller.enter_agent_mode(agent),
                None => self.controller.show_notice("No agent available."),
            }
        } else {
            self.controller.exit_agent_mode();
        }
        self.history_panel.show = false;
    }

    fn choose_agent(&mut self, id: &str) {
        if let Some(agent) = self.agents.select(id).cloned() {
            tracing::debug!("Agent selected: {}", agent.name);
            self.controller.select_agent(agent);
        }
    }

    fn handle_agent_action(&mut self, action: AgentAction) {
        match action {
            AgentAction::Create {
                name,
                system_prompt,
            } => match self
                .runtime
                .block_on(self.agents.create(&name, &system_prompt))
            {
                Ok(agent) => {
                    self.agents_panel.created();
                    self.controller.select_agent(agent);
                }
                Err(error) => self.agents_panel.set_error(error.to_string()),
            },
            AgentAction::Delete(id) => match self.runtime.block_on(self.agents.delete(&id)) {
                Ok(()) => {
                    if let Some(agent) = self.agents.selected().cloned() {
                        self.controller.select_agent(agent);
                    }
                }
                Err(error) => self.agents_panel.set_error(error.to_string()),
            },
        }
    }

    fn handle_history(&mut self, action: HistoryAction) {
        let table = self.controller.mode().table();
        let history = self.controller.history().clone();
        let result = match action {
            HistoryAction::Recent => self
                .runtime
                .block_on(history.list_recent(table, RECENT_HISTORY_LIMIT)),
            HistoryAction::Search(keyword) => self.runtime.block_on(history.search(table, &keyword)),
            HistoryAction::ByDate(date) => self.runtime.block_on(history.list_by_date(table, date)),
            HistoryAction::Open(record) => {
                self.controller.show_record(&record);
                return;
            }
        };
        match result {
            Ok(records) => self.history_panel.set_records(records),
            Err(error) => {
                tracing::warn!("History query failed: {}", error);
                self.history_panel.set_error(error.to_string());
            }
        }
    }

    fn handle_profile(&mut self, action: ProfileAction) {
        match action {
            ProfileAction::Reload => self.reload_profile(),
            ProfileAction::SaveName(name) => {
                match self.runtime.block_on(self.account.save_display_name(&name)) {
                    Ok(()) => {
                        self.reload_profile();
                        self.profile_panel.set_info("Name saved.");
                    }
                    Err(error) => self.profile_panel.set_error(error.to_string()),
                }
            }
            ProfileAction::PickAvatar => self.pick_avatar(),
            ProfileAction::UpdatePassword { password, confirm } => {
                match self
                    .runtime
                    .block_on(self.account.update_password(&password, &confirm))
                {
                    Ok(()) => self.profile_panel.password_updated(),
                    Err(error) => self.profile_panel.set_error(error.to_string()),
                }
            }
        }
    }

    fn reload_profile(&mut self) {
        match self.runtime.block_on(self.account.load_profile()) {
            Ok(profile) => {
                if let Some(url) = profile.avatar_url.as_deref() {
                    self.controller.set_user_avatar(url);
                }
                self.profile_panel.set_profile(Some(profile));
            }
            Err(error) => {
                tracing::warn!("Failed to load profile: {}", error);
                self.profile_panel.set_error(error.to_string());
            }
        }
    }

    fn pick_avatar(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("Images", AVATAR_EXTENSIONS)
            .pick_file()
        else {
            return;
        };
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) => {
                self.profile_panel
                    .set_error(format!("Could not read {}: {}", path.display(), error));
                return;
            }
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "avatar.png".to_string());

        match self
            .runtime
            .block_on(self.account.upload_avatar(&file_name, bytes))
        {
            Ok(url) => {
                self.controller.set_user_avatar(&url);
                self.profile_panel.set_avatar(&url);
                self.profile_panel.set_info("Avatar updated.");
            }
            Err(error) => self.profile_panel.set_error(error.to_string()),
        }
    }

    fn pick_document(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("Documents and images", UPLOAD_EXTENSIONS)
            .pick_file()
        else {
            return;
        };
        match IngestFile::from_path(&path) {
            Ok(file) => self.controller.ingest(file),
            Err(error) => self.controller.show_notice(&error.to_string()),
        }
    }

    fn set_theme(&mut self, ctx: &egui::Context, theme: Theme) {
        if self.prefs.theme == theme {
            return;
        }
        self.prefs.theme = theme;
        theme.apply(ctx);
        if let Err(error) = self.prefs.save() {
            tracing::warn!("Failed to save theme preference: {:#}", error);
        }
    }

    fn render_auth(&mut self, ctx: &egui::Context) {
        let mut action = None;
        let min_password_len = self.account.min_password_len();
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.set_max_width(380.0);
                action = self.auth_panel.render(ui, min_password_len);
            });
        });
        if let Some(action) = action {
            self.handle_auth(action);
        }
    }

    fn render_chat(&mut self, ctx: &egui::Context) {
        self.controller.poll();

        let mut agent_mode = self.controller.mode() == ChatMode::Agent;
        let mut agent_mode_changed = false;
        let mut chosen_agent: Option<String> = None;
        let mut theme = self.prefs.theme;
        let mut open_history = false;
        let mut open_profile = false;
        let mut new_chat = false;
        let mut logout = false;
        let has_conversation =
            !self.controller.window().is_empty() || !self.controller.transcript().is_empty();

        egui::TopBottomPanel::top("chat_header").show(ctx, |ui| {
            ui.add_space(4.0);
            ui.horizontal(|ui| {
                ui.heading("Parley");
                ui.separator();
                agent_mode_changed = ui.checkbox(&mut agent_mode, "Agent mode").changed();

                if agent_mode {
                    let selected_text = self
                        .controller
                        .agent()
                        .map(|a| a.name.clone())
                        .unwrap_or_else(|| "Pick an agent".to_string());
                    let current = self.controller.agent().map(|a| a.id.clone());
                    egui::ComboBox::from_id_salt("agent_picker")
                        .selected_text(selected_text)
                        .show_ui(ui, |ui| {
                            for agent in self.agents.list() {
                                let selected = current.as_deref() == Some(agent.id.as_str());
                                if ui.selectable_label(selected, agent.name.as_str()).clicked() {
                                    chosen_agent = Some(agent.id.clone());
                                }
                            }
                        });
                    if ui.button("Agents...").clicked() {
                        self.agents_panel.show = true;
                    }
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("Log out").clicked() {
                        logout = true;
                    }
                    egui::ComboBox::from_id_salt("theme_picker")
                        .selected_text(theme.label())
                        .show_ui(ui, |ui| {
                            for option in Theme::ALL {
                                ui.selectable_value(&mut theme, option, option.label());
                            }
                        });
                    if ui.button("Profile").clicked() {
                        open_profile = true;
                    }
                    if ui.button("History").clicked() {
                        open_history = true;
                    }
                    if ui
                        .add_enabled(has_conversation, egui::Button::new("New chat"))
                        .clicked()
                    {
                        new_chat = true;
                    }
                });
            });
            ui.add_space(4.0);
        });

        if logout {
            self.logout();
            return;
        }
        if agent_mode_changed {
            self.toggle_agent_mode(agent_mode);
        }
        if let Some(id) = chosen_agent {
            self.choose_agent(&id);
        }
        self.set_theme(ctx, theme);
        if new_chat {
            self.controller.new_conversation();
        }
        if open_history {
            self.history_panel.show = true;
            self.handle_history(HistoryAction::Recent);
        }
        if open_profile {
            self.profile_panel.show = true;
            self.reload_profile();
        }

        let locks = self.controller.locks();
        let focus_requested = self.controller.take_focus_request();
        let mut send_requested = false;
        let mut cancel_requested = false;
        let mut attach_requested = false;

        egui::TopBottomPanel::bottom("composer").show(ctx, |ui| {
            ui.add_space(6.0);
            if let Some(file) = self.app_ctx.file_context.get() {
                ui.horizontal(|ui| {
                    ui.label(
                        egui::RichText::new(format!("Answering with \"{}\" as context", file.file_name))
                            .small()
                            .weak(),
                    );
                    if ui.small_button("Clear").clicked() {
                        self.app_ctx.file_context.clear();
                    }
                });
            }
            ui.label(
                egui::RichText::new("Press Enter to send. Shift+Enter inserts a newline. Esc cancels.")
                    .small()
                    .weak(),
            );
            ui.horizontal(|ui| {
                if ui
                    .button("Attach")
                    .on_hover_text("Text, PDF, Word document or image")
                    .clicked()
                {
                    attach_requested = true;
                }

                let response = ui
                    .add_enabled_ui(locks.input_enabled, |ui| {
                        ui.add_sized(
                            [ui.available_width() - 140.0, 68.0],
                            egui::TextEdit::multiline(&mut self.user_input)
                                .hint_text("Message Parley...")
                                .desired_rows(3),
                        )
                    })
                    .inner;
                if focus_requested {
                    response.request_focus();
                }

                send_requested = response.has_focus()
                    && ui.input(|i| {
                        i.key_pressed(egui::Key::Enter)
                            && !i.modifiers.shift
                            && !i.modifiers.ctrl
                            && !i.modifiers.command
                            && !i.modifiers.alt
                    });

                ui.vertical(|ui| {
                    if ui
                        .add_enabled(locks.send_enabled, egui::Button::new("Send"))
                        .clicked()
                    {
                        send_requested = true;
                    }
                    if ui
                        .add_enabled(locks.cancel_enabled, egui::Button::new("Cancel"))
                        .clicked()
                    {
                        cancel_requested = true;
                    }
                    if locks.busy || self.controller.is_ingesting() {
                        ui.spinner();
                    } else {
                        let status = match self.controller.last_outcome() {
                            Some(TurnPhase::Cancelled) => Some("Cancelled"),
                            Some(TurnPhase::Failed) => Some("Failed"),
                            _ => None,
                        };
                        if let Some(status) = status {
                            ui.label(egui::RichText::new(status).small().weak());
                        }
                    }
                });
            });
            ui.add_space(6.0);
        });

        if locks.cancel_enabled && ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            cancel_requested = true;
        }
        if cancel_requested {
            self.controller.cancel();
        } else if send_requested && locks.send_enabled {
            self.send();
        }
        if attach_requested {
            self.pick_document();
        }

        let recall_enabled = self.controller.phase() == TurnPhase::Idle;
        let salt = match self.controller.mode() {
            ChatMode::Default => "chat_transcript",
            ChatMode::Agent => "agent_transcript",
        };
        let mut recall = None;
        egui::CentralPanel::default().show(ctx, |ui| {
            let transcript = self.controller.transcript_mut();
            let response = render_transcript(ui, transcript, recall_enabled, salt);
            transcript.update_scroll(response.offset, response.viewport, response.content);
            recall = response.recall;
        });
        if let Some(id) = recall {
            match self.controller.recall(id) {
                Recall::Retracted { .. } => tracing::info!("Recalled message {:?}", id),
                Recall::NotRecallable => tracing::debug!("Message {:?} cannot be recalled", id),
            }
        }

        let history_title = match self.controller.mode() {
            ChatMode::Default => "Chat",
            ChatMode::Agent => "Agent",
        };
        if let Some(action) = self.history_panel.render(ctx, history_title) {
            self.handle_history(action);
        }
        if let Some(action) = self.agents_panel.render(ctx, self.agents.list()) {
            self.handle_agent_action(action);
        }
        if let Some(action) = self.profile_panel.render(ctx) {
            self.handle_profile(action);
        }
    }
}

impl eframe::App for ParleyApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.screen == Screen::Chat && !self.app_ctx.session.is_authenticated() {
            tracing::info!("Session ended; returning to sign-in");
            self.leave_chat();
            self.auth_panel
                .set_error("Your session ended. Please sign in again.", None);
        }

        match self.screen {
            Screen::Auth => self.render_auth(ctx),
            Screen::Chat => self.render_chat(ctx),
        }

        let active = self.screen == Screen::Chat
            && (self.controller.locks().busy
                || self.controller.locks().cancel_enabled
                || self.controller.transcript().is_revealing()
                || self.controller.is_ingesting());
        let repaint = if active {
            self.app_ctx.config.chat.typewriter_interval()
        } else {
            Duration::from_millis(100)
        };
        ctx.request_repaint_after(repaint);
    }
}
