use eframe::egui;

use crate::account::{password_strength, StrengthLevel};
use crate::error::Remediation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Login,
    Register,
    Forgot,
}

pub enum AuthAction {
    Login { email: String, password: String },
    Register { email: String, password: String, confirm: String },
    ResetPassword { email: String },
    Resend { email: String },
}

pub struct AuthPanel {
    pub mode: AuthMode,
    email: String,
    password: String,
    confirm: String,
    notice: Option<(String, bool)>,
    remediation: Option<Remediation>,
}

impl AuthPanel {
    pub fn new() -> Self {
        Self {
            mode: AuthMode::Login,
            email: String::new(),
            password: String::new(),
            confirm: String::new(),
            notice: None,
            remediation: None,
        }
    }

    pub fn set_error(&mut self, message: impl Into<String>, remediation: Option<Remediation>) {
        self.notice = Some((message.into(), true));
        self.remediation = remediation;
    }

    pub fn set_info(&mut self, message: impl Into<String>) {
        self.notice = Some((message.into(), false));
        self.remediation = None;
    }

    /// Switches to `mode`, keeping the email and dropping secrets.
    pub fn switch(&mut self, mode: AuthMode) {
        self.mode = mode;
        self.password.clear();
        self.confirm.clear();
        self.notice = None;
        self.remediation = None;
    }

    pub fn reset(&mut self) {
        self.switch(AuthMode::Login);
    }

    pub fn render(&mut self, ui: &mut egui::Ui, min_password_len: usize) -> Option<AuthAction> {
        let mut action = None;

        ui.vertical_centered(|ui| {
            ui.add_space(48.0);
            ui.heading("Parley");
            ui.label(egui::RichText::new(self.subtitle()).weak());
            ui.add_space(16.0);
        });

        egui::Frame::group(ui.style())
            .inner_margin(egui::Margin::same(16.0))
            .show(ui, |ui| {
                ui.set_max_width(360.0);
                ui.label("Email");
                ui.add(
                    egui::TextEdit::singleline(&mut self.email)
                        .hint_text("you@example.com")
                        .desired_width(f32::INFINITY),
                );

                if self.mode != AuthMode::Forgot {
                    ui.add_space(6.0);
                    ui.label("Password");
                    let response = ui.add(
                        egui::TextEdit::singleline(&mut self.password)
                            .password(true)
                            .desired_width(f32::INFINITY),
                    );
                    if self.mode == AuthMode::Login
                        && response.lost_focus()
                        && ui.input(|i| i.key_pressed(egui::Key::Enter))
                    {
                        action = Some(self.login_action());
                    }
                }

                if self.mode == AuthMode::Register {
                    ui.label(
                        egui::RichText::new(format!(
                            "At least {min_password_len} characters, with a letter and a digit."
                        ))
                        .small()
                        .weak(),
                    );
                    render_strength_meter(ui, &self.password);
                    ui.add_space(6.0);
                    ui.label("Confirm password");
                    ui.add(
                        egui::TextEdit::singleline(&mut self.confirm)
                            .password(true)
                            .desired_width(f32::INFINITY),
                    );
                }

                ui.add_space(10.0);
                let submit = match self.mode {
                    AuthMode::Login => "Sign in",
                    AuthMode::Register => "Create account",
                    AuthMode::Forgot => "Send reset link",
                };
                if ui.button(submit).clicked() {
                    action = Some(match self.mode {
                        AuthMode::Login => self.login_action(),
                        AuthMode::Register => AuthAction::Register {
                            email: self.email.clone(),
                            password: self.password.clone(),
                            confirm: self.confirm.clone(),
                        },
                        AuthMode::Forgot => AuthAction::ResetPassword {
                            email: self.email.clone(),
                        },
                    });
                }

                if let Some((message, is_error)) = &self.notice {
                    ui.add_space(8.0);
                    let color = if *is_error {
                        egui::Color32::from_rgb(200, 80, 80)
                    } else {
                        egui::Color32::from_rgb(60, 150, 90)
                    };
                    ui.add(egui::Label::new(egui::RichText::new(message).color(color)).wrap());
                }

                match &self.remediation {
                    Some(Remediation::ResendVerification { email }) => {
                        if ui.button("Resend verification email").clicked() {
                            action = Some(AuthAction::Resend {
                                email: email.clone(),
                            });
                        }
                    }
                    Some(Remediation::ResetPassword { email }) => {
                        if ui.button("Reset password for this email").clicked() {
                            self.email = email.clone();
                            self.switch(AuthMode::Forgot);
                        }
                    }
                    None => {}
                }

                ui.add_space(10.0);
                ui.separator();
                ui.horizontal_wrapped(|ui| match self.mode {
                    AuthMode::Login => {
                        if ui.link("Create an account").clicked() {
                            self.switch(AuthMode::Register);
                        }
                        if ui.link("Forgot password?").clicked() {
                            self.switch(AuthMode::Forgot);
                        }
                    }
                    AuthMode::Register | AuthMode::Forgot => {
                        if ui.link("Back to sign in").clicked() {
                            self.switch(AuthMode::Login);
                        }
                    }
                });
            });

        action
    }

    fn subtitle(&self) -> &'static str {
        match self.mode {
            AuthMode::Login => "Sign in to continue",
            AuthMode::Register => "Create your account",
            AuthMode::Forgot => "We'll email you a reset link",
        }
    }

    fn login_action(&self) -> AuthAction {
        AuthAction::Login {
            email: self.email.clone(),
            password: self.password.clone(),
        }
    }
}

fn render_strength_meter(ui: &mut egui::Ui, password: &str) {
    if password.is_empty() {
        return;
    }
    let strength = password_strength(password);
    let color = match strength.level {
        StrengthLevel::Weak => egui::Color32::from_rgb(210, 80, 70),
        StrengthLevel::Medium => egui::Color32::from_rgb(230, 170, 60),
        StrengthLevel::Strong => egui::Color32::from_rgb(90, 170, 90),
        StrengthLevel::VeryStrong => egui::Color32::from_rgb(40, 140, 70),
    };
    ui.add_space(4.0);
    ui.add(
        egui::ProgressBar::new(f32::from(strength.score) / 100.0)
            .desired_height(6.0)
            .fill(color),
    );
    ui.label(
        egui::RichText::new(format!("Strength: {}", strength.level.label()))
            .small()
            .color(color),
    );
}
