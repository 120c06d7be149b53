use eframe::egui;

use crate::account::UserProfile;

pub enum ProfileAction {
    Reload,
    SaveName(String),
    PickAvatar,
    UpdatePassword { password: String, confirm: String },
}

pub struct ProfilePanel {
    pub show: bool,
    profile: Option<UserProfile>,
    name_input: String,
    new_password: String,
    confirm_password: String,
    notice: Option<(String, bool)>,
}

impl ProfilePanel {
    pub fn new() -> Self {
        Self {
            show: false,
            profile: None,
            name_input: String::new(),
            new_password: String::new(),
            confirm_password: String::new(),
            notice: None,
        }
    }

    pub fn set_profile(&mut self, profile: Option<UserProfile>) {
        self.name_input = profile
            .as_ref()
            .and_then(|p| p.name.clone())
            .unwrap_or_default();
        self.profile = profile;
    }

    pub fn set_avatar(&mut self, url: &str) {
        if let Some(profile) = self.profile.as_mut() {
            profile.avatar_url = Some(url.to_string());
        }
    }

    pub fn set_info(&mut self, message: impl Into<String>) {
        self.notice = Some((message.into(), false));
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.notice = Some((message.into(), true));
    }

    pub fn password_updated(&mut self) {
        self.new_password.clear();
        self.confirm_password.clear();
        self.set_info("Password updated.");
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn render(&mut self, ctx: &egui::Context) -> Option<ProfileAction> {
        let mut action = None;
        let mut open = self.show;

        egui::Window::new("Profile")
            .open(&mut open)
            .resizable(false)
            .default_width(380.0)
            .show(ctx, |ui| {
                match &self.profile {
                    Some(profile) => {
                        egui::Grid::new("profile_stats")
                            .num_columns(2)
                            .spacing([12.0, 4.0])
                            .show(ui, |ui| {
                                stat_row(ui, "Email", profile.email.as_deref().unwrap_or("-"));
                                stat_row(
                                    ui,
                                    "Registered",
                                    profile.registration_date.as_deref().unwrap_or("-"),
                                );
                                stat_row(ui, "Last login", profile.last_login.as_deref().unwrap_or("-"));
                                stat_row(ui, "Conversations", &profile.conversations.to_string());
                                stat_row(ui, "Active days", &profile.active_days.to_string());
                            });
                        if let Some(url) = profile.avatar_url.as_deref() {
                            ui.hyperlink_to("Current avatar", url);
                        }
                    }
                    None => {
                        ui.label(egui::RichText::new("Profile not loaded.").weak().italics());
                    }
                }
                if ui.small_button("Reload").clicked() {
                    action = Some(ProfileAction::Reload);
                }

                ui.separator();
                ui.horizontal(|ui| {
                    ui.label("Display name");
                    ui.text_edit_singleline(&mut self.name_input);
                    if ui.button("Save").clicked() {
                        action = Some(ProfileAction::SaveName(self.name_input.clone()));
                    }
                });
                if ui
                    .button("Upload avatar...")
                    .on_hover_text("JPG, PNG or GIF, up to 2 MB")
                    .clicked()
                {
                    action = Some(ProfileAction::PickAvatar);
                }

                ui.separator();
                ui.label(egui::RichText::new("Change password").strong());
                ui.add(
                    egui::TextEdit::singleline(&mut self.new_password)
                        .password(true)
                        .hint_text("New password"),
                );
                ui.add(
                    egui::TextEdit::singleline(&mut self.confirm_password)
                        .password(true)
                        .hint_text("Confirm new password"),
                );
                if ui.button("Update password").clicked() {
                    action = Some(ProfileAction::UpdatePassword {
                        password: self.new_password.clone(),
                        confirm: self.confirm_password.clone(),
                    });
                }

                if let Some((message, is_error)) = &self.notice {
                    ui.add_space(6.0);
                    let color = if *is_error {
                        egui::Color32::from_rgb(200, 80, 80)
                    } else {
                        egui::Color32::from_rgb(60, 150, 90)
                    };
                    ui.colored_label(color, message.as_str());
                }
            });

        self.show = open;
        action
    }
}

fn stat_row(ui: &mut egui::Ui, label: &str, value: &str) {
    ui.label(egui::RichText::new(label).weak());
    ui.label(value);
    ui.end_row();
}
