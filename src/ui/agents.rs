use eframe::egui;

use crate::agents::AgentProfile;

pub enum AgentAction {
    Create { name: String, system_prompt: String },
    Delete(String),
}

/// Create/delete form for custom agents.
pub struct AgentsPanel {
    pub show: bool,
    name: String,
    system_prompt: String,
    error: Option<String>,
    confirm_delete: Option<AgentProfile>,
}

impl AgentsPanel {
    pub fn new() -> Self {
        Self {
            show: false,
            name: String::new(),
            system_prompt: String::new(),
            error: None,
            confirm_delete: None,
        }
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn created(&mut self) {
        self.name.clear();
        self.system_prompt.clear();
        self.error = None;
    }

    pub fn render(&mut self, ctx: &egui::Context, agents: &[AgentProfile]) -> Option<AgentAction> {
        let mut action = None;
        let mut open = self.show;

        egui::Window::new("Agents")
            .open(&mut open)
            .resizable(true)
            .default_size([420.0, 480.0])
            .show(ctx, |ui| {
                egui::ScrollArea::vertical()
                    .id_salt("agent_list")
                    .max_height(200.0)
                    .show(ui, |ui| {
                        for agent in agents {
                            ui.horizontal(|ui| {
                                ui.label(egui::RichText::new(&agent.name).strong());
                                if agent.is_preset {
                                    ui.label(egui::RichText::new("preset").small().weak());
                                } else if ui
                                    .button(
                                        egui::RichText::new("Delete")
                                            .color(egui::Color32::from_rgb(200, 80, 80)),
                                    )
                                    .clicked()
                                {
                                    self.confirm_delete = Some(agent.clone());
                                }
                            })
                            .response
                            .on_hover_text(agent.system_prompt.as_str());
                        }
                    });

                ui.separator();
                ui.label(egui::RichText::new("New agent").strong());
                ui.add(
                    egui::TextEdit::singleline(&mut self.name)
                        .hint_text("Name")
                        .desired_width(f32::INFINITY),
                );
                ui.add(
                    egui::TextEdit::multiline(&mut self.system_prompt)
                        .hint_text("System prompt")
                        .desired_rows(5)
                        .desired_width(f32::INFINITY),
                );
                if ui.button("Create").clicked() {
                    action = Some(AgentAction::Create {
                        name: self.name.clone(),
                        system_prompt: self.system_prompt.clone(),
                    });
                }
                if let Some(error) = &self.error {
                    ui.colored_label(egui::Color32::from_rgb(200, 80, 80), error.as_str());
                }
            });
        self.show = open;

        if let Some(agent) = self.confirm_delete.clone() {
            let mut keep_open = true;
            egui::Window::new("Delete Agent?")
                .collapsible(false)
                .resizable(false)
                .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
                .open(&mut keep_open)
                .show(ctx, |ui| {
                    ui.label(format!("Delete \"{}\"?", agent.name));
                    ui.label(egui::RichText::new("This cannot be undone.").small().weak());
                    ui.add_space(8.0);
                    ui.horizontal(|ui| {
                        if ui
                            .button(
                                egui::RichText::new("Delete")
                                    .color(egui::Color32::from_rgb(200, 80, 80)),
                            )
                            .clicked()
                        {
                            action = Some(AgentAction::Delete(agent.id.clone()));
                            self.confirm_delete = None;
                        }
                        if ui.button("Cancel").clicked() {
                            self.confirm_delete = None;
                        }
                    });
                });
            if !keep_open {
                self.confirm_delete = None;
            }
        }

        action
    }
}
