use chrono::NaiveDate;
use eframe::egui;

use super::chat::truncate_str;
use crate::chat::history::{bucket_by_date, ConversationRecord};

pub enum HistoryAction {
    Recent,
    Search(String),
    ByDate(NaiveDate),
    Open(ConversationRecord),
}

pub struct HistoryPanel {
    pub show: bool,
    keyword: String,
    date_input: String,
    records: Vec<ConversationRecord>,
    status: Option<String>,
}

impl HistoryPanel {
    pub fn new() -> Self {
        Self {
            show: false,
            keyword: String::new(),
            date_input: chrono::Local::now().date_naive().to_string(),
            records: Vec::new(),
            status: None,
        }
    }

    pub fn set_records(&mut self, records: Vec<ConversationRecord>) {
        self.status = records.is_empty().then(|| "No matching conversations.".to_string());
        self.records = records;
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.records.clear();
        self.status = Some(message.into());
    }

    pub fn render(&mut self, ctx: &egui::Context, title: &str) -> Option<HistoryAction> {
        let mut action = None;
        let mut open = self.show;

        egui::Window::new(format!("History · {title}"))
            .id(egui::Id::new("history_window"))
            .open(&mut open)
            .resizable(true)
            .default_size([460.0, 520.0])
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    let response = ui.add(
                        egui::TextEdit::singleline(&mut self.keyword)
                            .hint_text("Search questions and answers")
                            .desired_width(220.0),
                    );
                    let enter = response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                    if ui.button("Search").clicked() || enter {
                        action = Some(if self.keyword.trim().is_empty() {
                            HistoryAction::Recent
                        } else {
                            HistoryAction::Search(self.keyword.clone())
                        });
                    }
                    if ui.button("Recent").clicked() {
                        self.keyword.clear();
                        action = Some(HistoryAction::Recent);
                    }
                });
                ui.horizontal(|ui| {
                    ui.label("Date");
                    ui.add(
                        egui::TextEdit::singleline(&mut self.date_input)
                            .hint_text("YYYY-MM-DD")
                            .desired_width(110.0),
                    );
                    if ui.button("Filter").clicked() {
                        match NaiveDate::parse_from_str(self.date_input.trim(), "%Y-%m-%d") {
                            Ok(date) => action = Some(HistoryAction::ByDate(date)),
                            Err(_) => self.set_error("Dates look like 2024-05-31."),
                        }
                    }
                });
                ui.separator();

                if let Some(status) = &self.status {
                    ui.label(egui::RichText::new(status).weak().italics());
                }

                egui::ScrollArea::vertical()
                    .id_salt("history_records")
                    .auto_shrink([false, false])
                    .show(ui, |ui| {
                        for (date, records) in bucket_by_date(&self.records).iter().rev() {
                            ui.label(egui::RichText::new(date.format("%Y-%m-%d").to_string()).strong());
                            for record in records {
                                let time = record
                                    .created_at
                                    .with_timezone(&chrono::Local)
                                    .format("%H:%M");
                                let label = format!("{time}  {}", truncate_str(&record.user_message, 60));
                                if ui
                                    .selectable_label(false, label)
                                    .on_hover_text(truncate_str(&record.assistant_message, 240))
                                    .clicked()
                                {
                                    action = Some(HistoryAction::Open(record.clone()));
                                }
                            }
                            ui.add_space(6.0);
                        }
                    });
            });

        self.show = open;
        action
    }
}
