use eframe::egui;

use crate::chat::transcript::{MessageId, MessageKind, RenderedMessage, Sender, Transcript};

pub struct TranscriptResponse {
    pub recall: Option<MessageId>,
    pub offset: f32,
    pub viewport: f32,
    pub content: f32,
}

/// Draws the transcript and reports the scroll geometry back so the view
/// model can decide whether to follow new output.
pub fn render_transcript(
    ui: &mut egui::Ui,
    transcript: &mut Transcript,
    recall_enabled: bool,
    id_salt: &str,
) -> TranscriptResponse {
    let mut recall = None;
    let follow = transcript.take_scroll_request();

    let output = egui::ScrollArea::vertical()
        .id_salt(id_salt)
        .auto_shrink([false, false])
        .show(ui, |ui| {
            if transcript.is_empty() {
                ui.add_space(24.0);
                ui.vertical_centered(|ui| {
                    ui.label(egui::RichText::new("Ask anything to get started.").weak().italics());
                });
            }
            for message in transcript.messages() {
                if render_message(ui, message, recall_enabled) {
                    recall = Some(message.id);
                }
                ui.add_space(6.0);
            }
            if follow {
                ui.scroll_to_cursor(Some(egui::Align::BOTTOM));
            }
        });

    TranscriptResponse {
        recall,
        offset: output.state.offset.y,
        viewport: output.inner_rect.height(),
        content: output.content_size.y,
    }
}

/// Returns true when the recall button was clicked.
fn render_message(ui: &mut egui::Ui, message: &RenderedMessage, recall_enabled: bool) -> bool {
    let mut recalled = false;
    let is_user = message.sender == Sender::User;
    let layout = if is_user {
        egui::Layout::right_to_left(egui::Align::Min)
    } else {
        egui::Layout::left_to_right(egui::Align::Min)
    };

    ui.with_layout(layout, |ui| {
        avatar_badge(ui, message);
        let max_width = (ui.available_width() * 0.8).max(120.0);
        egui::Frame::group(ui.style())
            .fill(bubble_fill(ui, message))
            .rounding(egui::Rounding::same(8.0))
            .show(ui, |ui| {
                ui.set_max_width(max_width);
                ui.vertical(|ui| {
                    let mut text = egui::RichText::new(message.visible_text().to_string());
                    if message.kind == MessageKind::Notice {
                        text = text.italics().weak();
                    }
                    if message.is_revealing() {
                        text = egui::RichText::new(format!("{}▌", message.visible_text()));
                    }
                    ui.add(egui::Label::new(text).wrap());
                    ui.horizontal(|ui| {
                        ui.label(
                            egui::RichText::new(message.timestamp.format("%H:%M").to_string())
                                .small()
                                .weak(),
                        );
                        if message.can_recall()
                            && ui
                                .add_enabled(recall_enabled, egui::Button::new("Recall").small())
                                .on_hover_text("Remove this question and its answer")
                                .on_disabled_hover_text("Wait for the current reply to finish")
                                .clicked()
                        {
                            recalled = true;
                        }
                    });
                });
            });
    });

    recalled
}

fn avatar_badge(ui: &mut egui::Ui, message: &RenderedMessage) {
    let (label, color) = match message.sender {
        Sender::User => ("You", egui::Color32::from_rgb(80, 130, 220)),
        Sender::Bot => ("AI", egui::Color32::from_rgb(90, 170, 120)),
    };
    let (rect, response) = ui.allocate_exact_size(egui::vec2(30.0, 30.0), egui::Sense::hover());
    ui.painter().circle_filled(rect.center(), 15.0, color);
    ui.painter().text(
        rect.center(),
        egui::Align2::CENTER_CENTER,
        label,
        egui::FontId::proportional(11.0),
        egui::Color32::WHITE,
    );
    if !message.avatar.is_empty() {
        response.on_hover_text(message.avatar.as_str());
    }
}

fn bubble_fill(ui: &egui::Ui, message: &RenderedMessage) -> egui::Color32 {
    let dark = ui.visuals().dark_mode;
    match (message.kind, message.sender, dark) {
        (MessageKind::Error, _, false) => egui::Color32::from_rgb(250, 225, 222),
        (MessageKind::Error, _, true) => egui::Color32::from_rgb(90, 40, 40),
        (MessageKind::Notice, _, _) => ui.visuals().faint_bg_color,
        (MessageKind::Normal, Sender::User, false) => egui::Color32::from_rgb(220, 232, 250),
        (MessageKind::Normal, Sender::User, true) => egui::Color32::from_rgb(40, 60, 95),
        (MessageKind::Normal, Sender::Bot, _) => ui.visuals().extreme_bg_color,
    }
}

pub fn truncate_str(text: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(text.len().min(max_chars + 4));
    for (i, ch) in text.chars().enumerate() {
        if i >= max_chars {
            out.push('…');
            break;
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::truncate_str;

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_str("你好世界", 2), "你好…");
        assert_eq!(truncate_str("short", 10), "short");
    }
}
