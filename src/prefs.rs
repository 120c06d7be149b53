//! Local key-value preferences kept outside the main config file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use eframe::egui;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Default,
    Dark,
    /// Light visuals on a warm, low-glare background.
    Eye,
}

impl Theme {
    pub const ALL: [Theme; 3] = [Theme::Default, Theme::Dark, Theme::Eye];

    pub fn label(self) -> &'static str {
        match self {
            Theme::Default => "Default",
            Theme::Dark => "Dark",
            Theme::Eye => "Eye care",
        }
    }

    pub fn visuals(self) -> egui::Visuals {
        match self {
            Theme::Default => egui::Visuals::light(),
            Theme::Dark => egui::Visuals::dark(),
            Theme::Eye => {
                let mut visuals = egui::Visuals::light();
                let warm = egui::Color32::from_rgb(245, 238, 220);
                visuals.panel_fill = warm;
                visuals.window_fill = egui::Color32::from_rgb(250, 244, 228);
                visuals.extreme_bg_color = egui::Color32::from_rgb(252, 248, 236);
                visuals.faint_bg_color = egui::Color32::from_rgb(238, 230, 208);
                visuals
            }
        }
    }

    pub fn apply(self, ctx: &egui::Context) {
        ctx.set_visuals(self.visuals());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Prefs {
    pub theme: Theme,
}

impl Prefs {
    /// Reads the prefs file; anything missing or unreadable yields defaults.
    pub fn load() -> Self {
        match prefs_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|error| {
                tracing::warn!("Ignoring unreadable prefs {}: {:#}", path.display(), error);
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        let path = prefs_path().context("no data directory available for preferences")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let raw = toml::to_string_pretty(self).context("failed to serialize preferences")?;
        std::fs::write(path, raw).with_context(|| format!("failed to write {}", path.display()))
    }
}

fn prefs_path() -> Option<PathBuf> {
    crate::config::data_dir().map(|dir| dir.join("prefs.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theme_survives_a_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.toml");

        Prefs { theme: Theme::Eye }.save_to(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("theme = \"eye\""));
        assert_eq!(Prefs::load_from(&path).unwrap().theme, Theme::Eye);
    }

    #[test]
    fn empty_file_means_default_theme() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.toml");
        std::fs::write(&path, "").unwrap();
        assert_eq!(Prefs::load_from(&path).unwrap().theme, Theme::Default);
    }

    #[test]
    fn unknown_theme_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.toml");
        std::fs::write(&path, "theme = \"neon\"").unwrap();
        assert!(Prefs::load_from(&path).is_err());
    }

    #[test]
    fn eye_theme_is_light_with_a_warm_panel() {
        let visuals = Theme::Eye.visuals();
        assert!(!visuals.dark_mode);
        assert_ne!(visuals.panel_fill, egui::Visuals::light().panel_fill);
        assert!(Theme::Dark.visuals().dark_mode);
    }
}
