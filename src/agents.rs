//! Attached agents: named system prompts used by the agent-mode chat.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::backend::{decode_rows, timestamp_now, Query, RowStore, Table};
use crate::error::AppError;
use crate::session::SessionCache;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    pub is_preset: bool,
}

impl AgentProfile {
    fn preset(id: &str, name: &str, system_prompt: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            system_prompt: system_prompt.to_string(),
            is_preset: true,
        }
    }
}

pub fn presets() -> Vec<AgentProfile> {
    vec![
        AgentProfile::preset(
            "preset-tech",
            "技术助手",
            "你是一名资深技术助手，擅长编程、系统设计与故障排查。回答时给出清晰的步骤，必要时附上代码示例。",
        ),
        AgentProfile::preset(
            "preset-writing",
            "写作助手",
            "你是一名写作助手，帮助用户润色文字、调整结构，在保持原意的前提下让表达简洁流畅。",
        ),
        AgentProfile::preset(
            "preset-translate",
            "翻译助手",
            "你是一名专业翻译，在中文与英文之间准确互译，保留原文的语气与格式，只输出译文。",
        ),
    ]
}

#[derive(Debug, Deserialize)]
struct PromptRow {
    #[serde(deserialize_with = "crate::backend::id_as_string")]
    id: String,
    name: String,
    system_prompt: String,
}

impl From<PromptRow> for AgentProfile {
    fn from(row: PromptRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            system_prompt: row.system_prompt,
            is_preset: false,
        }
    }
}

pub struct AgentRegistry {
    rows: Arc<dyn RowStore>,
    session: SessionCache,
    visible: Vec<AgentProfile>,
    selected: Option<String>,
}

impl AgentRegistry {
    pub fn new(rows: Arc<dyn RowStore>, session: SessionCache) -> Self {
        let visible = presets();
        let selected = visible.first().map(|p| p.id.clone());
        Self {
            rows,
            session,
            visible,
            selected,
        }
    }

    /// Presets followed by the signed-in user's custom agents.
    pub fn list(&self) -> &[AgentProfile] {
        &self.visible
    }

    /// Reloads custom agents. Signed-out users see presets only; a failed
    /// load also falls back to presets and is reported.
    pub async fn refresh(&mut self) -> Result<&[AgentProfile], AppError> {
        let mut visible = presets();
        let loaded = match self.session.current_user_id() {
            Some(user_id) => {
                let query = Query::new()
                    .eq("user_id", &user_id)
                    .order("created_at", false);
                self.rows
                    .select(Table::Prompt, &query)
                    .await
                    .map(|rows| decode_rows::<PromptRow>(Table::Prompt, rows))
            }
            None => Ok(Vec::new()),
        };

        let result = match loaded {
            Ok(rows) => {
                visible.extend(rows.into_iter().map(AgentProfile::from));
                Ok(())
            }
            Err(error) => {
                tracing::error!("Failed to load custom agents: {}", error);
                Err(AppError::Persistence(error))
            }
        };

        self.visible = visible;
        if !self.selected_is_visible() {
            self.selected = self.visible.first().map(|p| p.id.clone());
        }
        result.map(|_| self.visible.as_slice())
    }

    /// Creates a custom agent, reloads the list and selects the new agent.
    /// Names must not collide with any visible agent (exact match).
    pub async fn create(&mut self, name: &str, system_prompt: &str) -> Result<AgentProfile, AppError> {
        let name = name.trim();
        let system_prompt = system_prompt.trim();
        if name.is_empty() {
            return Err(AppError::validation("Agent name cannot be empty"));
        }
        if system_prompt.is_empty() {
            return Err(AppError::validation("System prompt cannot be empty"));
        }
        if self.visible.iter().any(|p| p.name == name) {
            return Err(AppError::validation(format!("An agent named \"{name}\" already exists")));
        }
        let user_id = self
            .session
            .current_user_id()
            .ok_or_else(|| AppError::auth("Sign in to create custom agents"))?;

        let stored = self
            .rows
            .insert(
                Table::Prompt,
                json!({
                    "user_id": user_id,
                    "name": name,
                    "system_prompt": system_prompt,
                    "created_at": timestamp_now(),
                }),
            )
            .await?;
        let new_id = stored
            .get("id")
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()));
        tracing::info!("Created agent {}", name);

        if let Err(error) = self.refresh().await {
            tracing::warn!("Agent list refresh after create failed: {}", error);
        }

        let created = self
            .visible
            .iter()
            .find(|p| match &new_id {
                Some(id) => &p.id == id,
                None => !p.is_preset && p.name == name,
            })
            .cloned()
            .unwrap_or_else(|| AgentProfile {
                id: new_id.unwrap_or_default(),
                name: name.to_string(),
                system_prompt: system_prompt.to_string(),
                is_preset: false,
            });
        self.selected = Some(created.id.clone());
        Ok(created)
    }

    pub async fn delete(&mut self, id: &str) -> Result<(), AppError> {
        let target = self
            .visible
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| AppError::validation("No such agent"))?;
        if target.is_preset {
            return Err(AppError::validation("Preset agents cannot be deleted"));
        }
        let user_id = self
            .session
            .current_user_id()
            .ok_or_else(|| AppError::auth("Sign in to manage custom agents"))?;

        let query = Query::new().eq("id", id).eq("user_id", &user_id);
        let removed = self.rows.delete(Table::Prompt, &query).await?;
        if removed == 0 {
            return Err(AppError::auth("You can only delete agents you created"));
        }
        tracing::info!("Deleted agent {}", target.name);

        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        if let Err(error) = self.refresh().await {
            tracing::warn!("Agent list refresh after delete failed: {}", error);
        }
        Ok(())
    }

    pub fn select(&mut self, id: &str) -> Option<&AgentProfile> {
        let found = self.visible.iter().position(|p| p.id == id)?;
        self.selected = Some(id.to_string());
        self.visible.get(found)
    }

    pub fn selected(&self) -> Option<&AgentProfile> {
        let id = self.selected.as_deref()?;
        self.visible.iter().find(|p| p.id == id)
    }

    fn selected_is_visible(&self) -> bool {
        self.selected().is_some()
    }
}
