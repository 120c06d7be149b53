use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message as sent to the completion API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub role: Role,
    pub content: String,
}

impl ContextEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Bounded conversational memory.
///
/// Each send pushes a `system` entry followed by the `user` entry it governs
/// and trims; a successful reply pushes an `assistant` entry and trims again.
/// Trimming
/// drops the two oldest entries at a time until the window is back under the
/// cap, keeping the relative order of what remains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindow {
    entries: Vec<ContextEntry>,
    cap: usize,
}

pub const DEFAULT_CONTEXT_CAP: usize = 10;

impl Default for ContextWindow {
    fn default() -> Self {
        Self::with_cap(DEFAULT_CONTEXT_CAP)
    }
}

impl ContextWindow {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            cap: cap.max(2),
        }
    }

    pub fn push_turn(&mut self, system: &str, user: &str) {
        self.entries.push(ContextEntry::new(Role::System, system));
        self.entries.push(ContextEntry::new(Role::User, user));
    }

    pub fn push_assistant(&mut self, reply: &str) {
        self.entries.push(ContextEntry::new(Role::Assistant, reply));
    }

    /// Evicts the oldest pair while over the cap. Returns the evicted entries,
    /// oldest first.
    pub fn trim(&mut self) -> Vec<ContextEntry> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.cap {
            let take = 2.min(self.entries.len());
            evicted.extend(self.entries.drain(0..take));
        }
        evicted
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_cycles(window: &mut ContextWindow, cycles: usize) -> Vec<Vec<ContextEntry>> {
        let mut evictions = Vec::new();
        for i in 0..cycles {
            window.push_turn("sys", &format!("q{i}"));
            window.push_assistant(&format!("a{i}"));
            let evicted = window.trim();
            if !evicted.is_empty() {
                evictions.push(evicted);
            }
            assert!(window.len() <= 10, "window grew to {}", window.len());
        }
        evictions
    }

    #[test]
    fn never_exceeds_cap_after_a_cycle() {
        let mut window = ContextWindow::default();
        run_cycles(&mut window, 25);
        assert!(window.len() <= 10);
    }

    #[test]
    fn first_eviction_is_the_earliest_system_user_pair() {
        let mut window = ContextWindow::default();
        let evictions = run_cycles(&mut window, 4);
        let first = &evictions[0];
        assert_eq!(first.len(), 2);
        assert_eq!(first[0], ContextEntry::new(Role::System, "sys"));
        assert_eq!(first[1], ContextEntry::new(Role::User, "q0"));
    }

    #[test]
    fn trim_preserves_relative_order() {
        let mut window = ContextWindow::default();
        run_cycles(&mut window, 4);
        // 12 entries were pushed, the two oldest went away.
        assert_eq!(window.len(), 10);
        assert_eq!(window.entries()[0], ContextEntry::new(Role::Assistant, "a0"));
        assert_eq!(window.entries()[9], ContextEntry::new(Role::Assistant, "a3"));
    }

    #[test]
    fn serializes_lowercase_roles() {
        let json = serde_json::to_value(ContextEntry::new(Role::Assistant, "x")).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
