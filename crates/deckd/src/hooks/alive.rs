//! Minimal "session alive" bookkeeping for the hook stream.
//!
//! Maintained for every hook, correlated or not, so the set also reflects
//! Claude instances running outside this app.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use deck_core::ProjectId;

/// One Claude CLI session seen through `session_start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AliveSession {
    /// CLI session id, or the cwd when the CLI sent none.
    pub key: String,
    pub cwd: Option<String>,
    pub project_id: Option<ProjectId>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub(crate) struct AliveSessions {
    entries: HashMap<String, AliveSession>,
}

impl AliveSessions {
    /// Records a start. A repeated start for the same key keeps the first.
    pub fn start(&mut self, session: AliveSession) -> bool {
        if self.entries.contains_key(&session.key) {
            return false;
        }
        self.entries.insert(session.key.clone(), session);
        true
    }

    pub fn end(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Entries ordered by start time, then key.
    pub fn list(&self) -> Vec<AliveSession> {
        let mut list: Vec<AliveSession> = self.entries.values().cloned().collect();
        list.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.key.cmp(&b.key)));
        list
    }
}

/// Key for alive bookkeeping: the CLI session id, else the cwd.
pub(crate) fn alive_key(session_id: Option<&str>, cwd: Option<&str>) -> Option<String> {
    session_id
        .filter(|s| !s.is_empty())
        .or(cwd)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str) -> AliveSession {
        AliveSession {
            key: key.to_string(),
            cwd: Some("/home/u/p".to_string()),
            project_id: None,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_duplicate_start_is_one_entry() {
        let mut alive = AliveSessions::default();
        assert!(alive.start(entry("abc")));
        assert!(!alive.start(entry("abc")));
        assert_eq!(alive.list().len(), 1);

        assert!(alive.end("abc"));
        assert!(!alive.end("abc"));
        assert!(alive.list().is_empty());
    }

    #[test]
    fn test_alive_key_fallback() {
        assert_eq!(alive_key(Some("abc"), Some("/p")).as_deref(), Some("abc"));
        assert_eq!(alive_key(Some(""), Some("/p")).as_deref(), Some("/p"));
        assert_eq!(alive_key(None, None), None);
    }
}
