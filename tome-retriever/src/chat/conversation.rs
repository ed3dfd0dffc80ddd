//! Session-scoped conversation history.
//!
//! Sessions are append-only lists of question/answer exchanges, created on
//! first use and kept for the process lifetime unless explicitly cleared.
//! Storage is unbounded; prompt assembly only ever reads the trailing
//! [`CONTEXT_WINDOW`] exchanges.
//!
//! Each session carries its own async lock so a chat turn (retrieve → prompt
//! → complete → append) is serialized per conversation id, while unrelated
//! conversations proceed independently. The outer map lock only guards map
//! structure and is never held across an await.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Number of trailing exchanges included when building prompt context.
pub const CONTEXT_WINDOW: usize = 5;

/// One source attribution attached to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAttribution {
    /// Path of the source document, relative to the document root,
    /// forward-slash normalized.
    pub source: String,
    /// The retrieved content snippet.
    pub content: String,
}

/// One question/answer turn within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<SourceAttribution>,
    pub timestamp: DateTime<Utc>,
}

impl Exchange {
    pub fn new(
        question: impl Into<String>,
        answer: impl Into<String>,
        sources: Vec<SourceAttribution>,
    ) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            sources,
            timestamp: Utc::now(),
        }
    }
}

type Session = Arc<tokio::sync::Mutex<Vec<Exchange>>>;

/// In-memory store of conversation sessions.
#[derive(Debug, Default)]
pub struct ConversationStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to a session's history, creating the session if absent. The
    /// caller holds the returned lock for the duration of a chat turn.
    pub fn session(&self, id: &str) -> Session {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Vec::new())))
            .clone()
    }

    /// Full history of a session; empty (and not created) when unknown.
    pub async fn get(&self, id: &str) -> Vec<Exchange> {
        let session = {
            let sessions = self.sessions.lock().unwrap();
            sessions.get(id).cloned()
        };
        match session {
            Some(session) => session.lock().await.clone(),
            None => Vec::new(),
        }
    }

    /// Append an exchange, creating the session if absent.
    pub async fn append(&self, id: &str, exchange: Exchange) {
        let session = self.session(id);
        session.lock().await.push(exchange);
    }

    /// Remove a session entirely. Returns whether one existed.
    pub fn clear(&self, id: &str) -> bool {
        let removed = self.sessions.lock().unwrap().remove(id).is_some();
        if removed {
            info!("cleared conversation history for {id:?}");
        }
        removed
    }

    /// The last `n` exchanges of a session, oldest first. Never mutates.
    pub async fn context_window(&self, id: &str, n: usize) -> Vec<Exchange> {
        let history = self.get(id).await;
        let skip = history.len().saturating_sub(n);
        history.into_iter().skip(skip).collect()
    }

    /// Number of live sessions.
    pub fn active_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

/// The trailing `n`-exchange window of an already-loaded history.
pub fn window_of(history: &[Exchange], n: usize) -> &[Exchange] {
    let skip = history.len().saturating_sub(n);
    &history[skip..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(n: usize) -> Exchange {
        Exchange::new(format!("q{n}"), format!("a{n}"), Vec::new())
    }

    #[tokio::test]
    async fn unknown_session_is_empty_and_not_created() {
        let store = ConversationStore::new();
        assert!(store.get("nope").await.is_empty());
        assert_eq!(store.active_count(), 0);
    }

    #[tokio::test]
    async fn append_creates_and_orders() {
        let store = ConversationStore::new();
        for n in 1..=3 {
            store.append("s", exchange(n)).await;
        }
        let history = store.get("s").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].question, "q1");
        assert_eq!(history[2].question, "q3");
        assert_eq!(store.active_count(), 1);
    }

    #[tokio::test]
    async fn window_returns_last_five_of_six() {
        let store = ConversationStore::new();
        for n in 1..=6 {
            store.append("s", exchange(n)).await;
        }

        let window = store.context_window("s", CONTEXT_WINDOW).await;
        assert_eq!(window.len(), 5);
        assert_eq!(window[0].question, "q2");
        assert_eq!(window[4].question, "q6");

        // Full history is untouched.
        assert_eq!(store.get("s").await.len(), 6);
    }

    #[tokio::test]
    async fn clear_transitions_active_to_absent() {
        let store = ConversationStore::new();
        store.append("s", exchange(1)).await;
        assert!(store.clear("s"));
        assert!(!store.clear("s"));
        assert!(store.get("s").await.is_empty());
        assert_eq!(store.active_count(), 0);
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let store = ConversationStore::new();
        store.append("a", exchange(1)).await;
        store.append("b", exchange(2)).await;
        store.clear("a");
        assert_eq!(store.get("b").await.len(), 1);
    }

    #[test]
    fn window_of_short_history() {
        let history = vec![exchange(1), exchange(2)];
        assert_eq!(window_of(&history, 5).len(), 2);
    }
}
