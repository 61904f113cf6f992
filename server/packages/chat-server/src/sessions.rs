use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::RwLock;

/// A research session: a workspace directory the agent is allowed to read.
///
/// Indexing itself happens out of band; this store only tracks whether it has
/// been reported done, since chat is refused until then.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub workspace_path: PathBuf,
    pub indexed: bool,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, session: Session) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id.clone(), session);
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_overwrites_existing_session() {
        let store = SessionStore::new();
        store
            .upsert(Session {
                session_id: "s1".to_string(),
                workspace_path: PathBuf::from("/tmp/a"),
                indexed: false,
            })
            .await;
        store
            .upsert(Session {
                session_id: "s1".to_string(),
                workspace_path: PathBuf::from("/tmp/a"),
                indexed: true,
            })
            .await;
        assert!(store.get("s1").await.unwrap().indexed);
        assert!(store.get("missing").await.is_none());
    }
}
