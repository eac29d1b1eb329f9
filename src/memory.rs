use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{CommandError, StoreError};
use crate::relationship::Relationship;

const SECRET_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One record per distinct sender identity. Created lazily on first
/// contact, kept for the life of the process, persisted on every
/// mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub relationship: Relationship,
    /// When locked, the relationship is immutable regardless of caller.
    pub locked: bool,
    pub chat_history: Vec<ChatTurn>,
    pub message_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub secrets: Vec<Secret>,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl UserRecord {
    fn new(id: &str) -> Self {
        let now = Utc::now();
        UserRecord {
            id: id.to_string(),
            relationship: Relationship::Stranger,
            locked: false,
            chat_history: Vec::new(),
            message_count: 0,
            first_seen: now,
            last_active: now,
            secrets: Vec::new(),
            topics: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_users: usize,
    pub total_messages: u64,
    pub locked_users: usize,
}

/// Per-user relationship and context store. Whole-snapshot JSON
/// persistence; every mutating call writes before returning success.
#[derive(Debug)]
pub struct MemoryStore {
    users: HashMap<String, UserRecord>,
    file_path: PathBuf,
    context_length: usize,
}

impl MemoryStore {
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        let file_path = config.users_file();
        let users = Self::load_users(&file_path);

        let mut store = MemoryStore {
            users,
            file_path,
            context_length: config.context_length,
        };

        // The designated identity stays pinned to its configured
        // relationship forever.
        if let Some(pinned) = &config.pinned_user {
            let record = store
                .users
                .entry(pinned.user_id.clone())
                .or_insert_with(|| UserRecord::new(&pinned.user_id));
            record.relationship = pinned.relationship;
            record.locked = true;
            store.save()?;
        }

        Ok(store)
    }

    /// Load tolerates a missing or malformed file; a bad snapshot on
    /// disk falls back to an empty store rather than aborting startup.
    fn load_users(file_path: &PathBuf) -> HashMap<String, UserRecord> {
        if !file_path.exists() {
            return HashMap::new();
        }
        match std::fs::read_to_string(file_path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(users) => users,
                Err(e) => {
                    tracing::warn!("Failed to parse users file, starting empty: {}", e);
                    HashMap::new()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read users file, starting empty: {}", e);
                HashMap::new()
            }
        }
    }

    fn save(&self) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&self.users)?;
        std::fs::write(&self.file_path, content).map_err(|e| {
            tracing::error!("Failed to persist users file: {}", e);
            StoreError::Io(e)
        })?;
        Ok(())
    }

    pub fn get_or_create(&mut self, user_id: &str) -> &mut UserRecord {
        self.users
            .entry(user_id.to_string())
            .or_insert_with(|| UserRecord::new(user_id))
    }

    pub fn get(&self, user_id: &str) -> Option<&UserRecord> {
        self.users.get(user_id)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// Append one history entry, evicting the oldest past the cap.
    pub fn append_turn(
        &mut self,
        user_id: &str,
        role: ChatRole,
        content: &str,
    ) -> Result<(), StoreError> {
        let cap = self.context_length;
        let record = self.get_or_create(user_id);

        record.chat_history.push(ChatTurn {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
        if record.chat_history.len() > cap {
            let excess = record.chat_history.len() - cap;
            record.chat_history.drain(..excess);
        }

        if role == ChatRole::User {
            record.message_count += 1;
        }
        record.last_active = Utc::now();

        self.save()
    }

    /// The last `limit` entries in chronological order, as an
    /// independent copy. Does not mutate stored state.
    pub fn recent_context(&self, user_id: &str, limit: usize) -> Vec<ChatTurn> {
        match self.users.get(user_id) {
            Some(record) => {
                let skip = record.chat_history.len().saturating_sub(limit);
                record.chat_history[skip..].to_vec()
            }
            None => Vec::new(),
        }
    }

    pub fn set_relationship(
        &mut self,
        user_id: &str,
        relationship: Relationship,
    ) -> Result<(), CommandError> {
        let record = self.get_or_create(user_id);
        if record.locked {
            return Err(CommandError::Locked(user_id.to_string()));
        }
        record.relationship = relationship;
        self.save()?;
        Ok(())
    }

    pub fn record_secret(&mut self, user_id: &str, text: &str) -> Result<(), StoreError> {
        let record = self.get_or_create(user_id);
        record.secrets.push(Secret {
            id: Uuid::new_v4().to_string(),
            content: text.chars().take(SECRET_MAX_CHARS).collect(),
            created_at: Utc::now(),
        });
        self.save()
    }

    pub fn record_topic(&mut self, user_id: &str, topic: &str) -> Result<(), StoreError> {
        let record = self.get_or_create(user_id);
        record.topics.push(topic.to_string());
        self.save()
    }

    pub fn records(&self) -> impl Iterator<Item = &UserRecord> {
        self.users.values()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            total_users: self.users.len(),
            total_messages: self.users.values().map(|u| u.message_count).sum(),
            locked_users: self.users.values().filter(|u| u.locked).count(),
        }
    }

}
