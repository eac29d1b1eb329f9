use serde::{Deserialize, Serialize};

/// Relationship label toward a given user.
///
/// This is the union of the two vocabularies the chat layer and the
/// persona layer used to carry separately; one enum is authoritative for
/// both tone selection and mutation permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Stranger,
    Friend,
    Close,
    Love,
    Family,
    BestFriend,
}

impl Relationship {
    pub const ALL: [Relationship; 6] = [
        Relationship::Stranger,
        Relationship::Friend,
        Relationship::Close,
        Relationship::Love,
        Relationship::Family,
        Relationship::BestFriend,
    ];

    /// Exclusive labels may be held by at most one user at a time.
    pub fn is_exclusive(&self) -> bool {
        matches!(
            self,
            Relationship::Love | Relationship::Family | Relationship::BestFriend
        )
    }

    pub fn valid_tokens() -> String {
        Relationship::ALL
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Relationship::Stranger => write!(f, "stranger"),
            Relationship::Friend => write!(f, "friend"),
            Relationship::Close => write!(f, "close"),
            Relationship::Love => write!(f, "love"),
            Relationship::Family => write!(f, "family"),
            Relationship::BestFriend => write!(f, "best_friend"),
        }
    }
}

impl std::str::FromStr for Relationship {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stranger" => Ok(Relationship::Stranger),
            "friend" => Ok(Relationship::Friend),
            "close" => Ok(Relationship::Close),
            "love" => Ok(Relationship::Love),
            "family" => Ok(Relationship::Family),
            "best" | "best_friend" => Ok(Relationship::BestFriend),
            other => Err(format!("unknown relationship: {}", other)),
        }
    }
}
