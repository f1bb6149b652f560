use serde::{Deserialize, Serialize};

use stream_api::{FromFields, LookupStore, Record, StreamError};

/// Returned by the store for ids it doesn't know.
pub const USER_NOT_EXIST: &str = "User not exist";

// ═══════════════════════════════════════════════════════════════
//  Records
// ═══════════════════════════════════════════════════════════════

/// Incoming user, published to the source topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub user_name: String,
}

impl Record for User {
    const NAME: &'static str = "User";
}

impl FromFields for User {
    /// `[id, user_name]`
    fn from_fields(fields: &[&str]) -> Result<Self, StreamError> {
        let [id, user_name] = fields else {
            return Err(StreamError::validation(format!(
                "expected 2 fields (id, user_name), got {}",
                fields.len()
            )));
        };
        let id = id
            .trim()
            .parse::<i64>()
            .map_err(|e| StreamError::validation(format!("id '{id}': {e}")))?;
        Ok(User {
            id,
            user_name: user_name.to_string(),
        })
    }
}

/// User joined with its lookup data, published to the target topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserJoin {
    pub id: i64,
    pub user_name: String,
    pub info: String,
}

impl Record for UserJoin {
    const NAME: &'static str = "UserJoin";
}

// ═══════════════════════════════════════════════════════════════
//  Enrichment
// ═══════════════════════════════════════════════════════════════

/// Static user data for ids 1..=10.
#[derive(Debug, Clone, Copy, Default)]
pub struct Database;

impl LookupStore for Database {
    fn query(&self, key: &str) -> String {
        match key.parse::<i64>() {
            Ok(id) if (1..=10).contains(&id) => format!("data_for_{id}"),
            _ => USER_NOT_EXIST.to_string(),
        }
    }
}

pub fn enrich(user: &User, store: &dyn LookupStore) -> UserJoin {
    UserJoin {
        id: user.id,
        user_name: user.user_name.clone(),
        info: store.query(&user.id.to_string()),
    }
}
