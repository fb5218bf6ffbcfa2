//! User preference storage.

use crate::user::UserPreference;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Keyed store of user preferences.
///
/// Implementations must be usable from several threads; the bot reads
/// preferences on its polling thread and jobs finish on worker threads.
pub trait UserStore: Send + Sync {
    fn find(&self, chat_id: i64) -> Option<UserPreference>;

    /// Insert or replace.
    fn save(&self, user: UserPreference);

    /// Every user, ordered by chat id.
    fn all(&self) -> Vec<UserPreference>;
}

/// A store that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: Mutex<BTreeMap<i64, UserPreference>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for MemoryUserStore {
    fn find(&self, chat_id: i64) -> Option<UserPreference> {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chat_id)
            .cloned()
    }

    fn save(&self, user: UserPreference) {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.chat_id, user);
    }

    fn all(&self) -> Vec<UserPreference> {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
