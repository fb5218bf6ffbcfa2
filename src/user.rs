//! Per-user conversion preferences.

use crate::request::Profile;
use serde::{Deserialize, Serialize};

/// What the front-end remembers about a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreference {
    pub chat_id: i64,
    /// Kindle address; empty when the user has not set one.
    pub email: String,
    pub embed_fonts: bool,
    /// Also send the converted file back into the chat.
    pub get_converted_file: bool,
    /// Custom margins; empty means the configured default.
    pub margins: String,
}

impl UserPreference {
    /// A freshly registered user: fonts embedded, no file delivery.
    pub fn new(chat_id: i64, email: impl Into<String>) -> Self {
        Self {
            chat_id,
            email: email.into(),
            embed_fonts: true,
            get_converted_file: false,
            margins: String::new(),
        }
    }

    pub fn profile(&self) -> Profile {
        Profile::for_embed_fonts(self.embed_fonts)
    }

    /// Settings block shown by `/start`.
    pub fn summary(&self) -> String {
        format!(
            "Your settings:\n\
             chatID: {}\n\
             Email: {}\n\
             Embed fonts: {}\n\
             Get converted file: {}\n\
             Margins: {}",
            self.chat_id, self.email, self.embed_fonts, self.get_converted_file, self.margins
        )
    }
}
