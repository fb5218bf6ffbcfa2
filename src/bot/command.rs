//! Chat command parsing.
//!
//! Commands are recognised by prefix, checked in a fixed order, so anything
//! after the command word is treated as its argument.

pub const START: &str = "/start";
pub const EMAIL: &str = "/email";
pub const FILE: &str = "/file";
pub const FONT: &str = "/font";
pub const MARGIN: &str = "/margin";
pub const USERS: &str = "/users";

/// What `/email` was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailAction {
    Show,
    Clear,
    Set(String),
}

/// A recognised chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Email(EmailAction),
    /// Toggle sending the converted file back.
    File,
    /// Toggle font embedding.
    Font,
    /// Show margins, or set them to the given value.
    Margin(Option<String>),
    /// Admin only: list registered users.
    Users,
}

impl Command {
    /// Parse a message. `None` for anything that is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.starts_with(START) {
            Some(Command::Start)
        } else if let Some(arg) = text.strip_prefix(EMAIL) {
            Some(Command::Email(match arg.trim() {
                "" => EmailAction::Show,
                "clear" => EmailAction::Clear,
                email => EmailAction::Set(email.to_string()),
            }))
        } else if text.starts_with(FILE) {
            Some(Command::File)
        } else if text.starts_with(FONT) {
            Some(Command::Font)
        } else if let Some(arg) = text.strip_prefix(MARGIN) {
            let arg = arg.trim();
            Some(Command::Margin((!arg.is_empty()).then(|| arg.to_string())))
        } else if text.starts_with(USERS) {
            Some(Command::Users)
        } else {
            None
        }
    }
}

/// Kindle delivery only accepts addresses on this domain.
pub fn is_kindle_email(email: &str) -> bool {
    email.ends_with("@kindle.com") && email.len() > "@kindle.com".len()
}

/// Margins are four space-separated values: top right bottom left.
pub fn is_valid_margin(margin: &str) -> bool {
    margin.chars().filter(|&c| c == ' ').count() == 3
        && margin.split(' ').all(|part| !part.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_commands() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("/file"), Some(Command::File));
        assert_eq!(Command::parse("/font"), Some(Command::Font));
        assert_eq!(Command::parse("/users"), Some(Command::Users));
    }

    #[test]
    fn parses_email_actions() {
        assert_eq!(Command::parse("/email"), Some(Command::Email(EmailAction::Show)));
        assert_eq!(
            Command::parse("/email clear"),
            Some(Command::Email(EmailAction::Clear))
        );
        assert_eq!(
            Command::parse("/email  me@kindle.com "),
            Some(Command::Email(EmailAction::Set("me@kindle.com".into())))
        );
    }

    #[test]
    fn parses_margin() {
        assert_eq!(Command::parse("/margin"), Some(Command::Margin(None)));
        assert_eq!(
            Command::parse("/margin 0pt -13pt 0pt -13pt"),
            Some(Command::Margin(Some("0pt -13pt 0pt -13pt".into())))
        );
    }

    #[test]
    fn ignores_other_text() {
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse("/unknown"), None);
    }

    #[test]
    fn kindle_email_check() {
        assert!(is_kindle_email("reader@kindle.com"));
        assert!(!is_kindle_email("reader@gmail.com"));
        assert!(!is_kindle_email("@kindle.com"));
    }

    #[test]
    fn margin_check() {
        assert!(is_valid_margin("0pt -13pt 0pt -13pt"));
        assert!(!is_valid_margin("0pt -13pt 0pt"));
        assert!(!is_valid_margin("0pt  -13pt 0pt"));
        assert!(!is_valid_margin("1 2 3 4 5"));
    }
}
