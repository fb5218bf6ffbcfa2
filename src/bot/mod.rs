//! Chat front-end for the converter.
//!
//! [`Bot`] turns incoming chat [`Update`]s into replies, preference changes
//! and conversion jobs. It knows nothing about a concrete chat network: all
//! I/O goes through a [`Transport`], and preferences live in a [`UserStore`].
//!
//! ## Document flow
//!
//! ```text
//! document ─▶ registered? ─▶ .fb2/.zip? ─▶ download to data_dir/{sender}_{name}
//!                                               │
//!                               JobScheduler::submit_with ─▶ report_outcome
//! ```
//!
//! [`Bot::handle`] returns as soon as the job is queued. The reply for the
//! finished conversion is sent from the job's completion callback.

pub mod command;
pub mod store;
pub mod transport;

pub use command::{Command, EmailAction};
pub use store::{MemoryUserStore, UserStore};
pub use transport::{ConsoleTransport, IncomingDocument, Transport};

use crate::config::BotConfig;
use crate::output::ConversionOutcome;
use crate::pipeline::cleanup;
use crate::request::ConversionRequest;
use crate::scheduler::{JobHandle, JobScheduler};
use crate::user::UserPreference;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const REGISTERED_MESSAGE: &str = "Now you are registered. You can start converting!";
pub const CONVERSION_STARTED_MESSAGE: &str =
    "Conversion started. Please wait, it may take a while...";
pub const UNSUPPORTED_DOCUMENT_MESSAGE: &str = "Only .fb2 or .fb2.zip extensions are allowed!";
pub const EMAIL_DOMAIN_MESSAGE: &str = "Only @kindle.com domain is accepted!";
pub const DOCUMENT_NOT_RECEIVED_MESSAGE: &str =
    "Could not receive your file. Please send it again.";

/// Something that arrived from the chat network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Text {
        chat_id: i64,
        first_name: String,
        text: String,
    },
    Document {
        chat_id: i64,
        document: IncomingDocument,
    },
}

/// The chat front-end.
pub struct Bot<T, S> {
    config: Arc<BotConfig>,
    transport: Arc<T>,
    store: Arc<S>,
    scheduler: Arc<JobScheduler>,
}

impl<T, S> Clone for Bot<T, S> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            transport: Arc::clone(&self.transport),
            store: Arc::clone(&self.store),
            scheduler: Arc::clone(&self.scheduler),
        }
    }
}

impl<T, S> Bot<T, S>
where
    T: Transport + 'static,
    S: UserStore + 'static,
{
    pub fn new(
        config: BotConfig,
        transport: Arc<T>,
        store: Arc<S>,
        scheduler: Arc<JobScheduler>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            store,
            scheduler,
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// React to one update.
    ///
    /// Returns the job handle when the update queued a conversion. The handle
    /// may be dropped; the job and its reply run regardless.
    pub fn handle(&self, update: Update) -> Option<JobHandle> {
        match update {
            Update::Text {
                chat_id,
                first_name,
                text,
            } => {
                match Command::parse(&text) {
                    Some(command) => self.run_command(chat_id, &first_name, command),
                    None => debug!(chat_id, "Ignoring non-command text"),
                }
                None
            }
            Update::Document { chat_id, document } => self.document_received(chat_id, document),
        }
    }

    fn run_command(&self, chat_id: i64, first_name: &str, command: Command) {
        debug!(chat_id, ?command, "Command received");
        match command {
            Command::Start => self.start(chat_id, first_name),
            Command::Email(action) => self.email(chat_id, action),
            Command::File => self.toggle(chat_id, "Get converted file", |u| {
                u.get_converted_file = !u.get_converted_file;
                u.get_converted_file
            }),
            Command::Font => self.toggle(chat_id, "Embed fonts", |u| {
                u.embed_fonts = !u.embed_fonts;
                u.embed_fonts
            }),
            Command::Margin(margin) => self.margin(chat_id, margin),
            Command::Users => self.users(chat_id),
        }
    }

    // ── Commands ────────────────────────────────────────────────────────

    fn start(&self, chat_id: i64, first_name: &str) {
        self.send(chat_id, &self.greeting(first_name));
        match self.store.find(chat_id) {
            Some(user) => self.send(chat_id, &user.summary()),
            None => self.register(chat_id, ""),
        }
    }

    fn greeting(&self, first_name: &str) -> String {
        format!(
            "Hi, {first_name}, nice to meet you!\n\
             This is {name}, a fb2 to Kindle converter bot.\n\
             It receives .fb2 or .fb2.zip files,\n\
             converts them to EPUB format and sends them to your Kindle.\n\
             \n\
             You need to set up your Kindle email using the '{email}' command.\n\
             Also add {sender} to your\n\
             Approved Personal Document E-mail List in\n\
             Manage Your Content & Devices > Preferences > Personal Document Settings\n\
             \n\
             By default fonts are embedded in the book.\n\
             To switch this setting use the '{font}' command.\n\
             \n\
             You can also set your own text margins.\n\
             To set them use the '{margin}' command.\n\
             \n\
             By default the converted file is only sent by email.\n\
             To also get it here use the '{file}' command.",
            name = self.config.name,
            sender = self.config.sender_email,
            email = command::EMAIL,
            font = command::FONT,
            margin = command::MARGIN,
            file = command::FILE,
        )
    }

    fn email(&self, chat_id: i64, action: EmailAction) {
        match action {
            EmailAction::Show => match self.store.find(chat_id) {
                Some(user) if !user.email.is_empty() => {
                    self.send(chat_id, &format!("Your email is set to: {}", user.email))
                }
                _ => self.send(chat_id, "You haven't set email yet!"),
            },
            EmailAction::Clear => {
                if let Some(mut user) = self.store.find(chat_id) {
                    user.email.clear();
                    self.store.save(user);
                    self.send(chat_id, "Email is cleared");
                }
            }
            EmailAction::Set(email) if command::is_kindle_email(&email) => {
                match self.store.find(chat_id) {
                    Some(mut user) => {
                        user.email = email.clone();
                        self.store.save(user);
                    }
                    None => self.register(chat_id, &email),
                }
                self.send(chat_id, &format!("Email is set to: {email}"));
            }
            EmailAction::Set(_) => self.send(chat_id, EMAIL_DOMAIN_MESSAGE),
        }
    }

    fn toggle(&self, chat_id: i64, label: &str, flip: impl FnOnce(&mut UserPreference) -> bool) {
        match self.store.find(chat_id) {
            Some(mut user) => {
                let value = flip(&mut user);
                self.store.save(user);
                self.send(chat_id, &format!("{label} is set to: {value}"));
            }
            None => self.register(chat_id, ""),
        }
    }

    fn margin(&self, chat_id: i64, margin: Option<String>) {
        let default_margin = &self.scheduler.config().default_margin;
        let example = format!("Example: '{} {}'", command::MARGIN, default_margin);

        let Some(margin) = margin else {
            match self.store.find(chat_id) {
                Some(user) if user.margins.is_empty() => self.send(
                    chat_id,
                    &format!(
                        "You're using default margin: {default_margin}\n\
                         You can set your own preferred margin using this command.\n\
                         {example}\n\
                         Order of margins is: top right bottom left"
                    ),
                ),
                Some(user) => self.send(chat_id, &format!("Your margin is set to: {}", user.margins)),
                None => self.register(chat_id, ""),
            }
            return;
        };

        if !command::is_valid_margin(&margin) {
            self.send(chat_id, &format!("Wrong format of margin value!\n{example}"));
            return;
        }
        let mut user = match self.store.find(chat_id) {
            Some(user) => user,
            None => {
                self.register(chat_id, "");
                UserPreference::new(chat_id, "")
            }
        };
        user.margins = margin.clone();
        self.store.save(user);
        self.send(chat_id, &format!("Margin is set to: {margin}"));
    }

    fn users(&self, chat_id: i64) {
        if self.config.admin_chat_id != Some(chat_id) {
            debug!(chat_id, "Ignoring /users from non-admin chat");
            return;
        }
        let users = self.store.all();
        let listing: Vec<String> = users
            .iter()
            .map(|u| format!("{} - {}", u.chat_id, u.email))
            .collect();
        self.send(
            chat_id,
            &format!(
                "List of all registered users ({}):\nChatId - E-mail\n{}",
                users.len(),
                listing.join("\n")
            ),
        );
    }

    fn register(&self, chat_id: i64, email: &str) {
        info!(chat_id, "Registering new user");
        self.store.save(UserPreference::new(chat_id, email));
        self.send(chat_id, REGISTERED_MESSAGE);
    }

    // ── Documents ───────────────────────────────────────────────────────

    fn document_received(&self, chat_id: i64, document: IncomingDocument) -> Option<JobHandle> {
        let Some(user) = self.store.find(chat_id) else {
            self.register(chat_id, "");
            return None;
        };
        if !is_supported_document(&document.file_name) {
            self.send(chat_id, UNSUPPORTED_DOCUMENT_MESSAGE);
            return None;
        }

        let dest = self
            .config
            .data_dir
            .join(input_file_name(document.sender_id, &document.file_name));
        self.send(chat_id, CONVERSION_STARTED_MESSAGE);

        if let Err(e) = std::fs::create_dir_all(&self.config.data_dir) {
            warn!(chat_id, "Cannot create {}: {}", self.config.data_dir.display(), e);
            self.send(chat_id, DOCUMENT_NOT_RECEIVED_MESSAGE);
            return None;
        }
        let saved = match self.transport.download_document(&document, &dest) {
            Ok(path) => path,
            Err(e) => {
                warn!(chat_id, "Document download failed: {}", e);
                self.send(chat_id, DOCUMENT_NOT_RECEIVED_MESSAGE);
                return None;
            }
        };
        info!(chat_id, file = %saved.display(), "Document saved, queueing conversion");

        let request = ConversionRequest::new(saved, chat_id, user.email.clone(), user.profile());

        // The job would delete the output before we could send it, so keep it
        // and delete it here once it has been sent.
        let base = self.scheduler.config();
        let delete_after_send = user.get_converted_file && base.delete_output_file;
        let config = delete_after_send.then(|| {
            let mut config = base.clone();
            config.delete_output_file = false;
            config
        });

        let transport = Arc::clone(&self.transport);
        Some(self.scheduler.submit_with(request, config, move |outcome| {
            report_outcome(&*transport, chat_id, &user, outcome, delete_after_send)
        }))
    }

    fn send(&self, chat_id: i64, text: &str) {
        send_message(&*self.transport, chat_id, text);
    }
}

/// Tell the user how their conversion went.
fn report_outcome<T: Transport + ?Sized>(
    transport: &T,
    chat_id: i64,
    user: &UserPreference,
    outcome: &ConversionOutcome,
    delete_after_send: bool,
) {
    let Some(path) = outcome.output_path().filter(|_| outcome.is_success()) else {
        send_message(transport, chat_id, outcome.message());
        return;
    };

    if !user.email.is_empty() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        send_message(
            transport,
            chat_id,
            &format!("File {name} was converted and sent to: {}", user.email),
        );
    }
    if user.get_converted_file {
        if let Err(e) = transport.send_file(chat_id, path, "") {
            warn!(chat_id, "Sending converted file failed: {}", e);
        }
        if delete_after_send {
            cleanup::remove_file_blocking(path, "output");
        }
    }
    if user.email.is_empty() && !user.get_converted_file {
        send_message(
            transport,
            chat_id,
            &format!(
                "File was successfully converted, but you haven't set your '{}' \
                 and haven't enabled the '{}' option to get the converted file.",
                command::EMAIL,
                command::FILE
            ),
        );
    }
}

fn send_message<T: Transport + ?Sized>(transport: &T, chat_id: i64, text: &str) {
    if let Err(e) = transport.send_message(chat_id, text) {
        warn!(chat_id, "Sending message failed: {}", e);
    }
}

/// Whether the converter accepts a document with this name.
pub fn is_supported_document(file_name: &str) -> bool {
    file_name.contains(".fb2") || file_name.contains(".zip")
}

/// Name under which a received document is stored: prefixed with the
/// sender so concurrent uploads of the same book never collide.
pub fn input_file_name(sender_id: i64, file_name: &str) -> PathBuf {
    let name = Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    PathBuf::from(format!("{}_{}", sender_id, name.replace(' ', "_")))
}
