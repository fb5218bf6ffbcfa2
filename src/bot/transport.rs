//! The chat network boundary.

use crate::error::TransportError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// A document a user sent to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingDocument {
    /// Network-specific handle used to fetch the content.
    pub file_id: String,
    pub file_name: String,
    /// User who sent it (may differ from the chat in group chats).
    pub sender_id: i64,
}

/// Sends replies and fetches documents.
///
/// Methods are synchronous and are also called from job completion, which
/// runs on the scheduler's workers; implementations should hand work off
/// rather than block for long.
pub trait Transport: Send + Sync {
    fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TransportError>;

    fn send_file(&self, chat_id: i64, path: &Path, caption: &str) -> Result<(), TransportError>;

    /// Store the document's content at `dest` and return where it landed.
    fn download_document(
        &self,
        document: &IncomingDocument,
        dest: &Path,
    ) -> Result<PathBuf, TransportError>;
}

/// Transport for local use: replies go to a writer, and a document's
/// `file_id` is a path on this machine.
pub struct ConsoleTransport {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleTransport {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    fn write_line(&self, chat_id: i64, line: &str) -> Result<(), TransportError> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "[{chat_id}] {line}")
            .and_then(|_| out.flush())
            .map_err(|e| TransportError::SendFailed {
                chat_id,
                detail: e.to_string(),
            })
    }
}

impl Transport for ConsoleTransport {
    fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        for line in text.lines() {
            self.write_line(chat_id, line)?;
        }
        Ok(())
    }

    fn send_file(&self, chat_id: i64, path: &Path, caption: &str) -> Result<(), TransportError> {
        if !path.exists() {
            return Err(TransportError::SendFailed {
                chat_id,
                detail: format!("{} does not exist", path.display()),
            });
        }
        self.write_line(chat_id, &format!("<file {}> {}", path.display(), caption))
    }

    fn download_document(
        &self,
        document: &IncomingDocument,
        dest: &Path,
    ) -> Result<PathBuf, TransportError> {
        std::fs::copy(&document.file_id, dest).map_err(|e| TransportError::DownloadFailed {
            file_id: document.file_id.clone(),
            detail: e.to_string(),
        })?;
        Ok(dest.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Writer that keeps everything in a shared buffer.
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn messages_are_prefixed_per_line() {
        let buf = Shared::default();
        let t = ConsoleTransport::new(buf.clone());
        t.send_message(7, "hello\nworld").unwrap();
        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "[7] hello\n[7] world\n");
    }

    #[test]
    fn download_copies_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("book.fb2");
        std::fs::write(&src, b"<FictionBook/>").unwrap();
        let dest = dir.path().join("7_book.fb2");

        let t = ConsoleTransport::new(std::io::sink());
        let doc = IncomingDocument {
            file_id: src.to_string_lossy().into_owned(),
            file_name: "book.fb2".into(),
            sender_id: 7,
        };
        assert_eq!(t.download_document(&doc, &dest).unwrap(), dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"<FictionBook/>");
    }

    #[test]
    fn missing_download_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let t = ConsoleTransport::new(std::io::sink());
        let doc = IncomingDocument {
            file_id: "/no/such/book.fb2".into(),
            file_name: "book.fb2".into(),
            sender_id: 7,
        };
        assert!(matches!(
            t.download_document(&doc, &dir.path().join("x")),
            Err(TransportError::DownloadFailed { .. })
        ));
    }

    #[test]
    fn sending_missing_file_fails() {
        let t = ConsoleTransport::new(std::io::sink());
        assert!(t.send_file(1, Path::new("/no/such.epub"), "").is_err());
    }
}
