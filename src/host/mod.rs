//! Capabilities the extractor needs from its host services.
//!
//! The pipeline never talks to a concrete mail, file or sheet service. It
//! is handed implementations of these traits at construction time:
//! - [`memory`]: in-memory fakes for tests
//! - [`eml`], [`folder`], [`csv`]: local-disk adapters used by the CLI

pub mod csv;
pub mod eml;
pub mod folder;
pub mod memory;
pub mod search;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Attachment, CellValue, StoredFile};

/// A searchable mailbox.
pub trait Mailbox {
    type Thread: Thread;
    type Message: Message;

    /// Threads matching a Gmail-style query string, in mailbox order.
    fn search(&self, query: &str) -> Result<Vec<Self::Thread>>;

    /// Messages of a thread, oldest first.
    fn messages_for_thread(&self, thread: &Self::Thread) -> Result<Vec<Self::Message>>;
}

/// A conversation returned by [`Mailbox::search`].
pub trait Thread {
    fn id(&self) -> String;
    fn in_spam(&self) -> bool;
    fn in_trash(&self) -> bool;
}

/// A single message.
pub trait Message {
    /// Mailbox-local id, stable within the mailbox.
    fn id(&self) -> String;

    /// Header value by case-insensitive name.
    fn header(&self, name: &str) -> Option<String>;

    /// Send/receive instant.
    fn date(&self) -> DateTime<Utc>;

    /// Attachments in the order the message lists them.
    fn attachments(&self) -> Result<Vec<Attachment>>;

    /// Plain-text body.
    fn body(&self) -> String;
}

/// A place that holds files, such as a shared drive folder.
pub trait FileLocation {
    /// Create a new file. Never overwrites an existing one.
    fn create_file(&self, name: &str, content_type: &str, data: &[u8]) -> Result<StoredFile>;

    /// Read back the bytes of a stored file.
    fn read_file(&self, file: &StoredFile) -> Result<Vec<u8>>;

    /// Thumbnail image bytes, if the location can render one for this file.
    fn thumbnail(&self, file: &StoredFile) -> Result<Option<Vec<u8>>>;
}

/// The first table of a spreadsheet. Rows and columns are 1-based.
pub trait Sheet {
    /// Cells whose text matches `text`.
    ///
    /// Like most full-text finders this may also return cells that merely
    /// contain `text`; callers filter for equality.
    fn find_exact(&self, text: &str) -> Result<Vec<CellValue>>;

    /// Append a row after the last one. `false` if the sheet refused it.
    fn append_row(&self, values: &[CellValue]) -> Result<bool>;

    /// Index of the last non-empty row, 0 for an empty sheet.
    fn last_row(&self) -> Result<usize>;

    /// Number of columns spanned by the widest row.
    fn last_column(&self) -> Result<usize>;

    /// Values of one row, padded with empty text up to [`Sheet::last_column`].
    fn row_values(&self, row: usize) -> Result<Vec<CellValue>>;

    /// Replace one cell.
    fn set_cell(&self, row: usize, column: usize, value: CellValue) -> Result<()>;
}
