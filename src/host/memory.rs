//! In-memory host services for tests and dry runs.
//!
//! [`MemoryFolder`] and [`MemorySheet`] are cheap handles over shared state:
//! clone one before handing it to a store and inspect the clone afterwards.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::error::{ExtractError, Result};
use crate::model::{Attachment, CellValue, StoredFile};

use super::{FileLocation, Mailbox, Message, Sheet, Thread};

// ── Mailbox ─────────────────────────────────────────────────────

/// A fixed list of threads. Every search returns all of them.
#[derive(Debug, Default)]
pub struct MemoryMailbox {
    threads: Vec<MemoryThread>,
    searches: RefCell<Vec<String>>,
}

impl MemoryMailbox {
    pub fn new(threads: Vec<MemoryThread>) -> Self {
        Self {
            threads,
            searches: RefCell::new(Vec::new()),
        }
    }

    /// Query strings received so far.
    pub fn searches(&self) -> Vec<String> {
        self.searches.borrow().clone()
    }
}

impl Mailbox for MemoryMailbox {
    type Thread = MemoryThread;
    type Message = MemoryMessage;

    fn search(&self, query: &str) -> Result<Vec<MemoryThread>> {
        self.searches.borrow_mut().push(query.to_string());
        Ok(self.threads.clone())
    }

    fn messages_for_thread(&self, thread: &MemoryThread) -> Result<Vec<MemoryMessage>> {
        if thread.unreadable {
            return Err(ExtractError::Mailbox(format!(
                "thread {} is unavailable",
                thread.id
            )));
        }
        Ok(thread.messages.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryThread {
    pub id: String,
    pub spam: bool,
    pub trash: bool,
    pub messages: Vec<MemoryMessage>,
    /// Make [`Mailbox::messages_for_thread`] fail for this thread.
    pub unreadable: bool,
}

impl MemoryThread {
    pub fn new(id: impl Into<String>, messages: Vec<MemoryMessage>) -> Self {
        Self {
            id: id.into(),
            messages,
            ..Self::default()
        }
    }

    pub fn in_spam(mut self) -> Self {
        self.spam = true;
        self
    }

    pub fn in_trash(mut self) -> Self {
        self.trash = true;
        self
    }

    pub fn unreadable(mut self) -> Self {
        self.unreadable = true;
        self
    }
}

impl Thread for MemoryThread {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn in_spam(&self) -> bool {
        self.spam
    }

    fn in_trash(&self) -> bool {
        self.trash
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryMessage {
    pub id: String,
    pub headers: Vec<(String, String)>,
    pub date: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
    pub body: String,
    /// Make [`Message::attachments`] fail, as an unreadable message would.
    pub unreadable: bool,
}

impl MemoryMessage {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn unreadable(mut self) -> Self {
        self.unreadable = true;
        self
    }
}

impl Message for MemoryMessage {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    fn date(&self) -> DateTime<Utc> {
        self.date
    }

    fn attachments(&self) -> Result<Vec<Attachment>> {
        if self.unreadable {
            return Err(ExtractError::Mailbox(format!(
                "message {} is unavailable",
                self.id
            )));
        }
        Ok(self.attachments.clone())
    }

    fn body(&self) -> String {
        self.body.clone()
    }
}

// ── Folder ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct FolderState {
    files: Vec<(StoredFile, Vec<u8>)>,
    reject: Option<String>,
}

/// Files kept in memory. Images are their own thumbnails.
#[derive(Debug, Clone, Default)]
pub struct MemoryFolder {
    state: Rc<RefCell<FolderState>>,
}

impl MemoryFolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `create_file` fail with `reason`.
    pub fn reject_creates(&self, reason: impl Into<String>) {
        self.state.borrow_mut().reject = Some(reason.into());
    }

    /// Stored file handles in creation order.
    pub fn files(&self) -> Vec<StoredFile> {
        self.state
            .borrow()
            .files
            .iter()
            .map(|(f, _)| f.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.borrow().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileLocation for MemoryFolder {
    fn create_file(&self, name: &str, content_type: &str, data: &[u8]) -> Result<StoredFile> {
        let mut state = self.state.borrow_mut();
        if let Some(reason) = &state.reject {
            return Err(ExtractError::FileStore(reason.clone()));
        }
        let id = format!("file-{}", state.files.len() + 1);
        let file = StoredFile {
            url: format!("memory://folder/{id}"),
            id,
            name: name.to_string(),
            content_type: content_type.to_string(),
        };
        state.files.push((file.clone(), data.to_vec()));
        Ok(file)
    }

    fn read_file(&self, file: &StoredFile) -> Result<Vec<u8>> {
        self.state
            .borrow()
            .files
            .iter()
            .find(|(f, _)| f.id == file.id)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| ExtractError::FileStore(format!("no file with id {}", file.id)))
    }

    fn thumbnail(&self, file: &StoredFile) -> Result<Option<Vec<u8>>> {
        if file.content_type.starts_with("image/") {
            self.read_file(file).map(Some)
        } else {
            Ok(None)
        }
    }
}

// ── Sheet ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SheetState {
    rows: Vec<Vec<CellValue>>,
    reject_appends: bool,
    reject_updates: Option<String>,
}

/// A single table held in memory.
///
/// `find_exact` behaves like a full-text finder: it returns every cell that
/// contains the text, not only exact matches.
#[derive(Debug, Clone, Default)]
pub struct MemorySheet {
    state: Rc<RefCell<SheetState>>,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed rows of plain text.
    pub fn with_rows(rows: &[&[&str]]) -> Self {
        let sheet = Self::new();
        sheet.state.borrow_mut().rows = rows
            .iter()
            .map(|r| r.iter().map(|c| CellValue::from(*c)).collect())
            .collect();
        sheet
    }

    /// Make every following `append_row` report failure.
    pub fn reject_appends(&self) {
        self.state.borrow_mut().reject_appends = true;
    }

    /// Make every following `set_cell` fail with `reason`.
    pub fn reject_updates(&self, reason: impl Into<String>) {
        self.state.borrow_mut().reject_updates = Some(reason.into());
    }

    pub fn rows(&self) -> Vec<Vec<CellValue>> {
        self.state.borrow().rows.clone()
    }
}

impl Sheet for MemorySheet {
    fn find_exact(&self, text: &str) -> Result<Vec<CellValue>> {
        Ok(self
            .state
            .borrow()
            .rows
            .iter()
            .flatten()
            .filter(|cell| cell.as_text().contains(text))
            .cloned()
            .collect())
    }

    fn append_row(&self, values: &[CellValue]) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        if state.reject_appends {
            return Ok(false);
        }
        state.rows.push(values.to_vec());
        Ok(true)
    }

    fn last_row(&self) -> Result<usize> {
        Ok(self.state.borrow().rows.len())
    }

    fn last_column(&self) -> Result<usize> {
        Ok(self
            .state
            .borrow()
            .rows
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0))
    }

    fn row_values(&self, row: usize) -> Result<Vec<CellValue>> {
        let width = self.last_column()?;
        let state = self.state.borrow();
        let mut values = row
            .checked_sub(1)
            .and_then(|i| state.rows.get(i))
            .cloned()
            .ok_or_else(|| ExtractError::Sheet(format!("row {row} out of range")))?;
        values.resize(width, CellValue::Text(String::new()));
        Ok(values)
    }

    fn set_cell(&self, row: usize, column: usize, value: CellValue) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if let Some(reason) = &state.reject_updates {
            return Err(ExtractError::Sheet(reason.clone()));
        }
        let cells = row
            .checked_sub(1)
            .and_then(|i| state.rows.get_mut(i))
            .ok_or_else(|| ExtractError::Sheet(format!("row {row} out of range")))?;
        let col = column
            .checked_sub(1)
            .ok_or_else(|| ExtractError::Sheet("column 0 is invalid".into()))?;
        if cells.len() <= col {
            cells.resize(col + 1, CellValue::Text(String::new()));
        }
        cells[col] = value;
        Ok(())
    }
}
