//! Mailbox backed by a directory tree of `.eml` files.
//!
//! Each file is one RFC 5322 message. Its local id is the path relative to
//! the mailbox root, without the `.eml` extension (`inbox/2024/0001`).
//! Messages are grouped into threads by `X-GM-THRID`, then by the root of
//! their `References`, then by their own `Message-ID`. Gmail Takeout
//! `X-Gmail-Labels` decide whether a thread is in spam or trash.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use tracing::{debug, warn};

use crate::error::{ExtractError, Result};
use crate::model::Attachment;

use super::search::{self, MessageMeta};
use super::{Mailbox, Message, Thread};

/// A directory of `.eml` files.
#[derive(Debug, Clone)]
pub struct EmlMailbox {
    root: PathBuf,
    utc_offset: Option<FixedOffset>,
}

impl EmlMailbox {
    /// Open a mailbox directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(ExtractError::io(
                &root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "mailbox directory not found"),
            ));
        }
        Ok(Self {
            root,
            utc_offset: None,
        })
    }

    /// Evaluate `after:`/`before:` in this timezone instead of the process one.
    pub fn with_utc_offset(mut self, offset: Option<FixedOffset>) -> Self {
        self.utc_offset = offset;
        self
    }

    /// Parse every message under the root, in path order.
    ///
    /// Files that cannot be parsed are logged and skipped.
    fn load_messages(&self) -> Result<Vec<EmlMessage>> {
        let mut paths = Vec::new();
        collect_eml_files(&self.root, &mut paths)?;
        paths.sort();

        let mut messages = Vec::with_capacity(paths.len());
        for path in paths {
            match EmlMessage::load(&self.root, &path) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable message"),
            }
        }
        Ok(messages)
    }
}

impl Mailbox for EmlMailbox {
    type Thread = EmlThread;
    type Message = EmlMessage;

    fn search(&self, query: &str) -> Result<Vec<EmlThread>> {
        let parsed = search::parse_query(query);
        let messages = self.load_messages()?;
        debug!(query, messages = messages.len(), "Searching local mailbox");

        let mut threads: Vec<EmlThread> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();
        for message in messages {
            let idx = *by_key.entry(message.thread_key.clone()).or_insert_with(|| {
                threads.push(EmlThread {
                    id: message.thread_key.clone(),
                    messages: Vec::new(),
                });
                threads.len() - 1
            });
            threads[idx].messages.push(message);
        }

        let mut found: Vec<EmlThread> = threads
            .into_iter()
            .filter(|t| {
                t.messages
                    .iter()
                    .any(|m| search::matches(&m.meta, &parsed, self.utc_offset))
            })
            .collect();
        for thread in &mut found {
            thread.messages.sort_by_key(|m| m.meta.date);
        }
        // Most recently active thread first, like a mail client.
        found.sort_by(|a, b| b.last_date().cmp(&a.last_date()));
        Ok(found)
    }

    fn messages_for_thread(&self, thread: &EmlThread) -> Result<Vec<EmlMessage>> {
        Ok(thread.messages.clone())
    }
}

/// Messages sharing a thread key.
#[derive(Debug, Clone)]
pub struct EmlThread {
    id: String,
    messages: Vec<EmlMessage>,
}

impl EmlThread {
    fn last_date(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().map(|m| m.meta.date).max()
    }

    fn has_label(&self, label: &str) -> bool {
        self.messages
            .iter()
            .flat_map(|m| m.meta.labels.iter())
            .any(|l| l.eq_ignore_ascii_case(label))
    }
}

impl Thread for EmlThread {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn in_spam(&self) -> bool {
        self.has_label("Spam")
    }

    fn in_trash(&self) -> bool {
        self.has_label("Trash")
    }
}

/// One `.eml` file. Attachments are decoded on demand.
#[derive(Debug, Clone)]
pub struct EmlMessage {
    id: String,
    path: PathBuf,
    headers: Vec<(String, String)>,
    meta: MessageMeta,
    thread_key: String,
    body: String,
}

impl EmlMessage {
    fn load(root: &Path, path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| ExtractError::io(path, e))?;
        let parsed = MessageParser::default()
            .parse(&data)
            .ok_or_else(|| ExtractError::Parse {
                path: path.to_path_buf(),
                reason: "not an RFC 5322 message".into(),
            })?;

        let header_end = find_header_end(&data).unwrap_or(data.len());
        let headers = unfold_headers(&String::from_utf8_lossy(&data[..header_end]));
        let get = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };

        let message_id = get("message-id")
            .map(|v| strip_angle_brackets(&v).to_string())
            .unwrap_or_default();
        let date = parsed
            .date()
            .and_then(|d| DateTime::parse_from_rfc3339(&d.to_rfc3339()).ok())
            .map(|d| d.with_timezone(&Utc))
            .or_else(|| {
                get("date")
                    .and_then(|v| DateTime::parse_from_rfc2822(&v).ok())
                    .map(|d| d.with_timezone(&Utc))
            })
            .unwrap_or_default();
        let labels = get("x-gmail-labels")
            .map(|v| {
                v.split(',')
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let filenames = parsed
            .attachments()
            .enumerate()
            .map(|(idx, part)| attachment_name(part.attachment_name(), idx))
            .collect();

        let id = local_id(root, path);
        let thread_key = get("x-gm-thrid")
            .or_else(|| get("references").and_then(|r| first_angle_id(&r)))
            .or_else(|| get("in-reply-to").and_then(|r| first_angle_id(&r)))
            .or_else(|| (!message_id.is_empty()).then(|| message_id.clone()))
            .unwrap_or_else(|| id.clone());

        let meta = MessageMeta {
            date,
            from: get("from").unwrap_or_default(),
            to: get("to").unwrap_or_default(),
            subject: parsed
                .subject()
                .map(String::from)
                .or_else(|| get("subject"))
                .unwrap_or_default(),
            message_id,
            labels,
            filenames,
        };
        let body = parsed
            .body_text(0)
            .map(|s| s.into_owned())
            .unwrap_or_default();

        Ok(Self {
            id,
            path: path.to_path_buf(),
            headers,
            meta,
            thread_key,
            body,
        })
    }

    /// Path of the backing `.eml` file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Message for EmlMessage {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn header(&self, name: &str) -> Option<String> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.clone())
    }

    fn date(&self) -> DateTime<Utc> {
        self.meta.date
    }

    fn attachments(&self) -> Result<Vec<Attachment>> {
        let data = std::fs::read(&self.path).map_err(|e| ExtractError::io(&self.path, e))?;
        let parsed = MessageParser::default()
            .parse(&data)
            .ok_or_else(|| ExtractError::Parse {
                path: self.path.clone(),
                reason: "not an RFC 5322 message".into(),
            })?;

        Ok(parsed
            .attachments()
            .enumerate()
            .map(|(idx, part)| {
                let content_type = part
                    .content_type()
                    .map(|ct| match ct.subtype() {
                        Some(sub) => format!("{}/{}", ct.ctype(), sub),
                        None => ct.ctype().to_string(),
                    })
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                Attachment::new(
                    attachment_name(part.attachment_name(), idx),
                    content_type,
                    part.contents().to_vec(),
                )
            })
            .collect())
    }

    fn body(&self) -> String {
        self.body.clone()
    }
}

fn attachment_name(name: Option<&str>, idx: usize) -> String {
    name.map(String::from)
        .unwrap_or_else(|| format!("attachment_{idx}"))
}

fn collect_eml_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| ExtractError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| ExtractError::io(dir, e))?.path();
        if path.is_dir() {
            collect_eml_files(&path, out)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("eml"))
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Relative path without extension, `/`-separated on every platform.
fn local_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Byte offset of the blank line that ends the header block.
fn find_header_end(data: &[u8]) -> Option<usize> {
    for i in 0..data.len().saturating_sub(1) {
        if data[i] == b'\n' && data[i + 1] == b'\n' {
            return Some(i);
        }
        if i + 3 < data.len() && &data[i..i + 4] == b"\r\n\r\n" {
            return Some(i);
        }
    }
    None
}

/// Join folded continuation lines. Returns `(lowercase_name, value)` pairs.
fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim().to_lowercase();
            let value = line[colon_pos + 1..].trim().to_string();
            result.push((name, value));
        }
    }

    result
}

fn strip_angle_brackets(s: &str) -> &str {
    let s = s.trim();
    let s = s.strip_prefix('<').unwrap_or(s);
    s.strip_suffix('>').unwrap_or(s)
}

fn first_angle_id(s: &str) -> Option<String> {
    let start = s.find('<')?;
    let end = s[start..].find('>')?;
    Some(s[start + 1..start + end].to_string())
}
