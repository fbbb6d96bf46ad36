//! Pure string helpers: query rendering, message ids and permalinks,
//! signature stripping and local-time timestamps.

use chrono::{DateTime, FixedOffset, Local, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::{ExtractError, Result};
use crate::host::Message;
use crate::model::query::{Query, FREE_TEXT_KEY};

/// Base of the per-message search permalink.
pub const MESSAGE_SEARCH_BASE: &str = "https://mail.google.com/mail/u/0/#search/rfc822msgid";

/// Header holding the RFC 822 message identifier.
pub const MESSAGE_ID_HEADER: &str = "Message-Id";

/// Characters left alone by JavaScript's `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Usenet signature delimiter line, CRLF-framed.
const SIGNATURE_DELIMITER: &str = "\r\n-- \r\n";

/// Render a [`Query`] as a search string.
///
/// The `q` clause is emitted verbatim, every other clause as `key:value`,
/// all joined with a single space.
pub fn build_query(query: &Query) -> String {
    query
        .iter()
        .map(|(k, v)| {
            if k == FREE_TEXT_KEY {
                v.to_string()
            } else {
                format!("{k}:{v}")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Identity cells for a message: its local id, then (if `with_link`) the
/// permalink built from its `Message-Id` header.
pub fn extract_ids<M: Message + ?Sized>(message: &M, with_link: bool) -> Result<Vec<String>> {
    let mut ids = vec![message.id()];
    if with_link {
        let rfc822 = message
            .header(MESSAGE_ID_HEADER)
            .ok_or_else(|| ExtractError::MissingHeader {
                message_id: message.id(),
                header: MESSAGE_ID_HEADER.to_string(),
            })?;
        ids.push(message_search_url(&rfc822));
    }
    Ok(ids)
}

/// Permalink that opens a search for exactly one message.
///
/// One leading `<` and one trailing `>` are stripped first, so bracketed
/// and bare ids give the same URL.
pub fn message_search_url(rfc822_id: &str) -> String {
    let stripped = rfc822_id.strip_prefix('<').unwrap_or(rfc822_id);
    let stripped = stripped.strip_suffix('>').unwrap_or(stripped);
    let target = format!(":{stripped}");
    let encoded = utf8_percent_encode(&target, URI_COMPONENT);
    format!("{MESSAGE_SEARCH_BASE}{encoded}")
}

/// Remove the first `-- ` signature block and everything after it.
///
/// The delimiter must sit on its own CRLF-terminated line after at least one
/// preceding line, and must be followed by some signature text. Bodies
/// without such a block are returned unchanged.
///
/// See <https://en.wikipedia.org/wiki/Signature_block>.
pub fn strip_signature(body: &str) -> String {
    match body.find(SIGNATURE_DELIMITER) {
        Some(pos) if body.len() > pos + SIGNATURE_DELIMITER.len() => body[..pos].to_string(),
        _ => body.to_string(),
    }
}

/// Render an instant in local calendar time as `YYYYMMDD` or, with time,
/// `YYYYMMDD{separator}HHMMSS`.
///
/// `offset` overrides the process timezone.
pub fn local_timestamp(
    instant: DateTime<Utc>,
    offset: Option<FixedOffset>,
    with_time: bool,
    separator: &str,
) -> String {
    let pattern = if with_time {
        format!("%Y%m%d{}%H%M%S", separator.replace('%', "%%"))
    } else {
        "%Y%m%d".to_string()
    };
    format_local(instant, offset, &pattern)
}

/// Format an instant with a chrono pattern in local calendar time.
pub fn format_local(instant: DateTime<Utc>, offset: Option<FixedOffset>, pattern: &str) -> String {
    match offset {
        Some(tz) => instant.with_timezone(&tz).format(pattern).to_string(),
        None => instant.with_timezone(&Local).format(pattern).to_string(),
    }
}
