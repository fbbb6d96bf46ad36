//! Ready-made extraction strategies.
//!
//! [`record_message`] appends one row per message through the pipeline's
//! record store. The caller decides which [`Column`]s follow the identity
//! cells.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::host::Message;
use crate::model::{CellValue, StoredFile};
use crate::pipeline::ExtractContext;
use crate::store::RecordOptions;
use crate::text::{format_local, strip_signature};

/// A message field rendered into a record cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Column {
    /// Local date and time, `YYYY-MM-DD HH:MM:SS`.
    Date,
    From,
    To,
    Cc,
    Subject,
    /// Body with the trailing signature block removed.
    Body,
}

impl Column {
    /// `[date, from, subject, body]`
    pub const SUMMARY: [Column; 4] = [Column::Date, Column::From, Column::Subject, Column::Body];

    pub fn render<T: Message + ?Sized>(self, ctx: &ExtractContext<'_>, message: &T) -> CellValue {
        let text = match self {
            Column::Date => format_local(message.date(), ctx.offset, "%Y-%m-%d %H:%M:%S"),
            Column::From => message.header("From").unwrap_or_default(),
            Column::To => message.header("To").unwrap_or_default(),
            Column::Cc => message.header("Cc").unwrap_or_default(),
            Column::Subject => message.header("Subject").unwrap_or_default(),
            Column::Body => strip_signature(&message.body()),
        };
        CellValue::Text(text)
    }
}

/// Render `columns` for `message`.
pub fn render_columns<T: Message + ?Sized>(
    ctx: &ExtractContext<'_>,
    message: &T,
    columns: &[Column],
) -> Vec<CellValue> {
    columns.iter().map(|c| c.render(ctx, message)).collect()
}

/// `[date, from, subject, body]` for `message`.
pub fn summary_columns<T: Message + ?Sized>(
    ctx: &ExtractContext<'_>,
    message: &T,
) -> Vec<CellValue> {
    render_columns(ctx, message, &Column::SUMMARY)
}

/// How [`record_message`] writes rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordSettings {
    /// Put the message permalink after the local id.
    pub with_id_link: bool,
    /// Embed image thumbnails, stored next to the attachments.
    pub with_thumbnails: bool,
    pub columns: Vec<Column>,
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            with_id_link: true,
            with_thumbnails: false,
            columns: Column::SUMMARY.to_vec(),
        }
    }
}

/// A strategy that appends a row per message and returns it as stored.
///
/// Needs a record store on the pipeline. Thumbnails are created in the
/// attachment store's location; without one, files get plain links. A row
/// the sheet refused yields no result.
pub fn record_message<T>(
    settings: RecordSettings,
) -> impl Fn(&ExtractContext<'_>, &T, &[StoredFile]) -> Result<Option<Vec<CellValue>>>
where
    T: Message,
{
    move |ctx: &ExtractContext<'_>, message: &T, files: &[StoredFile]| {
        let records = ctx.require_records()?;
        let options = RecordOptions {
            with_id_link: settings.with_id_link,
            thumbnails: if settings.with_thumbnails {
                ctx.attachments.map(|store| store.location())
            } else {
                None
            },
        };
        let columns = render_columns(ctx, message, &settings.columns);
        let row = records.store(message, &columns, files, options)?;
        Ok(if row.is_empty() { None } else { Some(row) })
    }
}
