//! Tabular store backed by a CSV file.
//!
//! Output is UTF-8 with BOM for spreadsheet compatibility. Rich cells are
//! written as `=HYPERLINK(...)` / `=IMAGE(...)` formulas so that the file
//! opens with working links. Text that a spreadsheet would read as a formula
//! is written with a leading `'`, which is dropped again on load. The whole
//! file is rewritten after every change.

use std::cell::RefCell;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ExtractError, Result};
use crate::model::CellValue;

use super::Sheet;

const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// A single-table sheet stored as CSV.
#[derive(Debug)]
pub struct CsvSheet {
    path: PathBuf,
    rows: RefCell<Vec<Vec<CellValue>>>,
}

impl CsvSheet {
    /// Load `path`, or start empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let rows: Vec<Vec<CellValue>> = if path.exists() {
            let bytes = std::fs::read(&path).map_err(|e| ExtractError::io(&path, e))?;
            let bytes = bytes.strip_prefix(BOM).unwrap_or(&bytes);
            let text = String::from_utf8(bytes.to_vec()).map_err(|e| ExtractError::Parse {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            parse_csv(&text)
                .map_err(|reason| ExtractError::Parse {
                    path: path.clone(),
                    reason,
                })?
                .into_iter()
                .map(|r| r.iter().map(|c| decode_cell(c)).collect())
                .collect()
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), rows = rows.len(), "Opened CSV sheet");
        Ok(Self {
            path,
            rows: RefCell::new(rows),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let mut file = std::fs::File::create(&self.path)?;
            file.write_all(BOM)?;
            for row in self.rows.borrow().iter() {
                let line = row
                    .iter()
                    .map(|c| csv_escape(&encode_cell(c)))
                    .collect::<Vec<_>>()
                    .join(",");
                file.write_all(line.as_bytes())?;
                file.write_all(b"\r\n")?;
            }
            Ok(())
        };
        write().map_err(|e| ExtractError::io(&self.path, e))
    }
}

impl Sheet for CsvSheet {
    fn find_exact(&self, text: &str) -> Result<Vec<CellValue>> {
        Ok(self
            .rows
            .borrow()
            .iter()
            .flatten()
            .filter(|c| c.as_text() == text)
            .cloned()
            .collect())
    }

    fn append_row(&self, values: &[CellValue]) -> Result<bool> {
        self.rows.borrow_mut().push(values.to_vec());
        self.save()?;
        Ok(true)
    }

    fn last_row(&self) -> Result<usize> {
        Ok(self.rows.borrow().len())
    }

    fn last_column(&self) -> Result<usize> {
        Ok(self.rows.borrow().iter().map(Vec::len).max().unwrap_or(0))
    }

    fn row_values(&self, row: usize) -> Result<Vec<CellValue>> {
        let width = self.last_column()?;
        let mut values = row
            .checked_sub(1)
            .and_then(|i| self.rows.borrow().get(i).cloned())
            .ok_or_else(|| ExtractError::Sheet(format!("row {row} out of range")))?;
        values.resize(width, CellValue::Text(String::new()));
        Ok(values)
    }

    fn set_cell(&self, row: usize, column: usize, value: CellValue) -> Result<()> {
        {
            let mut rows = self.rows.borrow_mut();
            let cells = row
                .checked_sub(1)
                .and_then(|i| rows.get_mut(i))
                .ok_or_else(|| ExtractError::Sheet(format!("row {row} out of range")))?;
            let col = column
                .checked_sub(1)
                .ok_or_else(|| ExtractError::Sheet("column 0 is invalid".into()))?;
            if cells.len() <= col {
                cells.resize(col + 1, CellValue::Text(String::new()));
            }
            cells[col] = value;
        }
        self.save()
    }
}

/// Leading characters that make a spreadsheet evaluate a cell.
const FORMULA_TRIGGERS: &[char] = &['=', '+', '-', '@', '\t', '\r', '\''];

fn encode_cell(cell: &CellValue) -> String {
    match cell {
        CellValue::Text(text) if text.starts_with(FORMULA_TRIGGERS) => format!("'{text}"),
        CellValue::Text(text) => text.clone(),
        rich => rich.to_formula(),
    }
}

fn decode_cell(raw: &str) -> CellValue {
    match raw.strip_prefix('\'') {
        Some(text) => CellValue::Text(text.to_string()),
        None => CellValue::from_formula(raw),
    }
}

/// Escape a value for CSV (RFC 4180).
///
/// Wraps in double quotes if the value contains commas, quotes, or newlines.
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Split CSV text into records. Quoted fields may span lines.
fn parse_csv(text: &str) -> std::result::Result<Vec<Vec<String>>, String> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                c => field.push(c),
            }
            continue;
        }
        match ch {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c => field.push(c),
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".into());
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}
