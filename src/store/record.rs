//! Record rows in a sheet: dedup lookups, appends and file-link enrichment.
//!
//! Row layout: `[local id, permalink?, ...caller columns, ...file ids]`.
//! After an append, each file-id cell is replaced with a rich link to the
//! stored file, or an embedded thumbnail when one is available.

use tracing::{debug, warn};

use crate::error::Result;
use crate::host::{FileLocation, Message, Sheet};
use crate::model::{CellValue, StoredFile};
use crate::text::extract_ids;

/// How [`RecordStore::store`] builds and enriches a row.
#[derive(Clone, Copy)]
pub struct RecordOptions<'a> {
    /// Put the message permalink after the local id.
    pub with_id_link: bool,
    /// Embed thumbnails, creating the thumbnail files in this location.
    pub thumbnails: Option<&'a dyn FileLocation>,
}

impl Default for RecordOptions<'_> {
    fn default() -> Self {
        Self {
            with_id_link: true,
            thumbnails: None,
        }
    }
}

/// Append-only record keeping on top of a [`Sheet`].
pub struct RecordStore {
    sheet: Box<dyn Sheet>,
}

impl RecordStore {
    pub fn new(sheet: impl Sheet + 'static) -> Self {
        Self {
            sheet: Box::new(sheet),
        }
    }

    pub fn sheet(&self) -> &dyn Sheet {
        self.sheet.as_ref()
    }

    /// Whether some cell holds exactly `local_id`.
    ///
    /// The sheet's finder may return partial matches, so results are
    /// filtered for string equality.
    pub fn exists(&self, local_id: &str) -> Result<bool> {
        let found = self
            .sheet
            .find_exact(local_id)?
            .iter()
            .any(|cell| cell.as_text() == local_id);
        Ok(found)
    }

    /// [`RecordStore::exists`] for a message's local id.
    pub fn message_exists<M: Message + ?Sized>(&self, message: &M) -> Result<bool> {
        self.exists(&message.id())
    }

    /// Append a row for `message` and link its files.
    ///
    /// Returns the row as the sheet holds it after enrichment, or an empty
    /// vector if the sheet refused the append.
    pub fn store<M: Message + ?Sized>(
        &self,
        message: &M,
        columns: &[CellValue],
        files: &[StoredFile],
        options: RecordOptions<'_>,
    ) -> Result<Vec<CellValue>> {
        let mut row: Vec<CellValue> = extract_ids(message, options.with_id_link)?
            .into_iter()
            .map(CellValue::Text)
            .collect();
        row.extend(columns.iter().cloned());
        row.extend(files.iter().map(|f| CellValue::Text(f.id.clone())));

        if !self.sheet.append_row(&row)? {
            warn!(message_id = %message.id(), "Sheet refused the row");
            return Ok(Vec::new());
        }

        let row_index = self.sheet.last_row()?;
        debug!(message_id = %message.id(), row = row_index, "Appended record");
        if !files.is_empty() {
            self.update_row_with_files(row_index, files, options.thumbnails)?;
        }

        // The row is committed from here on; a failed read-back must not
        // turn it into a failed message.
        match self.sheet.row_values(row_index) {
            Ok(values) => Ok(values),
            Err(e) => {
                warn!(row = row_index, error = %e, "Failed to read back record row");
                Ok(row)
            }
        }
    }

    /// Replace each file's id cell in `row` with a link to the file.
    ///
    /// With a thumbnail location, an embedded thumbnail is preferred and the
    /// plain link is the fallback. Returns the value written per file, `None`
    /// where the cell could not be enriched (left as it was). Sheet errors on
    /// a single cell are logged and do not stop the other files.
    pub fn update_row_with_files(
        &self,
        row: usize,
        files: &[StoredFile],
        thumbnails: Option<&dyn FileLocation>,
    ) -> Result<Vec<Option<CellValue>>> {
        let mut written = Vec::with_capacity(files.len());

        for file in files {
            let column = match self.find_file_column_in_row(row, file) {
                Ok(Some(column)) => column,
                Ok(None) => {
                    warn!(row, file_id = %file.id, "File id not found in row");
                    written.push(None);
                    continue;
                }
                Err(e) => {
                    warn!(row, file_id = %file.id, error = %e, "Failed to read record row");
                    written.push(None);
                    continue;
                }
            };

            let value = match thumbnails {
                Some(location) => {
                    image_link_to_file(file, location).or_else(|| rich_text_link_to_file(file))
                }
                None => rich_text_link_to_file(file),
            };

            match value {
                Some(value) => match self.sheet.set_cell(row, column, value.clone()) {
                    Ok(()) => written.push(Some(value)),
                    Err(e) => {
                        warn!(row, column, file_id = %file.id, error = %e, "Failed to link file");
                        written.push(None);
                    }
                },
                None => {
                    warn!(row, file_id = %file.id, "No link could be built for file");
                    written.push(None);
                }
            }
        }

        Ok(written)
    }

    /// 1-based column of the first cell in `row` equal to the file's id.
    fn find_file_column_in_row(&self, row: usize, file: &StoredFile) -> Result<Option<usize>> {
        Ok(self
            .sheet
            .row_values(row)?
            .iter()
            .position(|cell| cell.as_text() == file.id)
            .map(|i| i + 1))
    }
}

fn rich_text_link_to_file(file: &StoredFile) -> Option<CellValue> {
    CellValue::link(&file.name, &file.url)
}

/// Persist the file's thumbnail next to it and embed that.
///
/// Best effort: any failure falls back to the caller's plain link.
fn image_link_to_file(file: &StoredFile, location: &dyn FileLocation) -> Option<CellValue> {
    let thumbnail = match location.thumbnail(file) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(e) => {
            warn!(file_id = %file.id, error = %e, "Thumbnail unavailable");
            return None;
        }
    };

    let content_type = if file.content_type.starts_with("image/") {
        file.content_type.as_str()
    } else {
        "image/png"
    };
    match location.create_file(&format!("thumbnail {}", file.name), content_type, &thumbnail) {
        Ok(thumbnail_file) => CellValue::image(thumbnail_file.url, &file.name),
        Err(e) => {
            warn!(file_id = %file.id, error = %e, "Failed to store thumbnail");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::{MemoryFolder, MemoryMessage, MemorySheet};

    fn message(id: &str) -> MemoryMessage {
        MemoryMessage::new(id).with_header("Message-ID", format!("<{id}@example.com>"))
    }

    #[test]
    fn test_exists_is_exact() {
        let sheet = MemorySheet::with_rows(&[&["abc123", "x"], &["zzz", "abc"]]);
        let store = RecordStore::new(sheet);
        assert!(store.exists("abc").unwrap());
        assert!(store.exists("abc123").unwrap());
        assert!(!store.exists("abc1").unwrap());
        assert!(!store.exists("ab").unwrap());
    }

    #[test]
    fn test_store_without_files() {
        let sheet = MemorySheet::new();
        let store = RecordStore::new(sheet.clone());
        let options = RecordOptions {
            with_id_link: false,
            ..RecordOptions::default()
        };

        let row = store
            .store(&message("m1"), &[CellValue::from("hello")], &[], options)
            .unwrap();
        assert_eq!(row, vec![CellValue::from("m1"), CellValue::from("hello")]);
        assert!(store.message_exists(&message("m1")).unwrap());
    }

    #[test]
    fn test_store_with_id_link() {
        let store = RecordStore::new(MemorySheet::new());
        let row = store
            .store(&message("m1"), &[], &[], RecordOptions::default())
            .unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(
            row[1].as_text(),
            "https://mail.google.com/mail/u/0/#search/rfc822msgid%3Am1%40example.com"
        );
    }

    #[test]
    fn test_store_links_files() {
        let sheet = MemorySheet::new();
        let folder = MemoryFolder::new();
        let file = folder
            .create_file("20241228 scan.pdf", "application/pdf", b"%PDF")
            .unwrap();
        let store = RecordStore::new(sheet.clone());
        let options = RecordOptions {
            with_id_link: false,
            ..RecordOptions::default()
        };

        let row = store
            .store(&message("m1"), &[CellValue::from("c")], &[file.clone()], options)
            .unwrap();
        assert_eq!(
            row[2],
            CellValue::Link {
                text: "20241228 scan.pdf".into(),
                url: file.url.clone()
            }
        );
        assert_eq!(sheet.rows()[0][2], row[2]);
    }

    #[test]
    fn test_thumbnail_embeds_image_and_creates_file() {
        let folder = MemoryFolder::new();
        let image = folder.create_file("photo.jpg", "image/jpeg", b"jpg").unwrap();
        let doc = folder.create_file("notes.pdf", "application/pdf", b"pdf").unwrap();
        let store = RecordStore::new(MemorySheet::new());
        let options = RecordOptions {
            with_id_link: false,
            thumbnails: Some(&folder),
        };

        let row = store
            .store(&message("m1"), &[], &[image.clone(), doc.clone()], options)
            .unwrap();

        // One thumbnail file created for the image only.
        assert_eq!(folder.len(), 3);
        let thumb = &folder.files()[2];
        assert_eq!(thumb.name, "thumbnail photo.jpg");
        assert_eq!(
            row[1],
            CellValue::Image {
                source_url: thumb.url.clone(),
                alt_title: "photo.jpg".into()
            }
        );
        // The document falls back to a plain link.
        assert!(matches!(row[2], CellValue::Link { .. }));
    }

    #[test]
    fn test_thumbnail_failure_falls_back_to_link() {
        let folder = MemoryFolder::new();
        let image = folder.create_file("photo.jpg", "image/jpeg", b"jpg").unwrap();
        folder.reject_creates("quota exceeded");
        let store = RecordStore::new(MemorySheet::new());
        let options = RecordOptions {
            with_id_link: false,
            thumbnails: Some(&folder),
        };

        let row = store.store(&message("m1"), &[], &[image], options).unwrap();
        assert!(matches!(row[1], CellValue::Link { .. }));
    }

    #[test]
    fn test_refused_append_returns_empty() {
        let sheet = MemorySheet::new();
        sheet.reject_appends();
        let store = RecordStore::new(sheet.clone());
        let row = store
            .store(&message("m1"), &[], &[], RecordOptions::default())
            .unwrap();
        assert!(row.is_empty());
        assert!(sheet.rows().is_empty());
    }

    #[test]
    fn test_unlinkable_file_is_left_alone() {
        let sheet = MemorySheet::with_rows(&[&["m1", "f-1", "f-2"]]);
        let store = RecordStore::new(sheet.clone());
        let no_url = StoredFile {
            id: "f-1".into(),
            name: "a.txt".into(),
            url: String::new(),
            content_type: "text/plain".into(),
        };
        let missing = StoredFile {
            id: "f-9".into(),
            name: "b.txt".into(),
            url: "memory://b".into(),
            content_type: "text/plain".into(),
        };

        let written = store
            .update_row_with_files(1, &[no_url, missing], None)
            .unwrap();
        assert_eq!(written, vec![None, None]);
        assert_eq!(sheet.rows()[0][1], CellValue::from("f-1"));
    }

    #[test]
    fn test_rejected_cell_update_keeps_appended_row() {
        let sheet = MemorySheet::new();
        sheet.reject_updates("rich value rejected");
        let folder = MemoryFolder::new();
        let file = folder
            .create_file("20241228 scan.pdf", "application/pdf", b"%PDF")
            .unwrap();
        let store = RecordStore::new(sheet.clone());
        let options = RecordOptions {
            with_id_link: false,
            ..RecordOptions::default()
        };

        let row = store
            .store(&message("m1"), &[CellValue::from("c")], &[file.clone()], options)
            .unwrap();
        assert_eq!(row[2], CellValue::from(file.id.as_str()));
        assert_eq!(sheet.rows().len(), 1);
        assert!(store.message_exists(&message("m1")).unwrap());

        let written = store.update_row_with_files(1, &[file], None).unwrap();
        assert_eq!(written, vec![None]);
    }

    #[test]
    fn test_first_matching_column_wins() {
        let sheet = MemorySheet::with_rows(&[&["m1", "f-1", "f-1"]]);
        let store = RecordStore::new(sheet.clone());
        let file = StoredFile {
            id: "f-1".into(),
            name: "a.txt".into(),
            url: "memory://a".into(),
            content_type: "text/plain".into(),
        };
        store.update_row_with_files(1, &[file], None).unwrap();
        let row = &sheet.rows()[0];
        assert!(matches!(row[1], CellValue::Link { .. }));
        assert_eq!(row[2], CellValue::from("f-1"));
    }
}
