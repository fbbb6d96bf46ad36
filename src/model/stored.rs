//! Handles to files persisted in a file-holding location.

/// Reference to a file created by a [`crate::host::FileLocation`].
///
/// The location owns the bytes; this is only a handle. It is never mutated
/// after creation: row enrichment changes the sheet cell, not the file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StoredFile {
    /// Unique id assigned by the location.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Shareable URL.
    pub url: String,
    /// MIME content type the file was created with.
    pub content_type: String,
}
