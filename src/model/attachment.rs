//! Attachment payloads read from a message.

/// A single attachment as enumerated on a message.
///
/// Unlike an index entry, the decoded bytes are held in memory: they are
/// read once and handed straight to the file-holding location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Filename of the attachment. Generated if missing from the headers.
    pub name: String,

    /// MIME content type (e.g. `"image/jpeg"`, `"application/pdf"`).
    pub content_type: String,

    /// Decoded content.
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// Decoded size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}
