//! Persist message attachments into a file-holding location.

use tracing::info;

use crate::error::Result;
use crate::host::FileLocation;
use crate::model::{Attachment, StoredFile};

/// Writes attachments into one [`FileLocation`].
///
/// There is no dedup here: every call creates a new file. The pipeline
/// decides whether a message's attachments are stored at all.
pub struct AttachmentStore {
    location: Box<dyn FileLocation>,
}

impl AttachmentStore {
    pub fn new(location: impl FileLocation + 'static) -> Self {
        Self {
            location: Box::new(location),
        }
    }

    /// The location files are created in.
    pub fn location(&self) -> &dyn FileLocation {
        self.location.as_ref()
    }

    /// Store one attachment, named `"{prefix} {name}"` when a prefix is given.
    ///
    /// Collaborator failures propagate unchanged; nothing is retried.
    pub fn store(
        &self,
        attachment: &Attachment,
        timestamp_prefix: Option<&str>,
    ) -> Result<StoredFile> {
        let name = stored_name(&attachment.name, timestamp_prefix);
        let file = self
            .location
            .create_file(&name, &attachment.content_type, &attachment.data)?;
        info!(
            file_id = %file.id,
            name = %file.name,
            bytes = attachment.size(),
            "Stored attachment"
        );
        Ok(file)
    }
}

fn stored_name(name: &str, timestamp_prefix: Option<&str>) -> String {
    match timestamp_prefix {
        Some(prefix) => format!("{prefix} {name}"),
        None => name.to_string(),
    }
}
