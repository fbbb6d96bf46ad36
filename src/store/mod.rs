//! Persistence layers: attachment files and record rows.

pub mod attachment;
pub mod record;

pub use attachment::AttachmentStore;
pub use record::{RecordOptions, RecordStore};
