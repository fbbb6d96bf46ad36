//! Core data model: search queries, attachments, stored files and sheet cells.

pub mod attachment;
pub mod cell;
pub mod query;
pub mod stored;

pub use attachment::Attachment;
pub use cell::CellValue;
pub use query::Query;
pub use stored::StoredFile;
