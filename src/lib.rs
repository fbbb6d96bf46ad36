//! `mailextract`: pull attachments out of a mailbox into a file store and
//! keep one record row per message.
//!
//! The library drives abstract collaborators (see [`host`]): a searchable
//! mailbox, a location that holds files, and a sheet that holds rows. A run
//! of [`pipeline::ExtractionPipeline`] searches, skips spam/trash and
//! already-recorded messages, stores attachments and hands each message to
//! an extraction strategy.

pub mod config;
pub mod error;
pub mod host;
pub mod model;
pub mod pipeline;
pub mod store;
pub mod strategy;
pub mod text;

pub use error::{ExtractError, Result};
pub use pipeline::{
    AttachmentPrefix, ExtractContext, ExtractionPipeline, PipelineConfig, RunReport,
};
