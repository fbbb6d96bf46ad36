//! The extraction pipeline: search, filter, store attachments, record rows.
//!
//! A run renders the configured [`Query`], searches the mailbox, drops
//! threads sitting in spam or trash, and walks the remaining messages in
//! thread-then-message order. Each message that passes the caller's filter
//! (and is not already recorded) has its attachments persisted and is handed
//! to the extraction strategy together with the stored files.
//!
//! Collaborator failures only skip the message at hand. Configuration
//! errors abort the run.

use std::str::FromStr;

use chrono::{FixedOffset, Local, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ExtractError, Result};
use crate::host::{Mailbox, Message, Thread};
use crate::model::{CellValue, Query, StoredFile};
use crate::store::{AttachmentStore, RecordStore};
use crate::text::{build_query, local_timestamp};

/// How stored attachment names are prefixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentPrefix {
    /// `YYYYMMDD name`
    #[default]
    Date,
    /// `YYYYMMDDHHMMSS name`
    Time,
    /// The attachment's own name.
    #[serde(rename = "none")]
    Disabled,
}

/// Options recognised by [`ExtractionPipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Search clauses. Unset means messages with attachments since today.
    pub query: Option<Query>,
    pub attachment_prefix: AttachmentPrefix,
    /// Timezone for local dates as `±HH:MM`. Unset means the process timezone.
    pub utc_offset: Option<String>,
    /// Skip messages whose local id is already in the record store.
    pub skip_recorded: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            query: None,
            attachment_prefix: AttachmentPrefix::Date,
            utc_offset: None,
            skip_recorded: true,
        }
    }
}

impl PipelineConfig {
    /// Parse [`PipelineConfig::utc_offset`].
    pub fn offset(&self) -> Result<Option<FixedOffset>> {
        self.utc_offset.as_deref().map(parse_utc_offset).transpose()
    }
}

/// Parse `+09:00`, `-0530` or `Z`.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }
    FixedOffset::from_str(s)
        .map_err(|e| ExtractError::InvalidConfig(format!("utc_offset '{s}': {e}")))
}

/// Read-only view of the pipeline handed to filters and strategies.
#[derive(Clone, Copy)]
pub struct ExtractContext<'p> {
    pub config: &'p PipelineConfig,
    pub offset: Option<FixedOffset>,
    pub attachments: Option<&'p AttachmentStore>,
    pub records: Option<&'p RecordStore>,
}

impl ExtractContext<'_> {
    /// The message's instant in local calendar time, `YYYYMMDD` or
    /// `YYYYMMDD{separator}HHMMSS`.
    pub fn attachment_timestamp<T: Message + ?Sized>(
        &self,
        message: &T,
        with_time: bool,
        separator: &str,
    ) -> String {
        local_timestamp(message.date(), self.offset, with_time, separator)
    }

    /// The record store, or a configuration error naming what needed it.
    pub fn require_records(&self) -> Result<&RecordStore> {
        self.records
            .ok_or_else(|| ExtractError::NotConfigured("record store".into()))
    }
}

/// A message that was examined but not extracted because a collaborator
/// failed.
///
/// `message_id` is `None` when the whole thread could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedMessage {
    pub thread_id: String,
    pub message_id: Option<String>,
    pub reason: String,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport<R> {
    /// Non-empty strategy results, in processing order.
    pub results: Vec<R>,
    pub skipped: Vec<SkippedMessage>,
    /// Messages passed over because they were already recorded.
    pub duplicates: usize,
    /// Threads dropped for being in spam or trash.
    pub excluded_threads: usize,
    /// Messages from accepted threads, before filtering.
    pub examined: usize,
}

impl<R> Default for RunReport<R> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            skipped: Vec::new(),
            duplicates: 0,
            excluded_threads: 0,
            examined: 0,
        }
    }
}

impl<R> RunReport<R> {
    /// The results, or `None` when there are none.
    pub fn into_results(self) -> Option<Vec<R>> {
        if self.results.is_empty() {
            None
        } else {
            Some(self.results)
        }
    }
}

type FilterFn<T> = Box<dyn Fn(&ExtractContext<'_>, &T) -> bool>;
type StrategyFn<T, R> = Box<dyn Fn(&ExtractContext<'_>, &T, &[StoredFile]) -> Result<Option<R>>>;

enum Outcome<R> {
    Duplicate,
    Extracted(Option<R>),
}

/// Drives a [`Mailbox`] through the attachment and record stores.
pub struct ExtractionPipeline<M: Mailbox, R = Vec<CellValue>> {
    mailbox: M,
    config: PipelineConfig,
    offset: Option<FixedOffset>,
    filter: FilterFn<M::Message>,
    strategy: StrategyFn<M::Message, R>,
    attachments: Option<AttachmentStore>,
    records: Option<RecordStore>,
}

impl<M: Mailbox, R> ExtractionPipeline<M, R> {
    /// A pipeline with default configuration, no stores, a filter that
    /// accepts everything and a strategy that records nothing.
    pub fn new(mailbox: M) -> Self {
        Self {
            mailbox,
            config: PipelineConfig::default(),
            offset: None,
            filter: Box::new(|_, _| true),
            strategy: Box::new(|_, _, _| Ok(None)),
            attachments: None,
            records: None,
        }
    }

    /// Replace the configuration. Fails if the offset or query is malformed.
    pub fn with_config(mut self, config: PipelineConfig) -> Result<Self> {
        self.offset = config.offset()?;
        if let Some(query) = &config.query {
            query.validate()?;
        }
        self.config = config;
        Ok(self)
    }

    pub fn attachment_store(mut self, store: AttachmentStore) -> Self {
        self.attachments = Some(store);
        self
    }

    pub fn record_store(mut self, store: RecordStore) -> Self {
        self.records = Some(store);
        self
    }

    /// Only messages for which `filter` returns `true` are extracted.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&ExtractContext<'_>, &M::Message) -> bool + 'static,
    {
        self.filter = Box::new(filter);
        self
    }

    /// Decide per message what, if anything, the run returns for it.
    pub fn strategy<F>(mut self, strategy: F) -> Self
    where
        F: Fn(&ExtractContext<'_>, &M::Message, &[StoredFile]) -> Result<Option<R>> + 'static,
    {
        self.strategy = Box::new(strategy);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn mailbox(&self) -> &M {
        &self.mailbox
    }

    pub fn records(&self) -> Option<&RecordStore> {
        self.records.as_ref()
    }

    pub fn attachments(&self) -> Option<&AttachmentStore> {
        self.attachments.as_ref()
    }

    pub fn context(&self) -> ExtractContext<'_> {
        ExtractContext {
            config: &self.config,
            offset: self.offset,
            attachments: self.attachments.as_ref(),
            records: self.records.as_ref(),
        }
    }

    /// `after:<today> has:attachment`, today being the local calendar date.
    pub fn default_query(&self) -> Query {
        default_query(local_today(self.offset))
    }

    /// The query a run searches with.
    pub fn query(&self) -> Query {
        self.config
            .query
            .clone()
            .unwrap_or_else(|| self.default_query())
    }

    /// The rendered search string.
    pub fn search_string(&self) -> Result<String> {
        let query = self.query();
        query.validate()?;
        Ok(build_query(&query))
    }

    pub fn attachment_timestamp(
        &self,
        message: &M::Message,
        with_time: bool,
        separator: &str,
    ) -> String {
        self.context()
            .attachment_timestamp(message, with_time, separator)
    }

    /// Run and return the results, or `None` if nothing was extracted.
    pub fn execute(&self) -> Result<Option<Vec<R>>> {
        Ok(self.run()?.into_results())
    }

    /// Run over every matching message.
    ///
    /// Fails only when the search itself fails or a configuration error
    /// surfaces. Per-message collaborator failures land in
    /// [`RunReport::skipped`].
    pub fn run(&self) -> Result<RunReport<R>> {
        let query = self.search_string()?;
        info!(query = %query, "Searching mailbox");
        let threads = self.mailbox.search(&query)?;

        let ctx = self.context();
        let mut report = RunReport::default();

        for thread in &threads {
            if thread.in_spam() || thread.in_trash() {
                debug!(
                    thread_id = %thread.id(),
                    spam = thread.in_spam(),
                    trash = thread.in_trash(),
                    "Skipping thread"
                );
                report.excluded_threads += 1;
                continue;
            }

            let messages = match self.mailbox.messages_for_thread(thread) {
                Ok(messages) => messages,
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => {
                    warn!(thread_id = %thread.id(), error = %e, "Failed to read thread");
                    report.skipped.push(SkippedMessage {
                        thread_id: thread.id(),
                        message_id: None,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for message in &messages {
                report.examined += 1;
                if !(self.filter)(&ctx, message) {
                    debug!(message_id = %message.id(), "Filtered out");
                    continue;
                }
                match self.process(&ctx, message) {
                    Ok(Outcome::Duplicate) => report.duplicates += 1,
                    Ok(Outcome::Extracted(Some(result))) => report.results.push(result),
                    Ok(Outcome::Extracted(None)) => {}
                    Err(e) if e.is_configuration() => return Err(e),
                    Err(e) => {
                        warn!(message_id = %message.id(), error = %e, "Skipping message");
                        report.skipped.push(SkippedMessage {
                            thread_id: thread.id(),
                            message_id: Some(message.id()),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            threads = threads.len(),
            examined = report.examined,
            extracted = report.results.len(),
            duplicates = report.duplicates,
            skipped = report.skipped.len(),
            "Run complete"
        );
        Ok(report)
    }

    /// Store the message's attachments, then hand it to the strategy.
    ///
    /// No dedup check happens here.
    pub fn extract(&self, message: &M::Message) -> Result<Option<R>> {
        self.extract_with(&self.context(), message)
    }

    fn process(&self, ctx: &ExtractContext<'_>, message: &M::Message) -> Result<Outcome<R>> {
        if self.config.skip_recorded {
            if let Some(records) = &self.records {
                if records.message_exists(message)? {
                    debug!(message_id = %message.id(), "Already recorded");
                    return Ok(Outcome::Duplicate);
                }
            }
        }
        self.extract_with(ctx, message).map(Outcome::Extracted)
    }

    fn extract_with(&self, ctx: &ExtractContext<'_>, message: &M::Message) -> Result<Option<R>> {
        let mut files = Vec::new();
        if let Some(store) = &self.attachments {
            let prefix = match self.config.attachment_prefix {
                AttachmentPrefix::Date => Some(ctx.attachment_timestamp(message, false, "")),
                AttachmentPrefix::Time => Some(ctx.attachment_timestamp(message, true, "")),
                AttachmentPrefix::Disabled => None,
            };
            for attachment in message.attachments()? {
                files.push(store.store(&attachment, prefix.as_deref())?);
            }
        }
        (self.strategy)(ctx, message, &files)
    }
}

/// Today's calendar date at `offset`, or in the process timezone.
pub fn local_today(offset: Option<FixedOffset>) -> NaiveDate {
    match offset {
        Some(tz) => Utc::now().with_timezone(&tz).date_naive(),
        None => Local::now().date_naive(),
    }
}

/// `after:<date> has:attachment`.
pub fn default_query(today: NaiveDate) -> Query {
    Query::new()
        .with("after", today.format("%Y-%m-%d").to_string())
        .with("has", "attachment")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::{
        MemoryFolder, MemoryMailbox, MemoryMessage, MemorySheet, MemoryThread,
    };
    use crate::model::Attachment;
    use chrono::TimeZone;

    fn jst() -> PipelineConfig {
        PipelineConfig {
            utc_offset: Some("+09:00".into()),
            ..PipelineConfig::default()
        }
    }

    fn message(id: &str) -> MemoryMessage {
        MemoryMessage::new(id)
            .with_header("Message-ID", format!("<{id}@example.com>"))
            // 2024-12-28 00:00 JST
            .with_date(Utc.with_ymd_and_hms(2024, 12, 27, 15, 0, 0).unwrap())
            .with_attachment(Attachment::new("scan.pdf", "application/pdf", b"%PDF".to_vec()))
    }

    fn ids_strategy(
        _: &ExtractContext<'_>,
        message: &MemoryMessage,
        files: &[StoredFile],
    ) -> Result<Option<(String, usize)>> {
        Ok(Some((message.id(), files.len())))
    }

    #[test]
    fn test_default_query() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 28).unwrap();
        assert_eq!(build_query(&default_query(date)), "after:2024-12-28 has:attachment");
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+09:00").unwrap().local_minus_utc(), 9 * 3600);
        assert_eq!(parse_utc_offset("-05:30").unwrap().local_minus_utc(), -(5 * 3600 + 1800));
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("tokyo").unwrap_err().is_configuration());
    }

    #[test]
    fn test_with_config_rejects_bad_query() {
        let config = PipelineConfig {
            query: Some(Query::new().with("from", "a b")),
            ..PipelineConfig::default()
        };
        let result =
            ExtractionPipeline::<_, ()>::new(MemoryMailbox::new(vec![])).with_config(config);
        assert!(result.is_err());
    }

    #[test]
    fn test_spam_and_trash_are_always_skipped() {
        let mailbox = MemoryMailbox::new(vec![
            MemoryThread::new("t1", vec![message("m1")]).in_spam(),
            MemoryThread::new("t2", vec![message("m2")]).in_trash(),
            MemoryThread::new("t3", vec![message("m3")]),
        ]);
        let pipeline = ExtractionPipeline::new(mailbox).strategy(ids_strategy);

        let report = pipeline.run().unwrap();
        assert_eq!(report.results, vec![("m3".to_string(), 0)]);
        assert_eq!(report.excluded_threads, 2);
        assert_eq!(report.examined, 1);
    }

    #[test]
    fn test_filter_sees_context() {
        let mailbox = MemoryMailbox::new(vec![MemoryThread::new(
            "t1",
            vec![message("m1"), message("m2")],
        )]);
        let pipeline = ExtractionPipeline::new(mailbox)
            .with_config(jst())
            .unwrap()
            .filter(|ctx, m| m.id() == "m2" && ctx.attachment_timestamp(m, false, "") == "20241228")
            .strategy(ids_strategy);

        let results = pipeline.execute().unwrap().unwrap();
        assert_eq!(results, vec![("m2".to_string(), 0)]);
    }

    #[test]
    fn test_execute_returns_none_when_empty() {
        let pipeline = ExtractionPipeline::new(MemoryMailbox::new(vec![])).strategy(ids_strategy);
        assert_eq!(pipeline.execute().unwrap(), None);
    }

    #[test]
    fn test_default_strategy_records_nothing() {
        let mailbox = MemoryMailbox::new(vec![MemoryThread::new("t1", vec![message("m1")])]);
        let pipeline = ExtractionPipeline::<_, ()>::new(mailbox);
        assert_eq!(pipeline.execute().unwrap(), None);
    }

    #[test]
    fn test_search_uses_rendered_query() {
        let mailbox = MemoryMailbox::new(vec![]);
        let config = PipelineConfig {
            query: Some(Query::new().with("q", "invoice").with("has", "attachment")),
            ..PipelineConfig::default()
        };
        let pipeline = ExtractionPipeline::<_, ()>::new(mailbox)
            .with_config(config)
            .unwrap();
        pipeline.run().unwrap();
        assert_eq!(pipeline.mailbox().searches(), vec!["invoice has:attachment"]);
    }

    #[test]
    fn test_attachment_prefixes() {
        for (prefix, expected) in [
            (AttachmentPrefix::Date, "20241228 scan.pdf"),
            (AttachmentPrefix::Time, "20241228000000 scan.pdf"),
            (AttachmentPrefix::Disabled, "scan.pdf"),
        ] {
            let folder = MemoryFolder::new();
            let pipeline = ExtractionPipeline::<_, ()>::new(MemoryMailbox::new(vec![]))
                .with_config(PipelineConfig {
                    attachment_prefix: prefix,
                    ..jst()
                })
                .unwrap()
                .attachment_store(AttachmentStore::new(folder.clone()));

            pipeline.extract(&message("m1")).unwrap();
            assert_eq!(folder.files()[0].name, expected);
        }
    }

    #[test]
    fn test_collaborator_failure_skips_message_only() {
        let folder = MemoryFolder::new();
        let mailbox = MemoryMailbox::new(vec![MemoryThread::new(
            "t1",
            vec![message("bad").unreadable(), message("good")],
        )]);
        let pipeline = ExtractionPipeline::new(mailbox)
            .attachment_store(AttachmentStore::new(folder.clone()))
            .strategy(ids_strategy);

        let report = pipeline.run().unwrap();
        assert_eq!(report.results, vec![("good".to_string(), 1)]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].thread_id, "t1");
        assert_eq!(report.skipped[0].message_id.as_deref(), Some("bad"));
        assert_eq!(folder.len(), 1);
    }

    #[test]
    fn test_unreadable_thread_is_reported_without_message_id() {
        let mailbox = MemoryMailbox::new(vec![
            MemoryThread::new("t1", vec![message("lost")]).unreadable(),
            MemoryThread::new("t2", vec![message("m2")]),
        ]);
        let pipeline = ExtractionPipeline::new(mailbox)
            .strategy(|_, message: &MemoryMessage, _| Ok(Some(message.id())));

        let report = pipeline.run().unwrap();
        assert_eq!(report.results, vec!["m2".to_string()]);
        assert_eq!(report.examined, 1);
        assert_eq!(
            report.skipped,
            vec![SkippedMessage {
                thread_id: "t1".into(),
                message_id: None,
                reason: "Mailbox error: thread t1 is unavailable".into(),
            }]
        );
    }

    #[test]
    fn test_configuration_error_aborts_run() {
        let mailbox = MemoryMailbox::new(vec![MemoryThread::new("t1", vec![message("m1")])]);
        let pipeline = ExtractionPipeline::new(mailbox)
            .strategy(|ctx, _, _| ctx.require_records().map(|_| Some(())));
        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, ExtractError::NotConfigured(_)));
    }

    #[test]
    fn test_recorded_messages_are_skipped_before_storing() {
        let folder = MemoryFolder::new();
        let sheet = MemorySheet::with_rows(&[&["m1"]]);
        let mailbox = MemoryMailbox::new(vec![MemoryThread::new(
            "t1",
            vec![message("m1"), message("m2")],
        )]);
        let pipeline = ExtractionPipeline::new(mailbox)
            .attachment_store(AttachmentStore::new(folder.clone()))
            .record_store(RecordStore::new(sheet))
            .strategy(ids_strategy);

        let report = pipeline.run().unwrap();
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.results, vec![("m2".to_string(), 1)]);
        assert_eq!(folder.len(), 1);
    }

    #[test]
    fn test_skip_recorded_can_be_disabled() {
        let sheet = MemorySheet::with_rows(&[&["m1"]]);
        let mailbox = MemoryMailbox::new(vec![MemoryThread::new("t1", vec![message("m1")])]);
        let pipeline = ExtractionPipeline::new(mailbox)
            .with_config(PipelineConfig {
                skip_recorded: false,
                ..PipelineConfig::default()
            })
            .unwrap()
            .record_store(RecordStore::new(sheet))
            .strategy(ids_strategy);

        assert_eq!(pipeline.run().unwrap().duplicates, 0);
    }

    #[test]
    fn test_config_from_toml() {
        let config: PipelineConfig = toml::from_str(
            r#"
attachment_prefix = "none"
utc_offset = "+09:00"

[query]
q = "invoice"
has = "attachment"
"#,
        )
        .unwrap();
        assert_eq!(config.attachment_prefix, AttachmentPrefix::Disabled);
        assert!(config.skip_recorded);
        assert_eq!(build_query(config.query.as_ref().unwrap()), "invoice has:attachment");
    }
}
