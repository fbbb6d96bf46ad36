//! CLI entry point for `mailextract`.
//!
//! Runs the extraction pipeline against local stand-ins for the hosted
//! services: a directory of `.eml` files, a directory for stored
//! attachments and a CSV sheet of records.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use mailextract::config::Config;
use mailextract::host::csv::CsvSheet;
use mailextract::host::eml::EmlMailbox;
use mailextract::host::folder::DirectoryLocation;
use mailextract::model::{CellValue, Query};
use mailextract::pipeline::{
    default_query, local_today, parse_utc_offset, AttachmentPrefix, ExtractionPipeline, RunReport,
};
use mailextract::store::{AttachmentStore, RecordStore};
use mailextract::strategy::record_message;

#[derive(Parser)]
#[command(
    name = "mailextract",
    version,
    about = "Save mail attachments to a folder and log each message to a sheet"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract attachments and record new messages
    Run {
        /// Directory of .eml files to search
        #[arg(long, value_name = "DIR")]
        mail_dir: PathBuf,
        /// Directory attachments are saved into
        #[arg(long, value_name = "DIR")]
        files_dir: PathBuf,
        /// CSV file holding one row per recorded message
        #[arg(long, value_name = "FILE")]
        sheet: PathBuf,
        #[command(flatten)]
        query: QueryArgs,
        /// Attachment name prefix: date, time or none
        #[arg(long, value_parser = parse_prefix)]
        prefix: Option<AttachmentPrefix>,
        /// Process messages even if they are already recorded
        #[arg(long)]
        no_dedup: bool,
        /// Leave the permalink column out of new rows
        #[arg(long)]
        no_link: bool,
        /// Embed image thumbnails instead of plain links
        #[arg(long)]
        thumbnails: bool,
        #[arg(long)]
        json: bool,
    },
    /// Check whether a message id is already recorded
    Exists {
        /// CSV file holding the records
        #[arg(long, value_name = "FILE")]
        sheet: PathBuf,
        /// Local message id
        id: String,
    },
    /// Print the search string a run would use
    Query {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Write the current configuration to the config file
    Init {
        #[command(flatten)]
        query: QueryArgs,
        /// Replace an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::Args)]
struct QueryArgs {
    /// Search clauses, e.g. "from:scanner@example.com has:attachment"
    #[arg(long, short)]
    query: Option<String>,
    /// Offset for local dates, e.g. +09:00 (default: system timezone)
    #[arg(long, value_name = "OFFSET", allow_hyphen_values = true)]
    utc_offset: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = mailextract::config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Run {
            mail_dir,
            files_dir,
            sheet,
            query,
            prefix,
            no_dedup,
            no_link,
            thumbnails,
            json,
        } => {
            let mut config = apply_query_args(config, &query)?;
            if let Some(prefix) = prefix {
                config.pipeline.attachment_prefix = prefix;
            }
            if no_dedup {
                config.pipeline.skip_recorded = false;
            }
            if no_link {
                config.record.with_id_link = false;
            }
            if thumbnails {
                config.record.with_thumbnails = true;
            }
            cmd_run(&config, &mail_dir, &files_dir, &sheet, json)
        }
        Commands::Exists { sheet, id } => cmd_exists(&sheet, &id),
        Commands::Query { query } => {
            let config = apply_query_args(config, &query)?;
            cmd_query(&config)
        }
        Commands::Init { query, force } => {
            let config = apply_query_args(config, &query)?;
            cmd_init(&config, force)
        }
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_path = mailextract::config::log_file_path(config);
    let log_dir = log_path.parent().unwrap_or(Path::new("."));
    let log_name = log_path.file_name().unwrap_or_default();
    if std::fs::create_dir_all(log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(log_dir, log_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn parse_prefix(s: &str) -> Result<AttachmentPrefix, String> {
    match s.to_ascii_lowercase().as_str() {
        "date" => Ok(AttachmentPrefix::Date),
        "time" => Ok(AttachmentPrefix::Time),
        "none" => Ok(AttachmentPrefix::Disabled),
        other => Err(format!("unknown prefix '{other}' (expected date, time or none)")),
    }
}

/// Command-line query options override the config file.
fn apply_query_args(mut config: Config, args: &QueryArgs) -> anyhow::Result<Config> {
    if let Some(q) = &args.query {
        config.pipeline.query = Some(Query::parse_clauses(q)?);
    }
    if let Some(offset) = &args.utc_offset {
        parse_utc_offset(offset)?;
        config.pipeline.utc_offset = Some(offset.clone());
    }
    Ok(config)
}

/// Run the pipeline over a directory of `.eml` files.
fn cmd_run(
    config: &Config,
    mail_dir: &Path,
    files_dir: &Path,
    sheet: &Path,
    json: bool,
) -> anyhow::Result<()> {
    if !mail_dir.is_dir() {
        anyhow::bail!("Mail directory not found: {}", mail_dir.display());
    }

    let offset = config.pipeline.offset()?;
    let mailbox = EmlMailbox::open(mail_dir)?.with_utc_offset(offset);
    let location = DirectoryLocation::open(files_dir)?;
    let records = CsvSheet::open(sheet)?;

    let pipeline = ExtractionPipeline::new(mailbox)
        .with_config(config.pipeline.clone())?
        .attachment_store(AttachmentStore::new(location))
        .record_store(RecordStore::new(records))
        .strategy(record_message(config.record.clone()));

    let report = pipeline.run()?;

    if json {
        print_report_json(&report)?;
    } else {
        print_report_table(&report);
    }

    Ok(())
}

/// Report whether `id` is present in the sheet.
fn cmd_exists(sheet: &Path, id: &str) -> anyhow::Result<()> {
    if !sheet.exists() {
        anyhow::bail!("Sheet not found: {}", sheet.display());
    }
    let store = RecordStore::new(CsvSheet::open(sheet)?);
    if store.exists(id)? {
        println!("{id}: recorded");
    } else {
        println!("{id}: not recorded");
    }
    Ok(())
}

/// Print the rendered search string.
fn cmd_query(config: &Config) -> anyhow::Result<()> {
    let query = match &config.pipeline.query {
        Some(query) => query.clone(),
        None => default_query(local_today(config.pipeline.offset()?)),
    };
    query.validate()?;
    println!("{query}");
    Ok(())
}

/// Write `config` to the config file, refusing to replace one unless forced.
fn cmd_init(config: &Config, force: bool) -> anyhow::Result<()> {
    config.pipeline.offset()?;
    if let Some(query) = &config.pipeline.query {
        query.validate()?;
    }
    if let Some(path) = mailextract::config::config_file_path() {
        if path.exists() && !force {
            anyhow::bail!("{} already exists (use --force to replace it)", path.display());
        }
    }
    let path = mailextract::config::save_config(config)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Print a run report in a human-readable table.
fn print_report_table(report: &RunReport<Vec<CellValue>>) {
    println!();
    println!(
        "  {} recorded, {} already recorded, {} skipped, {} examined",
        report.results.len(),
        report.duplicates,
        report.skipped.len(),
        report.examined
    );
    println!();

    if !report.results.is_empty() {
        println!("  {:<4} {:<32} {:<60}", "#", "Message", "Row");
        println!("  {}", "-".repeat(98));
        for (i, row) in report.results.iter().enumerate() {
            let id = row.first().map(CellValue::as_text).unwrap_or_default();
            let id_trunc: String = id.chars().take(31).collect();
            let rest = row
                .iter()
                .skip(1)
                .map(|c| c.as_text().replace(['\r', '\n'], " "))
                .collect::<Vec<_>>()
                .join(" | ");
            let rest_trunc: String = rest.chars().take(60).collect();
            println!("  {:<4} {:<32} {:<60}", i + 1, id_trunc, rest_trunc);
        }
        println!();
    }

    for skipped in &report.skipped {
        match &skipped.message_id {
            Some(id) => println!(
                "  skipped {id} (thread {}): {}",
                skipped.thread_id, skipped.reason
            ),
            None => println!("  skipped thread {}: {}", skipped.thread_id, skipped.reason),
        }
    }
    if !report.skipped.is_empty() {
        println!();
    }
}

/// Print a run report as JSON.
fn print_report_json(report: &RunReport<Vec<CellValue>>) -> anyhow::Result<()> {
    let output = serde_json::json!({
        "result_count": report.results.len(),
        "duplicates": report.duplicates,
        "examined": report.examined,
        "excluded_threads": report.excluded_threads,
        "skipped": report.skipped,
        "results": report.results,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
