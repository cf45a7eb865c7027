//! folio: command-line tool for EPUB packaging and annotation merging.
//!
//! Logging goes to stderr (or a daily-rotated file) so command output on
//! stdout stays machine-readable.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use folio_core::{parse_remote_annotations, AnnotationRecord};
use folio_epub::{package_epub, read_archive, ChecksumMode, PackageOptions};

#[derive(Parser)]
#[command(name = "folio")]
#[command(author, version, about = "EPUB packaging and annotation tools")]
#[command(propagate_version = true)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Also write logs to this file (rotated daily)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Package an HTML body into an EPUB
    Pack {
        /// Book title
        #[arg(short, long)]
        title: String,

        /// File holding the body markup (embedded verbatim)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (default: input path with an .epub extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// BCP 47 language tag written to the package document
        #[arg(short, long)]
        language: Option<String>,

        /// Compute real CRC-32 checksums instead of the zero placeholder
        #[arg(long)]
        crc32: bool,
    },

    /// List the entries of a stored EPUB archive
    Inspect {
        /// EPUB file to inspect
        file: PathBuf,
    },

    /// Merge a local and a remote annotation set and print the result
    Merge {
        /// Local annotations (JSON array of records)
        local: PathBuf,

        /// Remote annotations (array or wrapped response payload)
        remote: PathBuf,

        /// Document the annotations belong to
        #[arg(short, long)]
        document: String,
    },
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_format, cli.log_file.as_deref());

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing. `RUST_LOG` overrides the default filter.
///
/// The returned guard flushes the file writer on drop.
fn init_logging(
    format: LogFormat,
    log_file: Option<&Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "folio=info,folio_epub=info,folio_sync=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(path) = log_file {
        let dir = path.parent().unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("folio.log");
        let appender = tracing_appender::rolling::daily(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        match format {
            LogFormat::Json => registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
                .init(),
            LogFormat::Text => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init(),
        }
        Some(guard)
    } else {
        match format {
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init(),
            LogFormat::Text => registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init(),
        }
        None
    };

    debug!(format = ?format, log_file = ?log_file, "Logging initialized");
    guard
}

fn run(command: Commands) -> anyhow::Result<()> {
    let output = match command {
        Commands::Pack {
            title,
            input,
            output,
            language,
            crc32,
        } => cmd_pack(&title, &input, output, language, crc32)?,
        Commands::Inspect { file } => cmd_inspect(&file)?,
        Commands::Merge {
            local,
            remote,
            document,
        } => cmd_merge(&local, &remote, &document)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cmd_pack(
    title: &str,
    input: &Path,
    output: Option<PathBuf>,
    language: Option<String>,
    crc32: bool,
) -> anyhow::Result<serde_json::Value> {
    let body = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let mut options = PackageOptions::default();
    if let Some(language) = language {
        options = options.with_language(language);
    }
    if crc32 {
        options = options.with_checksum(ChecksumMode::Crc32);
    }

    let package = package_epub(title, &body, &options)?;
    let output = output.unwrap_or_else(|| input.with_extension("epub"));
    if output == input {
        bail!("Refusing to overwrite the input file {}", input.display());
    }
    std::fs::write(&output, &package.bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(
        subsystem = "cli",
        op = "pack",
        byte_len = package.bytes.len(),
        "EPUB written"
    );

    Ok(serde_json::json!({
        "path": output.to_string_lossy(),
        "media_type": package.media_type,
        "identifier": package.identifier,
        "byte_len": package.bytes.len(),
    }))
}

fn cmd_inspect(file: &Path) -> anyhow::Result<serde_json::Value> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let entries = read_archive(&bytes)?;

    Ok(serde_json::json!({
        "path": file.to_string_lossy(),
        "byte_len": bytes.len(),
        "entries": entries,
    }))
}

fn cmd_merge(local: &Path, remote: &Path, document_id: &str) -> anyhow::Result<serde_json::Value> {
    if document_id.trim().is_empty() {
        bail!("Document id must not be empty");
    }

    let local_json = std::fs::read(local)
        .with_context(|| format!("Failed to read {}", local.display()))?;
    let local_records: Vec<AnnotationRecord> = serde_json::from_slice(&local_json)
        .with_context(|| format!("{} is not a list of annotation records", local.display()))?;
    let local_records: Vec<_> = local_records
        .into_iter()
        .filter(|r| r.document_id == document_id)
        .collect();

    let remote_json = std::fs::read(remote)
        .with_context(|| format!("Failed to read {}", remote.display()))?;
    let remote_payload: serde_json::Value = serde_json::from_slice(&remote_json)
        .with_context(|| format!("{} is not valid JSON", remote.display()))?;
    let remote_records = parse_remote_annotations(&remote_payload, document_id)?;

    let merged = folio_sync::merge(&local_records, &remote_records);
    info!(
        subsystem = "cli",
        op = "merge",
        document_id,
        local = local_records.len(),
        remote = remote_records.len(),
        record_count = merged.len(),
        "Annotations merged"
    );
    Ok(serde_json::to_value(merged)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_pack_args() {
        let cli = Cli::try_parse_from([
            "folio", "pack", "--title", "Notes", "--input", "body.html", "--crc32",
        ])
        .unwrap();
        match cli.command {
            Commands::Pack {
                title,
                input,
                output,
                crc32,
                ..
            } => {
                assert_eq!(title, "Notes");
                assert_eq!(input, PathBuf::from("body.html"));
                assert!(output.is_none());
                assert!(crc32);
            }
            _ => panic!("expected pack"),
        }
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn test_merge_requires_document() {
        assert!(Cli::try_parse_from(["folio", "merge", "a.json", "b.json"]).is_err());
    }

    #[test]
    fn test_pack_then_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("body.html");
        std::fs::write(&input, "<p>Hello</p>").unwrap();

        let packed = cmd_pack("Notes", &input, None, Some("de".into()), true).unwrap();
        let output = dir.path().join("body.epub");
        assert_eq!(packed["path"], output.to_string_lossy().as_ref());
        assert_eq!(packed["media_type"], "application/epub+zip");

        let inspected = cmd_inspect(&output).unwrap();
        let entries = inspected["entries"].as_array().unwrap();
        assert_eq!(entries[0]["name"], "mimetype");
        assert_eq!(entries[0]["compression_method"], 0);
        assert!(entries
            .iter()
            .all(|e| e["crc32"].as_u64().is_some_and(|crc| crc != 0)));
    }

    #[test]
    fn test_pack_refuses_to_overwrite_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("book.epub");
        std::fs::write(&input, "<p>x</p>").unwrap();
        assert!(cmd_pack("T", &input, None, None, false).is_err());
        assert_eq!(std::fs::read_to_string(&input).unwrap(), "<p>x</p>");
    }

    #[test]
    fn test_inspect_rejects_non_archive() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not.epub");
        std::fs::write(&file, b"plain text").unwrap();
        assert!(cmd_inspect(&file).is_err());
    }

    #[test]
    fn test_merge_files() {
        let dir = tempfile::tempdir().unwrap();
        let local = vec![
            AnnotationRecord::new("book", "cfi-a", "local a").with_timestamps(1, 10),
            AnnotationRecord::new("book", "cfi-b", "local b").with_timestamps(1, 10),
        ];
        let local_path = dir.path().join("local.json");
        std::fs::write(&local_path, serde_json::to_vec(&local).unwrap()).unwrap();

        let remote = serde_json::json!({
            "annotations": [
                {"id": "r1", "cfi": "cfi-a", "text": "remote a", "updatedAt": 20},
                {"id": "r2", "cfi": "cfi-c", "text": "remote c", "updatedAt": 5},
            ]
        });
        let remote_path = dir.path().join("remote.json");
        std::fs::write(&remote_path, remote.to_string()).unwrap();

        let merged = cmd_merge(&local_path, &remote_path, "book").unwrap();
        let texts: Vec<_> = merged
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["remote a", "local b", "remote c"]);
    }
}
