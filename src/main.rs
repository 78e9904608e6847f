//! docflow - upload documents for analysis and confirm them.
//!
//! Runs the whole flow for the files given on the command line: submit one
//! batch, follow it until analysis finishes, accept the server's category and
//! filename suggestions, and confirm every file that is complete.
//!
//! ```text
//! docflow [--config docflow.yaml] FILE...
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use docflow::{ClientConfig, ConfirmOutcome, DocflowClient, Submission, UploadFile};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "docflow", version, about = "Upload documents for analysis and confirm them")]
struct Args {
    /// Configuration file; defaults and DOCFLOW__* variables apply otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Files to upload as one batch
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::load()?,
    };
    init_tracing(&config);

    let client = DocflowClient::new(config)?;

    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        files.push(
            UploadFile::from_path(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?,
        );
    }

    let ticket = match client.submit_batch(&files).await? {
        Submission::Accepted(ticket) => ticket,
        Submission::Duplicate(existing) => {
            match existing.uploaded_at_utc() {
                Some(at) => println!(
                    "already uploaded: \"{}\" on {}",
                    existing.title,
                    at.format("%Y-%m-%d %H:%M UTC")
                ),
                None => println!("already uploaded: \"{}\"", existing.title),
            }
            return Ok(());
        }
    };
    println!("batch {} submitted ({} files)", ticket.batch_id, files.len());

    let results = client
        .poll_ticket(&ticket, |job| {
            tracing::info!(
                batch_id = %job.id,
                status = %job.status,
                processed = job.processed,
                total = job.total,
                current = job.current_file_name.as_deref().unwrap_or("-"),
                queue_position = ?job.queue_position,
                "progress"
            );
        })
        .await?;

    let (mut reconciler, summary) = client.reconcile(results, &[]);
    for failure in &summary.failures {
        println!("analysis failed: {} ({})", failure.file_name, failure.reason);
    }

    let incomplete: Vec<String> = reconciler
        .files()
        .iter()
        .filter(|file| !file.is_ready())
        .map(|file| file.temp_id().to_string())
        .collect();
    for temp_id in &incomplete {
        if let Some(file) = reconciler.discard_file(temp_id) {
            let reason = file.filename_error().unwrap_or("no category suggested");
            println!("skipped: {} ({reason})", file.original_filename());
        }
    }

    if reconciler.is_empty() {
        bail!("no file is ready to confirm");
    }

    let report = reconciler.confirm_all().await?;
    for confirmed in &report.confirmed {
        println!("confirmed: {}", confirmed.file_name);
    }
    for failed in &report.failed {
        println!("confirmation failed: {} ({})", failed.file_name, failed.error);
    }

    match report.outcome() {
        ConfirmOutcome::AllSucceeded | ConfirmOutcome::Partial => Ok(()),
        ConfirmOutcome::AllFailed => bail!("every confirmation failed"),
    }
}

fn init_tracing(config: &ClientConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_flag_and_files() {
        let args =
            Args::try_parse_from(["docflow", "-c", "docflow.yaml", "a.pdf", "b.pdf"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("docflow.yaml")));
        assert_eq!(args.files, vec![PathBuf::from("a.pdf"), PathBuf::from("b.pdf")]);
    }

    #[test]
    fn unknown_flags_are_rejected() {
        let err = Args::try_parse_from(["docflow", "--verbose", "a.pdf"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn at_least_one_file_is_required() {
        let err = Args::try_parse_from(["docflow", "--config", "docflow.yaml"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn version_flag_is_available() {
        let err = Args::try_parse_from(["docflow", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
