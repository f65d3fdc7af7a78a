//! docflow - headless driver for the document generation flow
//!
//! Usage:
//!   docflow detect <file>                                   Detect template variables
//!   docflow run <file> --values <json> [--template-id <id>] Fill, merge and export
//!   docflow reset                                           Clear the stage store

use clap::{Parser, Subcommand};
use docflow::analytics::TracingEventSink;
use docflow::client::DocumentFile;
use docflow::config::Config;
use docflow::progress::FormatPhase;
use docflow::stage_store::{SqliteStorage, StageStore, StageStoreError};
use docflow::stages::{
    DownloadArtifact, DownloadFormat, FillStage, Route, StageEntry, WorkflowError, DOCX_MIME_TYPE,
};
use docflow::template::{VariableValue, VariableValues};
use docflow::Workflow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "docflow", version, about = "Generate documents from Word templates")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a template and list its variables
    Detect { file: PathBuf },
    /// Upload a template, fill it with values and export the result
    Run {
        file: PathBuf,
        /// Stored template to fill; defaults to the id returned by detection
        #[arg(long)]
        template_id: Option<String>,
        /// Variable values as JSON, or @path to a JSON file
        #[arg(long)]
        values: String,
        /// Run the auto-formatting job and download its result
        #[arg(long)]
        format: bool,
        /// Download the converted document instead of the merged original
        #[arg(long, conflicts_with = "format")]
        convert: bool,
        /// Directory the exported document is written to
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Clear every stored stage artifact
    Reset,
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("Stage store error: {0}")]
    Store(#[from] StageStoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid values JSON: {0}")]
    InvalidValues(#[from] serde_json::Error),
    #[error("No template id: pass --template-id or use a detector that registers templates")]
    NoTemplate,
    #[error("Flow redirected to {0}")]
    Redirected(Route),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Formatting did not complete: {0}")]
    FormattingFailed(String),
}

pub async fn run(cli: Cli, config: Config) -> Result<(), CliError> {
    let storage = SqliteStorage::open(&config.store_path, config.store_quota_bytes).await?;
    let store = StageStore::new(Arc::new(storage));
    let workflow =
        Workflow::from_config(&config, store.clone()).with_events(Arc::new(TracingEventSink));

    match cli.command {
        Command::Detect { file } => {
            let summary = workflow.upload_stage().submit(read_document(&file).await?).await?;
            println!(
                "{}: {} simple, {} section variable(s)",
                summary.file_name, summary.simple_count, summary.section_count
            );
            if let Some(template_id) = &summary.template_id {
                println!("template id: {}", template_id);
            }
            Ok(())
        }
        Command::Run {
            file,
            template_id,
            values,
            format,
            convert,
            out,
        } => {
            let values = parse_values(&values).await?;
            let summary = workflow.upload_stage().submit(read_document(&file).await?).await?;
            let template_id = template_id
                .or(summary.template_id)
                .ok_or(CliError::NoTemplate)?;

            let mut fill = ready(workflow.enter_fill(Some(template_id.as_str())))?;
            if let Some(route) = fill.load().await {
                return Err(CliError::Redirected(route));
            }
            apply_values(&mut fill, &values)?;

            let outcome = fill.submit().await?;
            if let Some(warning) = &outcome.warning {
                warn!("{}", warning.user_message());
            }
            outcome.artifact_write.await??;

            let artifact = export(&workflow, &template_id, format, convert).await?;
            let path = out.join(&artifact.filename);
            tokio::fs::write(&path, &artifact.bytes).await?;
            println!("wrote {}", path.display());
            Ok(())
        }
        Command::Reset => {
            store.clear_flow().await?;
            println!("stage store cleared");
            Ok(())
        }
    }
}

async fn export(
    workflow: &Workflow,
    template_id: &str,
    format: bool,
    convert: bool,
) -> Result<DownloadArtifact, CliError> {
    let export = ready(workflow.enter_export(Some(template_id)).await)?;

    if !format {
        let kind = if convert {
            DownloadFormat::Converted
        } else {
            DownloadFormat::Original
        };
        return Ok(export.download(kind).await?);
    }

    let Route::LiveFormat {
        session_id,
        template_id,
    } = export.start_formatting().await?
    else {
        return Err(CliError::FormattingFailed("unexpected hand-off".to_string()));
    };

    let mut live = ready(
        workflow
            .enter_live_format(Some(session_id.as_str()), template_id.as_deref())
            .await,
    )?;
    match live.run_to_completion().await.clone() {
        FormatPhase::Complete => {
            if let Some(url) = live.artifact_url() {
                info!("Rendered preview: {}", url);
            }
            let artifact = live.download_result().await?;
            live.leave();
            Ok(artifact)
        }
        FormatPhase::Failed { message, .. } => Err(CliError::FormattingFailed(message)),
        phase => Err(CliError::FormattingFailed(format!("stopped in {:?}", phase))),
    }
}

fn ready<T>(entry: StageEntry<T>) -> Result<T, CliError> {
    match entry {
        StageEntry::Ready(stage) => Ok(stage),
        StageEntry::Redirect(route) => Err(CliError::Redirected(route)),
    }
}

async fn read_document(path: &Path) -> Result<DocumentFile, CliError> {
    let bytes = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.docx")
        .to_string();
    let content_type = if name.to_ascii_lowercase().ends_with(".docx") {
        DOCX_MIME_TYPE
    } else {
        "application/octet-stream"
    };

    Ok(DocumentFile {
        name,
        content_type: content_type.to_string(),
        bytes,
    })
}

async fn parse_values(raw: &str) -> Result<VariableValues, CliError> {
    let json = match raw.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => raw.to_string(),
    };
    Ok(serde_json::from_str(&json)?)
}

/// Enter values through the same edit operations a form would use
fn apply_values(fill: &mut FillStage, values: &VariableValues) -> Result<(), WorkflowError> {
    for (name, value) in values.iter() {
        if !fill.values().contains(name) {
            warn!("Ignoring value for unknown variable '{}'", name);
            continue;
        }

        match value {
            VariableValue::Simple(text) => fill.set_simple(name, text.as_str())?,
            VariableValue::Section(instances) => {
                for (i, instance) in instances.iter().enumerate() {
                    if i > 0 {
                        fill.add_section_instance(name)?;
                    }
                    fill.set_section_title(name, i, instance.title.as_str())?;
                    for (r, row) in instance.table_rows.iter().enumerate() {
                        if r > 0 {
                            fill.add_table_row(name, i)?;
                        }
                        fill.set_table_row(name, i, r, row.key.as_str(), row.value.as_str())?;
                    }
                }
            }
        }
    }
    Ok(())
}
