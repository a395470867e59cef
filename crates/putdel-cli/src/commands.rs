use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use colored::Colorize;
use putdel_core::config::TABLE_NAME_VAR;
use putdel_core::{
    IngestSummary, Pipeline, PipelineConfig, ReclaimSummary, Reconciler, SweepReport,
};
use putdel_store::{BlobStore, InMemoryBlobStore, InMemoryIndexStore};
use putdel_types::{IndexKey, ObjectCreatedEvent, ObjectReference};
use serde_json::json;

use crate::cli::*;

const DEMO_TABLE: &str = "files";

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Flow(args) => cmd_flow(args, cli.table, cli.format).await,
        Command::DeriveKey(args) => cmd_derive_key(args, cli.format),
        Command::Ingest(args) => cmd_ingest(args, cli.table, cli.format).await,
    }
}

/// Environment configuration with `--table` taking precedence.
fn load_config(table: Option<String>, fallback: Option<&str>) -> anyhow::Result<PipelineConfig> {
    let config = PipelineConfig::from_lookup(|name| {
        let from_env = std::env::var(name).ok();
        if name == TABLE_NAME_VAR {
            table
                .clone()
                .or(from_env)
                .or_else(|| fallback.map(str::to_string))
        } else {
            from_env
        }
    })?;
    Ok(config)
}

fn in_memory(config: &PipelineConfig) -> (Arc<InMemoryBlobStore>, Arc<InMemoryIndexStore>) {
    (
        Arc::new(InMemoryBlobStore::new()),
        Arc::new(InMemoryIndexStore::new(config.table_name.clone())),
    )
}

async fn cmd_flow(args: FlowArgs, table: Option<String>, format: OutputFormat) -> anyhow::Result<()> {
    let mut config = load_config(table, Some(DEMO_TABLE))?;
    config.bucket = Some(args.bucket.clone());
    let (blobs, index) = in_memory(&config);
    let mut pipeline = Pipeline::new(blobs.clone(), index.clone(), &config);

    let key = args.key.unwrap_or_else(|| {
        format!("{}.txt", Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
    });
    let body = Bytes::from(args.body.into_bytes());
    let size = body.len() as u64;
    let reference = blobs
        .put_object(&args.bucket, &key, body)
        .await
        .context("upload failed")?;

    let event = ObjectCreatedEvent::synthetic(&reference, size);
    let payload = Bytes::from(serde_json::to_vec(&event)?);
    let deliveries = vec![payload; usize::from(args.deliveries)];
    let results = pipeline.ingest(deliveries).await;
    let ingest = IngestSummary::from_results(&results);
    let reclaim = pipeline.reclaim().await?;

    let reconciler = Reconciler::new(blobs.clone(), index.clone(), &config);
    let sweep = reconciler.sweep(&args.bucket).await?;
    let state = pipeline.journal().state(&reference);

    match format {
        OutputFormat::Json => {
            let out = json!({
                "reference": reference,
                "ingest": ingest,
                "reclaim": reclaim,
                "sweep": sweep,
                "state": state,
                "rows": index.len(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("Uploaded {} ({} bytes)", reference.to_string().bold(), size);
            print_ingest(&ingest);
            print_reclaim(&reclaim);
            print_sweep(&sweep);
            println!("Index rows: {}", index.len());
            println!("Final state: {}", state.to_string().cyan());
        }
    }
    Ok(())
}

fn cmd_derive_key(args: DeriveKeyArgs, format: OutputFormat) -> anyhow::Result<()> {
    let reference = ObjectReference::new(args.bucket, args.key, args.version);
    reference.validate()?;
    let object = IndexKey::for_object(&reference);
    let tombstone = IndexKey::for_tombstone(&reference);
    match format {
        OutputFormat::Json => {
            let out = json!({ "object": object, "tombstone": tombstone });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("PK             {}", object.pk.yellow());
            println!("SK (object)    {}", object.sk.yellow());
            println!("SK (tombstone) {}", tombstone.sk.yellow());
        }
    }
    Ok(())
}

async fn cmd_ingest(args: IngestArgs, table: Option<String>, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(table, None)?;
    let text = read_input(&args)?;
    let lines: Vec<(usize, Bytes)> = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| (n + 1, Bytes::copy_from_slice(line.as_bytes())))
        .collect();

    let (blobs, index) = in_memory(&config);
    let mut pipeline = Pipeline::new(blobs, index, &config);
    let payloads = lines.iter().map(|(_, payload)| payload.clone()).collect();
    let results = pipeline.ingest(payloads).await;
    let ingest = IngestSummary::from_results(&results);
    let reclaim = if args.reclaim {
        Some(pipeline.reclaim().await?)
    } else {
        None
    };

    let failed: Vec<(usize, String)> = lines
        .iter()
        .zip(&results)
        .filter_map(|((line, _), result)| result.as_ref().err().map(|e| (*line, e.to_string())))
        .collect();

    match format {
        OutputFormat::Json => {
            let errors: Vec<_> = failed
                .iter()
                .map(|(line, error)| json!({ "line": line, "error": error }))
                .collect();
            let out = json!({ "ingest": ingest, "reclaim": reclaim, "errors": errors });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            for (line, error) in &failed {
                println!("  {} line {}: {}", "✗".red(), line, error);
            }
            print_ingest(&ingest);
            if let Some(reclaim) = &reclaim {
                println!("{}", "Reclaim ran against an empty in-memory blob store".dimmed());
                print_reclaim(reclaim);
            }
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("{} of {} notifications failed", failed.len(), lines.len());
    }
    Ok(())
}

fn read_input(args: &IngestArgs) -> anyhow::Result<String> {
    if args.file.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("reading stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(&args.file)
            .with_context(|| format!("reading {}", args.file.display()))
    }
}

fn print_ingest(summary: &IngestSummary) {
    println!(
        "{} Indexed {}, already indexed {}, already reclaimed {}, ignored {}",
        "✓".green().bold(),
        summary.indexed.to_string().bold(),
        summary.already_indexed,
        summary.already_reclaimed,
        summary.ignored
    );
    if summary.failures() > 0 {
        println!(
            "  {} {} transient, {} permanent failures",
            "!".yellow().bold(),
            summary.transient_failures,
            summary.permanent_failures
        );
    }
}

fn print_reclaim(summary: &ReclaimSummary) {
    println!(
        "{} Reclaimed {} of {} signals (already gone {}, superseded {}) at checkpoint {}",
        "✓".green().bold(),
        summary.deleted.to_string().bold(),
        summary.signals,
        summary.already_gone,
        summary.superseded,
        summary.checkpoint
    );
    if summary.failures > 0 {
        println!("  {} {} deletions failed", "!".yellow().bold(), summary.failures);
    }
}

fn print_sweep(report: &SweepReport) {
    if report.is_consistent() {
        println!("{} Sweep of {}: consistent", "✓".green().bold(), report.bucket.bold());
        return;
    }
    println!("{} Sweep of {}:", "!".yellow().bold(), report.bucket.bold());
    for finding in report.pending() {
        println!("  {finding}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_flag_wins() {
        let config = load_config(Some("override".into()), Some(DEMO_TABLE)).unwrap();
        assert_eq!(config.table_name, "override");
    }

    #[tokio::test]
    async fn flow_reclaims_uploaded_object() {
        let args = FlowArgs {
            bucket: "landing".into(),
            key: Some("f1".into()),
            body: "hello world".into(),
            deliveries: 3,
        };
        cmd_flow(args, Some(DEMO_TABLE.into()), OutputFormat::Json)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ingest_skips_reclaim_by_default() {
        let path = std::env::temp_dir().join(format!("putdel-ingest-{}.jsonl", std::process::id()));
        let event = ObjectCreatedEvent::synthetic(&ObjectReference::new("b", "f1", "e1"), 1);
        std::fs::write(&path, serde_json::to_string(&event).unwrap()).unwrap();

        let args = IngestArgs {
            file: path.clone(),
            reclaim: false,
        };
        let result = cmd_ingest(args, Some(DEMO_TABLE.into()), OutputFormat::Json).await;
        std::fs::remove_file(&path).unwrap();
        result.unwrap();
    }

    #[test]
    fn derive_key_rejects_empty_key() {
        let args = DeriveKeyArgs {
            bucket: "b".into(),
            key: String::new(),
            version: String::new(),
        };
        assert!(cmd_derive_key(args, OutputFormat::Text).is_err());
    }
}
