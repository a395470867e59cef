use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "putdel",
    about = "Index objects as they land, then reclaim them from the blob store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Index table name (overrides FILES_TABLE_NAME)
    #[arg(long, global = true)]
    pub table: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Upload one object, index it and reclaim it on in-memory stores
    Flow(FlowArgs),
    /// Print the index keys derived for an object
    DeriveKey(DeriveKeyArgs),
    /// Run a JSON-lines file of notifications through the pipeline
    Ingest(IngestArgs),
}

#[derive(Args)]
pub struct FlowArgs {
    #[arg(long, default_value = "landing")]
    pub bucket: String,
    /// Object key; defaults to a timestamped name
    #[arg(long)]
    pub key: Option<String>,
    #[arg(long, default_value = "hello world")]
    pub body: String,
    /// Deliver the notification this many times
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u16).range(1..))]
    pub deliveries: u16,
}

#[derive(Args)]
pub struct DeriveKeyArgs {
    pub bucket: String,
    pub key: String,
    /// Version-id or ETag of the object
    #[arg(long)]
    pub version: String,
}

#[derive(Args)]
pub struct IngestArgs {
    /// File with one notification per line; `-` reads stdin
    pub file: PathBuf,
    /// Also drain the change feed. The blob store is an empty in-memory demo
    /// store, so every deletion reports the object as already gone.
    #[arg(long)]
    pub reclaim: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_flow_defaults() {
        let cli = Cli::try_parse_from(["putdel", "flow"]).unwrap();
        if let Command::Flow(args) = cli.command {
            assert_eq!(args.bucket, "landing");
            assert_eq!(args.deliveries, 1);
            assert!(args.key.is_none());
        } else {
            panic!("wrong command");
        }
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn parse_flow_with_duplicates() {
        let cli =
            Cli::try_parse_from(["putdel", "flow", "--key", "f1", "--deliveries", "3"]).unwrap();
        if let Command::Flow(args) = cli.command {
            assert_eq!(args.key.as_deref(), Some("f1"));
            assert_eq!(args.deliveries, 3);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn zero_deliveries_rejected() {
        assert!(Cli::try_parse_from(["putdel", "flow", "--deliveries", "0"]).is_err());
    }

    #[test]
    fn parse_derive_key() {
        let cli = Cli::try_parse_from(["putdel", "derive-key", "b", "f1", "--version", "v1"]).unwrap();
        if let Command::DeriveKey(args) = cli.command {
            assert_eq!(args.bucket, "b");
            assert_eq!(args.key, "f1");
            assert_eq!(args.version, "v1");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_ingest_json() {
        let cli = Cli::try_parse_from([
            "putdel", "ingest", "events.jsonl", "--format", "json", "--table", "files",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.table.as_deref(), Some("files"));
        if let Command::Ingest(args) = cli.command {
            assert_eq!(args.file, PathBuf::from("events.jsonl"));
            assert!(!args.reclaim);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_ingest_with_reclaim() {
        let cli = Cli::try_parse_from(["putdel", "ingest", "-", "--reclaim"]).unwrap();
        if let Command::Ingest(args) = cli.command {
            assert_eq!(args.file, PathBuf::from("-"));
            assert!(args.reclaim);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn derive_key_requires_version() {
        assert!(Cli::try_parse_from(["putdel", "derive-key", "b", "f1"]).is_err());
    }

    #[test]
    fn ingest_requires_file() {
        assert!(Cli::try_parse_from(["putdel", "ingest"]).is_err());
    }
}
