use std::time::Duration;

use putdel_types::DispatchRule;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Index table the pipeline writes to. Required.
pub const TABLE_NAME_VAR: &str = "FILES_TABLE_NAME";
/// Bucket the dispatch rule is scoped to. Optional.
pub const BUCKET_NAME_VAR: &str = "FILES_BUCKET_NAME";
/// Per-call bound on store operations, in milliseconds. Optional.
pub const STORE_TIMEOUT_VAR: &str = "PUTDEL_STORE_TIMEOUT_MS";
/// Change records read per feed poll. Optional.
pub const FEED_BATCH_SIZE_VAR: &str = "PUTDEL_FEED_BATCH_SIZE";

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_FEED_BATCH_SIZE: usize = 100;

/// Startup configuration, read once from the process environment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub table_name: String,
    pub bucket: Option<String>,
    pub store_timeout: Duration,
    pub feed_batch_size: usize,
}

impl PipelineConfig {
    /// Configuration with defaults for everything but the table.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            bucket: None,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            feed_batch_size: DEFAULT_FEED_BATCH_SIZE,
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> PipelineResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PipelineResult<Self> {
        let table_name = lookup(TABLE_NAME_VAR)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| PipelineError::Config(format!("{TABLE_NAME_VAR} is not set")))?;

        let mut config = Self::new(table_name);
        config.bucket = lookup(BUCKET_NAME_VAR).filter(|v| !v.trim().is_empty());

        if let Some(raw) = lookup(STORE_TIMEOUT_VAR) {
            let ms: u64 = parse_positive(STORE_TIMEOUT_VAR, &raw)?;
            config.store_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup(FEED_BATCH_SIZE_VAR) {
            config.feed_batch_size = parse_positive(FEED_BATCH_SIZE_VAR, &raw)?;
        }
        Ok(config)
    }

    /// The routing rule in front of the indexer.
    pub fn dispatch_rule(&self) -> DispatchRule {
        DispatchRule::object_created(self.bucket.clone())
    }
}

fn parse_positive<T>(name: &str, raw: &str) -> PipelineResult<T>
where
    T: std::str::FromStr + PartialEq + Default,
{
    match raw.trim().parse::<T>() {
        Ok(v) if v != T::default() => Ok(v),
        _ => Err(PipelineError::Config(format!(
            "{name} must be a positive integer, got {raw:?}"
        ))),
    }
}
