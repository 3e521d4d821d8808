use crate::indexer::{IndexerSettings, RESIDENT_INDEX};
use crate::policy::Policy;
use crate::reader::MAX_IN_MEMORY_FILE_SIZE;
use crate::state::StateSettings;
use crate::storage::IndexSettings;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "region-indexer")]
#[command(about = "Incremental genomic region indexer")]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "REGION_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "REGION_PORT", default_value = "8080")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Metadata repository base URL
    #[arg(long, env = "REGION_METADATA_URL", default_value = "http://localhost:6543")]
    pub metadata_url: String,

    /// Host that file `href`s are relative to (defaults to the metadata URL)
    #[arg(long, env = "REGION_FILE_HOST")]
    pub file_host: Option<String>,

    /// Document store holding the region indices
    #[arg(long, env = "REGION_STORE_URL", default_value = "http://localhost:9201")]
    pub store_url: String,

    /// Document store holding indexer state (defaults to the region store)
    #[arg(long, env = "REGION_STATE_URL")]
    pub state_url: Option<String>,

    /// Index holding indexer state next to the primary indexer's
    #[arg(long, env = "REGION_STATE_INDEX", default_value = "snovault")]
    pub state_index: String,

    /// Residency ledger index
    #[arg(long, env = "REGION_RESIDENTS_INDEX", default_value = RESIDENT_INDEX)]
    pub residents_index: String,

    /// Directory for spooling large downloads
    #[arg(long, env = "REGION_SCRATCH_DIR", default_value = "./scratch")]
    pub scratch_dir: PathBuf,

    /// Files larger than this many bytes are spooled to disk
    #[arg(long, env = "REGION_MAX_IN_MEMORY", default_value_t = MAX_IN_MEMORY_FILE_SIZE)]
    pub max_in_memory: u64,

    /// Test deployment: only allow-listed files are indexed
    #[arg(long, env = "REGION_TESTING", default_value = "false")]
    pub testing: bool,

    /// Primary indexer cycle counts above this mean a full reindex is running
    #[arg(long, env = "REGION_PRIMARY_CEILING", default_value = "99999")]
    pub primary_cycle_ceiling: u64,

    /// Staged lists longer than this are narrowed to eligible datasets
    #[arg(long, env = "REGION_STAGED_THRESHOLD", default_value = "500")]
    pub staged_filter_threshold: usize,

    /// Documents per bulk request
    #[arg(long, env = "REGION_BULK_CHUNK", default_value = "1048576")]
    pub bulk_chunk_size: usize,

    /// Store and metadata request timeout in seconds
    #[arg(long, env = "REGION_REQUEST_TIMEOUT", default_value = "300")]
    pub request_timeout: u64,

    /// Connect timeout for file downloads in seconds
    #[arg(long, env = "REGION_CONNECT_TIMEOUT", default_value = "30")]
    pub connect_timeout: u64,
}

impl Config {
    pub fn effective_file_host(&self) -> &str {
        self.file_host.as_deref().unwrap_or(&self.metadata_url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn policy(&self) -> Policy {
        if self.testing {
            Policy::for_testing()
        } else {
            Policy::default()
        }
    }

    pub fn indexer_settings(&self) -> IndexerSettings {
        IndexerSettings {
            residents_index: self.residents_index.clone(),
            index_settings: IndexSettings::default(),
        }
    }

    pub fn state_settings(&self) -> StateSettings {
        StateSettings {
            index: self.state_index.clone(),
            primary_cycle_ceiling: self.primary_cycle_ceiling,
            staged_filter_threshold: self.staged_filter_threshold,
        }
    }
}
