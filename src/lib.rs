pub mod config;
pub mod error;
pub mod formats;
pub mod handlers;
pub mod indexer;
pub mod metadata;
pub mod notify;
pub mod policy;
pub mod reader;
pub mod state;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
