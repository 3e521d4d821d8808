//! Parsers for interval-style tabular region files.
//!
//! Rows are tab separated, `#` lines are comments, and the first column is a
//! chromosome name. Records are grouped by chromosome on the assumption that
//! files are sorted, so only one chromosome's records are held at a time.
//!
//! # Record kinds
//!
//! - [`RegionRecord`](crate::types::RegionRecord) - `chrom start end`
//! - [`SnpRecord`](crate::types::SnpRecord) - `chrom start end rsid`

mod bed;

pub use bed::{BedRecord, ChromGrouper, SUPPORTED_CHROMOSOMES, parse_line};

use crate::Result;
use async_trait::async_trait;

/// All records of one contiguous run of a chromosome.
#[derive(Debug, Clone, PartialEq)]
pub struct ChromGroup<T> {
    pub chrom: String,
    pub records: Vec<T>,
}

/// Destination for completed chromosome groups.
#[async_trait]
pub trait GroupSink<T: Send>: Send {
    async fn write_group(&mut self, group: ChromGroup<T>) -> Result<()>;
}
