//! Remote region file reader.
//!
//! Files are fetched from the metadata repository's download links. Small
//! files are buffered in memory; files whose reported size exceeds the
//! configured threshold are streamed to a temp file in the scratch directory
//! first. Either way the body is gunzipped and parsed line by line, and
//! completed chromosome groups are handed to a [`GroupSink`].

use crate::formats::{BedRecord, ChromGroup, ChromGrouper, GroupSink, parse_line};
use crate::types::File;
use crate::{Error, Result};
use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use reqwest::{Client, StatusCode};
use std::io::{BufRead, BufReader, Cursor, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// Files above this size are spooled to disk.
pub const MAX_IN_MEMORY_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// A downloaded file body.
#[derive(Debug)]
pub enum Readable {
    Memory(Bytes),
    /// Removed from disk on drop.
    Spooled(NamedTempFile),
}

impl Readable {
    /// Decompressed lines of the body.
    fn lines(&self) -> Result<Box<dyn BufRead + Send + '_>> {
        match self {
            Readable::Memory(bytes) => Ok(Box::new(BufReader::new(MultiGzDecoder::new(
                Cursor::new(bytes.as_ref()),
            )))),
            Readable::Spooled(temp) => {
                let mut file = temp.reopen()?;
                file.seek(SeekFrom::Start(0))?;
                Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
            }
        }
    }
}

/// Summary of one parsed file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub records: usize,
    pub groups: usize,
    pub skipped_rows: usize,
}

/// Groups decoded ahead of the sink.
const GROUP_CHANNEL_DEPTH: usize = 2;

/// Read every record of `readable` and write it to `sink` one chromosome group
/// at a time.
///
/// Decompression and parsing run on the blocking pool; groups come back over
/// a bounded channel so at most a couple are held at once. Malformed rows are
/// logged and skipped. An error from the sink or from decompression aborts the
/// read.
pub async fn read_groups<T, S>(readable: Readable, sink: &mut S) -> Result<ReadStats>
where
    T: BedRecord + 'static,
    S: GroupSink<T>,
{
    let (tx, mut rx) = mpsc::channel::<ChromGroup<T>>(GROUP_CHANNEL_DEPTH);
    let parser = tokio::task::spawn_blocking(move || parse_groups(&readable, &tx));

    let mut groups = 0usize;
    let mut written: Result<()> = Ok(());
    while let Some(group) = rx.recv().await {
        groups += 1;
        if let Err(e) = sink.write_group(group).await {
            written = Err(e);
            break;
        }
    }
    // Unblocks the parser if the sink gave up early.
    drop(rx);

    let parsed = parser
        .await
        .map_err(|e| Error::Internal(format!("region file parser failed: {}", e)))?;
    written?;
    let mut stats = parsed?;
    stats.groups = groups;
    Ok(stats)
}

fn parse_groups<T: BedRecord>(
    readable: &Readable,
    tx: &mpsc::Sender<ChromGroup<T>>,
) -> Result<ReadStats> {
    let mut stats = ReadStats::default();
    let mut grouper = ChromGrouper::new();
    let mut lines = readable.lines()?;
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        if lines.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;

        let parsed = std::str::from_utf8(&buf)
            .map_err(|e| Error::MalformedRow(format!("invalid UTF-8: {}", e)))
            .and_then(|line| parse_line::<T>(line));
        let (chrom, record) = match parsed {
            Ok(Some(parsed)) => parsed,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(
                    "skipping row {}: {} ({:?})",
                    line_no,
                    e,
                    String::from_utf8_lossy(&buf).trim_end()
                );
                stats.skipped_rows += 1;
                continue;
            }
        };

        stats.records += 1;
        if let Some(group) = grouper.push(chrom, record) {
            if tx.blocking_send(group).is_err() {
                return Ok(stats);
            }
        }
    }

    if let Some(group) = grouper.finish() {
        // A closed channel means the sink already failed; that error wins.
        let _ = tx.blocking_send(group);
    }
    Ok(stats)
}

/// Fetches file bodies for ingestion.
pub struct RemoteReader {
    client: Client,
    file_host: String,
    max_in_memory: u64,
    scratch_dir: PathBuf,
}

impl RemoteReader {
    /// Create a new RemoteReader.
    ///
    /// # Arguments
    ///
    /// * `file_host` - Base URL prepended to each file's `href`
    /// * `max_in_memory` - Size above which bodies are spooled to disk
    /// * `scratch_dir` - Directory for spooled bodies
    /// * `connect_timeout` - Connection timeout; transfers themselves are unbounded
    pub fn new(
        file_host: &str,
        max_in_memory: u64,
        scratch_dir: PathBuf,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            file_host: file_host.trim_end_matches('/').to_string(),
            max_in_memory,
            scratch_dir,
        })
    }

    pub fn download_url(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!("{}/{}", self.file_host, href.trim_start_matches('/'))
        }
    }

    /// Download `file`, in memory or spooled depending on its reported size.
    pub async fn readable_file(&self, file: &File) -> Result<Readable> {
        let href = file
            .href
            .as_deref()
            .ok_or_else(|| Error::InvalidInput(format!("file {} has no href", file.uuid)))?;
        let url = self.download_url(href);

        let mut response = self.client.get(&url).send().await?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(Error::NotFound(url)),
            s => return Err(Error::Transient(format!("GET {} returned {}", url, s))),
        }

        if file.file_size.unwrap_or(0) > self.max_in_memory {
            let scratch_dir = self.scratch_dir.clone();
            let temp = tokio::task::spawn_blocking(move || NamedTempFile::new_in(scratch_dir))
                .await
                .map_err(|e| Error::Internal(format!("failed to create scratch file: {}", e)))??;
            let mut spool = tokio::fs::File::from_std(temp.reopen()?);
            let mut written = 0u64;
            while let Some(chunk) = response.chunk().await? {
                spool.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            spool.flush().await?;
            tracing::info!("spooled {} ({} bytes) to {:?}", url, written, temp.path());
            Ok(Readable::Spooled(temp))
        } else {
            Ok(Readable::Memory(response.bytes().await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RegionRecord, SnpRecord};
    use async_trait::async_trait;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn gzip(text: &str) -> Vec<u8> {
        gzip_bytes(text.as_bytes())
    }

    fn gzip_bytes(raw: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw).unwrap();
        encoder.finish().unwrap()
    }

    struct Collect<T> {
        groups: Vec<ChromGroup<T>>,
    }

    impl<T> Default for Collect<T> {
        fn default() -> Self {
            Self { groups: Vec::new() }
        }
    }

    #[async_trait]
    impl<T: Send> GroupSink<T> for Collect<T> {
        async fn write_group(&mut self, group: ChromGroup<T>) -> Result<()> {
            self.groups.push(group);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_read_groups_in_memory() {
        let body = gzip("#header\nchr1\t10\t20\nchr1\t30\t40\nchr2\t5\t6\n");
        let readable = Readable::Memory(Bytes::from(body));
        let mut sink = Collect::<RegionRecord>::default();

        let stats = read_groups(readable, &mut sink).await.unwrap();
        assert_eq!(stats.records, 3);
        assert_eq!(stats.groups, 2);
        assert_eq!(sink.groups[0].chrom, "chr1");
        assert_eq!(
            sink.groups[0].records,
            vec![
                RegionRecord { start: 11, end: 20 },
                RegionRecord { start: 31, end: 40 }
            ]
        );
        assert_eq!(sink.groups[1].chrom, "chr2");
    }

    #[tokio::test]
    async fn test_malformed_rows_do_not_abort() {
        let body = gzip("chr1\t10\t20\nchr1\tten\t20\nchr1\t7\nchr1\t30\t40\n");
        let readable = Readable::Memory(Bytes::from(body));
        let mut sink = Collect::<RegionRecord>::default();

        let stats = read_groups(readable, &mut sink).await.unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.skipped_rows, 2);
        assert_eq!(sink.groups.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_row_is_skipped() {
        let body = gzip_bytes(b"chr1\t10\t20\nchr1\t\xff\xfe\t5\nchr2\t30\t40\n");
        let readable = Readable::Memory(Bytes::from(body));
        let mut sink = Collect::<RegionRecord>::default();

        let stats = read_groups(readable, &mut sink).await.unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.skipped_rows, 1);
        assert_eq!(stats.groups, 2);
        assert_eq!(sink.groups[0].records, vec![RegionRecord { start: 11, end: 20 }]);
        assert_eq!(sink.groups[1].records, vec![RegionRecord { start: 31, end: 40 }]);
    }

    #[tokio::test]
    async fn test_sink_error_stops_reading() {
        struct Refuse;

        #[async_trait]
        impl GroupSink<RegionRecord> for Refuse {
            async fn write_group(&mut self, _group: ChromGroup<RegionRecord>) -> Result<()> {
                Err(Error::Transient("store unavailable".to_string()))
            }
        }

        let rows: String = (0..50).map(|i| format!("chr{}\t1\t2\n", i)).collect();
        let readable = Readable::Memory(Bytes::from(gzip(&rows)));
        assert!(matches!(
            read_groups(readable, &mut Refuse).await,
            Err(Error::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_snp_rows_filtered() {
        let body = gzip("chr1\t10\t11\trs1\nchrM\t10\t11\trs2\nchrX\t3\t4\trs3\n");
        let readable = Readable::Memory(Bytes::from(body));
        let mut sink = Collect::<SnpRecord>::default();

        read_groups(readable, &mut sink).await.unwrap();
        let chroms: Vec<&str> = sink.groups.iter().map(|g| g.chrom.as_str()).collect();
        assert_eq!(chroms, vec!["chr1", "chrx"]);
    }

    #[tokio::test]
    async fn test_read_groups_spooled() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp = NamedTempFile::new_in(dir.path()).unwrap();
        temp.write_all(&gzip("chr3\t0\t1\n")).unwrap();
        let readable = Readable::Spooled(temp);
        let mut sink = Collect::<RegionRecord>::default();

        read_groups(readable, &mut sink).await.unwrap();
        assert_eq!(sink.groups[0].records, vec![RegionRecord { start: 1, end: 1 }]);
    }

    #[tokio::test]
    async fn test_not_gzip_is_an_error() {
        let readable = Readable::Memory(Bytes::from_static(b"chr1\t1\t2\n"));
        let mut sink = Collect::<RegionRecord>::default();
        assert!(read_groups(readable, &mut sink).await.is_err());
    }

    #[tokio::test]
    async fn test_large_file_is_spooled() {
        let body = Bytes::from(gzip("chr5\t100\t200\n"));
        let app = axum::Router::new().route(
            "/big.bed.gz",
            axum::routing::get(move || {
                let body = body.clone();
                async move { body }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let scratch = tempfile::tempdir().unwrap();
        let reader = RemoteReader::new(
            &format!("http://{}", addr),
            16,
            scratch.path().to_path_buf(),
            Duration::from_secs(5),
        )
        .unwrap();
        let file = File {
            uuid: "f1".to_string(),
            href: Some("/big.bed.gz".to_string()),
            file_size: Some(1024),
            ..Default::default()
        };

        let readable = reader.readable_file(&file).await.unwrap();
        let spooled_path = match &readable {
            Readable::Spooled(temp) => temp.path().to_path_buf(),
            Readable::Memory(_) => panic!("expected a spooled body"),
        };
        assert!(spooled_path.starts_with(scratch.path()));

        let mut sink = Collect::<RegionRecord>::default();
        read_groups(readable, &mut sink).await.unwrap();
        assert_eq!(sink.groups[0].chrom, "chr5");
        assert_eq!(sink.groups[0].records, vec![RegionRecord { start: 101, end: 200 }]);
        assert!(!spooled_path.exists());
    }

    #[test]
    fn test_download_url() {
        let reader = RemoteReader::new(
            "https://www.encodeproject.org/",
            MAX_IN_MEMORY_FILE_SIZE,
            std::env::temp_dir(),
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(
            reader.download_url("/files/ENCFF002COS/@@download/ENCFF002COS.bed.gz"),
            "https://www.encodeproject.org/files/ENCFF002COS/@@download/ENCFF002COS.bed.gz"
        );
        assert_eq!(
            reader.download_url("https://example.org/a.bed.gz"),
            "https://example.org/a.bed.gz"
        );
    }
}
