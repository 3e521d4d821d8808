use super::ChromGroup;
use crate::types::{RegionRecord, SnpRecord};
use crate::{Error, Result};

/// Chromosomes SNP rows are kept for (lower-cased).
pub const SUPPORTED_CHROMOSOMES: &[&str] = &[
    "chr1", "chr2", "chr3", "chr4", "chr5", "chr6", "chr7", "chr8", "chr9", "chr10", "chr11",
    "chr12", "chr13", "chr14", "chr15", "chr16", "chr17", "chr18", "chr19", "chr20", "chr21",
    "chr22", "chrx", "chry",
];

/// A record that can be read from the fields of one BED row.
pub trait BedRecord: Sized + Send {
    /// Parse from fields; the chromosome column has already been lower-cased.
    fn from_fields(fields: &[&str]) -> Result<Self>;

    /// Whether records on `chrom` are kept at all.
    fn accepts_chrom(_chrom: &str) -> bool {
        true
    }
}

fn coordinate(fields: &[&str], column: usize) -> Result<u64> {
    let raw = fields
        .get(column)
        .ok_or_else(|| Error::MalformedRow(format!("missing column {}", column + 1)))?;
    raw.trim()
        .parse::<u64>()
        .map_err(|_| Error::MalformedRow(format!("non-numeric coordinate '{}'", raw)))
}

/// BED starts are 0-based; stored positions are 1-based.
fn start_coordinate(fields: &[&str]) -> Result<u64> {
    coordinate(fields, 1)?
        .checked_add(1)
        .ok_or_else(|| Error::MalformedRow(format!("start coordinate '{}' out of range", fields[1])))
}

impl BedRecord for RegionRecord {
    fn from_fields(fields: &[&str]) -> Result<Self> {
        Ok(RegionRecord {
            start: start_coordinate(fields)?,
            end: coordinate(fields, 2)?,
        })
    }
}

impl BedRecord for SnpRecord {
    fn from_fields(fields: &[&str]) -> Result<Self> {
        let start = start_coordinate(fields)?;
        let end = coordinate(fields, 2)?;
        let rsid = fields
            .get(3)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::MalformedRow("missing rsid column".to_string()))?;
        Ok(SnpRecord {
            rsid: rsid.to_string(),
            start,
            end,
        })
    }

    fn accepts_chrom(chrom: &str) -> bool {
        SUPPORTED_CHROMOSOMES.contains(&chrom)
    }
}

/// Parse one line.
///
/// `Ok(None)` for comments, blank lines and rows on rejected chromosomes;
/// `Err(MalformedRow)` for rows that cannot be parsed.
pub fn parse_line<T: BedRecord>(line: &str) -> Result<Option<(String, T)>> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split('\t').collect();
    let chrom = fields[0].trim().to_lowercase();
    if chrom.is_empty() {
        return Err(Error::MalformedRow("empty chromosome".to_string()));
    }
    let record = T::from_fields(&fields)?;
    if !T::accepts_chrom(&chrom) {
        return Ok(None);
    }
    Ok(Some((chrom, record)))
}

/// Accumulates records for the current chromosome and hands back the finished
/// group whenever the chromosome changes.
///
/// A chromosome that reappears after another one starts a new group; callers
/// that need one document per chromosome must merge on write.
#[derive(Debug)]
pub struct ChromGrouper<T> {
    current: Option<ChromGroup<T>>,
}

impl<T> Default for ChromGrouper<T> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<T> ChromGrouper<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chrom: String, record: T) -> Option<ChromGroup<T>> {
        match &mut self.current {
            Some(group) if group.chrom == chrom => {
                group.records.push(record);
                None
            }
            _ => self.current.replace(ChromGroup {
                chrom,
                records: vec![record],
            }),
        }
    }

    pub fn finish(self) -> Option<ChromGroup<T>> {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_coordinates_shift_start() {
        let (chrom, record) = parse_line::<RegionRecord>("chr1\t100\t200").unwrap().unwrap();
        assert_eq!(chrom, "chr1");
        assert_eq!(record, RegionRecord { start: 101, end: 200 });
    }

    #[test]
    fn test_chromosome_lower_cased() {
        let (chrom, _) = parse_line::<RegionRecord>("ChrX\t1\t2\tpeak1\t0\t.")
            .unwrap()
            .unwrap();
        assert_eq!(chrom, "chrx");
    }

    #[test]
    fn test_comment_and_blank_lines_skipped() {
        assert!(parse_line::<RegionRecord>("# track name=peaks").unwrap().is_none());
        assert!(parse_line::<RegionRecord>("").unwrap().is_none());
        assert!(parse_line::<RegionRecord>("\r\n").unwrap().is_none());
    }

    #[test]
    fn test_malformed_rows() {
        assert!(matches!(
            parse_line::<RegionRecord>("chr1\tabc\t200"),
            Err(Error::MalformedRow(_))
        ));
        assert!(matches!(
            parse_line::<RegionRecord>("chr1\t100"),
            Err(Error::MalformedRow(_))
        ));
        assert!(matches!(
            parse_line::<SnpRecord>("chr1\t100\t101"),
            Err(Error::MalformedRow(_))
        ));
    }

    #[test]
    fn test_start_at_coordinate_limit_is_malformed() {
        assert!(matches!(
            parse_line::<RegionRecord>("chr1\t18446744073709551615\t20"),
            Err(Error::MalformedRow(_))
        ));
        assert!(matches!(
            parse_line::<SnpRecord>("chr1\t18446744073709551615\t20\trs1"),
            Err(Error::MalformedRow(_))
        ));

        let (_, region) = parse_line::<RegionRecord>("chr1\t18446744073709551614\t20")
            .unwrap()
            .unwrap();
        assert_eq!(region.start, u64::MAX);
    }

    #[test]
    fn test_snp_row() {
        let (chrom, snp) = parse_line::<SnpRecord>("chr2\t10\t11\trs123")
            .unwrap()
            .unwrap();
        assert_eq!(chrom, "chr2");
        assert_eq!(
            snp,
            SnpRecord {
                rsid: "rs123".to_string(),
                start: 11,
                end: 11
            }
        );
    }

    #[test]
    fn test_snp_chromosome_filter() {
        assert!(parse_line::<SnpRecord>("chrM\t10\t11\trs1").unwrap().is_none());
        assert!(parse_line::<SnpRecord>("chr1_gl000191_random\t10\t11\trs1")
            .unwrap()
            .is_none());
        assert!(parse_line::<SnpRecord>("chr1\t10\t11\trs1").unwrap().is_some());
        // Regions keep every chromosome.
        assert!(parse_line::<RegionRecord>("chrM\t10\t11").unwrap().is_some());
    }

    #[test]
    fn test_grouper_flushes_on_chromosome_change() {
        let mut grouper = ChromGrouper::new();
        assert!(grouper.push("chr1".to_string(), 1).is_none());
        assert!(grouper.push("chr1".to_string(), 2).is_none());

        let done = grouper.push("chr2".to_string(), 3).unwrap();
        assert_eq!(done.chrom, "chr1");
        assert_eq!(done.records, vec![1, 2]);

        let done = grouper.push("chr1".to_string(), 4).unwrap();
        assert_eq!(done.chrom, "chr2");

        let last = grouper.finish().unwrap();
        assert_eq!(last.chrom, "chr1");
        assert_eq!(last.records, vec![4]);
    }

    #[test]
    fn test_grouper_empty() {
        let grouper: ChromGrouper<u32> = ChromGrouper::new();
        assert!(grouper.finish().is_none());
    }
}
