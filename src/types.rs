use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a file is indexed. A file may satisfy more than one policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UsePolicy {
    #[serde(rename = "region_search")]
    RegionSearch,
    #[serde(rename = "RegulomeDB")]
    Regulome,
    /// Bookkeeping only: residency document type for files with several uses.
    #[serde(rename = "multiple")]
    Multiple,
}

impl UsePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsePolicy::RegionSearch => "region_search",
            UsePolicy::Regulome => "RegulomeDB",
            UsePolicy::Multiple => "multiple",
        }
    }
}

impl fmt::Display for UsePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file entry on a dataset: embedded object or an unresolved `@id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileRef {
    Embedded(Box<File>),
    Reference(String),
}

/// A file's owning dataset: embedded object or an unresolved `@id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatasetRef {
    Embedded(Box<Dataset>),
    Reference(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub label: Option<String>,
}

/// Dataset as served by the metadata repository (experiment, annotation,
/// reference or file set).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub uuid: String,
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(default)]
    pub accession: Option<String>,
    #[serde(rename = "@type", default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub assay_term_name: Option<String>,
    #[serde(default)]
    pub annotation_type: Option<String>,
    #[serde(default)]
    pub reference_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub internal_tags: Vec<String>,
    #[serde(default)]
    pub target: Option<Target>,
    #[serde(default)]
    pub files: Vec<FileRef>,
}

impl Dataset {
    pub fn has_type(&self, name: &str) -> bool {
        self.types.iter().any(|t| t == name)
    }

    /// First populated of assay, annotation or reference classification.
    pub fn collection_type(&self) -> Option<&str> {
        self.assay_term_name
            .as_deref()
            .or(self.annotation_type.as_deref())
            .or(self.reference_type.as_deref())
    }

    pub fn target_label(&self) -> Option<&str> {
        self.target.as_ref().and_then(|t| t.label.as_deref())
    }

    /// Accession when present, otherwise uuid. Used in log lines.
    pub fn display_name(&self) -> &str {
        self.accession.as_deref().unwrap_or(&self.uuid)
    }
}

/// File fields that eligibility rules can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileField {
    FileFormat,
    FileType,
    OutputType,
}

impl FileField {
    pub fn name(&self) -> &'static str {
        match self {
            FileField::FileFormat => "file_format",
            FileField::FileType => "file_type",
            FileField::OutputType => "output_type",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct File {
    pub uuid: String,
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(default)]
    pub accession: Option<String>,
    #[serde(default)]
    pub file_format: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub output_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub assembly: Option<String>,
    #[serde(default)]
    pub submitted_file_name: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub dataset: Option<DatasetRef>,
}

impl File {
    pub fn field(&self, field: FileField) -> Option<&str> {
        match field {
            FileField::FileFormat => self.file_format.as_deref(),
            FileField::FileType => self.file_type.as_deref(),
            FileField::OutputType => self.output_type.as_deref(),
        }
    }

    /// Assembly with `mm10-minimal` folded into `mm10`.
    pub fn normalized_assembly(&self) -> Option<&str> {
        match self.assembly.as_deref() {
            Some("mm10-minimal") => Some("mm10"),
            other => other,
        }
    }

    pub fn display_name(&self) -> &str {
        self.accession.as_deref().unwrap_or(&self.uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub uuid: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub assembly: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub uuid: String,
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_type: Option<String>,
}

/// Ledger entry: this file's data is currently indexed, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidencyRecord {
    pub uuid: String,
    pub uses: Vec<UsePolicy>,
    pub file: FileSummary,
    pub dataset: DatasetSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snps: Option<bool>,
    /// Dedicated index holding this file's data (SNP files).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chroms: Option<Vec<String>>,
}

impl ResidencyRecord {
    pub fn is_snps(&self) -> bool {
        self.snps.unwrap_or(false)
    }

    pub fn assembly(&self) -> &str {
        &self.file.assembly
    }

    /// Document type the record is filed under in the residency index.
    pub fn use_type(&self) -> UsePolicy {
        match self.uses.as_slice() {
            [single] => *single,
            _ => UsePolicy::Multiple,
        }
    }
}

/// Genomic interval, 1-based inclusive start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionRecord {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnpRecord {
    pub rsid: String,
    pub start: u64,
    pub end: u64,
}

/// Per-chromosome region document, keyed by file uuid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDocument {
    pub uuid: String,
    pub positions: Vec<RegionRecord>,
}

/// Error recorded against a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub error: String,
}

impl CycleError {
    pub fn new(uuid: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            uuid: Some(uuid.into()),
            error: error.to_string(),
        }
    }
}
