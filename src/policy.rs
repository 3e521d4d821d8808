//! File and dataset eligibility rules.
//!
//! Everything here is pure: the engine resolves datasets and files through the
//! metadata repository and then asks this module what, if anything, to index.

use crate::types::{
    Dataset, DatasetSummary, File, FileField, FileSummary, ResidencyRecord, UsePolicy,
};
use std::collections::{BTreeMap, BTreeSet};

/// Formats the reader can parse.
pub const ALLOWED_FILE_FORMATS: &[&str] = &["bed"];

/// Dataset tag that opts a dataset into the regulome policy.
pub const REGULOME_TAG: &str = "RegulomeDB";

/// Dataset `@type`s recorded as `dataset_type`, highest priority first.
pub const DATASET_TYPES: &[&str] = &["Experiment", "Annotation", "Reference"];

/// Submitted file names of the known SNP reference files.
pub const SNP_FILES: &[&str] = &[
    "s3://regulomedb/snp141/snp141_hg19.bed.gz",
    "s3://regulomedb/snp141/snp141_GRCh38.bed.gz",
];

/// Only files that can be downloaded in test deployments.
pub const TESTABLE_FILES: &[&str] = &["ENCFF002COS"];

/// Uses a dataset or file qualifies for.
pub type UseSet = BTreeSet<UsePolicy>;

/// Required file properties: every field must be present and its value must be
/// one of the allowed values.
#[derive(Debug, Clone, Default)]
pub struct Requirement {
    fields: BTreeMap<FileField, Vec<String>>,
}

impl Requirement {
    pub fn require(mut self, field: FileField, allowed: &[&str]) -> Self {
        self.fields
            .insert(field, allowed.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn is_met_by(&self, file: &File) -> bool {
        self.fields.iter().all(|(field, allowed)| {
            file.field(*field)
                .is_some_and(|value| allowed.iter().any(|a| a == value))
        })
    }
}

/// Statuses, assemblies and per-classification requirements for one policy.
#[derive(Debug, Clone)]
pub struct PolicyRules {
    pub statuses: Vec<String>,
    pub assemblies: Vec<String>,
    /// Keyed by assay (region search) or collection type (regulome).
    pub requirements: BTreeMap<String, Requirement>,
}

impl PolicyRules {
    fn new(
        statuses: &[&str],
        assemblies: &[&str],
        requirements: Vec<(&str, Requirement)>,
    ) -> Self {
        Self {
            statuses: statuses.iter().map(|s| s.to_string()).collect(),
            assemblies: assemblies.iter().map(|s| s.to_string()).collect(),
            requirements: requirements
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    pub fn supports(&self, classification: &str) -> bool {
        self.requirements.contains_key(classification)
    }

    fn admits(&self, file: &File, status: &str, assembly: &str, classification: &str) -> bool {
        if !self.statuses.iter().any(|s| s == status) {
            return false;
        }
        if !self.assemblies.iter().any(|a| a == assembly) {
            return false;
        }
        match self.requirements.get(classification) {
            Some(requirement) if !requirement.is_empty() => requirement.is_met_by(file),
            _ => false,
        }
    }
}

/// The complete candidate selection configuration.
#[derive(Debug, Clone)]
pub struct Policy {
    pub region_search: PolicyRules,
    pub regulome: PolicyRules,
    /// Restricts candidates to [`TESTABLE_FILES`].
    pub test_instance: bool,
}

impl Default for Policy {
    fn default() -> Self {
        let any_bed = || Requirement::default().require(FileField::FileFormat, &["bed"]);
        let peaks = || any_bed().require(FileField::OutputType, &["optimal idr thresholded peaks"]);
        let narrow_peaks = || any_bed().require(FileField::FileType, &["bed narrowPeak"]);

        Self {
            region_search: PolicyRules::new(
                &["released"],
                &["hg19", "mm10", "mm9", "GRCh38"],
                vec![
                    ("ChIP-seq", peaks()),
                    ("DNase-seq", narrow_peaks()),
                    ("eCLIP", narrow_peaks()),
                ],
            ),
            regulome: PolicyRules::new(
                &["released", "archived", "in progress"],
                &["hg19", "GRCh38"],
                vec![
                    ("ChIP-seq", peaks()),
                    ("DNase-seq", narrow_peaks()),
                    ("FAIRE-seq", narrow_peaks()),
                    ("chromatin state", any_bed()),
                    ("eQTLs", any_bed()),
                    ("dsQTLs", any_bed()),
                    (
                        "index",
                        any_bed().require(FileField::OutputType, &["variant calls"]),
                    ),
                ],
            ),
            test_instance: false,
        }
    }
}

pub fn is_allowed_format(file: &File) -> bool {
    file.file_format
        .as_deref()
        .is_some_and(|f| ALLOWED_FILE_FORMATS.contains(&f))
}

impl Policy {
    pub fn for_testing() -> Self {
        Self {
            test_instance: true,
            ..Self::default()
        }
    }

    /// Uses a dataset is eligible for.
    ///
    /// `None` when the dataset is not an experiment or file set, or has no
    /// files. An empty set means the dataset is known but nothing applies.
    pub fn candidate_dataset(&self, dataset: &Dataset) -> Option<UseSet> {
        if !dataset.has_type("Experiment") && !dataset.has_type("FileSet") {
            return None;
        }
        if dataset.files.is_empty() {
            return None;
        }

        let mut uses = UseSet::new();
        if dataset
            .assay_term_name
            .as_deref()
            .is_some_and(|assay| self.region_search.supports(assay))
        {
            uses.insert(UsePolicy::RegionSearch);
        }
        if dataset.internal_tags.iter().any(|t| t == REGULOME_TAG)
            && dataset
                .collection_type()
                .is_some_and(|ct| self.regulome.supports(ct))
        {
            uses.insert(UsePolicy::Regulome);
        }
        Some(uses)
    }

    /// Residency document for `file` if it qualifies for any of `dataset_uses`.
    ///
    /// `dataset` must be the file's owning dataset, which for files reached
    /// through a file set differs from the dataset that listed the file.
    pub fn candidate_file(
        &self,
        file: &File,
        dataset: &Dataset,
        dataset_uses: &UseSet,
    ) -> Option<ResidencyRecord> {
        file.href.as_ref()?;
        if !is_allowed_format(file) {
            return None;
        }
        if self.test_instance
            && !file
                .accession
                .as_deref()
                .is_some_and(|a| TESTABLE_FILES.contains(&a))
        {
            return None;
        }

        let status = file.status.as_deref().unwrap_or("imagined");
        let assembly = file.normalized_assembly().unwrap_or("unknown");

        let mut uses = Vec::new();
        if dataset_uses.contains(&UsePolicy::RegionSearch) {
            if let Some(assay) = dataset.assay_term_name.as_deref() {
                if self.region_search.admits(file, status, assembly, assay) {
                    uses.push(UsePolicy::RegionSearch);
                }
            }
        }
        if dataset_uses.contains(&UsePolicy::Regulome) {
            if let Some(collection_type) = dataset.collection_type() {
                if self.regulome.admits(file, status, assembly, collection_type) {
                    uses.push(UsePolicy::Regulome);
                }
            }
        }
        if uses.is_empty() {
            return None;
        }

        Some(metadata_doc(file, dataset, assembly, uses))
    }
}

fn metadata_doc(
    file: &File,
    dataset: &Dataset,
    assembly: &str,
    uses: Vec<UsePolicy>,
) -> ResidencyRecord {
    let dataset_type = DATASET_TYPES
        .iter()
        .find(|t| dataset.has_type(t))
        .map(|t| t.to_string());
    let snps = file
        .submitted_file_name
        .as_deref()
        .is_some_and(|name| SNP_FILES.contains(&name));

    ResidencyRecord {
        uuid: file.uuid.clone(),
        uses,
        file: FileSummary {
            uuid: file.uuid.clone(),
            reference: file.id.clone(),
            assembly: assembly.to_string(),
        },
        dataset: DatasetSummary {
            uuid: dataset.uuid.clone(),
            reference: dataset.id.clone(),
            collection_type: dataset.collection_type().map(str::to_string),
            target: dataset.target_label().map(str::to_string),
            dataset_type,
        },
        snps: snps.then_some(true),
        index: None,
        chroms: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileRef, Target};

    fn chip_experiment() -> Dataset {
        Dataset {
            uuid: "d1".to_string(),
            id: "/experiments/ENCSR000AAA/".to_string(),
            types: vec!["Experiment".to_string(), "Dataset".to_string()],
            assay_term_name: Some("ChIP-seq".to_string()),
            target: Some(Target {
                label: Some("CTCF".to_string()),
            }),
            files: vec![FileRef::Reference("/files/ENCFF000AAA/".to_string())],
            ..Default::default()
        }
    }

    fn peaks_file() -> File {
        File {
            uuid: "f1".to_string(),
            id: "/files/ENCFF000AAA/".to_string(),
            accession: Some("ENCFF000AAA".to_string()),
            file_format: Some("bed".to_string()),
            file_type: Some("bed narrowPeak".to_string()),
            output_type: Some("optimal idr thresholded peaks".to_string()),
            status: Some("released".to_string()),
            assembly: Some("hg19".to_string()),
            href: Some("/files/ENCFF000AAA/@@download/ENCFF000AAA.bed.gz".to_string()),
            ..Default::default()
        }
    }

    fn region_search() -> UseSet {
        [UsePolicy::RegionSearch].into_iter().collect()
    }

    #[test]
    fn test_candidate_dataset_region_search() {
        let uses = Policy::default().candidate_dataset(&chip_experiment()).unwrap();
        assert_eq!(uses, region_search());
    }

    #[test]
    fn test_candidate_dataset_requires_experiment_or_file_set() {
        let mut dataset = chip_experiment();
        dataset.types = vec!["Annotation".to_string()];
        assert!(Policy::default().candidate_dataset(&dataset).is_none());

        dataset.types = vec!["FileSet".to_string()];
        assert!(Policy::default().candidate_dataset(&dataset).is_some());
    }

    #[test]
    fn test_candidate_dataset_without_files() {
        let mut dataset = chip_experiment();
        dataset.files.clear();
        assert!(Policy::default().candidate_dataset(&dataset).is_none());
    }

    #[test]
    fn test_candidate_dataset_unsupported_assay_is_empty() {
        let mut dataset = chip_experiment();
        dataset.assay_term_name = Some("RNA-seq".to_string());
        let uses = Policy::default().candidate_dataset(&dataset).unwrap();
        assert!(uses.is_empty());
    }

    #[test]
    fn test_candidate_dataset_regulome_needs_tag() {
        let mut dataset = chip_experiment();
        dataset.assay_term_name = Some("FAIRE-seq".to_string());
        assert!(Policy::default().candidate_dataset(&dataset).unwrap().is_empty());

        dataset.internal_tags = vec![REGULOME_TAG.to_string()];
        let uses = Policy::default().candidate_dataset(&dataset).unwrap();
        assert_eq!(uses, [UsePolicy::Regulome].into_iter().collect());
    }

    #[test]
    fn test_candidate_file_region_search() {
        let doc = Policy::default()
            .candidate_file(&peaks_file(), &chip_experiment(), &region_search())
            .unwrap();
        assert_eq!(doc.uses, vec![UsePolicy::RegionSearch]);
        assert_eq!(doc.file.assembly, "hg19");
        assert_eq!(doc.dataset.collection_type.as_deref(), Some("ChIP-seq"));
        assert_eq!(doc.dataset.target.as_deref(), Some("CTCF"));
        assert_eq!(doc.dataset.dataset_type.as_deref(), Some("Experiment"));
        assert_eq!(doc.snps, None);
    }

    #[test]
    fn test_candidate_file_missing_required_field() {
        let mut file = peaks_file();
        file.output_type = None;
        assert!(Policy::default()
            .candidate_file(&file, &chip_experiment(), &region_search())
            .is_none());
    }

    #[test]
    fn test_candidate_file_value_outside_allowed_set() {
        let mut file = peaks_file();
        file.output_type = Some("conservative idr thresholded peaks".to_string());
        assert!(Policy::default()
            .candidate_file(&file, &chip_experiment(), &region_search())
            .is_none());
    }

    #[test]
    fn test_candidate_file_status_and_assembly() {
        let mut file = peaks_file();
        file.status = Some("archived".to_string());
        assert!(Policy::default()
            .candidate_file(&file, &chip_experiment(), &region_search())
            .is_none());

        let mut file = peaks_file();
        file.assembly = Some("mm10-minimal".to_string());
        let doc = Policy::default()
            .candidate_file(&file, &chip_experiment(), &region_search())
            .unwrap();
        assert_eq!(doc.file.assembly, "mm10");

        let mut file = peaks_file();
        file.assembly = Some("dm6".to_string());
        assert!(Policy::default()
            .candidate_file(&file, &chip_experiment(), &region_search())
            .is_none());
    }

    #[test]
    fn test_candidate_file_needs_href_and_format() {
        let mut file = peaks_file();
        file.href = None;
        assert!(Policy::default()
            .candidate_file(&file, &chip_experiment(), &region_search())
            .is_none());

        let mut file = peaks_file();
        file.file_format = Some("bigBed".to_string());
        assert!(Policy::default()
            .candidate_file(&file, &chip_experiment(), &region_search())
            .is_none());
    }

    #[test]
    fn test_candidate_file_both_uses() {
        let mut dataset = chip_experiment();
        dataset.internal_tags = vec![REGULOME_TAG.to_string()];
        let uses = Policy::default().candidate_dataset(&dataset).unwrap();
        assert_eq!(uses.len(), 2);

        let doc = Policy::default()
            .candidate_file(&peaks_file(), &dataset, &uses)
            .unwrap();
        assert_eq!(doc.uses, vec![UsePolicy::RegionSearch, UsePolicy::Regulome]);
        assert_eq!(doc.use_type(), UsePolicy::Multiple);
    }

    #[test]
    fn test_candidate_file_regulome_only_for_archived() {
        let mut dataset = chip_experiment();
        dataset.internal_tags = vec![REGULOME_TAG.to_string()];
        let uses = Policy::default().candidate_dataset(&dataset).unwrap();

        let mut file = peaks_file();
        file.status = Some("archived".to_string());
        let doc = Policy::default().candidate_file(&file, &dataset, &uses).unwrap();
        assert_eq!(doc.uses, vec![UsePolicy::Regulome]);
    }

    #[test]
    fn test_candidate_file_snp_flag() {
        let dataset = Dataset {
            uuid: "r1".to_string(),
            id: "/references/ENCSR000REF/".to_string(),
            types: vec!["Reference".to_string(), "FileSet".to_string()],
            reference_type: Some("index".to_string()),
            internal_tags: vec![REGULOME_TAG.to_string()],
            files: vec![FileRef::Reference("/files/ENCFF000SNP/".to_string())],
            ..Default::default()
        };
        let uses = Policy::default().candidate_dataset(&dataset).unwrap();

        let file = File {
            uuid: "snp".to_string(),
            id: "/files/ENCFF000SNP/".to_string(),
            file_format: Some("bed".to_string()),
            output_type: Some("variant calls".to_string()),
            status: Some("released".to_string()),
            assembly: Some("GRCh38".to_string()),
            submitted_file_name: Some(SNP_FILES[1].to_string()),
            href: Some("/files/ENCFF000SNP/@@download/ENCFF000SNP.bed.gz".to_string()),
            ..Default::default()
        };
        let doc = Policy::default().candidate_file(&file, &dataset, &uses).unwrap();
        assert_eq!(doc.snps, Some(true));
        assert_eq!(doc.dataset.dataset_type.as_deref(), Some("Reference"));
        assert_eq!(doc.dataset.collection_type.as_deref(), Some("index"));
    }

    #[test]
    fn test_candidate_file_test_instance_allow_list() {
        let policy = Policy::for_testing();
        assert!(policy
            .candidate_file(&peaks_file(), &chip_experiment(), &region_search())
            .is_none());

        let mut file = peaks_file();
        file.accession = Some("ENCFF002COS".to_string());
        assert!(policy
            .candidate_file(&file, &chip_experiment(), &region_search())
            .is_some());
    }
}
