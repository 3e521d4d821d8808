//! The incremental region indexing engine.
//!
//! [`RegionIndexer`] reconciles the region indices with the metadata
//! repository one dataset at a time. For every file of a dataset it either
//! ingests the file (when it qualifies and is not yet resident) or removes it
//! (when it no longer qualifies). The residency ledger records what is indexed
//! and where, and is written last on ingestion and deleted last on removal, so
//! it never claims data that is not there.
//!
//! The engine assumes a single writer; callers must not run two cycles at once.

use crate::formats::{ChromGroup, GroupSink};
use crate::metadata::MetadataRepository;
use crate::notify::Notifier;
use crate::policy::{Policy, UseSet, is_allowed_format};
use crate::reader::{RemoteReader, read_groups};
use crate::state::{CycleState, CycleStateStore, StateDisplay};
use crate::storage::{
    DocumentStore, IndexSettings, chrom_index_mapping, resident_mapping, snp_index_mapping,
};
use crate::types::{
    CycleError, Dataset, DatasetRef, File, FileRef, RegionDocument, RegionRecord,
    ResidencyRecord, SnpRecord, UsePolicy,
};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Residency ledger index.
pub const RESIDENT_INDEX: &str = "resident_regionsets";
pub const SNP_INDEX_PREFIX: &str = "snp141_";

/// Index patterns flushed after each dataset.
const FLUSH_PATTERNS: &[&str] = &["chr*", "snp141_*", RESIDENT_INDEX];

/// Dedicated SNP index for an assembly.
pub fn snp_index_key(assembly: &str) -> String {
    format!("{}{}", SNP_INDEX_PREFIX, assembly.to_lowercase())
}

#[derive(Debug, Clone)]
pub struct IndexerSettings {
    pub residents_index: String,
    pub index_settings: IndexSettings,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            residents_index: RESIDENT_INDEX.to_string(),
            index_settings: IndexSettings::default(),
        }
    }
}

/// What happened to one dataset's files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectOutcome {
    pub added: Vec<String>,
    pub dropped: Vec<String>,
    pub errors: Vec<CycleError>,
}

/// Result of one trigger.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    #[serde(flatten)]
    pub state: CycleState,
    pub dry_run: bool,
    pub force: bool,
    /// Identifiers the cycle selected.
    pub selected: usize,
    /// The selection itself, reported for dry runs only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub display: StateDisplay,
    pub files_for_region_search: u64,
    pub files_for_regulomedb: u64,
    pub files_in_index: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reindex_requested: Option<usize>,
}

/// Writes region groups of one file to the per-chromosome indices.
struct RegionSink {
    store: Arc<dyn DocumentStore>,
    settings: IndexSettings,
    uuid: String,
    assembly: String,
    chroms: Vec<String>,
}

#[async_trait]
impl GroupSink<RegionRecord> for RegionSink {
    async fn write_group(&mut self, group: ChromGroup<RegionRecord>) -> Result<()> {
        let ChromGroup { chrom, mut records } = group;

        if self.chroms.contains(&chrom) {
            // Unsorted input: fold into the document already written.
            if let Some(existing) = self.store.get(&chrom, &self.uuid).await? {
                let mut earlier: RegionDocument = serde_json::from_value(existing.source)?;
                earlier.positions.append(&mut records);
                records = earlier.positions;
            }
        } else {
            self.store.ensure_index(&chrom, &self.settings).await?;
            self.store
                .ensure_mapping(&chrom, &self.assembly, &chrom_index_mapping())
                .await?;
            self.chroms.push(chrom.clone());
        }

        let doc = RegionDocument {
            uuid: self.uuid.clone(),
            positions: records,
        };
        self.store
            .put(&chrom, &self.assembly, &self.uuid, &serde_json::to_value(&doc)?)
            .await
    }
}

/// SNP documents serialized per bulk request.
const SNP_BATCH: usize = 10_000;

/// Bulk loads SNP groups of one file into its dedicated index.
struct SnpSink {
    store: Arc<dyn DocumentStore>,
    index: String,
    chroms: Vec<String>,
    /// `(chrom, rsid)` of every document written, kept only when the index
    /// already existed and cannot simply be dropped on failure.
    written: Option<Vec<(String, String)>>,
}

#[async_trait]
impl GroupSink<SnpRecord> for SnpSink {
    async fn write_group(&mut self, group: ChromGroup<SnpRecord>) -> Result<()> {
        self.store
            .ensure_mapping(&self.index, &group.chrom, &snp_index_mapping())
            .await?;
        if !self.chroms.contains(&group.chrom) {
            self.chroms.push(group.chrom.clone());
        }

        let mut total = 0;
        for batch in group.records.chunks(SNP_BATCH) {
            let docs = batch
                .iter()
                .map(|snp| -> Result<(String, Value)> {
                    Ok((snp.rsid.clone(), serde_json::to_value(snp)?))
                })
                .collect::<Result<Vec<_>>>()?;
            if let Some(written) = &mut self.written {
                written.extend(docs.iter().map(|(rsid, _)| (group.chrom.clone(), rsid.clone())));
            }
            total += self.store.bulk_put(&self.index, &group.chrom, docs).await?;
        }
        tracing::info!("added {}/{} {} docs", self.index, group.chrom, total);

        // Millions of docs per chromosome.
        self.store.flush_advisory(&self.index).await;
        Ok(())
    }
}

/// Data an ingestion has written so far, undone if it cannot complete.
enum Partial {
    Regions {
        assembly: String,
        chroms: Vec<String>,
    },
    Snps {
        index: String,
        created: bool,
        written: Vec<(String, String)>,
    },
}

pub struct RegionIndexer {
    metadata: Arc<dyn MetadataRepository>,
    store: Arc<dyn DocumentStore>,
    reader: RemoteReader,
    state: CycleStateStore,
    notifier: Notifier,
    policy: Policy,
    settings: IndexerSettings,
}

impl RegionIndexer {
    pub fn new(
        metadata: Arc<dyn MetadataRepository>,
        store: Arc<dyn DocumentStore>,
        reader: RemoteReader,
        state: CycleStateStore,
        notifier: Notifier,
        policy: Policy,
        settings: IndexerSettings,
    ) -> Self {
        Self {
            metadata,
            store,
            reader,
            state,
            notifier,
            policy,
            settings,
        }
    }

    pub fn state(&self) -> &CycleStateStore {
        &self.state
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Run one indexing cycle.
    ///
    /// A dry run reports the identifiers a real run would work on and changes
    /// nothing.
    pub async fn run_cycle(&self, dry_run: bool) -> Result<CycleReport> {
        let (uuids, force) = self
            .state
            .get_one_cycle(self.metadata.as_ref(), &self.policy, dry_run)
            .await?;
        let mut state = self.state.get().await?;
        let selected = uuids.len();

        if dry_run {
            return Ok(CycleReport {
                state,
                dry_run,
                force,
                selected,
                uuids: Some(uuids),
            });
        }

        if !uuids.is_empty() {
            tracing::info!("region indexer started on {} uuid(s)", selected);
            state = self.state.start_cycle(&uuids, state).await?;
            let errors = self.update_objects(&uuids, force).await;
            state = self.state.finish_cycle(state, errors).await?;
            if state.indexed == 0 {
                tracing::warn!(
                    "region indexer added {} file(s) from {} dataset uuids",
                    state.indexed,
                    selected
                );
            }
        }

        if let Some((target, idle)) = self.state.take_notify_if_idle().await? {
            self.notifier.notify_finished(&target, &idle).await;
            state = idle;
        }

        Ok(CycleReport {
            state,
            dry_run,
            force,
            selected,
            uuids: None,
        })
    }

    /// Apply status requests, then report state and residency counts.
    ///
    /// `reindex` is a comma separated uuid list or `all` for every eligible
    /// dataset.
    pub async fn status(
        &self,
        reindex: Option<&str>,
        notify: Option<&str>,
    ) -> Result<StatusReport> {
        let mut reindex_requested = None;
        if let Some(reindex) = reindex {
            let uuids: Vec<String> = if reindex.trim() == "all" {
                let mut all: Vec<String> = self
                    .metadata
                    .regionable_datasets(&self.policy)
                    .await?
                    .into_iter()
                    .collect();
                all.sort();
                all
            } else {
                reindex
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            };
            if uuids.is_empty() {
                return Err(Error::InvalidInput("reindex list is empty".to_string()));
            }
            self.state.request_reindex(&uuids).await?;
            tracing::info!("requested reindex of {} uuid(s)", uuids.len());
            reindex_requested = Some(uuids.len());
        }

        if let Some(target) = notify {
            self.state.set_notify(target).await?;
        }

        let display = self.state.display().await?;
        let region_search = self.resident_count(UsePolicy::RegionSearch).await;
        let regulome = self.resident_count(UsePolicy::Regulome).await;
        let multiple = self.resident_count(UsePolicy::Multiple).await;

        Ok(StatusReport {
            display,
            files_for_region_search: region_search + multiple,
            files_for_regulomedb: regulome + multiple,
            files_in_index: region_search + regulome + multiple,
            reindex_requested,
        })
    }

    async fn resident_count(&self, use_type: UsePolicy) -> u64 {
        self.store
            .count(&self.settings.residents_index, Some(use_type.as_str()))
            .await
            .unwrap_or(0)
    }

    /// Update every identifier in turn, collecting errors.
    pub async fn update_objects(&self, uuids: &[String], force: bool) -> Vec<CycleError> {
        let mut errors = Vec::new();
        for (i, uuid) in uuids.iter().enumerate() {
            let outcome = self.update_object(uuid, force).await;
            errors.extend(outcome.errors);
            if (i + 1) % 100 == 0 {
                tracing::info!("region indexer processed {} of {} uuids", i + 1, uuids.len());
            }
        }
        errors
    }

    /// Reconcile the region indices with one dataset.
    pub async fn update_object(&self, uuid: &str, force: bool) -> ObjectOutcome {
        let mut outcome = ObjectOutcome::default();

        let dataset = match self.metadata.dataset(uuid).await {
            Ok(dataset) => dataset,
            Err(e) if e.is_not_found() => {
                tracing::warn!("dataset is not found for uuid: {}", uuid);
                return outcome;
            }
            Err(e) => {
                tracing::error!("failed to fetch dataset {}: {}", uuid, e);
                outcome.errors.push(CycleError::new(uuid, e));
                return outcome;
            }
        };

        // Files of a dataset that stops qualifying stay indexed.
        let dataset_uses = match self.policy.candidate_dataset(&dataset) {
            Some(uses) if !uses.is_empty() => uses,
            _ => return outcome,
        };

        for file_ref in &dataset.files {
            let file = match file_ref {
                FileRef::Embedded(file) => file.as_ref().clone(),
                FileRef::Reference(id) => match self.metadata.file(id).await {
                    Ok(file) => file,
                    Err(e) if e.is_not_found() => {
                        tracing::warn!("file is not found for: {}", id);
                        continue;
                    }
                    Err(e) => {
                        outcome.errors.push(CycleError::new(id.as_str(), e));
                        continue;
                    }
                },
            };

            if !is_allowed_format(&file) {
                continue;
            }
            if let Err(e) = self
                .update_file(&dataset, &dataset_uses, &file, force, &mut outcome)
                .await
            {
                tracing::error!(
                    "region indexer failed on file {} of {}: {}",
                    file.display_name(),
                    dataset.display_name(),
                    e
                );
                outcome.errors.push(CycleError::new(file.uuid.as_str(), e));
            }
        }

        for pattern in FLUSH_PATTERNS {
            self.store.flush_advisory(pattern).await;
        }
        outcome
    }

    async fn update_file(
        &self,
        dataset: &Dataset,
        dataset_uses: &UseSet,
        file: &File,
        force: bool,
        outcome: &mut ObjectOutcome,
    ) -> Result<()> {
        let owner = self.owning_dataset(file, dataset).await?;

        match self.policy.candidate_file(file, &owner, dataset_uses) {
            Some(doc) => {
                if force {
                    self.remove(&file.uuid).await?;
                } else if self.is_resident(&file.uuid).await? {
                    return Ok(());
                }

                if self.add_file(file, doc).await? {
                    tracing::info!(
                        "added file: {} {}{}",
                        dataset.display_name(),
                        file.href.as_deref().unwrap_or_default(),
                        if force { " with FORCE" } else { "" }
                    );
                    self.record(&file.uuid, true, outcome).await;
                }
            }
            None => {
                if self.remove(&file.uuid).await? {
                    tracing::warn!("dropped file: {} {}", dataset.display_name(), file.id);
                    self.record(&file.uuid, false, outcome).await;
                }
            }
        }
        Ok(())
    }

    async fn record(&self, uuid: &str, added: bool, outcome: &mut ObjectOutcome) {
        let result = if added {
            outcome.added.push(uuid.to_string());
            self.state.file_added(uuid).await
        } else {
            outcome.dropped.push(uuid.to_string());
            self.state.file_dropped(uuid).await
        };
        if let Err(e) = result {
            tracing::warn!("failed to record {} in cycle counters: {}", uuid, e);
        }
    }

    /// The dataset that owns `file`, which for file sets is not the one that
    /// listed it.
    async fn owning_dataset(&self, file: &File, listed_by: &Dataset) -> Result<Dataset> {
        match &file.dataset {
            Some(DatasetRef::Embedded(owner)) => Ok(owner.as_ref().clone()),
            Some(DatasetRef::Reference(id)) if *id != listed_by.id => {
                self.metadata.dataset(id).await
            }
            _ => Ok(listed_by.clone()),
        }
    }

    pub async fn is_resident(&self, uuid: &str) -> Result<bool> {
        Ok(self
            .store
            .get(&self.settings.residents_index, uuid)
            .await?
            .is_some())
    }

    /// Remove every trace of `uuid` from the region indices.
    ///
    /// Returns `Ok(false)` when nothing was resident. Any failure leaves the
    /// residency record in place so removal is retried on a later cycle.
    pub async fn remove(&self, uuid: &str) -> Result<bool> {
        let Some(stored) = self.store.get(&self.settings.residents_index, uuid).await? else {
            return Ok(false);
        };
        let record: ResidencyRecord = serde_json::from_value(stored.source)?;

        if let Some(index) = &record.index {
            self.store.delete_index(index).await?;
        } else {
            for chrom in record.chroms.iter().flatten() {
                self.store.delete(chrom, record.assembly(), uuid).await?;
            }
        }

        self.store
            .delete(&self.settings.residents_index, &stored.doc_type, uuid)
            .await?;
        Ok(true)
    }

    /// Read `file` into the region or SNP indices, then record it as resident.
    ///
    /// Returns `Ok(false)` when the file held no usable rows. If reading or the
    /// residency write fails, whatever was already written for the file is
    /// deleted before the error is returned.
    pub async fn add_file(&self, file: &File, mut doc: ResidencyRecord) -> Result<bool> {
        let readable = self.reader.readable_file(file).await?;
        let assembly = doc.assembly().to_string();

        let (read, partial) = if doc.is_snps() {
            let index = snp_index_key(&assembly);
            let created = !self.store.index_exists(&index).await?;
            if created {
                self.store
                    .create_index(&index, &self.settings.index_settings)
                    .await?;
            }
            let mut sink = SnpSink {
                store: self.store.clone(),
                index: index.clone(),
                chroms: Vec::new(),
                written: (!created).then(Vec::new),
            };
            let read = read_groups::<SnpRecord, _>(readable, &mut sink).await;
            doc.index = Some(index.clone());
            let partial = Partial::Snps {
                index,
                created,
                written: sink.written.unwrap_or_default(),
            };
            (read.map(|stats| (stats, sink.chroms)), partial)
        } else {
            let mut sink = RegionSink {
                store: self.store.clone(),
                settings: self.settings.index_settings,
                uuid: file.uuid.clone(),
                assembly: assembly.clone(),
                chroms: Vec::new(),
            };
            let read = read_groups::<RegionRecord, _>(readable, &mut sink).await;
            let partial = Partial::Regions {
                assembly,
                chroms: sink.chroms.clone(),
            };
            (read.map(|stats| (stats, sink.chroms)), partial)
        };

        let (stats, chroms) = match read {
            Ok(read) => read,
            Err(e) => {
                self.discard(&file.uuid, partial).await;
                return Err(e);
            }
        };
        if stats.skipped_rows > 0 {
            tracing::warn!(
                "skipped {} malformed row(s) in {}",
                stats.skipped_rows,
                file.display_name()
            );
        }
        if chroms.is_empty() {
            tracing::warn!("no regions read from {}", file.display_name());
            self.discard(&file.uuid, partial).await;
            return Ok(false);
        }

        doc.chroms = Some(chroms);
        if let Err(e) = self.add_to_residence(&doc).await {
            self.discard(&file.uuid, partial).await;
            return Err(e);
        }
        Ok(true)
    }

    /// Best-effort removal of a failed ingestion's documents.
    async fn discard(&self, uuid: &str, partial: Partial) {
        match self.delete_partial(uuid, &partial).await {
            Ok(()) => tracing::info!("discarded partial ingestion of {}", uuid),
            Err(e) => tracing::error!("failed to discard partial ingestion of {}: {}", uuid, e),
        }
    }

    async fn delete_partial(&self, uuid: &str, partial: &Partial) -> Result<()> {
        match partial {
            Partial::Regions { assembly, chroms } => {
                for chrom in chroms {
                    self.store.delete(chrom, assembly, uuid).await?;
                }
            }
            Partial::Snps {
                index,
                created: true,
                ..
            } => {
                self.store.delete_index(index).await?;
            }
            Partial::Snps { index, written, .. } => {
                for (chrom, rsid) in written {
                    self.store.delete(index, chrom, rsid).await?;
                }
            }
        }
        Ok(())
    }

    /// Write the residency record under its use type.
    pub async fn add_to_residence(&self, doc: &ResidencyRecord) -> Result<()> {
        let index = &self.settings.residents_index;
        let use_type = doc.use_type();
        self.store
            .ensure_index(index, &self.settings.index_settings)
            .await?;
        self.store
            .ensure_mapping(index, use_type.as_str(), &resident_mapping())
            .await?;
        self.store
            .put(index, use_type.as_str(), &doc.uuid, &serde_json::to_value(doc)?)
            .await
    }
}
