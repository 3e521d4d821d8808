//! Cross-invocation indexing cycle state.
//!
//! State lives in the document store next to the primary indexer's own
//! bookkeeping, so it survives restarts. Each invocation asks
//! [`CycleStateStore::get_one_cycle`] which identifiers to work on; the rules
//! are evaluated in priority order:
//!
//! 1. primary indexer never finished a first pass: nothing to do
//! 2. primary indexer is running a full reindex: nothing to do
//! 3. a forced reindex was requested: those ids, forced
//! 4. the previous cycle never finished: its todo list again
//! 5. otherwise: whatever the primary indexer staged for us
//!
//! Only one cycle may run at a time. That is guaranteed by whoever triggers
//! cycles; nothing here takes a lock.

use crate::metadata::MetadataRepository;
use crate::policy::Policy;
use crate::storage::DocumentStore;
use crate::types::CycleError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;

/// Document type used for all state documents.
const META_TYPE: &str = "meta";
/// Present once the primary indexer has completed its first pass.
const PRIMARY_INITIALIZED_KEY: &str = "indexing";
const PRIMARY_STATE_KEY: &str = "primary_indexer";
/// Identifiers the primary indexer hands over after each of its cycles.
pub const STAGED_KEY: &str = "staged_for_regions_list";
/// Prefix of the transaction markers mixed into the staged list.
const SENTINEL_PREFIX: &str = "xmin:";
/// Errors kept on the state document.
const MAX_ERRORS: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    #[default]
    Uninitialized,
    Indexing,
    Done,
}

/// Persisted state of the region indexer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleState {
    #[serde(default)]
    pub status: CycleStatus,
    /// Completed cycles.
    #[serde(default)]
    pub cycles: u64,
    /// Identifiers in the current (or last) cycle.
    #[serde(default)]
    pub cycle_count: usize,
    #[serde(default)]
    pub cycle_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cycle_took: Option<String>,
    /// Files added plus files dropped in the last cycle.
    #[serde(default)]
    pub indexed: u64,
    #[serde(default)]
    pub errors: Vec<CycleError>,
    /// Where to report once the staged work has drained.
    #[serde(default)]
    pub notify: Option<String>,
}

/// What the priority rules decided for this invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Priority {
    Uninitialized,
    PrimaryRunning,
    Reindex(Vec<String>),
    Restart(Vec<String>),
    Normal,
}

/// Thresholds that shape cycle selection.
#[derive(Debug, Clone)]
pub struct StateSettings {
    /// Index holding the state documents.
    pub index: String,
    /// Primary cycle counts above this mean a full reindex is underway.
    pub primary_cycle_ceiling: u64,
    /// Staged lists longer than this are filtered to eligible datasets.
    pub staged_filter_threshold: usize,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            index: "snovault".to_string(),
            primary_cycle_ceiling: 99999,
            staged_filter_threshold: 500,
        }
    }
}

/// Counters shown by the status route.
#[derive(Debug, Clone, Serialize)]
pub struct StateDisplay {
    #[serde(flatten)]
    pub state: CycleState,
    pub staged_to_process: usize,
    pub todo: usize,
    pub last: usize,
    pub files_added: usize,
    pub files_dropped: usize,
}

pub struct CycleStateStore {
    store: Arc<dyn DocumentStore>,
    settings: StateSettings,
    title: String,
}

impl CycleStateStore {
    pub fn new(store: Arc<dyn DocumentStore>, settings: StateSettings) -> Self {
        Self {
            store,
            settings,
            title: "region".to_string(),
        }
    }

    fn state_key(&self) -> String {
        format!("{}_indexer", self.title)
    }

    fn todo_key(&self) -> String {
        format!("{}_indexer_todo", self.title)
    }

    fn last_key(&self) -> String {
        format!("{}_indexer_last", self.title)
    }

    fn reindex_key(&self) -> String {
        format!("{}_indexer_reindex", self.title)
    }

    fn files_added_key(&self) -> String {
        format!("{}_files_added", self.title)
    }

    fn files_dropped_key(&self) -> String {
        format!("{}_files_dropped", self.title)
    }

    async fn get_obj(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .store
            .get(&self.settings.index, key)
            .await?
            .map(|doc| doc.source))
    }

    async fn put_obj(&self, key: &str, value: &Value) -> Result<()> {
        self.store
            .put(&self.settings.index, META_TYPE, key, value)
            .await
    }

    async fn delete_obj(&self, key: &str) -> Result<()> {
        self.store
            .delete(&self.settings.index, META_TYPE, key)
            .await?;
        Ok(())
    }

    async fn get_list(&self, key: &str) -> Result<Vec<String>> {
        let list = self
            .get_obj(key)
            .await?
            .and_then(|doc| doc.get("list").cloned())
            .map(serde_json::from_value::<Vec<String>>)
            .transpose()?;
        Ok(list.unwrap_or_default())
    }

    async fn put_list(&self, key: &str, list: &[String]) -> Result<()> {
        self.put_obj(key, &json!({ "list": list })).await
    }

    async fn extend_list(&self, key: &str, items: &[String]) -> Result<()> {
        let mut list = self.get_list(key).await?;
        list.extend_from_slice(items);
        self.put_list(key, &list).await
    }

    pub async fn get(&self) -> Result<CycleState> {
        match self.get_obj(&self.state_key()).await? {
            Some(doc) => Ok(serde_json::from_value(doc)?),
            None => Ok(CycleState::default()),
        }
    }

    pub async fn put(&self, state: &CycleState) -> Result<()> {
        self.put_obj(&self.state_key(), &serde_json::to_value(state)?)
            .await
    }

    /// Apply the priority rules. Writes nothing when `dry_run` is set.
    pub async fn priority_cycle(&self, dry_run: bool) -> Result<Priority> {
        if self.get_obj(PRIMARY_INITIALIZED_KEY).await?.is_none() {
            if !dry_run {
                self.delete_obj(&self.reindex_key()).await?;
                self.delete_obj(STAGED_KEY).await?;
                let mut state = self.get().await?;
                state.status = CycleStatus::Uninitialized;
                self.put(&state).await?;
            }
            return Ok(Priority::Uninitialized);
        }

        let primary_cycles = self
            .get_obj(PRIMARY_STATE_KEY)
            .await?
            .and_then(|doc| doc.get("cycle_count").and_then(Value::as_u64))
            .unwrap_or(0);
        if primary_cycles > self.settings.primary_cycle_ceiling {
            return Ok(Priority::PrimaryRunning);
        }

        let reindex = self.get_list(&self.reindex_key()).await?;
        if !reindex.is_empty() {
            tracing::warn!(
                "{} reindex of {} uuids requested with force",
                self.state_key(),
                reindex.len()
            );
            if !dry_run {
                self.delete_obj(&self.reindex_key()).await?;
            }
            return Ok(Priority::Reindex(reindex));
        }

        if self.get().await?.status == CycleStatus::Indexing {
            let todo = self.get_list(&self.todo_key()).await?;
            tracing::info!("{} restarting on {} datasets", self.state_key(), todo.len());
            return Ok(Priority::Restart(todo));
        }

        Ok(Priority::Normal)
    }

    /// Identifiers to process this cycle and whether to force re-ingestion.
    pub async fn get_one_cycle(
        &self,
        metadata: &dyn MetadataRepository,
        policy: &Policy,
        dry_run: bool,
    ) -> Result<(Vec<String>, bool)> {
        match self.priority_cycle(dry_run).await? {
            Priority::Uninitialized | Priority::PrimaryRunning => return Ok((Vec::new(), false)),
            Priority::Reindex(uuids) => return Ok((uuids, true)),
            Priority::Restart(uuids) if !uuids.is_empty() => return Ok((uuids, false)),
            Priority::Restart(_) | Priority::Normal => {}
        }

        let staged = self.get_list(STAGED_KEY).await?;
        if staged.is_empty() {
            return Ok((Vec::new(), false));
        }
        if !dry_run {
            self.delete_obj(STAGED_KEY).await?;
        }

        let mut uuids = sanitize_staged(staged);
        if uuids.len() > self.settings.staged_filter_threshold {
            match metadata.regionable_datasets(policy).await {
                Ok(eligible) => uuids.retain(|uuid| eligible.contains(uuid)),
                Err(e) => tracing::warn!(
                    "could not narrow {} staged uuids to eligible datasets: {}",
                    uuids.len(),
                    e
                ),
            }
        }
        Ok((uuids, false))
    }

    /// Queue identifiers for the next normal cycle.
    pub async fn stage(&self, uuids: &[String]) -> Result<()> {
        self.extend_list(STAGED_KEY, uuids).await
    }

    /// Request a forced reindex of `uuids` on the next cycle.
    pub async fn request_reindex(&self, uuids: &[String]) -> Result<()> {
        self.extend_list(&self.reindex_key(), uuids).await
    }

    pub async fn set_notify(&self, target: &str) -> Result<CycleState> {
        let mut state = self.get().await?;
        state.notify = Some(target.to_string());
        self.put(&state).await?;
        Ok(state)
    }

    /// Removes and returns the notification target once nothing is staged.
    pub async fn take_notify_if_idle(&self) -> Result<Option<(String, CycleState)>> {
        let mut state = self.get().await?;
        let Some(target) = state.notify.clone() else {
            return Ok(None);
        };
        if state.status == CycleStatus::Indexing || !self.get_list(STAGED_KEY).await?.is_empty() {
            return Ok(None);
        }
        state.notify = None;
        self.put(&state).await?;
        Ok(Some((target, state)))
    }

    pub async fn start_cycle(&self, uuids: &[String], mut state: CycleState) -> Result<CycleState> {
        self.delete_obj(&self.files_added_key()).await?;
        self.delete_obj(&self.files_dropped_key()).await?;
        self.delete_obj(&self.last_key()).await?;
        self.put_list(&self.todo_key(), uuids).await?;

        state.status = CycleStatus::Indexing;
        state.cycle_count = uuids.len();
        state.cycle_started = Some(Utc::now());
        state.cycle_took = None;
        self.put(&state).await?;
        Ok(state)
    }

    /// Close a cycle. Always called, whatever happened during the cycle.
    pub async fn finish_cycle(
        &self,
        mut state: CycleState,
        errors: Vec<CycleError>,
    ) -> Result<CycleState> {
        if !errors.is_empty() {
            state.errors.extend(errors);
            let excess = state.errors.len().saturating_sub(MAX_ERRORS);
            state.errors.drain(..excess);
        }

        let todo = self.get_list(&self.todo_key()).await?;
        self.put_list(&self.last_key(), &todo).await?;
        self.delete_obj(&self.todo_key()).await?;

        let added = self.get_list(&self.files_added_key()).await?.len();
        let dropped = self.get_list(&self.files_dropped_key()).await?.len();
        state.indexed = (added + dropped) as u64;

        state.status = CycleStatus::Done;
        state.cycles += 1;
        state.cycle_took = state.cycle_started.map(|started| elapsed_since(started, Utc::now()));
        self.put(&state).await?;
        Ok(state)
    }

    pub async fn file_added(&self, uuid: &str) -> Result<()> {
        self.extend_list(&self.files_added_key(), &[uuid.to_string()])
            .await
    }

    pub async fn file_dropped(&self, uuid: &str) -> Result<()> {
        self.extend_list(&self.files_dropped_key(), &[uuid.to_string()])
            .await
    }

    pub async fn display(&self) -> Result<StateDisplay> {
        Ok(StateDisplay {
            state: self.get().await?,
            staged_to_process: self.get_list(STAGED_KEY).await?.len(),
            todo: self.get_list(&self.todo_key()).await?.len(),
            last: self.get_list(&self.last_key()).await?.len(),
            files_added: self.get_list(&self.files_added_key()).await?.len(),
            files_dropped: self.get_list(&self.files_dropped_key()).await?.len(),
        })
    }
}

/// Drop transaction markers and duplicates, keeping first-seen order.
pub fn sanitize_staged(staged: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    staged
        .into_iter()
        .filter(|val| !val.starts_with(SENTINEL_PREFIX))
        .filter(|val| seen.insert(val.clone()))
        .collect()
}

fn elapsed_since(started: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - started).num_seconds().max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
