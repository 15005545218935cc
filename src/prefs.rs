use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::host::TabId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    Fixed,
    Random,
}

/// Per-tab refresh preferences. Timer handles are deliberately not part of
/// this record; live scheduler state stays in memory with the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPrefs {
    pub tab_id: TabId,
    pub running: bool,
    pub interval_unit: IntervalUnit,
    pub mode: RefreshMode,
    pub fixed_value: f64,
    pub random_min: u64,
    pub random_max: u64,
    /// When the current schedule was armed, if it is running.
    #[serde(default, rename = "initiationTime")]
    pub initiated_at: Option<DateTime<Local>>,
}

impl RefreshPrefs {
    pub fn new(tab_id: TabId) -> Self {
        Self {
            tab_id,
            running: false,
            interval_unit: IntervalUnit::Seconds,
            mode: RefreshMode::Fixed,
            fixed_value: 10.0,
            random_min: 10,
            random_max: 20,
            initiated_at: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredState {
    auto_refresh_data: Vec<RefreshPrefs>,
}

/// File-backed store holding the full preference collection as one JSON
/// document. Read-modify-write operations hold the lock for their whole
/// duration, so two commands racing on different tabs cannot drop each
/// other's update.
pub struct PrefsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PrefsStore {
    pub fn new() -> Result<Self> {
        let base_dirs = BaseDirs::new().context("Unable to determine platform data directory")?;
        let mut data_dir = base_dirs.data_local_dir().to_path_buf();
        data_dir.push("TabAutoRefresh");
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        Ok(Self::at(data_dir.join("auto_refresh.json")))
    }

    /// Store backed by an explicit file path.
    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_all(&self) -> Result<Vec<RefreshPrefs>> {
        let _guard = self.guard();
        self.load()
    }

    pub fn write_all(&self, records: &[RefreshPrefs]) -> Result<()> {
        let _guard = self.guard();
        self.store(records)
    }

    /// First record matching the tab, in stored order.
    pub fn get(&self, tab_id: TabId) -> Result<Option<RefreshPrefs>> {
        let _guard = self.guard();
        let records = self.load()?;
        Ok(records.into_iter().find(|record| record.tab_id == tab_id))
    }

    /// Merge an edit into the matching record. A missing tab is a no-op,
    /// matching how edits to an untracked tab have always been dropped.
    pub fn patch(&self, tab_id: TabId, edit: impl FnOnce(&mut RefreshPrefs)) -> Result<()> {
        let _guard = self.guard();
        let mut records = self.load()?;
        if let Some(record) = records.iter_mut().find(|record| record.tab_id == tab_id) {
            edit(record);
        }
        self.store(&records)
    }

    /// Append a default record for a newly observed tab, unless one exists.
    pub fn insert_default(&self, tab_id: TabId) -> Result<()> {
        let _guard = self.guard();
        let mut records = self.load()?;
        if records.iter().any(|record| record.tab_id == tab_id) {
            return Ok(());
        }
        records.push(RefreshPrefs::new(tab_id));
        self.store(&records)
    }

    pub fn remove(&self, tab_id: TabId) -> Result<()> {
        let _guard = self.guard();
        let mut records = self.load()?;
        records.retain(|record| record.tab_id != tab_id);
        self.store(&records)
    }

    /// Delete the backing file entirely.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.guard();
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to delete {}", self.path.display()))?;
        }
        Ok(())
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self) -> Result<Vec<RefreshPrefs>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let state: StoredState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(state.auto_refresh_data)
    }

    fn store(&self, records: &[RefreshPrefs]) -> Result<()> {
        let state = StoredState {
            auto_refresh_data: records.to_vec(),
        };
        let payload = serde_json::to_string_pretty(&state)?;
        fs::write(&self.path, payload)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, PrefsStore) {
        let dir = TempDir::new().expect("temp dir");
        let store = PrefsStore::at(dir.path().join("auto_refresh.json"));
        (dir, store)
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let (_dir, store) = temp_store();
        assert!(store.read_all().expect("read").is_empty());
        assert!(store.get(7).expect("get").is_none());
    }

    #[test]
    fn insert_default_appends_once_per_tab() {
        let (_dir, store) = temp_store();
        store.insert_default(3).expect("insert");
        store.insert_default(3).expect("insert again");
        store.insert_default(4).expect("insert other");

        let records = store.read_all().expect("read");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], RefreshPrefs::new(3));
        assert_eq!(records[1].tab_id, 4);
    }

    #[test]
    fn new_records_carry_the_documented_defaults() {
        let record = RefreshPrefs::new(9);
        assert!(!record.running);
        assert_eq!(record.mode, RefreshMode::Fixed);
        assert_eq!(record.interval_unit, IntervalUnit::Seconds);
        assert_eq!(record.fixed_value, 10.0);
        assert_eq!(record.random_min, 10);
        assert_eq!(record.random_max, 20);
        assert!(record.initiated_at.is_none());
    }

    #[test]
    fn patch_merges_into_the_matching_record() {
        let (_dir, store) = temp_store();
        store.insert_default(1).expect("insert");
        store.insert_default(2).expect("insert");

        store
            .patch(2, |record| {
                record.mode = RefreshMode::Random;
                record.random_min = 5;
                record.random_max = 8;
            })
            .expect("patch");

        let untouched = store.get(1).expect("get").expect("record");
        assert_eq!(untouched.mode, RefreshMode::Fixed);
        let patched = store.get(2).expect("get").expect("record");
        assert_eq!(patched.mode, RefreshMode::Random);
        assert_eq!(patched.random_min, 5);
        assert_eq!(patched.random_max, 8);
    }

    #[test]
    fn patch_on_untracked_tab_is_a_noop() {
        let (_dir, store) = temp_store();
        store.insert_default(1).expect("insert");
        store.patch(99, |record| record.running = true).expect("patch");
        assert!(store.get(99).expect("get").is_none());
        assert_eq!(store.read_all().expect("read").len(), 1);
    }

    #[test]
    fn remove_filters_out_the_closed_tab() {
        let (_dir, store) = temp_store();
        store.insert_default(1).expect("insert");
        store.insert_default(2).expect("insert");
        store.remove(1).expect("remove");

        let records = store.read_all().expect("read");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tab_id, 2);
        assert!(store.get(1).expect("get").is_none());
    }

    #[test]
    fn persisted_layout_is_a_single_camel_case_collection() {
        let (_dir, store) = temp_store();
        store.insert_default(12).expect("insert");

        let raw = std::fs::read_to_string(store.path()).expect("read file");
        assert!(raw.contains("\"autoRefreshData\""));
        assert!(raw.contains("\"tabId\": 12"));
        assert!(raw.contains("\"intervalUnit\": \"seconds\""));
        assert!(raw.contains("\"mode\": \"fixed\""));
        assert!(raw.contains("\"fixedValue\": 10.0"));
        assert!(raw.contains("\"randomMin\": 10"));
        assert!(raw.contains("\"randomMax\": 20"));
    }
}
