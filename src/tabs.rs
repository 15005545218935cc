use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::host::TabId;
use crate::prefs::PrefsStore;
use crate::scheduler::Scheduler;

/// Translates host tab lifecycle events into preference records. Closing a
/// tab disarms its schedule before the record goes away, so no timer
/// outlives the tab it was reloading.
pub struct TabTracker {
    store: Arc<PrefsStore>,
    scheduler: Arc<Scheduler>,
}

impl TabTracker {
    pub fn new(store: Arc<PrefsStore>, scheduler: Arc<Scheduler>) -> Self {
        Self { store, scheduler }
    }

    pub fn tab_created(&self, tab_id: TabId) -> Result<()> {
        info!(tab_id, "tracking new tab");
        self.store.insert_default(tab_id)
    }

    /// Install-time sweep over every tab the host already has open.
    pub fn installed(&self, tab_ids: impl IntoIterator<Item = TabId>) -> Result<()> {
        for tab_id in tab_ids {
            self.store.insert_default(tab_id)?;
        }
        Ok(())
    }

    pub fn tab_removed(&self, tab_id: TabId) -> Result<()> {
        self.scheduler.stop(tab_id)?;
        info!(tab_id, "tab closed, dropping its record");
        self.store.remove(tab_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostEvent;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn fixture() -> (
        TempDir,
        Arc<PrefsStore>,
        Arc<Scheduler>,
        TabTracker,
        mpsc::UnboundedReceiver<HostEvent>,
    ) {
        let dir = TempDir::new().expect("temp dir");
        let store = Arc::new(PrefsStore::at(dir.path().join("auto_refresh.json")));
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Scheduler::new(store.clone(), tx));
        let tracker = TabTracker::new(store.clone(), scheduler.clone());
        (dir, store, scheduler, tracker, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn created_tabs_get_default_records() {
        let (_dir, store, _scheduler, tracker, _rx) = fixture();
        tracker.tab_created(5).expect("create");
        tracker.tab_created(5).expect("create again");
        assert_eq!(store.read_all().expect("read").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn install_sweep_tracks_every_open_tab() {
        let (_dir, store, _scheduler, tracker, _rx) = fixture();
        tracker.tab_created(2).expect("create");
        tracker.installed([1, 2, 3]).expect("install");

        let ids: Vec<_> = store
            .read_all()
            .expect("read")
            .iter()
            .map(|record| record.tab_id)
            .collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_an_armed_tab_disarms_and_deletes() {
        let (_dir, store, scheduler, tracker, _rx) = fixture();
        tracker.tab_created(7).expect("create");
        scheduler.start(7).expect("start");
        assert!(scheduler.is_armed(7));

        tracker.tab_removed(7).expect("remove");

        assert!(!scheduler.is_armed(7));
        assert!(store.get(7).expect("get").is_none());
        assert!(scheduler.start(7).is_err());
    }
}
