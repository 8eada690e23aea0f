use crate::error::SyncError;
use crate::sync::{SyncReport, Synchronizer, TaskStore};
use std::thread;
use std::time::Duration;

/// Runs one pass, logging the error if it fails.
pub fn run_once<N: TaskStore, G: TaskStore>(
    synchronizer: &mut Synchronizer<N, G>,
) -> Result<SyncReport, SyncError> {
    match synchronizer.sync() {
        Ok(report) => Ok(report),
        Err(err) => {
            if err.is_fatal_to_pass() {
                log::error!("sync pass abandoned: {err}");
            } else {
                log::error!("sync pass finished with an error: {err}");
            }
            Err(err)
        }
    }
}

/// Repeats passes every `interval` until `keep_going` says stop. A failed
/// pass is logged and the loop carries on.
pub fn run_loop<N: TaskStore, G: TaskStore>(
    synchronizer: &mut Synchronizer<N, G>,
    interval: Duration,
    mut keep_going: impl FnMut() -> bool,
) -> usize {
    let mut passes = 0;
    loop {
        let _ = run_once(synchronizer);
        passes += 1;
        if !keep_going() {
            return passes;
        }
        log::debug!("next sync in {}s", interval.as_secs());
        thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Store, Task};
    use crate::sync::SyncStateStore;
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::TempDir;

    struct ListStore {
        store: Store,
        tasks: Vec<Task>,
        next_id: usize,
        fetches: Rc<Cell<usize>>,
        fail_fetch_on: Option<usize>,
    }

    impl ListStore {
        fn new(store: Store) -> Self {
            Self {
                store,
                tasks: Vec::new(),
                next_id: 0,
                fetches: Rc::new(Cell::new(0)),
                fail_fetch_on: None,
            }
        }
    }

    impl TaskStore for ListStore {
        fn store(&self) -> Store {
            self.store
        }

        fn fetch_all(&mut self) -> Result<Vec<Task>, SyncError> {
            let n = self.fetches.get() + 1;
            self.fetches.set(n);
            if self.fail_fetch_on == Some(n) {
                return Err(SyncError::Request("offline".to_string()));
            }
            Ok(self.tasks.clone())
        }

        fn create(&mut self, task: &Task) -> Result<Task, SyncError> {
            self.next_id += 1;
            let mut created = task.detached();
            created.set_id(self.store, format!("{}-{}", self.store.as_str(), self.next_id));
            self.tasks.push(created.clone());
            Ok(created)
        }

        fn update(&mut self, task: &Task) -> Result<Task, SyncError> {
            let id = task.id(self.store).ok_or(SyncError::MissingId { store: self.store })?;
            let mut updated = task.detached();
            updated.set_id(self.store, id);
            if let Some(slot) = self
                .tasks
                .iter_mut()
                .find(|t| t.id(self.store) == updated.id(self.store))
            {
                *slot = updated.clone();
            }
            Ok(updated)
        }
    }

    fn notion_with_one_task() -> ListStore {
        let mut notion = ListStore::new(Store::Notion);
        notion.tasks.push(Task::new("Buy milk").linked_to(Store::Notion, "n1"));
        notion
    }

    #[test]
    fn run_once_returns_the_report() {
        let tmp = TempDir::new().unwrap();
        let state_store = SyncStateStore::new(tmp.path().join("sync_state.json"));
        let mut synchronizer = Synchronizer::new(
            notion_with_one_task(),
            ListStore::new(Store::Google),
            state_store,
        );

        let report = run_once(&mut synchronizer).unwrap();

        assert_eq!(report.counts(), (1, 0, 0));
        assert!(tmp.path().join("sync_state.json").exists());
    }

    #[test]
    fn run_once_surfaces_fetch_failures() {
        let tmp = TempDir::new().unwrap();
        let mut google = ListStore::new(Store::Google);
        google.fail_fetch_on = Some(1);
        let mut synchronizer = Synchronizer::new(
            notion_with_one_task(),
            google,
            SyncStateStore::new(tmp.path().join("sync_state.json")),
        );

        let err = run_once(&mut synchronizer).unwrap_err();

        assert!(err.is_fatal_to_pass());
    }

    #[test]
    fn loop_keeps_running_after_a_failed_pass() {
        let tmp = TempDir::new().unwrap();
        let notion = notion_with_one_task();
        let fetches = notion.fetches.clone();
        let mut google = ListStore::new(Store::Google);
        google.fail_fetch_on = Some(1);
        let mut synchronizer = Synchronizer::new(
            notion,
            google,
            SyncStateStore::new(tmp.path().join("sync_state.json")),
        );

        let mut remaining = 2;
        let passes = run_loop(&mut synchronizer, Duration::ZERO, || {
            remaining -= 1;
            remaining > 0
        });

        assert_eq!(passes, 2);
        assert_eq!(fetches.get(), 2);
        assert_eq!(synchronizer.state().links.len(), 1);
    }
}
