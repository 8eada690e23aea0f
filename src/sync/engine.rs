use super::state::{SyncState, SyncStateStore};
use crate::error::SyncError;
use crate::models::{Store, Task};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// A remote task list the synchronizer can read and write.
pub trait TaskStore {
    fn store(&self) -> Store;

    /// Every task currently in the store, each carrying this store's id.
    /// An error here abandons the whole pass.
    fn fetch_all(&mut self) -> Result<Vec<Task>, SyncError>;

    /// Creates a record from the task's content fields and returns it with
    /// this store's id and `last_modified` filled in.
    fn create(&mut self, task: &Task) -> Result<Task, SyncError>;

    /// Overwrites the record named by the task's id for this store.
    fn update(&mut self, task: &Task) -> Result<Task, SyncError>;
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub unchanged: usize,
}

impl SyncReport {
    pub fn summary(&self) -> String {
        format!(
            "{} created, {} updated, {} failed",
            self.created, self.updated, self.failed
        )
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (self.created, self.updated, self.failed)
    }
}

enum Outcome {
    Created,
    Updated,
    Unchanged,
}

/// Link-table key for a pair, always ordered (Notion id, Google id).
type PairKey = (String, String);

/// `last_modified` of both sides, Notion first, as they stood right after
/// this process last wrote the pair.
type PairStamps = (DateTime<Utc>, DateTime<Utc>);

pub struct Synchronizer<N, G> {
    notion: N,
    google: G,
    state_store: SyncStateStore,
    state: SyncState,
    written: HashMap<PairKey, PairStamps>,
    now: Box<dyn Fn() -> DateTime<Utc>>,
}

impl<N: TaskStore, G: TaskStore> Synchronizer<N, G> {
    /// Loads the link table once; later passes reuse the in-memory copy.
    pub fn new(notion: N, google: G, state_store: SyncStateStore) -> Self {
        let state = state_store.load();
        log::debug!(
            "loaded {} task links from {}",
            state.links.len(),
            state_store.path().display()
        );
        Self {
            notion,
            google,
            state_store,
            state,
            written: HashMap::new(),
            now: Box::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, now: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.now = Box::new(now);
        self
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Runs one reconciliation pass: Notion into Google, then Google into
    /// Notion, both against the same fetched snapshot.
    ///
    /// Per-task failures are counted and skipped. A failed fetch aborts
    /// before the link table is touched. The table is saved once at the
    /// end, including links made before any per-task failure.
    pub fn sync(&mut self) -> Result<SyncReport, SyncError> {
        log::info!("starting synchronization");

        let notion_tasks = fetch(&mut self.notion)?;
        let google_tasks = fetch(&mut self.google)?;
        let notion_by_id = index_by_id(&notion_tasks, Store::Notion);
        let google_by_id = index_by_id(&google_tasks, Store::Google);

        let mut pass = Pass {
            state: &mut self.state,
            written: &mut self.written,
            touched: HashSet::new(),
            report: SyncReport::default(),
        };
        pass.sweep(&notion_tasks, &google_by_id, &mut self.google);
        pass.sweep(&google_tasks, &notion_by_id, &mut self.notion);
        let report = pass.report;

        self.state.last_sync = Some((self.now)());
        log::info!("synchronization completed: {}", report.summary());
        self.state_store.save(&self.state)?;
        Ok(report)
    }
}

fn fetch<T: TaskStore>(store: &mut T) -> Result<Vec<Task>, SyncError> {
    let which = store.store();
    let tasks = store.fetch_all().map_err(|source| SyncError::Fetch {
        store: which,
        source: Box::new(source),
    })?;
    log::info!("found {} tasks in {which}", tasks.len());
    Ok(tasks)
}

fn index_by_id(tasks: &[Task], store: Store) -> HashMap<&str, &Task> {
    tasks
        .iter()
        .filter_map(|task| task.id(store).map(|id| (id, task)))
        .collect()
}

/// Orders a (source, target) couple as (Notion, Google).
fn oriented<T>(from: Store, source: T, target: T) -> (T, T) {
    match from {
        Store::Notion => (source, target),
        Store::Google => (target, source),
    }
}

fn pair_key(from: Store, source_id: &str, target_id: &str) -> PairKey {
    oriented(from, source_id.to_string(), target_id.to_string())
}

struct Pass<'a> {
    state: &'a mut SyncState,
    written: &'a mut HashMap<PairKey, PairStamps>,
    /// Pairs already written this pass; the second sweep leaves them alone.
    touched: HashSet<PairKey>,
    report: SyncReport,
}

impl Pass<'_> {
    fn sweep<T: TaskStore + ?Sized>(
        &mut self,
        sources: &[Task],
        counterparts: &HashMap<&str, &Task>,
        target: &mut T,
    ) {
        let from = target.store().other();
        for task in sources {
            let Some(source_id) = task.id(from) else {
                continue;
            };
            match self.reconcile(from, source_id, task, counterparts, target) {
                Ok(Outcome::Created) => self.report.created += 1,
                Ok(Outcome::Updated) => self.report.updated += 1,
                Ok(Outcome::Unchanged) => self.report.unchanged += 1,
                Err(err) => {
                    log::warn!(
                        "error syncing {from} task {source_id} to {}: {err}",
                        target.store()
                    );
                    self.report.failed += 1;
                }
            }
        }
    }

    fn reconcile<T: TaskStore + ?Sized>(
        &mut self,
        from: Store,
        source_id: &str,
        task: &Task,
        counterparts: &HashMap<&str, &Task>,
        target: &mut T,
    ) -> Result<Outcome, SyncError> {
        let to = target.store();
        let linked = self
            .state
            .counterpart(from, source_id)
            .and_then(|id| counterparts.get(id).map(|found| (id.to_string(), *found)));

        match linked {
            Some((target_id, counterpart)) => {
                let key = pair_key(from, source_id, &target_id);
                if self.touched.contains(&key) || !self.should_push(&key, from, task, counterpart)
                {
                    return Ok(Outcome::Unchanged);
                }
                let written = target.update(&task.linked_to(to, &target_id))?;
                log::debug!("updated {to} task {target_id} from {from} task {source_id}");
                self.remember(from, &key, task, &written);
                self.touched.insert(key);
                Ok(Outcome::Updated)
            }
            None => {
                let created = target.create(&task.detached())?;
                let target_id = created
                    .id(to)
                    .ok_or(SyncError::MissingId { store: to })?;
                self.state.link(from, source_id, target_id);
                log::debug!("created {to} task {target_id} from {from} task {source_id}");
                let key = pair_key(from, source_id, target_id);
                self.remember(from, &key, task, &created);
                self.touched.insert(key);
                Ok(Outcome::Created)
            }
        }
    }

    /// Whether `source` should overwrite its linked `counterpart`.
    ///
    /// With both timestamps known the source must be strictly newer, unless
    /// both sides still carry exactly the stamps our own last write of this
    /// pair left behind. An unknown timestamp on either side always pushes.
    fn should_push(&self, key: &PairKey, from: Store, source: &Task, counterpart: &Task) -> bool {
        match (source.last_modified, counterpart.last_modified) {
            (Some(ours), Some(theirs)) => {
                ours > theirs && self.written.get(key) != Some(&oriented(from, ours, theirs))
            }
            _ => true,
        }
    }

    fn remember(&mut self, from: Store, key: &PairKey, source: &Task, written: &Task) {
        match (source.last_modified, written.last_modified) {
            (Some(ours), Some(theirs)) => {
                self.written.insert(key.clone(), oriented(from, ours, theirs));
            }
            _ => {
                self.written.remove(key);
            }
        }
    }
}
