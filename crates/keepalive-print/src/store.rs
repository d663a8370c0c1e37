// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Durable per-printer state backed by a single JSON document.
//
// Every access goes through `read` or `update`, each of which holds the lock
// for one short critical section. `update` persists before the lock is
// released, so no reader ever observes a change that is not yet on disk. A
// change whose persist fails is rolled back before the lock is released.
// The file is replaced atomically (temp file in the same directory, then
// rename).
//
// The write and fsync run on the calling thread, async callers included. The
// document is a few KiB per printer and writes happen at most once per poll
// or print, so the stall is bounded by one small fsync.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use keepalive_core::error::{KeepaliveError, Result};
use keepalive_core::types::PrinterState;

const STATE_VERSION: u32 = 1;

/// On-disk layout: records keyed by printer id.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    printers: BTreeMap<String, PrinterState>,
}

pub struct StateStore {
    /// `None` keeps everything in memory (tests, dry runs).
    path: Option<PathBuf>,
    doc: Mutex<StateDocument>,
}

impl StateStore {
    /// Open (or create) the state file at `path`.
    ///
    /// A file that cannot be parsed is moved aside to `<path>.corrupt` and the
    /// store starts empty.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let doc = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<StateDocument>(&raw) {
                Ok(doc) => {
                    info!(printers = doc.printers.len(), "state loaded");
                    doc
                }
                Err(e) => {
                    let aside = corrupt_path(&path);
                    warn!(error = %e, moved_to = %aside.display(), "state file is corrupt; starting empty");
                    std::fs::rename(&path, &aside)?;
                    StateDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no state file yet; starting empty");
                StateDocument::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: Some(path),
            doc: Mutex::new(doc),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: Mutex::new(StateDocument::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Create records for any ids that do not have one yet, anchored at `now`.
    pub fn ensure<'a>(&self, ids: impl IntoIterator<Item = &'a str>, now: DateTime<Utc>) -> Result<()> {
        let mut doc = self.lock();
        let mut created = Vec::new();
        for id in ids {
            if !doc.printers.contains_key(id) {
                doc.printers.insert(id.to_owned(), PrinterState::new(now));
                created.push(id.to_owned());
            }
        }
        if created.is_empty() {
            return Ok(());
        }
        debug!(created = created.len(), "state records created");
        if let Err(e) = self.persist(&doc) {
            for id in &created {
                doc.printers.remove(id);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Run `f` against the record for `id`, creating it first if needed.
    pub fn read<R>(&self, id: &str, now: DateTime<Utc>, f: impl FnOnce(&PrinterState) -> R) -> Result<R> {
        let mut doc = self.lock();
        if !doc.printers.contains_key(id) {
            doc.printers.insert(id.to_owned(), PrinterState::new(now));
            if let Err(e) = self.persist(&doc) {
                doc.printers.remove(id);
                return Err(e);
            }
        }
        let state = doc
            .printers
            .get(id)
            .ok_or_else(|| KeepaliveError::UnknownPrinter(id.to_owned()))?;
        Ok(f(state))
    }

    /// Mutate the record for `id` and persist before releasing the lock.
    ///
    /// `f` runs on a copy; the copy replaces the record only once it is on
    /// disk. On error the previous record is left in place.
    pub fn update<R>(
        &self,
        id: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut PrinterState) -> R,
    ) -> Result<R> {
        let mut doc = self.lock();
        let mut next = doc
            .printers
            .get(id)
            .cloned()
            .unwrap_or_else(|| PrinterState::new(now));
        let out = f(&mut next);

        let previous = doc.printers.insert(id.to_owned(), next);
        if let Err(e) = self.persist(&doc) {
            warn!(printer = id, error = %e, "state not persisted; change rolled back");
            match previous {
                Some(record) => doc.printers.insert(id.to_owned(), record),
                None => doc.printers.remove(id),
            };
            return Err(e);
        }
        Ok(out)
    }

    /// Copy of the record, without creating one.
    pub fn snapshot(&self, id: &str) -> Option<PrinterState> {
        self.lock().printers.get(id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, StateDocument> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, doc: &StateDocument) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let body = serde_json::to_vec_pretty(&StateDocumentRef {
            version: STATE_VERSION,
            printers: &doc.printers,
        })?;

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| KeepaliveError::StatePersistence(format!("temp file in {}: {e}", dir.display())))?;
        tmp.write_all(&body)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| KeepaliveError::StatePersistence(format!("write: {e}")))?;
        tmp.persist(path)
            .map_err(|e| KeepaliveError::StatePersistence(format!("rename into {}: {e}", path.display())))?;
        Ok(())
    }
}

/// Borrowing twin of `StateDocument` so persisting never clones records.
#[derive(Serialize)]
struct StateDocumentRef<'a> {
    version: u32,
    printers: &'a BTreeMap<String, PrinterState>,
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".corrupt");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use keepalive_core::types::{KeepaliveResult, Template};

    #[test]
    fn records_are_created_once_with_anchor() {
        let store = StateStore::in_memory();
        let t0 = Utc::now();
        store.ensure(["a", "b"], t0).unwrap();
        store.ensure(["a"], t0 + Duration::hours(5)).unwrap();

        let anchor = store.read("a", t0 + Duration::hours(9), |s| s.history_anchor_at).unwrap();
        assert_eq!(anchor, Some(t0));

        let lazily = store.read("c", t0 + Duration::hours(1), |s| s.history_anchor_at).unwrap();
        assert_eq!(lazily, Some(t0 + Duration::hours(1)));
    }

    #[test]
    fn updates_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let t0 = Utc::now();

        {
            let store = StateStore::open(&path).expect("open");
            store
                .update("office", t0, |s| {
                    s.record_keepalive_success(t0);
                    s.template_override = Some(Template::ColorBars);
                })
                .expect("update");
        }

        let reopened = StateStore::open(&path).expect("reopen");
        let state = reopened.snapshot("office").expect("record persisted");
        assert_eq!(state.keepalive_print_count, 1);
        assert_eq!(state.last_keepalive_result, KeepaliveResult::Success);
        assert_eq!(state.template_override, Some(Template::ColorBars));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"version\": 1"));
    }

    #[test]
    fn corrupt_file_is_moved_aside() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ definitely not json").unwrap();

        let store = StateStore::open(&path).expect("open despite corruption");
        assert!(store.snapshot("anything").is_none());
        assert!(dir.path().join("state.json.corrupt").exists());
        assert!(!path.exists());

        store.ensure(["fresh"], Utc::now()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn missing_parent_directory_is_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/deeper/state.json");
        let store = StateStore::open(&path).expect("open");
        store.ensure(["x"], Utc::now()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn failed_persist_rolls_back_the_change() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state_dir = dir.path().join("state");
        let path = state_dir.join("state.json");
        let t0 = Utc::now();

        let store = StateStore::open(&path).expect("open");
        store.ensure(["office"], t0).expect("ensure");
        std::fs::remove_dir_all(&state_dir).expect("remove state dir");

        let result = store.update("office", t0, |s| {
            s.enabled_override = Some(false);
            s.record_keepalive_success(t0);
        });
        assert!(matches!(result, Err(KeepaliveError::StatePersistence(_))));

        let state = store.snapshot("office").expect("record kept");
        assert_eq!(state.enabled_override, None);
        assert_eq!(state.keepalive_print_count, 0);

        assert!(store.update("garage", t0, |_| ()).is_err());
        assert!(store.snapshot("garage").is_none());
        assert!(store.read("attic", t0, |_| ()).is_err());
        assert!(store.snapshot("attic").is_none());
        assert!(store.ensure(["cellar"], t0).is_err());
        assert!(store.snapshot("cellar").is_none());
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let store = std::sync::Arc::new(StateStore::in_memory());
        let t0 = Utc::now();
        store.ensure(["p"], t0).unwrap();

        let clone = std::sync::Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _ = clone.update("p", t0, |_| panic!("boom"));
        })
        .join();

        let count = store.read("p", t0, |s| s.keepalive_print_count).unwrap();
        assert_eq!(count, 0);
    }
}
