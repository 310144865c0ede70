//! Durable storage for `{last_voted_view, last_started_view}`.
//!
//! A crash-safety invariant holds: any vote or proposal emitted to the
//! network is preceded by a successful write here, so recovery never
//! re-uses a view the replica already voted in. Calls are synchronous
//! and ordered, matching the teacher's `RwLock`-guarded
//! `MemoryBlockStore` for the in-memory case; `FilePersister` adds a
//! real fsync'd write for the on-disk case the in-memory store can't
//! survive a restart without.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::HotStuffError;
use crate::types::View;

pub trait Persister: Send + Sync {
    fn last_voted_view(&self) -> Result<View, HotStuffError>;
    fn put_voted_view(&self, view: View) -> Result<(), HotStuffError>;

    fn last_started_view(&self) -> Result<View, HotStuffError>;
    fn put_started_view(&self, view: View) -> Result<(), HotStuffError>;
}

#[derive(Default)]
pub struct InMemoryPersister {
    state: RwLock<PersistedState>,
}

#[derive(Clone, Copy, Default, Serialize, Deserialize)]
struct PersistedState {
    last_voted_view: View,
    last_started_view: View,
}

impl InMemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persister for InMemoryPersister {
    fn last_voted_view(&self) -> Result<View, HotStuffError> {
        Ok(self.state.read().expect("persister lock poisoned").last_voted_view)
    }

    fn put_voted_view(&self, view: View) -> Result<(), HotStuffError> {
        let mut state = self.state.write().expect("persister lock poisoned");
        if view <= state.last_voted_view {
            return Err(HotStuffError::InvariantViolation(format!(
                "last_voted_view must strictly increase: {view} <= {}",
                state.last_voted_view
            )));
        }
        state.last_voted_view = view;
        Ok(())
    }

    fn last_started_view(&self) -> Result<View, HotStuffError> {
        Ok(self.state.read().expect("persister lock poisoned").last_started_view)
    }

    fn put_started_view(&self, view: View) -> Result<(), HotStuffError> {
        let mut state = self.state.write().expect("persister lock poisoned");
        if view > state.last_started_view {
            state.last_started_view = view;
        }
        Ok(())
    }
}

/// Writes the persisted state as JSON to a single file on every call,
/// via write-to-temp-then-rename so a crash mid-write cannot leave a
/// torn file behind.
pub struct FilePersister {
    path: PathBuf,
    state: RwLock<PersistedState>,
}

impl FilePersister {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HotStuffError> {
        let path = path.into();
        let state = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)
                .map_err(|e| HotStuffError::Persistence(format!("corrupt persister state: {e}")))?
        } else {
            PersistedState::default()
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    fn write_through(&self, state: PersistedState) -> Result<(), HotStuffError> {
        let tmp_path = tmp_path_for(&self.path);
        let content = serde_json::to_string(&state)
            .map_err(|e| HotStuffError::Persistence(format!("serialize persister state: {e}")))?;
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

impl Persister for FilePersister {
    fn last_voted_view(&self) -> Result<View, HotStuffError> {
        Ok(self.state.read().expect("persister lock poisoned").last_voted_view)
    }

    fn put_voted_view(&self, view: View) -> Result<(), HotStuffError> {
        let mut guard = self.state.write().expect("persister lock poisoned");
        if view <= guard.last_voted_view {
            return Err(HotStuffError::InvariantViolation(format!(
                "last_voted_view must strictly increase: {view} <= {}",
                guard.last_voted_view
            )));
        }
        let mut next = *guard;
        next.last_voted_view = view;
        self.write_through(next)?;
        *guard = next;
        Ok(())
    }

    fn last_started_view(&self) -> Result<View, HotStuffError> {
        Ok(self.state.read().expect("persister lock poisoned").last_started_view)
    }

    fn put_started_view(&self, view: View) -> Result<(), HotStuffError> {
        let mut guard = self.state.write().expect("persister lock poisoned");
        if view <= guard.last_started_view {
            return Ok(());
        }
        let mut next = *guard;
        next.last_started_view = view;
        self.write_through(next)?;
        *guard = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_rejects_non_increasing_vote() {
        let persister = InMemoryPersister::new();
        persister.put_voted_view(5).unwrap();
        assert!(persister.put_voted_view(5).is_err());
        assert!(persister.put_voted_view(4).is_err());
        persister.put_voted_view(6).unwrap();
        assert_eq!(persister.last_voted_view().unwrap(), 6);
    }

    #[test]
    fn file_persister_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let persister = FilePersister::open(&path).unwrap();
            persister.put_voted_view(3).unwrap();
            persister.put_started_view(4).unwrap();
        }

        let reopened = FilePersister::open(&path).unwrap();
        assert_eq!(reopened.last_voted_view().unwrap(), 3);
        assert_eq!(reopened.last_started_view().unwrap(), 4);
    }
}
