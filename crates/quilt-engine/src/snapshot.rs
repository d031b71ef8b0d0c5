//! JSON snapshot persistence
//!
//! The whole engine round-trips through one versioned snapshot: the slot
//! arena (promises keep their registered wake tokens), the automation
//! cache, the parked table, the token counter, and every session's queue
//! state. The datastore's canonical-form index and dependent map are derived
//! data and are rebuilt on load.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use quilt_core::{Datastore, QuiltError, Result, Slot, WakeToken};

use crate::scheduler::{AutomationCache, ParkedContext, Scheduler};
use crate::session::Session;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialisable image of a whole scheduler.
#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub slots: Vec<Slot>,
    pub automation: AutomationCache,
    pub parked: Vec<(WakeToken, ParkedContext)>,
    pub next_token: u64,
    pub sessions: Vec<Session>,
}

impl Snapshot {
    pub fn take(scheduler: &Scheduler) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            slots: scheduler.db.slots().to_vec(),
            automation: scheduler.automation.clone(),
            parked: scheduler
                .parked
                .iter()
                .map(|(token, parked)| (*token, parked.clone()))
                .collect(),
            next_token: scheduler.next_token,
            sessions: scheduler.sessions.values().cloned().collect(),
        }
    }

    pub fn restore(self) -> Result<Scheduler> {
        if self.version != SNAPSHOT_VERSION {
            return Err(QuiltError::Parse(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        let db = Datastore::from_slots(self.slots)?;
        let parked: HashMap<WakeToken, ParkedContext> = self.parked.into_iter().collect();
        let sessions = self
            .sessions
            .into_iter()
            .map(|session| (session.id, session))
            .collect();
        Ok(Scheduler {
            db,
            automation: self.automation,
            parked,
            next_token: self.next_token,
            sessions,
        })
    }
}

/// Write `scheduler` to `path` as pretty JSON.
pub fn save_state(scheduler: &Scheduler, path: &Path) -> Result<()> {
    let snapshot = Snapshot::take(scheduler);
    let json = serde_json::to_string_pretty(&snapshot)?;
    std::fs::write(path, json)?;
    info!(?path, slots = snapshot.slots.len(), "snapshot saved");
    Ok(())
}

/// Restore a scheduler from the snapshot at `path`.
pub fn load_state(path: &Path) -> Result<Scheduler> {
    let json = std::fs::read_to_string(path)?;
    let snapshot: Snapshot = serde_json::from_str(&json)?;
    info!(?path, slots = snapshot.slots.len(), "snapshot loaded");
    snapshot.restore()
}
