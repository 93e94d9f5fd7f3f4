//! Velocity windows
//! Tumbling 5-minute event counts per customer, materialized in memory and
//! committed to the state store on an interval. Rebuilt from the store on
//! startup; replaying input produces the same counts.

use anyhow::Result;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

use crate::storage::{StateStore, WindowRow};

pub struct VelocityTracker {
    window_secs: i64,
    store: Arc<StateStore>,
    state: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// window_start -> count, per customer. BTreeMap keeps the newest
    /// window at the back for the current-velocity projection.
    windows: HashMap<String, BTreeMap<i64, u64>>,
    dirty: HashMap<(String, i64), u64>,
}

impl VelocityTracker {
    pub fn new(store: Arc<StateStore>, window_secs: i64) -> Self {
        Self {
            window_secs: window_secs.max(1),
            store,
            state: Mutex::new(Inner::default()),
        }
    }

    /// Rebuild the in-memory view from the persisted windows.
    pub fn restore(&self) -> Result<usize> {
        let rows = self.store.load_windows()?;
        let mut state = self.state.lock();
        for row in &rows {
            state
                .windows
                .entry(row.customer_id.clone())
                .or_default()
                .insert(row.window_start, row.event_count);
        }
        if !rows.is_empty() {
            info!(rows = rows.len(), "velocity windows restored");
        }
        Ok(rows.len())
    }

    /// Count one event into its tumbling window and return that window's
    /// count. The count includes the triggering event: the k-th event of a
    /// window observes k.
    pub fn observe(&self, customer_id: &str, timestamp: NaiveDateTime) -> u64 {
        let epoch = timestamp.and_utc().timestamp();
        let window_start = epoch - epoch.rem_euclid(self.window_secs);

        let mut state = self.state.lock();
        let windows = state.windows.entry(customer_id.to_string()).or_default();
        let count = windows
            .entry(window_start)
            .and_modify(|c| *c += 1)
            .or_insert(1);
        let count = *count;
        state
            .dirty
            .insert((customer_id.to_string(), window_start), count);
        count
    }

    /// Latest observed count for the customer (the newest window, open or
    /// closed).
    pub fn current(&self, customer_id: &str) -> Option<u64> {
        let state = self.state.lock();
        state
            .windows
            .get(customer_id)
            .and_then(|w| w.iter().next_back().map(|(_, count)| *count))
    }

    /// Commit dirty counts to the store. Called from the commit ticker and
    /// once more on shutdown.
    pub fn flush(&self) -> Result<usize> {
        let drained: Vec<WindowRow> = {
            let mut state = self.state.lock();
            state
                .dirty
                .drain()
                .map(|((customer_id, window_start), event_count)| WindowRow {
                    customer_id,
                    window_start,
                    event_count,
                })
                .collect()
        };
        let flushed = drained.len();
        self.store.commit_windows(&drained)?;
        Ok(flushed)
    }

    /// Drop in-memory windows older than `keep` windows behind each
    /// customer's newest; the store is pruned separately.
    pub fn compact(&self, keep: usize) {
        let mut state = self.state.lock();
        for windows in state.windows.values_mut() {
            while windows.len() > keep.max(1) {
                let oldest = *windows.keys().next().unwrap();
                windows.remove(&oldest);
            }
        }
    }
}
