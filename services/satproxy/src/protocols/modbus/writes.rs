//! Writes captured from the SCADA master
//!
//! The proxy never writes its own store from the Modbus side. Accepted writes
//! wait here until the cloud collaborator drains them and forwards them over
//! the satellite link.

use dashmap::DashMap;
use parking_lot::Mutex;
use satproxy_model::RegisterKind;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// One register write requested by the master
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteCommand {
    pub outstation_id: String,
    pub kind: RegisterKind,
    pub address: u16,
    /// Compact index of the written definition
    pub index: u32,
    pub raw: Vec<u16>,
    /// Engineering value of `raw` under the definition's scaling
    pub value: f64,
    pub requested_at_ms: i64,
}

/// Bounded per-outstation queue of pending writes
pub struct WriteQueue {
    queues: DashMap<String, Mutex<VecDeque<WriteCommand>>>,
    capacity: usize,
}

impl WriteQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: DashMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue all commands of one request, or none when they do not fit
    pub fn push_all(&self, outstation_id: &str, commands: Vec<WriteCommand>) -> bool {
        let entry = self
            .queues
            .entry(outstation_id.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut queue = entry.lock();
        if queue.len() + commands.len() > self.capacity {
            warn!(
                "Write queue for {} full ({} queued), rejecting {} commands",
                outstation_id,
                queue.len(),
                commands.len()
            );
            return false;
        }
        debug!("Queued {} writes for {}", commands.len(), outstation_id);
        queue.extend(commands);
        true
    }

    /// Take every queued command for the outstation, oldest first
    pub fn drain(&self, outstation_id: &str) -> Vec<WriteCommand> {
        self.queues
            .get(outstation_id)
            .map(|q| q.lock().drain(..).collect())
            .unwrap_or_default()
    }

    pub fn pending(&self, outstation_id: &str) -> usize {
        self.queues
            .get(outstation_id)
            .map(|q| q.lock().len())
            .unwrap_or(0)
    }

    pub fn total_pending(&self) -> usize {
        self.queues.iter().map(|q| q.lock().len()).sum()
    }

    /// Drop queues of outstations that are no longer configured
    pub fn retain(&self, keep: impl Fn(&str) -> bool) {
        self.queues.retain(|id, _| keep(id));
    }
}
