//! Ingest pipeline
//!
//! Entry point for the satellite transport: raw bytes in, reconciled store
//! out. Every outcome is counted and logged here; no error escapes past the
//! message that caused it.

use super::reconcile::{ReconcileResult, Reconciler};
use super::wire::PayloadDecoder;
use crate::error::{Result, SatProxyError};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Ingest counters
#[derive(Debug, Default)]
pub struct IngestStats {
    pub received: AtomicU64,
    pub accepted_messages: AtomicU64,
    pub malformed: AtomicU64,
    pub unknown_outstation: AtomicU64,
    pub duplicates: AtomicU64,
    pub unknown_fields: AtomicU64,
    pub parked: AtomicU64,
    pub parked_dropped: AtomicU64,
    pub replayed: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStatsSnapshot {
    pub received: u64,
    pub accepted_messages: u64,
    pub malformed: u64,
    pub unknown_outstation: u64,
    pub duplicates: u64,
    pub unknown_fields: u64,
    pub parked: u64,
    pub parked_dropped: u64,
    pub replayed: u64,
    /// Payloads currently waiting for their outstation to be configured
    pub parked_pending: usize,
}

impl IngestStats {
    fn snapshot(&self, parked_pending: usize) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            accepted_messages: self.accepted_messages.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown_outstation: self.unknown_outstation.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            unknown_fields: self.unknown_fields.load(Ordering::Relaxed),
            parked: self.parked.load(Ordering::Relaxed),
            parked_dropped: self.parked_dropped.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            parked_pending,
        }
    }
}

/// Payload held back because its outstation was not configured
#[derive(Debug, Clone)]
struct ParkedPayload {
    outstation_id: String,
    bytes: Bytes,
}

/// Result of a replay pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySummary {
    pub replayed: usize,
    pub failed: usize,
    pub still_parked: usize,
}

pub struct IngestPipeline {
    decoder: PayloadDecoder,
    reconciler: Reconciler,
    stats: IngestStats,
    parked: Mutex<VecDeque<ParkedPayload>>,
    parked_capacity: usize,
}

impl IngestPipeline {
    pub fn new(decoder: PayloadDecoder, reconciler: Reconciler, parked_capacity: usize) -> Self {
        Self {
            decoder,
            reconciler,
            stats: IngestStats::default(),
            parked: Mutex::new(VecDeque::new()),
            parked_capacity,
        }
    }

    /// Decode and apply one payload received for `outstation_id`
    pub fn ingest(&self, outstation_id: &str, bytes: impl Into<Bytes>) -> Result<ReconcileResult> {
        let bytes = bytes.into();
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        self.process(outstation_id, bytes, true)
    }

    fn process(&self, outstation_id: &str, bytes: Bytes, park: bool) -> Result<ReconcileResult> {
        let outcome = self
            .decoder
            .decode(outstation_id, &bytes)
            .and_then(|message| self.reconciler.apply(&message));

        match outcome {
            Ok(result) => {
                self.stats.accepted_messages.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .duplicates
                    .fetch_add(result.duplicates as u64, Ordering::Relaxed);
                self.stats
                    .unknown_fields
                    .fetch_add(result.unknown_fields as u64, Ordering::Relaxed);
                debug!(
                    "{}: seq {} {} accepted={} duplicates={} unknown={} pending={}",
                    outstation_id,
                    result.sequence,
                    if result.snapshot { "snapshot" } else { "delta" },
                    result.accepted,
                    result.duplicates,
                    result.unknown_fields,
                    result.pending_marked
                );
                Ok(result)
            },
            Err(SatProxyError::UnknownOutstation(id)) => {
                self.stats.unknown_outstation.fetch_add(1, Ordering::Relaxed);
                if park {
                    warn!("Payload for unknown outstation {} parked", id);
                    self.park(ParkedPayload {
                        outstation_id: id.clone(),
                        bytes,
                    });
                }
                Err(SatProxyError::UnknownOutstation(id))
            },
            Err(SatProxyError::MalformedPayload(reason)) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Dropped malformed payload from {} ({} bytes): {}",
                    outstation_id,
                    bytes.len(),
                    reason
                );
                Err(SatProxyError::MalformedPayload(reason))
            },
            Err(other) => {
                warn!("Ingest failed for {}: {}", outstation_id, other);
                Err(other)
            },
        }
    }

    fn park(&self, payload: ParkedPayload) {
        let mut parked = self.parked.lock();
        if parked.len() >= self.parked_capacity {
            if let Some(dropped) = parked.pop_front() {
                self.stats.parked_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Parked queue full, dropped oldest payload for {}",
                    dropped.outstation_id
                );
            }
        }
        if self.parked_capacity > 0 {
            parked.push_back(payload);
            self.stats.parked.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Feed parked payloads whose outstation now resolves; keep the rest
    pub fn replay_parked(&self) -> ReplaySummary {
        let drained: Vec<ParkedPayload> = self.parked.lock().drain(..).collect();
        let mut summary = ReplaySummary::default();
        let mut keep = Vec::new();

        for payload in drained {
            if !self.decoder.knows(&payload.outstation_id) {
                keep.push(payload);
                continue;
            }
            match self.process(&payload.outstation_id, payload.bytes, false) {
                Ok(_) => summary.replayed += 1,
                Err(_) => summary.failed += 1,
            }
        }
        self.stats
            .replayed
            .fetch_add(summary.replayed as u64, Ordering::Relaxed);

        summary.still_parked = keep.len();
        if !keep.is_empty() {
            let mut parked = self.parked.lock();
            // Anything parked during the replay is newer than what we kept
            for payload in keep.into_iter().rev() {
                parked.push_front(payload);
            }
            while parked.len() > self.parked_capacity {
                parked.pop_front();
                self.stats.parked_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        if summary.replayed > 0 || summary.failed > 0 {
            info!(
                "Replayed {} parked payloads ({} failed, {} still parked)",
                summary.replayed, summary.failed, summary.still_parked
            );
        }
        summary
    }

    pub fn parked_len(&self) -> usize {
        self.parked.lock().len()
    }

    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot(self.parked_len())
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::config::{ContextResolver, OutstationContext, ResolverState};
    use crate::core::ingest::wire::{CompactFrameV1, DecodedFrame, FieldUpdate};
    use satproxy_model::{DataType, RegisterDefinition, RegisterKind, RegisterMap};
    use satproxy_rtdb::{FixedTimeProvider, RegisterStore};
    use std::sync::Arc;
    use std::time::Duration;

    const TS: i64 = 1_700_000_000_000;

    fn state(ids: &[&str]) -> ResolverState {
        let contexts = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let map = RegisterMap::new(
                    *id,
                    1,
                    vec![RegisterDefinition::new(
                        0,
                        RegisterKind::HoldingRegister,
                        100,
                        DataType::U16,
                    )],
                )
                .unwrap();
                let listen = format!("127.0.0.1:{}", 5020 + i).parse().unwrap();
                OutstationContext::new(map, listen, false)
            })
            .collect();
        ResolverState::build(contexts).unwrap()
    }

    fn build_pipeline(
        ids: &[&str],
        parked_capacity: usize,
    ) -> (IngestPipeline, Arc<ContextResolver>, Arc<RegisterStore>) {
        let resolver = Arc::new(ContextResolver::new(state(ids)));
        let store = Arc::new(RegisterStore::new(
            Some(Duration::from_secs(900)),
            Arc::new(FixedTimeProvider::new(TS)),
        ));
        let pipeline = IngestPipeline::new(
            PayloadDecoder::new(resolver.clone(), 512),
            Reconciler::new(resolver.clone(), store.clone()),
            parked_capacity,
        );
        (pipeline, resolver, store)
    }

    fn frame(value: u16, ts: i64) -> Vec<u8> {
        CompactFrameV1
            .encode(&DecodedFrame {
                sequence: value,
                timestamp_ms: ts,
                snapshot: false,
                fields: vec![FieldUpdate::word(0, value, ts)],
            })
            .unwrap()
    }

    #[test]
    fn test_bad_message_does_not_stop_ingest() {
        let (pipeline, _, store) = build_pipeline(&["A1"], 8);

        let mut corrupt = frame(1, TS);
        corrupt[12] ^= 0x55;
        assert!(matches!(
            pipeline.ingest("A1", corrupt),
            Err(SatProxyError::MalformedPayload(_))
        ));
        pipeline.ingest("A1", frame(2, TS)).unwrap();
        let dup = pipeline.ingest("A1", frame(3, TS)).unwrap();
        assert_eq!(dup.duplicates, 1);

        assert_eq!(store.get("A1", 0).unwrap().raw, vec![2]);
        let stats = pipeline.stats();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.accepted_messages, 2);
        assert_eq!(stats.duplicates, 1);
    }

    #[test]
    fn test_unknown_outstation_parked_and_replayed() {
        let (pipeline, resolver, store) = build_pipeline(&["A1"], 8);

        assert!(matches!(
            pipeline.ingest("B2", frame(5, TS)),
            Err(SatProxyError::UnknownOutstation(_))
        ));
        assert_eq!(pipeline.parked_len(), 1);

        // Nothing resolves yet: the payload stays parked
        let summary = pipeline.replay_parked();
        assert_eq!(summary.still_parked, 1);
        assert_eq!(summary.replayed, 0);

        resolver.reload(state(&["A1", "B2"]));
        let summary = pipeline.replay_parked();
        assert_eq!(summary.replayed, 1);
        assert_eq!(pipeline.parked_len(), 0);
        assert_eq!(store.get("B2", 0).unwrap().raw, vec![5]);
        assert_eq!(pipeline.stats().replayed, 1);
    }

    #[test]
    fn test_parked_queue_is_bounded() {
        let (pipeline, _, _) = build_pipeline(&["A1"], 2);
        for value in 0..5 {
            let _ = pipeline.ingest("Z9", frame(value, TS));
        }
        let stats = pipeline.stats();
        assert_eq!(stats.parked_pending, 2);
        assert_eq!(stats.parked_dropped, 3);
        assert_eq!(stats.unknown_outstation, 5);
    }
}
