//! Satellite ingest: decode, reconcile, count

pub mod pipeline;
pub mod reconcile;
pub mod wire;

pub use pipeline::{IngestPipeline, IngestStats, IngestStatsSnapshot, ReplaySummary};
pub use reconcile::{ReconcileResult, Reconciler};
pub use wire::{
    CompactFrameV1, DecodedFrame, FieldUpdate, FieldWidth, MalformedReason, PayloadDecoder,
    PayloadMessage, WireFormat,
};
