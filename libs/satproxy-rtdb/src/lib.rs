//! Realtime register store for the satellite Modbus proxy
//!
//! # Key Components
//!
//! - **RegisterStore**: per-outstation table with copy-then-publish writes
//! - **StoreView**: one consistent read view, staleness applied
//! - **TimeProvider**: injectable clock for staleness

pub mod error;
pub mod store;
pub mod time;
pub mod value;

pub use error::{Result, RtdbError};
pub use store::{OutstationSummary, RegisterStore, StoreTransaction, StoreView};
pub use time::{FixedTimeProvider, SystemTimeProvider, TimeProvider};
pub use value::{OutstationSnapshot, RegisterValue, UnknownField, UnknownReason, Validity};

/// Helper functions for common operations
pub mod helpers {
    use super::{RegisterStore, SystemTimeProvider};
    use std::sync::Arc;
    use std::time::Duration;

    /// Create a store on the system clock with a 15 minute staleness threshold
    pub fn create_test_store() -> Arc<RegisterStore> {
        Arc::new(RegisterStore::new(
            Some(Duration::from_secs(900)),
            Arc::new(SystemTimeProvider),
        ))
    }
}
