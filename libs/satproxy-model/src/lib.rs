//! Register model for the satellite Modbus proxy
//!
//! Register definitions, per-outstation maps and the byte-order/scaling codec
//! shared by the decode, reconcile and serve paths.

pub mod byte_order;
pub mod data_type;
pub mod error;
pub mod map;
pub mod register;

pub use byte_order::ByteOrder;
pub use data_type::DataType;
pub use error::{ModelError, Result};
pub use map::RegisterMap;
pub use register::{DeviceIdentity, RegisterDefinition, RegisterKey, RegisterKind};
