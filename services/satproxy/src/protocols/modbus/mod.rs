//! Modbus TCP slave emulation
//!
//! The store is served to SCADA masters through [`ModbusAdapter`] (request to
//! response, no I/O) behind [`ModbusServer`] (listeners, MBAP framing,
//! connection limits).

pub mod adapter;
pub mod codec;
pub mod constants;
pub mod pdu;
pub mod server;
pub mod writes;

pub use adapter::ModbusAdapter;
pub use codec::{MbapCodec, MbapFrame};
pub use pdu::{ExceptionCode, FunctionCode, ModbusPdu, ModbusRequest, PduBuilder};
pub use server::{spawn_heartbeat, ListenerHandle, ModbusServer, ModbusServerStats, ModbusStatsSnapshot};
pub use writes::{WriteCommand, WriteQueue};
