//! Master-facing protocol adapters

pub mod modbus;
