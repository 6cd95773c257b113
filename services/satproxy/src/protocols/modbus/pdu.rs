//! Modbus PDU types
//!
//! Function codes and exception codes are closed enums; anything the proxy
//! does not serve lands in [`FunctionCode::Unsupported`] and is answered with
//! `IllegalFunction`.

use super::constants::{
    COIL_OFF, COIL_ON, MAX_PDU_SIZE, MEI_READ_DEVICE_ID, MODBUS_MAX_READ_COILS,
    MODBUS_MAX_READ_REGISTERS, MODBUS_MAX_WRITE_COILS, MODBUS_MAX_WRITE_REGISTERS,
};
use crate::error::{Result, SatProxyError};
use bytes::Buf;
use satproxy_model::RegisterKind;
use std::fmt;
use tracing::trace;

/// Function codes answered by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
    /// FC43 with MEI type 0x0E
    ReadDeviceIdentification,
    Unsupported(u8),
}

impl From<u8> for FunctionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => Self::ReadCoils,
            0x02 => Self::ReadDiscreteInputs,
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            0x05 => Self::WriteSingleCoil,
            0x06 => Self::WriteSingleRegister,
            0x0F => Self::WriteMultipleCoils,
            0x10 => Self::WriteMultipleRegisters,
            0x2B => Self::ReadDeviceIdentification,
            other => Self::Unsupported(other),
        }
    }
}

impl FunctionCode {
    pub fn code(&self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::ReadDeviceIdentification => 0x2B,
            Self::Unsupported(code) => *code,
        }
    }

    /// Register table addressed by this function, if any
    pub fn register_kind(&self) -> Option<RegisterKind> {
        match self {
            Self::ReadCoils | Self::WriteSingleCoil | Self::WriteMultipleCoils => {
                Some(RegisterKind::Coil)
            },
            Self::ReadDiscreteInputs => Some(RegisterKind::DiscreteInput),
            Self::ReadHoldingRegisters
            | Self::WriteSingleRegister
            | Self::WriteMultipleRegisters => Some(RegisterKind::HoldingRegister),
            Self::ReadInputRegisters => Some(RegisterKind::InputRegister),
            Self::ReadDeviceIdentification | Self::Unsupported(_) => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
            Self::ReadDeviceIdentification => "Read Device Identification",
            Self::Unsupported(_) => "Unknown Function",
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FC{:02X} ({})", self.code(), self.description())
    }
}

/// Exception codes returned to the master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
}

impl ExceptionCode {
    pub fn code(&self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::SlaveDeviceFailure => 0x04,
            Self::GatewayPathUnavailable => 0x0A,
            Self::GatewayTargetFailedToRespond => 0x0B,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::SlaveDeviceFailure),
            0x0A => Some(Self::GatewayPathUnavailable),
            0x0B => Some(Self::GatewayTargetFailedToRespond),
            _ => None,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::SlaveDeviceFailure => "slave device failure",
            Self::GatewayPathUnavailable => "gateway path unavailable",
            Self::GatewayTargetFailedToRespond => "gateway target failed to respond",
        };
        write!(f, "{:02X} {}", self.code(), name)
    }
}

/// Response PDU on a fixed stack buffer
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(SatProxyError::protocol("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<()> {
        self.extend(&value.to_be_bytes())
    }

    #[inline]
    pub fn extend(&mut self, data: &[u8]) -> Result<()> {
        if self.len + data.len() > MAX_PDU_SIZE {
            return Err(SatProxyError::protocol(format!(
                "PDU would exceed max size: {} + {} > {}",
                self.len,
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        (self.len > 0).then(|| self.data[0])
    }

    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code().is_some_and(|fc| fc & 0x80 != 0)
    }

    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        (self.is_exception() && self.len > 1).then(|| self.data[1])
    }

    /// `fc | 0x80` followed by the exception code
    pub fn exception(function: u8, code: ExceptionCode) -> Self {
        let mut pdu = Self::new();
        pdu.data[0] = function | 0x80;
        pdu.data[1] = code.code();
        pdu.len = 2;
        pdu
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> Result<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    #[inline]
    pub fn address(mut self, addr: u16) -> Result<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    #[inline]
    pub fn quantity(mut self, qty: u16) -> Result<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    #[inline]
    pub fn byte(mut self, b: u8) -> Result<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    #[inline]
    pub fn data(mut self, data: &[u8]) -> Result<Self> {
        self.pdu.extend(data)?;
        Ok(self)
    }

    #[inline]
    pub fn build(self) -> ModbusPdu {
        if let Some(fc) = self.pdu.function_code() {
            trace!("PDU built: FC={:02X}, total_len={}", fc, self.pdu.len());
        }
        self.pdu
    }
}

/// A validated request PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusRequest {
    /// FC01..FC04
    Read {
        function: FunctionCode,
        address: u16,
        quantity: u16,
    },
    /// FC05 with the coil state already decoded
    WriteSingleCoil { address: u16, on: bool },
    /// FC06
    WriteSingleRegister { address: u16, value: u16 },
    /// FC15, one bool per coil
    WriteMultipleCoils { address: u16, values: Vec<bool> },
    /// FC16
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
    /// FC43/14
    ReadDeviceIdentification { read_code: u8, object_id: u8 },
}

impl ModbusRequest {
    /// Validate the request structure
    ///
    /// Unknown functions give `IllegalFunction`; bad quantities or byte counts
    /// give `IllegalDataValue`. Address checks belong to the adapter.
    pub fn parse(pdu: &[u8]) -> std::result::Result<Self, ExceptionCode> {
        let mut buf = pdu;
        if !buf.has_remaining() {
            return Err(ExceptionCode::IllegalFunction);
        }
        let function = FunctionCode::from(buf.get_u8());

        match function {
            FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters => {
                let (address, quantity) = read_pair(&mut buf)?;
                let limit = if function.register_kind().is_some_and(|k| k.is_bit()) {
                    MODBUS_MAX_READ_COILS
                } else {
                    MODBUS_MAX_READ_REGISTERS
                };
                check_quantity(quantity, limit)?;
                check_range(address, quantity)?;
                finish(buf)?;
                Ok(Self::Read {
                    function,
                    address,
                    quantity,
                })
            },
            FunctionCode::WriteSingleCoil => {
                let (address, value) = read_pair(&mut buf)?;
                finish(buf)?;
                let on = match value {
                    COIL_ON => true,
                    COIL_OFF => false,
                    _ => return Err(ExceptionCode::IllegalDataValue),
                };
                Ok(Self::WriteSingleCoil { address, on })
            },
            FunctionCode::WriteSingleRegister => {
                let (address, value) = read_pair(&mut buf)?;
                finish(buf)?;
                Ok(Self::WriteSingleRegister { address, value })
            },
            FunctionCode::WriteMultipleCoils => {
                let (address, quantity) = read_pair(&mut buf)?;
                check_quantity(quantity, MODBUS_MAX_WRITE_COILS)?;
                check_range(address, quantity)?;
                let data = byte_counted(&mut buf, usize::from(quantity).div_ceil(8))?;
                let values = (0..usize::from(quantity))
                    .map(|i| data[i / 8] & (1 << (i % 8)) != 0)
                    .collect();
                Ok(Self::WriteMultipleCoils { address, values })
            },
            FunctionCode::WriteMultipleRegisters => {
                let (address, quantity) = read_pair(&mut buf)?;
                check_quantity(quantity, MODBUS_MAX_WRITE_REGISTERS)?;
                check_range(address, quantity)?;
                let mut data = byte_counted(&mut buf, usize::from(quantity) * 2)?;
                let values = (0..quantity).map(|_| data.get_u16()).collect();
                Ok(Self::WriteMultipleRegisters { address, values })
            },
            FunctionCode::ReadDeviceIdentification => {
                if buf.remaining() < 3 {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                if buf.get_u8() != MEI_READ_DEVICE_ID {
                    return Err(ExceptionCode::IllegalFunction);
                }
                let read_code = buf.get_u8();
                let object_id = buf.get_u8();
                finish(buf)?;
                Ok(Self::ReadDeviceIdentification {
                    read_code,
                    object_id,
                })
            },
            FunctionCode::Unsupported(_) => Err(ExceptionCode::IllegalFunction),
        }
    }
}

fn read_pair(buf: &mut &[u8]) -> std::result::Result<(u16, u16), ExceptionCode> {
    if buf.remaining() < 4 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok((buf.get_u16(), buf.get_u16()))
}

fn check_quantity(quantity: u16, limit: usize) -> std::result::Result<(), ExceptionCode> {
    if quantity == 0 || usize::from(quantity) > limit {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

fn check_range(address: u16, quantity: u16) -> std::result::Result<(), ExceptionCode> {
    if u32::from(address) + u32::from(quantity) > 0x1_0000 {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(())
}

/// Byte count prefix followed by exactly `expected` bytes
fn byte_counted<'a>(
    buf: &mut &'a [u8],
    expected: usize,
) -> std::result::Result<&'a [u8], ExceptionCode> {
    if !buf.has_remaining() {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let count = usize::from(buf.get_u8());
    if count != expected || buf.remaining() != count {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(*buf)
}

fn finish(buf: &[u8]) -> std::result::Result<(), ExceptionCode> {
    if buf.has_remaining() {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}
