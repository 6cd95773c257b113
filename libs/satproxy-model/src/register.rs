//! Register definitions
//!
//! A definition is configured metadata for one polled value. It is immutable
//! after load and shared read-only by the decode, reconcile and serve paths.

use crate::byte_order::ByteOrder;
use crate::data_type::DataType;
use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};

/// Float neighbours tried when settling a scaled value, nearest first
const ULP_STEPS: [i32; 5] = [0, -1, 1, -2, 2];

/// Modbus data table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    /// Read/write bits (FC01, FC05, FC15)
    #[serde(alias = "co")]
    Coil,
    /// Read-only bits (FC02)
    #[serde(alias = "di", alias = "input")]
    DiscreteInput,
    /// Read-only words (FC04)
    #[serde(alias = "ir", alias = "analog")]
    InputRegister,
    /// Read/write words (FC03, FC06, FC16)
    #[serde(alias = "hr", alias = "holding")]
    HoldingRegister,
}

impl RegisterKind {
    /// Bit tables hold single-bit values only
    pub fn is_bit(&self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }

    /// Whether a Modbus master may write this table
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Coil | Self::HoldingRegister)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coil => "coil",
            Self::DiscreteInput => "discrete_input",
            Self::InputRegister => "input_register",
            Self::HoldingRegister => "holding_register",
        }
    }

    /// Two-letter code used in logs and URLs
    pub fn short_code(&self) -> &'static str {
        match self {
            Self::Coil => "co",
            Self::DiscreteInput => "di",
            Self::InputRegister => "ir",
            Self::HoldingRegister => "hr",
        }
    }
}

impl std::str::FromStr for RegisterKind {
    type Err = ModelError;

    /// Accepts full names, two-letter codes and the `config.dat` words
    /// (`holding`, `analog` for input registers, `input` for discrete inputs, `coil`)
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coil" | "co" | "coils" => Ok(Self::Coil),
            "discrete_input" | "di" | "input" | "discrete" => Ok(Self::DiscreteInput),
            "input_register" | "ir" | "analog" => Ok(Self::InputRegister),
            "holding_register" | "hr" | "holding" => Ok(Self::HoldingRegister),
            _ => Err(ModelError::InvalidRegisterKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One Modbus address in one table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RegisterKey {
    pub kind: RegisterKind,
    pub address: u16,
}

impl RegisterKey {
    pub fn new(kind: RegisterKind, address: u16) -> Self {
        Self { kind, address }
    }
}

impl std::fmt::Display for RegisterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.kind.short_code(), self.address)
    }
}

/// Configured metadata for one register value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDefinition {
    /// Compact index used on the wire (position in the configured list)
    pub index: u32,
    /// Parameter id from the outstation template
    pub param_id: u32,
    pub kind: RegisterKind,
    /// Zero-based Modbus address of the first word
    pub address: u16,
    pub data_type: DataType,
    pub byte_order: ByteOrder,
    pub scale: f64,
    pub offset: f64,
    pub label: String,
}

impl RegisterDefinition {
    /// Create a definition with unit scaling and default byte order
    pub fn new(index: u32, kind: RegisterKind, address: u16, data_type: DataType) -> Self {
        Self {
            index,
            param_id: index,
            kind,
            address,
            data_type,
            byte_order: ByteOrder::default(),
            scale: 1.0,
            offset: 0.0,
            label: String::new(),
        }
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_scaling(mut self, scale: f64, offset: f64) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_param_id(mut self, param_id: u32) -> Self {
        self.param_id = param_id;
        self
    }

    /// Registers occupied in its table
    pub fn word_count(&self) -> usize {
        self.data_type.word_count()
    }

    pub fn key(&self) -> RegisterKey {
        RegisterKey::new(self.kind, self.address)
    }

    /// Last address covered (inclusive), widened so overflow is detectable
    pub fn last_address(&self) -> u32 {
        u32::from(self.address) + self.word_count() as u32 - 1
    }

    /// Raw words to engineering value: `raw * scale + offset`
    pub fn to_engineering(&self, raw: &[u16]) -> Result<f64> {
        let value = self.data_type.decode(raw, self.byte_order)?;
        if self.data_type == DataType::Bool {
            return Ok(value);
        }
        Ok(value * self.scale + self.offset)
    }

    /// Engineering value back to raw words.
    ///
    /// Integer types come back word-exact. Float types come back value-exact:
    /// `to_engineering(from_engineering(v)) == v`, though under non-unity
    /// scaling several raw floats can share one engineering value, so the
    /// words may differ from the ones originally decoded.
    pub fn from_engineering(&self, value: f64) -> Result<Vec<u16>> {
        let raw = match self.data_type {
            DataType::Bool => value,
            DataType::F32 => self.settle_f32(value),
            DataType::F64 => self.settle_f64(value),
            _ => (value - self.offset) / self.scale,
        };
        self.data_type.encode(raw, self.byte_order)
    }

    /// Dividing out the scale can land a few ulps off; take the nearest
    /// neighbour that reproduces `value`
    fn settle_f64(&self, value: f64) -> f64 {
        let raw = (value - self.offset) / self.scale;
        if !raw.is_finite() {
            return raw;
        }
        let bits = raw.to_bits();
        ULP_STEPS
            .iter()
            .map(|&step| f64::from_bits(bits.wrapping_add_signed(i64::from(step))))
            .find(|candidate| candidate * self.scale + self.offset == value)
            .unwrap_or(raw)
    }

    fn settle_f32(&self, value: f64) -> f64 {
        let raw = ((value - self.offset) / self.scale) as f32;
        if !raw.is_finite() {
            return f64::from(raw);
        }
        let bits = raw.to_bits();
        ULP_STEPS
            .iter()
            .map(|&step| f64::from(f32::from_bits(bits.wrapping_add_signed(step))))
            .find(|candidate| candidate * self.scale + self.offset == value)
            .unwrap_or(f64::from(raw))
    }

    /// Check the definition on its own (map-level checks live in `RegisterMap`)
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if self.kind.is_bit() != (self.data_type == DataType::Bool) {
            return Err(format!(
                "index {}: data type {} is not valid for {} registers",
                self.index, self.data_type, self.kind
            ));
        }
        if !self.byte_order.supports_words(self.word_count()) {
            return Err(format!(
                "index {}: byte order {} cannot hold {}",
                self.index, self.byte_order, self.data_type
            ));
        }
        if self.last_address() > u32::from(u16::MAX) {
            return Err(format!(
                "index {}: {} at {} runs past address 65535",
                self.index, self.data_type, self.address
            ));
        }
        if !self.scale.is_finite() || self.scale == 0.0 || !self.offset.is_finite() {
            return Err(format!(
                "index {}: scale must be finite and non-zero, offset finite",
                self.index
            ));
        }
        Ok(())
    }
}

/// Device identification objects served by FC43/14
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIdentity {
    pub vendor_name: String,
    pub product_code: String,
    pub major_minor_revision: String,
    pub product_name: String,
    pub model_name: String,
}
