//! Register data types and the raw-word codec

use crate::byte_order::ByteOrder;
use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};

/// Value type stored in one or more registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Single bit (coils, discrete inputs)
    #[serde(alias = "bit", alias = "boolean")]
    Bool,
    #[default]
    #[serde(alias = "uint16")]
    U16,
    #[serde(alias = "int16")]
    I16,
    #[serde(alias = "uint32")]
    U32,
    #[serde(alias = "int32")]
    I32,
    #[serde(alias = "float32", alias = "float")]
    F32,
    #[serde(alias = "float64", alias = "double")]
    F64,
}

impl DataType {
    /// Number of 16-bit registers occupied
    pub fn word_count(&self) -> usize {
        match self {
            Self::Bool | Self::U16 | Self::I16 => 1,
            Self::U32 | Self::I32 | Self::F32 => 2,
            Self::F64 => 4,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }

    /// Interpret raw register words as a number (before scaling)
    pub fn decode(&self, words: &[u16], order: ByteOrder) -> Result<f64> {
        if words.len() != self.word_count() {
            return Err(ModelError::WordCountMismatch {
                expected: self.word_count(),
                actual: words.len(),
            });
        }
        let bytes = order.words_to_bytes(words)?;
        let value = match self {
            Self::Bool => f64::from(u8::from(bytes.iter().any(|b| *b != 0))),
            Self::U16 => f64::from(u16::from_be_bytes([bytes[0], bytes[1]])),
            Self::I16 => f64::from(i16::from_be_bytes([bytes[0], bytes[1]])),
            Self::U32 => f64::from(u32::from_be_bytes(take4(&bytes))),
            Self::I32 => f64::from(i32::from_be_bytes(take4(&bytes))),
            Self::F32 => f64::from(f32::from_be_bytes(take4(&bytes))),
            Self::F64 => f64::from_be_bytes(take8(&bytes)),
        };
        Ok(value)
    }

    /// Encode a number (before scaling) into raw register words.
    ///
    /// Integer types round to nearest and saturate at the type range.
    pub fn encode(&self, value: f64, order: ByteOrder) -> Result<Vec<u16>> {
        let bytes: Vec<u8> = match self {
            Self::Bool => return Ok(vec![u16::from(value != 0.0 && !value.is_nan())]),
            Self::U16 => (value.round() as u16).to_be_bytes().to_vec(),
            Self::I16 => (value.round() as i16).to_be_bytes().to_vec(),
            Self::U32 => (value.round() as u32).to_be_bytes().to_vec(),
            Self::I32 => (value.round() as i32).to_be_bytes().to_vec(),
            Self::F32 => (value as f32).to_be_bytes().to_vec(),
            Self::F64 => value.to_be_bytes().to_vec(),
        };
        order.bytes_to_words(&bytes)
    }
}

fn take4(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

fn take8(bytes: &[u8]) -> [u8; 8] {
    [
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]
}

impl std::str::FromStr for DataType {
    type Err = ModelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bool" | "bit" | "boolean" => Ok(Self::Bool),
            "u16" | "uint16" => Ok(Self::U16),
            "i16" | "int16" => Ok(Self::I16),
            "u32" | "uint32" => Ok(Self::U32),
            "i32" | "int32" => Ok(Self::I32),
            "f32" | "float32" | "float" => Ok(Self::F32),
            "f64" | "float64" | "double" => Ok(Self::F64),
            _ => Err(ModelError::InvalidDataType(s.to_string())),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const ORDERS_4: [ByteOrder; 4] = [
        ByteOrder::BigEndian,
        ByteOrder::LittleEndian,
        ByteOrder::BigEndianSwap,
        ByteOrder::LittleEndianSwap,
    ];

    #[test]
    fn test_word_counts() {
        assert_eq!(DataType::Bool.word_count(), 1);
        assert_eq!(DataType::I16.word_count(), 1);
        assert_eq!(DataType::F32.word_count(), 2);
        assert_eq!(DataType::F64.word_count(), 4);
    }

    #[test]
    fn test_decode_known_values() {
        assert_eq!(
            DataType::I16.decode(&[0xFFFE], ByteOrder::BigEndian).unwrap(),
            -2.0
        );
        assert_eq!(
            DataType::U16.decode(&[0x3412], ByteOrder::LittleEndian16).unwrap(),
            f64::from(0x1234u16)
        );
        assert_eq!(
            DataType::U32
                .decode(&[0x5678, 0x1234], ByteOrder::BigEndianSwap)
                .unwrap(),
            f64::from(0x1234_5678u32)
        );
        // 1.5f32 = 0x3FC00000
        assert_eq!(
            DataType::F32
                .decode(&[0x3FC0, 0x0000], ByteOrder::BigEndian)
                .unwrap(),
            1.5
        );
        assert_eq!(
            DataType::Bool.decode(&[7], ByteOrder::BigEndian).unwrap(),
            1.0
        );
    }

    #[test]
    fn test_decode_word_count_mismatch() {
        let err = DataType::U32.decode(&[1], ByteOrder::BigEndian).unwrap_err();
        assert_eq!(
            err,
            ModelError::WordCountMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_raw_words_round_trip_all_types() {
        let samples: Vec<(DataType, Vec<u16>)> = vec![
            (DataType::U16, vec![0xBEEF]),
            (DataType::I16, vec![0x8001]),
            (DataType::U32, vec![0xDEAD, 0xBEEF]),
            (DataType::I32, vec![0xFFFF, 0x0001]),
            (DataType::F32, vec![0x4049, 0x0FDB]),
            (DataType::F64, vec![0x4009, 0x21FB, 0x5444, 0x2D18]),
        ];
        for (data_type, words) in samples {
            for order in ORDERS_4 {
                let value = data_type.decode(&words, order).unwrap();
                let back = data_type.encode(value, order).unwrap();
                assert_eq!(back, words, "{} {}", data_type, order);
            }
        }
        for word in [0u16, 1] {
            let value = DataType::Bool.decode(&[word], ByteOrder::BigEndian).unwrap();
            assert_eq!(
                DataType::Bool.encode(value, ByteOrder::BigEndian).unwrap(),
                vec![word]
            );
        }
    }

    #[test]
    fn test_encode_saturates() {
        assert_eq!(
            DataType::U16.encode(70000.0, ByteOrder::BigEndian).unwrap(),
            vec![0xFFFF]
        );
        assert_eq!(
            DataType::I16.encode(-1.4, ByteOrder::BigEndian).unwrap(),
            vec![0xFFFF]
        );
        assert_eq!(
            DataType::U16.encode(-5.0, ByteOrder::BigEndian).unwrap(),
            vec![0]
        );
    }

    #[test]
    fn test_parse() {
        assert_eq!("uint16".parse::<DataType>().unwrap(), DataType::U16);
        assert_eq!("Float".parse::<DataType>().unwrap(), DataType::F32);
        assert!("u128".parse::<DataType>().is_err());
    }
}
