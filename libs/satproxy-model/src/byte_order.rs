//! Byte and word order of register values
//!
//! Outstation firmware disagrees on how a 32- or 64-bit value is laid across
//! 16-bit registers, so every register definition carries its own order.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};

/// Byte/word order for values spread across one or more 16-bit registers
///
/// Uses ABCD notation where A is the most significant byte. For the 32-bit
/// value `0x12345678` held in two registers:
/// - `BigEndian (ABCD)`: `[0x1234, 0x5678]`
/// - `LittleEndian (DCBA)`: `[0x7856, 0x3412]`
/// - `BigEndianSwap (CDAB)`: `[0x5678, 0x1234]`
/// - `LittleEndianSwap (BADC)`: `[0x3412, 0x7856]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    /// ABCD, most significant byte first
    #[default]
    #[serde(rename = "ABCD", alias = "big_endian", alias = "abcd")]
    BigEndian,

    /// DCBA, least significant byte first
    #[serde(rename = "DCBA", alias = "little_endian", alias = "dcba")]
    LittleEndian,

    /// CDAB, big-endian words in reversed word order
    #[serde(rename = "CDAB", alias = "big_endian_swap", alias = "cdab")]
    BigEndianSwap,

    /// BADC, words in order with bytes swapped inside each word
    #[serde(rename = "BADC", alias = "little_endian_swap", alias = "badc")]
    LittleEndianSwap,

    /// AB, single register, no swap
    #[serde(rename = "AB", alias = "ab")]
    BigEndian16,

    /// BA, single register with its two bytes swapped
    #[serde(rename = "BA", alias = "ba")]
    LittleEndian16,
}

impl ByteOrder {
    /// Short ABCD-style name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BigEndian => "ABCD",
            Self::LittleEndian => "DCBA",
            Self::BigEndianSwap => "CDAB",
            Self::LittleEndianSwap => "BADC",
            Self::BigEndian16 => "AB",
            Self::LittleEndian16 => "BA",
        }
    }

    /// Check if this is a 16-bit only byte order
    pub fn is_16bit_only(&self) -> bool {
        matches!(self, Self::BigEndian16 | Self::LittleEndian16)
    }

    /// Check if words are swapped (for 32/64-bit values)
    pub fn has_word_swap(&self) -> bool {
        matches!(self, Self::BigEndianSwap | Self::LittleEndianSwap)
    }

    /// Whether a value of `words` registers can use this order
    pub fn supports_words(&self, words: usize) -> bool {
        match words {
            1 => true,
            2 | 4 => !self.is_16bit_only(),
            _ => false,
        }
    }

    /// Whether a single register has its two bytes swapped under this order
    fn swaps_single_word(&self) -> bool {
        matches!(
            self,
            Self::LittleEndian | Self::LittleEndianSwap | Self::LittleEndian16
        )
    }

    /// Permute bytes between register layout and most-significant-first layout.
    ///
    /// Every supported permutation is its own inverse, so the same function
    /// serves both directions.
    fn permute(&self, bytes: &mut [u8]) {
        if bytes.len() == 2 {
            if self.swaps_single_word() {
                bytes.swap(0, 1);
            }
            return;
        }
        match self {
            Self::BigEndian | Self::BigEndian16 => {},
            Self::LittleEndian | Self::LittleEndian16 => bytes.reverse(),
            Self::BigEndianSwap => {
                let words = bytes.len() / 2;
                for i in 0..words / 2 {
                    let j = words - 1 - i;
                    bytes.swap(2 * i, 2 * j);
                    bytes.swap(2 * i + 1, 2 * j + 1);
                }
            },
            Self::LittleEndianSwap => {
                for pair in bytes.chunks_exact_mut(2) {
                    pair.swap(0, 1);
                }
            },
        }
    }

    /// Convert register words to value bytes, most significant byte first
    pub fn words_to_bytes(&self, words: &[u16]) -> Result<Vec<u8>, ModelError> {
        if !self.supports_words(words.len()) {
            return Err(ModelError::IncompatibleByteOrder {
                order: *self,
                words: words.len(),
            });
        }
        let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        self.permute(&mut bytes);
        Ok(bytes)
    }

    /// Convert value bytes (most significant first) back to register words
    pub fn bytes_to_words(&self, bytes: &[u8]) -> Result<Vec<u16>, ModelError> {
        let words = bytes.len() / 2;
        if bytes.len() % 2 != 0 || !self.supports_words(words) {
            return Err(ModelError::IncompatibleByteOrder {
                order: *self,
                words,
            });
        }
        let mut buf = bytes.to_vec();
        self.permute(&mut buf);
        Ok(buf
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect())
    }
}

impl std::str::FromStr for ByteOrder {
    type Err = ModelError;

    /// Accepts "ABCD", "AB-CD", "big_endian", "BE", "cdab", "BA" and similar
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "");
        match normalized.as_str() {
            "ABCD" | "BE" | "BIG_ENDIAN" | "BIGENDIAN" => Ok(Self::BigEndian),
            "DCBA" | "LE" | "LITTLE_ENDIAN" | "LITTLEENDIAN" => Ok(Self::LittleEndian),
            "CDAB" | "BIG_ENDIAN_SWAP" | "BIGENDIANSWAP" => Ok(Self::BigEndianSwap),
            "BADC" | "LITTLE_ENDIAN_SWAP" | "LITTLEENDIANSWAP" => Ok(Self::LittleEndianSwap),
            "AB" => Ok(Self::BigEndian16),
            "BA" => Ok(Self::LittleEndian16),
            _ => Err(ModelError::InvalidByteOrder(s.to_string())),
        }
    }
}

impl std::fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
