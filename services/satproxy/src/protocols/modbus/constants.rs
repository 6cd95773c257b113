//! Modbus TCP limits served to the SCADA master
//!
//! Register and coil limits follow from the 253-byte PDU ceiling.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Transaction ID(2) + Protocol ID(2) + Length(2)
///
/// The unit id is counted by the length field, not here.
pub const MBAP_HEADER_LEN: usize = 6;

/// RS485 ADU (256) - slave address (1) - CRC (2)
pub const MAX_PDU_SIZE: usize = 253;

/// Largest legal MBAP length field: unit id + PDU
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Smallest legal MBAP length field: unit id + function code
pub const MIN_MBAP_LENGTH: usize = 2;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// FC03/FC04: 1 + 1 + N * 2 <= 253
pub const MODBUS_MAX_READ_REGISTERS: usize = 125;

/// FC16: 1 + 2 + 2 + 1 + N * 2 <= 253
pub const MODBUS_MAX_WRITE_REGISTERS: usize = 123;

// ============================================================================
// Coil Operation Limits
// ============================================================================

/// FC01/FC02
pub const MODBUS_MAX_READ_COILS: usize = 2000;

/// FC15 (0x7B0)
pub const MODBUS_MAX_WRITE_COILS: usize = 1968;

/// FC05 request value for ON
pub const COIL_ON: u16 = 0xFF00;
/// FC05 request value for OFF
pub const COIL_OFF: u16 = 0x0000;

/// MEI type of FC43 Read Device Identification
pub const MEI_READ_DEVICE_ID: u8 = 0x0E;

/// Total frame size (MBAP header + unit id + PDU)
#[inline]
pub const fn mbap_frame_size(pdu_len: usize) -> usize {
    MBAP_HEADER_LEN + 1 + pdu_len
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_register_limits_fit_pdu() {
        assert!(1 + 1 + MODBUS_MAX_READ_REGISTERS * 2 <= MAX_PDU_SIZE);
        assert!(1 + 2 + 2 + 1 + MODBUS_MAX_WRITE_REGISTERS * 2 <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_coil_limits_fit_pdu() {
        assert!(1 + 1 + MODBUS_MAX_READ_COILS.div_ceil(8) <= MAX_PDU_SIZE);
        assert!(1 + 2 + 2 + 1 + MODBUS_MAX_WRITE_COILS.div_ceil(8) <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_mbap_frame_size() {
        assert_eq!(mbap_frame_size(5), 12);
        assert_eq!(mbap_frame_size(MAX_PDU_SIZE), 260);
    }
}
