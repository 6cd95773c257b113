//! MBAP framing for Modbus TCP
//!
//! `Transaction ID(2) | Protocol ID(2) | Length(2) | Unit ID(1) | PDU`

use super::constants::{
    mbap_frame_size, MAX_MBAP_LENGTH, MAX_PDU_SIZE, MBAP_HEADER_LEN, MIN_MBAP_LENGTH,
};
use crate::error::SatProxyError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// One Modbus TCP application data unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbapFrame {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub pdu: Bytes,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MbapCodec;

impl Decoder for MbapCodec {
    type Item = MbapFrame;
    type Error = SatProxyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MBAP_HEADER_LEN {
            return Ok(None);
        }

        let protocol_id = u16::from_be_bytes([src[2], src[3]]);
        if protocol_id != 0 {
            return Err(SatProxyError::protocol(format!(
                "MBAP protocol id {protocol_id} is not Modbus"
            )));
        }
        let length = usize::from(u16::from_be_bytes([src[4], src[5]]));
        if !(MIN_MBAP_LENGTH..=MAX_MBAP_LENGTH).contains(&length) {
            return Err(SatProxyError::protocol(format!(
                "MBAP length {length} outside {MIN_MBAP_LENGTH}..={MAX_MBAP_LENGTH}"
            )));
        }

        let frame_len = MBAP_HEADER_LEN + length;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(frame_len);
        let transaction_id = frame.get_u16();
        frame.advance(4); // protocol id, length
        let unit_id = frame.get_u8();
        Ok(Some(MbapFrame {
            transaction_id,
            unit_id,
            pdu: frame.freeze(),
        }))
    }
}

impl Encoder<MbapFrame> for MbapCodec {
    type Error = SatProxyError;

    fn encode(&mut self, item: MbapFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.pdu.is_empty() || item.pdu.len() > MAX_PDU_SIZE {
            return Err(SatProxyError::protocol(format!(
                "response PDU of {} bytes cannot be framed",
                item.pdu.len()
            )));
        }
        dst.reserve(mbap_frame_size(item.pdu.len()));
        dst.put_u16(item.transaction_id);
        dst.put_u16(0);
        dst.put_u16((item.pdu.len() + 1) as u16);
        dst.put_u8(item.unit_id);
        dst.put_slice(&item.pdu);
        Ok(())
    }
}
