//! Shared fixtures for satproxy integration tests

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::net::SocketAddr;
use std::sync::Arc;

use satproxy::core::config::SatProxyConfig;
use satproxy::core::ingest::{CompactFrameV1, DecodedFrame, FieldUpdate};
use satproxy::AppState;
use satproxy_rtdb::FixedTimeProvider;

/// Base outstation time; scenario offsets are whole seconds after it
pub const T0_MS: i64 = 1_700_000_000_000;

pub const A1_LISTEN: &str = "127.0.0.1:5020";

/// Two holding registers at 100 and 101, unit 1
pub const A1_YAML: &str = r#"
store:
  stale_after_secs: 900
outstations:
  - id: A1
    listen: 127.0.0.1:5020
    registers:
      - { type: holding, address: 100 }
      - { type: holding, address: 101 }
"#;

pub fn at(offset_secs: i64) -> i64 {
    T0_MS + offset_secs * 1000
}

fn encode(sequence: u16, snapshot: bool, fields: Vec<FieldUpdate>) -> Vec<u8> {
    let timestamp_ms = fields
        .iter()
        .map(|f| f.timestamp_ms)
        .max()
        .unwrap_or(T0_MS);
    CompactFrameV1
        .encode(&DecodedFrame {
            sequence,
            timestamp_ms,
            snapshot,
            fields,
        })
        .unwrap()
}

pub fn delta(sequence: u16, fields: Vec<FieldUpdate>) -> Vec<u8> {
    encode(sequence, false, fields)
}

pub fn snapshot(sequence: u16, fields: Vec<FieldUpdate>) -> Vec<u8> {
    encode(sequence, true, fields)
}

/// State on a fixed clock set to `T0_MS`
pub fn state_from_yaml(yaml: &str) -> (Arc<AppState>, Arc<FixedTimeProvider>) {
    let config = SatProxyConfig::from_yaml_str(yaml, ".").unwrap();
    let clock = Arc::new(FixedTimeProvider::new(T0_MS));
    let state = AppState::with_clock(config, None, clock.clone()).unwrap();
    (Arc::new(state), clock)
}

pub fn a1_listen() -> SocketAddr {
    A1_LISTEN.parse().unwrap()
}

/// FC03/04/01/02 request PDU
pub fn read_pdu(function: u8, address: u16, quantity: u16) -> Vec<u8> {
    let mut pdu = vec![function];
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&quantity.to_be_bytes());
    pdu
}

/// Register words of a successful FC03/FC04 response
pub fn words(response: &[u8]) -> Vec<u16> {
    assert!(response[0] & 0x80 == 0, "exception response {:02X?}", response);
    response[2..]
        .chunks(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect()
}

/// Exception code of an exception response
pub fn exception(response: &[u8]) -> u8 {
    assert!(response[0] & 0x80 != 0, "normal response {:02X?}", response);
    response[1]
}
