//! Configuration file and template loading, including hot reload from disk

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::*;
use satproxy::core::bootstrap::validate_configuration;
use satproxy::core::config::SatProxyConfig;
use satproxy::core::ingest::FieldUpdate;
use satproxy::{AppState, SatProxyError};
use satproxy_model::{ByteOrder, DataType, RegisterKind};
use satproxy_rtdb::FixedTimeProvider;
use tempfile::TempDir;

const TEMPLATE: &str = "\
/*DEVICE;VendorName=Acme;ProductCode=RTU-1;MajorMinorRevision=1.2;sparse=1
deviceId=tank-7;networkId=5;plcBaseAddress=1
paramId=10;address=101;registerType=holding;label=level
paramId=11;address=102;registerType=holding;dataType=f32;byteOrder=CDAB;scale=0.1
paramId=12;address=1;registerType=coil
";

fn write_config(dir: &Path, outstations: &str) -> std::path::PathBuf {
    fs::create_dir_all(dir.join("templates")).unwrap();
    fs::write(dir.join("templates/a1.dat"), TEMPLATE).unwrap();
    let path = dir.join("satproxy.yaml");
    fs::write(
        &path,
        format!("store:\n  stale_after_secs: 60\noutstations:\n{outstations}"),
    )
    .unwrap();
    path
}

const A1_FROM_TEMPLATE: &str = r#"
  - id: A1
    listen: 127.0.0.1:5020
    template: templates/a1.dat
    registers:
      - { type: input_register, address: 7, data_type: i16 }
"#;

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_template_and_inline_registers() {
    let dir = TempDir::new().unwrap();
    let path = write_config(dir.path(), A1_FROM_TEMPLATE);

    let config = SatProxyConfig::load(&path).unwrap();
    assert_eq!(config.store.stale_after_secs, 60);

    let state = validate_configuration(&config).unwrap();
    let context = state.resolve("A1").unwrap();
    assert_eq!(context.unit_id(), 5);
    assert_eq!(context.map.identity().vendor_name, "Acme");

    let defs = context.map.definitions();
    assert_eq!(defs.len(), 4);
    // plcBaseAddress=1 leaves template addresses as the master addresses them
    assert_eq!((defs[0].kind, defs[0].address), (RegisterKind::HoldingRegister, 101));
    assert_eq!(defs[1].data_type, DataType::F32);
    assert_eq!(defs[1].byte_order, ByteOrder::BigEndianSwap);
    assert_eq!((defs[2].kind, defs[2].address), (RegisterKind::Coil, 1));
    // Inline registers continue the index sequence
    assert_eq!(defs[3].index, 3);
    assert_eq!(defs[3].kind, RegisterKind::InputRegister);
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let config = SatProxyConfig::load(dir.path().join("absent.yaml")).unwrap();
    assert!(config.outstations.is_empty());
    assert_eq!(config.store.stale_after_secs, 900);
}

#[test]
fn test_inconsistent_maps_stop_startup() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        r#"
  - id: A1
    listen: 127.0.0.1:5020
    template: templates/a1.dat
    registers:
      - { type: holding, address: 101 }
"#,
    );
    // Inline 101 collides with the template's level register
    let config = SatProxyConfig::load(&path).unwrap();
    assert!(matches!(
        AppState::new(config, Some(path)),
        Err(SatProxyError::ConfigurationInconsistent(_))
    ));
}

#[test]
fn test_missing_template_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("satproxy.yaml");
    fs::write(
        &path,
        "outstations:\n  - { id: A1, listen: \"127.0.0.1:5020\", template: nope.dat }\n",
    )
    .unwrap();
    let config = SatProxyConfig::load(&path).unwrap();
    assert!(matches!(
        validate_configuration(&config),
        Err(SatProxyError::ConfigError(_))
    ));
}

// ============================================================================
// Reload from disk
// ============================================================================

#[test]
fn test_reload_from_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(dir.path(), A1_FROM_TEMPLATE);
    let config = SatProxyConfig::load(&path).unwrap();
    let state = Arc::new(
        AppState::with_clock(
            config,
            Some(path.clone()),
            Arc::new(FixedTimeProvider::new(T0_MS)),
        )
        .unwrap(),
    );

    state
        .pipeline
        .ingest("A1", delta(1, vec![FieldUpdate::word(0, 11, at(1))]))
        .unwrap();
    let parked = state
        .pipeline
        .ingest("B2", delta(1, vec![FieldUpdate::word(0, 22, at(1))]));
    assert!(parked.is_err());

    write_config(
        dir.path(),
        &format!(
            "{A1_FROM_TEMPLATE}
  - id: B2
    listen: 127.0.0.1:5021
    registers:
      - {{ type: holding, address: 0 }}
"
        ),
    );
    let summary = state.reload().unwrap();
    assert_eq!(summary.generation, 1);
    assert_eq!(summary.outstations, 2);
    assert_eq!(summary.values_dropped, 0);
    assert_eq!(summary.replay.replayed, 1);

    assert_eq!(state.store.get("A1", 0).unwrap().raw, vec![11]);
    assert_eq!(state.store.get("B2", 0).unwrap().raw, vec![22]);

    // A broken file leaves the running mapping alone
    fs::write(&path, "outstations: [ {").unwrap();
    assert!(state.reload().is_err());
    assert_eq!(state.resolver.generation(), 1);
    assert!(state.resolver.contains("B2"));
}
