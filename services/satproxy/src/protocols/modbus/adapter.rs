//! Modbus server adapter
//!
//! Turns one request PDU into one response PDU against the register store.
//! `handle` is synchronous and never waits on the satellite side: data that
//! is not there fails fast with an exception the master can retry on.
//!
//! Request flow: `Validate -> LookupStore -> Encode`, with any failure
//! becoming an exception response rather than a dropped connection.

use super::constants::MEI_READ_DEVICE_ID;
use super::pdu::{ExceptionCode, FunctionCode, ModbusPdu, ModbusRequest, PduBuilder};
use super::writes::{WriteCommand, WriteQueue};
use crate::core::config::{ContextResolver, OutstationContext};
use crate::error::SatProxyError;
use satproxy_model::{RegisterDefinition, RegisterKind};
use satproxy_rtdb::{RegisterStore, RegisterValue, StoreView, Validity};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace};

type Outcome = std::result::Result<ModbusPdu, ExceptionCode>;

/// Longest device identification object served, so all three fit one PDU
const MAX_OBJECT_LEN: usize = 80;

/// FC43 read codes
const READ_DEVICE_ID_BASIC: u8 = 0x01;
const READ_DEVICE_ID_INDIVIDUAL: u8 = 0x04;

pub struct ModbusAdapter {
    resolver: Arc<ContextResolver>,
    store: Arc<RegisterStore>,
    writes: Arc<WriteQueue>,
}

impl ModbusAdapter {
    pub fn new(
        resolver: Arc<ContextResolver>,
        store: Arc<RegisterStore>,
        writes: Arc<WriteQueue>,
    ) -> Self {
        Self {
            resolver,
            store,
            writes,
        }
    }

    pub fn resolver(&self) -> &Arc<ContextResolver> {
        &self.resolver
    }

    pub fn writes(&self) -> &Arc<WriteQueue> {
        &self.writes
    }

    /// Answer one request PDU received on `listen` for `unit_id`
    pub fn handle(&self, listen: SocketAddr, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
        let function = pdu.first().copied().unwrap_or_default();
        match self.respond(listen, unit_id, pdu) {
            Ok(response) => response.as_slice().to_vec(),
            Err(code) => {
                debug!(
                    "{} unit {}: {} -> exception {}",
                    listen,
                    unit_id,
                    FunctionCode::from(function),
                    code
                );
                ModbusPdu::exception(function, code).as_slice().to_vec()
            },
        }
    }

    fn respond(&self, listen: SocketAddr, unit_id: u8, pdu: &[u8]) -> Outcome {
        let request = ModbusRequest::parse(pdu)?;

        // One resolver state for the whole request
        let state = self.resolver.load();
        let context = state
            .by_unit(listen, unit_id)
            .ok_or(ExceptionCode::GatewayPathUnavailable)?;
        trace!("{} unit {} -> {}", listen, unit_id, context.id());

        match request {
            ModbusRequest::Read {
                function,
                address,
                quantity,
            } => self.read(&context, function, address, quantity),
            ModbusRequest::WriteSingleCoil { address, on } => {
                self.write(&context, RegisterKind::Coil, address, &[u16::from(on)])?;
                let value = if on { 0xFF00 } else { 0x0000 };
                echo(FunctionCode::WriteSingleCoil, address, value)
            },
            ModbusRequest::WriteSingleRegister { address, value } => {
                self.write(&context, RegisterKind::HoldingRegister, address, &[value])?;
                echo(FunctionCode::WriteSingleRegister, address, value)
            },
            ModbusRequest::WriteMultipleCoils { address, values } => {
                let words: Vec<u16> = values.iter().map(|on| u16::from(*on)).collect();
                self.write(&context, RegisterKind::Coil, address, &words)?;
                echo(FunctionCode::WriteMultipleCoils, address, words.len() as u16)
            },
            ModbusRequest::WriteMultipleRegisters { address, values } => {
                self.write(&context, RegisterKind::HoldingRegister, address, &values)?;
                echo(
                    FunctionCode::WriteMultipleRegisters,
                    address,
                    values.len() as u16,
                )
            },
            ModbusRequest::ReadDeviceIdentification {
                read_code,
                object_id,
            } => device_identification(&context, read_code, object_id),
        }
    }

    fn read(
        &self,
        context: &OutstationContext,
        function: FunctionCode,
        address: u16,
        quantity: u16,
    ) -> Outcome {
        let kind = function
            .register_kind()
            .ok_or(ExceptionCode::IllegalFunction)?;
        let map = &context.map;

        // Validate the whole range before touching the store
        let mut slots = Vec::with_capacity(usize::from(quantity));
        for offset in 0..quantity {
            let addr = address + offset;
            let (def, word) = map.lookup(kind, addr).ok_or_else(|| {
                let err = SatProxyError::UnresolvedAddress(format!(
                    "{} {}#{}",
                    context.id(),
                    kind.short_code(),
                    addr
                ));
                debug!("{}", err);
                ExceptionCode::IllegalDataAddress
            })?;
            slots.push((def, word));
        }

        // One view: every word comes from the same committed generation
        let view = self.store.view(context.id());
        let mut words = Vec::with_capacity(slots.len());
        let mut stale = false;
        let mut current: Option<(u32, RegisterValue)> = None;

        for (def, word) in slots {
            let value = match &current {
                Some((index, value)) if *index == def.index => value.clone(),
                _ => {
                    let value = lookup_value(context, view.as_ref(), def)?;
                    current = Some((def.index, value.clone()));
                    value
                },
            };
            // Only Valid or Stale values get past lookup_value
            if !value.validity.is_servable() {
                stale = true;
            }
            let raw = value
                .raw
                .get(usize::from(word))
                .copied()
                .ok_or(ExceptionCode::SlaveDeviceFailure)?;
            words.push(raw);
        }

        if stale {
            let err = SatProxyError::StaleData(context.id().to_string());
            debug!("{}", err);
            return Err(ExceptionCode::GatewayTargetFailedToRespond);
        }

        encode_read(function, kind, &words).map_err(|e| {
            debug!("Encoding {} response failed: {}", function, e);
            ExceptionCode::SlaveDeviceFailure
        })
    }

    /// Queue a write that covers whole definitions only
    fn write(
        &self,
        context: &OutstationContext,
        kind: RegisterKind,
        address: u16,
        words: &[u16],
    ) -> std::result::Result<(), ExceptionCode> {
        if !context.writable {
            debug!("{}: write refused, outstation is read-only", context.id());
            return Err(ExceptionCode::IllegalFunction);
        }

        let requested_at_ms = self.store.now_millis();
        let mut commands = Vec::new();
        let mut position = 0usize;
        while position < words.len() {
            let addr = address + position as u16;
            let def = match context.map.lookup(kind, addr) {
                Some((def, 0)) => def,
                _ => return Err(ExceptionCode::IllegalDataAddress),
            };
            let count = def.word_count();
            let raw = words
                .get(position..position + count)
                .ok_or(ExceptionCode::IllegalDataAddress)?
                .to_vec();
            let value = def
                .to_engineering(&raw)
                .map_err(|_| ExceptionCode::IllegalDataValue)?;
            commands.push(WriteCommand {
                outstation_id: context.id().to_string(),
                kind,
                address: addr,
                index: def.index,
                raw,
                value,
                requested_at_ms,
            });
            position += count;
        }

        if !self.writes.push_all(context.id(), commands) {
            return Err(ExceptionCode::SlaveDeviceFailure);
        }
        Ok(())
    }
}

/// Current value of a covered register, or the exception explaining its absence
fn lookup_value(
    context: &OutstationContext,
    view: Option<&StoreView>,
    def: &RegisterDefinition,
) -> std::result::Result<RegisterValue, ExceptionCode> {
    let no_data = || {
        let err = SatProxyError::NoDataYet(format!("{} index {}", context.id(), def.index));
        debug!("{}", err);
        ExceptionCode::SlaveDeviceFailure
    };
    let value = view.and_then(|v| v.get(def.index)).ok_or_else(no_data)?;
    match value.validity {
        Validity::Valid | Validity::Stale => Ok(value),
        Validity::Pending | Validity::NeverReceived => Err(no_data()),
    }
}

fn encode_read(
    function: FunctionCode,
    kind: RegisterKind,
    words: &[u16],
) -> crate::error::Result<ModbusPdu> {
    let mut pdu = ModbusPdu::new();
    pdu.push(function.code())?;
    if kind.is_bit() {
        let mut packed = vec![0u8; words.len().div_ceil(8)];
        for (i, word) in words.iter().enumerate() {
            if *word != 0 {
                packed[i / 8] |= 1 << (i % 8);
            }
        }
        pdu.push(packed.len() as u8)?;
        pdu.extend(&packed)?;
    } else {
        pdu.push((words.len() * 2) as u8)?;
        for word in words {
            pdu.push_u16(*word)?;
        }
    }
    Ok(pdu)
}

/// FC05/06 echo the request, FC15/16 echo address and quantity
fn echo(function: FunctionCode, address: u16, value: u16) -> Outcome {
    PduBuilder::new()
        .function_code(function.code())
        .and_then(|b| b.address(address))
        .and_then(|b| b.quantity(value))
        .map(PduBuilder::build)
        .map_err(|_| ExceptionCode::SlaveDeviceFailure)
}

fn device_identification(context: &OutstationContext, read_code: u8, object_id: u8) -> Outcome {
    let identity = context.map.identity();
    let objects: [&str; 3] = [
        &identity.vendor_name,
        &identity.product_code,
        &identity.major_minor_revision,
    ];

    let selected: Vec<(u8, &str)> = match read_code {
        READ_DEVICE_ID_BASIC => {
            // An unknown starting object restarts the stream at 0
            let start = if usize::from(object_id) < objects.len() {
                object_id
            } else {
                0
            };
            (start..objects.len() as u8)
                .map(|id| (id, objects[usize::from(id)]))
                .collect()
        },
        READ_DEVICE_ID_INDIVIDUAL => {
            let value = objects
                .get(usize::from(object_id))
                .ok_or(ExceptionCode::IllegalDataAddress)?;
            vec![(object_id, *value)]
        },
        _ => return Err(ExceptionCode::IllegalDataValue),
    };

    let build = || -> crate::error::Result<ModbusPdu> {
        let mut pdu = ModbusPdu::new();
        pdu.extend(&[
            FunctionCode::ReadDeviceIdentification.code(),
            MEI_READ_DEVICE_ID,
            read_code,
            0x81, // basic identification, stream and individual access
            0x00, // no more follows
            0x00, // next object id
            selected.len() as u8,
        ])?;
        for (id, value) in &selected {
            let bytes = &value.as_bytes()[..value.len().min(MAX_OBJECT_LEN)];
            pdu.push(*id)?;
            pdu.push(bytes.len() as u8)?;
            pdu.extend(bytes)?;
        }
        Ok(pdu)
    };
    build().map_err(|_| ExceptionCode::SlaveDeviceFailure)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::config::ResolverState;
    use satproxy_model::{ByteOrder, DataType, DeviceIdentity, RegisterMap};
    use satproxy_rtdb::FixedTimeProvider;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000_000;

    struct Fixture {
        adapter: ModbusAdapter,
        store: Arc<RegisterStore>,
        clock: Arc<FixedTimeProvider>,
        listen: SocketAddr,
    }

    fn fixture(writable: bool) -> Fixture {
        let defs = vec![
            RegisterDefinition::new(0, RegisterKind::HoldingRegister, 100, DataType::U16),
            RegisterDefinition::new(1, RegisterKind::HoldingRegister, 101, DataType::U16),
            RegisterDefinition::new(2, RegisterKind::HoldingRegister, 102, DataType::F32)
                .with_byte_order(ByteOrder::BigEndian),
            RegisterDefinition::new(3, RegisterKind::Coil, 0, DataType::Bool),
            RegisterDefinition::new(4, RegisterKind::Coil, 1, DataType::Bool),
            RegisterDefinition::new(5, RegisterKind::InputRegister, 0, DataType::I16)
                .with_scaling(0.1, 0.0),
        ];
        let map = RegisterMap::new("A1", 1, defs).unwrap().with_identity(DeviceIdentity {
            vendor_name: "Acme".into(),
            product_code: "RTU-1".into(),
            major_minor_revision: "1.2".into(),
            ..Default::default()
        });
        let listen: SocketAddr = "127.0.0.1:5020".parse().unwrap();
        let state =
            ResolverState::build(vec![OutstationContext::new(map, listen, writable)]).unwrap();
        let clock = Arc::new(FixedTimeProvider::new(NOW));
        let store = Arc::new(RegisterStore::new(
            Some(Duration::from_secs(900)),
            clock.clone(),
        ));
        let adapter = ModbusAdapter::new(
            Arc::new(ContextResolver::new(state)),
            store.clone(),
            Arc::new(WriteQueue::new(4)),
        );
        Fixture {
            adapter,
            store,
            clock,
            listen,
        }
    }

    fn put(store: &RegisterStore, values: &[(u32, Vec<u16>)]) {
        store.update("A1", |tx| {
            for (index, raw) in values {
                tx.put(*index, raw.clone(), f64::from(raw[0]), NOW);
            }
            tx.touch_contact(NOW);
        });
    }

    impl Fixture {
        fn call(&self, pdu: &[u8]) -> Vec<u8> {
            self.adapter.handle(self.listen, 1, pdu)
        }
    }

    #[test]
    fn test_scenario_unknown_address_and_no_data() {
        let f = fixture(false);
        put(&f.store, &[(0, vec![42])]);

        assert_eq!(f.call(&[0x03, 0, 100, 0, 1]), vec![0x03, 2, 0, 42]);
        // Configured but never received
        assert_eq!(f.call(&[0x03, 0, 101, 0, 1]), vec![0x83, 0x04]);
        // Range running off the map
        assert_eq!(f.call(&[0x03, 0, 99, 0, 2]), vec![0x83, 0x02]);
        // Same address, wrong table
        assert_eq!(f.call(&[0x04, 0, 100, 0, 1]), vec![0x84, 0x02]);
    }

    #[test]
    fn test_multi_word_and_partial_reads() {
        let f = fixture(false);
        put(&f.store, &[(0, vec![1]), (1, vec![2]), (2, vec![0x4148, 0x0000])]);

        assert_eq!(
            f.call(&[0x03, 0, 100, 0, 4]),
            vec![0x03, 8, 0, 1, 0, 2, 0x41, 0x48, 0, 0]
        );
        // Second word of the float only
        assert_eq!(f.call(&[0x03, 0, 103, 0, 1]), vec![0x03, 2, 0, 0]);
    }

    #[test]
    fn test_stale_and_pending_are_exceptions() {
        let f = fixture(false);
        put(&f.store, &[(0, vec![42]), (1, vec![7])]);
        f.store.update("A1", |tx| tx.mark_pending(1));

        assert_eq!(f.call(&[0x03, 0, 101, 0, 1]), vec![0x83, 0x04]);

        f.clock.advance(901_000);
        assert_eq!(f.call(&[0x03, 0, 100, 0, 1]), vec![0x83, 0x0B]);
    }

    #[test]
    fn test_coils_packed() {
        let f = fixture(false);
        put(&f.store, &[(3, vec![1]), (4, vec![0])]);
        assert_eq!(f.call(&[0x01, 0, 0, 0, 2]), vec![0x01, 1, 0b01]);
    }

    #[test]
    fn test_unknown_unit_and_function() {
        let f = fixture(false);
        assert_eq!(
            f.adapter.handle(f.listen, 9, &[0x03, 0, 100, 0, 1]),
            vec![0x83, 0x0A]
        );
        let other: SocketAddr = "127.0.0.1:5021".parse().unwrap();
        assert_eq!(f.adapter.handle(other, 1, &[0x03, 0, 100, 0, 1]), vec![0x83, 0x0A]);
        assert_eq!(f.call(&[0x17, 0, 0, 0, 1]), vec![0x97, 0x01]);
        assert_eq!(f.call(&[0x03, 0, 100, 0, 0]), vec![0x83, 0x03]);
    }

    #[test]
    fn test_writes_refused_when_read_only() {
        let f = fixture(false);
        assert_eq!(f.call(&[0x06, 0, 100, 0, 5]), vec![0x86, 0x01]);
        assert_eq!(f.adapter.writes().total_pending(), 0);
    }

    #[test]
    fn test_writes_queued_not_stored() {
        let f = fixture(true);
        assert_eq!(f.call(&[0x06, 0, 100, 0, 5]), vec![0x06, 0, 100, 0, 5]);
        assert_eq!(
            f.call(&[0x10, 0, 101, 0, 3, 6, 0, 9, 0x41, 0x48, 0, 0]),
            vec![0x10, 0, 101, 0, 3]
        );
        assert_eq!(f.call(&[0x05, 0, 1, 0xFF, 0]), vec![0x05, 0, 1, 0xFF, 0]);

        let queued = f.adapter.writes().drain("A1");
        // 100, then 101 and the float at 102, then coil 1
        assert_eq!(queued.len(), 4);
        assert_eq!(queued[0].raw, vec![5]);
        assert_eq!(queued[2].index, 2);
        assert_eq!(queued[2].value, 12.5);
        assert_eq!(queued[3].kind, RegisterKind::Coil);

        // The store is untouched by writes
        assert!(f.store.snapshot("A1").is_none());
    }

    #[test]
    fn test_write_must_cover_whole_definitions() {
        let f = fixture(true);
        // Only the first word of the float at 102
        assert_eq!(f.call(&[0x10, 0, 102, 0, 1, 2, 0, 0]), vec![0x90, 0x02]);
        // Starting inside the float
        assert_eq!(f.call(&[0x06, 0, 103, 0, 0]), vec![0x86, 0x02]);
        // Unmapped
        assert_eq!(f.call(&[0x06, 0, 200, 0, 0]), vec![0x86, 0x02]);
        assert_eq!(f.adapter.writes().total_pending(), 0);
    }

    #[test]
    fn test_full_write_queue_is_device_failure() {
        let f = fixture(true);
        for _ in 0..4 {
            assert_eq!(f.call(&[0x06, 0, 100, 0, 1])[0], 0x06);
        }
        assert_eq!(f.call(&[0x06, 0, 100, 0, 1]), vec![0x86, 0x04]);
    }

    #[test]
    fn test_read_device_identification() {
        let f = fixture(false);
        let response = f.call(&[0x2B, 0x0E, 0x01, 0x00]);
        let mut expected = vec![0x2B, 0x0E, 0x01, 0x81, 0x00, 0x00, 3];
        expected.extend([0, 4]);
        expected.extend(b"Acme");
        expected.extend([1, 5]);
        expected.extend(b"RTU-1");
        expected.extend([2, 3]);
        expected.extend(b"1.2");
        assert_eq!(response, expected);

        let single = f.call(&[0x2B, 0x0E, 0x04, 0x01]);
        assert_eq!(&single[6..], &[1, 1, 5, b'R', b'T', b'U', b'-', b'1']);
        assert_eq!(f.call(&[0x2B, 0x0E, 0x04, 0x09]), vec![0xAB, 0x02]);
        assert_eq!(f.call(&[0x2B, 0x0E, 0x02, 0x00]), vec![0xAB, 0x03]);
    }
}
