//! `config.dat` outstation templates
//!
//! The template is the register list the remote agent polls. Each line is a
//! `;`-separated list of `key=value` pairs:
//!
//! ```text
//! /*DEVICE;VendorName=Acme;ProductCode=RTU-1;MajorMinorRevision=1.2;sparse=1
//! deviceId=tank-7;networkId=1;plcBaseAddress=0
//! paramId=10;address=100;registerType=holding
//! paramId=11;address=101;registerType=holding;dataType=f32;byteOrder=CDAB;scale=0.1
//! ```
//!
//! The compact wire index of a register is its position in the file.

use crate::error::{Result, SatProxyError};
use satproxy_model::{ByteOrder, DataType, DeviceIdentity, RegisterDefinition, RegisterKind};
use std::path::Path;
use tracing::debug;

const DEVICE_PREFIX: &str = "/*DEVICE";
const NETWORK_PREFIX: &str = "deviceId";
const REGISTER_PREFIX: &str = "paramId";

/// Parsed outstation template
#[derive(Debug, Clone, Default)]
pub struct OutstationTemplate {
    pub identity: DeviceIdentity,
    /// Recorded for diagnostics; gaps are always illegal addresses
    pub sparse: bool,
    pub device_id: Option<String>,
    pub unit_id: Option<u8>,
    /// `plcBaseAddress=1`: the PLC numbers registers from 1. Template
    /// addresses and master requests share that numbering, so the mapping
    /// between them is unchanged.
    pub one_based: bool,
    pub registers: Vec<RegisterDefinition>,
}

struct PendingRegister {
    line: usize,
    param_id: u32,
    address: u32,
    kind: RegisterKind,
    data_type: Option<DataType>,
    byte_order: ByteOrder,
    scale: f64,
    offset: f64,
    label: String,
}

/// Read and parse a template file
pub fn load_template(path: &Path) -> Result<OutstationTemplate> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        SatProxyError::config(format!("Cannot read template {}: {}", path.display(), e))
    })?;
    parse_template(&text, &path.display().to_string())
}

/// Parse template text; `source` names the template in error messages
pub fn parse_template(text: &str, source: &str) -> Result<OutstationTemplate> {
    let mut template = OutstationTemplate::default();
    let mut pending = Vec::new();

    for (number, raw_line) in text.lines().enumerate() {
        let line_no = number + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }
        let fail = |msg: String| SatProxyError::inconsistent(format!("{source}:{line_no}: {msg}"));

        if line.starts_with(DEVICE_PREFIX) {
            parse_device_line(line, &mut template).map_err(fail)?;
        } else if line.starts_with(NETWORK_PREFIX) {
            parse_network_line(line, &mut template).map_err(fail)?;
        } else if line.starts_with(REGISTER_PREFIX) {
            pending.push(parse_register_line(line, line_no).map_err(fail)?);
        } else {
            debug!("{}:{}: ignoring template line", source, line_no);
        }
    }

    for (position, reg) in pending.into_iter().enumerate() {
        let fail = |msg: String| SatProxyError::inconsistent(format!("{source}:{}: {msg}", reg.line));

        let address = u16::try_from(reg.address)
            .map_err(|_| fail(format!("address {} out of range 0..=65535", reg.address)))?;

        if template.registers.iter().any(|r| r.param_id == reg.param_id) {
            return Err(fail(format!("duplicate paramId {}", reg.param_id)));
        }

        let data_type = reg.data_type.unwrap_or(if reg.kind.is_bit() {
            DataType::Bool
        } else {
            DataType::U16
        });

        let definition = RegisterDefinition::new(position as u32, reg.kind, address, data_type)
            .with_param_id(reg.param_id)
            .with_byte_order(reg.byte_order)
            .with_scaling(reg.scale, reg.offset)
            .with_label(reg.label);
        template.registers.push(definition);
    }

    Ok(template)
}

fn pairs(line: &str) -> impl Iterator<Item = (String, &str)> {
    line.split(';').filter_map(|part| {
        let (key, value) = part.split_once('=')?;
        Some((key.trim().to_ascii_lowercase(), value.trim()))
    })
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> std::result::Result<T, String> {
    value
        .parse::<T>()
        .map_err(|_| format!("invalid {key} '{value}'"))
}

fn parse_device_line(line: &str, template: &mut OutstationTemplate) -> std::result::Result<(), String> {
    for (key, value) in pairs(line) {
        let value_owned = value.to_string();
        match key.as_str() {
            "vendorname" => template.identity.vendor_name = value_owned,
            "productcode" => template.identity.product_code = value_owned,
            "productname" => template.identity.product_name = value_owned,
            "modelname" => template.identity.model_name = value_owned,
            "majorminorrevision" => template.identity.major_minor_revision = value_owned,
            "sparse" => template.sparse = parse_number::<u8>(&key, value)? != 0,
            _ => debug!("Template device key '{}' ignored", key),
        }
    }
    Ok(())
}

fn parse_network_line(line: &str, template: &mut OutstationTemplate) -> std::result::Result<(), String> {
    for (key, value) in pairs(line) {
        match key.as_str() {
            "deviceid" => template.device_id = Some(value.to_string()),
            "networkid" => {
                let unit: u8 = parse_number(&key, value)?;
                if !(1..=247).contains(&unit) {
                    return Err(format!("networkId {unit} out of range 1..=247"));
                }
                template.unit_id = Some(unit);
            },
            "plcbaseaddress" => {
                template.one_based = match value {
                    "0" => false,
                    "1" => true,
                    other => return Err(format!("plcBaseAddress must be 0 or 1, got '{other}'")),
                };
            },
            _ => debug!("Template network key '{}' ignored", key),
        }
    }
    Ok(())
}

fn parse_register_line(line: &str, line_no: usize) -> std::result::Result<PendingRegister, String> {
    let mut param_id = None;
    let mut address = None;
    let mut kind = None;
    let mut reg = PendingRegister {
        line: line_no,
        param_id: 0,
        address: 0,
        kind: RegisterKind::HoldingRegister,
        data_type: None,
        byte_order: ByteOrder::default(),
        scale: 1.0,
        offset: 0.0,
        label: String::new(),
    };

    for (key, value) in pairs(line) {
        match key.as_str() {
            "paramid" => param_id = Some(parse_number::<u32>(&key, value)?),
            "address" => address = Some(parse_number::<u32>(&key, value)?),
            "registertype" => {
                kind = Some(value.parse::<RegisterKind>().map_err(|e| e.to_string())?)
            },
            "datatype" => {
                reg.data_type = Some(value.parse::<DataType>().map_err(|e| e.to_string())?)
            },
            "byteorder" => {
                reg.byte_order = value.parse::<ByteOrder>().map_err(|e| e.to_string())?
            },
            "scale" => reg.scale = parse_number(&key, value)?,
            "offset" => reg.offset = parse_number(&key, value)?,
            "label" => reg.label = value.to_string(),
            _ => debug!("Template register key '{}' ignored", key),
        }
    }

    reg.param_id = param_id.ok_or("register line without paramId")?;
    reg.address = address.ok_or_else(|| format!("paramId {} has no address", reg.param_id))?;
    reg.kind = kind.ok_or_else(|| format!("paramId {} has no registerType", reg.param_id))?;
    Ok(reg)
}
