//! Serial port discovery for meter selection

use serialport::SerialPortType;

/// A serial port that may host a meter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let product = usb.product.as_deref().unwrap_or("USB serial");
            format!("{product} ({:04x}:{:04x})", usb.vid, usb.pid)
        }
        SerialPortType::PciPort => "PCI serial".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth serial".to_string(),
        SerialPortType::Unknown => "unknown".to_string(),
    }
}

/// Enumerate serial ports visible to the OS.
///
/// Enumeration failures are logged and yield an empty list.
pub fn available_ports() -> Vec<PortInfo> {
    match serialport::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|p| PortInfo {
                description: describe(&p.port_type),
                name: p.port_name,
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Serial port enumeration failed");
            Vec::new()
        }
    }
}

/// Choose the port to use: an explicit override, else the configured default.
pub fn select_port(override_port: Option<&str>, configured: &str) -> String {
    match override_port {
        Some(port) if !port.trim().is_empty() => port.trim().to_string(),
        _ => configured.to_string(),
    }
}
