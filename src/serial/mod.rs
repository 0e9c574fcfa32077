//! Serial port selection and the transport handed to loaders.

use std::time::Duration;

use log::{debug, info, warn};
use serialport::{SerialPortInfo, SerialPortType};
use tokio::io::AsyncWriteExt;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::Result;

/// USB vendor/product filter with the same matching rule as a browser
/// device picker: the vendor id must match, the product id only when set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortFilter {
    pub usb_vendor_id: Option<u16>,
    pub usb_product_id: Option<u16>,
}

impl PortFilter {
    pub fn vendor(vid: u16) -> Self {
        Self {
            usb_vendor_id: Some(vid),
            usb_product_id: None,
        }
    }

    pub fn device(vid: u16, pid: u16) -> Self {
        Self {
            usb_vendor_id: Some(vid),
            usb_product_id: Some(pid),
        }
    }

    /// USB-serial bridges commonly found on ESP32 boards.
    pub fn known_bridges() -> Vec<Self> {
        vec![
            Self::device(0x1a86, 0x7523), // CH340
            Self::device(0x10c4, 0xea60), // CP2102
            Self::vendor(0x303a),         // Espressif native USB
        ]
    }

    pub fn matches(&self, port: &SerialPortInfo) -> bool {
        let SerialPortType::UsbPort(usb) = &port.port_type else {
            return false;
        };
        self.usb_vendor_id.map_or(true, |vid| vid == usb.vid)
            && self.usb_product_id.map_or(true, |pid| pid == usb.pid)
    }
}

/// Chooses one of the offered ports, or `None` to cancel.
pub trait PortPicker {
    fn pick(&mut self, ports: &[SerialPortInfo]) -> Option<usize>;
}

impl<F> PortPicker for F
where
    F: FnMut(&[SerialPortInfo]) -> Option<usize>,
{
    fn pick(&mut self, ports: &[SerialPortInfo]) -> Option<usize> {
        self(ports)
    }
}

/// Keeps the ports accepted by at least one filter. No filters keeps all.
pub fn filter_ports(ports: Vec<SerialPortInfo>, filters: &[PortFilter]) -> Vec<SerialPortInfo> {
    if filters.is_empty() {
        return ports;
    }
    ports
        .into_iter()
        .filter(|port| filters.iter().any(|f| f.matches(port)))
        .collect()
}

/// Offers the matching ports to `picker`, returning `None` when the user
/// cancels or nothing matches.
pub fn request_port(
    filters: &[PortFilter],
    picker: &mut dyn PortPicker,
) -> Result<Option<SerialPortInfo>> {
    let ports = filter_ports(tokio_serial::available_ports()?, filters);
    Ok(pick_port(ports, picker))
}

fn pick_port(mut ports: Vec<SerialPortInfo>, picker: &mut dyn PortPicker) -> Option<SerialPortInfo> {
    if ports.is_empty() {
        warn!("No matching serial ports found");
        return None;
    }

    match picker.pick(&ports) {
        Some(index) if index < ports.len() => {
            let port = ports.swap_remove(index);
            info!("Selected serial port {}", port.port_name);
            Some(port)
        }
        _ => {
            debug!("Port selection cancelled");
            None
        }
    }
}

/// Human-readable one-line description of a port.
pub fn describe_port(port: &SerialPortInfo) -> String {
    match &port.port_type {
        SerialPortType::UsbPort(usb) => {
            let product = usb.product.as_deref().unwrap_or("USB serial");
            format!("{} ({}, {:04x}:{:04x})", port.port_name, product, usb.vid, usb.pid)
        }
        SerialPortType::BluetoothPort => format!("{} (Bluetooth)", port.port_name),
        SerialPortType::PciPort => format!("{} (PCI)", port.port_name),
        SerialPortType::Unknown => port.port_name.clone(),
    }
}

/// Exclusive handle on a selected serial port.
///
/// Creating a transport does not touch the device; the port is opened on
/// demand by whichever loader needs the raw serial lines.
pub struct Transport {
    port: SerialPortInfo,
    stream: Option<SerialStream>,
}

impl Transport {
    pub fn new(port: SerialPortInfo) -> Self {
        Self { port, stream: None }
    }

    /// Transport for a port known only by name.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self::new(SerialPortInfo {
            port_name: name.into(),
            port_type: SerialPortType::Unknown,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port.port_name
    }

    pub fn port_info(&self) -> &SerialPortInfo {
        &self.port
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Opens the port at `baud`, reusing the stream if it is already open.
    pub fn open(&mut self, baud: u32) -> Result<&mut SerialStream> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => {
                let stream = tokio_serial::new(self.port.port_name.as_str(), baud)
                    .timeout(Duration::from_secs(3))
                    .open_native_async()?;
                info!("Opened serial port {} at {} baud", self.port.port_name, baud);
                stream
            }
        };
        Ok(self.stream.insert(stream))
    }

    /// Releases the port. Safe to call repeatedly and on a transport that
    /// was never opened; errors while closing are ignored.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.flush().await {
                debug!("Ignoring error while closing {}: {}", self.port.port_name, e);
            }
            info!("Closed serial port {}", self.port.port_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    fn usb(name: &str, vid: u16, pid: u16) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.into(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid,
                pid,
                serial_number: None,
                manufacturer: None,
                product: None,
            }),
        }
    }

    fn ports() -> Vec<SerialPortInfo> {
        vec![
            usb("/dev/ttyUSB0", 0x1a86, 0x7523),
            usb("/dev/ttyACM0", 0x303a, 0x1001),
            usb("/dev/ttyACM1", 0x2e8a, 0x000a),
            SerialPortInfo {
                port_name: "/dev/ttyS0".into(),
                port_type: SerialPortType::Unknown,
            },
        ]
    }

    fn names(ports: &[SerialPortInfo]) -> Vec<&str> {
        ports.iter().map(|p| p.port_name.as_str()).collect()
    }

    #[test]
    fn no_filters_keeps_everything() {
        assert_eq!(filter_ports(ports(), &[]).len(), 4);
    }

    #[test]
    fn known_bridges_filter() {
        let kept = filter_ports(ports(), &PortFilter::known_bridges());
        assert_eq!(names(&kept), vec!["/dev/ttyUSB0", "/dev/ttyACM0"]);
    }

    #[test]
    fn product_id_must_match_when_set() {
        let kept = filter_ports(ports(), &[PortFilter::device(0x303a, 0x4001)]);
        assert!(kept.is_empty());
    }

    #[test]
    fn picker_cancel_is_not_an_error() {
        let mut cancel = |_: &[SerialPortInfo]| -> Option<usize> { None };
        let mut out_of_range = |_: &[SerialPortInfo]| -> Option<usize> { Some(17) };
        let mut first = |_: &[SerialPortInfo]| -> Option<usize> { Some(0) };
        assert!(pick_port(ports(), &mut cancel).is_none());
        assert!(pick_port(ports(), &mut out_of_range).is_none());
        assert!(pick_port(Vec::new(), &mut first).is_none());
    }

    #[test]
    fn picker_selects_port() {
        let mut by_name = |p: &[SerialPortInfo]| -> Option<usize> {
            p.iter().position(|p| p.port_name == "/dev/ttyACM0")
        };
        let port = pick_port(ports(), &mut by_name).unwrap();
        assert_eq!(port.port_name, "/dev/ttyACM0");
    }

    #[test]
    fn describes_usb_ports() {
        assert_eq!(
            describe_port(&usb("/dev/ttyUSB0", 0x1a86, 0x7523)),
            "/dev/ttyUSB0 (USB serial, 1a86:7523)"
        );
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let mut transport = Transport::from_name("/dev/does-not-exist");
        assert!(!transport.is_open());
        transport.disconnect().await;
        transport.disconnect().await;
        assert!(!transport.is_open());
    }
}
