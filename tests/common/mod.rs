#![allow(dead_code)]

use parking_lot::Mutex;
use tuya_quirks::bus::BusListener;
use tuya_quirks::{
    AttrValue, CommandType, DeviceIdentity, DeviceOptions, OutboundCommand, QuirkRegistry,
    QuirkedDevice, Result, Transport, quirks,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Registry holding every built-in quirk.
pub fn registry() -> QuirkRegistry {
    init_logging();
    let mut registry = QuirkRegistry::new();
    quirks::register_all(&mut registry).unwrap();
    registry
}

pub fn device(manufacturer: &str) -> QuirkedDevice {
    device_with(manufacturer, DeviceOptions::default())
}

pub fn device_with(manufacturer: &str, options: DeviceOptions) -> QuirkedDevice {
    registry()
        .create_device(DeviceIdentity::new(manufacturer, "TS0601"), options)
        .unwrap()
}

/// Report payload: sequence number followed by one datapoint frame.
pub fn report(dp_id: u8, data_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x00, 0x01, dp_id, data_type];
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn value_report(dp_id: u8, value: i32) -> Vec<u8> {
    report(dp_id, 0x02, &value.to_be_bytes())
}

/// One request seen by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Tuya(CommandType),
    Read {
        endpoint: u8,
        cluster: u16,
        attributes: Vec<u16>,
    },
}

/// Accepts and remembers every request.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<OutboundCommand>>,
    pub requests: Mutex<Vec<Request>>,
}

impl RecordingTransport {
    /// Tuya cluster commands only.
    pub fn sent(&self) -> Vec<OutboundCommand> {
        self.sent.lock().clone()
    }

    /// Everything, in send order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }
}

impl Transport for RecordingTransport {
    async fn send_command(&self, command: OutboundCommand) -> Result<()> {
        self.requests.lock().push(Request::Tuya(command.command));
        self.sent.lock().push(command);
        Ok(())
    }

    async fn read_attributes(&self, endpoint: u8, cluster: u16, attributes: &[u16]) -> Result<()> {
        self.requests.lock().push(Request::Read {
            endpoint,
            cluster,
            attributes: attributes.to_vec(),
        });
        Ok(())
    }
}

/// Never acknowledges anything.
pub struct PendingTransport;

impl Transport for PendingTransport {
    async fn send_command(&self, _command: OutboundCommand) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn read_attributes(&self, _endpoint: u8, _cluster: u16, _attributes: &[u16]) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Remembers every bus event in delivery order.
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<(String, AttrValue)>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<(String, AttrValue)> {
        self.events.lock().clone()
    }
}

impl BusListener for RecordingListener {
    fn on_event(&self, event: &str, value: &AttrValue) -> Result<()> {
        self.events.lock().push((event.to_string(), value.clone()));
        Ok(())
    }
}
