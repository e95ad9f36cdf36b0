//! Quirked device instances.
//! Owns the replacement clusters and buses of one joined device, turns inbound
//! Tuya commands into attribute updates and sends configuration back.

use crate::bus::{Bus, BusSet};
use crate::cluster::{
    AttrValue, AttributeStore, AttributeUpdate, Cluster, EventForwarder, attr,
    datapoint_attribute, id,
};
use crate::config::DeviceOptions;
use crate::definition::{EntityMetadata, QuirkDefinition};
use crate::dispatch::{AppliedUpdate, Dispatch, DispatchRouter, DispatchTargets};
use crate::error::{QuirkError, Result};
use crate::protocol::{
    CommandType, DatapointFrame, DatapointValue, SEQ_LEN, build_query_command,
    build_set_datapoint_command, build_set_time_payload, parse_report,
};
use crate::zcl::{TUYA_MANUFACTURER_CODE, ZclHeader};
use futures_core::stream::Stream;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU16, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;

/// Seconds between 1970-01-01 and 2000-01-01.
const Y2K_OFFSET_SECS: u64 = 946_684_800;

/// Basic attributes read at configure time: manufacturer name, ZCL version,
/// application version, model, power source and attribute reporting status.
pub const TUYA_BASIC_READ: [u16; 6] = [
    attr::MANUFACTURER_NAME,
    attr::ZCL_VERSION,
    attr::APP_VERSION,
    attr::MODEL_IDENTIFIER,
    attr::POWER_SOURCE,
    attr::ATTRIBUTE_REPORTING_STATUS,
];

/// Who a device is, as reported by its Basic cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub model: String,
    pub ieee: Option<String>,
}

impl DeviceIdentity {
    pub fn new(manufacturer: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            model: model.into(),
            ieee: None,
        }
    }

    pub fn with_ieee(mut self, ieee: impl Into<String>) -> Self {
        self.ieee = Some(ieee.into());
        self
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' '{}'", self.manufacturer, self.model)?;
        if let Some(ieee) = &self.ieee {
            write!(f, " [{}]", ieee)?;
        }
        Ok(())
    }
}

/// A Tuya cluster command ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCommand {
    pub command: CommandType,
    pub manufacturer_specific: bool,
    /// Command payload without the ZCL header
    pub payload: Vec<u8>,
}

impl OutboundCommand {
    /// Wraps the payload in a client-to-server ZCL header.
    pub fn to_zcl(&self, tsn: u8) -> Result<Vec<u8>> {
        let manufacturer = self.manufacturer_specific.then_some(TUYA_MANUFACTURER_CODE);
        ZclHeader::cluster_command(tsn, self.command.as_u8(), manufacturer).pack(&self.payload)
    }
}

/// Sends wrapped commands to the device. Retry policy belongs here, not in
/// the quirk layer.
pub trait Transport: Send + Sync {
    fn send_command(&self, command: OutboundCommand) -> impl Future<Output = Result<()>> + Send;

    /// Global Read_Attributes on a standard cluster of the device.
    fn read_attributes(
        &self,
        endpoint: u8,
        cluster: u16,
        attributes: &[u16],
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Which join-time requests [`QuirkedDevice::configure`] sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Configured {
    pub read_attributes: bool,
    pub queried: bool,
}

/// What one inbound report did.
#[derive(Debug, Clone, Default)]
pub struct ReportOutcome {
    pub seq: u16,
    /// One entry per successfully dispatched datapoint, in wire order
    pub dispatched: Vec<Dispatch>,
    /// Datapoints whose transform or bindings failed
    pub failed: Vec<(u8, QuirkError)>,
}

impl ReportOutcome {
    /// All binding effects in firing order.
    pub fn updates(&self) -> impl Iterator<Item = &AppliedUpdate> {
        self.dispatched.iter().flat_map(|d| match d {
            Dispatch::Applied { updates, .. } => updates.as_slice(),
            Dispatch::Unknown(_) => &[],
        })
    }

    pub fn unknown(&self) -> impl Iterator<Item = u8> + '_ {
        self.dispatched.iter().filter_map(|d| match d {
            Dispatch::Unknown(id) => Some(*id),
            Dispatch::Applied { .. } => None,
        })
    }
}

/// Result of handling one Tuya cluster command.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Report(ReportOutcome),
    TimeSynced,
    McuVersion(String),
    /// Commands this layer has no use for
    Ignored(u8),
}

/// A device instance backed by a quirk definition.
pub struct QuirkedDevice {
    identity: DeviceIdentity,
    router: DispatchRouter,
    clusters: BTreeMap<(u8, u16), Arc<Cluster>>,
    manufacturer: Arc<Cluster>,
    buses: BusSet,
    options: DeviceOptions,
    seq: AtomicU16,
    tsn: AtomicU8,
    updates_tx: broadcast::Sender<AttributeUpdate>,
}

impl QuirkedDevice {
    /// Instantiates the definition's clusters and buses and wires every bus
    /// subscription.
    pub fn new(
        identity: DeviceIdentity,
        definition: Arc<QuirkDefinition>,
        options: DeviceOptions,
    ) -> Result<Self> {
        let (updates_tx, _) = broadcast::channel(options.update_buffer.max(1));
        let buses = BusSet::new(definition.buses.iter().cloned(), options.bus_capacity);

        let mut clusters = BTreeMap::new();
        for ep in &definition.endpoints {
            for spec in &ep.input_clusters {
                let cluster = Arc::new(Cluster::new(ep.id, spec.clone(), updates_tx.clone()));
                for sub in &spec.subscriptions {
                    let bus = buses.get(&sub.channel).ok_or_else(|| {
                        QuirkError::InvalidDefinition(format!(
                            "{}: bus '{}' is not declared",
                            definition.label(),
                            sub.channel
                        ))
                    })?;
                    bus.subscribe(Arc::new(EventForwarder::new(
                        cluster.clone(),
                        sub.events.clone(),
                    )))?;
                }
                clusters.insert((ep.id, spec.id), cluster);
            }
        }

        let manufacturer = definition
            .manufacturer_endpoint()
            .and_then(|ep| clusters.get(&(ep, crate::cluster::id::TUYA_MANUFACTURER)))
            .cloned()
            .ok_or_else(|| {
                QuirkError::InvalidDefinition(format!(
                    "{}: no Tuya manufacturer cluster",
                    definition.label()
                ))
            })?;

        debug!(
            "Created quirked device {} from {} ({} clusters, {} buses)",
            identity,
            definition.label(),
            clusters.len(),
            buses.len()
        );

        Ok(Self {
            identity,
            router: DispatchRouter::new(definition),
            clusters,
            manufacturer,
            buses,
            options,
            seq: AtomicU16::new(rand::random()),
            tsn: AtomicU8::new(rand::random()),
            updates_tx,
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn definition(&self) -> &Arc<QuirkDefinition> {
        self.router.definition()
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    pub fn entities(&self) -> &[EntityMetadata] {
        &self.definition().entities
    }

    pub fn cluster(&self, endpoint: u8, cluster: u16) -> Option<&Arc<Cluster>> {
        self.clusters.get(&(endpoint, cluster))
    }

    pub fn cluster_by_name(&self, endpoint: u8, name: &str) -> Option<&Arc<Cluster>> {
        self.clusters
            .range((endpoint, 0)..=(endpoint, u16::MAX))
            .map(|(_, c)| c)
            .find(|c| c.name() == name)
    }

    pub fn endpoint_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.clusters.keys().map(|(ep, _)| *ep).collect();
        ids.dedup();
        ids
    }

    pub fn bus(&self, channel: &str) -> Option<&Arc<Bus>> {
        self.buses.get(channel)
    }

    pub fn manufacturer_cluster(&self) -> &Arc<Cluster> {
        &self.manufacturer
    }

    /// Last MCU version the device announced, e.g. `1.0.3`.
    pub fn mcu_version(&self) -> Option<String> {
        match self.manufacturer.get(attr::MCU_VERSION) {
            Some(AttrValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    fn next_seq(&self) -> u16 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn next_tsn(&self) -> u8 {
        self.tsn.fetch_add(1, Ordering::Relaxed)
    }
}

// -------------------------------------------------------------------------
// Inbound
// -------------------------------------------------------------------------
impl QuirkedDevice {
    /// Decodes a report payload (sequence number + datapoints) and dispatches
    /// every datapoint in wire order.
    ///
    /// A malformed buffer is rejected as a whole before anything is applied.
    /// Failures of individual datapoints are logged and collected; the rest of
    /// the batch still goes through.
    pub fn handle_datapoint_report(&self, payload: &[u8]) -> Result<ReportOutcome> {
        let report = parse_report(payload).map_err(|e| {
            error!(
                "Discarding report from {}: {} (payload: {})",
                self.identity,
                e,
                hex::encode(payload)
            );
            e
        })?;
        debug!(
            "Report from {} seq={} with {} datapoint(s)",
            self.identity,
            report.seq,
            report.frames.len()
        );

        let mut outcome = ReportOutcome {
            seq: report.seq,
            ..Default::default()
        };
        for frame in &report.frames {
            match self.router.dispatch(self, frame) {
                Ok(d) => outcome.dispatched.push(d),
                Err(e) => {
                    warn!(
                        "{}: datapoint {} (payload {}) failed: {}",
                        self.identity,
                        frame.id,
                        hex::encode(&frame.payload),
                        e
                    );
                    outcome.failed.push((frame.id, e));
                }
            }
        }
        Ok(outcome)
    }

    /// Handles one Tuya cluster command addressed to this device.
    pub async fn handle_command<T>(
        &self,
        transport: &T,
        command_id: u8,
        payload: &[u8],
    ) -> Result<CommandOutcome>
    where
        T: Transport,
    {
        let Some(command) = CommandType::from_u8(command_id) else {
            debug!("{}: ignoring unknown Tuya command 0x{:02X}", self.identity, command_id);
            return Ok(CommandOutcome::Ignored(command_id));
        };

        if command.is_report() {
            return self.handle_datapoint_report(payload).map(CommandOutcome::Report);
        }

        match command {
            CommandType::SetTime => {
                let reply = self.time_response(SystemTime::now())?;
                self.send(transport, reply).await?;
                Ok(CommandOutcome::TimeSynced)
            }
            CommandType::McuVersionResponse => {
                let version = parse_mcu_version(payload)?;
                info!("{} reports MCU version {}", self.identity, version);
                self.manufacturer
                    .update_attribute(attr::MCU_VERSION, AttrValue::Str(version.clone()));
                Ok(CommandOutcome::McuVersion(version))
            }
            other => {
                debug!("{}: nothing to do for {}", self.identity, other);
                Ok(CommandOutcome::Ignored(command_id))
            }
        }
    }

    /// Handles a raw ZCL frame received on the Tuya cluster.
    pub async fn handle_packet<T>(&self, transport: &T, packet: &[u8]) -> Result<CommandOutcome>
    where
        T: Transport,
    {
        let (header, payload) = ZclHeader::parse(packet).map_err(|e| {
            error!("{}: bad ZCL frame {}: {}", self.identity, hex::encode(packet), e);
            e
        })?;
        if !header.is_cluster_specific() {
            debug!("{}: ignoring profile-wide command 0x{:02X}", self.identity, header.command_id);
            return Ok(CommandOutcome::Ignored(header.command_id));
        }
        self.handle_command(transport, header.command_id, payload).await
    }

    /// Subscribes to every attribute update made on this device.
    pub fn updates(&self) -> impl Stream<Item = AttributeUpdate> + Send + 'static {
        let mut rx = self.updates_tx.subscribe();
        let identity = self.identity.clone();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(update) => yield update,
                    Err(RecvError::Lagged(n)) => {
                        warn!("{}: observer lagged, {} update(s) dropped", identity, n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

impl DispatchTargets for QuirkedDevice {
    fn manufacturer_cluster(&self) -> &Arc<Cluster> {
        &self.manufacturer
    }

    fn cluster(&self, endpoint: u8, cluster: u16) -> Option<&Arc<Cluster>> {
        self.clusters.get(&(endpoint, cluster))
    }

    fn bus(&self, channel: &str) -> Option<&Arc<Bus>> {
        self.buses.get(channel)
    }
}

// -------------------------------------------------------------------------
// Outbound
// -------------------------------------------------------------------------
impl QuirkedDevice {
    fn command(&self, command: CommandType, payload: Vec<u8>) -> OutboundCommand {
        OutboundCommand {
            command,
            manufacturer_specific: command == CommandType::SetTime
                && self.definition().mcu.set_time_manufacturer_specific,
            payload,
        }
    }

    async fn send<T>(&self, transport: &T, command: OutboundCommand) -> Result<()>
    where
        T: Transport,
    {
        debug!(
            "{}: sending {} payload {}",
            self.identity,
            command.command,
            hex::encode(&command.payload)
        );
        let cmd = command.command;
        self.within_deadline(cmd, transport.send_command(command)).await
    }

    async fn within_deadline<F>(&self, what: impl fmt::Display, request: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        match timeout(self.options.write_timeout(), request).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "{}: {} not acknowledged within {:?}",
                    self.identity,
                    what,
                    self.options.write_timeout()
                );
                Err(QuirkError::WriteTimeout)
            }
        }
    }

    /// Reads [`TUYA_BASIC_READ`] from the Basic cluster of the Tuya endpoint.
    pub async fn read_basic_attributes<T>(&self, transport: &T) -> Result<()>
    where
        T: Transport,
    {
        let endpoint = self.definition().manufacturer_endpoint().ok_or_else(|| {
            QuirkError::InvalidArgument(format!("{} has no Tuya endpoint", self.identity))
        })?;
        debug!(
            "{}: reading Basic attributes {:?} on endpoint {}",
            self.identity, TUYA_BASIC_READ, endpoint
        );
        self.within_deadline(
            "Basic Read_Attributes",
            transport.read_attributes(endpoint, id::BASIC, &TUYA_BASIC_READ),
        )
        .await
    }

    /// Writes a domain value to the datapoint registered as `attribute_name`.
    ///
    /// Returns the raw value that was sent. No retry on timeout.
    pub async fn write_attribute<T>(
        &self,
        transport: &T,
        attribute_name: &str,
        value: AttrValue,
    ) -> Result<DatapointValue>
    where
        T: Transport,
    {
        let wiring = self.definition().wiring_by_name(attribute_name).ok_or_else(|| {
            QuirkError::InvalidArgument(format!(
                "{} has no writable attribute '{}'",
                self.identity, attribute_name
            ))
        })?;
        let raw = wiring.transform.invert(&value, wiring.spec.data_type)?;
        let frame = DatapointFrame::from_value(wiring.spec.id, &raw);
        let payload = build_set_datapoint_command(self.next_seq(), &frame)?;

        self.send(transport, self.command(CommandType::SetData, payload)).await?;
        info!(
            "{}: wrote {} = {} (dp {} <- {:?})",
            self.identity, attribute_name, value, wiring.spec.id, raw
        );
        self.manufacturer
            .update_attribute(datapoint_attribute(wiring.spec.id), AttrValue::from(&raw));
        Ok(raw)
    }

    /// Asks the device to report all of its datapoints.
    pub async fn query<T>(&self, transport: &T) -> Result<()>
    where
        T: Transport,
    {
        self.send(transport, self.command(CommandType::QueryData, build_query_command()))
            .await
    }

    /// Runs the join-time Tuya setup: the Basic attribute read, then the
    /// data query, each only when the definition asks for it.
    ///
    /// `skip_configuration` only tells the host to skip standard reporting
    /// setup; it never suppresses these requests.
    pub async fn configure<T>(&self, transport: &T) -> Result<Configured>
    where
        T: Transport,
    {
        let def = self.definition();
        if def.skip_configuration {
            debug!("{}: host reporting configuration skipped", self.identity);
        }
        let mut done = Configured::default();
        if def.read_attributes_on_configure {
            self.read_basic_attributes(transport).await?;
            done.read_attributes = true;
        }
        if def.query_on_configure {
            self.query(transport).await?;
            done.queried = true;
        }
        Ok(done)
    }

    /// Builds the answer to a `SetTime` request for the given instant.
    pub fn time_response(&self, now: SystemTime) -> Result<OutboundCommand> {
        let since_unix = now
            .duration_since(UNIX_EPOCH)
            .map_err(|e| QuirkError::InvalidArgument(format!("clock before 1970: {}", e)))?
            .as_secs();
        let epoch_offset = match self.definition().mcu.time_epoch_year {
            1970 => 0,
            2000 => Y2K_OFFSET_SECS,
            other => {
                return Err(QuirkError::InvalidArgument(format!(
                    "unsupported time epoch {}",
                    other
                )));
            }
        };
        let utc = since_unix.saturating_sub(epoch_offset) as i64;
        let local = utc + self.options.utc_offset_secs as i64;
        let to_u32 = |v: i64| {
            u32::try_from(v)
                .map_err(|_| QuirkError::InvalidArgument(format!("timestamp {} out of range", v)))
        };
        let payload = build_set_time_payload(to_u32(utc)?, to_u32(local)?)?;
        Ok(self.command(CommandType::SetTime, payload))
    }

    /// Wraps a command with this device's next transaction number.
    pub fn frame_command(&self, command: &OutboundCommand) -> Result<Vec<u8>> {
        command.to_zcl(self.next_tsn())
    }
}

impl fmt::Debug for QuirkedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuirkedDevice")
            .field("identity", &self.identity)
            .field("quirk", &self.definition().label())
            .field("clusters", &self.clusters.len())
            .field("buses", &self.buses.len())
            .finish()
    }
}

/// `McuVersionResponse` payload: seq(2) + packed version byte `aabbcccc`.
fn parse_mcu_version(payload: &[u8]) -> Result<String> {
    let v = *payload.get(SEQ_LEN).ok_or_else(|| {
        QuirkError::MalformedFrame(format!(
            "MCU version payload too short ({} bytes)",
            payload.len()
        ))
    })?;
    Ok(format!("{}.{}.{}", v >> 6, (v >> 4) & 0x03, v & 0x0F))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterSpec, id};
    use crate::definition::{
        ClusterBinding, DatapointSpec, DatapointWiring, EndpointComposition, ManufacturerModel,
        McuOptions,
    };
    use crate::protocol::DataType;
    use crate::transform::TransformRule;
    use std::time::Duration;

    fn thermometer(epoch: u16) -> Arc<QuirkDefinition> {
        Arc::new(QuirkDefinition {
            models: vec![ManufacturerModel::new("_TZE200_therm", "TS0601")],
            endpoints: vec![
                EndpointComposition::new(1)
                    .input(ClusterSpec::tuya_manufacturer())
                    .input(ClusterSpec::temperature()),
            ],
            datapoints: vec![DatapointWiring {
                spec: DatapointSpec::new(1, "temperature", DataType::Value),
                transform: TransformRule::scaled(crate::transform::Scale::multiply(10)),
                bindings: vec![ClusterBinding::attribute(
                    1,
                    id::TEMPERATURE_MEASUREMENT,
                    attr::MEASURED_VALUE,
                )],
            }],
            entities: Vec::new(),
            buses: Vec::new(),
            mcu: McuOptions {
                set_time_manufacturer_specific: false,
                time_epoch_year: epoch,
            },
            skip_configuration: false,
            read_attributes_on_configure: false,
            query_on_configure: true,
            source: None,
        })
    }

    fn device(epoch: u16) -> QuirkedDevice {
        QuirkedDevice::new(
            DeviceIdentity::new("_TZE200_therm", "TS0601"),
            thermometer(epoch),
            DeviceOptions::default().with_utc_offset(3600),
        )
        .unwrap()
    }

    #[test]
    fn report_updates_target_and_mirror() {
        let dev = device(1970);
        let out = dev
            .handle_datapoint_report(&[0x00, 0x05, 0x01, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00, 0xD7])
            .unwrap();
        assert_eq!(out.seq, 5);
        assert_eq!(out.updates().count(), 1);
        let temp = dev.cluster(1, id::TEMPERATURE_MEASUREMENT).unwrap();
        assert_eq!(temp.get(attr::MEASURED_VALUE), Some(AttrValue::Int(2150)));
        assert_eq!(
            dev.manufacturer_cluster().get(datapoint_attribute(1)),
            Some(AttrValue::Int(215))
        );
    }

    #[test]
    fn malformed_report_applies_nothing() {
        let dev = device(1970);
        // first frame is fine, second is truncated
        let buf = [
            0x00, 0x01, 0x01, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00, 0xD7, 0x02, 0x02, 0x00, 0x04, 0x00,
        ];
        assert!(matches!(
            dev.handle_datapoint_report(&buf),
            Err(QuirkError::MalformedFrame(_))
        ));
        let temp = dev.cluster(1, id::TEMPERATURE_MEASUREMENT).unwrap();
        assert_eq!(temp.get(attr::MEASURED_VALUE), None);
    }

    #[test]
    fn time_response_uses_epoch_and_offset() {
        let now = UNIX_EPOCH + Duration::from_secs(Y2K_OFFSET_SECS + 100);
        let cmd = device(2000).time_response(now).unwrap();
        assert_eq!(cmd.command, CommandType::SetTime);
        assert_eq!(
            cmd.payload,
            vec![0x08, 0x00, 0, 0, 0, 100, 0, 0, 0x0E, 0x74]
        );

        let cmd = device(1970).time_response(UNIX_EPOCH + Duration::from_secs(1)).unwrap();
        assert_eq!(&cmd.payload[2..6], &[0, 0, 0, 1]);
    }

    #[test]
    fn mcu_version_unpacks_bits() {
        assert_eq!(parse_mcu_version(&[0x00, 0x01, 0x43]).unwrap(), "1.0.3");
        assert!(parse_mcu_version(&[0x00]).is_err());
    }

    #[test]
    fn cluster_lookup_by_name() {
        let dev = device(1970);
        assert!(dev.cluster_by_name(1, "temperature").is_some());
        assert!(dev.cluster_by_name(2, "temperature").is_none());
        assert_eq!(dev.endpoint_ids(), vec![1]);
    }

    #[test]
    fn outbound_frame_carries_manufacturer_code() {
        let cmd = OutboundCommand {
            command: CommandType::SetData,
            manufacturer_specific: true,
            payload: vec![0xAB],
        };
        assert_eq!(cmd.to_zcl(3).unwrap(), vec![0x05, 0x02, 0x10, 0x03, 0x00, 0xAB]);
    }
}
