mod common;

use common::{PendingTransport, RecordingTransport, Request, device, device_with, value_report};
use futures_util::StreamExt;
use std::time::Duration;
use tuya_quirks::cluster::{attr, datapoint_attribute, id};
use tuya_quirks::definition::{EntityPlatform, EntityType};
use tuya_quirks::zcl::ZclHeader;
use tuya_quirks::{
    AttrValue, CommandType, Configured, DatapointValue, DeviceIdentity, DeviceOptions,
    EntityOptions, QuirkBuilder, QuirkError, QuirkRegistry,
};

const TH01Z: &str = "_TZE200_lve3dvpy";

#[tokio::test]
async fn enum_write_frames_like_the_device_expects() {
    common::init_logging();
    let mut registry = QuirkRegistry::new();
    QuirkBuilder::new("_TZE200_enumwrite", "TS0601")
        .tuya_enum(
            10,
            "work_mode",
            &[(0, "Auto"), (1, "Manual")],
            EntityOptions::named("work_mode", "Work mode").config(),
        )
        .add_to_registry(&mut registry)
        .unwrap();
    let dev = registry
        .create_device(DeviceIdentity::new("_TZE200_enumwrite", "TS0601"), DeviceOptions::default())
        .unwrap();

    let transport = RecordingTransport::default();
    let raw = dev
        .write_attribute(&transport, "work_mode", AttrValue::Int(1))
        .await
        .unwrap();
    assert_eq!(raw, DatapointValue::Enum(1));

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].command, CommandType::SetData);
    assert!(!sent[0].manufacturer_specific);
    // seq(2) then dp 10, enum, length 1, value 1
    assert_eq!(&sent[0].payload[2..], b"\n\x04\x00\x01\x01");

    let frame = dev.frame_command(&sent[0]).unwrap();
    let (header, payload) = ZclHeader::parse(&frame).unwrap();
    assert_eq!(header.frame_control, 0x01);
    assert_eq!(header.command_id, 0x00);
    assert_eq!(payload, sent[0].payload.as_slice());

    assert_eq!(
        dev.manufacturer_cluster().get(datapoint_attribute(10)),
        Some(AttrValue::Int(1))
    );
}

#[tokio::test]
async fn th01z_number_write_sends_raw_value() {
    let dev = device(TH01Z);
    let transport = RecordingTransport::default();

    dev.write_attribute(&transport, "alarm_temperature_max", AttrValue::Int(300))
        .await
        .unwrap();
    dev.write_attribute(&transport, "display_unit", AttrValue::Int(1))
        .await
        .unwrap();

    let sent = transport.sent();
    assert_eq!(&sent[0].payload[2..], &[10, 0x02, 0x00, 0x04, 0x00, 0x00, 0x01, 0x2C]);
    assert_eq!(&sent[1].payload[2..], &[9, 0x04, 0x00, 0x01, 0x01]);

    let seq = |p: &[u8]| u16::from_be_bytes([p[0], p[1]]);
    assert_eq!(seq(&sent[1].payload), seq(&sent[0].payload).wrapping_add(1));
}

#[tokio::test]
async fn th01z_time_sync_is_not_manufacturer_specific() {
    let dev = device(TH01Z);
    let transport = RecordingTransport::default();
    dev.handle_command(&transport, 0x24, &[0x00, 0x0d]).await.unwrap();

    let sent = transport.sent();
    assert_eq!(sent[0].command, CommandType::SetTime);
    assert!(!sent[0].manufacturer_specific);
    let frame = dev.frame_command(&sent[0]).unwrap();
    assert_eq!(frame[0], 0x01);
    assert_eq!(frame[2], 0x24);
}

#[test]
fn th01z_entities() {
    let dev = device(TH01Z);
    let entities = dev.entities();
    assert_eq!(entities.len(), 11);

    let by_name = |name: &str| entities.iter().find(|e| e.attribute_name == name).unwrap();

    let alarm = by_name("temperature_alarm");
    assert_eq!(alarm.platform, EntityPlatform::Sensor);
    assert_eq!(alarm.entity_type, EntityType::Standard);
    assert_eq!(alarm.options.len(), 3);
    assert_eq!(alarm.options[2].name, "Canceled");

    let unit = by_name("display_unit");
    assert_eq!(unit.platform, EntityPlatform::Select);
    assert_eq!(unit.entity_type, EntityType::Config);

    let max = by_name("alarm_temperature_max");
    assert_eq!(max.platform, EntityPlatform::Number);
    assert_eq!(max.multiplier, Some(0.1));
    assert_eq!(max.fallback_name.as_deref(), Some("Alarm temperature max"));
    let range = max.range.unwrap();
    assert_eq!((range.min, range.max, range.step), (-20.0, 60.0, 1.0));

    let interval = by_name("humidity_report_interval");
    assert_eq!(interval.device_class.as_deref(), Some("duration"));
    assert_eq!(interval.unit.as_deref(), Some("min"));
}

#[tokio::test]
async fn th01z_number_report_keeps_raw_value() {
    let dev = device(TH01Z);
    dev.handle_datapoint_report(&value_report(19, 5)).unwrap();
    assert_eq!(
        dev.manufacturer_cluster().get(datapoint_attribute(19)),
        Some(AttrValue::Int(5))
    );
}

#[tokio::test]
async fn write_times_out_without_retry() {
    let dev = device_with(
        TH01Z,
        DeviceOptions::default().with_write_timeout(Duration::from_millis(20)),
    );
    let err = dev
        .write_attribute(&PendingTransport, "humidity_sensitivity", AttrValue::Int(5))
        .await
        .unwrap_err();
    assert_eq!(err, QuirkError::WriteTimeout);
    assert_eq!(dev.manufacturer_cluster().get(datapoint_attribute(20)), None);
}

#[tokio::test]
async fn unwritable_attributes_are_rejected() {
    let dev = device("_TZE200_pay2byax");
    let transport = RecordingTransport::default();

    let err = dev
        .write_attribute(&transport, "illuminance", AttrValue::Int(10))
        .await
        .unwrap_err();
    assert!(matches!(err, QuirkError::InvalidArgument(_)));

    let err = dev
        .write_attribute(&transport, "no_such_thing", AttrValue::Int(1))
        .await
        .unwrap_err();
    assert!(matches!(err, QuirkError::InvalidArgument(_)));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn configure_queries_only_when_asked() {
    let transport = RecordingTransport::default();
    let dev = device(TH01Z);
    assert_eq!(dev.configure(&transport).await.unwrap(), Configured::default());
    assert!(transport.requests().is_empty());

    let mut registry = QuirkRegistry::new();
    QuirkBuilder::new("_TZE200_query", "TS0601")
        .tuya_temperature(1, 10)
        .skip_configuration()
        .query_on_configure()
        .add_to_registry(&mut registry)
        .unwrap();
    let dev = registry
        .create_device(DeviceIdentity::new("_TZE200_query", "TS0601"), DeviceOptions::default())
        .unwrap();
    assert!(dev.configure(&transport).await.unwrap().queried);

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].command, CommandType::QueryData);
    assert!(sent[0].payload.is_empty());
    assert!(!sent[0].manufacturer_specific);
}

#[tokio::test]
async fn configure_reads_basic_before_querying() {
    let basic_read = Request::Read {
        endpoint: 1,
        cluster: id::BASIC,
        attributes: vec![4, 0, 1, 5, 7, 0xFFFE],
    };
    let query = Request::Tuya(CommandType::QueryData);

    let cases = [
        (true, false, vec![basic_read.clone()]),
        (false, true, vec![query.clone()]),
        (true, true, vec![basic_read.clone(), query.clone()]),
        (false, false, vec![]),
    ];
    for (i, (read_attributes, data_query, expected)) in cases.into_iter().enumerate() {
        let manufacturer = format!("_TZE200_config{}", i);
        let mut registry = QuirkRegistry::new();
        QuirkBuilder::new(manufacturer.as_str(), "TS0601")
            .tuya_battery(1)
            .tuya_onoff(3)
            .tuya_enchantment(read_attributes, data_query)
            .skip_configuration()
            .add_to_registry(&mut registry)
            .unwrap();
        let dev = registry
            .create_device(DeviceIdentity::new(manufacturer.as_str(), "TS0601"), DeviceOptions::default())
            .unwrap();

        let transport = RecordingTransport::default();
        let done = dev.configure(&transport).await.unwrap();
        assert_eq!(
            done,
            Configured {
                read_attributes,
                queried: data_query
            }
        );
        assert_eq!(transport.requests(), expected, "case {}", i);
    }
}

#[tokio::test]
async fn basic_read_times_out() {
    let mut registry = QuirkRegistry::new();
    QuirkBuilder::new("_TZE200_slowread", "TS0601")
        .tuya_battery(1)
        .read_attributes_on_configure()
        .query_on_configure()
        .add_to_registry(&mut registry)
        .unwrap();
    let dev = registry
        .create_device(
            DeviceIdentity::new("_TZE200_slowread", "TS0601"),
            DeviceOptions::default().with_write_timeout(Duration::from_millis(20)),
        )
        .unwrap();
    assert_eq!(dev.configure(&PendingTransport).await.unwrap_err(), QuirkError::WriteTimeout);
}

#[tokio::test]
async fn observers_see_updates_in_order() {
    let dev = device("_TZE200_a8sdabtg");
    let updates = dev.updates();
    tokio::pin!(updates);

    dev.handle_datapoint_report(&value_report(1, 215)).unwrap();

    // raw mirror first, then the temperature attribute
    let mirror = updates.next().await.unwrap();
    assert_eq!(mirror.cluster, id::TUYA_MANUFACTURER);
    assert_eq!(mirror.attribute, datapoint_attribute(1));

    let temperature = updates.next().await.unwrap();
    assert_eq!(temperature.endpoint, 1);
    assert_eq!(temperature.cluster, id::TEMPERATURE_MEASUREMENT);
    assert_eq!(temperature.attribute, attr::MEASURED_VALUE);
    assert_eq!(temperature.value, AttrValue::Int(2150));
}
