/**
 * Decode Report Example
 *
 * Feeds captured Tuya cluster frames from an air-quality sensor through the
 * built-in quirk tables and prints the resulting attribute updates.
 *
 * Run with `RUST_LOG=debug` to see the dispatch trace.
 */
use futures_util::StreamExt;
use std::time::Duration;
use tuya_quirks::{
    CommandOutcome, DeviceIdentity, DeviceOptions, OutboundCommand, QuirkRegistry, Transport,
    quirks,
};

/// Prints outbound commands instead of sending them.
struct PrintTransport;

impl Transport for PrintTransport {
    async fn send_command(&self, command: OutboundCommand) -> tuya_quirks::Result<()> {
        println!(
            "[SEND] {} payload={}",
            command.command,
            hex::encode(&command.payload)
        );
        Ok(())
    }

    async fn read_attributes(
        &self,
        endpoint: u8,
        cluster: u16,
        attributes: &[u16],
    ) -> tuya_quirks::Result<()> {
        println!("[READ] ep={} cluster=0x{:04X} attrs={:?}", endpoint, cluster, attributes);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> tuya_quirks::Result<()> {
    env_logger::init();
    println!("--- tuya-quirks {} - Decode Report ---", tuya_quirks::version());

    let mut registry = QuirkRegistry::new();
    quirks::register_all(&mut registry)?;
    println!("[INFO] {} quirk(s) registered", registry.len());

    let device = registry.create_device(
        DeviceIdentity::new("_TZE200_mja3fuja", "TS0601").with_ieee("a4:c1:38:00:00:00:00:01"),
        DeviceOptions::default(),
    )?;
    println!("[INFO] {:?}", device);

    let updates = device.updates();
    tokio::pin!(updates);

    let packets: [&[u8]; 5] = [
        b"\t2\x01\x00\x02\x02\x02\x00\x04\x00\x00\x01r",
        b"\t$\x01\x00\x00\x13\x02\x00\x04\x00\x00\x02\xd6",
        b"\t\x02\x01\x00\x00\x12\x02\x00\x04\x00\x00\xff\xef",
        b"\t\xa5\x02\x00\x01\x14\x02\x00\x04\x00\x00\x00\x01",
        // SetTime request
        b"\x09\x12\x24\x0d\x00",
    ];

    for packet in packets {
        match device.handle_packet(&PrintTransport, packet).await {
            Ok(CommandOutcome::Report(outcome)) => {
                println!(
                    "[REPORT] seq={} dispatched={} failed={}",
                    outcome.seq,
                    outcome.dispatched.len(),
                    outcome.failed.len()
                );
            }
            Ok(other) => println!("[INFO] {:?}", other),
            Err(e) => eprintln!("[ERROR] {}", e),
        }
    }

    while let Ok(Some(update)) = tokio::time::timeout(Duration::from_millis(50), updates.next()).await {
        println!(
            "[UPDATE] ep={} cluster=0x{:04X} attr=0x{:04X} value={}",
            update.endpoint, update.cluster, update.attribute, update.value
        );
    }

    Ok(())
}
