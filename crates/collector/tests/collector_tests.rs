use std::sync::Arc;

use async_trait::async_trait;

use collector::{Collector, CollectorConfig, CollectorError, ReadStrategy};
use modbus_client::{ClientError, RegisterTransport, Request, ScriptedTransport};
use register_codec::CodecError;

fn device() -> ScriptedTransport {
    ScriptedTransport::new()
        .with_input(0x3100, &[1850, 520])
        .with_input(0x3104, &[1280])
        .with_input(0x311A, &[85])
        .with_input(0x3302, &[1440, 1200])
        .with_input(0x3102, &[962, 0])
        .with_input(0x3105, &[480])
        .with_input(0x3106, &[614, 0])
        .with_input(0x330C, &[1550, 0])
        .with_input(0x3201, &[0x0004])
        .with_input(0x3110, &[2500, 3200])
}

fn collector(transport: &ScriptedTransport, strategy: ReadStrategy) -> Collector {
    Collector::new(
        Arc::new(transport.clone()),
        CollectorConfig {
            strategy,
            read_recovery_ms: 0,
        },
    )
}

fn approx(got: f32, want: f32) -> bool {
    (got - want).abs() < 0.01
}

fn read_addresses(calls: &[Request]) -> Vec<(u16, u16)> {
    calls
        .iter()
        .map(|call| match call {
            Request::ReadInputRegisters { address, quantity } => (*address, *quantity),
            other => panic!("unexpected request {other:?}"),
        })
        .collect()
}

#[tokio::test]
async fn sequential_collection_decodes_every_register() {
    let transport = device();
    let snapshot = collector(&transport, ReadStrategy::Sequential)
        .get_status()
        .await
        .expect("collect");

    assert!(approx(snapshot.array_voltage, 18.5));
    assert!(approx(snapshot.array_current, 5.2));
    assert!(approx(snapshot.battery_voltage, 12.8));
    assert_eq!(snapshot.battery_soc, 85);
    assert!(approx(snapshot.battery_max_voltage, 14.4));
    assert!(approx(snapshot.battery_min_voltage, 12.0));
    assert!(approx(snapshot.array_power, 9.62));
    assert!(approx(snapshot.charging_current, 4.8));
    assert!(approx(snapshot.charging_power, 6.14));
    assert!(approx(snapshot.energy_generated_daily, 15.5));
    assert_eq!(snapshot.charging_status, 1);
    assert!(approx(snapshot.battery_temp, 25.0));
    assert!(approx(snapshot.device_temp, 32.0));
    assert!(snapshot.timestamp > 0);
    assert!(snapshot.collection_time >= 0.0);
}

#[tokio::test]
async fn sequential_collection_reads_in_device_order() {
    let transport = device();
    collector(&transport, ReadStrategy::Sequential)
        .get_status()
        .await
        .expect("collect");

    assert_eq!(
        read_addresses(&transport.calls().await),
        vec![
            (0x3100, 2),
            (0x3104, 1),
            (0x311A, 1),
            (0x3302, 2),
            (0x3102, 2),
            (0x3105, 1),
            (0x3106, 2),
            (0x330C, 2),
            (0x3201, 1),
            (0x3110, 2),
        ]
    );
}

#[tokio::test]
async fn batched_collection_matches_sequential() {
    let transport = device().with_missing_registers_as(0);
    let batched = collector(&transport, ReadStrategy::Batched)
        .get_status()
        .await
        .expect("batched");
    let sequential = collector(&device(), ReadStrategy::Sequential)
        .get_status()
        .await
        .expect("sequential");

    assert_eq!(
        read_addresses(&transport.calls().await),
        vec![(0x3100, 18), (0x311A, 1), (0x3302, 2), (0x330C, 2), (0x3201, 1)]
    );
    assert_eq!(
        (batched.array_voltage, batched.array_power, batched.battery_temp),
        (sequential.array_voltage, sequential.array_power, sequential.battery_temp)
    );
    assert_eq!(batched.charging_power, sequential.charging_power);
    assert_eq!(batched.device_temp, sequential.device_temp);
    assert_eq!(batched.battery_soc, 85);
}

#[tokio::test]
async fn negative_temperatures_wrap_around() {
    let transport = device().with_input(0x3110, &[64_536, 65_036]);
    let snapshot = collector(&transport, ReadStrategy::Sequential)
        .get_status()
        .await
        .expect("collect");

    assert!(approx(snapshot.battery_temp, -10.0));
    assert!(approx(snapshot.device_temp, -5.0));
}

#[tokio::test]
async fn charging_status_uses_bits_two_and_three() {
    for (raw, want) in [(0x0000u16, 0u32), (0x0001, 0), (0x0008, 2), (0x000C, 3), (0xFFF3, 0)] {
        let transport = device().with_input(0x3201, &[raw]);
        let snapshot = collector(&transport, ReadStrategy::Sequential)
            .get_status()
            .await
            .expect("collect");
        assert_eq!(snapshot.charging_status, want, "raw {raw:#06x}");
    }
}

#[tokio::test]
async fn failed_read_aborts_collection() {
    let transport = device().fail_at(0x3302);
    let err = collector(&transport, ReadStrategy::Sequential)
        .get_status()
        .await
        .expect_err("0x3302 fails");

    assert_eq!(err.address(), 0x3302);
    assert!(matches!(
        err,
        CollectorError::Read {
            source: ClientError::Modbus(_),
            ..
        }
    ));
    assert!(err.to_string().contains("0x3302"), "{err}");

    let calls = transport.calls().await;
    assert_eq!(calls.last().map(Request::address), Some(0x3302));
    assert_eq!(calls.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn recovery_interval_separates_reads() {
    let transport = device();
    let snapshot = Collector::new(Arc::new(transport.clone()), CollectorConfig::default())
        .get_status()
        .await
        .expect("collect");

    // ten reads, nine 50 ms pauses between them
    assert!((snapshot.collection_time - 0.45).abs() < 0.001, "{}", snapshot.collection_time);
}

/// Answers every read with a single byte.
struct TruncatingDevice;

#[async_trait]
impl RegisterTransport for TruncatingDevice {
    async fn call(&self, _request: Request) -> Result<Vec<u8>, ClientError> {
        Ok(vec![0x07])
    }
}

#[tokio::test]
async fn short_response_is_a_decode_error() {
    let err = Collector::new(
        Arc::new(TruncatingDevice),
        CollectorConfig {
            strategy: ReadStrategy::Sequential,
            read_recovery_ms: 0,
        },
    )
    .get_status()
    .await
    .expect_err("short payload");

    assert!(matches!(
        err,
        CollectorError::Decode {
            address: 0x3100,
            source: CodecError::InsufficientData {
                expected: 4,
                actual: 1,
                ..
            },
            ..
        }
    ));
}
