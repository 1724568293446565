use std::sync::Arc;
use std::time::Duration;

use modbus_client::{ClientConfig, ClientError, ModbusClient, RegisterTransport, Request, ScriptedTransport};
use tokio::time::Instant;

fn client_over(transport: &ScriptedTransport) -> ModbusClient {
    ModbusClient::with_link(Box::new(transport.clone()), &ClientConfig::default())
}

#[tokio::test(start_paused = true)]
async fn failed_attempt_is_retried_after_fixed_delay() {
    let transport = ScriptedTransport::new()
        .with_input(0x3104, &[1250])
        .fail_times_at(0x3104, 1);
    let client = client_over(&transport);

    let started = Instant::now();
    let bytes = client
        .read_input_registers(0x3104, 1)
        .await
        .expect("second attempt succeeds");
    let elapsed = started.elapsed();

    assert_eq!(bytes, vec![0x04, 0xE2]);
    assert_eq!(transport.calls().await.len(), 2);
    assert!(elapsed >= Duration::from_secs(5), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(6), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn error_from_last_attempt_is_surfaced() {
    let transport = ScriptedTransport::new()
        .with_input(0x3104, &[1250])
        .fail_at(0x3104);
    let client = client_over(&transport);

    let err = client
        .read_input_registers(0x3104, 1)
        .await
        .expect_err("both attempts fail");

    assert!(matches!(err, ClientError::Modbus(_)), "got {err:?}");
    assert_eq!(transport.calls().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_device_times_out_on_every_attempt() {
    let transport = ScriptedTransport::new()
        .with_input(0x3100, &[1850])
        .with_response_delay(Duration::from_secs(30));
    let client = client_over(&transport);

    let started = Instant::now();
    let err = client
        .read_input_registers(0x3100, 1)
        .await
        .expect_err("timeout");

    assert!(matches!(err, ClientError::Timeout { timeout_ms: 5_000 }), "got {err:?}");
    // two 5s attempts plus one 5s retry delay
    assert_eq!(started.elapsed().as_secs(), 15);
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_never_overlap() {
    let transport = ScriptedTransport::new()
        .with_input(0x3100, &[1850, 300])
        .with_response_delay(Duration::from_secs(1));
    let client = client_over(&transport);

    let started = Instant::now();
    let (first, second) = tokio::join!(
        client.read_input_registers(0x3100, 1),
        client.read_input_registers(0x3101, 1),
    );

    assert_eq!(first.expect("first"), vec![0x07, 0x3A]);
    assert_eq!(second.expect("second"), vec![0x01, 0x2C]);
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn close_aborts_pending_retry() {
    let transport = ScriptedTransport::new().fail_at(0x9000);
    let client = Arc::new(client_over(&transport));

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.read_holding_registers(0x9000, 3).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    client.close().await;

    let result = pending.await.expect("join");
    assert!(matches!(result, Err(ClientError::Closed)), "got {result:?}");
    assert_eq!(transport.calls().await.len(), 1);

    let after_close = client.read_holding_registers(0x9000, 3).await;
    assert!(matches!(after_close, Err(ClientError::Closed)));
}

#[tokio::test]
async fn write_multiple_checks_quantity_against_data() {
    let transport = ScriptedTransport::new();
    let client = client_over(&transport);

    let err = client
        .write_multiple_registers(0x9003, 2, &[0x05, 0xDC])
        .await
        .expect_err("quantity mismatch");
    assert!(matches!(err, ClientError::InvalidRequest(_)));
    assert!(transport.calls().await.is_empty());

    client
        .write_multiple_registers(0x9003, 2, &[0x05, 0xDC, 0x05, 0xA0])
        .await
        .expect("write");
    assert_eq!(
        transport.write_calls().await,
        vec![Request::WriteMultipleRegisters {
            address: 0x9003,
            words: vec![1500, 1440],
        }]
    );
    assert_eq!(transport.holding_value(0x9004).await, Some(1440));
}

#[tokio::test]
async fn bit_reads_are_packed() {
    let transport = ScriptedTransport::new()
        .with_coil(0x0002, true)
        .with_discrete_input(0x2000, true);
    let client = client_over(&transport);

    assert_eq!(client.read_coils(0x0000, 4).await.expect("coils"), vec![0b0100]);
    assert_eq!(
        client.read_discrete_inputs(0x2000, 1).await.expect("discrete"),
        vec![0b0001]
    );
}

#[tokio::test]
async fn unmapped_register_is_an_exception() {
    let transport = ScriptedTransport::new().with_input(0x3100, &[1]);
    let err = transport
        .read_input_registers(0x3100, 2)
        .await
        .expect_err("0x3101 unmapped");
    assert!(matches!(err, ClientError::Modbus(_)));

    let filled = ScriptedTransport::new().with_missing_registers_as(0);
    assert_eq!(
        filled.read_input_registers(0x3100, 2).await.expect("filled"),
        vec![0, 0, 0, 0]
    );
}

#[tokio::test]
async fn setup_after_clone_reaches_every_handle() {
    let transport = ScriptedTransport::new();
    let client = client_over(&transport);

    let _configured = transport
        .clone()
        .with_input(0x311A, &[85])
        .with_holding(0x9000, &[4]);

    assert_eq!(transport.holding_value(0x9000).await, Some(4));
    let bytes = client
        .read_input_registers(0x311A, 1)
        .await
        .expect("input mapped after the link was built");
    assert_eq!(bytes, vec![0x00, 0x55]);
}
