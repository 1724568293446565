use modbus_client::{ClientConfig, ModbusClient, RegisterTransport};

#[tokio::test]
async fn serial_device_integration_read() {
    let serial_port = match std::env::var("MODBUS_TEST_SERIAL_PORT") {
        Ok(value) => value,
        Err(_) => return,
    };

    let mut config = ClientConfig::default();
    config.serial_port = serial_port;
    config.baud_rate = env_u32("MODBUS_TEST_BAUD_RATE").unwrap_or(115_200);
    config.slave_id = env_u16("MODBUS_TEST_SLAVE_ID").unwrap_or(1) as u8;
    config.timeout_ms = env_u64("MODBUS_TEST_TIMEOUT_MS").unwrap_or(1_000);
    config.retry_delay_ms = env_u64("MODBUS_TEST_RETRY_DELAY_MS").unwrap_or(500);

    let start = env_u16("MODBUS_TEST_START").unwrap_or(0x3100);
    let count = env_u16("MODBUS_TEST_COUNT").unwrap_or(2);

    let client = ModbusClient::connect(&config).expect("connect");
    let bytes = client
        .read_input_registers(start, count)
        .await
        .expect("read");

    assert_eq!(bytes.len(), usize::from(count) * 2);
    client.close().await;
}

fn env_u16(key: &str) -> Option<u16> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}
