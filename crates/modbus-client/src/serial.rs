use async_trait::async_trait;
use tokio_modbus::client::{rtu, Context};
use tokio_modbus::prelude::{Reader, Slave, Writer};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};

use crate::{pack_bits, ClientConfig, ClientError, RegisterLink, Request};

/// Modbus RTU over a serial line, 8N1.
#[derive(Debug)]
pub struct SerialLink {
    port: String,
    ctx: Context,
}

impl SerialLink {
    pub fn open(config: &ClientConfig) -> Result<Self, ClientError> {
        let stream = tokio_serial::new(config.serial_port.as_str(), config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open_native_async()
            .map_err(|source| ClientError::Open {
                port: config.serial_port.clone(),
                source,
            })?;
        let ctx = rtu::attach_slave(stream, Slave(config.slave_id));
        Ok(Self {
            port: config.serial_port.clone(),
            ctx,
        })
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

#[async_trait]
impl RegisterLink for SerialLink {
    async fn execute(&mut self, request: &Request) -> Result<Vec<u8>, ClientError> {
        let ctx = &mut self.ctx;
        let bytes = match request {
            Request::ReadCoils { address, quantity } => {
                pack_bits(&ctx.read_coils(*address, *quantity).await.map_err(ClientError::Modbus)?)
            }
            Request::ReadDiscreteInputs { address, quantity } => pack_bits(
                &ctx.read_discrete_inputs(*address, *quantity)
                    .await
                    .map_err(ClientError::Modbus)?,
            ),
            Request::ReadHoldingRegisters { address, quantity } => register_codec::words_to_bytes(
                &ctx.read_holding_registers(*address, *quantity)
                    .await
                    .map_err(ClientError::Modbus)?,
            ),
            Request::ReadInputRegisters { address, quantity } => register_codec::words_to_bytes(
                &ctx.read_input_registers(*address, *quantity)
                    .await
                    .map_err(ClientError::Modbus)?,
            ),
            Request::WriteSingleRegister { address, value } => {
                ctx.write_single_register(*address, *value)
                    .await
                    .map_err(ClientError::Modbus)?;
                Vec::new()
            }
            Request::WriteMultipleRegisters { address, words } => {
                ctx.write_multiple_registers(*address, words)
                    .await
                    .map_err(ClientError::Modbus)?;
                Vec::new()
            }
        };
        Ok(bytes)
    }

    async fn disconnect(&mut self) -> Result<(), ClientError> {
        self.ctx.disconnect().await.map_err(ClientError::Modbus)
    }
}
