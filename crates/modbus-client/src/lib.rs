use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

mod scripted;
mod serial;

pub use scripted::ScriptedTransport;
pub use serial::SerialLink;

/// Configuration options for the serial Modbus RTU link.
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub serial_port: String,
    pub baud_rate: u32,
    pub slave_id: u8,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Total attempts per request, the first one included.
    pub retry_attempts: usize,
    /// Fixed delay between attempts in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            slave_id: 1,
            timeout_ms: 5_000,
            retry_attempts: 2,
            retry_delay_ms: 5_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },
    #[error("modbus transport error: {0}")]
    Modbus(std::io::Error),
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("modbus client closed")]
    Closed,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// One register operation, as sent to the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils { address: u16, quantity: u16 },
    ReadDiscreteInputs { address: u16, quantity: u16 },
    ReadHoldingRegisters { address: u16, quantity: u16 },
    ReadInputRegisters { address: u16, quantity: u16 },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleRegisters { address: u16, words: Vec<u16> },
}

impl Request {
    pub fn address(&self) -> u16 {
        match self {
            Request::ReadCoils { address, .. }
            | Request::ReadDiscreteInputs { address, .. }
            | Request::ReadHoldingRegisters { address, .. }
            | Request::ReadInputRegisters { address, .. }
            | Request::WriteSingleRegister { address, .. }
            | Request::WriteMultipleRegisters { address, .. } => *address,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::ReadCoils { .. } => "read coils",
            Request::ReadDiscreteInputs { .. } => "read discrete inputs",
            Request::ReadHoldingRegisters { .. } => "read holding registers",
            Request::ReadInputRegisters { .. } => "read input registers",
            Request::WriteSingleRegister { .. } => "write single register",
            Request::WriteMultipleRegisters { .. } => "write multiple registers",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Request::WriteSingleRegister { .. } | Request::WriteMultipleRegisters { .. }
        )
    }
}

/// The sole gateway to the device registers.
///
/// Reads return the raw big-endian register bytes (or packed bits for coils
/// and discrete inputs). Writes return an empty buffer.
#[async_trait]
pub trait RegisterTransport: Send + Sync {
    async fn call(&self, request: Request) -> Result<Vec<u8>, ClientError>;

    async fn read_input_registers(&self, address: u16, quantity: u16) -> Result<Vec<u8>, ClientError> {
        self.call(Request::ReadInputRegisters { address, quantity })
            .await
    }

    async fn read_holding_registers(&self, address: u16, quantity: u16) -> Result<Vec<u8>, ClientError> {
        self.call(Request::ReadHoldingRegisters { address, quantity })
            .await
    }

    async fn read_coils(&self, address: u16, quantity: u16) -> Result<Vec<u8>, ClientError> {
        self.call(Request::ReadCoils { address, quantity }).await
    }

    async fn read_discrete_inputs(&self, address: u16, quantity: u16) -> Result<Vec<u8>, ClientError> {
        self.call(Request::ReadDiscreteInputs { address, quantity })
            .await
    }

    async fn write_single_register(&self, address: u16, value: u16) -> Result<(), ClientError> {
        self.call(Request::WriteSingleRegister { address, value })
            .await
            .map(|_| ())
    }

    async fn write_multiple_registers(
        &self,
        address: u16,
        quantity: u16,
        data: &[u8],
    ) -> Result<(), ClientError> {
        let words = register_codec::bytes_to_words(data)
            .map_err(|err| ClientError::InvalidRequest(err.to_string()))?;
        if words.len() != usize::from(quantity) {
            return Err(ClientError::InvalidRequest(format!(
                "quantity {quantity} does not match {} registers of data",
                words.len()
            )));
        }
        self.call(Request::WriteMultipleRegisters { address, words })
            .await
            .map(|_| ())
    }
}

/// A single-attempt connection to the device.
#[async_trait]
pub trait RegisterLink: Send + fmt::Debug {
    async fn execute(&mut self, request: &Request) -> Result<Vec<u8>, ClientError>;

    async fn disconnect(&mut self) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Fixed-delay retry budget applied to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay: Duration::from_secs(5),
        }
    }
}

impl From<&ClientConfig> for RetryPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Serializes all register operations over one link and retries failures.
///
/// The link lock is held for the whole request, retry delays included, so
/// bytes of concurrent requests can never interleave on the half-duplex bus.
/// Dropping a pending call releases the lock and abandons the retry.
pub struct ModbusClient {
    link: Mutex<Box<dyn RegisterLink>>,
    retry: RetryPolicy,
    request_timeout: Duration,
    closed: CancellationToken,
}

impl fmt::Debug for ModbusClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModbusClient")
            .field("retry", &self.retry)
            .field("request_timeout", &self.request_timeout)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ModbusClient {
    /// Opens the serial port. Failing to open it is fatal and not retried.
    pub fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let link = SerialLink::open(config)?;
        Ok(Self::with_link(Box::new(link), config))
    }

    pub fn with_link(link: Box<dyn RegisterLink>, config: &ClientConfig) -> Self {
        Self {
            link: Mutex::new(link),
            retry: RetryPolicy::from(config),
            request_timeout: Duration::from_millis(config.timeout_ms),
            closed: CancellationToken::new(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Aborts pending retries and releases the link.
    pub async fn close(&self) {
        self.closed.cancel();
        let mut link = self.link.lock().await;
        if let Err(err) = link.disconnect().await {
            warn!(error = %err, "modbus disconnect failed");
        }
    }

    async fn attempt(&self, link: &mut Box<dyn RegisterLink>, request: &Request) -> Result<Vec<u8>, ClientError> {
        match timeout(self.request_timeout, link.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout {
                timeout_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl RegisterTransport for ModbusClient {
    async fn call(&self, request: Request) -> Result<Vec<u8>, ClientError> {
        if self.closed.is_cancelled() {
            return Err(ClientError::Closed);
        }

        let mut link = self.link.lock().await;
        let address = request.address();
        let mut attempt = 1usize;

        loop {
            let result = tokio::select! {
                result = self.attempt(&mut link, &request) => result,
                _ = self.closed.cancelled() => return Err(ClientError::Closed),
            };

            match result {
                Ok(data) => {
                    debug!(operation = request.name(), address, attempt, "modbus request ok");
                    return Ok(data);
                }
                Err(err) if attempt >= self.retry.attempts => {
                    warn!(
                        operation = request.name(),
                        address,
                        attempt,
                        error = %err,
                        "modbus request failed, giving up"
                    );
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        operation = request.name(),
                        address,
                        attempt,
                        error = %err,
                        "modbus request failed, retrying"
                    );
                }
            }

            attempt += 1;
            tokio::select! {
                _ = sleep(self.retry.delay) => {},
                _ = self.closed.cancelled() => return Err(ClientError::Closed),
            }
        }
    }
}

/// Packs coil/discrete input states LSB first, eight per byte.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; bits.len().div_ceil(8)];
    for (index, bit) in bits.iter().enumerate() {
        if *bit {
            out[index / 8] |= 1 << (index % 8);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::pack_bits;

    #[test]
    fn bits_are_packed_lsb_first() {
        assert_eq!(pack_bits(&[true, false, true]), vec![0b0000_0101]);
        assert_eq!(pack_bits(&[false; 9]), vec![0, 0]);
        assert!(pack_bits(&[]).is_empty());
    }
}
