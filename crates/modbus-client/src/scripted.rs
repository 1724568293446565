use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::{pack_bits, ClientError, RegisterLink, RegisterTransport, Request};

#[derive(Debug, Clone, Copy)]
struct Failure {
    /// `None` fails forever.
    remaining: Option<usize>,
    writes_only: bool,
}

#[derive(Debug, Default)]
struct State {
    input: HashMap<u16, u16>,
    holding: HashMap<u16, u16>,
    coils: HashMap<u16, bool>,
    discrete: HashMap<u16, bool>,
    failures: HashMap<u16, Failure>,
    missing_fill: Option<u16>,
    response_delay: Option<Duration>,
    calls: Vec<Request>,
}

impl State {
    fn take_failure(&mut self, request: &Request) -> Option<ClientError> {
        let address = request.address();
        let failure = self.failures.get_mut(&address)?;
        if failure.writes_only && !request.is_write() {
            return None;
        }
        match failure.remaining.as_mut() {
            Some(0) => return None,
            Some(count) => *count -= 1,
            None => {}
        }
        Some(ClientError::Modbus(io::Error::new(
            io::ErrorKind::Other,
            format!("scripted failure on {} at 0x{address:04X}", request.name()),
        )))
    }

    fn words(
        map: &HashMap<u16, u16>,
        fill: Option<u16>,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ClientError> {
        (0..quantity)
            .map(|offset| {
                let register = address
                    .checked_add(offset)
                    .ok_or_else(|| ClientError::InvalidRequest("register address overflow".into()))?;
                map.get(&register).copied().or(fill).ok_or_else(|| {
                    ClientError::Modbus(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("illegal data address 0x{register:04X}"),
                    ))
                })
            })
            .collect()
    }

    fn bits(map: &HashMap<u16, bool>, address: u16, quantity: u16) -> Vec<bool> {
        (0..quantity)
            .map(|offset| {
                address
                    .checked_add(offset)
                    .and_then(|register| map.get(&register).copied())
                    .unwrap_or(false)
            })
            .collect()
    }

    fn respond(&mut self, request: &Request) -> Result<Vec<u8>, ClientError> {
        self.calls.push(request.clone());
        if let Some(err) = self.take_failure(request) {
            return Err(err);
        }

        match request {
            Request::ReadInputRegisters { address, quantity } => {
                Self::words(&self.input, self.missing_fill, *address, *quantity)
                    .map(|words| register_codec::words_to_bytes(&words))
            }
            Request::ReadHoldingRegisters { address, quantity } => {
                Self::words(&self.holding, self.missing_fill, *address, *quantity)
                    .map(|words| register_codec::words_to_bytes(&words))
            }
            Request::ReadCoils { address, quantity } => {
                Ok(pack_bits(&Self::bits(&self.coils, *address, *quantity)))
            }
            Request::ReadDiscreteInputs { address, quantity } => {
                Ok(pack_bits(&Self::bits(&self.discrete, *address, *quantity)))
            }
            Request::WriteSingleRegister { address, value } => {
                self.holding.insert(*address, *value);
                Ok(Vec::new())
            }
            Request::WriteMultipleRegisters { address, words } => {
                for (offset, word) in words.iter().enumerate() {
                    let register = u16::try_from(usize::from(*address) + offset).map_err(|_| {
                        ClientError::InvalidRequest("register address overflow".into())
                    })?;
                    self.holding.insert(register, *word);
                }
                Ok(Vec::new())
            }
        }
    }
}

/// In-memory register map answering requests like a controller would.
///
/// Clones share the same map, so a test can keep one handle for assertions
/// while another is owned by the code under test.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<State>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a setup change to the shared map, so earlier clones see it too.
    fn edit(self, apply: impl FnOnce(&mut State)) -> Self {
        {
            let locked = self.state.try_lock();
            debug_assert!(
                locked.is_ok(),
                "scripted transport reconfigured while a request holds its state"
            );
            if let Ok(mut state) = locked {
                apply(&mut state);
            }
        }
        self
    }

    pub fn with_input(self, address: u16, words: &[u16]) -> Self {
        self.edit(|state| insert_words(&mut state.input, address, words))
    }

    pub fn with_holding(self, address: u16, words: &[u16]) -> Self {
        self.edit(|state| insert_words(&mut state.holding, address, words))
    }

    pub fn with_coil(self, address: u16, on: bool) -> Self {
        self.edit(|state| {
            state.coils.insert(address, on);
        })
    }

    pub fn with_discrete_input(self, address: u16, on: bool) -> Self {
        self.edit(|state| {
            state.discrete.insert(address, on);
        })
    }

    /// Answers reads of unmapped registers with `value` instead of an exception.
    pub fn with_missing_registers_as(self, value: u16) -> Self {
        self.edit(|state| state.missing_fill = Some(value))
    }

    pub fn with_response_delay(self, delay: Duration) -> Self {
        self.edit(|state| state.response_delay = Some(delay))
    }

    /// Every request starting at `address` fails.
    pub fn fail_at(self, address: u16) -> Self {
        self.edit(|state| {
            state.failures.insert(
                address,
                Failure {
                    remaining: None,
                    writes_only: false,
                },
            );
        })
    }

    /// The next `times` requests starting at `address` fail, later ones succeed.
    pub fn fail_times_at(self, address: u16, times: usize) -> Self {
        self.edit(|state| {
            state.failures.insert(
                address,
                Failure {
                    remaining: Some(times),
                    writes_only: false,
                },
            );
        })
    }

    /// Writes starting at `address` fail, reads still succeed.
    pub fn fail_writes_at(self, address: u16) -> Self {
        self.edit(|state| {
            state.failures.insert(
                address,
                Failure {
                    remaining: None,
                    writes_only: true,
                },
            );
        })
    }

    /// Makes reads of `address` fail from now on.
    pub async fn break_register(&self, address: u16) {
        self.state.lock().await.failures.insert(
            address,
            Failure {
                remaining: None,
                writes_only: false,
            },
        );
    }

    pub async fn set_input(&self, address: u16, words: &[u16]) {
        insert_words(&mut self.state.lock().await.input, address, words);
    }

    pub async fn set_holding(&self, address: u16, words: &[u16]) {
        insert_words(&mut self.state.lock().await.holding, address, words);
    }

    pub async fn holding_value(&self, address: u16) -> Option<u16> {
        self.state.lock().await.holding.get(&address).copied()
    }

    /// Every request received so far, failed ones included.
    pub async fn calls(&self) -> Vec<Request> {
        self.state.lock().await.calls.clone()
    }

    pub async fn write_calls(&self) -> Vec<Request> {
        self.calls()
            .await
            .into_iter()
            .filter(Request::is_write)
            .collect()
    }

    async fn answer(&self, request: &Request) -> Result<Vec<u8>, ClientError> {
        let delay = self.state.lock().await.response_delay;
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        self.state.lock().await.respond(request)
    }
}

fn insert_words(map: &mut HashMap<u16, u16>, address: u16, words: &[u16]) {
    for (register, word) in (address..).zip(words) {
        map.insert(register, *word);
    }
}

#[async_trait]
impl RegisterTransport for ScriptedTransport {
    async fn call(&self, request: Request) -> Result<Vec<u8>, ClientError> {
        self.answer(&request).await
    }
}

#[async_trait]
impl RegisterLink for ScriptedTransport {
    async fn execute(&mut self, request: &Request) -> Result<Vec<u8>, ClientError> {
        self.answer(request).await
    }
}
