//! Connection state machine around a [`DeviceChannel`].
//!
//! `Disconnected -> connect -> Connected -> send_command -> Busy -> Connected -> disconnect`.
//! A session admits one command at a time; a second caller gets [`LedError::SessionBusy`]
//! instead of being queued.

use bytes::Bytes;
use std::sync::{Mutex, MutexGuard};
use strum_macros::Display;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::channel::{ChannelError, DeviceChannel, WriteMode};
use crate::codec::{EncryptedPacket, PacketCodec, ProtocolProfile};
use crate::command::{Command, Opcode, Rgb};
use crate::config::SessionConfig;
use crate::error::LedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Busy,
}

/// Outcome of one delivered command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    /// The write was confirmed by the peripheral or answered with a notification
    pub acked: bool,
    /// First notification seen within the response window, if any
    pub raw_response: Option<Bytes>,
}

#[derive(Debug)]
struct SessionState {
    connection: ConnectionState,
    last_error: Option<String>,
}

enum AttemptFailure {
    TimedOut,
    Channel(ChannelError),
}

pub struct DeviceSession {
    channel: Box<dyn DeviceChannel>,
    codec: PacketCodec,
    config: SessionConfig,
    address: String,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
}

/// Returns the session to `Connected` when a send finishes, however it finishes.
struct BusyGuard<'a> {
    session: &'a DeviceSession,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.session.lock_state();
        if state.connection == ConnectionState::Busy {
            state.connection = ConnectionState::Connected;
        }
    }
}

impl DeviceSession {
    pub fn new(channel: Box<dyn DeviceChannel>, address: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            channel,
            codec: PacketCodec::default(),
            config,
            address: address.into(),
            state: Mutex::new(SessionState {
                connection: ConnectionState::Disconnected,
                last_error: None,
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Use a different key than the stock iDeal LED one.
    pub fn with_profile(mut self, profile: &ProtocolProfile) -> Self {
        self.codec = PacketCodec::new(profile);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn codec(&self) -> &PacketCodec {
        &self.codec
    }

    pub fn state(&self) -> ConnectionState {
        self.lock_state().connection
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock_state().last_error.clone()
    }

    /// Token that aborts retries and pending waits. Cancelling it does not disconnect.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_error(&self, error: &LedError) {
        self.lock_state().last_error = Some(error.to_string());
    }

    /// Connect to the configured address, retrying up to `max_attempts` bounded waits.
    pub async fn connect(&self) -> Result<(), LedError> {
        if self.state() != ConnectionState::Disconnected {
            debug!("Already connected to {}", self.address);
            return Ok(());
        }

        let attempts = self.config.max_attempts.max(1);
        let mut reason = String::new();
        for attempt in 1..=attempts {
            info!("Connecting to {} (attempt {attempt}/{attempts})...", self.address);
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    let err = LedError::Cancelled { context: format!("connect to {}", self.address) };
                    self.record_error(&err);
                    return Err(err);
                }
                r = timeout(self.config.connect_timeout, self.channel.connect(&self.address)) => r,
            };

            match outcome {
                Ok(Ok(())) => {
                    sleep(self.config.settle_delay).await;
                    let mut state = self.lock_state();
                    state.connection = ConnectionState::Connected;
                    state.last_error = None;
                    info!("Connected to {}", self.address);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!("Connection attempt {attempt} failed: {e}");
                    reason = e.to_string();
                }
                Err(_) => {
                    warn!(
                        "No device found within {:?} (attempt {attempt})",
                        self.config.connect_timeout
                    );
                    reason = format!("no device found within {:?}", self.config.connect_timeout);
                }
            }
        }

        let err = LedError::ConnectionFailed {
            address: self.address.clone(),
            reason,
        };
        self.record_error(&err);
        Err(err)
    }

    /// Encode, write and wait for the controller to take `command`.
    ///
    /// Each attempt is bounded by `per_command_timeout`. The same encrypted packet is
    /// resent up to `max_attempts` times before [`LedError::CommandTimeout`].
    pub async fn send_command(&self, command: &Command) -> Result<SendResult, LedError> {
        let opcode = command.opcode();
        let packet = self.codec.encode(command)?;

        let _busy = self.begin_send(opcode)?;
        debug!("-> {command} [{packet}]");

        let result = self.send_with_retries(opcode, &packet).await;
        if let Err(e) = &result {
            self.record_error(e);
        }
        result
    }

    fn begin_send(&self, opcode: Opcode) -> Result<BusyGuard<'_>, LedError> {
        let mut state = self.lock_state();
        match state.connection {
            ConnectionState::Disconnected => Err(LedError::NotConnected { opcode }),
            ConnectionState::Busy => {
                warn!("{opcode} rejected: another command is in flight");
                Err(LedError::SessionBusy { opcode })
            }
            ConnectionState::Connected => {
                state.connection = ConnectionState::Busy;
                Ok(BusyGuard { session: self })
            }
        }
    }

    async fn send_with_retries(&self, opcode: Opcode, packet: &EncryptedPacket) -> Result<SendResult, LedError> {
        let attempts = self.config.max_attempts.max(1);
        let mut last_failure = AttemptFailure::TimedOut;

        for attempt in 1..=attempts {
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("{opcode} cancelled after {} attempt(s)", attempt - 1);
                    return Err(LedError::Cancelled { context: format!("{opcode} command") });
                }
                r = timeout(self.config.per_command_timeout, self.attempt(packet)) => r,
            };

            match outcome {
                Ok(Ok(result)) => {
                    trace!("<- {opcode} acked={} response={:?}", result.acked, result.raw_response.as_ref().map(hex::encode));
                    sleep(self.config.command_spacing).await;
                    return Ok(result);
                }
                Ok(Err(ChannelError::Disconnected)) => {
                    warn!("Device dropped the connection during {opcode}");
                    self.lock_state().connection = ConnectionState::Disconnected;
                    return Err(ChannelError::Disconnected.into());
                }
                Ok(Err(e)) => {
                    warn!("{opcode} attempt {attempt}/{attempts} failed: {e}");
                    last_failure = AttemptFailure::Channel(e);
                }
                Err(_) => {
                    warn!(
                        "{opcode} attempt {attempt}/{attempts} timed out after {:?}",
                        self.config.per_command_timeout
                    );
                    last_failure = AttemptFailure::TimedOut;
                }
            }
        }

        Err(match last_failure {
            AttemptFailure::TimedOut => LedError::CommandTimeout { opcode, attempts },
            AttemptFailure::Channel(e) => e.into(),
        })
    }

    async fn attempt(&self, packet: &EncryptedPacket) -> Result<SendResult, ChannelError> {
        let confirmed = match self.channel.write(packet.as_bytes(), WriteMode::WithResponse).await {
            Ok(()) => true,
            Err(ChannelError::WriteRejected(reason)) => {
                debug!("Write with response rejected ({reason}), retrying without response");
                self.channel.write(packet.as_bytes(), WriteMode::WithoutResponse).await?;
                false
            }
            Err(e) => return Err(e),
        };

        let raw_response = match timeout(self.config.response_window, self.channel.next_notification()).await {
            Ok(Ok(bytes)) if !bytes.is_empty() => Some(bytes),
            Ok(Ok(_)) => None,
            Ok(Err(ChannelError::Disconnected)) => return Err(ChannelError::Disconnected),
            Ok(Err(e)) => {
                trace!("No notification: {e}");
                None
            }
            Err(_) => None,
        };

        Ok(SendResult {
            acked: confirmed || raw_response.is_some(),
            raw_response,
        })
    }

    pub async fn send_power(&self, on: bool) -> Result<SendResult, LedError> {
        self.send_command(&Command::power(on)).await
    }

    pub async fn send_count(&self, count: u16) -> Result<SendResult, LedError> {
        self.send_command(&Command::led_count(i64::from(count))).await
    }

    pub async fn send_color(&self, color: Rgb) -> Result<SendResult, LedError> {
        self.send_command(&Command::color(color)).await
    }

    /// Always ends `Disconnected`. Errors from the channel are logged and dropped.
    pub async fn disconnect(&self) {
        let was = {
            let mut state = self.lock_state();
            std::mem::replace(&mut state.connection, ConnectionState::Disconnected)
        };
        if was == ConnectionState::Disconnected {
            return;
        }
        match timeout(self.config.connect_timeout, self.channel.disconnect()).await {
            Ok(Ok(())) => info!("Disconnected from {}", self.address),
            Ok(Err(e)) => warn!("Disconnect from {} reported: {e}", self.address),
            Err(_) => warn!("Disconnect from {} timed out", self.address),
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("address", &self.address)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
