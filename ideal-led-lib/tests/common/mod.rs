//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use ideal_led_lib::probe::{ObservationDetail, PixelResult, Responded, SweepPoint};
#[allow(unused_imports)]
pub use ideal_led_lib::*;

use async_trait::async_trait;
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

/// What the fake controller does, shared with the test through [`ScriptedChannel`].
#[derive(Debug, Default)]
pub struct ChannelScript {
    /// Every write that reached the channel, in order
    pub writes: Vec<(Vec<u8>, WriteMode)>,
    /// Writes never complete
    pub stall_writes: bool,
    /// Only the next `n` writes never complete
    pub stall_next_writes: u32,
    /// Refuse `WithResponse` writes, as some controller firmwares do
    pub reject_with_response: bool,
    pub notifications: VecDeque<Bytes>,
    pub connect_error: Option<ChannelError>,
    pub connect_stalls: bool,
    pub connects: u32,
    pub disconnects: u32,
}

/// In-memory [`DeviceChannel`]. Clones share one script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedChannel {
    script: Arc<Mutex<ChannelScript>>,
}

#[allow(dead_code)]
impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ChannelScript) -> R) -> R {
        f(&mut self.script.lock().unwrap())
    }

    pub fn stalling() -> Self {
        let channel = Self::new();
        channel.with(|s| s.stall_writes = true);
        channel
    }

    pub fn writes(&self) -> Vec<(Vec<u8>, WriteMode)> {
        self.with(|s| s.writes.clone())
    }

    pub fn push_notification(&self, data: impl Into<Bytes>) {
        self.with(|s| s.notifications.push_back(data.into()));
    }
}

#[async_trait]
impl DeviceChannel for ScriptedChannel {
    async fn connect(&self, _address: &str) -> Result<(), ChannelError> {
        let (stalls, error) = self.with(|s| {
            s.connects += 1;
            (s.connect_stalls, s.connect_error.clone())
        });
        if stalls {
            std::future::pending::<()>().await;
        }
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn write(&self, data: &[u8], mode: WriteMode) -> Result<(), ChannelError> {
        let (stall, reject) = self.with(|s| {
            s.writes.push((data.to_vec(), mode));
            let stall = if s.stall_next_writes > 0 {
                s.stall_next_writes -= 1;
                true
            } else {
                s.stall_writes
            };
            (stall, s.reject_with_response && mode == WriteMode::WithResponse)
        });
        if stall {
            std::future::pending::<()>().await;
        }
        if reject {
            return Err(ChannelError::WriteRejected("write with response not permitted".to_string()));
        }
        Ok(())
    }

    async fn next_notification(&self) -> Result<Bytes, ChannelError> {
        match self.with(|s| s.notifications.pop_front()) {
            Some(data) => Ok(data),
            None => std::future::pending().await,
        }
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.with(|s| s.disconnects += 1);
        Ok(())
    }
}

/// Route library logs to the test harness; `RUST_LOG=debug` to see them.
#[allow(dead_code)]
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Session over `channel`, already connected.
#[allow(dead_code)]
pub async fn connected_session(channel: &ScriptedChannel, config: SessionConfig) -> DeviceSession {
    init_logging();
    let session = DeviceSession::new(Box::new(channel.clone()), "AA:BB:CC:DD:EE:FF", config);
    session.connect().await.unwrap();
    session
}

/// Individual-address observation with every pixel acknowledged and the given lit reports.
#[allow(dead_code)]
pub fn pixel_observation(limit: u16, pixels: &[(u16, bool)]) -> Observation {
    let pixels: Vec<PixelResult> = pixels
        .iter()
        .map(|&(index, lit)| PixelResult {
            index,
            acked: true,
            lit: Some(lit),
        })
        .collect();
    Observation {
        probe_id: ProbeId::IndividualAddress,
        target_indices: pixels.iter().map(|p| p.index).collect(),
        responded: Responded::PerIndex(pixels.iter().map(PixelResult::responded).collect()),
        notes: Vec::new(),
        detail: ObservationDetail::Pixels {
            suspected_limit: limit,
            pixels,
        },
        command_failures: 0,
    }
}

/// Count-sweep observation from `(requested, lit)` pairs.
#[allow(dead_code)]
pub fn sweep_observation(points: &[(u16, u16)], flicker: bool) -> Observation {
    let points: Vec<SweepPoint> = points
        .iter()
        .map(|&(requested, lit)| SweepPoint {
            requested,
            acked: true,
            lit: Some(lit),
            flicker,
        })
        .collect();
    Observation {
        probe_id: ProbeId::CountSweep,
        target_indices: BTreeSet::new(),
        responded: Responded::Single(true),
        notes: Vec::new(),
        detail: ObservationDetail::Sweep { points },
        command_failures: 0,
    }
}
