//! Diagnostic techniques and the evidence they leave behind.
//!
//! Each [`Probe`] drives a short command sequence through a [`DeviceSession`] and returns
//! exactly one [`Observation`]. Command failures never escape a probe: they are counted
//! in `command_failures` and the affected step is recorded as not responding.

use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeSet;
use strum_macros::Display;
use tracing::{debug, info, warn};

use crate::codec::EncryptedPacket;
use crate::command::{Command, ConfigTarget, Opcode, Rgb, SegmentSetting};
use crate::error::LedError;
use crate::feedback::{ComparisonOutcome, InspectionFinding, OperatorFacts, OperatorFeedback};
use crate::session::{DeviceSession, SendResult};

/// Colour used to paint the pixel under test.
pub const PROBE_COLOR: Rgb = Rgb::RED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
pub enum ProbeId {
    IndividualAddress,
    CountSweep,
    Segment,
    ModelIndex,
    ConfigRead,
    /// Operator swapped in a known-good strip or controller
    ComparisonDevice,
    /// Operator looked at the strip and its supply
    PhysicalInspection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Responded {
    Single(bool),
    PerIndex(Vec<bool>),
}

impl Responded {
    pub fn any(&self) -> bool {
        match self {
            Responded::Single(r) => *r,
            Responded::PerIndex(v) => v.iter().any(|r| *r),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelResult {
    pub index: u16,
    pub acked: bool,
    /// Operator report; `None` when nobody answered
    pub lit: Option<bool>,
}

impl PixelResult {
    /// A lit report wins over the acknowledgement when both exist.
    pub fn responded(&self) -> bool {
        self.lit.unwrap_or(self.acked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepPoint {
    pub requested: u16,
    pub acked: bool,
    pub lit: Option<u16>,
    pub flicker: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldAck {
    pub label: String,
    pub acked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigReply {
    pub target: ConfigTarget,
    /// Raw notification, hex
    pub response: Option<String>,
    pub non_trivial: bool,
    /// Decrypted frame, hex, when the reply decoded as a read frame
    pub decoded: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservationDetail {
    Pixels { suspected_limit: u16, pixels: Vec<PixelResult> },
    Sweep { points: Vec<SweepPoint> },
    Fields { acks: Vec<FieldAck> },
    ConfigReplies { replies: Vec<ConfigReply> },
    Comparison { outcome: ComparisonOutcome },
    Inspection { finding: InspectionFinding },
}

/// Evidence from one probe execution. Never modified once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub probe_id: ProbeId,
    pub target_indices: BTreeSet<u16>,
    pub responded: Responded,
    pub notes: Vec<String>,
    pub detail: ObservationDetail,
    /// Commands that failed with a timeout, busy or channel error
    pub command_failures: u32,
}

impl Observation {
    /// Turn operator-supplied facts into evidence entries.
    pub fn from_facts(facts: &OperatorFacts) -> Vec<Observation> {
        let mut out = Vec::new();
        if let Some(outcome) = facts.comparison {
            out.push(Observation {
                probe_id: ProbeId::ComparisonDevice,
                target_indices: BTreeSet::new(),
                responded: Responded::Single(outcome == ComparisonOutcome::OtherStripWorks),
                notes: vec![format!("Comparison device: {outcome:?}")],
                detail: ObservationDetail::Comparison { outcome },
                command_failures: 0,
            });
        }
        if let Some(finding) = facts.inspection {
            out.push(Observation {
                probe_id: ProbeId::PhysicalInspection,
                target_indices: BTreeSet::new(),
                responded: Responded::Single(finding == InspectionFinding::NoDefect),
                notes: vec![format!("Physical inspection: {finding:?}")],
                detail: ObservationDetail::Inspection { finding },
                command_failures: 0,
            });
        }
        out
    }

    /// Individual-address results, if this is that probe's observation.
    pub fn pixels(&self) -> Option<(u16, &[PixelResult])> {
        match &self.detail {
            ObservationDetail::Pixels { suspected_limit, pixels } => Some((*suspected_limit, pixels)),
            _ => None,
        }
    }

    pub fn sweep_points(&self) -> Option<&[SweepPoint]> {
        match &self.detail {
            ObservationDetail::Sweep { points } => Some(points),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Paint single pixels, ascending, with the strip blanked before each one
    IndividualAddress { indices: Vec<u16>, suspected_limit: u16 },
    /// Set each candidate count and ask how many LEDs lit
    CountSweep { counts: Vec<u16> },
    Segment { settings: Vec<SegmentSetting> },
    ModelIndex { indices: Vec<u8> },
    ConfigRead { targets: Vec<ConfigTarget> },
}

enum Sent {
    Done(SendResult),
    Failed,
    Cancelled,
}

/// Bookkeeping shared by every probe run.
#[derive(Default)]
struct Log {
    notes: Vec<String>,
    failures: u32,
}

impl Log {
    async fn send(&mut self, session: &DeviceSession, command: Command) -> Sent {
        match session.send_command(&command).await {
            Ok(result) => Sent::Done(result),
            Err(LedError::Cancelled { .. }) => {
                self.notes.push(format!("Cancelled at {command}"));
                Sent::Cancelled
            }
            Err(e) => {
                warn!("{command} failed: {e}");
                self.notes.push(format!("{command}: {e}"));
                self.failures += 1;
                Sent::Failed
            }
        }
    }
}

impl Probe {
    pub fn id(&self) -> ProbeId {
        match self {
            Probe::IndividualAddress { .. } => ProbeId::IndividualAddress,
            Probe::CountSweep { .. } => ProbeId::CountSweep,
            Probe::Segment { .. } => ProbeId::Segment,
            Probe::ModelIndex { .. } => ProbeId::ModelIndex,
            Probe::ConfigRead { .. } => ProbeId::ConfigRead,
        }
    }

    pub async fn execute(&self, session: &DeviceSession, feedback: &mut dyn OperatorFeedback) -> Observation {
        info!("Running {} probe", self.id());
        let mut log = Log::default();
        let observation = match self {
            Probe::IndividualAddress { indices, suspected_limit } => {
                individual_address(session, feedback, &mut log, indices, *suspected_limit).await
            }
            Probe::CountSweep { counts } => count_sweep(session, feedback, &mut log, counts).await,
            Probe::Segment { settings } => {
                let commands = settings
                    .iter()
                    .map(|s| (s.to_string(), Command::SegmentConfig(*s)))
                    .collect();
                field_sweep(session, &mut log, ProbeId::Segment, commands).await
            }
            Probe::ModelIndex { indices } => {
                let commands = indices
                    .iter()
                    .map(|i| (format!("model index {i}"), Command::ModelIndex { index: i32::from(*i) }))
                    .collect();
                field_sweep(session, &mut log, ProbeId::ModelIndex, commands).await
            }
            Probe::ConfigRead { targets } => config_read(session, &mut log, targets).await,
        };
        debug!(
            "{} probe done: responded={}, {} failure(s)",
            observation.probe_id,
            observation.responded.any(),
            observation.command_failures
        );
        observation
    }
}

async fn individual_address(
    session: &DeviceSession,
    feedback: &mut dyn OperatorFeedback,
    log: &mut Log,
    indices: &[u16],
    suspected_limit: u16,
) -> Observation {
    let mut ordered = indices.to_vec();
    ordered.sort_unstable();
    ordered.dedup();

    let mut pixels = Vec::with_capacity(ordered.len());
    for &index in &ordered {
        if let Sent::Cancelled = log.send(session, Command::color(Rgb::BLACK)).await {
            break;
        }
        let acked = match log.send(session, Command::pixel(i64::from(index), PROBE_COLOR)).await {
            Sent::Done(result) => result.acked,
            Sent::Failed => false,
            Sent::Cancelled => break,
        };
        let lit = feedback.pixel_lit(index).await;
        debug!("Pixel {index}: acked={acked} lit={lit:?}");
        pixels.push(PixelResult { index, acked, lit });
    }

    let beyond: Vec<&PixelResult> = pixels.iter().filter(|p| p.index >= suspected_limit).collect();
    if !beyond.is_empty() {
        let responding = beyond.iter().filter(|p| p.responded()).count();
        log.notes.push(format!(
            "{responding}/{} pixels at or beyond index {suspected_limit} responded",
            beyond.len()
        ));
    }

    Observation {
        probe_id: ProbeId::IndividualAddress,
        target_indices: pixels.iter().map(|p| p.index).collect(),
        responded: Responded::PerIndex(pixels.iter().map(PixelResult::responded).collect()),
        notes: std::mem::take(&mut log.notes),
        detail: ObservationDetail::Pixels { suspected_limit, pixels },
        command_failures: log.failures,
    }
}

async fn count_sweep(
    session: &DeviceSession,
    feedback: &mut dyn OperatorFeedback,
    log: &mut Log,
    counts: &[u16],
) -> Observation {
    let mut points = Vec::with_capacity(counts.len());
    for &requested in counts {
        let acked = match log.send(session, Command::led_count(i64::from(requested))).await {
            Sent::Done(result) => result.acked,
            Sent::Failed => false,
            Sent::Cancelled => break,
        };
        // light the whole configured range so the operator can count it
        if let Sent::Cancelled = log.send(session, Command::color(Rgb::WHITE)).await {
            break;
        }
        let report = feedback.sweep_step(requested).await;
        debug!("Count {requested}: acked={acked} lit={:?} flicker={}", report.lit, report.flicker);
        points.push(SweepPoint {
            requested,
            acked,
            lit: report.lit,
            flicker: report.flicker,
        });
    }

    let lit: Vec<u16> = points.iter().filter_map(|p| p.lit).collect();
    if !lit.is_empty() {
        log.notes.push(format!("Reported lit counts: {lit:?}"));
    }
    if points.iter().any(|p| p.flicker) {
        log.notes.push("Flicker or dimming reported".to_string());
    }

    Observation {
        probe_id: ProbeId::CountSweep,
        target_indices: BTreeSet::new(),
        responded: Responded::Single(points.iter().any(|p| p.acked)),
        notes: std::mem::take(&mut log.notes),
        detail: ObservationDetail::Sweep { points },
        command_failures: log.failures,
    }
}

async fn field_sweep(
    session: &DeviceSession,
    log: &mut Log,
    probe_id: ProbeId,
    commands: Vec<(String, Command)>,
) -> Observation {
    let mut acks = Vec::with_capacity(commands.len());
    for (label, command) in commands {
        let acked = match log.send(session, command).await {
            Sent::Done(result) => result.acked,
            Sent::Failed => false,
            Sent::Cancelled => break,
        };
        acks.push(FieldAck { label, acked });
    }

    Observation {
        probe_id,
        target_indices: BTreeSet::new(),
        responded: Responded::Single(acks.iter().any(|a| a.acked)),
        notes: std::mem::take(&mut log.notes),
        detail: ObservationDetail::Fields { acks },
        command_failures: log.failures,
    }
}

async fn config_read(session: &DeviceSession, log: &mut Log, targets: &[ConfigTarget]) -> Observation {
    let mut replies = Vec::with_capacity(targets.len());
    for &target in targets {
        let raw = match log.send(session, Command::ConfigRead(target)).await {
            Sent::Done(result) => result.raw_response,
            Sent::Failed => None,
            Sent::Cancelled => break,
        };
        replies.push(inspect_reply(session, log, target, raw));
    }

    if replies.iter().all(|r| !r.non_trivial) {
        log.notes.push("Controller stayed silent on every read".to_string());
    }

    Observation {
        probe_id: ProbeId::ConfigRead,
        target_indices: BTreeSet::new(),
        responded: Responded::Single(replies.iter().any(|r| r.non_trivial)),
        notes: std::mem::take(&mut log.notes),
        detail: ObservationDetail::ConfigReplies { replies },
        command_failures: log.failures,
    }
}

fn inspect_reply(session: &DeviceSession, log: &mut Log, target: ConfigTarget, raw: Option<Bytes>) -> ConfigReply {
    let Some(raw) = raw else {
        return ConfigReply {
            target,
            response: None,
            non_trivial: false,
            decoded: None,
        };
    };

    let non_trivial = raw.iter().any(|b| *b != 0);
    let decoded = match session.codec().decode(&EncryptedPacket::from(raw.clone()), Opcode::ConfigRead) {
        Ok(frame) => Some(hex::encode(frame.as_bytes())),
        Err(e) => {
            warn!("Discarding {target} reply: {e}");
            log.notes.push(format!("{target} reply discarded: {e}"));
            None
        }
    };

    ConfigReply {
        target,
        response: Some(hex::encode(&raw)),
        non_trivial,
        decoded,
    }
}
