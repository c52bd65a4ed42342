//! Fault classification over an evidence log.
//!
//! [`classify`] turns observations into votes, one per discriminating signal, and
//! resolves them into a single [`Diagnosis`]. Hardware faults only reach `High` from a
//! physical inspection; software probing alone tops out at `Medium` for them.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::feedback::{ComparisonOutcome, InspectionFinding};
use crate::probe::{Observation, ObservationDetail, PixelResult, SweepPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum FaultCategory {
    HardwareFault,
    PowerFault,
    FirmwareConfigLimit,
    Inconclusive,
}

impl FaultCategory {
    /// Tie-break rank, higher wins.
    fn precedence(self) -> u8 {
        match self {
            FaultCategory::FirmwareConfigLimit => 3,
            FaultCategory::PowerFault => 2,
            FaultCategory::HardwareFault => 1,
            FaultCategory::Inconclusive => 0,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum Confidence {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Confidence {
    /// One level down, saturating at `Low`.
    pub fn degrade(self) -> Confidence {
        Confidence::try_from(u8::from(self).saturating_sub(1)).unwrap_or(Confidence::Low)
    }
}

/// Final classification of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnosis {
    pub category: FaultCategory,
    pub confidence: Confidence,
    /// Second candidate the evidence cannot rule out
    pub alternative: Option<FaultCategory>,
    pub evidence: Vec<Observation>,
    pub recommended_actions: Vec<String>,
}

impl Diagnosis {
    pub fn is_decisive(&self, threshold: Confidence) -> bool {
        self.category != FaultCategory::Inconclusive && self.confidence >= threshold
    }
}

impl std::fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.category)?;
        if let Some(alt) = self.alternative {
            write!(f, " or {alt}")?;
        }
        write!(f, " ({} confidence)", self.confidence)
    }
}

#[derive(Debug, Clone)]
struct Vote {
    category: FaultCategory,
    confidence: Confidence,
    alternative: Option<FaultCategory>,
    /// The observation behind this vote lost commands along the way
    impaired: bool,
    reason: String,
}

/// Classify the evidence log. Pure; the same observations always give the same result.
pub fn classify(observations: &[Observation]) -> Diagnosis {
    let pixels_dead_beyond = observations
        .iter()
        .filter_map(Observation::pixels)
        .any(|(limit, pixels)| matches!(pixel_signal(limit, pixels), PixelSignal::NoneBeyond { .. }));

    let mut votes = Vec::new();
    for observation in observations {
        let impaired = observation.command_failures > 0;
        let mut vote = |category, confidence, alternative, reason: String| {
            votes.push(Vote {
                category,
                confidence,
                alternative,
                impaired,
                reason,
            })
        };

        match &observation.detail {
            ObservationDetail::Pixels { suspected_limit, pixels } => match pixel_signal(*suspected_limit, pixels) {
                PixelSignal::AllBeyond => vote(
                    FaultCategory::FirmwareConfigLimit,
                    Confidence::High,
                    None,
                    format!("every sampled pixel from index {suspected_limit} on responded"),
                ),
                PixelSignal::NoneBeyond { controls_dead: false } => vote(
                    FaultCategory::HardwareFault,
                    Confidence::Medium,
                    Some(FaultCategory::PowerFault),
                    format!("no sampled pixel from index {suspected_limit} on responded"),
                ),
                // the whole strip stays dark: supply first, wiring second
                PixelSignal::NoneBeyond { controls_dead: true } => vote(
                    FaultCategory::PowerFault,
                    Confidence::Medium,
                    Some(FaultCategory::HardwareFault),
                    "no sampled pixel responded, below the limit or beyond it".to_string(),
                ),
                PixelSignal::BreaksAt(index) => vote(
                    FaultCategory::HardwareFault,
                    Confidence::Low,
                    None,
                    format!("pixels beyond the limit respond up to index {index}, then stop"),
                ),
                PixelSignal::NonDiscriminating => {}
            },
            ObservationDetail::Sweep { points } => {
                if points.iter().any(|p| p.flicker) {
                    vote(
                        FaultCategory::PowerFault,
                        Confidence::Medium,
                        None,
                        "flicker or dimming reported during the count sweep".to_string(),
                    );
                }
                if let Some(plateau) = plateau(points) {
                    if !pixels_dead_beyond {
                        vote(
                            FaultCategory::FirmwareConfigLimit,
                            Confidence::High,
                            None,
                            format!("lit count stays at {plateau} whatever count is requested"),
                        );
                    }
                }
            }
            ObservationDetail::Inspection { finding } => match finding {
                InspectionFinding::Defect => vote(
                    FaultCategory::HardwareFault,
                    Confidence::High,
                    None,
                    "physical defect found at the boundary".to_string(),
                ),
                InspectionFinding::PowerSupplyUndersized => vote(
                    FaultCategory::PowerFault,
                    Confidence::High,
                    None,
                    "power supply rated below the strip's draw".to_string(),
                ),
                InspectionFinding::NoDefect => {}
            },
            ObservationDetail::Comparison { outcome } => match outcome {
                ComparisonOutcome::AlsoLimited => vote(
                    FaultCategory::FirmwareConfigLimit,
                    Confidence::High,
                    None,
                    "a known-good strip stops at the same LED".to_string(),
                ),
                ComparisonOutcome::OtherStripWorks => vote(
                    FaultCategory::HardwareFault,
                    Confidence::Medium,
                    None,
                    "a known-good strip lights past the limit".to_string(),
                ),
            },
            // acknowledgement-only sweeps never discriminate
            ObservationDetail::Fields { .. } | ObservationDetail::ConfigReplies { .. } => {}
        }
    }

    resolve(&votes, observations)
}

fn resolve(votes: &[Vote], observations: &[Observation]) -> Diagnosis {
    let firmware_and_power = votes.iter().any(|v| v.category == FaultCategory::FirmwareConfigLimit)
        && votes.iter().any(|v| v.category == FaultCategory::PowerFault);

    let winner = votes
        .iter()
        .filter(|v| !firmware_and_power || v.category == FaultCategory::FirmwareConfigLimit)
        .max_by_key(|v| (v.confidence, v.category.precedence(), !v.impaired));

    let Some(winner) = winner else {
        return Diagnosis {
            category: FaultCategory::Inconclusive,
            confidence: Confidence::Low,
            alternative: None,
            evidence: observations.to_vec(),
            recommended_actions: actions_for(FaultCategory::Inconclusive),
        };
    };

    let confidence = if winner.impaired {
        winner.confidence.degrade()
    } else {
        winner.confidence
    };
    let mut recommended_actions = actions_for(winner.category);
    if let Some(alt) = winner.alternative {
        recommended_actions.extend(actions_for(alt));
    }

    tracing::debug!("Classified as {} ({confidence}): {}", winner.category, winner.reason);

    Diagnosis {
        category: winner.category,
        confidence,
        alternative: winner.alternative,
        evidence: observations.to_vec(),
        recommended_actions,
    }
}

enum PixelSignal {
    AllBeyond,
    /// Nothing beyond the limit responded; `controls_dead` when the working range is dark too
    NoneBeyond { controls_dead: bool },
    BreaksAt(u16),
    NonDiscriminating,
}

fn pixel_signal(limit: u16, pixels: &[PixelResult]) -> PixelSignal {
    let (controls, beyond): (Vec<&PixelResult>, Vec<&PixelResult>) = pixels.iter().partition(|p| p.index < limit);
    if beyond.is_empty() {
        return PixelSignal::NonDiscriminating;
    }

    let responding = beyond.iter().filter(|p| p.responded()).count();
    if responding == beyond.len() {
        PixelSignal::AllBeyond
    } else if responding == 0 {
        PixelSignal::NoneBeyond {
            controls_dead: !controls.is_empty() && !controls.iter().any(|p| p.responded()),
        }
    } else {
        let last_good = beyond
            .iter()
            .take_while(|p| p.responded())
            .last()
            .map_or(limit, |p| p.index);
        PixelSignal::BreaksAt(last_good)
    }
}

/// Lit count shared by every reported sweep step, when it sits below the largest request.
fn plateau(points: &[SweepPoint]) -> Option<u16> {
    let reported: Vec<(u16, u16)> = points.iter().filter_map(|p| p.lit.map(|lit| (p.requested, lit))).collect();
    let (_, first) = *reported.first()?;
    if reported.len() < 2 || reported.iter().any(|(_, lit)| *lit != first) {
        return None;
    }
    let max_requested = reported.iter().map(|(requested, _)| *requested).max()?;
    (first < max_requested).then_some(first)
}

fn actions_for(category: FaultCategory) -> Vec<String> {
    let actions: &[&str] = match category {
        FaultCategory::FirmwareConfigLimit => &[
            "Set the LED count again from the vendor app and power-cycle the controller",
            "Try each factory reset variant, then resend the LED count",
            "Ask the vendor for firmware that lifts the LED cap or for a controller rated for the full strip",
        ],
        FaultCategory::HardwareFault => &[
            "Inspect the strip at the first dark LED for a cut trace or cold solder joint",
            "Bypass the first dark LED by bridging its data line and retest",
        ],
        FaultCategory::PowerFault => &[
            "Check that the supply is rated for the full strip at white",
            "Inject power at the far end of the strip and retest",
        ],
        FaultCategory::Inconclusive => &[
            "Rerun the diagnostics with an operator reporting which LEDs light",
            "Compare against a known-good strip on the same controller",
        ],
    };
    actions.iter().map(|a| a.to_string()).collect()
}
