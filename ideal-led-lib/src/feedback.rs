//! What the operator sees.
//!
//! Lighting is not machine-observable, so probes ask an [`OperatorFeedback`] whether a
//! pixel lit and how many LEDs a count sweep step lit. Facts gathered away from the
//! device (a second strip, a look at the solder joints) arrive as [`OperatorFacts`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::LedError;

/// Report for one count-sweep step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepFeedback {
    /// LEDs the operator counted as lit
    pub lit: Option<u16>,
    /// Flickering or dimming towards the end of the strip
    pub flicker: bool,
}

#[async_trait]
pub trait OperatorFeedback: Send {
    /// Did pixel `index` light up? `None` when nobody is watching.
    async fn pixel_lit(&mut self, _index: u16) -> Option<bool> {
        None
    }

    async fn sweep_step(&mut self, _requested: u16) -> SweepFeedback {
        SweepFeedback::default()
    }
}

/// Unattended run; probes fall back to acknowledgements.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFeedback;

#[async_trait]
impl OperatorFeedback for NoFeedback {}

/// Canned answers, typically recorded on a previous run and loaded from JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptedFeedback {
    pub pixels: BTreeMap<u16, bool>,
    pub sweep: BTreeMap<u16, SweepFeedback>,
}

impl ScriptedFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pixel(mut self, index: u16, lit: bool) -> Self {
        self.pixels.insert(index, lit);
        self
    }

    pub fn sweep(mut self, requested: u16, lit: u16) -> Self {
        self.sweep.entry(requested).or_default().lit = Some(lit);
        self
    }

    pub fn flicker_at(mut self, requested: u16) -> Self {
        self.sweep.entry(requested).or_default().flicker = true;
        self
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LedError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl OperatorFeedback for ScriptedFeedback {
    async fn pixel_lit(&mut self, index: u16) -> Option<bool> {
        self.pixels.get(&index).copied()
    }

    async fn sweep_step(&mut self, requested: u16) -> SweepFeedback {
        self.sweep.get(&requested).copied().unwrap_or_default()
    }
}

/// Result of driving the same controller output with a known-good strip, or this strip
/// with a known-good controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOutcome {
    /// The other strip lights past the limit on this controller setup
    OtherStripWorks,
    /// The other strip stops at the same LED
    AlsoLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionFinding {
    /// Broken trace, cold joint or dead pixel at the boundary
    Defect,
    /// Supply rated below what the full strip draws
    PowerSupplyUndersized,
    NoDefect,
}

/// External facts folded into the evidence log before the final classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorFacts {
    pub comparison: Option<ComparisonOutcome>,
    pub inspection: Option<InspectionFinding>,
}

impl OperatorFacts {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LedError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn is_empty(&self) -> bool {
        self.comparison.is_none() && self.inspection.is_none()
    }
}
