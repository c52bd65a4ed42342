use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::command::{ConfigTarget, SegmentSetting};
use crate::diagnosis::Confidence;
use crate::error::LedError;

/// Timing and retry bounds for one [`DeviceSession`](crate::session::DeviceSession).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound for one write plus its response window
    #[serde(rename = "per_command_timeout_ms", with = "duration_ms")]
    pub per_command_timeout: Duration,
    /// Attempts per command before `CommandTimeout`; also bounds connection attempts
    #[serde(alias = "max_retries")]
    pub max_attempts: u32,
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Pause after connecting while the controller publishes its services
    #[serde(rename = "settle_delay_ms", with = "duration_ms")]
    pub settle_delay: Duration,
    /// How long to listen for a notification after each write
    #[serde(rename = "response_window_ms", with = "duration_ms")]
    pub response_window: Duration,
    /// Pause after each command; the controller blinks to acknowledge
    #[serde(rename = "command_spacing_ms", with = "duration_ms")]
    pub command_spacing: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            per_command_timeout: Duration::from_secs(2),
            max_attempts: 3,
            connect_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(1),
            response_window: Duration::from_millis(250),
            command_spacing: Duration::from_millis(300),
        }
    }
}

/// Options recognised by the [`DiagnosticEngine`](crate::engine::DiagnosticEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticConfig {
    /// LED count printed on the box
    pub advertised_count: u16,
    /// Lit count the operator actually sees
    pub suspected_limit: u16,
    /// Pixels addressed individually, 0-based
    pub sample_indices: Vec<u16>,
    /// When set, replaces `sample_indices` beyond the limit with every n-th pixel
    pub sample_stride: Option<u16>,
    pub candidate_counts: Vec<u16>,
    pub segment_settings: Vec<SegmentSetting>,
    pub model_indices: Vec<u8>,
    pub config_reads: Vec<ConfigTarget>,
    /// Stop probing once the provisional diagnosis reaches this level
    pub early_exit_confidence: Option<Confidence>,
    pub session: SessionConfig,
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            advertised_count: 200,
            suspected_limit: 70,
            sample_indices: vec![50, 65, 70, 71, 75, 80, 90, 100, 120, 150, 180, 199],
            sample_stride: None,
            candidate_counts: vec![70, 80, 90, 100, 120, 150, 180, 200],
            segment_settings: vec![
                SegmentSetting::SegmentCount(1),
                SegmentSetting::ChannelCount(200),
                SegmentSetting::Continuous(true),
                SegmentSetting::ResetSegments,
                SegmentSetting::MaxLeds(200),
            ],
            model_indices: (0..=8).collect(),
            config_reads: ConfigTarget::ALL.to_vec(),
            early_exit_confidence: None,
            session: SessionConfig::default(),
        }
    }
}

impl DiagnosticConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LedError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Indices the individual-address probe will visit, ascending and deduplicated.
    ///
    /// With a stride, the explicit indices below the limit are kept as controls and
    /// the range `limit..advertised` is sampled every `stride` pixels, always ending
    /// on the last pixel.
    pub fn probe_indices(&self) -> Vec<u16> {
        let mut indices: Vec<u16> = match self.sample_stride {
            Some(stride) if stride > 0 => {
                let mut sampled: Vec<u16> = self
                    .sample_indices
                    .iter()
                    .copied()
                    .filter(|&i| i < self.suspected_limit)
                    .collect();
                let last = self.advertised_count.saturating_sub(1);
                sampled.extend((self.suspected_limit..=last).step_by(stride as usize));
                if self.advertised_count > self.suspected_limit {
                    sampled.push(last);
                }
                sampled
            }
            _ => self.sample_indices.clone(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_vendor_behaviour() {
        let config = DiagnosticConfig::default();
        assert_eq!(config.session.max_attempts, 3);
        assert_eq!(config.session.per_command_timeout, Duration::from_secs(2));
        assert_eq!(config.candidate_counts.first(), Some(&70));
        assert_eq!(config.candidate_counts.last(), Some(&200));
        assert_eq!(config.model_indices.len(), 9);
        assert!(config.early_exit_confidence.is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "suspected_limit": 64,
            "early_exit_confidence": "High",
            "session": { "per_command_timeout_ms": 500, "max_retries": 5 }
        }"#;
        let config: DiagnosticConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.suspected_limit, 64);
        assert_eq!(config.advertised_count, 200);
        assert_eq!(config.early_exit_confidence, Some(Confidence::High));
        assert_eq!(config.session.per_command_timeout, Duration::from_millis(500));
        assert_eq!(config.session.max_attempts, 5);
        assert_eq!(config.session.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_segment_settings_json() {
        let json = r#"{ "segment_settings": [
            { "setting": "max_leds", "value": 150 },
            { "setting": "reset_segments" }
        ] }"#;
        let config: DiagnosticConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.segment_settings,
            vec![SegmentSetting::MaxLeds(150), SegmentSetting::ResetSegments]
        );
    }

    #[test]
    fn test_probe_indices_sorted_and_deduplicated() {
        let config = DiagnosticConfig {
            sample_indices: vec![100, 71, 50, 71],
            ..Default::default()
        };
        assert_eq!(config.probe_indices(), vec![50, 71, 100]);
    }

    #[test]
    fn test_probe_indices_with_stride() {
        let config = DiagnosticConfig {
            sample_stride: Some(40),
            ..Default::default()
        };
        // controls 50 and 65 survive, then 70, 110, 150, 190 and the last pixel
        assert_eq!(config.probe_indices(), vec![50, 65, 70, 110, 150, 190, 199]);
    }
}
