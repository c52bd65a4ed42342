//! Typed commands understood by iDeal LED controllers.
//!
//! A [`Command`] is an opcode plus its payload. Numeric fields are carried wider than
//! their wire representation so that out-of-range values reach the codec and can be
//! rejected there with [`LedError::MalformedCommand`](crate::error::LedError).

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::constants::{DEFAULT_BRIGHTNESS, DEFAULT_SATURATION, DEFAULT_SPEED};

/// Command families. Each maps to one (or, for the sweep families, several) frame magics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum Opcode {
    PowerSet,
    LedCountSet,
    ColorSet,
    SegmentConfig,
    ModelIndexSet,
    ConfigRead,
    FactoryReset,
    PixelPaint,
}

/// RGB triple, 0..=255 per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: i32,
    pub g: i32,
    pub b: i32,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const RED: Rgb = Rgb::new(255, 0, 0);

    pub const fn new(r: i32, g: i32, b: i32) -> Self {
        Self { r, g, b }
    }
}

/// Payload of a `SGLS` color frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorSettings {
    pub mode: i32,
    pub reverse: bool,
    pub speed: i32,
    pub saturation: i32,
    pub color: Rgb,
    pub brightness: i32,
}

impl ColorSettings {
    /// Static color with the vendor app's default speed, saturation and brightness.
    pub fn solid(color: Rgb) -> Self {
        Self {
            mode: 0,
            reverse: false,
            speed: DEFAULT_SPEED as i32,
            saturation: DEFAULT_SATURATION as i32,
            color,
            brightness: DEFAULT_BRIGHTNESS as i32,
        }
    }
}

/// Segment-layout knobs tried while looking for the field that caps the LED count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "setting", content = "value")]
pub enum SegmentSetting {
    SegmentCount(i32),
    ChannelCount(i32),
    Continuous(bool),
    ResetSegments,
    MaxLeds(i32),
}

impl std::fmt::Display for SegmentSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentSetting::SegmentCount(n) => write!(f, "segment count = {n}"),
            SegmentSetting::ChannelCount(n) => write!(f, "channel count = {n}"),
            SegmentSetting::Continuous(on) => write!(f, "continuous = {on}"),
            SegmentSetting::ResetSegments => write!(f, "reset segments"),
            SegmentSetting::MaxLeds(n) => write!(f, "max LEDs = {n}"),
        }
    }
}

/// Read-style requests. The controllers seen so far never answer these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigTarget {
    LedCount,
    LampCount,
    Config,
    Segment,
    PcbVersion,
    FirmwareVersion,
}

impl ConfigTarget {
    pub const ALL: [ConfigTarget; 6] = [
        ConfigTarget::LedCount,
        ConfigTarget::LampCount,
        ConfigTarget::Config,
        ConfigTarget::Segment,
        ConfigTarget::PcbVersion,
        ConfigTarget::FirmwareVersion,
    ];
}

/// Reset spellings guessed from the vendor app strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetVariant {
    Reset,
    FactoryReset,
    DefaultSettings,
    RestoreDefault,
    ClearConfig,
    InitDefault,
    Reset200Led,
}

impl ResetVariant {
    pub const ALL: [ResetVariant; 7] = [
        ResetVariant::Reset,
        ResetVariant::FactoryReset,
        ResetVariant::DefaultSettings,
        ResetVariant::RestoreDefault,
        ResetVariant::ClearConfig,
        ResetVariant::InitDefault,
        ResetVariant::Reset200Led,
    ];
}

/// A single controller command. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Power { on: bool },
    LedCount { count: i64 },
    Color(ColorSettings),
    SegmentConfig(SegmentSetting),
    ModelIndex { index: i32 },
    ConfigRead(ConfigTarget),
    FactoryReset(ResetVariant),
    PixelPaint { index: i64, color: Rgb },
}

impl Command {
    pub fn power(on: bool) -> Self {
        Command::Power { on }
    }

    pub fn led_count(count: i64) -> Self {
        Command::LedCount { count }
    }

    pub fn color(color: Rgb) -> Self {
        Command::Color(ColorSettings::solid(color))
    }

    pub fn pixel(index: i64, color: Rgb) -> Self {
        Command::PixelPaint { index, color }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Power { .. } => Opcode::PowerSet,
            Command::LedCount { .. } => Opcode::LedCountSet,
            Command::Color(_) => Opcode::ColorSet,
            Command::SegmentConfig(_) => Opcode::SegmentConfig,
            Command::ModelIndex { .. } => Opcode::ModelIndexSet,
            Command::ConfigRead(_) => Opcode::ConfigRead,
            Command::FactoryReset(_) => Opcode::FactoryReset,
            Command::PixelPaint { .. } => Opcode::PixelPaint,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Power { on } => write!(f, "power {}", if *on { "on" } else { "off" }),
            Command::LedCount { count } => write!(f, "LED count {count}"),
            Command::Color(c) => write!(f, "color ({}, {}, {}) mode {}", c.color.r, c.color.g, c.color.b, c.mode),
            Command::SegmentConfig(s) => write!(f, "segment config: {s}"),
            Command::ModelIndex { index } => write!(f, "model index {index}"),
            Command::ConfigRead(t) => write!(f, "read {t}"),
            Command::FactoryReset(v) => write!(f, "factory reset ({v})"),
            Command::PixelPaint { index, color } => {
                write!(f, "paint pixel {index} ({}, {}, {})", color.r, color.g, color.b)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_map_to_opcodes() {
        assert_eq!(Command::power(true).opcode(), Opcode::PowerSet);
        assert_eq!(Command::led_count(200).opcode(), Opcode::LedCountSet);
        assert_eq!(Command::color(Rgb::WHITE).opcode(), Opcode::ColorSet);
        assert_eq!(Command::pixel(71, Rgb::RED).opcode(), Opcode::PixelPaint);
        assert_eq!(Command::ModelIndex { index: 3 }.opcode(), Opcode::ModelIndexSet);
        assert_eq!(Command::FactoryReset(ResetVariant::Reset200Led).opcode(), Opcode::FactoryReset);
    }

    #[test]
    fn test_solid_color_uses_app_defaults() {
        let settings = ColorSettings::solid(Rgb::RED);
        assert_eq!(settings.mode, 0);
        assert!(!settings.reverse);
        assert_eq!(settings.speed, 0x64);
        assert_eq!(settings.saturation, 0x50);
        assert_eq!(settings.brightness, 0x32);
    }

    #[test]
    fn test_display() {
        assert_eq!(Command::power(false).to_string(), "power off");
        assert_eq!(Command::led_count(70).to_string(), "LED count 70");
        assert_eq!(
            Command::SegmentConfig(SegmentSetting::MaxLeds(200)).to_string(),
            "segment config: max LEDs = 200"
        );
        assert_eq!(Command::ConfigRead(ConfigTarget::PcbVersion).to_string(), "read PcbVersion");
    }
}
