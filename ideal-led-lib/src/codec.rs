//! # iDeal LED command codec
//!
//! Every command is a 16-byte plaintext frame: a length byte, an ASCII tag identifying
//! the command family (`TURN`, `LAMPN`, `SGLS`, ...) and fixed-offset fields, zero padded
//! to the AES block boundary. The frame is then encrypted with AES-128-ECB under a key
//! shared by every controller of this family. There is no IV and no authentication tag,
//! so encoding is positional and fully deterministic.
//!
//! ```text
//! Power      05 54 55 52 4E <state> 00 x10
//! LED count  09 4C 41 4D 50 4E <hi> <lo> <hi> <lo> 00 x6
//! Color      0F 53 47 4C 53 <mode> <rev> <speed> <sat> <r g b> <r g b> <bright>
//! Pixel      0C 47 52 41 46 46 49 54 49 <hi> <lo> <r> <g> <b> 00 00
//! ```

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use bytes::{BufMut, Bytes, BytesMut};
use zerocopy::byteorder::big_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::command::{ColorSettings, Command, ConfigTarget, Opcode, ResetVariant, Rgb, SegmentSetting};
use crate::constants::*;
use crate::error::LedError;

/// Process-wide protocol constants, injected into [`PacketCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolProfile {
    pub key: [u8; 16],
}

impl ProtocolProfile {
    pub const IDEAL_LED: ProtocolProfile = ProtocolProfile { key: SHARED_KEY };
}

impl Default for ProtocolProfile {
    fn default() -> Self {
        Self::IDEAL_LED
    }
}

/// LED count frame (16 bytes). The count is written twice, big-endian.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct LampCountFrame {
    magic: [u8; 6],
    count: U16,
    count_echo: U16,
    reserved: [u8; 6],
}

/// Color frame (16 bytes). Channels are 5-bit, repeated for primary and secondary color.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct ColorFrame {
    magic: [u8; 5],
    mode: u8,
    reverse: u8,
    speed: u8,
    saturation: u8,
    primary: [u8; 3],
    secondary: [u8; 3],
    brightness: u8,
}

/// Individually addressed pixel frame (16 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct GraffitiFrame {
    magic: [u8; 9],
    index: U16,
    color: [u8; 3],
    reserved: [u8; 2],
}

/// Unencrypted frame for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    opcode: Opcode,
    magic_len: usize,
    bytes: Bytes,
}

impl Frame {
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Leading length byte
    pub fn length(&self) -> u8 {
        self.bytes[0]
    }

    /// Length byte plus the ASCII family tag
    pub fn magic(&self) -> &[u8] {
        &self.bytes[..self.magic_len]
    }

    /// Everything after the magic, padding included
    pub fn fields(&self) -> &[u8] {
        &self.bytes[self.magic_len..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn power_state(&self) -> Option<bool> {
        (self.opcode == Opcode::PowerSet).then(|| self.bytes[MAGIC_POWER.len()] != 0)
    }

    pub fn lamp_count(&self) -> Option<u16> {
        if self.opcode != Opcode::LedCountSet {
            return None;
        }
        LampCountFrame::ref_from_bytes(self.bytes.as_ref())
            .ok()
            .map(|frame| frame.count.get())
    }

    pub fn pixel_index(&self) -> Option<u16> {
        if self.opcode != Opcode::PixelPaint {
            return None;
        }
        GraffitiFrame::ref_from_bytes(self.bytes.as_ref())
            .ok()
            .map(|frame| frame.index.get())
    }
}

/// Encrypted bytes as written to the command characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncryptedPacket(Bytes);

impl EncryptedPacket {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for EncryptedPacket {
    fn from(bytes: Bytes) -> Self {
        EncryptedPacket(bytes)
    }
}

impl From<EncryptedPacket> for Bytes {
    fn from(packet: EncryptedPacket) -> Self {
        packet.0
    }
}

impl std::fmt::Display for EncryptedPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Encodes commands to encrypted packets and decodes responses. Holds no mutable state.
#[derive(Clone)]
pub struct PacketCodec {
    cipher: Aes128,
}

impl std::fmt::Debug for PacketCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketCodec").finish_non_exhaustive()
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(&ProtocolProfile::IDEAL_LED)
    }
}

impl PacketCodec {
    pub fn new(profile: &ProtocolProfile) -> Self {
        Self {
            cipher: Aes128::new((&profile.key).into()),
        }
    }

    /// Build, pad and encrypt the frame for `command`.
    pub fn encode(&self, command: &Command) -> Result<EncryptedPacket, LedError> {
        let frame = build_frame(command)?;
        Ok(self.encrypt_frame(&frame))
    }

    pub fn encrypt_frame(&self, frame: &Frame) -> EncryptedPacket {
        EncryptedPacket(self.encrypt_blocks(frame.as_bytes()))
    }

    /// Decrypt `packet` and check that it carries a frame of the `expected` family.
    pub fn decode(&self, packet: &EncryptedPacket, expected: Opcode) -> Result<Frame, LedError> {
        let data = packet.as_bytes();
        if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
            return Err(LedError::DecryptMismatch {
                expected,
                found: format!("length {} is not a whole number of {BLOCK_SIZE}-byte blocks", data.len()),
            });
        }

        let plain = self.decrypt_blocks(data);
        let magic = magics_for(expected)
            .iter()
            .find(|magic| plain.starts_with(magic))
            .ok_or_else(|| LedError::DecryptMismatch {
                expected,
                found: format!("leading bytes {}", hex::encode(&plain[..plain.len().min(9)])),
            })?;

        Ok(Frame {
            opcode: expected,
            magic_len: magic.len(),
            bytes: Bytes::from(plain),
        })
    }

    fn encrypt_blocks(&self, plain: &[u8]) -> Bytes {
        let mut output = plain.to_vec();
        for chunk in output.chunks_mut(BLOCK_SIZE) {
            self.cipher.encrypt_block(chunk.into());
        }
        Bytes::from(output)
    }

    fn decrypt_blocks(&self, ciphertext: &[u8]) -> Vec<u8> {
        let mut output = ciphertext.to_vec();
        for chunk in output.chunks_mut(BLOCK_SIZE) {
            self.cipher.decrypt_block(chunk.into());
        }
        output
    }
}

/// Frame magics accepted for each command family
pub fn magics_for(opcode: Opcode) -> &'static [&'static [u8]] {
    match opcode {
        Opcode::PowerSet => &[MAGIC_POWER],
        Opcode::LedCountSet => &[MAGIC_LAMP_COUNT],
        Opcode::ColorSet | Opcode::ModelIndexSet => &[MAGIC_COLOR],
        Opcode::PixelPaint => &[MAGIC_GRAFFITI],
        Opcode::SegmentConfig => &[
            MAGIC_SEGMENT,
            MAGIC_CHANNEL,
            MAGIC_CONTINUOUS,
            MAGIC_RESET_SEGMENT,
            MAGIC_MAX_LEDS,
        ],
        Opcode::ConfigRead => &[
            MAGIC_READ_LED,
            MAGIC_READ_LAMP,
            MAGIC_READ_CONFIG,
            MAGIC_READ_SEGMENT,
            MAGIC_READ_VERSION,
        ],
        Opcode::FactoryReset => &[
            MAGIC_RESET,
            MAGIC_FACTORY_RESET,
            MAGIC_DEFAULT_SETTINGS,
            MAGIC_RESTORE_DEFAULT,
            MAGIC_CLEAR_CONFIG,
            MAGIC_INIT_DEFAULT,
            MAGIC_RESET_200_LED,
        ],
    }
}

/// Build the plaintext frame for `command`, validating field ranges.
pub fn build_frame(command: &Command) -> Result<Frame, LedError> {
    let opcode = command.opcode();
    let (magic, body): (&'static [u8], Vec<u8>) = match *command {
        Command::Power { on } => (MAGIC_POWER, vec![on as u8]),
        Command::LedCount { count } => {
            let count = field_u16(opcode, "LED count", count)?;
            let frame = LampCountFrame {
                magic: magic_array(MAGIC_LAMP_COUNT),
                count: U16::new(count),
                count_echo: U16::new(count),
                reserved: [0; 6],
            };
            (MAGIC_LAMP_COUNT, frame.as_bytes()[MAGIC_LAMP_COUNT.len()..].to_vec())
        }
        Command::Color(settings) => (MAGIC_COLOR, color_body(opcode, &settings)?),
        Command::ModelIndex { index } => {
            let settings = ColorSettings {
                mode: index,
                ..ColorSettings::solid(Rgb::WHITE)
            };
            (MAGIC_COLOR, color_body(opcode, &settings)?)
        }
        Command::PixelPaint { index, color } => {
            let frame = GraffitiFrame {
                magic: magic_array(MAGIC_GRAFFITI),
                index: U16::new(field_u16(opcode, "pixel index", index)?),
                color: [
                    field_u8(opcode, "red", color.r.into())?,
                    field_u8(opcode, "green", color.g.into())?,
                    field_u8(opcode, "blue", color.b.into())?,
                ],
                reserved: [0; 2],
            };
            (MAGIC_GRAFFITI, frame.as_bytes()[MAGIC_GRAFFITI.len()..].to_vec())
        }
        Command::SegmentConfig(setting) => match setting {
            SegmentSetting::SegmentCount(n) => (MAGIC_SEGMENT, vec![field_u8(opcode, "segment count", n.into())?]),
            SegmentSetting::ChannelCount(n) => (MAGIC_CHANNEL, vec![field_u8(opcode, "channel count", n.into())?]),
            SegmentSetting::Continuous(on) => (MAGIC_CONTINUOUS, vec![on as u8]),
            SegmentSetting::ResetSegments => (MAGIC_RESET_SEGMENT, Vec::new()),
            SegmentSetting::MaxLeds(n) => (MAGIC_MAX_LEDS, vec![field_u8(opcode, "max LEDs", n.into())?]),
        },
        Command::ConfigRead(target) => match target {
            ConfigTarget::LedCount => (MAGIC_READ_LED, Vec::new()),
            ConfigTarget::LampCount => (MAGIC_READ_LAMP, Vec::new()),
            ConfigTarget::Config => (MAGIC_READ_CONFIG, Vec::new()),
            ConfigTarget::Segment => (MAGIC_READ_SEGMENT, Vec::new()),
            ConfigTarget::PcbVersion => (MAGIC_READ_VERSION, vec![0x00]),
            ConfigTarget::FirmwareVersion => (MAGIC_READ_VERSION, vec![0x01]),
        },
        Command::FactoryReset(variant) => (reset_magic(variant), Vec::new()),
    };

    let mut buf = BytesMut::with_capacity(FRAME_LEN);
    buf.put_slice(magic);
    buf.put_slice(&body);
    pad_to_block(&mut buf);

    if buf.len() != FRAME_LEN {
        return Err(LedError::MalformedCommand {
            opcode,
            reason: format!("frame is {} bytes, expected {FRAME_LEN}", buf.len()),
        });
    }

    Ok(Frame {
        opcode,
        magic_len: magic.len(),
        bytes: buf.freeze(),
    })
}

fn reset_magic(variant: ResetVariant) -> &'static [u8] {
    match variant {
        ResetVariant::Reset => MAGIC_RESET,
        ResetVariant::FactoryReset => MAGIC_FACTORY_RESET,
        ResetVariant::DefaultSettings => MAGIC_DEFAULT_SETTINGS,
        ResetVariant::RestoreDefault => MAGIC_RESTORE_DEFAULT,
        ResetVariant::ClearConfig => MAGIC_CLEAR_CONFIG,
        ResetVariant::InitDefault => MAGIC_INIT_DEFAULT,
        ResetVariant::Reset200Led => MAGIC_RESET_200_LED,
    }
}

fn color_body(opcode: Opcode, settings: &ColorSettings) -> Result<Vec<u8>, LedError> {
    let channels = [
        quantize(field_u8(opcode, "red", settings.color.r.into())?),
        quantize(field_u8(opcode, "green", settings.color.g.into())?),
        quantize(field_u8(opcode, "blue", settings.color.b.into())?),
    ];
    let frame = ColorFrame {
        magic: magic_array(MAGIC_COLOR),
        mode: field_u8(opcode, "mode", settings.mode.into())?,
        reverse: settings.reverse as u8,
        speed: field_u8(opcode, "speed", settings.speed.into())?,
        saturation: field_u8(opcode, "saturation", settings.saturation.into())?,
        primary: channels,
        secondary: channels,
        brightness: field_u8(opcode, "brightness", settings.brightness.into())?,
    };
    Ok(frame.as_bytes()[MAGIC_COLOR.len()..].to_vec())
}

/// The controller takes 5-bit channels
fn quantize(channel: u8) -> u8 {
    (channel >> 3) & 0x1F
}

fn pad_to_block(buf: &mut BytesMut) {
    let padded = buf.len().div_ceil(BLOCK_SIZE).max(1) * BLOCK_SIZE;
    buf.resize(padded, 0);
}

fn magic_array<const N: usize>(magic: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(magic);
    out
}

fn field_u8(opcode: Opcode, name: &str, value: i64) -> Result<u8, LedError> {
    u8::try_from(value).map_err(|_| LedError::MalformedCommand {
        opcode,
        reason: format!("{name} {value} is outside 0..=255"),
    })
}

fn field_u16(opcode: Opcode, name: &str, value: i64) -> Result<u16, LedError> {
    u16::try_from(value).map_err(|_| LedError::MalformedCommand {
        opcode,
        reason: format!("{name} {value} is outside 0..=65535"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(command: &Command) -> String {
        hex::encode(build_frame(command).expect("valid command").as_bytes())
    }

    fn every_opcode() -> Vec<Command> {
        let mut commands = vec![
            Command::power(true),
            Command::power(false),
            Command::led_count(200),
            Command::color(Rgb::new(255, 128, 7)),
            Command::ModelIndex { index: 8 },
            Command::pixel(199, Rgb::RED),
            Command::SegmentConfig(SegmentSetting::SegmentCount(1)),
            Command::SegmentConfig(SegmentSetting::ChannelCount(200)),
            Command::SegmentConfig(SegmentSetting::Continuous(true)),
            Command::SegmentConfig(SegmentSetting::ResetSegments),
            Command::SegmentConfig(SegmentSetting::MaxLeds(200)),
        ];
        commands.extend(ConfigTarget::ALL.map(Command::ConfigRead));
        commands.extend(ResetVariant::ALL.map(Command::FactoryReset));
        commands
    }

    #[test]
    fn test_power_layout() {
        assert_eq!(plain(&Command::power(true)), "055455524e0100000000000000000000");
        assert_eq!(plain(&Command::power(false)), "055455524e0000000000000000000000");
    }

    #[test]
    fn test_led_count_layout() {
        // 200 = 0x00C8, written twice big-endian straight after "LAMPN"
        assert_eq!(plain(&Command::led_count(200)), "094c414d504e00c800c8000000000000");
        assert_eq!(plain(&Command::led_count(0x1234)), "094c414d504e12341234000000000000");
    }

    #[test]
    fn test_color_layout() {
        // Vendor default: mode 0, no reverse, speed 0x64, saturation 0x50, brightness 0x32
        assert_eq!(plain(&Command::color(Rgb::WHITE)), "0f53474c53000064501f1f1f1f1f1f32");
        assert_eq!(plain(&Command::color(Rgb::RED)), "0f53474c53000064501f00001f000032");
    }

    #[test]
    fn test_model_index_uses_mode_byte() {
        let frame = build_frame(&Command::ModelIndex { index: 5 }).unwrap();
        assert_eq!(frame.magic(), MAGIC_COLOR);
        assert_eq!(frame.fields()[0], 5);
    }

    #[test]
    fn test_pixel_layout() {
        assert_eq!(plain(&Command::pixel(0x0147, Rgb::RED)), "0c47524146464954490147ff00000000");
    }

    #[test]
    fn test_short_frames_are_zero_padded() {
        // "03 CONFIG" is 7 bytes; the vendor tooling sends it as a 15-byte literal
        let frame = build_frame(&Command::ConfigRead(ConfigTarget::Config)).unwrap();
        assert_eq!(frame.len(), FRAME_LEN);
        assert_eq!(frame.magic(), MAGIC_READ_CONFIG);
        assert!(frame.fields().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_every_frame_is_one_block() {
        for command in every_opcode() {
            let frame = build_frame(&command).unwrap();
            assert_eq!(frame.len(), FRAME_LEN, "{command}");
            assert_eq!(frame.length(), frame.as_bytes()[0]);
        }
    }

    #[test]
    fn test_roundtrip_every_opcode() {
        let codec = PacketCodec::default();
        for command in every_opcode() {
            let frame = build_frame(&command).unwrap();
            let packet = codec.encode(&command).unwrap();
            assert_eq!(packet.len() % BLOCK_SIZE, 0);
            assert_ne!(packet.as_bytes(), frame.as_bytes(), "{command} was not encrypted");
            let decoded = codec.decode(&packet, command.opcode()).unwrap();
            assert_eq!(decoded, frame, "{command}");
        }
    }

    #[test]
    fn test_count_boundaries() {
        let codec = PacketCodec::default();
        assert!(codec.encode(&Command::led_count(0)).is_ok());
        assert!(codec.encode(&Command::led_count(65535)).is_ok());
        for bad in [65536, -1] {
            match codec.encode(&Command::led_count(bad)) {
                Err(LedError::MalformedCommand { opcode, .. }) => assert_eq!(opcode, Opcode::LedCountSet),
                other => panic!("expected MalformedCommand for {bad}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_color_channel_range() {
        let codec = PacketCodec::default();
        assert!(matches!(
            codec.encode(&Command::color(Rgb::new(256, 0, 0))),
            Err(LedError::MalformedCommand { opcode: Opcode::ColorSet, .. })
        ));
        assert!(matches!(
            codec.encode(&Command::pixel(3, Rgb::new(0, -1, 0))),
            Err(LedError::MalformedCommand { opcode: Opcode::PixelPaint, .. })
        ));
        assert!(matches!(
            codec.encode(&Command::SegmentConfig(SegmentSetting::MaxLeds(300))),
            Err(LedError::MalformedCommand { opcode: Opcode::SegmentConfig, .. })
        ));
    }

    #[test]
    fn test_encode_is_deterministic() {
        let codec = PacketCodec::default();
        let a = codec.encode(&Command::led_count(150)).unwrap();
        let b = PacketCodec::default().encode(&Command::led_count(150)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fips197_vector() {
        let codec = PacketCodec::new(&ProtocolProfile {
            key: core::array::from_fn(|i| i as u8),
        });
        let plain = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        let cipher = codec.encrypt_blocks(&plain);
        assert_eq!(hex::encode(&cipher), "69c4e0d86a7b0430d8cdb78070b4c55a");
        assert_eq!(codec.decrypt_blocks(&cipher), plain);
    }

    #[test]
    fn test_decode_rejects_wrong_family() {
        let codec = PacketCodec::default();
        let packet = codec.encode(&Command::power(true)).unwrap();
        assert!(matches!(
            codec.decode(&packet, Opcode::LedCountSet),
            Err(LedError::DecryptMismatch { expected: Opcode::LedCountSet, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_key() {
        let packet = PacketCodec::default().encode(&Command::power(true)).unwrap();
        let other = PacketCodec::new(&ProtocolProfile { key: [0xAA; 16] });
        assert!(matches!(
            other.decode(&packet, Opcode::PowerSet),
            Err(LedError::DecryptMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_partial_block() {
        let codec = PacketCodec::default();
        let packet = EncryptedPacket::from(Bytes::from_static(&[0u8; 7]));
        assert!(matches!(codec.decode(&packet, Opcode::PowerSet), Err(LedError::DecryptMismatch { .. })));
        let empty = EncryptedPacket::from(Bytes::new());
        assert!(matches!(codec.decode(&empty, Opcode::PowerSet), Err(LedError::DecryptMismatch { .. })));
    }

    #[test]
    fn test_frame_accessors() {
        let codec = PacketCodec::default();
        let count = codec.decode(&codec.encode(&Command::led_count(70)).unwrap(), Opcode::LedCountSet).unwrap();
        assert_eq!(count.lamp_count(), Some(70));
        assert_eq!(count.power_state(), None);

        let power = codec.decode(&codec.encode(&Command::power(false)).unwrap(), Opcode::PowerSet).unwrap();
        assert_eq!(power.power_state(), Some(false));

        let pixel = build_frame(&Command::pixel(150, Rgb::RED)).unwrap();
        assert_eq!(pixel.pixel_index(), Some(150));
    }
}
