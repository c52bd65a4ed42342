// Protocol constants for iDeal LED controllers

/// AES block size; every frame on the wire is a multiple of this
pub const BLOCK_SIZE: usize = 16;

/// Every command frame observed so far is exactly one block
pub const FRAME_LEN: usize = BLOCK_SIZE;

/// Shared AES-128 key used by the vendor app for every command
pub const SHARED_KEY: [u8; 16] = [
    0x34, 0x52, 0x2A, 0x5B, 0x7A, 0x6E, 0x49, 0x2C, 0x08, 0x09, 0x0A, 0x9D, 0x8D, 0x2A, 0x23, 0xF8,
];

/// GATT service that carries the command and notify characteristics
pub const SERVICE_UUID: &str = "0000fff0-0000-1000-8000-00805f9b34fb";

/// Characteristic accepting encrypted command frames
pub const WRITE_CMD_UUID: &str = "d44bc439-abfd-45a2-b575-925416129600";

/// Characteristic the controller notifies on (usually silent)
pub const NOTIFY_UUID: &str = "d44bc439-abfd-45a2-b575-925416129601";

/// Power: `05 "TURN"`
pub const MAGIC_POWER: &[u8] = &[0x05, 0x54, 0x55, 0x52, 0x4E];

/// LED count: `09 "LAMPN"`
pub const MAGIC_LAMP_COUNT: &[u8] = &[0x09, 0x4C, 0x41, 0x4D, 0x50, 0x4E];

/// Color and model index: `0F "SGLS"`
pub const MAGIC_COLOR: &[u8] = &[0x0F, 0x53, 0x47, 0x4C, 0x53];

/// Individually addressed pixel: `0C "GRAFFITI"`
pub const MAGIC_GRAFFITI: &[u8] = &[0x0C, 0x47, 0x52, 0x41, 0x46, 0x46, 0x49, 0x54, 0x49];

/// Segment configuration: `08 "SEGMENT"`
pub const MAGIC_SEGMENT: &[u8] = &[0x08, 0x53, 0x45, 0x47, 0x4D, 0x45, 0x4E, 0x54];

/// Segment configuration: `08 "CHANNEL"`
pub const MAGIC_CHANNEL: &[u8] = &[0x08, 0x43, 0x48, 0x41, 0x4E, 0x4E, 0x45, 0x4C];

/// Segment configuration: `09 "CONTINUOUS"`
pub const MAGIC_CONTINUOUS: &[u8] = &[0x09, 0x43, 0x4F, 0x4E, 0x54, 0x49, 0x4E, 0x55, 0x4F, 0x55, 0x53];

/// Segment configuration: `0A "RESETSEGMENT"`
pub const MAGIC_RESET_SEGMENT: &[u8] = &[
    0x0A, 0x52, 0x45, 0x53, 0x45, 0x54, 0x53, 0x45, 0x47, 0x4D, 0x45, 0x4E, 0x54,
];

/// Segment configuration: `08 "MAXLEDS"`
pub const MAGIC_MAX_LEDS: &[u8] = &[0x08, 0x4D, 0x41, 0x58, 0x4C, 0x45, 0x44, 0x53];

/// Config read: `03 "LED"`
pub const MAGIC_READ_LED: &[u8] = &[0x03, 0x4C, 0x45, 0x44];

/// Config read: `03 "LAMP"`
pub const MAGIC_READ_LAMP: &[u8] = &[0x03, 0x4C, 0x41, 0x4D, 0x50];

/// Config read: `03 "CONFIG"` (15 bytes before padding)
pub const MAGIC_READ_CONFIG: &[u8] = &[0x03, 0x43, 0x4F, 0x4E, 0x46, 0x49, 0x47];

/// Config read: `03 "SEGMENT"`
pub const MAGIC_READ_SEGMENT: &[u8] = &[0x03, 0x53, 0x45, 0x47, 0x4D, 0x45, 0x4E, 0x54];

/// Version read: `03 "VE"`, followed by 0x00 (PCB) or 0x01 (firmware)
pub const MAGIC_READ_VERSION: &[u8] = &[0x03, 0x56, 0x45];

pub const MAGIC_RESET: &[u8] = &[0x06, 0x52, 0x45, 0x53, 0x45, 0x54];

pub const MAGIC_FACTORY_RESET: &[u8] = &[
    0x0D, 0x46, 0x41, 0x43, 0x54, 0x4F, 0x52, 0x59, 0x52, 0x45, 0x53, 0x45, 0x54,
];

pub const MAGIC_DEFAULT_SETTINGS: &[u8] = &[
    0x0D, 0x44, 0x45, 0x46, 0x41, 0x55, 0x4C, 0x54, 0x53, 0x45, 0x54, 0x54, 0x49,
];

pub const MAGIC_RESTORE_DEFAULT: &[u8] = &[
    0x0E, 0x52, 0x45, 0x53, 0x54, 0x4F, 0x52, 0x45, 0x44, 0x45, 0x46, 0x41, 0x55, 0x4C, 0x54,
];

pub const MAGIC_CLEAR_CONFIG: &[u8] = &[0x0B, 0x43, 0x4C, 0x45, 0x41, 0x52, 0x43, 0x4F, 0x4E, 0x46, 0x49, 0x47];

pub const MAGIC_INIT_DEFAULT: &[u8] = &[0x0A, 0x49, 0x4E, 0x49, 0x54, 0x44, 0x45, 0x46, 0x41, 0x55, 0x4C, 0x54];

pub const MAGIC_RESET_200_LED: &[u8] = &[0x0C, 0x52, 0x45, 0x53, 0x45, 0x54, 0x32, 0x30, 0x30, 0x4C, 0x45, 0x44];

/// Color frame defaults used by the vendor app
pub const DEFAULT_SPEED: u8 = 0x64;
pub const DEFAULT_SATURATION: u8 = 0x50;
pub const DEFAULT_BRIGHTNESS: u8 = 0x32;
