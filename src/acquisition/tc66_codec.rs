//! TC66C wire protocol codec
//!
//! The meter accepts short ASCII commands and answers `getva` with a
//! 192-byte frame encrypted with AES-256 in ECB mode under a fixed key.
//! The decrypted frame holds three 64-byte sub-records, each starting with
//! a 4-byte ASCII tag followed by packed little-endian u32 fields:
//!
//! ```text
//! 0..64    tag name version | serial .. runs volt current power ..
//! 64..128  tag | resistance g0_mAh g0_mWh g1_mAh g1_mWh tsign temp D+ D- ..
//! 128..192 tag | (unused)
//! ```
//!
//! Scaling: volt ×1e-4, current ×1e-5, power ×1e-4, resistance ×1e-1,
//! D+/D- ×1e-2. Temperature is negative when the sign field equals 1.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;

use crate::error::{CollectorError, Result};
use crate::types::{FirmwareMode, MeasurementRecord, MeterIdentity, RecordingSample, TelemetryFrame};

/// Size of an encrypted `getva` response.
pub const TELEMETRY_FRAME_LEN: usize = 192;

/// Size of a `query` response.
pub const QUERY_RESPONSE_LEN: usize = 4;

/// Size of one `gtrec` entry (volt u32 + current u32).
pub const RECORDING_ENTRY_LEN: usize = 8;

const SUB_RECORD_LEN: usize = 64;
const AES_BLOCK_LEN: usize = 16;

/// Fixed AES-256 key baked into the meter firmware.
const STATIC_KEY: [u8; 32] = [
    0x58, 0x21, 0xFA, 0x56, 0x01, 0xB2, 0xF0, 0x26, 0x87, 0xFF, 0x12, 0x04, 0x62, 0x2A, 0x4F, 0xB0,
    0x86, 0xF4, 0x02, 0x60, 0x81, 0x6F, 0x9A, 0x0B, 0xA7, 0xF1, 0x06, 0x61, 0x9A, 0xB8, 0x72, 0x88,
];

/// Byte offsets of the fields inside the decrypted frame.
mod offsets {
    pub const NAME: usize = 4;
    pub const VERSION: usize = 8;
    pub const SERIAL: usize = 12;
    pub const RUNS: usize = 44;
    pub const VOLT: usize = 48;
    pub const CURRENT: usize = 52;
    pub const POWER: usize = 56;

    pub const RESISTANCE: usize = 68;
    pub const G0_MAH: usize = 72;
    pub const G0_MWH: usize = 76;
    pub const G1_MAH: usize = 80;
    pub const G1_MWH: usize = 84;
    pub const TEMP_SIGN: usize = 88;
    pub const TEMP: usize = 92;
    pub const D_PLUS: usize = 96;
    pub const D_MINUS: usize = 100;
}

/// Commands understood by the meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Firmware or bootloader mode, 4-byte answer
    Query,
    /// Telemetry poll, 192-byte encrypted answer
    GetValues,
    /// Recording buffer dump, variable-length answer
    GetRecording,
    /// Previous display page, no answer
    LastPage,
    /// Next display page, no answer
    NextPage,
    /// Rotate display, no answer
    Rotate,
    /// Enter firmware update mode, answers "uprdy"
    Update,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Query,
        Command::GetValues,
        Command::GetRecording,
        Command::LastPage,
        Command::NextPage,
        Command::Rotate,
        Command::Update,
    ];

    /// ASCII name sent on the wire.
    pub fn name(self) -> &'static str {
        match self {
            Command::Query => "query",
            Command::GetValues => "getva",
            Command::GetRecording => "gtrec",
            Command::LastPage => "lastp",
            Command::NextPage => "nextp",
            Command::Rotate => "rotat",
            Command::Update => "update",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.name() == name)
            .ok_or_else(|| CollectorError::InvalidCommand(name.to_string()))
    }

    /// Raw bytes to transmit.
    pub fn as_bytes(self) -> &'static [u8] {
        self.name().as_bytes()
    }

    /// Expected response size, `None` for the variable-length recording dump.
    pub fn response_len(self) -> Option<usize> {
        match self {
            Command::Query => Some(QUERY_RESPONSE_LEN),
            Command::GetValues => Some(TELEMETRY_FRAME_LEN),
            Command::GetRecording => None,
            Command::LastPage | Command::NextPage | Command::Rotate => Some(0),
            Command::Update => Some(5),
        }
    }
}

/// Map a command name to its wire bytes.
pub fn encode_command(name: &str) -> Result<&'static [u8]> {
    Command::from_name(name).map(Command::as_bytes)
}

fn cipher() -> Aes256 {
    Aes256::new(GenericArray::from_slice(&STATIC_KEY))
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(word)
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn ascii_field(buf: &[u8], offset: usize, what: &str) -> Result<String> {
    let bytes = &buf[offset..offset + 4];
    if !bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        return Err(CollectorError::FrameDecode(format!(
            "{what} bytes {bytes:02X?} are not printable ASCII"
        )));
    }
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Decrypt and decode one 192-byte telemetry frame.
pub fn decode_telemetry_frame(bytes: &[u8]) -> Result<TelemetryFrame> {
    if bytes.len() != TELEMETRY_FRAME_LEN {
        return Err(CollectorError::FrameDecode(format!(
            "expected {TELEMETRY_FRAME_LEN} bytes, got {}",
            bytes.len()
        )));
    }

    let mut data = [0u8; TELEMETRY_FRAME_LEN];
    data.copy_from_slice(bytes);
    let cipher = cipher();
    for block in data.chunks_exact_mut(AES_BLOCK_LEN) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }

    for sub_record in 0..TELEMETRY_FRAME_LEN / SUB_RECORD_LEN {
        ascii_field(&data, sub_record * SUB_RECORD_LEN, "sub-record tag")?;
    }

    let identity = MeterIdentity {
        name: ascii_field(&data, offsets::NAME, "device name")?,
        version: ascii_field(&data, offsets::VERSION, "firmware version")?,
        serial_number: read_u32(&data, offsets::SERIAL),
        runs: read_u32(&data, offsets::RUNS),
    };

    let temp_sign: i64 = if read_u32(&data, offsets::TEMP_SIGN) == 1 { -1 } else { 1 };

    let record = MeasurementRecord {
        volt: f64::from(read_u32(&data, offsets::VOLT)) * 1e-4,
        current: f64::from(read_u32(&data, offsets::CURRENT)) * 1e-5,
        power: f64::from(read_u32(&data, offsets::POWER)) * 1e-4,
        resistance: f64::from(read_u32(&data, offsets::RESISTANCE)) * 1e-1,
        g0_mah: read_u32(&data, offsets::G0_MAH),
        g0_mwh: read_u32(&data, offsets::G0_MWH),
        g1_mah: read_u32(&data, offsets::G1_MAH),
        g1_mwh: read_u32(&data, offsets::G1_MWH),
        temperature: i64::from(read_u32(&data, offsets::TEMP)) * temp_sign,
        d_plus: f64::from(read_u32(&data, offsets::D_PLUS)) * 1e-2,
        d_minus: f64::from(read_u32(&data, offsets::D_MINUS)) * 1e-2,
    };

    Ok(TelemetryFrame { identity, record })
}

/// Decode the 4-byte `query` answer.
pub fn decode_query_response(bytes: &[u8]) -> Result<FirmwareMode> {
    match bytes {
        b"firm" => Ok(FirmwareMode::Firmware),
        b"boot" => Ok(FirmwareMode::Bootloader),
        other => Err(CollectorError::FrameDecode(format!(
            "unexpected query response {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// Decode a `gtrec` dump into volt/current pairs.
///
/// A trailing partial entry is dropped.
pub fn decode_recording(bytes: &[u8]) -> Vec<RecordingSample> {
    bytes
        .chunks_exact(RECORDING_ENTRY_LEN)
        .map(|entry| RecordingSample {
            volt: f64::from(read_u32(entry, 0)) * 1e-4,
            current: f64::from(read_u32(entry, 4)) * 1e-5,
        })
        .collect()
}

/// Raw integer content of a telemetry frame, as the meter would produce it.
///
/// Used by the simulated meter and to build fixtures for the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTelemetry {
    pub name: [u8; 4],
    pub version: [u8; 4],
    pub serial_number: u32,
    pub runs: u32,
    pub volt: u32,
    pub current: u32,
    pub power: u32,
    pub resistance: u32,
    pub g0_mah: u32,
    pub g0_mwh: u32,
    pub g1_mah: u32,
    pub g1_mwh: u32,
    pub temp_negative: bool,
    pub temp: u32,
    pub d_plus: u32,
    pub d_minus: u32,
}

impl Default for RawTelemetry {
    fn default() -> Self {
        Self {
            name: *b"TC66",
            version: *b"1.14",
            serial_number: 0,
            runs: 0,
            volt: 0,
            current: 0,
            power: 0,
            resistance: 0,
            g0_mah: 0,
            g0_mwh: 0,
            g1_mah: 0,
            g1_mwh: 0,
            temp_negative: false,
            temp: 0,
            d_plus: 0,
            d_minus: 0,
        }
    }
}

impl RawTelemetry {
    /// Lay out the decrypted 192-byte frame.
    pub fn to_plaintext(&self) -> [u8; TELEMETRY_FRAME_LEN] {
        let mut data = [0u8; TELEMETRY_FRAME_LEN];
        data[0..4].copy_from_slice(b"pac1");
        data[64..68].copy_from_slice(b"pac2");
        data[128..132].copy_from_slice(b"pac3");
        data[offsets::NAME..offsets::NAME + 4].copy_from_slice(&self.name);
        data[offsets::VERSION..offsets::VERSION + 4].copy_from_slice(&self.version);

        write_u32(&mut data, offsets::SERIAL, self.serial_number);
        write_u32(&mut data, offsets::RUNS, self.runs);
        write_u32(&mut data, offsets::VOLT, self.volt);
        write_u32(&mut data, offsets::CURRENT, self.current);
        write_u32(&mut data, offsets::POWER, self.power);
        write_u32(&mut data, offsets::RESISTANCE, self.resistance);
        write_u32(&mut data, offsets::G0_MAH, self.g0_mah);
        write_u32(&mut data, offsets::G0_MWH, self.g0_mwh);
        write_u32(&mut data, offsets::G1_MAH, self.g1_mah);
        write_u32(&mut data, offsets::G1_MWH, self.g1_mwh);
        write_u32(&mut data, offsets::TEMP_SIGN, u32::from(self.temp_negative));
        write_u32(&mut data, offsets::TEMP, self.temp);
        write_u32(&mut data, offsets::D_PLUS, self.d_plus);
        write_u32(&mut data, offsets::D_MINUS, self.d_minus);
        data
    }

    /// Encrypt the frame exactly as the meter sends it.
    pub fn encrypt(&self) -> [u8; TELEMETRY_FRAME_LEN] {
        encrypt_frame(self.to_plaintext())
    }
}

/// Encrypt a plaintext frame with the meter key.
pub fn encrypt_frame(mut data: [u8; TELEMETRY_FRAME_LEN]) -> [u8; TELEMETRY_FRAME_LEN] {
    let cipher = cipher();
    for block in data.chunks_exact_mut(AES_BLOCK_LEN) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raw() -> RawTelemetry {
        RawTelemetry {
            serial_number: 12_345,
            runs: 42,
            volt: 51_234,
            current: 123_456,
            power: 63_251,
            resistance: 415,
            g0_mah: 17,
            g0_mwh: 88,
            g1_mah: 0,
            g1_mwh: 0,
            temp_negative: false,
            temp: 27,
            d_plus: 61,
            d_minus: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_encode_known_commands() {
        assert_eq!(encode_command("getva").unwrap(), b"getva");
        assert_eq!(encode_command("query").unwrap(), b"query");
        assert_eq!(encode_command("update").unwrap(), b"update");
        for cmd in Command::ALL {
            assert_eq!(Command::from_name(cmd.name()).unwrap(), cmd);
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        let err = encode_command("reset").unwrap_err();
        assert!(matches!(err, CollectorError::InvalidCommand(ref n) if n == "reset"));
        assert!(encode_command("GETVA").is_err());
    }

    #[test]
    fn test_decode_recovers_scaled_fields() {
        let frame = decode_telemetry_frame(&sample_raw().encrypt()).unwrap();
        let r = frame.record;

        assert_eq!(r.volt, 51_234.0 * 1e-4);
        assert_eq!(r.current, 123_456.0 * 1e-5);
        assert_eq!(r.power, 63_251.0 * 1e-4);
        assert_eq!(r.resistance, 415.0 * 1e-1);
        assert_eq!(r.g0_mah, 17);
        assert_eq!(r.g0_mwh, 88);
        assert_eq!(r.g1_mwh, 0);
        assert_eq!(r.temperature, 27);
        assert_eq!(r.d_plus, 61.0 * 1e-2);
        assert_eq!(r.d_minus, 3.0 * 1e-2);

        assert_eq!(frame.identity.name, "TC66");
        assert_eq!(frame.identity.version, "1.14");
        assert_eq!(frame.identity.serial_number, 12_345);
        assert_eq!(frame.identity.runs, 42);
    }

    #[test]
    fn test_negative_temperature_flag() {
        let raw = RawTelemetry {
            temp_negative: true,
            temp: 8,
            ..sample_raw()
        };
        let frame = decode_telemetry_frame(&raw.encrypt()).unwrap();
        assert_eq!(frame.record.temperature, -8);
    }

    #[test]
    fn test_decode_boundary_values_every_field() {
        for value in [0, 1, 0x8000_0000, u32::MAX] {
            for temp_negative in [false, true] {
                let raw = RawTelemetry {
                    serial_number: value,
                    runs: value,
                    volt: value,
                    current: value,
                    power: value,
                    resistance: value,
                    g0_mah: value,
                    g0_mwh: value,
                    g1_mah: value,
                    g1_mwh: value,
                    temp_negative,
                    temp: value,
                    d_plus: value,
                    d_minus: value,
                    ..Default::default()
                };
                let frame = decode_telemetry_frame(&raw.encrypt()).unwrap();
                let r = frame.record;
                let v = f64::from(value);
                let sign = if temp_negative { -1 } else { 1 };

                assert_eq!(r.volt, v * 1e-4, "volt at {value}");
                assert_eq!(r.current, v * 1e-5, "current at {value}");
                assert_eq!(r.power, v * 1e-4, "power at {value}");
                assert_eq!(r.resistance, v * 1e-1, "resistance at {value}");
                assert_eq!(r.d_plus, v * 1e-2, "d_plus at {value}");
                assert_eq!(r.d_minus, v * 1e-2, "d_minus at {value}");
                assert_eq!(r.temperature, i64::from(value) * sign, "temp at {value}");
                assert_eq!(
                    (r.g0_mah, r.g0_mwh, r.g1_mah, r.g1_mwh),
                    (value, value, value, value)
                );
                assert_eq!(frame.identity.serial_number, value);
                assert_eq!(frame.identity.runs, value);
            }
        }
    }

    #[test]
    fn test_ciphertext_differs_from_plaintext() {
        let raw = sample_raw();
        assert_ne!(raw.encrypt(), raw.to_plaintext());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let frame = sample_raw().encrypt();
        for len in [0, 64, 191] {
            let err = decode_telemetry_frame(&frame[..len]).unwrap_err();
            assert!(matches!(err, CollectorError::FrameDecode(_)));
        }
    }

    #[test]
    fn test_garbage_frame_rejected() {
        // Unencrypted plaintext decrypts to noise, so the tags fail the ASCII check.
        let err = decode_telemetry_frame(&sample_raw().to_plaintext()).unwrap_err();
        assert!(matches!(err, CollectorError::FrameDecode(_)));
    }

    #[test]
    fn test_non_printable_tag_rejected() {
        let mut plain = sample_raw().to_plaintext();
        plain[64] = 0x07;
        let err = decode_telemetry_frame(&encrypt_frame(plain)).unwrap_err();
        assert!(matches!(err, CollectorError::FrameDecode(ref m) if m.contains("tag")));
    }

    #[test]
    fn test_query_response() {
        assert_eq!(decode_query_response(b"firm").unwrap(), FirmwareMode::Firmware);
        assert_eq!(decode_query_response(b"boot").unwrap(), FirmwareMode::Bootloader);
        assert!(decode_query_response(b"xx").is_err());
    }

    #[test]
    fn test_recording_pairs_drop_partial_tail() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&50_000u32.to_le_bytes());
        bytes.extend_from_slice(&25_000u32.to_le_bytes());
        bytes.extend_from_slice(&51_000u32.to_le_bytes());
        bytes.extend_from_slice(&26_000u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3]);

        let samples = decode_recording(&bytes);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].volt, 50_000.0 * 1e-4);
        assert_eq!(samples[0].current, 25_000.0 * 1e-5);
        assert_eq!(samples[1].volt, 51_000.0 * 1e-4);
    }
}
