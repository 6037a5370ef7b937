//! ACM wire protocol
//! Inbound telemetry is one ASCII frame of `;`-separated `ID:payload` sections.
//! Outbound commands are short ASCII tokens. Nothing in here does I/O.

use serde::{Deserialize, Serialize};

use crate::core::error::{CommandError, FrameError};
use crate::core::telemetry::{
    LOW_CURRENT_CHANNELS, LowCurrentChannel, MEDIUM_CURRENT_CHANNELS, MediumCurrentChannel,
    TOTAL_CHANNELS, TelemetrySnapshot,
};

const VOLTAGE_FIELDS: usize = 5;
const LOW_CURRENT_TOKEN_LEN: usize = 4;
const MEDIUM_CURRENT_TOKEN_LEN: usize = 2;

/// Section identifiers carried in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionId {
    /// `V`: battery and solar readings
    Voltage,
    /// `L`: the 8 low-current channels
    LowCurrent,
    /// `M`: the 2 medium-current channels
    MediumCurrent,
    /// Anything else; skipped so newer firmware can add sections
    Unknown,
}

impl SectionId {
    pub fn parse(id: &str) -> Self {
        match id {
            "V" => Self::Voltage,
            "L" => Self::LowCurrent,
            "M" => Self::MediumCurrent,
            _ => Self::Unknown,
        }
    }
}

/// A successfully decoded section.
///
/// Channel entries are `None` when that channel's token was malformed; the
/// previous value of such a channel is kept.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Voltage(TelemetrySnapshot),
    LowCurrent([Option<LowCurrentChannel>; LOW_CURRENT_CHANNELS]),
    MediumCurrent([Option<MediumCurrentChannel>; MEDIUM_CURRENT_CHANNELS]),
}

/// Result of decoding one frame: the sections that survived, plus what was discarded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFrame {
    pub sections: Vec<Section>,
    pub errors: Vec<FrameError>,
}

impl DecodedFrame {
    pub fn has_channel_sections(&self) -> bool {
        self.sections
            .iter()
            .any(|s| matches!(s, Section::LowCurrent(_) | Section::MediumCurrent(_)))
    }
}

/// Decodes a raw notification payload.
pub fn decode_bytes(data: &[u8]) -> DecodedFrame {
    decode(&String::from_utf8_lossy(data))
}

/// Decodes one telemetry frame. A bad section never invalidates the others.
pub fn decode(frame: &str) -> DecodedFrame {
    let mut decoded = DecodedFrame::default();
    let frame = frame.trim_matches(|c: char| c.is_whitespace() || c == '\0');

    for raw in frame.split(';') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let mut parts = raw.split(':');
        let (id, payload) = match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(payload), None) => (id.trim(), payload),
            _ => {
                decoded.errors.push(FrameError::MissingSeparator(raw.to_string()));
                continue;
            }
        };

        let section = match SectionId::parse(id) {
            SectionId::Voltage => decode_voltage(payload),
            SectionId::LowCurrent => decode_low_current(payload, &mut decoded.errors),
            SectionId::MediumCurrent => decode_medium_current(payload, &mut decoded.errors),
            SectionId::Unknown => Err(FrameError::UnknownSection(id.to_string())),
        };

        match section {
            Ok(section) => decoded.sections.push(section),
            Err(e) => decoded.errors.push(e),
        }
    }

    decoded
}

fn split_fields(payload: &str) -> Vec<&str> {
    payload.split(',').map(str::trim).collect()
}

fn expect_count(section: SectionId, fields: &[&str], expected: usize) -> Result<(), FrameError> {
    if fields.len() == expected {
        Ok(())
    } else {
        Err(FrameError::FieldCount {
            section,
            expected,
            found: fields.len(),
        })
    }
}

fn parse_hex(section: SectionId, field: &str) -> Result<u32, FrameError> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FrameError::InvalidHex {
            section,
            field: field.to_string(),
        });
    }
    u32::from_str_radix(field, 16).map_err(|_| FrameError::InvalidHex {
        section,
        field: field.to_string(),
    })
}

fn decode_voltage(payload: &str) -> Result<Section, FrameError> {
    let section = SectionId::Voltage;
    let fields = split_fields(payload);
    expect_count(section, &fields, VOLTAGE_FIELDS)?;

    let battery = parse_hex(section, fields[0])?;
    let load = parse_hex(section, fields[1])?;
    let solar_voltage = parse_hex(section, fields[2])?;
    let solar_current = parse_hex(section, fields[3])?;
    let solar_power = parse_hex(section, fields[4])?;

    Ok(Section::Voltage(TelemetrySnapshot {
        battery_voltage: battery as f32 / 100.0,
        load_current: load as f32 / 100_000.0,
        solar_voltage: solar_voltage as f32 / 100.0,
        solar_current: solar_current as f32 / 100.0,
        solar_power: solar_power as f32 / 100.0,
        solar_charging: fields[3] == "1",
    }))
}

/// Reads `len` hex digits starting at byte `start` of an ASCII token.
fn token_digits(token: &str, start: usize, len: usize) -> Option<u32> {
    let digits = token.get(start..start + len)?;
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

fn decode_low_token(token: &str) -> Option<LowCurrentChannel> {
    if token.len() < LOW_CURRENT_TOKEN_LEN {
        return None;
    }
    let state = token_digits(token, 0, 1)?;
    let brightness = token_digits(token, 1, 2)?;
    let current = token_digits(token, 3, 1)?;

    Some(LowCurrentChannel {
        enabled: state == 1,
        brightness: brightness as f32 / 255.0,
        current: current as f32 / 10.0,
    })
}

fn decode_medium_token(token: &str) -> Option<MediumCurrentChannel> {
    if token.len() < MEDIUM_CURRENT_TOKEN_LEN {
        return None;
    }
    let state = token_digits(token, 0, 1)?;
    let current = token_digits(token, 1, 1)?;

    Some(MediumCurrentChannel {
        enabled: state == 1,
        current: current as f32 / 10.0,
    })
}

fn decode_low_current(payload: &str, errors: &mut Vec<FrameError>) -> Result<Section, FrameError> {
    let section = SectionId::LowCurrent;
    let tokens = split_fields(payload);
    expect_count(section, &tokens, LOW_CURRENT_CHANNELS)?;

    let mut entries = [None; LOW_CURRENT_CHANNELS];
    for (index, (entry, token)) in entries.iter_mut().zip(&tokens).enumerate() {
        *entry = decode_low_token(token);
        if entry.is_none() {
            errors.push(FrameError::ChannelToken {
                section,
                channel: index + 1,
                token: token.to_string(),
            });
        }
    }
    Ok(Section::LowCurrent(entries))
}

fn decode_medium_current(
    payload: &str,
    errors: &mut Vec<FrameError>,
) -> Result<Section, FrameError> {
    let section = SectionId::MediumCurrent;
    let tokens = split_fields(payload);
    expect_count(section, &tokens, MEDIUM_CURRENT_CHANNELS)?;

    let mut entries = [None; MEDIUM_CURRENT_CHANNELS];
    for (index, (entry, token)) in entries.iter_mut().zip(&tokens).enumerate() {
        *entry = decode_medium_token(token);
        if entry.is_none() {
            errors.push(FrameError::ChannelToken {
                section,
                channel: index + 1,
                token: token.to_string(),
            });
        }
    }
    Ok(Section::MediumCurrent(entries))
}

/// A set of outputs in mask order: bit 0 is LC1, bit 7 is LC8, bits 8 and 9 are MC1 and MC2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelMask(u16);

impl ChannelMask {
    pub const EMPTY: Self = Self(0);

    pub fn from_flags(flags: [bool; TOTAL_CHANNELS]) -> Self {
        let bits = flags
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .fold(0u16, |acc, (i, _)| acc | (1 << i));
        Self(bits)
    }

    pub fn contains(&self, index: usize) -> bool {
        index < TOTAL_CHANNELS && self.0 & (1 << index) != 0
    }

    pub fn set(&mut self, index: usize, on: bool) {
        if index >= TOTAL_CHANNELS {
            return;
        }
        if on {
            self.0 |= 1 << index;
        } else {
            self.0 &= !(1 << index);
        }
    }

    /// Ten `0`/`1` characters, LC1 first.
    fn to_wire(self) -> String {
        (0..TOTAL_CHANNELS)
            .map(|i| if self.contains(i) { '1' } else { '0' })
            .collect()
    }
}

/// Automatic load-disconnect settings. Always sent as one command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CutoffConfig {
    /// Battery voltage below which loads are cut (V)
    pub cut_out_voltage: f32,
    /// Battery voltage at which loads are restored (V)
    pub cut_in_voltage: f32,
    pub auto_cutoff: bool,
    /// Outputs that are never cut
    pub always_on: ChannelMask,
    /// Outputs restored first
    pub priority: ChannelMask,
}

impl Default for CutoffConfig {
    fn default() -> Self {
        Self {
            cut_out_voltage: 11.8,
            cut_in_voltage: 12.2,
            auto_cutoff: true,
            always_on: ChannelMask::EMPTY,
            priority: ChannelMask::EMPTY,
        }
    }
}

/// Commands understood by the controller. Channel numbers are 1-based, as on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    SetLowCurrent { channel: u8, on: bool },
    SetMediumCurrent { channel: u8, on: bool },
    /// `level` is a fraction; values outside 0..=1 are clamped
    SetBrightness { channel: u8, level: f32 },
    Configure(CutoffConfig),
}

fn check_channel(channel: u8, max: usize) -> Result<(), CommandError> {
    if channel == 0 || channel as usize > max {
        return Err(CommandError::ChannelOutOfRange {
            channel,
            max: max as u8,
        });
    }
    Ok(())
}

fn check_voltage(voltage: f32) -> Result<(), CommandError> {
    if !voltage.is_finite() || voltage < 0.0 {
        return Err(CommandError::InvalidVoltage(voltage));
    }
    Ok(())
}

/// Encodes a command into its wire text.
pub fn encode(command: &Command) -> Result<String, CommandError> {
    match *command {
        Command::SetLowCurrent { channel, on } => {
            check_channel(channel, LOW_CURRENT_CHANNELS)?;
            Ok(format!("L{}{}", channel, u8::from(on)))
        }
        Command::SetMediumCurrent { channel, on } => {
            check_channel(channel, MEDIUM_CURRENT_CHANNELS)?;
            Ok(format!("M{}{}", channel, u8::from(on)))
        }
        Command::SetBrightness { channel, level } => {
            check_channel(channel, LOW_CURRENT_CHANNELS)?;
            if !level.is_finite() {
                return Err(CommandError::InvalidBrightness(level));
            }
            let raw = (level.clamp(0.0, 1.0) * 255.0).round() as u8;
            Ok(format!("B{}{:02X}", channel, raw))
        }
        Command::Configure(config) => {
            check_voltage(config.cut_out_voltage)?;
            check_voltage(config.cut_in_voltage)?;
            Ok(format!(
                "CONFIG CO{:.2} CI{:.2} AC{} AO{} PR{}",
                config.cut_out_voltage,
                config.cut_in_voltage,
                u8::from(config.auto_cutoff),
                config.always_on.to_wire(),
                config.priority.to_wire(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    fn voltage(frame: &DecodedFrame) -> Option<TelemetrySnapshot> {
        frame.sections.iter().find_map(|s| match s {
            Section::Voltage(v) => Some(*v),
            _ => None,
        })
    }

    #[test]
    fn decodes_reference_frame() {
        let frame = decode(
            "V:04B0,00001,0000,0,0000;L:0ff0,0ff0,0ff0,0ff0,0ff0,0ff0,0ff0,0ff0;M:00,00",
        );
        assert!(frame.errors.is_empty());
        assert_eq!(frame.sections.len(), 3);

        let v = voltage(&frame).unwrap();
        assert!(approx(v.battery_voltage, 12.0));
        assert!(approx(v.load_current, 0.00001));
        assert!(!v.solar_charging);

        match &frame.sections[1] {
            Section::LowCurrent(entries) => {
                for entry in entries {
                    let channel = entry.unwrap();
                    assert!(!channel.enabled);
                    assert!(approx(channel.brightness, 1.0));
                    assert!(approx(channel.current, 0.0));
                }
            }
            other => panic!("expected low-current section, got {:?}", other),
        }
        match &frame.sections[2] {
            Section::MediumCurrent(entries) => {
                assert!(entries.iter().all(|e| e.map(|c| !c.enabled).unwrap_or(false)));
            }
            other => panic!("expected medium-current section, got {:?}", other),
        }
    }

    #[test]
    fn voltage_scale_factors() {
        let v = voltage(&decode("V:0514,186A0,076C,1,0FA0")).unwrap();
        assert!(approx(v.battery_voltage, 13.0));
        assert!(approx(v.load_current, 1.0));
        assert!(approx(v.solar_voltage, 19.0));
        assert!(approx(v.solar_current, 0.01));
        assert!(approx(v.solar_power, 40.0));
        assert!(v.solar_charging);
    }

    #[test]
    fn voltage_with_wrong_field_count_is_rejected() {
        let frame = decode("V:04B0,0001,0000,0");
        assert!(frame.sections.is_empty());
        assert_eq!(
            frame.errors,
            vec![FrameError::FieldCount {
                section: SectionId::Voltage,
                expected: 5,
                found: 4
            }]
        );
    }

    #[test]
    fn voltage_with_bad_hex_is_rejected_whole() {
        let frame = decode("V:04B0,zz,0000,0,0000");
        assert!(voltage(&frame).is_none());
        assert!(matches!(frame.errors[0], FrameError::InvalidHex { .. }));
    }

    #[test]
    fn malformed_section_does_not_spoil_the_frame() {
        let frame = decode("V:04B0,0,0,0,0;garbage;L:1ff1,1ff1,1ff1,1ff1,1ff1,1ff1,1ff1,1ff1;M:11,11");
        assert_eq!(frame.sections.len(), 3);
        assert_eq!(frame.errors, vec![FrameError::MissingSeparator("garbage".into())]);
    }

    #[test]
    fn extra_colon_is_malformed() {
        let frame = decode("V:1:2;M:10,10");
        assert_eq!(frame.sections.len(), 1);
        assert_eq!(frame.errors, vec![FrameError::MissingSeparator("V:1:2".into())]);
    }

    #[test]
    fn unknown_sections_are_skipped() {
        let frame = decode("T:42;M:10,01");
        assert_eq!(frame.sections.len(), 1);
        assert_eq!(frame.errors, vec![FrameError::UnknownSection("T".into())]);
        assert_eq!(SectionId::parse("T"), SectionId::Unknown);
    }

    #[test]
    fn low_current_count_mismatch_rejects_section() {
        let frame = decode("L:0ff0,0ff0,0ff0,0ff0,0ff0,0ff0,0ff0");
        assert!(!frame.has_channel_sections());
        assert!(matches!(
            frame.errors[0],
            FrameError::FieldCount { section: SectionId::LowCurrent, expected: 8, found: 7 }
        ));
    }

    #[test]
    fn short_token_rejects_only_that_channel() {
        let frame = decode("L:1ff1,0f,1801,1801,1801,1801,1801,1801");
        let Section::LowCurrent(entries) = &frame.sections[0] else {
            panic!("expected low-current section");
        };
        assert!(entries[0].is_some());
        assert!(entries[1].is_none());
        assert!(entries[2..].iter().all(Option::is_some));
        assert!(approx(entries[2].unwrap().brightness, 128.0 / 255.0));
        assert_eq!(
            frame.errors,
            vec![FrameError::ChannelToken {
                section: SectionId::LowCurrent,
                channel: 2,
                token: "0f".into()
            }]
        );
    }

    #[test]
    fn medium_current_tokens() {
        let frame = decode("M:1a,0");
        let Section::MediumCurrent(entries) = &frame.sections[0] else {
            panic!("expected medium-current section");
        };
        let first = entries[0].unwrap();
        assert!(first.enabled);
        assert!(approx(first.current, 1.0));
        assert!(entries[1].is_none());
    }

    #[test]
    fn only_state_digit_one_means_on() {
        let frame = decode("L:2ff0,1ff0,fff0,0ff0,0ff0,0ff0,0ff0,0ff0;M:a0,10");
        assert!(frame.errors.is_empty());

        let Section::LowCurrent(low) = &frame.sections[0] else {
            panic!("expected low-current section");
        };
        let low: Vec<bool> = low.iter().map(|e| e.unwrap().enabled).collect();
        assert_eq!(low, vec![false, true, false, false, false, false, false, false]);

        let Section::MediumCurrent(medium) = &frame.sections[1] else {
            panic!("expected medium-current section");
        };
        assert!(!medium[0].unwrap().enabled);
        assert!(medium[1].unwrap().enabled);
    }

    #[test]
    fn tolerates_padding_and_trailing_separator() {
        let frame = decode_bytes(b"M:10,00;\r\n\0");
        assert_eq!(frame.sections.len(), 1);
        assert!(frame.errors.is_empty());
    }

    #[test]
    fn encodes_switch_commands() {
        assert_eq!(encode(&Command::SetLowCurrent { channel: 3, on: true }).unwrap(), "L31");
        assert_eq!(encode(&Command::SetMediumCurrent { channel: 2, on: false }).unwrap(), "M20");
        assert_eq!(
            encode(&Command::SetLowCurrent { channel: 9, on: true }),
            Err(CommandError::ChannelOutOfRange { channel: 9, max: 8 })
        );
        assert!(encode(&Command::SetMediumCurrent { channel: 0, on: true }).is_err());
    }

    #[test]
    fn encodes_brightness_as_rounded_hex() {
        let cmd = |level| Command::SetBrightness { channel: 1, level };
        assert_eq!(encode(&cmd(1.0)).unwrap(), "B1FF");
        assert_eq!(encode(&cmd(0.0)).unwrap(), "B100");
        assert_eq!(encode(&cmd(0.5)).unwrap(), "B180");
        assert_eq!(encode(&cmd(2.0)).unwrap(), "B1FF");
        assert!(encode(&cmd(f32::NAN)).is_err());
    }

    #[test]
    fn encodes_configuration_in_one_command() {
        let mut always_on = ChannelMask::EMPTY;
        always_on.set(0, true);
        always_on.set(9, true);
        let priority = ChannelMask::from_flags([
            false, true, false, false, false, false, false, false, true, false,
        ]);

        let text = encode(&Command::Configure(CutoffConfig {
            cut_out_voltage: 11.8,
            cut_in_voltage: 12.25,
            auto_cutoff: false,
            always_on,
            priority,
        }))
        .unwrap();

        assert_eq!(text, "CONFIG CO11.80 CI12.25 AC0 AO1000000001 PR0100000010");
    }

    #[test]
    fn default_configuration() {
        let text = encode(&Command::Configure(CutoffConfig::default())).unwrap();
        assert_eq!(text, "CONFIG CO11.80 CI12.20 AC1 AO0000000000 PR0000000000");
    }

    #[test]
    fn rejects_negative_cutoff_voltage() {
        let config = CutoffConfig {
            cut_out_voltage: -1.0,
            ..CutoffConfig::default()
        };
        assert_eq!(
            encode(&Command::Configure(config)),
            Err(CommandError::InvalidVoltage(-1.0))
        );
    }
}
