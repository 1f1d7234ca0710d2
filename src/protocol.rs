//! Register map and value codec for the RedLion PXU process controller.
//!
//! The PXU exposes its whole state as 16-bit Modbus holding registers. This
//! module holds the fixed register addresses, the pure conversions between
//! raw register words and domain values, and the decoders that assemble
//! [`Stats`], [`Info`] and [`Profile`] snapshots from register blocks.
//!
//! All codec functions are total: any `u16` input produces a well-defined
//! output, garbage degrades to empty strings or cleared flags, never a panic.
//! The only fallible step is block decoding, where an inconsistent LED
//! bitmask or a truncated block is a [`DecodeError`].

use std::fmt;

/// Process value, decimal with one implied digit.
pub const REG_PV: u16 = 0;
/// Active setpoint, decimal. Also the write target for setpoint updates.
pub const REG_SP: u16 = 1;
/// Proportional band, decimal.
pub const REG_TP: u16 = 10;
/// Integral time, raw integer.
pub const REG_TI: u16 = 11;
/// Derivative time, raw integer.
pub const REG_TD: u16 = 12;
/// Selected parameter-set group.
pub const REG_T_GROUP: u16 = 14;
/// Controller status. Write target for start/stop, holds the run status.
pub const REG_CONTROLLER_STATUS: u16 = 17;
/// LED status bitmask, see the `LED_*` masks.
pub const REG_LED: u16 = 20;
/// Currently executing profile.
pub const REG_PC: u16 = 25;
/// Current segment within the executing profile.
pub const REG_PS: u16 = 26;
/// Remaining time in the current segment, decimal minutes.
pub const REG_PSR: u16 = 27;

/// Size of the stats block read from address 0.
pub const STATS_REG_COUNT: u16 = 30;

/// First register of the device identity block.
pub const INFO_REG_START: u16 = 1000;
/// Size of the identity block: 6 packed-text words plus one firmware word.
pub const INFO_REG_COUNT: u16 = 7;

/// First segment register of profile 0. Profiles are 32 registers apart.
pub const PROFILE_SEGMENT_START: u16 = 1100;
/// Register distance between the segment blocks of adjacent profiles.
pub const PROFILE_SEGMENT_STRIDE: u16 = 32;
/// Stored segment count for profile N lives at this address + N.
pub const PROFILE_NUM_SEGMENTS_START: u16 = 1630;
/// Cycle repeat count for profile N lives at this address + N.
pub const PROFILE_CYCLE_REPEAT_START: u16 = 1650;
/// Link target for profile N lives at this address + N.
pub const PROFILE_LINK_START: u16 = 1670;

/// Highest valid profile id.
pub const PROFILE_ID_MAX: u8 = 16;

// LED status bit masks
pub const LED_AT: u16 = 1 << 7; // auto-tune running
pub const LED_OUT1: u16 = 1 << 6; // output power 1 active
pub const LED_OUT2: u16 = 1 << 5; // output power 2 active
pub const LED_CELSIUS: u16 = 1 << 3; // display unit Celsius
pub const LED_FAHRENHEIT: u16 = 1 << 2; // display unit Fahrenheit

/// Link register sentinel for "stop after this profile".
pub const LINK_STOP: u16 = 17;
/// Link register sentinel for "end state after this profile".
pub const LINK_END: u16 = 16;

/// Errors from assembling domain values out of register blocks.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Both Celsius and Fahrenheit LED flags set. The register map allows
    /// exactly one, so the whole snapshot is rejected.
    #[error("ambiguous temperature unit: both flags set in LED status {0:#06x}")]
    AmbiguousTemperatureUnit(u16),

    /// Neither unit flag set. Not defaulted, surfaced.
    #[error("no temperature unit flag set in LED status {0:#06x}")]
    MissingTemperatureUnit(u16),

    /// The register block is shorter than the layout requires.
    #[error("register block too short: expected {expected} registers, got {got}")]
    Truncated { expected: usize, got: usize },
}

/// Decodes a fixed-point register word with one implied decimal digit.
pub fn decimal_decode(value: u16) -> f64 {
    f64::from(value) / 10.0
}

/// Encodes a decimal value into a fixed-point register word.
///
/// The device stores tenths, so the fractional part beyond one digit is
/// truncated, not rounded: `0.96` and `0.99` both encode to `9`. Values
/// outside the representable range saturate at the `u16` bounds.
pub fn decimal_encode(value: f64) -> u16 {
    (value * 10.0).floor() as u16
}

/// Decodes a register word as two packed ASCII characters, high byte first.
///
/// Bytes outside the printable range `[32, 126]` (nulls included) are
/// dropped silently, so padding words simply contribute nothing.
pub fn packed_text_decode(word: u16) -> String {
    let mut text = String::with_capacity(2);
    for byte in [(word >> 8) as u8, word as u8] {
        if (32..=126).contains(&byte) {
            text.push(byte as char);
        }
    }
    text
}

/// Number of active segments encoded by a stored segment-count register.
/// The device stores `count - 1`: a stored zero means one active segment.
pub fn segment_count(stored: u16) -> u16 {
    stored.saturating_add(1)
}

/// Operating mode reported by, and written to, the controller-status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Stop,
    Run,
    End,
    Pause,
    AdvanceProfile,
    /// A status code outside the documented set, preserved as read.
    Unknown(u16),
}

impl RunStatus {
    pub fn decode(value: u16) -> Self {
        match value {
            0 => RunStatus::Stop,
            1 => RunStatus::Run,
            2 => RunStatus::End,
            3 => RunStatus::Pause,
            4 => RunStatus::AdvanceProfile,
            other => RunStatus::Unknown(other),
        }
    }

    pub fn encode(&self) -> u16 {
        match *self {
            RunStatus::Stop => 0,
            RunStatus::Run => 1,
            RunStatus::End => 2,
            RunStatus::Pause => 3,
            RunStatus::AdvanceProfile => 4,
            RunStatus::Unknown(other) => other,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RunStatus::Stop => write!(f, "STOP"),
            RunStatus::Run => write!(f, "RUN"),
            RunStatus::End => write!(f, "END"),
            RunStatus::Pause => write!(f, "PAUSE"),
            RunStatus::AdvanceProfile => write!(f, "ADVANCE PROFILE"),
            RunStatus::Unknown(code) => write!(f, "UNKNOWN ({code})"),
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for RunStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Display unit configured on the device. Exactly one LED flag carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// Resolves the unit from the LED bitmask. Both flags set or neither set
    /// is an inconsistent snapshot and rejected.
    pub fn decode_from_led(led: u16) -> Result<Self, DecodeError> {
        let celsius = led & LED_CELSIUS != 0;
        let fahrenheit = led & LED_FAHRENHEIT != 0;
        match (celsius, fahrenheit) {
            (true, true) => Err(DecodeError::AmbiguousTemperatureUnit(led)),
            (true, false) => Ok(TemperatureUnit::Celsius),
            (false, true) => Ok(TemperatureUnit::Fahrenheit),
            (false, false) => Err(DecodeError::MissingTemperatureUnit(led)),
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemperatureUnit::Celsius => write!(f, "C"),
            TemperatureUnit::Fahrenheit => write!(f, "F"),
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for TemperatureUnit {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// What the device does once a profile finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTarget {
    /// Continue with the given profile.
    Profile(u16),
    /// Go to the end state, holding the last setpoint.
    End,
    /// Stop control output.
    Stop,
}

impl LinkTarget {
    pub fn decode(value: u16) -> Self {
        match value {
            LINK_END => LinkTarget::End,
            LINK_STOP => LinkTarget::Stop,
            other => LinkTarget::Profile(other),
        }
    }
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LinkTarget::Profile(id) => write!(f, "PROFILE {id}"),
            LinkTarget::End => write!(f, "END"),
            LinkTarget::Stop => write!(f, "STOP"),
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for LinkTarget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Snapshot of the live process state, rebuilt on every read.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Stats {
    /// Process value.
    pub pv: f64,
    /// Active setpoint.
    pub sp: f64,
    /// Output power 1 active.
    pub out1: bool,
    /// Output power 2 active.
    pub out2: bool,
    /// Auto-tune running.
    pub at: bool,
    /// Proportional band.
    pub tp: f64,
    /// Integral time.
    pub ti: u16,
    /// Derivative time.
    pub td: u16,
    /// Selected parameter-set group.
    #[cfg_attr(feature = "serde", serde(rename = "tgroup"))]
    pub t_group: u16,
    /// Run status.
    pub rs: RunStatus,
    /// Display unit for pv/sp.
    #[cfg_attr(feature = "serde", serde(rename = "vunit"))]
    pub unit: TemperatureUnit,
    /// Currently executing profile.
    pub pc: u16,
    /// Current segment within the profile.
    pub ps: u16,
    /// Remaining time in the current segment, minutes.
    pub psr: f64,
}

impl Stats {
    /// Assembles a snapshot from the stats block read at address 0.
    pub fn decode(regs: &[u16]) -> Result<Self, DecodeError> {
        if regs.len() < STATS_REG_COUNT as usize {
            return Err(DecodeError::Truncated {
                expected: STATS_REG_COUNT as usize,
                got: regs.len(),
            });
        }

        let led = regs[REG_LED as usize];
        let unit = TemperatureUnit::decode_from_led(led)?;

        Ok(Stats {
            pv: decimal_decode(regs[REG_PV as usize]),
            sp: decimal_decode(regs[REG_SP as usize]),
            out1: led & LED_OUT1 != 0,
            out2: led & LED_OUT2 != 0,
            at: led & LED_AT != 0,
            tp: decimal_decode(regs[REG_TP as usize]),
            ti: regs[REG_TI as usize],
            td: regs[REG_TD as usize],
            t_group: regs[REG_T_GROUP as usize],
            rs: RunStatus::decode(regs[REG_CONTROLLER_STATUS as usize]),
            unit,
            pc: regs[REG_PC as usize],
            ps: regs[REG_PS as usize],
            psr: decimal_decode(regs[REG_PSR as usize]),
        })
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PV:{:.1}{} SP:{:.1}{} | Out1:{} Out2:{} AT:{} | TP:{:.1} TI:{} TD:{} TGroup:{} | RS:{} | PC:{} PS:{} PSR:{:.1}",
            self.pv,
            self.unit,
            self.sp,
            self.unit,
            self.out1,
            self.out2,
            self.at,
            self.tp,
            self.ti,
            self.td,
            self.t_group,
            self.rs,
            self.pc,
            self.ps,
            self.psr,
        )
    }
}

/// Device identity, read once from the info block.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Info {
    /// Model designation, packed ASCII with padding stripped.
    pub model: String,
    /// Firmware version with two implied decimal digits.
    pub firmware: String,
}

impl Info {
    /// Assembles the identity from the 7-register info block.
    pub fn decode(regs: &[u16]) -> Result<Self, DecodeError> {
        if regs.len() < INFO_REG_COUNT as usize {
            return Err(DecodeError::Truncated {
                expected: INFO_REG_COUNT as usize,
                got: regs.len(),
            });
        }

        let text_words = INFO_REG_COUNT as usize - 1;
        let mut model = String::with_capacity(text_words * 2);
        for &word in &regs[..text_words] {
            model.push_str(&packed_text_decode(word));
        }

        Ok(Info {
            model: model.trim().to_string(),
            firmware: format!("{:.2}", f64::from(regs[text_words]) / 100.0),
        })
    }
}

impl fmt::Display for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Model: {}, Firmware: {}", self.model, self.firmware)
    }
}

/// One setpoint/time step within a profile.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Segment {
    /// Position within the profile, assigned by read order.
    pub id: u8,
    /// Target setpoint for this segment.
    pub sp: f64,
    /// Segment duration in minutes.
    pub t: f64,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id: {}, Sp: {:.1}, T: {:.1}", self.id, self.sp, self.t)
    }
}

/// A stored multi-segment setpoint/time program.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Profile {
    pub id: u8,
    /// Number of active segments, always `segments.len()`.
    pub seg_count: u16,
    /// What the device does when the profile finishes.
    pub link: LinkTarget,
    /// How often the profile repeats, 0 for no repeat.
    pub repeat: u16,
    pub segments: Vec<Segment>,
}

impl Profile {
    /// Assembles a profile from the stored segment-count, link and repeat
    /// words and its segment block. Setpoints sit at even offsets within
    /// each register pair, durations at odd offsets.
    pub fn decode(
        id: u8,
        stored_count: u16,
        link: u16,
        repeat: u16,
        segment_regs: &[u16],
    ) -> Result<Self, DecodeError> {
        let seg_count = segment_count(stored_count);
        let expected = seg_count as usize * 2;
        if segment_regs.len() < expected {
            return Err(DecodeError::Truncated {
                expected,
                got: segment_regs.len(),
            });
        }

        let segments = (0..seg_count)
            .map(|i| {
                let offset = i as usize * 2;
                Segment {
                    id: i as u8,
                    sp: decimal_decode(segment_regs[offset]),
                    t: decimal_decode(segment_regs[offset + 1]),
                }
            })
            .collect();

        Ok(Profile {
            id,
            seg_count,
            link: LinkTarget::decode(link),
            repeat,
            segments,
        })
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Id: {}, SegCount: {}, Link: {}, Repeat: {}",
            self.id, self.seg_count, self.link, self.repeat
        )?;
        for segment in &self.segments {
            write!(f, "\n  {segment}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn stats_block() -> Vec<u16> {
        let mut regs = vec![0u16; STATS_REG_COUNT as usize];
        regs[REG_PV as usize] = 235;
        regs[REG_SP as usize] = 250;
        regs[REG_LED as usize] = LED_CELSIUS | LED_OUT1 | LED_AT;
        regs[REG_CONTROLLER_STATUS as usize] = 1;
        regs
    }

    #[test]
    fn decimal_codec() {
        assert_eq!(decimal_decode(0), 0.0);
        assert_eq!(decimal_decode(235), 23.5);
        assert_eq!(decimal_decode(u16::MAX), 6553.5);

        assert_eq!(decimal_encode(23.5), 235);
        assert_eq!(decimal_encode(0.0), 0);
        assert_eq!(decimal_encode(6553.5), 65535);
    }

    #[test]
    fn decimal_encode_truncates() {
        // Tenths are truncated, never rounded.
        assert_eq!(decimal_encode(0.96), 9);
        assert_eq!(decimal_encode(0.99), 9);
        assert_eq!(decimal_decode(decimal_encode(0.96)), 0.9);

        // Out of range saturates instead of wrapping.
        assert_eq!(decimal_encode(-1.0), 0);
        assert_eq!(decimal_encode(1e9), u16::MAX);
    }

    #[test]
    fn decimal_roundtrip_is_exact_on_register_values() {
        for raw in [0u16, 1, 9, 10, 99, 235, 9999, u16::MAX] {
            let value = decimal_decode(raw);
            assert_eq!(decimal_encode(value), raw);
        }
    }

    #[test]
    fn packed_text() {
        assert_eq!(packed_text_decode(0x4142), "AB");
        // Embedded null is dropped, not kept as a terminator.
        assert_eq!(packed_text_decode(0x4100), "A");
        // Control characters are dropped no matter the byte position.
        assert_eq!(packed_text_decode(0x0141), "A");
        assert_eq!(packed_text_decode(0x0000), "");
        assert_eq!(packed_text_decode(0x2020), "  ");
    }

    #[test]
    fn temperature_unit_from_led() {
        assert_eq!(
            TemperatureUnit::decode_from_led(LED_CELSIUS),
            Ok(TemperatureUnit::Celsius)
        );
        assert_eq!(
            TemperatureUnit::decode_from_led(LED_FAHRENHEIT | LED_OUT1),
            Ok(TemperatureUnit::Fahrenheit)
        );
        assert_matches!(
            TemperatureUnit::decode_from_led(LED_CELSIUS | LED_FAHRENHEIT),
            Err(DecodeError::AmbiguousTemperatureUnit(..))
        );
        assert_matches!(
            TemperatureUnit::decode_from_led(LED_OUT1 | LED_OUT2),
            Err(DecodeError::MissingTemperatureUnit(..))
        );
    }

    #[test]
    fn run_status_codec() {
        assert_eq!(RunStatus::decode(0), RunStatus::Stop);
        assert_eq!(RunStatus::decode(1), RunStatus::Run);
        assert_eq!(RunStatus::decode(4), RunStatus::AdvanceProfile);
        assert_eq!(RunStatus::decode(7), RunStatus::Unknown(7));

        assert_eq!(RunStatus::Run.encode(), 1);
        assert_eq!(RunStatus::Unknown(7).encode(), 7);

        assert_eq!(RunStatus::Run.to_string(), "RUN");
        assert_eq!(RunStatus::AdvanceProfile.to_string(), "ADVANCE PROFILE");
        assert_eq!(RunStatus::Unknown(7).to_string(), "UNKNOWN (7)");
    }

    #[test]
    fn link_target_sentinels() {
        assert_eq!(LinkTarget::decode(LINK_END), LinkTarget::End);
        assert_eq!(LinkTarget::decode(LINK_STOP), LinkTarget::Stop);
        assert_eq!(LinkTarget::decode(3), LinkTarget::Profile(3));
        assert_eq!(LinkTarget::Profile(3).to_string(), "PROFILE 3");
    }

    #[test]
    fn stats_decode() {
        let stats = Stats::decode(&stats_block()).unwrap();

        assert_eq!(stats.pv, 23.5);
        assert_eq!(stats.sp, 25.0);
        assert!(stats.out1);
        assert!(!stats.out2);
        assert!(stats.at);
        assert_eq!(stats.rs, RunStatus::Run);
        assert_eq!(stats.rs.to_string(), "RUN");
        assert_eq!(stats.unit, TemperatureUnit::Celsius);
    }

    #[test]
    fn stats_decode_rejects_bad_unit_flags() {
        let mut regs = stats_block();
        regs[REG_LED as usize] = LED_CELSIUS | LED_FAHRENHEIT;
        assert_matches!(
            Stats::decode(&regs),
            Err(DecodeError::AmbiguousTemperatureUnit(..))
        );

        regs[REG_LED as usize] = 0;
        assert_matches!(
            Stats::decode(&regs),
            Err(DecodeError::MissingTemperatureUnit(..))
        );
    }

    #[test]
    fn stats_decode_rejects_short_block() {
        assert_matches!(
            Stats::decode(&[0u16; 10]),
            Err(DecodeError::Truncated {
                expected: 30,
                got: 10
            })
        );
    }

    #[test]
    fn info_decode() {
        let info = Info::decode(&[0x5058, 0x5531, 0x3233, 0, 0, 0, 125]).unwrap();
        assert_eq!(info.model, "PXU123");
        assert_eq!(info.firmware, "1.25");
        assert_eq!(info.to_string(), "Model: PXU123, Firmware: 1.25");
    }

    #[test]
    fn info_decode_trims_padding() {
        // Space-padded model words trim down to the printable core.
        let info = Info::decode(&[0x2050, 0x5855, 0x2020, 0, 0, 0, 100]).unwrap();
        assert_eq!(info.model, "PXU");
        assert_eq!(info.firmware, "1.00");
    }

    #[test]
    fn segment_count_stored_offset() {
        assert_eq!(segment_count(0), 1);
        assert_eq!(segment_count(3), 4);
        assert_eq!(segment_count(u16::MAX), u16::MAX);
    }

    #[test]
    fn profile_decode() {
        let segment_regs = [250, 7200, 305, 3600, 620, 7200, 720, 9999];
        let profile = Profile::decode(0, 3, LINK_END, 2, &segment_regs).unwrap();

        assert_eq!(profile.seg_count, 4);
        assert_eq!(profile.segments.len(), 4);
        assert_eq!(profile.link, LinkTarget::End);
        assert_eq!(profile.repeat, 2);

        let pairs: Vec<(f64, f64)> = profile.segments.iter().map(|s| (s.sp, s.t)).collect();
        assert_eq!(
            pairs,
            vec![(25.0, 720.0), (30.5, 360.0), (62.0, 720.0), (72.0, 999.9)]
        );
        // Segment ids follow read order.
        let ids: Vec<u8> = profile.segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn profile_decode_rejects_short_segment_block() {
        assert_matches!(
            Profile::decode(0, 3, LINK_END, 0, &[250, 7200]),
            Err(DecodeError::Truncated {
                expected: 8,
                got: 2
            })
        );
    }
}
