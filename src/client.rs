//! Controller facade for a single PXU unit.
//!
//! [`Pxu`] owns the register transport and sequences every read and write
//! through the retry policy, assembling typed snapshots out of the raw
//! register blocks. One instance means one logical stream of operations;
//! callers that multiplex (such as the stats server) wrap it in a mutex.

use crate::protocol::{self as proto, Info, Profile, RunStatus, Stats};
use crate::retry::{self, RetryError, RetryPolicy};
use crate::transport::{RegisterTransport, TransportError};
use log::info;
use std::time::Duration;

/// Applied when the caller passes a zero timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Applied when the caller passes zero retries.
pub const DEFAULT_RETRIES: u32 = 3;

/// Errors surfaced by the controller facade.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A register read kept failing until the retry policy ran out.
    #[error("unit {unit}: read of {count} registers at {address} failed after {attempts} attempts")]
    Transport {
        unit: u8,
        address: u16,
        count: u16,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The device answered with fewer registers than requested. Never
    /// padded; the whole operation fails.
    #[error("unit {unit}: read at {address} returned {got} registers, expected {expected}")]
    ShortRead {
        unit: u8,
        address: u16,
        expected: u16,
        got: usize,
    },

    /// A register block did not decode into a consistent snapshot.
    #[error(transparent)]
    Decode(#[from] proto::DecodeError),

    /// Profile id outside the device's 0..=16 range, rejected before any
    /// register access.
    #[error("invalid profile id {0}, must be 0..={max}", max = proto::PROFILE_ID_MAX)]
    InvalidProfileId(u8),

    /// One of the dependent reads of a profile failed; no partial profile
    /// is ever returned.
    #[error("unit {unit}: reading profile {id} {stage} failed")]
    Profile {
        unit: u8,
        id: u8,
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// A register write was not acknowledged.
    #[error("unit {unit}: failed to write {value} to register {address}")]
    Write {
        unit: u8,
        address: u16,
        value: u16,
        #[source]
        source: TransportError,
    },

    /// A setpoint update failed; carries the requested decimal value.
    #[error("unit {unit}: failed to update setpoint to {value:.1}")]
    Setpoint {
        unit: u8,
        value: f64,
        #[source]
        source: TransportError,
    },

    /// The unit could not be selected on the transport at construction.
    #[error("failed to select unit {unit}")]
    SelectUnit {
        unit: u8,
        #[source]
        source: TransportError,
    },

    /// Closing the transport failed.
    #[error("unit {unit}: failed to close transport")]
    Close {
        unit: u8,
        #[source]
        source: TransportError,
    },
}

/// Facade over one PXU unit on the bus.
pub struct Pxu {
    transport: Box<dyn RegisterTransport>,
    policy: RetryPolicy,
    unit_id: u8,
    closed: bool,
}

impl std::fmt::Debug for Pxu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pxu")
            .field("policy", &self.policy)
            .field("unit_id", &self.unit_id)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Pxu {
    /// Binds a facade to `unit_id` over the given transport.
    ///
    /// A zero `timeout` or `retries` selects the documented defaults. The
    /// unit is selected on the transport immediately; if that fails the
    /// controller is not usable and construction errors out.
    pub fn new(
        unit_id: u8,
        mut transport: Box<dyn RegisterTransport>,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self, Error> {
        let timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        let retries = if retries == 0 { DEFAULT_RETRIES } else { retries };

        transport
            .set_unit_id(unit_id)
            .map_err(|source| Error::SelectUnit {
                unit: unit_id,
                source,
            })?;
        info!("connected to unit {unit_id}");

        Ok(Self {
            transport,
            policy: RetryPolicy { retries, timeout },
            unit_id,
            closed: false,
        })
    }

    /// The unit address this controller talks to.
    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// Cumulative per-read deadline in effect.
    pub fn timeout(&self) -> Duration {
        self.policy.timeout
    }

    /// Retry budget in effect.
    pub fn retries(&self) -> u32 {
        self.policy.retries
    }

    /// Reads a register block through the retry policy, requiring the full
    /// count to come back.
    fn read_block(&mut self, address: u16, count: u16) -> Result<Vec<u16>, Error> {
        let regs = retry::read_with_retry(self.transport.as_mut(), &self.policy, address, count)
            .map_err(|RetryError { attempts, source }| Error::Transport {
                unit: self.unit_id,
                address,
                count,
                attempts,
                source,
            })?;

        if regs.len() < count as usize {
            return Err(Error::ShortRead {
                unit: self.unit_id,
                address,
                expected: count,
                got: regs.len(),
            });
        }
        Ok(regs)
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<(), Error> {
        self.transport
            .write_register(address, value)
            .map_err(|source| Error::Write {
                unit: self.unit_id,
                address,
                value,
                source,
            })
    }

    /// Reads a fresh snapshot of the live process state.
    pub fn read_stats(&mut self) -> Result<Stats, Error> {
        let regs = self.read_block(proto::REG_PV, proto::STATS_REG_COUNT)?;
        Ok(Stats::decode(&regs)?)
    }

    /// Reads the device identity block.
    pub fn read_info(&mut self) -> Result<Info, Error> {
        let regs = self.read_block(proto::INFO_REG_START, proto::INFO_REG_COUNT)?;
        Ok(Info::decode(&regs)?)
    }

    /// Reads one stored profile.
    ///
    /// Four dependent reads in sequence: stored segment count, link target,
    /// repeat count, then the segment block whose length follows from the
    /// count. Each read retries independently; a failure at any stage
    /// aborts the whole operation.
    pub fn read_profile(&mut self, id: u8) -> Result<Profile, Error> {
        if id > proto::PROFILE_ID_MAX {
            return Err(Error::InvalidProfileId(id));
        }

        let wrap = |unit: u8, stage: &'static str| {
            move |source: Error| Error::Profile {
                unit,
                id,
                stage,
                source: Box::new(source),
            }
        };
        let unit = self.unit_id;

        let stored_count = self
            .read_block(proto::PROFILE_NUM_SEGMENTS_START + u16::from(id), 1)
            .map_err(wrap(unit, "segment count"))?[0];
        let link = self
            .read_block(proto::PROFILE_LINK_START + u16::from(id), 1)
            .map_err(wrap(unit, "link target"))?[0];
        let repeat = self
            .read_block(proto::PROFILE_CYCLE_REPEAT_START + u16::from(id), 1)
            .map_err(wrap(unit, "repeat cycle"))?[0];

        let start = proto::PROFILE_SEGMENT_START + u16::from(id) * proto::PROFILE_SEGMENT_STRIDE;
        let count = proto::segment_count(stored_count).saturating_mul(2);
        let segment_regs = self
            .read_block(start, count)
            .map_err(wrap(unit, "segments"))?;

        Ok(Profile::decode(id, stored_count, link, repeat, &segment_regs)?)
    }

    /// Writes a new active setpoint.
    ///
    /// The value is truncated to tenths on encode (0.96 and 0.99 write the
    /// same register word), matching what the device stores.
    pub fn update_setpoint(&mut self, value: f64) -> Result<(), Error> {
        self.write_register(proto::REG_SP, proto::decimal_encode(value))
            .map_err(|err| match err {
                Error::Write { unit, source, .. } => Error::Setpoint {
                    unit,
                    value,
                    source,
                },
                other => other,
            })?;
        info!("unit {}: setpoint updated to {value:.1}", self.unit_id);
        Ok(())
    }

    /// Writes a run-status code to the controller-status register.
    pub fn update_run_status(&mut self, status: RunStatus) -> Result<(), Error> {
        self.write_register(proto::REG_CONTROLLER_STATUS, status.encode())
    }

    /// Puts the controller into run mode.
    pub fn start(&mut self) -> Result<(), Error> {
        self.update_run_status(RunStatus::Run)?;
        info!("started unit {}", self.unit_id);
        Ok(())
    }

    /// Stops the controller output.
    pub fn stop(&mut self) -> Result<(), Error> {
        self.update_run_status(RunStatus::Stop)?;
        info!("stopped unit {}", self.unit_id);
        Ok(())
    }

    /// Releases the underlying transport. Safe to call more than once;
    /// later calls are no-ops.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transport.close().map_err(|source| Error::Close {
            unit: self.unit_id,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        LED_AT, LED_CELSIUS, LED_OUT1, LinkTarget, REG_CONTROLLER_STATUS, REG_LED, REG_PV, REG_SP,
        TemperatureUnit,
    };
    use crate::transport::MockTransport;
    use assert_matches::assert_matches;

    fn controller(mock: &MockTransport) -> Pxu {
        Pxu::new(
            6,
            Box::new(mock.clone()),
            Duration::from_secs(1),
            2,
        )
        .unwrap()
    }

    fn seed_stats(mock: &MockTransport) {
        mock.set_register(REG_PV, 235);
        mock.set_register(REG_SP, 250);
        mock.set_register(REG_LED, LED_CELSIUS | LED_OUT1 | LED_AT);
        mock.set_register(REG_CONTROLLER_STATUS, 1);
    }

    #[test]
    fn new_selects_the_unit_on_the_transport() {
        let mock = MockTransport::new();
        let pxu = controller(&mock);
        assert_eq!(pxu.unit_id(), 6);
        assert_eq!(mock.unit_id(), 6);
    }

    #[test]
    fn new_applies_defaults_for_zero_timeout_and_retries() {
        let mock = MockTransport::new();
        let pxu = Pxu::new(1, Box::new(mock), Duration::ZERO, 0).unwrap();
        assert_eq!(pxu.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(pxu.retries(), DEFAULT_RETRIES);
    }

    #[test]
    fn new_keeps_explicit_policy_values() {
        let mock = MockTransport::new();
        let pxu = Pxu::new(1, Box::new(mock), Duration::from_secs(1), 7).unwrap();
        assert_eq!(pxu.timeout(), Duration::from_secs(1));
        assert_eq!(pxu.retries(), 7);
    }

    #[test]
    fn new_fails_when_the_unit_cannot_be_selected() {
        let mock = MockTransport::new();
        mock.simulate_error("no response");
        let err = Pxu::new(1, Box::new(mock), Duration::ZERO, 0).unwrap_err();
        assert_matches!(err, Error::SelectUnit { unit: 1, .. });
    }

    #[test]
    fn read_stats_decodes_the_block() {
        let mock = MockTransport::new();
        seed_stats(&mock);
        let mut pxu = controller(&mock);

        let stats = pxu.read_stats().unwrap();
        assert_eq!(stats.pv, 23.5);
        assert_eq!(stats.sp, 25.0);
        assert!(stats.out1);
        assert!(!stats.out2);
        assert!(stats.at);
        assert_eq!(stats.rs.to_string(), "RUN");
        assert_eq!(stats.unit, TemperatureUnit::Celsius);
    }

    #[test]
    fn read_stats_retries_transient_failures() {
        let mock = MockTransport::new();
        seed_stats(&mock);
        mock.fail_next_reads(2);
        let mut pxu = controller(&mock);

        assert!(pxu.read_stats().is_ok());
        assert_eq!(mock.read_calls(), 3);
    }

    #[test]
    fn read_stats_fails_after_exhausting_retries() {
        let mock = MockTransport::new();
        let mut pxu = controller(&mock);
        mock.simulate_error("wire cut");

        let err = pxu.read_stats().unwrap_err();
        assert_matches!(
            err,
            Error::Transport {
                unit: 6,
                address: 0,
                count: 30,
                attempts: 3,
                ..
            }
        );
    }

    #[test]
    fn read_stats_rejects_short_reads() {
        let mock = MockTransport::new();
        seed_stats(&mock);
        mock.truncate_reads(10);
        let mut pxu = controller(&mock);

        let err = pxu.read_stats().unwrap_err();
        assert_matches!(
            err,
            Error::ShortRead {
                unit: 6,
                address: 0,
                expected: 30,
                got: 10,
            }
        );
    }

    #[test]
    fn read_stats_surfaces_ambiguous_unit_flags() {
        let mock = MockTransport::new();
        seed_stats(&mock);
        mock.set_register(REG_LED, LED_CELSIUS | crate::protocol::LED_FAHRENHEIT);
        let mut pxu = controller(&mock);

        assert_matches!(pxu.read_stats(), Err(Error::Decode(_)));
    }

    #[test]
    fn read_info_decodes_the_identity_block() {
        let mock = MockTransport::new();
        mock.set_registers(
            proto::INFO_REG_START,
            &[0x5058, 0x5531, 0x3233, 0, 0, 0, 125],
        );
        let mut pxu = controller(&mock);

        let info = pxu.read_info().unwrap();
        assert_eq!(info.model, "PXU123");
        assert_eq!(info.firmware, "1.25");
    }

    #[test]
    fn read_profile_assembles_all_segments() {
        let mock = MockTransport::new();
        // Stored count 3 means four active segments.
        mock.set_register(proto::PROFILE_NUM_SEGMENTS_START, 3);
        mock.set_register(proto::PROFILE_LINK_START, proto::LINK_END);
        mock.set_register(proto::PROFILE_CYCLE_REPEAT_START, 0);
        mock.set_registers(
            proto::PROFILE_SEGMENT_START,
            &[250, 7200, 305, 3600, 620, 7200, 720, 9999],
        );
        let mut pxu = controller(&mock);

        let profile = pxu.read_profile(0).unwrap();
        assert_eq!(profile.id, 0);
        assert_eq!(profile.seg_count, 4);
        assert_eq!(profile.link, LinkTarget::End);
        assert_eq!(profile.repeat, 0);
        let pairs: Vec<(f64, f64)> = profile.segments.iter().map(|s| (s.sp, s.t)).collect();
        assert_eq!(
            pairs,
            vec![(25.0, 720.0), (30.5, 360.0), (62.0, 720.0), (72.0, 999.9)]
        );
    }

    #[test]
    fn read_profile_addresses_blocks_by_id() {
        let mock = MockTransport::new();
        let id = 2u16;
        mock.set_register(proto::PROFILE_NUM_SEGMENTS_START + id, 0);
        mock.set_register(proto::PROFILE_LINK_START + id, 5);
        mock.set_register(proto::PROFILE_CYCLE_REPEAT_START + id, 3);
        mock.set_registers(
            proto::PROFILE_SEGMENT_START + id * proto::PROFILE_SEGMENT_STRIDE,
            &[400, 600],
        );
        let mut pxu = controller(&mock);

        let profile = pxu.read_profile(2).unwrap();
        assert_eq!(profile.seg_count, 1);
        assert_eq!(profile.link, LinkTarget::Profile(5));
        assert_eq!(profile.repeat, 3);
        assert_eq!(profile.segments[0].sp, 40.0);
        assert_eq!(profile.segments[0].t, 60.0);
    }

    #[test]
    fn read_profile_rejects_out_of_range_ids_before_any_io() {
        let mock = MockTransport::new();
        let mut pxu = controller(&mock);

        assert_matches!(pxu.read_profile(17), Err(Error::InvalidProfileId(17)));
        assert_eq!(mock.read_calls(), 0);
    }

    #[test]
    fn read_profile_names_the_failing_stage() {
        let mock = MockTransport::new();
        let mut pxu = controller(&mock);
        mock.simulate_error("wire cut");

        let err = pxu.read_profile(0).unwrap_err();
        assert_matches!(
            err,
            Error::Profile {
                unit: 6,
                id: 0,
                stage: "segment count",
                ..
            }
        );
    }

    #[test]
    fn update_setpoint_truncates_to_tenths() {
        let mock = MockTransport::new();
        let mut pxu = controller(&mock);

        pxu.update_setpoint(25.06).unwrap();
        assert_eq!(mock.register(REG_SP), Some(250));
    }

    #[test]
    fn update_setpoint_reports_value_and_cause_on_failure() {
        let mock = MockTransport::new();
        let mut pxu = controller(&mock);
        mock.simulate_error("wire cut");

        let err = pxu.update_setpoint(25.0).unwrap_err();
        assert_matches!(err, Error::Setpoint { unit: 6, .. });
        assert!(err.to_string().contains("25.0"));
    }

    #[test]
    fn start_and_stop_write_run_status_codes() {
        let mock = MockTransport::new();
        let mut pxu = controller(&mock);

        pxu.start().unwrap();
        assert_eq!(mock.register(REG_CONTROLLER_STATUS), Some(1));

        pxu.stop().unwrap();
        assert_eq!(mock.register(REG_CONTROLLER_STATUS), Some(0));
    }

    #[test]
    fn close_is_idempotent() {
        let mock = MockTransport::new();
        let mut pxu = controller(&mock);

        assert!(pxu.close().is_ok());
        assert!(pxu.close().is_ok());
    }

    #[test]
    fn operations_fail_once_closed() {
        let mock = MockTransport::new();
        seed_stats(&mock);
        let mut pxu = controller(&mock);

        pxu.close().unwrap();
        assert!(pxu.read_stats().is_err());
    }
}
