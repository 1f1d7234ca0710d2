//! Bounded retry with linear backoff for register reads.
//!
//! A flaky RS485 link drops frames now and then; one retry pass with short,
//! growing pauses rides out most of it. Retries block the calling thread —
//! the bus is half-duplex with a single master, so there is nothing useful
//! to overlap with.

use crate::transport::{RegisterTransport, TransportError};
use log::warn;
use std::time::{Duration, Instant};

/// Pause before retry `n` is `n * BACKOFF_STEP`.
const BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Retry bounds for a single register read.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub retries: u32,
    /// Cumulative ceiling over the whole attempt sequence, sleeps included.
    pub timeout: Duration,
}

/// A read that kept failing until the policy ran out.
#[derive(Debug, thiserror::Error)]
#[error("read failed after {attempts} attempts")]
pub struct RetryError {
    /// Total attempts issued, the first try included.
    pub attempts: u32,
    #[source]
    pub source: TransportError,
}

/// Reads a register block, retrying per `policy` on failure.
///
/// Retry `n` (numbered from 1) is preceded by an `n * 100ms` pause. When
/// the next pause would pass the cumulative deadline the sequence is cut
/// short instead of sleeping through it. Every attempt is all-or-nothing
/// for the full range; partial responses are never merged.
pub fn read_with_retry(
    transport: &mut dyn RegisterTransport,
    policy: &RetryPolicy,
    address: u16,
    quantity: u16,
) -> Result<Vec<u16>, RetryError> {
    let started = Instant::now();
    let mut attempts = 0;
    let mut last_err = None;

    for attempt in 0..=policy.retries {
        if attempt > 0 {
            let backoff = BACKOFF_STEP * attempt;
            if started.elapsed() + backoff >= policy.timeout {
                break;
            }
            std::thread::sleep(backoff);
        }

        attempts += 1;
        match transport.read_registers(address, quantity) {
            Ok(regs) => return Ok(regs),
            Err(err) => {
                warn!(
                    "read attempt {attempts} of {} at addr={address} qty={quantity} failed: {err}",
                    policy.retries + 1
                );
                last_err = Some(err);
            }
        }
    }

    Err(RetryError {
        attempts,
        // last_err is always set: the loop body runs at least once before
        // the deadline check can break.
        source: last_err.unwrap_or(TransportError::Closed),
    })
}
