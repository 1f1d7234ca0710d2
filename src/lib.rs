//! A library for supervising RedLion PXU process controllers over Modbus RTU.
//!
//! The PXU performs the actual PID control on the device; this crate reads
//! and writes its holding registers, turning raw 16-bit words into typed
//! snapshots and control commands:
//!
//! - [`protocol`] — the register map, pure value codec and domain types
//!   ([`protocol::Stats`], [`protocol::Info`], [`protocol::Profile`]).
//! - [`transport`] — the register-transport capability with a real serial
//!   adapter and an in-memory mock for running without hardware.
//! - [`retry`] — bounded retry with linear backoff around register reads.
//! - [`client`] — the [`client::Pxu`] facade: `read_stats`, `read_info`,
//!   `read_profile`, `update_setpoint`, `start`, `stop`.
//!
//! ## Quick start
//!
//! ```
//! use pxu_lib::client::Pxu;
//! use pxu_lib::transport::MockTransport;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Swap MockTransport::seeded() for SerialTransport::open(..) to talk
//!     // to a real unit.
//!     let transport = MockTransport::seeded();
//!     let mut pxu = Pxu::new(6, Box::new(transport), Duration::ZERO, 0)?;
//!
//!     let stats = pxu.read_stats()?;
//!     println!("{stats}");
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod protocol;
pub mod retry;
pub mod transport;
