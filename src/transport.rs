//! Register transport capability and its two implementations.
//!
//! The controller facade never talks `tokio-modbus` directly; everything
//! goes through the [`RegisterTransport`] trait so the same code paths run
//! against the real serial link ([`SerialTransport`]) and the in-memory
//! test double ([`MockTransport`]). The PXU speaks Modbus RTU only, so the
//! serial side is fixed at the device's framing: 8 data bits, no parity,
//! one stop bit.

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_modbus::client::sync::Context;
use tokio_modbus::prelude::{SyncReader, SyncWriter};
use tokio_modbus::{Slave, slave::SlaveContext};

/// Errors raised by a register transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Wraps `tokio_modbus::Error` (IO faults, timeouts, framing).
    #[error(transparent)]
    Modbus(#[from] tokio_modbus::Error),

    /// Wraps a Modbus exception response from the device.
    #[error(transparent)]
    Exception(#[from] tokio_modbus::ExceptionCode),

    /// The transport was closed and can no longer carry requests.
    #[error("transport is closed")]
    Closed,

    /// A fault injected by the mock transport.
    #[error("simulated fault: {0}")]
    Simulated(String),
}

/// Capability consumed by the controller facade: holding-register access
/// plus unit addressing and teardown.
///
/// Implementations are not expected to be reentrant; callers serialize all
/// register traffic on one logical stream.
pub trait RegisterTransport: Send {
    /// Selects the Modbus unit (slave) subsequent requests address.
    fn set_unit_id(&mut self, id: u8) -> Result<(), TransportError>;

    /// Reads `quantity` consecutive holding registers starting at `address`.
    fn read_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>, TransportError>;

    /// Writes a single holding register.
    fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError>;

    /// Releases the transport. Further requests fail with [`TransportError::Closed`].
    fn close(&mut self) -> Result<(), TransportError>;
}

/// The parity used for serial communication.
pub const PARITY: &tokio_serial::Parity = &tokio_serial::Parity::None;
/// The number of stop bits used for serial communication.
pub const STOP_BITS: &tokio_serial::StopBits = &tokio_serial::StopBits::One;
/// The number of data bits used for serial communication.
pub const DATA_BITS: &tokio_serial::DataBits = &tokio_serial::DataBits::Eight;

/// Factory default baud rate of the PXU's RS485 port.
pub const DEFAULT_BAUD_RATE: u32 = 38400;
/// Modbus I/O timeout applied to the serial link.
pub const DEFAULT_SERIAL_TIMEOUT: Duration = Duration::from_millis(500);

/// Connection parameters for the serial link. Immutable once the transport
/// is opened.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub device: String,
    pub baud_rate: u32,
    /// Per-request I/O timeout enforced by the Modbus context.
    pub timeout: Duration,
}

impl SerialConfig {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_SERIAL_TIMEOUT,
        }
    }
}

/// Creates a `tokio_serial::SerialPortBuilder` with the PXU line settings.
pub fn serial_port_builder(device: &str, baud_rate: u32) -> tokio_serial::SerialPortBuilder {
    tokio_serial::new(device, baud_rate)
        .parity(*PARITY)
        .stop_bits(*STOP_BITS)
        .data_bits(*DATA_BITS)
        .flow_control(tokio_serial::FlowControl::None)
}

/// Real adapter over a `tokio-modbus` synchronous RTU context.
///
/// The context is dropped on [`close`](RegisterTransport::close); the port
/// is released with it and later calls fail with [`TransportError::Closed`].
pub struct SerialTransport {
    ctx: Option<Context>,
}

impl SerialTransport {
    /// Opens the serial port and attaches a Modbus RTU context to it.
    ///
    /// The context starts addressed at unit 1; the controller facade selects
    /// the actual unit right after construction.
    pub fn open(config: &SerialConfig) -> Result<Self, TransportError> {
        debug!(
            "opening serial port {} at {} baud",
            config.device, config.baud_rate
        );
        let builder = serial_port_builder(&config.device, config.baud_rate);
        let mut ctx = tokio_modbus::client::sync::rtu::connect_slave(&builder, Slave(1))
            .map_err(tokio_modbus::Error::Transport)?;
        ctx.set_timeout(Some(config.timeout));
        Ok(Self { ctx: Some(ctx) })
    }

    fn ctx(&mut self) -> Result<&mut Context, TransportError> {
        self.ctx.as_mut().ok_or(TransportError::Closed)
    }

    /// Flattens the doubly-wrapped tokio-modbus result.
    fn map_tokio_result<T>(result: tokio_modbus::Result<T>) -> Result<T, TransportError> {
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(exception)) => Err(exception.into()),
            Err(err) => Err(err.into()),
        }
    }
}

impl RegisterTransport for SerialTransport {
    fn set_unit_id(&mut self, id: u8) -> Result<(), TransportError> {
        self.ctx()?.set_slave(Slave(id));
        Ok(())
    }

    fn read_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>, TransportError> {
        let result = Self::map_tokio_result(self.ctx()?.read_holding_registers(address, quantity));
        if let Err(err) = &result {
            warn!("failed to read registers addr={address}, qty={quantity}: {err}");
        }
        result
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        Self::map_tokio_result(self.ctx()?.write_single_register(address, value))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.ctx.take().is_some() {
            debug!("serial transport closed");
        }
        Ok(())
    }
}

#[derive(Default)]
struct MockInner {
    registers: HashMap<u16, u16>,
    unit_id: u8,
    fault: Option<String>,
    fail_reads: usize,
    truncate_to: Option<u16>,
    read_calls: usize,
    closed: bool,
}

/// In-memory transport impersonating the PXU.
///
/// Registers live in a lock-guarded sparse map shared by all clones, so a
/// test can keep one handle for setup and inspection while the facade owns
/// another. Unset registers read as zero, like a blank device.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock pre-loaded with a plausible register image: a running unit in
    /// Celsius, an identity block, and one two-segment program per profile
    /// slot. Lets the CLI and server run without hardware attached.
    pub fn seeded() -> Self {
        use crate::protocol as proto;

        let mock = Self::new();
        mock.set_register(proto::REG_PV, 255);
        mock.set_register(proto::REG_SP, 304);
        mock.set_register(proto::REG_TP, 55);
        mock.set_register(proto::REG_TI, 120);
        mock.set_register(proto::REG_TD, 30);
        mock.set_register(proto::REG_T_GROUP, 1);
        mock.set_register(proto::REG_LED, proto::LED_CELSIUS | proto::LED_OUT1);
        mock.set_register(
            proto::REG_CONTROLLER_STATUS,
            proto::RunStatus::Run.encode(),
        );
        // "PXU100" packed two characters per word, firmware 1.25
        mock.set_registers(proto::INFO_REG_START, &[0x5058, 0x5531, 0x3030, 0, 0, 0, 125]);
        for id in 0..=u16::from(proto::PROFILE_ID_MAX) {
            mock.set_register(proto::PROFILE_NUM_SEGMENTS_START + id, 1);
            mock.set_register(proto::PROFILE_LINK_START + id, proto::LINK_END);
            mock.set_register(proto::PROFILE_CYCLE_REPEAT_START + id, 0);
            mock.set_registers(
                proto::PROFILE_SEGMENT_START + id * proto::PROFILE_SEGMENT_STRIDE,
                &[250, 7200, 305, 3600],
            );
        }
        mock
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap()
    }

    /// Stores a register value for the device image.
    pub fn set_register(&self, address: u16, value: u16) {
        self.lock().registers.insert(address, value);
    }

    /// Stores a run of consecutive register values.
    pub fn set_registers(&self, start: u16, values: &[u16]) {
        let mut inner = self.lock();
        for (i, &value) in values.iter().enumerate() {
            inner.registers.insert(start + i as u16, value);
        }
    }

    /// Reads back a stored register, if set. Lets tests verify writes.
    pub fn register(&self, address: u16) -> Option<u16> {
        self.lock().registers.get(&address).copied()
    }

    /// Clears the register image.
    pub fn reset(&self) {
        self.lock().registers.clear();
    }

    /// Makes every subsequent request fail with the given message.
    pub fn simulate_error(&self, message: impl Into<String>) {
        self.lock().fault = Some(message.into());
    }

    /// Clears a fault injected with [`simulate_error`](Self::simulate_error).
    pub fn clear_error(&self) {
        self.lock().fault = None;
    }

    /// Makes only the next `count` reads fail, then recover.
    pub fn fail_next_reads(&self, count: usize) {
        self.lock().fail_reads = count;
    }

    /// Caps every read response at `quantity` registers to provoke short reads.
    pub fn truncate_reads(&self, quantity: u16) {
        self.lock().truncate_to = Some(quantity);
    }

    /// Number of read requests seen, including failed ones.
    pub fn read_calls(&self) -> usize {
        self.lock().read_calls
    }

    /// The unit id most recently selected on this transport.
    pub fn unit_id(&self) -> u8 {
        self.lock().unit_id
    }
}

impl RegisterTransport for MockTransport {
    fn set_unit_id(&mut self, id: u8) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if let Some(message) = &inner.fault {
            return Err(TransportError::Simulated(message.clone()));
        }
        inner.unit_id = id;
        Ok(())
    }

    fn read_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>, TransportError> {
        let mut inner = self.lock();
        inner.read_calls += 1;
        if inner.closed {
            return Err(TransportError::Closed);
        }
        if let Some(message) = &inner.fault {
            return Err(TransportError::Simulated(message.clone()));
        }
        if inner.fail_reads > 0 {
            inner.fail_reads -= 1;
            return Err(TransportError::Simulated("transient read fault".into()));
        }

        let quantity = inner.truncate_to.map_or(quantity, |cap| quantity.min(cap));
        Ok((0..quantity)
            .map(|i| inner.registers.get(&(address + i)).copied().unwrap_or(0))
            .collect())
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(TransportError::Closed);
        }
        if let Some(message) = &inner.fault {
            return Err(TransportError::Simulated(message.clone()));
        }
        inner.registers.insert(address, value);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.lock().closed = true;
        Ok(())
    }
}
