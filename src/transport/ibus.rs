use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::access::{AccessGuard, AccessSerializer, DEFAULT_POLL_INTERVAL, DEFAULT_REPORT_EVERY};
use super::scheduler::{Readiness, TxScheduler, DEFAULT_MIN_TX_SPACING, DEFAULT_TX_TICK};
use super::TransportLayer;
use crate::data_link::framing::{
    DropReason, FrameMachine, Observation, ReadEvent, Step, SyncOutcome, DEFAULT_IDLE_GAP,
};
use crate::data_link::{self, Packet};
use crate::directory::AddressDirectory;
use crate::error::{IbusError, Result};
use crate::physical::{LineSignals, PhysicalLayer, SerialConfig};
use crate::types::{Address, Config};

/// What to do with a received packet whose checksum does not match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumPolicy {
    /// Hand it over without looking
    Ignore,
    /// Hand it over and log a warning
    Warn,
    /// Drop it
    Enforce,
}

/// I-Bus engine configuration
#[derive(Debug, Clone)]
pub struct IbusConfig {
    pub serial: SerialConfig,
    pub idle_gap: Duration,
    pub tx_tick: Duration,
    pub min_tx_spacing: Duration,
    /// `None` waits for clear-to-send forever
    pub send_timeout: Option<Duration>,
    pub lock_poll_interval: Duration,
    pub lock_report_every: u32,
    pub checksum_policy: ChecksumPolicy,
}

impl Config for IbusConfig {
    fn validate(&self) -> Result<()> {
        self.serial.validate()?;
        if self.idle_gap.is_zero() {
            return Err(IbusError::InvalidParameter("idle gap must be non-zero".into()));
        }
        if self.tx_tick.is_zero() {
            return Err(IbusError::InvalidParameter("tx tick must be non-zero".into()));
        }
        if self.lock_poll_interval.is_zero() || self.lock_report_every == 0 {
            return Err(IbusError::InvalidParameter(
                "lock polling must be non-zero".into(),
            ));
        }
        if self.serial.read_timeout <= self.idle_gap {
            return Err(IbusError::InvalidParameter(
                "read timeout must exceed the idle gap".into(),
            ));
        }
        if self.send_timeout.is_some_and(|timeout| timeout < self.tx_tick) {
            return Err(IbusError::InvalidParameter(
                "send timeout shorter than one tx tick".into(),
            ));
        }
        Ok(())
    }
}

impl Default for IbusConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            idle_gap: DEFAULT_IDLE_GAP,
            tx_tick: DEFAULT_TX_TICK,
            min_tx_spacing: DEFAULT_MIN_TX_SPACING,
            send_timeout: Some(Duration::from_secs(5)),
            lock_poll_interval: DEFAULT_POLL_INTERVAL,
            lock_report_every: DEFAULT_REPORT_EVERY,
            checksum_policy: ChecksumPolicy::Warn,
        }
    }
}

/// Everything that must only be touched by one caller at a time
struct BusState<P> {
    port: P,
    port_open: bool,
    last_write: Option<Instant>,
}

/// I-Bus engine over one physical port.
///
/// All methods take `&self`; share the engine between a reader thread and
/// writer threads through an `Arc`. Port access is serialized internally.
pub struct IbusInterface<P: PhysicalLayer> {
    config: IbusConfig,
    directory: Arc<AddressDirectory>,
    scheduler: TxScheduler,
    bus: AccessSerializer<BusState<P>>,
    closed: AtomicBool,
}

#[cfg(feature = "serial")]
impl IbusInterface<crate::physical::serial::SerialPhysical> {
    /// Opens the serial device at `path`
    pub fn open(
        path: impl Into<String>,
        config: IbusConfig,
        directory: Arc<AddressDirectory>,
    ) -> Result<Self> {
        let physical = crate::physical::serial::SerialPhysical::new(path, config.serial.clone());
        Self::with_physical(config, directory, physical)
    }
}

impl<P: PhysicalLayer> IbusInterface<P> {
    /// Opens `physical` and wraps it. Any failure here is fatal.
    pub fn with_physical(
        config: IbusConfig,
        directory: Arc<AddressDirectory>,
        mut physical: P,
    ) -> Result<Self> {
        config.validate()?;

        physical.open()?;
        physical.set_timeout(config.serial.read_timeout)?;
        if config.serial.assert_dtr {
            physical.set_data_terminal_ready(true)?;
        }
        if config.serial.flush_input_on_open {
            physical.clear_input()?;
        }
        info!(
            baud = config.serial.baud_rate,
            timeout_ms = ?config.serial.read_timeout.as_millis(),
            "I-Bus interface initialized"
        );

        let scheduler = TxScheduler::new(config.tx_tick, config.min_tx_spacing, config.send_timeout);
        let bus = AccessSerializer::with_polling(
            BusState {
                port: physical,
                port_open: true,
                last_write: Some(Instant::now()),
            },
            config.lock_poll_interval,
            config.lock_report_every,
        );

        Ok(Self {
            config,
            directory,
            scheduler,
            bus,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &IbusConfig {
        &self.config
    }

    pub fn directory(&self) -> &AddressDirectory {
        &self.directory
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Reads until the line shows a packet boundary.
    ///
    /// Call this before the first [`read_packet`](Self::read_packet) so reads
    /// start at the beginning of a frame.
    pub fn wait_for_clear_bus(&self) -> Result<SyncOutcome> {
        self.ensure_open()?;
        debug!("Waiting for clear bus");
        let mut bus = self.bus.acquire("wait_for_clear_bus");
        let mut machine = FrameMachine::resyncing(self.config.idle_gap);
        self.run_resync(&mut bus, &mut machine)
    }

    /// Reads the next packet from the bus.
    ///
    /// `Ok(None)` covers every way a read cycle can come up empty: an idle
    /// line, a partial or empty frame, an oversized frame (after which the
    /// bus is resynchronized), or a checksum failure under
    /// [`ChecksumPolicy::Enforce`].
    pub fn read_packet(&self) -> Result<Option<Packet>> {
        self.ensure_open()?;
        let mut bus = self.bus.acquire("read_packet");
        let mut machine = FrameMachine::new(self.config.idle_gap);
        let mut last_read = Instant::now();

        loop {
            let observation = self.observe(&mut bus, &mut last_read);
            match machine.feed(observation) {
                Step::Pending => {}
                Step::Packet(packet) => return Ok(self.accept(packet)),
                Step::Dropped(reason) => {
                    self.log_drop(reason);
                    return Ok(None);
                }
                Step::Oversized { length } => {
                    error!(
                        length,
                        "Oversized packet length, resynchronizing bus"
                    );
                    self.run_resync(&mut bus, &mut machine)?;
                    return Ok(None);
                }
                Step::Synchronized(outcome) => {
                    debug!(?outcome, "Bus resynchronized");
                    return Ok(None);
                }
            }
        }
    }

    /// Sends one packet once the line is clear and spacing allows.
    ///
    /// Fails with [`IbusError::SendNotAccepted`] when the configured send
    /// timeout passes first, and with [`IbusError::Closed`] when the
    /// interface is closed while waiting.
    pub fn send_packet(&self, source: Address, destination: Address, payload: &[u8]) -> Result<()> {
        let frame = data_link::encode(source, destination, payload)?;
        debug!(
            route = %self.directory.route(source, destination),
            frame = ?frame,
            "WRITE: queued"
        );

        let mut window = self.scheduler.begin();
        loop {
            window.wait_tick();
            self.ensure_open()?;

            let bus = match window.deadline() {
                Some(deadline) => self.bus.acquire_until("send_packet", deadline),
                None => Some(self.bus.acquire("send_packet")),
            };
            if let Some(mut bus) = bus {
                let signals = match bus.port.line_signals() {
                    Ok(signals) => signals,
                    Err(e) => {
                        warn!(error = %e, "Failed to read line signals");
                        LineSignals::empty()
                    }
                };

                match self.scheduler.readiness(signals, bus.last_write, Instant::now()) {
                    Readiness::Ready => {
                        bus.port.write_bytes(&frame)?;
                        bus.port.flush()?;
                        bus.last_write = Some(Instant::now());
                        debug!(attempts = window.attempts(), "WRITE: SUCCESS");
                        return Ok(());
                    }
                    waiting => debug!(?waiting, "WRITE: WAIT"),
                }
            } else {
                debug!("WRITE: WAIT, bus busy");
            }

            if window.expired(Instant::now()) {
                let waited = window.waited();
                warn!(
                    waited_ms = ?waited.as_millis(),
                    attempts = window.attempts(),
                    "Send not accepted"
                );
                return Err(IbusError::SendNotAccepted(waited));
            }
        }
    }

    /// Releases the port. Pending and later calls fail with [`IbusError::Closed`].
    ///
    /// If the port refuses to close, the interface stays closed to callers
    /// and the next `close` tries to release the port again.
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let mut bus = self.bus.acquire("close");
        if !bus.port_open {
            return Ok(());
        }
        if let Err(e) = bus.port.close() {
            warn!(error = %e, "Failed to release serial port");
            return Err(e);
        }
        bus.port_open = false;
        info!("I-Bus interface closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(IbusError::Closed)
        } else {
            Ok(())
        }
    }

    /// One single-byte read, timed against the previous one.
    ///
    /// A failed read counts as a timeout and takes as long as one, so the
    /// gap it reports matches a quiet line.
    fn observe(
        &self,
        bus: &mut AccessGuard<'_, BusState<P>>,
        last_read: &mut Instant,
    ) -> Observation {
        let started = Instant::now();
        let event = match bus.port.read_byte() {
            Ok(Some(byte)) => ReadEvent::Byte(byte),
            Ok(None) => ReadEvent::Timeout,
            Err(e) => {
                warn!(error = %e, "Serial read failed, treating as no data");
                let timeout = self.config.serial.read_timeout;
                thread::sleep(timeout.saturating_sub(started.elapsed()));
                ReadEvent::Timeout
            }
        };

        let now = Instant::now();
        let gap = now.saturating_duration_since(*last_read);
        *last_read = now;
        Observation { event, gap }
    }

    fn run_resync(
        &self,
        bus: &mut AccessGuard<'_, BusState<P>>,
        machine: &mut FrameMachine,
    ) -> Result<SyncOutcome> {
        machine.resync();
        let mut last_read = Instant::now();
        loop {
            self.ensure_open()?;
            let observation = self.observe(bus, &mut last_read);
            if let Step::Synchronized(outcome) = machine.feed(observation) {
                debug!(?outcome, "Bus clear");
                return Ok(outcome);
            }
        }
    }

    fn accept(&self, packet: Packet) -> Option<Packet> {
        let route = self.directory.route(packet.source, packet.destination);
        if self.config.checksum_policy != ChecksumPolicy::Ignore && !packet.checksum_valid() {
            let expected = packet.expected_checksum();
            if self.config.checksum_policy == ChecksumPolicy::Enforce {
                warn!(%route, %packet, expected, "READ: checksum mismatch, dropping packet");
                return None;
            }
            warn!(%route, %packet, expected, "READ: checksum mismatch");
        }

        debug!(%route, %packet, "READ");
        Some(packet)
    }

    fn log_drop(&self, reason: DropReason) {
        match reason {
            DropReason::Idle => {}
            DropReason::Partial => debug!("Partial packet, discarding"),
            DropReason::Truncated { length } => debug!(length, "Truncated packet, discarding"),
            DropReason::Empty {
                source,
                length,
                destination,
            } => debug!(
                route = %self.directory.route(source, destination),
                length,
                "Empty packet"
            ),
        }
    }
}

impl<P: PhysicalLayer> TransportLayer for IbusInterface<P> {
    fn read_packet(&self) -> Result<Option<Packet>> {
        IbusInterface::read_packet(self)
    }

    fn send_packet(&self, source: Address, destination: Address, payload: &[u8]) -> Result<()> {
        IbusInterface::send_packet(self, source, destination, payload)
    }

    fn wait_for_clear_bus(&self) -> Result<SyncOutcome> {
        IbusInterface::wait_for_clear_bus(self)
    }

    fn close(&self) -> Result<()> {
        IbusInterface::close(self)
    }
}
