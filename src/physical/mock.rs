use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use super::{LineSignals, PhysicalLayer};
use crate::error::{IbusError, Result};

const DEFAULT_MOCK_TIMEOUT: Duration = Duration::from_millis(150);

/// One scripted outcome of a single-byte read
#[derive(Debug, Clone)]
pub enum MockEvent {
    /// A byte that arrives `delay` after the read starts
    Byte { value: u8, delay: Duration },
    /// Nothing arrives; the read waits out the port timeout
    Silence,
    /// The device reports an I/O error
    Fault(io::ErrorKind),
}

/// What the engine did to the line, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Traffic {
    Read(Option<u8>),
    Fault,
    Write(Vec<u8>),
    Flush,
    Signals,
}

#[derive(Debug, Clone)]
pub struct TrafficEntry {
    pub at: Instant,
    pub thread: ThreadId,
    pub traffic: Traffic,
}

#[derive(Debug)]
struct MockState {
    script: VecDeque<MockEvent>,
    traffic: Vec<TrafficEntry>,
    signals: LineSignals,
    timeout: Duration,
    dtr: bool,
    is_open: bool,
    fail_close: bool,
    input_clears: usize,
}

impl MockState {
    fn record(&mut self, traffic: Traffic) {
        self.traffic.push(TrafficEntry {
            at: Instant::now(),
            thread: thread::current().id(),
            traffic,
        });
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Test-side view of a [`MockPhysical`], usable after the port moved into an engine
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    pub fn push(&self, event: MockEvent) {
        lock(&self.state).script.push_back(event);
    }

    /// Queues bytes that arrive back to back
    pub fn push_bytes(&self, bytes: &[u8]) {
        let mut state = lock(&self.state);
        for &value in bytes {
            state.script.push_back(MockEvent::Byte {
                value,
                delay: Duration::ZERO,
            });
        }
    }

    /// Queues a byte preceded by `delay` of line silence
    pub fn push_byte_after(&self, value: u8, delay: Duration) {
        self.push(MockEvent::Byte { value, delay });
    }

    pub fn push_silence(&self) {
        self.push(MockEvent::Silence);
    }

    pub fn push_fault(&self, kind: io::ErrorKind) {
        self.push(MockEvent::Fault(kind));
    }

    /// Makes `close` fail, leaving the port open, until reset
    pub fn set_close_fails(&self, fails: bool) {
        lock(&self.state).fail_close = fails;
    }

    pub fn set_clear_to_send(&self, asserted: bool) {
        lock(&self.state).signals.set(LineSignals::CTS, asserted);
    }

    /// Scripted reads not yet consumed
    pub fn remaining(&self) -> usize {
        lock(&self.state).script.len()
    }

    pub fn traffic(&self) -> Vec<TrafficEntry> {
        lock(&self.state).traffic.clone()
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.state)
            .traffic
            .iter()
            .filter_map(|entry| match &entry.traffic {
                Traffic::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn write_times(&self) -> Vec<Instant> {
        lock(&self.state)
            .traffic
            .iter()
            .filter(|entry| matches!(entry.traffic, Traffic::Write(_)))
            .map(|entry| entry.at)
            .collect()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).is_open
    }

    pub fn data_terminal_ready(&self) -> bool {
        lock(&self.state).dtr
    }

    pub fn input_clears(&self) -> usize {
        lock(&self.state).input_clears
    }

    pub fn timeout(&self) -> Duration {
        lock(&self.state).timeout
    }
}

/// Mock physical layer for testing
///
/// Reads are served from a script of [`MockEvent`]s; once the script runs dry
/// every read behaves like [`MockEvent::Silence`]. Delays are real sleeps so
/// the engine's gap measurement sees them.
pub struct MockPhysical {
    state: Arc<Mutex<MockState>>,
    fail_open: bool,
}

impl MockPhysical {
    /// Creates a mock line with clear-to-send asserted and an empty script
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                script: VecDeque::new(),
                traffic: Vec::new(),
                signals: LineSignals::CTS | LineSignals::DSR,
                timeout: DEFAULT_MOCK_TIMEOUT,
                dtr: false,
                is_open: false,
                fail_close: false,
                input_clears: 0,
            })),
            fail_open: false,
        }
    }

    /// Creates a mock line whose device cannot be opened
    pub fn new_error() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn ensure_open(state: &MockState) -> Result<()> {
        if state.is_open {
            Ok(())
        } else {
            Err(IbusError::PortError("mock port is not open".into()))
        }
    }
}

impl Default for MockPhysical {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicalLayer for MockPhysical {
    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(IbusError::PortError("mock device unavailable".into()));
        }
        lock(&self.state).is_open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_close {
            return Err(IbusError::PortError("mock device refused to close".into()));
        }
        state.is_open = false;
        Ok(())
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        // The script lock is not held while sleeping so tests can keep
        // feeding the line.
        let (event, timeout) = {
            let mut state = lock(&self.state);
            Self::ensure_open(&state)?;
            (state.script.pop_front(), state.timeout)
        };

        let result: Result<Option<u8>> = match event {
            Some(MockEvent::Byte { value, delay }) => {
                thread::sleep(delay);
                Ok(Some(value))
            }
            Some(MockEvent::Silence) | None => {
                thread::sleep(timeout);
                Ok(None)
            }
            Some(MockEvent::Fault(kind)) => {
                Err(io::Error::new(kind, "injected mock fault").into())
            }
        };

        let mut state = lock(&self.state);
        match &result {
            Ok(byte) => state.record(Traffic::Read(*byte)),
            Err(_) => state.record(Traffic::Fault),
        }
        result
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        Self::ensure_open(&state)?;
        state.record(Traffic::Write(data.to_vec()));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        Self::ensure_open(&state)?;
        state.record(Traffic::Flush);
        Ok(())
    }

    fn line_signals(&mut self) -> Result<LineSignals> {
        let mut state = lock(&self.state);
        Self::ensure_open(&state)?;
        state.record(Traffic::Signals);
        Ok(state.signals)
    }

    fn set_data_terminal_ready(&mut self, level: bool) -> Result<()> {
        lock(&self.state).dtr = level;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        lock(&self.state).input_clears += 1;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        lock(&self.state).timeout = timeout;
        Ok(())
    }
}
