//! Frame assembly and resynchronization as an explicit state machine.
//!
//! The machine is fed one [`Observation`] per single-byte read: what the read
//! produced and how long it was since the previous read completed. It never
//! touches a clock itself, so every framing edge case can be driven with
//! synthetic gaps.
//!
//! ```text
//!            byte                 len, dst            payload.., chk
//!  Idle ───────────▶ AwaitingHeader ───────▶ ReadingPayload ───────▶ Idle (Packet)
//!   ▲                   │ len-2 > 20
//!   │                   ▼
//!   └──────────────── Resyncing (gap watch, then drain one frame)
//! ```

use std::mem;
use std::time::Duration;

use super::Packet;
use crate::types::{Address, LENGTH_OVERHEAD, MAX_PAYLOAD_LEN};

/// Silence that marks a packet boundary on the bus
pub const DEFAULT_IDLE_GAP: Duration = Duration::from_millis(100);

/// Outcome of one single-byte read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent {
    Byte(u8),
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub event: ReadEvent,
    /// Time since the previous read completed
    pub gap: Duration,
}

impl Observation {
    pub fn byte(value: u8, gap: Duration) -> Self {
        Self {
            event: ReadEvent::Byte(value),
            gap,
        }
    }

    pub fn timeout(gap: Duration) -> Self {
        Self {
            event: ReadEvent::Timeout,
            gap,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResyncPhase {
    /// Waiting for a read that ends a gap longer than the idle gap
    WatchingGap,
    /// The in-flight packet's source byte was swallowed; its length is next
    Length,
    Destination { length: u8 },
    /// Payload plus checksum bytes still to discard
    Draining { length: u8, remaining: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    AwaitingHeader {
        source: u8,
        length: Option<u8>,
    },
    ReadingPayload {
        source: u8,
        length: u8,
        destination: u8,
        payload: Vec<u8>,
        remaining: usize,
    },
    Resyncing(ResyncPhase),
}

/// Why a read cycle ended without a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Nothing on the line
    Idle,
    /// Length or destination byte never arrived
    Partial,
    /// Payload or checksum byte never arrived
    Truncated { length: u8 },
    /// Well framed but carried no payload
    Empty {
        source: Address,
        length: u8,
        destination: Address,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A timeout ended the gap: nothing was in flight
    BusIdle,
    /// One in-flight packet of the given declared length was discarded
    Discarded { length: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Keep reading
    Pending,
    Packet(Packet),
    Dropped(DropReason),
    /// Length byte announced more payload than any node sends; the machine
    /// is now resynchronizing and must be fed until [`Step::Synchronized`]
    Oversized { length: u8 },
    Synchronized(SyncOutcome),
}

impl Step {
    /// Whether the current read cycle is over
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Step::Pending | Step::Oversized { .. })
    }
}

#[derive(Debug, Clone)]
pub struct FrameMachine {
    state: FrameState,
    idle_gap: Duration,
    max_payload: usize,
}

impl FrameMachine {
    pub fn new(idle_gap: Duration) -> Self {
        Self {
            state: FrameState::Idle,
            idle_gap,
            max_payload: MAX_PAYLOAD_LEN,
        }
    }

    /// Starts a machine that first waits for a clear bus
    pub fn resyncing(idle_gap: Duration) -> Self {
        let mut machine = Self::new(idle_gap);
        machine.resync();
        machine
    }

    pub fn state(&self) -> &FrameState {
        &self.state
    }

    pub fn resync(&mut self) {
        self.state = FrameState::Resyncing(ResyncPhase::WatchingGap);
    }

    pub fn reset(&mut self) {
        self.state = FrameState::Idle;
    }

    pub fn feed(&mut self, observation: Observation) -> Step {
        let state = mem::replace(&mut self.state, FrameState::Idle);
        let (next, step) = match (state, observation.event) {
            (FrameState::Idle, ReadEvent::Timeout) => {
                (FrameState::Idle, Step::Dropped(DropReason::Idle))
            }
            (FrameState::Idle, ReadEvent::Byte(source)) => (
                FrameState::AwaitingHeader {
                    source,
                    length: None,
                },
                Step::Pending,
            ),

            (FrameState::AwaitingHeader { .. }, ReadEvent::Timeout) => {
                (FrameState::Idle, Step::Dropped(DropReason::Partial))
            }
            (
                FrameState::AwaitingHeader {
                    source,
                    length: None,
                },
                ReadEvent::Byte(length),
            ) => (
                FrameState::AwaitingHeader {
                    source,
                    length: Some(length),
                },
                Step::Pending,
            ),
            (
                FrameState::AwaitingHeader {
                    source,
                    length: Some(length),
                },
                ReadEvent::Byte(destination),
            ) => self.header_complete(source, length, destination),

            (FrameState::ReadingPayload { length, .. }, ReadEvent::Timeout) => (
                FrameState::Idle,
                Step::Dropped(DropReason::Truncated { length }),
            ),
            (
                FrameState::ReadingPayload {
                    source,
                    length,
                    destination,
                    payload,
                    remaining: 0,
                },
                ReadEvent::Byte(checksum),
            ) => (
                FrameState::Idle,
                Self::finish(source, length, destination, payload, checksum),
            ),
            (
                FrameState::ReadingPayload {
                    source,
                    length,
                    destination,
                    mut payload,
                    remaining,
                },
                ReadEvent::Byte(byte),
            ) => {
                payload.push(byte);
                (
                    FrameState::ReadingPayload {
                        source,
                        length,
                        destination,
                        payload,
                        remaining: remaining - 1,
                    },
                    Step::Pending,
                )
            }

            (FrameState::Resyncing(phase), event) => self.resync_step(phase, event, observation.gap),
        };

        self.state = next;
        step
    }

    fn header_complete(&self, source: u8, length: u8, destination: u8) -> (FrameState, Step) {
        let payload_len = usize::from(length).saturating_sub(LENGTH_OVERHEAD);
        if payload_len > self.max_payload {
            return (
                FrameState::Resyncing(ResyncPhase::WatchingGap),
                Step::Oversized { length },
            );
        }

        (
            FrameState::ReadingPayload {
                source,
                length,
                destination,
                payload: Vec::with_capacity(payload_len),
                remaining: payload_len,
            },
            Step::Pending,
        )
    }

    fn finish(source: u8, length: u8, destination: u8, payload: Vec<u8>, checksum: u8) -> Step {
        if payload.is_empty() {
            return Step::Dropped(DropReason::Empty {
                source: Address(source),
                length,
                destination: Address(destination),
            });
        }

        Step::Packet(Packet {
            source: Address(source),
            length,
            destination: Address(destination),
            payload,
            checksum,
        })
    }

    fn resync_step(&self, phase: ResyncPhase, event: ReadEvent, gap: Duration) -> (FrameState, Step) {
        // Once past the gap watch, a timeout means the line went quiet, which
        // is itself a boundary.
        let idle = (FrameState::Idle, Step::Synchronized(SyncOutcome::BusIdle));

        match (phase, event) {
            (ResyncPhase::WatchingGap, event) if gap > self.idle_gap => match event {
                ReadEvent::Timeout => idle,
                ReadEvent::Byte(_) => (FrameState::Resyncing(ResyncPhase::Length), Step::Pending),
            },
            (ResyncPhase::WatchingGap, _) => (
                FrameState::Resyncing(ResyncPhase::WatchingGap),
                Step::Pending,
            ),

            (_, ReadEvent::Timeout) => idle,

            (ResyncPhase::Length, ReadEvent::Byte(length)) => (
                FrameState::Resyncing(ResyncPhase::Destination { length }),
                Step::Pending,
            ),
            (ResyncPhase::Destination { length }, ReadEvent::Byte(_)) => (
                FrameState::Resyncing(ResyncPhase::Draining {
                    length,
                    // payload bytes plus the checksum
                    remaining: usize::from(length).saturating_sub(LENGTH_OVERHEAD) + 1,
                }),
                Step::Pending,
            ),
            (ResyncPhase::Draining { length, remaining }, ReadEvent::Byte(_)) => {
                if remaining <= 1 {
                    (
                        FrameState::Idle,
                        Step::Synchronized(SyncOutcome::Discarded { length }),
                    )
                } else {
                    (
                        FrameState::Resyncing(ResyncPhase::Draining {
                            length,
                            remaining: remaining - 1,
                        }),
                        Step::Pending,
                    )
                }
            }
        }
    }
}

impl Default for FrameMachine {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_GAP)
    }
}
