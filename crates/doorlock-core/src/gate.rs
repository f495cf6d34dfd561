//! Actuator gate: the timed unlock state machine
//!
//! The gate turns a granted authorization into one bounded unlock window.
//! It owns the only mutable lock state on the device and exposes exactly two
//! transitions:
//!
//! ```text
//!            request_unlock(now)
//!   Locked ----------------------> Unlocked { since: now }
//!     ^                               |   ^
//!     |  tick(now), now-since >= hold |   | request_unlock(now): no-op,
//!     +-------------------------------+   | hold timer keeps running
//!                                     +---+
//! ```
//!
//! Time is always passed in by the caller. The gate never reads a clock, so
//! the polling loop decides the cadence and tests decide the timeline.

use embassy_time::{Duration, Instant};
use log::{error, info, warn};

use crate::actuator::{Actuator, ActuatorError, LockPosition};

/// Lock state of one physical actuator.
///
/// The unlock timestamp only exists in the `Unlocked` variant, so "timestamp
/// set iff unlocked" holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorState {
    Locked,
    Unlocked { since: Instant },
}

impl ActuatorState {
    pub const fn is_locked(&self) -> bool {
        matches!(self, Self::Locked)
    }

    pub const fn unlocked_at(&self) -> Option<Instant> {
        match self {
            Self::Locked => None,
            Self::Unlocked { since } => Some(*since),
        }
    }
}

/// What a gate operation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    /// The actuator was driven open and the hold window started
    Unlocked,
    /// A grant arrived while already open; nothing changed
    AlreadyUnlocked,
    /// The hold window elapsed and the actuator was driven closed
    Relocked,
    /// Nothing to do
    Idle,
}

pub struct ActuatorGate<A> {
    actuator: A,
    state: ActuatorState,
    hold: Duration,
    /// Set when driving the actuator closed failed; the next tick retries.
    relock_pending: bool,
}

impl<A: Actuator> ActuatorGate<A> {
    /// Create a gate in the `Locked` state.
    ///
    /// Does not touch the hardware; call [`ActuatorGate::engage`] once at boot
    /// to force the actuator into the locked position.
    pub fn new(actuator: A, hold: Duration) -> Self {
        Self {
            actuator,
            state: ActuatorState::Locked,
            hold,
            relock_pending: false,
        }
    }

    /// Drive the actuator to the locked position without changing state.
    pub fn engage(&mut self) -> Result<(), ActuatorError> {
        self.actuator.set_position(LockPosition::Locked)
    }

    /// Open the lock for one hold window.
    ///
    /// Idempotent: while unlocked this is a no-op and the running hold window
    /// is not extended.
    pub fn request_unlock(&mut self, now: Instant) -> Result<GateEvent, ActuatorError> {
        if let ActuatorState::Unlocked { since } = self.state {
            info!(
                "Gate already unlocked ({} ms into hold), ignoring repeat grant",
                now.saturating_duration_since(since).as_millis()
            );
            return Ok(GateEvent::AlreadyUnlocked);
        }

        if let Err(e) = self.actuator.set_position(LockPosition::Unlocked) {
            error!("Failed to drive actuator open: {:?}", e);
            return Err(e);
        }

        self.relock_pending = false;
        self.state = ActuatorState::Unlocked { since: now };
        info!("Gate unlocked for {} ms", self.hold.as_millis());

        Ok(GateEvent::Unlocked)
    }

    /// Advance the state machine; re-locks once the hold window has elapsed.
    ///
    /// A `now` earlier than the unlock time counts as zero elapsed time.
    pub fn tick(&mut self, now: Instant) -> Result<GateEvent, ActuatorError> {
        match self.state {
            ActuatorState::Locked if self.relock_pending => self.drive_locked(),
            ActuatorState::Locked => Ok(GateEvent::Idle),
            ActuatorState::Unlocked { since } => {
                if now.saturating_duration_since(since) < self.hold {
                    return Ok(GateEvent::Idle);
                }

                // The state flips before the drive so a failing actuator can
                // never leave the gate reporting unlocked forever.
                self.state = ActuatorState::Locked;
                self.drive_locked()
            }
        }
    }

    fn drive_locked(&mut self) -> Result<GateEvent, ActuatorError> {
        match self.actuator.set_position(LockPosition::Locked) {
            Ok(()) => {
                if self.relock_pending {
                    info!("Deferred re-lock succeeded");
                } else {
                    info!("Hold window elapsed, gate locked");
                }
                self.relock_pending = false;
                Ok(GateEvent::Relocked)
            }
            Err(e) => {
                warn!("Failed to drive actuator closed, retrying next tick: {:?}", e);
                self.relock_pending = true;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> ActuatorState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    /// True while a failed re-lock is waiting to be retried
    pub fn relock_pending(&self) -> bool {
        self.relock_pending
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }
}
