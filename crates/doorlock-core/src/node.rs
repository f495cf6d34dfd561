//! One polling cycle of a door node
//!
//! A node wires a sensor, the authorizer, something to unlock and a status
//! LED together. The caller owns the loop: it calls [`Node::poll_once`],
//! then waits out the poll interval. The node reads its [`Clock`] again
//! after every step that may block, so an unlock is stamped with the time
//! the actuator actually moved. A lock node unlocks its own
//! [`ActuatorGate`]; a reader node unlocks through a [`PeerTrigger`].

use embassy_time::{Duration, Instant};
use embedded_hal_async::delay::DelayNs;
use log::{error, info, warn};
use thiserror_no_std::Error;

use crate::actuator::{Actuator, ActuatorError};
use crate::app_state::NodeError;
use crate::authorization::{AuthorizationResult, Decision};
use crate::authorizer::Authorizer;
use crate::clock::Clock;
use crate::config::{DEFAULT_CAPTURE_RETRY, DEFAULT_DEBOUNCE_MS, NodeConfig};
use crate::evidence::{CaptureError, Debouncer, EvidenceSource, capture_with_retry};
use crate::gate::{ActuatorGate, GateEvent};
use crate::http::HttpTransport;
use crate::indicator::{Status, StatusIndicator};
use crate::peer::{PeerError, PeerTrigger};
use crate::retry::RetryPolicy;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockError {
    #[error("{0}")]
    Actuator(ActuatorError),
    #[error("{0}")]
    Peer(PeerError),
}

impl From<ActuatorError> for UnlockError {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

impl From<PeerError> for UnlockError {
    fn from(e: PeerError) -> Self {
        Self::Peer(e)
    }
}

/// What unlocking did on a granted cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// The local actuator opened and a hold window started
    Unlocked,
    /// The local lock was already open; the hold window was not extended
    AlreadyUnlocked,
    /// The lock node accepted the trigger
    PeerAcknowledged { already_unlocked: bool },
}

/// Where a granted decision is sent
pub trait UnlockTarget {
    /// Called at the start of every cycle, before any capture
    fn tick(&mut self, now: Instant) -> Result<GateEvent, ActuatorError>;

    fn unlock(&mut self, now: Instant) -> impl Future<Output = Result<UnlockOutcome, UnlockError>>;
}

impl<A: Actuator> UnlockTarget for ActuatorGate<A> {
    fn tick(&mut self, now: Instant) -> Result<GateEvent, ActuatorError> {
        ActuatorGate::tick(self, now)
    }

    async fn unlock(&mut self, now: Instant) -> Result<UnlockOutcome, UnlockError> {
        match self.request_unlock(now)? {
            GateEvent::AlreadyUnlocked => Ok(UnlockOutcome::AlreadyUnlocked),
            _ => Ok(UnlockOutcome::Unlocked),
        }
    }
}

/// Reader nodes have no lock state; the peer owns the hold window.
impl<T: HttpTransport, D: DelayNs> UnlockTarget for PeerTrigger<'_, T, D> {
    fn tick(&mut self, _now: Instant) -> Result<GateEvent, ActuatorError> {
        Ok(GateEvent::Idle)
    }

    async fn unlock(&mut self, _now: Instant) -> Result<UnlockOutcome, UnlockError> {
        let ack = self.trigger_unlock().await?;
        Ok(UnlockOutcome::PeerAcknowledged {
            already_unlocked: ack.already_unlocked,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was presented
    Idle,
    /// A held badge was read again inside the debounce window
    Debounced,
    /// The sensor kept failing; the cycle was abandoned
    CaptureFailed(CaptureError),
    /// Denied or unreachable; nothing was actuated
    Refused(Decision),
    Unlocked {
        decision: Decision,
        outcome: UnlockOutcome,
    },
    /// Granted, but the actuator or the lock node did not follow through
    UnlockFailed {
        decision: Decision,
        error: UnlockError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// What the start-of-cycle tick did to the gate
    pub gate: GateEvent,
    pub outcome: CycleOutcome,
}

pub struct Node<S, Z, U, I, D, C> {
    source: S,
    authorizer: Z,
    target: U,
    indicator: I,
    delay: D,
    clock: C,
    debouncer: Debouncer,
    capture_retry: RetryPolicy,
}

impl<S, Z, U, I, D, C> Node<S, Z, U, I, D, C>
where
    S: EvidenceSource,
    Z: Authorizer,
    U: UnlockTarget,
    I: StatusIndicator,
    D: DelayNs,
    C: Clock,
{
    pub fn new(source: S, authorizer: Z, target: U, indicator: I, delay: D, clock: C) -> Self {
        Self {
            source,
            authorizer,
            target,
            indicator,
            delay,
            clock,
            debouncer: Debouncer::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS as u64)),
            capture_retry: DEFAULT_CAPTURE_RETRY,
        }
    }

    /// Take debounce and capture settings from the node config
    pub fn configured(mut self, config: &NodeConfig<'_>) -> Self {
        self.debouncer = Debouncer::new(config.debounce_window());
        self.capture_retry = config.capture_retry;
        self
    }

    pub fn target(&self) -> &U {
        &self.target
    }

    /// The lock node's HTTP server borrows the gate from here between cycles
    pub fn target_mut(&mut self) -> &mut U {
        &mut self.target
    }

    pub fn authorizer_mut(&mut self) -> &mut Z {
        &mut self.authorizer
    }

    /// Run one cycle: re-lock if due, then capture, authorize and unlock.
    ///
    /// Only a failed re-lock is an error; everything else is reported in the
    /// [`CycleReport`] and the loop carries on.
    pub async fn poll_once(&mut self) -> Result<CycleReport, NodeError> {
        let gate = self.target.tick(self.clock.now())?;
        let outcome = self.cycle().await;

        Ok(CycleReport { gate, outcome })
    }

    async fn cycle(&mut self) -> CycleOutcome {
        match capture_with_retry(&mut self.source, &mut self.delay, self.capture_retry).await {
            Ok(true) => {}
            Ok(false) => return CycleOutcome::Idle,
            Err(e) => {
                error!("Capture abandoned after {} attempts: {}", e.attempts, e.last);
                return CycleOutcome::CaptureFailed(e.last);
            }
        }

        let Some(evidence) = self.source.evidence() else {
            warn!("Source acquired but holds no evidence");
            return CycleOutcome::Idle;
        };

        // Capture retries may have taken a while
        if !self.debouncer.admit(&evidence, self.clock.now()) {
            return CycleOutcome::Debounced;
        }

        info!("Submitting {} evidence for authorization", evidence.kind());
        let decision = self.authorizer.authorize(&evidence).await;

        let status = Status::from(decision.result);
        if !decision.result.permits_unlock() {
            match (decision.result, decision.reason) {
                (AuthorizationResult::Unreachable, _) => {
                    error!("Authorizer unreachable, door stays locked")
                }
                (_, Some(reason)) => warn!("Access denied: {}", reason),
                (_, None) => warn!("Access denied"),
            }
            self.indicator.show(status).await;
            return CycleOutcome::Refused(decision);
        }

        match &decision.user {
            Some(user) => info!("Access granted to {}", user),
            None => info!("Access granted"),
        }

        // The hold window starts when the door opens, not when the cycle began
        let (outcome, status) = match self.target.unlock(self.clock.now()).await {
            Ok(outcome) => (CycleOutcome::Unlocked { decision, outcome }, status),
            Err(error) => {
                error!("Access granted but unlock failed: {}", error);
                (
                    CycleOutcome::UnlockFailed { decision, error },
                    Status::Unreachable,
                )
            }
        };

        self.indicator.show(status).await;
        outcome
    }
}
