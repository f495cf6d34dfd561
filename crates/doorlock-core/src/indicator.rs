//! Status LED feedback for each cycle outcome

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use log::warn;

use crate::authorization::AuthorizationResult;

/// `count` pulses of `on_ms` separated by `off_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkPattern {
    pub count: u8,
    pub on_ms: u32,
    pub off_ms: u32,
}

impl BlinkPattern {
    pub const GRANTED: Self = Self::new(1, 1_000, 0);
    pub const DENIED: Self = Self::new(3, 150, 150);
    pub const UNREACHABLE: Self = Self::new(2, 400, 300);
    pub const FATAL: Self = Self::new(10, 50, 50);

    pub const fn new(count: u8, on_ms: u32, off_ms: u32) -> Self {
        Self {
            count,
            on_ms,
            off_ms,
        }
    }

    /// Time the pattern keeps the loop busy
    pub const fn duration_ms(&self) -> u32 {
        let count = self.count as u32;
        count * self.on_ms + count.saturating_sub(1) * self.off_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Granted,
    Denied,
    Unreachable,
    Fatal,
}

impl Status {
    pub const fn pattern(self) -> BlinkPattern {
        match self {
            Self::Granted => BlinkPattern::GRANTED,
            Self::Denied => BlinkPattern::DENIED,
            Self::Unreachable => BlinkPattern::UNREACHABLE,
            Self::Fatal => BlinkPattern::FATAL,
        }
    }
}

impl From<AuthorizationResult> for Status {
    fn from(result: AuthorizationResult) -> Self {
        match result {
            AuthorizationResult::Granted => Self::Granted,
            AuthorizationResult::Denied => Self::Denied,
            AuthorizationResult::Unreachable => Self::Unreachable,
        }
    }
}

pub trait StatusIndicator {
    fn show(&mut self, status: Status) -> impl Future<Output = ()>;
}

/// Blinks a single LED. Pin errors are logged and otherwise ignored; a dead
/// LED must never stop the door from working.
pub struct LedIndicator<P, D> {
    pin: P,
    delay: D,
}

impl<P: OutputPin, D: DelayNs> LedIndicator<P, D> {
    pub fn new(pin: P, delay: D) -> Self {
        Self { pin, delay }
    }

    pub async fn play(&mut self, pattern: BlinkPattern) {
        for i in 0..pattern.count {
            if i > 0 {
                self.delay.delay_ms(pattern.off_ms).await;
            }
            self.set(true);
            self.delay.delay_ms(pattern.on_ms).await;
            self.set(false);
        }
    }

    fn set(&mut self, on: bool) {
        let result = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };

        if result.is_err() {
            warn!("Status LED pin write failed");
        }
    }
}

impl<P: OutputPin, D: DelayNs> StatusIndicator for LedIndicator<P, D> {
    async fn show(&mut self, status: Status) {
        self.play(status.pattern()).await;
    }
}
