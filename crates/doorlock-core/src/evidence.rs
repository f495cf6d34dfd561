//! Evidence produced by the node's sensor and submitted for authorization

use core::fmt::{self, Write};

use embassy_time::{Duration, Instant};
use embedded_hal_async::delay::DelayNs;
use heapless::{String, Vec};
use log::debug;
use thiserror_no_std::Error;

use crate::retry::{Exhausted, RetryPolicy, retry};

/// Longest ISO 14443A UID (triple size)
pub const MAX_UID_LEN: usize = 10;
/// `"AA:BB:..."` rendering of the longest UID
pub const UID_TEXT_LEN: usize = MAX_UID_LEN * 3 - 1;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Sensor did not respond")]
    NoResponse,
    #[error("Sensor returned corrupt data")]
    Corrupt,
    #[error("Tag UID has invalid length {0}")]
    InvalidUidLength(usize),
    #[error("Frame buffer overflow")]
    Overflow,
}

/// UID of an RFID/NFC tag.
///
/// Only single (4), double (7) and triple (10) size UIDs exist on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagUid {
    bytes: Vec<u8, MAX_UID_LEN>,
}

impl TagUid {
    pub fn new(bytes: &[u8]) -> Result<Self, CaptureError> {
        if !matches!(bytes.len(), 4 | 7 | 10) {
            return Err(CaptureError::InvalidUidLength(bytes.len()));
        }

        let bytes =
            Vec::from_slice(bytes).map_err(|_| CaptureError::InvalidUidLength(bytes.len()))?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Colon-separated upper-case hex, the form the backend stores
    pub fn to_text(&self) -> String<UID_TEXT_LEN> {
        let mut text = String::new();
        let written = write!(text, "{}", self);
        debug_assert!(written.is_ok(), "UID_TEXT_LEN fits the longest UID");
        text
    }
}

impl fmt::Display for TagUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.bytes.iter().enumerate() {
            if i > 0 {
                f.write_char(':')?;
            }
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Sensor payload submitted to the authorizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evidence<'a> {
    /// Raw JPEG frame
    Image(&'a [u8]),
    /// RFID tag identifier
    Tag(TagUid),
}

impl Evidence<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Tag(_) => "tag",
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Image(bytes) => bytes.is_empty(),
            Self::Tag(_) => false,
        }
    }
}

/// A sensor that produces evidence on demand.
///
/// Acquisition and access are split so that a failed attempt can be retried
/// while the evidence itself stays borrowed from the source's own buffer
/// (camera frames are far too large to copy around).
pub trait EvidenceSource {
    /// Try to acquire fresh evidence.
    ///
    /// `Ok(false)` means nothing was presented this poll (no card in the
    /// field, no motion); only `Err` is worth retrying.
    fn acquire(&mut self) -> impl Future<Output = Result<bool, CaptureError>>;

    /// Evidence from the last successful [`EvidenceSource::acquire`]
    fn evidence(&self) -> Option<Evidence<'_>>;
}

/// Acquire with the given retry policy.
///
/// Only errors are retried. `Ok(false)` (nothing presented) ends the
/// sequence immediately.
pub async fn capture_with_retry<S, D>(
    source: &mut S,
    delay: &mut D,
    policy: RetryPolicy,
) -> Result<bool, Exhausted<CaptureError>>
where
    S: EvidenceSource,
    D: DelayNs,
{
    retry(policy, delay, "capture", async |_| source.acquire().await).await
}

/// Suppresses the same tag presented again within a short window.
///
/// A badge held against the reader keeps refreshing the window, so it
/// triggers exactly one authorization until it is taken away. Images are
/// never debounced.
pub struct Debouncer {
    window: Duration,
    last: Option<(TagUid, Instant)>,
}

impl Debouncer {
    pub const fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Returns true if the evidence should start a new authorization cycle.
    pub fn admit(&mut self, evidence: &Evidence<'_>, now: Instant) -> bool {
        let Evidence::Tag(uid) = evidence else {
            return true;
        };

        if let Some((last_uid, seen_at)) = &mut self.last {
            if *last_uid == *uid && now.saturating_duration_since(*seen_at) < self.window {
                debug!("Debounced repeat read of tag {}", uid);
                *seen_at = now;
                return false;
            }
        }

        self.last = Some((uid.clone(), now));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Presented, RecordingDelay, ScriptedSource};
    use embassy_futures::block_on;

    fn tag(bytes: &[u8]) -> Evidence<'static> {
        Evidence::Tag(TagUid::new(bytes).unwrap())
    }

    #[test]
    fn uid_renders_as_colon_separated_upper_hex() {
        let uid = TagUid::new(&[0xde, 0xad, 0x0b, 0xef]).unwrap();
        assert_eq!(uid.to_text().as_str(), "DE:AD:0B:EF");

        let long = TagUid::new(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 0xff]).unwrap();
        assert_eq!(long.to_text().as_str(), "01:02:03:04:05:06:07:08:09:FF");
        assert_eq!(long.to_text().len(), UID_TEXT_LEN);
    }

    #[test]
    fn uid_rejects_impossible_lengths() {
        assert_eq!(
            TagUid::new(&[1, 2, 3]),
            Err(CaptureError::InvalidUidLength(3))
        );
        assert_eq!(TagUid::new(&[]), Err(CaptureError::InvalidUidLength(0)));
        assert!(TagUid::new(&[0; 7]).is_ok());
    }

    #[test]
    fn empty_image_is_empty_evidence() {
        assert!(Evidence::Image(&[]).is_empty());
        assert!(!Evidence::Image(&[0xff, 0xd8]).is_empty());
        assert!(!tag(&[1, 2, 3, 4]).is_empty());
    }

    #[test]
    fn debouncer_suppresses_held_badge() {
        let mut debouncer = Debouncer::new(Duration::from_millis(2000));
        let badge = tag(&[1, 2, 3, 4]);

        assert!(debouncer.admit(&badge, Instant::from_millis(0)));
        assert!(!debouncer.admit(&badge, Instant::from_millis(1500)));
        // Still held: the window restarts from the last read
        assert!(!debouncer.admit(&badge, Instant::from_millis(3000)));
        assert!(debouncer.admit(&badge, Instant::from_millis(5000)));
    }

    #[test]
    fn debouncer_admits_different_tag_immediately() {
        let mut debouncer = Debouncer::new(Duration::from_millis(2000));

        assert!(debouncer.admit(&tag(&[1, 2, 3, 4]), Instant::from_millis(0)));
        assert!(debouncer.admit(&tag(&[5, 6, 7, 8]), Instant::from_millis(10)));
        assert!(debouncer.admit(&tag(&[1, 2, 3, 4]), Instant::from_millis(20)));
    }

    #[test]
    fn debouncer_never_blocks_images() {
        let mut debouncer = Debouncer::new(Duration::from_millis(2000));
        let frame = Evidence::Image(&[0xff, 0xd8, 0xff, 0xd9]);

        assert!(debouncer.admit(&frame, Instant::from_millis(0)));
        assert!(debouncer.admit(&frame, Instant::from_millis(1)));
    }

    #[test]
    fn capture_retries_sensor_errors() {
        let mut source = ScriptedSource::new()
            .fail(CaptureError::NoResponse)
            .present(Presented::tag(&[1, 2, 3, 4]));
        let mut delay = RecordingDelay::default();

        let got = block_on(capture_with_retry(&mut source, &mut delay, RetryPolicy::new(3, 100)));

        assert_eq!(got, Ok(true));
        assert_eq!(source.acquires, 2);
        assert_eq!(delay.delays_ms, [100]);
        assert_eq!(source.evidence(), Some(tag(&[1, 2, 3, 4])));
    }

    #[test]
    fn capture_gives_up_after_policy() {
        let mut source = ScriptedSource::new()
            .fail(CaptureError::NoResponse)
            .fail(CaptureError::Corrupt)
            .fail(CaptureError::Corrupt)
            .present(Presented::tag(&[1, 2, 3, 4]));
        let mut delay = RecordingDelay::default();

        let got = block_on(capture_with_retry(&mut source, &mut delay, RetryPolicy::new(3, 100)));

        assert_eq!(
            got,
            Err(Exhausted {
                attempts: 3,
                last: CaptureError::Corrupt
            })
        );
        assert_eq!(source.evidence(), None);
    }

    #[test]
    fn nothing_presented_is_not_retried() {
        let mut source = ScriptedSource::new().nothing();
        let mut delay = RecordingDelay::default();

        let got = block_on(capture_with_retry(&mut source, &mut delay, RetryPolicy::new(3, 100)));

        assert_eq!(got, Ok(false));
        assert_eq!(source.acquires, 1);
        assert!(delay.delays_ms.is_empty());
    }
}
