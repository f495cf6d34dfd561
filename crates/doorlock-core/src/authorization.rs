//! Authorization results and the strict decoding of authorizer replies
//!
//! The backend answers every recognize/RFID request with a small JSON object:
//!
//! ```json
//! {"status": "granted", "user": "alice", "dist": 0.31}
//! {"status": "denied", "reason": "no_match", "min_dist": 0.62}
//! ```
//!
//! Only the `status` field decides. It must be exactly `"granted"` for the
//! door to open; any other string is a denial, and a body without a string
//! `status` is treated as if the authorizer never answered.

use core::fmt;

use heapless::String;
use log::warn;
use serde::Deserialize;

use crate::app_state::FromTruncated;

/// Longest user name kept for logging
pub const MAX_USER_LEN: usize = 32;

/// Outcome of one capture cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationResult {
    Granted,
    Denied,
    Unreachable,
}

impl AuthorizationResult {
    /// The only gating rule: nothing but an explicit grant opens the door.
    pub const fn permits_unlock(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Why the backend denied a request.
///
/// Informational only; a denial is a denial whatever the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    InvalidApiKey,
    EmptyPayload,
    EmptyUid,
    DecodeFailed,
    NoFace,
    DbEmpty,
    NoMatch,
    CardNotFound,
    CardNotAssigned,
    ServerError,
    Other,
}

impl DenialReason {
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "invalid_api_key" => Self::InvalidApiKey,
            "empty_payload" => Self::EmptyPayload,
            "empty_uid" => Self::EmptyUid,
            "decode_failed" => Self::DecodeFailed,
            "no_face" => Self::NoFace,
            "db_empty" => Self::DbEmpty,
            "no_match" => Self::NoMatch,
            "card_not_found" => Self::CardNotFound,
            "card_not_assigned" => Self::CardNotAssigned,
            "server_error" => Self::ServerError,
            _ => Self::Other,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidApiKey => "invalid_api_key",
            Self::EmptyPayload => "empty_payload",
            Self::EmptyUid => "empty_uid",
            Self::DecodeFailed => "decode_failed",
            Self::NoFace => "no_face",
            Self::DbEmpty => "db_empty",
            Self::NoMatch => "no_match",
            Self::CardNotFound => "card_not_found",
            Self::CardNotAssigned => "card_not_assigned",
            Self::ServerError => "server_error",
            Self::Other => "other",
        }
    }

    /// Denials that point at a node misconfiguration rather than a stranger
    pub const fn is_configuration_fault(self) -> bool {
        matches!(self, Self::InvalidApiKey | Self::ServerError)
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed authorizer reply for one piece of evidence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub result: AuthorizationResult,
    pub user: Option<String<MAX_USER_LEN>>,
    pub reason: Option<DenialReason>,
}

impl Decision {
    pub fn granted(user: Option<&str>) -> Self {
        Self {
            result: AuthorizationResult::Granted,
            user: user.map(String::from_truncated),
            reason: None,
        }
    }

    pub const fn denied(reason: Option<DenialReason>) -> Self {
        Self {
            result: AuthorizationResult::Denied,
            user: None,
            reason,
        }
    }

    pub const fn unreachable() -> Self {
        Self {
            result: AuthorizationResult::Unreachable,
            user: None,
            reason: None,
        }
    }
}

#[derive(Deserialize)]
struct StatusField<'a> {
    status: &'a str,
}

#[derive(Deserialize)]
struct Details<'a> {
    #[serde(default)]
    user: Option<&'a str>,
    #[serde(default)]
    reason: Option<&'a str>,
}

/// Decode an authorizer reply.
///
/// `Granted` requires a 2xx status code and `"status": "granted"` exactly.
/// User and reason are best effort: a field the decoder cannot borrow (e.g.
/// a name with escapes) is dropped without affecting the decision.
pub fn decode_decision(status_code: u16, body: &[u8]) -> Decision {
    let status = match serde_json_core::from_slice::<StatusField<'_>>(body) {
        Ok((field, _)) => field.status,
        Err(e) => {
            warn!(
                "Authorizer reply (HTTP {}) has no readable status: {:?}",
                status_code, e
            );
            return Decision::unreachable();
        }
    };

    let details = serde_json_core::from_slice::<Details<'_>>(body)
        .map(|(details, _)| details)
        .unwrap_or(Details {
            user: None,
            reason: None,
        });

    if status == "granted" && (200..300).contains(&status_code) {
        Decision::granted(details.user)
    } else {
        Decision::denied(details.reason.map(DenialReason::from_wire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_granted_permits_unlock() {
        assert!(AuthorizationResult::Granted.permits_unlock());
        assert!(!AuthorizationResult::Denied.permits_unlock());
        assert!(!AuthorizationResult::Unreachable.permits_unlock());
    }

    #[test]
    fn decodes_grant_with_user() {
        let decision = decode_decision(
            200,
            br#"{"status":"granted","user":"alice","dist":0.312}"#,
        );

        assert_eq!(decision.result, AuthorizationResult::Granted);
        assert_eq!(decision.user.as_deref(), Some("alice"));
        assert_eq!(decision.reason, None);
    }

    #[test]
    fn decodes_denial_reason() {
        let decision = decode_decision(
            200,
            br#"{"status":"denied","reason":"no_match","min_dist":0.71}"#,
        );

        assert_eq!(decision.result, AuthorizationResult::Denied);
        assert_eq!(decision.reason, Some(DenialReason::NoMatch));
    }

    #[test]
    fn denial_mentioning_granted_is_still_denied() {
        let decision = decode_decision(
            200,
            br#"{"status":"denied","reason":"access not granted"}"#,
        );

        assert_eq!(decision.result, AuthorizationResult::Denied);
        assert_eq!(decision.reason, Some(DenialReason::Other));
    }

    #[test]
    fn status_must_match_exactly() {
        for body in [
            &br#"{"status":"GRANTED"}"#[..],
            br#"{"status":"granted "}"#,
            br#"{"status":"not granted"}"#,
            br#"{"status":""}"#,
        ] {
            assert_eq!(
                decode_decision(200, body).result,
                AuthorizationResult::Denied
            );
        }
    }

    #[test]
    fn grant_with_error_status_code_is_denied() {
        let decision = decode_decision(500, br#"{"status":"granted"}"#);
        assert_eq!(decision.result, AuthorizationResult::Denied);
    }

    #[test]
    fn unauthorized_reply_is_denied_with_reason() {
        let decision = decode_decision(
            401,
            br#"{"status":"denied","reason":"invalid_api_key"}"#,
        );

        assert_eq!(decision.result, AuthorizationResult::Denied);
        assert_eq!(decision.reason, Some(DenialReason::InvalidApiKey));
        assert!(DenialReason::InvalidApiKey.is_configuration_fault());
    }

    #[test]
    fn malformed_reply_is_unreachable() {
        for body in [
            &b""[..],
            b"<html>Bad Gateway</html>",
            br#"{"user":"alice"}"#,
            br#"{"status":true}"#,
            br#"granted"#,
        ] {
            assert_eq!(
                decode_decision(200, body).result,
                AuthorizationResult::Unreachable
            );
        }
    }

    #[test]
    fn escaped_user_name_does_not_block_grant() {
        let decision = decode_decision(200, br#"{"status":"granted","user":"o\"brien"}"#);

        assert_eq!(decision.result, AuthorizationResult::Granted);
    }

    #[test]
    fn long_user_name_is_truncated() {
        let name = "a-very-long-user-name-that-does-not-fit-in-the-log-buffer";
        let decision = Decision::granted(Some(name));

        assert_eq!(decision.user.unwrap().len(), MAX_USER_LEN);
    }

    #[test]
    fn reason_roundtrips_through_wire_names() {
        for reason in [
            DenialReason::CardNotFound,
            DenialReason::CardNotAssigned,
            DenialReason::NoFace,
            DenialReason::DbEmpty,
        ] {
            assert_eq!(DenialReason::from_wire(reason.as_str()), reason);
        }
    }
}
