//! The QR pairing payload (spec 6).
//!
//! A small JSON object carried across an out-of-band channel (a scanned QR
//! code). It is wire-facing — hence it lives in the proto crate — even
//! though the scanner UI itself is out of core scope.

use serde::{Deserialize, Serialize};

/// The four required fields of a pairing payload, plus any additional
/// fields the producer included. Additional fields are preserved through a
/// parse/stringify round trip but never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingData {
    pub device_id: String,
    pub public_key: String,
    pub relay_url: String,
    /// Unix seconds after which this payload must no longer be used to
    /// start a connection.
    pub expires: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Errors parsing or validating a [`PairingData`] payload.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("malformed pairing JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("pairing data expired at {expires}, now is {now}")]
    Expired { expires: i64, now: i64 },
}

impl PairingData {
    /// Parses pairing JSON and checks it has not expired as of `now` (unix
    /// seconds). `now == expires` is still valid; only `now > expires`
    /// fails (spec 8 boundary behavior).
    ///
    /// # Errors
    ///
    /// Returns [`PairingError::Malformed`] for invalid/incomplete JSON, or
    /// [`PairingError::Expired`] if `now > expires`.
    pub fn parse(json: &str, now: i64) -> Result<Self, PairingError> {
        let data: Self = serde_json::from_str(json)?;
        data.check_not_expired(now)?;
        Ok(data)
    }

    /// Re-checks expiry against `now`, independent of parse time. The spec
    /// requires this check to run again immediately before connecting,
    /// since meaningful time may have passed since the payload was parsed.
    ///
    /// # Errors
    ///
    /// Returns [`PairingError::Expired`] if `now > expires`.
    pub fn check_not_expired(&self, now: i64) -> Result<(), PairingError> {
        if now > self.expires {
            return Err(PairingError::Expired {
                expires: self.expires,
                now,
            });
        }
        Ok(())
    }

    /// Serializes back to JSON, preserving any `extra` fields verbatim.
    ///
    /// # Errors
    ///
    /// Returns a [`PairingError::Malformed`] if serialization fails (should
    /// not happen for a value already constructed from valid JSON).
    pub fn stringify(&self) -> Result<String, PairingError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(expires: i64) -> String {
        format!(
            r#"{{"device_id":"d1","public_key":"a2V5","relay_url":"wss://r","expires":{expires}}}"#
        )
    }

    #[test]
    fn parses_well_formed_payload() {
        let data = PairingData::parse(&sample(1_000), 500).unwrap();
        assert_eq!(data.device_id, "d1");
        assert_eq!(data.relay_url, "wss://r");
        assert_eq!(data.expires, 1_000);
    }

    #[test]
    fn expires_equal_now_is_still_valid() {
        assert!(PairingData::parse(&sample(1_000), 1_000).is_ok());
    }

    #[test]
    fn expires_one_second_ago_fails() {
        let err = PairingData::parse(&sample(1_000), 1_001).unwrap_err();
        assert!(matches!(err, PairingError::Expired { .. }));
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let raw = r#"{"device_id":"d1","public_key":"k","expires":1000}"#;
        let err = PairingData::parse(raw, 0).unwrap_err();
        assert!(matches!(err, PairingError::Malformed(_)));
    }

    #[test]
    fn not_json_never_crashes() {
        assert!(PairingData::parse("not json at all", 0).is_err());
    }

    #[test]
    fn parse_stringify_round_trip_preserves_extra_fields() {
        let raw = r#"{"device_id":"d1","public_key":"a2V5","relay_url":"wss://r","expires":1000,"nickname":"phone"}"#;
        let data = PairingData::parse(raw, 0).unwrap();
        let restrung = data.stringify().unwrap();
        let reparsed = PairingData::parse(&restrung, 0).unwrap();
        assert_eq!(data, reparsed);
        assert_eq!(
            reparsed.extra.get("nickname").and_then(|v| v.as_str()),
            Some("phone")
        );
    }

    #[test]
    fn check_not_expired_can_be_called_again_before_connect() {
        let data = PairingData::parse(&sample(1_000), 500).unwrap();
        assert!(data.check_not_expired(999).is_ok());
        assert!(data.check_not_expired(1_001).is_err());
    }
}
