//! Self-service check-in codes.
//!
//! A code is `base64url(payload) "." base64url(hmac_sha256(payload))`, where
//! the payload is the bincode encoding of [`CodeClaims`]. The nonce is what
//! the engine remembers to reject replays.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use ulid::Ulid;

use crate::limits::MAX_CODE_LEN;
use crate::model::Ms;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeClaims {
    pub member_id: Ulid,
    pub session_id: Ulid,
    pub nonce: Ulid,
    pub expires_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeError {
    Malformed,
    TooLong,
    BadSignature,
    Expired,
}

impl std::fmt::Display for CodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeError::Malformed => write!(f, "malformed check-in code"),
            CodeError::TooLong => write!(f, "check-in code too long"),
            CodeError::BadSignature => write!(f, "check-in code signature mismatch"),
            CodeError::Expired => write!(f, "check-in code expired"),
        }
    }
}

impl std::error::Error for CodeError {}

pub struct CodeSigner {
    key: Vec<u8>,
    ttl_ms: Ms,
}

impl CodeSigner {
    pub fn new(key: impl Into<Vec<u8>>, ttl_ms: Ms) -> Self {
        Self {
            key: key.into(),
            ttl_ms,
        }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length.
        match HmacSha256::new_from_slice(&self.key) {
            Ok(mac) => mac,
            Err(_) => unreachable!("hmac key length is unrestricted"),
        }
    }

    pub fn issue(&self, member_id: Ulid, session_id: Ulid, now: Ms) -> String {
        let claims = CodeClaims {
            member_id,
            session_id,
            nonce: Ulid::new(),
            expires_at: now + self.ttl_ms,
        };
        self.sign(&claims)
    }

    pub fn sign(&self, claims: &CodeClaims) -> String {
        let payload = bincode::serialize(claims).unwrap_or_default();
        let mut mac = self.mac();
        mac.update(&payload);
        let tag = mac.finalize().into_bytes();
        format!("{}.{}", URL_SAFE_NO_PAD.encode(&payload), URL_SAFE_NO_PAD.encode(tag))
    }

    pub fn verify(&self, code: &str, now: Ms) -> Result<CodeClaims, CodeError> {
        if code.len() > MAX_CODE_LEN {
            return Err(CodeError::TooLong);
        }
        let (payload_b64, tag_b64) = code.trim().split_once('.').ok_or(CodeError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| CodeError::Malformed)?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|_| CodeError::Malformed)?;

        let mut mac = self.mac();
        mac.update(&payload);
        mac.verify_slice(&tag).map_err(|_| CodeError::BadSignature)?;

        let claims: CodeClaims =
            bincode::deserialize(&payload).map_err(|_| CodeError::Malformed)?;
        if now >= claims.expires_at {
            return Err(CodeError::Expired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> CodeSigner {
        CodeSigner::new(b"front-desk-secret".to_vec(), 60_000)
    }

    #[test]
    fn issued_code_verifies() {
        let s = signer();
        let (m, sess) = (Ulid::new(), Ulid::new());
        let code = s.issue(m, sess, 1_000);
        let claims = s.verify(&code, 2_000).unwrap();
        assert_eq!(claims.member_id, m);
        assert_eq!(claims.session_id, sess);
        assert_eq!(claims.expires_at, 61_000);
    }

    #[test]
    fn tampered_payload_rejected() {
        let s = signer();
        let claims = CodeClaims {
            member_id: Ulid::new(),
            session_id: Ulid::new(),
            nonce: Ulid::new(),
            expires_at: 10_000,
        };
        let code = s.sign(&claims);
        let (_, tag) = code.split_once('.').unwrap();
        let forged = CodeClaims {
            member_id: Ulid::new(),
            ..claims
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(bincode::serialize(&forged).unwrap());
        let forged_code = format!("{forged_payload}.{tag}");
        assert_eq!(s.verify(&forged_code, 0), Err(CodeError::BadSignature));
    }

    #[test]
    fn other_key_rejected() {
        let code = signer().issue(Ulid::new(), Ulid::new(), 0);
        let other = CodeSigner::new(b"someone-else".to_vec(), 60_000);
        assert_eq!(other.verify(&code, 0), Err(CodeError::BadSignature));
    }

    #[test]
    fn expired_code_rejected() {
        let s = signer();
        let code = s.issue(Ulid::new(), Ulid::new(), 0);
        assert_eq!(s.verify(&code, 60_000), Err(CodeError::Expired));
    }

    #[test]
    fn garbage_is_malformed() {
        let s = signer();
        assert_eq!(s.verify("not-a-code", 0), Err(CodeError::Malformed));
        assert_eq!(s.verify("%%%.###", 0), Err(CodeError::Malformed));
        assert_eq!(s.verify(&"a".repeat(MAX_CODE_LEN + 1), 0), Err(CodeError::TooLong));
    }
}
