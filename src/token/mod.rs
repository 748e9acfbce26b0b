use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{CoordinatorError, Result};

/// Display names longer than this are rejected at token issue time
pub const MAX_NAME_LEN: usize = 48;

/// Claims signed into a room token: identity bound to a room code.
#[derive(Debug, Serialize, Deserialize)]
struct RoomClaims {
    /// Participant display name
    sub: String,
    /// Room code the name is bound to
    room: String,
    iat: u64,
    exp: u64,
}

/// Claims carried by the host credential (issued by the external auth
/// collaborator; this service only verifies them).
#[derive(Debug, Serialize, Deserialize)]
struct HostClaims {
    sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    exp: u64,
}

/// The identity a verified room token attests to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantSession {
    pub display_name: String,
    pub room_code: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

/// Verification result: expiry is reported, not fatal. A token for a long
/// quiz may outlive its TTL; the join path re-checks room liveness against
/// the registry instead of trusting token freshness.
#[derive(Debug, Clone)]
pub struct VerifiedSession {
    pub session: ParticipantSession,
    pub expired: bool,
}

#[derive(Debug, Clone)]
pub struct HostIdentity {
    pub id: String,
    pub name: Option<String>,
}

/// Issues and validates signed, time-bounded room tokens with a
/// process-wide HS256 secret.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
}

impl TokenService {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }

    fn now_secs() -> u64 {
        crate::now_millis() / 1000
    }

    /// Validates the display name and signs {name, room, iat, exp}.
    ///
    /// Room liveness is the caller's concern; this service owns signing
    /// material only.
    pub fn issue_room_token(&self, room_code: &str, display_name: &str) -> Result<String> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err(CoordinatorError::InvalidName(
                "display name must not be empty".to_string(),
            ));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(CoordinatorError::InvalidName(format!(
                "display name exceeds {MAX_NAME_LEN} characters"
            )));
        }

        let iat = Self::now_secs();
        let claims = RoomClaims {
            sub: name.to_string(),
            room: room_code.to_string(),
            iat,
            exp: iat + self.ttl_secs,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    /// Checks signature and decodes the bound identity.
    ///
    /// An expired-but-validly-signed token still yields the identity, with
    /// `expired` set; a bad signature or malformed token is an error.
    pub fn verify_room_token(&self, token: &str) -> Result<VerifiedSession> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        let data = decode::<RoomClaims>(token, &self.decoding, &validation)?;
        let claims = data.claims;
        let expired = claims.exp <= Self::now_secs();

        Ok(VerifiedSession {
            session: ParticipantSession {
                display_name: claims.sub,
                room_code: claims.room,
                issued_at: claims.iat,
                expires_at: claims.exp,
            },
            expired,
        })
    }

    /// Verifies the `Bearer` host credential from the Authorization header.
    pub fn verify_host_token(&self, header: Option<&str>) -> Result<HostIdentity> {
        let header = header.ok_or_else(|| {
            CoordinatorError::Unauthorized("missing Authorization header".to_string())
        })?;
        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            CoordinatorError::Unauthorized("expected Bearer scheme".to_string())
        })?;

        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<HostClaims>(token, &self.decoding, &validation)
            .map_err(|e| CoordinatorError::Unauthorized(e.to_string()))?;

        Ok(HostIdentity {
            id: data.claims.sub,
            name: data.claims.name,
        })
    }

    /// Signs a host credential. Production hosts get theirs from the auth
    /// collaborator; this is for local development and tests.
    pub fn issue_host_token(&self, host_id: &str) -> Result<String> {
        let claims = HostClaims {
            sub: host_id.to_string(),
            name: None,
            exp: Self::now_secs() + self.ttl_secs,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }
}
