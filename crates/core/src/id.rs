//! Deterministic identifiers for downstream records.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Identifier of an agent activity on the remote tracker.
///
/// Derived from an idempotency key so that a retried mutation lands on the same
/// remote record. The value is the first 128 bits of `sha256(key.trim())` with
/// the version-4 and RFC 4122 variant bits set, so it parses as a UUID
/// everywhere the remote expects one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(Uuid);

impl ActivityId {
    pub fn from_idempotency_key(key: &str) -> Self {
        let digest = Sha256::digest(key.trim().as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl core::fmt::Display for ActivityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<ActivityId> for Uuid {
    fn from(value: ActivityId) -> Self {
        value.0
    }
}

impl FromStr for ActivityId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| ProtocolError::invalid_id(format!("ActivityId: {e}")))?;
        Ok(Self(uuid))
    }
}
