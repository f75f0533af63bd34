//! Replica identity.
//!
//! Every replica editing a document is identified by a 12-byte `ActorId`.
//! Actor ids break ties between time tickets that share a lamport counter
//! and delimiter, so their ordering must be total and stable: they compare
//! lexicographically by byte.

use rand_core::OsRng;
use rand_core::RngCore;

use crate::error::Error;
use crate::error::Result;

/// Number of bytes in an actor id.
pub const ACTOR_ID_LEN: usize = 12;

/// A replica identifier, 12 bytes ordered lexicographically.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActorId(pub [u8; ACTOR_ID_LEN]);

impl ActorId {
    /// The smallest actor id. Used by `TimeTicket::INITIAL`.
    pub const INITIAL: ActorId = ActorId([0x00; ACTOR_ID_LEN]);

    /// The largest actor id. Used by `TimeTicket::MAX`.
    pub const MAX: ActorId = ActorId([0xff; ACTOR_ID_LEN]);

    /// Generate a random actor id.
    pub fn generate() -> ActorId {
        let mut bytes = [0u8; ACTOR_ID_LEN];
        OsRng.fill_bytes(&mut bytes);
        return ActorId(bytes);
    }

    /// Derive a deterministic actor id from a label.
    ///
    /// The label is hashed with blake3 and the first 12 bytes of the digest
    /// are kept, so `derive("alice")` is the same id on every machine.
    pub fn derive(label: &str) -> ActorId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(label.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; ACTOR_ID_LEN];
        bytes.copy_from_slice(&digest.as_bytes()[..ACTOR_ID_LEN]);
        return ActorId(bytes);
    }

    /// Parse an actor id from 24 lowercase or uppercase hex digits.
    pub fn from_hex(text: &str) -> Result<ActorId> {
        if text.len() != ACTOR_ID_LEN * 2 || !text.is_ascii() {
            return Err(Error::InvalidActorId(text.to_string()));
        }
        let mut bytes = [0u8; ACTOR_ID_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &text[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| Error::InvalidActorId(text.to_string()))?;
        }
        return Ok(ActorId(bytes));
    }

    /// Render the id as 24 lowercase hex digits.
    pub fn to_hex(&self) -> String {
        return hex(&self.0);
    }
}

/// Lowercase hex encoding, shared with the bytes primitive projection.
pub(crate) fn hex(bytes: &[u8]) -> String {
    return bytes.iter().map(|b| format!("{:02x}", b)).collect();
}

impl std::fmt::Debug for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "ActorId({})", hex(&self.0));
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "{}", hex(&self.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        assert_eq!(ActorId::derive("alice"), ActorId::derive("alice"));
        assert_ne!(ActorId::derive("alice"), ActorId::derive("bob"));
    }

    #[test]
    fn generate_differs() {
        assert_ne!(ActorId::generate(), ActorId::generate());
    }

    #[test]
    fn hex_round_trip() {
        let actor = ActorId::derive("carol");
        let parsed = ActorId::from_hex(&actor.to_hex()).unwrap();
        assert_eq!(parsed, actor);
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(ActorId::from_hex("abc").is_err());
        assert!(ActorId::from_hex("zz0000000000000000000000").is_err());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let mut low = [0u8; ACTOR_ID_LEN];
        let mut high = [0u8; ACTOR_ID_LEN];
        low[0] = 1;
        high[0] = 2;
        assert!(ActorId(low) < ActorId(high));
        assert!(ActorId::INITIAL < ActorId(low));
        assert!(ActorId(high) < ActorId::MAX);
    }
}
