//! Signed, opaque query cursors.
//!
//! A cursor is `hex(payload).hex(mac)` where the MAC is a keyed blake3 hash of
//! the payload. Client-supplied cursors can therefore be accepted as-is: a
//! modified or foreign cursor fails verification instead of repositioning the
//! query.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;

const KEY_CONTEXT: &str = "kinddb 2024-01-01 query cursor signing";

/// Encodes and verifies cursor tokens.
#[derive(Clone)]
pub struct CursorCodec {
    key: [u8; 32],
}

impl CursorCodec {
    /// Create a codec whose signing key is derived from `secret`.
    pub fn new(secret: &str) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, secret.as_bytes()),
        }
    }

    /// Serialize and sign a cursor payload.
    pub fn encode<T: Serialize>(&self, payload: &T) -> Result<String, Error> {
        let bytes = serde_json::to_vec(payload).map_err(|e| Error::Serialization(e.to_string()))?;
        let mac = blake3::keyed_hash(&self.key, &bytes);
        Ok(format!("{}.{}", hex::encode(&bytes), mac.to_hex()))
    }

    /// Verify and deserialize a cursor token.
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<T, Error> {
        let (payload_hex, mac_hex) = token.split_once('.').ok_or(Error::InvalidCursor)?;
        let bytes = hex::decode(payload_hex).map_err(|_| Error::InvalidCursor)?;
        let expected = blake3::Hash::from_hex(mac_hex).map_err(|_| Error::InvalidCursor)?;
        if blake3::keyed_hash(&self.key, &bytes) != expected {
            return Err(Error::InvalidCursor);
        }
        serde_json::from_slice(&bytes).map_err(|_| Error::InvalidCursor)
    }
}

impl std::fmt::Debug for CursorCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorCodec").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let codec = CursorCodec::new("secret");
        let token = codec.encode(&(3u32, "abc".to_string())).unwrap();
        let decoded: (u32, String) = codec.decode(&token).unwrap();
        assert_eq!(decoded, (3, "abc".to_string()));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let codec = CursorCodec::new("secret");
        let token = codec.encode(&42u64).unwrap();
        let (_, mac) = token.split_once('.').unwrap();
        let forged = format!("{}.{}", hex::encode(b"43"), mac);
        assert!(matches!(codec.decode::<u64>(&forged), Err(Error::InvalidCursor)));
    }

    #[test]
    fn test_foreign_secret_rejected() {
        let token = CursorCodec::new("a").encode(&1u8).unwrap();
        assert!(matches!(
            CursorCodec::new("b").decode::<u8>(&token),
            Err(Error::InvalidCursor)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let codec = CursorCodec::new("secret");
        assert!(codec.decode::<u8>("not-a-cursor").is_err());
        assert!(codec.decode::<u8>("zz.zz").is_err());
    }
}
