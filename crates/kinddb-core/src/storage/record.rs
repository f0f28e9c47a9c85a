//! Record type for persisted entities.

use crate::error::Error;
use kinddb_proto::Entity;
use rkyv::{Archive, Deserialize, Serialize};

/// A persisted entity with its commit version.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct StoredRecord {
    /// JSON-encoded entity.
    pub data: Vec<u8>,

    /// Monotonic version assigned on every write; used for conflict checks.
    pub version: u64,
}

impl StoredRecord {
    /// Encode an entity at the given version.
    pub fn from_entity(entity: &Entity, version: u64) -> Result<Self, Error> {
        let data = serde_json::to_vec(entity).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(Self { data, version })
    }

    /// Decode the stored entity.
    pub fn entity(&self) -> Result<Entity, Error> {
        serde_json::from_slice(&self.data).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Serialize the record to bytes using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a record from bytes using rkyv.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinddb_proto::Key;

    #[test]
    fn test_record_roundtrip() {
        let entity = Entity::new(Key::from_id("Person", 1)).with("age", 30);
        let record = StoredRecord::from_entity(&entity, 9).unwrap();
        let bytes = record.to_bytes().unwrap();
        let decoded = StoredRecord::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.version, 9);
        assert_eq!(decoded.entity().unwrap(), entity);
    }
}
