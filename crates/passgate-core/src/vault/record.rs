//! Stored secret records and their JSON wire form.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::condition::{conditions_from_json, conditions_to_json, AccessControlCondition};
use crate::error::{GateError, GateResult};
use crate::types::Address;

/// Secrets expire one year after creation
pub const SECRET_LIFETIME_SECS: i64 = 365 * 24 * 60 * 60;

/// An encrypted secret and the policy guarding its content key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub id: String,
    /// What the secret unlocks, e.g. "whatsapp"
    pub service_type: String,
    pub name: String,
    pub owner: Address,
    /// nonce || AES-256-GCM ciphertext || tag
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// Opaque token from the key-release service
    pub wrapped_key: String,
    pub access_conditions: Vec<AccessControlCondition>,
    /// Unix seconds
    pub created_at: i64,
    pub expires_at: i64,
    pub last_accessed_at: i64,
    /// Incremented on each re-encryption
    pub version: u32,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

impl EncryptedSecret {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at != 0 && now > self.expires_at
    }

    /// JSON wire form for transport or external storage
    pub fn to_record(&self) -> GateResult<SecretRecord> {
        Ok(SecretRecord {
            encrypted_data: BASE64.encode(&self.ciphertext),
            wrapped_key: self.wrapped_key.clone(),
            access_conditions: conditions_to_json(&self.access_conditions)?,
            owner_address: self.owner.to_checksum(),
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
            service_type: self.service_type.clone(),
        })
    }

    /// Rebuild a secret from its wire form. Fields absent from the wire form
    /// get defaults: id from `id`, name from the service type, one-year expiry.
    pub fn from_record(id: &str, record: &SecretRecord) -> GateResult<Self> {
        let ciphertext = BASE64
            .decode(&record.encrypted_data)
            .map_err(|e| GateError::Decryption(format!("encrypted_data is not base64: {}", e)))?;

        Ok(Self {
            id: id.to_string(),
            service_type: record.service_type.clone(),
            name: record.service_type.clone(),
            owner: Address::parse(&record.owner_address)?,
            ciphertext,
            wrapped_key: record.wrapped_key.clone(),
            access_conditions: conditions_from_json(&record.access_conditions)?,
            created_at: record.created_at,
            expires_at: record.created_at + SECRET_LIFETIME_SECS,
            last_accessed_at: record.last_accessed_at,
            version: 1,
            deleted_at: None,
        })
    }
}

/// Wire record: `{encrypted_data, wrapped_key, access_conditions,
/// owner_address, created_at, last_accessed_at, service_type}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    /// base64 of nonce || ciphertext
    pub encrypted_data: String,
    pub wrapped_key: String,
    /// JSON-encoded condition list
    pub access_conditions: String,
    pub owner_address: String,
    pub created_at: i64,
    pub last_accessed_at: i64,
    pub service_type: String,
}

/// Secret listing without ciphertext or key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSummary {
    pub id: String,
    pub service_type: String,
    pub name: String,
    pub owner: Address,
    pub created_at: i64,
    pub expires_at: i64,
    pub last_accessed_at: i64,
    pub version: u32,
    pub deleted: bool,
}

impl From<&EncryptedSecret> for SecretSummary {
    fn from(s: &EncryptedSecret) -> Self {
        Self {
            id: s.id.clone(),
            service_type: s.service_type.clone(),
            name: s.name.clone(),
            owner: s.owner,
            created_at: s.created_at,
            expires_at: s.expires_at,
            last_accessed_at: s.last_accessed_at,
            version: s.version,
            deleted: s.is_deleted(),
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
