//! Geraete-Datensaetze aus Key-Query-Antworten

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use nio_core::api::DeviceKeys;
use nio_core::types::key_id;
use nio_core::{DeviceId, DeviceKeyAlgorithm, EventEncryptionAlgorithm, UserId};

use crate::error::{CryptoError, CryptoResult};
use crate::signatures::verify_json;
use crate::olm::Account;
use crate::types::{Curve25519PublicKey, Ed25519PublicKey, IdentityKeys};

/// Vertrauensstatus eines Geraets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustState {
    Unverified,
    Verified,
    Blacklisted,
    /// Nicht mehr in der Geraeteliste des Benutzers
    Deleted,
}

/// Ein bekanntes Geraet eines Benutzers
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub keys: IdentityKeys,
    pub algorithms: Vec<EventEncryptionAlgorithm>,
    pub display_name: Option<String>,
    pub trust_state: TrustState,
    /// Die Schluessel haben sich gegenueber einem frueheren Stand geaendert
    pub key_changed: bool,
    pub first_seen: DateTime<Utc>,
}

impl DeviceRecord {
    /// Validiert einen rohen Eintrag einer Key-Query-Antwort.
    ///
    /// Prueft Schema, passende IDs und die Selbstsignatur.
    pub fn from_json(user_id: &UserId, device_id: &DeviceId, value: &Value) -> CryptoResult<Self> {
        let device_keys: DeviceKeys = serde_json::from_value(value.clone()).map_err(|e| {
            CryptoError::MalformedResponse(format!("Geraeteschluessel {user_id}/{device_id}: {e}"))
        })?;

        if &device_keys.user_id != user_id || &device_keys.device_id != device_id {
            return Err(CryptoError::MalformedResponse(format!(
                "Geraeteschluessel fuer {}/{} unter {user_id}/{device_id} gemeldet",
                device_keys.user_id, device_keys.device_id
            )));
        }

        let schluessel = |algorithm: DeviceKeyAlgorithm| {
            let id = key_id(&algorithm, device_id.as_str());
            device_keys.keys.get(&id).cloned().ok_or_else(|| {
                CryptoError::MalformedResponse(format!(
                    "{user_id}/{device_id} ohne Schluessel {id}"
                ))
            })
        };
        let ed25519 = Ed25519PublicKey::from_base64(&schluessel(DeviceKeyAlgorithm::Ed25519)?)?;
        let curve25519 =
            Curve25519PublicKey::from_base64(&schluessel(DeviceKeyAlgorithm::Curve25519)?)?;

        verify_json(
            value,
            user_id,
            &key_id(&DeviceKeyAlgorithm::Ed25519, device_id.as_str()),
            &ed25519,
        )?;

        Ok(Self {
            user_id: user_id.clone(),
            device_id: device_id.clone(),
            keys: IdentityKeys {
                ed25519,
                curve25519,
            },
            algorithms: device_keys.algorithms,
            display_name: device_keys.unsigned.and_then(|u| u.device_display_name),
            trust_state: TrustState::Unverified,
            key_changed: false,
            first_seen: Utc::now(),
        })
    }

    /// Datensatz des eigenen Geraets (immer verifiziert)
    pub fn own(account: &Account) -> Self {
        Self {
            user_id: account.user_id().clone(),
            device_id: account.device_id().clone(),
            keys: account.identity_keys(),
            algorithms: vec![
                EventEncryptionAlgorithm::OlmV1Curve25519AesSha2,
                EventEncryptionAlgorithm::MegolmV1AesSha2,
            ],
            display_name: None,
            trust_state: TrustState::Verified,
            key_changed: false,
            first_seen: Utc::now(),
        }
    }

    pub fn is_blacklisted(&self) -> bool {
        self.trust_state == TrustState::Blacklisted
    }

    pub fn is_deleted(&self) -> bool {
        self.trust_state == TrustState::Deleted
    }

    pub fn is_verified(&self) -> bool {
        self.trust_state == TrustState::Verified
    }

    pub fn supports_olm(&self) -> bool {
        self.algorithms
            .contains(&EventEncryptionAlgorithm::OlmV1Curve25519AesSha2)
    }

    /// Darf Schluessel und Nachrichten von uns erhalten
    pub fn is_eligible_recipient(&self) -> bool {
        !self.is_blacklisted() && !self.is_deleted() && self.supports_olm()
    }
}
