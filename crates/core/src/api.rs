//! Schemata der Schluessel-Endpunkte und der Sync-Antwort
//!
//! Anfragen werden vollstaendig typisiert. In Antworten bleiben einzelne
//! Eintraege (Geraeteschluessel, Einmalschluessel, To-Device-Events) rohe
//! JSON-Werte, damit ein fehlerhafter Eintrag verworfen werden kann, ohne die
//! gueltigen Teile derselben Antwort zu verlieren.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{DeviceId, DeviceKeyAlgorithm, EventEncryptionAlgorithm, UserId};

/// Signaturen: user_id -> schluessel_id -> Signatur (Base64)
pub type Signatures = BTreeMap<UserId, BTreeMap<String, String>>;

/// Unsignierte Zusatzinformationen eines Geraets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedDeviceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_display_name: Option<String>,
}

/// Selbstsignierte Identitaetsschluessel eines Geraets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceKeys {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub algorithms: Vec<EventEncryptionAlgorithm>,
    /// `curve25519:<device>` und `ed25519:<device>` -> Base64-Schluessel
    pub keys: BTreeMap<String, String>,
    #[serde(default)]
    pub signatures: Signatures,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<UnsignedDeviceInfo>,
}

/// Signierter Einmalschluessel (`signed_curve25519`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedKey {
    pub key: String,
    #[serde(default)]
    pub signatures: Signatures,
}

// ---------------------------------------------------------------------------
// /keys/upload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysUploadRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_keys: Option<DeviceKeys>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub one_time_keys: BTreeMap<String, SignedKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysUploadResponse {
    pub one_time_key_counts: BTreeMap<DeviceKeyAlgorithm, u64>,
}

// ---------------------------------------------------------------------------
// /keys/query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysQueryRequest {
    /// Leere Geraeteliste = alle Geraete des Benutzers
    pub device_keys: BTreeMap<UserId, Vec<DeviceId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeysQueryResponse {
    /// user_id -> device_id -> DeviceKeys (roh, wird pro Eintrag validiert)
    #[serde(default)]
    pub device_keys: BTreeMap<String, BTreeMap<String, Value>>,
    /// Server, die nicht erreicht werden konnten
    #[serde(default)]
    pub failures: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// /keys/claim
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysClaimRequest {
    pub one_time_keys: BTreeMap<UserId, BTreeMap<DeviceId, DeviceKeyAlgorithm>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeysClaimResponse {
    /// user_id -> device_id -> schluessel_id -> SignedKey (roh)
    #[serde(default)]
    pub one_time_keys: BTreeMap<String, BTreeMap<String, BTreeMap<String, Value>>>,
    #[serde(default)]
    pub failures: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// /sendToDevice
// ---------------------------------------------------------------------------

/// To-Device-Nachrichten eines Event-Typs.
///
/// `event_type` und `txn_id` gehoeren in den Request-Pfad, der Body
/// besteht nur aus `messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToDeviceRequest {
    #[serde(skip)]
    pub event_type: String,
    #[serde(skip)]
    pub txn_id: Uuid,
    pub messages: BTreeMap<UserId, BTreeMap<DeviceId, Value>>,
}

impl ToDeviceRequest {
    /// Anzahl der adressierten Geraete
    pub fn message_count(&self) -> usize {
        self.messages.values().map(BTreeMap::len).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToDeviceResponse {}

// ---------------------------------------------------------------------------
// /sync (nur die fuer die Verschluesselung relevanten Teile)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub to_device: ToDevice,
    #[serde(default)]
    pub device_lists: DeviceLists,
    #[serde(default)]
    pub device_one_time_keys_count: BTreeMap<DeviceKeyAlgorithm, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToDevice {
    #[serde(default)]
    pub events: Vec<Value>,
}

/// Benutzer, deren Geraeteliste sich geaendert hat bzw. die keinen
/// gemeinsamen verschluesselten Raum mehr haben
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLists {
    #[serde(default)]
    pub changed: Vec<String>,
    #[serde(default)]
    pub left: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
