//! Event-Inhalte fuer verschluesselte Kommunikation
//!
//! To-Device-Events transportieren paarweise Olm-Nachrichten (z.B. Raum-
//! Schluessel), Raum-Events werden mit Megolm verschluesselt.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{DeviceId, EventEncryptionAlgorithm, RoomId, UserId};

/// Event-Typ verschluesselter Events (Raum und To-Device)
pub const ROOM_ENCRYPTED: &str = "m.room.encrypted";
/// Event-Typ eines verteilten Megolm-Sitzungsschluessels
pub const ROOM_KEY: &str = "m.room_key";
/// Standard-Event-Typ fuer Raumnachrichten
pub const ROOM_MESSAGE: &str = "m.room.message";

/// Ein To-Device-Event aus der Sync-Antwort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToDeviceEvent {
    pub sender: UserId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub content: Value,
}

/// Ciphertext fuer genau ein Empfaenger-Geraet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OlmCiphertextInfo {
    /// 0 = Pre-Key-Nachricht, 1 = normale Nachricht
    #[serde(rename = "type")]
    pub message_type: u8,
    pub body: String,
}

/// Inhalt eines Olm-verschluesselten To-Device-Events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OlmV1Content {
    pub algorithm: EventEncryptionAlgorithm,
    /// Curve25519-Identitaetsschluessel des Absenders
    pub sender_key: String,
    /// Empfaenger-Curve25519-Schluessel -> Ciphertext
    pub ciphertext: BTreeMap<String, OlmCiphertextInfo>,
}

/// Inhalt eines Megolm-verschluesselten Raum-Events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MegolmV1Content {
    pub algorithm: EventEncryptionAlgorithm,
    pub sender_key: String,
    pub ciphertext: String,
    pub session_id: String,
    pub device_id: DeviceId,
}

/// Inhalt eines `m.room_key`-Events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomKeyContent {
    pub algorithm: EventEncryptionAlgorithm,
    pub room_id: RoomId,
    pub session_id: String,
    pub session_key: String,
}

/// Ed25519-Schluessel in Klartext-Payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ed25519Keys {
    pub ed25519: String,
}

/// Klartext einer Olm-Nachricht.
///
/// Absender und Empfaenger werden mitsigniert, damit ein Event nicht an ein
/// anderes Geraet umgeleitet werden kann.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecryptedOlmEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub content: Value,
    pub sender: UserId,
    pub sender_device: DeviceId,
    pub keys: Ed25519Keys,
    pub recipient: UserId,
    pub recipient_keys: Ed25519Keys,
}

/// Klartext einer Megolm-Nachricht
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecryptedRoomPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    pub content: Value,
    pub room_id: RoomId,
}
