//! Fehlertypen fuer das Kryptografie-Subsystem

use nio_core::{CoreError, DeviceId, RoomId, UserId};
use thiserror::Error;
use uuid::Uuid;

/// Fehler im Kryptografie-Subsystem
#[derive(Debug, Error)]
pub enum CryptoError {
    // --- Protokoll & Anfragen ---
    #[error("Fehlerhafte Antwort: {0}")]
    MalformedResponse(String),

    #[error("Unbekannte Anfrage {request_id} ({request_type})")]
    UnknownRequest { request_id: Uuid, request_type: String },

    // --- Geraete & Sitzungen ---
    #[error("Unbekanntes Geraet {device_id} von {user_id}")]
    UnknownDevice { user_id: UserId, device_id: DeviceId },

    #[error("Geraet {device_id} von {user_id} wurde geloescht")]
    DeletedDevice { user_id: UserId, device_id: DeviceId },

    #[error("Schluesselwechsel bei Geraet {device_id} von {user_id}")]
    KeyMismatch { user_id: UserId, device_id: DeviceId },

    #[error("Keine ausgehende Gruppensitzung fuer Raum {0}")]
    NoOutboundSession(RoomId),

    #[error("Keine Olm-Sitzung mit Geraet {device_id} von {user_id}")]
    NoOlmSession { user_id: UserId, device_id: DeviceId },

    #[error("Unbekannte Gruppensitzung {session_id} in Raum {room_id}")]
    UnknownSession { room_id: RoomId, session_id: String },

    #[error("Replay erkannt in Sitzung {session_id}: Index {index}, bisher hoechster {hoechster}")]
    Replay { session_id: String, index: u32, hoechster: u32 },

    // --- Olm/Megolm ---
    #[error("Olm-Sitzung konnte nicht erstellt werden: {0}")]
    OlmSessionCreation(#[from] vodozemac::olm::SessionCreationError),

    #[error("Olm-Entschluesselung fehlgeschlagen: {0}")]
    OlmDecryption(#[from] vodozemac::olm::DecryptionError),

    #[error("Megolm-Entschluesselung fehlgeschlagen: {0}")]
    MegolmDecryption(#[from] vodozemac::megolm::DecryptionError),

    #[error("Ungueltiger Sitzungsschluessel: {0}")]
    SessionKey(#[from] vodozemac::megolm::SessionKeyDecodeError),

    #[error("Entschluesselung fehlgeschlagen: {0}")]
    Entschluesselung(String),

    #[error("Signatur-Verifikation fehlgeschlagen: {0}")]
    SignaturVerifikation(String),

    #[error("Ungueltige Schluessel-Laenge: erwartet {erwartet}, erhalten {erhalten}")]
    UngueltigeSchluesselLaenge { erwartet: usize, erhalten: usize },

    #[error("Ungueltige Daten: {0}")]
    UngueltigeDaten(String),

    // --- Konvertierung ---
    #[error("Base64-Dekodierung fehlgeschlagen: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Id(#[from] CoreError),

    // --- Speicher ---
    #[error("Speicherfehler: {0}")]
    Store(String),
}

impl CryptoError {
    /// Sicherheitsrelevante Ereignisse, die nie automatisch aufgeloest werden
    pub fn ist_sicherheitsereignis(&self) -> bool {
        matches!(
            self,
            CryptoError::KeyMismatch { .. }
                | CryptoError::Replay { .. }
                | CryptoError::SignaturVerifikation(_)
        )
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;
