//! Fehlertypen fuer nio-core
//!
//! Deckt Fehler beim Validieren von Identifikatoren und Schluessel-IDs ab.
//! Die hoeheren Crates konvertieren sie via `#[from]`.

use thiserror::Error;

/// Result-Alias fuer nio-core
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Fehler beim Umgang mit Protokoll-Identifikatoren
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    // --- Identifikatoren ---
    #[error("Ungueltige User-ID: '{0}'")]
    UngueltigeUserId(String),

    #[error("Ungueltige Geraete-ID: '{0}'")]
    UngueltigeDeviceId(String),

    #[error("Ungueltige Raum-ID: '{0}'")]
    UngueltigeRoomId(String),

    // --- Schluessel ---
    #[error("Ungueltige Schluessel-ID: '{0}'")]
    UngueltigeSchluesselId(String),
}
