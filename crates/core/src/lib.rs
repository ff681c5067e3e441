//! nio-core – Gemeinsame Typen, Protokoll-Schemata und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von den
//! uebrigen nio-Crates gemeinsam genutzt werden:
//!
//! - `types` - Identifikatoren (UserId, DeviceId, RoomId) und Algorithmus-Namen
//! - `api` - Schemata der Key-Upload/Query/Claim- und To-Device-Endpunkte
//! - `event` - Verschluesselte Event-Inhalte und To-Device-Events
//! - `error` - Fehler beim Parsen von Identifikatoren

pub mod api;
pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{CoreError, CoreResult};
pub use types::{DeviceId, DeviceKeyAlgorithm, EventEncryptionAlgorithm, RoomId, UserId};
