//! # nio-crypto
//!
//! Ende-zu-Ende-Verschluesselung fuer nio.
//!
//! ## Module
//! - `machine` - `OlmMachine`, der zentrale Einstiegspunkt
//! - `olm` - Account, Einmalschluessel und paarweise Olm-Sitzungen
//! - `megolm` - Gruppensitzungen fuer Raum-Events
//! - `identities` - Geraete anderer Benutzer, Key-Query-Tracking
//! - `session_manager` - Aufbau von Olm-Sitzungen ueber geclaimte Schluessel
//! - `group_sessions` - Verteilung und Rotation der Raum-Schluessel
//! - `requests` - Warteschlange ausgehender Anfragen
//! - `store` - Speicher-Trait und In-Memory-Implementierung
//! - `config` - TOML-Konfiguration
//! - `signatures` - Kanonisches JSON und Ed25519-Signaturpruefung
//! - `types` - Gemeinsame Typen (oeffentliche Schluessel, Base64)
//! - `error` - Fehlertypen

pub mod config;
pub mod error;
pub mod group_sessions;
pub mod identities;
pub mod machine;
pub mod megolm;
pub mod olm;
pub mod requests;
pub mod session_manager;
pub mod signatures;
pub mod store;
pub mod types;

// Bequeme Re-Exports
pub use config::MachineConfig;
pub use error::{CryptoError, CryptoResult};
pub use group_sessions::DecryptedRoomEvent;
pub use identities::{DeviceChanges, DeviceRecord, TrustState};
pub use machine::OlmMachine;
pub use megolm::EncryptionSettings;
pub use requests::{IncomingResponse, OutgoingRequest, OutgoingRequests, RequestState, RequestType};
pub use session_manager::SessionState;
pub use store::{CryptoStore, MemoryStore};
pub use types::{Curve25519PublicKey, Ed25519PublicKey, IdentityKeys};
