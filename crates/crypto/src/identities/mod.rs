//! Geraete anderer Benutzer
//!
//! - `device` - ein validierter Geraete-Datensatz mit Vertrauensstatus
//! - `store` - Uebernahme von Key-Query-Ergebnissen, Schluesselwechsel
//! - `key_query` - verfolgte Benutzer und ihre Dirty-Flags

pub mod device;
pub mod key_query;
pub mod store;

pub use device::{DeviceRecord, TrustState};
pub use key_query::KeyQueryManager;
pub use store::{DeviceChanges, DeviceStore};
