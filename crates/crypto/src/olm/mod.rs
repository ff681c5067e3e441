//! Paarweise Olm-Sitzungen
//!
//! - `account` - Identitaet und Einmalschluessel des eigenen Geraets
//! - `session` - Sitzung mit genau einem fremden Geraet
//! - `messages` - Pre-Key- und normale Nachrichten

pub mod account;
pub mod messages;
pub mod session;

pub use account::Account;
pub use messages::{Message, OlmMessage, PreKeyMessage};
pub use session::OlmSession;
