//! Megolm-Gruppensitzungen fuer Raum-Events
//!
//! Pro Raum gibt es genau eine ausgehende Sitzung. Ihr Sitzungsschluessel
//! wird ueber Olm an alle Mitglieder-Geraete verteilt, die daraus eine
//! eingehende Sitzung erstellen. Ratchet und Nachrichtenformat stammen aus
//! vodozemac.

pub mod inbound;
pub mod outbound;

pub use inbound::InboundGroupSession;
pub use outbound::{EncryptionSettings, OutboundGroupSession, ShareInfo, ShareState};
pub use vodozemac::megolm::{MegolmMessage, SessionKey, SessionOrdering};
