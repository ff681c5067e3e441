//! Speicher fuer den kryptografischen Zustand
//!
//! Das `CryptoStore`-Trait abstrahiert die Persistenz (Speicher, Datenbank,
//! ...). Es ist ein reiner Get/Put-Vertrag; Logik wie Schluesselwechsel-
//! Erkennung oder Replay-Schutz liegt in den Managern darueber.

mod memory;

pub use memory::{MemoryStore, DEFAULT_MAX_SESSIONS_PER_DEVICE};

use std::collections::BTreeMap;

use nio_core::{DeviceId, RoomId, UserId};

use crate::error::CryptoResult;
use crate::identities::DeviceRecord;
use crate::megolm::{InboundGroupSession, OutboundGroupSession};
use crate::olm::{Account, OlmSession};
use crate::types::Curve25519PublicKey;

/// Abstraktes Speicher-Backend fuer Account, Geraete und Sitzungen
pub trait CryptoStore: Send + Sync + std::fmt::Debug {
    /// Gespeicherten Account laden
    fn load_account(&self) -> CryptoResult<Option<Account>>;

    /// Account speichern (ueberschreibt)
    fn save_account(&self, account: &Account) -> CryptoResult<()>;

    fn get_device(&self, user_id: &UserId, device_id: &DeviceId)
        -> CryptoResult<Option<DeviceRecord>>;

    /// Alle Geraete eines Benutzers (auch geloeschte)
    fn get_user_devices(&self, user_id: &UserId) -> CryptoResult<BTreeMap<DeviceId, DeviceRecord>>;

    fn save_devices(&self, devices: &[DeviceRecord]) -> CryptoResult<()>;

    /// Olm-Sitzungen mit dem Geraet, das diesen Identitaetsschluessel besitzt
    fn get_sessions(&self, sender_key: &Curve25519PublicKey) -> CryptoResult<Vec<OlmSession>>;

    /// Olm-Sitzungen speichern (Upsert nach Sitzungs-ID)
    fn save_sessions(&self, sessions: &[OlmSession]) -> CryptoResult<()>;

    /// Eingehende Gruppensitzung nach Raum, verteilendem Geraet und Sitzungs-ID
    fn get_inbound_group_session(
        &self,
        room_id: &RoomId,
        sender_key: &Curve25519PublicKey,
        session_id: &str,
    ) -> CryptoResult<Option<InboundGroupSession>>;

    fn save_inbound_group_sessions(&self, sessions: &[InboundGroupSession]) -> CryptoResult<()>;

    fn get_outbound_group_session(&self, room_id: &RoomId)
        -> CryptoResult<Option<OutboundGroupSession>>;

    fn get_outbound_group_sessions(&self) -> CryptoResult<Vec<OutboundGroupSession>>;

    fn save_outbound_group_session(&self, session: &OutboundGroupSession) -> CryptoResult<()>;

    /// Verfolgte Benutzer mit Dirty-Flag
    fn load_tracked_users(&self) -> CryptoResult<BTreeMap<UserId, bool>>;

    fn save_tracked_users(&self, users: &[(UserId, bool)]) -> CryptoResult<()>;

    fn remove_tracked_users(&self, users: &[UserId]) -> CryptoResult<()>;
}
