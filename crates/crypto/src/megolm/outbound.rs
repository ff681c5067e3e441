//! Ausgehende Megolm-Gruppensitzung eines Raums

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use vodozemac::megolm::{GroupSession, SessionConfig};

use nio_core::{DeviceId, RoomId, UserId};

use crate::error::{CryptoError, CryptoResult};
use crate::types::Curve25519PublicKey;

/// Rotations-Schwellen einer Gruppensitzung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionSettings {
    /// Maximales Alter einer Sitzung
    pub rotation_period: Duration,
    /// Maximale Anzahl verschluesselter Nachrichten
    pub rotation_period_msgs: u64,
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            rotation_period: Duration::from_secs(7 * 24 * 60 * 60),
            rotation_period_msgs: 100,
        }
    }
}

/// Mit welchem Geraeteschluessel und ab welchem Index ein Geraet den
/// Sitzungsschluessel erhalten hat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareInfo {
    pub sender_key: Curve25519PublicKey,
    pub message_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareState {
    /// To-Device-Anfrage bestaetigt
    Shared(ShareInfo),
    /// To-Device-Anfrage erstellt, aber noch nicht bestaetigt
    Pending(ShareInfo),
    NotShared,
}

pub struct OutboundGroupSession {
    inner: GroupSession,
    room_id: RoomId,
    session_id: String,
    created_at: DateTime<Utc>,
    message_count: u64,
    settings: EncryptionSettings,
    members: BTreeSet<UserId>,
    shared_with: BTreeMap<(UserId, DeviceId), ShareInfo>,
    pending_shares: BTreeMap<Uuid, BTreeMap<(UserId, DeviceId), ShareInfo>>,
    invalidated: bool,
}

impl Clone for OutboundGroupSession {
    fn clone(&self) -> Self {
        Self {
            inner: GroupSession::from_pickle(self.inner.pickle()),
            room_id: self.room_id.clone(),
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            message_count: self.message_count,
            settings: self.settings,
            members: self.members.clone(),
            shared_with: self.shared_with.clone(),
            pending_shares: self.pending_shares.clone(),
            invalidated: self.invalidated,
        }
    }
}

impl OutboundGroupSession {
    pub fn new(room_id: RoomId, settings: EncryptionSettings) -> Self {
        let inner = GroupSession::new(SessionConfig::version_1());
        Self {
            session_id: inner.session_id(),
            inner,
            room_id,
            created_at: Utc::now(),
            message_count: 0,
            settings,
            members: BTreeSet::new(),
            shared_with: BTreeMap::new(),
            pending_shares: BTreeMap::new(),
            invalidated: false,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Index der naechsten Nachricht
    pub fn message_index(&self) -> u32 {
        self.inner.message_index()
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn settings(&self) -> &EncryptionSettings {
        &self.settings
    }

    /// Alter- oder Nachrichten-Schwelle ueberschritten
    pub fn expired(&self) -> bool {
        if self.message_count >= self.settings.rotation_period_msgs {
            return true;
        }
        let alter = Utc::now().signed_duration_since(self.created_at);
        alter
            .to_std()
            .map(|alter| alter >= self.settings.rotation_period)
            .unwrap_or(false)
    }

    pub fn invalidated(&self) -> bool {
        self.invalidated
    }

    /// Erzwingt eine Rotation beim naechsten Teilen
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Darf noch verschluesseln
    pub fn is_usable(&self) -> bool {
        !self.invalidated && !self.expired()
    }

    pub fn members(&self) -> &BTreeSet<UserId> {
        &self.members
    }

    pub fn set_members(&mut self, members: BTreeSet<UserId>) {
        self.members = members;
    }

    /// Exportiert den Sitzungsschluessel ab dem aktuellen Index
    pub fn session_key(&self) -> String {
        self.inner.session_key().to_base64()
    }

    /// Verschluesselt einen Klartext und gibt die Base64-Nachricht zurueck
    pub fn encrypt(&mut self, plaintext: &[u8]) -> CryptoResult<String> {
        if !self.is_usable() {
            return Err(CryptoError::NoOutboundSession(self.room_id.clone()));
        }

        let message = self.inner.encrypt(plaintext);
        self.message_count += 1;
        Ok(message.to_base64())
    }

    pub fn share_state(&self, user_id: &UserId, device_id: &DeviceId) -> ShareState {
        let key = (user_id.clone(), device_id.clone());
        if let Some(info) = self.shared_with.get(&key) {
            return ShareState::Shared(*info);
        }
        self.pending_shares
            .values()
            .find_map(|devices| devices.get(&key))
            .map_or(ShareState::NotShared, |info| ShareState::Pending(*info))
    }

    /// Alle Geraete, die den Schluessel erhalten haben oder gerade erhalten
    pub fn recipients(&self) -> BTreeSet<(UserId, DeviceId)> {
        self.shared_with
            .keys()
            .chain(self.pending_shares.values().flat_map(BTreeMap::keys))
            .cloned()
            .collect()
    }

    pub fn add_pending_share(
        &mut self,
        request_id: Uuid,
        devices: BTreeMap<(UserId, DeviceId), ShareInfo>,
    ) {
        self.pending_shares.insert(request_id, devices);
    }

    pub fn has_pending_request(&self, request_id: &Uuid) -> bool {
        self.pending_shares.contains_key(request_id)
    }

    pub fn pending_request_ids(&self) -> Vec<Uuid> {
        self.pending_shares.keys().copied().collect()
    }

    /// Die To-Device-Anfrage wurde zugestellt
    pub fn mark_request_as_sent(&mut self, request_id: &Uuid) -> bool {
        match self.pending_shares.remove(request_id) {
            Some(devices) => {
                self.shared_with.extend(devices);
                true
            }
            None => false,
        }
    }

    /// Verwirft eine ausstehende Verteilung; die Geraete gelten wieder als
    /// nicht versorgt
    pub fn discard_pending_share(&mut self, request_id: &Uuid) -> bool {
        self.pending_shares.remove(request_id).is_some()
    }
}

impl std::fmt::Debug for OutboundGroupSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundGroupSession")
            .field("room_id", &self.room_id)
            .field("session_id", &self.session_id)
            .field("message_index", &self.message_index())
            .field("message_count", &self.message_count)
            .field("invalidated", &self.invalidated)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
