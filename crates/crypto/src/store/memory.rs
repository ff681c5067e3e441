//! In-Memory-Implementierung des `CryptoStore`

use std::collections::BTreeMap;

use dashmap::DashMap;
use parking_lot::Mutex;

use nio_core::{DeviceId, RoomId, UserId};

use crate::error::CryptoResult;
use crate::identities::DeviceRecord;
use crate::megolm::{InboundGroupSession, OutboundGroupSession};
use crate::olm::{Account, OlmSession};
use crate::store::CryptoStore;
use crate::types::Curve25519PublicKey;

/// Standard-Obergrenze fuer Olm-Sitzungen pro Geraet
pub const DEFAULT_MAX_SESSIONS_PER_DEVICE: usize = 20;

/// Haelt den gesamten Zustand im Speicher.
///
/// Pro Geraet werden hoechstens `max_sessions_per_device` Olm-Sitzungen
/// behalten; die aeltesten werden zuerst verdraengt.
#[derive(Debug)]
pub struct MemoryStore {
    account: Mutex<Option<Account>>,
    devices: DashMap<UserId, BTreeMap<DeviceId, DeviceRecord>>,
    sessions: DashMap<Curve25519PublicKey, Vec<OlmSession>>,
    inbound_group_sessions: DashMap<(RoomId, Curve25519PublicKey, String), InboundGroupSession>,
    outbound_group_sessions: DashMap<RoomId, OutboundGroupSession>,
    tracked_users: DashMap<UserId, bool>,
    max_sessions_per_device: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_session_limit(DEFAULT_MAX_SESSIONS_PER_DEVICE)
    }

    pub fn with_session_limit(max_sessions_per_device: usize) -> Self {
        Self {
            account: Mutex::new(None),
            devices: DashMap::new(),
            sessions: DashMap::new(),
            inbound_group_sessions: DashMap::new(),
            outbound_group_sessions: DashMap::new(),
            tracked_users: DashMap::new(),
            max_sessions_per_device: max_sessions_per_device.max(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoStore for MemoryStore {
    fn load_account(&self) -> CryptoResult<Option<Account>> {
        Ok(self.account.lock().clone())
    }

    fn save_account(&self, account: &Account) -> CryptoResult<()> {
        *self.account.lock() = Some(account.clone());
        Ok(())
    }

    fn get_device(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> CryptoResult<Option<DeviceRecord>> {
        Ok(self
            .devices
            .get(user_id)
            .and_then(|devices| devices.get(device_id).cloned()))
    }

    fn get_user_devices(&self, user_id: &UserId) -> CryptoResult<BTreeMap<DeviceId, DeviceRecord>> {
        Ok(self
            .devices
            .get(user_id)
            .map(|devices| devices.clone())
            .unwrap_or_default())
    }

    fn save_devices(&self, devices: &[DeviceRecord]) -> CryptoResult<()> {
        for device in devices {
            self.devices
                .entry(device.user_id.clone())
                .or_default()
                .insert(device.device_id.clone(), device.clone());
        }
        Ok(())
    }

    fn get_sessions(&self, sender_key: &Curve25519PublicKey) -> CryptoResult<Vec<OlmSession>> {
        Ok(self
            .sessions
            .get(sender_key)
            .map(|sessions| sessions.clone())
            .unwrap_or_default())
    }

    fn save_sessions(&self, sessions: &[OlmSession]) -> CryptoResult<()> {
        for session in sessions {
            let mut eintrag = self.sessions.entry(session.sender_key()).or_default();
            match eintrag
                .iter_mut()
                .find(|s| s.session_id() == session.session_id())
            {
                Some(vorhanden) => *vorhanden = session.clone(),
                None => eintrag.push(session.clone()),
            }

            if eintrag.len() > self.max_sessions_per_device {
                eintrag.sort_by_key(|s| s.created_at());
                let ueberzaehlig = eintrag.len() - self.max_sessions_per_device;
                eintrag.drain(..ueberzaehlig);
                tracing::debug!(
                    sender_key = %session.sender_key(),
                    verdraengt = ueberzaehlig,
                    "Alte Olm-Sitzungen verdraengt"
                );
            }
        }
        Ok(())
    }

    fn get_inbound_group_session(
        &self,
        room_id: &RoomId,
        sender_key: &Curve25519PublicKey,
        session_id: &str,
    ) -> CryptoResult<Option<InboundGroupSession>> {
        Ok(self
            .inbound_group_sessions
            .get(&(room_id.clone(), *sender_key, session_id.to_string()))
            .map(|s| s.clone()))
    }

    fn save_inbound_group_sessions(&self, sessions: &[InboundGroupSession]) -> CryptoResult<()> {
        for session in sessions {
            self.inbound_group_sessions.insert(
                (
                    session.room_id().clone(),
                    session.sender_key(),
                    session.session_id().to_string(),
                ),
                session.clone(),
            );
        }
        Ok(())
    }

    fn get_outbound_group_session(
        &self,
        room_id: &RoomId,
    ) -> CryptoResult<Option<OutboundGroupSession>> {
        Ok(self.outbound_group_sessions.get(room_id).map(|s| s.clone()))
    }

    fn get_outbound_group_sessions(&self) -> CryptoResult<Vec<OutboundGroupSession>> {
        Ok(self
            .outbound_group_sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn save_outbound_group_session(&self, session: &OutboundGroupSession) -> CryptoResult<()> {
        self.outbound_group_sessions
            .insert(session.room_id().clone(), session.clone());
        Ok(())
    }

    fn load_tracked_users(&self) -> CryptoResult<BTreeMap<UserId, bool>> {
        Ok(self
            .tracked_users
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect())
    }

    fn save_tracked_users(&self, users: &[(UserId, bool)]) -> CryptoResult<()> {
        for (user_id, dirty) in users {
            self.tracked_users.insert(user_id.clone(), *dirty);
        }
        Ok(())
    }

    fn remove_tracked_users(&self, users: &[UserId]) -> CryptoResult<()> {
        for user_id in users {
            self.tracked_users.remove(user_id);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
