//! Gruppen-Sitzungs-Verwaltung
//!
//! Verwaltet die Megolm-Sitzungen pro Raum:
//! - Erstellen neuer Sitzungen beim ersten Teilen
//! - Verteilen des Sitzungsschluessels an Mitglieder-Geraete (ueber Olm)
//! - Rotation bei Austritt, neuen unverifizierten Geraeten und Schwellen
//! - Import empfangener Raum-Schluessel

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use nio_core::api::ToDeviceRequest;
use nio_core::event::{
    DecryptedOlmEvent, DecryptedRoomPayload, MegolmV1Content, RoomKeyContent, ROOM_ENCRYPTED,
    ROOM_KEY,
};
use nio_core::{DeviceId, EventEncryptionAlgorithm, RoomId, UserId};

use crate::error::{CryptoError, CryptoResult};
use crate::identities::{DeviceChanges, DeviceRecord, DeviceStore, TrustState};
use crate::megolm::{
    EncryptionSettings, InboundGroupSession, OutboundGroupSession, SessionOrdering, ShareInfo,
    ShareState,
};
use crate::olm::Account;
use crate::session_manager::SessionManager;
use crate::store::CryptoStore;
use crate::types::Curve25519PublicKey;

/// Standard-Obergrenze fuer Nachrichten pro To-Device-Anfrage
pub const DEFAULT_MAX_MESSAGES_PER_REQUEST: usize = 250;

/// Entschluesseltes Raum-Event
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedRoomEvent {
    pub room_id: RoomId,
    pub event_type: String,
    pub content: Value,
    /// Curve25519-Schluessel des sendenden Geraets
    pub sender_key: Curve25519PublicKey,
    pub session_id: String,
    pub message_index: u32,
}

/// Verwaltet ausgehende und eingehende Gruppensitzungen
#[derive(Debug)]
pub struct GroupSessionManager {
    store: Arc<dyn CryptoStore>,
    settings: EncryptionSettings,
    max_messages_per_request: usize,
}

impl GroupSessionManager {
    pub fn new(
        store: Arc<dyn CryptoStore>,
        settings: EncryptionSettings,
        max_messages_per_request: usize,
    ) -> Self {
        Self {
            store,
            settings,
            max_messages_per_request: max_messages_per_request.max(1),
        }
    }

    pub fn outbound_session(&self, room_id: &RoomId) -> CryptoResult<Option<OutboundGroupSession>> {
        self.store.get_outbound_group_session(room_id)
    }

    /// Geraete der Benutzer, die den Schluessel erhalten duerfen
    fn eligible_devices<'a>(
        users: impl IntoIterator<Item = &'a UserId>,
        devices: &DeviceStore,
    ) -> CryptoResult<Vec<DeviceRecord>> {
        let mut result = Vec::new();
        for user_id in users {
            for (device_id, device) in devices.devices_for_user(user_id)? {
                if devices.is_own_device(user_id, &device_id) || !device.is_eligible_recipient() {
                    continue;
                }
                result.push(device);
            }
        }
        Ok(result)
    }

    /// Muss der Sitzungsschluessel (erneut) verteilt werden?
    ///
    /// Ja, wenn keine nutzbare Sitzung existiert oder ein berechtigtes
    /// Geraet eines Mitglieds den aktuellen Schluessel noch nicht hat.
    pub fn should_share_group_session(
        &self,
        room_id: &RoomId,
        users: &BTreeSet<UserId>,
        devices: &DeviceStore,
    ) -> CryptoResult<bool> {
        let Some(session) = self.store.get_outbound_group_session(room_id)? else {
            return Ok(true);
        };
        if !session.is_usable() {
            return Ok(true);
        }
        if session.recipients().iter().any(|(user_id, _)| !users.contains(user_id)) {
            return Ok(true);
        }
        Ok(Self::eligible_devices(users, devices)?
            .iter()
            .any(|d| session.share_state(&d.user_id, &d.device_id) == ShareState::NotShared))
    }

    /// Erstellt eine neue ausgehende Sitzung samt eigener eingehender Sitzung
    pub fn create_session(
        &self,
        room_id: &RoomId,
        account: &Account,
    ) -> CryptoResult<OutboundGroupSession> {
        let outbound = OutboundGroupSession::new(room_id.clone(), self.settings);
        let inbound = InboundGroupSession::new(
            room_id.clone(),
            account.identity_keys().curve25519,
            &outbound.session_key(),
        )?;
        self.store.save_inbound_group_sessions(&[inbound])?;
        self.store.save_outbound_group_session(&outbound)?;

        tracing::info!(
            room_id = %room_id,
            session_id = %outbound.session_id(),
            "Neue Gruppensitzung erstellt"
        );
        Ok(outbound)
    }

    /// Verteilt den Sitzungsschluessel an alle Geraete der Benutzer, die ihn
    /// noch nicht haben. Geraete ohne Olm-Sitzung werden uebersprungen.
    pub fn share_group_session(
        &self,
        room_id: &RoomId,
        users: &BTreeSet<UserId>,
        account: &Account,
        devices: &DeviceStore,
        sessions: &SessionManager,
    ) -> CryptoResult<Vec<ToDeviceRequest>> {
        let mut session = match self.store.get_outbound_group_session(room_id)? {
            Some(session) if !session.is_usable() => {
                tracing::info!(
                    room_id = %room_id,
                    session_id = %session.session_id(),
                    abgelaufen = session.expired(),
                    "Gruppensitzung wird rotiert"
                );
                self.create_session(room_id, account)?
            }
            Some(session)
                if session
                    .recipients()
                    .iter()
                    .any(|(user_id, _)| !users.contains(user_id)) =>
            {
                tracing::info!(
                    room_id = %room_id,
                    session_id = %session.session_id(),
                    "Mitglied hat den Raum verlassen, Gruppensitzung wird rotiert"
                );
                self.create_session(room_id, account)?
            }
            Some(session) => session,
            None => self.create_session(room_id, account)?,
        };
        session.set_members(users.clone());

        let room_key = serde_json::to_value(RoomKeyContent {
            algorithm: EventEncryptionAlgorithm::MegolmV1AesSha2,
            room_id: room_id.clone(),
            session_id: session.session_id().to_string(),
            session_key: session.session_key(),
        })?;
        let message_index = session.message_index();

        let mut nachrichten = Vec::new();
        for device in Self::eligible_devices(users, devices)? {
            if session.share_state(&device.user_id, &device.device_id) != ShareState::NotShared {
                continue;
            }
            match sessions.encrypt(account, &device, ROOM_KEY, room_key.clone()) {
                Ok(content) => nachrichten.push((
                    device.user_id.clone(),
                    device.device_id.clone(),
                    serde_json::to_value(content)?,
                    ShareInfo {
                        sender_key: device.keys.curve25519,
                        message_index,
                    },
                )),
                Err(CryptoError::NoOlmSession { user_id, device_id }) => {
                    tracing::debug!(
                        user_id = %user_id,
                        device_id = %device_id,
                        "Keine Olm-Sitzung, Geraet erhaelt den Raum-Schluessel spaeter"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let mut requests = Vec::new();
        for chunk in nachrichten.chunks(self.max_messages_per_request) {
            let txn_id = Uuid::new_v4();
            let mut messages: BTreeMap<UserId, BTreeMap<DeviceId, Value>> = BTreeMap::new();
            let mut empfaenger = BTreeMap::new();
            for (user_id, device_id, content, info) in chunk {
                messages
                    .entry(user_id.clone())
                    .or_default()
                    .insert(device_id.clone(), content.clone());
                empfaenger.insert((user_id.clone(), device_id.clone()), *info);
            }
            session.add_pending_share(txn_id, empfaenger);
            requests.push(ToDeviceRequest {
                event_type: ROOM_ENCRYPTED.to_string(),
                txn_id,
                messages,
            });
        }

        self.store.save_outbound_group_session(&session)?;
        tracing::debug!(
            room_id = %room_id,
            session_id = %session.session_id(),
            geraete = nachrichten.len(),
            anfragen = requests.len(),
            "Raum-Schluessel verteilt"
        );
        Ok(requests)
    }

    /// Verschluesselt ein Raum-Event mit der aktuellen Sitzung
    pub fn encrypt(
        &self,
        room_id: &RoomId,
        event_type: &str,
        content: Value,
        account: &Account,
    ) -> CryptoResult<MegolmV1Content> {
        let mut session = self
            .store
            .get_outbound_group_session(room_id)?
            .ok_or_else(|| CryptoError::NoOutboundSession(room_id.clone()))?;

        let payload = DecryptedRoomPayload {
            event_type: event_type.to_string(),
            content,
            room_id: room_id.clone(),
        };
        let ciphertext = session.encrypt(&serde_json::to_vec(&payload)?)?;
        self.store.save_outbound_group_session(&session)?;

        Ok(MegolmV1Content {
            algorithm: EventEncryptionAlgorithm::MegolmV1AesSha2,
            sender_key: account.identity_keys().curve25519.to_base64(),
            ciphertext,
            session_id: session.session_id().to_string(),
            device_id: account.device_id().clone(),
        })
    }

    /// Entschluesselt ein Megolm-Raum-Event
    pub fn decrypt(
        &self,
        room_id: &RoomId,
        content: &MegolmV1Content,
    ) -> CryptoResult<DecryptedRoomEvent> {
        if content.algorithm != EventEncryptionAlgorithm::MegolmV1AesSha2 {
            return Err(CryptoError::UngueltigeDaten(format!(
                "unerwarteter Algorithmus {}",
                content.algorithm
            )));
        }

        let sender_key = Curve25519PublicKey::from_base64(&content.sender_key)?;
        let mut session = self
            .store
            .get_inbound_group_session(room_id, &sender_key, &content.session_id)?
            .ok_or_else(|| CryptoError::UnknownSession {
                room_id: room_id.clone(),
                session_id: content.session_id.clone(),
            })?;

        let (plaintext, message_index) = session.decrypt(&content.ciphertext)?;
        let payload: DecryptedRoomPayload = serde_json::from_slice(&plaintext)?;
        if &payload.room_id != room_id {
            return Err(CryptoError::UngueltigeDaten(format!(
                "Event fuer Raum {} in Raum {room_id} empfangen",
                payload.room_id
            )));
        }
        self.store.save_inbound_group_sessions(&[session])?;

        Ok(DecryptedRoomEvent {
            room_id: room_id.clone(),
            event_type: payload.event_type,
            content: payload.content,
            sender_key,
            session_id: content.session_id.clone(),
            message_index,
        })
    }

    /// Importiert einen per Olm empfangenen `m.room_key`.
    ///
    /// Sitzungen sind an das verteilende Geraet gebunden: derselbe
    /// Sitzungsschluessel von einem anderen Geraet landet in einem eigenen
    /// Eintrag. Eine vorhandene Kopie wird nur durch eine bessere (frueherer
    /// erster Index) ersetzt, die bisherige Replay-Grenze bleibt erhalten.
    pub fn receive_room_key(
        &self,
        sender_key: Curve25519PublicKey,
        event: &DecryptedOlmEvent,
    ) -> CryptoResult<bool> {
        let content: RoomKeyContent = serde_json::from_value(event.content.clone())?;
        if content.algorithm != EventEncryptionAlgorithm::MegolmV1AesSha2 {
            return Err(CryptoError::UngueltigeDaten(format!(
                "Raum-Schluessel mit Algorithmus {}",
                content.algorithm
            )));
        }

        let mut session =
            InboundGroupSession::new(content.room_id.clone(), sender_key, &content.session_key)?;
        if session.session_id() != content.session_id {
            return Err(CryptoError::UngueltigeDaten(format!(
                "Sitzungs-ID {} passt nicht zum Sitzungsschluessel",
                content.session_id
            )));
        }

        if let Some(mut vorhanden) = self.store.get_inbound_group_session(
            &content.room_id,
            &sender_key,
            session.session_id(),
        )? {
            match session.compare(&mut vorhanden) {
                SessionOrdering::Better => session.inherit_replay_state(&vorhanden),
                SessionOrdering::Equal | SessionOrdering::Worse => {
                    tracing::debug!(
                        room_id = %content.room_id,
                        session_id = %content.session_id,
                        "Raum-Schluessel bereits bekannt"
                    );
                    return Ok(false);
                }
                SessionOrdering::Unconnected => {
                    tracing::warn!(
                        room_id = %content.room_id,
                        session_id = %content.session_id,
                        sender_key = %sender_key,
                        "Raum-Schluessel passt nicht zur vorhandenen Sitzung"
                    );
                    return Err(CryptoError::UngueltigeDaten(format!(
                        "Sitzungsschluessel fuer {} widerspricht der vorhandenen Sitzung",
                        content.session_id
                    )));
                }
            }
        }

        tracing::info!(
            room_id = %content.room_id,
            session_id = %content.session_id,
            sender = %event.sender,
            index = session.first_known_index(),
            "Raum-Schluessel importiert"
        );
        self.store.save_inbound_group_sessions(&[session])?;
        Ok(true)
    }

    fn session_for_request(&self, request_id: &Uuid) -> CryptoResult<Option<OutboundGroupSession>> {
        Ok(self
            .store
            .get_outbound_group_sessions()?
            .into_iter()
            .find(|s| s.has_pending_request(request_id)))
    }

    /// Die To-Device-Anfrage wurde zugestellt: Empfaenger gelten als versorgt
    pub fn mark_request_as_sent(&self, request_id: &Uuid) -> CryptoResult<bool> {
        let Some(mut session) = self.session_for_request(request_id)? else {
            return Ok(false);
        };
        session.mark_request_as_sent(request_id);
        self.store.save_outbound_group_session(&session)?;
        Ok(true)
    }

    /// Verwirft eine ausstehende Verteilung
    pub fn discard_pending_share(&self, request_id: &Uuid) -> CryptoResult<bool> {
        let Some(mut session) = self.session_for_request(request_id)? else {
            return Ok(false);
        };
        session.discard_pending_share(request_id);
        self.store.save_outbound_group_session(&session)?;
        Ok(true)
    }

    /// Erzwingt eine Rotation beim naechsten Teilen
    pub fn invalidate(&self, room_id: &RoomId) -> CryptoResult<bool> {
        let Some(mut session) = self.store.get_outbound_group_session(room_id)? else {
            return Ok(false);
        };
        session.invalidate();
        self.store.save_outbound_group_session(&session)?;
        tracing::info!(
            room_id = %room_id,
            session_id = %session.session_id(),
            "Gruppensitzung gesperrt"
        );
        Ok(true)
    }

    fn invalidate_where(
        &self,
        grund: &str,
        pred: impl Fn(&OutboundGroupSession) -> bool,
    ) -> CryptoResult<()> {
        for mut session in self.store.get_outbound_group_sessions()? {
            if session.invalidated() || !pred(&session) {
                continue;
            }
            session.invalidate();
            self.store.save_outbound_group_session(&session)?;
            tracing::info!(
                room_id = %session.room_id(),
                session_id = %session.session_id(),
                grund,
                "Gruppensitzung gesperrt"
            );
        }
        Ok(())
    }

    /// Sperrt Sitzungen, deren Mitglieder oder Empfaenger diese Benutzer sind
    pub fn invalidate_for_users(&self, users: &[UserId]) -> CryptoResult<()> {
        self.invalidate_where("Mitglied ausgetreten", |session| {
            users.iter().any(|u| {
                session.members().contains(u) || session.recipients().iter().any(|(r, _)| r == u)
            })
        })
    }

    /// Sperrt Sitzungen, deren Schluessel dieses Geraet erhalten hat
    pub fn invalidate_for_device(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> CryptoResult<()> {
        self.invalidate_where("Empfaenger-Geraet gesperrt", |session| {
            session.share_state(user_id, device_id) != ShareState::NotShared
        })
    }

    /// Reagiert auf Geraeteaenderungen aus einer Key-Query.
    ///
    /// Neue unverifizierte Geraete eines Mitglieds und Empfaenger mit neuen
    /// Schluesseln erzwingen eine Rotation.
    pub fn handle_device_changes(&self, changes: &DeviceChanges) -> CryptoResult<()> {
        for device in &changes.new {
            if device.trust_state != TrustState::Unverified {
                continue;
            }
            self.invalidate_where("neues unverifiziertes Geraet", |session| {
                session.members().contains(&device.user_id) && !session.recipients().is_empty()
            })?;
        }
        for device in changes.changed.iter().chain(&changes.deleted) {
            self.invalidate_for_device(&device.user_id, &device.device_id)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn raum() -> RoomId {
        RoomId::parse("!raum:example.org").unwrap()
    }

    struct Umgebung {
        account: Account,
        devices: DeviceStore,
        sessions: SessionManager,
        groups: GroupSessionManager,
    }

    fn umgebung(settings: EncryptionSettings) -> Umgebung {
        let store: Arc<dyn CryptoStore> = Arc::new(MemoryStore::new());
        let user_id = UserId::parse("@alice:example.org").unwrap();
        let device_id = DeviceId::parse("ALICEDEV").unwrap();
        Umgebung {
            account: Account::new(user_id.clone(), device_id.clone(), 10),
            devices: DeviceStore::new(store.clone(), user_id, device_id),
            sessions: SessionManager::new(store.clone()),
            groups: GroupSessionManager::new(store, settings, DEFAULT_MAX_MESSAGES_PER_REQUEST),
        }
    }

    fn nur_ich(u: &Umgebung) -> BTreeSet<UserId> {
        BTreeSet::from([u.account.user_id().clone()])
    }

    #[test]
    fn ohne_sitzung_muss_geteilt_werden() {
        let u = umgebung(EncryptionSettings::default());
        assert!(u
            .groups
            .should_share_group_session(&raum(), &nur_ich(&u), &u.devices)
            .unwrap());
    }

    #[test]
    fn verschluesseln_ohne_sitzung_schlaegt_fehl() {
        let u = umgebung(EncryptionSettings::default());
        assert!(matches!(
            u.groups.encrypt(&raum(), "m.room.message", json!({}), &u.account),
            Err(CryptoError::NoOutboundSession(_))
        ));
    }

    #[test]
    fn eigene_nachrichten_entschluesselbar() {
        let u = umgebung(EncryptionSettings::default());
        let requests = u
            .groups
            .share_group_session(&raum(), &nur_ich(&u), &u.account, &u.devices, &u.sessions)
            .unwrap();
        assert!(requests.is_empty());
        assert!(!u
            .groups
            .should_share_group_session(&raum(), &nur_ich(&u), &u.devices)
            .unwrap());

        let content = u
            .groups
            .encrypt(&raum(), "m.room.message", json!({ "body": "hallo" }), &u.account)
            .unwrap();
        let event = u.groups.decrypt(&raum(), &content).unwrap();
        assert_eq!(event.content, json!({ "body": "hallo" }));
        assert_eq!(event.message_index, 0);

        assert!(matches!(
            u.groups.decrypt(&raum(), &content),
            Err(CryptoError::Replay { .. })
        ));
    }

    #[test]
    fn unbekannte_sitzung() {
        let u = umgebung(EncryptionSettings::default());
        u.groups
            .share_group_session(&raum(), &nur_ich(&u), &u.account, &u.devices, &u.sessions)
            .unwrap();
        let mut content = u
            .groups
            .encrypt(&raum(), "m.room.message", json!({}), &u.account)
            .unwrap();
        content.session_id = "unbekannt".into();
        assert!(matches!(
            u.groups.decrypt(&raum(), &content),
            Err(CryptoError::UnknownSession { .. })
        ));
    }

    #[test]
    fn abgelaufene_sitzung_wird_rotiert() {
        let settings = EncryptionSettings {
            rotation_period_msgs: 1,
            ..Default::default()
        };
        let u = umgebung(settings);
        u.groups
            .share_group_session(&raum(), &nur_ich(&u), &u.account, &u.devices, &u.sessions)
            .unwrap();
        let erste = u.groups.outbound_session(&raum()).unwrap().unwrap();
        u.groups
            .encrypt(&raum(), "m.room.message", json!({}), &u.account)
            .unwrap();
        assert!(u
            .groups
            .should_share_group_session(&raum(), &nur_ich(&u), &u.devices)
            .unwrap());

        u.groups
            .share_group_session(&raum(), &nur_ich(&u), &u.account, &u.devices, &u.sessions)
            .unwrap();
        let zweite = u.groups.outbound_session(&raum()).unwrap().unwrap();
        assert_ne!(erste.session_id(), zweite.session_id());
    }

    #[test]
    fn gesperrte_sitzung_verschluesselt_nicht() {
        let u = umgebung(EncryptionSettings::default());
        u.groups
            .share_group_session(&raum(), &nur_ich(&u), &u.account, &u.devices, &u.sessions)
            .unwrap();
        assert!(u.groups.invalidate(&raum()).unwrap());
        assert!(matches!(
            u.groups.encrypt(&raum(), "m.room.message", json!({}), &u.account),
            Err(CryptoError::NoOutboundSession(_))
        ));
    }

    fn raum_schluessel(
        sender: &Umgebung,
        empfaenger: &Umgebung,
        outbound: &OutboundGroupSession,
        session_key: String,
    ) -> DecryptedOlmEvent {
        DecryptedOlmEvent {
            event_type: ROOM_KEY.into(),
            content: serde_json::to_value(RoomKeyContent {
                algorithm: EventEncryptionAlgorithm::MegolmV1AesSha2,
                room_id: raum(),
                session_id: outbound.session_id().to_string(),
                session_key,
            })
            .unwrap(),
            sender: sender.account.user_id().clone(),
            sender_device: sender.account.device_id().clone(),
            keys: nio_core::event::Ed25519Keys {
                ed25519: sender.account.identity_keys().ed25519.to_base64(),
            },
            recipient: empfaenger.account.user_id().clone(),
            recipient_keys: nio_core::event::Ed25519Keys {
                ed25519: empfaenger.account.identity_keys().ed25519.to_base64(),
            },
        }
    }

    fn raum_nachricht(
        outbound: &mut OutboundGroupSession,
        sender_key: Curve25519PublicKey,
        body: &str,
    ) -> MegolmV1Content {
        let payload = DecryptedRoomPayload {
            event_type: "m.room.message".into(),
            content: json!({ "body": body }),
            room_id: raum(),
        };
        MegolmV1Content {
            algorithm: EventEncryptionAlgorithm::MegolmV1AesSha2,
            sender_key: sender_key.to_base64(),
            ciphertext: outbound.encrypt(&serde_json::to_vec(&payload).unwrap()).unwrap(),
            session_id: outbound.session_id().to_string(),
            device_id: DeviceId::parse("SENDERDEV").unwrap(),
        }
    }

    #[test]
    fn raum_schluessel_import_behaelt_frueheren_index() {
        let sender = umgebung(EncryptionSettings::default());
        let empfaenger = umgebung(EncryptionSettings::default());

        let mut outbound = OutboundGroupSession::new(raum(), EncryptionSettings::default());
        let frueh = outbound.session_key();
        outbound.encrypt(b"x").unwrap();
        let spaet = outbound.session_key();

        let sender_key = sender.account.identity_keys().curve25519;
        let erster = raum_schluessel(&sender, &empfaenger, &outbound, frueh);
        assert!(empfaenger.groups.receive_room_key(sender_key, &erster).unwrap());
        let zweiter = raum_schluessel(&sender, &empfaenger, &outbound, spaet);
        assert!(!empfaenger.groups.receive_room_key(sender_key, &zweiter).unwrap());
    }

    #[test]
    fn frueherer_schluessel_behaelt_replay_grenze() {
        let sender = umgebung(EncryptionSettings::default());
        let empfaenger = umgebung(EncryptionSettings::default());
        let sender_key = sender.account.identity_keys().curve25519;

        let mut outbound = OutboundGroupSession::new(raum(), EncryptionSettings::default());
        let ab_null = outbound.session_key();
        raum_nachricht(&mut outbound, sender_key, "null");
        let ab_eins = outbound.session_key();
        let eins = raum_nachricht(&mut outbound, sender_key, "eins");

        let spaet = raum_schluessel(&sender, &empfaenger, &outbound, ab_eins);
        assert!(empfaenger.groups.receive_room_key(sender_key, &spaet).unwrap());
        let event = empfaenger.groups.decrypt(&raum(), &eins).unwrap();
        assert_eq!(event.message_index, 1);

        let frueh = raum_schluessel(&sender, &empfaenger, &outbound, ab_null);
        assert!(empfaenger.groups.receive_room_key(sender_key, &frueh).unwrap());
        let gespeichert = empfaenger
            .groups
            .store
            .get_inbound_group_session(&raum(), &sender_key, outbound.session_id())
            .unwrap()
            .unwrap();
        assert_eq!(gespeichert.first_known_index(), 0);
        assert_eq!(gespeichert.highest_index(), Some(1));

        assert!(matches!(
            empfaenger.groups.decrypt(&raum(), &eins),
            Err(CryptoError::Replay { index: 1, hoechster: 1, .. })
        ));
    }

    #[test]
    fn fremdes_geraet_bindet_sitzung_nicht_um() {
        let alice = umgebung(EncryptionSettings::default());
        let eve = umgebung(EncryptionSettings::default());
        let empfaenger = umgebung(EncryptionSettings::default());
        let alice_key = alice.account.identity_keys().curve25519;
        let eve_key = eve.account.identity_keys().curve25519;

        let mut outbound = OutboundGroupSession::new(raum(), EncryptionSettings::default());
        let session_key = outbound.session_key();
        let echt = raum_schluessel(&alice, &empfaenger, &outbound, session_key.clone());
        assert!(empfaenger.groups.receive_room_key(alice_key, &echt).unwrap());

        // Eve reicht denselben Schluessel unter ihrem eigenen Geraeteschluessel weiter
        let weitergereicht = raum_schluessel(&eve, &empfaenger, &outbound, session_key);
        assert!(empfaenger.groups.receive_room_key(eve_key, &weitergereicht).unwrap());

        let gespeichert = empfaenger
            .groups
            .store
            .get_inbound_group_session(&raum(), &alice_key, outbound.session_id())
            .unwrap()
            .unwrap();
        assert_eq!(gespeichert.sender_key(), alice_key);

        let nachricht = raum_nachricht(&mut outbound, alice_key, "von alice");
        let event = empfaenger.groups.decrypt(&raum(), &nachricht).unwrap();
        assert_eq!(event.sender_key, alice_key);
        assert_eq!(event.content, json!({ "body": "von alice" }));
    }
}
