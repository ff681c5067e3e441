//! Zentrale Verschluesselungs-Maschine
//!
//! Buendelt Account, Geraete, Olm- und Megolm-Sitzungen sowie die
//! Anfrage-Warteschlange. Die Maschine hat genau einen Besitzer: alle
//! veraendernden Methoden nehmen `&mut self`. Wer sie teilen muss, legt sie
//! hinter ein exklusives Lock.
//!
//! ## Ablauf
//! ```text
//! Sync/Antwort --> OlmMachine --> Stores aktualisiert, Anfragen bestaetigt
//!                      |
//!                      v
//!          outgoing_requests() --> Aufrufer sendet --> mark_request_as_sent()
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use nio_core::api::{
    KeysClaimRequest, KeysClaimResponse, KeysQueryResponse, KeysUploadRequest, KeysUploadResponse,
    SyncResponse, ToDeviceRequest,
};
use nio_core::event::{
    MegolmV1Content, OlmV1Content, ToDeviceEvent, ROOM_ENCRYPTED, ROOM_KEY, ROOM_MESSAGE,
};
use nio_core::{DeviceId, RoomId, UserId};

use crate::config::MachineConfig;
use crate::error::{CryptoError, CryptoResult};
use crate::group_sessions::{DecryptedRoomEvent, GroupSessionManager};
use crate::identities::{DeviceChanges, DeviceRecord, DeviceStore, KeyQueryManager, TrustState};
use crate::olm::Account;
use crate::requests::{
    IncomingResponse, OutgoingRequest, OutgoingRequests, RequestQueue, RequestType,
};
use crate::session_manager::{SessionManager, SessionState};
use crate::store::{CryptoStore, MemoryStore};
use crate::types::IdentityKeys;

/// Ende-zu-Ende-Verschluesselung fuer genau ein eigenes Geraet
#[derive(Debug)]
pub struct OlmMachine {
    user_id: UserId,
    device_id: DeviceId,
    account: Account,
    store: Arc<dyn CryptoStore>,
    config: MachineConfig,
    devices: DeviceStore,
    key_queries: KeyQueryManager,
    sessions: SessionManager,
    group_sessions: GroupSessionManager,
    requests: RequestQueue,
    key_mismatches: Vec<CryptoError>,
}

impl OlmMachine {
    /// Neue Maschine mit Speicher im RAM und Standardkonfiguration
    pub fn new(user_id: UserId, device_id: DeviceId) -> CryptoResult<Self> {
        Self::with_config(user_id, device_id, MachineConfig::default())
    }

    pub fn with_config(
        user_id: UserId,
        device_id: DeviceId,
        config: MachineConfig,
    ) -> CryptoResult<Self> {
        let store = Arc::new(MemoryStore::with_session_limit(
            config.speicher.max_sitzungen_pro_geraet,
        ));
        Self::with_store(user_id, device_id, store, config)
    }

    /// Maschine auf einem bestehenden Speicher.
    ///
    /// Ein gespeicherter Account wird uebernommen, sonst wird ein neuer
    /// erzeugt.
    pub fn with_store(
        user_id: UserId,
        device_id: DeviceId,
        store: Arc<dyn CryptoStore>,
        config: MachineConfig,
    ) -> CryptoResult<Self> {
        let account = match store.load_account()? {
            Some(account) if account.user_id() == &user_id && account.device_id() == &device_id => {
                tracing::debug!(user_id = %user_id, device_id = %device_id, "Account geladen");
                account
            }
            Some(account) => {
                return Err(CryptoError::Store(format!(
                    "gespeicherter Account gehoert zu {}/{}",
                    account.user_id(),
                    account.device_id()
                )));
            }
            None => {
                let account = Account::new(
                    user_id.clone(),
                    device_id.clone(),
                    config.schluessel.max_einmal_schluessel,
                );
                store.save_account(&account)?;
                tracing::info!(
                    user_id = %user_id,
                    device_id = %device_id,
                    ed25519 = %account.identity_keys().ed25519,
                    "Neuer Account erstellt"
                );
                account
            }
        };
        store.save_devices(&[DeviceRecord::own(&account)])?;

        let devices = DeviceStore::new(store.clone(), user_id.clone(), device_id.clone());
        let key_queries = KeyQueryManager::new(store.clone())?;
        let sessions = SessionManager::new(store.clone());
        let group_sessions = GroupSessionManager::new(
            store.clone(),
            config.encryption_settings(),
            config.gruppen_sitzung.max_nachrichten_pro_anfrage,
        );

        Ok(Self {
            user_id,
            device_id,
            account,
            store,
            config,
            devices,
            key_queries,
            sessions,
            group_sessions,
            requests: RequestQueue::new(),
            key_mismatches: Vec::new(),
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn identity_keys(&self) -> IdentityKeys {
        self.account.identity_keys()
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    // --- Schluessel-Upload ---

    pub fn should_upload_keys(&self) -> bool {
        self.account.should_upload_keys()
    }

    /// Upload-Payload; solange ein Upload aussteht, immer derselbe
    pub fn keys_for_upload(&mut self) -> CryptoResult<Option<KeysUploadRequest>> {
        let request = self.account.keys_for_upload()?;
        self.store.save_account(&self.account)?;
        Ok(request)
    }

    // --- Geraete-Tracking ---

    pub fn update_tracked_users<'a>(
        &mut self,
        users: impl IntoIterator<Item = &'a UserId>,
    ) -> CryptoResult<()> {
        self.key_queries.update_tracked_users(users)
    }

    pub fn tracked_users(&self) -> BTreeSet<UserId> {
        self.key_queries.tracked_users()
    }

    pub fn users_for_key_query(&self) -> BTreeSet<UserId> {
        self.key_queries.users_for_key_query()
    }

    pub fn should_query_keys(&self) -> bool {
        self.key_queries.should_query_keys()
    }

    pub fn get_device(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> CryptoResult<Option<DeviceRecord>> {
        self.devices.get_device(user_id, device_id)
    }

    pub fn devices_for_user(
        &self,
        user_id: &UserId,
    ) -> CryptoResult<BTreeMap<DeviceId, DeviceRecord>> {
        self.devices.devices_for_user(user_id)
    }

    /// Setzt den Vertrauensstatus. Ein gesperrtes Geraet erzwingt die
    /// Rotation aller Gruppensitzungen, deren Schluessel es erhalten hat.
    pub fn set_device_trust_state(
        &mut self,
        user_id: &UserId,
        device_id: &DeviceId,
        trust_state: TrustState,
    ) -> CryptoResult<()> {
        self.devices.set_trust_state(user_id, device_id, trust_state)?;
        if trust_state == TrustState::Blacklisted {
            self.group_sessions.invalidate_for_device(user_id, device_id)?;
        }
        Ok(())
    }

    /// Seit dem letzten Aufruf erkannte Schluesselwechsel
    pub fn take_key_mismatches(&mut self) -> Vec<CryptoError> {
        std::mem::take(&mut self.key_mismatches)
    }

    // --- Olm-Sitzungen ---

    /// Claim-Anfrage fuer Geraete ohne Olm-Sitzung; wird auch eingereiht
    pub fn get_missing_sessions<'a>(
        &mut self,
        users: impl IntoIterator<Item = &'a UserId>,
    ) -> CryptoResult<Option<(Uuid, KeysClaimRequest)>> {
        let Some((request_id, request)) = self.sessions.get_missing_sessions(users, &self.devices)?
        else {
            return Ok(None);
        };
        self.requests
            .enqueue(request_id, OutgoingRequests::KeysClaim(request.clone()));
        Ok(Some((request_id, request)))
    }

    pub fn session_state(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> CryptoResult<SessionState> {
        let device = self
            .devices
            .get_device(user_id, device_id)?
            .ok_or_else(|| CryptoError::UnknownDevice {
                user_id: user_id.clone(),
                device_id: device_id.clone(),
            })?;
        self.sessions.session_state(&device)
    }

    // --- Anfrage-Warteschlange ---

    /// Erzeugt faellige Upload- und Query-Anfragen und gibt alle
    /// ausstehenden Anfragen in Erstellungsreihenfolge zurueck
    pub fn outgoing_requests(&mut self) -> CryptoResult<Vec<OutgoingRequest>> {
        if !self.requests.has_pending(RequestType::KeysUpload) {
            if let Some(request) = self.keys_for_upload()? {
                self.requests
                    .enqueue(Uuid::new_v4(), OutgoingRequests::KeysUpload(request));
            }
        }
        if let Some((request_id, request)) = self.key_queries.build_query() {
            self.requests
                .enqueue(request_id, OutgoingRequests::KeysQuery(request));
        }
        Ok(self.requests.poll())
    }

    /// Reicht die Antwort auf eine ausstehende Anfrage zurueck.
    ///
    /// Eine unbekannte ID oder ein falscher Typ ergibt `UnknownRequest`.
    /// Ein fehlerhafter Body entfernt die Anfrage, setzt ihre Buchhaltung
    /// zurueck und ergibt `MalformedResponse`.
    pub fn mark_request_as_sent(
        &mut self,
        request_id: &Uuid,
        request_type: RequestType,
        response: &Value,
    ) -> CryptoResult<()> {
        self.requests.get(request_id, request_type)?;

        let response = match IncomingResponse::parse(request_type, response) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    %request_id,
                    typ = %request_type,
                    fehler = %e,
                    "Fehlerhafte Antwort verworfen"
                );
                self.requests.acknowledge(request_id, request_type)?;
                self.roll_back(request_id, request_type)?;
                return Err(e);
            }
        };
        self.requests.acknowledge(request_id, request_type)?;

        match response {
            IncomingResponse::KeysUpload(response) => self.receive_keys_upload_response(&response),
            IncomingResponse::KeysQuery(response) => {
                self.receive_keys_query_response(request_id, &response)
            }
            IncomingResponse::KeysClaim(response) => {
                self.receive_keys_claim_response(request_id, &response)
            }
            IncomingResponse::ToDevice(_) => {
                self.group_sessions.mark_request_as_sent(request_id)?;
                Ok(())
            }
        }
    }

    fn roll_back(&mut self, request_id: &Uuid, request_type: RequestType) -> CryptoResult<()> {
        match request_type {
            RequestType::KeysUpload => {
                self.account.discard_pending_upload();
                self.store.save_account(&self.account)?;
            }
            RequestType::KeysQuery => self.key_queries.rollback(request_id),
            RequestType::KeysClaim => self.sessions.rollback_claim(request_id),
            RequestType::ToDevice => {
                self.group_sessions.discard_pending_share(request_id)?;
            }
        }
        Ok(())
    }

    fn receive_keys_upload_response(&mut self, response: &KeysUploadResponse) -> CryptoResult<()> {
        self.account
            .receive_keys_upload_response(&response.one_time_key_counts);
        self.store.save_account(&self.account)
    }

    fn receive_keys_query_response(
        &mut self,
        request_id: &Uuid,
        response: &KeysQueryResponse,
    ) -> CryptoResult<()> {
        let mut changes: DeviceChanges =
            self.key_queries
                .receive_keys_query_response(request_id, response, &self.devices)?;
        self.group_sessions.handle_device_changes(&changes)?;
        self.key_mismatches.append(&mut changes.key_mismatches);
        Ok(())
    }

    fn receive_keys_claim_response(
        &mut self,
        request_id: &Uuid,
        response: &KeysClaimResponse,
    ) -> CryptoResult<()> {
        self.sessions
            .receive_keys_claim_response(request_id, response, &self.account, &self.devices)
    }

    // --- Gruppensitzungen ---

    pub fn should_share_group_session<'a>(
        &self,
        room_id: &RoomId,
        users: impl IntoIterator<Item = &'a UserId>,
    ) -> CryptoResult<bool> {
        let users: BTreeSet<UserId> = users.into_iter().cloned().collect();
        self.group_sessions
            .should_share_group_session(room_id, &users, &self.devices)
    }

    /// Verteilt den Raum-Schluessel; die To-Device-Anfragen werden auch
    /// eingereiht (Anfrage-ID = `txn_id`)
    pub fn share_group_session<'a>(
        &mut self,
        room_id: &RoomId,
        users: impl IntoIterator<Item = &'a UserId>,
    ) -> CryptoResult<Vec<ToDeviceRequest>> {
        let users: BTreeSet<UserId> = users.into_iter().cloned().collect();
        let requests = self.group_sessions.share_group_session(
            room_id,
            &users,
            &self.account,
            &self.devices,
            &self.sessions,
        )?;
        for request in &requests {
            self.requests
                .enqueue(request.txn_id, OutgoingRequests::ToDeviceMessage(request.clone()));
        }
        Ok(requests)
    }

    /// Verschluesselt eine `m.room.message`
    pub fn encrypt(&mut self, room_id: &RoomId, content: Value) -> CryptoResult<MegolmV1Content> {
        self.encrypt_event(room_id, ROOM_MESSAGE, content)
    }

    pub fn encrypt_event(
        &mut self,
        room_id: &RoomId,
        event_type: &str,
        content: Value,
    ) -> CryptoResult<MegolmV1Content> {
        self.group_sessions
            .encrypt(room_id, event_type, content, &self.account)
    }

    pub fn decrypt_room_event(
        &mut self,
        room_id: &RoomId,
        content: &MegolmV1Content,
    ) -> CryptoResult<DecryptedRoomEvent> {
        self.group_sessions.decrypt(room_id, content)
    }

    /// Erzwingt eine neue Gruppensitzung beim naechsten Teilen
    pub fn invalidate_group_session(&mut self, room_id: &RoomId) -> CryptoResult<bool> {
        self.group_sessions.invalidate(room_id)
    }

    // --- Sync ---

    /// Verarbeitet die verschluesselungsrelevanten Teile einer Sync-Antwort.
    ///
    /// Gibt die To-Device-Events zurueck, Olm-Events entschluesselt. Events,
    /// die nicht entschluesselt werden koennen, bleiben unveraendert.
    pub fn receive_sync_response(
        &mut self,
        sync: &SyncResponse,
    ) -> CryptoResult<Vec<ToDeviceEvent>> {
        self.account.update_key_counts(&sync.device_one_time_keys_count);
        self.sessions.new_sync_cycle();

        let changed = parse_user_ids(&sync.device_lists.changed);
        self.key_queries.mark_dirty(&changed)?;

        let left = parse_user_ids(&sync.device_lists.left);
        if !left.is_empty() {
            self.key_queries.untrack(&left)?;
            self.group_sessions.invalidate_for_users(&left)?;
        }

        let mut events = Vec::with_capacity(sync.to_device.events.len());
        for raw in &sync.to_device.events {
            let event: ToDeviceEvent = match serde_json::from_value(raw.clone()) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(fehler = %e, "Ungueltiges To-Device-Event ignoriert");
                    continue;
                }
            };
            events.push(self.receive_to_device_event(event));
        }

        self.store.save_account(&self.account)?;
        Ok(events)
    }

    fn receive_to_device_event(&mut self, event: ToDeviceEvent) -> ToDeviceEvent {
        if event.event_type != ROOM_ENCRYPTED {
            return event;
        }
        let content: OlmV1Content = match serde_json::from_value(event.content.clone()) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(
                    sender = %event.sender,
                    fehler = %e,
                    "Verschluesseltes Event mit ungueltigem Inhalt"
                );
                return event;
            }
        };

        match self
            .sessions
            .decrypt_to_device(&mut self.account, &self.devices, &event.sender, &content)
        {
            Ok((decrypted, sender_key)) => {
                if decrypted.event_type == ROOM_KEY {
                    if let Err(e) = self.group_sessions.receive_room_key(sender_key, &decrypted) {
                        tracing::warn!(
                            sender = %event.sender,
                            fehler = %e,
                            "Raum-Schluessel nicht importiert"
                        );
                    }
                }
                ToDeviceEvent {
                    sender: decrypted.sender,
                    event_type: decrypted.event_type,
                    content: decrypted.content,
                }
            }
            Err(e) => {
                tracing::warn!(
                    sender = %event.sender,
                    fehler = %e,
                    "To-Device-Event nicht entschluesselt"
                );
                event
            }
        }
    }
}

fn parse_user_ids(raw: &[String]) -> Vec<UserId> {
    raw.iter()
        .filter_map(|u| match UserId::parse(u.as_str()) {
            Ok(user_id) => Some(user_id),
            Err(e) => {
                tracing::warn!(fehler = %e, "Ungueltige Benutzer-ID in Geraeteliste");
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn maschine() -> OlmMachine {
        OlmMachine::new(
            UserId::parse("@alice:example.org").unwrap(),
            DeviceId::parse("ALICEDEV").unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn eigenes_geraet_ist_verifiziert() {
        let machine = maschine();
        let device = machine
            .get_device(machine.user_id(), machine.device_id())
            .unwrap()
            .unwrap();
        assert_eq!(device.trust_state, TrustState::Verified);
        assert_eq!(device.keys, machine.identity_keys());
    }

    #[test]
    fn erster_poll_enthaelt_upload() {
        let mut machine = maschine();
        assert!(machine.should_upload_keys());
        let requests = machine.outgoing_requests().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].request_type(), RequestType::KeysUpload);
    }

    #[test]
    fn upload_antwort_beendet_upload() {
        let mut machine = maschine();
        let id = machine.outgoing_requests().unwrap()[0].request_id;
        machine
            .mark_request_as_sent(
                &id,
                RequestType::KeysUpload,
                &json!({ "one_time_key_counts": { "signed_curve25519": 50 } }),
            )
            .unwrap();
        assert!(!machine.should_upload_keys());
        assert!(machine.outgoing_requests().unwrap().is_empty());
    }

    #[test]
    fn fehlerhafte_upload_antwort_verwirft_schluessel() {
        let mut machine = maschine();
        let erste = machine.outgoing_requests().unwrap()[0].clone();
        assert!(matches!(
            machine.mark_request_as_sent(&erste.request_id, RequestType::KeysUpload, &json!({})),
            Err(CryptoError::MalformedResponse(_))
        ));

        let zweite = machine.outgoing_requests().unwrap()[0].clone();
        assert_ne!(erste.request_id, zweite.request_id);
        assert_ne!(erste.request, zweite.request);
    }

    #[test]
    fn falscher_typ_ist_unbekannte_anfrage() {
        let mut machine = maschine();
        let id = machine.outgoing_requests().unwrap()[0].request_id;
        assert!(matches!(
            machine.mark_request_as_sent(&id, RequestType::KeysQuery, &json!({})),
            Err(CryptoError::UnknownRequest { .. })
        ));
        assert_eq!(machine.outgoing_requests().unwrap().len(), 1);
    }

    #[test]
    fn sync_markiert_geaenderte_benutzer() {
        let mut machine = maschine();
        let bob = UserId::parse("@bob:example.org").unwrap();
        machine.update_tracked_users([&bob]).unwrap();
        let query = machine
            .outgoing_requests()
            .unwrap()
            .into_iter()
            .find(|r| r.request_type() == RequestType::KeysQuery)
            .unwrap();
        machine
            .mark_request_as_sent(
                &query.request_id,
                RequestType::KeysQuery,
                &json!({ "device_keys": { "@bob:example.org": {} } }),
            )
            .unwrap();
        assert!(!machine.should_query_keys());

        let mut sync = SyncResponse::default();
        sync.device_lists.changed.push(bob.to_string());
        machine.receive_sync_response(&sync).unwrap();
        assert!(machine.users_for_key_query().contains(&bob));

        let mut sync = SyncResponse::default();
        sync.device_lists.left.push(bob.to_string());
        machine.receive_sync_response(&sync).unwrap();
        assert!(!machine.tracked_users().contains(&bob));
    }

    #[test]
    fn unverschluesselte_to_device_events_unveraendert() {
        let mut machine = maschine();
        let mut sync = SyncResponse::default();
        sync.to_device.events.push(json!({
            "sender": "@bob:example.org",
            "type": "m.dummy",
            "content": {}
        }));
        sync.to_device.events.push(json!({ "kaputt": true }));
        let events = machine.receive_sync_response(&sync).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "m.dummy");
    }

    #[test]
    fn gespeicherter_account_wird_uebernommen() {
        let store: Arc<dyn CryptoStore> = Arc::new(MemoryStore::new());
        let user = UserId::parse("@alice:example.org").unwrap();
        let device = DeviceId::parse("ALICEDEV").unwrap();
        let config = MachineConfig::default();
        let erste =
            OlmMachine::with_store(user.clone(), device.clone(), store.clone(), config.clone())
                .unwrap();
        let zweite = OlmMachine::with_store(user.clone(), device, store.clone(), config).unwrap();
        assert_eq!(erste.identity_keys(), zweite.identity_keys());

        let anderes = DeviceId::parse("ANDERES").unwrap();
        assert!(matches!(
            OlmMachine::with_store(user, anderes, store, MachineConfig::default()),
            Err(CryptoError::Store(_))
        ));
    }

    #[test]
    fn sitzungsstatus_fuer_unbekanntes_geraet() {
        let machine = maschine();
        let bob = UserId::parse("@bob:example.org").unwrap();
        assert!(matches!(
            machine.session_state(&bob, &DeviceId::parse("BOBDEV").unwrap()),
            Err(CryptoError::UnknownDevice { .. })
        ));
    }
}
