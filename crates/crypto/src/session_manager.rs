//! Aufbau und Nutzung paarweiser Olm-Sitzungen
//!
//! Fehlt fuer ein Geraet eine nutzbare Sitzung, wird ein signierter
//! Einmalschluessel geclaimt und daraus eine ausgehende Sitzung erstellt.
//! Geraete, fuer die das nicht gelingt, werden bis zum naechsten Sync nicht
//! erneut angefragt.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use nio_core::api::{KeysClaimRequest, KeysClaimResponse, SignedKey};
use nio_core::event::{DecryptedOlmEvent, Ed25519Keys, OlmCiphertextInfo, OlmV1Content};
use nio_core::types::{key_id, split_key_id};
use nio_core::{DeviceId, DeviceKeyAlgorithm, EventEncryptionAlgorithm, UserId};

use crate::error::{CryptoError, CryptoResult};
use crate::identities::{DeviceRecord, DeviceStore};
use crate::olm::{messages, Account, OlmMessage, OlmSession};
use crate::signatures::verify_json;
use crate::store::CryptoStore;
use crate::types::Curve25519PublicKey;

/// Timeout fuer `/keys/claim` in Millisekunden
pub const KEY_CLAIM_TIMEOUT_MS: u64 = 10_000;

/// Sitzungsstatus mit einem Geraet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    /// Einmalschluessel angefragt
    Establishing,
    Established,
}

#[derive(Debug)]
pub struct SessionManager {
    store: Arc<dyn CryptoStore>,
    in_flight_claims: BTreeMap<Uuid, BTreeSet<(UserId, DeviceId)>>,
    /// Geraete ohne Einmalschluessel in diesem Sync-Zyklus
    failed_devices: BTreeSet<(UserId, DeviceId)>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn CryptoStore>) -> Self {
        Self {
            store,
            in_flight_claims: BTreeMap::new(),
            failed_devices: BTreeSet::new(),
        }
    }

    /// Neueste nicht gesperrte Sitzung mit einem Identitaetsschluessel
    fn live_session(&self, curve25519: &Curve25519PublicKey) -> CryptoResult<Option<OlmSession>> {
        Ok(self
            .store
            .get_sessions(curve25519)?
            .into_iter()
            .filter(|s| !s.is_invalidated())
            .max_by_key(|s| s.created_at()))
    }

    pub fn has_live_session(&self, device: &DeviceRecord) -> CryptoResult<bool> {
        Ok(self.live_session(&device.keys.curve25519)?.is_some())
    }

    fn is_claiming(&self, key: &(UserId, DeviceId)) -> bool {
        self.in_flight_claims.values().any(|geraete| geraete.contains(key))
    }

    pub fn session_state(&self, device: &DeviceRecord) -> CryptoResult<SessionState> {
        if self.has_live_session(device)? {
            return Ok(SessionState::Established);
        }
        let key = (device.user_id.clone(), device.device_id.clone());
        Ok(if self.is_claiming(&key) {
            SessionState::Establishing
        } else {
            SessionState::NoSession
        })
    }

    /// Claim-Anfrage fuer alle Geraete der Benutzer ohne nutzbare Sitzung
    pub fn get_missing_sessions<'a>(
        &mut self,
        users: impl IntoIterator<Item = &'a UserId>,
        devices: &DeviceStore,
    ) -> CryptoResult<Option<(Uuid, KeysClaimRequest)>> {
        let mut fehlend: BTreeMap<UserId, BTreeMap<DeviceId, DeviceKeyAlgorithm>> = BTreeMap::new();
        let mut angefragt = BTreeSet::new();

        for user_id in users {
            for (device_id, device) in devices.devices_for_user(user_id)? {
                if devices.is_own_device(user_id, &device_id) || !device.is_eligible_recipient() {
                    continue;
                }
                let key = (user_id.clone(), device_id.clone());
                if self.is_claiming(&key) || self.failed_devices.contains(&key) {
                    continue;
                }
                if self.has_live_session(&device)? {
                    continue;
                }
                fehlend
                    .entry(user_id.clone())
                    .or_default()
                    .insert(device_id, DeviceKeyAlgorithm::SignedCurve25519);
                angefragt.insert(key);
            }
        }

        if angefragt.is_empty() {
            return Ok(None);
        }

        let request_id = Uuid::new_v4();
        tracing::debug!(%request_id, geraete = angefragt.len(), "Einmalschluessel werden geclaimt");
        self.in_flight_claims.insert(request_id, angefragt);
        Ok(Some((
            request_id,
            KeysClaimRequest {
                one_time_keys: fehlend,
                timeout: Some(KEY_CLAIM_TIMEOUT_MS),
            },
        )))
    }

    /// Erstellt ausgehende Sitzungen aus geclaimten Einmalschluesseln
    pub fn receive_keys_claim_response(
        &mut self,
        request_id: &Uuid,
        response: &KeysClaimResponse,
        account: &Account,
        devices: &DeviceStore,
    ) -> CryptoResult<()> {
        let angefragt = self.in_flight_claims.remove(request_id).unwrap_or_default();
        let mut erstellt = BTreeSet::new();
        let mut sessions = Vec::new();

        for (server, fehler) in &response.failures {
            tracing::warn!(
                server = %server,
                fehler = %fehler,
                "Key-Claim fuer Server fehlgeschlagen"
            );
        }

        for (user_id, device_map) in &response.one_time_keys {
            let Ok(user_id) = UserId::parse(user_id.as_str()) else {
                tracing::warn!(user_id = %user_id, "Ungueltige Benutzer-ID in Key-Claim-Antwort");
                continue;
            };
            for (device_id, keys) in device_map {
                let Ok(device_id) = DeviceId::parse(device_id.as_str()) else {
                    continue;
                };
                let Some(device) = devices.get_device(&user_id, &device_id)? else {
                    tracing::warn!(
                        user_id = %user_id,
                        device_id = %device_id,
                        "Einmalschluessel fuer unbekanntes Geraet ignoriert"
                    );
                    continue;
                };

                match Self::session_from_claimed_key(account, &device, keys) {
                    Ok(session) => {
                        tracing::info!(
                            user_id = %user_id,
                            device_id = %device_id,
                            session_id = %session.session_id(),
                            "Ausgehende Olm-Sitzung erstellt"
                        );
                        sessions.push(session);
                        erstellt.insert((user_id.clone(), device_id));
                    }
                    Err(e) => {
                        tracing::warn!(
                            user_id = %user_id,
                            device_id = %device_id,
                            fehler = %e,
                            "Geclaimter Einmalschluessel ungueltig"
                        );
                    }
                }
            }
        }

        for key in angefragt.difference(&erstellt) {
            tracing::warn!(
                user_id = %key.0,
                device_id = %key.1,
                "Kein Einmalschluessel erhalten, Geraet wird bis zum naechsten Sync uebersprungen"
            );
            self.failed_devices.insert(key.clone());
        }

        self.store.save_sessions(&sessions)
    }

    fn session_from_claimed_key(
        account: &Account,
        device: &DeviceRecord,
        keys: &BTreeMap<String, Value>,
    ) -> CryptoResult<OlmSession> {
        let (_, value) = keys
            .iter()
            .find(|(id, _)| {
                matches!(
                    split_key_id(id),
                    Ok((DeviceKeyAlgorithm::SignedCurve25519, _))
                )
            })
            .ok_or_else(|| {
                CryptoError::MalformedResponse("kein signed_curve25519-Schluessel".into())
            })?;

        let signed: SignedKey = serde_json::from_value(value.clone())
            .map_err(|e| CryptoError::MalformedResponse(format!("Einmalschluessel: {e}")))?;
        verify_json(
            value,
            &device.user_id,
            &key_id(&DeviceKeyAlgorithm::Ed25519, device.device_id.as_str()),
            &device.keys.ed25519,
        )?;

        let one_time_key = Curve25519PublicKey::from_base64(&signed.key)?;
        Ok(account.create_outbound_session(device.keys.curve25519, one_time_key))
    }

    /// Verwirft eine laufende Claim-Anfrage
    pub fn rollback_claim(&mut self, request_id: &Uuid) {
        self.in_flight_claims.remove(request_id);
    }

    /// Fehlgeschlagene Geraete duerfen wieder angefragt werden
    pub fn new_sync_cycle(&mut self) {
        self.failed_devices.clear();
    }

    /// Verschluesselt ein Event fuer genau ein Geraet
    pub fn encrypt(
        &self,
        account: &Account,
        device: &DeviceRecord,
        event_type: &str,
        content: Value,
    ) -> CryptoResult<OlmV1Content> {
        let Some(mut session) = self.live_session(&device.keys.curve25519)? else {
            return Err(CryptoError::NoOlmSession {
                user_id: device.user_id.clone(),
                device_id: device.device_id.clone(),
            });
        };

        let payload = DecryptedOlmEvent {
            event_type: event_type.to_string(),
            content,
            sender: account.user_id().clone(),
            sender_device: account.device_id().clone(),
            keys: Ed25519Keys {
                ed25519: account.identity_keys().ed25519.to_base64(),
            },
            recipient: device.user_id.clone(),
            recipient_keys: Ed25519Keys {
                ed25519: device.keys.ed25519.to_base64(),
            },
        };

        let message = session.encrypt(&serde_json::to_vec(&payload)?)?;
        self.store.save_sessions(std::slice::from_ref(&session))?;

        let (message_type, body) = messages::to_wire(&message)?;
        Ok(OlmV1Content {
            algorithm: EventEncryptionAlgorithm::OlmV1Curve25519AesSha2,
            sender_key: account.identity_keys().curve25519.to_base64(),
            ciphertext: BTreeMap::from([(
                device.keys.curve25519.to_base64(),
                OlmCiphertextInfo { message_type, body },
            )]),
        })
    }

    /// Entschluesselt ein Olm-To-Device-Event.
    ///
    /// Bestehende Sitzungen werden zuerst versucht (neueste zuerst). Eine
    /// Pre-Key-Nachricht ohne passende Sitzung erzeugt eine eingehende Sitzung.
    /// Account und Sitzung werden erst nach erfolgreicher Pruefung des
    /// Klartexts uebernommen; ein abgelehntes Event verbraucht weder den
    /// Einmalschluessel noch Ratchet-Schritte.
    pub fn decrypt_to_device(
        &self,
        account: &mut Account,
        devices: &DeviceStore,
        sender: &UserId,
        content: &OlmV1Content,
    ) -> CryptoResult<(DecryptedOlmEvent, Curve25519PublicKey)> {
        if content.algorithm != EventEncryptionAlgorithm::OlmV1Curve25519AesSha2 {
            return Err(CryptoError::UngueltigeDaten(format!(
                "unerwarteter Algorithmus {}",
                content.algorithm
            )));
        }

        let own_keys = account.identity_keys();
        let info = content
            .ciphertext
            .get(&own_keys.curve25519.to_base64())
            .ok_or_else(|| {
                CryptoError::UngueltigeDaten("Event ist nicht fuer dieses Geraet".into())
            })?;
        let sender_key = Curve25519PublicKey::from_base64(&content.sender_key)?;
        let message = messages::from_wire(info.message_type, &info.body)?;

        let (session, plaintext, neuer_account) =
            match self.decrypt_with_existing(&sender_key, &message)? {
                Some((session, plaintext)) => (session, plaintext, None),
                None => match &message {
                    OlmMessage::PreKey(pre_key) => {
                        let mut kandidat = account.clone();
                        let (session, plaintext) =
                            kandidat.create_inbound_session(sender_key, pre_key)?;
                        (session, plaintext, Some(kandidat))
                    }
                    OlmMessage::Normal(_) => {
                        return Err(CryptoError::Entschluesselung(format!(
                            "keine passende Olm-Sitzung mit {sender_key}"
                        )));
                    }
                },
            };

        let event: DecryptedOlmEvent = serde_json::from_slice(&plaintext)?;
        Self::validate_payload(&event, sender, &sender_key, account, devices)?;

        if let Some(kandidat) = neuer_account {
            *account = kandidat;
        }
        self.store.save_sessions(&[session])?;
        Ok((event, sender_key))
    }

    /// Sucht die Sitzung, die die Nachricht entschluesseln kann.
    ///
    /// Die Sitzung wird mit fortgeschaltetem Ratchet zurueckgegeben, aber
    /// nicht gespeichert.
    fn decrypt_with_existing(
        &self,
        sender_key: &Curve25519PublicKey,
        message: &OlmMessage,
    ) -> CryptoResult<Option<(OlmSession, Vec<u8>)>> {
        let mut sessions = self.store.get_sessions(sender_key)?;
        sessions.sort_by_key(|s| std::cmp::Reverse(s.created_at()));

        for mut session in sessions {
            if let OlmMessage::PreKey(pre_key) = message {
                if !session.matches_pre_key(pre_key) {
                    continue;
                }
            }
            match session.decrypt(message) {
                Ok(plaintext) => return Ok(Some((session, plaintext))),
                Err(e) => {
                    tracing::trace!(
                        session_id = %session.session_id(),
                        fehler = %e,
                        "Sitzung passt nicht"
                    );
                }
            }
        }
        Ok(None)
    }

    fn validate_payload(
        event: &DecryptedOlmEvent,
        sender: &UserId,
        sender_key: &Curve25519PublicKey,
        account: &Account,
        devices: &DeviceStore,
    ) -> CryptoResult<()> {
        if &event.sender != sender {
            return Err(CryptoError::UngueltigeDaten(format!(
                "Absender {} im Klartext, {sender} im Event",
                event.sender
            )));
        }
        if &event.recipient != account.user_id()
            || event.recipient_keys.ed25519 != account.identity_keys().ed25519.to_base64()
        {
            return Err(CryptoError::UngueltigeDaten(
                "Event war fuer einen anderen Empfaenger bestimmt".into(),
            ));
        }

        if let Some(device) = devices.device_by_curve_key(sender, sender_key)? {
            if device.keys.ed25519.to_base64() != event.keys.ed25519
                || device.device_id != event.sender_device
            {
                return Err(CryptoError::UngueltigeDaten(format!(
                    "Absenderschluessel passen nicht zu Geraet {}",
                    device.device_id
                )));
            }
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
    use nio_core::api::KeysUploadRequest;
    use serde_json::json;

    struct Seite {
        account: Account,
        devices: DeviceStore,
        sessions: SessionManager,
    }

    fn seite(user: &str, device: &str) -> Seite {
        let store: Arc<dyn CryptoStore> = Arc::new(MemoryStore::new());
        let user_id = UserId::parse(user).unwrap();
        let device_id = DeviceId::parse(device).unwrap();
        Seite {
            account: Account::new(user_id.clone(), device_id.clone(), 10),
            devices: DeviceStore::new(store.clone(), user_id, device_id),
            sessions: SessionManager::new(store),
        }
    }

    /// Macht `von` mit den Geraeteschluesseln von `an` bekannt
    fn bekannt_machen(von: &Seite, an: &Seite) {
        von.devices
            .upsert_devices(
                an.account.user_id(),
                &BTreeMap::from([(
                    an.account.device_id().to_string(),
                    serde_json::to_value(an.account.device_keys().unwrap()).unwrap(),
                )]),
            )
            .unwrap();
    }

    fn hochladen(seite: &mut Seite) -> KeysUploadRequest {
        let upload = seite.account.keys_for_upload().unwrap().unwrap();
        let counts = BTreeMap::from([(DeviceKeyAlgorithm::SignedCurve25519, 10)]);
        seite.account.receive_keys_upload_response(&counts);
        upload
    }

    fn claim_antwort(seite: &Seite, upload: &KeysUploadRequest) -> KeysClaimResponse {
        let (id, key) = upload.one_time_keys.iter().next().unwrap();
        let mut response = KeysClaimResponse::default();
        response.one_time_keys.insert(
            seite.account.user_id().to_string(),
            BTreeMap::from([(
                seite.account.device_id().to_string(),
                BTreeMap::from([(id.clone(), serde_json::to_value(key).unwrap())]),
            )]),
        );
        response
    }

    fn alice_und_bob() -> (Seite, Seite) {
        let mut alice = seite("@alice:example.org", "ALICEDEV");
        let mut bob = seite("@bob:example.org", "BOBDEV");
        bekannt_machen(&alice, &bob);
        bekannt_machen(&bob, &alice);
        hochladen(&mut alice);
        let upload = hochladen(&mut bob);

        let bob_id = bob.account.user_id().clone();
        let (request_id, _) = alice
            .sessions
            .get_missing_sessions([&bob_id], &alice.devices)
            .unwrap()
            .unwrap();
        let antwort = claim_antwort(&bob, &upload);
        alice
            .sessions
            .receive_keys_claim_response(&request_id, &antwort, &alice.account, &alice.devices)
            .unwrap();
        (alice, bob)
    }

    #[test]
    fn claim_fuer_geraete_ohne_sitzung() {
        let alice = seite("@alice:example.org", "ALICEDEV");
        let bob = seite("@bob:example.org", "BOBDEV");
        bekannt_machen(&alice, &bob);
        let mut alice = alice;

        let bob_id = bob.account.user_id().clone();
        let (id, request) = alice
            .sessions
            .get_missing_sessions([&bob_id], &alice.devices)
            .unwrap()
            .unwrap();
        assert_eq!(request.timeout, Some(KEY_CLAIM_TIMEOUT_MS));
        assert_eq!(
            request.one_time_keys[&bob_id][bob.account.device_id()],
            DeviceKeyAlgorithm::SignedCurve25519
        );

        let device = alice
            .devices
            .get_device(&bob_id, bob.account.device_id())
            .unwrap()
            .unwrap();
        assert_eq!(alice.sessions.session_state(&device).unwrap(), SessionState::Establishing);
        assert!(alice
            .sessions
            .get_missing_sessions([&bob_id], &alice.devices)
            .unwrap()
            .is_none());

        alice.sessions.rollback_claim(&id);
        assert_eq!(alice.sessions.session_state(&device).unwrap(), SessionState::NoSession);
    }

    #[test]
    fn sitzung_aus_claim_antwort() {
        let (alice, bob) = alice_und_bob();
        let device = alice
            .devices
            .get_device(bob.account.user_id(), bob.account.device_id())
            .unwrap()
            .unwrap();
        assert_eq!(alice.sessions.session_state(&device).unwrap(), SessionState::Established);
    }

    #[test]
    fn leere_claim_antwort_sperrt_bis_zum_naechsten_sync() {
        let mut alice = seite("@alice:example.org", "ALICEDEV");
        let bob = seite("@bob:example.org", "BOBDEV");
        bekannt_machen(&alice, &bob);
        let bob_id = bob.account.user_id().clone();

        let (id, _) = alice
            .sessions
            .get_missing_sessions([&bob_id], &alice.devices)
            .unwrap()
            .unwrap();
        let leer = KeysClaimResponse::default();
        alice
            .sessions
            .receive_keys_claim_response(&id, &leer, &alice.account, &alice.devices)
            .unwrap();
        assert!(alice
            .sessions
            .get_missing_sessions([&bob_id], &alice.devices)
            .unwrap()
            .is_none());

        alice.sessions.new_sync_cycle();
        assert!(alice
            .sessions
            .get_missing_sessions([&bob_id], &alice.devices)
            .unwrap()
            .is_some());
    }

    #[test]
    fn gefaelschter_einmalschluessel_wird_verworfen() {
        let mut alice = seite("@alice:example.org", "ALICEDEV");
        let mut bob = seite("@bob:example.org", "BOBDEV");
        bekannt_machen(&alice, &bob);
        let mut upload = hochladen(&mut bob);
        for key in upload.one_time_keys.values_mut() {
            key.key = Curve25519PublicKey([9; 32]).to_base64();
        }

        let bob_id = bob.account.user_id().clone();
        let (id, _) = alice
            .sessions
            .get_missing_sessions([&bob_id], &alice.devices)
            .unwrap()
            .unwrap();
        let antwort = claim_antwort(&bob, &upload);
        alice
            .sessions
            .receive_keys_claim_response(&id, &antwort, &alice.account, &alice.devices)
            .unwrap();

        let device = alice.devices.get_device(&bob_id, bob.account.device_id()).unwrap().unwrap();
        assert_eq!(alice.sessions.session_state(&device).unwrap(), SessionState::NoSession);
    }

    #[test]
    fn to_device_hin_und_zurueck() {
        let (alice, mut bob) = alice_und_bob();
        let bob_device = alice
            .devices
            .get_device(bob.account.user_id(), bob.account.device_id())
            .unwrap()
            .unwrap();

        let content = alice
            .sessions
            .encrypt(&alice.account, &bob_device, "m.test", json!({ "hallo": "bob" }))
            .unwrap();
        let (event, sender_key) = bob
            .sessions
            .decrypt_to_device(&mut bob.account, &bob.devices, alice.account.user_id(), &content)
            .unwrap();
        assert_eq!(event.event_type, "m.test");
        assert_eq!(event.content, json!({ "hallo": "bob" }));
        assert_eq!(sender_key, alice.account.identity_keys().curve25519);

        // Bob antwortet ueber die eingehende Sitzung
        let alice_device = bob
            .devices
            .get_device(alice.account.user_id(), alice.account.device_id())
            .unwrap()
            .unwrap();
        let antwort = bob
            .sessions
            .encrypt(&bob.account, &alice_device, "m.test", json!({ "hallo": "alice" }))
            .unwrap();
        let mut alice = alice;
        let (event, _) = alice
            .sessions
            .decrypt_to_device(&mut alice.account, &alice.devices, bob.account.user_id(), &antwort)
            .unwrap();
        assert_eq!(event.content, json!({ "hallo": "alice" }));
    }

    #[test]
    fn falscher_absender_wird_abgelehnt() {
        let (alice, mut bob) = alice_und_bob();
        let bob_device = alice
            .devices
            .get_device(bob.account.user_id(), bob.account.device_id())
            .unwrap()
            .unwrap();
        let content = alice
            .sessions
            .encrypt(&alice.account, &bob_device, "m.test", json!({}))
            .unwrap();
        let mallory = UserId::parse("@mallory:example.org").unwrap();
        assert!(matches!(
            bob.sessions
                .decrypt_to_device(&mut bob.account, &bob.devices, &mallory, &content),
            Err(CryptoError::UngueltigeDaten(_))
        ));
    }

    #[test]
    fn abgelehntes_event_verbraucht_keinen_einmalschluessel() {
        let (alice, mut bob) = alice_und_bob();
        let bob_device = alice
            .devices
            .get_device(bob.account.user_id(), bob.account.device_id())
            .unwrap()
            .unwrap();
        let content = alice
            .sessions
            .encrypt(&alice.account, &bob_device, "m.test", json!({ "n": 1 }))
            .unwrap();
        let alice_key = alice.account.identity_keys().curve25519;
        let vorher = bob.account.published_one_time_keys();

        let mallory = UserId::parse("@mallory:example.org").unwrap();
        assert!(bob
            .sessions
            .decrypt_to_device(&mut bob.account, &bob.devices, &mallory, &content)
            .is_err());
        assert_eq!(bob.account.published_one_time_keys(), vorher);
        assert!(bob.sessions.store.get_sessions(&alice_key).unwrap().is_empty());

        // Der echte Absender kommt danach noch durch
        let (event, _) = bob
            .sessions
            .decrypt_to_device(&mut bob.account, &bob.devices, alice.account.user_id(), &content)
            .unwrap();
        assert_eq!(event.content, json!({ "n": 1 }));
        assert_eq!(bob.account.published_one_time_keys().len(), vorher.len() - 1);
        assert_eq!(bob.sessions.store.get_sessions(&alice_key).unwrap().len(), 1);
    }

    #[test]
    fn abgelehntes_event_laesst_bestehende_sitzung_unveraendert() {
        let (alice, mut bob) = alice_und_bob();
        let bob_device = alice
            .devices
            .get_device(bob.account.user_id(), bob.account.device_id())
            .unwrap()
            .unwrap();
        let erste = alice
            .sessions
            .encrypt(&alice.account, &bob_device, "m.test", json!({ "n": 1 }))
            .unwrap();
        let zweite = alice
            .sessions
            .encrypt(&alice.account, &bob_device, "m.test", json!({ "n": 2 }))
            .unwrap();
        bob.sessions
            .decrypt_to_device(&mut bob.account, &bob.devices, alice.account.user_id(), &erste)
            .unwrap();

        let mallory = UserId::parse("@mallory:example.org").unwrap();
        assert!(bob
            .sessions
            .decrypt_to_device(&mut bob.account, &bob.devices, &mallory, &zweite)
            .is_err());

        // Der Nachrichtenschluessel wurde nicht verbraucht
        let (event, _) = bob
            .sessions
            .decrypt_to_device(&mut bob.account, &bob.devices, alice.account.user_id(), &zweite)
            .unwrap();
        assert_eq!(event.content, json!({ "n": 2 }));
    }

    #[test]
    fn ohne_sitzung_keine_verschluesselung() {
        let alice = seite("@alice:example.org", "ALICEDEV");
        let bob = seite("@bob:example.org", "BOBDEV");
        let bob_device = DeviceRecord::own(&bob.account);
        assert!(matches!(
            alice.sessions.encrypt(&alice.account, &bob_device, "m.test", json!({})),
            Err(CryptoError::NoOlmSession { .. })
        ));
    }
}
