//! Geraete-Account: Identitaet und Einmalschluessel
//!
//! Die Ratchet-Schluessel haelt `vodozemac::olm::Account`. Hier liegt nur
//! die Buchfuehrung um den Upload herum:
//! 1. `ausstehend` - erzeugt und in einem Upload enthalten, aber nicht bestaetigt
//! 2. `veroeffentlicht` - vom Server bestaetigt, koennen geclaimt werden
//! 3. verbraucht - nach dem Aufbau einer eingehenden Sitzung entfernt
//!
//! Ausstehende Schluessel werden verworfen, wenn der Upload fehlschlaegt, und
//! nie ein zweites Mal hochgeladen oder akzeptiert. Lokal werden hoechstens
//! doppelt so viele veroeffentlichte Schluessel gehalten wie hochgeladen
//! werden; die aeltesten fallen zuerst heraus.

use std::collections::{BTreeMap, VecDeque};

use serde_json::{json, Value};
use vodozemac::olm::SessionConfig;

use nio_core::api::{DeviceKeys, KeysUploadRequest, SignedKey};
use nio_core::types::key_id;
use nio_core::{DeviceId, DeviceKeyAlgorithm, EventEncryptionAlgorithm, UserId};

use crate::error::{CryptoError, CryptoResult};
use crate::olm::messages::PreKeyMessage;
use crate::olm::session::OlmSession;
use crate::signatures::canonical_json;
use crate::types::{Curve25519PublicKey, IdentityKeys};

/// Ein noch nicht bestaetigter Upload
#[derive(Debug, Clone)]
struct PendingUpload {
    request: KeysUploadRequest,
    keys: Vec<Curve25519PublicKey>,
}

/// Kryptografischer Zustand des eigenen Geraets
pub struct Account {
    user_id: UserId,
    device_id: DeviceId,
    inner: vodozemac::olm::Account,
    /// Veroeffentlichte, unverbrauchte Einmalschluessel, aelteste zuerst
    published: VecDeque<Curve25519PublicKey>,
    pending_upload: Option<PendingUpload>,
    /// Geraeteschluessel wurden erfolgreich hochgeladen
    shared: bool,
    /// Unverbrauchte `signed_curve25519`-Schluessel laut Server
    uploaded_key_count: u64,
    max_one_time_keys: usize,
}

impl Clone for Account {
    fn clone(&self) -> Self {
        Self {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            inner: vodozemac::olm::Account::from_pickle(self.inner.pickle()),
            published: self.published.clone(),
            pending_upload: self.pending_upload.clone(),
            shared: self.shared,
            uploaded_key_count: self.uploaded_key_count,
            max_one_time_keys: self.max_one_time_keys,
        }
    }
}

impl Account {
    pub fn new(user_id: UserId, device_id: DeviceId, max_one_time_keys: usize) -> Self {
        let inner = vodozemac::olm::Account::new();
        let max_one_time_keys = max_one_time_keys.min(inner.max_number_of_one_time_keys());
        Self {
            user_id,
            device_id,
            inner,
            published: VecDeque::new(),
            pending_upload: None,
            shared: false,
            uploaded_key_count: 0,
            max_one_time_keys,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn identity_keys(&self) -> IdentityKeys {
        let keys = self.inner.identity_keys();
        IdentityKeys {
            ed25519: keys.ed25519.into(),
            curve25519: keys.curve25519.into(),
        }
    }

    pub fn shared(&self) -> bool {
        self.shared
    }

    pub fn uploaded_key_count(&self) -> u64 {
        self.uploaded_key_count
    }

    pub fn max_one_time_keys(&self) -> usize {
        self.max_one_time_keys
    }

    /// Obergrenze fuer lokal gehaltene, veroeffentlichte Einmalschluessel
    pub fn max_published_keys(&self) -> usize {
        self.max_one_time_keys * 2
    }

    /// Oeffentliche Teile aller veroeffentlichten, unverbrauchten Einmalschluessel
    pub fn published_one_time_keys(&self) -> Vec<Curve25519PublicKey> {
        self.published.iter().copied().collect()
    }

    pub fn has_pending_upload(&self) -> bool {
        self.pending_upload.is_some()
    }

    /// Signiert kanonisches JSON mit dem Ed25519-Geraeteschluessel
    pub fn sign_json(&self, value: &Value) -> CryptoResult<String> {
        let canonical = canonical_json(value)?;
        Ok(self.inner.sign(canonical.as_str()).to_base64())
    }

    /// Muessen Schluessel hochgeladen werden?
    ///
    /// Ja, solange die Geraeteschluessel nie veroeffentlicht wurden oder der
    /// Server weniger als die Haelfte des Maximums an Einmalschluesseln hat.
    pub fn should_upload_keys(&self) -> bool {
        !self.shared || (self.uploaded_key_count as usize) < self.max_one_time_keys / 2
    }

    /// Selbstsignierte Geraeteschluessel
    pub fn device_keys(&self) -> CryptoResult<DeviceKeys> {
        let keys = self.identity_keys();
        let mut device_keys = DeviceKeys {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            algorithms: vec![
                EventEncryptionAlgorithm::OlmV1Curve25519AesSha2,
                EventEncryptionAlgorithm::MegolmV1AesSha2,
            ],
            keys: BTreeMap::from([
                (
                    key_id(&DeviceKeyAlgorithm::Curve25519, self.device_id.as_str()),
                    keys.curve25519.to_base64(),
                ),
                (
                    key_id(&DeviceKeyAlgorithm::Ed25519, self.device_id.as_str()),
                    keys.ed25519.to_base64(),
                ),
            ]),
            signatures: BTreeMap::new(),
            unsigned: None,
        };

        let signature = self.sign_json(&serde_json::to_value(&device_keys)?)?;
        device_keys.signatures.insert(
            self.user_id.clone(),
            BTreeMap::from([(self.signing_key_id(), signature)]),
        );
        Ok(device_keys)
    }

    fn signing_key_id(&self) -> String {
        key_id(&DeviceKeyAlgorithm::Ed25519, self.device_id.as_str())
    }

    /// Payload fuer `/keys/upload`.
    ///
    /// Solange ein Upload aussteht, wird derselbe Payload zurueckgegeben.
    /// `None`, wenn nichts hochzuladen ist.
    pub fn keys_for_upload(&mut self) -> CryptoResult<Option<KeysUploadRequest>> {
        if let Some(pending) = &self.pending_upload {
            return Ok(Some(pending.request.clone()));
        }
        if !self.should_upload_keys() {
            return Ok(None);
        }

        let benoetigt = if (self.uploaded_key_count as usize) < self.max_one_time_keys / 2 {
            self.max_one_time_keys
                .saturating_sub(self.uploaded_key_count as usize)
        } else {
            0
        };
        if benoetigt > 0 {
            self.inner.generate_one_time_keys(benoetigt);
        }

        let mut keys = Vec::with_capacity(benoetigt);
        let mut one_time_keys = BTreeMap::new();
        for (id, public) in self.inner.one_time_keys() {
            let public = Curve25519PublicKey::from(public);
            let key = public.to_base64();
            let signature = self.sign_json(&json!({ "key": key }))?;
            one_time_keys.insert(
                key_id(&DeviceKeyAlgorithm::SignedCurve25519, &id.to_base64()),
                SignedKey {
                    key,
                    signatures: BTreeMap::from([(
                        self.user_id.clone(),
                        BTreeMap::from([(self.signing_key_id(), signature)]),
                    )]),
                },
            );
            keys.push(public);
        }

        let device_keys = if self.shared {
            None
        } else {
            Some(self.device_keys()?)
        };

        if device_keys.is_none() && one_time_keys.is_empty() {
            return Ok(None);
        }

        let request = KeysUploadRequest {
            device_keys,
            one_time_keys,
        };
        tracing::debug!(
            user_id = %self.user_id,
            device_id = %self.device_id,
            einmal_schluessel = keys.len(),
            geraete_schluessel = request.device_keys.is_some(),
            "Schluessel-Upload vorbereitet"
        );
        self.pending_upload = Some(PendingUpload {
            request: request.clone(),
            keys,
        });
        Ok(Some(request))
    }

    /// Bestaetigt den ausstehenden Upload und uebernimmt den Schluessel-Zaehler
    pub fn receive_keys_upload_response(&mut self, counts: &BTreeMap<DeviceKeyAlgorithm, u64>) {
        if let Some(pending) = self.pending_upload.take() {
            self.inner.mark_keys_as_published();
            let anzahl = pending.keys.len();
            self.published.extend(pending.keys);
            self.enforce_published_limit();
            if pending.request.device_keys.is_some() {
                self.shared = true;
            }
            tracing::info!(
                device_id = %self.device_id,
                einmal_schluessel = anzahl,
                "Schluessel veroeffentlicht"
            );
        }
        self.uploaded_key_count = counts
            .get(&DeviceKeyAlgorithm::SignedCurve25519)
            .copied()
            .unwrap_or(0);
    }

    fn enforce_published_limit(&mut self) {
        let grenze = self.max_published_keys();
        let mut entfernt = 0usize;
        while self.published.len() > grenze {
            self.published.pop_front();
            entfernt += 1;
        }
        if entfernt > 0 {
            tracing::debug!(
                device_id = %self.device_id,
                entfernt,
                "Aelteste Einmalschluessel verworfen"
            );
        }
    }

    /// Verwirft den ausstehenden Upload.
    ///
    /// vodozemac behaelt die privaten Teile noch, sie werden aber weder
    /// erneut hochgeladen noch fuer eingehende Sitzungen akzeptiert.
    pub fn discard_pending_upload(&mut self) {
        if let Some(pending) = self.pending_upload.take() {
            self.inner.mark_keys_as_published();
            tracing::warn!(
                device_id = %self.device_id,
                einmal_schluessel = pending.keys.len(),
                "Ausstehender Schluessel-Upload verworfen"
            );
        }
    }

    /// Zaehler aus der Sync-Antwort (fehlende Zaehler aendern nichts)
    pub fn update_key_counts(&mut self, counts: &BTreeMap<DeviceKeyAlgorithm, u64>) {
        if let Some(count) = counts.get(&DeviceKeyAlgorithm::SignedCurve25519) {
            self.uploaded_key_count = *count;
        }
    }

    /// Ausgehende Sitzung mit einem geclaimten Einmalschluessel
    pub fn create_outbound_session(
        &self,
        their_identity_key: Curve25519PublicKey,
        their_one_time_key: Curve25519PublicKey,
    ) -> OlmSession {
        let session = self.inner.create_outbound_session(
            SessionConfig::version_1(),
            their_identity_key.into(),
            their_one_time_key.into(),
        );
        OlmSession::new(session, their_identity_key)
    }

    /// Eingehende Sitzung aus einer Pre-Key-Nachricht.
    ///
    /// Der verwendete Einmalschluessel wird erst nach erfolgreicher
    /// Entschluesselung entfernt.
    pub fn create_inbound_session(
        &mut self,
        sender_key: Curve25519PublicKey,
        message: &PreKeyMessage,
    ) -> CryptoResult<(OlmSession, Vec<u8>)> {
        if Curve25519PublicKey::from(message.identity_key()) != sender_key {
            return Err(CryptoError::UngueltigeDaten(
                "Identitaetsschluessel der Pre-Key-Nachricht passt nicht zum Absender".into(),
            ));
        }

        let one_time_key = Curve25519PublicKey::from(message.one_time_key());
        let Some(position) = self.published.iter().position(|k| *k == one_time_key) else {
            return Err(CryptoError::Entschluesselung(format!(
                "unbekannter Einmalschluessel {one_time_key}"
            )));
        };

        let result = self.inner.create_inbound_session(sender_key.into(), message)?;
        self.published.remove(position);
        let session = OlmSession::new(result.session, sender_key);

        tracing::info!(
            sender_key = %sender_key,
            session_id = %session.session_id(),
            "Eingehende Olm-Sitzung erstellt"
        );
        Ok((session, result.plaintext))
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("identity_keys", &self.identity_keys())
            .field("shared", &self.shared)
            .field("uploaded_key_count", &self.uploaded_key_count)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::olm::messages::OlmMessage;
    use crate::signatures::verify_json;
    use nio_core::types::split_key_id;

    fn account() -> Account {
        Account::new(
            UserId::parse("@alice:example.org").unwrap(),
            DeviceId::parse("ALICEDEV").unwrap(),
            10,
        )
    }

    fn counts(n: u64) -> BTreeMap<DeviceKeyAlgorithm, u64> {
        BTreeMap::from([(DeviceKeyAlgorithm::SignedCurve25519, n)])
    }

    #[test]
    fn neuer_account_muss_hochladen() {
        let mut account = account();
        assert!(account.should_upload_keys());

        let request = account.keys_for_upload().unwrap().unwrap();
        assert!(request.device_keys.is_some());
        assert_eq!(request.one_time_keys.len(), 10);
        for key_id in request.one_time_keys.keys() {
            assert_eq!(split_key_id(key_id).unwrap().0, DeviceKeyAlgorithm::SignedCurve25519);
        }
    }

    #[test]
    fn geraeteschluessel_sind_selbstsigniert() {
        let account = account();
        let device_keys = serde_json::to_value(account.device_keys().unwrap()).unwrap();
        verify_json(
            &device_keys,
            account.user_id(),
            "ed25519:ALICEDEV",
            &account.identity_keys().ed25519,
        )
        .unwrap();
    }

    #[test]
    fn einmalschluessel_sind_signiert() {
        let mut account = account();
        let request = account.keys_for_upload().unwrap().unwrap();
        let (_, signed) = request.one_time_keys.iter().next().unwrap();
        let value = serde_json::to_value(signed).unwrap();
        verify_json(&value, account.user_id(), "ed25519:ALICEDEV", &account.identity_keys().ed25519)
            .unwrap();
    }

    #[test]
    fn ausstehender_upload_ist_idempotent() {
        let mut account = account();
        let erster = account.keys_for_upload().unwrap().unwrap();
        let zweiter = account.keys_for_upload().unwrap().unwrap();
        assert_eq!(erster, zweiter);
        assert!(account.published_one_time_keys().is_empty());
    }

    #[test]
    fn bestaetigung_veroeffentlicht_schluessel() {
        let mut account = account();
        account.keys_for_upload().unwrap();
        account.receive_keys_upload_response(&counts(10));

        assert!(account.shared());
        assert_eq!(account.published_one_time_keys().len(), 10);
        assert!(!account.should_upload_keys());
        assert!(account.keys_for_upload().unwrap().is_none());
    }

    #[test]
    fn nachfuellen_unter_der_schwelle() {
        let mut account = account();
        account.keys_for_upload().unwrap();
        account.receive_keys_upload_response(&counts(10));

        account.update_key_counts(&counts(3));
        assert!(account.should_upload_keys());
        let request = account.keys_for_upload().unwrap().unwrap();
        assert!(request.device_keys.is_none());
        assert_eq!(request.one_time_keys.len(), 7);
    }

    #[test]
    fn verworfener_upload_wird_nicht_wiederverwendet() {
        let mut account = account();
        let erster = account.keys_for_upload().unwrap().unwrap();
        account.discard_pending_upload();
        let zweiter = account.keys_for_upload().unwrap().unwrap();

        for key_id in erster.one_time_keys.keys() {
            assert!(!zweiter.one_time_keys.contains_key(key_id));
        }
        assert!(account.published_one_time_keys().is_empty());
    }

    #[test]
    fn sync_ohne_zaehler_aendert_nichts() {
        let mut account = account();
        account.keys_for_upload().unwrap();
        account.receive_keys_upload_response(&counts(10));
        account.update_key_counts(&BTreeMap::new());
        assert_eq!(account.uploaded_key_count(), 10);
    }

    #[test]
    fn einmalschluessel_wird_genau_einmal_verbraucht() {
        let alice = account();
        let mut bob = Account::new(
            UserId::parse("@bob:example.org").unwrap(),
            DeviceId::parse("BOBDEV").unwrap(),
            10,
        );
        bob.keys_for_upload().unwrap();
        bob.receive_keys_upload_response(&counts(10));

        let otk = bob.published_one_time_keys()[0];
        let mut outbound = alice.create_outbound_session(bob.identity_keys().curve25519, otk);
        let OlmMessage::PreKey(message) = outbound.encrypt(b"hallo").unwrap() else {
            panic!("Pre-Key-Nachricht erwartet");
        };

        let sender = alice.identity_keys().curve25519;
        let (_, plaintext) = bob.create_inbound_session(sender, &message).unwrap();
        assert_eq!(plaintext, b"hallo");
        assert_eq!(bob.published_one_time_keys().len(), 9);

        // Zweiter Versuch mit demselben Einmalschluessel schlaegt fehl
        assert!(bob.create_inbound_session(sender, &message).is_err());
    }

    #[test]
    fn veroeffentlichte_schluessel_sind_begrenzt() {
        let mut account = Account::new(
            UserId::parse("@alice:example.org").unwrap(),
            DeviceId::parse("ALICEDEV").unwrap(),
            4,
        );
        let mut letzte = Vec::new();
        for _ in 0..6 {
            // Der Server meldet jedes Mal einen leeren Vorrat
            account.update_key_counts(&counts(0));
            let request = account.keys_for_upload().unwrap().unwrap();
            assert_eq!(request.one_time_keys.len(), 4);
            letzte = request
                .one_time_keys
                .values()
                .map(|k| Curve25519PublicKey::from_base64(&k.key).unwrap())
                .collect();
            account.receive_keys_upload_response(&counts(0));
        }

        let gehalten = account.published_one_time_keys();
        assert_eq!(gehalten.len(), account.max_published_keys());
        assert_eq!(gehalten.len(), 8);
        for key in &letzte {
            assert!(gehalten.contains(key));
        }
    }

    #[test]
    fn verdraengter_schluessel_wird_nicht_akzeptiert() {
        let alice = account();
        let mut bob = Account::new(
            UserId::parse("@bob:example.org").unwrap(),
            DeviceId::parse("BOBDEV").unwrap(),
            2,
        );
        bob.keys_for_upload().unwrap();
        bob.receive_keys_upload_response(&counts(0));
        let aeltester = bob.published_one_time_keys()[0];
        for _ in 0..2 {
            bob.keys_for_upload().unwrap();
            bob.receive_keys_upload_response(&counts(0));
        }
        assert!(!bob.published_one_time_keys().contains(&aeltester));

        let mut outbound = alice.create_outbound_session(bob.identity_keys().curve25519, aeltester);
        let OlmMessage::PreKey(message) = outbound.encrypt(b"spaet").unwrap() else {
            panic!("Pre-Key-Nachricht erwartet");
        };
        assert!(matches!(
            bob.create_inbound_session(alice.identity_keys().curve25519, &message),
            Err(CryptoError::Entschluesselung(_))
        ));
    }
}
