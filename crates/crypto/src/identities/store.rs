//! Geraeteverwaltung: Uebernahme von Key-Query-Ergebnissen
//!
//! Ein Geraet wird nie still auf neue Schluessel umgestellt. Aendern sich die
//! Schluessel eines bekannten Geraets, wird der Datensatz ersetzt, das
//! Vertrauen zurueckgesetzt und alle Olm-Sitzungen mit dem alten wie dem
//! neuen Schluessel gesperrt.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;

use nio_core::{DeviceId, UserId};

use crate::error::{CryptoError, CryptoResult};
use crate::identities::device::{DeviceRecord, TrustState};
use crate::store::CryptoStore;
use crate::types::Curve25519PublicKey;

/// Ergebnis einer Geraete-Aktualisierung
#[derive(Debug, Default)]
pub struct DeviceChanges {
    pub new: Vec<DeviceRecord>,
    pub changed: Vec<DeviceRecord>,
    pub deleted: Vec<DeviceRecord>,
    /// Ein `KeyMismatch` pro Geraet mit geaenderten Schluesseln
    pub key_mismatches: Vec<CryptoError>,
}

impl DeviceChanges {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    pub fn extend(&mut self, other: DeviceChanges) {
        self.new.extend(other.new);
        self.changed.extend(other.changed);
        self.deleted.extend(other.deleted);
        self.key_mismatches.extend(other.key_mismatches);
    }
}

#[derive(Debug, Clone)]
pub struct DeviceStore {
    store: Arc<dyn CryptoStore>,
    own_user_id: UserId,
    own_device_id: DeviceId,
}

impl DeviceStore {
    pub fn new(store: Arc<dyn CryptoStore>, own_user_id: UserId, own_device_id: DeviceId) -> Self {
        Self {
            store,
            own_user_id,
            own_device_id,
        }
    }

    pub fn get_device(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> CryptoResult<Option<DeviceRecord>> {
        self.store.get_device(user_id, device_id)
    }

    /// Alle Geraete eines Benutzers, auch geloeschte
    pub fn devices_for_user(
        &self,
        user_id: &UserId,
    ) -> CryptoResult<BTreeMap<DeviceId, DeviceRecord>> {
        self.store.get_user_devices(user_id)
    }

    /// Sucht das Geraet mit diesem Curve25519-Identitaetsschluessel
    pub fn device_by_curve_key(
        &self,
        user_id: &UserId,
        curve25519: &Curve25519PublicKey,
    ) -> CryptoResult<Option<DeviceRecord>> {
        Ok(self
            .store
            .get_user_devices(user_id)?
            .into_values()
            .find(|d| !d.is_deleted() && &d.keys.curve25519 == curve25519))
    }

    pub fn is_own_device(&self, user_id: &UserId, device_id: &DeviceId) -> bool {
        user_id == &self.own_user_id && device_id == &self.own_device_id
    }

    /// Setzt den Vertrauensstatus. `Verified` quittiert einen Schluesselwechsel.
    pub fn set_trust_state(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        trust_state: TrustState,
    ) -> CryptoResult<DeviceRecord> {
        let mut device = self.store.get_device(user_id, device_id)?.ok_or_else(|| {
            CryptoError::UnknownDevice {
                user_id: user_id.clone(),
                device_id: device_id.clone(),
            }
        })?;

        // Geloeschte Geraete bleiben geloescht
        if device.is_deleted() {
            tracing::warn!(
                user_id = %user_id,
                device_id = %device_id,
                trust_state = ?trust_state,
                "Vertrauensstatus fuer geloeschtes Geraet abgelehnt"
            );
            return Err(CryptoError::DeletedDevice {
                user_id: user_id.clone(),
                device_id: device_id.clone(),
            });
        }

        device.trust_state = trust_state;
        if trust_state == TrustState::Verified {
            device.key_changed = false;
        }
        self.store.save_devices(std::slice::from_ref(&device))?;

        tracing::info!(
            user_id = %user_id,
            device_id = %device_id,
            trust_state = ?trust_state,
            "Vertrauensstatus geaendert"
        );
        Ok(device)
    }

    /// Uebernimmt die Geraeteliste eines Benutzers aus einer Key-Query-Antwort.
    ///
    /// Ungueltige Eintraege werden uebersprungen. Bekannte Geraete, die in der
    /// Liste fehlen, werden als geloescht markiert und nie wiederbelebt.
    pub fn upsert_devices(
        &self,
        user_id: &UserId,
        devices: &BTreeMap<String, Value>,
    ) -> CryptoResult<DeviceChanges> {
        let mut changes = DeviceChanges::default();
        let mut bekannt = self.store.get_user_devices(user_id)?;
        let mut gesehen = BTreeSet::new();
        let mut speichern = Vec::new();

        for (device_id, value) in devices {
            let device_id = match DeviceId::parse(device_id.as_str()) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        fehler = %e,
                        "Ungueltige Geraete-ID ignoriert"
                    );
                    continue;
                }
            };
            gesehen.insert(device_id.clone());

            if self.is_own_device(user_id, &device_id) {
                continue;
            }

            let neu = match DeviceRecord::from_json(user_id, &device_id, value) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        device_id = %device_id,
                        fehler = %e,
                        "Ungueltige Geraeteschluessel ignoriert"
                    );
                    continue;
                }
            };

            match bekannt.remove(&device_id) {
                None => {
                    tracing::debug!(user_id = %user_id, device_id = %device_id, "Neues Geraet");
                    speichern.push(neu.clone());
                    changes.new.push(neu);
                }
                Some(alt) if alt.is_deleted() => {
                    tracing::debug!(
                        user_id = %user_id,
                        device_id = %device_id,
                        "Geloeschtes Geraet taucht wieder auf, ignoriert"
                    );
                }
                Some(mut alt) if alt.keys == neu.keys => {
                    if alt.display_name != neu.display_name || alt.algorithms != neu.algorithms {
                        alt.display_name = neu.display_name;
                        alt.algorithms = neu.algorithms;
                        speichern.push(alt);
                    }
                }
                Some(alt) => {
                    tracing::warn!(
                        user_id = %user_id,
                        device_id = %device_id,
                        alter_schluessel = %alt.keys.curve25519,
                        neuer_schluessel = %neu.keys.curve25519,
                        "Schluesselwechsel erkannt, Geraet wird neu bewertet"
                    );
                    self.invalidate_sessions(&alt.keys.curve25519)?;
                    self.invalidate_sessions(&neu.keys.curve25519)?;

                    let ersetzt = DeviceRecord {
                        trust_state: if alt.is_blacklisted() {
                            TrustState::Blacklisted
                        } else {
                            TrustState::Unverified
                        },
                        key_changed: true,
                        first_seen: alt.first_seen,
                        ..neu
                    };
                    speichern.push(ersetzt.clone());
                    changes.changed.push(ersetzt);
                    changes.key_mismatches.push(CryptoError::KeyMismatch {
                        user_id: user_id.clone(),
                        device_id,
                    });
                }
            }
        }

        for (device_id, mut alt) in bekannt {
            if gesehen.contains(&device_id)
                || alt.is_deleted()
                || self.is_own_device(user_id, &device_id)
            {
                continue;
            }
            tracing::debug!(user_id = %user_id, device_id = %device_id, "Geraet entfernt");
            alt.trust_state = TrustState::Deleted;
            speichern.push(alt.clone());
            changes.deleted.push(alt);
        }

        self.store.save_devices(&speichern)?;
        Ok(changes)
    }

    /// Sperrt alle Olm-Sitzungen mit einem Identitaetsschluessel
    pub fn invalidate_sessions(&self, curve25519: &Curve25519PublicKey) -> CryptoResult<()> {
        let mut sessions = self.store.get_sessions(curve25519)?;
        if sessions.is_empty() {
            return Ok(());
        }
        for session in &mut sessions {
            session.invalidate();
        }
        self.store.save_sessions(&sessions)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
