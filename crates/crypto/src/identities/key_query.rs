//! Verfolgte Benutzer und Key-Query-Anfragen
//!
//! Jeder verfolgte Benutzer traegt ein Dirty-Flag. Jede Markierung erhoeht
//! eine Generationsnummer; eine Antwort loescht das Flag nur, wenn der
//! Benutzer enthalten ist und seit dem Absenden nicht erneut markiert wurde.
//! So geht eine Geraeteaenderung waehrend einer laufenden Anfrage nie verloren.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use uuid::Uuid;

use nio_core::api::{KeysQueryRequest, KeysQueryResponse};
use nio_core::UserId;

use crate::error::CryptoResult;
use crate::identities::store::{DeviceChanges, DeviceStore};
use crate::store::CryptoStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrackingState {
    dirty: bool,
    generation: u64,
}

#[derive(Debug)]
pub struct KeyQueryManager {
    store: Arc<dyn CryptoStore>,
    tracked: BTreeMap<UserId, TrackingState>,
    generation: u64,
    /// Laufende Anfragen: Benutzer mit der Generation beim Absenden
    in_flight: BTreeMap<Uuid, BTreeMap<UserId, u64>>,
}

impl KeyQueryManager {
    /// Laedt die verfolgten Benutzer aus dem Speicher
    pub fn new(store: Arc<dyn CryptoStore>) -> CryptoResult<Self> {
        let mut generation = 0;
        let tracked = store
            .load_tracked_users()?
            .into_iter()
            .map(|(user_id, dirty)| {
                generation += 1;
                (user_id, TrackingState { dirty, generation })
            })
            .collect();

        Ok(Self {
            store,
            tracked,
            generation,
            in_flight: BTreeMap::new(),
        })
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Nimmt Benutzer in die Verfolgung auf. Neue Benutzer sind sofort dirty.
    pub fn update_tracked_users<'a>(
        &mut self,
        users: impl IntoIterator<Item = &'a UserId>,
    ) -> CryptoResult<()> {
        let mut neu = Vec::new();
        for user_id in users {
            if self.tracked.contains_key(user_id) {
                continue;
            }
            let generation = self.next_generation();
            self.tracked.insert(
                user_id.clone(),
                TrackingState {
                    dirty: true,
                    generation,
                },
            );
            neu.push((user_id.clone(), true));
        }

        if !neu.is_empty() {
            tracing::debug!(anzahl = neu.len(), "Neue Benutzer werden verfolgt");
            self.store.save_tracked_users(&neu)?;
        }
        Ok(())
    }

    /// Markiert verfolgte Benutzer als dirty. Unbekannte werden ignoriert.
    pub fn mark_dirty<'a>(
        &mut self,
        users: impl IntoIterator<Item = &'a UserId>,
    ) -> CryptoResult<()> {
        let mut geaendert = Vec::new();
        for user_id in users {
            if !self.tracked.contains_key(user_id) {
                continue;
            }
            let generation = self.next_generation();
            if let Some(state) = self.tracked.get_mut(user_id) {
                state.dirty = true;
                state.generation = generation;
                geaendert.push((user_id.clone(), true));
            }
        }
        if !geaendert.is_empty() {
            self.store.save_tracked_users(&geaendert)?;
        }
        Ok(())
    }

    /// Beendet die Verfolgung (Benutzer teilt keinen verschluesselten Raum mehr)
    pub fn untrack<'a>(&mut self, users: impl IntoIterator<Item = &'a UserId>) -> CryptoResult<()> {
        let entfernt: Vec<UserId> = users
            .into_iter()
            .filter(|u| self.tracked.remove(*u).is_some())
            .cloned()
            .collect();
        for anfrage in self.in_flight.values_mut() {
            for user_id in &entfernt {
                anfrage.remove(user_id);
            }
        }
        if !entfernt.is_empty() {
            self.store.remove_tracked_users(&entfernt)?;
        }
        Ok(())
    }

    pub fn tracked_users(&self) -> BTreeSet<UserId> {
        self.tracked.keys().cloned().collect()
    }

    pub fn is_tracked(&self, user_id: &UserId) -> bool {
        self.tracked.contains_key(user_id)
    }

    /// Benutzer, deren Geraeteliste veraltet ist
    pub fn users_for_key_query(&self) -> BTreeSet<UserId> {
        self.tracked
            .iter()
            .filter(|(_, state)| state.dirty)
            .map(|(user_id, _)| user_id.clone())
            .collect()
    }

    pub fn should_query_keys(&self) -> bool {
        self.tracked.values().any(|state| state.dirty)
    }

    fn in_flight_generation(&self, user_id: &UserId) -> Option<u64> {
        self.in_flight
            .values()
            .filter_map(|anfrage| anfrage.get(user_id).copied())
            .max()
    }

    /// Baut eine Anfrage fuer alle dirty Benutzer, die nicht bereits mit ihrer
    /// aktuellen Generation angefragt werden
    pub fn build_query(&mut self) -> Option<(Uuid, KeysQueryRequest)> {
        let users: BTreeMap<UserId, u64> = self
            .tracked
            .iter()
            .filter(|(_, state)| state.dirty)
            .filter(|(user_id, state)| self.in_flight_generation(user_id) != Some(state.generation))
            .map(|(user_id, state)| (user_id.clone(), state.generation))
            .collect();

        if users.is_empty() {
            return None;
        }

        let request_id = Uuid::new_v4();
        let request = KeysQueryRequest {
            device_keys: users.keys().map(|u| (u.clone(), Vec::new())).collect(),
            timeout: None,
        };
        tracing::debug!(%request_id, anzahl = users.len(), "Key-Query erstellt");
        self.in_flight.insert(request_id, users);
        Some((request_id, request))
    }

    pub fn has_in_flight(&self, request_id: &Uuid) -> bool {
        self.in_flight.contains_key(request_id)
    }

    /// Verarbeitet eine Key-Query-Antwort
    pub fn receive_keys_query_response(
        &mut self,
        request_id: &Uuid,
        response: &KeysQueryResponse,
        devices: &DeviceStore,
    ) -> CryptoResult<DeviceChanges> {
        let angefragt = self.in_flight.remove(request_id).unwrap_or_default();
        let mut changes = DeviceChanges::default();

        for (server, fehler) in &response.failures {
            tracing::warn!(
                server = %server,
                fehler = %fehler,
                "Key-Query fuer Server fehlgeschlagen"
            );
        }

        let mut bereinigt = Vec::new();
        for (user_id, device_map) in &response.device_keys {
            let user_id = match UserId::parse(user_id.as_str()) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(fehler = %e, "Ungueltige Benutzer-ID in Key-Query-Antwort");
                    continue;
                }
            };
            if !self.tracked.contains_key(&user_id) {
                continue;
            }

            changes.extend(devices.upsert_devices(&user_id, device_map)?);

            let Some(&generation) = angefragt.get(&user_id) else {
                continue;
            };
            if let Some(state) = self.tracked.get_mut(&user_id) {
                if state.generation == generation {
                    state.dirty = false;
                    bereinigt.push((user_id.clone(), false));
                }
            }
        }

        if !bereinigt.is_empty() {
            self.store.save_tracked_users(&bereinigt)?;
        }
        tracing::debug!(
            %request_id,
            aktualisiert = bereinigt.len(),
            neu = changes.new.len(),
            geaendert = changes.changed.len(),
            geloescht = changes.deleted.len(),
            "Key-Query-Antwort verarbeitet"
        );
        Ok(changes)
    }

    /// Verwirft eine laufende Anfrage; die Benutzer bleiben dirty
    pub fn rollback(&mut self, request_id: &Uuid) {
        self.in_flight.remove(request_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
