//! Minimaler In-Process-Homeserver fuer die Integration-Tests
//!
//! Beantwortet Upload-, Query-, Claim- und To-Device-Anfragen und stellt
//! To-Device-Events beim naechsten Sync zu.

#![allow(dead_code)]

use std::collections::BTreeMap;

use serde_json::{json, Value};
use uuid::Uuid;

use nio_core::api::{KeysClaimRequest, SyncResponse};
use nio_core::event::ToDeviceEvent;
use nio_core::{DeviceId, DeviceKeyAlgorithm, RoomId, UserId};
use nio_crypto::{OlmMachine, OutgoingRequests, RequestType};

pub fn user(name: &str) -> UserId {
    UserId::parse(format!("@{name}:example.org")).expect("Benutzer-ID ungueltig")
}

pub fn device(name: &str) -> DeviceId {
    DeviceId::parse(name).expect("Geraete-ID ungueltig")
}

pub fn raum() -> RoomId {
    RoomId::parse("!raum:example.org").expect("Raum-ID ungueltig")
}

pub fn maschine(name: &str, geraet: &str) -> OlmMachine {
    OlmMachine::new(user(name), device(geraet)).expect("Maschine konnte nicht erstellt werden")
}

type Geraet = (UserId, DeviceId);

#[derive(Default)]
pub struct Homeserver {
    device_keys: BTreeMap<UserId, BTreeMap<DeviceId, Value>>,
    one_time_keys: BTreeMap<Geraet, Vec<(String, Value)>>,
    posteingang: BTreeMap<Geraet, Vec<Value>>,
}

impl Homeserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn otk_count(&self, geraet: &Geraet) -> u64 {
        self.one_time_keys.get(geraet).map_or(0, |k| k.len() as u64)
    }

    /// Beantwortet alle ausstehenden Anfragen einer Maschine
    pub fn abarbeiten(&mut self, machine: &mut OlmMachine) {
        let requests = machine
            .outgoing_requests()
            .expect("Anfragen konnten nicht erzeugt werden");
        for request in requests {
            let (typ, antwort) = self.beantworten(machine, &request.request);
            machine
                .mark_request_as_sent(&request.request_id, typ, &antwort)
                .expect("Antwort wurde nicht akzeptiert");
        }
    }

    /// Beantwortet eine einzelne Anfrage, ohne sie zurueckzureichen
    pub fn beantworten(
        &mut self,
        machine: &OlmMachine,
        request: &OutgoingRequests,
    ) -> (RequestType, Value) {
        let geraet = (machine.user_id().clone(), machine.device_id().clone());
        match request {
            OutgoingRequests::KeysUpload(upload) => {
                if let Some(keys) = &upload.device_keys {
                    self.device_keys
                        .entry(keys.user_id.clone())
                        .or_default()
                        .insert(keys.device_id.clone(), serde_json::to_value(keys).unwrap());
                }
                let eintrag = self.one_time_keys.entry(geraet.clone()).or_default();
                for (id, key) in &upload.one_time_keys {
                    eintrag.push((id.clone(), serde_json::to_value(key).unwrap()));
                }
                let anzahl = self.otk_count(&geraet);
                (
                    RequestType::KeysUpload,
                    json!({ "one_time_key_counts": { "signed_curve25519": anzahl } }),
                )
            }
            OutgoingRequests::KeysQuery(query) => {
                let mut device_keys = serde_json::Map::new();
                for user_id in query.device_keys.keys() {
                    let geraete: serde_json::Map<String, Value> = self
                        .device_keys
                        .get(user_id)
                        .map(|d| {
                            d.iter()
                                .map(|(id, v)| (id.to_string(), v.clone()))
                                .collect()
                        })
                        .unwrap_or_default();
                    device_keys.insert(user_id.to_string(), Value::Object(geraete));
                }
                (RequestType::KeysQuery, json!({ "device_keys": device_keys }))
            }
            OutgoingRequests::KeysClaim(claim) => (RequestType::KeysClaim, self.claim(claim)),
            OutgoingRequests::ToDeviceMessage(to_device) => {
                for (user_id, geraete) in &to_device.messages {
                    for (device_id, content) in geraete {
                        self.posteingang
                            .entry((user_id.clone(), device_id.clone()))
                            .or_default()
                            .push(json!({
                                "sender": machine.user_id(),
                                "type": to_device.event_type,
                                "content": content,
                            }));
                    }
                }
                (RequestType::ToDevice, json!({}))
            }
        }
    }

    fn claim(&mut self, claim: &KeysClaimRequest) -> Value {
        let mut one_time_keys = serde_json::Map::new();
        for (user_id, geraete) in &claim.one_time_keys {
            let mut pro_user = serde_json::Map::new();
            for (device_id, algorithm) in geraete {
                assert_eq!(algorithm, &DeviceKeyAlgorithm::SignedCurve25519);
                let Some(keys) = self
                    .one_time_keys
                    .get_mut(&(user_id.clone(), device_id.clone()))
                else {
                    continue;
                };
                if keys.is_empty() {
                    continue;
                }
                let (id, key) = keys.remove(0);
                pro_user.insert(device_id.to_string(), json!({ id: key }));
            }
            one_time_keys.insert(user_id.to_string(), Value::Object(pro_user));
        }
        json!({ "one_time_keys": one_time_keys })
    }

    /// Alle Einmalschluessel eines Geraets entfernen (Server hat keine mehr)
    pub fn einmal_schluessel_leeren(&mut self, user_id: &UserId, device_id: &DeviceId) {
        self.one_time_keys
            .remove(&(user_id.clone(), device_id.clone()));
    }

    /// Entfernt ein Geraet aus der Geraeteliste und gibt seine Schluessel zurueck
    pub fn geraet_entfernen(&mut self, user_id: &UserId, device_id: &DeviceId) -> Option<Value> {
        self.device_keys.get_mut(user_id)?.remove(device_id)
    }

    pub fn geraet_eintragen(&mut self, user_id: &UserId, device_id: &DeviceId, keys: Value) {
        self.device_keys
            .entry(user_id.clone())
            .or_default()
            .insert(device_id.clone(), keys);
    }

    /// Stellt wartende To-Device-Events zu
    pub fn sync(&mut self, machine: &mut OlmMachine) -> Vec<ToDeviceEvent> {
        self.sync_mit(machine, SyncResponse::default())
    }

    pub fn sync_mit(
        &mut self,
        machine: &mut OlmMachine,
        mut sync: SyncResponse,
    ) -> Vec<ToDeviceEvent> {
        let geraet = (machine.user_id().clone(), machine.device_id().clone());
        sync.to_device.events = self.posteingang.remove(&geraet).unwrap_or_default();
        sync.device_one_time_keys_count =
            BTreeMap::from([(DeviceKeyAlgorithm::SignedCurve25519, self.otk_count(&geraet))]);
        machine
            .receive_sync_response(&sync)
            .expect("Sync konnte nicht verarbeitet werden")
    }

    /// Claimt fehlende Sitzungen und beantwortet die Claim-Anfrage
    pub fn sitzungen_aufbauen(
        &mut self,
        machine: &mut OlmMachine,
        users: &[UserId],
    ) -> Option<Uuid> {
        let (request_id, _) = machine
            .get_missing_sessions(users)
            .expect("Claim konnte nicht erstellt werden")?;
        self.abarbeiten(machine);
        Some(request_id)
    }
}

/// Alice und Bob mit hochgeladenen Schluesseln, gegenseitig bekannt und mit
/// einer Olm-Sitzung von Alice zu Bob
pub fn alice_und_bob(server: &mut Homeserver) -> (OlmMachine, OlmMachine) {
    let mut alice = maschine("alice", "ALICEDEV");
    let mut bob = maschine("bob", "BOBDEV");
    server.abarbeiten(&mut alice);
    server.abarbeiten(&mut bob);

    let beide = [user("alice"), user("bob")];
    alice.update_tracked_users(&beide).unwrap();
    bob.update_tracked_users(&beide).unwrap();
    server.abarbeiten(&mut alice);
    server.abarbeiten(&mut bob);

    server
        .sitzungen_aufbauen(&mut alice, &[user("bob")])
        .expect("Alice braucht eine Sitzung mit Bob");
    (alice, bob)
}
