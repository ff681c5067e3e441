//! Eingehende Megolm-Gruppensitzung
//!
//! vodozemac entschluesselt jeden Index beliebig oft. Der Replay-Schutz
//! liegt deshalb hier: ein Index wird hoechstens einmal akzeptiert, jeder
//! Index kleiner oder gleich dem hoechsten bisher akzeptierten gilt als Replay.

use chrono::{DateTime, Utc};
use vodozemac::megolm::{SessionConfig, SessionOrdering};

use nio_core::RoomId;

use crate::error::{CryptoError, CryptoResult};
use crate::megolm::{MegolmMessage, SessionKey};
use crate::types::Curve25519PublicKey;

pub struct InboundGroupSession {
    inner: vodozemac::megolm::InboundGroupSession,
    room_id: RoomId,
    session_id: String,
    sender_key: Curve25519PublicKey,
    first_known_index: u32,
    highest_index: Option<u32>,
    imported_at: DateTime<Utc>,
}

impl Clone for InboundGroupSession {
    fn clone(&self) -> Self {
        Self {
            inner: vodozemac::megolm::InboundGroupSession::from_pickle(self.inner.pickle()),
            room_id: self.room_id.clone(),
            session_id: self.session_id.clone(),
            sender_key: self.sender_key,
            first_known_index: self.first_known_index,
            highest_index: self.highest_index,
            imported_at: self.imported_at,
        }
    }
}

impl InboundGroupSession {
    /// Erstellt die Sitzung aus einem exportierten, signierten Sitzungsschluessel
    pub fn new(
        room_id: RoomId,
        sender_key: Curve25519PublicKey,
        session_key: &str,
    ) -> CryptoResult<Self> {
        let key = SessionKey::from_base64(session_key)?;
        let inner = vodozemac::megolm::InboundGroupSession::new(&key, SessionConfig::version_1());
        Ok(Self {
            session_id: inner.session_id(),
            first_known_index: inner.first_known_index(),
            inner,
            room_id,
            sender_key,
            highest_index: None,
            imported_at: Utc::now(),
        })
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Curve25519-Schluessel des Geraets, das den Schluessel verteilt hat
    pub fn sender_key(&self) -> Curve25519PublicKey {
        self.sender_key
    }

    pub fn first_known_index(&self) -> u32 {
        self.first_known_index
    }

    pub fn highest_index(&self) -> Option<u32> {
        self.highest_index
    }

    pub fn imported_at(&self) -> DateTime<Utc> {
        self.imported_at
    }

    /// Vergleicht zwei Kopien derselben Sitzung.
    ///
    /// `Better` heisst: diese Kopie kennt fruehere Indizes als `other`.
    pub fn compare(&mut self, other: &mut InboundGroupSession) -> SessionOrdering {
        self.inner.compare(&mut other.inner)
    }

    /// Uebernimmt die Replay-Grenze einer ersetzten Kopie
    pub fn inherit_replay_state(&mut self, previous: &InboundGroupSession) {
        self.highest_index = self.highest_index.max(previous.highest_index);
    }

    /// Entschluesselt eine Base64-Nachricht und gibt Klartext und Index zurueck
    pub fn decrypt(&mut self, ciphertext: &str) -> CryptoResult<(Vec<u8>, u32)> {
        let message = MegolmMessage::from_base64(ciphertext)
            .map_err(|e| CryptoError::UngueltigeDaten(format!("Megolm-Nachricht: {e}")))?;
        let decrypted = self.inner.decrypt(&message)?;
        let index = decrypted.message_index;

        if let Some(hoechster) = self.highest_index {
            if index <= hoechster {
                tracing::warn!(
                    session_id = %self.session_id,
                    index,
                    hoechster,
                    "Megolm-Replay abgelehnt"
                );
                return Err(CryptoError::Replay {
                    session_id: self.session_id.clone(),
                    index,
                    hoechster,
                });
            }
        }

        self.highest_index = Some(index);
        Ok((decrypted.plaintext, index))
    }
}

impl std::fmt::Debug for InboundGroupSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundGroupSession")
            .field("room_id", &self.room_id)
            .field("session_id", &self.session_id)
            .field("sender_key", &self.sender_key)
            .field("first_known_index", &self.first_known_index)
            .field("highest_index", &self.highest_index)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
