//! Paarweise Olm-Sitzung
//!
//! Der Double Ratchet steckt in `vodozemac::olm::Session`. Die Huelle haelt
//! den Curve25519-Schluessel der Gegenseite, Zeitstempel fuer die Auswahl
//! der aktivsten Sitzung und die Sperre nach einem Schluesselwechsel.

use chrono::{DateTime, Utc};

use crate::error::{CryptoError, CryptoResult};
use crate::olm::messages::{OlmMessage, PreKeyMessage};
use crate::types::Curve25519PublicKey;

/// Paarweise Sitzung mit genau einem Geraet
pub struct OlmSession {
    inner: vodozemac::olm::Session,
    session_id: String,
    sender_key: Curve25519PublicKey,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
    invalidated: bool,
}

impl Clone for OlmSession {
    fn clone(&self) -> Self {
        Self {
            inner: vodozemac::olm::Session::from_pickle(self.inner.pickle()),
            session_id: self.session_id.clone(),
            sender_key: self.sender_key,
            created_at: self.created_at,
            last_used: self.last_used,
            invalidated: self.invalidated,
        }
    }
}

impl OlmSession {
    pub(crate) fn new(inner: vodozemac::olm::Session, sender_key: Curve25519PublicKey) -> Self {
        let jetzt = Utc::now();
        Self {
            session_id: inner.session_id(),
            inner,
            sender_key,
            created_at: jetzt,
            last_used: jetzt,
            invalidated: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Curve25519-Identitaetsschluessel der Gegenseite
    pub fn sender_key(&self) -> Curve25519PublicKey {
        self.sender_key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        self.last_used
    }

    /// Hat die Gegenseite schon geantwortet? Bis dahin gehen Pre-Key-Nachrichten raus.
    pub fn has_received_message(&self) -> bool {
        self.inner.has_received_message()
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Sperrt die Sitzung fuer ausgehende Nachrichten
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Gehoert die Pre-Key-Nachricht zu dieser Sitzung?
    pub fn matches_pre_key(&self, message: &PreKeyMessage) -> bool {
        message.session_id() == self.session_id
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> CryptoResult<OlmMessage> {
        if self.invalidated {
            return Err(CryptoError::UngueltigeDaten(format!(
                "Olm-Sitzung {} ist gesperrt",
                self.session_id
            )));
        }
        let message = self.inner.encrypt(plaintext);
        self.last_used = Utc::now();
        Ok(message)
    }

    /// Entschluesselt eine Nachricht; bei Fehlern bleibt der Zustand unveraendert
    pub fn decrypt(&mut self, message: &OlmMessage) -> CryptoResult<Vec<u8>> {
        let plaintext = self.inner.decrypt(message)?;
        self.last_used = Utc::now();
        Ok(plaintext)
    }
}

impl std::fmt::Debug for OlmSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OlmSession")
            .field("session_id", &self.session_id)
            .field("sender_key", &self.sender_key)
            .field("created_at", &self.created_at)
            .field("invalidated", &self.invalidated)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
