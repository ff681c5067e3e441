//! Gemeinsame Identifikationstypen fuer nio
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Sie werden beim
//! Erstellen und beim Deserialisieren validiert.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Benutzer-ID im Format `@lokalteil:server`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Parst und validiert eine User-ID
    pub fn parse(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        let gueltig = id
            .strip_prefix('@')
            .and_then(|rest| rest.split_once(':'))
            .is_some_and(|(lokal, server)| !lokal.is_empty() && !server.is_empty());

        if gueltig {
            Ok(Self(id))
        } else {
            Err(CoreError::UngueltigeUserId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lokalteil ohne fuehrendes `@`
    pub fn localpart(&self) -> &str {
        self.0[1..].split_once(':').map(|(l, _)| l).unwrap_or_default()
    }

    /// Servername hinter dem ersten `:`
    pub fn server_name(&self) -> &str {
        self.0.split_once(':').map(|(_, s)| s).unwrap_or_default()
    }
}

impl TryFrom<String> for UserId {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for UserId {
    type Error = CoreError;

    fn try_from(value: &str) -> CoreResult<Self> {
        Self::parse(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Geraete-ID (frei gewaehlt vom Homeserver, nicht leer, ohne Leerzeichen)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    pub fn parse(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        if id.is_empty() || id.chars().any(char::is_whitespace) || id.contains(':') {
            return Err(CoreError::UngueltigeDeviceId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceId {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for DeviceId {
    type Error = CoreError;

    fn try_from(value: &str) -> CoreResult<Self> {
        Self::parse(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raum-ID im Format `!kennung:server`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        let gueltig = id
            .strip_prefix('!')
            .and_then(|rest| rest.split_once(':'))
            .is_some_and(|(kennung, server)| !kennung.is_empty() && !server.is_empty());

        if gueltig {
            Ok(Self(id))
        } else {
            Err(CoreError::UngueltigeRoomId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for RoomId {
    type Error = CoreError;

    fn try_from(value: &str) -> CoreResult<Self> {
        Self::parse(value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Algorithmen
// ---------------------------------------------------------------------------

/// Algorithmus eines Geraeteschluessels (`ed25519`, `curve25519`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceKeyAlgorithm {
    Ed25519,
    Curve25519,
    SignedCurve25519,
    /// Vom Server gemeldeter, hier unbekannter Algorithmus
    Custom(String),
}

impl DeviceKeyAlgorithm {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::Curve25519 => "curve25519",
            Self::SignedCurve25519 => "signed_curve25519",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for DeviceKeyAlgorithm {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ed25519" => Self::Ed25519,
            "curve25519" => Self::Curve25519,
            "signed_curve25519" => Self::SignedCurve25519,
            _ => Self::Custom(value),
        }
    }
}

impl From<DeviceKeyAlgorithm> for String {
    fn from(algorithm: DeviceKeyAlgorithm) -> Self {
        algorithm.as_str().to_string()
    }
}

impl std::fmt::Display for DeviceKeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Baut eine Schluessel-ID der Form `algorithmus:kennung`
pub fn key_id(algorithm: &DeviceKeyAlgorithm, kennung: &str) -> String {
    format!("{}:{}", algorithm.as_str(), kennung)
}

/// Zerlegt eine Schluessel-ID der Form `algorithmus:kennung`
pub fn split_key_id(key_id: &str) -> CoreResult<(DeviceKeyAlgorithm, &str)> {
    match key_id.split_once(':') {
        Some((algorithm, kennung)) if !algorithm.is_empty() && !kennung.is_empty() => {
            Ok((DeviceKeyAlgorithm::from(algorithm.to_string()), kennung))
        }
        _ => Err(CoreError::UngueltigeSchluesselId(key_id.to_string())),
    }
}

/// Verschluesselungsalgorithmus eines Events
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventEncryptionAlgorithm {
    /// Paarweise Olm-Sitzungen (To-Device)
    OlmV1Curve25519AesSha2,
    /// Megolm-Gruppensitzungen (Raum-Events)
    MegolmV1AesSha2,
    Custom(String),
}

impl EventEncryptionAlgorithm {
    pub const OLM_V1: &'static str = "m.olm.v1.curve25519-aes-sha2";
    pub const MEGOLM_V1: &'static str = "m.megolm.v1.aes-sha2";

    pub fn as_str(&self) -> &str {
        match self {
            Self::OlmV1Curve25519AesSha2 => Self::OLM_V1,
            Self::MegolmV1AesSha2 => Self::MEGOLM_V1,
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for EventEncryptionAlgorithm {
    fn from(value: String) -> Self {
        match value.as_str() {
            Self::OLM_V1 => Self::OlmV1Curve25519AesSha2,
            Self::MEGOLM_V1 => Self::MegolmV1AesSha2,
            _ => Self::Custom(value),
        }
    }
}

impl From<EventEncryptionAlgorithm> for String {
    fn from(algorithm: EventEncryptionAlgorithm) -> Self {
        algorithm.as_str().to_string()
    }
}

impl std::fmt::Display for EventEncryptionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
