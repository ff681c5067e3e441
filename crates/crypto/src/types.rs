//! Gemeinsame Typen fuer das Kryptografie-Subsystem

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CryptoError, CryptoResult};

/// Kodiert Bytes als ungepaddetes Base64 (Protokoll-Format)
pub fn base64_encode(bytes: impl AsRef<[u8]>) -> String {
    STANDARD_NO_PAD.encode(bytes)
}

/// Dekodiert ungepaddetes Base64; gepaddete Eingaben werden toleriert
pub fn base64_decode(input: &str) -> CryptoResult<Vec<u8>> {
    Ok(STANDARD_NO_PAD.decode(input.trim_end_matches('='))?)
}

fn decode_32(input: &str) -> CryptoResult<[u8; 32]> {
    let bytes = base64_decode(input)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::UngueltigeSchluesselLaenge {
            erwartet: 32,
            erhalten: bytes.len(),
        })
}

/// Oeffentlicher Curve25519-Schluessel (Identitaets-, Basis- oder Einmalschluessel)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Curve25519PublicKey(pub [u8; 32]);

impl Curve25519PublicKey {
    pub fn from_base64(input: &str) -> CryptoResult<Self> {
        Ok(Self(decode_32(input)?))
    }

    pub fn to_base64(&self) -> String {
        base64_encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<vodozemac::Curve25519PublicKey> for Curve25519PublicKey {
    fn from(key: vodozemac::Curve25519PublicKey) -> Self {
        Self(key.to_bytes())
    }
}

impl From<Curve25519PublicKey> for vodozemac::Curve25519PublicKey {
    fn from(key: Curve25519PublicKey) -> Self {
        vodozemac::Curve25519PublicKey::from_bytes(key.0)
    }
}

/// Oeffentlicher Ed25519-Schluessel (Signaturpruefung)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ed25519PublicKey(pub [u8; 32]);

impl Ed25519PublicKey {
    pub fn from_base64(input: &str) -> CryptoResult<Self> {
        Ok(Self(decode_32(input)?))
    }

    pub fn to_base64(&self) -> String {
        base64_encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<vodozemac::Ed25519PublicKey> for Ed25519PublicKey {
    fn from(key: vodozemac::Ed25519PublicKey) -> Self {
        Self(*key.as_bytes())
    }
}

impl TryFrom<Ed25519PublicKey> for vodozemac::Ed25519PublicKey {
    type Error = CryptoError;

    /// Nicht jede 32-Byte-Folge ist ein gueltiger Kurvenpunkt
    fn try_from(key: Ed25519PublicKey) -> CryptoResult<Self> {
        vodozemac::Ed25519PublicKey::from_slice(&key.0)
            .map_err(|e| CryptoError::UngueltigeDaten(format!("Ed25519-Schluessel: {e}")))
    }
}

macro_rules! base64_key_impls {
    ($typ:ident) => {
        impl std::fmt::Display for $typ {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.to_base64())
            }
        }

        impl std::fmt::Debug for $typ {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($typ), self.to_base64())
            }
        }

        impl Serialize for $typ {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_base64())
            }
        }

        impl<'de> Deserialize<'de> for $typ {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_base64(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

base64_key_impls!(Curve25519PublicKey);
base64_key_impls!(Ed25519PublicKey);

/// Die beiden Langzeitschluessel eines Geraets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityKeys {
    pub ed25519: Ed25519PublicKey,
    pub curve25519: Curve25519PublicKey,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
