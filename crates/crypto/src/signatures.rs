//! Signaturen ueber kanonisches JSON
//!
//! Signiert wird immer kanonisches JSON: Objekt-Schluessel sortiert, keine
//! Leerzeichen, ohne die Felder `signatures` und `unsigned`. Die Signatur
//! selbst erzeugt der [`Account`](crate::olm::Account).

use serde_json::{Map, Value};
use vodozemac::Ed25519Signature;

use nio_core::UserId;

use crate::error::{CryptoError, CryptoResult};
use crate::types::Ed25519PublicKey;

/// Serialisiert ein JSON-Objekt kanonisch.
///
/// `signatures` und `unsigned` auf oberster Ebene werden entfernt,
/// Objekt-Schluessel rekursiv sortiert.
pub fn canonical_json(value: &Value) -> CryptoResult<String> {
    let Value::Object(map) = value else {
        return Err(CryptoError::UngueltigeDaten(
            "nur JSON-Objekte koennen signiert werden".into(),
        ));
    };
    let mut map = map.clone();
    map.remove("signatures");
    map.remove("unsigned");
    Ok(serde_json::to_string(&sortieren(Value::Object(map)))?)
}

fn sortieren(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut eintraege: Vec<(String, Value)> = map.into_iter().collect();
            eintraege.sort_by(|a, b| a.0.cmp(&b.0));
            let sortiert: Map<String, Value> = eintraege
                .into_iter()
                .map(|(k, v)| (k, sortieren(v)))
                .collect();
            Value::Object(sortiert)
        }
        Value::Array(werte) => Value::Array(werte.into_iter().map(sortieren).collect()),
        anderes => anderes,
    }
}

/// Prueft die Signatur `signatures[user_id][key_id]` eines JSON-Objekts
pub fn verify_json(
    value: &Value,
    user_id: &UserId,
    key_id: &str,
    public_key: &Ed25519PublicKey,
) -> CryptoResult<()> {
    let signature = value
        .get("signatures")
        .and_then(|s| s.get(user_id.as_str()))
        .and_then(|s| s.get(key_id))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            CryptoError::SignaturVerifikation(format!("keine Signatur {key_id} von {user_id}"))
        })?;

    let ungueltig =
        || CryptoError::SignaturVerifikation(format!("ungueltige Signatur {key_id} von {user_id}"));
    let signature = Ed25519Signature::from_base64(signature).map_err(|_| ungueltig())?;
    let key = vodozemac::Ed25519PublicKey::try_from(*public_key)?;
    let canonical = canonical_json(value)?;

    key.verify(canonical.as_bytes(), &signature)
        .map_err(|_| ungueltig())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
