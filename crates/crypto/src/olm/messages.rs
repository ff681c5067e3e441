//! Olm-Nachrichten auf dem Draht
//!
//! Eine Olm-Nachricht besteht aus einem Typ (0 = Pre-Key, 1 = normal) und
//! einem Base64-kodierten Body. Das Binaerformat selbst kommt aus vodozemac.

pub use vodozemac::olm::{Message, OlmMessage, PreKeyMessage};

use crate::error::{CryptoError, CryptoResult};

pub const PRE_KEY_MESSAGE: u8 = 0;
pub const NORMAL_MESSAGE: u8 = 1;

/// Zerlegt eine Nachricht in Typ und Body fuer `OlmCiphertextInfo`
pub fn to_wire(message: &OlmMessage) -> CryptoResult<(u8, String)> {
    let (message_type, body) = message.to_parts();
    let message_type = u8::try_from(message_type)
        .map_err(|_| CryptoError::UngueltigeDaten(format!("Nachrichtentyp {message_type}")))?;
    Ok((message_type, vodozemac::base64_encode(body)))
}

pub fn from_wire(message_type: u8, body: &str) -> CryptoResult<OlmMessage> {
    let body = vodozemac::base64_decode(body)
        .map_err(|e| CryptoError::UngueltigeDaten(format!("Olm-Nachricht Typ {message_type}: {e}")))?;
    OlmMessage::from_parts(message_type.into(), &body)
        .map_err(|e| CryptoError::UngueltigeDaten(format!("Olm-Nachricht Typ {message_type}: {e}")))
}
