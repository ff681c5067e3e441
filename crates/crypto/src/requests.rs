//! Ausgehende Anfragen und ihre Antworten
//!
//! Die Maschine fuehrt selbst kein I/O aus. Sie stellt Anfragen in eine
//! Warteschlange, der Aufrufer sendet sie und reicht die Antwort ueber
//! `mark_request_as_sent` zurueck.
//!
//! ```text
//! Created --poll--> Sent --Antwort--> entfernt
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use nio_core::api::{
    KeysClaimRequest, KeysClaimResponse, KeysQueryRequest, KeysQueryResponse, KeysUploadRequest,
    KeysUploadResponse, ToDeviceRequest, ToDeviceResponse,
};

use crate::error::{CryptoError, CryptoResult};

/// Geschlossene Menge der Anfragetypen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    KeysUpload,
    KeysQuery,
    KeysClaim,
    ToDevice,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::KeysUpload => "keys_upload",
            RequestType::KeysQuery => "keys_query",
            RequestType::KeysClaim => "keys_claim",
            RequestType::ToDevice => "to_device",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keys_upload" => Ok(RequestType::KeysUpload),
            "keys_query" => Ok(RequestType::KeysQuery),
            "keys_claim" => Ok(RequestType::KeysClaim),
            "to_device" => Ok(RequestType::ToDevice),
            anderer => Err(CryptoError::UngueltigeDaten(format!(
                "unbekannter Anfragetyp '{anderer}'"
            ))),
        }
    }
}

/// Inhalt einer ausgehenden Anfrage
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingRequests {
    KeysUpload(KeysUploadRequest),
    KeysQuery(KeysQueryRequest),
    KeysClaim(KeysClaimRequest),
    ToDeviceMessage(ToDeviceRequest),
}

impl OutgoingRequests {
    pub fn request_type(&self) -> RequestType {
        match self {
            OutgoingRequests::KeysUpload(_) => RequestType::KeysUpload,
            OutgoingRequests::KeysQuery(_) => RequestType::KeysQuery,
            OutgoingRequests::KeysClaim(_) => RequestType::KeysClaim,
            OutgoingRequests::ToDeviceMessage(_) => RequestType::ToDevice,
        }
    }

    /// Protokollgerechter JSON-Body
    pub fn body(&self) -> CryptoResult<Value> {
        Ok(match self {
            OutgoingRequests::KeysUpload(r) => serde_json::to_value(r)?,
            OutgoingRequests::KeysQuery(r) => serde_json::to_value(r)?,
            OutgoingRequests::KeysClaim(r) => serde_json::to_value(r)?,
            OutgoingRequests::ToDeviceMessage(r) => serde_json::to_value(r)?,
        })
    }
}

/// Eine Anfrage mit ihrer lokalen ID
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub request_id: Uuid,
    pub request: Arc<OutgoingRequests>,
}

impl OutgoingRequest {
    pub fn request_type(&self) -> RequestType {
        self.request.request_type()
    }
}

/// Eine gegen das Schema ihres Typs gepruefte Antwort
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingResponse {
    KeysUpload(KeysUploadResponse),
    KeysQuery(KeysQueryResponse),
    KeysClaim(KeysClaimResponse),
    ToDevice(ToDeviceResponse),
}

impl IncomingResponse {
    /// Prueft einen Antwort-Body; Schemafehler werden zu `MalformedResponse`
    pub fn parse(request_type: RequestType, body: &Value) -> CryptoResult<Self> {
        fn schema<T: serde::de::DeserializeOwned>(
            request_type: RequestType,
            body: &Value,
        ) -> CryptoResult<T> {
            serde_json::from_value(body.clone()).map_err(|e| {
                CryptoError::MalformedResponse(format!("Antwort auf {request_type}: {e}"))
            })
        }

        Ok(match request_type {
            RequestType::KeysUpload => IncomingResponse::KeysUpload(schema(request_type, body)?),
            RequestType::KeysQuery => IncomingResponse::KeysQuery(schema(request_type, body)?),
            RequestType::KeysClaim => IncomingResponse::KeysClaim(schema(request_type, body)?),
            RequestType::ToDevice => IncomingResponse::ToDevice(schema(request_type, body)?),
        })
    }
}

/// Zustand einer ausstehenden Anfrage; beantwortete Anfragen verlassen die
/// Warteschlange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Created,
    Sent,
}

#[derive(Debug)]
struct PendingRequest {
    request: OutgoingRequest,
    state: RequestState,
}

/// Warteschlange der ausstehenden Anfragen in Erstellungsreihenfolge
#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: Vec<PendingRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stellt eine Anfrage ein. Es gibt hoechstens einen ausstehenden Upload;
    /// ein zweiter gibt die ID des vorhandenen zurueck.
    pub fn enqueue(&mut self, request_id: Uuid, request: OutgoingRequests) -> Uuid {
        if request.request_type() == RequestType::KeysUpload {
            if let Some(vorhanden) = self
                .pending
                .iter()
                .find(|p| p.request.request_type() == RequestType::KeysUpload)
            {
                return vorhanden.request.request_id;
            }
        }

        tracing::trace!(%request_id, typ = %request.request_type(), "Anfrage eingereiht");
        self.pending.push(PendingRequest {
            request: OutgoingRequest {
                request_id,
                request: Arc::new(request),
            },
            state: RequestState::Created,
        });
        request_id
    }

    pub fn has_pending(&self, request_type: RequestType) -> bool {
        self.pending
            .iter()
            .any(|p| p.request.request_type() == request_type)
    }

    /// Status einer ausstehenden Anfrage; `None`, wenn unbekannt
    pub fn state(&self, request_id: &Uuid) -> Option<RequestState> {
        self.pending
            .iter()
            .find(|p| &p.request.request_id == request_id)
            .map(|p| p.state)
    }

    /// Prueft, ob die ID mit diesem Typ aussteht
    pub fn get(
        &self,
        request_id: &Uuid,
        request_type: RequestType,
    ) -> CryptoResult<&OutgoingRequest> {
        self.pending
            .iter()
            .find(|p| {
                &p.request.request_id == request_id && p.request.request_type() == request_type
            })
            .map(|p| &p.request)
            .ok_or_else(|| CryptoError::UnknownRequest {
                request_id: *request_id,
                request_type: request_type.to_string(),
            })
    }

    /// Alle ausstehenden Anfragen; erstellte gelten danach als gesendet
    pub fn poll(&mut self) -> Vec<OutgoingRequest> {
        self.pending
            .iter_mut()
            .map(|p| {
                if p.state == RequestState::Created {
                    p.state = RequestState::Sent;
                }
                p.request.clone()
            })
            .collect()
    }

    /// Entfernt eine beantwortete (oder verworfene) Anfrage
    pub fn acknowledge(
        &mut self,
        request_id: &Uuid,
        request_type: RequestType,
    ) -> CryptoResult<OutgoingRequest> {
        let position = self
            .pending
            .iter()
            .position(|p| {
                &p.request.request_id == request_id && p.request.request_type() == request_type
            })
            .ok_or_else(|| CryptoError::UnknownRequest {
                request_id: *request_id,
                request_type: request_type.to_string(),
            })?;
        let pending = self.pending.remove(position);
        tracing::trace!(%request_id, typ = %request_type, "Anfrage abgeschlossen");
        Ok(pending.request)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
