//! Chunked request bodies for the RPC bus.
//!
//! The RPC bus limits the size of a single message, so request bodies whose
//! serialised form exceeds [`CHUNK_SIZE`] bytes are split into ordered
//! fragments sharing one `request_id`. Every fragment is sent as a non-final
//! multipart call and a trailing empty fragment with `final = true` closes the
//! sequence. Smaller bodies travel as one non-multipart, final call.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Largest serialised body, in bytes, sent without chunking.
pub const CHUNK_SIZE: usize = 512 * 1024;

/// Inner payload of a chunk envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Complete request data; present only on non-multipart calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Serialised fragment; present only on multipart calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipart_data: Option<String>,
}

/// One RPC bus call of a (possibly chunked) request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEnvelope {
    /// Request data or a fragment of it.
    pub payload: ChunkPayload,
    /// Marks the last call of a sequence.
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Marks calls that belong to a fragmented sequence.
    pub multipart: bool,
    /// Identifier shared by every call of one request.
    pub request_id: String,
}

impl ChunkEnvelope {
    /// Builds the single non-multipart call carrying `data` in full.
    #[must_use]
    pub fn whole(data: Value, request_id: Uuid) -> Self {
        Self {
            payload: ChunkPayload {
                data: Some(data),
                multipart_data: None,
            },
            is_final: true,
            multipart: false,
            request_id: request_id.to_string(),
        }
    }

    /// Builds one non-final fragment call.
    #[must_use]
    pub fn fragment(part: &str, request_id: Uuid) -> Self {
        Self {
            payload: ChunkPayload {
                data: None,
                multipart_data: Some(part.to_owned()),
            },
            is_final: false,
            multipart: true,
            request_id: request_id.to_string(),
        }
    }

    /// Builds the empty, final call closing a fragmented sequence.
    #[must_use]
    pub fn terminator(request_id: Uuid) -> Self {
        Self {
            payload: ChunkPayload {
                data: None,
                multipart_data: Some(String::new()),
            },
            is_final: true,
            multipart: true,
            request_id: request_id.to_string(),
        }
    }

    /// Plans the calls needed to deliver `data`.
    ///
    /// Bodies of at most [`CHUNK_SIZE`] serialised bytes yield one
    /// [`ChunkEnvelope::whole`] call. Larger bodies yield consecutive
    /// fragments of at most [`CHUNK_SIZE`] bytes, each cut on a character
    /// boundary, followed by one [`ChunkEnvelope::terminator`].
    #[must_use]
    pub fn plan(data: &Value, request_id: Uuid) -> Vec<Self> {
        let serialised = data.to_string();
        if serialised.len() <= CHUNK_SIZE {
            return vec![Self::whole(data.clone(), request_id)];
        }
        let mut calls: Vec<Self> = split_on_char_boundaries(&serialised, CHUNK_SIZE)
            .into_iter()
            .map(|part| Self::fragment(part, request_id))
            .collect();
        calls.push(Self::terminator(request_id));
        calls
    }

    /// Concatenates the fragments of a multipart sequence in order.
    ///
    /// Returns `None` for a non-multipart sequence.
    #[must_use]
    pub fn reassemble(calls: &[Self]) -> Option<String> {
        if !calls.iter().all(|call| call.multipart) {
            return None;
        }
        Some(
            calls
                .iter()
                .filter_map(|call| call.payload.multipart_data.as_deref())
                .collect(),
        )
    }
}

fn split_on_char_boundaries(text: &str, limit: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut cut = limit.min(rest.len());
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        parts.push(head);
        rest = tail;
    }
    parts
}
