//! Wire frames for the acknowledged message socket.
//!
//! Every payload on the wire is a UTF-8 JSON object:
//!
//! ```text
//! { "id": string, "type": "MESSAGE"|"ACK"|"OPEN"|"PING"|"PONG", "data"?: string }
//! ```
//!
//! Oversized payloads are split into ordered chunks, each carried in its
//! own MESSAGE frame with a `"chunk": "n/total"` marker and acknowledged
//! separately. The receiver reassembles chunks by frame id.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameKind {
    /// Connect handshake carrying the sender's instance id in `data`.
    Open,
    /// Application payload (possibly one chunk of a larger payload).
    Message,
    /// Acknowledgement of a MESSAGE (echoes id and chunk marker).
    Ack,
    /// Liveness probe.
    Ping,
    /// Liveness reply (echoes the PING id).
    Pong,
}

/// Position of one chunk within a split payload, serialized as `"n/total"`.
///
/// Indices are 1-based on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMarker {
    /// 1-based chunk index.
    pub index: u32,
    /// Total chunk count.
    pub total: u32,
}

impl fmt::Display for ChunkMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.total)
    }
}

impl FromStr for ChunkMarker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (index, total) = s
            .split_once('/')
            .ok_or_else(|| format!("malformed chunk marker: {s}"))?;
        let index: u32 = index
            .parse()
            .map_err(|_| format!("malformed chunk index: {s}"))?;
        let total: u32 = total
            .parse()
            .map_err(|_| format!("malformed chunk total: {s}"))?;
        if index == 0 || total == 0 || index > total {
            return Err(format!("chunk marker out of range: {s}"));
        }
        Ok(Self { index, total })
    }
}

impl Serialize for ChunkMarker {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChunkMarker {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Message id. Chunks of one payload share the base id.
    pub id: String,
    /// Frame discriminator.
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// Payload text (MESSAGE), instance id (OPEN), absent otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Chunk position for split payloads, echoed on the ACK.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ChunkMarker>,
}

impl Frame {
    /// Build an OPEN frame announcing `instance_id`.
    pub fn open(id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: FrameKind::Open,
            data: Some(instance_id.into()),
            chunk: None,
        }
    }

    /// Build a single-part MESSAGE frame.
    pub fn message(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: FrameKind::Message,
            data: Some(data.into()),
            chunk: None,
        }
    }

    /// Build one chunk of a split MESSAGE.
    pub fn chunk(id: impl Into<String>, marker: ChunkMarker, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: FrameKind::Message,
            data: Some(data.into()),
            chunk: Some(marker),
        }
    }

    /// Build the ACK for a received MESSAGE frame.
    pub fn ack_for(frame: &Frame) -> Self {
        Self {
            id: frame.id.clone(),
            kind: FrameKind::Ack,
            data: None,
            chunk: frame.chunk,
        }
    }

    /// Build a PING frame.
    pub fn ping(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: FrameKind::Ping,
            data: None,
            chunk: None,
        }
    }

    /// Build the PONG reply to a PING frame.
    pub fn pong_for(ping: &Frame) -> Self {
        Self {
            id: ping.id.clone(),
            kind: FrameKind::Pong,
            data: None,
            chunk: None,
        }
    }

    /// Key identifying this frame in the sender's pending-ack table.
    ///
    /// Chunks of one payload share an id but are acked separately, so the
    /// chunk index participates in the key.
    pub fn ack_key(&self) -> String {
        match self.chunk {
            Some(marker) => format!("{}/{}", self.id, marker.index),
            None => self.id.clone(),
        }
    }

    /// Serialize to wire text.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("frame serialization cannot fail")
    }

    /// Parse wire text into a frame.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Split a payload into chunk-sized pieces.
///
/// Payloads of at most `threshold` bytes come back as a single piece.
/// Pieces never split a UTF-8 character.
pub fn split_payload(payload: &str, threshold: usize) -> Vec<String> {
    if payload.len() <= threshold {
        return vec![payload.to_string()];
    }

    let mut pieces = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        if rest.len() <= threshold {
            pieces.push(rest.to_string());
            break;
        }
        // Back off to the nearest char boundary at or below the threshold.
        let mut cut = threshold;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (piece, tail) = rest.split_at(cut);
        pieces.push(piece.to_string());
        rest = tail;
    }
    pieces
}

/// Buffer for one partially-received split payload.
#[derive(Debug)]
struct ChunkBuffer {
    total: u32,
    parts: Vec<Option<String>>,
    received: u32,
}

/// Reassembles split payloads by frame id.
///
/// Duplicate chunks (retransmits of an already-received piece) are ignored.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffers: HashMap<String, ChunkBuffer>,
}

impl Reassembler {
    /// Create an empty reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a MESSAGE frame. Returns the complete payload once every chunk
    /// of its id has arrived; single-part messages pass straight through.
    pub fn feed(&mut self, frame: &Frame) -> Option<String> {
        let data = frame.data.clone().unwrap_or_default();
        let marker = match frame.chunk {
            None => return Some(data),
            Some(marker) => marker,
        };

        let buffer = self.buffers.entry(frame.id.clone()).or_insert_with(|| ChunkBuffer {
            total: marker.total,
            parts: vec![None; marker.total as usize],
            received: 0,
        });

        if marker.total != buffer.total {
            log::warn!(
                "[Socket] Chunk total mismatch for id={}: {} vs {}",
                frame.id,
                marker.total,
                buffer.total
            );
            return None;
        }

        let slot = &mut buffer.parts[(marker.index - 1) as usize];
        if slot.is_some() {
            // Duplicate retransmit.
            return None;
        }
        *slot = Some(data);
        buffer.received += 1;

        if buffer.received < buffer.total {
            return None;
        }

        let buffer = self.buffers.remove(&frame.id)?;
        let mut joined = String::new();
        for part in buffer.parts {
            joined.push_str(&part.unwrap_or_default());
        }
        Some(joined)
    }

    /// Number of ids with incomplete payloads.
    pub fn pending_count(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip() {
        let frame = Frame::message("42", r#"{"hello":"world"}"#);
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_wire_shape() {
        let frame = Frame::message("7", "payload");
        let value: serde_json::Value = serde_json::from_str(&frame.encode()).unwrap();
        assert_eq!(value["id"], "7");
        assert_eq!(value["type"], "MESSAGE");
        assert_eq!(value["data"], "payload");
        assert!(value.get("chunk").is_none());
    }

    #[test]
    fn test_chunk_marker_wire_form() {
        let frame = Frame::chunk("9", ChunkMarker { index: 2, total: 3 }, "mid");
        let value: serde_json::Value = serde_json::from_str(&frame.encode()).unwrap();
        assert_eq!(value["chunk"], "2/3");

        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.chunk, Some(ChunkMarker { index: 2, total: 3 }));
    }

    #[test]
    fn test_chunk_marker_rejects_garbage() {
        assert!("".parse::<ChunkMarker>().is_err());
        assert!("3".parse::<ChunkMarker>().is_err());
        assert!("0/3".parse::<ChunkMarker>().is_err());
        assert!("4/3".parse::<ChunkMarker>().is_err());
        assert!("a/b".parse::<ChunkMarker>().is_err());
    }

    #[test]
    fn test_ack_echoes_chunk_marker() {
        let chunk = Frame::chunk("5", ChunkMarker { index: 1, total: 2 }, "a");
        let ack = Frame::ack_for(&chunk);
        assert_eq!(ack.kind, FrameKind::Ack);
        assert_eq!(ack.id, "5");
        assert_eq!(ack.chunk, chunk.chunk);
        assert_eq!(ack.ack_key(), chunk.ack_key());
    }

    #[test]
    fn test_ack_key_distinguishes_chunks() {
        let c1 = Frame::chunk("5", ChunkMarker { index: 1, total: 2 }, "a");
        let c2 = Frame::chunk("5", ChunkMarker { index: 2, total: 2 }, "b");
        assert_ne!(c1.ack_key(), c2.ack_key());
    }

    #[test]
    fn test_split_at_threshold_is_single_piece() {
        let payload = "x".repeat(100);
        let pieces = split_payload(&payload, 100);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0], payload);
    }

    #[test]
    fn test_split_one_byte_over_threshold() {
        let payload = "x".repeat(101);
        let pieces = split_payload(&payload, 100);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].len(), 100);
        assert_eq!(pieces[1].len(), 1);
        assert_eq!(pieces.concat(), payload);
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        // 'é' is 2 bytes; an odd threshold would land mid-char.
        let payload = "é".repeat(50);
        let pieces = split_payload(&payload, 33);
        assert!(pieces.iter().all(|p| p.len() <= 33));
        assert_eq!(pieces.concat(), payload);
    }

    #[test]
    fn test_reassembler_passthrough_for_single_part() {
        let mut r = Reassembler::new();
        let frame = Frame::message("1", "whole");
        assert_eq!(r.feed(&frame).as_deref(), Some("whole"));
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_reassembler_joins_out_of_order_chunks() {
        let mut r = Reassembler::new();
        let total = 3;
        let c1 = Frame::chunk("8", ChunkMarker { index: 1, total }, "aa");
        let c2 = Frame::chunk("8", ChunkMarker { index: 2, total }, "bb");
        let c3 = Frame::chunk("8", ChunkMarker { index: 3, total }, "cc");

        assert!(r.feed(&c3).is_none());
        assert!(r.feed(&c1).is_none());
        assert_eq!(r.pending_count(), 1);
        assert_eq!(r.feed(&c2).as_deref(), Some("aabbcc"));
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_reassembler_ignores_duplicate_chunks() {
        let mut r = Reassembler::new();
        let total = 2;
        let c1 = Frame::chunk("3", ChunkMarker { index: 1, total }, "aa");

        assert!(r.feed(&c1).is_none());
        assert!(r.feed(&c1).is_none()); // Retransmit of the same piece
        let c2 = Frame::chunk("3", ChunkMarker { index: 2, total }, "bb");
        assert_eq!(r.feed(&c2).as_deref(), Some("aabb"));
    }

    #[test]
    fn test_reassembler_interleaved_ids() {
        let mut r = Reassembler::new();
        let a1 = Frame::chunk("a", ChunkMarker { index: 1, total: 2 }, "A1");
        let b1 = Frame::chunk("b", ChunkMarker { index: 1, total: 2 }, "B1");
        let a2 = Frame::chunk("a", ChunkMarker { index: 2, total: 2 }, "A2");
        let b2 = Frame::chunk("b", ChunkMarker { index: 2, total: 2 }, "B2");

        assert!(r.feed(&a1).is_none());
        assert!(r.feed(&b1).is_none());
        assert_eq!(r.feed(&a2).as_deref(), Some("A1A2"));
        assert_eq!(r.feed(&b2).as_deref(), Some("B1B2"));
    }
}
