//! Broadcast frame codec.
//!
//! Every unit on the wire is a frame with a 16 byte big-endian header:
//!
//! ```text
//! offset  size  field
//! 0       u32   total length (header included)
//! 4       u16   header length, always 16
//! 6       u16   protocol tag (0/1 raw, 2 zlib, 3 brotli)
//! 8       u32   operation
//! 12      u32   sequence, always 1
//! 16      ..    payload
//! ```
//!
//! An inbound WebSocket message is decoded by looking at the protocol tag of
//! its first (outer) frame only. Compressed payloads inflate to a packed run
//! of inner frames which are walked back to back until the end of the buffer.

use std::io::Read;

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use serde::Serialize;

use crate::error::{LiveChatError, Result};

/// Fixed header size of every frame.
pub const HEADER_LEN: usize = 16;

/// Operation codes
pub mod op {
    pub const HEARTBEAT: u32 = 2;
    pub const HEARTBEAT_REPLY: u32 = 3;
    pub const NOTIFICATION: u32 = 5;
    pub const AUTH: u32 = 7;
    pub const AUTH_REPLY: u32 = 8;
}

/// Protocol tags
pub mod ver {
    pub const RAW_JSON: u16 = 0;
    pub const POPULARITY: u16 = 1;
    pub const ZLIB: u16 = 2;
    pub const BROTLI: u16 = 3;
}

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub total_length: u32,
    pub header_length: u16,
    pub protocol_tag: u16,
    pub operation: u32,
    pub sequence: u32,
}

impl FrameHeader {
    /// Read a header from the start of `buf`, if enough bytes are present.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            total_length: BigEndian::read_u32(&buf[0..4]),
            header_length: BigEndian::read_u16(&buf[4..6]),
            protocol_tag: BigEndian::read_u16(&buf[6..8]),
            operation: BigEndian::read_u32(&buf[8..12]),
            sequence: BigEndian::read_u32(&buf[12..16]),
        })
    }
}

/// One inner frame produced by the chunk walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub operation: u32,
    pub payload: Bytes,
}

/// Result of decoding one inbound buffer.
///
/// `malformed` is set when the walk hit an invalid frame part way through.
/// Chunks walked before that point are still returned.
#[derive(Debug, Default)]
pub struct Decoded {
    pub chunks: Vec<Chunk>,
    pub malformed: Option<LiveChatError>,
}

/// JSON body of the verify (auth) frame.
#[derive(Debug, Serialize)]
pub struct VerifyPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u64>,
    pub roomid: u64,
    pub protover: u16,
    pub platform: &'a str,
    #[serde(rename = "type")]
    pub auth_type: u8,
    pub key: &'a str,
}

/// Build a frame with the given operation and payload.
pub fn encode(operation: u32, payload: &[u8]) -> Bytes {
    let total_length = HEADER_LEN + payload.len();
    let mut frame = BytesMut::with_capacity(total_length);

    frame.put_u32(total_length as u32);
    frame.put_u16(HEADER_LEN as u16);
    frame.put_u16(ver::POPULARITY);
    frame.put_u32(operation);
    frame.put_u32(1);
    frame.put_slice(payload);

    frame.freeze()
}

/// Build the verify frame sent right after the socket opens.
pub fn verify_frame(payload: &VerifyPayload<'_>) -> Result<Bytes> {
    let body = serde_json::to_vec(payload)?;
    Ok(encode(op::AUTH, &body))
}

/// Build a heartbeat frame. The server does not look at the payload.
pub fn heartbeat_frame(payload: &[u8]) -> Bytes {
    encode(op::HEARTBEAT, payload)
}

/// Decode one inbound buffer into its chunks.
///
/// Errors discard the whole buffer: too short for a header, unknown
/// protocol tag, or a payload that fails to decompress.
pub fn decode(buf: Bytes) -> Result<Decoded> {
    let header = FrameHeader::parse(&buf).ok_or_else(|| {
        LiveChatError::framing(format!("buffer too short ({} bytes)", buf.len()))
    })?;

    match header.protocol_tag {
        ver::RAW_JSON | ver::POPULARITY => Ok(walk(buf)),
        ver::ZLIB => {
            let body = outer_payload(&buf, &header)?;
            Ok(walk(decompress_zlib(body)?.into()))
        }
        ver::BROTLI => {
            let body = outer_payload(&buf, &header)?;
            Ok(walk(decompress_brotli(body)?.into()))
        }
        tag => Err(LiveChatError::framing(format!(
            "unknown protocol tag {tag}"
        ))),
    }
}

fn outer_payload<'a>(buf: &'a [u8], header: &FrameHeader) -> Result<&'a [u8]> {
    let total = header.total_length as usize;
    if total < HEADER_LEN || total > buf.len() {
        return Err(LiveChatError::framing(format!(
            "outer frame length {total} out of bounds for {} byte buffer",
            buf.len()
        )));
    }
    Ok(&buf[HEADER_LEN..total])
}

/// Walk a packed run of frames until exactly the end of `data`.
fn walk(data: Bytes) -> Decoded {
    let mut decoded = Decoded::default();
    let mut offset = 0;

    while offset < data.len() {
        let Some(header) = FrameHeader::parse(&data[offset..]) else {
            decoded.malformed = Some(LiveChatError::framing(format!(
                "truncated header at offset {offset}"
            )));
            break;
        };

        let total = header.total_length as usize;
        if total < HEADER_LEN {
            decoded.malformed = Some(LiveChatError::framing(format!(
                "frame length {total} at offset {offset} is shorter than its header"
            )));
            break;
        }

        let end = offset + total;
        if end > data.len() {
            decoded.malformed = Some(LiveChatError::framing(format!(
                "frame at offset {offset} overruns buffer ({end} > {})",
                data.len()
            )));
            break;
        }

        decoded.chunks.push(Chunk {
            operation: header.operation,
            payload: data.slice(offset + HEADER_LEN..end),
        });
        offset = end;
    }

    decoded
}

/// Decompress zlib data.
fn decompress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| LiveChatError::decompression(format!("zlib: {e}")))?;
    Ok(decompressed)
}

/// Decompress brotli data.
fn decompress_brotli(data: &[u8]) -> Result<Vec<u8>> {
    let mut decompressed = Vec::new();
    brotli::BrotliDecompress(&mut std::io::Cursor::new(data), &mut decompressed)
        .map_err(|e| LiveChatError::decompression(format!("brotli: {e}")))?;
    Ok(decompressed)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use proptest::prelude::*;

    /// Frame `payload` with an explicit protocol tag.
    pub(crate) fn frame_with_tag(tag: u16, operation: u32, payload: &[u8]) -> Bytes {
        let mut frame = BytesMut::from(&encode(operation, payload)[..]);
        frame[6..8].copy_from_slice(&tag.to_be_bytes());
        frame.freeze()
    }

    pub(crate) fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    pub(crate) fn brotli_compress(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
            writer.write_all(data).unwrap();
        }
        out
    }

    pub(crate) fn packed(bodies: &[&[u8]]) -> Vec<u8> {
        bodies
            .iter()
            .flat_map(|b| frame_with_tag(ver::RAW_JSON, op::NOTIFICATION, b).to_vec())
            .collect()
    }

    #[test]
    fn test_encode_header_layout() {
        let frame = encode(op::AUTH, b"test");

        assert_eq!(BigEndian::read_u32(&frame[0..4]), 20);
        assert_eq!(BigEndian::read_u16(&frame[4..6]), 16);
        assert_eq!(BigEndian::read_u16(&frame[6..8]), 1);
        assert_eq!(BigEndian::read_u32(&frame[8..12]), op::AUTH);
        assert_eq!(BigEndian::read_u32(&frame[12..16]), 1);
        assert_eq!(&frame[16..], b"test");
    }

    #[test]
    fn test_verify_frame_round_trip() {
        let payload = VerifyPayload {
            uid: None,
            roomid: 21452505,
            protover: 3,
            platform: "web",
            auth_type: 2,
            key: "token",
        };
        let frame = verify_frame(&payload).unwrap();
        let decoded = decode(frame.clone()).unwrap();

        assert!(decoded.malformed.is_none());
        assert_eq!(decoded.chunks.len(), 1);
        let chunk = &decoded.chunks[0];
        assert_eq!(chunk.operation, op::AUTH);
        assert_eq!(chunk.payload.len() + HEADER_LEN, frame.len());

        let json: serde_json::Value = serde_json::from_slice(&chunk.payload).unwrap();
        assert_eq!(json["roomid"], 21452505);
        assert_eq!(json["protover"], 3);
        assert_eq!(json["platform"], "web");
        assert_eq!(json["type"], 2);
        assert_eq!(json["key"], "token");
        assert!(json.get("uid").is_none());
    }

    #[test]
    fn test_heartbeat_frame_round_trip() {
        let frame = heartbeat_frame(b"[object Object]");
        let header = FrameHeader::parse(&frame).unwrap();
        assert_eq!(header.total_length, 31);

        let decoded = decode(frame).unwrap();
        assert_eq!(decoded.chunks.len(), 1);
        assert_eq!(decoded.chunks[0].operation, op::HEARTBEAT);
        assert_eq!(&decoded.chunks[0].payload[..], b"[object Object]");
    }

    #[test]
    fn test_short_buffer_is_malformed() {
        let err = decode(Bytes::from_static(&[0, 0, 0, 16, 0, 16])).unwrap_err();
        assert!(matches!(err, LiveChatError::Framing(_)));
    }

    #[test]
    fn test_length_below_header_stops_walk() {
        let mut buf = packed(&[b"{\"cmd\":\"A\"}"]);
        // a second frame claiming 8 bytes total, followed by more data
        let mut bad = frame_with_tag(ver::RAW_JSON, op::NOTIFICATION, b"{}").to_vec();
        bad[0..4].copy_from_slice(&8u32.to_be_bytes());
        buf.extend_from_slice(&bad);
        buf.extend_from_slice(&packed(&[b"{\"cmd\":\"B\"}"]));

        let decoded = decode(buf.into()).unwrap();
        assert_eq!(decoded.chunks.len(), 1);
        assert_eq!(&decoded.chunks[0].payload[..], b"{\"cmd\":\"A\"}");
        assert!(matches!(decoded.malformed, Some(LiveChatError::Framing(_))));
    }

    #[test]
    fn test_zero_length_outer_frame_does_not_loop() {
        let mut frame = frame_with_tag(ver::RAW_JSON, op::NOTIFICATION, b"{}").to_vec();
        frame[0..4].copy_from_slice(&0u32.to_be_bytes());

        let decoded = decode(frame.into()).unwrap();
        assert!(decoded.chunks.is_empty());
        assert!(decoded.malformed.is_some());
    }

    #[test]
    fn test_overrunning_frame_is_malformed() {
        let mut buf = packed(&[b"{\"a\":1}", b"{\"b\":2}"]);
        buf.truncate(buf.len() - 3);

        let decoded = decode(buf.into()).unwrap();
        assert_eq!(decoded.chunks.len(), 1);
        assert!(decoded.malformed.is_some());
    }

    #[test]
    fn test_unknown_protocol_tag() {
        let frame = frame_with_tag(9, op::NOTIFICATION, b"{}");
        assert!(matches!(decode(frame), Err(LiveChatError::Framing(_))));
    }

    #[test]
    fn test_zlib_wrapped_frames() {
        let inner = packed(&[b"{\"n\":1}", b"{\"n\":2}", b"{\"n\":3}"]);
        let outer = frame_with_tag(ver::ZLIB, op::NOTIFICATION, &zlib(&inner));

        let decoded = decode(outer).unwrap();
        assert!(decoded.malformed.is_none());
        let bodies: Vec<_> = decoded.chunks.iter().map(|c| c.payload.clone()).collect();
        assert_eq!(
            bodies,
            vec![
                Bytes::from_static(b"{\"n\":1}"),
                Bytes::from_static(b"{\"n\":2}"),
                Bytes::from_static(b"{\"n\":3}"),
            ]
        );
    }

    #[test]
    fn test_brotli_wrapped_frames() {
        let inner = packed(&[b"{\"n\":1}", b"{\"n\":2}"]);
        let outer = frame_with_tag(ver::BROTLI, op::NOTIFICATION, &brotli_compress(&inner));

        let decoded = decode(outer).unwrap();
        assert_eq!(decoded.chunks.len(), 2);
        assert!(decoded.chunks.iter().all(|c| c.operation == op::NOTIFICATION));
    }

    #[test]
    fn test_decompression_failure_discards_buffer() {
        let outer = frame_with_tag(ver::ZLIB, op::NOTIFICATION, b"definitely not zlib");
        assert!(matches!(decode(outer), Err(LiveChatError::Decompression(_))));

        let body: Vec<u8> = (0..4096u32).flat_map(|i| i.to_be_bytes()).collect();
        let compressed = brotli_compress(&packed(&[&body]));
        let truncated = &compressed[..compressed.len() / 2];
        let outer = frame_with_tag(ver::BROTLI, op::NOTIFICATION, truncated);
        assert!(matches!(decode(outer), Err(LiveChatError::Decompression(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_compressed_walk_yields_every_inner_frame(
            bodies in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 1..16),
            use_brotli in any::<bool>(),
        ) {
            let refs: Vec<&[u8]> = bodies.iter().map(Vec::as_slice).collect();
            let inner = packed(&refs);
            let outer = if use_brotli {
                frame_with_tag(ver::BROTLI, op::NOTIFICATION, &brotli_compress(&inner))
            } else {
                frame_with_tag(ver::ZLIB, op::NOTIFICATION, &zlib(&inner))
            };

            let decoded = decode(outer).unwrap();
            prop_assert!(decoded.malformed.is_none());
            prop_assert_eq!(decoded.chunks.len(), bodies.len());
            for (chunk, body) in decoded.chunks.iter().zip(&bodies) {
                prop_assert_eq!(&chunk.payload[..], &body[..]);
            }
        }
    }
}
