//! Frame encoding/decoding.
//!
//! Every payload travels inside a self-delimiting frame:
//!
//! ```text
//! +--------+-------------------+----------+
//! | length | payload[0..len]   | checksum |
//! +--------+-------------------+----------+
//! ```
//!
//! `checksum` is the CRC-8 of the payload bytes only. A batch is simply
//! frames laid back to back.

use bytes::{BufMut, BytesMut};

use crate::crc::crc8;
use crate::error::ProtocolError;
use crate::messages::Payload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub length: u8,
    pub payload: Vec<u8>,
    pub checksum: u8,
}

impl Packet {
    pub fn new(payload: Vec<u8>) -> Result<Self, ProtocolError> {
        let length = u8::try_from(payload.len())
            .map_err(|_| ProtocolError::FrameTooLong { len: payload.len() })?;
        let checksum = crc8(&payload);
        Ok(Packet {
            length,
            payload,
            checksum,
        })
    }

    pub fn from_payload(payload: &Payload) -> Result<Self, ProtocolError> {
        Packet::new(payload.encode()?)
    }

    /// Size of the frame on the wire.
    pub fn wire_len(&self) -> usize {
        self.payload.len() + 2
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u8(self.length);
        buf.put_slice(&self.payload);
        buf.put_u8(self.checksum);
        buf.to_vec()
    }

    pub fn decode_payload(&self) -> Result<Payload, ProtocolError> {
        Payload::decode(&self.payload)
    }
}

/// Decode the frame starting at `offset` in `buf`.
///
/// Returns the packet and the number of bytes it occupied. A checksum that
/// does not match the payload is reported as
/// [`ProtocolError::ChecksumMismatch`]; the frame is never returned.
pub fn decode_frame(buf: &[u8], offset: usize) -> Result<(Packet, usize), ProtocolError> {
    let data = buf.get(offset..).unwrap_or_default();

    let Some(&length) = data.first() else {
        return Err(ProtocolError::Truncated { offset, needed: 1 });
    };

    let wire_len = length as usize + 2;
    if data.len() < wire_len {
        return Err(ProtocolError::Truncated {
            offset: offset + data.len(),
            needed: wire_len - data.len(),
        });
    }

    let payload = data[1..wire_len - 1].to_vec();
    let expected = data[wire_len - 1];
    let actual = crc8(&payload);
    if expected != actual {
        return Err(ProtocolError::ChecksumMismatch { expected, actual });
    }

    Ok((
        Packet {
            length,
            payload,
            checksum: expected,
        },
        wire_len,
    ))
}

/// Iterator over the frames of a batch. Yields at most one error, after
/// which it is exhausted.
#[derive(Debug)]
pub struct Packets<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl Iterator for Packets<'_> {
    type Item = Result<Packet, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        match decode_frame(self.buf, self.offset) {
            Ok((packet, used)) => {
                self.offset += used;
                Some(Ok(packet))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

pub fn split_packets(buf: &[u8]) -> Packets<'_> {
    Packets {
        buf,
        offset: 0,
        failed: false,
    }
}

/// Frame each payload and concatenate the frames.
pub fn encode_batch(payloads: &[Payload]) -> Result<Vec<u8>, ProtocolError> {
    let mut batch = Vec::new();
    for payload in payloads {
        batch.extend_from_slice(&Packet::from_payload(payload)?.to_bytes());
    }
    Ok(batch)
}

/// A decoded batch. Frames are self-delimiting, so a payload that fails to
/// decode is set aside with the byte offset of its frame and the rest of the
/// batch still decodes.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Batch {
    pub payloads: Vec<Payload>,
    pub rejected: Vec<(usize, ProtocolError)>,
}

/// Split a batch and decode every payload in it.
///
/// Frame-level errors (truncation, checksum mismatch) fail the whole batch.
pub fn decode_batch(buf: &[u8]) -> Result<Batch, ProtocolError> {
    let mut batch = Batch::default();
    let mut offset = 0;
    for packet in split_packets(buf) {
        let packet = packet?;
        match packet.decode_payload() {
            Ok(payload) => batch.payloads.push(payload),
            Err(err) => batch.rejected.push((offset, err)),
        }
        offset += packet.wire_len();
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Command, CommandBody, DeviceType};

    fn status_request(dst: u64, serial: u64) -> Payload {
        Payload {
            src: 1,
            dst,
            serial,
            device_type: DeviceType::Hub,
            command: Command::GetStatus,
            body: None,
        }
    }

    #[test]
    fn test_packet_new() {
        let packet = Packet::from_payload(&status_request(3, 9)).unwrap();
        assert_eq!(packet.length, 5);
        assert_eq!(packet.checksum, 0xA0);
        assert_eq!(packet.to_bytes(), vec![0x05, 0x01, 0x03, 0x09, 0x03, 0x03, 0xA0]);
    }

    #[test]
    fn test_payload_too_long() {
        assert_eq!(
            Packet::new(vec![0; 256]),
            Err(ProtocolError::FrameTooLong { len: 256 })
        );
        assert!(Packet::new(vec![0; 255]).is_ok());
    }

    #[test]
    fn test_decode_frame_at_offset() {
        let mut buf = vec![0xEE, 0xEE];
        buf.extend(Packet::from_payload(&status_request(3, 9)).unwrap().to_bytes());
        let (packet, used) = decode_frame(&buf, 2).unwrap();
        assert_eq!(used, 7);
        assert_eq!(packet.decode_payload().unwrap(), status_request(3, 9));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = Packet::from_payload(&status_request(3, 9)).unwrap().to_bytes();
        bytes[2] ^= 0x01;
        assert!(matches!(
            decode_frame(&bytes, 0),
            Err(ProtocolError::ChecksumMismatch { expected: 0xA0, .. })
        ));
    }

    #[test]
    fn test_truncated_frame() {
        let bytes = Packet::from_payload(&status_request(3, 9)).unwrap().to_bytes();
        assert_eq!(
            decode_frame(&bytes[..4], 0),
            Err(ProtocolError::Truncated {
                offset: 4,
                needed: 3
            })
        );
        assert_eq!(
            decode_frame(&bytes, bytes.len()),
            Err(ProtocolError::Truncated {
                offset: 7,
                needed: 1
            })
        );
    }

    #[test]
    fn test_split_concatenated_frames() {
        let payloads: Vec<Payload> = (0..5).map(|i| status_request(i + 2, i + 10)).collect();
        let batch = encode_batch(&payloads).unwrap();

        let decoded: Vec<Packet> = split_packets(&batch).map(|p| p.unwrap()).collect();
        assert_eq!(decoded.len(), 5);
        assert_eq!(
            decoded.iter().map(Packet::wire_len).sum::<usize>(),
            batch.len()
        );
        assert_eq!(decode_batch(&batch).unwrap().payloads, payloads);
    }

    #[test]
    fn test_split_stops_after_error() {
        let mut batch = encode_batch(&[status_request(2, 1), status_request(3, 2)]).unwrap();
        let last = batch.len() - 1;
        batch[last] ^= 0xFF;

        let results: Vec<_> = split_packets(&batch).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_batch() {
        assert_eq!(split_packets(&[]).count(), 0);
        assert_eq!(decode_batch(&[]).unwrap(), Batch::default());
    }

    #[test]
    fn test_decode_tick_and_whoishere_batch() {
        let mut batch = Packet::from_payload(&Payload {
            src: 6,
            dst: 0x3FFF,
            serial: 24,
            device_type: DeviceType::Clock,
            command: Command::Tick,
            body: Some(CommandBody::Timestamp {
                value: 1_801_393_098_134,
            }),
        })
        .unwrap()
        .to_bytes();
        // Captured from the reference simulator.
        assert_eq!(
            batch,
            vec![
                0x0C, 0x06, 0xFF, 0x7F, 0x18, 0x06, 0x06, 0x96, 0x9B, 0x95, 0xDB, 0xB6, 0x34,
                0xD3
            ]
        );
        batch.extend([0x05, 0x01, 0x03, 0x09, 0x03, 0x03, 0xA0]);
        let payloads = decode_batch(&batch).unwrap().payloads;
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].tick_time(), Some(1_801_393_098_134));
        assert_eq!(payloads[1], status_request(3, 9));
    }

    #[test]
    fn test_bad_body_does_not_fail_batch() {
        // Lamp IAMHERE whose name length runs past the frame.
        let broken = Packet::new(vec![0x04, 0xFF, 0x7F, 0x0B, 0x04, 0x02, 0x09, b'L']).unwrap();
        let mut batch = encode_batch(&[status_request(2, 1)]).unwrap();
        batch.extend(broken.to_bytes());
        batch.extend(encode_batch(&[status_request(3, 2)]).unwrap());

        let decoded = decode_batch(&batch).unwrap();
        assert_eq!(decoded.payloads, vec![status_request(2, 1), status_request(3, 2)]);
        assert_eq!(
            decoded.rejected,
            vec![(
                7,
                ProtocolError::Truncated {
                    offset: 7,
                    needed: 8
                }
            )]
        );
    }

    #[test]
    fn test_checksum_mismatch_fails_batch() {
        let mut batch = encode_batch(&[status_request(2, 1), status_request(3, 2)]).unwrap();
        batch[3] ^= 0x01;
        assert!(matches!(
            decode_batch(&batch),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }
}
