//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is one [`Segment`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (six header words + payload).
//! - Computing and verifying the 8-bit additive checksum.
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`], returning errors
//!   for malformed or truncated input.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All header words are unsigned 32-bit **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             Flags                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Checksum                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Receive Window                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload Length                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 24 bytes.  Nothing else in the
//! datagram delimits its size, so a reader must supply a buffer of at least
//! `mss + HEADER_LEN` bytes.

use std::fmt;

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 24;

/// Acknowledgement number meaning "nothing received yet" (`-1` on the wire).
pub const NO_ACK: u32 = u32::MAX;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_FLAGS: usize = 8;
const OFF_CHECKSUM: usize = 12;
const OFF_RCV_WIN: usize = 16;
const OFF_LENGTH: usize = 20;

/// Segment type carried in the `flags` header word.
///
/// `Acked` and `FinAcked` are local markers used by the send window to record
/// "acknowledgement received"; they are never put on the wire as themselves
/// (see [`Flags::wire_value`]).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Flags {
    #[default]
    Data = 0,
    Ack = 1,
    Acked = 2,
    Fin = 3,
    FinAck = 4,
    FinAcked = 5,
}

impl Flags {
    /// The value written into the header word.
    pub fn wire_value(self) -> u32 {
        match self {
            Flags::Acked => Flags::Ack as u32,
            Flags::FinAcked => Flags::FinAck as u32,
            other => other as u32,
        }
    }

    /// Parse a header word.  A stray `2` is read as a plain ACK.
    pub fn from_wire(value: u32) -> Result<Self, SegmentError> {
        match value {
            0 => Ok(Flags::Data),
            1 | 2 => Ok(Flags::Ack),
            3 => Ok(Flags::Fin),
            4 => Ok(Flags::FinAck),
            5 => Ok(Flags::FinAcked),
            other => Err(SegmentError::UnknownFlags(other)),
        }
    }

    /// The "acknowledgement received" marker matching this flag.
    pub fn acked(self) -> Self {
        if self >= Flags::Fin {
            Flags::FinAcked
        } else {
            Flags::Acked
        }
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Flags::Data => "DATA",
            Flags::Ack => "ACK",
            Flags::Acked => "ACKED",
            Flags::Fin => "FIN",
            Flags::FinAck => "FIN_ACK",
            Flags::FinAcked => "FIN_ACKED",
        };
        f.write_str(name)
    }
}

/// One network-transmissible unit: header fields plus payload bytes.
///
/// The `length` header word is not stored; it is always `payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Segment {
    pub seq_num: u32,
    pub ack_num: u32,
    pub flags: Flags,
    /// 8-bit additive checksum, see [`Segment::compute_checksum`].
    pub checksum: u32,
    /// Advisory receive window (free receive slots).  Carried, never acted on.
    pub rcv_win: u32,
    pub payload: Vec<u8>,
}

impl Segment {
    /// A data segment carrying `payload` at sequence number `seq_num`.
    ///
    /// The checksum is left at zero; call [`seal`](Self::seal) once every
    /// header field is final.
    pub fn data(seq_num: u32, payload: Vec<u8>) -> Self {
        Self {
            seq_num,
            payload,
            ..Self::default()
        }
    }

    /// A header-only acknowledgement for `ack_num`, already sealed.
    pub fn ack(ack_num: u32, rcv_win: u32) -> Self {
        let mut seg = Self {
            ack_num,
            flags: Flags::Ack,
            rcv_win,
            ..Self::default()
        };
        seg.seal();
        seg
    }

    /// Number of valid payload bytes (the `length` header word).
    pub fn len(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn contains_data(&self) -> bool {
        !self.payload.is_empty()
    }

    pub fn contains_ack(&self) -> bool {
        self.flags == Flags::Ack
    }

    pub fn contains_fin(&self) -> bool {
        self.flags >= Flags::Fin
    }

    /// Sum, modulo 256, of every header byte (checksum word excluded) and
    /// every payload byte.
    pub fn compute_checksum(&self) -> u32 {
        let header = [
            self.seq_num,
            self.ack_num,
            self.flags.wire_value(),
            self.rcv_win,
            self.len(),
        ];
        let header_sum: u32 = header.iter().map(|&word| byte_sum(word)).sum();
        let payload_sum = self
            .payload
            .iter()
            .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)));
        header_sum.wrapping_add(payload_sum) & 0xff
    }

    /// Store the checksum for the current header and payload.
    pub fn seal(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// `true` when the carried checksum matches the recomputed one.
    pub fn is_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// [`is_valid`](Self::is_valid) as a `Result`.
    pub fn verify(&self) -> Result<(), SegmentError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(SegmentError::ChecksumFailed {
                carried: self.checksum,
                computed: self.compute_checksum(),
            })
        }
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// The checksum is written as stored; it is not recomputed here.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];

        put_u32(&mut buf, OFF_SEQ, self.seq_num);
        put_u32(&mut buf, OFF_ACK, self.ack_num);
        put_u32(&mut buf, OFF_FLAGS, self.flags.wire_value());
        put_u32(&mut buf, OFF_CHECKSUM, self.checksum);
        put_u32(&mut buf, OFF_RCV_WIN, self.rcv_win);
        put_u32(&mut buf, OFF_LENGTH, self.len());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        buf
    }

    /// Parse a [`Segment`] from one received datagram.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the `length` field disagrees with `buf.len()`, or
    /// - the `flags` word is not a known value.
    ///
    /// The checksum is **not** verified; see [`Segment::verify`].
    pub fn decode(buf: &[u8]) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::BufferTooShort(buf.len()));
        }

        let length = get_u32(buf, OFF_LENGTH) as usize;
        if buf.len() - HEADER_LEN != length {
            return Err(SegmentError::LengthMismatch {
                declared: length,
                available: buf.len() - HEADER_LEN,
            });
        }

        Ok(Segment {
            seq_num: get_u32(buf, OFF_SEQ),
            ack_num: get_u32(buf, OFF_ACK),
            flags: Flags::from_wire(get_u32(buf, OFF_FLAGS))?,
            checksum: get_u32(buf, OFF_CHECKSUM),
            rcv_win: get_u32(buf, OFF_RCV_WIN),
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} seq={} ack={} len={} csum={}",
            self.flags,
            self.seq_num,
            self.ack_num as i32,
            self.len(),
            self.checksum
        )
    }
}

/// Errors that can arise when parsing or validating a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    #[error("datagram of {0} bytes is shorter than the 24-byte header")]
    BufferTooShort(usize),
    #[error("length field says {declared} payload bytes, datagram has {available}")]
    LengthMismatch { declared: usize, available: usize },
    #[error("unknown flags value {0}")]
    UnknownFlags(u32),
    #[error("checksum mismatch: carried {carried}, computed {computed}")]
    ChecksumFailed { carried: u32, computed: u32 },
}

fn byte_sum(word: u32) -> u32 {
    word.to_be_bytes().iter().map(|&b| u32::from(b)).sum()
}

fn put_u32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_be_bytes());
}

fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed(seq: u32, payload: &[u8]) -> Segment {
        let mut seg = Segment::data(seq, payload.to_vec());
        seg.seal();
        seg
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut seg = sealed(42, b"hello");
        seg.rcv_win = 3;
        seg.seal();
        let decoded = Segment::decode(&seg.encode()).unwrap();
        assert_eq!(decoded, seg);
        assert!(decoded.is_valid());
    }

    #[test]
    fn roundtrip_every_length_up_to_mss() {
        const MSS: usize = 100;
        for len in 0..=MSS {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7 + 200) as u8).collect();
            let seg = sealed(len as u32, &payload);
            let decoded = Segment::decode(&seg.encode()).unwrap();
            assert_eq!(decoded, seg, "length {len}");
        }
    }

    #[test]
    fn header_len_constant_is_correct() {
        // six 4-byte words
        assert_eq!(HEADER_LEN, 24);
    }

    #[test]
    fn encoded_length_equals_header_plus_payload() {
        let bytes = sealed(0, b"exactly twelve!").encode();
        assert_eq!(bytes.len(), HEADER_LEN + 15);
    }

    #[test]
    fn fields_big_endian_on_wire() {
        let mut seg = Segment::data(0x0102_0304, b"ab".to_vec());
        seg.ack_num = 0x0506_0708;
        seg.rcv_win = 0x0a0b_0c0d;
        let bytes = seg.encode();
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[1, 2, 3, 4]);
        assert_eq!(&bytes[OFF_ACK..OFF_ACK + 4], &[5, 6, 7, 8]);
        assert_eq!(&bytes[OFF_RCV_WIN..OFF_RCV_WIN + 4], &[0x0a, 0x0b, 0x0c, 0x0d]);
        assert_eq!(&bytes[OFF_LENGTH..OFF_LENGTH + 4], &[0, 0, 0, 2]);
    }

    #[test]
    fn high_bytes_are_not_sign_extended() {
        let mut seg = Segment::ack(NO_ACK, 0);
        seg.seq_num = 0x80ff_fe81;
        seg.seal();
        let decoded = Segment::decode(&seg.encode()).unwrap();
        assert_eq!(decoded.ack_num, u32::MAX);
        assert_eq!(decoded.seq_num, 0x80ff_fe81);
        assert!(decoded.is_valid());
    }

    #[test]
    fn checksum_is_byte_sum_mod_256() {
        let mut seg = Segment::data(0x0000_0101, vec![0xff, 0x02]);
        seg.ack_num = 0x0100_0000;
        // seq 1+1, ack 1, flags 0, rcv_win 0, length 2, payload 255+2
        assert_eq!(seg.compute_checksum(), (2 + 1 + 2 + 255 + 2) & 0xff);
    }

    #[test]
    fn flipping_any_byte_invalidates() {
        let seg = sealed(7, b"payload bytes");
        let bytes = seg.encode();
        for i in (0..bytes.len()).filter(|i| !(OFF_CHECKSUM..OFF_CHECKSUM + 4).contains(i)) {
            if (OFF_FLAGS..OFF_FLAGS + 4).contains(&i) || (OFF_LENGTH..OFF_LENGTH + 4).contains(&i) {
                // would change the segment kind or framing; covered elsewhere
                continue;
            }
            let mut corrupt = bytes.clone();
            corrupt[i] ^= 0x10;
            let decoded = Segment::decode(&corrupt).unwrap();
            assert!(!decoded.is_valid(), "flip at byte {i} went unnoticed");
        }
    }

    #[test]
    fn verify_reports_mismatch() {
        let mut seg = sealed(1, b"x");
        seg.checksum ^= 1;
        assert!(matches!(seg.verify(), Err(SegmentError::ChecksumFailed { .. })));
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Segment::decode(&[]), Err(SegmentError::BufferTooShort(0)));
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Segment::decode(&[0u8; HEADER_LEN - 1]),
            Err(SegmentError::BufferTooShort(HEADER_LEN - 1))
        );
    }

    #[test]
    fn decode_truncated_payload_returns_error() {
        let mut bytes = sealed(0, b"data").encode();
        bytes.pop();
        assert_eq!(
            Segment::decode(&bytes),
            Err(SegmentError::LengthMismatch { declared: 4, available: 3 })
        );
    }

    #[test]
    fn decode_unknown_flags_returns_error() {
        let mut bytes = sealed(0, b"").encode();
        bytes[OFF_FLAGS + 3] = 9;
        assert_eq!(Segment::decode(&bytes), Err(SegmentError::UnknownFlags(9)));
    }

    #[test]
    fn acked_marker_never_reaches_the_wire() {
        let mut seg = Segment::ack(4, 0);
        seg.flags = Flags::Acked;
        let bytes = seg.encode();
        assert_eq!(&bytes[OFF_FLAGS..OFF_FLAGS + 4], &[0, 0, 0, 1]);
        assert_eq!(Segment::decode(&bytes).unwrap().flags, Flags::Ack);
    }

    #[test]
    fn predicates_follow_flags_and_length() {
        let data = sealed(0, b"abc");
        assert!(data.contains_data() && !data.contains_ack() && !data.contains_fin());

        let ack = Segment::ack(0, 0);
        assert!(ack.contains_ack() && !ack.contains_data());

        for flags in [Flags::Fin, Flags::FinAck, Flags::FinAcked] {
            let seg = Segment { flags, ..Segment::default() };
            assert!(seg.contains_fin());
            assert!(!seg.contains_ack());
        }
    }

    #[test]
    fn acked_marker_matches_kind() {
        assert_eq!(Flags::Data.acked(), Flags::Acked);
        assert_eq!(Flags::Ack.acked(), Flags::Acked);
        assert_eq!(Flags::Fin.acked(), Flags::FinAcked);
    }
}
