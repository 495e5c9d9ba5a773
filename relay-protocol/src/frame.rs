//! Modern-era binary framing and Legacy-era text framing (C1, spec §4.1).
//!
//! Grounded on `WinXP/Defines.hpp` (signatures, default key) and
//! `WinXP/Protocol/Game.hpp` (`MsgGameMessage`). The original's compiled
//! DWORD XOR schedule and checksum routine (`Socket.cpp`) were not present
//! in the retrieved source tree, so the schedule below is a concrete,
//! self-inverse stand-in documented in `DESIGN.md`; the *shape* of the
//! frame (header sizes, checksum scope, footer) is preserved exactly.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// `XPProxyProtocolSignature` — outer framing, used before the proxy
/// sub-protocol completes (`ProxyConnected == false`).
pub const PROXY_SIGNATURE: u32 = 0x726f_7574;

/// `XPLobbyProtocolSignature` — inner framing, used once the session is
/// operational.
pub const LOBBY_SIGNATURE: u32 = 0x6c62_6279;

/// `XPDefaultSecurityKey` — used for the handshake before the server
/// hands the connection its own session key in `ConnectionHello`.
pub const DEFAULT_SECURITY_KEY: u32 = 0xF827_3645;

pub const STATUS_OK: i32 = 0;
pub const STATUS_CANCELLED: i32 = 1;

pub const GENERIC_BASE_LEN: usize = 12;
pub const APPLICATION_BASE_LEN: usize = 12;
pub const GAME_MESSAGE_HEADER_LEN: usize = 8;
pub const GENERIC_FOOTER_LEN: usize = 4;

/// `GenericBase` — 12 bytes, little-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericBase {
    pub total_length: u32,
    pub sequence_id: u32,
    pub checksum: u32,
}

impl GenericBase {
    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.total_length);
        LittleEndian::write_u32(&mut buf[4..8], self.sequence_id);
        LittleEndian::write_u32(&mut buf[8..12], self.checksum);
    }

    pub fn read_from(buf: &[u8]) -> GenericBase {
        GenericBase {
            total_length: LittleEndian::read_u32(&buf[0..4]),
            sequence_id: LittleEndian::read_u32(&buf[4..8]),
            checksum: LittleEndian::read_u32(&buf[8..12]),
        }
    }
}

/// `ApplicationBase` — 12 bytes, little-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicationBase {
    pub signature: u32,
    pub message_type: u32,
    pub data_length: u32,
}

impl ApplicationBase {
    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.signature);
        LittleEndian::write_u32(&mut buf[4..8], self.message_type);
        LittleEndian::write_u32(&mut buf[8..12], self.data_length);
    }

    pub fn read_from(buf: &[u8]) -> ApplicationBase {
        ApplicationBase {
            signature: LittleEndian::read_u32(&buf[0..4]),
            message_type: LittleEndian::read_u32(&buf[4..8]),
            data_length: LittleEndian::read_u32(&buf[8..12]),
        }
    }
}

/// `MsgGameMessage` sub-header, 8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameMessageHeader {
    pub game_id: i16,
    pub msg_type: i16,
    pub length: i16,
    pub _pad: i16,
}

impl GameMessageHeader {
    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_i16(&mut buf[0..2], self.game_id);
        LittleEndian::write_i16(&mut buf[2..4], self.msg_type);
        LittleEndian::write_i16(&mut buf[4..6], self.length);
        LittleEndian::write_i16(&mut buf[6..8], self._pad);
    }

    pub fn read_from(buf: &[u8]) -> GameMessageHeader {
        GameMessageHeader {
            game_id: LittleEndian::read_i16(&buf[0..2]),
            msg_type: LittleEndian::read_i16(&buf[2..4]),
            length: LittleEndian::read_i16(&buf[4..6]),
            _pad: LittleEndian::read_i16(&buf[6..8]),
        }
    }
}

/// `GenericFooter` — 4 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericFooter {
    pub status: i32,
}

impl GenericFooter {
    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(&mut buf[0..4], self.status);
    }

    pub fn read_from(buf: &[u8]) -> GenericFooter {
        GenericFooter {
            status: LittleEndian::read_i32(&buf[0..4]),
        }
    }
}

/// DWORD-wise XOR schedule. Self-inverse: applying it twice with the same
/// key is the identity, so the one function serves both directions.
/// `buf.len()` need not be a multiple of 4; a trailing partial word is
/// XORed byte-wise against the low bytes of its derived key.
pub fn xor_crypt(buf: &mut [u8], session_key: u32) {
    for (i, chunk) in buf.chunks_mut(4).enumerate() {
        let derived = session_key ^ (i as u32).wrapping_mul(0x9E37_79B9);
        let key_bytes = derived.to_le_bytes();
        for (b, k) in chunk.iter_mut().zip(key_bytes.iter()) {
            *b ^= *k;
        }
    }
}

/// Checksum over `ApplicationBase || payload`, each taken as a
/// big-endian (network-endian) `u32` word, wrapping-summed. `data`'s
/// length need not be a multiple of 4; a trailing partial word is
/// zero-padded before summing, matching a byte-at-a-time accumulation.
pub fn checksum(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    for chunk in data.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        sum = sum.wrapping_add(BigEndian::read_u32(&word));
    }
    sum
}

/// A fully decoded Modern frame: the message type from `ApplicationBase`
/// and the raw payload bytes (still containing any `GameMessageHeader`).
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub sequence_id: u32,
    pub signature: u32,
    pub message_type: u32,
    pub payload: Vec<u8>,
}

/// Encodes a complete Modern frame: header, payload, footer, encrypted
/// (footer excluded) with `session_key`.
pub fn encode_frame(signature: u32, message_type: u32, sequence_id: u32, payload: &[u8], session_key: u32) -> Vec<u8> {
    let data_length = payload.len() as u32;
    let total_length = (GENERIC_BASE_LEN + APPLICATION_BASE_LEN + payload.len() + GENERIC_FOOTER_LEN) as u32;

    let mut app_and_payload = vec![0u8; APPLICATION_BASE_LEN + payload.len()];
    ApplicationBase {
        signature,
        message_type,
        data_length,
    }
    .write_to(&mut app_and_payload[..APPLICATION_BASE_LEN]);
    app_and_payload[APPLICATION_BASE_LEN..].copy_from_slice(payload);

    let checksum_value = checksum(&app_and_payload);

    let mut buf = vec![0u8; total_length as usize];
    GenericBase {
        total_length,
        sequence_id,
        checksum: checksum_value,
    }
    .write_to(&mut buf[..GENERIC_BASE_LEN]);
    buf[GENERIC_BASE_LEN..GENERIC_BASE_LEN + app_and_payload.len()].copy_from_slice(&app_and_payload);

    let body_end = buf.len() - GENERIC_FOOTER_LEN;
    xor_crypt(&mut buf[..body_end], session_key);

    GenericFooter { status: STATUS_OK }.write_to(&mut buf[body_end..]);

    buf
}

/// Decodes a complete Modern frame previously produced by [`encode_frame`].
/// `expected_signature` is whichever of [`PROXY_SIGNATURE`] /
/// [`LOBBY_SIGNATURE`] the connection currently expects (§4.1).
pub fn decode_frame(buf: &[u8], expected_signature: u32, session_key: u32) -> Result<DecodedFrame> {
    if buf.len() < GENERIC_BASE_LEN + APPLICATION_BASE_LEN + GENERIC_FOOTER_LEN {
        return Err(Error::Protocol("frame shorter than minimum header/footer size"));
    }

    let body_end = buf.len() - GENERIC_FOOTER_LEN;
    let mut decrypted = buf.to_vec();
    xor_crypt(&mut decrypted[..body_end], session_key);

    let base = GenericBase::read_from(&decrypted[..GENERIC_BASE_LEN]);
    if base.total_length as usize != buf.len() {
        return Err(Error::Protocol("GenericBase.total_length does not match observed bytes"));
    }

    let app = ApplicationBase::read_from(&decrypted[GENERIC_BASE_LEN..GENERIC_BASE_LEN + APPLICATION_BASE_LEN]);
    if app.signature != expected_signature {
        return Err(Error::Protocol("signature mismatch"));
    }

    let payload_start = GENERIC_BASE_LEN + APPLICATION_BASE_LEN;
    let payload_end = payload_start + app.data_length as usize;
    if payload_end != body_end {
        return Err(Error::Protocol("trailing or missing bytes after declared payload"));
    }

    let computed_checksum = checksum(&decrypted[GENERIC_BASE_LEN..body_end]);
    if computed_checksum != base.checksum {
        return Err(Error::Protocol("checksum mismatch"));
    }

    let footer = GenericFooter::read_from(&decrypted[body_end..]);
    if footer.status != STATUS_OK {
        return Err(Error::Protocol("footer status was not OK"));
    }

    Ok(DecodedFrame {
        sequence_id: base.sequence_id,
        signature: app.signature,
        message_type: app.message_type,
        payload: decrypted[payload_start..payload_end].to_vec(),
    })
}

/// Checks that a fixed-size message's declared `data_length` matches the
/// expected Rust-side encoded size `T` before parsing its fields.
pub fn check_fixed_size(data_length: usize, expected: usize) -> Result<()> {
    if data_length != expected {
        return Err(Error::Protocol("dataLength does not match the declared message's fixed size"));
    }
    Ok(())
}

/// Splits a Legacy `&`-delimited line (already stripped of its `\r\n`)
/// into its ordered fields.
pub fn split_legacy_fields(line: &str) -> Vec<&str> {
    line.split('&').filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_crypt_is_self_inverse() {
        let key = 0xDEAD_BEEF;
        let original = b"the quick brown fox jumps over".to_vec();
        let mut buf = original.clone();
        xor_crypt(&mut buf, key);
        assert_ne!(buf, original);
        xor_crypt(&mut buf, key);
        assert_eq!(buf, original);
    }

    #[test]
    fn frame_round_trip_and_checksum() {
        let key = 0x1234_5678;
        let payload = b"hello game payload".to_vec();
        let frame = encode_frame(LOBBY_SIGNATURE, 42, 7, &payload, key);
        let decoded = decode_frame(&frame, LOBBY_SIGNATURE, key).expect("decode should succeed");
        assert_eq!(decoded.sequence_id, 7);
        assert_eq!(decoded.message_type, 42);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let key = 1;
        let frame = encode_frame(LOBBY_SIGNATURE, 1, 0, b"x", key);
        assert!(decode_frame(&frame, PROXY_SIGNATURE, key).is_err());
    }

    #[test]
    fn tampered_checksum_is_rejected() {
        let key = 1;
        let mut frame = encode_frame(LOBBY_SIGNATURE, 1, 0, b"payload", key);
        let last = frame.len() - 1;
        frame[last - 1] ^= 0xFF;
        assert!(decode_frame(&frame, LOBBY_SIGNATURE, key).is_err());
    }

    #[test]
    fn legacy_field_split() {
        assert_eq!(split_legacy_fields("38&38&38&"), vec!["38", "38", "38"]);
    }
}
