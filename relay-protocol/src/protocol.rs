//! Modern wire message tables and structs (C2), grounded on
//! `WinXP/Protocol/Game.hpp` and `WinXP/Defines.hpp`. Proxy-phase message
//! type ids (`Hi`/`Id`/`ServiceRequest`/...) were not present in the
//! retrieved `original_source` tree (no `Proxy.hpp` was kept), so they are
//! assigned here as a concrete, internally-consistent block; see
//! `DESIGN.md`.

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Proxy-phase message types (before `ProxyConnected`), framed under
/// [`crate::frame::PROXY_SIGNATURE`].
pub mod proxy_message {
    pub const HI: u32 = 1;
    pub const ID: u32 = 2;
    pub const SERVICE_REQUEST: u32 = 3;
    pub const HELLO: u32 = 4;
    pub const SETTINGS: u32 = 5;
    pub const SERVICE_INFO: u32 = 6;
}

/// `ServiceRequest`/`ServiceInfo` reason codes.
pub mod service_reason {
    pub const CONNECT: u32 = 1;
    pub const DISCONNECT: u32 = 2;
}

/// Lobby-phase message types (after `ProxyConnected`), framed under
/// [`crate::frame::LOBBY_SIGNATURE`]. Numeric values per `Game.hpp`.
pub mod lobby_message {
    pub const GAME_MESSAGE: u32 = 9;
    pub const USER_INFO_RESPONSE: u32 = 23;
    pub const CLIENT_CONFIG: u32 = 30;
    pub const SERVER_STATUS: u32 = 31;
    pub const GAME_START: u32 = 32;
    pub const CHAT_SWITCH: u32 = 33;
    pub const PLAYER_REPLACED: u32 = 34;
    pub const KEEP_ALIVE: u32 = 35;
    pub const CHAT_MESSAGE: u32 = 36;
}

/// `XPProxyProtocolVersion`.
pub const PROXY_PROTOCOL_VERSION: u32 = 1;
/// `XPProxyClientVersion` — identifies the `XPModern` dialect.
pub const XP_PROXY_CLIENT_VERSION: u32 = 0x0108_2751;
/// `MEProxyClientVersion` — identifies the `MEModern` dialect.
pub const ME_PROXY_CLIENT_VERSION: u32 = 0x0100_20b5;

pub const MATCH_MAX_PLAYERS: usize = 4;

/// `MsgHi`: the first proxy message, carrying the protocol version and
/// the client-version constant the dialect is derived from (spec
/// §4.2.2 `Initialized`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hi {
    pub protocol_version: u32,
    pub client_version: u32,
}

impl Hi {
    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.write_u32::<LittleEndian>(self.protocol_version).unwrap();
        buf.write_u32::<LittleEndian>(self.client_version).unwrap();
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Hi> {
        let mut cur = Cursor::new(buf);
        let protocol_version = read_u32(&mut cur)?;
        let client_version = read_u32(&mut cur)?;
        Ok(Hi { protocol_version, client_version })
    }
}

/// `MsgId`: the second proxy message, carrying the 6-byte game token
/// the lobby is selected by (spec §4.2.2 `Initialized`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Id {
    pub game_token: [u8; 6],
}

impl Id {
    pub fn to_bytes(self) -> Vec<u8> {
        self.game_token.to_vec()
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Id> {
        if buf.len() < 6 {
            return Err(Error::Protocol("Id shorter than the 6-byte game token"));
        }
        let mut game_token = [0u8; 6];
        game_token.copy_from_slice(&buf[..6]);
        Ok(Id { game_token })
    }
}

/// `MsgServiceRequest` / `MsgServiceInfo`: carries a [`service_reason`]
/// code in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceRequest {
    pub reason: u32,
}

impl ServiceRequest {
    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4);
        buf.write_u32::<LittleEndian>(self.reason).unwrap();
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<ServiceRequest> {
        let mut cur = Cursor::new(buf);
        let reason = read_u32(&mut cur)?;
        Ok(ServiceRequest { reason })
    }
}

pub type ServiceInfo = ServiceRequest;

/// `MsgHello`: the server's reply to the proxy handshake, delivering the
/// session's own XOR key (spec §4.1: "thereafter both sides use the
/// server-chosen session key delivered in `ConnectionHello`") and the
/// user id the connection is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    pub session_key: u32,
    pub user_id: u32,
    pub session_guid: u128,
}

impl Hello {
    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24);
        buf.write_u32::<LittleEndian>(self.session_key).unwrap();
        buf.write_u32::<LittleEndian>(self.user_id).unwrap();
        buf.extend_from_slice(&self.session_guid.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Hello> {
        let mut cur = Cursor::new(buf);
        let session_key = read_u32(&mut cur)?;
        let user_id = read_u32(&mut cur)?;
        if buf.len() < 24 {
            return Err(Error::Protocol("Hello shorter than expected"));
        }
        let mut guid_bytes = [0u8; 16];
        guid_bytes.copy_from_slice(&buf[8..24]);
        Ok(Hello {
            session_key,
            user_id,
            session_guid: u128::from_le_bytes(guid_bytes),
        })
    }
}

/// `MsgSettings`: echoes the negotiated protocol version back to the
/// client as part of the hello bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub protocol_version: u32,
}

impl Settings {
    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4);
        buf.write_u32::<LittleEndian>(self.protocol_version).unwrap();
        buf
    }
}

/// `MsgServerStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStatus {
    pub status: u32,
    pub players_waiting: u32,
}

impl ServerStatus {
    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.write_u32::<LittleEndian>(self.status).unwrap();
        buf.write_u32::<LittleEndian>(self.players_waiting).unwrap();
        buf
    }
}

/// `MsgUserInfoResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserInfoResponse {
    pub id: u32,
    pub language: u32,
}

impl UserInfoResponse {
    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.write_u32::<LittleEndian>(self.id).unwrap();
        buf.write_u32::<LittleEndian>(self.language).unwrap();
        buf
    }
}

/// One seat's entry in `MsgGameStart::users`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameStartUser {
    pub id: u32,
    pub language: u32,
    pub chat_enabled: bool,
    pub skill: i16,
}

/// `MsgGameStart`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameStart {
    pub game_id: u32,
    pub table: i16,
    pub seat: i16,
    pub total_seats: i16,
    pub users: Vec<GameStartUser>,
}

impl GameStart {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(self.game_id).unwrap();
        buf.write_i16::<LittleEndian>(self.table).unwrap();
        buf.write_i16::<LittleEndian>(self.seat).unwrap();
        buf.write_i16::<LittleEndian>(self.total_seats).unwrap();
        for user in &self.users {
            buf.write_u32::<LittleEndian>(user.id).unwrap();
            buf.write_u32::<LittleEndian>(user.language).unwrap();
            buf.write_u8(user.chat_enabled as u8).unwrap();
            buf.write_i16::<LittleEndian>(user.skill).unwrap();
        }
        buf
    }
}

/// `MsgChatSwitch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatSwitch {
    pub user_id: u32,
    pub chat_enabled: bool,
}

impl ChatSwitch {
    pub fn from_bytes(buf: &[u8]) -> Result<ChatSwitch> {
        let mut cur = Cursor::new(buf);
        let user_id = read_u32(&mut cur)?;
        let chat_enabled = read_u8(&mut cur)? != 0;
        Ok(ChatSwitch { user_id, chat_enabled })
    }

    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5);
        buf.write_u32::<LittleEndian>(self.user_id).unwrap();
        buf.write_u8(self.chat_enabled as u8).unwrap();
        buf
    }
}

/// `MsgPlayerReplaced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerReplaced {
    pub user_id_old: u32,
    pub user_id_new: u32,
}

impl PlayerReplaced {
    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.write_u32::<LittleEndian>(self.user_id_old).unwrap();
        buf.write_u32::<LittleEndian>(self.user_id_new).unwrap();
        buf
    }
}

/// `MsgClientConfig`: a 256-byte ASCII `key=value` blob, newline or
/// semicolon separated. Parsed per spec §4.2.2's `Unconfigured` state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub entries: Vec<(String, String)>,
}

impl ClientConfig {
    pub fn parse(text: &str) -> Result<ClientConfig> {
        let mut entries = Vec::new();
        for field in text.split(|c| c == ';' || c == '\n' || c == '\r').map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let mut parts = field.splitn(2, '=');
            let key = parts.next().unwrap_or_default();
            let value = parts.next().ok_or(Error::Protocol("ClientConfig field missing '='"))?;
            entries.push((key.to_string(), value.to_string()));
        }
        Ok(ClientConfig { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

fn read_u32(cur: &mut Cursor<&[u8]>) -> Result<u32> {
    cur.read_u32::<LittleEndian>().map_err(|_| Error::Protocol("buffer too short"))
}

fn read_u8(cur: &mut Cursor<&[u8]>) -> Result<u8> {
    cur.read_u8().map_err(|_| Error::Protocol("buffer too short"))
}

fn read_i16(cur: &mut Cursor<&[u8]>) -> Result<i16> {
    cur.read_i16::<LittleEndian>().map_err(|_| Error::Protocol("buffer too short"))
}

/// One `StateTransaction::Transaction` entry: a `(tag, index, value)`
/// triple the thinner board engines (Backgammon/Checkers/Reversi) relay
/// without interpreting (§4.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub tag: i32,
    pub index: i32,
    pub value: i32,
}

/// `MsgStateTransaction`: a seat's authoritative board update, relayed
/// verbatim to peers after the server checks the sender owns the
/// current move (§4.3.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransaction {
    pub user_id: u32,
    pub seat: i32,
    pub tag: i32,
    pub transactions: Vec<Transaction>,
}

impl StateTransaction {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(self.user_id).unwrap();
        buf.write_i32::<LittleEndian>(self.seat).unwrap();
        buf.write_i32::<LittleEndian>(self.transactions.len() as i32 * 12).unwrap();
        buf.write_i32::<LittleEndian>(self.tag).unwrap();
        for t in &self.transactions {
            buf.write_i32::<LittleEndian>(t.tag).unwrap();
            buf.write_i32::<LittleEndian>(t.index).unwrap();
            buf.write_i32::<LittleEndian>(t.value).unwrap();
        }
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<StateTransaction> {
        let mut cur = Cursor::new(buf);
        let user_id = read_u32(&mut cur)?;
        let seat = cur.read_i32::<LittleEndian>().map_err(|_| Error::Protocol("buffer too short"))?;
        let message_length = cur.read_i32::<LittleEndian>().map_err(|_| Error::Protocol("buffer too short"))?;
        let tag = cur.read_i32::<LittleEndian>().map_err(|_| Error::Protocol("buffer too short"))?;

        if message_length < 0 || message_length % 12 != 0 {
            return Err(Error::Protocol("StateTransaction messageLength not a multiple of entry size"));
        }
        let count = (message_length / 12) as usize;
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            let tag = cur.read_i32::<LittleEndian>().map_err(|_| Error::Protocol("truncated transaction"))?;
            let index = cur.read_i32::<LittleEndian>().map_err(|_| Error::Protocol("truncated transaction"))?;
            let value = cur.read_i32::<LittleEndian>().map_err(|_| Error::Protocol("truncated transaction"))?;
            transactions.push(Transaction { tag, index, value });
        }

        Ok(StateTransaction { user_id, seat, tag, transactions })
    }
}

/// Backgammon-only server-generated dice roll (spec §8 scenario 2): unlike
/// the general `StateTransaction` relay (§4.3.3), the two die values here
/// are produced by the server itself rather than trusted from the host
/// seat, since a peer cannot be trusted to roll its own dice fairly.
pub mod board_message {
    pub const CHECK_IN: i16 = 255;
    pub const DICE_ROLL_REQUEST: i16 = 256;
    pub const DICE_ROLL_RESPONSE: i16 = 257;
    pub const STATE_TRANSACTION: i16 = 258;
}

/// `DiceRollResponse`: `seat` echoes the requester, `dice1`/`dice2` are
/// independent uniform draws in `1..=6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiceRollResponse {
    pub seat: i16,
    pub dice1: u8,
    pub dice2: u8,
}

impl DiceRollResponse {
    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4);
        buf.write_i16::<LittleEndian>(self.seat).unwrap();
        buf.write_u8(self.dice1).unwrap();
        buf.write_u8(self.dice2).unwrap();
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<DiceRollResponse> {
        let mut cur = Cursor::new(buf);
        let seat = read_i16(&mut cur)?;
        let dice1 = read_u8(&mut cur)?;
        let dice2 = read_u8(&mut cur)?;
        Ok(DiceRollResponse { seat, dice1, dice2 })
    }
}

/// `DiceRollRequest`: just the requesting seat, echoed back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiceRollRequest {
    pub seat: i16,
}

impl DiceRollRequest {
    pub fn from_bytes(buf: &[u8]) -> Result<DiceRollRequest> {
        let mut cur = Cursor::new(buf);
        let seat = read_i16(&mut cur)?;
        Ok(DiceRollRequest { seat })
    }
}

/// `MsgChatMessage`: a NUL-terminated UTF-16LE string carrying `/<id>`
/// (spec §4.3 "Chat"). The server only ever emits an id it has itself
/// validated against the common or per-game chat range, substituting its
/// own localized string-table lookup rather than echoing client text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatMessage {
    pub user_id: u32,
    pub id: u32,
}

impl ChatMessage {
    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(self.user_id).unwrap();
        for unit in format!("/{}", self.id).encode_utf16() {
            buf.write_u16::<LittleEndian>(unit).unwrap();
        }
        buf.write_u16::<LittleEndian>(0).unwrap();
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<ChatMessage> {
        let mut cur = Cursor::new(buf);
        let user_id = read_u32(&mut cur)?;
        let mut units = Vec::new();
        loop {
            let unit = cur.read_u16::<LittleEndian>().map_err(|_| Error::Protocol("ChatMessage missing NUL terminator"))?;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        let text = String::from_utf16(&units).map_err(|_| Error::Protocol("ChatMessage was not valid UTF-16"))?;
        let id = text.strip_prefix('/').and_then(|s| s.parse().ok()).ok_or(Error::Protocol("ChatMessage missing '/<id>' prefix"))?;
        Ok(ChatMessage { user_id, id })
    }
}

/// A parsed Modern `GameMessage` (sub-header + game-specific payload).
#[derive(Debug, Clone)]
pub struct GameMessage {
    pub game_id: i16,
    pub msg_type: i16,
    pub payload: Vec<u8>,
}

impl GameMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 8];
        crate::frame::GameMessageHeader {
            game_id: self.game_id,
            msg_type: self.msg_type,
            length: self.payload.len() as i16,
            _pad: 0,
        }
        .write_to(&mut buf[..8]);
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<GameMessage> {
        if buf.len() < crate::frame::GAME_MESSAGE_HEADER_LEN {
            return Err(Error::Protocol("GameMessage shorter than header"));
        }
        let header = crate::frame::GameMessageHeader::read_from(&buf[..8]);
        let payload = buf[8..].to_vec();
        if header.length as usize != payload.len() {
            return Err(Error::Protocol("GameMessage length field does not match payload"));
        }
        Ok(GameMessage {
            game_id: header.game_id,
            msg_type: header.msg_type,
            payload,
        })
    }
}

/// Re-exported so `spades`/`hearts` can decode their own fixed-size
/// message bodies with the same short-buffer error mapping.
pub(crate) use self::{read_i16 as read_i16_field, read_u32 as read_u32_field, read_u8 as read_u8_field};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_round_trip() {
        let msg = ChatMessage { user_id: 7, id: 42 };
        let decoded = ChatMessage::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn chat_message_rejects_missing_slash() {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(1).unwrap();
        for unit in "42".encode_utf16() {
            buf.write_u16::<LittleEndian>(unit).unwrap();
        }
        buf.write_u16::<LittleEndian>(0).unwrap();
        assert!(ChatMessage::from_bytes(&buf).is_err());
    }

    #[test]
    fn state_transaction_round_trip() {
        let txn = StateTransaction {
            user_id: 3,
            seat: 1,
            tag: 0,
            transactions: vec![Transaction { tag: 0, index: 1, value: 2 }],
        };
        let decoded = StateTransaction::from_bytes(&txn.to_bytes()).unwrap();
        assert_eq!(decoded, txn);
    }
}
