//! Modern-era connection state machine (spec §4.2.2): `Initialized ->
//! Unconfigured -> WaitingForOpponents -> Playing`, plus the out-of-band
//! `ProxyDisconnected` state.
//!
//! Grounded on the same shape as `legacy.rs` (itself grounded on the
//! teacher's `ClientController::perform_handshake`), adapted from
//! `\r\n`-terminated lines to length-prefixed, XOR-obfuscated binary
//! frames (`relay_protocol::frame`).

use super::{ConnState, ConnectionShared, Declared};
use crate::lobby::Lobby;
use relay_protocol::era::{Dialect, Era, Skill};
use relay_protocol::error::{Error, Result};
use relay_protocol::frame::{self, DecodedFrame};
use relay_protocol::game::Game;
use relay_protocol::protocol::{self, lobby_message, proxy_message, service_reason};
use rand::Rng;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::net::TcpStream;

/// Idle timeout outside `WaitingForOpponents`/`Playing` (spec §4.2.2,
/// shared with the Legacy 60-second figure since neither the spec nor
/// `original_source` calls out a different one for Modern).
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// A generous ceiling on a single frame's `total_length`, so a corrupt or
/// hostile length field cannot drive an unbounded allocation before the
/// checksum has even been checked.
const MAX_FRAME_LEN: u32 = 64 * 1024;

/// Drives a single Modern connection until it disconnects or a protocol
/// error ends it. Registered by the listener; any `Err` return is the
/// caller's signal to tear the connection down.
pub async fn run(conn: Arc<ConnectionShared>, read_half: ReadHalf<TcpStream>, lobby: Arc<Lobby>) -> Result<()> {
    let mut reader = read_half;

    loop {
        let state = *conn.state.lock().await;

        if state == ConnState::ModernInitialized {
            handle_initialized(&conn, &mut reader).await?;
            continue;
        }

        let signature = signature_for(state);
        let frame = if state.idle_timeout_applies() {
            tokio::time::timeout(IDLE_TIMEOUT, read_frame(&mut reader, conn.session_key.load(Ordering::SeqCst), signature))
                .await
                .map_err(|_| Error::ClientDisconnected)??
        } else {
            read_frame(&mut reader, conn.session_key.load(Ordering::SeqCst), signature).await?
        };

        match state {
            ConnState::ModernUnconfigured => handle_unconfigured(&conn, &lobby, &frame).await?,
            ConnState::ModernWaitingForOpponents | ConnState::ModernPlaying => {
                if !handle_playing(&conn, &frame).await? {
                    return Ok(());
                }
            }
            ConnState::ModernProxyDisconnected => handle_proxy_disconnected(&conn, &frame).await?,
            _ => return Err(Error::Protocol("Modern connection task observed an unreachable state")),
        }
    }
}

/// `Initialized`: a back-to-back `Hi`/`Id`/`ServiceRequest{CONNECT}` triple
/// under the default key and [`frame::PROXY_SIGNATURE`] (spec §4.2.2).
/// Replies with a three-message hello bundle (`Hello`/`Settings`/
/// `ServiceInfo{CONNECT}`) plus a second `ServiceInfo{CONNECT}` bundle
/// marking the switch to [`frame::LOBBY_SIGNATURE`] and the session's own
/// key (spec §9 open question: the exact shape of this handshake was not
/// present in the retrieved `original_source`; see `DESIGN.md`).
async fn handle_initialized(conn: &Arc<ConnectionShared>, reader: &mut ReadHalf<TcpStream>) -> Result<()> {
    let default_key = frame::DEFAULT_SECURITY_KEY;

    let hi_frame = read_frame(reader, default_key, frame::PROXY_SIGNATURE).await?;
    if hi_frame.message_type != proxy_message::HI {
        return Err(Error::Protocol("expected Hi as the first proxy message"));
    }
    let hi = protocol::Hi::from_bytes(&hi_frame.payload)?;
    if hi.protocol_version != protocol::PROXY_PROTOCOL_VERSION {
        return Err(Error::Protocol("unsupported proxy protocol version"));
    }
    let dialect = if hi.client_version == protocol::XP_PROXY_CLIENT_VERSION {
        Dialect::XPModern
    } else if hi.client_version == protocol::ME_PROXY_CLIENT_VERSION {
        Dialect::MEModern
    } else {
        return Err(Error::Protocol("unrecognized client version in Hi"));
    };

    let id_frame = read_frame(reader, default_key, frame::PROXY_SIGNATURE).await?;
    if id_frame.message_type != proxy_message::ID {
        return Err(Error::Protocol("expected Id as the second proxy message"));
    }
    let id = protocol::Id::from_bytes(&id_frame.payload)?;
    let game = Game::from_modern_token(&id.game_token).ok_or(Error::Protocol("unrecognized game token in Id"))?;

    let service_frame = read_frame(reader, default_key, frame::PROXY_SIGNATURE).await?;
    if service_frame.message_type != proxy_message::SERVICE_REQUEST {
        return Err(Error::Protocol("expected ServiceRequest as the third proxy message"));
    }
    let request = protocol::ServiceRequest::from_bytes(&service_frame.payload)?;
    if request.reason != service_reason::CONNECT {
        return Err(Error::Protocol("expected ServiceRequest{CONNECT} in Initialized"));
    }

    *conn.dialect.lock().await = Some(dialect);
    // `game` is fully known only once `Unconfigured`'s `ClientConfig` adds
    // a skill; record it now in a placeholder `Declared` so `Unconfigured`
    // only has to fill in `skill`.
    *conn.declared.lock().await = Some(Declared { game, skill: Skill::Beginner });

    let mut session_guid_bytes = [0u8; 16];
    rand::thread_rng().fill(&mut session_guid_bytes);
    let session_guid = u128::from_le_bytes(session_guid_bytes);
    *conn.session_guid.lock().await = Some(session_guid);

    let new_key: u32 = rand::thread_rng().gen();

    let hello = protocol::Hello { session_key: new_key, user_id: conn.id, session_guid };
    conn.send_raw(&frame::encode_frame(frame::PROXY_SIGNATURE, proxy_message::HELLO, conn.next_sequence_id(), &hello.to_bytes(), default_key))
        .await?;

    // Everything emitted after `Hello` uses the freshly delivered key; the
    // client is expected to switch the instant it has parsed `Hello` too.
    conn.session_key.store(new_key, Ordering::SeqCst);

    let settings = protocol::Settings { protocol_version: protocol::PROXY_PROTOCOL_VERSION };
    conn.send_raw(&frame::encode_frame(frame::PROXY_SIGNATURE, proxy_message::SETTINGS, conn.next_sequence_id(), &settings.to_bytes(), new_key))
        .await?;

    let info = protocol::ServiceInfo { reason: service_reason::CONNECT };
    conn.send_raw(&frame::encode_frame(frame::PROXY_SIGNATURE, proxy_message::SERVICE_INFO, conn.next_sequence_id(), &info.to_bytes(), new_key))
        .await?;

    // Second bundle: a lone `ServiceInfo{CONNECT}`, this time framed under
    // the lobby signature, marking the transition out of the proxy
    // sub-protocol entirely.
    let info2 = protocol::ServiceInfo { reason: service_reason::CONNECT };
    conn.send_raw(&frame::encode_frame(frame::LOBBY_SIGNATURE, proxy_message::SERVICE_INFO, conn.next_sequence_id(), &info2.to_bytes(), new_key))
        .await?;

    *conn.state.lock().await = ConnState::ModernUnconfigured;
    Ok(())
}

/// `Unconfigured`: a single `ClientConfig` blob (spec §4.2.2). Recognized
/// keys are `ULCID`/`UTCOFFSET`/`Skill`/`Chat`; `SLCID`/`ILCID`/`Exit` are
/// accepted and ignored; anything else is a protocol error. Replies with
/// `UserInfoResponse`, joins the lobby, and advances to
/// `WaitingForOpponents` with the accepts-game-messages gate opened
/// (spec §4.2.3: strictly before the match can possibly deliver its start
/// message, since every seat must reach at least this point first).
async fn handle_unconfigured(conn: &Arc<ConnectionShared>, lobby: &Arc<Lobby>, frame: &DecodedFrame) -> Result<()> {
    if frame.message_type != lobby_message::CLIENT_CONFIG {
        return Err(Error::Protocol("expected ClientConfig in Unconfigured"));
    }
    let text = String::from_utf8(frame.payload.clone()).map_err(|_| Error::Protocol("ClientConfig was not valid UTF-8"))?;
    let text = text.trim_end_matches('\0');
    let config = protocol::ClientConfig::parse(text)?;

    let mut skill = Skill::Beginner;
    let mut chat_enabled = true;
    for (key, value) in &config.entries {
        match key.as_str() {
            "Skill" => {
                skill = Skill::from_str_loose(value).ok_or(Error::Protocol("ClientConfig Skill was not recognized"))?;
            }
            "Chat" => {
                chat_enabled = value != "0";
            }
            "ULCID" | "UTCOFFSET" | "SLCID" | "ILCID" | "Exit" => {}
            _ => return Err(Error::Protocol("unrecognized ClientConfig key")),
        }
    }
    conn.chat_enabled.store(chat_enabled, Ordering::SeqCst);

    let declared = *conn.declared.lock().await;
    let game = declared.ok_or(Error::Protocol("Unconfigured reached without a declared game"))?.game;
    *conn.declared.lock().await = Some(Declared { game, skill });

    let response = protocol::UserInfoResponse { id: conn.id, language: 0 };
    send_frame(conn, lobby_message::USER_INFO_RESPONSE, response.to_bytes()).await?;

    let m = lobby.find_or_create(Era::Modern, game, skill).await?;
    m.join_player(conn, None).await?;

    *conn.state.lock().await = ConnState::ModernWaitingForOpponents;
    conn.accepts_game_messages.store(true, Ordering::SeqCst);
    Ok(())
}

/// `WaitingForOpponents`/`Playing`: dispatches `GameMessage` to the match,
/// `ChatSwitch` to both the connection's own flag and the match, and a
/// proxy `ServiceRequest{DISCONNECT}` to `ProxyDisconnected` (spec
/// §4.2.2). `KeepAlive` is a silent no-op. Returns `Ok(false)` only if a
/// future clean-disconnect message type is added; today every path either
/// advances state or returns an error.
async fn handle_playing(conn: &Arc<ConnectionShared>, frame: &DecodedFrame) -> Result<bool> {
    *conn.state.lock().await = ConnState::ModernPlaying;

    if frame.message_type == proxy_message::SERVICE_REQUEST {
        let request = protocol::ServiceRequest::from_bytes(&frame.payload)?;
        if request.reason == service_reason::DISCONNECT {
            *conn.state.lock().await = ConnState::ModernProxyDisconnected;
            return Ok(true);
        }
        return Err(Error::Protocol("unexpected ServiceRequest reason while Playing"));
    }

    if frame.message_type == lobby_message::KEEP_ALIVE {
        return Ok(true);
    }

    let m = conn.live_match().await.ok_or(Error::Protocol("message received without a bound match"))?;

    if frame.message_type == lobby_message::GAME_MESSAGE {
        let game_message = protocol::GameMessage::from_bytes(&frame.payload)?;
        m.handle_modern_game_message(conn.id, game_message.msg_type, &game_message.payload).await?;
        return Ok(true);
    }

    if frame.message_type == lobby_message::CHAT_SWITCH {
        let switch = protocol::ChatSwitch::from_bytes(&frame.payload)?;
        conn.chat_enabled.store(switch.chat_enabled, Ordering::SeqCst);
        m.broadcast_chat_switch(conn.id, switch.chat_enabled).await?;
        return Ok(true);
    }

    if frame.message_type == lobby_message::CHAT_MESSAGE {
        let chat = protocol::ChatMessage::from_bytes(&frame.payload)?;
        m.handle_modern_chat(conn.id, chat.id).await?;
        return Ok(true);
    }

    Err(Error::Protocol("unrecognized lobby message type while Playing"))
}

/// `ProxyDisconnected`: a proxy `ServiceRequest{CONNECT}` resumes play;
/// `{DISCONNECT}` is an idempotent no-op (spec §4.2.2).
async fn handle_proxy_disconnected(conn: &Arc<ConnectionShared>, frame: &DecodedFrame) -> Result<()> {
    if frame.message_type != proxy_message::SERVICE_REQUEST {
        return Err(Error::Protocol("expected ServiceRequest while ProxyDisconnected"));
    }
    let request = protocol::ServiceRequest::from_bytes(&frame.payload)?;
    match request.reason {
        service_reason::CONNECT => {
            *conn.state.lock().await = ConnState::ModernPlaying;
        }
        service_reason::DISCONNECT => {}
        _ => return Err(Error::Protocol("unrecognized ServiceRequest reason while ProxyDisconnected")),
    }
    Ok(())
}

/// Consumed by [`crate::match_state::MatchShared::deliver`] to wrap a game
/// engine's [`crate::games::Outgoing`] in a `GameMessage` sub-header and
/// send it under [`lobby_message::GAME_MESSAGE`].
pub async fn send_game_message(conn: &Arc<ConnectionShared>, game: Game, msg_type: i16, payload: Vec<u8>) -> Result<()> {
    let wrapped = protocol::GameMessage { game_id: game.wire_id() as i16, msg_type, payload };
    send_frame(conn, lobby_message::GAME_MESSAGE, wrapped.to_bytes()).await
}

/// Consumed by [`crate::match_state::MatchShared::deliver`] for
/// lobby-level messages (`GameStart`, `ServerStatus`, `PlayerReplaced`,
/// `ChatSwitch`, `ChatMessage`) that carry no `GameMessage` sub-header.
pub async fn send_frame(conn: &Arc<ConnectionShared>, msg_type: u32, payload: Vec<u8>) -> Result<()> {
    let key = conn.session_key.load(Ordering::SeqCst);
    let bytes = frame::encode_frame(frame::LOBBY_SIGNATURE, msg_type, conn.next_sequence_id(), &payload, key);
    conn.send_raw(&bytes).await
}

/// Which signature a state currently expects/emits under (spec §4.1): only
/// `Initialized` itself talks under [`frame::PROXY_SIGNATURE`] — the whole
/// proxy handshake completes within `handle_initialized` before the state
/// machine ever reads a frame in any other state.
fn signature_for(state: ConnState) -> u32 {
    match state {
        ConnState::ModernInitialized => frame::PROXY_SIGNATURE,
        _ => frame::LOBBY_SIGNATURE,
    }
}

/// Reads one complete frame off the wire. The 4-byte `total_length` field
/// is decrypted in isolation first (DWORD-chunk XOR derives each chunk's
/// key solely from its own index, so this does not disturb decoding the
/// rest of the frame afterward) so the remaining byte count can be read
/// before the checksum is known.
async fn read_frame(reader: &mut ReadHalf<TcpStream>, session_key: u32, expected_signature: u32) -> Result<DecodedFrame> {
    let mut first4 = [0u8; 4];
    reader.read_exact(&mut first4).await.map_err(|_| Error::ClientDisconnected)?;

    let mut peek = first4;
    frame::xor_crypt(&mut peek, session_key);
    let total_length = u32::from_le_bytes(peek);

    let min_length = (frame::GENERIC_BASE_LEN + frame::APPLICATION_BASE_LEN + frame::GENERIC_FOOTER_LEN) as u32;
    if total_length < min_length || total_length > MAX_FRAME_LEN {
        return Err(Error::Protocol("frame total_length out of bounds"));
    }

    let mut rest = vec![0u8; (total_length - 4) as usize];
    reader.read_exact(&mut rest).await.map_err(|_| Error::ClientDisconnected)?;

    let mut full = Vec::with_capacity(total_length as usize);
    full.extend_from_slice(&first4);
    full.extend_from_slice(&rest);

    frame::decode_frame(&full, expected_signature, session_key)
}
