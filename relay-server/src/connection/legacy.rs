//! Legacy-era connection state machine (spec §4.2.1): `Initialized ->
//! Joining -> JoiningConfirm -> WaitingForOpponents -> Playing`.
//!
//! Grounded on the teacher's `ClientController::perform_handshake`
//! (`mahjong-server/src/client.rs`) for the overall shape of a
//! handshake-then-message-pump connection task, adapted from a websocket
//! message stream to `\r\n`-terminated lines over a raw `TcpStream`.

use super::{ConnState, ConnectionShared, Declared};
use crate::legacy_xml;
use crate::lobby::Lobby;
use relay_protocol::era::Era;
use relay_protocol::error::{Error, Result};
use relay_protocol::frame::split_legacy_fields;
use std::convert::TryInto;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, ReadHalf};
use tokio::net::TcpStream;

/// Idle timeout outside `WaitingForOpponents`/`Playing` (spec §4.2.1).
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Drives a single Legacy connection until it disconnects or a protocol
/// error ends it. Registered by the listener; any `Err` return is the
/// caller's signal to tear the connection down.
pub async fn run(conn: Arc<ConnectionShared>, read_half: ReadHalf<TcpStream>, lobby: Arc<Lobby>) -> Result<()> {
    let mut reader = BufReader::new(read_half);

    loop {
        let state = *conn.state.lock().await;
        let line = if state.idle_timeout_applies() {
            tokio::time::timeout(IDLE_TIMEOUT, read_line(&mut reader))
                .await
                .map_err(|_| Error::ClientDisconnected)??
        } else {
            read_line(&mut reader).await?
        };

        match state {
            ConnState::LegacyInitialized => handle_initialized(&conn, &lobby, &line, &mut reader).await?,
            ConnState::LegacyJoining => handle_joining(&conn, &line).await?,
            ConnState::LegacyJoiningConfirm => handle_joining_confirm(&conn, &line).await?,
            ConnState::LegacyWaitingForOpponents | ConnState::LegacyPlaying => {
                if !handle_playing(&conn, &line, &mut reader).await? {
                    return Ok(());
                }
            }
            _ => return Err(Error::Protocol("Legacy connection task observed a Modern-only state")),
        }
    }
}

/// `Initialized`: `JOIN Session=<guid>` followed by three ticket blobs on
/// the same frame (spec §4.2.1).
async fn handle_initialized(conn: &Arc<ConnectionShared>, lobby: &Arc<Lobby>, line: &str, reader: &mut BufReader<ReadHalf<TcpStream>>) -> Result<()> {
    let rest = line.strip_prefix("JOIN ").ok_or(Error::Protocol("expected JOIN in Initialized"))?;
    let session_guid_text = rest.strip_prefix("Session=").ok_or(Error::Protocol("JOIN missing Session="))?;
    let session_guid = parse_guid(session_guid_text)?;

    let mut blobs = Vec::with_capacity(3);
    for _ in 0..3 {
        blobs.push(read_line(reader).await?);
    }
    let ticket = legacy_xml::parse_tickets(&blobs)?;

    *conn.session_guid.lock().await = Some(session_guid);
    *conn.declared.lock().await = Some(Declared { game: ticket.game, skill: ticket.skill });

    let m = lobby.find_or_create(Era::Legacy, ticket.game, ticket.skill).await?;
    m.join_player(conn, Some(ticket.puid)).await?;

    let response = format!("JoinContext {} {} 38&38&38&\r\n", format_guid(m.guid), format_guid(session_guid));
    conn.send_raw(response.as_bytes()).await?;

    *conn.state.lock().await = ConnState::LegacyJoining;
    Ok(())
}

/// `Joining`: `PLAY match…` advances silently to `JoiningConfirm` (spec
/// §4.2.1).
async fn handle_joining(conn: &Arc<ConnectionShared>, line: &str) -> Result<()> {
    if !line.starts_with("PLAY") {
        return Err(Error::Protocol("expected PLAY in Joining"));
    }
    *conn.state.lock().await = ConnState::LegacyJoiningConfirm;
    Ok(())
}

/// `JoiningConfirm`: `AT …` emits `READY` and the `Ready` STag, then
/// advances to `WaitingForOpponents`. The gate is opened here, strictly
/// before the match can possibly deliver a start message to this peer
/// (spec §4.2.3) since the match only starts once every seat has reached
/// at least this point.
async fn handle_joining_confirm(conn: &Arc<ConnectionShared>, line: &str) -> Result<()> {
    if !line.starts_with("AT") {
        return Err(Error::Protocol("expected AT in JoiningConfirm"));
    }
    let m = conn.live_match().await.ok_or(Error::Protocol("JoiningConfirm reached without a bound match"))?;

    let ready = format!("READY {}\r\n", format_guid(m.guid));
    conn.send_raw(ready.as_bytes()).await?;
    conn.send_raw(legacy_xml::state_message(&[legacy_xml::ready_xml()]).as_bytes()).await?;

    *conn.state.lock().await = ConnState::LegacyWaitingForOpponents;
    conn.accepts_game_messages.store(true, Ordering::SeqCst);
    Ok(())
}

/// `WaitingForOpponents`/`Playing`: `CALL GameReady`, `CALL EventSend`,
/// `CALL Chat`, `LEAVE` (spec §4.2.1). Returns `Ok(false)` on a clean
/// `LEAVE` so the caller can end the task without treating it as an
/// error.
async fn handle_playing(conn: &Arc<ConnectionShared>, line: &str, reader: &mut BufReader<ReadHalf<TcpStream>>) -> Result<bool> {
    *conn.state.lock().await = ConnState::LegacyPlaying;

    if line == "LEAVE" {
        return Ok(false);
    }

    let rest = line.strip_prefix("CALL ").ok_or(Error::Protocol("expected CALL or LEAVE while playing"))?;
    let m = conn.live_match().await.ok_or(Error::Protocol("CALL received without a bound match"))?;

    if rest == "GameReady" {
        return Ok(true);
    }

    if rest == "EventSend" {
        let message_id_line = read_line(reader).await?;
        if !message_id_line.starts_with("messageID=") {
            return Err(Error::Protocol("EventSend missing messageID field"));
        }
        let data_line = read_line(reader).await?;
        let encoded = data_line.strip_prefix("XMLDataString=").ok_or(Error::Protocol("EventSend missing XMLDataString field"))?;
        let xml = percent_decode(encoded);
        let (event_name, inner_xml) = legacy_xml::parse_message_event(&xml)?;
        m.handle_legacy_event(conn.id, &event_name, &inner_xml).await?;
        return Ok(true);
    }

    if let Some(fields_text) = rest.strip_prefix("Chat ") {
        let fields = split_legacy_fields(fields_text);
        if fields.len() != 7 {
            return Err(Error::Protocol("Chat event did not carry 7 fields"));
        }
        let [_user_id, nickname, text, font_face, font_flags, font_color, font_charset]: [&str; 7] = fields.try_into().map_err(|_| Error::Protocol("Chat field count mismatch"))?;
        m.handle_legacy_chat(conn.id, nickname, text, font_face, font_flags, font_color, font_charset).await?;
        return Ok(true);
    }

    Err(Error::Protocol("unrecognized Legacy CALL command"))
}

/// Consumed by [`crate::match_state::MatchShared::deliver`] to write a
/// `STATE` frame carrying one or more STags.
pub async fn send_state(conn: &Arc<ConnectionShared>, stags: &[String]) -> Result<()> {
    conn.send_raw(legacy_xml::state_message(stags).as_bytes()).await
}

async fn read_line(reader: &mut BufReader<ReadHalf<TcpStream>>) -> Result<String> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await.map_err(|_| Error::ClientDisconnected)?;
    if n == 0 {
        return Err(Error::ClientDisconnected);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Parses a hex GUID, tolerating the conventional `-`-grouped
/// presentation (`8-4-4-4-12` hex digits) as well as a bare hex blob.
fn parse_guid(text: &str) -> Result<u128> {
    let hex: String = text.chars().filter(|c| *c != '-').collect();
    u128::from_str_radix(&hex, 16).map_err(|_| Error::Protocol("malformed GUID"))
}

fn format_guid(value: u128) -> String {
    let hex = format!("{:032x}", value);
    format!("{}-{}-{}-{}-{}", &hex[0..8], &hex[8..12], &hex[12..16], &hex[16..20], &hex[20..32])
}

/// Minimal `application/x-www-form-urlencoded` decoder for
/// `XMLDataString` (spec §4.2.1); no URL-encoding crate is part of this
/// server's dependency stack.
fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&text[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_round_trips_through_dashed_presentation() {
        let value: u128 = 0x1234_5678_9abc_def0_1122_3344_5566_7788;
        let formatted = format_guid(value);
        assert_eq!(formatted, "12345678-9abc-def0-1122-334455667788");
        assert_eq!(parse_guid(&formatted).unwrap(), value);
    }

    #[test]
    fn percent_decode_handles_entities_and_plus() {
        assert_eq!(percent_decode("a%20b+c%3D1"), "a b c=1");
    }
}
