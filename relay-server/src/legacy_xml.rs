//! Legacy-era XML: ticket parsing (handshake) and STag construction
//! (state messages sent inside a `STATE` frame, spec §4.2.1/§4.3).
//!
//! Grounded on `original_source/Win7/Match.cpp`'s `ConstructStateXML` for
//! the STag shapes, and on spec §9's preserved-bit-for-bit open question
//! about the `<nSeq>`/`<nRole>` sibling elements.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use relay_protocol::error::{Error, Result};
use relay_protocol::era::Skill;
use relay_protocol::game::Game;
use std::io::Cursor;

/// `<nSeq>4</nSeq><nRole>0</nRole>` — constants of unknown meaning in the
/// original source, preserved bit-for-bit (spec §9 open question). Never
/// computed.
const N_SEQ: &str = "4";
const N_ROLE: &str = "0";

/// Parsed identity carried by the three Legacy handshake tickets
/// (`SasTicket`, `GasTicket`, `PasTicket`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketInfo {
    pub puid: String,
    pub game: Game,
    pub skill: Skill,
}

/// Extracts `PUID`, `Game`, and `ZS_PublicELO` from the concatenated
/// ticket XML blobs making up the `JOIN` frame (spec §4.2.1).
pub fn parse_tickets(xml_blobs: &[String]) -> Result<TicketInfo> {
    let mut puid = None;
    let mut game = None;
    let mut skill = None;

    for blob in xml_blobs {
        for (tag, value) in extract_leaf_fields(blob) {
            match tag.as_str() {
                "PUID" => puid = Some(value),
                "Game" => game = Game::from_legacy_token(&value),
                "ZS_PublicELO" => skill = value.parse::<u32>().ok().and_then(Skill::from_legacy_elo),
                _ => {}
            }
        }
    }

    Ok(TicketInfo {
        puid: puid.ok_or(Error::Protocol("ticket XML missing PUID"))?,
        game: game.ok_or(Error::Protocol("ticket XML missing or unrecognized Game"))?,
        skill: skill.ok_or(Error::Protocol("ticket XML missing or unrecognized ZS_PublicELO"))?,
    })
}

/// Walks every leaf element (one with only text content, no children) in
/// an XML document and returns `(tag, text)` pairs. Tolerant of multiple
/// sibling roots concatenated together, which the ticket blobs sometimes
/// are.
fn extract_leaf_fields(xml: &str) -> Vec<(String, String)> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut fields = Vec::new();
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event(&mut buf) {
            Ok(Event::Start(ref e)) => stack.push(String::from_utf8_lossy(e.name()).to_string()),
            Ok(Event::Text(ref e)) => {
                if let Some(tag) = stack.last() {
                    if let Ok(text) = e.unescape_and_decode(&reader) {
                        if !text.trim().is_empty() {
                            fields.push((tag.clone(), text));
                        }
                    }
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    fields
}

/// Flattened `(tag, text)` pairs from an `EventSend`/`EventReceive`
/// event's inner XML (spec §4.3 "Event relay"), reusing the same leaf
/// walk the ticket parser uses.
pub fn parse_event_fields(inner_xml: &str) -> Vec<(String, String)> {
    extract_leaf_fields(inner_xml)
}

/// The single child element name and inner XML of an `EventSend`/
/// `EventReceive` `<Message>` root (spec §4.3 "Event relay").
pub fn parse_message_event(xml: &str) -> Result<(String, String)> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut depth = 0i32;
    let mut event_name: Option<String> = None;
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut capturing = false;

    loop {
        match reader.read_event(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name()).to_string();
                if depth == 0 && name != "Message" {
                    return Err(Error::Protocol("EventSend root must be <Message>"));
                }
                if depth == 1 {
                    if event_name.is_some() {
                        return Err(Error::Protocol("EventSend <Message> must have exactly one child"));
                    }
                    event_name = Some(name);
                    capturing = true;
                }
                if capturing {
                    writer.write_event(Event::Start(e.to_owned())).ok();
                }
                depth += 1;
            }
            Ok(Event::End(ref e)) => {
                depth -= 1;
                if capturing {
                    writer.write_event(Event::End(e.to_owned())).ok();
                }
                if depth == 1 {
                    capturing = false;
                }
            }
            Ok(ref other @ Event::Text(_)) | Ok(ref other @ Event::Empty(_)) => {
                if capturing {
                    writer.write_event(clone_event(other)).ok();
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(Error::Protocol("malformed EventSend XML")),
            _ => {}
        }
        buf.clear();
    }

    let name = event_name.ok_or(Error::Protocol("EventSend <Message> had no child event element"))?;
    let inner = String::from_utf8(writer.into_inner().into_inner()).map_err(|_| Error::Protocol("EventSend XML was not UTF-8"))?;
    Ok((name, inner))
}

fn clone_event<'a>(e: &Event<'a>) -> Event<'a> {
    match e {
        Event::Text(t) => Event::Text(t.to_owned()),
        Event::Empty(t) => Event::Empty(t.to_owned()),
        other => other.to_owned(),
    }
}

/// Small convenience wrapper over `quick_xml::Writer` for building the
/// flat STags this server emits.
struct Tag(Writer<Cursor<Vec<u8>>>);

impl Tag {
    fn new() -> Tag {
        Tag(Writer::new(Cursor::new(Vec::new())))
    }

    fn leaf(&mut self, name: &str, text: &str) {
        self.0.write_event(Event::Start(BytesStart::borrowed_name(name.as_bytes()))).unwrap();
        self.0.write_event(Event::Text(BytesText::from_plain_str(text))).unwrap();
        self.0.write_event(Event::End(BytesEnd::borrowed(name.as_bytes()))).unwrap();
    }

    fn start(&mut self, name: &str) {
        self.0.write_event(Event::Start(BytesStart::borrowed_name(name.as_bytes()))).unwrap();
    }

    fn end(&mut self, name: &str) {
        self.0.write_event(Event::End(BytesEnd::borrowed(name.as_bytes()))).unwrap();
    }

    fn raw(&mut self, xml: &str) {
        self.0.write_event(Event::Text(BytesText::from_escaped_str(xml))).unwrap();
    }

    fn finish(self) -> String {
        String::from_utf8(self.0.into_inner().into_inner()).expect("generated XML is always UTF-8")
    }
}

/// `GameInit` STag: carries the full seated player roster so every peer's
/// client can populate its UI (spec §4.3 "Starting", §8 scenario 1).
pub fn game_init(puids: &[String]) -> String {
    let mut tag = Tag::new();
    tag.start("GameInit");
    tag.leaf("nSeq", N_SEQ);
    tag.leaf("nRole", N_ROLE);
    tag.start("Players");
    for puid in puids {
        tag.leaf("PUID", puid);
    }
    tag.end("Players");
    tag.end("GameInit");
    tag.finish()
}

/// `MethodMessage` STag naming `StartBid` and the dealer seat (spec §8
/// scenario 1).
pub fn start_bid(dealer_seat: usize) -> String {
    let mut tag = Tag::new();
    tag.start("MethodMessage");
    tag.leaf("nSeq", N_SEQ);
    tag.leaf("nRole", N_ROLE);
    tag.leaf("MethodName", "StartBid");
    tag.leaf("Dealer", &dealer_seat.to_string());
    tag.end("MethodMessage");
    tag.finish()
}

/// `EventReceive` STag wrapping a previously-parsed event's name and
/// inner XML, as relayed to peers (spec §4.3 "Event relay").
pub fn event_receive(event_name: &str, inner_xml: &str) -> String {
    let mut tag = Tag::new();
    tag.start("EventReceive");
    tag.leaf("nSeq", N_SEQ);
    tag.leaf("nRole", N_ROLE);
    tag.start(event_name);
    tag.raw(inner_xml);
    tag.end(event_name);
    tag.end("EventReceive");
    tag.finish()
}

/// Wraps one or more STags in the `STATE` frame body sent after `STATE\r\n`
/// (spec §4.2.1 `JoiningConfirm`/`Playing`).
pub fn state_message(stags: &[String]) -> String {
    let mut body = String::from("STATE\r\n");
    for stag in stags {
        body.push_str(stag);
        body.push_str("\r\n");
    }
    body
}

/// `Ready` STag (spec §4.2.1 `JoiningConfirm` -> `WaitingForOpponents`).
pub fn ready_xml() -> String {
    let mut tag = Tag::new();
    tag.start("Ready");
    tag.leaf("nSeq", N_SEQ);
    tag.leaf("nRole", N_ROLE);
    tag.end("Ready");
    tag.finish()
}

/// Translates a game engine's [`crate::games::Outgoing`] payload into the
/// STag a Legacy peer expects inside a `STATE` frame (spec §4.3 "Event
/// relay"). Modern peers receive the same `Outgoing` as a typed
/// `GameMessage`; Legacy has no per-type sub-header, so this is the
/// equivalent translation layer for that era.
pub fn outgoing_stag(game: Game, msg_type: i16, payload: &[u8]) -> String {
    match game {
        Game::Spades => spades_stag(msg_type, payload),
        Game::Hearts => hearts_stag(msg_type, payload),
        Game::Backgammon | Game::Checkers | Game::Reversi => board_stag(payload),
    }
}

fn generic_event_stag(msg_type: i16) -> String {
    let mut tag = Tag::new();
    tag.start("GameEvent");
    tag.leaf("nSeq", N_SEQ);
    tag.leaf("nRole", N_ROLE);
    tag.leaf("MsgType", &msg_type.to_string());
    tag.end("GameEvent");
    tag.finish()
}

fn spades_stag(msg_type: i16, payload: &[u8]) -> String {
    use relay_protocol::spades::wire::message_type;

    let mut tag = Tag::new();
    match msg_type {
        message_type::DEAL_HAND if payload.len() >= 2 => {
            let dealer = i16::from_le_bytes([payload[0], payload[1]]);
            tag.start("Deal");
            tag.leaf("nSeq", N_SEQ);
            tag.leaf("nRole", N_ROLE);
            tag.leaf("Dealer", &dealer.to_string());
            tag.start("Cards");
            for &c in &payload[2..] {
                tag.leaf("Card", &c.to_string());
            }
            tag.end("Cards");
            tag.end("Deal");
        }
        message_type::BID_REVEAL => {
            tag.start("BidReveal");
            tag.leaf("nSeq", N_SEQ);
            tag.leaf("nRole", N_ROLE);
            for (seat, &b) in payload.iter().enumerate() {
                tag.start("Bid");
                tag.leaf("Seat", &seat.to_string());
                tag.leaf("Value", &(b as i8).to_string());
                tag.end("Bid");
            }
            tag.end("BidReveal");
        }
        message_type::PLAY if payload.len() >= 3 => {
            let seat = i16::from_le_bytes([payload[0], payload[1]]);
            tag.start("Play");
            tag.leaf("nSeq", N_SEQ);
            tag.leaf("nRole", N_ROLE);
            tag.leaf("Seat", &seat.to_string());
            tag.leaf("Card", &payload[2].to_string());
            tag.end("Play");
        }
        message_type::TRICK_COMPLETE if !payload.is_empty() => {
            tag.start("TrickComplete");
            tag.leaf("nSeq", N_SEQ);
            tag.leaf("nRole", N_ROLE);
            tag.leaf("Winner", &payload[0].to_string());
            tag.end("TrickComplete");
        }
        message_type::HAND_COMPLETE if payload.len() >= 8 => {
            let score0 = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let score1 = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
            tag.start("HandComplete");
            tag.leaf("nSeq", N_SEQ);
            tag.leaf("nRole", N_ROLE);
            tag.leaf("Score0", &score0.to_string());
            tag.leaf("Score1", &score1.to_string());
            tag.end("HandComplete");
        }
        message_type::GAME_OVER if !payload.is_empty() => {
            tag.start("GameOver");
            tag.leaf("nSeq", N_SEQ);
            tag.leaf("nRole", N_ROLE);
            tag.leaf("Winner", &payload[0].to_string());
            tag.end("GameOver");
        }
        _ => return generic_event_stag(msg_type),
    }
    tag.finish()
}

fn hearts_stag(msg_type: i16, payload: &[u8]) -> String {
    use relay_protocol::hearts::wire::message_type;

    let mut tag = Tag::new();
    match msg_type {
        message_type::DEAL_HAND if payload.len() >= 2 => {
            let pass_direction = i16::from_le_bytes([payload[0], payload[1]]);
            tag.start("Deal");
            tag.leaf("nSeq", N_SEQ);
            tag.leaf("nRole", N_ROLE);
            tag.leaf("PassDirection", &pass_direction.to_string());
            tag.start("Cards");
            for &c in &payload[2..] {
                tag.leaf("Card", &c.to_string());
            }
            tag.end("Cards");
            tag.end("Deal");
        }
        message_type::CARDS_RECEIVED => {
            tag.start("CardsReceived");
            tag.leaf("nSeq", N_SEQ);
            tag.leaf("nRole", N_ROLE);
            tag.start("Cards");
            for &c in payload {
                tag.leaf("Card", &c.to_string());
            }
            tag.end("Cards");
            tag.end("CardsReceived");
        }
        message_type::PLAY if payload.len() >= 3 => {
            let seat = i16::from_le_bytes([payload[0], payload[1]]);
            tag.start("Play");
            tag.leaf("nSeq", N_SEQ);
            tag.leaf("nRole", N_ROLE);
            tag.leaf("Seat", &seat.to_string());
            tag.leaf("Card", &payload[2].to_string());
            tag.end("Play");
        }
        message_type::TRICK_COMPLETE if !payload.is_empty() => {
            tag.start("TrickComplete");
            tag.leaf("nSeq", N_SEQ);
            tag.leaf("nRole", N_ROLE);
            tag.leaf("Winner", &payload[0].to_string());
            tag.end("TrickComplete");
        }
        message_type::HAND_COMPLETE => {
            tag.start("HandComplete");
            tag.leaf("nSeq", N_SEQ);
            tag.leaf("nRole", N_ROLE);
            for (seat, chunk) in payload.chunks(2).enumerate() {
                if chunk.len() == 2 {
                    let total = i16::from_le_bytes([chunk[0], chunk[1]]);
                    tag.start("Total");
                    tag.leaf("Seat", &seat.to_string());
                    tag.leaf("Value", &total.to_string());
                    tag.end("Total");
                }
            }
            tag.end("HandComplete");
        }
        message_type::GAME_OVER if !payload.is_empty() => {
            tag.start("GameOver");
            tag.leaf("nSeq", N_SEQ);
            tag.leaf("nRole", N_ROLE);
            tag.leaf("Winner", &payload[0].to_string());
            tag.end("GameOver");
        }
        _ => return generic_event_stag(msg_type),
    }
    tag.finish()
}

/// `Chat` STag (spec §4.3 "Chat"): relayed verbatim once the server has
/// validated `text` against the allowed nudge/numeric-id set.
pub fn chat_stag(user_id: u32, nickname: &str, text: &str, font_face: &str, font_flags: &str, font_color: &str, font_charset: &str) -> String {
    let mut tag = Tag::new();
    tag.start("Chat");
    tag.leaf("nSeq", N_SEQ);
    tag.leaf("nRole", N_ROLE);
    tag.leaf("UserID", &user_id.to_string());
    tag.leaf("Nickname", nickname);
    tag.leaf("Text", text);
    tag.leaf("FontFace", font_face);
    tag.leaf("FontFlags", font_flags);
    tag.leaf("FontColor", font_color);
    tag.leaf("FontCharSet", font_charset);
    tag.end("Chat");
    tag.finish()
}

/// Backgammon/Checkers/Reversi carry no interpreted message types: every
/// `Outgoing` payload is an opaque relayed `StateTransaction` (spec
/// §4.3.3).
fn board_stag(payload: &[u8]) -> String {
    use relay_protocol::protocol::StateTransaction;

    let mut tag = Tag::new();
    tag.start("StateTransaction");
    tag.leaf("nSeq", N_SEQ);
    tag.leaf("nRole", N_ROLE);
    match StateTransaction::from_bytes(payload) {
        Ok(txn) => {
            tag.leaf("Seat", &txn.seat.to_string());
            tag.leaf("Tag", &txn.tag.to_string());
            tag.start("Transactions");
            for entry in &txn.transactions {
                tag.start("Transaction");
                tag.leaf("Tag", &entry.tag.to_string());
                tag.leaf("Index", &entry.index.to_string());
                tag.leaf("Value", &entry.value.to_string());
                tag.end("Transaction");
            }
            tag.end("Transactions");
        }
        Err(_) => tag.leaf("Error", "malformed StateTransaction"),
    }
    tag.end("StateTransaction");
    tag.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ticket_fields_across_blobs() {
        let blobs = vec![
            "<SasTicket><PUID>player-1</PUID></SasTicket>".to_string(),
            "<GasTicket><Game>wnsp</Game></GasTicket>".to_string(),
            "<PasTicket><ZS_PublicELO>2000</ZS_PublicELO></PasTicket>".to_string(),
        ];
        let info = parse_tickets(&blobs).unwrap();
        assert_eq!(info.puid, "player-1");
        assert_eq!(info.game, Game::Spades);
        assert_eq!(info.skill, Skill::Intermediate);
    }

    #[test]
    fn rejects_unrecognized_elo() {
        let blobs = vec!["<T><PUID>p</PUID><Game>wnsp</Game><ZS_PublicELO>42</ZS_PublicELO></T>".to_string()];
        assert!(parse_tickets(&blobs).is_err());
    }

    #[test]
    fn parses_single_child_message_event() {
        let xml = "<Message><Bid><Value>3</Value></Bid></Message>";
        let (name, inner) = parse_message_event(xml).unwrap();
        assert_eq!(name, "Bid");
        assert!(inner.contains("<Value>3</Value>"));
    }

    #[test]
    fn rejects_multi_child_message_event() {
        let xml = "<Message><Bid/><Play/></Message>";
        assert!(parse_message_event(xml).is_err());
    }

    #[test]
    fn game_init_contains_preserved_constants_and_players() {
        let xml = game_init(&["p1".to_string(), "p2".to_string()]);
        assert!(xml.contains("<nSeq>4</nSeq>"));
        assert!(xml.contains("<nRole>0</nRole>"));
        assert!(xml.contains("<PUID>p1</PUID>"));
        assert!(xml.contains("<PUID>p2</PUID>"));
    }
}
