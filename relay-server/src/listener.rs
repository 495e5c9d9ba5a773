//! TCP accept loop (C8, spec §5 "Listener", §6 "Connection acceptance").
//!
//! Grounded on the connection lifecycle already established by
//! `connection::legacy`/`connection::modern`: this module's whole job is
//! to turn a freshly accepted socket into exactly one of those two tasks,
//! applying the ban list, the per-IP cap, and the ad-banner shortcut
//! first (spec §6).

use crate::banner::{self, BannerRequest};
use crate::config::Config;
use crate::connection::{self, ConnectionShared};
use crate::lobby::Lobby;
use crate::registry::Registry;
use relay_protocol::era::Era;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

/// How the first bytes off a freshly accepted socket were read.
enum FirstLook {
    Banner(BannerRequest),
    Legacy,
    Modern,
}

/// Accepts connections until the bind itself fails; a single accept or
/// per-connection failure is logged and does not stop the loop.
pub async fn run(config: Arc<Config>, registry: Arc<Registry>, lobby: Arc<Lobby>) -> anyhow::Result<()> {
    let port = config.port();
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "listening for connections");

    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(%err, "accept failed");
                continue;
            }
        };

        if config.is_banned(&addr.ip()) {
            tracing::debug!(ip = %addr.ip(), "rejected: banned ip");
            continue;
        }

        let cap = config.snapshot().num_connections_per_ip;
        if cap > 0 && registry.count_from_ip(addr.ip()).await as u32 >= cap {
            tracing::debug!(ip = %addr.ip(), "rejected: over the per-ip connection cap");
            continue;
        }

        let config = config.clone();
        let registry = registry.clone();
        let lobby = lobby.clone();
        tokio::spawn(async move {
            if let Err(err) = accept_one(socket, addr, &config, &registry, &lobby).await {
                tracing::debug!(ip = %addr.ip(), %err, "connection ended");
            }
        });
    }
}

async fn accept_one(mut socket: TcpStream, addr: SocketAddr, config: &Arc<Config>, registry: &Arc<Registry>, lobby: &Arc<Lobby>) -> anyhow::Result<()> {
    let look = match peek_first_look(&mut socket, config.snapshot().disable_xp_ad_banner).await? {
        Some(look) => look,
        None => return Ok(()),
    };

    let era = match look {
        FirstLook::Banner(request) => {
            socket.write_all(&banner::build_response(request)).await?;
            socket.shutdown(std::net::Shutdown::Both).ok();
            return Ok(());
        }
        FirstLook::Legacy => Era::Legacy,
        FirstLook::Modern => Era::Modern,
    };

    let id = next_user_id(registry).await;
    let (read_half, write_half) = tokio::io::split(socket);
    let conn = ConnectionShared::new(id, addr, era, write_half);
    registry.insert(conn.clone()).await;
    tracing::info!(user_id = id, ip = %addr.ip(), ?era, "connection accepted");

    let result = match era {
        Era::Legacy => connection::legacy::run(conn.clone(), read_half, lobby.clone()).await,
        Era::Modern => connection::modern::run(conn.clone(), read_half, lobby.clone()).await,
    };
    if let Err(err) = &result {
        tracing::debug!(user_id = id, %err, "connection task exited with an error");
    }

    registry.remove(id).await;
    if let Some(m) = conn.live_match().await {
        let _ = m.disconnect_player(id).await;
    }
    conn.unbind_match().await;

    result.map_err(anyhow::Error::from)
}

/// Peeks at the first bytes on a freshly accepted socket, without
/// consuming them from the stream, to decide whether this is an ad-banner
/// HTTP request, a Legacy `JOIN ...` line, or a Modern binary frame (spec
/// §6 "Connection acceptance"). Returns `None` if the peer closed the
/// socket before sending anything.
async fn peek_first_look(socket: &mut TcpStream, disable_ad: bool) -> anyhow::Result<Option<FirstLook>> {
    let mut buf = [0u8; 512];
    let n = socket.peek(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }

    if !disable_ad && buf[..n].starts_with(b"GET ") {
        let first_line_len = buf[..n].iter().position(|&b| b == b'\r' || b == b'\n').unwrap_or(n);
        let first_line = String::from_utf8_lossy(&buf[..first_line_len]);
        if let Some(request) = banner::classify_request(&first_line) {
            return Ok(Some(FirstLook::Banner(request)));
        }
        // An HTTP request that isn't the ad banner speaks a protocol this
        // server does not serve; nothing useful to do but drop it.
        return Ok(None);
    }

    if buf[..n].starts_with(b"JOIN ") {
        return Ok(Some(FirstLook::Legacy));
    }

    Ok(Some(FirstLook::Modern))
}

async fn next_user_id(registry: &Arc<Registry>) -> crate::connection::UserId {
    loop {
        let candidate: u32 = rand::random();
        if candidate != 0 && registry.list().await.iter().all(|c| c.id != candidate) {
            return candidate;
        }
    }
}
