//! Interactive administrative console (C9, spec §6 "CLI (external
//! collaborator)"): single-word commands read from standard input,
//! running on its own task so a blocking read of stdin never stalls the
//! listener or any connection (spec §5 "Scheduling model").

use crate::config::Config;
use crate::lobby::Lobby;
use crate::registry::Registry;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
commands:
  h, ?              show this help
  c                 list all config options
  c <key>           show one config option
  c <key> <value>   set a config option
  lc                list connected clients
  lm                list live matches
  k <ip>[:port]     kick matching connections
  b <ip>            ban an ip
  u <ip>            unban an ip
  lb                list banned ips
  d <index>         destroy a match by its admin-visible index";

/// Runs until stdin closes (spec §6 "CLI"). Reads line-by-line; a blank
/// line is ignored, an unrecognized command prints its own error and the
/// loop continues.
pub async fn run(config: Arc<Config>, registry: Arc<Registry>, lobby: Arc<Lobby>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(%err, "admin console stdin read failed");
                return;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        dispatch(line, &config, &registry, &lobby).await;
    }
}

async fn dispatch(line: &str, config: &Arc<Config>, registry: &Arc<Registry>, lobby: &Arc<Lobby>) {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match command {
        "h" | "?" => println!("{}", HELP),
        "c" => handle_config(&args, config),
        "lc" => handle_list_clients(registry).await,
        "lm" => handle_list_matches(lobby).await,
        "k" => handle_kick(&args, registry).await,
        "b" => handle_ban(&args, config),
        "u" => handle_unban(&args, config),
        "lb" => handle_list_bans(config),
        "d" => handle_destroy(&args, lobby).await,
        _ => println!("unrecognized command {:?}; try 'h' for help", command),
    }
}

fn handle_config(args: &[&str], config: &Arc<Config>) {
    match args {
        [] => {
            for key in Config::OPTION_KEYS {
                println!("{} = {}", key, config.get_option(key).unwrap_or_default());
            }
        }
        [key] => match config.get_option(key) {
            Some(value) => println!("{} = {}", key, value),
            None => println!("unknown option key {:?}", key),
        },
        [key, value] => match config.set_option(key, value) {
            Ok(()) => println!("{} = {}", key, value),
            Err(err) => println!("error: {}", err),
        },
        _ => println!("usage: c [key] [value]"),
    }
}

async fn handle_list_clients(registry: &Arc<Registry>) {
    let clients = registry.list().await;
    if clients.is_empty() {
        println!("no connected clients");
        return;
    }
    for conn in clients {
        let state = *conn.state.lock().await;
        println!("user {} {} era={:?} state={:?}", conn.id, conn.remote_addr, conn.era, state);
    }
}

async fn handle_list_matches(lobby: &Arc<Lobby>) {
    let matches = lobby.list_matches().await;
    if matches.is_empty() {
        println!("no live matches");
        return;
    }
    for m in matches {
        println!("match {} guid={:032x} era={:?} game={:?} skill={:?} phase={:?}", m.index, m.guid, m.era, m.game, m.skill, m.phase().await);
    }
}

async fn handle_kick(args: &[&str], registry: &Arc<Registry>) {
    let spec = match args {
        [spec] => *spec,
        _ => {
            println!("usage: k <ip>[:port]");
            return;
        }
    };
    let (ip, port) = match parse_ip_and_optional_port(spec) {
        Some(pair) => pair,
        None => {
            println!("invalid address {:?}", spec);
            return;
        }
    };
    let kicked = registry.kick(ip, port).await;
    println!("kicked {} connection(s)", kicked);
}

fn handle_ban(args: &[&str], config: &Arc<Config>) {
    let ip = match args {
        [ip] => ip.parse::<IpAddr>(),
        _ => {
            println!("usage: b <ip>");
            return;
        }
    };
    match ip {
        Ok(ip) => {
            config.ban(ip);
            println!("banned {}", ip);
        }
        Err(_) => println!("invalid ip address"),
    }
}

fn handle_unban(args: &[&str], config: &Arc<Config>) {
    let ip = match args {
        [ip] => ip.parse::<IpAddr>(),
        _ => {
            println!("usage: u <ip>");
            return;
        }
    };
    match ip {
        Ok(ip) => {
            if config.unban(&ip) {
                println!("unbanned {}", ip);
            } else {
                println!("{} was not banned", ip);
            }
        }
        Err(_) => println!("invalid ip address"),
    }
}

fn handle_list_bans(config: &Arc<Config>) {
    let banned = config.snapshot().banned_ips;
    if banned.is_empty() {
        println!("no banned ips");
        return;
    }
    for ip in banned {
        println!("{}", ip);
    }
}

async fn handle_destroy(args: &[&str], lobby: &Arc<Lobby>) {
    let index: u32 = match args {
        [index] => match index.parse() {
            Ok(index) => index,
            Err(_) => {
                println!("invalid match index {:?}", index);
                return;
            }
        },
        _ => {
            println!("usage: d <match-index>");
            return;
        }
    };
    if lobby.destroy_match(index).await {
        println!("destroyed match {}", index);
    } else {
        println!("no live match with index {}", index);
    }
}

/// Parses `<ip>` or `<ip>:<port>` for `k` (spec §6). `SocketAddr::parse`
/// alone would reject a bare ip without a port, so the port is split off
/// by hand first.
fn parse_ip_and_optional_port(spec: &str) -> Option<(IpAddr, Option<u16>)> {
    if let Ok(addr) = spec.parse::<SocketAddr>() {
        return Some((addr.ip(), Some(addr.port())));
    }
    spec.parse::<IpAddr>().ok().map(|ip| (ip, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_ip_and_ip_with_port() {
        assert_eq!(parse_ip_and_optional_port("1.2.3.4"), Some(("1.2.3.4".parse().unwrap(), None)));
        assert_eq!(parse_ip_and_optional_port("1.2.3.4:9000"), Some(("1.2.3.4".parse().unwrap(), Some(9000))));
        assert_eq!(parse_ip_and_optional_port("not-an-ip"), None);
    }
}
