//! Auxiliary HTTP status page (C9, spec §6 "HTTP status page"): a single
//! `GET /` route rendering waiting-lobby counts by `(era, game, skill)`.
//!
//! Grounded on the teacher's `main.rs`, which builds its own websocket
//! surface with `warp::path(...).and(warp::ws())...` and a static route
//! served with `warp::serve(...).run(...)`; this module reuses the same
//! crate for a single plain route instead of a websocket upgrade.

use crate::lobby::Lobby;
use std::convert::Infallible;
use std::sync::Arc;
use warp::Filter;

/// Serves the status page on `addr` until cancelled. Only spawned when
/// `enable_http` is set (spec §6).
pub async fn run(lobby: Arc<Lobby>, addr: std::net::SocketAddr) {
    let route = warp::path::end().and(warp::get()).and_then(move || {
        let lobby = lobby.clone();
        async move { Ok::<_, Infallible>(warp::reply::html(render_page(&lobby).await)) }
    });

    tracing::info!(%addr, "http status page listening");
    warp::serve(route).run(addr).await;
}

async fn render_page(lobby: &Arc<Lobby>) -> String {
    let counts = lobby.waiting_counts().await;
    let mut rows = String::new();
    for (era, game, skill, waiting) in &counts {
        rows.push_str(&format!("<tr><td>{:?}</td><td>{:?}</td><td>{:?}</td><td>{}</td></tr>", era, game, skill, waiting));
    }
    if rows.is_empty() {
        rows.push_str("<tr><td colspan=\"4\">no matches waiting</td></tr>");
    }

    format!(
        "<html><head><title>relay status</title></head><body>\
         <h1>waiting lobbies</h1>\
         <table border=\"1\"><tr><th>era</th><th>game</th><th>skill</th><th>waiting</th></tr>{}</table>\
         </body></html>",
        rows
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigValues};
    use relay_protocol::era::{Era, Skill};
    use relay_protocol::game::Game;

    #[tokio::test]
    async fn renders_a_row_per_waiting_match() {
        let lobby = Lobby::new(Arc::new(Config::new(ConfigValues::default())));
        lobby.find_or_create(Era::Modern, Game::Checkers, Skill::Beginner).await.unwrap();
        let page = render_page(&lobby).await;
        assert!(page.contains("Checkers"));
        assert!(page.contains("Beginner"));
    }

    #[tokio::test]
    async fn renders_placeholder_row_when_nothing_is_waiting() {
        let lobby = Lobby::new(Arc::new(Config::new(ConfigValues::default())));
        let page = render_page(&lobby).await;
        assert!(page.contains("no matches waiting"));
    }
}
