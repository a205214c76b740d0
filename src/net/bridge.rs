//! Proxy event bridge
//!
//! A proxy connects over TCP and streams newline-delimited JSON events about
//! its players. Engine output flows back over the same connection:
//!
//! ```text
//! proxy -> {"type":"join","player":{...}}
//! proxy -> {"type":"player_info","receiver":"...","packet":{...}}
//! proxy <- {"type":"send","viewer":"...","packet":{...}}
//! proxy <- {"type":"forward","receiver":"...","packet":{...}}
//! ```
//!
//! Players registered through a connection are quit when it closes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{BridgeError, Result};
use crate::game::player::{Player, PlayerProfile};
use crate::net::gateway::{Dispatch, DispatchSender, FilterVerdict};
use crate::protocol::player_info::PresencePacket;
use crate::state::AppState;

/// Event sent by a proxy
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeRequest {
    /// A player connected
    Join { player: PlayerProfile },
    /// A player disconnected
    Quit { id: Uuid },
    /// A player moved to another backend server
    ServerSwitch {
        id: Uuid,
        #[serde(default)]
        from: Option<String>,
        to: String,
    },
    /// A player's vanish status changed
    Vanish { id: Uuid, vanished: bool },
    /// A player's measured latency changed
    Latency { id: Uuid, ping: u32 },
    /// A backend sent a presence packet to a player
    PlayerInfo {
        receiver: Uuid,
        packet: PresencePacket,
    },
}

/// Parse one bridge line
pub fn parse_request(line: &str) -> std::result::Result<BridgeRequest, BridgeError> {
    Ok(serde_json::from_str(line)?)
}

/// Handles one proxy connection
pub struct BridgeHandler {
    state: Arc<AppState>,
}

impl BridgeHandler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Handle a TCP connection from a proxy
    pub async fn handle(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        self.handle_stream(reader, writer, &addr.to_string()).await
    }

    /// Handle a proxy connection over any byte stream
    pub async fn handle_stream<R, W>(&self, reader: R, writer: W, peer: &str) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer_name = peer.to_string();
        tokio::spawn(async move {
            if let Err(e) = write_dispatches(writer, rx).await {
                debug!(peer = %peer_name, error = %e, "Bridge writer stopped");
            }
        });

        let mut session = BridgeSession::new(self.state.clone(), tx);
        let result = self.read_requests(reader, &mut session, peer).await;

        let quit = session.close();
        info!(peer = %peer, players = quit, "Bridge connection closed");

        result
    }

    async fn read_requests<R>(
        &self,
        reader: R,
        session: &mut BridgeSession,
        peer: &str,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let max = self.state.config.bridge.max_line_bytes;
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = (&mut reader)
                .take(max as u64 + 1)
                .read_until(b'\n', &mut buf)
                .await?;
            if read == 0 {
                return Ok(());
            }
            if read > max && buf.last() != Some(&b'\n') {
                warn!(
                    peer = %peer,
                    size = read,
                    max = max,
                    "Bridge line too long, closing connection"
                );
                return Err(BridgeError::LineTooLong { size: read, max }.into());
            }

            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line,
                Err(e) => {
                    warn!(
                        peer = %peer,
                        error = %e,
                        "Skipping bridge line that is not valid UTF-8"
                    );
                    continue;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match parse_request(trimmed) {
                Ok(request) => {
                    trace!(peer = %peer, request = ?request, "Bridge request");
                    session.handle(request);
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Skipping malformed bridge message");
                }
            }
        }
    }
}

/// Write dispatches as JSON lines until every sender is gone
async fn write_dispatches<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Dispatch>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(dispatch) = rx.recv().await {
        let mut line = serde_json::to_vec(&dispatch)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
    }
    writer.shutdown().await?;
    Ok(())
}

/// Per-connection bridge state
struct BridgeSession {
    state: Arc<AppState>,
    tx: DispatchSender,
    /// Players registered through this connection
    owned: HashMap<Uuid, Arc<Player>>,
}

impl BridgeSession {
    fn new(state: Arc<AppState>, tx: DispatchSender) -> Self {
        Self {
            state,
            tx,
            owned: HashMap::new(),
        }
    }

    fn handle(&mut self, request: BridgeRequest) {
        match request {
            BridgeRequest::Join { player } => self.join(player),
            BridgeRequest::Quit { id } => self.quit(id),
            BridgeRequest::ServerSwitch { id, from, to } => self.switch(id, from, to),
            BridgeRequest::Vanish { id, vanished } => {
                if let Some(player) = self.player(id) {
                    if player.set_vanished(vanished) {
                        self.state.engine.on_vanish_status_change(&player);
                    }
                }
            }
            BridgeRequest::Latency { id, ping } => {
                if let Some(player) = self.player(id) {
                    player.set_ping(ping);
                }
            }
            BridgeRequest::PlayerInfo { receiver, packet } => self.player_info(receiver, packet),
        }
    }

    fn join(&mut self, profile: PlayerProfile) {
        let player = match self.state.registry.register(profile) {
            Ok(player) => player,
            Err(e) => {
                warn!(error = %e, "Rejected bridge join");
                return;
            }
        };
        self.state.gateway.attach(&player, self.tx.clone());
        self.owned.insert(player.id, player.clone());
        self.state.engine.on_join(&player);
    }

    fn quit(&mut self, id: Uuid) {
        let Some(player) = self.owned.remove(&id) else {
            debug!(id = %id, "Quit for unknown player ignored");
            return;
        };
        self.state.registry.unregister(id);
        self.state.gateway.detach(&player);
        self.state.engine.on_quit(&player);
    }

    fn switch(&mut self, id: Uuid, from: Option<String>, to: String) {
        let Some(player) = self.player(id) else {
            return;
        };
        let previous = player.server();
        if previous.eq_ignore_ascii_case(&to) {
            debug!(id = %id, server = %to, "Switch to current server ignored");
            return;
        }
        player.set_server(to.clone());
        let from = from.unwrap_or(previous);
        self.state.engine.on_server_change(&player, &from, &to);
    }

    fn player_info(&self, receiver: Uuid, mut packet: PresencePacket) {
        let verdict = match self.state.registry.get(receiver) {
            Some(player) => self.state.gateway.filter_inbound(&player, &mut packet),
            None => FilterVerdict::Forward,
        };

        let dispatch = match verdict {
            FilterVerdict::Forward => Dispatch::Forward { receiver, packet },
            FilterVerdict::Drop => Dispatch::Drop { receiver },
        };
        // Receiver side closed means the connection is going away
        let _ = self.tx.send(dispatch);
    }

    fn player(&self, id: Uuid) -> Option<Arc<Player>> {
        let player = self.owned.get(&id).cloned();
        if player.is_none() {
            debug!(id = %id, "Event for player not owned by this connection");
        }
        player
    }

    /// Quit every player this connection registered, returning how many
    fn close(&mut self) -> usize {
        let ids: Vec<Uuid> = self.owned.keys().copied().collect();
        for id in &ids {
            self.quit(*id);
        }
        ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PresenceConfig;
    use crate::game::player::PlayerDirectory;
    use crate::protocol::player_info::InfoActions;
    use serde_json::{json, Value};
    use tokio::io::{AsyncBufRead, Lines};
    use tokio::sync::broadcast;

    fn state(config: PresenceConfig) -> Arc<AppState> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(AppState::new(config, shutdown_tx).unwrap());
        state.engine.load();
        state
    }

    fn join_line(id: Uuid, name: &str, server: &str) -> String {
        format!(
            "{}\n",
            json!({
                "type": "join",
                "player": { "id": id, "name": name, "server": server }
            })
        )
    }

    async fn next_of_type<R: AsyncBufRead + Unpin>(lines: &mut Lines<R>, kind: &str) -> Value {
        loop {
            let line = lines.next_line().await.unwrap().unwrap();
            let value: Value = serde_json::from_str(&line).unwrap();
            if value["type"] == kind {
                return value;
            }
        }
    }

    #[test]
    fn test_parse_requests() {
        let id = Uuid::new_v4();
        let request = parse_request(&format!(
            r#"{{"type":"server_switch","id":"{}","to":"s2"}}"#,
            id
        ))
        .unwrap();
        match request {
            BridgeRequest::ServerSwitch { id: parsed, from, to } => {
                assert_eq!(parsed, id);
                assert_eq!(from, None);
                assert_eq!(to, "s2");
            }
            other => panic!("unexpected request: {:?}", other),
        }

        assert!(parse_request(r#"{"type":"teleport"}"#).is_err());
        assert!(matches!(
            parse_request("not json"),
            Err(BridgeError::MalformedMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_join_emits_adds_over_connection() {
        let state = state(PresenceConfig::default());
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let handler = BridgeHandler::new(state.clone());
        let task = tokio::spawn(async move {
            handler
                .handle_stream(server_read, server_write, "test")
                .await
        });

        let (client_read, mut client_write) = tokio::io::split(client);
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();
        client_write
            .write_all(join_line(x, "X", "s1").as_bytes())
            .await
            .unwrap();
        client_write
            .write_all(b"garbage line\n")
            .await
            .unwrap();
        client_write
            .write_all(join_line(y, "Y", "s2").as_bytes())
            .await
            .unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let first = next_of_type(&mut lines, "send").await;
        let second = next_of_type(&mut lines, "send").await;

        let mut viewers = vec![
            first["viewer"].as_str().unwrap().to_string(),
            second["viewer"].as_str().unwrap().to_string(),
        ];
        viewers.sort();
        let mut expected = vec![x.to_string(), y.to_string()];
        expected.sort();
        assert_eq!(viewers, expected);
        assert_eq!(first["packet"]["origin"], "core");
        assert_eq!(state.registry.count(), 2);

        client_write.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(state.registry.count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let state = state(PresenceConfig::default());
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let handler = BridgeHandler::new(state.clone());
        let task = tokio::spawn(async move {
            handler
                .handle_stream(server_read, server_write, "test")
                .await
        });

        let (client_read, mut client_write) = tokio::io::split(client);
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();
        let mut script = join_line(x, "X", "s1").into_bytes();
        script.extend_from_slice(b"{\"type\":\"quit\",\"id\":\"\xff\xfe\"}\n");
        script.extend_from_slice(join_line(y, "Y", "s2").as_bytes());
        client_write.write_all(&script).await.unwrap();

        // Y's join produces adds for both players
        let mut lines = BufReader::new(client_read).lines();
        next_of_type(&mut lines, "send").await;
        next_of_type(&mut lines, "send").await;
        assert_eq!(state.registry.count(), 2);
        assert!(state.registry.find(x).is_some());

        client_write.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(state.registry.count(), 0);
    }

    #[tokio::test]
    async fn test_player_info_rewrites_switch_race() {
        let state = state(PresenceConfig::default());
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let handler = BridgeHandler::new(state.clone());
        tokio::spawn(async move {
            let _ = handler
                .handle_stream(server_read, server_write, "test")
                .await;
        });

        let (client_read, mut client_write) = tokio::io::split(client);
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();
        let npc = Uuid::new_v4();
        let mut script = join_line(x, "X", "s1");
        script.push_str(&join_line(y, "Y", "s2"));
        script.push_str(&format!(
            "{}\n",
            json!({ "type": "server_switch", "id": y, "from": "s2", "to": "s3" })
        ));
        script.push_str(&format!(
            "{}\n",
            json!({
                "type": "player_info",
                "receiver": x,
                "packet": PresencePacket::removal([y, npc]),
            })
        ));
        client_write.write_all(script.as_bytes()).await.unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let forward = next_of_type(&mut lines, "forward").await;
        let packet: PresencePacket = serde_json::from_value(forward["packet"].clone()).unwrap();

        assert!(packet.has_action(InfoActions::REMOVE_PLAYER));
        assert_ne!(packet.entries[0].roster_id, y);
        assert_eq!(packet.entries[1].roster_id, npc);
        assert!(state.registry.find(y).is_some());
    }

    #[tokio::test]
    async fn test_oversize_line_closes_connection() {
        let mut config = PresenceConfig::default();
        config.bridge.max_line_bytes = 1024;
        let state = state(config);
        let handler = BridgeHandler::new(state);

        let (client, server) = tokio::io::duplex(8 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (_client_read, mut client_write) = tokio::io::split(client);

        let mut line = vec![b'a'; 2000];
        line.push(b'\n');
        client_write.write_all(&line).await.unwrap();

        let err = handler
            .handle_stream(server_read, server_write, "test")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Line too long"));
    }
}
