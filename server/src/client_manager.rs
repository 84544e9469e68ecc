//! Connection bookkeeping for the relay
//!
//! This module tracks every live websocket connection:
//! - Id assignment (monotonic, never reused) and capacity enforcement
//! - The outbound queue feeding each connection's writer task
//! - A merged copy of each client's last reported state, used for late-join
//!   welcomes and the end-of-round leaderboard
//! - Silence detection for connections that stopped talking
//!
//! The relay never simulates; the cached state is only ever overwritten with
//! what a client reported about itself.

use log::{debug, info, warn};
use shared::protocol::{Message, PlayerPayload, ScoreEntry};
use shared::ClientId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    /// Perform the close handshake and stop writing.
    Close,
}

/// A connected client as seen by the relay
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the relay
    pub id: ClientId,
    pub addr: SocketAddr,
    /// Last time any record arrived from this client
    pub last_seen: Instant,
    /// Merged last state reported by the client
    pub state: PlayerPayload,
    /// Authenticated admin connections are exempt from silence timeouts
    pub admin: bool,
    sender: mpsc::UnboundedSender<Outbound>,
}

impl Client {
    pub fn new(id: ClientId, addr: SocketAddr, sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            state: PlayerPayload::new(id),
            admin: false,
            sender,
        }
    }

    /// Queues a frame; returns false once the writer task is gone.
    pub fn send(&self, frame: Outbound) -> bool {
        self.sender.send(frame).is_ok()
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Owns every live connection. Only the relay's central loop touches it.
pub struct ClientManager {
    clients: HashMap<ClientId, Client>,
    next_client_id: ClientId,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a connection, or returns `None` when the relay is full.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> Option<ClientId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr, sender));
        Some(client_id)
    }

    /// Drops a connection. Its writer task ends once the queue is released.
    pub fn remove_client(&mut self, client_id: &ClientId) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    /// Sends a close frame to `client_id` and forgets it.
    pub fn close_client(&mut self, client_id: &ClientId) -> bool {
        match self.clients.get(client_id) {
            Some(client) => {
                client.send(Outbound::Close);
                self.remove_client(client_id)
            }
            None => false,
        }
    }

    pub fn get(&self, client_id: &ClientId) -> Option<&Client> {
        self.clients.get(client_id)
    }

    pub fn touch(&mut self, client_id: ClientId) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_seen = Instant::now();
        }
    }

    pub fn mark_admin(&mut self, client_id: ClientId) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.admin = true;
        }
    }

    /// Folds a full or partial state record into the cached copy.
    pub fn record_state(&mut self, client_id: ClientId, payload: &PlayerPayload) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                if payload.id != client_id {
                    debug!(
                        "Client {} reported state under id {}",
                        client_id, payload.id
                    );
                }
                client.state.merge(payload);
                true
            }
            None => false,
        }
    }

    /// Cached state of every client except `exclude`, ordered by id.
    pub fn players(&self, exclude: Option<ClientId>) -> Vec<PlayerPayload> {
        let mut players: Vec<PlayerPayload> = self
            .clients
            .values()
            .filter(|client| Some(client.id) != exclude && !client.admin)
            .map(|client| client.state.clone())
            .collect();
        players.sort_by_key(|player| player.id);
        players
    }

    /// Final scores, best first.
    pub fn leaderboard(&self) -> Vec<ScoreEntry> {
        let mut entries: Vec<ScoreEntry> = self
            .clients
            .values()
            .filter(|client| !client.admin)
            .map(|client| ScoreEntry {
                id: client.id,
                name: client
                    .state
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("player {}", client.id)),
                score: client.state.score.unwrap_or(0),
            })
            .collect();
        entries.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
        entries
    }

    /// Queues raw text for one client.
    pub fn send_text(&self, client_id: ClientId, text: &str) -> bool {
        match self.clients.get(&client_id) {
            Some(client) => client.send(Outbound::Text(text.to_string())),
            None => false,
        }
    }

    pub fn send(&self, client_id: ClientId, message: &Message) -> bool {
        match message.encode() {
            Ok(text) => self.send_text(client_id, &text),
            Err(e) => {
                warn!("Failed to encode `{}` record: {}", message.tag(), e);
                false
            }
        }
    }

    /// Queues raw text for every client except `exclude`. Returns the
    /// number of clients it was queued for.
    pub fn broadcast_text(&self, text: &str, exclude: Option<ClientId>) -> usize {
        let mut delivered = 0;
        for client in self.clients.values() {
            if Some(client.id) == exclude {
                continue;
            }
            if client.send(Outbound::Text(text.to_string())) {
                delivered += 1;
            } else {
                debug!("Client {} writer is gone, skipping", client.id);
            }
        }
        delivered
    }

    pub fn broadcast(&self, message: &Message, exclude: Option<ClientId>) -> usize {
        match message.encode() {
            Ok(text) => self.broadcast_text(&text, exclude),
            Err(e) => {
                warn!("Failed to encode `{}` record: {}", message.tag(), e);
                0
            }
        }
    }

    /// Removes non-admin clients silent for longer than `timeout`.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<ClientId> {
        let timed_out: Vec<ClientId> = self
            .clients
            .values()
            .filter(|client| !client.admin && client.is_timed_out(timeout))
            .map(|client| client.id)
            .collect();

        for client_id in &timed_out {
            self.close_client(client_id);
        }

        timed_out
    }

    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn add(manager: &mut ClientManager, addr: SocketAddr) -> (ClientId, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (manager.add_client(addr, tx).unwrap(), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_client_timeout() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut client = Client::new(1, test_addr(), tx);

        assert!(!client.is_timed_out(Duration::from_secs(1)));

        client.last_seen = Instant::now() - Duration::from_secs(2);

        assert!(client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_client_manager_creation() {
        let manager = ClientManager::new(5);
        assert_eq!(manager.max_clients, 5);
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_add_multiple_clients() {
        let mut manager = ClientManager::new(3);
        let (id1, _rx1) = add(&mut manager, test_addr());
        let (id2, _rx2) = add(&mut manager, test_addr2());

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);
        let (_id, _rx) = add(&mut manager, test_addr());

        let (tx, _rx2) = mpsc::unbounded_channel();
        assert!(manager.add_client(test_addr2(), tx).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut manager = ClientManager::new(2);
        let (id1, _rx1) = add(&mut manager, test_addr());
        assert!(manager.remove_client(&id1));

        let (id2, _rx2) = add(&mut manager, test_addr());
        assert_ne!(id1, id2);
        assert_eq!(id2, 2);
    }

    #[test]
    fn test_remove_nonexistent_client() {
        let mut manager = ClientManager::new(2);
        assert!(!manager.remove_client(&999));
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let mut manager = ClientManager::new(4);
        let (id1, mut rx1) = add(&mut manager, test_addr());
        let (_id2, mut rx2) = add(&mut manager, test_addr2());
        let (_id3, mut rx3) = add(&mut manager, test_addr2());

        let delivered = manager.broadcast_text("{\"type\":\"cl\",\"id\":1}", Some(id1));
        assert_eq!(delivered, 2);
        assert!(drain(&mut rx1).is_empty());
        assert_eq!(drain(&mut rx2), vec![Outbound::Text("{\"type\":\"cl\",\"id\":1}".to_string())]);
        assert_eq!(drain(&mut rx3).len(), 1);
    }

    #[test]
    fn test_broadcast_skips_closed_writers() {
        let mut manager = ClientManager::new(2);
        let (_id1, rx1) = add(&mut manager, test_addr());
        let (_id2, _rx2) = add(&mut manager, test_addr2());
        drop(rx1);

        assert_eq!(manager.broadcast(&Message::Timer { remaining: 3 }, None), 1);
    }

    #[test]
    fn test_record_state_merges_partial_updates() {
        let mut manager = ClientManager::new(2);
        let (id, _rx) = add(&mut manager, test_addr());

        let mut full = PlayerPayload::new(id);
        full.name = Some("ana".to_string());
        full.score = Some(5);
        full.pos = Some([0, 0]);
        assert!(manager.record_state(id, &full));

        let mut delta = PlayerPayload::new(id);
        delta.pos = Some([500, 10]);
        manager.record_state(id, &delta);

        let state = &manager.get(&id).unwrap().state;
        assert_eq!(state.pos, Some([500, 10]));
        assert_eq!(state.score, Some(5));
        assert_eq!(state.name.as_deref(), Some("ana"));
        assert!(!manager.record_state(42, &delta));
    }

    #[test]
    fn test_players_snapshot_excludes_target_and_admins() {
        let mut manager = ClientManager::new(4);
        let (id1, _rx1) = add(&mut manager, test_addr());
        let (id2, _rx2) = add(&mut manager, test_addr2());
        let (id3, _rx3) = add(&mut manager, test_addr2());
        manager.mark_admin(id3);

        let players = manager.players(Some(id2));
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].id, id1);
    }

    #[test]
    fn test_leaderboard_orders_by_score() {
        let mut manager = ClientManager::new(4);
        let (id1, _rx1) = add(&mut manager, test_addr());
        let (id2, _rx2) = add(&mut manager, test_addr2());
        let (id3, _rx3) = add(&mut manager, test_addr2());

        for (id, score) in [(id1, 2), (id2, 9), (id3, 2)] {
            let mut payload = PlayerPayload::new(id);
            payload.score = Some(score);
            manager.record_state(id, &payload);
        }

        let board = manager.leaderboard();
        let order: Vec<ClientId> = board.iter().map(|entry| entry.id).collect();
        assert_eq!(order, vec![id2, id1, id3]);
        assert_eq!(board[1].name, format!("player {}", id1));
    }

    #[test]
    fn test_check_timeouts_closes_silent_clients() {
        let mut manager = ClientManager::new(3);
        let (id1, mut rx1) = add(&mut manager, test_addr());
        let (id2, _rx2) = add(&mut manager, test_addr2());
        let (id3, _rx3) = add(&mut manager, test_addr2());
        manager.mark_admin(id3);

        for id in [id1, id3] {
            manager.clients.get_mut(&id).unwrap().last_seen = Instant::now() - Duration::from_secs(30);
        }

        let timed_out = manager.check_timeouts(Duration::from_secs(10));
        assert_eq!(timed_out, vec![id1]);
        assert_eq!(drain(&mut rx1), vec![Outbound::Close]);
        assert_eq!(manager.ids(), vec![id2, id3]);
    }
}
