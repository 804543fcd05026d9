//! Room membership and fan-out.
//!
//! A single lock guards both maps (`rooms` and `names`), so a connection is
//! never visible in one and missing from the other. Sends happen on a
//! snapshot taken under the lock, after it is released.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::metrics::{BROADCAST_DROPS_TOTAL, CHAT_MESSAGES_TOTAL, ROOMS_ACTIVE};
use crate::protocol::ServerFrame;
use crate::types::{ConnectionId, DisplayName, RoomCode};
use crate::websocket::ClientConnection;

/// Name used in a leave notice when the leaver's name was never recorded.
pub const FALLBACK_LEAVER_NAME: &str = "Someone";

type Members = HashMap<ConnectionId, Arc<ClientConnection>>;

#[derive(Default)]
struct RegistryState {
    rooms: HashMap<RoomCode, Members>,
    names: HashMap<ConnectionId, DisplayName>,
}

/// Result of [`RoomRegistry::leave`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The connection was not in any room.
    NotMember,
    /// The connection was the last member; the room no longer exists.
    RoomClosed(RoomCode),
    /// The connection left a room that still has members.
    Left(RoomCode),
}

/// All live rooms and the display names of their members.
pub struct RoomRegistry {
    state: Mutex<RegistryState>,
}

impl RoomRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Add a connection to a room (creating it) and announce it to the room.
    ///
    /// The announcement goes to every member including the joiner. Returns
    /// the number of members the notice was queued for.
    pub fn join(&self, code: &RoomCode, connection: Arc<ClientConnection>, name: DisplayName) -> usize {
        let id = connection.id;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let members = state.rooms.entry(code.clone()).or_insert_with(|| {
                gauge!(ROOMS_ACTIVE).increment(1.0);
                HashMap::new()
            });
            let _ = members.insert(id, connection);
            let _ = state.names.insert(id, name.clone());
        }
        info!(conn_id = %id, %code, %name, "joined room");
        self.broadcast(
            code,
            &ServerFrame::System {
                message: format!("{name} joined"),
                code: code.clone(),
            },
        )
    }

    /// Remove a connection from wherever it is. Idempotent.
    ///
    /// Deletes the room if it becomes empty, otherwise tells the remaining
    /// members who left.
    ///
    /// The notice goes out after the lock is released, so a connection that
    /// joins in between may also receive it.
    pub fn leave(&self, id: ConnectionId) -> LeaveOutcome {
        let (outcome, name) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let name = state.names.remove(&id);
            let code = state
                .rooms
                .iter()
                .find_map(|(code, members)| members.contains_key(&id).then(|| code.clone()));
            let outcome = match code {
                None => LeaveOutcome::NotMember,
                Some(code) => {
                    let now_empty = state.rooms.get_mut(&code).is_some_and(|members| {
                        let _ = members.remove(&id);
                        members.is_empty()
                    });
                    if now_empty {
                        let _ = state.rooms.remove(&code);
                        gauge!(ROOMS_ACTIVE).decrement(1.0);
                        LeaveOutcome::RoomClosed(code)
                    } else {
                        LeaveOutcome::Left(code)
                    }
                }
            };
            (outcome, name)
        };

        match &outcome {
            LeaveOutcome::Left(code) => {
                let name = name.as_ref().map_or(FALLBACK_LEAVER_NAME, DisplayName::as_str);
                info!(conn_id = %id, %code, %name, "left room");
                let _ = self.broadcast(
                    code,
                    &ServerFrame::System {
                        message: format!("{name} left"),
                        code: code.clone(),
                    },
                );
            }
            LeaveOutcome::RoomClosed(code) => {
                info!(conn_id = %id, %code, "last member left, room closed");
            }
            LeaveOutcome::NotMember => debug!(conn_id = %id, "leave for connection in no room"),
        }
        outcome
    }

    /// Relay a chat message from `sender` to every member of `code`,
    /// the sender included. Empty or whitespace-only text is not sent.
    pub fn relay(&self, code: &RoomCode, sender: &DisplayName, text: &str) -> usize {
        if text.trim().is_empty() {
            return 0;
        }
        counter!(CHAT_MESSAGES_TOTAL).increment(1);
        self.broadcast(
            code,
            &ServerFrame::Chat {
                name: sender.clone(),
                text: text.to_owned(),
            },
        )
    }

    /// Queue `frame` for every current member of `code`.
    ///
    /// A member whose queue rejects the frame is skipped; delivery to the
    /// others is unaffected. Returns the number of members it was queued for.
    pub fn broadcast(&self, code: &RoomCode, frame: &ServerFrame) -> usize {
        let json = match frame.to_json() {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                warn!(%code, error = %e, "failed to serialize frame");
                return 0;
            }
        };
        let recipients: Vec<Arc<ClientConnection>> = {
            let state = self.state.lock();
            match state.rooms.get(code) {
                Some(members) => members.values().cloned().collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for conn in &recipients {
            if conn.send(json.clone()) {
                delivered += 1;
            } else {
                counter!(BROADCAST_DROPS_TOTAL).increment(1);
                warn!(conn_id = %conn.id, %code, dropped = conn.drop_count(), "failed to queue frame for member");
            }
        }
        debug!(%code, recipients = recipients.len(), delivered, "broadcast to room");
        delivered
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.state.lock().rooms.len()
    }

    /// Number of members in a room (0 if it does not exist).
    pub fn member_count(&self, code: &RoomCode) -> usize {
        self.state.lock().rooms.get(code).map_or(0, HashMap::len)
    }

    /// Number of joined connections across all rooms.
    pub fn connection_count(&self) -> usize {
        self.state.lock().names.len()
    }

    /// Whether a room currently exists.
    pub fn has_room(&self, code: &RoomCode) -> bool {
        self.state.lock().rooms.contains_key(code)
    }

    /// Recorded display name of a joined connection.
    pub fn name_of(&self, id: ConnectionId) -> Option<DisplayName> {
        self.state.lock().names.get(&id).cloned()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomrelay_settings::OverflowPolicy;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    fn code(raw: &str) -> RoomCode {
        RoomCode::parse(raw).unwrap()
    }

    fn name(raw: &str) -> DisplayName {
        DisplayName::normalize(raw)
    }

    fn make_connection(capacity: usize) -> (Arc<ClientConnection>, mpsc::Receiver<Utf8Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = ClientConnection::new(ConnectionId::new(), tx, OverflowPolicy::Disconnect);
        (Arc::new(conn), rx)
    }

    fn next_frame(rx: &mut mpsc::Receiver<Utf8Bytes>) -> Value {
        let raw = rx.try_recv().expect("expected a queued frame");
        serde_json::from_str(raw.as_str()).unwrap()
    }

    fn assert_empty(rx: &mut mpsc::Receiver<Utf8Bytes>) {
        assert!(rx.try_recv().is_err(), "expected no queued frame");
    }

    #[test]
    fn join_creates_room_and_notifies_joiner() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = make_connection(8);
        assert_eq!(registry.join(&code("abc"), a.clone(), name("Ann")), 1);

        assert!(registry.has_room(&code("abc")));
        assert_eq!(registry.member_count(&code("abc")), 1);
        assert_eq!(registry.name_of(a.id), Some(name("Ann")));
        assert_eq!(
            next_frame(&mut rx_a),
            json!({"type": "system", "message": "Ann joined", "code": "abc"})
        );
    }

    #[test]
    fn join_notifies_existing_members() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = make_connection(8);
        let (b, mut rx_b) = make_connection(8);
        let _ = registry.join(&code("abc"), a, name("Ann"));
        let _ = next_frame(&mut rx_a);

        assert_eq!(registry.join(&code("abc"), b, name("Bob")), 2);
        assert_eq!(next_frame(&mut rx_a)["message"], "Bob joined");
        assert_eq!(next_frame(&mut rx_b)["message"], "Bob joined");
    }

    #[test]
    fn relay_reaches_sender_and_peers_only_in_room() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = make_connection(8);
        let (b, mut rx_b) = make_connection(8);
        let (c, mut rx_c) = make_connection(8);
        let _ = registry.join(&code("abc"), a, name("Ann"));
        let _ = registry.join(&code("abc"), b, name("Bob"));
        let _ = registry.join(&code("xyz"), c, name("Cat"));
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}
        while rx_c.try_recv().is_ok() {}

        assert_eq!(registry.relay(&code("abc"), &name("Ann"), "hello"), 2);
        let expected = json!({"type": "chat", "name": "Ann", "text": "hello"});
        assert_eq!(next_frame(&mut rx_a), expected);
        assert_eq!(next_frame(&mut rx_b), expected);
        assert_empty(&mut rx_c);
    }

    #[test]
    fn relay_skips_blank_text() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = make_connection(8);
        let _ = registry.join(&code("abc"), a, name("Ann"));
        let _ = next_frame(&mut rx_a);

        assert_eq!(registry.relay(&code("abc"), &name("Ann"), "   "), 0);
        assert_eq!(registry.relay(&code("abc"), &name("Ann"), ""), 0);
        assert_empty(&mut rx_a);
    }

    #[test]
    fn rooms_are_case_sensitive() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = make_connection(8);
        let (b, mut rx_b) = make_connection(8);
        let _ = registry.join(&code("abc"), a, name("Ann"));
        let _ = registry.join(&code("ABC"), b, name("Bob"));
        assert_eq!(registry.room_count(), 2);
        let _ = next_frame(&mut rx_a);
        let _ = next_frame(&mut rx_b);

        let _ = registry.relay(&code("ABC"), &name("Bob"), "hi");
        assert_empty(&mut rx_a);
        assert_eq!(next_frame(&mut rx_b)["text"], "hi");
    }

    #[test]
    fn leave_notifies_remaining_members() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = make_connection(8);
        let (b, mut rx_b) = make_connection(8);
        let _ = registry.join(&code("abc"), a.clone(), name("Ann"));
        let _ = registry.join(&code("abc"), b.clone(), name("Bob"));
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        assert_eq!(registry.leave(b.id), LeaveOutcome::Left(code("abc")));
        assert_eq!(
            next_frame(&mut rx_a),
            json!({"type": "system", "message": "Bob left", "code": "abc"})
        );
        assert_empty(&mut rx_b);
        assert_eq!(registry.member_count(&code("abc")), 1);
        assert_eq!(registry.name_of(b.id), None);
    }

    #[test]
    fn last_leave_removes_room() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = make_connection(8);
        let _ = registry.join(&code("abc"), a.clone(), name("Ann"));

        assert_eq!(registry.leave(a.id), LeaveOutcome::RoomClosed(code("abc")));
        assert!(!registry.has_room(&code("abc")));
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn leave_is_idempotent() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = make_connection(8);
        let (b, mut rx_b) = make_connection(8);
        let _ = registry.join(&code("abc"), a.clone(), name("Ann"));
        let _ = registry.join(&code("abc"), b, name("Bob"));
        while rx_b.try_recv().is_ok() {}

        assert_eq!(registry.leave(a.id), LeaveOutcome::Left(code("abc")));
        assert_eq!(registry.leave(a.id), LeaveOutcome::NotMember);
        assert_eq!(next_frame(&mut rx_b)["message"], "Ann left");
        assert_empty(&mut rx_b);
    }

    #[test]
    fn leave_without_recorded_name_uses_fallback() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = make_connection(8);
        let (b, mut rx_b) = make_connection(8);
        let _ = registry.join(&code("abc"), a.clone(), name("Ann"));
        let _ = registry.join(&code("abc"), b, name("Bob"));
        while rx_b.try_recv().is_ok() {}
        let _ = registry.state.lock().names.remove(&a.id);

        assert_eq!(registry.leave(a.id), LeaveOutcome::Left(code("abc")));
        assert_eq!(
            next_frame(&mut rx_b),
            json!({"type": "system", "message": "Someone left", "code": "abc"})
        );
    }

    #[test]
    fn leave_unknown_connection_is_noop() {
        let registry = RoomRegistry::new();
        assert_eq!(registry.leave(ConnectionId::new()), LeaveOutcome::NotMember);
    }

    #[test]
    fn broadcast_to_missing_room_is_noop() {
        let registry = RoomRegistry::new();
        let frame = ServerFrame::invalid_code();
        assert_eq!(registry.broadcast(&code("nobody"), &frame), 0);
    }

    #[test]
    fn failed_member_does_not_block_others() {
        let registry = RoomRegistry::new();
        let (a, rx_a) = make_connection(8);
        let (b, mut rx_b) = make_connection(8);
        let _ = registry.join(&code("abc"), a, name("Ann"));
        let _ = registry.join(&code("abc"), b, name("Bob"));
        while rx_b.try_recv().is_ok() {}
        drop(rx_a);

        assert_eq!(registry.relay(&code("abc"), &name("Bob"), "still here"), 1);
        assert_eq!(next_frame(&mut rx_b)["text"], "still here");
    }

    #[test]
    fn overflowing_member_is_closed_not_removed() {
        let registry = RoomRegistry::new();
        let (slow, _rx_slow) = make_connection(1);
        let (fast, mut rx_fast) = make_connection(8);
        let _ = registry.join(&code("abc"), slow.clone(), name("Slow"));
        let _ = registry.join(&code("abc"), fast, name("Fast"));
        while rx_fast.try_recv().is_ok() {}

        let _ = registry.relay(&code("abc"), &name("Fast"), "one");
        assert!(slow.overflowed());
        assert!(slow.is_closed());
        assert_eq!(next_frame(&mut rx_fast)["text"], "one");
        // removal is the session's job once it observes the close
        assert_eq!(registry.member_count(&code("abc")), 2);
    }

    #[test]
    fn per_sender_order_is_preserved() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = make_connection(16);
        let (b, mut rx_b) = make_connection(16);
        let _ = registry.join(&code("abc"), a, name("Ann"));
        let _ = registry.join(&code("abc"), b, name("Bob"));
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        for i in 0..5 {
            let _ = registry.relay(&code("abc"), &name("Ann"), &format!("m{i}"));
        }
        for i in 0..5 {
            assert_eq!(next_frame(&mut rx_b)["text"], format!("m{i}"));
            assert_eq!(next_frame(&mut rx_a)["text"], format!("m{i}"));
        }
    }

    #[test]
    fn counts_track_membership() {
        let registry = RoomRegistry::new();
        let (a, _ra) = make_connection(8);
        let (b, _rb) = make_connection(8);
        let (c, _rc) = make_connection(8);
        let _ = registry.join(&code("one"), a.clone(), name("A"));
        let _ = registry.join(&code("one"), b, name("B"));
        let _ = registry.join(&code("two"), c.clone(), name("C"));
        assert_eq!(registry.room_count(), 2);
        assert_eq!(registry.connection_count(), 3);

        let _ = registry.leave(c.id);
        let _ = registry.leave(a.id);
        assert_eq!(registry.room_count(), 1);
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.member_count(&code("two")), 0);
    }

    #[test]
    fn concurrent_joins_and_leaves_keep_maps_consistent() {
        let registry = Arc::new(RoomRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let (conn, _rx) = make_connection(4);
                        let room = code(&format!("r{}", (t + i) % 3));
                        let _ = registry.join(&room, conn.clone(), name("x"));
                        let _ = registry.leave(conn.id);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.connection_count(), 0);
    }
}
