//! Room Subscription Layer
//!
//! Rooms are server-side broadcast channels scoped to one clinic queue or one
//! doctor. Join and leave requests are only sent over a Connected link;
//! otherwise they are dropped, never queued.
//!
//! Membership does not survive a reconnect on its own. Views keep a
//! [`RoomMembership`] and call [`RoomMembership::rejoin`] whenever they
//! observe [`ConnectionState::Connected`](super::ConnectionState::Connected).

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

use super::manager::ConnectionManager;
use crate::transport::ClientFrame;

/// Kind of broadcast channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKind {
    /// Queue of one clinic, keyed by `clinic_id`
    ClinicQueue,
    /// Queue of one doctor, keyed by `doctor_id`
    DoctorQueue,
}

impl RoomKind {
    pub fn join_event(&self) -> &'static str {
        match self {
            RoomKind::ClinicQueue => "join_queue_room",
            RoomKind::DoctorQueue => "join_doctor_room",
        }
    }

    pub fn leave_event(&self) -> &'static str {
        match self {
            RoomKind::ClinicQueue => "leave_queue_room",
            RoomKind::DoctorQueue => "leave_doctor_room",
        }
    }

    /// Payload field carrying the room id
    pub fn id_field(&self) -> &'static str {
        match self {
            RoomKind::ClinicQueue => "clinic_id",
            RoomKind::DoctorQueue => "doctor_id",
        }
    }
}

/// One (kind, id) room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Room {
    pub kind: RoomKind,
    pub id: u64,
}

impl Room {
    pub fn clinic_queue(clinic_id: u64) -> Self {
        Self {
            kind: RoomKind::ClinicQueue,
            id: clinic_id,
        }
    }

    pub fn doctor_queue(doctor_id: u64) -> Self {
        Self {
            kind: RoomKind::DoctorQueue,
            id: doctor_id,
        }
    }

    /// Request body: `{<clinic_id|doctor_id>: id, token}`
    fn payload(&self, token: &str) -> Value {
        let mut data = Map::new();
        data.insert(self.kind.id_field().to_string(), Value::from(self.id));
        data.insert("token".to_string(), Value::from(token));
        Value::Object(data)
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind.id_field(), self.id)
    }
}

impl ConnectionManager {
    /// Ask the server to add this client to `room`.
    /// Returns `false` when the request was dropped because the link is not Connected.
    pub fn join_room(&self, room: Room) -> bool {
        self.send_room_request(room.kind.join_event(), room)
    }

    /// Ask the server to remove this client from `room`.
    /// Returns `false` when the request was dropped because the link is not Connected.
    pub fn leave_room(&self, room: Room) -> bool {
        self.send_room_request(room.kind.leave_event(), room)
    }

    pub fn join_queue_room(&self, clinic_id: u64) -> bool {
        self.join_room(Room::clinic_queue(clinic_id))
    }

    pub fn leave_queue_room(&self, clinic_id: u64) -> bool {
        self.leave_room(Room::clinic_queue(clinic_id))
    }

    pub fn join_doctor_room(&self, doctor_id: u64) -> bool {
        self.join_room(Room::doctor_queue(doctor_id))
    }

    pub fn leave_doctor_room(&self, doctor_id: u64) -> bool {
        self.leave_room(Room::doctor_queue(doctor_id))
    }

    fn send_room_request(&self, event: &'static str, room: Room) -> bool {
        // Token is read per request; the server re-validates every join
        let credential = self.session().credential();
        let Some(token) = credential.usable_token() else {
            tracing::debug!(event, room = %room, "Room request dropped, not authenticated");
            return false;
        };

        let sent = self.send_when_connected(ClientFrame::emit(event, room.payload(token)));
        if sent {
            tracing::debug!(event, room = %room, "Room request sent");
        } else {
            tracing::debug!(event, room = %room, "Room request dropped, not connected");
        }
        sent
    }
}

/// Rooms a view wants joined
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomMembership {
    rooms: HashSet<Room>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the room was not already present
    pub fn insert(&mut self, room: Room) -> bool {
        self.rooms.insert(room)
    }

    /// Returns `true` if the room was present
    pub fn remove(&mut self, room: &Room) -> bool {
        self.rooms.remove(room)
    }

    pub fn contains(&self, room: &Room) -> bool {
        self.rooms.contains(room)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.iter()
    }

    /// Add `room` and join it now if connected
    pub fn join(&mut self, manager: &ConnectionManager, room: Room) -> bool {
        self.insert(room);
        manager.join_room(room)
    }

    /// Remove `room` and leave it now if connected
    pub fn leave(&mut self, manager: &ConnectionManager, room: &Room) -> bool {
        self.remove(room);
        manager.leave_room(*room)
    }

    /// Re-issue every join. Returns how many requests were sent.
    pub fn rejoin(&self, manager: &ConnectionManager) -> usize {
        let sent = self.rooms.iter().filter(|room| manager.join_room(**room)).count();
        tracing::debug!(rooms = self.rooms.len(), sent, "Rooms re-joined");
        sent
    }
}

impl FromIterator<Room> for RoomMembership {
    fn from_iter<I: IntoIterator<Item = Room>>(iter: I) -> Self {
        Self {
            rooms: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealtimeConfig;
    use crate::realtime::ConnectionState;
    use crate::session::Session;
    use crate::transport::{Connector, DisconnectReason, MemoryConnector, MemoryPeer};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (ConnectionManager, Arc<MemoryConnector>, Session) {
        let session = Session::new();
        session.login("token-1");
        let connector = Arc::new(MemoryConnector::new());
        let manager = ConnectionManager::new(
            &RealtimeConfig::default(),
            session.clone(),
            Arc::clone(&connector) as Arc<dyn Connector>,
        );
        (manager, connector, session)
    }

    async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
        let mut rx = manager.watch_status();
        tokio::time::timeout(Duration::from_secs(300), rx.wait_for(|s| s.state == state))
            .await
            .unwrap()
            .unwrap();
    }

    async fn connect(manager: &ConnectionManager, connector: &MemoryConnector) -> MemoryPeer {
        manager.connect();
        let peer = connector.next_peer().await.unwrap();
        peer.accept();
        wait_for_state(manager, ConnectionState::Connected).await;
        peer
    }

    fn emitted(frame: ClientFrame) -> (String, Value) {
        match frame {
            ClientFrame::Emit { event, data } => (event, data),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_room_wire_names() {
        let room = Room::clinic_queue(7);
        assert_eq!(room.kind.join_event(), "join_queue_room");
        assert_eq!(room.kind.leave_event(), "leave_queue_room");
        assert_eq!(
            room.payload("abc"),
            json!({"clinic_id": 7, "token": "abc"})
        );

        let room = Room::doctor_queue(12);
        assert_eq!(room.kind.join_event(), "join_doctor_room");
        assert_eq!(room.kind.leave_event(), "leave_doctor_room");
        assert_eq!(
            room.payload("abc"),
            json!({"doctor_id": 12, "token": "abc"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_and_leave_when_connected() {
        let (manager, connector, session) = setup();
        let mut peer = connect(&manager, &connector).await;

        assert!(manager.join_queue_room(7));
        assert!(manager.join_doctor_room(12));
        session.login("token-2");
        assert!(manager.leave_queue_room(7));

        let (event, data) = emitted(peer.next_frame().await.unwrap());
        assert_eq!(event, "join_queue_room");
        assert_eq!(data, json!({"clinic_id": 7, "token": "token-1"}));

        let (event, data) = emitted(peer.next_frame().await.unwrap());
        assert_eq!(event, "join_doctor_room");
        assert_eq!(data, json!({"doctor_id": 12, "token": "token-1"}));

        // Token read at call time
        let (event, data) = emitted(peer.next_frame().await.unwrap());
        assert_eq!(event, "leave_queue_room");
        assert_eq!(data, json!({"clinic_id": 7, "token": "token-2"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_while_disconnected_are_dropped() {
        let (manager, connector, _session) = setup();

        assert!(!manager.join_queue_room(7));
        assert!(!manager.leave_doctor_room(12));

        // Not replayed once the connection comes up
        let mut peer = connect(&manager, &connector).await;
        assert!(peer.try_next_frame().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_during_handshake_are_dropped() {
        let (manager, connector, _session) = setup();
        manager.connect();
        let mut peer = connector.next_peer().await.unwrap();
        peer.open();
        wait_for_state(&manager, ConnectionState::Authenticating).await;

        assert!(!manager.join_doctor_room(3));
        assert!(peer.try_next_frame().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_membership_rejoin_after_reconnect() {
        let (manager, connector, _session) = setup();
        let mut membership = RoomMembership::new();
        assert!(!membership.join(&manager, Room::clinic_queue(7)));
        assert!(!membership.join(&manager, Room::clinic_queue(7)));
        membership.insert(Room::doctor_queue(12));
        assert_eq!(membership.len(), 2);

        let first = connect(&manager, &connector).await;
        first.disconnect(DisconnectReason::TransportClose);
        wait_for_state(&manager, ConnectionState::Reconnecting).await;
        assert_eq!(membership.rejoin(&manager), 0);

        let mut second = connector.next_peer().await.unwrap();
        second.accept();
        wait_for_state(&manager, ConnectionState::Connected).await;
        assert!(second.try_next_frame().is_none());

        assert_eq!(membership.rejoin(&manager), 2);
        let mut events = vec![
            emitted(second.next_frame().await.unwrap()).0,
            emitted(second.next_frame().await.unwrap()).0,
        ];
        events.sort();
        assert_eq!(events, vec!["join_doctor_room", "join_queue_room"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_membership_leave_is_idempotent() {
        let (manager, connector, _session) = setup();
        let mut peer = connect(&manager, &connector).await;
        let room = Room::doctor_queue(4);
        let mut membership: RoomMembership = [room].into_iter().collect();

        assert!(membership.leave(&manager, &room));
        assert!(!membership.contains(&room));
        assert!(!membership.remove(&room));
        assert!(membership.is_empty());

        let (event, _) = emitted(peer.next_frame().await.unwrap());
        assert_eq!(event, "leave_doctor_room");
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_dropped_after_logout() {
        let (manager, connector, session) = setup();
        let mut peer = connect(&manager, &connector).await;

        session.logout();
        assert!(!manager.join_queue_room(1));
        assert!(peer.try_next_frame().is_none());
    }
}
