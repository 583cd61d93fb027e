//! Room Registry
//!
//! Owns every live room. Each room sits behind its own `tokio::sync::Mutex`
//! (FIFO-fair), so events for one room are applied one at a time in
//! acquisition order while other rooms proceed independently.
//!
//! Lock order is always map → room. Timer tasks only take the room lock.
//! Effects are applied synchronously while the room lock is held, so a
//! transition, its broadcasts and its timer commands form one step.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument};

use crate::game::events::Effect;
use crate::game::room::{RoomConfig, RoomError, RoomSession};
use crate::game::state::{Card, ConnectionId, PlayerId, RoomId};
use crate::network::broadcast::Broadcaster;
use crate::network::protocol::{ErrorCode, RoomUpdate, ServerMessage};

/// Countdown resolution.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Registry-level failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// No room with that id exists.
    #[error("room {0} does not exist")]
    UnknownRoom(RoomId),

    /// The room rejected the operation.
    #[error(transparent)]
    Room(#[from] RoomError),
}

impl SessionError {
    /// Wire code for the private rejection.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::UnknownRoom(_) => ErrorCode::UnknownRoom,
            SessionError::Room(err) => ErrorCode::from(err),
        }
    }
}

/// A room plus the tasks scheduled on its behalf.
pub struct RoomEntry {
    session: RoomSession,
    countdown: Option<JoinHandle<()>>,
    scheduled: Option<JoinHandle<()>>,
}

type SharedRoom = Arc<Mutex<RoomEntry>>;

impl RoomEntry {
    fn new(session: RoomSession) -> Self {
        Self {
            session,
            countdown: None,
            scheduled: None,
        }
    }

    /// The room's state.
    pub fn session(&self) -> &RoomSession {
        &self.session
    }

    fn cancel_countdown(&mut self) {
        if let Some(handle) = self.countdown.take() {
            handle.abort();
        }
    }

    fn cancel_scheduled(&mut self) {
        if let Some(handle) = self.scheduled.take() {
            handle.abort();
        }
    }

    /// Carry out effects in order. Returns true if the room must be destroyed.
    fn apply(&mut self, shared: &SharedRoom, broadcaster: &Arc<Broadcaster>, effects: Vec<Effect>) -> bool {
        let mut destroy = false;
        for effect in effects {
            match effect {
                Effect::Broadcast(event) => {
                    let message = ServerMessage::from_event(&event, &self.session);
                    broadcaster.fan_out(&self.session.connections(), &message);
                }
                Effect::StartCountdown { round } => {
                    self.cancel_countdown();
                    self.countdown = Some(tokio::spawn(run_countdown(
                        shared.clone(),
                        broadcaster.clone(),
                        round,
                    )));
                }
                Effect::CancelCountdown => self.cancel_countdown(),
                Effect::ScheduleDeal { round, after } => {
                    self.cancel_scheduled();
                    self.scheduled = Some(tokio::spawn(run_delayed(
                        shared.clone(),
                        broadcaster.clone(),
                        after,
                        move |room: &mut RoomSession| room.deal(round),
                    )));
                }
                Effect::ScheduleReset { round, after } => {
                    self.cancel_scheduled();
                    self.scheduled = Some(tokio::spawn(run_delayed(
                        shared.clone(),
                        broadcaster.clone(),
                        after,
                        move |room: &mut RoomSession| room.expire_win(round),
                    )));
                }
                Effect::CancelScheduled => self.cancel_scheduled(),
                Effect::Destroy => {
                    self.cancel_countdown();
                    self.cancel_scheduled();
                    destroy = true;
                }
            }
        }
        destroy
    }
}

/// One-second countdown for `round`. Exits once the room moves on.
async fn run_countdown(room: SharedRoom, broadcaster: Arc<Broadcaster>, round: u64) {
    let mut ticker = interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let mut entry = room.lock().await;
        if entry.session.round() != round || !entry.session.countdown_running() {
            break;
        }
        let effects = entry.session.tick(round);
        entry.apply(&room, &broadcaster, effects);
    }
}

/// Run a round-keyed transition after `delay`.
async fn run_delayed<F>(room: SharedRoom, broadcaster: Arc<Broadcaster>, delay: Duration, transition: F)
where
    F: FnOnce(&mut RoomSession) -> Vec<Effect> + Send + 'static,
{
    tokio::time::sleep(delay).await;

    let mut entry = room.lock().await;
    let effects = transition(&mut entry.session);
    entry.apply(&room, &broadcaster, effects);
}

// =============================================================================
// ROOM REGISTRY
// =============================================================================

/// All live rooms, keyed by id.
pub struct RoomRegistry {
    rooms: RwLock<BTreeMap<RoomId, SharedRoom>>,
    broadcaster: Arc<Broadcaster>,
    config: RoomConfig,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new(config: RoomConfig, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            rooms: RwLock::new(BTreeMap::new()),
            broadcaster,
            config,
        }
    }

    /// Get a room by id.
    async fn get_room(&self, room_id: &RoomId) -> Option<SharedRoom> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).cloned()
    }

    /// Run a player operation on an existing room.
    async fn with_room<F>(&self, room_id: &RoomId, op: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut RoomSession) -> Result<Vec<Effect>, RoomError>,
    {
        let room = self
            .get_room(room_id)
            .await
            .ok_or_else(|| SessionError::UnknownRoom(room_id.clone()))?;

        let mut entry = room.lock().await;
        let effects = op(&mut entry.session)?;
        entry.apply(&room, &self.broadcaster, effects);
        Ok(())
    }

    /// Enter a room, creating it on first join.
    #[instrument(skip_all, fields(room = %room_id, player = %player_id))]
    pub async fn join(
        &self,
        room_id: RoomId,
        player_id: PlayerId,
        nick: String,
        score: u32,
        conn: ConnectionId,
    ) {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                let session = RoomSession::new(room_id.clone(), self.config.clone());
                info!("Created room {} ({:?})", room_id, session.mode());
                Arc::new(Mutex::new(RoomEntry::new(session)))
            })
            .clone();

        let mut entry = room.lock().await;
        let effects = entry.session.join(player_id, nick, score, conn);
        entry.apply(&room, &self.broadcaster, effects);
    }

    /// Leave a room. Unknown rooms and players are ignored.
    #[instrument(skip_all, fields(room = %room_id, player = %player_id))]
    pub async fn leave(&self, room_id: &RoomId, player_id: &PlayerId) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(room_id).cloned() else {
            debug!("Leave for unknown room {}", room_id);
            return;
        };

        let mut entry = room.lock().await;
        let effects = entry.session.leave(player_id);
        if entry.apply(&room, &self.broadcaster, effects) {
            rooms.remove(room_id);
            info!("Room {} closed", room_id);
        }
    }

    /// Drop every player still bound to a closed connection.
    ///
    /// Rooms are visited without holding the map, so a busy room only delays
    /// this sweep. Emptied rooms are removed afterwards if nobody joined them
    /// in the meantime.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, conn: ConnectionId) {
        let live: Vec<(RoomId, SharedRoom)> = {
            let rooms = self.rooms.read().await;
            rooms.iter().map(|(id, room)| (id.clone(), room.clone())).collect()
        };

        let mut emptied = Vec::new();
        for (room_id, room) in live {
            let mut entry = room.lock().await;
            let effects = entry.session.disconnect(conn);
            if entry.apply(&room, &self.broadcaster, effects) {
                emptied.push((room_id, room.clone()));
            }
        }
        if emptied.is_empty() {
            return;
        }

        let mut rooms = self.rooms.write().await;
        for (room_id, room) in emptied {
            let still_ours = rooms.get(&room_id).is_some_and(|r| Arc::ptr_eq(r, &room));
            if still_ours && room.lock().await.session.is_empty() {
                rooms.remove(&room_id);
                info!("Room {} closed", room_id);
            }
        }
    }

    /// Flip a player's ready flag.
    pub async fn toggle_ready(&self, room_id: &RoomId, player_id: &PlayerId) -> Result<(), SessionError> {
        self.with_room(room_id, |room| room.toggle_ready(player_id)).await
    }

    /// Claim the buzz in a race room.
    pub async fn buzz(&self, room_id: &RoomId, player_id: &PlayerId) -> Result<(), SessionError> {
        self.with_room(room_id, |room| room.buzz(player_id)).await
    }

    /// Replace the table with a player's cards.
    pub async fn submit_cards(
        &self,
        room_id: &RoomId,
        player_id: &PlayerId,
        cards: Vec<Card>,
        claimed_win: bool,
        claimed_score: u32,
    ) -> Result<(), SessionError> {
        self.with_room(room_id, |room| {
            room.submit_move(player_id, cards, claimed_win, claimed_score)
        })
        .await
    }

    /// Abandon the current round.
    pub async fn give_up(&self, room_id: &RoomId, player_id: &PlayerId) -> Result<(), SessionError> {
        self.with_room(room_id, |room| room.give_up(player_id)).await
    }

    /// Current snapshot of a room.
    pub async fn snapshot(&self, room_id: &RoomId) -> Option<RoomUpdate> {
        let room = self.get_room(room_id).await?;
        let entry = room.lock().await;
        Some(RoomUpdate::from(entry.session()))
    }

    /// Get active room count.
    pub async fn room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }

    /// Stop every room's timers and drop all rooms.
    pub async fn close_all(&self) {
        let mut rooms = self.rooms.write().await;
        for room in rooms.values() {
            let mut entry = room.lock().await;
            entry.cancel_countdown();
            entry.cancel_scheduled();
        }
        rooms.clear();
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::RoomStatus;
    use tokio::sync::mpsc;

    struct Client {
        conn: ConnectionId,
        rx: mpsc::Receiver<ServerMessage>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }
    }

    fn fast_config() -> RoomConfig {
        RoomConfig {
            round_secs: 5,
            buzz_secs: 3,
            counting_delay: Duration::from_secs(2),
            reset_delay: Duration::from_secs(4),
            ..Default::default()
        }
    }

    fn setup(config: RoomConfig) -> (Arc<Broadcaster>, RoomRegistry) {
        let broadcaster = Arc::new(Broadcaster::new());
        let registry = RoomRegistry::new(config, broadcaster.clone());
        (broadcaster, registry)
    }

    fn connect(broadcaster: &Broadcaster, id: u64) -> Client {
        let (tx, rx) = mpsc::channel(256);
        broadcaster.register(ConnectionId(id), tx);
        Client {
            conn: ConnectionId(id),
            rx,
        }
    }

    async fn seat(registry: &RoomRegistry, room: &str, player: &str, client: &Client) {
        registry
            .join(RoomId::new(room), PlayerId::new(player), player.to_string(), 0, client.conn)
            .await;
    }

    async fn status(registry: &RoomRegistry, room: &str) -> RoomStatus {
        registry.snapshot(&RoomId::new(room)).await.unwrap().status
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_broadcasts_snapshot() {
        let (broadcaster, registry) = setup(fast_config());
        let mut a = connect(&broadcaster, 1);
        let mut b = connect(&broadcaster, 2);

        seat(&registry, "9", "A", &a).await;
        seat(&registry, "9", "B", &b).await;

        assert_eq!(registry.room_count().await, 1);
        let a_msgs = a.drain();
        assert_eq!(a_msgs.len(), 2);
        match b.drain().as_slice() {
            [ServerMessage::RoomUpdate(update)] => {
                assert_eq!(update.players.len(), 2);
                assert_eq!(update.grabbed_by, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_race_round() {
        let (broadcaster, registry) = setup(fast_config());
        let mut a = connect(&broadcaster, 1);
        let mut b = connect(&broadcaster, 2);
        let room = RoomId::new("1");
        seat(&registry, "1", "A", &a).await;
        seat(&registry, "1", "B", &b).await;

        registry.toggle_ready(&room, &PlayerId::new("A")).await.unwrap();
        registry.toggle_ready(&room, &PlayerId::new("B")).await.unwrap();
        assert_eq!(status(&registry, "1").await, RoomStatus::Counting);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        let snapshot = registry.snapshot(&room).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::Playing);
        assert_eq!(snapshot.cards.len(), 4);

        registry.buzz(&room, &PlayerId::new("A")).await.unwrap();
        assert_eq!(
            registry.buzz(&room, &PlayerId::new("B")).await,
            Err(SessionError::Room(RoomError::AlreadyGrabbed(PlayerId::new("A"))))
        );

        a.drain();
        b.drain();
        registry
            .submit_cards(&room, &PlayerId::new("A"), vec![Card::merged(24.0)], true, 3)
            .await
            .unwrap();
        let snapshot = registry.snapshot(&room).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::Won);
        assert_eq!(snapshot.winner, Some(PlayerId::new("A")));
        assert_eq!(snapshot.players[0].score, 3);

        // Countdown is gone: no timer-sync while won
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(b
            .drain()
            .iter()
            .all(|m| !matches!(m, ServerMessage::TimerSync { .. })));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let snapshot = registry.snapshot(&room).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::Waiting);
        assert!(snapshot.cards.is_empty());
        assert!(snapshot.winner.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_times_out() {
        let (broadcaster, registry) = setup(fast_config());
        let mut a = connect(&broadcaster, 1);
        let b = connect(&broadcaster, 2);
        let room = RoomId::new("12");
        seat(&registry, "12", "A", &a).await;
        seat(&registry, "12", "B", &b).await;
        registry.toggle_ready(&room, &PlayerId::new("A")).await.unwrap();
        registry.toggle_ready(&room, &PlayerId::new("B")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2100)).await;
        a.drain();

        tokio::time::sleep(Duration::from_secs(6)).await;
        let msgs = a.drain();

        let syncs: Vec<u32> = msgs
            .iter()
            .filter_map(|m| match m {
                ServerMessage::TimerSync { time_left } => Some(*time_left),
                _ => None,
            })
            .collect();
        assert_eq!(syncs, vec![4, 3, 2, 1, 0]);

        let timeouts = msgs
            .iter()
            .filter(|m| matches!(m, ServerMessage::ForceTimeout { .. }))
            .count();
        assert_eq!(timeouts, 1);
        assert_eq!(status(&registry, "12").await, RoomStatus::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_cancels_deal() {
        let (broadcaster, registry) = setup(fast_config());
        let a = connect(&broadcaster, 1);
        let b = connect(&broadcaster, 2);
        let room = RoomId::new("6");
        seat(&registry, "6", "A", &a).await;
        seat(&registry, "6", "B", &b).await;
        registry.toggle_ready(&room, &PlayerId::new("A")).await.unwrap();
        registry.toggle_ready(&room, &PlayerId::new("B")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        registry.toggle_ready(&room, &PlayerId::new("B")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        let snapshot = registry.snapshot(&room).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::Waiting);
        assert!(snapshot.cards.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_leave_destroys_room() {
        let (broadcaster, registry) = setup(fast_config());
        let a = connect(&broadcaster, 1);
        let b = connect(&broadcaster, 2);
        let room = RoomId::new("lobby");
        seat(&registry, "lobby", "A", &a).await;
        seat(&registry, "lobby", "B", &b).await;

        registry.leave(&room, &PlayerId::new("A")).await;
        assert_eq!(registry.room_count().await, 1);
        registry.leave(&room, &PlayerId::new("B")).await;
        assert_eq!(registry.room_count().await, 0);

        // Leaving a room that no longer exists is a no-op
        registry.leave(&room, &PlayerId::new("B")).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_playing_room_destroyed_stops_timers() {
        let (broadcaster, registry) = setup(fast_config());
        let a = connect(&broadcaster, 1);
        let b = connect(&broadcaster, 2);
        let room = RoomId::new("3");
        seat(&registry, "3", "A", &a).await;
        seat(&registry, "3", "B", &b).await;
        registry.toggle_ready(&room, &PlayerId::new("A")).await.unwrap();
        registry.toggle_ready(&room, &PlayerId::new("B")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;

        registry.disconnect(a.conn).await;
        registry.disconnect(b.conn).await;
        assert_eq!(registry.room_count().await, 0);

        // Timers must not resurrect anything
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_survives_old_socket_close() {
        let (broadcaster, registry) = setup(fast_config());
        let old = connect(&broadcaster, 1);
        let other = connect(&broadcaster, 2);
        let mut fresh = connect(&broadcaster, 3);
        seat(&registry, "8", "A", &old).await;
        seat(&registry, "8", "B", &other).await;

        seat(&registry, "8", "A", &fresh).await;
        match fresh.drain().as_slice() {
            [ServerMessage::RoomUpdate(update)] => assert_eq!(update.players.len(), 2),
            other => panic!("expected a snapshot, got {:?}", other),
        }

        registry.disconnect(old.conn).await;
        let snapshot = registry.snapshot(&RoomId::new("8")).await.unwrap();
        assert_eq!(snapshot.players.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_room_rejected() {
        let (_broadcaster, registry) = setup(fast_config());
        let err = registry
            .toggle_ready(&RoomId::new("nowhere"), &PlayerId::new("A"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownRoom);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_has_no_broadcast() {
        let (broadcaster, registry) = setup(fast_config());
        let mut a = connect(&broadcaster, 1);
        let b = connect(&broadcaster, 2);
        let room = RoomId::new("10");
        seat(&registry, "10", "A", &a).await;
        seat(&registry, "10", "B", &b).await;
        a.drain();

        let err = registry.buzz(&room, &PlayerId::new("A")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::WrongMode);
        assert!(a.drain().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_buzzes_pick_one_holder() {
        const PLAYERS: u64 = 8;
        let config = RoomConfig {
            counting_delay: Duration::ZERO,
            ..fast_config()
        };
        let (broadcaster, registry) = setup(config);
        let registry = Arc::new(registry);
        let room = RoomId::new("2");

        let mut clients = Vec::new();
        for i in 0..PLAYERS {
            let client = connect(&broadcaster, i + 1);
            seat(&registry, "2", &format!("p{}", i), &client).await;
            clients.push(client);
        }
        for i in 0..PLAYERS {
            registry.toggle_ready(&room, &PlayerId::new(format!("p{}", i))).await.unwrap();
        }
        assert_eq!(status(&registry, "2").await, RoomStatus::Playing);

        let start = Arc::new(tokio::sync::Barrier::new(PLAYERS as usize));
        let mut handles = Vec::new();
        for i in 0..PLAYERS {
            let registry = registry.clone();
            let room = room.clone();
            let start = start.clone();
            handles.push(tokio::spawn(async move {
                let player = PlayerId::new(format!("p{}", i));
                start.wait().await;
                (player.clone(), registry.buzz(&room, &player).await)
            }));
        }

        let mut winners = Vec::new();
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                (player, Ok(())) => winners.push(player),
                (_, Err(SessionError::Room(RoomError::AlreadyGrabbed(_)))) => rejected += 1,
                (player, Err(e)) => panic!("unexpected rejection for {}: {}", player, e),
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(rejected, PLAYERS - 1);

        let snapshot = registry.snapshot(&room).await.unwrap();
        assert_eq!(snapshot.grabbed_by.as_deref(), Some(winners[0].as_str()));
        assert_eq!(snapshot.time_left, fast_config().buzz_secs);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_sweep_does_not_block_joins() {
        let (broadcaster, registry) = setup(fast_config());
        let registry = Arc::new(registry);
        let a = connect(&broadcaster, 1);
        let b = connect(&broadcaster, 2);
        seat(&registry, "7", "A", &a).await;
        seat(&registry, "8", "B", &b).await;

        let busy = registry.get_room(&RoomId::new("7")).await.unwrap();
        let guard = busy.lock().await;

        let sweeping = registry.clone();
        let sweep = tokio::spawn(async move { sweeping.disconnect(ConnectionId(2)).await });
        tokio::task::yield_now().await;

        let c = connect(&broadcaster, 3);
        let joined = tokio::time::timeout(Duration::from_secs(1), seat(&registry, "9", "C", &c)).await;
        assert!(joined.is_ok(), "join waited on a busy room");

        drop(guard);
        sweep.await.unwrap();
        assert!(registry.snapshot(&RoomId::new("8")).await.is_none());
        assert!(registry.snapshot(&RoomId::new("7")).await.is_some());
        assert_eq!(registry.room_count().await, 2);
    }
}
