//! Storage gateway: the room catalog, reservations and restrictions, kept in memory
//! and made durable through a group-committed write-ahead log.
//!
//! Every room sits behind its own `RwLock`. Writers hold the room's write guard
//! across check, WAL append and in-memory apply, which is the transactional scope
//! for a booking. Readers take the read guard and see a consistent per-room snapshot.
//!
//! Once an event is handed to the WAL writer the guard moves into a detached task
//! that waits for the fsync and applies the event. Dropping the caller's future
//! after that point cannot leave the log ahead of memory.

mod mutations;
mod queries;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tokio::time::Instant;
use ulid::Ulid;

use crate::error::BookingError;
use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// Exclusive hold on one room. Dropping it ends the room's transactional scope.
pub type RoomGuard = OwnedRwLockWriteGuard<RoomState>;

const WAL_CHANNEL_CAPACITY: usize = 4096;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Takes the first append, drains whatever else is already queued,
/// then syncs the whole batch once and answers every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("wal flush of {} events failed: {e}", batch.len());
        }
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }

        // Commands that arrived behind the batch run only after it is durable.
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    tracing::debug!("wal writer stopped");
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so partial bytes don't leak into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Apply an event to a room. Caller holds the room's write lock.
fn apply_to_room(rs: &mut RoomState, event: &Event, entity_map: &DashMap<Ulid, RoomId>) {
    match event {
        Event::RoomRenamed { name, updated_at, .. } => {
            rs.room.name = name.clone();
            rs.room.updated_at = *updated_at;
        }
        Event::ReservationCommitted { reservation, restriction } => {
            entity_map.insert(reservation.id, reservation.room_id);
            entity_map.insert(restriction.id, restriction.room_id);
            rs.reservations.insert(reservation.id, reservation.clone());
            rs.insert_restriction(restriction.clone());
        }
        Event::ReservationCancelled { id, .. } => {
            if rs.reservations.contains_key(id) {
                for r in rs.restrictions.iter().filter(|r| r.reservation_id == Some(*id)) {
                    entity_map.remove(&r.id);
                }
                rs.remove_reservation(*id);
            }
            entity_map.remove(id);
        }
        Event::GuestUpdated { id, guest, updated_at, .. } => {
            if let Some(reservation) = rs.reservations.get_mut(id) {
                reservation.guest = guest.clone();
                reservation.updated_at = *updated_at;
            }
        }
        Event::BlockPlaced { restriction } => {
            entity_map.insert(restriction.id, restriction.room_id);
            rs.insert_restriction(restriction.clone());
        }
        Event::BlockLifted { id, .. } => {
            rs.remove_restriction(*id);
            entity_map.remove(id);
        }
        // Catalog-level; handled on the room map, not inside a room.
        Event::RoomCreated { .. } => {}
    }
}

/// Restriction already on the room that a logged reservation or block would overlap.
fn replay_conflict(rs: &RoomState, event: &Event) -> Option<Ulid> {
    let restriction = match event {
        Event::ReservationCommitted { restriction, .. } | Event::BlockPlaced { restriction } => restriction,
        _ => return None,
    };
    rs.overlapping(&restriction.span).next().map(|r| r.id)
}

pub struct Store {
    rooms: Arc<DashMap<RoomId, SharedRoomState>>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation / restriction id → room id
    entity_to_room: Arc<DashMap<Ulid, RoomId>>,
    /// Serializes catalog changes and compaction snapshots.
    catalog: Arc<Mutex<()>>,
}

impl Store {
    /// Replay the WAL at `wal_path` and spawn its writer task. Must run inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            rooms: Arc::new(DashMap::new()),
            wal_tx,
            entity_to_room: Arc::new(DashMap::new()),
            catalog: Arc::new(Mutex::new(())),
        };

        // Sole owner of every Arc here, so try_write never contends.
        let mut skipped = 0usize;
        for event in &events {
            match event {
                Event::RoomCreated { room } => {
                    if store.rooms.contains_key(&room.id) {
                        tracing::warn!("wal replay: room {} created twice, keeping the first", room.id);
                        skipped += 1;
                        continue;
                    }
                    store
                        .rooms
                        .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                other => {
                    let Some(rs) = store.room(other.room_id()) else {
                        tracing::warn!("wal replay: event for unknown room {}", other.room_id());
                        skipped += 1;
                        continue;
                    };
                    let mut guard = rs
                        .try_write()
                        .map_err(|_| io::Error::other("wal replay: room locked"))?;
                    // The earlier of two overlapping records wins.
                    if let Some(existing) = replay_conflict(&guard, other) {
                        tracing::warn!(
                            "wal replay: dropping record on room {} that overlaps restriction {existing}",
                            other.room_id()
                        );
                        skipped += 1;
                        continue;
                    }
                    apply_to_room(&mut guard, other, &store.entity_to_room);
                }
            }
        }

        tracing::info!(
            "store opened: {} rooms, {} events replayed ({skipped} skipped) from {}",
            store.rooms.len(),
            events.len(),
            wal_path.display()
        );
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(store.rooms.len() as f64);
        Ok(store)
    }

    /// Hand an event to the WAL writer.
    ///
    /// Only this step is bounded by `deadline`: if it expires nothing was written.
    async fn wal_hand_off(
        &self,
        event: Event,
        deadline: Instant,
    ) -> Result<oneshot::Receiver<io::Result<()>>, BookingError> {
        let (tx, rx) = oneshot::channel();
        let cmd = WalCommand::Append { event, response: tx };
        tokio::time::timeout_at(deadline, self.wal_tx.send(cmd))
            .await
            .map_err(|_| BookingError::StorageTimeout)?
            .map_err(|_| BookingError::Storage(io::Error::other("WAL writer shut down")))?;
        Ok(rx)
    }

    /// Append `event` and run `finish` once it is durable.
    ///
    /// Everything after the hand-off runs on its own task and completes even if
    /// the caller stops polling. `finish` owns whatever lock it needs, so the lock
    /// is held until the event is applied.
    async fn commit<T, F>(&self, event: Event, deadline: Instant, finish: F) -> Result<T, BookingError>
    where
        T: Send + 'static,
        F: FnOnce(&Event) -> T + Send + 'static,
    {
        let durable = self.wal_hand_off(event.clone(), deadline).await?;
        tokio::spawn(async move {
            durable
                .await
                .map_err(|_| BookingError::Storage(io::Error::other("WAL writer dropped response")))?
                .map_err(BookingError::Storage)?;
            Ok::<T, BookingError>(finish(&event))
        })
        .await
        .map_err(|e| BookingError::Storage(io::Error::other(format!("commit task failed: {e}"))))?
    }

    /// WAL-append then apply under the room's write guard, handing the guard back.
    pub(crate) async fn persist_and_apply(
        &self,
        mut guard: RoomGuard,
        event: Event,
        deadline: Instant,
    ) -> Result<RoomGuard, BookingError> {
        let entity_map = self.entity_to_room.clone();
        self.commit(event, deadline, move |event| {
            apply_to_room(&mut guard, event, &entity_map);
            guard
        })
        .await
    }

    pub fn room(&self, id: RoomId) -> Option<SharedRoomState> {
        self.rooms.get(&id).map(|e| e.value().clone())
    }

    pub fn room_for_entity(&self, entity_id: &Ulid) -> Option<RoomId> {
        self.entity_to_room.get(entity_id).map(|e| *e.value())
    }

    /// Take the room's write lock, waiting at most until `deadline`.
    pub async fn lock_room(&self, room_id: RoomId, deadline: Instant) -> Result<RoomGuard, BookingError> {
        let rs = self.room(room_id).ok_or(BookingError::RoomNotFound(room_id))?;
        tokio::time::timeout_at(deadline, rs.write_owned())
            .await
            .map_err(|_| BookingError::StorageTimeout)
    }

    /// Resolve a reservation or restriction id to its room and lock that room.
    pub(crate) async fn lock_entity_room(
        &self,
        entity_id: &Ulid,
        deadline: Instant,
    ) -> Result<Option<RoomGuard>, BookingError> {
        match self.room_for_entity(entity_id) {
            Some(room_id) => self.lock_room(room_id, deadline).await.map(Some),
            None => Ok(None),
        }
    }
}
