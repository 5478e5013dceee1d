use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, RwLock};
use tokio::time::Instant;
use ulid::Ulid;

use crate::error::BookingError;
use crate::limits::*;
use crate::model::*;

use super::{RoomGuard, Store, WalCommand};

/// Catalog edits are admin-driven and only wait on the WAL writer.
const CATALOG_TIMEOUT: Duration = Duration::from_secs(30);

fn validate_room_name(name: &str) -> Result<(), BookingError> {
    if name.len() > MAX_NAME_LEN {
        return Err(BookingError::LimitExceeded("room name too long"));
    }
    Ok(())
}

impl Store {
    pub async fn create_room(&self, id: RoomId, name: String) -> Result<Room, BookingError> {
        validate_room_name(&name)?;
        let catalog = self.catalog.clone().lock_owned().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(BookingError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&id) {
            return Err(BookingError::RoomExists(id));
        }

        let now = now_ms();
        let room = Room { id, name, created_at: now, updated_at: now };
        let deadline = Instant::now() + CATALOG_TIMEOUT;
        let rooms = self.rooms.clone();
        let state = Arc::new(RwLock::new(RoomState::new(room.clone())));
        self.commit(Event::RoomCreated { room: room.clone() }, deadline, move |_| {
            rooms.insert(id, state);
            metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(rooms.len() as f64);
            drop(catalog);
        })
        .await?;
        tracing::info!("room {id} created: {}", room.name);
        Ok(room)
    }

    pub async fn rename_room(
        &self,
        id: RoomId,
        name: String,
        deadline: Instant,
    ) -> Result<Room, BookingError> {
        validate_room_name(&name)?;
        let guard = self.lock_room(id, deadline).await?;
        let event = Event::RoomRenamed { id, name, updated_at: now_ms() };
        let guard = self.persist_and_apply(guard, event, deadline).await?;
        Ok(guard.room.clone())
    }

    /// Persist a reservation and the restriction blocking its dates as one record.
    ///
    /// The caller passes in the room's write guard after checking for overlap
    /// under it; this only enforces the structural limits. The guard comes back
    /// once the record is durable and applied.
    pub(crate) async fn insert_reservation_and_restriction(
        &self,
        guard: RoomGuard,
        reservation: Reservation,
        restriction: RoomRestriction,
        deadline: Instant,
    ) -> Result<RoomGuard, BookingError> {
        debug_assert_eq!(restriction.reservation_id, Some(reservation.id));
        debug_assert_eq!(restriction.span, reservation.span);
        if guard.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(BookingError::LimitExceeded("too many restrictions on room"));
        }
        let event = Event::ReservationCommitted { reservation, restriction };
        self.persist_and_apply(guard, event, deadline).await
    }

    /// Remove a reservation and its restriction as one record, freeing the dates.
    pub(crate) async fn delete_reservation_and_restriction(
        &self,
        id: ReservationId,
        deadline: Instant,
    ) -> Result<Reservation, BookingError> {
        let guard = self
            .lock_entity_room(&id, deadline)
            .await?
            .ok_or(BookingError::ReservationNotFound(id))?;
        // Re-read under the lock: a concurrent cancel may have won.
        let reservation = guard
            .reservations
            .get(&id)
            .cloned()
            .ok_or(BookingError::ReservationNotFound(id))?;
        let event = Event::ReservationCancelled { id, room_id: reservation.room_id };
        self.persist_and_apply(guard, event, deadline).await?;
        Ok(reservation)
    }

    pub(crate) async fn update_guest(
        &self,
        id: ReservationId,
        guest: Guest,
        deadline: Instant,
    ) -> Result<Reservation, BookingError> {
        let guard = self
            .lock_entity_room(&id, deadline)
            .await?
            .ok_or(BookingError::ReservationNotFound(id))?;
        let room_id = match guard.reservations.get(&id) {
            Some(r) => r.room_id,
            None => return Err(BookingError::ReservationNotFound(id)),
        };
        let event = Event::GuestUpdated { id, room_id, guest, updated_at: now_ms() };
        let guard = self.persist_and_apply(guard, event, deadline).await?;
        guard
            .reservations
            .get(&id)
            .cloned()
            .ok_or(BookingError::ReservationNotFound(id))
    }

    /// Caller passes in the room's write guard after checking for overlap under it.
    pub(crate) async fn insert_block(
        &self,
        guard: RoomGuard,
        restriction: RoomRestriction,
        deadline: Instant,
    ) -> Result<Ulid, BookingError> {
        debug_assert!(restriction.reservation_id.is_none());
        if guard.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(BookingError::LimitExceeded("too many restrictions on room"));
        }
        let id = restriction.id;
        self.persist_and_apply(guard, Event::BlockPlaced { restriction }, deadline)
            .await?;
        Ok(id)
    }

    pub(crate) async fn delete_block(
        &self,
        id: Ulid,
        deadline: Instant,
    ) -> Result<RoomRestriction, BookingError> {
        let guard = self
            .lock_entity_room(&id, deadline)
            .await?
            .ok_or(BookingError::BlockNotFound(id))?;
        // Reservation restrictions only go away with their reservation.
        let block = guard
            .restrictions
            .iter()
            .find(|r| r.id == id && r.reservation_id.is_none())
            .cloned()
            .ok_or(BookingError::BlockNotFound(id))?;
        let event = Event::BlockLifted { id, room_id: block.room_id };
        self.persist_and_apply(guard, event, deadline).await?;
        Ok(block)
    }

    /// Rewrite the WAL with just the events that recreate the current state.
    ///
    /// Holds the catalog lock and a read lock on every room while snapshotting and
    /// swapping, so no append can land in the old file after the snapshot was taken.
    pub async fn compact_wal(&self) -> Result<usize, BookingError> {
        let _catalog = self.catalog.lock().await;
        let mut rooms: Vec<_> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        rooms.sort_by_key(|(id, _)| *id);

        let mut guards = Vec::with_capacity(rooms.len());
        for (_, rs) in &rooms {
            guards.push(rs.clone().read_owned().await);
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::RoomCreated { room: guard.room.clone() });
            for restriction in &guard.restrictions {
                match restriction.reservation_id {
                    Some(reservation_id) => match guard.reservations.get(&reservation_id) {
                        Some(reservation) => events.push(Event::ReservationCommitted {
                            reservation: reservation.clone(),
                            restriction: restriction.clone(),
                        }),
                        None => tracing::warn!(
                            "compact: restriction {} references missing reservation {reservation_id}",
                            restriction.id
                        ),
                    },
                    None => events.push(Event::BlockPlaced { restriction: restriction.clone() }),
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| BookingError::Storage(std::io::Error::other("WAL writer shut down")))?;
        rx.await
            .map_err(|_| BookingError::Storage(std::io::Error::other("WAL writer dropped response")))??;
        drop(guards);
        tracing::info!("wal compacted to {count} events");
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
