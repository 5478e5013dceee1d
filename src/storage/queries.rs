use ulid::Ulid;

use crate::error::BookingError;
use crate::model::*;

use super::Store;

impl Store {
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Every room id, ascending.
    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub async fn rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for id in self.room_ids() {
            if let Some(rs) = self.room(id) {
                rooms.push(rs.read().await.room.clone());
            }
        }
        rooms
    }

    /// Restrictions of `room_id` overlapping `span`, ordered by start date.
    pub async fn query_restrictions(
        &self,
        room_id: RoomId,
        span: &Span,
    ) -> Result<Vec<RoomRestriction>, BookingError> {
        let rs = self.room(room_id).ok_or(BookingError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.overlapping(span).cloned().collect())
    }

    pub async fn reservation(&self, id: Ulid) -> Result<Reservation, BookingError> {
        let room_id = self
            .room_for_entity(&id)
            .ok_or(BookingError::ReservationNotFound(id))?;
        let rs = self
            .room(room_id)
            .ok_or(BookingError::ReservationNotFound(id))?;
        let guard = rs.read().await;
        guard
            .reservations
            .get(&id)
            .cloned()
            .ok_or(BookingError::ReservationNotFound(id))
    }

    /// All reservations across rooms, ordered by arrival date then id.
    pub async fn reservations(&self) -> Vec<Reservation> {
        let mut all = Vec::new();
        for id in self.room_ids() {
            if let Some(rs) = self.room(id) {
                all.extend(rs.read().await.reservations.values().cloned());
            }
        }
        all.sort_by_key(|r| (r.span.start(), r.id));
        all
    }

    pub async fn room_reservations(&self, room_id: RoomId) -> Result<Vec<Reservation>, BookingError> {
        let rs = self.room(room_id).ok_or(BookingError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        let mut reservations: Vec<Reservation> = guard.reservations.values().cloned().collect();
        reservations.sort_by_key(|r| (r.span.start(), r.id));
        Ok(reservations)
    }
}
