//! Availability engine: pure overlap logic plus a read-only service over the store.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::BookingError;
use crate::limits::MAX_STAY_NIGHTS;
use crate::model::*;
use crate::storage::Store;

pub(crate) fn validate_stay(span: &Span) -> Result<(), BookingError> {
    if span.nights() > MAX_STAY_NIGHTS {
        return Err(BookingError::LimitExceeded("stay too long"));
    }
    Ok(())
}

/// First restriction overlapping `span`, if any.
pub fn find_conflict<'a>(
    restrictions: impl IntoIterator<Item = &'a RoomRestriction>,
    span: &Span,
) -> Option<&'a RoomRestriction> {
    restrictions.into_iter().find(|r| r.span.overlaps(span))
}

/// Single-room check against a locked (or snapshotted) room.
pub fn check_room(rs: &RoomState, span: &Span) -> Result<(), BookingError> {
    match find_conflict(rs.overlapping(span), span) {
        Some(conflict) => Err(BookingError::RoomUnavailable {
            room_id: rs.room.id,
            conflicting: conflict.id,
        }),
        None => Ok(()),
    }
}

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start() <= last.end()
        {
            *last = Span::between(last.start(), last.end().max(span.end()));
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both sorted by start; `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start();

        while ri < to_remove.len() && to_remove[ri].end() <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start() < b.end() {
            let r = &to_remove[j];
            if r.start() > current_start {
                result.push(Span::between(current_start, r.start()));
            }
            current_start = current_start.max(r.end());
            j += 1;
        }

        if current_start < b.end() {
            result.push(Span::between(current_start, b.end()));
        }
    }

    result
}

/// Read-only availability queries. Each room is read under its shared lock, so a
/// search may be slightly stale across rooms; commits re-check under the write lock.
pub struct Availability {
    store: Arc<Store>,
}

impl Availability {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn is_room_available(
        &self,
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, BookingError> {
        let span = Span::new(start, end)?;
        let restrictions = self.store.query_restrictions(room_id, &span).await?;
        Ok(find_conflict(&restrictions, &span).is_none())
    }

    /// Every room with no restriction overlapping `[start, end)`, ascending by id.
    pub async fn search_available_rooms(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RoomId>, BookingError> {
        let span = Span::new(start, end)?;
        let started = std::time::Instant::now();

        let mut free = Vec::new();
        for room_id in self.store.room_ids() {
            let restrictions = match self.store.query_restrictions(room_id, &span).await {
                Ok(r) => r,
                // Deleted between listing and reading.
                Err(BookingError::RoomNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if find_conflict(&restrictions, &span).is_none() {
                free.push(room_id);
            }
        }

        metrics::histogram!(crate::observability::SEARCH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        tracing::debug!("search {span}: {} of {} rooms free", free.len(), self.store.room_count());
        Ok(free)
    }

    /// Candidate selection among several free rooms: the lowest room id wins.
    pub async fn first_available_room(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<RoomId>, BookingError> {
        Ok(self.search_available_rooms(start, end).await?.first().copied())
    }

    /// Free gaps of one room inside the window `[start, end)`.
    pub async fn free_spans(
        &self,
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Span>, BookingError> {
        let window = Span::new(start, end)?;
        let taken: Vec<Span> = self
            .store
            .query_restrictions(room_id, &window)
            .await?
            .iter()
            .map(|r| {
                Span::between(
                    r.span.start().max(window.start()),
                    r.span.end().min(window.end()),
                )
            })
            .collect();
        Ok(subtract_intervals(&[window], &merge_overlapping(&taken)))
    }
}
