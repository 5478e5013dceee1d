use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::BookingError;

/// Unix milliseconds, used for record timestamps.
pub type Ms = i64;

/// Room identity. Rooms are numbered by the property (e.g. 101).
pub type RoomId = u32;

pub type ReservationId = Ulid;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Half-open interval of dates `[start, end)`: a stay arrives on `start` and leaves on `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "SpanRecord")]
pub struct Span {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct SpanRecord {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<SpanRecord> for Span {
    type Error = BookingError;

    fn try_from(record: SpanRecord) -> Result<Self, Self::Error> {
        Span::new(record.start, record.end)
    }
}

impl Span {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, BookingError> {
        if start >= end {
            return Err(BookingError::InvalidRange);
        }
        Ok(Self { start, end })
    }

    /// For bounds derived from spans already validated, e.g. clipping to a window.
    pub(crate) fn between(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "empty span {start}..{end}");
        Self { start, end }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Checkout on the day of the next check-in is not an overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_date(&self, d: NaiveDate) -> bool {
        self.start <= d && d < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Why a room is blocked. Static reference data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Restriction {
    Reservation,
    OwnerBlock,
}

impl Restriction {
    pub fn id(self) -> u32 {
        match self {
            Restriction::Reservation => 1,
            Restriction::OwnerBlock => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Restriction::Reservation => "Reservation",
            Restriction::OwnerBlock => "Owner Block",
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(Restriction::Reservation),
            2 => Some(Restriction::OwnerBlock),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub guest: Guest,
    pub room_id: RoomId,
    pub span: Span,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// A booking request as handed over by the presentation layer: parsed, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub guest: Guest,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// One reason a room is occupied for an interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRestriction {
    pub id: Ulid,
    pub room_id: RoomId,
    pub restriction: Restriction,
    pub reservation_id: Option<ReservationId>,
    pub span: Span,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// All restrictions on this room, sorted by `span.start`. Pairwise non-overlapping.
    pub restrictions: Vec<RoomRestriction>,
    pub reservations: HashMap<ReservationId, Reservation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            restrictions: Vec::new(),
            reservations: HashMap::new(),
        }
    }

    /// Insert restriction maintaining sort order by span.start.
    pub fn insert_restriction(&mut self, restriction: RoomRestriction) {
        let pos = self
            .restrictions
            .binary_search_by_key(&restriction.span.start(), |r| r.span.start())
            .unwrap_or_else(|e| e);
        self.restrictions.insert(pos, restriction);
    }

    pub fn remove_restriction(&mut self, id: Ulid) -> Option<RoomRestriction> {
        let pos = self.restrictions.iter().position(|r| r.id == id)?;
        Some(self.restrictions.remove(pos))
    }

    /// Remove a reservation together with the restriction that blocks its dates.
    pub fn remove_reservation(&mut self, id: ReservationId) -> Option<Reservation> {
        let reservation = self.reservations.remove(&id)?;
        self.restrictions.retain(|r| r.reservation_id != Some(id));
        Some(reservation)
    }

    /// Restrictions whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &RoomRestriction> {
        let right_bound = self
            .restrictions
            .partition_point(|r| r.span.start() < query.end());
        self.restrictions[..right_bound]
            .iter()
            .filter(move |r| r.span.end() > query.start())
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomRenamed {
        id: RoomId,
        name: String,
        updated_at: Ms,
    },
    /// Reservation and its restriction travel in one record so replay sees both or neither.
    ReservationCommitted {
        reservation: Reservation,
        restriction: RoomRestriction,
    },
    ReservationCancelled {
        id: ReservationId,
        room_id: RoomId,
    },
    GuestUpdated {
        id: ReservationId,
        room_id: RoomId,
        guest: Guest,
        updated_at: Ms,
    },
    BlockPlaced {
        restriction: RoomRestriction,
    },
    BlockLifted {
        id: Ulid,
        room_id: RoomId,
    },
}

impl Event {
    pub fn room_id(&self) -> RoomId {
        match self {
            Event::RoomCreated { room } => room.id,
            Event::RoomRenamed { id, .. } => *id,
            Event::ReservationCommitted { reservation, .. } => reservation.room_id,
            Event::ReservationCancelled { room_id, .. }
            | Event::GuestUpdated { room_id, .. }
            | Event::BlockLifted { room_id, .. } => *room_id,
            Event::BlockPlaced { restriction } => restriction.room_id,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn span_rejects_empty_and_inverted() {
        let d = date("2024-05-01");
        assert!(matches!(Span::new(d, d), Err(BookingError::InvalidRange)));
        assert!(matches!(
            Span::new(date("2024-05-03"), d),
            Err(BookingError::InvalidRange)
        ));
    }

    #[test]
    fn span_decoding_validates() {
        let inverted = r#"{"start":"2024-05-03","end":"2024-05-01"}"#;
        assert!(serde_json::from_str::<Span>(inverted).is_err());

        let s: Span = serde_json::from_str(r#"{"start":"2024-05-01","end":"2024-05-03"}"#).unwrap();
        assert_eq!((s.start(), s.end()), (date("2024-05-01"), date("2024-05-03")));
        assert_eq!(serde_json::to_string(&s).unwrap(), r#"{"start":"2024-05-01","end":"2024-05-03"}"#);
    }

    #[test]
    fn span_basics() {
        let s = span("2024-05-01", "2024-05-04");
        assert_eq!(s.nights(), 3);
        assert!(s.contains_date(date("2024-05-01")));
        assert!(s.contains_date(date("2024-05-03")));
        assert!(!s.contains_date(date("2024-05-04"))); // half-open
        assert_eq!(s.to_string(), "[2024-05-01, 2024-05-04)");
    }

    #[test]
    fn adjacent_stays_do_not_overlap() {
        let a = span("2024-05-01", "2024-05-03");
        let b = span("2024-05-03", "2024-05-05");
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn true_overlap_detected() {
        let a = span("2024-05-01", "2024-05-03");
        let b = span("2024-05-02", "2024-05-04");
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn span_contains_span() {
        let outer = span("2024-05-01", "2024-05-10");
        assert!(outer.contains_span(&span("2024-05-02", "2024-05-05")));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&span("2024-04-30", "2024-05-02")));
    }

    #[test]
    fn restriction_reference_data() {
        assert_eq!(Restriction::Reservation.id(), 1);
        assert_eq!(Restriction::OwnerBlock.name(), "Owner Block");
        assert_eq!(Restriction::from_id(2), Some(Restriction::OwnerBlock));
        assert_eq!(Restriction::from_id(7), None);
    }

    #[test]
    fn restrictions_kept_sorted() {
        let mut rs = RoomState::new(room(1));
        rs.insert_restriction(block(1, span("2024-05-20", "2024-05-22")));
        rs.insert_restriction(block(1, span("2024-05-01", "2024-05-03")));
        rs.insert_restriction(block(1, span("2024-05-10", "2024-05-12")));
        let starts: Vec<_> = rs.restrictions.iter().map(|r| r.span.start()).collect();
        assert_eq!(
            starts,
            vec![date("2024-05-01"), date("2024-05-10"), date("2024-05-20")]
        );
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = RoomState::new(room(1));
        rs.insert_restriction(block(1, span("2024-05-01", "2024-05-03")));
        rs.insert_restriction(block(1, span("2024-05-09", "2024-05-12")));
        rs.insert_restriction(block(1, span("2024-06-01", "2024-06-05")));

        let hits: Vec<_> = rs.overlapping(&span("2024-05-10", "2024-05-20")).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, span("2024-05-09", "2024-05-12"));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = RoomState::new(room(1));
        rs.insert_restriction(block(1, span("2024-05-01", "2024-05-03")));
        assert_eq!(rs.overlapping(&span("2024-05-03", "2024-05-05")).count(), 0);
        assert_eq!(rs.overlapping(&span("2024-04-28", "2024-05-01")).count(), 0);
    }

    #[test]
    fn remove_reservation_drops_its_restriction() {
        let mut rs = RoomState::new(room(7));
        let reservation = Reservation {
            id: Ulid::new(),
            guest: guest("Ada"),
            room_id: 7,
            span: span("2024-05-01", "2024-05-03"),
            created_at: 0,
            updated_at: 0,
        };
        let mut restriction = block(7, reservation.span);
        restriction.restriction = Restriction::Reservation;
        restriction.reservation_id = Some(reservation.id);
        rs.reservations.insert(reservation.id, reservation.clone());
        rs.insert_restriction(restriction);
        rs.insert_restriction(block(7, span("2024-05-10", "2024-05-11")));

        assert_eq!(rs.remove_reservation(reservation.id), Some(reservation));
        assert_eq!(rs.restrictions.len(), 1);
        assert_eq!(rs.restrictions[0].restriction, Restriction::OwnerBlock);
        assert!(rs.remove_reservation(Ulid::new()).is_none());
    }

    #[test]
    fn remove_nonexistent_restriction_returns_none() {
        let mut rs = RoomState::new(room(1));
        rs.insert_restriction(block(1, span("2024-05-01", "2024-05-03")));
        assert!(rs.remove_restriction(Ulid::new()).is_none());
        assert_eq!(rs.restrictions.len(), 1);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BlockPlaced {
            restriction: block(3, span("2024-07-01", "2024-07-04")),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.room_id(), 3);
    }
}
