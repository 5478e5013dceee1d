//! Reservation orchestrator: the only writer of room restrictions.
//!
//! A booking takes the room's write lock, re-runs the availability check under it,
//! commits reservation + restriction as one WAL record and only then queues mail.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::{json, Value};
use tokio::time::Instant;
use ulid::Ulid;

use crate::availability::{check_room, validate_stay};
use crate::config::{Config, MailConfig};
use crate::error::BookingError;
use crate::limits::MAX_GUEST_FIELD_LEN;
use crate::model::*;
use crate::notify::{template, Notification, Notifier};
use crate::observability::{failure_label, CANCELLATIONS_TOTAL, COMMIT_DURATION_SECONDS, RESERVATIONS_TOTAL};
use crate::storage::Store;

pub(crate) fn validate_guest(guest: &Guest) -> Result<(), BookingError> {
    let fields = [&guest.first_name, &guest.last_name, &guest.email, &guest.phone];
    if fields.iter().any(|f| f.len() > MAX_GUEST_FIELD_LEN) {
        return Err(BookingError::LimitExceeded("guest field too long"));
    }
    if guest.first_name.trim().is_empty() {
        return Err(BookingError::InvalidGuest("first name is required"));
    }
    if guest.last_name.trim().is_empty() {
        return Err(BookingError::InvalidGuest("last name is required"));
    }
    match guest.email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(BookingError::InvalidGuest("invalid email address")),
    }
}

pub struct Orchestrator {
    store: Arc<Store>,
    notifier: Arc<dyn Notifier>,
    mail: MailConfig,
    storage_timeout: Duration,
}

impl Orchestrator {
    pub fn new(store: Arc<Store>, notifier: Arc<dyn Notifier>, config: &Config) -> Self {
        Self {
            store,
            notifier,
            mail: config.mail.clone(),
            storage_timeout: config.storage_timeout,
        }
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.storage_timeout
    }

    pub async fn create_reservation(
        &self,
        request: NewReservation,
        room_id: RoomId,
    ) -> Result<ReservationId, BookingError> {
        self.create_reservation_within(request, room_id, self.storage_timeout)
            .await
    }

    /// Book `room_id` for the request's dates, giving up on storage after `timeout`.
    ///
    /// `RoomUnavailable` means another booking won the dates; search again rather
    /// than resubmitting.
    pub async fn create_reservation_within(
        &self,
        request: NewReservation,
        room_id: RoomId,
        timeout: Duration,
    ) -> Result<ReservationId, BookingError> {
        let started = std::time::Instant::now();
        let result = self.commit_reservation(request, room_id, Instant::now() + timeout).await;
        metrics::histogram!(COMMIT_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let (reservation, room_name) = match result {
            Ok(committed) => committed,
            Err(e) => {
                metrics::counter!(RESERVATIONS_TOTAL, "status" => failure_label(&e)).increment(1);
                if e.is_user_facing() {
                    tracing::info!("reservation for room {room_id} rejected: {e}");
                } else {
                    tracing::error!("reservation for room {room_id} failed: {e}");
                }
                return Err(e);
            }
        };

        metrics::counter!(RESERVATIONS_TOTAL, "status" => "committed").increment(1);
        tracing::info!(
            "reservation {} committed: room {room_id} {}",
            reservation.id,
            reservation.span
        );

        let data = mail_data(&reservation, &room_name);
        self.notify(Notification::new(
            &reservation.guest.email,
            &self.mail.from,
            "Reservation confirmation",
            template::CONFIRMATION,
            data.clone(),
        ));
        self.notify(Notification::new(
            &self.mail.staff,
            &self.mail.from,
            format!("New reservation: {room_name}"),
            template::STAFF_NOTICE,
            data,
        ));
        Ok(reservation.id)
    }

    async fn commit_reservation(
        &self,
        request: NewReservation,
        room_id: RoomId,
        deadline: Instant,
    ) -> Result<(Reservation, String), BookingError> {
        let span = Span::new(request.start, request.end)?;
        validate_stay(&span)?;
        validate_guest(&request.guest)?;

        let guard = self.store.lock_room(room_id, deadline).await?;
        // The search that led here may be stale; only this check counts.
        check_room(&guard, &span)?;

        let now = now_ms();
        let reservation = Reservation {
            id: Ulid::new(),
            guest: request.guest,
            room_id,
            span,
            created_at: now,
            updated_at: now,
        };
        let restriction = RoomRestriction {
            id: Ulid::new(),
            room_id,
            restriction: Restriction::Reservation,
            reservation_id: Some(reservation.id),
            span,
            created_at: now,
            updated_at: now,
        };
        let guard = self
            .store
            .insert_reservation_and_restriction(guard, reservation.clone(), restriction, deadline)
            .await?;
        Ok((reservation, guard.room.name.clone()))
    }

    /// Cancel a reservation; its dates become free in the same atomic step.
    pub async fn cancel_reservation(&self, id: ReservationId) -> Result<Reservation, BookingError> {
        let reservation = self
            .store
            .delete_reservation_and_restriction(id, self.deadline())
            .await
            .inspect_err(|e| tracing::warn!("cancel {id} failed: {e}"))?;
        metrics::counter!(CANCELLATIONS_TOTAL).increment(1);
        tracing::info!(
            "reservation {id} cancelled: room {} {}",
            reservation.room_id,
            reservation.span
        );

        let room_name = match self.store.room(reservation.room_id) {
            Some(rs) => rs.read().await.room.name.clone(),
            None => format!("room {}", reservation.room_id),
        };
        self.notify(Notification::new(
            &reservation.guest.email,
            &self.mail.from,
            "Reservation cancelled",
            template::CANCELLATION,
            mail_data(&reservation, &room_name),
        ));
        Ok(reservation)
    }

    /// Administrative hold on a room. Obeys the same no-overlap rule as bookings.
    pub async fn place_block(
        &self,
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Ulid, BookingError> {
        let span = Span::new(start, end)?;
        validate_stay(&span)?;
        let deadline = self.deadline();
        let guard = self.store.lock_room(room_id, deadline).await?;
        check_room(&guard, &span)?;

        let now = now_ms();
        let block = RoomRestriction {
            id: Ulid::new(),
            room_id,
            restriction: Restriction::OwnerBlock,
            reservation_id: None,
            span,
            created_at: now,
            updated_at: now,
        };
        let id = self.store.insert_block(guard, block, deadline).await?;
        tracing::info!("owner block {id} placed on room {room_id} {span}");
        Ok(id)
    }

    pub async fn lift_block(&self, id: Ulid) -> Result<RoomRestriction, BookingError> {
        let block = self.store.delete_block(id, self.deadline()).await?;
        tracing::info!("owner block {id} lifted from room {} {}", block.room_id, block.span);
        Ok(block)
    }

    /// Staff edit of a reservation's contact details. Dates and room are fixed.
    pub async fn update_guest(&self, id: ReservationId, guest: Guest) -> Result<Reservation, BookingError> {
        validate_guest(&guest)?;
        let reservation = self.store.update_guest(id, guest, self.deadline()).await?;
        tracing::info!("reservation {id}: guest details updated");
        Ok(reservation)
    }

    pub async fn reservation(&self, id: ReservationId) -> Result<Reservation, BookingError> {
        self.store.reservation(id).await
    }

    /// All reservations, earliest arrival first.
    pub async fn reservations(&self) -> Vec<Reservation> {
        self.store.reservations().await
    }

    /// Mail is best effort: a refused notification never undoes a booking.
    fn notify(&self, notification: Notification) {
        let recipient = notification.recipient.clone();
        if let Err(e) = self.notifier.notify(notification) {
            tracing::warn!("notification to {recipient} not queued: {e}");
        }
    }
}

fn mail_data(reservation: &Reservation, room_name: &str) -> Value {
    json!({
        "reservation_id": reservation.id.to_string(),
        "first_name": reservation.guest.first_name,
        "last_name": reservation.guest.last_name,
        "email": reservation.guest.email,
        "phone": reservation.guest.phone,
        "room": room_name,
        "start": reservation.span.start().to_string(),
        "end": reservation.span.end().to_string(),
        "nights": reservation.span.nights(),
    })
}
