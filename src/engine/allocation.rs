use std::sync::Arc;

use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::validate::{non_blank, now_ms, validate_occupant, validate_patch};
use super::{run_detached, Engine, EngineError};

impl Engine {
    /// Claim a free bed for a new occupant. `user_id` defaults to the staff sentinel.
    pub async fn reserve(
        self: &Arc<Self>,
        coordinate: Coordinate,
        occupant: Occupant,
        user_id: Option<String>,
    ) -> Result<Booking, EngineError> {
        let engine = self.clone();
        run_detached("reserve", async move {
            engine.reserve_inner(coordinate, occupant, user_id).await
        })
        .await
    }

    async fn reserve_inner(
        &self,
        coordinate: Coordinate,
        occupant: Occupant,
        user_id: Option<String>,
    ) -> Result<Booking, EngineError> {
        validate_occupant(&occupant)?;
        self.check_coordinate(&coordinate)?;
        let mut cell = self
            .store
            .lock_cell(coordinate)
            .await
            .ok_or(EngineError::InvalidCoordinate(coordinate))?;
        if let Some(holder) = *cell {
            return Err(EngineError::Conflict(holder));
        }

        let now = now_ms();
        let booking = Booking {
            id: Ulid::new(),
            coordinate,
            occupant,
            user_id: non_blank(user_id).unwrap_or_else(|| STAFF_USER_ID.to_string()),
            amount_paid: 0,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingReserved {
            booking: booking.clone(),
        };
        self.wal_append(&event).await?;

        *cell = Some(booking.id);
        self.store.insert_booking(booking.clone());
        self.store.mark_occupied(coordinate, booking.id);
        drop(cell);

        info!("reserved {coordinate} for booking {}", booking.id);
        self.publish_occupancy();
        self.notify.send(&event);
        Ok(booking)
    }

    /// Move a booking to another bed. The old bed is freed in the same step.
    pub async fn shift(self: &Arc<Self>, id: Ulid, target: Coordinate) -> Result<Booking, EngineError> {
        let engine = self.clone();
        run_detached("shift", async move { engine.shift_inner(id, target).await }).await
    }

    async fn shift_inner(&self, id: Ulid, target: Coordinate) -> Result<Booking, EngineError> {
        let mut booking = self.lock_booking(id).await?;
        self.check_coordinate(&target)?;
        let from = booking.coordinate;
        if from == target {
            return Ok(booking.clone());
        }

        let (mut source, dest) = self.store.lock_pair(from, target).await;
        let mut dest = dest.ok_or(EngineError::InvalidCoordinate(target))?;
        if let Some(holder) = *dest {
            return Err(EngineError::Conflict(holder));
        }

        let at = now_ms();
        let event = Event::BookingShifted { id, from, to: target, at };
        self.wal_append(&event).await?;

        *dest = Some(id);
        if let Some(source) = source.as_mut() {
            **source = None;
        }
        booking.coordinate = target;
        booking.updated_at = at;
        self.store.mark_moved(&from, target, id);
        drop(dest);
        drop(source);

        info!("shifted booking {id} from {from} to {target}");
        self.notify.send(&event);
        Ok(booking.clone())
    }

    /// Remove a booking and free its bed. Payments already recorded stay in the ledger.
    pub async fn release(self: &Arc<Self>, id: Ulid) -> Result<(), EngineError> {
        let engine = self.clone();
        run_detached("release", async move { engine.release_inner(id).await }).await
    }

    async fn release_inner(&self, id: Ulid) -> Result<(), EngineError> {
        let booking = self.lock_booking(id).await?;
        let coordinate = booking.coordinate;
        let mut cell = self.store.lock_cell(coordinate).await;

        let event = Event::BookingReleased { id, coordinate };
        self.wal_append(&event).await?;

        if let Some(cell) = cell.as_mut() {
            **cell = None;
        }
        self.store.remove_booking(&id);
        self.store.mark_free(&coordinate, id);
        drop(cell);
        drop(booking);

        info!("released booking {id} at {coordinate}");
        self.publish_occupancy();
        self.notify.send(&event);
        Ok(())
    }

    /// Change the occupant's contact details.
    pub async fn update(self: &Arc<Self>, id: Ulid, patch: BookingPatch) -> Result<Booking, EngineError> {
        let engine = self.clone();
        run_detached("update", async move { engine.update_inner(id, patch).await }).await
    }

    async fn update_inner(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, EngineError> {
        validate_patch(&patch)?;
        let mut booking = self.lock_booking(id).await?;

        let at = now_ms();
        let event = Event::BookingUpdated {
            id,
            patch: patch.clone(),
            at,
        };
        self.wal_append(&event).await?;

        patch.apply(&mut booking.occupant);
        booking.updated_at = at;
        self.notify.send(&event);
        Ok(booking.clone())
    }

    /// Free bed numbers of a room, ascending.
    ///
    /// Reads the occupancy index without locking, so the answer may be stale by
    /// the time the caller acts on it; Reserve re-checks under the bed lock.
    pub fn list_available(&self, floor: u32, room: u32) -> Result<Vec<u32>, EngineError> {
        let beds = self
            .topology
            .beds(floor, room)
            .ok_or(EngineError::InvalidCoordinate(Coordinate::new(floor, room, 0)))?;
        Ok(self
            .store
            .free_among(beds.map(move |bed| Coordinate::new(floor, room, bed)))
            .into_iter()
            .map(|c| c.bed)
            .collect())
    }

    pub async fn booking(&self, id: Ulid) -> Option<Booking> {
        let shared = self.store.get_booking(&id)?;
        let booking = shared.read().await.clone();
        Some(booking)
    }

    /// Every live booking, newest first.
    pub async fn bookings(&self) -> Vec<Booking> {
        let mut bookings = Vec::with_capacity(self.store.booking_count());
        for shared in self.store.all_bookings() {
            bookings.push(shared.read().await.clone());
        }
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        bookings
    }

    /// The booking holding `coordinate`, read under the bed lock.
    pub async fn occupant_at(&self, coordinate: Coordinate) -> Result<Option<Booking>, EngineError> {
        self.check_coordinate(&coordinate)?;
        let holder = {
            let cell = self
                .store
                .lock_cell(coordinate)
                .await
                .ok_or(EngineError::InvalidCoordinate(coordinate))?;
            *cell
        };
        Ok(match holder {
            Some(id) => self.booking(id).await,
            None => None,
        })
    }
}
