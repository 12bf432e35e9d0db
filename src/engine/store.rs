use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::topology::Topology;

pub type SharedBooking = Arc<RwLock<Booking>>;

/// Exclusive hold on one bed. `Some(id)` while a booking occupies it.
pub type CellGuard = OwnedMutexGuard<Option<Ulid>>;

/// Live occupancy: one mutex per bed, the bookings themselves, and a
/// lock-free index of which beds are taken.
///
/// The cell mutex is the source of truth for "is this bed free". The index is
/// written only while the matching cell is locked and is read without locks.
///
/// A shift touches two index entries. `moves_started`/`moves_finished` bracket
/// that pair of writes, and index readers retry until no move overlapped their
/// read, so nobody observes a booking on both beds or on neither.
pub struct OccupancyStore {
    cells: HashMap<Coordinate, Arc<Mutex<Option<Ulid>>>>,
    occupied: DashMap<Coordinate, Ulid>,
    moves_started: AtomicU64,
    moves_finished: AtomicU64,
    bookings: DashMap<Ulid, SharedBooking>,
}

/// Spins before an index reader starts yielding to a preempted mover.
const INDEX_READ_SPINS: u32 = 16;
/// Attempts before an index reader settles for a possibly mid-move view.
const INDEX_READ_ATTEMPTS: u32 = 4096;

impl OccupancyStore {
    /// Build cells for every bed in `topology` and seat the bookings of `snapshot`.
    pub fn load(topology: &Topology, snapshot: &Snapshot) -> Self {
        let mut holders: HashMap<Coordinate, Ulid> = HashMap::new();
        let bookings = DashMap::new();
        for booking in snapshot.bookings.values() {
            if !topology.contains(&booking.coordinate) {
                warn!(
                    "booking {} sits at {} which is outside the topology",
                    booking.id, booking.coordinate
                );
            } else if let Some(other) = holders.insert(booking.coordinate, booking.id) {
                warn!("bed {} claimed by both {other} and {}", booking.coordinate, booking.id);
            }
            bookings.insert(booking.id, Arc::new(RwLock::new(booking.clone())));
        }

        let cells = topology
            .coordinates()
            .map(|c| (c, Arc::new(Mutex::new(holders.get(&c).copied()))))
            .collect();
        let occupied = holders.into_iter().collect();

        Self {
            cells,
            occupied,
            moves_started: AtomicU64::new(0),
            moves_finished: AtomicU64::new(0),
            bookings,
        }
    }

    // ── Bed cells ────────────────────────────────────────────

    /// Lock one bed. `None` if the coordinate has no cell.
    pub async fn lock_cell(&self, coordinate: Coordinate) -> Option<CellGuard> {
        let cell = self.cells.get(&coordinate)?.clone();
        Some(cell.lock_owned().await)
    }

    /// Lock two distinct beds in coordinate order; guards come back as `(a, b)`.
    pub async fn lock_pair(
        &self,
        a: Coordinate,
        b: Coordinate,
    ) -> (Option<CellGuard>, Option<CellGuard>) {
        if a < b {
            let ga = self.lock_cell(a).await;
            let gb = self.lock_cell(b).await;
            (ga, gb)
        } else {
            let gb = self.lock_cell(b).await;
            let ga = self.lock_cell(a).await;
            (ga, gb)
        }
    }

    // ── Occupancy index ──────────────────────────────────────

    /// Run `read` against a view of the index that no shift was halfway through.
    ///
    /// Falls back to a plain read after `INDEX_READ_ATTEMPTS`; since a move
    /// marks its target before freeing its source, that view can only
    /// over-report occupancy.
    fn read_index<T>(&self, read: impl Fn(&DashMap<Coordinate, Ulid>) -> T) -> T {
        for attempt in 0..INDEX_READ_ATTEMPTS {
            let started = self.moves_started.load(Ordering::SeqCst);
            if started == self.moves_finished.load(Ordering::SeqCst) {
                let value = read(&self.occupied);
                if self.moves_started.load(Ordering::SeqCst) == started {
                    return value;
                }
            }
            if attempt < INDEX_READ_SPINS {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
        read(&self.occupied)
    }

    /// Which of `beds` are free, read as one consistent view.
    pub fn free_among(&self, beds: impl Iterator<Item = Coordinate> + Clone) -> Vec<Coordinate> {
        self.read_index(|occupied| beds.clone().filter(|c| !occupied.contains_key(c)).collect())
    }

    pub fn mark_occupied(&self, coordinate: Coordinate, booking_id: Ulid) {
        self.occupied.insert(coordinate, booking_id);
    }

    pub fn mark_free(&self, coordinate: &Coordinate, booking_id: Ulid) {
        self.occupied.remove_if(coordinate, |_, holder| *holder == booking_id);
    }

    /// Move a booking's index entry from `from` to `to`. Both cells must be locked.
    pub fn mark_moved(&self, from: &Coordinate, to: Coordinate, booking_id: Ulid) {
        self.moves_started.fetch_add(1, Ordering::SeqCst);
        self.mark_occupied(to, booking_id);
        self.mark_free(from, booking_id);
        self.moves_finished.fetch_add(1, Ordering::SeqCst);
    }

    pub fn occupied_count(&self) -> usize {
        self.read_index(|occupied| occupied.len())
    }

    pub fn occupied_coordinates(&self) -> Vec<Coordinate> {
        self.read_index(|occupied| occupied.iter().map(|e| *e.key()).collect())
    }

    // ── Bookings ─────────────────────────────────────────────

    pub fn get_booking(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn insert_booking(&self, booking: Booking) {
        self.bookings.insert(booking.id, Arc::new(RwLock::new(booking)));
    }

    pub fn remove_booking(&self, id: &Ulid) {
        self.bookings.remove(id);
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn all_bookings(&self) -> Vec<SharedBooking> {
        self.bookings.iter().map(|e| e.value().clone()).collect()
    }
}

/// Plain, lock-free copy of engine state, rebuilt by folding WAL events.
///
/// `apply` is idempotent: replaying a record that already took effect (a
/// retried append that reached disk twice) leaves the state unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub bookings: HashMap<Ulid, Booking>,
    pub payments: HashMap<Ulid, Payment>,
}

impl Snapshot {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut snapshot = Self::default();
        for event in events {
            snapshot.apply(event);
        }
        snapshot
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::BookingReserved { booking } => {
                self.bookings.entry(booking.id).or_insert_with(|| booking.clone());
            }
            Event::BookingShifted { id, to, at, .. } => {
                if let Some(b) = self.bookings.get_mut(id) {
                    b.coordinate = *to;
                    b.updated_at = *at;
                }
            }
            Event::BookingUpdated { id, patch, at } => {
                if let Some(b) = self.bookings.get_mut(id) {
                    patch.apply(&mut b.occupant);
                    b.updated_at = *at;
                }
            }
            Event::BookingReleased { id, .. } => {
                self.bookings.remove(id);
            }
            Event::PaymentRecorded { payment } => {
                if self.payments.contains_key(&payment.id) {
                    return;
                }
                if let Some(b) = payment.booking_id.and_then(|bid| self.bookings.get_mut(&bid)) {
                    b.amount_paid = b.amount_paid.saturating_add(payment.amount);
                }
                self.payments.insert(payment.id, payment.clone());
            }
            Event::PaymentDeleted { id, booking_id } => {
                self.payments.remove(id);
                if let Some(bid) = booking_id {
                    let total = linked_total(self.payments.values(), *bid);
                    if let Some(b) = self.bookings.get_mut(bid) {
                        b.amount_paid = total;
                    }
                }
            }
        }
    }

    /// Minimal event sequence that rebuilds this state: every booking with a
    /// zero running total, then every payment, both oldest first.
    pub fn to_events(&self) -> Vec<Event> {
        let mut bookings: Vec<&Booking> = self.bookings.values().collect();
        bookings.sort_by_key(|b| (b.created_at, b.id));
        let mut payments: Vec<&Payment> = self.payments.values().collect();
        payments.sort_by_key(|p| (p.created_at, p.id));

        let mut events = Vec::with_capacity(bookings.len() + payments.len());
        for booking in bookings {
            let mut booking = booking.clone();
            booking.amount_paid = 0;
            events.push(Event::BookingReserved { booking });
        }
        for payment in payments {
            events.push(Event::PaymentRecorded {
                payment: payment.clone(),
            });
        }
        events
    }
}

/// Sum of the payments linked to `booking_id`.
fn linked_total<'a>(payments: impl IntoIterator<Item = &'a Payment>, booking_id: Ulid) -> i64 {
    payments
        .into_iter()
        .filter(|p| p.booking_id == Some(booking_id))
        .fold(0i64, |sum, p| sum.saturating_add(p.amount))
}
