use std::collections::BTreeMap;

use crate::model::*;

use super::validate::normalize_query;
use super::{Engine, EngineError};

fn booking_matches(booking: &Booking, needle: &str) -> bool {
    let occupant = &booking.occupant;
    let c = booking.coordinate;
    [
        occupant.name.to_lowercase(),
        occupant.phone.to_lowercase(),
        occupant.email.to_lowercase(),
        c.room_label(),
        c.to_string(),
    ]
    .iter()
    .any(|field| field.contains(needle))
}

impl Engine {
    /// Live bookings whose occupant name, phone, email or room matches `query`
    /// (case-insensitive substring), newest first. An empty query matches all.
    pub async fn search_bookings(&self, query: &str) -> Result<Vec<Booking>, EngineError> {
        let needle = normalize_query(query)?;
        let mut bookings = self.bookings().await;
        if !needle.is_empty() {
            bookings.retain(|b| booking_matches(b, &needle));
        }
        Ok(bookings)
    }

    /// Payment groups whose user name or phone matches `query`.
    pub fn search_payment_groups(&self, query: &str) -> Result<Vec<UserPaymentGroup>, EngineError> {
        let needle = normalize_query(query)?;
        let mut groups = self.grouped_by_user();
        if !needle.is_empty() {
            groups.retain(|g| {
                g.user_name.to_lowercase().contains(&needle) || g.phone.to_lowercase().contains(&needle)
            });
        }
        Ok(groups)
    }

    /// Occupancy and revenue figures for the dashboard.
    pub fn overview(&self) -> Overview {
        let mut classes: BTreeMap<u8, ClassOccupancy> = self
            .topology
            .capacity_classes()
            .into_iter()
            .map(|class| {
                (
                    class.capacity,
                    ClassOccupancy {
                        capacity: class.capacity,
                        beds: class.beds,
                        occupied: 0,
                        rent: class.rent,
                    },
                )
            })
            .collect();

        let mut occupied_beds = 0u32;
        let mut expected_monthly_rent = 0i64;
        for coordinate in self.store.occupied_coordinates() {
            let Some(capacity) = self.topology.capacity(coordinate.floor, coordinate.room) else {
                continue;
            };
            occupied_beds += 1;
            if let Some(class) = classes.get_mut(&capacity) {
                class.occupied += 1;
                expected_monthly_rent += class.rent;
            }
        }

        let total_beds = self.topology.total_beds();
        let total_revenue = self
            .payments
            .iter()
            .fold(0i64, |sum, e| sum.saturating_add(e.amount));

        Overview {
            total_beds,
            occupied_beds,
            free_beds: total_beds.saturating_sub(occupied_beds),
            classes: classes.into_values().collect(),
            bookings: self.store.booking_count(),
            payments: self.payments.len(),
            total_revenue,
            expected_monthly_rent,
        }
    }
}
