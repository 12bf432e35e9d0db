use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_CODE_LEN;
use crate::model::*;

use super::validate::{non_blank, now_ms, validate_payment};
use super::{run_detached, Engine, EngineError};

const NOT_AVAILABLE: &str = "N/A";
const STAFF_NAME: &str = "Admin";

fn newest_first(a: &Payment, b: &Payment) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))
}

impl Engine {
    /// Append a payment to the ledger. A linked payment also raises the
    /// booking's running total, in the same WAL record.
    pub async fn record_payment(self: &Arc<Self>, request: PaymentRequest) -> Result<Payment, EngineError> {
        let engine = self.clone();
        run_detached("record_payment", async move { engine.record_payment_inner(request).await }).await
    }

    async fn record_payment_inner(&self, request: PaymentRequest) -> Result<Payment, EngineError> {
        let code = request.authorization_code.as_str();
        if code.len() > MAX_CODE_LEN || !self.codes.verify(code) {
            return Err(EngineError::InvalidAuthorization);
        }
        validate_payment(&request)?;

        let id = Ulid::new();
        let now = now_ms();
        let user_id = non_blank(request.user_id);
        let name = non_blank(request.name);
        let phone = non_blank(request.phone);

        let Some(booking_id) = request.booking_id else {
            let payment = Payment {
                id,
                user_id: user_id.unwrap_or_else(|| STAFF_USER_ID.to_string()),
                booking_id: None,
                name: name.unwrap_or_else(|| STAFF_NAME.to_string()),
                phone: phone.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                room_label: non_blank(request.room_label).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                bed_label: non_blank(request.bed_label).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                amount: request.amount,
                authorization_code: request.authorization_code,
                created_at: now,
            };
            return self.commit_payment(payment).await;
        };

        let mut booking = self.lock_booking(booking_id).await.map_err(|e| match e {
            EngineError::NotFound(id) => EngineError::BookingNotFound(id),
            other => other,
        })?;
        let payment = Payment {
            id,
            user_id: user_id.unwrap_or_else(|| booking.user_id.clone()),
            booking_id: Some(booking_id),
            name: name.unwrap_or_else(|| booking.occupant.name.clone()),
            phone: phone.unwrap_or_else(|| booking.occupant.phone.clone()),
            room_label: booking.coordinate.room_label(),
            bed_label: booking.coordinate.bed.to_string(),
            amount: request.amount,
            authorization_code: request.authorization_code,
            created_at: now,
        };
        let payment = self.commit_payment(payment).await?;
        booking.amount_paid = booking.amount_paid.saturating_add(payment.amount);
        Ok(payment)
    }

    /// WAL-append, insert, notify. The caller holds the linked booking's lock, if any.
    async fn commit_payment(&self, payment: Payment) -> Result<Payment, EngineError> {
        let event = Event::PaymentRecorded {
            payment: payment.clone(),
        };
        self.wal_append(&event).await?;
        self.payments.insert(payment.id, payment.clone());
        info!("recorded payment {} of {} for {}", payment.id, payment.amount, payment.user_id);
        self.notify.send(&event);
        Ok(payment)
    }

    /// Remove a ledger entry and recompute the linked booking's total from the
    /// payments that remain.
    pub async fn delete_payment(self: &Arc<Self>, id: Ulid) -> Result<(), EngineError> {
        let engine = self.clone();
        run_detached("delete_payment", async move { engine.delete_payment_inner(id).await }).await
    }

    async fn delete_payment_inner(&self, id: Ulid) -> Result<(), EngineError> {
        let booking_id = self
            .payments
            .get(&id)
            .map(|p| p.booking_id)
            .ok_or(EngineError::NotFound(id))?;
        // The booking may have been released since; the payment still goes.
        let mut booking = match booking_id {
            Some(bid) => self.lock_booking(bid).await.ok(),
            None => None,
        };

        // Taking the entry out of the map claims the deletion; a concurrent
        // delete of the same payment finds it gone and writes nothing.
        let (_, payment) = self.payments.remove(&id).ok_or(EngineError::NotFound(id))?;
        let event = Event::PaymentDeleted { id, booking_id };
        if let Err(e) = self.wal_append(&event).await {
            self.payments.insert(id, payment);
            return Err(e);
        }
        if let Some(booking) = booking.as_mut() {
            booking.amount_paid = self.linked_total(booking.id);
        }

        info!("deleted payment {id}");
        self.notify.send(&event);
        Ok(())
    }

    /// Sum of the ledger entries linked to `booking_id`.
    fn linked_total(&self, booking_id: Ulid) -> i64 {
        self.payments
            .iter()
            .filter(|e| e.booking_id == Some(booking_id))
            .fold(0i64, |sum, e| sum.saturating_add(e.amount))
    }

    pub fn payment(&self, id: Ulid) -> Option<Payment> {
        self.payments.get(&id).map(|p| p.value().clone())
    }

    /// All payments of one user, newest first.
    pub fn payments_for_user(&self, user_id: &str) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.value().clone())
            .collect();
        payments.sort_by(newest_first);
        payments
    }

    /// Payments grouped by user. Each group is newest first and takes its name
    /// and phone from its newest payment; groups are ordered by their newest payment.
    pub fn grouped_by_user(&self) -> Vec<UserPaymentGroup> {
        let mut by_user: HashMap<String, Vec<Payment>> = HashMap::new();
        for entry in self.payments.iter() {
            by_user
                .entry(entry.user_id.clone())
                .or_default()
                .push(entry.value().clone());
        }

        let mut groups: Vec<UserPaymentGroup> = by_user
            .into_iter()
            .filter_map(|(user_id, mut payments)| {
                payments.sort_by(newest_first);
                let latest = payments.first()?;
                Some(UserPaymentGroup {
                    user_name: latest.name.clone(),
                    phone: latest.phone.clone(),
                    total_amount: payments.iter().fold(0i64, |sum, p| sum.saturating_add(p.amount)),
                    user_id,
                    payments,
                })
            })
            .collect();
        groups.sort_by(|a, b| b.latest_at().cmp(&a.latest_at()).then(a.user_id.cmp(&b.user_id)));
        groups
    }
}
