use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Owner recorded on bookings and payments entered by staff.
pub const STAFF_USER_ID: &str = "admin";

/// One physical sleeping spot: `(floor, room, bed)`, all numbered from 1.
///
/// Ordering is floor → room → bed; multi-cell locks are always taken in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    pub floor: u32,
    pub room: u32,
    pub bed: u32,
}

impl Coordinate {
    pub fn new(floor: u32, room: u32, bed: u32) -> Self {
        Self { floor, room, bed }
    }

    /// Door label of the room: floor digit(s) followed by the two-digit room number (`"103"`).
    pub fn room_label(&self) -> String {
        format!("{}{:02}", self.floor, self.room)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.floor, self.room, self.bed)
    }
}

/// Personal details captured when a bed is reserved.
///
/// `photo` and `id_document` are opaque references handed out by the blob store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    pub name: String,
    pub phone: String,
    pub alt_phone: Option<String>,
    pub email: String,
    pub national_id: Option<String>,
    pub join_date: String,
    pub photo: Option<String>,
    pub id_document: Option<String>,
}

/// A live claim on exactly one coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub coordinate: Coordinate,
    pub occupant: Occupant,
    pub user_id: String,
    /// Running total of linked payments. Only the payment ledger writes this.
    pub amount_paid: i64,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Contact fields that may change after reservation. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub alt_phone: Option<String>,
    pub email: Option<String>,
}

impl BookingPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none() && self.alt_phone.is_none() && self.email.is_none()
    }

    pub fn apply(&self, occupant: &mut Occupant) {
        if let Some(name) = &self.name {
            occupant.name = name.clone();
        }
        if let Some(phone) = &self.phone {
            occupant.phone = phone.clone();
        }
        if let Some(alt) = &self.alt_phone {
            occupant.alt_phone = Some(alt.clone());
        }
        if let Some(email) = &self.email {
            occupant.email = email.clone();
        }
    }
}

/// Append-only ledger entry.
///
/// Name, phone and room/bed labels are a snapshot taken at write time so the
/// entry stays readable after the booking is shifted or released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub user_id: String,
    pub booking_id: Option<Ulid>,
    pub name: String,
    pub phone: String,
    pub room_label: String,
    pub bed_label: String,
    pub amount: i64,
    pub authorization_code: String,
    pub created_at: Ms,
}

/// Stands in for an authorization code anywhere a non-staff reader could see it.
pub const MASKED_CODE: &str = "****";

impl Payment {
    /// Copy safe to show the payer: the authorization code is a shared secret.
    pub fn redacted(&self) -> Payment {
        Payment {
            authorization_code: MASKED_CODE.to_string(),
            ..self.clone()
        }
    }
}

/// Input to `record_payment`. Snapshot fields are ignored when `booking_id` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PaymentRequest {
    pub user_id: Option<String>,
    pub booking_id: Option<Ulid>,
    pub amount: i64,
    pub authorization_code: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub room_label: Option<String>,
    pub bed_label: Option<String>,
}

/// Payments of one user, newest first. Derived on read, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserPaymentGroup {
    pub user_id: String,
    pub user_name: String,
    pub phone: String,
    pub total_amount: i64,
    pub payments: Vec<Payment>,
}

impl UserPaymentGroup {
    pub fn latest_at(&self) -> Ms {
        self.payments.first().map_or(0, |p| p.created_at)
    }
}

/// Occupancy of one capacity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassOccupancy {
    pub capacity: u8,
    pub beds: u32,
    pub occupied: u32,
    pub rent: i64,
}

/// Dashboard figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Overview {
    pub total_beds: u32,
    pub occupied_beds: u32,
    pub free_beds: u32,
    pub classes: Vec<ClassOccupancy>,
    pub bookings: usize,
    pub payments: usize,
    pub total_revenue: i64,
    /// Sum of the monthly rent of every occupied bed.
    pub expected_monthly_rent: i64,
}

/// WAL record. Flat, no nesting beyond the entity snapshots themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingReserved {
        booking: Booking,
    },
    BookingShifted {
        id: Ulid,
        from: Coordinate,
        to: Coordinate,
        at: Ms,
    },
    BookingUpdated {
        id: Ulid,
        patch: BookingPatch,
        at: Ms,
    },
    BookingReleased {
        id: Ulid,
        coordinate: Coordinate,
    },
    PaymentRecorded {
        payment: Payment,
    },
    PaymentDeleted {
        id: Ulid,
        booking_id: Option<Ulid>,
    },
}
