use chrono::DateTime;

use crate::model::{Payment, MASKED_CODE};

/// Produces a printable receipt for a payment. Pure; no effect on engine state.
pub trait ReceiptRenderer: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn render(&self, payment: &Payment) -> String;
}

/// Plain-text receipt.
#[derive(Debug, Clone)]
pub struct TextReceipt {
    pub title: String,
}

impl Default for TextReceipt {
    fn default() -> Self {
        Self {
            title: "S.V PG Payment Receipt".to_string(),
        }
    }
}

impl ReceiptRenderer for TextReceipt {
    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }

    fn render(&self, payment: &Payment) -> String {
        let date = DateTime::from_timestamp_millis(payment.created_at)
            .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| payment.created_at.to_string());
        format!(
            "{title}\n\nReceipt: {id}\nName: {name}\nPhone: {phone}\nRoom: {room}\nBed: {bed}\nAmount Paid: {amount}\nPayment Code: {MASKED_CODE}\nDate: {date}\n",
            title = self.title,
            id = payment.id,
            name = payment.name,
            phone = payment.phone,
            room = payment.room_label,
            bed = payment.bed_label,
            amount = payment.amount,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn renders_snapshot_fields() {
        let payment = Payment {
            id: Ulid::new(),
            user_id: "u1".into(),
            booking_id: None,
            name: "Meera".into(),
            phone: "9123456789".into(),
            room_label: "204".into(),
            bed_label: "3".into(),
            amount: 9000,
            authorization_code: "TXN-1".into(),
            created_at: 1_735_689_600_000,
        };
        let text = TextReceipt::default().render(&payment);
        assert!(text.starts_with("S.V PG Payment Receipt"));
        assert!(text.contains("Name: Meera"));
        assert!(text.contains("Room: 204"));
        assert!(text.contains("Bed: 3"));
        assert!(text.contains("Amount Paid: 9000"));
        assert!(text.contains("Date: 2025-01-01 00:00 UTC"));
        assert!(text.contains("Payment Code: ****"));
        assert!(!text.contains("TXN-1"));
    }
}
