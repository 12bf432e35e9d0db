use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::model::Booking;
use crate::notify::{deliver, Notifier};

/// Days at the end of each month during which rent reminders go out.
pub const REMINDER_WINDOW_DAYS: u32 = 5;

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(31, |last| last.day())
}

/// True during the last `REMINDER_WINDOW_DAYS` days of the month, inclusive.
pub fn in_reminder_window(date: NaiveDate) -> bool {
    date.day() + REMINDER_WINDOW_DAYS > days_in_month(date)
}

pub fn reminder_message(booking: &Booking) -> String {
    format!(
        "Dear {}, your stay payment/renewal is due soon. Room: {}, Bed: {}. Please renew before month-end.",
        booking.occupant.name,
        booking.coordinate.room_label(),
        booking.coordinate.bed
    )
}

/// Send one reminder to every live booking with a phone number. Returns how many were attempted.
pub async fn send_reminders(engine: &Engine, notifier: &dyn Notifier) -> usize {
    let mut sent = 0;
    for booking in engine.bookings().await {
        let phone = booking.occupant.phone.trim();
        if phone.is_empty() {
            continue;
        }
        deliver(notifier, phone, &reminder_message(&booking)).await;
        sent += 1;
    }
    sent
}

/// Background task: once a day, remind occupants near the end of the month.
pub async fn run_reminders(engine: Arc<Engine>, notifier: Arc<dyn Notifier>) {
    let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
    loop {
        interval.tick().await;
        let today = Utc::now().date_naive();
        if !in_reminder_window(today) {
            debug!("no reminders on {today}");
            continue;
        }
        let sent = send_reminders(&engine, notifier.as_ref()).await;
        info!("sent {sent} rent reminders for {today}");
    }
}

/// Background task: compact the WAL once enough appends have accumulated.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
