use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Trimmed value, or `None` if absent or blank.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_len(value: &str, what: &'static str) -> Result<(), EngineError> {
    if value.len() > MAX_FIELD_LEN {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_required(value: &str, what: &'static str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(what));
    }
    Ok(())
}

pub(crate) fn validate_occupant(occupant: &Occupant) -> Result<(), EngineError> {
    check_required(&occupant.name, "name is required")?;
    check_required(&occupant.phone, "phone is required")?;
    check_required(&occupant.join_date, "join date is required")?;
    check_len(&occupant.name, "name too long")?;
    check_len(&occupant.phone, "phone too long")?;
    check_len(&occupant.email, "email too long")?;
    check_len(&occupant.join_date, "join date too long")?;
    for optional in [
        &occupant.alt_phone,
        &occupant.national_id,
        &occupant.photo,
        &occupant.id_document,
    ]
    .into_iter()
    .flatten()
    {
        check_len(optional, "occupant field too long")?;
    }
    Ok(())
}

pub(crate) fn validate_patch(patch: &BookingPatch) -> Result<(), EngineError> {
    if patch.is_empty() {
        return Err(EngineError::Validation("nothing to update"));
    }
    if let Some(name) = &patch.name {
        check_required(name, "name cannot be blank")?;
        check_len(name, "name too long")?;
    }
    if let Some(phone) = &patch.phone {
        check_required(phone, "phone cannot be blank")?;
        check_len(phone, "phone too long")?;
    }
    if let Some(alt) = &patch.alt_phone {
        check_len(alt, "alt phone too long")?;
    }
    if let Some(email) = &patch.email {
        check_len(email, "email too long")?;
    }
    Ok(())
}

pub(crate) fn validate_payment(request: &PaymentRequest) -> Result<(), EngineError> {
    if request.amount <= 0 {
        return Err(EngineError::Validation("amount must be positive"));
    }
    if request.amount > MAX_PAYMENT_AMOUNT {
        return Err(EngineError::LimitExceeded("payment amount too large"));
    }
    for field in [
        &request.user_id,
        &request.name,
        &request.phone,
        &request.room_label,
        &request.bed_label,
    ]
    .into_iter()
    .flatten()
    {
        check_len(field, "payment field too long")?;
    }
    Ok(())
}

/// Lower-cased query, or `InvalidQuery` if it is too long or carries control characters.
pub(crate) fn normalize_query(query: &str) -> Result<String, EngineError> {
    if query.len() > MAX_QUERY_LEN {
        return Err(EngineError::InvalidQuery("query too long"));
    }
    if query.chars().any(char::is_control) {
        return Err(EngineError::InvalidQuery("query contains control characters"));
    }
    Ok(query.trim().to_lowercase())
}
