//! Per-list configuration: queue order, positional range window and call time.
use chrono::{DateTime, Utc};

use crate::model::{ListNumber, ListOrder, ListSettings};
use crate::store::Store;
use crate::validation::{self, ValidationError};

pub fn default_call_time(list: ListNumber) -> &'static str {
    match list {
        ListNumber::One => "06:00",
        ListNumber::Two => "08:00",
        ListNumber::Three => "10:00",
    }
}

fn current(store: &Store, list: ListNumber) -> ListSettings {
    store
        .settings(list)
        .cloned()
        .unwrap_or_else(|| ListSettings::initial(list, default_call_time(list)))
}

pub fn set_order(store: &Store, list: ListNumber, order: ListOrder, now: DateTime<Utc>) -> ListSettings {
    ListSettings {
        order,
        updated_at: now,
        ..current(store, list)
    }
}

/// Both bounds or neither: a missing bound clears the window.
pub fn set_range(
    store: &Store,
    list: ListNumber,
    start: Option<u32>,
    end: Option<u32>,
    now: DateTime<Utc>,
) -> Result<ListSettings, ValidationError> {
    let start = start.map(validation::range_bound).transpose()?;
    let end = end.map(validation::range_bound).transpose()?;
    let (range_start, range_end) = match (start, end) {
        (Some(start), Some(end)) => (Some(start), Some(end)),
        _ => (None, None),
    };
    Ok(ListSettings {
        range_start,
        range_end,
        updated_at: now,
        ..current(store, list)
    })
}

pub fn set_call_time(
    store: &Store,
    list: ListNumber,
    call_time: &str,
    now: DateTime<Utc>,
) -> Result<ListSettings, ValidationError> {
    validation::call_time(call_time)?;
    Ok(ListSettings {
        call_time: call_time.to_string(),
        updated_at: now,
        ..current(store, list)
    })
}
