//! Queue projection: the ordered view of eligible caddies for one list.
//!
//! The projection is pure. It borrows the caddie collection in its source order
//! and never mutates it.
use crate::model::{Caddie, CaddieStatus, ListNumber, ListOrder, ListSettings};

/// Project the live queue for `list`.
///
/// Steps, in order:
/// 1. keep caddies on `list` that are not `Absent`;
/// 2. if the settings carry both range bounds, keep the 1-based positions
///    `start..=end` of that filtered sequence;
/// 3. reverse when the list is ordered descending;
/// 4. stable-sort `Available` caddies ahead of everyone else.
///
/// Missing settings mean no window and ascending order.
pub fn project<'a>(
    list: ListNumber,
    caddies: impl IntoIterator<Item = &'a Caddie>,
    settings: Option<&ListSettings>,
) -> Vec<&'a Caddie> {
    let mut queue: Vec<&Caddie> = caddies
        .into_iter()
        .filter(|c| c.list_number == list && c.status != CaddieStatus::Absent)
        .collect();

    // Positions, not ids: the window shifts whenever the filtered roster changes.
    if let Some((start, end)) = settings.and_then(ListSettings::range) {
        let start_index = start.saturating_sub(1) as usize;
        let end_index = end.saturating_sub(1) as usize;
        queue = queue
            .into_iter()
            .enumerate()
            .filter(|(index, _)| *index >= start_index && *index <= end_index)
            .map(|(_, caddie)| caddie)
            .collect();
    }

    if settings.map(|s| s.order) == Some(ListOrder::Descending) {
        queue.reverse();
    }

    queue.sort_by_key(|c| c.status != CaddieStatus::Available);
    queue
}

/// The caddie currently out on the list, if any.
///
/// Several `InField` caddies should not happen; when they do, the most recently
/// transitioned one wins.
pub fn current_turn<'a>(queue: &[&'a Caddie]) -> Option<&'a Caddie> {
    queue
        .iter()
        .copied()
        .filter(|c| c.status == CaddieStatus::InField)
        .max_by_key(|c| c.updated_at)
}

/// The first `count` available caddies, in queue order.
pub fn up_next<'a>(queue: &[&'a Caddie], count: usize) -> Vec<&'a Caddie> {
    queue
        .iter()
        .copied()
        .filter(|c| c.status == CaddieStatus::Available)
        .take(count)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn caddie(id: &str, list: ListNumber, status: CaddieStatus) -> Caddie {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap();
        Caddie {
            id: id.into(),
            name: id.to_uppercase(),
            list_number: list,
            status,
            phone_number: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn ids(queue: &[&Caddie]) -> Vec<String> {
        queue.iter().map(|c| c.id.clone()).collect()
    }

    fn settings(order: ListOrder, range: Option<(u32, u32)>) -> ListSettings {
        let mut s = ListSettings::initial(ListNumber::One, "06:00");
        s.order = order;
        s.range_start = range.map(|r| r.0);
        s.range_end = range.map(|r| r.1);
        s
    }

    #[test]
    fn absent_caddies_are_excluded_and_available_lead() {
        let roster = vec![
            caddie("b", ListNumber::One, CaddieStatus::InField),
            caddie("c", ListNumber::One, CaddieStatus::Absent),
            caddie("a", ListNumber::One, CaddieStatus::Available),
        ];
        let queue = project(ListNumber::One, &roster, None);
        assert_eq!(ids(&queue), vec!["a", "b"]);
    }

    #[test]
    fn other_lists_are_ignored() {
        let roster = vec![
            caddie("a", ListNumber::One, CaddieStatus::Available),
            caddie("x", ListNumber::Two, CaddieStatus::Available),
            caddie("b", ListNumber::One, CaddieStatus::InField),
        ];
        let queue = project(ListNumber::One, &roster, None);
        assert_eq!(queue.len(), 2);
        assert!(queue.iter().all(|c| c.list_number == ListNumber::One));
    }

    #[test]
    fn range_selects_positions_of_filtered_sequence() {
        let roster: Vec<Caddie> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|id| caddie(id, ListNumber::One, CaddieStatus::Available))
            .collect();
        let s = settings(ListOrder::Ascending, Some((2, 3)));
        let queue = project(ListNumber::One, &roster, Some(&s));
        assert_eq!(ids(&queue), vec!["b", "c"]);
    }

    #[test]
    fn range_counts_positions_after_absent_filter() {
        let roster = vec![
            caddie("a", ListNumber::One, CaddieStatus::Absent),
            caddie("b", ListNumber::One, CaddieStatus::Available),
            caddie("c", ListNumber::One, CaddieStatus::Available),
            caddie("d", ListNumber::One, CaddieStatus::Available),
        ];
        let s = settings(ListOrder::Ascending, Some((1, 2)));
        let queue = project(ListNumber::One, &roster, Some(&s));
        assert_eq!(ids(&queue), vec!["b", "c"]);
    }

    #[test]
    fn inverted_range_yields_empty_queue() {
        let roster = vec![
            caddie("a", ListNumber::One, CaddieStatus::Available),
            caddie("b", ListNumber::One, CaddieStatus::Available),
        ];
        let s = settings(ListOrder::Ascending, Some((2, 1)));
        assert!(project(ListNumber::One, &roster, Some(&s)).is_empty());
    }

    #[test]
    fn descending_reverses_before_available_sort() {
        let roster = vec![
            caddie("a", ListNumber::One, CaddieStatus::Available),
            caddie("b", ListNumber::One, CaddieStatus::InField),
            caddie("c", ListNumber::One, CaddieStatus::Available),
            caddie("d", ListNumber::One, CaddieStatus::Available),
        ];
        let desc = settings(ListOrder::Descending, None);
        let queue = project(ListNumber::One, &roster, Some(&desc));
        assert_eq!(ids(&queue), vec!["d", "c", "a", "b"]);

        let asc = settings(ListOrder::Ascending, None);
        let queue = project(ListNumber::One, &roster, Some(&asc));
        assert_eq!(ids(&queue), vec!["a", "c", "d", "b"]);
    }

    #[test]
    fn sort_is_stable_for_equal_status() {
        let roster = vec![
            caddie("b1", ListNumber::One, CaddieStatus::InField),
            caddie("a1", ListNumber::One, CaddieStatus::Available),
            caddie("b2", ListNumber::One, CaddieStatus::InField),
            caddie("a2", ListNumber::One, CaddieStatus::Available),
            caddie("a3", ListNumber::One, CaddieStatus::Available),
        ];
        let queue = project(ListNumber::One, &roster, None);
        assert_eq!(ids(&queue), vec!["a1", "a2", "a3", "b1", "b2"]);
    }

    #[test]
    fn unranged_length_matches_present_roster() {
        let roster = vec![
            caddie("a", ListNumber::Two, CaddieStatus::Available),
            caddie("b", ListNumber::Two, CaddieStatus::Absent),
            caddie("c", ListNumber::Two, CaddieStatus::InField),
            caddie("d", ListNumber::Two, CaddieStatus::Available),
        ];
        let s = settings(ListOrder::Descending, None);
        let queue = project(ListNumber::Two, &roster, Some(&s));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn current_turn_prefers_latest_transition() {
        let mut early = caddie("early", ListNumber::One, CaddieStatus::InField);
        let mut late = caddie("late", ListNumber::One, CaddieStatus::InField);
        late.updated_at = early.updated_at + Duration::minutes(5);
        early.updated_at -= Duration::minutes(1);
        let idle = caddie("idle", ListNumber::One, CaddieStatus::Available);
        let roster = vec![early, idle, late];
        let queue = project(ListNumber::One, &roster, None);
        assert_eq!(current_turn(&queue).map(|c| c.id.as_str()), Some("late"));
        assert_eq!(ids(&up_next(&queue, 3)), vec!["idle"]);
    }

    #[test]
    fn up_next_is_capped() {
        let roster: Vec<Caddie> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| caddie(id, ListNumber::Three, CaddieStatus::Available))
            .collect();
        let queue = project(ListNumber::Three, &roster, None);
        assert_eq!(ids(&up_next(&queue, 3)), vec!["a", "b", "c"]);
        assert!(current_turn(&queue).is_none());
    }
}
