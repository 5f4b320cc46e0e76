use chrono::{Duration, NaiveDate};

/// Every calendar day from `start` through `end`, inclusive on both sides,
/// in ascending order. A single-day range (`start == end`) yields exactly
/// one day. If `start > end` the iterator is empty.
pub fn daterange_inclusive(
    start: NaiveDate,
    end: NaiveDate,
) -> impl Iterator<Item = NaiveDate> {
    let days = (end - start).num_days() + 1;
    (0..days.max(0)).map(move |n| start + Duration::days(n))
}
