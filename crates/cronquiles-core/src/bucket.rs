use std::collections::BTreeMap;

use chrono::{
  DateTime,
  NaiveDate,
  Utc
};

use crate::datetime::{
  YearMonth,
  day_key,
  to_display_date
};
use crate::event::EventRecord;

/// Events starting on one display-timezone
/// day, earliest first.
#[derive(Debug, Clone, PartialEq)]
pub struct DayBucket<'a> {
  pub day_key: String,
  pub date:    NaiveDate,
  pub events:  Vec<&'a EventRecord>
}

impl DayBucket<'_> {
  pub fn len(&self) -> usize {
    self.events.len()
  }

  pub fn is_empty(&self) -> bool {
    self.events.is_empty()
  }
}

/// Group the records of `month` into day
/// buckets ordered by day key.
///
/// Records in a day keep feed order when
/// their starts tie. Undated records
/// never land in a bucket.
#[tracing::instrument(
  skip(filtered),
  fields(month = %month, total = filtered.len())
)]
pub fn bucketize<'a>(
  filtered: &[&'a EventRecord],
  month: YearMonth
) -> Vec<DayBucket<'a>> {
  let mut selected: Vec<(
    DateTime<Utc>,
    NaiveDate,
    &'a EventRecord
  )> = filtered
    .iter()
    .copied()
    .filter_map(|record| {
      let start = record.start()?;
      let date = to_display_date(start);
      month
        .contains(date)
        .then_some((start, date, record))
    })
    .collect();
  // sort_by_key is stable
  selected
    .sort_by_key(|(start, ..)| *start);

  let mut by_day: BTreeMap<
    NaiveDate,
    Vec<&'a EventRecord>
  > = BTreeMap::new();
  for (_, date, record) in selected {
    by_day
      .entry(date)
      .or_default()
      .push(record);
  }

  by_day
    .into_iter()
    .map(|(date, events)| {
      DayBucket {
        day_key: day_key(date),
        date,
        events
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn march() -> YearMonth {
    YearMonth::new(2025, 3)
      .expect("month")
  }

  #[test]
  fn empty_input_gives_no_buckets() {
    assert!(
      bucketize(&[], march()).is_empty()
    );
  }

  #[test]
  fn groups_by_display_day() {
    let events = vec![
      EventRecord::new_dated(
        "Second",
        "2025-03-05T18:00Z"
      ),
      EventRecord::new_dated(
        "First",
        "2025-03-01T18:00Z"
      ),
      // 2025-02-28 20:00 local
      EventRecord::new_dated(
        "February",
        "2025-03-01T02:00Z"
      ),
      EventRecord::new_dated(
        "April",
        "2025-04-01T18:00Z"
      ),
    ];
    let refs: Vec<&EventRecord> =
      events.iter().collect();
    let buckets =
      bucketize(&refs, march());
    let keys: Vec<&str> = buckets
      .iter()
      .map(|b| b.day_key.as_str())
      .collect();
    assert_eq!(
      keys,
      vec!["2025-03-01", "2025-03-05"]
    );
    assert!(buckets.iter().all(|b| {
      b.len() == 1
    }));
  }

  #[test]
  fn ties_keep_feed_order() {
    let events = vec![
      EventRecord::new_dated(
        "Late",
        "2025-03-10T22:00Z"
      ),
      EventRecord::new_dated(
        "Tie A",
        "2025-03-10T18:00Z"
      ),
      EventRecord::new_dated(
        "Tie B",
        "2025-03-10T18:00Z"
      ),
    ];
    let refs: Vec<&EventRecord> =
      events.iter().collect();
    let buckets =
      bucketize(&refs, march());
    assert_eq!(buckets.len(), 1);
    let titles: Vec<_> = buckets[0]
      .events
      .iter()
      .filter_map(|r| r.raw_title())
      .collect();
    assert_eq!(
      titles,
      vec!["Tie A", "Tie B", "Late"]
    );
  }

  #[test]
  fn union_matches_month_members() {
    let events: Vec<EventRecord> = [
      "2025-02-27T18:00Z",
      "2025-03-03T18:00Z",
      "2025-03-03T19:00Z",
      "2025-03-31T23:00Z",
      "2025-04-01T07:00Z",
      "not a date"
    ]
    .iter()
    .map(|dt| {
      EventRecord::new_dated("E", dt)
    })
    .collect();
    let refs: Vec<&EventRecord> =
      events.iter().collect();
    let buckets =
      bucketize(&refs, march());

    let keys: Vec<&String> = buckets
      .iter()
      .map(|b| &b.day_key)
      .collect();
    assert!(
      keys.windows(2).all(|w| w[0] < w[1])
    );
    let total: usize =
      buckets.iter().map(DayBucket::len).sum();
    assert_eq!(total, 3);
  }
}
