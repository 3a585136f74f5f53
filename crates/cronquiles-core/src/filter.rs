use chrono::{
  DateTime,
  NaiveDate,
  Utc
};
use tracing::trace;

use crate::datetime::{
  YearMonth,
  start_of_display_day,
  to_display_date
};
use crate::event::EventRecord;
use crate::store::ViewSettings;

/// Past/future visibility policy for one
/// render pass.
#[derive(
  Debug, Clone, Copy, Default,
)]
pub struct EventFilter {
  pub show_past_events: bool
}

impl EventFilter {
  pub fn from_settings(
    settings: &ViewSettings
  ) -> Self {
    Self {
      show_past_events: settings
        .show_past_events
    }
  }

  pub fn apply<'a>(
    self,
    events: &'a [EventRecord],
    now: DateTime<Utc>
  ) -> Vec<&'a EventRecord> {
    filter_events(
      events,
      now,
      self.show_past_events
    )
  }
}

/// Records visible at `now`.
///
/// With past events shown this is the
/// whole collection in feed order.
/// Otherwise only records starting at or
/// after the display-timezone midnight
/// of `now` survive; undated records are
/// dropped.
#[tracing::instrument(
  skip(events, now),
  fields(total = events.len())
)]
pub fn filter_events(
  events: &[EventRecord],
  now: DateTime<Utc>,
  show_past_events: bool
) -> Vec<&EventRecord> {
  if show_past_events {
    return events.iter().collect();
  }

  let cutoff = start_of_display_day(now);
  let kept: Vec<&EventRecord> = events
    .iter()
    .filter(|record| {
      record
        .start()
        .is_some_and(|start| {
          start >= cutoff
        })
    })
    .collect();

  trace!(
    kept = kept.len(),
    cutoff = %cutoff,
    "filtered past events"
  );
  kept
}

/// Records starting on `date` in the
/// display timezone.
pub fn events_on_day<'a>(
  events: &[&'a EventRecord],
  date: NaiveDate
) -> Vec<&'a EventRecord> {
  events
    .iter()
    .copied()
    .filter(|record| {
      record.start().is_some_and(
        |start| {
          to_display_date(start)
            == date
        }
      )
    })
    .collect()
}

/// The next `limit` records starting
/// after `after` ends, earliest first.
#[tracing::instrument(skip(events))]
pub fn upcoming_events<'a>(
  events: &'a [EventRecord],
  after: YearMonth,
  limit: usize
) -> Vec<&'a EventRecord> {
  let Some(threshold) =
    after.next().start_instant()
  else {
    return Vec::new();
  };

  let mut dated: Vec<(
    DateTime<Utc>,
    &EventRecord
  )> = events
    .iter()
    .filter_map(|record| {
      record
        .start()
        .filter(|start| {
          *start >= threshold
        })
        .map(|start| (start, record))
    })
    .collect();
  dated.sort_by_key(|(start, _)| *start);

  dated
    .into_iter()
    .take(limit)
    .map(|(_, record)| record)
    .collect()
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };

  use super::*;

  fn utc(
    y: i32,
    m: u32,
    d: u32,
    h: u32
  ) -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(y, m, d, h, 0, 0)
      .single()
      .expect("valid instant")
  }

  fn sample() -> Vec<EventRecord> {
    vec![
      EventRecord::new_dated(
        "March",
        "2025-03-01T18:00Z"
      ),
      EventRecord::new_dated(
        "February",
        "2025-02-01T18:00Z"
      ),
      EventRecord {
        title: Some(
          "Undated".to_string()
        ),
        ..EventRecord::default()
      },
      EventRecord::new_dated(
        "Broken",
        "someday"
      ),
    ]
  }

  #[test]
  fn hides_past_and_undated_records() {
    let events = sample();
    let now = utc(2025, 2, 15, 18);
    let kept =
      filter_events(&events, now, false);
    assert_eq!(kept.len(), 1);
    assert_eq!(
      kept[0].raw_title(),
      Some("March")
    );
  }

  #[test]
  fn showing_past_keeps_everything_in_order()
  {
    let events = sample();
    let now = utc(2025, 2, 15, 18);
    let kept =
      filter_events(&events, now, true);
    assert_eq!(kept.len(), events.len());
    for (kept, input) in
      kept.iter().zip(events.iter())
    {
      assert!(std::ptr::eq(
        *kept, input
      ));
    }
  }

  #[test]
  fn cutoff_is_display_midnight() {
    let events = vec![
      EventRecord::new_dated(
        "Early today",
        "2025-02-15T07:00Z"
      ),
      EventRecord::new_dated(
        "Late yesterday",
        "2025-02-15T05:30Z"
      ),
    ];
    // 2025-02-15 20:00 in Mexico City.
    let now = utc(2025, 2, 16, 2);
    let kept =
      filter_events(&events, now, false);
    assert_eq!(kept.len(), 1);
    assert_eq!(
      kept[0].raw_title(),
      Some("Early today")
    );
  }

  #[test]
  fn every_kept_record_starts_today_or_later()
  {
    let events: Vec<EventRecord> = (1
      ..=28)
      .map(|day| {
        EventRecord::new_dated(
          "Day",
          &format!(
            "2025-02-{day:02}T12:00Z"
          )
        )
      })
      .collect();
    let now = utc(2025, 2, 10, 23);
    let cutoff = start_of_display_day(now);
    let kept =
      filter_events(&events, now, false);
    assert!(!kept.is_empty());
    assert!(kept.iter().all(|record| {
      record
        .start()
        .is_some_and(|s| s >= cutoff)
    }));
  }

  #[test]
  fn same_day_lookup_uses_display_date() {
    let events = sample();
    let all: Vec<&EventRecord> =
      events.iter().collect();
    let date = NaiveDate::from_ymd_opt(
      2025, 3, 1
    )
    .expect("date");
    assert_eq!(
      events_on_day(&all, date).len(),
      1
    );
    let none = NaiveDate::from_ymd_opt(
      2025, 3, 2
    )
    .expect("date");
    assert!(
      events_on_day(&all, none)
        .is_empty()
    );
  }

  #[test]
  fn upcoming_starts_after_the_month() {
    let mut events = sample();
    events.push(EventRecord::new_dated(
      "April",
      "2025-04-02T18:00Z"
    ));
    let february =
      YearMonth::new(2025, 2)
        .expect("month");
    let upcoming = upcoming_events(
      &events, february, 5
    );
    let titles: Vec<_> = upcoming
      .iter()
      .filter_map(|r| r.raw_title())
      .collect();
    assert_eq!(
      titles,
      vec!["March", "April"]
    );
    assert_eq!(
      upcoming_events(
        &events, february, 1
      )
      .len(),
      1
    );
  }
}
