//! Forward-only disclosure of months in
//! the event list.

use tracing::debug;

use crate::datetime::YearMonth;
use crate::event::EventRecord;

/// The last month appended to the list.
///
/// Passed in and handed back by value;
/// it only ever moves forward until an
/// explicit [`PaginationCursor::reset`].
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct PaginationCursor {
  last: YearMonth
}

/// Outcome of one "load next month".
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct PageStep {
  pub cursor:   PaginationCursor,
  pub month:    YearMonth,
  pub has_more: bool
}

impl PaginationCursor {
  pub fn new(
    first: YearMonth
  ) -> Self {
    Self {
      last: first
    }
  }

  pub fn last(self) -> YearMonth {
    self.last
  }

  /// Step to the following month. Does
  /// not look at the data.
  #[must_use]
  pub fn advance(self) -> Self {
    Self {
      last: self.last.next()
    }
  }

  /// Snap to a new starting month after a
  /// region switch or header navigation.
  #[must_use]
  pub fn reset(
    self,
    month: YearMonth
  ) -> Self {
    Self::new(month)
  }

  /// Whether anything starts after the
  /// last disclosed month.
  pub fn has_more<'a, I>(
    self,
    events: I
  ) -> bool
  where
    I: IntoIterator<Item = &'a EventRecord>
  {
    has_more(events, self.last)
  }
}

/// True when any record starts at or
/// after the first instant of the month
/// following `month`.
pub fn has_more<'a, I>(
  events: I,
  month: YearMonth
) -> bool
where
  I: IntoIterator<Item = &'a EventRecord>
{
  let Some(threshold) =
    month.next().start_instant()
  else {
    return false;
  };
  events.into_iter().any(|record| {
    record
      .start()
      .is_some_and(|start| {
        start >= threshold
      })
  })
}

/// Disclose the next month if anything
/// lies beyond the cursor.
///
/// The disclosed month is returned even
/// when its own bucket ends up empty;
/// `has_more` is recomputed for the new
/// position.
#[tracing::instrument(
  skip(events),
  fields(last = %cursor.last())
)]
pub fn load_next(
  cursor: PaginationCursor,
  events: &[&EventRecord]
) -> Option<PageStep> {
  if !cursor
    .has_more(events.iter().copied())
  {
    debug!("no further months to load");
    return None;
  }

  let cursor = cursor.advance();
  let has_more =
    cursor.has_more(events.iter().copied());
  debug!(
    month = %cursor.last(),
    has_more,
    "disclosed month"
  );
  Some(PageStep {
    cursor,
    month: cursor.last(),
    has_more
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ym(
    year: i32,
    month: u32
  ) -> YearMonth {
    YearMonth::new(year, month)
      .expect("month")
  }

  #[test]
  fn advance_is_strictly_increasing() {
    let mut cursor =
      PaginationCursor::new(ym(2024, 11));
    let mut seen = vec![cursor.last()];
    for _ in 0..5 {
      cursor = cursor.advance();
      seen.push(cursor.last());
    }
    assert!(
      seen.windows(2).all(|w| w[0] < w[1])
    );
    assert_eq!(
      cursor.last(),
      ym(2025, 4)
    );
  }

  #[test]
  fn reset_snaps_to_month() {
    let cursor =
      PaginationCursor::new(ym(2025, 6))
        .advance()
        .reset(ym(2025, 1));
    assert_eq!(
      cursor.last(),
      ym(2025, 1)
    );
  }

  #[test]
  fn load_next_walks_until_exhausted() {
    let events = vec![
      EventRecord::new_dated(
        "March",
        "2025-03-05T18:00Z"
      ),
      EventRecord::new_dated(
        "May",
        "2025-05-05T18:00Z"
      ),
    ];
    let refs: Vec<&EventRecord> =
      events.iter().collect();
    let cursor =
      PaginationCursor::new(ym(2025, 2));

    let first = load_next(cursor, &refs)
      .expect("march");
    assert_eq!(first.month, ym(2025, 3));
    assert!(first.has_more);

    // April is disclosed even though it
    // is empty.
    let second =
      load_next(first.cursor, &refs)
        .expect("april");
    assert_eq!(second.month, ym(2025, 4));
    assert!(second.has_more);

    let third =
      load_next(second.cursor, &refs)
        .expect("may");
    assert_eq!(third.month, ym(2025, 5));
    assert!(!third.has_more);

    assert_eq!(
      load_next(third.cursor, &refs),
      None
    );
  }

  #[test]
  fn undated_records_never_extend_the_list()
  {
    let events = vec![EventRecord {
      title: Some("Undated".to_string()),
      ..EventRecord::default()
    }];
    assert!(!has_more(&events, ym(2025, 1)));
  }
}
