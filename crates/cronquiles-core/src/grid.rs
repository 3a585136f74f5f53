use chrono::{
  Datelike,
  Duration,
  NaiveDate
};

use crate::datetime::{
  YearMonth,
  day_key
};
use crate::event::EventRecord;
use crate::filter::events_on_day;

pub const GRID_CELLS: usize = 42;
pub const WEEK_DAYS: usize = 7;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum CellKind {
  LeadingOverflow,
  InMonth,
  TrailingOverflow
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridCell {
  pub date:       NaiveDate,
  pub day:        u32,
  pub kind:       CellKind,
  pub is_today:   bool,
  pub has_events: bool,
  /// Set on in-month cells only.
  pub day_key:    Option<String>
}

impl GridCell {
  fn overflow(
    date: NaiveDate,
    kind: CellKind
  ) -> Self {
    Self {
      date,
      day: date.day(),
      kind,
      is_today: false,
      has_events: false,
      day_key: None
    }
  }

  pub fn is_in_month(&self) -> bool {
    self.kind == CellKind::InMonth
  }

  /// Overflow cells are inert.
  pub fn is_selectable(&self) -> bool {
    self.is_in_month()
  }
}

/// Six Sunday-first weeks covering a
/// month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthGrid {
  pub month: YearMonth,
  pub cells: Vec<GridCell>
}

impl MonthGrid {
  pub fn weeks(
    &self
  ) -> impl Iterator<Item = &[GridCell]>
  {
    self.cells.chunks(WEEK_DAYS)
  }

  pub fn today(
    &self
  ) -> Option<&GridCell> {
    self
      .cells
      .iter()
      .find(|cell| cell.is_today)
  }
}

/// Build the fixed 42-cell grid for
/// `month`.
///
/// `today` is a display-timezone date;
/// `events` should already be filtered
/// for the current view.
#[tracing::instrument(
  skip(events, today),
  fields(month = %month)
)]
pub fn build_grid(
  month: YearMonth,
  events: &[&EventRecord],
  today: NaiveDate
) -> MonthGrid {
  let first = month.first_day();
  let leading = first
    .weekday()
    .num_days_from_sunday()
    as usize;
  let days = month.days_in_month() as usize;
  let mut cells =
    Vec::with_capacity(GRID_CELLS);

  for offset in (1..=leading).rev() {
    let date = first
      - Duration::days(offset as i64);
    cells.push(GridCell::overflow(
      date,
      CellKind::LeadingOverflow
    ));
  }

  for date in
    first.iter_days().take(days)
  {
    cells.push(GridCell {
      date,
      day: date.day(),
      kind: CellKind::InMonth,
      is_today: date == today,
      has_events: !events_on_day(
        events, date
      )
      .is_empty(),
      day_key: Some(day_key(date))
    });
  }

  let trailing_start =
    month.next().first_day();
  let remaining =
    GRID_CELLS.saturating_sub(cells.len());
  for date in trailing_start
    .iter_days()
    .take(remaining)
  {
    cells.push(GridCell::overflow(
      date,
      CellKind::TrailingOverflow
    ));
  }

  MonthGrid {
    month,
    cells
  }
}
