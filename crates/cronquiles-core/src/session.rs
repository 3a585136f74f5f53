//! One region's calendar as the user browses it.
//!
//! The raw records stay untouched for the life of the session. Every render
//! recomputes the filtered view from them; only the pagination cursor and the
//! month sections it has disclosed carry over between calls.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::bucket::bucketize;
use crate::datetime::{YearMonth, to_display_date};
use crate::event::EventRecord;
use crate::feed::{Community, FeedDocument};
use crate::filter::{EventFilter, upcoming_events};
use crate::grid::{MonthGrid, build_grid};
use crate::i18n::Locale;
use crate::normalize::{NormalizedEvent, normalize};
use crate::pagination::{PaginationCursor, has_more, load_next};
use crate::store::ViewSettings;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySection {
    pub day_key: String,
    pub date: NaiveDate,
    /// Short weekday and day number, e.g. "Sáb 1".
    pub heading: String,
    pub events: Vec<NormalizedEvent>,
}

/// The rendered form of one disclosed month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthSection {
    pub month: YearMonth,
    pub title: String,
    pub days: Vec<DaySection>,
}

impl MonthSection {
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn event_count(&self) -> usize {
        self.days.iter().map(|day| day.events.len()).sum()
    }
}

/// Everything a renderer needs for one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarView {
    pub settings: ViewSettings,
    pub title: String,
    pub grid: MonthGrid,
    pub sections: Vec<MonthSection>,
    pub has_more: bool,
    /// The feed had no records at all.
    pub feed_is_empty: bool,
}

#[derive(Debug, Clone)]
pub struct CalendarSession {
    city: String,
    events: Vec<EventRecord>,
    communities: Vec<Community>,
    generated_at: Option<DateTime<Utc>>,
    settings: ViewSettings,
    now: DateTime<Utc>,
    cursor: PaginationCursor,
    has_more: bool,
    sections: Vec<MonthSection>,
}

impl CalendarSession {
    #[tracing::instrument(skip(doc, settings, now), fields(events = doc.events.len()))]
    pub fn new(city: &str, doc: FeedDocument, settings: ViewSettings, now: DateTime<Utc>) -> Self {
        let generated_at = doc.generated_at();
        let mut session = Self {
            city: city.to_string(),
            events: doc.events,
            communities: doc.communities,
            generated_at,
            settings,
            now,
            cursor: PaginationCursor::new(settings.view_month),
            has_more: false,
            sections: Vec::new(),
        };
        session.reset_listing();
        info!(
            city,
            month = %settings.view_month,
            has_more = session.has_more,
            "started calendar session"
        );
        session
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn communities(&self) -> &[Community] {
        &self.communities
    }

    pub fn generated_at(&self) -> Option<DateTime<Utc>> {
        self.generated_at
    }

    pub fn settings(&self) -> ViewSettings {
        self.settings
    }

    pub fn cursor(&self) -> PaginationCursor {
        self.cursor
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn sections(&self) -> &[MonthSection] {
        &self.sections
    }

    /// Take a new settings snapshot. The list restarts at the viewed month.
    #[tracing::instrument(skip(self))]
    pub fn apply_settings(&mut self, settings: ViewSettings) {
        self.settings = settings;
        self.reset_listing();
    }

    /// Re-anchor "today" and restart the list.
    pub fn set_now(&mut self, now: DateTime<Utc>) {
        self.now = now;
        self.reset_listing();
    }

    /// Disclose the month after the cursor, if anything lies beyond it.
    #[tracing::instrument(skip(self), fields(last = %self.cursor.last()))]
    pub fn load_more(&mut self) -> Option<&MonthSection> {
        let filter = EventFilter::from_settings(&self.settings);
        let filtered = filter.apply(&self.events, self.now);
        let step = load_next(self.cursor, &filtered)?;
        let section = month_section(&filtered, step.month, self.settings.locale);

        self.cursor = step.cursor;
        self.has_more = step.has_more;
        self.sections.push(section);
        self.sections.last()
    }

    /// Grid plus every disclosed month section.
    #[tracing::instrument(skip(self))]
    pub fn render_view(&self) -> CalendarView {
        let settings = self.settings;
        let filtered = EventFilter::from_settings(&settings).apply(&self.events, self.now);
        let grid = build_grid(settings.view_month, &filtered, to_display_date(self.now));
        CalendarView {
            settings,
            title: month_title(settings.view_month, settings.locale),
            grid,
            sections: self.sections.clone(),
            has_more: self.has_more,
            feed_is_empty: self.events.is_empty(),
        }
    }

    /// The next `limit` records after the viewed month, regardless of the
    /// past-events toggle.
    pub fn upcoming(&self, limit: usize) -> Vec<NormalizedEvent> {
        upcoming_events(&self.events, self.settings.view_month, limit)
            .into_iter()
            .map(|record| normalize(record, self.settings.locale))
            .collect()
    }

    fn reset_listing(&mut self) {
        let settings = self.settings;
        let filtered = EventFilter::from_settings(&settings).apply(&self.events, self.now);
        let first = month_section(&filtered, settings.view_month, settings.locale);
        let more = has_more(filtered.iter().copied(), settings.view_month);
        debug!(
            month = %settings.view_month,
            events = first.event_count(),
            has_more = more,
            "reset event list"
        );

        self.cursor = self.cursor.reset(settings.view_month);
        self.has_more = more;
        self.sections = vec![first];
    }
}

/// e.g. "Marzo 2025".
pub fn month_title(month: YearMonth, locale: Locale) -> String {
    format!("{} {}", locale.month_name(month.month()), month.year())
}

/// e.g. "Eventos de Marzo 2025".
pub fn section_title(month: YearMonth, locale: Locale) -> String {
    format!("{} {}", locale.t("cal.eventsOf"), month_title(month, locale))
}

/// Bucketize and normalize one month of the filtered records.
pub fn month_section(filtered: &[&EventRecord], month: YearMonth, locale: Locale) -> MonthSection {
    let days = bucketize(filtered, month)
        .into_iter()
        .map(|bucket| DaySection {
            heading: format!(
                "{} {}",
                locale.weekday_name(bucket.date.weekday().num_days_from_sunday()),
                bucket.date.day()
            ),
            day_key: bucket.day_key,
            date: bucket.date,
            events: bucket
                .events
                .into_iter()
                .map(|record| normalize(record, locale))
                .collect(),
        })
        .collect();

    MonthSection {
        month,
        title: section_title(month, locale),
        days,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 15, 18, 0, 0)
            .single()
            .expect("valid now")
    }

    fn settings(month: u32, show_past: bool) -> ViewSettings {
        ViewSettings {
            locale: Locale::Es,
            show_past_events: show_past,
            view_month: YearMonth::new(2025, month).expect("month"),
        }
    }

    fn feed() -> FeedDocument {
        FeedDocument {
            events: vec![
                EventRecord::new_dated("Talks | DevFest", "2025-03-01T18:00Z"),
                EventRecord::new_dated("Past", "2025-02-01T18:00Z"),
                EventRecord::new_dated("Meetup | Rust MX | Online", "2025-05-10T01:00Z"),
            ],
            ..FeedDocument::default()
        }
    }

    #[test]
    fn starts_at_view_month() {
        let session = CalendarSession::new("mexico", feed(), settings(2, false), now());
        assert_eq!(session.sections().len(), 1);
        assert!(session.sections()[0].is_empty());
        assert!(session.has_more());
        assert_eq!(session.sections()[0].title, "Eventos de Febrero 2025");
    }

    #[test]
    fn load_more_discloses_each_month_once() {
        let mut session = CalendarSession::new("mexico", feed(), settings(2, false), now());

        let march = session.load_more().expect("march").clone();
        assert_eq!(march.month.key(), "2025-03");
        assert_eq!(march.days[0].day_key, "2025-03-01");
        assert_eq!(march.days[0].heading, "Sáb 1");
        assert_eq!(march.days[0].events[0].display_name, "DevFest");

        let april = session.load_more().expect("april").clone();
        assert!(april.is_empty());

        // 2025-05-10T01:00Z is still May 9 in Mexico City.
        let may = session.load_more().expect("may").clone();
        assert_eq!(may.days[0].day_key, "2025-05-09");
        assert!(!session.has_more());
        assert!(session.load_more().is_none());

        let months: Vec<String> = session.sections().iter().map(|s| s.month.key()).collect();
        assert_eq!(months, vec!["2025-02", "2025-03", "2025-04", "2025-05"]);
    }

    #[test]
    fn settings_change_resets_the_cursor() {
        let mut session = CalendarSession::new("mexico", feed(), settings(2, false), now());
        session.load_more();
        session.load_more();
        assert_eq!(session.cursor().last().key(), "2025-04");

        session.apply_settings(settings(2, true));
        assert_eq!(session.cursor().last().key(), "2025-02");
        assert_eq!(session.sections().len(), 1);
        assert_eq!(session.sections()[0].event_count(), 1);
    }

    #[test]
    fn view_flags_today_and_event_days() {
        let session = CalendarSession::new("mexico", feed(), settings(3, false), now());
        let view = session.render_view();
        assert_eq!(view.title, "Marzo 2025");
        assert_eq!(view.grid.cells.len(), 42);
        assert!(view.grid.today().is_none());
        assert!(
            view.grid
                .cells
                .iter()
                .any(|c| c.has_events && c.day_key.as_deref() == Some("2025-03-01"))
        );
        assert!(!view.feed_is_empty);

        let february = CalendarSession::new("mexico", feed(), settings(2, false), now());
        let view = february.render_view();
        assert_eq!(
            view.grid.today().and_then(|c| c.day_key.as_deref()),
            Some("2025-02-15")
        );
    }

    #[test]
    fn upcoming_ignores_past_toggle() {
        let session = CalendarSession::new("mexico", feed(), settings(2, false), now());
        let upcoming = session.upcoming(1);
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].display_name, "DevFest");
    }
}
