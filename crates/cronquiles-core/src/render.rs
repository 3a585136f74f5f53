use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::app::FeedFailure;
use crate::config::Config;
use crate::feed::{Community, DownloadLinks, RegionInfo};
use crate::grid::{CellKind, GridCell};
use crate::i18n::Locale;
use crate::normalize::{DESCRIPTION_LIMIT, NormalizedEvent, with_utm_source};
use crate::session::{CalendarView, MonthSection};

const CELL_WIDTH: usize = 4;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, out, view))]
    pub fn write_calendar<W: Write>(&self, out: &mut W, view: &CalendarView) -> anyhow::Result<()> {
        let locale = view.settings.locale;
        if view.feed_is_empty {
            writeln!(out, "{}", locale.t("calendar.empty"))?;
            return Ok(());
        }

        self.write_grid(out, view)?;

        for section in &view.sections {
            self.write_section(out, section, locale)?;
        }
        if view.has_more {
            writeln!(out, "{}", self.paint(locale.t("cal.loadMore"), "36"))?;
        }
        Ok(())
    }

    /// Header, weekday row and the six grid weeks.
    pub fn write_grid<W: Write>(&self, out: &mut W, view: &CalendarView) -> anyhow::Result<()> {
        let locale = view.settings.locale;
        writeln!(
            out,
            "{}   {}   {}   [{}]",
            locale.t("cal.prev"),
            self.paint(&view.title, "1"),
            locale.t("cal.next"),
            locale.t("cal.today")
        )?;
        writeln!(out)?;

        for name in locale.weekday_names() {
            write!(out, "{}", pad_left(name, CELL_WIDTH))?;
        }
        writeln!(out)?;

        for week in view.grid.weeks() {
            for cell in week {
                write!(out, "{}", self.grid_cell(cell))?;
            }
            writeln!(out)?;
        }
        writeln!(out)?;
        Ok(())
    }

    pub fn write_section<W: Write>(
        &self,
        out: &mut W,
        section: &MonthSection,
        locale: Locale,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&section.title, "1;4"))?;
        if section.is_empty() {
            writeln!(out, "  {}", locale.t("calendar.noEvents"))?;
            writeln!(out)?;
            return Ok(());
        }

        for day in &section.days {
            writeln!(out, "{}", self.paint(&format!("── {}", day.heading), "1"))?;
            for event in &day.events {
                self.write_event(out, event, locale)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    pub fn write_event<W: Write>(
        &self,
        out: &mut W,
        event: &NormalizedEvent,
        locale: Locale,
    ) -> anyhow::Result<()> {
        let mut pills = Vec::new();
        if let Some(start) = event.start {
            pills.push(locale.format_short_date(start));
        }
        if let Some(range) = locale.format_time_range(event.start, event.end) {
            pills.push(range);
        }
        if !event.place_label.is_empty() {
            pills.push(event.place_label.clone());
        }
        let pills = pills
            .iter()
            .map(|pill| format!("[{pill}]"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(out, "  {}", self.paint(&pills, "33"))?;

        let badge = event
            .category_label
            .as_deref()
            .map(|category| format!("{} ", self.paint(&format!("<{category}>"), "35")))
            .unwrap_or_default();
        writeln!(out, "  {badge}{}", self.paint(&event.display_name, "1"))?;

        if let Some(location) = &event.location_label {
            writeln!(out, "    @ {location}")?;
            if let Some(map_url) = &event.map_url {
                writeln!(out, "      {}: {map_url}", locale.t("cal.viewOnMap"))?;
            }
        }

        if event.sources.is_empty() {
            if let Some(link) = &event.link {
                writeln!(out, "    {} {link}", locale.t("cal.viewEvent"))?;
            }
        } else {
            for source in &event.sources {
                let label = if source.label.is_empty() {
                    source.platform.as_str()
                } else {
                    source.label.as_str()
                };
                writeln!(out, "    {label}: {}", source.url)?;
            }
        }

        if let Some(description) = &event.short_description {
            let shown = if event.is_description_truncated {
                let head: String = description.chars().take(DESCRIPTION_LIMIT).collect();
                format!("{}… ({})", head.trim_end(), locale.t("cal.showMore"))
            } else {
                description.clone()
            };
            for line in shown.lines() {
                writeln!(out, "    {line}")?;
            }
        }

        if !event.tags.is_empty() {
            let tags = event
                .tags
                .iter()
                .map(|tag| format!("#{tag}"))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(out, "    {}", self.paint(&tags, "2"))?;
        }
        Ok(())
    }

    pub fn write_upcoming<W: Write>(
        &self,
        out: &mut W,
        events: &[NormalizedEvent],
        locale: Locale,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(locale.t("section.upcoming"), "1;4"))?;
        if events.is_empty() {
            writeln!(out, "  {}", locale.t("calendar.noEvents"))?;
            return Ok(());
        }
        for event in events {
            self.write_event(out, event, locale)?;
        }
        Ok(())
    }

    pub fn write_regions<W: Write>(
        &self,
        out: &mut W,
        regions: &[&RegionInfo],
        current: &str,
        locale: Locale,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(locale.t("section.regions"), "1;4"))?;
        let headers = vec![
            String::new(),
            "Slug".to_string(),
            "Region".to_string(),
            String::new(),
        ];
        let rows = regions
            .iter()
            .map(|region| {
                let marker = if region.slug == current {
                    self.paint("●", "32")
                } else {
                    String::new()
                };
                vec![
                    region.emoji.clone(),
                    region.slug.clone(),
                    region.name.clone(),
                    marker,
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    pub fn write_communities<W: Write>(
        &self,
        out: &mut W,
        communities: &[Community],
        locale: Locale,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(locale.t("section.communities"), "1;4"))?;
        for community in communities {
            writeln!(out, "  {}", self.paint(&community.name, "1"))?;
            if !community.description.is_empty() {
                writeln!(out, "    {}", community.description)?;
            }
            for link in &community.links {
                writeln!(out, "    {}: {}", link.label, with_utm_source(&link.url))?;
            }
        }
        Ok(())
    }

    pub fn write_links<W: Write>(
        &self,
        out: &mut W,
        links: &DownloadLinks,
        last_modified: Option<DateTime<Utc>>,
        locale: Locale,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}: {}", locale.t("btn.download.ics"), links.ics)?;
        writeln!(out, "{}: {}", locale.t("btn.download.json"), links.json)?;
        if let Some(webcal) = &links.webcal {
            writeln!(out, "{}: {webcal}", locale.t("btn.copy.webcal"))?;
        }
        let updated = last_modified
            .map(|dt| format!("{} {}", locale.format_long_date(dt), locale.format_time(dt)))
            .unwrap_or_else(|| locale.t("footer.notAvailable").to_string());
        writeln!(out, "{} {updated}", locale.t("footer.lastUpdate"))?;
        Ok(())
    }

    pub fn write_failure<W: Write>(&self, out: &mut W, failure: &FeedFailure) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&failure.message, "31"))?;
        Ok(())
    }

    fn grid_cell(&self, cell: &GridCell) -> String {
        let mut label = cell.day.to_string();
        if cell.has_events {
            label.push('*');
        }
        let padded = pad_left(&label, CELL_WIDTH);
        match cell.kind {
            CellKind::LeadingOverflow | CellKind::TrailingOverflow => self.paint(&padded, "2"),
            CellKind::InMonth if cell.is_today => self.paint(&padded, "7"),
            CellKind::InMonth if cell.has_events => self.paint(&padded, "32"),
            CellKind::InMonth => padded,
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn pad_left(text: &str, width: usize) -> String {
    let visible = UnicodeWidthStr::width(text);
    format!("{}{}", " ".repeat(width.saturating_sub(visible)), text)
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (idx, header) in headers.iter().enumerate() {
        write!(writer, "{:width$} ", header, width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::datetime::YearMonth;
    use crate::event::{EventRecord, EventSource};
    use crate::feed::FeedDocument;
    use crate::session::CalendarSession;
    use crate::store::ViewSettings;

    fn render_to_string(view: &CalendarView) -> String {
        let mut out = Vec::new();
        Renderer::plain()
            .write_calendar(&mut out, view)
            .expect("render");
        String::from_utf8(out).expect("utf8")
    }

    fn session(events: Vec<EventRecord>) -> CalendarSession {
        let now = Utc
            .with_ymd_and_hms(2025, 2, 15, 18, 0, 0)
            .single()
            .expect("valid now");
        let settings = ViewSettings {
            locale: Locale::En,
            show_past_events: false,
            view_month: YearMonth::new(2025, 3).expect("month"),
        };
        CalendarSession::new(
            "mexico",
            FeedDocument {
                events,
                ..FeedDocument::default()
            },
            settings,
            now,
        )
    }

    #[test]
    fn renders_grid_and_event_cards() {
        let mut record = EventRecord::new_dated("Talks | DevFest", "2025-03-01T18:00Z");
        record.location = Some("Jardín Centro, Jal".to_string());
        record.state_code = Some("MX-JAL".to_string());
        record.tags = vec!["gdg".to_string()];
        record.sources = vec![EventSource {
            platform: "meetup".to_string(),
            label: "Meetup".to_string(),
            url: "https://meetup.com/e/1".to_string(),
        }];

        let text = render_to_string(&session(vec![record]).render_view());
        assert!(text.contains("March 2025"));
        assert!(text.contains("Sun Mon Tue"));
        assert!(text.contains("  1*"));
        assert!(text.contains("Events of March 2025"));
        assert!(text.contains("[Mar 1] [12:00 PM] [Jal]"));
        assert!(text.contains("<Talks> DevFest"));
        assert!(text.contains("@ Jardín Centro, Jal"));
        assert!(text.contains("Meetup: https://meetup.com/e/1?utm_source=cron-quiles"));
        assert!(text.contains("#gdg"));
    }

    #[test]
    fn empty_feed_uses_empty_message() {
        let text = render_to_string(&session(Vec::new()).render_view());
        assert_eq!(text.trim(), "No events available to display in the calendar");
    }

    #[test]
    fn strips_ansi_for_widths() {
        assert_eq!(strip_ansi("\x1b[32m●\x1b[0m"), "●");
        assert_eq!(pad_left("7", 4), "   7");
    }
}
