//! Presentation shape for feed records.
//!
//! Feed titles and descriptions follow loose conventions that changed over
//! time (`category | name`, later `category | name | location`; descriptions
//! that repeat the title on their first line; bilingual "language of the
//! event" notes). Everything that interprets those conventions lives here so
//! a format change touches one module.

use std::sync::OnceLock;

use chrono::{
  DateTime,
  Utc
};
use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::event::{
  EventRecord,
  EventSource
};
use crate::i18n::Locale;

/// Descriptions longer than this (in
/// characters) are flagged truncated.
pub const DESCRIPTION_LIMIT: usize =
  300;

/// Character budget for the one-line
/// location label.
pub const LOCATION_BUDGET: usize = 90;

const BILINGUAL_LINE_LIMIT: usize = 120;

const TITLE_SEPARATOR: char = '|';

const ONLINE_SENTINELS: [&str; 4] = [
  "online",
  "virtual",
  "en línea",
  "en linea"
];

const ONLINE_PLATFORM_FRAGMENTS: [&str;
  5] = [
  "luma.com",
  "meetup.com",
  "zoom",
  "meet.google.com",
  "teams.microsoft.com"
];

const REGION_PREFIX: &str = "MX-";

const REGION_ABBREVIATIONS: [(
  &str,
  &str
); 7] = [
  ("CMX", "CDMX"),
  ("JAL", "Jal"),
  ("NLE", "NL"),
  ("PUE", "Pue"),
  ("QRO", "Qro"),
  ("YUC", "Yuc"),
  ("AGS", "Ags")
];

const ENGLISH_LANGUAGE_MARKERS: [&str;
  3] =
  ["Spanish", "English", "subtitles"];
const SPANISH_LANGUAGE_MARKERS: [&str;
  3] =
  ["español", "inglés", "subtítulos"];

const ADDRESS_MARKER: &str = "Address:";

const UTM_SOURCE: &str = "cron-quiles";

const MAPS_SEARCH_URL: &str =
  "https://www.google.com/maps/search/";

/// The pieces encoded in a feed title.
#[derive(
  Debug, Clone, PartialEq, Eq, Serialize,
)]
pub struct TitleParts {
  pub display_name:   String,
  pub category_label: Option<String>,
  pub location_label: Option<String>
}

/// A record ready for display. Built
/// fresh on every render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
  pub id:                       String,
  pub start:
    Option<DateTime<Utc>>,
  pub end:
    Option<DateTime<Utc>>,
  pub display_name:             String,
  pub category_label:
    Option<String>,
  pub location_label:
    Option<String>,
  pub is_online:                bool,
  pub place_label:              String,
  pub short_description:
    Option<String>,
  pub is_description_truncated: bool,
  pub map_url:                  Option<String>,
  pub link:                     Option<String>,
  pub sources:
    Vec<EventSource>,
  pub tags:                     Vec<String>
}

#[tracing::instrument(
  skip(record),
  fields(id = ?record.id)
)]
pub fn normalize(
  record: &EventRecord,
  locale: Locale
) -> NormalizedEvent {
  let raw_title = record
    .raw_title()
    .unwrap_or(locale.t("cal.untitled"));
  let title = parse_title(raw_title);
  let is_online = is_online(record);
  let location = record
    .location
    .as_deref()
    .filter(|loc| !loc.trim().is_empty());

  let location_label = if is_online {
    None
  } else if let Some(loc) = location {
    Some(shorten_location(
      loc,
      LOCATION_BUDGET
    ))
    .filter(|label| !label.is_empty())
  } else {
    title.location_label.clone()
  };

  let map_url = if is_online {
    None
  } else {
    location.and_then(maps_url)
  };

  let short_description = record
    .description
    .as_deref()
    .and_then(|raw| {
      clean_description(
        raw,
        location,
        title.category_label.as_deref(),
        locale
      )
    });
  let is_description_truncated =
    short_description
      .as_deref()
      .is_some_and(|text| {
        text.chars().count()
          > DESCRIPTION_LIMIT
      });

  let link = record
    .url
    .as_deref()
    .filter(|url| !url.trim().is_empty())
    .map(with_utm_source);
  let sources = record
    .sources
    .iter()
    .map(|source| EventSource {
      url: with_utm_source(&source.url),
      ..source.clone()
    })
    .collect();

  NormalizedEvent {
    id: record.event_id(),
    start: record.start(),
    end: record.end(),
    display_name: title.display_name,
    category_label: title
      .category_label,
    location_label,
    is_online,
    place_label: place_label(
      record, is_online, locale
    ),
    short_description,
    is_description_truncated,
    map_url,
    link,
    sources,
    tags: record.tags.clone()
  }
}

/// Split `category | name [| location]`.
///
/// With no separator the whole title is
/// the display name. Anything past the
/// second segment is the embedded
/// location label.
pub fn parse_title(
  raw: &str
) -> TitleParts {
  let trimmed = raw.trim();
  if !trimmed.contains(TITLE_SEPARATOR)
  {
    return TitleParts {
      display_name:   trimmed
        .to_string(),
      category_label: None,
      location_label: None
    };
  }

  let parts: Vec<&str> = trimmed
    .split(TITLE_SEPARATOR)
    .map(str::trim)
    .collect();
  let category = parts[0];
  let name = parts[1];
  let location = parts[2..]
    .iter()
    .copied()
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(" | ");
  let location_label =
    Some(location)
      .filter(|loc| !loc.is_empty());

  match (
    category.is_empty(),
    name.is_empty()
  ) {
    | (_, false) => {
      TitleParts {
        display_name: name.to_string(),
        category_label: Some(
          category.to_string()
        )
        .filter(|c| !c.is_empty()),
        location_label
      }
    }
    | (false, true) => {
      TitleParts {
        display_name: category
          .to_string(),
        category_label: None,
        location_label
      }
    }
    | (true, true) => {
      TitleParts {
        display_name: trimmed
          .trim_matches(|c: char| {
            c == TITLE_SEPARATOR
              || c.is_whitespace()
          })
          .to_string(),
        category_label: None,
        location_label
      }
    }
  }
}

pub fn is_online(
  record: &EventRecord
) -> bool {
  detect_online(
    record.online,
    record.location.as_deref()
  )
}

/// First match wins: `online: true`, URL
/// location, sentinel word, platform
/// domain. A `false` flag still checks
/// the location.
pub fn detect_online(
  flag: Option<bool>,
  location: Option<&str>
) -> bool {
  if flag == Some(true) {
    return true;
  }

  let Some(loc) = location
    .map(str::trim)
    .filter(|loc| !loc.is_empty())
  else {
    return false;
  };
  let lower = loc.to_lowercase();

  if lower.starts_with("http://")
    || lower.starts_with("https://")
  {
    return true;
  }

  if ONLINE_SENTINELS
    .contains(&lower.as_str())
  {
    return true;
  }

  ONLINE_PLATFORM_FRAGMENTS
    .iter()
    .any(|fragment| {
      lower.contains(fragment)
    })
}

/// Short code shown in the place pill
/// (`CDMX`, `Jal`, `En línea`, ...).
pub fn place_label(
  record: &EventRecord,
  online: bool,
  locale: Locale
) -> String {
  if online {
    return locale
      .t("cal.online")
      .to_string();
  }

  if let Some(abbr) = record
    .state_code
    .as_deref()
    .and_then(region_abbreviation)
  {
    return abbr;
  }

  [
    record.city.as_deref(),
    record.state.as_deref()
  ]
  .into_iter()
  .flatten()
  .map(first_segment)
  .find(|segment| !segment.is_empty())
  .unwrap_or_default()
}

/// `MX-JAL` -> `Jal`, `MX-CMX` -> `CDMX`;
/// unknown codes are title-cased.
pub fn region_abbreviation(
  code: &str
) -> Option<String> {
  let upper =
    code.trim().to_uppercase();
  let stripped = upper
    .strip_prefix(REGION_PREFIX)
    .unwrap_or(&upper);
  if stripped.chars().count() < 2 {
    return None;
  }

  if let Some((_, abbr)) =
    REGION_ABBREVIATIONS
      .iter()
      .find(|(known, _)| {
        *known == stripped
      })
  {
    return Some(abbr.to_string());
  }

  let mut chars = stripped.chars();
  let first = chars.next()?;
  Some(format!(
    "{first}{}",
    chars.as_str().to_lowercase()
  ))
}

fn first_segment(text: &str) -> String {
  text
    .trim()
    .split(',')
    .next()
    .unwrap_or_default()
    .trim()
    .to_string()
}

/// Tidy a feed description for display.
///
/// Returns `None` when nothing is left.
#[tracing::instrument(skip_all)]
pub fn clean_description(
  raw: &str,
  location: Option<&str>,
  category: Option<&str>,
  locale: Locale
) -> Option<String> {
  let unified = raw.replace("\r\n", "\n");
  let lines: Vec<&str> =
    unified.split('\n').collect();
  let processed = if lines.len() > 1 {
    lines[1..]
      .iter()
      .map(|line| line.trim())
      .collect::<Vec<_>>()
      .join("\n")
  } else {
    unified.clone()
  };

  let mut clean =
    collapse_blank_runs(&processed);

  if location.is_some()
    && clean.contains(ADDRESS_MARKER)
  {
    clean = strip_address_block(&clean);
  }

  if category.is_some()
    && !clean.is_empty()
    && let Some(re) = hosted_by_re()
  {
    let stripped = collapse_blank_runs(
      &re.replace_all(&clean, "")
    );
    clean = stripped;
  }

  clean =
    collapse_bilingual_pair(&clean, locale);

  if clean.is_empty() {
    None
  } else {
    Some(clean)
  }
}

/// First line, whitespace collapsed,
/// hard-cut with `…` past `max` chars.
pub fn shorten_location(
  location: &str,
  max: usize
) -> String {
  let first_line =
    collapse_whitespace(
      location
        .split('\n')
        .next()
        .unwrap_or_default()
    );
  if first_line.chars().count() <= max
  {
    return first_line;
  }

  let head: String = first_line
    .chars()
    .take(max.saturating_sub(1))
    .collect();
  format!("{}…", head.trim_end())
}

/// Search text for a map lookup.
pub fn map_query(
  location: &str
) -> Option<String> {
  let query = collapse_whitespace(
    location
      .split('\n')
      .next()
      .unwrap_or_default()
  );
  Some(query)
    .filter(|q| !q.is_empty())
}

pub fn maps_url(
  location: &str
) -> Option<String> {
  let query = map_query(location)?;
  Url::parse_with_params(
    MAPS_SEARCH_URL,
    &[("api", "1"), ("query", query.as_str())]
  )
  .ok()
  .map(String::from)
}

/// Tag an outgoing link with our
/// `utm_source`; unparsable URLs are
/// returned untouched.
pub fn with_utm_source(
  raw: &str
) -> String {
  let Ok(mut parsed) = Url::parse(raw)
  else {
    return raw.to_string();
  };

  let kept: Vec<(String, String)> =
    parsed
      .query_pairs()
      .filter(|(key, _)| {
        key != "utm_source"
      })
      .map(|(key, value)| {
        (
          key.into_owned(),
          value.into_owned()
        )
      })
      .collect();
  parsed
    .query_pairs_mut()
    .clear()
    .extend_pairs(kept)
    .append_pair(
      "utm_source",
      UTM_SOURCE
    );
  parsed.to_string()
}

fn collapse_whitespace(
  text: &str
) -> String {
  text
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
}

fn collapse_blank_runs(
  text: &str
) -> String {
  match blank_runs_re() {
    | Some(re) => {
      re.replace_all(text, "\n\n")
        .trim()
        .to_string()
    }
    | None => text.trim().to_string()
  }
}

fn strip_address_block(
  text: &str
) -> String {
  let Some(idx) =
    text.find(ADDRESS_MARKER)
  else {
    return text.to_string();
  };

  let before = text[..idx].trim();
  let after = text
    [idx + ADDRESS_MARKER.len()..]
    .trim();
  let block_end =
    after.find("\n\n").unwrap_or(
      after.len()
    );
  let rest = after[block_end..].trim();

  let joined = if rest.is_empty() {
    before.to_string()
  } else {
    format!("{before}\n\n{rest}")
  };
  collapse_blank_runs(&joined)
}

/// Two short consecutive lines saying
/// the same "language of the event"
/// thing in English then Spanish keep
/// only the line in the active locale.
fn collapse_bilingual_pair(
  text: &str,
  locale: Locale
) -> String {
  let lines: Vec<&str> =
    text.split('\n').collect();
  let filled: Vec<usize> = lines
    .iter()
    .enumerate()
    .filter(|(_, line)| {
      !line.trim().is_empty()
    })
    .map(|(idx, _)| idx)
    .take(2)
    .collect();
  let [first, second] = filled[..]
  else {
    return text.to_string();
  };

  let english = lines[first].trim();
  let spanish = lines[second].trim();
  if english.chars().count()
    >= BILINGUAL_LINE_LIMIT
    || spanish.chars().count()
      >= BILINGUAL_LINE_LIMIT
  {
    return text.to_string();
  }

  let has_en = ENGLISH_LANGUAGE_MARKERS
    .iter()
    .any(|m| english.contains(m));
  let has_es = SPANISH_LANGUAGE_MARKERS
    .iter()
    .any(|m| spanish.contains(m));
  if !(has_en && has_es) {
    return text.to_string();
  }

  let dropped = if locale.is_spanish() {
    first
  } else {
    second
  };
  let kept = lines
    .iter()
    .enumerate()
    .filter(|(idx, _)| *idx != dropped)
    .map(|(_, line)| *line)
    .collect::<Vec<_>>()
    .join("\n");
  collapse_blank_runs(&kept)
}

fn blank_runs_re() -> Option<&'static Regex>
{
  static RE: OnceLock<Option<Regex>> =
    OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"(\n\s*){3,}").ok()
  })
  .as_ref()
}

fn hosted_by_re() -> Option<&'static Regex>
{
  static RE: OnceLock<Option<Regex>> =
    OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(
      r"(?i)(?:hosted by|organizado por)\s+[^\n]+"
    )
    .ok()
  })
  .as_ref()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record_at(
    location: Option<&str>
  ) -> EventRecord {
    EventRecord {
      title: Some(
        "Talks | DevFest".to_string()
      ),
      location: location
        .map(str::to_string),
      ..EventRecord::default()
    }
  }

  #[test]
  fn parses_two_field_titles() {
    let parts =
      parse_title("Talks | DevFest");
    assert_eq!(
      parts.display_name,
      "DevFest"
    );
    assert_eq!(
      parts.category_label.as_deref(),
      Some("Talks")
    );
    assert_eq!(
      parts.location_label,
      None
    );
  }

  #[test]
  fn parses_three_field_titles() {
    let parts = parse_title(
      "Talks | DevFest | Online"
    );
    assert_eq!(
      parts.display_name,
      "DevFest"
    );
    assert_eq!(
      parts.category_label.as_deref(),
      Some("Talks")
    );
    assert_eq!(
      parts.location_label.as_deref(),
      Some("Online")
    );

    let extra = parse_title(
      "GDG | Workshop | Centro | Gdl"
    );
    assert_eq!(
      extra.location_label.as_deref(),
      Some("Centro | Gdl")
    );
  }

  #[test]
  fn plain_titles_have_no_category() {
    let parts = parse_title("DevFest");
    assert_eq!(
      parts.display_name,
      "DevFest"
    );
    assert_eq!(
      parts.category_label,
      None
    );
  }

  #[test]
  fn degenerate_separators_keep_a_name()
  {
    assert_eq!(
      parse_title("Talks |")
        .display_name,
      "Talks"
    );
    assert_eq!(
      parse_title(" | ").display_name,
      ""
    );
  }

  #[test]
  fn url_locations_are_online() {
    assert!(detect_online(
      None,
      Some("https://zoom.us/j/123")
    ));
    assert!(!detect_online(
      None,
      Some("Jardín Centro, Jal")
    ));
  }

  #[test]
  fn online_detection_priority() {
    assert!(detect_online(
      None,
      Some("  En Línea ")
    ));
    assert!(detect_online(
      None,
      Some("Stream on Meetup.com")
    ));
    assert!(detect_online(
      Some(true),
      Some("Jardín Centro, Jal")
    ));
    assert!(detect_online(
      Some(false),
      Some("https://zoom.us/j/1")
    ));
    assert!(!detect_online(
      Some(false),
      Some("Jardín Centro, Jal")
    ));
    assert!(!detect_online(None, None));
    assert!(!detect_online(
      None,
      Some("   ")
    ));
  }

  #[test]
  fn place_labels_follow_region_codes()
  {
    let mut record = record_at(Some(
      "Jardín Centro, Jal"
    ));
    record.state_code =
      Some("MX-CMX".to_string());
    assert_eq!(
      place_label(
        &record,
        false,
        Locale::Es
      ),
      "CDMX"
    );

    record.state_code =
      Some("MX-GUA".to_string());
    assert_eq!(
      place_label(
        &record,
        false,
        Locale::Es
      ),
      "Gua"
    );

    record.state_code = None;
    record.city = Some(
      " Guadalajara, Jalisco"
        .to_string()
    );
    assert_eq!(
      place_label(
        &record,
        false,
        Locale::Es
      ),
      "Guadalajara"
    );

    assert_eq!(
      place_label(
        &record,
        true,
        Locale::En
      ),
      "Online"
    );
    assert_eq!(
      place_label(
        &EventRecord::default(),
        false,
        Locale::Es
      ),
      ""
    );
  }

  #[test]
  fn description_drops_title_line_and_blank_runs()
  {
    let raw = "DevFest\nFirst line\n\n\n\n  Second line  ";
    let clean = clean_description(
      raw,
      None,
      None,
      Locale::Es
    )
    .expect("description");
    assert_eq!(
      clean,
      "First line\n\nSecond line"
    );

    assert_eq!(
      clean_description(
        "Only the title",
        None,
        None,
        Locale::Es
      )
      .as_deref(),
      Some("Only the title")
    );
    assert_eq!(
      clean_description(
        "Title\n\n   ",
        None,
        None,
        Locale::Es
      ),
      None
    );
  }

  #[test]
  fn description_strips_hosted_by_with_category()
  {
    let raw = "Title\nCome code with us\nHosted by GDG Guadalajara\n\nBring a laptop";
    let with_category =
      clean_description(
        raw,
        None,
        Some("GDG"),
        Locale::Es
      )
      .expect("description");
    assert_eq!(
      with_category,
      "Come code with us\n\nBring a laptop"
    );

    let without = clean_description(
      raw,
      None,
      None,
      Locale::Es
    )
    .expect("description");
    assert!(
      without.contains("Hosted by")
    );
  }

  #[test]
  fn description_strips_address_block_when_location_shown()
  {
    let raw = "Title\nIntro\n\nAddress: Av. Juárez 10\nCentro\n\nAgenda";
    let clean = clean_description(
      raw,
      Some("Av. Juárez 10"),
      None,
      Locale::Es
    )
    .expect("description");
    assert_eq!(clean, "Intro\n\nAgenda");
  }

  #[test]
  fn bilingual_note_keeps_active_locale()
  {
    let raw = "Title\nThis event is in Spanish\nEste evento es en español\n\nDetails";
    assert_eq!(
      clean_description(
        raw,
        None,
        None,
        Locale::Es
      )
      .as_deref(),
      Some(
        "Este evento es en español\n\nDetails"
      )
    );
    assert_eq!(
      clean_description(
        raw,
        None,
        None,
        Locale::En
      )
      .as_deref(),
      Some(
        "This event is in Spanish\n\nDetails"
      )
    );
  }

  #[test]
  fn long_descriptions_are_flagged() {
    let body = "x".repeat(
      DESCRIPTION_LIMIT + 1
    );
    let record = EventRecord {
      title: Some("Talk".to_string()),
      description: Some(format!(
        "Talk\n{body}"
      )),
      ..EventRecord::default()
    };
    let normalized =
      normalize(&record, Locale::Es);
    assert!(
      normalized
        .is_description_truncated
    );
    assert_eq!(
      normalized
        .short_description
        .as_deref(),
      Some(body.as_str())
    );
  }

  #[test]
  fn shortens_locations() {
    assert_eq!(
      shorten_location(
        "  Av.  Juárez   10 \nPiso 2",
        90
      ),
      "Av. Juárez 10"
    );
    let long = "a".repeat(120);
    let short =
      shorten_location(&long, 90);
    assert_eq!(
      short.chars().count(),
      90
    );
    assert!(short.ends_with('…'));
  }

  #[test]
  fn builds_map_links() {
    let url = maps_url(
      "Av. Juárez 10\nPiso 2"
    )
    .expect("maps url");
    assert!(url.starts_with(
      "https://www.google.com/maps/search/?api=1&query="
    ));
    assert!(url.contains("Ju%C3%A1rez"));
    assert!(!url.contains("Piso"));
    assert_eq!(maps_url("  "), None);
  }

  #[test]
  fn tags_links_with_utm_source() {
    assert_eq!(
      with_utm_source(
        "https://lu.ma/abc?utm_source=x&ref=1"
      ),
      "https://lu.ma/abc?ref=1&utm_source=cron-quiles"
    );
    assert_eq!(
      with_utm_source("not a url"),
      "not a url"
    );
  }

  #[test]
  fn normalizes_online_records_without_location_label()
  {
    let record = EventRecord {
      title: Some(
        "Talks | DevFest | Online"
          .to_string()
      ),
      location: Some(
        "https://zoom.us/j/123"
          .to_string()
      ),
      url: Some(
        "https://gdg.community.dev/e/1"
          .to_string()
      ),
      ..EventRecord::default()
    };
    let normalized =
      normalize(&record, Locale::En);
    assert!(normalized.is_online);
    assert_eq!(
      normalized.location_label,
      None
    );
    assert_eq!(
      normalized.map_url,
      None
    );
    assert_eq!(
      normalized.place_label,
      "Online"
    );
    assert_eq!(
      normalized.link.as_deref(),
      Some(
        "https://gdg.community.dev/e/1?utm_source=cron-quiles"
      )
    );
  }

  #[test]
  fn in_person_records_fall_back_to_title_location()
  {
    let record = EventRecord {
      title: Some(
        "Talks | DevFest | Centro"
          .to_string()
      ),
      ..EventRecord::default()
    };
    let normalized =
      normalize(&record, Locale::Es);
    assert!(!normalized.is_online);
    assert_eq!(
      normalized
        .location_label
        .as_deref(),
      Some("Centro")
    );

    let untitled = normalize(
      &EventRecord::default(),
      Locale::En
    );
    assert_eq!(
      untitled.display_name,
      "Untitled event"
    );
  }
}
