use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;
use serde::{
  Deserialize,
  Serialize,
  Serializer
};

use crate::error::{
  CalendarError,
  CalendarResult
};

const TIMEZONE_CONFIG_FILE: &str =
  "cronquiles-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "CRONQUILES_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "CRONQUILES_TIME_CONFIG";
const DEFAULT_DISPLAY_TIMEZONE: &str =
  "America/Mexico_City";
/// Longest DST gap searched when local
/// midnight does not exist.
const MAX_GAP_MINUTES: i64 = 24 * 60;

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// The single timezone every day
/// boundary is computed in, regardless
/// of where the viewer is.
pub fn display_timezone() -> &'static Tz
{
  static DISPLAY_TZ: OnceLock<Tz> =
    OnceLock::new();
  DISPLAY_TZ.get_or_init(
    resolve_display_timezone
  )
}

#[must_use]
pub fn to_display_date(
  dt: DateTime<Utc>
) -> NaiveDate {
  dt.with_timezone(display_timezone())
    .date_naive()
}

#[must_use]
pub fn day_key(
  date: NaiveDate
) -> String {
  date.format("%Y-%m-%d").to_string()
}

/// First instant of the display-timezone
/// day containing `now`.
#[must_use]
pub fn start_of_display_day(
  now: DateTime<Utc>
) -> DateTime<Utc> {
  let date = to_display_date(now);
  display_midnight(date)
    .unwrap_or(now)
}

/// Midnight of `date` in the display
/// timezone, as UTC.
pub fn display_midnight(
  date: NaiveDate
) -> Option<DateTime<Utc>> {
  midnight_in(display_timezone(), date)
}

/// Midnight of `date` in `tz`. When
/// midnight falls in a DST gap, the
/// first local minute after the gap.
pub fn midnight_in(
  tz: &Tz,
  date: NaiveDate
) -> Option<DateTime<Utc>> {
  let midnight =
    date.and_hms_opt(0, 0, 0)?;
  (0..MAX_GAP_MINUTES).find_map(|step| {
    let local = midnight
      + Duration::minutes(step);
    match tz.from_local_datetime(&local)
    {
      | LocalResult::Single(dt) => {
        Some(dt.with_timezone(&Utc))
      }
      | LocalResult::Ambiguous(
        first,
        second
      ) => {
        Some(
          first
            .min(second)
            .with_timezone(&Utc)
        )
      }
      | LocalResult::None => {
        if step == 0 {
          tracing::debug!(
            %date,
            timezone = %tz,
            "midnight skipped by DST; \
             stepping past the gap"
          );
        }
        None
      }
    }
  })
}

fn resolve_display_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
  {
    if let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    ) {
      return tz;
    }
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_DISPLAY_TIMEZONE,
    "DEFAULT_DISPLAY_TIMEZONE"
  )
  .unwrap_or_else(|| {
    tracing::error!(
      "failed to parse fallback \
       timezone; using UTC"
    );
    chrono_tz::UTC
  })
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured display timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

fn from_display_local(
  local_naive: NaiveDateTime,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match display_timezone()
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Ok(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime does not \
         exist in display \
         timezone: {context}"
      ))
    }
  }
}

/// A calendar month, ordered
/// chronologically.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash
)]
pub struct YearMonth {
  year:  i32,
  month: u32
}

impl YearMonth {
  pub fn new(
    year: i32,
    month: u32
  ) -> Option<Self> {
    if (1..=12).contains(&month) {
      Some(Self {
        year,
        month
      })
    } else {
      None
    }
  }

  #[must_use]
  pub fn of(date: NaiveDate) -> Self {
    Self {
      year:  date.year(),
      month: date.month()
    }
  }

  /// Month containing `dt` in the
  /// display timezone.
  #[must_use]
  pub fn containing(
    dt: DateTime<Utc>
  ) -> Self {
    Self::of(to_display_date(dt))
  }

  pub fn year(self) -> i32 {
    self.year
  }

  pub fn month(self) -> u32 {
    self.month
  }

  #[must_use]
  pub fn next(self) -> Self {
    self.shift(1)
  }

  #[must_use]
  pub fn prev(self) -> Self {
    self.shift(-1)
  }

  #[must_use]
  pub fn shift(
    self,
    months: i32
  ) -> Self {
    let index = i64::from(self.year)
      * 12
      + i64::from(self.month - 1)
      + i64::from(months);
    let year = index.div_euclid(12);
    let month =
      index.rem_euclid(12) as u32 + 1;
    Self {
      year: i32::try_from(year)
        .unwrap_or(self.year),
      month
    }
  }

  pub fn first_day(self) -> NaiveDate {
    NaiveDate::from_ymd_opt(
      self.year, self.month, 1
    )
    .unwrap_or(NaiveDate::MIN)
  }

  pub fn last_day(self) -> NaiveDate {
    self
      .next()
      .first_day()
      .checked_sub_signed(
        Duration::days(1)
      )
      .unwrap_or(self.first_day())
  }

  pub fn days_in_month(self) -> u32 {
    self.last_day().day()
  }

  pub fn contains(
    self,
    date: NaiveDate
  ) -> bool {
    date.year() == self.year
      && date.month() == self.month
  }

  /// First instant of the month in the
  /// display timezone.
  pub fn start_instant(
    self
  ) -> Option<DateTime<Utc>> {
    display_midnight(self.first_day())
  }

  /// `YYYY-MM`, the form region
  /// metadata uses for active months.
  pub fn key(self) -> String {
    format!(
      "{:04}-{:02}",
      self.year, self.month
    )
  }
}

impl Serialize for YearMonth {
  fn serialize<S>(
    &self,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(&self.key())
  }
}

impl fmt::Display for YearMonth {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(&self.key())
  }
}

impl FromStr for YearMonth {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    let (year, month) = trimmed
      .split_once('-')
      .ok_or_else(|| {
        anyhow!(
          "expected YYYY-MM, got: {s}"
        )
      })?;
    let year: i32 = year
      .parse()
      .with_context(|| {
        format!("invalid year in {s}")
      })?;
    let month: u32 = month
      .parse()
      .with_context(|| {
        format!("invalid month in {s}")
      })?;
    Self::new(year, month).ok_or_else(
      || {
        anyhow!(
          "month out of range: {s}"
        )
      }
    )
  }
}

const ZULU_FORMATS: [&str; 6] = [
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%d %H:%M:%S",
  "%Y-%m-%d %H:%M",
  "%Y%m%dT%H%M%S"
];

const OFFSET_FORMATS: [&str; 3] = [
  "%Y-%m-%dT%H:%M%:z",
  "%Y-%m-%d %H:%M:%S%:z",
  "%Y-%m-%d %H:%M:%S%.f%:z"
];

/// Parse a feed `dtstart`/`dtend`.
///
/// Timestamps without an offset are read
/// as display-timezone wall time; a bare
/// date is its display midnight.
pub fn parse_feed_timestamp(
  raw: &str
) -> CalendarResult<DateTime<Utc>> {
  let token = raw.trim();
  let malformed = || {
    CalendarError::MalformedDate {
      raw: raw.to_string()
    }
  };
  if token.is_empty() {
    return Err(malformed());
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  if let Some(naive) = token
    .strip_suffix('Z')
    .or_else(|| {
      token.strip_suffix('z')
    })
  {
    for fmt in ZULU_FORMATS {
      if let Ok(ndt) =
        NaiveDateTime::parse_from_str(
          naive, fmt
        )
      {
        return Ok(ndt.and_utc());
      }
    }
    return Err(malformed());
  }

  for fmt in OFFSET_FORMATS {
    if let Ok(dt) =
      DateTime::parse_from_str(
        token, fmt
      )
    {
      return Ok(dt.with_timezone(&Utc));
    }
  }

  for fmt in &ZULU_FORMATS[..5] {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return from_display_local(
        ndt, fmt
      )
      .map_err(|_| malformed());
    }
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return display_midnight(date)
      .ok_or_else(malformed);
  }

  Err(malformed())
}

/// Resolve the `--now` expression used
/// to pin the clock.
#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_now_expr(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return Ok(start_of_display_day(
        now
      ));
    }
    | "tomorrow" => {
      let today =
        parse_now_expr("today", now)?;
      return Ok(
        today + Duration::days(1)
      );
    }
    | "yesterday" => {
      let today =
        parse_now_expr("today", now)?;
      return Ok(
        today - Duration::days(1)
      );
    }
    | _ => {}
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(token)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let duration = match unit {
      | "d" => Duration::days(num),
      | "h" => Duration::hours(num),
      | "m" => Duration::minutes(num),
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ))
      }
    };

    return Ok(
      if sign == "-" {
        now - duration
      } else {
        now + duration
      }
    );
  }

  parse_feed_timestamp(token)
    .map_err(|_| {
      anyhow!(
        "unrecognized date expression: \
         {input}"
      )
    })
    .with_context(|| {
      "supported formats: \
       now/today/tomorrow/yesterday, \
       +Nd/+Nh/+Nm, RFC3339, \
       YYYY-MM-DD, YYYY-MM-DDTHH:MM"
    })
}
