use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use chrono::{
  DateTime,
  Utc
};
use serde::de::{
  DeserializeOwned,
  Error as _
};
use serde::{
  Deserialize,
  Serialize
};
use serde_json::{
  Map,
  Value
};
use tracing::{
  debug,
  info,
  warn
};
use url::Url;

use crate::datetime::{
  YearMonth,
  parse_feed_timestamp
};
use crate::error::{
  CalendarError,
  CalendarResult
};
use crate::event::{
  EventRecord,
  EventSource,
  null_as_default,
  null_as_empty
};

pub const REGIONS_PATH: &str =
  "data/states_metadata.json";

/// Region tab that is never hidden.
pub const ALWAYS_VISIBLE_REGION: &str =
  "mexico";

#[derive(
  Debug, Clone, Default, Serialize, Deserialize,
)]
pub struct Community {
  #[serde(
    default,
    deserialize_with = "null_as_default"
  )]
  pub name:        String,
  #[serde(
    default,
    deserialize_with = "null_as_default"
  )]
  pub description: String,
  #[serde(
    default,
    deserialize_with = "null_as_empty"
  )]
  pub links:       Vec<EventSource>
}

/// One entry of the region metadata
/// list.
#[derive(
  Debug, Clone, Default, Serialize, Deserialize,
)]
pub struct RegionInfo {
  pub slug:               String,
  #[serde(default)]
  pub name:               String,
  #[serde(default)]
  pub emoji:              String,
  /// Sorted `YYYY-MM` keys.
  #[serde(default)]
  pub active_months:
    Option<Vec<String>>,
  #[serde(default)]
  pub future_event_count: Option<u64>
}

impl RegionInfo {
  /// Whether the region has anything to
  /// show from `view_month` on.
  pub fn has_events_from(
    &self,
    view_month: YearMonth
  ) -> bool {
    match &self.active_months {
      | Some(months) => {
        let key = view_month.key();
        months
          .iter()
          .any(|month| *month >= key)
      }
      | None => {
        self
          .future_event_count
          .unwrap_or(0)
          > 0
      }
    }
  }
}

/// Region tabs to show for the current
/// view, in metadata order.
pub fn visible_regions<'a>(
  regions: &'a [RegionInfo],
  current: &str,
  show_past_events: bool,
  view_month: YearMonth
) -> Vec<&'a RegionInfo> {
  regions
    .iter()
    .filter(|region| {
      region.slug
        == ALWAYS_VISIBLE_REGION
        || region.slug == current
        || show_past_events
        || region
          .has_events_from(view_month)
    })
    .collect()
}

/// A region feed, whichever of the two
/// document shapes it arrived in.
#[derive(Debug, Clone, Default)]
pub struct FeedDocument {
  pub events:       Vec<EventRecord>,
  pub communities:  Vec<Community>,
  pub generated_at: Option<String>,
  pub total_events: Option<u64>,
  pub city:         Option<String>
}

impl FeedDocument {
  pub fn generated_at(
    &self
  ) -> Option<DateTime<Utc>> {
    self
      .generated_at
      .as_deref()
      .and_then(|raw| {
        parse_feed_timestamp(raw).ok()
      })
  }
}

/// Decodes each entry on its own so one
/// bad record only costs that record.
fn decode_entries<T>(
  entries: Vec<Value>,
  what: &'static str
) -> Vec<T>
where
  T: DeserializeOwned
{
  entries
    .into_iter()
    .enumerate()
    .filter_map(|(index, entry)| {
      match serde_json::from_value(entry)
      {
        | Ok(item) => Some(item),
        | Err(err) => {
          warn!(
            what,
            index,
            error = %err,
            "skipping malformed feed entry"
          );
          None
        }
      }
    })
    .collect()
}

fn take_list(
  map: &mut Map<String, Value>,
  key: &str
) -> Vec<Value> {
  match map.remove(key) {
    | Some(Value::Array(items)) => items,
    | Some(Value::Null) | None => {
      Vec::new()
    }
    | Some(other) => {
      warn!(
        key,
        found = %other,
        "ignoring non-list feed field"
      );
      Vec::new()
    }
  }
}

fn take_string(
  map: &mut Map<String, Value>,
  key: &str
) -> Option<String> {
  match map.remove(key) {
    | Some(Value::String(text)) => {
      Some(text)
    }
    | _ => None
  }
}

/// Accepts a bare array of records or an
/// object with `events` and
/// `communities`.
#[tracing::instrument(skip_all)]
pub fn parse_feed_document(
  text: &str
) -> CalendarResult<FeedDocument> {
  let value: Value =
    serde_json::from_str(text)?;
  let doc = match value {
    | Value::Array(events) => {
      FeedDocument {
        events: decode_entries(
          events, "event"
        ),
        ..FeedDocument::default()
      }
    }
    | Value::Object(mut map) => {
      let events =
        take_list(&mut map, "events");
      let communities =
        take_list(&mut map, "communities");
      FeedDocument {
        events:       decode_entries(
          events, "event"
        ),
        communities:  decode_entries(
          communities,
          "community"
        ),
        generated_at: take_string(
          &mut map,
          "generated_at"
        ),
        total_events: map
          .get("total_events")
          .and_then(Value::as_u64),
        city:         take_string(
          &mut map, "city"
        )
      }
    }
    | other => {
      return Err(
        serde_json::Error::custom(
          format!(
            "expected an array or object, \
             found {other}"
          )
        )
        .into()
      );
    }
  };
  debug!(
    events = doc.events.len(),
    communities = doc.communities.len(),
    "parsed feed document"
  );
  Ok(doc)
}

pub fn parse_regions(
  text: &str
) -> CalendarResult<Vec<RegionInfo>> {
  Ok(serde_json::from_str(text)?)
}

pub fn city_json_path(
  city: &str
) -> String {
  format!("data/cronquiles-{city}.json")
}

pub fn city_ics_path(
  city: &str
) -> String {
  format!("data/cronquiles-{city}.ics")
}

/// Subscription and download targets for
/// one region.
#[derive(
  Debug, Clone, PartialEq, Eq, Serialize,
)]
pub struct DownloadLinks {
  pub ics:    String,
  pub json:   String,
  /// Only for feeds served over HTTP.
  pub webcal: Option<String>
}

#[derive(Debug, Clone)]
pub enum FeedBase {
  Remote(Url),
  Local(PathBuf)
}

impl FeedBase {
  /// `http(s)://…` is remote; anything
  /// else is a directory on disk.
  pub fn parse(
    raw: &str
  ) -> CalendarResult<Self> {
    let trimmed = raw.trim();
    let lower =
      trimmed.to_ascii_lowercase();
    if lower.starts_with("http://")
      || lower.starts_with("https://")
    {
      let with_slash =
        if trimmed.ends_with('/') {
          trimmed.to_string()
        } else {
          format!("{trimmed}/")
        };
      return Ok(FeedBase::Remote(
        Url::parse(&with_slash)?
      ));
    }

    let dir = if trimmed.is_empty() {
      "."
    } else {
      trimmed
    };
    Ok(FeedBase::Local(PathBuf::from(
      dir
    )))
  }
}

#[derive(Debug, Clone)]
pub struct FeedClient {
  base: FeedBase,
  http: reqwest::Client
}

impl FeedClient {
  pub fn new(
    base: FeedBase,
    timeout: Duration
  ) -> CalendarResult<Self> {
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()?;
    Ok(Self {
      base,
      http
    })
  }

  pub fn base(&self) -> &FeedBase {
    &self.base
  }

  #[tracing::instrument(skip(self))]
  pub async fn fetch_city(
    &self,
    city: &str
  ) -> CalendarResult<FeedDocument> {
    let text = self
      .fetch_text(&city_json_path(city))
      .await?;
    let doc = parse_feed_document(&text)?;
    info!(
      city,
      events = doc.events.len(),
      "loaded region feed"
    );
    Ok(doc)
  }

  #[tracing::instrument(skip(self))]
  pub async fn fetch_regions(
    &self
  ) -> CalendarResult<Vec<RegionInfo>> {
    let text =
      self.fetch_text(REGIONS_PATH).await?;
    let regions = parse_regions(&text)?;
    info!(
      count = regions.len(),
      "loaded region metadata"
    );
    Ok(regions)
  }

  /// Modification time of the region ICS;
  /// `None` on any failure.
  #[tracing::instrument(skip(self))]
  pub async fn fetch_last_modified(
    &self,
    city: &str
  ) -> Option<DateTime<Utc>> {
    let relative = city_ics_path(city);
    match &self.base {
      | FeedBase::Local(dir) => {
        let path = dir.join(&relative);
        match tokio::fs::metadata(&path)
          .await
          .and_then(|meta| {
            meta.modified()
          }) {
          | Ok(modified) => {
            Some(DateTime::<Utc>::from(
              modified
            ))
          }
          | Err(error) => {
            warn!(
              file = %path.display(),
              error = %error,
              "failed reading ICS \
               modification time"
            );
            None
          }
        }
      }
      | FeedBase::Remote(base) => {
        let url =
          base.join(&relative).ok()?;
        let response = match self
          .http
          .head(url.as_str())
          .send()
          .await
        {
          | Ok(response) => response,
          | Err(error) => {
            warn!(
              url = %url,
              error = %error,
              "failed checking \
               last-modified"
            );
            return None;
          }
        };
        let header = response
          .headers()
          .get(
            reqwest::header::LAST_MODIFIED
          )?
          .to_str()
          .ok()?;
        DateTime::parse_from_rfc2822(
          header
        )
        .ok()
        .map(|dt| {
          dt.with_timezone(&Utc)
        })
      }
    }
  }

  pub fn links(
    &self,
    city: &str
  ) -> CalendarResult<DownloadLinks> {
    let ics_path = city_ics_path(city);
    let json_path = city_json_path(city);
    match &self.base {
      | FeedBase::Local(dir) => {
        Ok(DownloadLinks {
          ics:    display_path(
            &dir.join(ics_path)
          ),
          json:   display_path(
            &dir.join(json_path)
          ),
          webcal: None
        })
      }
      | FeedBase::Remote(base) => {
        let ics = base.join(&ics_path)?;
        let json = base.join(&json_path)?;
        let webcal = format!(
          "webcal://{}{}",
          &ics[url::Position::BeforeHost
            ..url::Position::AfterPath],
          ics
            .query()
            .map(|q| format!("?{q}"))
            .unwrap_or_default()
        );
        Ok(DownloadLinks {
          ics: ics.to_string(),
          json: json.to_string(),
          webcal: Some(webcal)
        })
      }
    }
  }

  async fn fetch_text(
    &self,
    relative: &str
  ) -> CalendarResult<String> {
    match &self.base {
      | FeedBase::Local(dir) => {
        let path = dir.join(relative);
        debug!(file = %path.display(), "reading local feed");
        match tokio::fs::read_to_string(
          &path
        )
        .await
        {
          | Ok(text) => Ok(text),
          | Err(error)
            if error.kind()
              == std::io::ErrorKind::NotFound =>
          {
            Err(
              CalendarError::FeedNotFound {
                url: display_path(&path)
              }
            )
          }
          | Err(error) => Err(error.into())
        }
      }
      | FeedBase::Remote(base) => {
        let url = base.join(relative)?;
        debug!(url = %url, "requesting feed");
        let response = self
          .http
          .get(url.as_str())
          .header(
            reqwest::header::ACCEPT,
            "application/json"
          )
          .header(
            reqwest::header::CACHE_CONTROL,
            "no-cache"
          )
          .send()
          .await?;

        let status = response.status();
        if status
          == reqwest::StatusCode::NOT_FOUND
        {
          warn!(url = %url, "feed not found");
          return Err(
            CalendarError::FeedNotFound {
              url: url.to_string()
            }
          );
        }
        if !status.is_success() {
          warn!(
            url = %url,
            status = %status,
            "feed request returned \
             non-success status"
          );
          return Err(
            CalendarError::FeedHttp {
              status: status.as_u16(),
              url:    url.to_string()
            }
          );
        }

        Ok(response.text().await?)
      }
    }
  }
}

fn display_path(path: &Path) -> String {
  path.display().to_string()
}
