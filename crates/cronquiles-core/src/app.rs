//! Startup resolution and store wiring around a [`CalendarSession`].

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::datetime::YearMonth;
use crate::error::CalendarError;
use crate::feed::{DownloadLinks, FeedClient, RegionInfo, visible_regions};
use crate::i18n::Locale;
use crate::session::{CalendarSession, CalendarView, MonthSection};
use crate::storage::PreferenceStore;
use crate::store::{
    KEY_CITY, KEY_LANG, KEY_SHOW_PAST, KEY_VIEW_MONTH, Store, Subscription, ViewSettings,
};

/// `city` / `lang` read from the page URL at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchParams {
    pub city: Option<String>,
    pub lang: Option<Locale>,
}

impl LaunchParams {
    pub fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "city" => params.city = Some(value.to_string()),
                "lang" => match value.parse::<Locale>() {
                    Ok(locale) => params.lang = Some(locale),
                    Err(err) => warn!(error = %err, "ignoring lang query parameter"),
                },
                _ => {}
            }
        }
        params
    }

    /// Explicit values in `other` win.
    pub fn merged_with(self, other: LaunchParams) -> Self {
        Self {
            city: other.city.or(self.city),
            lang: other.lang.or(self.lang),
        }
    }
}

/// Fallbacks when neither the URL nor saved preferences decide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    pub city: String,
    pub locale: Locale,
    pub show_past_events: bool,
}

/// Pick the starting region and language: URL, then saved, then default.
/// A region missing from non-empty metadata falls back to the default.
pub fn resolve_initial(
    params: &LaunchParams,
    saved_city: Option<String>,
    saved_locale: Option<Locale>,
    defaults: &Defaults,
    regions: &[RegionInfo],
) -> (String, Locale) {
    let locale = params.lang.or(saved_locale).unwrap_or(defaults.locale);
    let mut city = params
        .city
        .clone()
        .or(saved_city)
        .unwrap_or_else(|| defaults.city.clone());

    if !regions.is_empty() && !regions.iter().any(|region| region.slug == city) {
        warn!(city = %city, "region no longer published; using default");
        city = defaults.city.clone();
    }

    (city, locale)
}

/// `url` with `city` set and `lang` set only off the default locale.
/// Other query parameters are kept in order.
pub fn mirror_url(url: &Url, city: &str, locale: Locale, default_locale: Locale) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "city" && key != "lang")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut mirrored = url.clone();
    {
        let mut query = mirrored.query_pairs_mut();
        query.clear().extend_pairs(kept).append_pair("city", city);
        if locale != default_locale {
            query.append_pair("lang", locale.tag());
        }
    }
    mirrored
}

#[derive(Debug, Default)]
struct PendingWork {
    city: Option<String>,
    locale: Option<Locale>,
    rerender: bool,
}

/// A feed failure that left the previous calendar in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFailure {
    pub city: String,
    pub kind: &'static str,
    pub message: String,
}

pub struct App {
    store: Store,
    prefs: PreferenceStore,
    client: FeedClient,
    defaults: Defaults,
    regions: Vec<RegionInfo>,
    session: Option<CalendarSession>,
    page_url: Option<Url>,
    now: DateTime<Utc>,
    last_failure: Option<FeedFailure>,
    pending: Rc<RefCell<PendingWork>>,
    subscriptions: Vec<Subscription>,
}

impl App {
    /// Load region metadata, settle the starting state, then load the feed.
    ///
    /// The store is seeded before any subscription exists, so startup does
    /// not persist anything.
    #[tracing::instrument(skip_all)]
    pub async fn start(
        prefs: PreferenceStore,
        client: FeedClient,
        defaults: Defaults,
        params: LaunchParams,
        page_url: Option<Url>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        let regions = match client.fetch_regions().await {
            Ok(regions) => regions,
            Err(err) => {
                warn!(error = %err, kind = err.kind(), "region metadata unavailable");
                Vec::new()
            }
        };

        let (city, locale) = resolve_initial(
            &params,
            prefs.saved_city()?,
            prefs.saved_locale()?,
            &defaults,
            &regions,
        );
        info!(city = %city, lang = %locale, "resolved startup state");

        let mut store = Store::new();
        store.set(KEY_LANG, locale.tag());
        store.set(KEY_CITY, city.as_str());
        store.set(KEY_SHOW_PAST, defaults.show_past_events);
        store.set(KEY_VIEW_MONTH, YearMonth::containing(now).key());

        let mut app = Self {
            store,
            prefs,
            client,
            defaults,
            regions,
            session: None,
            page_url,
            now,
            last_failure: None,
            pending: Rc::new(RefCell::new(PendingWork::default())),
            subscriptions: Vec::new(),
        };
        app.bind_store();
        app.update_url();
        app.load_city(&city).await;
        Ok(app)
    }

    fn bind_store(&mut self) {
        let pending = Rc::clone(&self.pending);
        let city_sub = self.store.subscribe(KEY_CITY, move |value: &Value| {
            if let Some(city) = value.as_str() {
                pending.borrow_mut().city = Some(city.to_string());
            }
        });

        let pending = Rc::clone(&self.pending);
        let lang_sub = self.store.subscribe(KEY_LANG, move |value: &Value| {
            if let Some(locale) = value.as_str().and_then(|tag| tag.parse::<Locale>().ok()) {
                let mut work = pending.borrow_mut();
                work.locale = Some(locale);
                work.rerender = true;
            }
        });

        let mut view_subs = [KEY_SHOW_PAST, KEY_VIEW_MONTH]
            .into_iter()
            .map(|key| {
                let pending = Rc::clone(&self.pending);
                self.store.subscribe(key, move |_: &Value| {
                    pending.borrow_mut().rerender = true;
                })
            })
            .collect::<Vec<_>>();

        self.subscriptions.push(city_sub);
        self.subscriptions.push(lang_sub);
        self.subscriptions.append(&mut view_subs);
    }

    /// Drop every store subscription.
    pub fn unbind(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            self.store.unsubscribe(&subscription);
        }
        let remaining: usize = [KEY_CITY, KEY_LANG, KEY_SHOW_PAST, KEY_VIEW_MONTH]
            .iter()
            .map(|key| self.store.subscriber_count(key))
            .sum();
        debug!(remaining, "unbound from settings store");
    }

    pub fn settings(&self) -> ViewSettings {
        ViewSettings::from_store(&self.store, self.now)
    }

    pub fn city(&self) -> String {
        self.store
            .get_str(KEY_CITY)
            .map(str::to_string)
            .unwrap_or_else(|| self.defaults.city.clone())
    }

    pub fn session(&self) -> Option<&CalendarSession> {
        self.session.as_ref()
    }

    pub fn regions(&self) -> &[RegionInfo] {
        &self.regions
    }

    pub fn page_url(&self) -> Option<&Url> {
        self.page_url.as_ref()
    }

    pub fn last_failure(&self) -> Option<&FeedFailure> {
        self.last_failure.as_ref()
    }

    pub fn view(&self) -> Option<CalendarView> {
        self.session.as_ref().map(CalendarSession::render_view)
    }

    pub fn load_more(&mut self) -> Option<MonthSection> {
        self.session.as_mut()?.load_more().cloned()
    }

    /// Region tabs for the current view.
    pub fn visible_regions(&self) -> Vec<&RegionInfo> {
        let settings = self.settings();
        visible_regions(
            &self.regions,
            &self.city(),
            settings.show_past_events,
            settings.view_month,
        )
    }

    pub fn links(&self) -> anyhow::Result<DownloadLinks> {
        Ok(self.client.links(&self.city())?)
    }

    pub async fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.client.fetch_last_modified(&self.city()).await
    }

    pub async fn select_city(&mut self, city: &str) -> anyhow::Result<()> {
        self.store.set(KEY_CITY, city);
        self.process_pending().await
    }

    pub async fn select_locale(&mut self, locale: Locale) -> anyhow::Result<()> {
        self.store.set(KEY_LANG, locale.tag());
        self.process_pending().await
    }

    pub async fn set_show_past(&mut self, show: bool) -> anyhow::Result<()> {
        self.store.set(KEY_SHOW_PAST, show);
        self.process_pending().await
    }

    pub async fn set_view_month(&mut self, month: YearMonth) -> anyhow::Result<()> {
        self.store.set(KEY_VIEW_MONTH, month.key());
        self.process_pending().await
    }

    /// Move the viewed month by `delta` (header prev/next).
    pub async fn navigate(&mut self, delta: i32) -> anyhow::Result<()> {
        let target = self.settings().view_month.shift(delta);
        self.set_view_month(target).await
    }

    /// Jump back to the month containing "now".
    pub async fn go_to_today(&mut self) -> anyhow::Result<()> {
        self.set_view_month(YearMonth::containing(self.now)).await
    }

    #[tracing::instrument(skip(self))]
    async fn process_pending(&mut self) -> anyhow::Result<()> {
        let work = std::mem::take(&mut *self.pending.borrow_mut());
        debug!(?work, "processing store notifications");

        if let Some(locale) = work.locale {
            self.prefs.save_locale(locale)?;
        }
        if let Some(city) = &work.city {
            self.prefs.save_city(city)?;
        }
        if work.locale.is_some() || work.city.is_some() {
            self.update_url();
        }

        if let Some(city) = work.city {
            self.load_city(&city).await;
        } else if work.rerender {
            let settings = self.settings();
            if let Some(session) = self.session.as_mut() {
                session.apply_settings(settings);
            }
        }
        Ok(())
    }

    fn update_url(&mut self) {
        let Some(url) = &self.page_url else {
            return;
        };
        let mirrored = mirror_url(url, &self.city(), self.settings().locale, self.defaults.locale);
        debug!(url = %mirrored, "mirrored state into page URL");
        self.page_url = Some(mirrored);
    }

    /// Replace the session with `city`'s feed. On failure the previous
    /// session stays and the failure is recorded.
    #[tracing::instrument(skip(self))]
    async fn load_city(&mut self, city: &str) {
        match self.client.fetch_city(city).await {
            Ok(doc) => {
                self.session = Some(CalendarSession::new(city, doc, self.settings(), self.now));
                self.last_failure = None;
            }
            Err(err) => self.record_failure(city, &err),
        }
    }

    fn record_failure(&mut self, city: &str, err: &CalendarError) {
        if !err.is_fetch_failure() {
            debug!(city, error = %err, "ignoring record-level error");
            return;
        }
        warn!(city, kind = err.kind(), error = %err, "failed loading region feed");
        let message = self.settings().locale.feed_error_message(err.kind(), city);
        self.last_failure = Some(FeedFailure {
            city: city.to_string(),
            kind: err.kind(),
            message,
        });
    }
}
