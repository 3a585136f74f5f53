//! Keyed observable settings.
//!
//! Components never call each other when a setting changes; they subscribe
//! to the key they care about and the store fans each change out
//! synchronously, in subscription order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::datetime::YearMonth;
use crate::i18n::Locale;

pub const KEY_LANG: &str = "lang";
pub const KEY_CITY: &str = "city";
pub const KEY_SHOW_PAST: &str = "showPastEvents";
pub const KEY_VIEW_MONTH: &str = "viewMonth";

type Callback = Box<dyn FnMut(&Value)>;

/// Handle returned by [`Store::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    key: String,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }
}

struct Subscriber {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
pub struct Store {
    values: BTreeMap<String, Value>,
    subscribers: BTreeMap<String, Vec<Subscriber>>,
    next_id: u64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("values", &self.values)
            .field(
                "subscribers",
                &self
                    .subscribers
                    .iter()
                    .map(|(key, subs)| (key.as_str(), subs.len()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Store `value` under `key` and notify its subscribers.
    ///
    /// Returns `false` without notifying when the value is unchanged.
    #[tracing::instrument(skip(self, value))]
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        if self.values.get(key) == Some(&value) {
            trace!("value unchanged; not notifying");
            return false;
        }

        self.values.insert(key.to_string(), value.clone());
        if let Some(subscribers) = self.subscribers.get_mut(key) {
            debug!(count = subscribers.len(), "notifying subscribers");
            for subscriber in subscribers.iter_mut() {
                (subscriber.callback)(&value);
            }
        }
        true
    }

    pub fn subscribe<F>(&mut self, key: &str, callback: F) -> Subscription
    where
        F: FnMut(&Value) + 'static,
    {
        self.next_id += 1;
        let id = self.next_id;
        self.subscribers
            .entry(key.to_string())
            .or_default()
            .push(Subscriber {
                id,
                callback: Box::new(callback),
            });
        Subscription {
            key: key.to_string(),
            id,
        }
    }

    /// Returns whether the subscription was still registered.
    pub fn unsubscribe(&mut self, subscription: &Subscription) -> bool {
        let Some(subscribers) = self.subscribers.get_mut(&subscription.key) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != subscription.id);
        before != subscribers.len()
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.subscribers.get(key).map_or(0, Vec::len)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }
}

/// What one render pass reads from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewSettings {
    pub locale: Locale,
    pub show_past_events: bool,
    pub view_month: YearMonth,
}

impl ViewSettings {
    /// Snapshot the store; missing or unreadable keys fall back to the
    /// default locale, hidden past events and the month containing `now`.
    pub fn from_store(store: &Store, now: DateTime<Utc>) -> Self {
        let locale = store
            .get_str(KEY_LANG)
            .and_then(|tag| tag.parse::<Locale>().ok())
            .unwrap_or_default();
        let view_month = store
            .get_str(KEY_VIEW_MONTH)
            .and_then(|raw| raw.parse::<YearMonth>().ok())
            .unwrap_or_else(|| YearMonth::containing(now));
        Self {
            locale,
            show_past_events: store.get_bool(KEY_SHOW_PAST).unwrap_or(false),
            view_month,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;

    #[test]
    fn equal_values_do_not_notify() {
        let mut store = Store::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        store.subscribe(KEY_CITY, move |value| sink.borrow_mut().push(value.clone()));

        assert!(store.set(KEY_CITY, "jalisco"));
        assert!(!store.set(KEY_CITY, "jalisco"));
        assert!(store.set(KEY_CITY, "mexico"));

        assert_eq!(*seen.borrow(), vec![json!("jalisco"), json!("mexico")]);
    }

    #[test]
    fn delivers_in_subscription_order_per_key() {
        let mut store = Store::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for name in ["first", "second"] {
            let log = Rc::clone(&log);
            store.subscribe(KEY_LANG, move |_| log.borrow_mut().push(name));
        }
        let other = Rc::clone(&log);
        store.subscribe(KEY_CITY, move |_| other.borrow_mut().push("city"));

        store.set(KEY_LANG, "en");
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut store = Store::new();
        let count = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&count);
        let sub = store.subscribe(KEY_SHOW_PAST, move |_| *counter.borrow_mut() += 1);

        store.set(KEY_SHOW_PAST, true);
        assert!(store.unsubscribe(&sub));
        assert!(!store.unsubscribe(&sub));
        store.set(KEY_SHOW_PAST, false);

        assert_eq!(*count.borrow(), 1);
        assert_eq!(store.subscriber_count(KEY_SHOW_PAST), 0);
    }

    #[test]
    fn view_settings_fall_back_to_defaults() {
        let now = Utc
            .with_ymd_and_hms(2025, 2, 15, 18, 0, 0)
            .single()
            .expect("valid now");
        let mut store = Store::new();
        let defaults = ViewSettings::from_store(&store, now);
        assert_eq!(defaults.locale, Locale::Es);
        assert!(!defaults.show_past_events);
        assert_eq!(defaults.view_month.key(), "2025-02");

        store.set(KEY_LANG, "en");
        store.set(KEY_SHOW_PAST, true);
        store.set(KEY_VIEW_MONTH, "2025-04");
        let settings = ViewSettings::from_store(&store, now);
        assert_eq!(settings.locale, Locale::En);
        assert!(settings.show_past_events);
        assert_eq!(settings.view_month.key(), "2025-04");
    }
}
