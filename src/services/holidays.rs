use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::clock::Clock;
use crate::models::{Holiday, HolidayEntry, HolidaySource, Settings};
use crate::store::{Store, StoreResult};

/// After a failed fetch, the next attempt for the same year waits this long.
const RETRY_AFTER_FAILURE_MINUTES: i64 = 5;

/// External public-holiday calendar.
#[async_trait]
pub trait HolidayCalendar: Send + Sync {
    async fn fetch(&self, year: i32, region: &str) -> anyhow::Result<Vec<HolidayEntry>>;
}

/// Client for feiertage-api.de, which answers with an object keyed by holiday
/// name: `{"Neujahrstag": {"datum": "2025-01-01", "hinweis": ""}, ...}`.
pub struct FeiertageApi {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ApiHoliday {
    datum: String,
}

impl FeiertageApi {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HolidayCalendar for FeiertageApi {
    async fn fetch(&self, year: i32, region: &str) -> anyhow::Result<Vec<HolidayEntry>> {
        let raw: HashMap<String, ApiHoliday> = self
            .client
            .get(&self.base_url)
            .query(&[("jahr", year.to_string()), ("nur_land", region.to_string())])
            .send()
            .await
            .context("failed to reach holiday API")?
            .error_for_status()
            .context("holiday API returned error")?
            .json()
            .await
            .context("failed to parse holiday API response")?;

        let mut entries: Vec<HolidayEntry> = raw
            .into_iter()
            .filter_map(|(name, h)| match NaiveDate::parse_from_str(&h.datum, "%Y-%m-%d") {
                Ok(date) => Some(HolidayEntry { date, name }),
                Err(_) => {
                    tracing::warn!(%name, datum = %h.datum, "skipping holiday with unparseable date");
                    None
                }
            })
            .collect();
        entries.sort_by(|a, b| (a.date, &a.name).cmp(&(b.date, &b.name)));
        Ok(entries)
    }
}

struct CachedYear {
    holidays: Vec<Holiday>,
    fresh_until: NaiveDateTime,
}

/// Resolves the holiday calendar per (year, region).
///
/// Fetched and manual entries are merged with manual entries winning on the
/// same date. The external fetch is bounded by `fetch_timeout`; on failure the
/// resolver serves the stale in-memory year, else whatever was last persisted.
pub struct HolidayResolver {
    store: Arc<dyn Store>,
    calendar: Arc<dyn HolidayCalendar>,
    clock: Arc<dyn Clock>,
    fetch_timeout: Duration,
    cache: RwLock<HashMap<(i32, String), CachedYear>>,
}

impl HolidayResolver {
    pub fn new(
        store: Arc<dyn Store>,
        calendar: Arc<dyn HolidayCalendar>,
        clock: Arc<dyn Clock>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            calendar,
            clock,
            fetch_timeout,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_holiday(&self, date: NaiveDate, settings: &Settings) -> StoreResult<bool> {
        let holidays = self.holidays(date.year(), settings).await?;
        Ok(holidays.iter().any(|h| h.date == date))
    }

    pub async fn holidays(&self, year: i32, settings: &Settings) -> StoreResult<Vec<Holiday>> {
        let key = (year, settings.holiday_region.clone());
        let now = self.clock.now();

        if let Some(holidays) = self.cached(&key, now) {
            return Ok(holidays);
        }

        if !settings.use_holiday_api {
            let holidays = merge(self.store.list_holidays(year, &key.1).await?);
            self.remember(key, holidays.clone(), NaiveDateTime::MAX);
            return Ok(holidays);
        }

        let ttl = chrono::Duration::days(settings.holiday_cache_days);
        if let Some(fetched_at) = self.store.holidays_fetched_at(year, &key.1).await? {
            if now < fetched_at + ttl {
                let holidays = merge(self.store.list_holidays(year, &key.1).await?);
                self.remember(key, holidays.clone(), fetched_at + ttl);
                return Ok(holidays);
            }
        }

        match self.fetch(year, &key.1, now).await {
            Ok(()) => {
                let holidays = merge(self.store.list_holidays(year, &key.1).await?);
                self.remember(key, holidays.clone(), now + ttl);
                Ok(holidays)
            }
            Err(e) => {
                tracing::warn!(year, region = %key.1, error = %e, "holiday fetch failed, serving fallback");
                let retry_at = now + chrono::Duration::minutes(RETRY_AFTER_FAILURE_MINUTES);
                if let Some(stale) = self.stale(&key) {
                    self.extend(&key, retry_at);
                    return Ok(stale);
                }
                let holidays = merge(self.store.list_holidays(year, &key.1).await?);
                self.remember(key, holidays.clone(), retry_at);
                Ok(holidays)
            }
        }
    }

    /// Drops every cached year. Called after admin holiday or settings writes.
    pub fn invalidate(&self) {
        match self.cache.write() {
            Ok(mut cache) => cache.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
        tracing::debug!("holiday cache invalidated");
    }

    async fn fetch(&self, year: i32, region: &str, now: NaiveDateTime) -> anyhow::Result<()> {
        let entries = tokio::time::timeout(self.fetch_timeout, self.calendar.fetch(year, region))
            .await
            .map_err(|_| anyhow::anyhow!("timed out after {:?}", self.fetch_timeout))??;

        self.store
            .replace_fetched_holidays(year, region, &entries, now)
            .await
            .context("failed to persist fetched holidays")?;

        tracing::info!(year, region, count = entries.len(), "fetched holidays");
        Ok(())
    }

    fn cached(&self, key: &(i32, String), now: NaiveDateTime) -> Option<Vec<Holiday>> {
        let cache = self.cache.read().unwrap_or_else(|p| p.into_inner());
        cache
            .get(key)
            .filter(|c| now < c.fresh_until)
            .map(|c| c.holidays.clone())
    }

    fn stale(&self, key: &(i32, String)) -> Option<Vec<Holiday>> {
        let cache = self.cache.read().unwrap_or_else(|p| p.into_inner());
        cache.get(key).map(|c| c.holidays.clone())
    }

    fn extend(&self, key: &(i32, String), fresh_until: NaiveDateTime) {
        let mut cache = self.cache.write().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = cache.get_mut(key) {
            entry.fresh_until = fresh_until;
        }
    }

    fn remember(&self, key: (i32, String), holidays: Vec<Holiday>, fresh_until: NaiveDateTime) {
        let mut cache = self.cache.write().unwrap_or_else(|p| p.into_inner());
        cache.insert(
            key,
            CachedYear {
                holidays,
                fresh_until,
            },
        );
    }
}

/// One entry per date; a manual entry replaces a fetched one.
fn merge(rows: Vec<Holiday>) -> Vec<Holiday> {
    let mut by_date: BTreeMap<NaiveDate, Holiday> = BTreeMap::new();
    for h in rows {
        match by_date.get(&h.date) {
            Some(existing) if existing.source == HolidaySource::Manual => {}
            Some(_) if h.source != HolidaySource::Manual => {}
            _ => {
                by_date.insert(h.date, h);
            }
        }
    }
    by_date.into_values().collect()
}
