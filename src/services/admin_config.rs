use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Datelike;

use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::models::{
    BlockedDate, BookingTimeRule, DayType, Holiday, NewBlockedDate, NewHoliday, RuleInput,
    SettingKey, Settings,
};
use crate::services::config_cache::ConfigCache;
use crate::services::holidays::HolidayResolver;
use crate::store::{Store, StoreError};

/// Admin-owned configuration: time rules, blocked dates, manual holidays and
/// settings. Every write drops the cache that depends on it.
pub struct ConfigService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: Arc<ConfigCache>,
    holidays: Arc<HolidayResolver>,
}

impl ConfigService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: Arc<ConfigCache>,
        holidays: Arc<HolidayResolver>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            holidays,
        }
    }

    // ── Time rules ──

    pub async fn rules(&self) -> AppResult<BTreeMap<DayType, Vec<BookingTimeRule>>> {
        let mut grouped: BTreeMap<DayType, Vec<BookingTimeRule>> = BTreeMap::new();
        for rule in self.store.list_rules().await? {
            grouped.entry(rule.day_type).or_default().push(rule);
        }
        Ok(grouped)
    }

    pub async fn create_rule(&self, input: RuleInput) -> AppResult<BookingTimeRule> {
        input.validate().map_err(AppError::Validation)?;
        let rule = self
            .store
            .create_rule(&input, self.clock.now())
            .await
            .map_err(|e| duplicate(e, "a rule with this name already exists for this day type"))?;
        self.config.invalidate();
        tracing::info!(rule_id = rule.id, day_type = rule.day_type.as_str(), name = %rule.name, "rule created");
        Ok(rule)
    }

    pub async fn update_rule(&self, id: i64, input: RuleInput) -> AppResult<()> {
        input.validate().map_err(AppError::Validation)?;
        let updated = self
            .store
            .update_rule(id, &input, self.clock.now())
            .await
            .map_err(|e| duplicate(e, "a rule with this name already exists for this day type"))?;
        if !updated {
            return Err(AppError::NotFound(format!("rule {id}")));
        }
        self.config.invalidate();
        tracing::info!(rule_id = id, "rule updated");
        Ok(())
    }

    pub async fn delete_rule(&self, id: i64) -> AppResult<()> {
        if !self.store.delete_rule(id).await? {
            return Err(AppError::NotFound(format!("rule {id}")));
        }
        self.config.invalidate();
        tracing::info!(rule_id = id, "rule deleted");
        Ok(())
    }

    // ── Blocked dates ──

    pub async fn blocked_dates(&self) -> AppResult<Vec<BlockedDate>> {
        Ok(self.store.list_blocked_dates().await?)
    }

    pub async fn block_date(&self, block: NewBlockedDate) -> AppResult<BlockedDate> {
        block.validate().map_err(AppError::Validation)?;
        if let Some(dog_id) = block.dog_id {
            if self.store.get_dog(dog_id).await?.is_none() {
                return Err(AppError::NotFound(format!("dog {dog_id}")));
            }
        }
        let created = self
            .store
            .create_blocked_date(&block, self.clock.now())
            .await
            .map_err(|e| duplicate(e, "date already blocked"))?;
        self.config.invalidate();
        tracing::info!(
            block_id = created.id,
            date = %created.date,
            dog_id = ?created.dog_id,
            "date blocked"
        );
        Ok(created)
    }

    pub async fn unblock_date(&self, id: i64) -> AppResult<()> {
        if !self.store.delete_blocked_date(id).await? {
            return Err(AppError::NotFound(format!("blocked date {id}")));
        }
        self.config.invalidate();
        tracing::info!(block_id = id, "date unblocked");
        Ok(())
    }

    // ── Holidays ──

    /// Merged holidays for `year`, defaulting to the current year.
    pub async fn holidays(&self, year: Option<i32>) -> AppResult<Vec<Holiday>> {
        let year = year.unwrap_or_else(|| self.clock.now().year());
        let settings = self.settings().await?;
        Ok(self.holidays.holidays(year, &settings).await?)
    }

    pub async fn add_holiday(&self, holiday: NewHoliday, admin_id: i64) -> AppResult<Holiday> {
        if holiday.name.trim().is_empty() {
            return Err(AppError::Validation("holiday name is required".to_string()));
        }
        let created = self
            .store
            .create_manual_holiday(&holiday, admin_id, self.clock.now())
            .await
            .map_err(|e| duplicate(e, "a manual holiday already exists on this date"))?;
        self.holidays.invalidate();
        tracing::info!(holiday_id = created.id, date = %created.date, "manual holiday added");
        Ok(created)
    }

    pub async fn remove_holiday(&self, id: i64) -> AppResult<()> {
        if !self.store.delete_holiday(id).await? {
            return Err(AppError::NotFound(format!("holiday {id}")));
        }
        self.holidays.invalidate();
        tracing::info!(holiday_id = id, "holiday removed");
        Ok(())
    }

    // ── Settings ──

    pub async fn settings(&self) -> AppResult<Settings> {
        Ok(Settings::from_map(&self.store.load_settings().await?))
    }

    pub async fn put_setting(&self, key: &str, value: &str) -> AppResult<Settings> {
        let key = SettingKey::parse(key)
            .ok_or_else(|| AppError::Validation(format!("unknown setting: {key}")))?;
        let current = self.settings().await?;
        let value = current.with(key, value).map_err(AppError::Validation)?;

        self.store
            .put_setting(key.as_str(), &value, self.clock.now())
            .await?;
        self.holidays.invalidate();
        tracing::info!(key = key.as_str(), %value, "setting updated");

        self.settings().await
    }
}

fn duplicate(err: StoreError, message: &str) -> AppError {
    match err {
        StoreError::Conflict => AppError::Duplicate(message.to_string()),
        other => other.into(),
    }
}
