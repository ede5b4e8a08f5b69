use std::env;
use std::time::Duration;

use chrono::NaiveTime;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub holiday_api_url: String,
    pub holiday_fetch_timeout: Duration,
    pub notify_webhook_url: String,
    pub notify_timeout: Duration,
    pub auto_complete_interval: Duration,
    pub reminder_interval: Duration,
    pub deactivation_time: NaiveTime,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "walks.db".to_string()),
            holiday_api_url: env::var("HOLIDAY_API_URL")
                .unwrap_or_else(|_| "https://feiertage-api.de/api/".to_string()),
            holiday_fetch_timeout: secs("HOLIDAY_FETCH_TIMEOUT_SECS", 5),
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").unwrap_or_default(),
            notify_timeout: secs("NOTIFY_TIMEOUT_SECS", 5),
            auto_complete_interval: secs("AUTO_COMPLETE_INTERVAL_SECS", 300),
            reminder_interval: secs("REMINDER_INTERVAL_SECS", 600),
            deactivation_time: env::var("DEACTIVATION_TIME")
                .ok()
                .and_then(|v| NaiveTime::parse_from_str(&v, "%H:%M").ok())
                .unwrap_or(NaiveTime::from_hms_opt(3, 0, 0).unwrap_or(NaiveTime::MIN)),
        }
    }
}

fn secs(key: &str, default: u64) -> Duration {
    let secs = env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}
