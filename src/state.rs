use std::sync::Arc;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::services::admin_config::ConfigService;
use crate::services::config_cache::ConfigCache;
use crate::services::holidays::{HolidayCalendar, HolidayResolver};
use crate::services::lifecycle::BookingEngine;
use crate::services::notify::{NotificationGateway, Notifier};
use crate::store::Store;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: AppConfig,
    pub engine: Arc<BookingEngine>,
    pub config_service: ConfigService,
}

impl AppState {
    /// Wires the engine and the admin configuration service over one shared
    /// set of caches.
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        calendar: Arc<dyn HolidayCalendar>,
        notifier: Arc<dyn Notifier>,
        config: AppConfig,
    ) -> Self {
        let config_cache = Arc::new(ConfigCache::new(store.clone()));
        let holidays = Arc::new(HolidayResolver::new(
            store.clone(),
            calendar,
            clock.clone(),
            config.holiday_fetch_timeout,
        ));
        let gateway = Arc::new(NotificationGateway::new(notifier, config.notify_timeout));

        let engine = Arc::new(BookingEngine::new(
            store.clone(),
            clock.clone(),
            config_cache.clone(),
            holidays.clone(),
            gateway,
        ));
        let config_service = ConfigService::new(store.clone(), clock, config_cache, holidays);

        Self {
            store,
            config,
            engine,
            config_service,
        }
    }
}
