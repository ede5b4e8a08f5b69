pub mod booking;
pub mod calendar;
pub mod rule;
pub mod settings;
pub mod user;

pub use booking::{
    ApprovalDecision, ApprovalStatus, Booking, BookingFilter, BookingStatus, NewBooking, Slot,
    WalkType,
};
pub use calendar::{BlockedDate, Holiday, HolidayEntry, HolidaySource, NewBlockedDate, NewHoliday};
pub use rule::{BookingTimeRule, DayType, RuleInput};
pub use settings::{SettingKey, Settings};
pub use user::{Dog, Role, Tier, User};
