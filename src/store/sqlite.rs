use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::Type;
use rusqlite::{ffi, params, Connection, ErrorCode, OptionalExtension, Row};

use super::{Backend, StatusChange, Store, StoreError, StoreResult};
use crate::models::{
    ApprovalDecision, ApprovalStatus, BlockedDate, Booking, BookingFilter, BookingStatus,
    BookingTimeRule, DayType, Dog, Holiday, HolidayEntry, HolidaySource, NewBlockedDate,
    NewBooking, NewHoliday, Role, RuleInput, Slot, Tier, User, WalkType,
};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BOOKING_COLUMNS: &str = "id, user_id, dog_id, date, walk_type, scheduled_time, status, \
     requires_approval, approval_status, approved_by, approved_at, rejection_reason, user_notes, \
     cancellation_reason, completed_at, reminder_sent_at, created_at, updated_at";

const RULE_COLUMNS: &str =
    "id, day_type, name, start_time, end_time, is_blocked, created_at, updated_at";

const BLOCK_COLUMNS: &str = "id, date, dog_id, reason, created_by, created_at";

const HOLIDAY_COLUMNS: &str = "id, date, name, source, region, created_by, created_at";

const USER_COLUMNS: &str = "id, name, role, tier, is_active, is_verified, last_activity_at, \
     deactivated_at, deactivation_reason, deleted_at";

/// Unique and primary-key violations are conflicts; lock contention is
/// retryable. Everything else is an opaque backend failure.
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(e, _) = &err {
            match e.code {
                ErrorCode::ConstraintViolation
                    if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                        || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
                {
                    return StoreError::Conflict;
                }
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return StoreError::Transient(err.to_string());
                }
                _ => {}
            }
        }
        StoreError::Backend(err.into())
    }
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("sqlite connection mutex poisoned")))
    }
}

// ── Row decoding ──

#[derive(Debug, thiserror::Error)]
#[error("unexpected column value {0:?}")]
struct UnexpectedValue(String);

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn col_date(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn col_time(row: &Row, idx: usize) -> rusqlite::Result<NaiveTime> {
    let raw: String = row.get(idx)?;
    NaiveTime::parse_from_str(&raw, TIME_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn col_ts(row: &Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, TS_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn col_ts_opt(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| NaiveDateTime::parse_from_str(&s, TS_FORMAT).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn col_enum<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, UnexpectedValue(raw)))
}

fn ts(t: &NaiveDateTime) -> String {
    t.format(TS_FORMAT).to_string()
}

fn date_str(d: &NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

fn time_str(t: &NaiveTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn year_bounds(year: i32) -> (String, String) {
    (format!("{year:04}-01-01"), format!("{year:04}-12-31"))
}

fn parse_booking_row(row: &Row) -> rusqlite::Result<Booking> {
    Ok(Booking {
        id: row.get(0)?,
        user_id: row.get(1)?,
        dog_id: row.get(2)?,
        date: col_date(row, 3)?,
        walk_type: col_enum(row, 4, WalkType::parse)?,
        scheduled_time: col_time(row, 5)?,
        status: col_enum(row, 6, BookingStatus::parse)?,
        requires_approval: row.get(7)?,
        approval_status: col_enum(row, 8, ApprovalStatus::parse)?,
        approved_by: row.get(9)?,
        approved_at: col_ts_opt(row, 10)?,
        rejection_reason: row.get(11)?,
        user_notes: row.get(12)?,
        cancellation_reason: row.get(13)?,
        completed_at: col_ts_opt(row, 14)?,
        reminder_sent_at: col_ts_opt(row, 15)?,
        created_at: col_ts(row, 16)?,
        updated_at: col_ts(row, 17)?,
    })
}

fn parse_rule_row(row: &Row) -> rusqlite::Result<BookingTimeRule> {
    Ok(BookingTimeRule {
        id: row.get(0)?,
        day_type: col_enum(row, 1, DayType::parse)?,
        name: row.get(2)?,
        start_time: col_time(row, 3)?,
        end_time: col_time(row, 4)?,
        is_blocked: row.get(5)?,
        created_at: col_ts(row, 6)?,
        updated_at: col_ts(row, 7)?,
    })
}

fn parse_block_row(row: &Row) -> rusqlite::Result<BlockedDate> {
    Ok(BlockedDate {
        id: row.get(0)?,
        date: col_date(row, 1)?,
        dog_id: row.get(2)?,
        reason: row.get(3)?,
        created_by: row.get(4)?,
        created_at: col_ts(row, 5)?,
    })
}

fn parse_holiday_row(row: &Row) -> rusqlite::Result<Holiday> {
    Ok(Holiday {
        id: row.get(0)?,
        date: col_date(row, 1)?,
        name: row.get(2)?,
        source: col_enum(row, 3, HolidaySource::parse)?,
        region: row.get(4)?,
        created_by: row.get(5)?,
        created_at: col_ts(row, 6)?,
    })
}

fn parse_user_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        role: col_enum(row, 2, Role::parse)?,
        tier: col_enum(row, 3, Tier::parse)?,
        is_active: row.get(4)?,
        is_verified: row.get(5)?,
        last_activity_at: col_ts(row, 6)?,
        deactivated_at: col_ts_opt(row, 7)?,
        deactivation_reason: row.get(8)?,
        deleted_at: col_ts_opt(row, 9)?,
    })
}

fn parse_dog_row(row: &Row) -> rusqlite::Result<Dog> {
    Ok(Dog {
        id: row.get(0)?,
        name: row.get(1)?,
        tier: col_enum(row, 2, Tier::parse)?,
        is_available: row.get(3)?,
        deleted_at: col_ts_opt(row, 4)?,
    })
}

fn query_booking(conn: &Connection, id: i64) -> rusqlite::Result<Option<Booking>> {
    conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        parse_booking_row,
    )
    .optional()
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    // ── Bookings ──

    async fn create_booking(&self, booking: &NewBooking) -> StoreResult<Booking> {
        let conn = self.lock()?;
        let created_at = ts(&booking.created_at);
        conn.execute(
            "INSERT INTO bookings (user_id, dog_id, date, walk_type, scheduled_time, status,
                requires_approval, approval_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'scheduled', ?6, ?7, ?8, ?8)",
            params![
                booking.user_id,
                booking.dog_id,
                date_str(&booking.date),
                booking.walk_type.as_str(),
                time_str(&booking.scheduled_time),
                booking.requires_approval,
                booking.initial_approval().as_str(),
                created_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        query_booking(&conn, id)?
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("booking {id} vanished after insert")))
    }

    async fn get_booking(&self, id: i64) -> StoreResult<Option<Booking>> {
        let conn = self.lock()?;
        Ok(query_booking(&conn, id)?)
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> StoreResult<Vec<Booking>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(user_id) = filter.user_id {
            clauses.push("user_id = ?");
            params_vec.push(Box::new(user_id));
        }
        if let Some(dog_id) = filter.dog_id {
            clauses.push("dog_id = ?");
            params_vec.push(Box::new(dog_id));
        }
        if let Some(from) = filter.date_from {
            clauses.push("date >= ?");
            params_vec.push(Box::new(date_str(&from)));
        }
        if let Some(to) = filter.date_to {
            clauses.push("date <= ?");
            params_vec.push(Box::new(date_str(&to)));
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            params_vec.push(Box::new(status.as_str()));
        }
        if let Some(approval) = filter.approval_status {
            clauses.push("approval_status = ?");
            params_vec.push(Box::new(approval.as_str()));
        }
        params_vec.push(Box::new(filter.effective_limit()));

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings {where_sql}
             ORDER BY date ASC, scheduled_time ASC, id ASC LIMIT ?"
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(params_refs.as_slice(), parse_booking_row)?;

        let mut bookings = vec![];
        for row in rows {
            bookings.push(row?);
        }
        Ok(bookings)
    }

    async fn find_conflicting(&self, slot: &Slot, exclude_id: Option<i64>) -> StoreResult<bool> {
        let conn = self.lock()?;
        let found: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM bookings
             WHERE dog_id = ?1 AND date = ?2 AND walk_type = ?3 AND status != 'cancelled'
               AND (?4 IS NULL OR id != ?4)",
            params![slot.dog_id, date_str(&slot.date), slot.walk_type.as_str(), exclude_id],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    async fn update_status(&self, id: i64, change: &StatusChange<'_>) -> StoreResult<bool> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE bookings SET
                status = ?1,
                cancellation_reason = CASE WHEN ?1 = 'cancelled' THEN ?2 ELSE cancellation_reason END,
                completed_at = CASE WHEN ?1 = 'completed' THEN ?3 ELSE completed_at END,
                updated_at = ?3
             WHERE id = ?4 AND status = ?5",
            params![change.to.as_str(), change.reason, ts(&change.at), id, change.from.as_str()],
        )?;
        Ok(count > 0)
    }

    async fn decide_approval(
        &self,
        id: i64,
        decision: &ApprovalDecision,
        at: NaiveDateTime,
    ) -> StoreResult<bool> {
        let conn = self.lock()?;
        let count = match decision {
            ApprovalDecision::Approve { admin_id } => conn.execute(
                "UPDATE bookings SET approval_status = 'approved', approved_by = ?1,
                    approved_at = ?2, updated_at = ?2
                 WHERE id = ?3 AND status = 'scheduled' AND approval_status = 'pending'",
                params![admin_id, ts(&at), id],
            )?,
            ApprovalDecision::Reject { admin_id, reason } => conn.execute(
                "UPDATE bookings SET approval_status = 'rejected', status = 'cancelled',
                    approved_by = ?1, approved_at = ?2, rejection_reason = ?3, updated_at = ?2
                 WHERE id = ?4 AND status = 'scheduled' AND approval_status = 'pending'",
                params![admin_id, ts(&at), reason, id],
            )?,
        };
        Ok(count > 0)
    }

    async fn reschedule(
        &self,
        id: i64,
        slot: &Slot,
        time: NaiveTime,
        at: NaiveDateTime,
    ) -> StoreResult<bool> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE bookings SET dog_id = ?1, date = ?2, walk_type = ?3, scheduled_time = ?4,
                reminder_sent_at = NULL, updated_at = ?5
             WHERE id = ?6 AND status = 'scheduled' AND approval_status != 'pending'",
            params![
                slot.dog_id,
                date_str(&slot.date),
                slot.walk_type.as_str(),
                time_str(&time),
                ts(&at),
                id
            ],
        )?;
        Ok(count > 0)
    }

    async fn set_notes(&self, id: i64, notes: &str, at: NaiveDateTime) -> StoreResult<bool> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE bookings SET user_notes = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'completed' AND approval_status != 'rejected'",
            params![notes, ts(&at), id],
        )?;
        Ok(count > 0)
    }

    async fn complete_due(&self, now: NaiveDateTime) -> StoreResult<u64> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE bookings SET status = 'completed', completed_at = ?1, updated_at = ?1
             WHERE status = 'scheduled'
               AND (date < ?2 OR (date = ?2 AND scheduled_time <= ?3))",
            params![ts(&now), date_str(&now.date()), time_str(&now.time())],
        )?;
        Ok(count as u64)
    }

    async fn reminder_candidates(&self, from: NaiveDate, to: NaiveDate) -> StoreResult<Vec<Booking>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE status = 'scheduled' AND approval_status = 'approved'
               AND reminder_sent_at IS NULL AND date >= ?1 AND date <= ?2
             ORDER BY date ASC, scheduled_time ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![date_str(&from), date_str(&to)], parse_booking_row)?;

        let mut bookings = vec![];
        for row in rows {
            bookings.push(row?);
        }
        Ok(bookings)
    }

    async fn mark_reminder_sent(&self, id: i64, at: NaiveDateTime) -> StoreResult<bool> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE bookings SET reminder_sent_at = ?1, updated_at = ?1
             WHERE id = ?2 AND status = 'scheduled' AND reminder_sent_at IS NULL",
            params![ts(&at), id],
        )?;
        Ok(count > 0)
    }

    // ── Time rules ──

    async fn list_rules(&self) -> StoreResult<Vec<BookingTimeRule>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM booking_time_rules ORDER BY day_type, start_time, id"
        ))?;
        let rows = stmt.query_map([], parse_rule_row)?;

        let mut rules = vec![];
        for row in rows {
            rules.push(row?);
        }
        Ok(rules)
    }

    async fn create_rule(&self, rule: &RuleInput, at: NaiveDateTime) -> StoreResult<BookingTimeRule> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO booking_time_rules (day_type, name, start_time, end_time, is_blocked,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                rule.day_type.as_str(),
                rule.name.trim(),
                time_str(&rule.start_time),
                time_str(&rule.end_time),
                rule.is_blocked,
                ts(&at),
            ],
        )?;
        let id = conn.last_insert_rowid();
        let created = conn.query_row(
            &format!("SELECT {RULE_COLUMNS} FROM booking_time_rules WHERE id = ?1"),
            params![id],
            parse_rule_row,
        )?;
        Ok(created)
    }

    async fn update_rule(&self, id: i64, rule: &RuleInput, at: NaiveDateTime) -> StoreResult<bool> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE booking_time_rules SET day_type = ?1, name = ?2, start_time = ?3,
                end_time = ?4, is_blocked = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                rule.day_type.as_str(),
                rule.name.trim(),
                time_str(&rule.start_time),
                time_str(&rule.end_time),
                rule.is_blocked,
                ts(&at),
                id,
            ],
        )?;
        Ok(count > 0)
    }

    async fn delete_rule(&self, id: i64) -> StoreResult<bool> {
        let conn = self.lock()?;
        let count = conn.execute("DELETE FROM booking_time_rules WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    // ── Blocked dates ──

    async fn list_blocked_dates(&self) -> StoreResult<Vec<BlockedDate>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocked_dates ORDER BY date, id"
        ))?;
        let rows = stmt.query_map([], parse_block_row)?;

        let mut blocks = vec![];
        for row in rows {
            blocks.push(row?);
        }
        Ok(blocks)
    }

    async fn create_blocked_date(
        &self,
        block: &NewBlockedDate,
        at: NaiveDateTime,
    ) -> StoreResult<BlockedDate> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO blocked_dates (date, dog_id, reason, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                date_str(&block.date),
                block.dog_id,
                block.reason.trim(),
                block.created_by,
                ts(&at)
            ],
        )?;
        let id = conn.last_insert_rowid();
        let created = conn.query_row(
            &format!("SELECT {BLOCK_COLUMNS} FROM blocked_dates WHERE id = ?1"),
            params![id],
            parse_block_row,
        )?;
        Ok(created)
    }

    async fn delete_blocked_date(&self, id: i64) -> StoreResult<bool> {
        let conn = self.lock()?;
        let count = conn.execute("DELETE FROM blocked_dates WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    // ── Holidays ──

    async fn list_holidays(&self, year: i32, region: &str) -> StoreResult<Vec<Holiday>> {
        let (start, end) = year_bounds(year);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {HOLIDAY_COLUMNS} FROM holidays
             WHERE date >= ?1 AND date <= ?2 AND (source = 'manual' OR region = ?3)
             ORDER BY date, id"
        ))?;
        let rows = stmt.query_map(params![start, end, region], parse_holiday_row)?;

        let mut holidays = vec![];
        for row in rows {
            holidays.push(row?);
        }
        Ok(holidays)
    }

    async fn replace_fetched_holidays(
        &self,
        year: i32,
        region: &str,
        entries: &[HolidayEntry],
        at: NaiveDateTime,
    ) -> StoreResult<()> {
        let (start, end) = year_bounds(year);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM holidays
             WHERE source = 'fetched' AND region = ?1 AND date >= ?2 AND date <= ?3",
            params![region, start, end],
        )?;
        for entry in entries.iter().filter(|e| e.date.year() == year) {
            tx.execute(
                "INSERT INTO holidays (date, name, source, region, created_at)
                 VALUES (?1, ?2, 'fetched', ?3, ?4)
                 ON CONFLICT DO NOTHING",
                params![date_str(&entry.date), entry.name, region, ts(&at)],
            )?;
        }
        tx.execute(
            "INSERT INTO holiday_fetches (year, region, fetched_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (year, region) DO UPDATE SET fetched_at = excluded.fetched_at",
            params![year, region, ts(&at)],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn holidays_fetched_at(&self, year: i32, region: &str) -> StoreResult<Option<NaiveDateTime>> {
        let conn = self.lock()?;
        let fetched = conn
            .query_row(
                "SELECT fetched_at FROM holiday_fetches WHERE year = ?1 AND region = ?2",
                params![year, region],
                |row| col_ts(row, 0),
            )
            .optional()?;
        Ok(fetched)
    }

    async fn create_manual_holiday(
        &self,
        holiday: &NewHoliday,
        created_by: i64,
        at: NaiveDateTime,
    ) -> StoreResult<Holiday> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO holidays (date, name, source, region, created_by, created_at)
             VALUES (?1, ?2, 'manual', NULL, ?3, ?4)",
            params![date_str(&holiday.date), holiday.name.trim(), created_by, ts(&at)],
        )?;
        let id = conn.last_insert_rowid();
        let created = conn.query_row(
            &format!("SELECT {HOLIDAY_COLUMNS} FROM holidays WHERE id = ?1"),
            params![id],
            parse_holiday_row,
        )?;
        Ok(created)
    }

    async fn delete_holiday(&self, id: i64) -> StoreResult<bool> {
        let conn = self.lock()?;
        let count = conn.execute("DELETE FROM holidays WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    // ── Settings ──

    async fn load_settings(&self) -> StoreResult<BTreeMap<String, String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut settings = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            settings.insert(key, value);
        }
        Ok(settings)
    }

    async fn put_setting(&self, key: &str, value: &str, at: NaiveDateTime) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, ts(&at)],
        )?;
        Ok(())
    }

    // ── Users & dogs ──

    async fn get_user(&self, id: i64) -> StoreResult<Option<User>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                parse_user_row,
            )
            .optional()?;
        Ok(user)
    }

    async fn upsert_user(&self, user: &User) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (id, name, role, tier, is_active, is_verified, last_activity_at,
                deactivated_at, deactivation_reason, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                role = excluded.role,
                tier = excluded.tier,
                is_active = excluded.is_active,
                is_verified = excluded.is_verified,
                last_activity_at = excluded.last_activity_at,
                deactivated_at = excluded.deactivated_at,
                deactivation_reason = excluded.deactivation_reason,
                deleted_at = excluded.deleted_at",
            params![
                user.id,
                user.name,
                user.role.as_str(),
                user.tier.as_str(),
                user.is_active,
                user.is_verified,
                ts(&user.last_activity_at),
                user.deactivated_at.as_ref().map(ts),
                user.deactivation_reason,
                user.deleted_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    async fn idle_users(&self, cutoff: NaiveDateTime) -> StoreResult<Vec<User>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE is_active = 1 AND deleted_at IS NULL AND role = 'walker'
               AND last_activity_at < ?1
             ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![ts(&cutoff)], parse_user_row)?;

        let mut users = vec![];
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    async fn deactivate_user(
        &self,
        id: i64,
        cutoff: NaiveDateTime,
        reason: &str,
        at: NaiveDateTime,
    ) -> StoreResult<bool> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE users SET is_active = 0, deactivated_at = ?1, deactivation_reason = ?2
             WHERE id = ?3 AND is_active = 1 AND deleted_at IS NULL AND last_activity_at < ?4",
            params![ts(&at), reason, id, ts(&cutoff)],
        )?;
        Ok(count > 0)
    }

    async fn soft_delete_user(&self, id: i64, at: NaiveDateTime) -> StoreResult<bool> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE users SET deleted_at = ?1, is_active = 0 WHERE id = ?2 AND deleted_at IS NULL",
            params![ts(&at), id],
        )?;
        Ok(count > 0)
    }

    async fn get_dog(&self, id: i64) -> StoreResult<Option<Dog>> {
        let conn = self.lock()?;
        let dog = conn
            .query_row(
                "SELECT id, name, tier, is_available, deleted_at FROM dogs WHERE id = ?1",
                params![id],
                parse_dog_row,
            )
            .optional()?;
        Ok(dog)
    }

    async fn upsert_dog(&self, dog: &Dog) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO dogs (id, name, tier, is_available, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                tier = excluded.tier,
                is_available = excluded.is_available,
                deleted_at = excluded.deleted_at",
            params![
                dog.id,
                dog.name,
                dog.tier.as_str(),
                dog.is_available,
                dog.deleted_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    async fn soft_delete_dog(&self, id: i64, at: NaiveDateTime) -> StoreResult<bool> {
        let conn = self.lock()?;
        let count = conn.execute(
            "UPDATE dogs SET deleted_at = ?1, is_available = 0 WHERE id = ?2 AND deleted_at IS NULL",
            params![ts(&at), id],
        )?;
        Ok(count > 0)
    }
}
