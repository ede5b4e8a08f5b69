use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};

use super::{Backend, StatusChange, Store, StoreError, StoreResult};
use crate::db::migrations::postgres_migrations;
use crate::models::{
    ApprovalDecision, ApprovalStatus, BlockedDate, Booking, BookingFilter, BookingStatus,
    BookingTimeRule, DayType, Dog, Holiday, HolidayEntry, HolidaySource, NewBlockedDate,
    NewBooking, NewHoliday, Role, RuleInput, Slot, Tier, User, WalkType,
};

const BOOKING_COLUMNS: &str = "id, user_id, dog_id, date, walk_type, scheduled_time, status, \
     requires_approval, approval_status, approved_by, approved_at, rejection_reason, user_notes, \
     cancellation_reason, completed_at, reminder_sent_at, created_at, updated_at";

const RULE_COLUMNS: &str =
    "id, day_type, name, start_time, end_time, is_blocked, created_at, updated_at";

const BLOCK_COLUMNS: &str = "id, date, dog_id, reason, created_by, created_at";

const HOLIDAY_COLUMNS: &str = "id, date, name, source, region, created_by, created_at";

const USER_COLUMNS: &str = "id, name, role, tier, is_active, is_verified, last_activity_at, \
     deactivated_at, deactivation_reason, deleted_at";

/// Classification by SQLSTATE. A dropped connection is retryable.
impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(code) = err.code() {
            if *code == SqlState::UNIQUE_VIOLATION {
                return StoreError::Conflict;
            }
            let transient = [
                SqlState::T_R_SERIALIZATION_FAILURE,
                SqlState::T_R_DEADLOCK_DETECTED,
                SqlState::LOCK_NOT_AVAILABLE,
                SqlState::ADMIN_SHUTDOWN,
                SqlState::CONNECTION_EXCEPTION,
                SqlState::CONNECTION_FAILURE,
                SqlState::TOO_MANY_CONNECTIONS,
            ];
            if transient.contains(code) {
                return StoreError::Transient(err.to_string());
            }
        } else if err.is_closed() {
            return StoreError::Transient(err.to_string());
        }
        StoreError::Backend(err.into())
    }
}

pub struct PostgresStore {
    client: Mutex<Client>,
}

impl PostgresStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (mut client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .context("failed to connect to postgres")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection closed");
            }
        });

        run_migrations(&mut client).await?;
        tracing::info!("connected to postgres");

        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

async fn run_migrations(client: &mut Client) -> anyhow::Result<()> {
    client
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TIMESTAMP NOT NULL DEFAULT LOCALTIMESTAMP(0)
            );",
        )
        .await
        .context("failed to create migrations table")?;

    for migration in postgres_migrations() {
        let name = migration.name;

        let already_applied: bool = client
            .query_one("SELECT COUNT(*) > 0 FROM _migrations WHERE name = $1", &[&name])
            .await
            .context("failed to check migration status")?
            .get(0);

        if already_applied {
            continue;
        }

        let tx = client.transaction().await?;
        tx.batch_execute(&migration.sql)
            .await
            .with_context(|| format!("failed to apply migration: {name}"))?;
        tx.execute("INSERT INTO _migrations (name) VALUES ($1)", &[&name])
            .await
            .with_context(|| format!("failed to record migration: {name}"))?;
        tx.commit().await?;

        tracing::info!("applied migration: {name}");
    }

    Ok(())
}

// ── Row decoding ──

fn parse_enum<T>(raw: String, parse: fn(&str) -> Option<T>) -> StoreResult<T> {
    parse(&raw).ok_or_else(|| StoreError::Backend(anyhow::anyhow!("unexpected column value {raw:?}")))
}

fn year_bounds(year: i32) -> StoreResult<(NaiveDate, NaiveDate)> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .zip(NaiveDate::from_ymd_opt(year, 12, 31))
        .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("year {year} out of range")))
}

fn parse_booking(row: &Row) -> StoreResult<Booking> {
    Ok(Booking {
        id: row.try_get(0)?,
        user_id: row.try_get(1)?,
        dog_id: row.try_get(2)?,
        date: row.try_get(3)?,
        walk_type: parse_enum(row.try_get(4)?, WalkType::parse)?,
        scheduled_time: row.try_get(5)?,
        status: parse_enum(row.try_get(6)?, BookingStatus::parse)?,
        requires_approval: row.try_get(7)?,
        approval_status: parse_enum(row.try_get(8)?, ApprovalStatus::parse)?,
        approved_by: row.try_get(9)?,
        approved_at: row.try_get(10)?,
        rejection_reason: row.try_get(11)?,
        user_notes: row.try_get(12)?,
        cancellation_reason: row.try_get(13)?,
        completed_at: row.try_get(14)?,
        reminder_sent_at: row.try_get(15)?,
        created_at: row.try_get(16)?,
        updated_at: row.try_get(17)?,
    })
}

fn parse_rule(row: &Row) -> StoreResult<BookingTimeRule> {
    Ok(BookingTimeRule {
        id: row.try_get(0)?,
        day_type: parse_enum(row.try_get(1)?, DayType::parse)?,
        name: row.try_get(2)?,
        start_time: row.try_get(3)?,
        end_time: row.try_get(4)?,
        is_blocked: row.try_get(5)?,
        created_at: row.try_get(6)?,
        updated_at: row.try_get(7)?,
    })
}

fn parse_block(row: &Row) -> StoreResult<BlockedDate> {
    Ok(BlockedDate {
        id: row.try_get(0)?,
        date: row.try_get(1)?,
        dog_id: row.try_get(2)?,
        reason: row.try_get(3)?,
        created_by: row.try_get(4)?,
        created_at: row.try_get(5)?,
    })
}

fn parse_holiday(row: &Row) -> StoreResult<Holiday> {
    Ok(Holiday {
        id: row.try_get(0)?,
        date: row.try_get(1)?,
        name: row.try_get(2)?,
        source: parse_enum(row.try_get(3)?, HolidaySource::parse)?,
        region: row.try_get(4)?,
        created_by: row.try_get(5)?,
        created_at: row.try_get(6)?,
    })
}

fn parse_user(row: &Row) -> StoreResult<User> {
    Ok(User {
        id: row.try_get(0)?,
        name: row.try_get(1)?,
        role: parse_enum(row.try_get(2)?, Role::parse)?,
        tier: parse_enum(row.try_get(3)?, Tier::parse)?,
        is_active: row.try_get(4)?,
        is_verified: row.try_get(5)?,
        last_activity_at: row.try_get(6)?,
        deactivated_at: row.try_get(7)?,
        deactivation_reason: row.try_get(8)?,
        deleted_at: row.try_get(9)?,
    })
}

fn parse_dog(row: &Row) -> StoreResult<Dog> {
    Ok(Dog {
        id: row.try_get(0)?,
        name: row.try_get(1)?,
        tier: parse_enum(row.try_get(2)?, Tier::parse)?,
        is_available: row.try_get(3)?,
        deleted_at: row.try_get(4)?,
    })
}

fn collect<T>(rows: Vec<Row>, parse: fn(&Row) -> StoreResult<T>) -> StoreResult<Vec<T>> {
    rows.iter().map(parse).collect()
}

#[async_trait]
impl Store for PostgresStore {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    // ── Bookings ──

    async fn create_booking(&self, booking: &NewBooking) -> StoreResult<Booking> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO bookings (user_id, dog_id, date, walk_type, scheduled_time, status,
                        requires_approval, approval_status, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, 'scheduled', $6, $7, $8, $8)
                     RETURNING {BOOKING_COLUMNS}"
                ),
                &[
                    &booking.user_id,
                    &booking.dog_id,
                    &booking.date,
                    &booking.walk_type.as_str(),
                    &booking.scheduled_time,
                    &booking.requires_approval,
                    &booking.initial_approval().as_str(),
                    &booking.created_at,
                ],
            )
            .await?;
        parse_booking(&row)
    }

    async fn get_booking(&self, id: i64) -> StoreResult<Option<Booking>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"), &[&id])
            .await?;
        row.as_ref().map(parse_booking).transpose()
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> StoreResult<Vec<Booking>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params_vec: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();

        if let Some(user_id) = filter.user_id {
            params_vec.push(Box::new(user_id));
            clauses.push(format!("user_id = ${}", params_vec.len()));
        }
        if let Some(dog_id) = filter.dog_id {
            params_vec.push(Box::new(dog_id));
            clauses.push(format!("dog_id = ${}", params_vec.len()));
        }
        if let Some(from) = filter.date_from {
            params_vec.push(Box::new(from));
            clauses.push(format!("date >= ${}", params_vec.len()));
        }
        if let Some(to) = filter.date_to {
            params_vec.push(Box::new(to));
            clauses.push(format!("date <= ${}", params_vec.len()));
        }
        if let Some(status) = filter.status {
            params_vec.push(Box::new(status.as_str()));
            clauses.push(format!("status = ${}", params_vec.len()));
        }
        if let Some(approval) = filter.approval_status {
            params_vec.push(Box::new(approval.as_str()));
            clauses.push(format!("approval_status = ${}", params_vec.len()));
        }
        params_vec.push(Box::new(filter.effective_limit()));
        let limit_idx = params_vec.len();

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings {where_sql}
             ORDER BY date ASC, scheduled_time ASC, id ASC LIMIT ${limit_idx}"
        );

        let params_refs: Vec<&(dyn ToSql + Sync)> =
            params_vec.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();
        let client = self.client.lock().await;
        let rows = client.query(&sql, &params_refs).await?;
        collect(rows, parse_booking)
    }

    async fn find_conflicting(&self, slot: &Slot, exclude_id: Option<i64>) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM bookings
                    WHERE dog_id = $1 AND date = $2 AND walk_type = $3 AND status <> 'cancelled'
                      AND ($4::BIGINT IS NULL OR id <> $4)
                 )",
                &[&slot.dog_id, &slot.date, &slot.walk_type.as_str(), &exclude_id],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn update_status(&self, id: i64, change: &StatusChange<'_>) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let count = client
            .execute(
                "UPDATE bookings SET
                    status = $1,
                    cancellation_reason = CASE WHEN $1 = 'cancelled' THEN $2 ELSE cancellation_reason END,
                    completed_at = CASE WHEN $1 = 'completed' THEN $3 ELSE completed_at END,
                    updated_at = $3
                 WHERE id = $4 AND status = $5",
                &[&change.to.as_str(), &change.reason, &change.at, &id, &change.from.as_str()],
            )
            .await?;
        Ok(count > 0)
    }

    async fn decide_approval(
        &self,
        id: i64,
        decision: &ApprovalDecision,
        at: NaiveDateTime,
    ) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let count = match decision {
            ApprovalDecision::Approve { admin_id } => {
                client
                    .execute(
                        "UPDATE bookings SET approval_status = 'approved', approved_by = $1,
                            approved_at = $2, updated_at = $2
                         WHERE id = $3 AND status = 'scheduled' AND approval_status = 'pending'",
                        &[admin_id, &at, &id],
                    )
                    .await?
            }
            ApprovalDecision::Reject { admin_id, reason } => {
                client
                    .execute(
                        "UPDATE bookings SET approval_status = 'rejected', status = 'cancelled',
                            approved_by = $1, approved_at = $2, rejection_reason = $3, updated_at = $2
                         WHERE id = $4 AND status = 'scheduled' AND approval_status = 'pending'",
                        &[admin_id, &at, reason, &id],
                    )
                    .await?
            }
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
        let client = self.client.lock().await;
        let count = client
            .execute(
                "UPDATE bookings SET dog_id = $1, date = $2, walk_type = $3, scheduled_time = $4,
                    reminder_sent_at = NULL, updated_at = $5
                 WHERE id = $6 AND status = 'scheduled' AND approval_status <> 'pending'",
                &[&slot.dog_id, &slot.date, &slot.walk_type.as_str(), &time, &at, &id],
            )
            .await?;
        Ok(count > 0)
    }

    async fn set_notes(&self, id: i64, notes: &str, at: NaiveDateTime) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let count = client
            .execute(
                "UPDATE bookings SET user_notes = $1, updated_at = $2
                 WHERE id = $3 AND status = 'completed' AND approval_status <> 'rejected'",
                &[&notes, &at, &id],
            )
            .await?;
        Ok(count > 0)
    }

    async fn complete_due(&self, now: NaiveDateTime) -> StoreResult<u64> {
        let client = self.client.lock().await;
        let count = client
            .execute(
                "UPDATE bookings SET status = 'completed', completed_at = $1, updated_at = $1
                 WHERE status = 'scheduled'
                   AND (date < $2 OR (date = $2 AND scheduled_time <= $3))",
                &[&now, &now.date(), &now.time()],
            )
            .await?;
        Ok(count)
    }

    async fn reminder_candidates(&self, from: NaiveDate, to: NaiveDate) -> StoreResult<Vec<Booking>> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                &format!(
                    "SELECT {BOOKING_COLUMNS} FROM bookings
                     WHERE status = 'scheduled' AND approval_status = 'approved'
                       AND reminder_sent_at IS NULL AND date >= $1 AND date <= $2
                     ORDER BY date ASC, scheduled_time ASC, id ASC"
                ),
                &[&from, &to],
            )
            .await?;
        collect(rows, parse_booking)
    }

    async fn mark_reminder_sent(&self, id: i64, at: NaiveDateTime) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let count = client
            .execute(
                "UPDATE bookings SET reminder_sent_at = $1, updated_at = $1
                 WHERE id = $2 AND status = 'scheduled' AND reminder_sent_at IS NULL",
                &[&at, &id],
            )
            .await?;
        Ok(count > 0)
    }

    // ── Time rules ──

    async fn list_rules(&self) -> StoreResult<Vec<BookingTimeRule>> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS} FROM booking_time_rules
                     ORDER BY day_type, start_time, id"
                ),
                &[],
            )
            .await?;
        collect(rows, parse_rule)
    }

    async fn create_rule(&self, rule: &RuleInput, at: NaiveDateTime) -> StoreResult<BookingTimeRule> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO booking_time_rules (day_type, name, start_time, end_time,
                        is_blocked, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $6)
                     RETURNING {RULE_COLUMNS}"
                ),
                &[
                    &rule.day_type.as_str(),
                    &rule.name.trim(),
                    &rule.start_time,
                    &rule.end_time,
                    &rule.is_blocked,
                    &at,
                ],
            )
            .await?;
        parse_rule(&row)
    }

    async fn update_rule(&self, id: i64, rule: &RuleInput, at: NaiveDateTime) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let count = client
            .execute(
                "UPDATE booking_time_rules SET day_type = $1, name = $2, start_time = $3,
                    end_time = $4, is_blocked = $5, updated_at = $6
                 WHERE id = $7",
                &[
                    &rule.day_type.as_str(),
                    &rule.name.trim(),
                    &rule.start_time,
                    &rule.end_time,
                    &rule.is_blocked,
                    &at,
                    &id,
                ],
            )
            .await?;
        Ok(count > 0)
    }

    async fn delete_rule(&self, id: i64) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let count = client
            .execute("DELETE FROM booking_time_rules WHERE id = $1", &[&id])
            .await?;
        Ok(count > 0)
    }

    // ── Blocked dates ──

    async fn list_blocked_dates(&self) -> StoreResult<Vec<BlockedDate>> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                &format!("SELECT {BLOCK_COLUMNS} FROM blocked_dates ORDER BY date, id"),
                &[],
            )
            .await?;
        collect(rows, parse_block)
    }

    async fn create_blocked_date(
        &self,
        block: &NewBlockedDate,
        at: NaiveDateTime,
    ) -> StoreResult<BlockedDate> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO blocked_dates (date, dog_id, reason, created_by, created_at)
                     VALUES ($1, $2, $3, $4, $5)
                     RETURNING {BLOCK_COLUMNS}"
                ),
                &[&block.date, &block.dog_id, &block.reason.trim(), &block.created_by, &at],
            )
            .await?;
        parse_block(&row)
    }

    async fn delete_blocked_date(&self, id: i64) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let count = client
            .execute("DELETE FROM blocked_dates WHERE id = $1", &[&id])
            .await?;
        Ok(count > 0)
    }

    // ── Holidays ──

    async fn list_holidays(&self, year: i32, region: &str) -> StoreResult<Vec<Holiday>> {
        let (start, end) = year_bounds(year)?;
        let client = self.client.lock().await;
        let rows = client
            .query(
                &format!(
                    "SELECT {HOLIDAY_COLUMNS} FROM holidays
                     WHERE date >= $1 AND date <= $2 AND (source = 'manual' OR region = $3)
                     ORDER BY date, id"
                ),
                &[&start, &end, &region],
            )
            .await?;
        collect(rows, parse_holiday)
    }

    async fn replace_fetched_holidays(
        &self,
        year: i32,
        region: &str,
        entries: &[HolidayEntry],
        at: NaiveDateTime,
    ) -> StoreResult<()> {
        let (start, end) = year_bounds(year)?;
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        tx.execute(
            "DELETE FROM holidays
             WHERE source = 'fetched' AND region = $1 AND date >= $2 AND date <= $3",
            &[&region, &start, &end],
        )
        .await?;
        for entry in entries.iter().filter(|e| e.date.year() == year) {
            tx.execute(
                "INSERT INTO holidays (date, name, source, region, created_at)
                 VALUES ($1, $2, 'fetched', $3, $4)
                 ON CONFLICT DO NOTHING",
                &[&entry.date, &entry.name, &region, &at],
            )
            .await?;
        }
        tx.execute(
            "INSERT INTO holiday_fetches (year, region, fetched_at) VALUES ($1, $2, $3)
             ON CONFLICT (year, region) DO UPDATE SET fetched_at = EXCLUDED.fetched_at",
            &[&year, &region, &at],
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn holidays_fetched_at(&self, year: i32, region: &str) -> StoreResult<Option<NaiveDateTime>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "SELECT fetched_at FROM holiday_fetches WHERE year = $1 AND region = $2",
                &[&year, &region],
            )
            .await?;
        Ok(row.map(|r| r.try_get(0)).transpose()?)
    }

    async fn create_manual_holiday(
        &self,
        holiday: &NewHoliday,
        created_by: i64,
        at: NaiveDateTime,
    ) -> StoreResult<Holiday> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO holidays (date, name, source, region, created_by, created_at)
                     VALUES ($1, $2, 'manual', NULL, $3, $4)
                     RETURNING {HOLIDAY_COLUMNS}"
                ),
                &[&holiday.date, &holiday.name.trim(), &created_by, &at],
            )
            .await?;
        parse_holiday(&row)
    }

    async fn delete_holiday(&self, id: i64) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let count = client
            .execute("DELETE FROM holidays WHERE id = $1", &[&id])
            .await?;
        Ok(count > 0)
    }

    // ── Settings ──

    async fn load_settings(&self) -> StoreResult<BTreeMap<String, String>> {
        let client = self.client.lock().await;
        let rows = client.query("SELECT key, value FROM settings", &[]).await?;

        let mut settings = BTreeMap::new();
        for row in rows {
            settings.insert(row.try_get(0)?, row.try_get(1)?);
        }
        Ok(settings)
    }

    async fn put_setting(&self, key: &str, value: &str, at: NaiveDateTime) -> StoreResult<()> {
        let client = self.client.lock().await;
        client
            .execute(
                "INSERT INTO settings (key, value, updated_at) VALUES ($1, $2, $3)
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at",
                &[&key, &value, &at],
            )
            .await?;
        Ok(())
    }

    // ── Users & dogs ──

    async fn get_user(&self, id: i64) -> StoreResult<Option<User>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"), &[&id])
            .await?;
        row.as_ref().map(parse_user).transpose()
    }

    async fn upsert_user(&self, user: &User) -> StoreResult<()> {
        let client = self.client.lock().await;
        client
            .execute(
                "INSERT INTO users (id, name, role, tier, is_active, is_verified, last_activity_at,
                    deactivated_at, deactivation_reason, deleted_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    role = EXCLUDED.role,
                    tier = EXCLUDED.tier,
                    is_active = EXCLUDED.is_active,
                    is_verified = EXCLUDED.is_verified,
                    last_activity_at = EXCLUDED.last_activity_at,
                    deactivated_at = EXCLUDED.deactivated_at,
                    deactivation_reason = EXCLUDED.deactivation_reason,
                    deleted_at = EXCLUDED.deleted_at",
                &[
                    &user.id,
                    &user.name,
                    &user.role.as_str(),
                    &user.tier.as_str(),
                    &user.is_active,
                    &user.is_verified,
                    &user.last_activity_at,
                    &user.deactivated_at,
                    &user.deactivation_reason,
                    &user.deleted_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn idle_users(&self, cutoff: NaiveDateTime) -> StoreResult<Vec<User>> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users
                     WHERE is_active AND deleted_at IS NULL AND role = 'walker'
                       AND last_activity_at < $1
                     ORDER BY id"
                ),
                &[&cutoff],
            )
            .await?;
        collect(rows, parse_user)
    }

    async fn deactivate_user(
        &self,
        id: i64,
        cutoff: NaiveDateTime,
        reason: &str,
        at: NaiveDateTime,
    ) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let count = client
            .execute(
                "UPDATE users SET is_active = FALSE, deactivated_at = $1, deactivation_reason = $2
                 WHERE id = $3 AND is_active AND deleted_at IS NULL AND last_activity_at < $4",
                &[&at, &reason, &id, &cutoff],
            )
            .await?;
        Ok(count > 0)
    }

    async fn soft_delete_user(&self, id: i64, at: NaiveDateTime) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let count = client
            .execute(
                "UPDATE users SET deleted_at = $1, is_active = FALSE
                 WHERE id = $2 AND deleted_at IS NULL",
                &[&at, &id],
            )
            .await?;
        Ok(count > 0)
    }

    async fn get_dog(&self, id: i64) -> StoreResult<Option<Dog>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "SELECT id, name, tier, is_available, deleted_at FROM dogs WHERE id = $1",
                &[&id],
            )
            .await?;
        row.as_ref().map(parse_dog).transpose()
    }

    async fn upsert_dog(&self, dog: &Dog) -> StoreResult<()> {
        let client = self.client.lock().await;
        client
            .execute(
                "INSERT INTO dogs (id, name, tier, is_available, deleted_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    tier = EXCLUDED.tier,
                    is_available = EXCLUDED.is_available,
                    deleted_at = EXCLUDED.deleted_at",
                &[&dog.id, &dog.name, &dog.tier.as_str(), &dog.is_available, &dog.deleted_at],
            )
            .await?;
        Ok(())
    }

    async fn soft_delete_dog(&self, id: i64, at: NaiveDateTime) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let count = client
            .execute(
                "UPDATE dogs SET deleted_at = $1, is_available = FALSE
                 WHERE id = $2 AND deleted_at IS NULL",
                &[&at, &id],
            )
            .await?;
        Ok(count > 0)
    }
}
