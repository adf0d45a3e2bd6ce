//! Quota counter persistence
//!
//! Counters only ever grow, and never past their quota. Each response is
//! billed at most once: the `usage_events` primary key is claimed in the
//! same transaction that increments the counters.

use cvr_common::db::{UsageCounters, UsageRecord};
use cvr_common::time::now;
use cvr_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::warn;

use super::UsageOutcome;

/// Apply one usage event to the owner's counters
pub async fn record_usage(pool: &SqlitePool, record: &UsageRecord) -> Result<UsageOutcome> {
    let mut tx = pool.begin().await?;

    let claimed = sqlx::query(
        r#"
        INSERT INTO usage_events (response_id, user_id, minutes, recorded_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(response_id) DO NOTHING
        "#,
    )
    .bind(&record.response_id)
    .bind(&record.user_id)
    .bind(record.minutes)
    .bind(now().to_rfc3339())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if claimed == 0 {
        tx.rollback().await?;
        return Ok(UsageOutcome::AlreadyRecorded);
    }

    let current: Option<(i64, i64, i64, i64)> = sqlx::query_as(
        r#"
        SELECT responses_used, minutes_used, response_quota, minute_quota
        FROM profiles
        WHERE user_id = ?
        "#,
    )
    .bind(&record.user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((responses_used, minutes_used, response_quota, minute_quota)) = current else {
        tx.rollback().await?;
        return Err(Error::NotFound(format!("Profile not found: {}", record.user_id)));
    };

    let (responses_next, responses_capped) = bounded_increment(responses_used, 1, response_quota);
    let (minutes_next, minutes_capped) =
        bounded_increment(minutes_used, record.minutes.max(0), minute_quota);
    let capped = responses_capped || minutes_capped;

    if capped {
        warn!(
            user_id = %record.user_id,
            response_id = %record.response_id,
            responses_used,
            response_quota,
            minutes_used,
            minute_quota,
            "Usage capped at plan quota"
        );
    }

    sqlx::query("UPDATE profiles SET responses_used = ?, minutes_used = ? WHERE user_id = ?")
        .bind(responses_next)
        .bind(minutes_next)
        .bind(&record.user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(UsageOutcome::Recorded {
        counters: UsageCounters {
            user_id: record.user_id.clone(),
            responses_used: responses_next,
            minutes_used: minutes_next,
            response_quota,
            minute_quota,
        },
        capped,
    })
}

/// Load a user's counters
pub async fn load_counters(pool: &SqlitePool, user_id: &str) -> Result<Option<UsageCounters>> {
    let row: Option<(i64, i64, i64, i64)> = sqlx::query_as(
        r#"
        SELECT responses_used, minutes_used, response_quota, minute_quota
        FROM profiles
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(
        |(responses_used, minutes_used, response_quota, minute_quota)| UsageCounters {
            user_id: user_id.to_string(),
            responses_used,
            minutes_used,
            response_quota,
            minute_quota,
        },
    ))
}

/// Create a profile with the given quotas (owned by billing; used for setup)
pub async fn insert_profile(
    pool: &SqlitePool,
    user_id: &str,
    response_quota: i64,
    minute_quota: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO profiles (user_id, response_quota, minute_quota)
        VALUES (?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            response_quota = excluded.response_quota,
            minute_quota = excluded.minute_quota
        "#,
    )
    .bind(user_id)
    .bind(response_quota)
    .bind(minute_quota)
    .execute(pool)
    .await?;
    Ok(())
}

/// Number of usage events recorded for a user
pub async fn count_usage_events(pool: &SqlitePool, user_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_events WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Add `delta` to `used` without exceeding `quota` or ever decreasing
fn bounded_increment(used: i64, delta: i64, quota: i64) -> (i64, bool) {
    let wanted = used.saturating_add(delta);
    if wanted > quota {
        (used.max(quota), true)
    } else {
        (wanted, false)
    }
}
