//! Metered AI credit ledger.
//!
//! Append-only rows; a user's available balance is the sum of
//! `amount - consumed` over unexpired grant rows. Consumption drains
//! classes in the fixed order daily → subscription → purchased →
//! kickstart, oldest grant first within each class, under row-level
//! locks so concurrent consumes serialize per user.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use sqlx::PgConnection;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{CreditEntry, CreditType};

// ── Errors ──────────────────────────────────────────────────────

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum CreditError {
    /// Balance is lower than the requested debit.
    #[error("insufficient credits: available {available}, requested {requested}")]
    InsufficientCredits {
        /// Units available at lock time.
        available: i64,
        /// Units requested.
        requested: i64,
    },

    /// Monthly purchased-credit cap would be exceeded.
    #[error("monthly purchase limit exceeded: purchased {purchased} of {limit}, requested {requested}")]
    PurchaseLimitExceeded {
        /// Units already purchased this calendar month.
        purchased: i64,
        /// The monthly cap.
        limit: i64,
        /// Units requested.
        requested: i64,
    },

    /// A grant or consume amount was not positive.
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ── Results ─────────────────────────────────────────────────────

/// Per-class balances as reported by [`balance`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct Balance {
    /// Daily credits remaining.
    pub daily: i64,
    /// Subscription credits remaining.
    pub subscription: i64,
    /// Purchased credits remaining.
    pub purchased: i64,
    /// Kickstart credits remaining.
    pub kickstart: i64,
}

impl Balance {
    /// Total across all classes.
    pub fn total(&self) -> i64 {
        self.daily + self.subscription + self.purchased + self.kickstart
    }

    fn add(&mut self, credit_type: CreditType, units: i64) {
        match credit_type {
            CreditType::Daily => self.daily += units,
            CreditType::Subscription => self.subscription += units,
            CreditType::Purchased => self.purchased += units,
            CreditType::Kickstart => self.kickstart += units,
        }
    }
}

/// Outcome of a successful [`consume`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConsumeReceipt {
    /// Units actually drained per class.
    pub consumed_by_class: HashMap<CreditType, i64>,
    /// Total balance after the debit.
    pub balance_after: i64,
    /// The appended consume row id.
    pub entry_id: Uuid,
}

const ENTRY_COLUMNS: &str = "id, user_id, credit_type, operation, amount, balance_after, \
     consumed, operation_ref, expires_at, expired, source_id, created_at";

// ── Grants ──────────────────────────────────────────────────────

async fn insert_grant(
    conn: &mut PgConnection,
    user_id: Uuid,
    credit_type: CreditType,
    amount: i64,
    operation_ref: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<CreditEntry, CreditError> {
    if amount <= 0 {
        return Err(CreditError::NonPositiveAmount(amount));
    }
    let balance_after = available_total(&mut *conn, user_id, Utc::now()).await? + amount;
    let entry = sqlx::query_as::<_, CreditEntry>(&format!(
        "INSERT INTO ai_credit_ledger
             (id, user_id, credit_type, operation, amount, balance_after, operation_ref, expires_at)
         VALUES ($1, $2, $3, 'grant', $4, $5, $6, $7)
         RETURNING {ENTRY_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(credit_type)
    .bind(amount)
    .bind(balance_after)
    .bind(operation_ref)
    .bind(expires_at)
    .fetch_one(conn)
    .await?;
    Ok(entry)
}

/// One-time kickstart grant. Idempotent per user: at most one kickstart
/// grant ever; re-invocation is a no-op returning `None`.
pub async fn grant_kickstart(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: i64,
) -> Result<Option<CreditEntry>, CreditError> {
    let existing: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM ai_credit_ledger
         WHERE user_id = $1 AND credit_type = 'kickstart' AND operation = 'grant'
         LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    if existing.is_some() {
        return Ok(None);
    }
    let entry = insert_grant(conn, user_id, CreditType::Kickstart, amount, None, None).await?;
    info!(user_id = %user_id, amount, "kickstart credits granted");
    Ok(Some(entry))
}

/// Daily grant expiring at the next UTC midnight. Idempotent per user per
/// UTC day: a same-day re-invocation is a no-op returning `None`.
pub async fn grant_daily(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<Option<CreditEntry>, CreditError> {
    let day_start = start_of_utc_day(now);
    let existing: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM ai_credit_ledger
         WHERE user_id = $1 AND credit_type = 'daily' AND operation = 'grant'
           AND created_at >= $2
         LIMIT 1",
    )
    .bind(user_id)
    .bind(day_start)
    .fetch_optional(&mut *conn)
    .await?;
    if existing.is_some() {
        return Ok(None);
    }
    let expires_at = day_start + Duration::days(1);
    let entry = insert_grant(
        conn,
        user_id,
        CreditType::Daily,
        amount,
        None,
        Some(expires_at),
    )
    .await?;
    debug!(user_id = %user_id, amount, "daily credits granted");
    Ok(Some(entry))
}

/// Monthly subscription grant expiring at the billing period end.
pub async fn grant_monthly(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: i64,
    period_end: DateTime<Utc>,
    operation_ref: &str,
) -> Result<CreditEntry, CreditError> {
    let entry = insert_grant(
        conn,
        user_id,
        CreditType::Subscription,
        amount,
        Some(operation_ref),
        Some(period_end),
    )
    .await?;
    info!(user_id = %user_id, amount, "monthly subscription credits granted");
    Ok(entry)
}

/// Purchased grant (never expires), honoring the calendar-month cap.
pub async fn grant_purchased(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: i64,
    operation_ref: &str,
    monthly_limit: i64,
    now: DateTime<Utc>,
) -> Result<CreditEntry, CreditError> {
    if amount <= 0 {
        return Err(CreditError::NonPositiveAmount(amount));
    }
    let purchased = purchased_this_month(&mut *conn, user_id, now).await?;
    if purchased + amount > monthly_limit {
        return Err(CreditError::PurchaseLimitExceeded {
            purchased,
            limit: monthly_limit,
            requested: amount,
        });
    }
    let entry = insert_grant(
        conn,
        user_id,
        CreditType::Purchased,
        amount,
        Some(operation_ref),
        None,
    )
    .await?;
    info!(user_id = %user_id, amount, "purchased credits granted");
    Ok(entry)
}

/// Compensating grant after a vendor failure: re-credits the drained
/// units in the same classes the consume took them from.
pub async fn refund(
    conn: &mut PgConnection,
    user_id: Uuid,
    receipt: &ConsumeReceipt,
    operation_ref: &str,
) -> Result<(), CreditError> {
    // Deterministic class order keeps ledger replay stable.
    let mut classes: Vec<(&CreditType, &i64)> = receipt.consumed_by_class.iter().collect();
    classes.sort_by_key(|(credit_type, _)| credit_type.consume_rank());
    for (credit_type, units) in classes {
        if *units <= 0 {
            continue;
        }
        // Refunded daily credits keep the day's expiry.
        let expires_at = match credit_type {
            CreditType::Daily => Some(start_of_utc_day(Utc::now()) + Duration::days(1)),
            _ => None,
        };
        insert_grant(
            &mut *conn,
            user_id,
            *credit_type,
            *units,
            Some(operation_ref),
            expires_at,
        )
        .await?;
    }
    info!(user_id = %user_id, ref_ = operation_ref, "credits refunded");
    Ok(())
}

// ── Consumption ─────────────────────────────────────────────────

/// Debit `n` units FIFO under row locks.
///
/// Locks the user's active grant rows, verifies the available sum, drains
/// grants in class order (daily → subscription → purchased → kickstart,
/// oldest first within a class), and appends a single consume row whose
/// `amount` is `-n`. The enclosing transaction must be rolled back by the
/// caller on error, which this function signals without partial effects
/// becoming visible.
pub async fn consume(
    conn: &mut PgConnection,
    user_id: Uuid,
    n: i64,
    operation_ref: &str,
) -> Result<ConsumeReceipt, CreditError> {
    if n <= 0 {
        return Err(CreditError::NonPositiveAmount(n));
    }
    let now = Utc::now();

    // Lock the candidate grant rows for the rest of the transaction.
    let grants = sqlx::query_as::<_, CreditEntry>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ai_credit_ledger
         WHERE user_id = $1 AND operation = 'grant' AND expired = FALSE
           AND (expires_at IS NULL OR expires_at > $2)
           AND amount > consumed
         ORDER BY created_at
         FOR UPDATE"
    ))
    .bind(user_id)
    .bind(now)
    .fetch_all(&mut *conn)
    .await?;

    let available: i64 = grants.iter().map(CreditEntry::remaining).sum();
    if available < n {
        return Err(CreditError::InsufficientCredits {
            available,
            requested: n,
        });
    }

    // FIFO: class rank first, then age.
    let mut ordered: Vec<&CreditEntry> = grants.iter().collect();
    ordered.sort_by_key(|g| (g.credit_type.consume_rank(), g.created_at));

    let mut remaining = n;
    let mut consumed_by_class: HashMap<CreditType, i64> = HashMap::new();
    for grant in ordered {
        if remaining == 0 {
            break;
        }
        let take = grant.remaining().min(remaining);
        if take == 0 {
            continue;
        }
        sqlx::query("UPDATE ai_credit_ledger SET consumed = consumed + $1 WHERE id = $2")
            .bind(take)
            .bind(grant.id)
            .execute(&mut *conn)
            .await?;
        *consumed_by_class.entry(grant.credit_type).or_insert(0) += take;
        remaining -= take;
    }

    let balance_after = available - n;
    let entry_id = Uuid::new_v4();
    // The consume row's class records where the first unit came from.
    let lead_class = consumed_by_class
        .keys()
        .min_by_key(|credit_type| credit_type.consume_rank())
        .copied()
        .unwrap_or(CreditType::Kickstart);

    sqlx::query(
        "INSERT INTO ai_credit_ledger
             (id, user_id, credit_type, operation, amount, balance_after, operation_ref)
         VALUES ($1, $2, $3, 'consume', $4, $5, $6)",
    )
    .bind(entry_id)
    .bind(user_id)
    .bind(lead_class)
    .bind(-n)
    .bind(balance_after)
    .bind(operation_ref)
    .execute(conn)
    .await?;

    debug!(user_id = %user_id, n, balance_after, "credits consumed");

    Ok(ConsumeReceipt {
        consumed_by_class,
        balance_after,
        entry_id,
    })
}

// ── Queries ─────────────────────────────────────────────────────

/// Per-class balance over unexpired grant rows.
pub async fn balance(
    conn: &mut PgConnection,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Balance, CreditError> {
    let rows: Vec<(CreditType, i64)> = sqlx::query_as(
        "SELECT credit_type, COALESCE(SUM(amount - consumed), 0)
         FROM ai_credit_ledger
         WHERE user_id = $1 AND operation = 'grant' AND expired = FALSE
           AND (expires_at IS NULL OR expires_at > $2)
         GROUP BY credit_type",
    )
    .bind(user_id)
    .bind(now)
    .fetch_all(conn)
    .await?;

    let mut result = Balance::default();
    for (credit_type, units) in rows {
        result.add(credit_type, units);
    }
    Ok(result)
}

/// Total available units.
pub async fn available_total(
    conn: &mut PgConnection,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<i64, CreditError> {
    let (total,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(amount - consumed), 0)
         FROM ai_credit_ledger
         WHERE user_id = $1 AND operation = 'grant' AND expired = FALSE
           AND (expires_at IS NULL OR expires_at > $2)",
    )
    .bind(user_id)
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(total)
}

/// Recent ledger rows for the credits endpoint, newest first.
pub async fn history(
    conn: &mut PgConnection,
    user_id: Uuid,
    limit: i64,
) -> Result<Vec<CreditEntry>, CreditError> {
    let rows = sqlx::query_as::<_, CreditEntry>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ai_credit_ledger
         WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2"
    ))
    .bind(user_id)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Units purchased in the current calendar month.
pub async fn purchased_this_month(
    conn: &mut PgConnection,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<i64, CreditError> {
    let month_start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    let (total,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(amount), 0)
         FROM ai_credit_ledger
         WHERE user_id = $1 AND credit_type = 'purchased' AND operation = 'grant'
           AND created_at >= $2",
    )
    .bind(user_id)
    .bind(month_start)
    .fetch_one(conn)
    .await?;
    Ok(total)
}

// ── Expiration sweep ────────────────────────────────────────────

/// Outcome of [`expire_due`].
#[derive(Debug, Clone, Default)]
pub struct ExpireSummary {
    /// Grant rows expired.
    pub expired_rows: u64,
    /// Units forfeited.
    pub expired_units: i64,
    /// Subscription units preserved past a period boundary.
    pub carried_over: i64,
}

/// Expire due grant rows and apply the subscription carry-over cap.
///
/// Every grant past its `expires_at` gets a negative `expire` row pointing
/// at it via `source_id` and is flagged `expired`. Subscription remainders
/// are preserved up to `max_carryover` units per user (oldest grants
/// first) by deferring their `expires_at` by one period; the excess is
/// expired like any other row.
pub async fn expire_due(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
    max_carryover: i64,
) -> Result<ExpireSummary, CreditError> {
    let due = sqlx::query_as::<_, CreditEntry>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ai_credit_ledger
         WHERE operation = 'grant' AND expired = FALSE
           AND expires_at IS NOT NULL AND expires_at <= $1
         ORDER BY user_id, created_at
         FOR UPDATE"
    ))
    .bind(now)
    .fetch_all(&mut *conn)
    .await?;

    let mut summary = ExpireSummary::default();
    // Carry-over budget consumed so far, per user.
    let mut carryover_used: HashMap<Uuid, i64> = HashMap::new();

    for grant in due {
        let remaining = grant.remaining();
        if remaining <= 0 {
            // Fully drained; just flag it.
            sqlx::query("UPDATE ai_credit_ledger SET expired = TRUE WHERE id = $1")
                .bind(grant.id)
                .execute(&mut *conn)
                .await?;
            continue;
        }

        if grant.credit_type == CreditType::Subscription {
            let used = carryover_used.entry(grant.user_id).or_insert(0);
            let budget = (max_carryover - *used).max(0);
            if budget > 0 {
                let keep = remaining.min(budget);
                let forfeit = remaining - keep;
                *used += keep;

                // The preserved units stay on the grant row itself so
                // balance and consume queries keep seeing them: defer
                // the expiry and, for a partial carry-over, shrink the
                // grant down to consumed + keep.
                let deferred = grant.expires_at.map(|at| at + Duration::days(30));
                sqlx::query(
                    "UPDATE ai_credit_ledger
                     SET amount = consumed + $1, expires_at = $2
                     WHERE id = $3",
                )
                .bind(keep)
                .bind(deferred)
                .bind(grant.id)
                .execute(&mut *conn)
                .await?;

                if forfeit > 0 {
                    // The excess is forfeited like any other expiry, but
                    // the grant row stays live for the kept units.
                    let balance_after =
                        available_total(&mut *conn, grant.user_id, now).await?;
                    sqlx::query(
                        "INSERT INTO ai_credit_ledger
                             (id, user_id, credit_type, operation, amount, balance_after,
                              source_id)
                         VALUES ($1, $2, 'subscription', 'expire', $3, $4, $5)",
                    )
                    .bind(Uuid::new_v4())
                    .bind(grant.user_id)
                    .bind(-forfeit)
                    .bind(balance_after)
                    .bind(grant.id)
                    .execute(&mut *conn)
                    .await?;
                    summary.expired_rows += 1;
                    summary.expired_units += forfeit;
                }

                // Audit row for the preserved units.
                sqlx::query(
                    "INSERT INTO ai_credit_ledger
                         (id, user_id, credit_type, operation, amount, balance_after,
                          source_id)
                     VALUES ($1, $2, 'subscription', 'carryover', $3, $4, $5)",
                )
                .bind(Uuid::new_v4())
                .bind(grant.user_id)
                .bind(keep)
                .bind(available_total(&mut *conn, grant.user_id, now).await?)
                .bind(grant.id)
                .execute(&mut *conn)
                .await?;
                summary.carried_over += keep;
                continue;
            }
        }

        expire_row(&mut *conn, &grant, remaining, now).await?;
        summary.expired_rows += 1;
        summary.expired_units += remaining;
    }

    if summary.expired_rows > 0 || summary.carried_over > 0 {
        info!(
            expired_rows = summary.expired_rows,
            expired_units = summary.expired_units,
            carried_over = summary.carried_over,
            "credit expiration sweep complete"
        );
    }
    Ok(summary)
}

/// Write the negative expire row for a grant remainder and flag the grant.
async fn expire_row(
    conn: &mut PgConnection,
    grant: &CreditEntry,
    units: i64,
    now: DateTime<Utc>,
) -> Result<(), CreditError> {
    sqlx::query("UPDATE ai_credit_ledger SET expired = TRUE WHERE id = $1")
        .bind(grant.id)
        .execute(&mut *conn)
        .await?;
    let balance_after = available_total(&mut *conn, grant.user_id, now).await?;
    sqlx::query(
        "INSERT INTO ai_credit_ledger
             (id, user_id, credit_type, operation, amount, balance_after, source_id)
         VALUES ($1, $2, $3, 'expire', $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(grant.user_id)
    .bind(grant.credit_type)
    .bind(-units)
    .bind(balance_after)
    .bind(grant.id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Midnight UTC of the given instant's calendar date.
fn start_of_utc_day(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), 0, 0, 0)
        .single()
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_totals_across_classes() {
        let mut b = Balance::default();
        b.add(CreditType::Daily, 10);
        b.add(CreditType::Subscription, 95);
        b.add(CreditType::Purchased, 20);
        b.add(CreditType::Kickstart, 5);
        assert_eq!(b.total(), 130);
    }

    #[test]
    fn test_start_of_utc_day() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 17, 45, 9).single().expect("ts");
        let start = start_of_utc_day(at);
        assert_eq!(
            start,
            Utc.with_ymd_and_hms(2026, 3, 4, 0, 0, 0).single().expect("ts")
        );
    }
}
