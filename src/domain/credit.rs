//! Append-only AI credit ledger rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Credit class. Consumption drains classes in the fixed order
/// daily → subscription → purchased → kickstart, oldest grant first
/// within each class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "credit_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditType {
    /// One-time signup grant; never expires.
    Kickstart,
    /// Daily grant; expires at next UTC midnight.
    Daily,
    /// Monthly subscription grant; expires at period end, up to 50 carry over.
    Subscription,
    /// Purchased credits; never expire.
    Purchased,
}

impl CreditType {
    /// Consumption order: lower drains first.
    pub fn consume_rank(self) -> u8 {
        match self {
            Self::Daily => 0,
            Self::Subscription => 1,
            Self::Purchased => 2,
            Self::Kickstart => 3,
        }
    }
}

/// Ledger operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "credit_operation", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditOperation {
    /// Positive grant row; carries the consumable amount.
    Grant,
    /// Negative consume row written after a successful debit.
    Consume,
    /// Negative row recording forfeit of an expired grant remainder.
    Expire,
    /// Row recording a period-boundary carry-over adjustment.
    Carryover,
}

/// One append-only ledger row.
///
/// A user's available balance is the sum of `amount - consumed` over grant
/// rows with `expired = false` and an unexpired `expires_at`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CreditEntry {
    /// Primary key.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Credit class.
    pub credit_type: CreditType,
    /// Ledger operation.
    pub operation: CreditOperation,
    /// Positive for grants, negative for consume/expire.
    pub amount: i64,
    /// Running total balance after this row.
    pub balance_after: i64,
    /// Units already drained from this grant row.
    pub consumed: i64,
    /// Caller reference (chat id, task id, purchase ref).
    pub operation_ref: Option<String>,
    /// Expiration time for expiring classes.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether this grant has been expired by the nightly sweep.
    pub expired: bool,
    /// The grant row an expire/carryover row refers to.
    pub source_id: Option<Uuid>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

impl CreditEntry {
    /// Units still consumable from this grant row.
    pub fn remaining(&self) -> i64 {
        self.amount - self.consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_rank_orders_classes() {
        let mut classes = [
            CreditType::Kickstart,
            CreditType::Purchased,
            CreditType::Daily,
            CreditType::Subscription,
        ];
        classes.sort_by_key(|c| c.consume_rank());
        assert_eq!(
            classes,
            [
                CreditType::Daily,
                CreditType::Subscription,
                CreditType::Purchased,
                CreditType::Kickstart,
            ]
        );
    }
}
