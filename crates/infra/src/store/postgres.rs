//! Postgres-backed campaign store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) on `sent_messages` | `23505` | `DuplicateStep` | Step already recorded |
//! | Database (unique / check violation) | `23505`, `23514` | `Rejected` | Row would break a table invariant |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolTimedOut | N/A | `Timeout` | No connection available in time |
//! | Other | N/A | `Backend` | Network errors, connection failures, etc. |
//!
//! ## Concurrency
//!
//! `update` locks the campaign row (`SELECT ... FOR UPDATE`), checks the
//! expected version and writes the patch plus its audit rows in one
//! transaction. The `UPDATE` is additionally guarded by `version = $n`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::field::Empty;
use tracing::{Span, instrument};
use uuid::Uuid;

use payrecover_campaigns::{
    Attempt, AttemptKind, AttemptStatus, Campaign, CampaignChange, CampaignStatus,
    DeliveryStatus, FailureClassification, MessagePurpose, SentMessage,
};
use payrecover_core::{AttemptId, CampaignId, ExpectedVersion, Money, SentMessageId};

use super::r#trait::{
    CampaignFilter, CampaignStore, CreateOutcome, RecoveryStats, StoreError,
};

const SCHEMA: &str = include_str!("../../migrations/0001_recovery.sql");

const CAMPAIGN_COLUMNS: &str = r#"
    id, invoice_ref, customer_ref, subscription_ref, customer_email, customer_name,
    amount_minor, currency, status, retry_count, max_retries, next_retry_at,
    next_message_at, last_step_sent, failure_code, failure_message, lease_until,
    created_at, updated_at, recovered_at, version
"#;

/// Postgres-backed campaign store.
///
/// `Send + Sync`; all operations go through the SQLx connection pool.
#[derive(Debug, Clone)]
pub struct PostgresCampaignStore {
    pool: Arc<PgPool>,
}

impl PostgresCampaignStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connects and applies the schema.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Creates missing tables and indexes.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn lock_campaign(
        tx: &mut Transaction<'_, Postgres>,
        id: CampaignId,
    ) -> Result<Campaign, StoreError> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_campaign", e))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        decode_campaign(&row)
    }

    async fn fetch_campaigns(
        &self,
        operation: &str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<Campaign>, StoreError> {
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(decode_campaign).collect()
    }
}

#[async_trait]
impl CampaignStore for PostgresCampaignStore {
    #[instrument(skip(self, campaign), fields(invoice_ref = %campaign.invoice_ref, created = Empty), err)]
    async fn create_if_absent(&self, campaign: Campaign) -> Result<CreateOutcome, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, invoice_ref, customer_ref, subscription_ref, customer_email, customer_name,
                amount_minor, currency, status, retry_count, max_retries, next_retry_at,
                next_message_at, last_step_sent, failure_code, failure_message, lease_until,
                created_at, updated_at, recovered_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            ON CONFLICT (invoice_ref) DO NOTHING
            "#,
        )
        .bind(campaign.id.as_uuid())
        .bind(&campaign.invoice_ref)
        .bind(&campaign.customer_ref)
        .bind(&campaign.subscription_ref)
        .bind(&campaign.customer_email)
        .bind(&campaign.customer_name)
        .bind(campaign.amount.amount_minor())
        .bind(campaign.amount.currency())
        .bind(campaign.status.as_str())
        .bind(campaign.retry_count as i32)
        .bind(campaign.max_retries as i32)
        .bind(campaign.next_retry_at)
        .bind(campaign.next_message_at)
        .bind(campaign.last_step_sent as i32)
        .bind(campaign.failure_code.map(|c| c.as_str()))
        .bind(&campaign.failure_message)
        .bind(campaign.lease_until)
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .bind(campaign.recovered_at)
        .bind(campaign.version as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_if_absent", e))?
        .rows_affected()
            == 1;

        Span::current().record("created", inserted);
        if inserted {
            return Ok(CreateOutcome {
                campaign,
                created: true,
            });
        }

        let existing = self
            .find_by_invoice(&campaign.invoice_ref)
            .await?
            .ok_or_else(|| StoreError::NotFound(campaign.invoice_ref.clone()))?;
        Ok(CreateOutcome {
            campaign: existing,
            created: false,
        })
    }

    #[instrument(skip(self), fields(campaign_id = %id), err)]
    async fn get(&self, id: CampaignId) -> Result<Campaign, StoreError> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        decode_campaign(&row)
    }

    #[instrument(skip(self), err)]
    async fn find_by_invoice(&self, invoice_ref: &str) -> Result<Option<Campaign>, StoreError> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE invoice_ref = $1");
        sqlx::query(&sql)
            .bind(invoice_ref)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_invoice", e))?
            .as_ref()
            .map(decode_campaign)
            .transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_by_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<Vec<Campaign>, StoreError> {
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE subscription_ref = $1 ORDER BY created_at ASC"
        );
        self.fetch_campaigns("find_by_subscription", sqlx::query(&sql).bind(subscription_ref))
            .await
    }

    #[instrument(
        skip(self, change),
        fields(campaign_id = %id, expected = %expected, version = Empty),
        err
    )]
    async fn update(
        &self,
        id: CampaignId,
        expected: ExpectedVersion,
        change: CampaignChange,
    ) -> Result<Campaign, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("update_begin", e))?;

        let current = Self::lock_campaign(&mut tx, id).await?;
        if !expected.matches(current.version) {
            return Err(StoreError::conflict(id, expected, current.version));
        }
        change
            .ensure_appendable(&current)
            .map_err(StoreError::from_domain)?;

        if let Some(message) = &change.message {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM sent_messages WHERE campaign_id = $1 AND step_number = $2)",
            )
            .bind(id.as_uuid())
            .bind(message.step_number as i32)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_step_guard", e))?;
            if exists {
                return Err(StoreError::DuplicateStep {
                    id,
                    step_number: message.step_number,
                });
            }
        }

        let next = change.apply(&current);
        let updated = sqlx::query(
            r#"
            UPDATE campaigns SET
                status = $3,
                retry_count = $4,
                next_retry_at = $5,
                next_message_at = $6,
                last_step_sent = $7,
                failure_code = $8,
                failure_message = $9,
                lease_until = $10,
                recovered_at = $11,
                updated_at = $12,
                version = $13
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(current.version as i64)
        .bind(next.status.as_str())
        .bind(next.retry_count as i32)
        .bind(next.next_retry_at)
        .bind(next.next_message_at)
        .bind(next.last_step_sent as i32)
        .bind(next.failure_code.map(|c| c.as_str()))
        .bind(&next.failure_message)
        .bind(next.lease_until)
        .bind(next.recovered_at)
        .bind(next.updated_at)
        .bind(next.version as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update", e))?
        .rows_affected();
        if updated != 1 {
            return Err(StoreError::conflict(id, expected, current.version));
        }

        if let Some(attempt) = change.attempt {
            let attempt = attempt.into_attempt(id, 0);
            sqlx::query(
                r#"
                INSERT INTO recovery_attempts (
                    id, campaign_id, attempt_number, kind, status, error_code, detail,
                    step_number, scheduled_at, executed_at
                )
                SELECT $1, $2, COALESCE(MAX(attempt_number), 0) + 1, $3, $4, $5, $6, $7, $8, $9
                FROM recovery_attempts
                WHERE campaign_id = $2
                "#,
            )
            .bind(attempt.id.as_uuid())
            .bind(id.as_uuid())
            .bind(attempt.kind.as_str())
            .bind(attempt.status.as_str())
            .bind(&attempt.error_code)
            .bind(&attempt.detail)
            .bind(attempt.step_number.map(|s| s as i32))
            .bind(attempt.scheduled_at)
            .bind(attempt.executed_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_attempt", e))?;
        }

        if let Some(message) = change.message {
            let message = message.into_sent_message(id);
            sqlx::query(
                r#"
                INSERT INTO sent_messages (
                    id, campaign_id, step_number, purpose, recipient, subject,
                    delivery_status, provider_message_id, error, is_generated_by_ai, sent_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(message.id.as_uuid())
            .bind(id.as_uuid())
            .bind(message.step_number as i32)
            .bind(message.purpose.as_str())
            .bind(&message.recipient)
            .bind(&message.subject)
            .bind(message.delivery_status.as_str())
            .bind(&message.provider_message_id)
            .bind(&message.error)
            .bind(message.is_generated_by_ai)
            .bind(message.sent_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::DuplicateStep {
                        id,
                        step_number: message.step_number,
                    }
                } else {
                    map_sqlx_error("update_message", e)
                }
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_commit", e))?;

        Span::current().record("version", next.version);
        Ok(next)
    }

    #[instrument(skip(self), fields(found = Empty), err)]
    async fn list_active_due(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Campaign>, StoreError> {
        let sql = format!(
            r#"
            SELECT {CAMPAIGN_COLUMNS} FROM campaigns
            WHERE status = 'active'
              AND LEAST(next_retry_at, next_message_at) <= $1
              AND (lease_until IS NULL OR lease_until <= $1)
            ORDER BY LEAST(next_retry_at, next_message_at) ASC, id ASC
            LIMIT $2
            "#
        );
        let due = self
            .fetch_campaigns(
                "list_active_due",
                sqlx::query(&sql).bind(before).bind(limit as i64),
            )
            .await?;
        Span::current().record("found", due.len());
        Ok(due)
    }

    #[instrument(skip(self), err)]
    async fn list(&self, filter: &CampaignFilter) -> Result<Vec<Campaign>, StoreError> {
        let sql = format!(
            r#"
            SELECT {CAMPAIGN_COLUMNS} FROM campaigns
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        );
        self.fetch_campaigns(
            "list",
            sqlx::query(&sql)
                .bind(filter.status.map(|s| s.as_str()))
                .bind(filter.clamped_limit() as i64)
                .bind(filter.offset as i64),
        )
        .await
    }

    #[instrument(skip(self), fields(campaign_id = %id), err)]
    async fn attempts(&self, id: CampaignId) -> Result<Vec<Attempt>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, campaign_id, attempt_number, kind, status, error_code, detail,
                   step_number, scheduled_at, executed_at
            FROM recovery_attempts
            WHERE campaign_id = $1
            ORDER BY attempt_number ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("attempts", e))?;

        rows.iter()
            .map(|row| {
                AttemptRow::from_row(row)
                    .map_err(|e| decode_error("attempt", e))?
                    .try_into()
            })
            .collect()
    }

    #[instrument(skip(self), fields(campaign_id = %id), err)]
    async fn sent_messages(&self, id: CampaignId) -> Result<Vec<SentMessage>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, campaign_id, step_number, purpose, recipient, subject, delivery_status,
                   provider_message_id, error, is_generated_by_ai, sent_at
            FROM sent_messages
            WHERE campaign_id = $1
            ORDER BY step_number ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("sent_messages", e))?;

        rows.iter()
            .map(|row| {
                SentMessageRow::from_row(row)
                    .map_err(|e| decode_error("sent message", e))?
                    .try_into()
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn event_seen(
        &self,
        event_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM processed_events WHERE event_id = $1 AND seen_at > $2)",
        )
        .bind(event_id)
        .bind(now - ttl)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("event_seen", e))
    }

    #[instrument(skip(self), err)]
    async fn record_event(&self, event_id: &str, seen_at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, seen_at)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO UPDATE SET seen_at = EXCLUDED.seen_at
            "#,
        )
        .bind(event_id)
        .bind(seen_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_event", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn purge_events(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM processed_events WHERE seen_at < $1")
            .bind(before)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_events", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<RecoveryStats, StoreError> {
        let mut stats = RecoveryStats::default();

        let rows = sqlx::query(
            r#"
            SELECT status, currency, COUNT(*) AS campaigns, COALESCE(SUM(amount_minor), 0)::BIGINT AS amount
            FROM campaigns
            GROUP BY status, currency
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats_campaigns", e))?;

        for row in rows {
            let status: String = row.try_get("status").map_err(|e| decode_error("stats", e))?;
            let currency: String = row.try_get("currency").map_err(|e| decode_error("stats", e))?;
            let count: i64 = row.try_get("campaigns").map_err(|e| decode_error("stats", e))?;
            let amount: i64 = row.try_get("amount").map_err(|e| decode_error("stats", e))?;
            let count = count as u64;

            stats.total += count;
            match parse_status(&status)? {
                CampaignStatus::Active => stats.active += count,
                CampaignStatus::Recovered => {
                    stats.recovered += count;
                    *stats.recovered_revenue.entry(currency).or_default() += amount;
                }
                CampaignStatus::Failed => stats.failed += count,
                CampaignStatus::Cancelled => stats.cancelled += count,
            }
        }

        let (sent, failed, attempts): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM sent_messages WHERE delivery_status = 'sent'),
                (SELECT COUNT(*) FROM sent_messages WHERE delivery_status = 'failed'),
                (SELECT COUNT(*) FROM recovery_attempts)
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats_activity", e))?;

        stats.messages_sent = sent as u64;
        stats.messages_failed = failed as u64;
        stats.attempts = attempts as u64;
        Ok(stats.finish())
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique or check violation: the row would break a table invariant.
                Some("23505") | Some("23514") => StoreError::Rejected(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Timeout(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        other => StoreError::Backend(format!("sqlx error in {}: {}", operation, other)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

fn decode_error(what: &str, err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode {what} row: {err}"))
}

fn parse_status(raw: &str) -> Result<CampaignStatus, StoreError> {
    raw.parse()
        .map_err(|e| StoreError::Backend(format!("invalid campaign status in row: {e}")))
}

fn decode_campaign(row: &PgRow) -> Result<Campaign, StoreError> {
    CampaignRow::from_row(row)
        .map_err(|e| decode_error("campaign", e))?
        .try_into()
}

/// Internal row representation for the `campaigns` table.
#[derive(Debug)]
struct CampaignRow {
    id: Uuid,
    invoice_ref: String,
    customer_ref: String,
    subscription_ref: Option<String>,
    customer_email: Option<String>,
    customer_name: Option<String>,
    amount_minor: i64,
    currency: String,
    status: String,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: Option<DateTime<Utc>>,
    next_message_at: Option<DateTime<Utc>>,
    last_step_sent: i32,
    failure_code: Option<String>,
    failure_message: Option<String>,
    lease_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    recovered_at: Option<DateTime<Utc>>,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for CampaignRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CampaignRow {
            id: row.try_get("id")?,
            invoice_ref: row.try_get("invoice_ref")?,
            customer_ref: row.try_get("customer_ref")?,
            subscription_ref: row.try_get("subscription_ref")?,
            customer_email: row.try_get("customer_email")?,
            customer_name: row.try_get("customer_name")?,
            amount_minor: row.try_get("amount_minor")?,
            currency: row.try_get("currency")?,
            status: row.try_get("status")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            next_retry_at: row.try_get("next_retry_at")?,
            next_message_at: row.try_get("next_message_at")?,
            last_step_sent: row.try_get("last_step_sent")?,
            failure_code: row.try_get("failure_code")?,
            failure_message: row.try_get("failure_message")?,
            lease_until: row.try_get("lease_until")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            recovered_at: row.try_get("recovered_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = StoreError;

    fn try_from(row: CampaignRow) -> Result<Self, Self::Error> {
        let amount = Money::new(row.amount_minor, &row.currency)
            .map_err(|e| StoreError::Backend(format!("invalid amount in row: {e}")))?;
        Ok(Campaign {
            id: CampaignId::from_uuid(row.id),
            invoice_ref: row.invoice_ref,
            customer_ref: row.customer_ref,
            subscription_ref: row.subscription_ref,
            customer_email: row.customer_email,
            customer_name: row.customer_name,
            amount,
            status: parse_status(&row.status)?,
            retry_count: row.retry_count as u32,
            max_retries: row.max_retries as u32,
            next_retry_at: row.next_retry_at,
            next_message_at: row.next_message_at,
            last_step_sent: row.last_step_sent as u32,
            failure_code: row.failure_code.as_deref().map(FailureClassification::from_code),
            failure_message: row.failure_message,
            lease_until: row.lease_until,
            created_at: row.created_at,
            updated_at: row.updated_at,
            recovered_at: row.recovered_at,
            version: row.version as u64,
        })
    }
}

/// Internal row representation for the `recovery_attempts` table.
#[derive(Debug)]
struct AttemptRow {
    id: Uuid,
    campaign_id: Uuid,
    attempt_number: i32,
    kind: String,
    status: String,
    error_code: Option<String>,
    detail: Option<String>,
    step_number: Option<i32>,
    scheduled_at: Option<DateTime<Utc>>,
    executed_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for AttemptRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AttemptRow {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            attempt_number: row.try_get("attempt_number")?,
            kind: row.try_get("kind")?,
            status: row.try_get("status")?,
            error_code: row.try_get("error_code")?,
            detail: row.try_get("detail")?,
            step_number: row.try_get("step_number")?,
            scheduled_at: row.try_get("scheduled_at")?,
            executed_at: row.try_get("executed_at")?,
        })
    }
}

impl TryFrom<AttemptRow> for Attempt {
    type Error = StoreError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        let kind: AttemptKind = row
            .kind
            .parse()
            .map_err(|e| StoreError::Backend(format!("invalid attempt kind in row: {e}")))?;
        let status: AttemptStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Backend(format!("invalid attempt status in row: {e}")))?;
        Ok(Attempt {
            id: AttemptId::from_uuid(row.id),
            campaign_id: CampaignId::from_uuid(row.campaign_id),
            attempt_number: row.attempt_number as u32,
            kind,
            status,
            error_code: row.error_code,
            detail: row.detail,
            step_number: row.step_number.map(|s| s as u32),
            scheduled_at: row.scheduled_at,
            executed_at: row.executed_at,
        })
    }
}

/// Internal row representation for the `sent_messages` table.
#[derive(Debug)]
struct SentMessageRow {
    id: Uuid,
    campaign_id: Uuid,
    step_number: i32,
    purpose: String,
    recipient: String,
    subject: String,
    delivery_status: String,
    provider_message_id: Option<String>,
    error: Option<String>,
    is_generated_by_ai: bool,
    sent_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for SentMessageRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SentMessageRow {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            step_number: row.try_get("step_number")?,
            purpose: row.try_get("purpose")?,
            recipient: row.try_get("recipient")?,
            subject: row.try_get("subject")?,
            delivery_status: row.try_get("delivery_status")?,
            provider_message_id: row.try_get("provider_message_id")?,
            error: row.try_get("error")?,
            is_generated_by_ai: row.try_get("is_generated_by_ai")?,
            sent_at: row.try_get("sent_at")?,
        })
    }
}

impl TryFrom<SentMessageRow> for SentMessage {
    type Error = StoreError;

    fn try_from(row: SentMessageRow) -> Result<Self, Self::Error> {
        let purpose: MessagePurpose = row
            .purpose
            .parse()
            .map_err(|e| StoreError::Backend(format!("invalid message purpose in row: {e}")))?;
        let delivery_status: DeliveryStatus = row
            .delivery_status
            .parse()
            .map_err(|e| StoreError::Backend(format!("invalid delivery status in row: {e}")))?;
        Ok(SentMessage {
            id: SentMessageId::from_uuid(row.id),
            campaign_id: CampaignId::from_uuid(row.campaign_id),
            step_number: row.step_number as u32,
            purpose,
            recipient: row.recipient,
            subject: row.subject,
            delivery_status,
            provider_message_id: row.provider_message_id,
            error: row.error,
            is_generated_by_ai: row.is_generated_by_ai,
            sent_at: row.sent_at,
        })
    }
}
