use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqliteConnection, Transaction};

use quoteflow_core::domain::history::{HistoryEntryId, QuoteStatusHistory};
use quoteflow_core::domain::product::ProductId;
use quoteflow_core::domain::quote::{
    ActorId, ClientId, CompanyId, Discount, Quote, QuoteId, QuoteLine, QuoteNumber, QuoteStatus,
};
use quoteflow_core::errors::StoreError;
use quoteflow_core::lifecycle::store::{ExpiryCriteria, ExpiryPolicy, QuoteStore};
use quoteflow_core::totals::Totals;

use super::RepositoryError;
use crate::DbPool;

const DATE_FORMAT: &str = "%Y-%m-%d";

const QUOTE_COLUMNS: &str = "id,
    quote_number,
    company_id,
    client_id,
    status,
    quote_date,
    valid_until,
    sent_at,
    discount_type,
    discount_value,
    shipping,
    subtotal,
    discount_total,
    tax_total,
    gross,
    created_at,
    updated_at";

/// SQLite-backed quote store.
///
/// Status writes are `UPDATE ... WHERE id = ? AND status = ?` as the first
/// statement of their transaction, so the comparison and the write happen
/// under the same database write lock. They only touch status columns; lines
/// and totals belong to the draft revision path.
pub struct SqlQuoteStore {
    pool: DbPool,
}

impl SqlQuoteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn find(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_quote(&mut *conn, id).await
    }

    async fn lines_for(&self, id: &QuoteId) -> Result<Vec<QuoteLine>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_lines(&mut *conn, id).await
    }

    async fn insert(
        &self,
        mut quote: Quote,
        created: QuoteStatusHistory,
        number_prefix: &str,
    ) -> Result<Quote, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if quote.quote_number.is_none() {
            let year = quote.quote_date.year();
            let sequence: i64 = sqlx::query_scalar(
                "INSERT INTO quote_number_sequence (company_id, year, last_value)
                 VALUES (?, ?, 1)
                 ON CONFLICT(company_id, year) DO UPDATE SET last_value = last_value + 1
                 RETURNING last_value",
            )
            .bind(&quote.company_id.0)
            .bind(year)
            .fetch_one(&mut *tx)
            .await?;
            let sequence = u32::try_from(sequence).map_err(|_| {
                RepositoryError::Decode(format!("quote number sequence overflow: {sequence}"))
            })?;
            quote.quote_number = Some(QuoteNumber::format(number_prefix, year, sequence));
        }

        let number = quote.quote_number.clone().unwrap_or_else(|| QuoteNumber(quote.id.0.clone()));
        let inserted = sqlx::query(&format!(
            "INSERT INTO quote ({QUOTE_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&quote.id.0)
        .bind(&number.0)
        .bind(&quote.company_id.0)
        .bind(&quote.client_id.0)
        .bind(quote.status.as_str())
        .bind(format_date(quote.quote_date))
        .bind(format_date(quote.valid_until))
        .bind(quote.sent_at.map(|value| value.to_rfc3339()))
        .bind(quote.discount.kind())
        .bind(quote.discount.value().to_string())
        .bind(quote.shipping.to_string())
        .bind(quote.totals.subtotal.to_string())
        .bind(quote.totals.discount_total.to_string())
        .bind(quote.totals.tax_total.to_string())
        .bind(quote.totals.gross.to_string())
        .bind(quote.created_at.to_rfc3339())
        .bind(quote.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await;

        if let Err(error) = inserted {
            let duplicate = error
                .as_database_error()
                .map(|db_error| db_error.is_unique_violation())
                .unwrap_or(false);
            if duplicate {
                return Err(StoreError::DuplicateNumber(number).into());
            }
            return Err(error.into());
        }

        insert_lines(&mut tx, &quote.id, &quote.lines).await?;
        insert_history(&mut tx, &created).await?;
        tx.commit().await?;

        Ok(quote)
    }

    async fn save_with_history(
        &self,
        quote: &Quote,
        expected: QuoteStatus,
        history: &QuoteStatusHistory,
    ) -> Result<Quote, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // `sent_at` is a latch: an already stored value wins.
        let updated = sqlx::query(
            "UPDATE quote
             SET status = ?,
                 sent_at = COALESCE(sent_at, ?),
                 updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(quote.status.as_str())
        .bind(quote.sent_at.map(|value| value.to_rfc3339()))
        .bind(quote.updated_at.to_rfc3339())
        .bind(&quote.id.0)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(missing_or_moved(&mut tx, &quote.id, expected).await?.into());
        }

        insert_history(&mut tx, history).await?;
        let committed = fetch_quote(&mut *tx, &quote.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(quote.id.clone()))?;
        tx.commit().await?;
        Ok(committed)
    }

    async fn replace_draft(&self, quote: &Quote) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE quote
             SET valid_until = ?,
                 discount_type = ?,
                 discount_value = ?,
                 shipping = ?,
                 subtotal = ?,
                 discount_total = ?,
                 tax_total = ?,
                 gross = ?,
                 updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(format_date(quote.valid_until))
        .bind(quote.discount.kind())
        .bind(quote.discount.value().to_string())
        .bind(quote.shipping.to_string())
        .bind(quote.totals.subtotal.to_string())
        .bind(quote.totals.discount_total.to_string())
        .bind(quote.totals.tax_total.to_string())
        .bind(quote.totals.gross.to_string())
        .bind(quote.updated_at.to_rfc3339())
        .bind(&quote.id.0)
        .bind(QuoteStatus::Draft.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(missing_or_moved(&mut tx, &quote.id, QuoteStatus::Draft).await?.into());
        }

        sqlx::query("DELETE FROM quote_line WHERE quote_id = ?")
            .bind(&quote.id.0)
            .execute(&mut *tx)
            .await?;
        insert_lines(&mut tx, &quote.id, &quote.lines).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_history(
        &self,
        id: &QuoteId,
    ) -> Result<Vec<QuoteStatusHistory>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, quote_id, status, comment, actor_id, occurred_at
             FROM quote_status_history
             WHERE quote_id = ?
             ORDER BY occurred_at ASC, seq ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(history_from_row).collect()
    }

    async fn candidates(&self, criteria: &ExpiryCriteria) -> Result<Vec<Quote>, RepositoryError> {
        let (condition, boundary) = match criteria.policy {
            ExpiryPolicy::ValidUntil => ("valid_until < ?", criteria.as_of),
            ExpiryPolicy::OlderThanDays(days) => ("quote_date <= ?", criteria.age_cutoff(days)),
        };

        let sql = format!(
            "SELECT {QUOTE_COLUMNS}
             FROM quote
             WHERE status IN (?, ?)
               AND {condition}
               AND (? IS NULL OR company_id = ?)
             ORDER BY valid_until ASC, id ASC"
        );
        let company = criteria.company_id.as_ref().map(|company| company.0.as_str());
        let [open_a, open_b] = ExpiryCriteria::OPEN_STATUSES;
        let rows = sqlx::query(&sql)
            .bind(open_a.as_str())
            .bind(open_b.as_str())
            .bind(format_date(boundary))
            .bind(company)
            .bind(company)
            .fetch_all(&self.pool)
            .await?;

        let mut quotes = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = QuoteId(row.try_get("id")?);
            let lines = self.lines_for(&id).await?;
            quotes.push(quote_from_row(row, lines)?);
        }
        Ok(quotes)
    }
}

#[async_trait::async_trait]
impl QuoteStore for SqlQuoteStore {
    async fn load_quote(&self, id: &QuoteId) -> Result<Option<Quote>, StoreError> {
        Ok(self.find(id).await?)
    }

    async fn insert_quote(
        &self,
        quote: Quote,
        created: QuoteStatusHistory,
        number_prefix: &str,
    ) -> Result<Quote, StoreError> {
        Ok(self.insert(quote, created, number_prefix).await?)
    }

    async fn save_quote_and_history(
        &self,
        quote: &Quote,
        expected: QuoteStatus,
        history: QuoteStatusHistory,
    ) -> Result<Quote, StoreError> {
        Ok(self.save_with_history(quote, expected, &history).await?)
    }

    async fn save_draft(&self, quote: &Quote) -> Result<(), StoreError> {
        Ok(self.replace_draft(quote).await?)
    }

    async fn history(&self, id: &QuoteId) -> Result<Vec<QuoteStatusHistory>, StoreError> {
        Ok(self.list_history(id).await?)
    }

    async fn expiry_candidates(&self, criteria: &ExpiryCriteria) -> Result<Vec<Quote>, StoreError> {
        Ok(self.candidates(criteria).await?)
    }
}

async fn fetch_quote(
    conn: &mut SqliteConnection,
    id: &QuoteId,
) -> Result<Option<Quote>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {QUOTE_COLUMNS} FROM quote WHERE id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let lines = fetch_lines(conn, id).await?;
            Ok(Some(quote_from_row(&row, lines)?))
        }
        None => Ok(None),
    }
}

async fn fetch_lines(
    conn: &mut SqliteConnection,
    id: &QuoteId,
) -> Result<Vec<QuoteLine>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT description, quantity, unit_price, tax_rate, product_id
         FROM quote_line
         WHERE quote_id = ?
         ORDER BY position ASC",
    )
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(line_from_row).collect()
}

async fn missing_or_moved(
    tx: &mut Transaction<'_, Sqlite>,
    id: &QuoteId,
    expected: QuoteStatus,
) -> Result<StoreError, RepositoryError> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM quote WHERE id = ?")
        .bind(&id.0)
        .fetch_optional(&mut **tx)
        .await?;

    Ok(match exists {
        Some(_) => StoreError::StatusMismatch { quote_id: id.clone(), expected },
        None => StoreError::NotFound(id.clone()),
    })
}

async fn insert_lines(
    tx: &mut Transaction<'_, Sqlite>,
    quote_id: &QuoteId,
    lines: &[QuoteLine],
) -> Result<(), RepositoryError> {
    for (position, line) in lines.iter().enumerate() {
        sqlx::query(
            "INSERT INTO quote_line (
                quote_id,
                position,
                description,
                quantity,
                unit_price,
                tax_rate,
                product_id
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&quote_id.0)
        .bind(i64::try_from(position).unwrap_or(i64::MAX))
        .bind(&line.description)
        .bind(line.quantity.to_string())
        .bind(line.unit_price.to_string())
        .bind(line.tax_rate.to_string())
        .bind(line.product_id.as_ref().map(|product| product.0.as_str()))
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn insert_history(
    tx: &mut Transaction<'_, Sqlite>,
    entry: &QuoteStatusHistory,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO quote_status_history (
            id,
            quote_id,
            status,
            comment,
            actor_id,
            occurred_at
         ) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id.0)
    .bind(&entry.quote_id.0)
    .bind(entry.status.as_str())
    .bind(&entry.comment)
    .bind(entry.actor.as_ref().map(|actor| actor.0.as_str()))
    .bind(entry.occurred_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn quote_from_row(row: &SqliteRow, lines: Vec<QuoteLine>) -> Result<Quote, RepositoryError> {
    let discount_type = row.try_get::<String, _>("discount_type")?;
    let discount_value = parse_decimal("discount_value", row.try_get("discount_value")?)?;
    let discount = Discount::from_parts(&discount_type, discount_value).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown discount type `{discount_type}`"))
    })?;

    Ok(Quote {
        id: QuoteId(row.try_get("id")?),
        quote_number: Some(QuoteNumber(row.try_get("quote_number")?)),
        company_id: CompanyId(row.try_get("company_id")?),
        client_id: ClientId(row.try_get("client_id")?),
        status: parse_status(row.try_get("status")?)?,
        quote_date: parse_date("quote_date", row.try_get("quote_date")?)?,
        valid_until: parse_date("valid_until", row.try_get("valid_until")?)?,
        sent_at: parse_optional_timestamp("sent_at", row.try_get("sent_at")?)?,
        lines,
        discount,
        shipping: parse_decimal("shipping", row.try_get("shipping")?)?,
        totals: Totals {
            subtotal: parse_decimal("subtotal", row.try_get("subtotal")?)?,
            discount_total: parse_decimal("discount_total", row.try_get("discount_total")?)?,
            tax_total: parse_decimal("tax_total", row.try_get("tax_total")?)?,
            gross: parse_decimal("gross", row.try_get("gross")?)?,
        },
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn line_from_row(row: &SqliteRow) -> Result<QuoteLine, RepositoryError> {
    Ok(QuoteLine {
        description: row.try_get("description")?,
        quantity: parse_decimal("quantity", row.try_get("quantity")?)?,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
        tax_rate: parse_decimal("tax_rate", row.try_get("tax_rate")?)?,
        product_id: row.try_get::<Option<String>, _>("product_id")?.map(ProductId),
    })
}

fn history_from_row(row: &SqliteRow) -> Result<QuoteStatusHistory, RepositoryError> {
    Ok(QuoteStatusHistory {
        id: HistoryEntryId(row.try_get("id")?),
        quote_id: QuoteId(row.try_get("quote_id")?),
        status: parse_status(row.try_get("status")?)?,
        comment: row.try_get("comment")?,
        actor: row.try_get::<Option<String>, _>("actor_id")?.map(ActorId),
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

fn format_date(value: NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

fn parse_status(value: String) -> Result<QuoteStatus, RepositoryError> {
    QuoteStatus::parse(&value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown quote status `{value}`")))
}

fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

fn parse_date(column: &str, value: String) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(&value, DATE_FORMAT).map_err(|error| {
        RepositoryError::Decode(format!("invalid date in `{column}`: `{value}` ({error})"))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, Utc};
    use rust_decimal::Decimal;

    use quoteflow_core::domain::history::QuoteStatusHistory;
    use quoteflow_core::domain::product::ProductId;
    use quoteflow_core::domain::quote::{
        ActorId, ClientId, CompanyId, Discount, Quote, QuoteId, QuoteLine, QuoteNumber,
        QuoteStatus,
    };
    use quoteflow_core::errors::StoreError;
    use quoteflow_core::lifecycle::store::{ExpiryCriteria, ExpiryPolicy, QuoteStore};

    use super::SqlQuoteStore;
    use crate::migrations;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn sample_quote(company: &str, quote_date: &str, valid_until: &str) -> Quote {
        let mut quote = Quote {
            id: QuoteId::generate(),
            quote_number: None,
            company_id: CompanyId(company.to_string()),
            client_id: ClientId("client-7".to_string()),
            status: QuoteStatus::Draft,
            quote_date: date(quote_date),
            valid_until: date(valid_until),
            sent_at: None,
            lines: vec![
                QuoteLine {
                    description: "Annual licence".to_string(),
                    quantity: Decimal::new(3, 0),
                    unit_price: Decimal::new(19_999, 2),
                    tax_rate: Decimal::new(19, 0),
                    product_id: Some(ProductId("SKU-LIC".to_string())),
                },
                QuoteLine {
                    description: "Onboarding".to_string(),
                    quantity: Decimal::new(15, 1),
                    unit_price: Decimal::new(120, 0),
                    tax_rate: Decimal::new(7, 0),
                    product_id: None,
                },
            ],
            discount: Discount::Percentage(Decimal::new(125, 1)),
            shipping: Decimal::new(995, 2),
            totals: Default::default(),
            created_at: parse_ts("2026-02-23T12:00:00Z"),
            updated_at: parse_ts("2026-02-23T12:00:00Z"),
        };
        quote.recompute_totals();
        quote
    }

    fn created(quote: &Quote) -> QuoteStatusHistory {
        QuoteStatusHistory::record(
            quote.id.clone(),
            QuoteStatus::Draft,
            "created",
            Some(ActorId("user-1".to_string())),
            quote.created_at,
        )
    }

    #[tokio::test]
    async fn insert_and_load_round_trip_preserves_lines_and_totals() {
        let store = SqlQuoteStore::new(setup_pool().await);
        let quote = sample_quote("acme", "2026-02-23", "2026-03-25");

        let stored = store.insert_quote(quote.clone(), created(&quote), "Q").await.expect("insert");
        assert_eq!(stored.quote_number, Some(QuoteNumber("Q-2026-0001".to_string())));

        let loaded = store.load_quote(&quote.id).await.expect("load").expect("quote exists");
        assert_eq!(loaded, stored);
        assert_eq!(loaded.lines.len(), 2);
        assert_eq!(loaded.lines[0].product_id, Some(ProductId("SKU-LIC".to_string())));

        let history = store.history(&quote.id).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, QuoteStatus::Draft);
        assert_eq!(history[0].comment, "created");
        assert_eq!(history[0].actor, Some(ActorId("user-1".to_string())));
        assert_eq!(history[0].occurred_at, quote.created_at);
    }

    #[tokio::test]
    async fn numbers_follow_company_and_year_sequences() {
        let store = SqlQuoteStore::new(setup_pool().await);

        let mut numbers = Vec::new();
        for (company, day) in [
            ("acme", "2026-01-05"),
            ("acme", "2026-06-01"),
            ("globex", "2026-06-01"),
            ("acme", "2027-01-04"),
        ] {
            let quote = sample_quote(company, day, day);
            let stored =
                store.insert_quote(quote.clone(), created(&quote), "Q").await.expect("insert");
            numbers.push(stored.quote_number.expect("number").0);
        }

        assert_eq!(numbers, vec!["Q-2026-0001", "Q-2026-0002", "Q-2026-0001", "Q-2027-0001"]);
    }

    #[tokio::test]
    async fn duplicate_explicit_number_is_rejected_without_partial_rows() {
        let store = SqlQuoteStore::new(setup_pool().await);
        let mut first = sample_quote("acme", "2026-02-23", "2026-03-25");
        first.quote_number = Some(QuoteNumber("MANUAL-1".to_string()));
        store.insert_quote(first.clone(), created(&first), "Q").await.expect("insert first");

        let mut second = sample_quote("acme", "2026-02-23", "2026-03-25");
        second.quote_number = Some(QuoteNumber("MANUAL-1".to_string()));
        let error =
            store.insert_quote(second.clone(), created(&second), "Q").await.expect_err("duplicate");

        assert_eq!(error, StoreError::DuplicateNumber(QuoteNumber("MANUAL-1".to_string())));
        assert!(store.load_quote(&second.id).await.expect("load").is_none());
        assert!(store.history(&second.id).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn stale_expected_status_is_refused() {
        let store = SqlQuoteStore::new(setup_pool().await);
        let quote = sample_quote("acme", "2026-02-23", "2026-03-25");
        store.insert_quote(quote.clone(), created(&quote), "Q").await.expect("insert");

        let mut sent = quote.clone();
        sent.status = QuoteStatus::Sent;
        sent.sent_at = Some(parse_ts("2026-02-24T08:00:00Z"));
        let entry = QuoteStatusHistory::record(
            quote.id.clone(),
            QuoteStatus::Sent,
            "sent to client",
            None,
            parse_ts("2026-02-24T08:00:00Z"),
        );
        store
            .save_quote_and_history(&sent, QuoteStatus::Draft, entry.clone())
            .await
            .expect("first write");

        let mut cancelled = quote.clone();
        cancelled.status = QuoteStatus::Cancelled;
        let late = QuoteStatusHistory::record(
            quote.id.clone(),
            QuoteStatus::Cancelled,
            "cancelled",
            None,
            parse_ts("2026-02-24T08:00:01Z"),
        );
        let error = store
            .save_quote_and_history(&cancelled, QuoteStatus::Draft, late)
            .await
            .expect_err("stale write");

        assert_eq!(
            error,
            StoreError::StatusMismatch { quote_id: quote.id.clone(), expected: QuoteStatus::Draft }
        );
        let loaded = store.load_quote(&quote.id).await.expect("load").expect("exists");
        assert_eq!(loaded.status, QuoteStatus::Sent);
        assert_eq!(loaded.sent_at, Some(parse_ts("2026-02-24T08:00:00Z")));
        assert_eq!(store.history(&quote.id).await.expect("history").len(), 2);
    }

    #[tokio::test]
    async fn writes_against_unknown_quote_report_not_found() {
        let store = SqlQuoteStore::new(setup_pool().await);
        let ghost = sample_quote("acme", "2026-02-23", "2026-03-25");

        let error = store.save_draft(&ghost).await.expect_err("unknown quote");
        assert_eq!(error, StoreError::NotFound(ghost.id.clone()));
    }

    #[tokio::test]
    async fn expiry_candidates_filter_by_status_policy_and_company() {
        let store = SqlQuoteStore::new(setup_pool().await);
        let mut ids = Vec::new();
        for (company, quote_date, valid_until, status) in [
            ("acme", "2026-01-02", "2026-02-01", QuoteStatus::Sent),
            ("acme", "2026-01-02", "2026-02-01", QuoteStatus::Draft),
            ("acme", "2026-02-20", "2026-03-22", QuoteStatus::Pending),
            ("globex", "2026-01-02", "2026-02-01", QuoteStatus::Pending),
        ] {
            let mut quote = sample_quote(company, quote_date, valid_until);
            store.insert_quote(quote.clone(), created(&quote), "Q").await.expect("insert");
            if status != QuoteStatus::Draft {
                quote.status = status;
                let entry = QuoteStatusHistory::record(
                    quote.id.clone(),
                    status,
                    "moved",
                    None,
                    parse_ts("2026-02-24T08:00:00Z"),
                );
                store
                    .save_quote_and_history(&quote, QuoteStatus::Draft, entry)
                    .await
                    .expect("move status");
            }
            ids.push(quote.id);
        }

        let all_overdue = store
            .expiry_candidates(&ExpiryCriteria {
                as_of: date("2026-03-01"),
                company_id: None,
                policy: ExpiryPolicy::ValidUntil,
            })
            .await
            .expect("candidates");
        let mut found: Vec<_> = all_overdue.iter().map(|quote| quote.id.clone()).collect();
        found.sort_by(|left, right| left.0.cmp(&right.0));
        let mut expected = vec![ids[0].clone(), ids[3].clone()];
        expected.sort_by(|left, right| left.0.cmp(&right.0));
        assert_eq!(found, expected);
        assert!(all_overdue.iter().all(|quote| quote.lines.len() == 2));

        let acme_aged = store
            .expiry_candidates(&ExpiryCriteria {
                as_of: date("2026-03-01"),
                company_id: Some(CompanyId("acme".to_string())),
                policy: ExpiryPolicy::OlderThanDays(5),
            })
            .await
            .expect("candidates");
        let aged: Vec<_> = acme_aged.into_iter().map(|quote| quote.id).collect();
        assert_eq!(aged, vec![ids[0].clone(), ids[2].clone()]);
    }
}
