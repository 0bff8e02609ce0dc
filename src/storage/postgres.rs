use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{advance_deadline, StoreError, SubscriberStore};
use crate::clock::from_epoch_seconds;
use crate::domain::phone_number::PhoneNumber;
use crate::domain::subscriber::Subscriber;

/// Subscribers in the `subscribers` table. Instants are stored as epoch
/// seconds.
#[derive(Clone)]
pub struct PostgresSubscriberStore {
    db_pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct SubscriberRow {
    number: String,
    timezone: String,
    is_sendable: bool,
    last_sent_at: Option<i64>,
    send_deadline: i64,
}

impl TryFrom<SubscriberRow> for Subscriber {
    type Error = StoreError;

    fn try_from(row: SubscriberRow) -> Result<Self, Self::Error> {
        let number = PhoneNumber::parse(row.number).map_err(StoreError::InvalidRecord)?;
        let last_sent_at = match row.last_sent_at {
            Some(seconds) => Some(to_instant(seconds)?),
            None => None,
        };

        Ok(Subscriber {
            number,
            timezone: row.timezone,
            is_sendable: row.is_sendable,
            last_sent_at,
            send_deadline: to_instant(row.send_deadline)?,
        })
    }
}

fn to_instant(seconds: i64) -> Result<DateTime<Utc>, StoreError> {
    from_epoch_seconds(seconds)
        .ok_or_else(|| StoreError::InvalidRecord(format!("{} is not a valid timestamp", seconds)))
}

impl PostgresSubscriberStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.db_pool).await
    }

    #[tracing::instrument(name = "Advancing subscriber deadline", skip(self))]
    async fn advance(
        &self,
        number: &PhoneNumber,
        at: DateTime<Utc>,
        last_sent_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut transaction = self.db_pool.begin().await?;

        let timezone: Option<String> = sqlx::query_scalar(
            r#"
            SELECT timezone
            FROM subscribers
            WHERE number = $1
            FOR UPDATE
            "#,
        )
        .bind(number.as_ref())
        .fetch_optional(&mut *transaction)
        .await?;
        let timezone = timezone.ok_or(StoreError::NotFound)?;
        let deadline = advance_deadline(&timezone, at);

        sqlx::query(
            r#"
            UPDATE subscribers
            SET send_deadline = GREATEST(send_deadline, $2),
                last_sent_at = COALESCE($3, last_sent_at)
            WHERE number = $1
            "#,
        )
        .bind(number.as_ref())
        .bind(deadline.timestamp())
        .bind(last_sent_at.map(|sent_at| sent_at.timestamp()))
        .execute(&mut *transaction)
        .await?;

        transaction.commit().await?;

        Ok(())
    }

    #[tracing::instrument(name = "Advancing unreadable subscriber row", skip(self))]
    async fn advance_unreadable(
        &self,
        number: &str,
        timezone: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE subscribers
            SET send_deadline = GREATEST(send_deadline, $2)
            WHERE number = $1
            "#,
        )
        .bind(number)
        .bind(advance_deadline(timezone, at).timestamp())
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SubscriberStore for PostgresSubscriberStore {
    #[tracing::instrument(
        name = "Inserting a new subscriber into the database",
        skip(self, subscriber),
        fields(number = %subscriber.number)
    )]
    async fn create(&self, subscriber: &Subscriber) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscribers (number, timezone, is_sendable, last_sent_at, send_deadline)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (number) DO NOTHING
            "#,
        )
        .bind(subscriber.number.as_ref())
        .bind(subscriber.timezone.as_str())
        .bind(subscriber.is_sendable)
        .bind(subscriber.last_sent_at.map(|sent_at| sent_at.timestamp()))
        .bind(subscriber.send_deadline.timestamp())
        .execute(&self.db_pool)
        .await
        .map_err(|err| {
            tracing::error!("Failed to execute query: {:?}", err);
            err
        })?;

        if result.rows_affected() == 0 {
            tracing::info!("Subscriber already exists");
            return Err(StoreError::AlreadyExists);
        }

        Ok(())
    }

    #[tracing::instrument(name = "Fetching subscriber from the database", skip(self))]
    async fn get(&self, number: &PhoneNumber) -> Result<Subscriber, StoreError> {
        let row = sqlx::query_as::<_, SubscriberRow>(
            r#"
            SELECT number, timezone, is_sendable, last_sent_at, send_deadline
            FROM subscribers
            WHERE number = $1
            "#,
        )
        .bind(number.as_ref())
        .fetch_optional(&self.db_pool)
        .await?;

        row.ok_or(StoreError::NotFound)?.try_into()
    }

    #[tracing::instrument(name = "Fetching due subscribers from the database", skip(self))]
    async fn get_due_before(
        &self,
        deadline: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Subscriber>, StoreError> {
        // A batch made only of unreadable rows would look like an empty due
        // set, so fetch again until something readable turns up. Every pass
        // moves at least one row out of the due set.
        loop {
            let rows = sqlx::query_as::<_, SubscriberRow>(
                r#"
                SELECT number, timezone, is_sendable, last_sent_at, send_deadline
                FROM subscribers
                WHERE send_deadline < $1
                ORDER BY send_deadline
                LIMIT $2
                "#,
            )
            .bind(deadline.timestamp())
            .bind(limit)
            .fetch_all(&self.db_pool)
            .await?;

            if rows.is_empty() {
                return Ok(Vec::new());
            }

            let mut subscribers = Vec::with_capacity(rows.len());
            for row in rows {
                let number = row.number.clone();
                let timezone = row.timezone.clone();

                match Subscriber::try_from(row) {
                    Ok(subscriber) => subscribers.push(subscriber),
                    Err(err) => {
                        tracing::error!(
                            number = %number,
                            "Skipping unreadable subscriber row: {:?}",
                            err
                        );
                        self.advance_unreadable(&number, &timezone, deadline).await?;
                    }
                }
            }

            if !subscribers.is_empty() {
                return Ok(subscribers);
            }
        }
    }

    async fn update_sent(
        &self,
        number: &PhoneNumber,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.advance(number, sent_at, Some(sent_at)).await
    }

    async fn update_skipped(
        &self,
        number: &PhoneNumber,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.advance(number, at, None).await
    }

    #[tracing::instrument(name = "Updating subscriber sendable flag", skip(self))]
    async fn set_sendable(
        &self,
        number: &PhoneNumber,
        is_sendable: bool,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE subscribers
            SET is_sendable = $2
            WHERE number = $1
            "#,
        )
        .bind(number.as_ref())
        .bind(is_sendable)
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        Ok(())
    }
}
