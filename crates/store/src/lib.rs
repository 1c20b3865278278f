//! Postgres adapter for the petition catalog. Owns the schema migrations,
//! every SQL statement, and the transaction scope that guard-then-mutate
//! sequences run inside. All statements are parameterized; uniqueness
//! constraints in the schema backstop the pre-checks and surface as
//! [`StoreError::UniqueViolation`].

use std::time::Duration;

use causeway_contracts::{
    Category, PetitionDetail, PetitionSearchQuery, PetitionSummary, SupportTier, SupporterRecord,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};

mod listing;

pub use listing::Bind;

use listing::build_listing_sql;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const MIGRATE_TIMEOUT: Duration = Duration::from_secs(10);

const CREATION_DATE_COL: &str =
    "to_char(p.creation_date AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS\"Z\"') AS creation_date";

#[derive(Debug)]
pub enum StoreError {
    Timeout,
    UniqueViolation(Option<String>),
    Sqlx(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "store operation timed out"),
            StoreError::UniqueViolation(Some(constraint)) => {
                write!(f, "store unique constraint violated: {}", constraint)
            }
            StoreError::UniqueViolation(None) => write!(f, "store unique constraint violated"),
            StoreError::Sqlx(err) => write!(f, "store sql error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &value {
            if db.is_unique_violation() {
                return StoreError::UniqueViolation(db.constraint().map(str::to_string));
            }
        }
        StoreError::Sqlx(value)
    }
}

impl StoreError {
    /// Timeouts are the only fault the service layer may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout)
    }
}

/// Current state of one petition row, fetched under `FOR UPDATE` so a
/// merge patch resolves against a stable snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PetitionRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub category_id: i64,
    pub owner_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub cost: i64,
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
    op_timeout: Duration,
}

impl Store {
    pub async fn connect(db_url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let pool = tokio::time::timeout(
            CONNECT_TIMEOUT,
            PgPoolOptions::new().max_connections(8).connect(db_url),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(Self { pool, op_timeout })
    }

    pub async fn connect_and_migrate(
        db_url: &str,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let store = Self::connect(db_url, op_timeout).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        tokio::time::timeout(MIGRATE_TIMEOUT, migrate(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::timeout(self.op_timeout, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<StoreTx, StoreError> {
        let tx = tokio::time::timeout(self.op_timeout, self.pool.begin())
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(StoreTx {
            tx,
            op_timeout: self.op_timeout,
        })
    }

    pub async fn category_ids(&self) -> Result<Vec<i64>, StoreError> {
        let rows = tokio::time::timeout(
            self.op_timeout,
            sqlx::query("SELECT id FROM category ORDER BY id").fetch_all(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get::<i64, _>("id")?);
        }
        Ok(ids)
    }

    pub async fn categories(&self) -> Result<Vec<Category>, StoreError> {
        let rows = tokio::time::timeout(
            self.op_timeout,
            sqlx::query("SELECT id, name FROM category ORDER BY id").fetch_all(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Category {
                category_id: row.try_get("id")?,
                name: row.try_get("name")?,
            });
        }
        Ok(out)
    }

    /// Resolves a request credential to a user id; `None` means anonymous.
    pub async fn user_id_for_token(&self, token: &str) -> Result<Option<i64>, StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query("SELECT id FROM users WHERE auth_token = $1")
                .bind(token)
                .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        match row {
            Some(row) => Ok(Some(row.try_get("id")?)),
            None => Ok(None),
        }
    }

    pub async fn petition_exists(&self, petition_id: i64) -> Result<bool, StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query("SELECT EXISTS (SELECT 1 FROM petition WHERE id = $1)")
                .bind(petition_id)
                .fetch_one(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(row.try_get::<bool, _>(0)?)
    }

    /// The catalog listing: a bounded page plus the total match count,
    /// produced by two passes over the identical predicate set.
    pub async fn list_petitions(
        &self,
        query: &PetitionSearchQuery,
    ) -> Result<(Vec<PetitionSummary>, i64), StoreError> {
        let sql = build_listing_sql(query);

        let mut page_query = sqlx::query(&sql.page_sql);
        for bind in &sql.page_binds {
            page_query = match bind {
                Bind::Int(v) => page_query.bind(*v),
                Bind::Text(v) => page_query.bind(v.as_str()),
            };
        }
        let rows = tokio::time::timeout(self.op_timeout, page_query.fetch_all(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;

        let mut petitions = Vec::with_capacity(rows.len());
        for row in rows {
            petitions.push(PetitionSummary {
                petition_id: row.try_get("id")?,
                title: row.try_get("title")?,
                category_id: row.try_get("category_id")?,
                owner_id: row.try_get("owner_id")?,
                owner_first_name: row.try_get("first_name")?,
                owner_last_name: row.try_get("last_name")?,
                number_of_supporters: row.try_get("supporters")?,
                creation_date: row.try_get("creation_date")?,
                supporting_cost: row.try_get("min_cost")?,
            });
        }

        let mut count_query = sqlx::query(&sql.count_sql);
        for bind in &sql.count_binds {
            count_query = match bind {
                Bind::Int(v) => count_query.bind(*v),
                Bind::Text(v) => count_query.bind(v.as_str()),
            };
        }
        let count_row = tokio::time::timeout(self.op_timeout, count_query.fetch_one(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        let total: i64 = count_row.try_get(0)?;

        Ok((petitions, total))
    }

    pub async fn petition_detail(
        &self,
        petition_id: i64,
    ) -> Result<Option<PetitionDetail>, StoreError> {
        let detail_sql = format!(
            "SELECT p.id, p.title, p.description, p.category_id, p.owner_id, \
             u.first_name, u.last_name, \
             COALESCE(sc.supporters, 0) AS supporters, \
             {}, \
             mc.min_cost \
             FROM petition p \
             JOIN users u ON p.owner_id = u.id \
             LEFT JOIN (SELECT petition_id, COUNT(*) AS supporters \
              FROM supporter GROUP BY petition_id) sc ON p.id = sc.petition_id \
             LEFT JOIN (SELECT petition_id, MIN(cost) AS min_cost \
              FROM support_tier GROUP BY petition_id) mc ON p.id = mc.petition_id \
             WHERE p.id = $1",
            CREATION_DATE_COL
        );

        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(&detail_sql).bind(petition_id).fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        let Some(row) = row else {
            return Ok(None);
        };

        let summary = PetitionSummary {
            petition_id: row.try_get("id")?,
            title: row.try_get("title")?,
            category_id: row.try_get("category_id")?,
            owner_id: row.try_get("owner_id")?,
            owner_first_name: row.try_get("first_name")?,
            owner_last_name: row.try_get("last_name")?,
            number_of_supporters: row.try_get("supporters")?,
            creation_date: row.try_get("creation_date")?,
            supporting_cost: row.try_get("min_cost")?,
        };
        let description: String = row.try_get("description")?;

        let money_row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "SELECT SUM(st.cost)::bigint AS money_raised \
                 FROM supporter s \
                 JOIN support_tier st ON s.support_tier_id = st.id \
                 WHERE s.petition_id = $1",
            )
            .bind(petition_id)
            .fetch_one(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        let money_raised: Option<i64> = money_row.try_get("money_raised")?;

        let tier_rows = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "SELECT id, title, description, cost FROM support_tier \
                 WHERE petition_id = $1 ORDER BY id",
            )
            .bind(petition_id)
            .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        let mut support_tiers = Vec::with_capacity(tier_rows.len());
        for row in tier_rows {
            support_tiers.push(SupportTier {
                support_tier_id: row.try_get("id")?,
                title: row.try_get("title")?,
                description: row.try_get("description")?,
                cost: row.try_get("cost")?,
            });
        }

        Ok(Some(PetitionDetail {
            summary,
            description,
            money_raised,
            support_tiers,
        }))
    }

    /// All pledges for one petition, newest first, id ascending among ties.
    pub async fn supporters_for_petition(
        &self,
        petition_id: i64,
    ) -> Result<Vec<SupporterRecord>, StoreError> {
        let rows = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "SELECT s.id, s.support_tier_id, s.user_id, s.message, \
                 u.first_name, u.last_name, \
                 to_char(s.timestamp AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS\"Z\"') AS ts \
                 FROM supporter s \
                 JOIN users u ON s.user_id = u.id \
                 JOIN support_tier st ON s.support_tier_id = st.id \
                 WHERE st.petition_id = $1 \
                 ORDER BY s.timestamp DESC, s.id ASC",
            )
            .bind(petition_id)
            .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(SupporterRecord {
                support_id: row.try_get("id")?,
                support_tier_id: row.try_get("support_tier_id")?,
                supporter_id: row.try_get("user_id")?,
                supporter_first_name: row.try_get("first_name")?,
                supporter_last_name: row.try_get("last_name")?,
                message: row.try_get("message")?,
                timestamp: row.try_get("ts")?,
            });
        }
        Ok(out)
    }
}

/// One guard-then-mutate scope. Every multi-statement use case runs through
/// a single `StoreTx` so concurrent requests serialize on the rows they
/// touch and partial writes never become visible.
pub struct StoreTx {
    tx: Transaction<'static, Postgres>,
    op_timeout: Duration,
}

impl StoreTx {
    pub async fn commit(self) -> Result<(), StoreError> {
        tokio::time::timeout(self.op_timeout, self.tx.commit())
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn petition_for_update(
        &mut self,
        petition_id: i64,
    ) -> Result<Option<PetitionRow>, StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "SELECT id, title, description, category_id, owner_id \
                 FROM petition WHERE id = $1 FOR UPDATE",
            )
            .bind(petition_id)
            .fetch_optional(&mut *self.tx),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        match row {
            Some(row) => Ok(Some(PetitionRow {
                id: row.try_get("id")?,
                title: row.try_get("title")?,
                description: row.try_get("description")?,
                category_id: row.try_get("category_id")?,
                owner_id: row.try_get("owner_id")?,
            })),
            None => Ok(None),
        }
    }

    /// Global petition-title uniqueness check; `exclude` skips the row being
    /// edited so an unchanged title does not conflict with itself.
    pub async fn petition_title_taken(
        &mut self,
        title: &str,
        exclude: Option<i64>,
    ) -> Result<bool, StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "SELECT EXISTS (SELECT 1 FROM petition \
                 WHERE title = $1 AND ($2::bigint IS NULL OR id <> $2))",
            )
            .bind(title)
            .bind(exclude)
            .fetch_one(&mut *self.tx),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(row.try_get::<bool, _>(0)?)
    }

    pub async fn category_exists(&mut self, category_id: i64) -> Result<bool, StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query("SELECT EXISTS (SELECT 1 FROM category WHERE id = $1)")
                .bind(category_id)
                .fetch_one(&mut *self.tx),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(row.try_get::<bool, _>(0)?)
    }

    pub async fn insert_petition(
        &mut self,
        title: &str,
        description: &str,
        owner_id: i64,
        category_id: i64,
    ) -> Result<i64, StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "INSERT INTO petition (title, description, owner_id, category_id) \
                 VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .bind(title)
            .bind(description)
            .bind(owner_id)
            .bind(category_id)
            .fetch_one(&mut *self.tx),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(row.try_get("id")?)
    }

    pub async fn update_petition(
        &mut self,
        petition_id: i64,
        title: &str,
        description: &str,
        category_id: i64,
    ) -> Result<(), StoreError> {
        tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "UPDATE petition SET title = $1, description = $2, category_id = $3 \
                 WHERE id = $4",
            )
            .bind(title)
            .bind(description)
            .bind(category_id)
            .bind(petition_id)
            .execute(&mut *self.tx),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    /// Tiers cascade; supporters are guaranteed absent by the delete guard.
    pub async fn delete_petition(&mut self, petition_id: i64) -> Result<(), StoreError> {
        tokio::time::timeout(
            self.op_timeout,
            sqlx::query("DELETE FROM petition WHERE id = $1")
                .bind(petition_id)
                .execute(&mut *self.tx),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn supporter_count_for_petition(
        &mut self,
        petition_id: i64,
    ) -> Result<i64, StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query("SELECT COUNT(*) FROM supporter WHERE petition_id = $1")
                .bind(petition_id)
                .fetch_one(&mut *self.tx),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(row.try_get::<i64, _>(0)?)
    }

    /// Locks and returns the petition's tier rows so cardinality and
    /// uniqueness decisions hold until commit.
    pub async fn tiers_for_update(&mut self, petition_id: i64) -> Result<Vec<TierRow>, StoreError> {
        let rows = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "SELECT id, title, description, cost FROM support_tier \
                 WHERE petition_id = $1 ORDER BY id FOR UPDATE",
            )
            .bind(petition_id)
            .fetch_all(&mut *self.tx),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(TierRow {
                id: row.try_get("id")?,
                title: row.try_get("title")?,
                description: row.try_get("description")?,
                cost: row.try_get("cost")?,
            });
        }
        Ok(out)
    }

    pub async fn insert_support_tier(
        &mut self,
        petition_id: i64,
        title: &str,
        description: &str,
        cost: i64,
    ) -> Result<i64, StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "INSERT INTO support_tier (petition_id, title, description, cost) \
                 VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .bind(petition_id)
            .bind(title)
            .bind(description)
            .bind(cost)
            .fetch_one(&mut *self.tx),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(row.try_get("id")?)
    }

    pub async fn update_support_tier(
        &mut self,
        tier_id: i64,
        title: &str,
        description: &str,
        cost: i64,
    ) -> Result<(), StoreError> {
        tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "UPDATE support_tier SET title = $1, description = $2, cost = $3 \
                 WHERE id = $4",
            )
            .bind(title)
            .bind(description)
            .bind(cost)
            .bind(tier_id)
            .execute(&mut *self.tx),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn delete_support_tier(&mut self, tier_id: i64) -> Result<(), StoreError> {
        tokio::time::timeout(
            self.op_timeout,
            sqlx::query("DELETE FROM support_tier WHERE id = $1")
                .bind(tier_id)
                .execute(&mut *self.tx),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn pledge_count_for_tier(&mut self, tier_id: i64) -> Result<i64, StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query("SELECT COUNT(*) FROM supporter WHERE support_tier_id = $1")
                .bind(tier_id)
                .fetch_one(&mut *self.tx),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(row.try_get::<i64, _>(0)?)
    }

    pub async fn has_pledge(&mut self, tier_id: i64, user_id: i64) -> Result<bool, StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "SELECT EXISTS (SELECT 1 FROM supporter \
                 WHERE support_tier_id = $1 AND user_id = $2)",
            )
            .bind(tier_id)
            .bind(user_id)
            .fetch_one(&mut *self.tx),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(row.try_get::<bool, _>(0)?)
    }

    pub async fn user_name(&mut self, user_id: i64) -> Result<Option<(String, String)>, StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query("SELECT first_name, last_name FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&mut *self.tx),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        match row {
            Some(row) => Ok(Some((row.try_get("first_name")?, row.try_get("last_name")?))),
            None => Ok(None),
        }
    }

    /// Inserts the pledge with a server-assigned timestamp and returns the
    /// new row's id and timestamp. The `(support_tier_id, user_id)` unique
    /// index backstops the duplicate pre-check.
    pub async fn insert_supporter(
        &mut self,
        petition_id: i64,
        tier_id: i64,
        user_id: i64,
        message: Option<&str>,
    ) -> Result<(i64, String), StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "INSERT INTO supporter (petition_id, support_tier_id, user_id, message) \
                 VALUES ($1, $2, $3, $4) \
                 RETURNING id, \
                 to_char(timestamp AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS\"Z\"') AS ts",
            )
            .bind(petition_id)
            .bind(tier_id)
            .bind(user_id)
            .bind(message)
            .fetch_one(&mut *self.tx),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok((row.try_get("id")?, row.try_get("ts")?))
    }
}

pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
