use sqlx::{FromRow, PgPool};
use store::{Append, NewUser, StoreError, Symbol, User, UserId, UserStore, Watchlist};

/// Postgres implementation of [`UserStore`].
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    username: String,
    password_hash: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId(row.id),
            username: row.username,
            password_hash: row.password_hash,
        }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    tracing::error!("Database error: {}", e);
    StoreError::Backend(e.to_string())
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

impl UserStore for PgStore {
    async fn find_by_username(&self, username: &str) -> Result<Vec<User>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id, username, password_hash FROM users WHERE lower(username) = lower($1)",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, username, password_hash FROM users WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        Ok(row.map(User::from))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let result: Result<UserRow, sqlx::Error> = sqlx::query_as(
            "INSERT INTO users (username, password_hash) VALUES ($1, $2) RETURNING id, username, password_hash",
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row.into()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::UsernameTaken),
            Err(e) => Err(backend(e)),
        }
    }

    async fn watchlist(&self, id: UserId) -> Result<Option<Watchlist>, StoreError> {
        // One statement, so the version and the symbols come from the same snapshot
        let rows: Vec<(i64, Option<String>)> = sqlx::query_as(
            r#"
            SELECT u.watchlist_version, s.symbol
            FROM users u
            LEFT JOIN user_symbols s ON s.user_id = u.id
            WHERE u.id = $1
            ORDER BY s.position
            "#,
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let Some((version, _)) = rows.first() else {
            return Ok(None);
        };
        let version = u64::try_from(*version)
            .map_err(|_| StoreError::Backend(format!("negative watchlist version for user {}", id)))?;
        let symbols = rows
            .iter()
            .filter_map(|(_, symbol)| symbol.as_deref().and_then(Symbol::parse))
            .collect();
        Ok(Some(Watchlist { symbols, version }))
    }

    async fn append_symbol(
        &self,
        id: UserId,
        expected_version: u64,
        symbol: &Symbol,
    ) -> Result<Append, StoreError> {
        let expected = i64::try_from(expected_version)
            .map_err(|_| StoreError::Backend(format!("watchlist version {} out of range", expected_version)))?;

        let mut tx = self.pool.begin().await.map_err(backend)?;

        let bumped: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE users SET watchlist_version = watchlist_version + 1
            WHERE id = $1 AND watchlist_version = $2
            RETURNING watchlist_version
            "#,
        )
        .bind(id.0)
        .bind(expected)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let Some((version,)) = bumped else {
            let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;
            tx.rollback().await.map_err(backend)?;
            return match exists {
                Some(_) => Ok(Append::Conflict),
                None => Err(StoreError::UnknownUser(id)),
            };
        };

        sqlx::query(
            "INSERT INTO user_symbols (user_id, symbol, position) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(id.0)
        .bind(symbol.as_str())
        .bind(version)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(Append::Applied {
            version: version as u64,
        })
    }
}
