use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

pub type DbPool = Pool<AsyncPgConnection>;

/// Upper bound on pooled Postgres connections.
const POOL_MAX_SIZE: usize = 20;

/// Create a Diesel async connection pool.
pub async fn connect(database_url: &str) -> DbPool {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder(manager)
        .max_size(POOL_MAX_SIZE)
        .build()
        .expect("failed to build connection pool");

    tracing::info!(max_size = POOL_MAX_SIZE, "database pool created");

    pool
}

/// Rewrite a connection string to point at the `<name>_test` database.
///
/// Already-suffixed URLs and URLs without a database name come back as-is.
pub fn test_database_url(database_url: &str) -> String {
    let (base, query) = match database_url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (database_url, None),
    };

    let Some((prefix, db_name)) = base.rsplit_once('/') else {
        return database_url.to_string();
    };
    if db_name.is_empty() || db_name.ends_with("_test") {
        return database_url.to_string();
    }

    let mut updated = format!("{prefix}/{db_name}_test");
    if let Some(query) = query {
        updated.push('?');
        updated.push_str(query);
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_test_suffix_and_keeps_query() {
        assert_eq!(
            test_database_url("postgres://u:p@localhost:5432/engage?sslmode=disable"),
            "postgres://u:p@localhost:5432/engage_test?sslmode=disable"
        );
    }

    #[test]
    fn leaves_test_databases_alone() {
        let url = "postgres://localhost/engage_test";
        assert_eq!(test_database_url(url), url);
    }
}
