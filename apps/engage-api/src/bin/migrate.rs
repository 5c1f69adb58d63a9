//! Standalone migration runner for engage-api.
//!
//! Usage:
//!   cargo run -p engage-api --bin engage-migrate
//!   cargo run -p engage-api --bin engage-migrate -- --test
//!
//! Reads DATABASE_URL from the environment (or .env via dotenvy). `--test`
//! targets the `<db>_test` database the integration suite uses.

use std::path::Path;

use diesel::pg::PgConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use engage_api::db::pool::test_database_url;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

fn main() {
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    let mut database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL env var is required");
    if std::env::args().any(|arg| arg == "--test") {
        database_url = test_database_url(&database_url);
    }

    println!("Connecting to database...");
    let mut conn =
        PgConnection::establish(&database_url).expect("failed to connect to database");

    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .expect("failed to run migrations");

    match applied.len() {
        0 => println!("Schema is up to date."),
        n => {
            for migration in &applied {
                println!("  Applied: {migration}");
            }
            println!("{n} migration(s) applied.");
        }
    }
}
