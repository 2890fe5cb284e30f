//! Isolated PostgreSQL databases for store tests.
//!
//! Each [`TestDb`] creates a uniquely named database on the server that
//! `DATABASE_URL` points at and applies the crate's migrations to it, so
//! tests never see each other's rows. Without `DATABASE_URL` the PostgreSQL
//! tests are skipped.

use std::time::Duration;

use access_key_service::{db, store::PgStore};
use sqlx::{Connection, PgConnection};
use url::Url;
use uuid::Uuid;

pub struct TestDb {
    pub store: PgStore,
    name: String,
    admin_url: String,
}

impl TestDb {
    /// Creates and migrates a fresh database, or returns `None` when
    /// `DATABASE_URL` is unset.
    pub async fn create() -> Option<Self> {
        let Ok(admin_url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL is not set, skipping PostgreSQL store test");
            return None;
        };

        let name = format!("access_keys_test_{}", Uuid::new_v4().simple());

        let mut admin = PgConnection::connect(&admin_url)
            .await
            .expect("Failed to connect to DATABASE_URL");
        sqlx::query(&format!("CREATE DATABASE \"{name}\""))
            .execute(&mut admin)
            .await
            .expect("Failed to create test database");
        admin
            .close()
            .await
            .expect("Failed to close admin connection");

        let mut url = Url::parse(&admin_url).expect("DATABASE_URL is a URL");
        url.set_path(&name);

        let pool = db::create_pool(url.as_str(), 16, Duration::from_secs(30))
            .await
            .expect("Failed to connect to test database");
        db::run_migrations(&pool)
            .await
            .expect("Failed to run migrations on test database");

        Some(Self {
            store: PgStore::new(pool),
            name,
            admin_url,
        })
    }

    /// Closes the pool and drops the database.
    pub async fn cleanup(self) {
        self.store.pool().close().await;

        if let Ok(mut admin) = PgConnection::connect(&self.admin_url).await {
            let _ = sqlx::query(&format!("DROP DATABASE IF EXISTS \"{}\"", self.name))
                .execute(&mut admin)
                .await;
            let _ = admin.close().await;
        }
    }
}
