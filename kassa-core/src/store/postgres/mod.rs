//! PostgreSQL backend.
//!
//! Queries are checked at runtime (`sqlx::query_as::<_, T>`) against the
//! schema in `migrations/`. Multi-statement writes that must be atomic are
//! expressed as `Processor` inputs on [`DatabaseProcessor`] and run inside a
//! [`TransactionProcessor`](crate::framework::TransactionProcessor).

mod exchanges;
mod settlement;
mod wallets;

pub use exchanges::CreateExchangeWithOfferings;
pub use wallets::CommitWalletMutation;

use crate::framework::DatabaseProcessor;
use sqlx::PgPool;

/// Store implementation over a Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    db: DatabaseProcessor,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor { pool },
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db.pool
    }
}
