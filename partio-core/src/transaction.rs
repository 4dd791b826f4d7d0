use crate::error::{PartioError, Result};
use crate::storage::Database;
use rusqlite::{Transaction, TransactionBehavior};

/// Runs a unit of work inside one SQLite transaction.
///
/// Commits when the closure returns `Ok`, rolls back and hands back the
/// closure's own error otherwise. There is no retry. The closure gets a
/// dedicated connection and must not open another transaction itself.
#[derive(Debug, Clone)]
pub struct TransactionRunner {
    database: Database,
}

impl TransactionRunner {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn exec<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.database.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|error| {
                PartioError::Transaction(format!("failed to begin transaction: {}", error))
            })?;

        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(|error| {
                    PartioError::Transaction(format!("failed to commit transaction: {}", error))
                })?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback() {
                    tracing::warn!(
                        "Failed to roll back transaction after error '{}': {}",
                        error,
                        rollback_error
                    );
                }
                Err(error)
            }
        }
    }
}
