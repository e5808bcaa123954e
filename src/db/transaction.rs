/*!
 * Transaction helpers
 *
 * Every multi-row stock mutation runs through [`with_transaction`] so that a
 * failure at any step rolls back everything written before it.
 */

use crate::errors::ServiceError;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};
use uuid::Uuid;

/// Type alias for boxed future used in transactions
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Execute a function within a database transaction
///
/// Commits when `f` returns `Ok`, rolls back otherwise. The error returned
/// by `f` is handed back unchanged; connection-level failures become
/// [`ServiceError::DatabaseError`].
///
/// ```rust,ignore
/// let receipt = with_transaction(&db, |txn| {
///     Box::pin(async move {
///         let header = insert_header(txn, &plan).await?;
///         apply_lines(txn, header.id, &plan.lines).await?;
///         Ok(header)
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<F, T>(db: &DatabaseConnection, f: F) -> Result<T, ServiceError>
where
    F: for<'a> FnOnce(&'a DatabaseTransaction) -> BoxFuture<'a, Result<T, ServiceError>> + Send,
    T: Send,
{
    let transaction_id = Uuid::new_v4();
    let start = std::time::Instant::now();
    debug!(transaction_id = %transaction_id, "Starting database transaction");

    let result = db.transaction::<_, T, ServiceError>(f).await;

    match &result {
        Ok(_) => {
            debug!(transaction_id = %transaction_id, elapsed = ?start.elapsed(), "Transaction committed");
        }
        Err(e) => {
            warn!(transaction_id = %transaction_id, elapsed = ?start.elapsed(), error = %e, "Transaction rolled back");
        }
    }

    result.map_err(ServiceError::from)
}
