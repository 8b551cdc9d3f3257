use sqlx::PgPool;

/// Executes entity queries against the connection pool.
///
/// Every query is a plain struct with a `kanau::processor::Processor` impl on
/// this type, so storage code reads as `db.process(Query { .. }).await`.
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}
