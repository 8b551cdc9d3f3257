use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

#[derive(Debug, Clone)]
/// Record the hash broadcast for a nonce.
///
/// A retry at the same nonce replaces the previous hash.
pub struct UpsertSentTransaction {
    pub nonce: i64,
    pub hash: Vec<u8>,
}

impl Processor<UpsertSentTransaction> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpsertSentTransaction")]
    async fn process(&self, insert: UpsertSentTransaction) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO sent_transactions (nonce, hash)
            VALUES ($1, $2)
            ON CONFLICT (nonce) DO UPDATE SET hash = EXCLUDED.hash, sent_at = now()
            "#,
        )
        .bind(insert.nonce)
        .bind(insert.hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Get the highest nonce ever broadcast, if any.
pub struct GetLastNonce;

impl Processor<GetLastNonce> for DatabaseProcessor {
    type Output = Option<i64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetLastNonce")]
    async fn process(&self, _query: GetLastNonce) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(nonce) FROM sent_transactions")
            .fetch_one(&self.pool)
            .await
    }
}
