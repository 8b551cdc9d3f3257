use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

#[derive(Debug, Clone)]
/// Get the last settlement-chain block whose logs were fully dispatched.
pub struct GetLastProcessedBlock;

impl Processor<GetLastProcessedBlock> for DatabaseProcessor {
    type Output = Option<i64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetLastProcessedBlock")]
    async fn process(&self, _query: GetLastProcessedBlock) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT last_block FROM listener_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Advance the dispatcher cursor. The stored block never moves backwards.
pub struct SetLastProcessedBlock {
    pub block_number: i64,
}

impl Processor<SetLastProcessedBlock> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:SetLastProcessedBlock")]
    async fn process(&self, update: SetLastProcessedBlock) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO listener_state (id, last_block)
            VALUES (1, $1)
            ON CONFLICT (id) DO UPDATE
            SET last_block = GREATEST(listener_state.last_block, EXCLUDED.last_block),
                updated_at = now()
            "#,
        )
        .bind(update.block_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
