use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct WinnerRecord {
    pub block_number: i64,
    pub builder_name: String,
    pub settlement_window: i64,
    pub processed: bool,
    pub created_at: time::PrimitiveDateTime,
}

#[derive(Debug, Clone)]
/// Record the winner of an L1 block.
///
/// A block has at most one winner; re-announcements are ignored.
/// Returns whether a new row was written.
pub struct InsertWinner {
    pub block_number: i64,
    pub builder_name: String,
    pub settlement_window: i64,
}

impl Processor<InsertWinner> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertWinner")]
    async fn process(&self, insert: InsertWinner) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO winners (block_number, builder_name, settlement_window)
            VALUES ($1, $2, $3)
            ON CONFLICT (block_number) DO NOTHING
            "#,
        )
        .bind(insert.block_number)
        .bind(insert.builder_name)
        .bind(insert.settlement_window)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
/// Get winners whose commitments have not been evaluated yet, oldest block first.
pub struct GetUnprocessedWinners;

impl Processor<GetUnprocessedWinners> for DatabaseProcessor {
    type Output = Vec<WinnerRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetUnprocessedWinners")]
    async fn process(&self, _query: GetUnprocessedWinners) -> Result<Vec<WinnerRecord>, sqlx::Error> {
        sqlx::query_as::<_, WinnerRecord>(
            r#"
            SELECT block_number, builder_name, settlement_window, processed, created_at
            FROM winners
            WHERE processed = false
            ORDER BY block_number ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Mark a winner as fully evaluated.
pub struct MarkWinnerProcessed {
    pub block_number: i64,
}

impl Processor<MarkWinnerProcessed> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:MarkWinnerProcessed")]
    async fn process(&self, update: MarkWinnerProcessed) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE winners SET processed = true WHERE block_number = $1")
            .bind(update.block_number)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
