use crate::entities::SettlementKind;
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SettlementRecord {
    pub commitment_index: Vec<u8>,
    pub transaction: String,
    pub block_number: i64,
    pub builder_name: String,
    pub amount: Decimal,
    pub bid_id: Vec<u8>,
    pub settlement_type: SettlementKind,
    pub decay_percentage: i64,
    pub settlement_window: i64,
    pub chain_hash: Option<Vec<u8>>,
    pub nonce: Option<i64>,
    pub settled: bool,
    pub created_at: time::PrimitiveDateTime,
}

/// Data for inserting a new settlement.
#[derive(Debug, Clone)]
pub struct SettlementInsert {
    pub commitment_index: Vec<u8>,
    pub transaction: String,
    pub block_number: i64,
    pub builder_name: String,
    pub amount: Decimal,
    pub bid_id: Vec<u8>,
    pub settlement_type: SettlementKind,
    pub decay_percentage: i64,
    pub settlement_window: i64,
}

#[derive(Debug, Clone)]
/// Insert a settlement.
///
/// Uses ON CONFLICT DO NOTHING on the commitment index so that re-evaluating a
/// winner never duplicates a settlement. Returns whether a new row was written.
pub struct InsertSettlement {
    pub settlement: SettlementInsert,
}

impl Processor<InsertSettlement> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertSettlement")]
    async fn process(&self, insert: InsertSettlement) -> Result<bool, sqlx::Error> {
        let s = insert.settlement;
        let result = sqlx::query(
            r#"
            INSERT INTO settlements
                (commitment_index, transaction, block_number, builder_name, amount,
                 bid_id, settlement_type, decay_percentage, settlement_window)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (commitment_index) DO NOTHING
            "#,
        )
        .bind(s.commitment_index)
        .bind(s.transaction)
        .bind(s.block_number)
        .bind(s.builder_name)
        .bind(s.amount)
        .bind(s.bid_id)
        .bind(s.settlement_type)
        .bind(s.decay_percentage)
        .bind(s.settlement_window)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
/// Get settlements of a window that have not been sent to the oracle contract yet.
pub struct GetPendingSettlements {
    pub settlement_window: i64,
}

impl Processor<GetPendingSettlements> for DatabaseProcessor {
    type Output = Vec<SettlementRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPendingSettlements")]
    async fn process(
        &self,
        query: GetPendingSettlements,
    ) -> Result<Vec<SettlementRecord>, sqlx::Error> {
        sqlx::query_as::<_, SettlementRecord>(
            r#"
            SELECT
                commitment_index,
                transaction,
                block_number,
                builder_name,
                amount,
                bid_id,
                settlement_type,
                decay_percentage,
                settlement_window,
                chain_hash,
                nonce,
                settled,
                created_at
            FROM settlements
            WHERE settlement_window = $1
              AND chain_hash IS NULL
              AND settled = false
            ORDER BY block_number ASC, created_at ASC
            "#,
        )
        .bind(query.settlement_window)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Record the settlement-chain transaction that posts a settlement.
pub struct MarkSettlementInitiated {
    pub commitment_index: Vec<u8>,
    pub chain_hash: Vec<u8>,
    pub nonce: i64,
}

impl Processor<MarkSettlementInitiated> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:MarkSettlementInitiated")]
    async fn process(&self, update: MarkSettlementInitiated) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE settlements
            SET chain_hash = $2, nonce = $3
            WHERE commitment_index = $1
            "#,
        )
        .bind(update.commitment_index)
        .bind(update.chain_hash)
        .bind(update.nonce)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Mark every initiated settlement whose nonce is below the confirmed nonce as settled.
///
/// Returns the number of settlements marked.
pub struct MarkSettlementsComplete {
    pub confirmed_nonce: i64,
}

impl Processor<MarkSettlementsComplete> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:MarkSettlementsComplete")]
    async fn process(&self, update: MarkSettlementsComplete) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE settlements
            SET settled = true
            WHERE settled = false
              AND nonce IS NOT NULL
              AND nonce < $1
            "#,
        )
        .bind(update.confirmed_nonce)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Count settlement transactions that were sent but are not final yet.
pub struct CountPendingSettlementTxns;

impl Processor<CountPendingSettlementTxns> for DatabaseProcessor {
    type Output = i64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CountPendingSettlementTxns")]
    async fn process(&self, _query: CountPendingSettlementTxns) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM settlements
            WHERE chain_hash IS NOT NULL
              AND settled = false
            "#,
        )
        .fetch_one(&self.pool)
        .await
    }
}
