pub mod listener_state;
pub mod sent_transaction;
pub mod settlement;
pub mod winner;

use preconf_sdk::objects::SettlementType as SdkSettlementType;

/// Settlement type for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `preconf_sdk::objects::SettlementType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "settlement_type")]
pub enum SettlementKind {
    Reward,
    Slash,
    Return,
}

impl From<SettlementKind> for SdkSettlementType {
    fn from(value: SettlementKind) -> Self {
        match value {
            SettlementKind::Reward => SdkSettlementType::Reward,
            SettlementKind::Slash => SdkSettlementType::Slash,
            SettlementKind::Return => SdkSettlementType::Return,
        }
    }
}

impl From<SdkSettlementType> for SettlementKind {
    fn from(value: SdkSettlementType) -> Self {
        match value {
            SdkSettlementType::Reward => SettlementKind::Reward,
            SdkSettlementType::Slash => SettlementKind::Slash,
            SdkSettlementType::Return => SettlementKind::Return,
        }
    }
}
