use super::{Currency, ProviderName};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bank users can pay out to, in one currency.
///
/// Providers know the same bank under different codes; `meta` maps each
/// provider name to its code. Rows are unique on (currency, name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bank {
    pub id: Uuid,
    pub currency: Currency,
    pub name: String,
    pub logo: Option<String>,
    pub meta: serde_json::Value,
    pub created_at: time::PrimitiveDateTime,
    pub deleted_at: Option<time::PrimitiveDateTime>,
}

impl Bank {
    pub fn code_for(&self, provider: ProviderName) -> Option<&str> {
        self.meta.get(provider.as_str()).and_then(|v| v.as_str())
    }
}

/// A dedicated account a provider opened for one user's wallet. Transfers
/// into it arrive as charges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WalletAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub wallet_id: Uuid,
    pub currency: Currency,
    pub provider: ProviderName,
    pub account_number: String,
    pub account_name: String,
    pub bank_name: Option<String>,
    pub provider_customer_id: Option<String>,
    pub provider_response: serde_json::Value,
    pub created_at: time::PrimitiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::now;

    #[test]
    fn provider_codes_come_from_meta() {
        let bank = Bank {
            id: Uuid::now_v7(),
            currency: Currency::Ngn,
            name: "Access Bank".into(),
            logo: None,
            meta: serde_json::json!({ "paystack": "044" }),
            created_at: now(),
            deleted_at: None,
        };
        assert_eq!(bank.code_for(ProviderName::Paystack), Some("044"));
        assert_eq!(bank.code_for(ProviderName::Wise), None);
    }
}
