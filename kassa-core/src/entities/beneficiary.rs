use super::Currency;
use super::transfer::AccountDetails;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case", type_name = "beneficiary_kind")]
pub enum BeneficiaryKind {
    ExternalAccount,
    InternalUser,
}

/// A saved withdrawal destination.
///
/// Rows are never updated in place once created; deleting only stamps
/// `deleted_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Beneficiary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub currency: Currency,
    pub kind: BeneficiaryKind,
    pub account_number: Option<String>,
    pub account_name: Option<String>,
    pub bank_code: Option<String>,
    pub bank_name: Option<String>,
    pub details: serde_json::Value,
    pub target_user_id: Option<Uuid>,
    pub created_at: time::PrimitiveDateTime,
    pub deleted_at: Option<time::PrimitiveDateTime>,
}

/// Where a withdrawal to a [`Beneficiary`] lands.
#[derive(Debug, Clone, PartialEq)]
pub enum BeneficiaryTarget {
    External(AccountDetails),
    Internal(Uuid),
}

impl Beneficiary {
    /// Resolve the destination, or `None` if the row is inconsistent with
    /// its kind.
    pub fn target(&self) -> Option<BeneficiaryTarget> {
        match self.kind {
            BeneficiaryKind::ExternalAccount => {
                Some(BeneficiaryTarget::External(AccountDetails {
                    account_number: self.account_number.clone()?,
                    account_name: self.account_name.clone().unwrap_or_default(),
                    bank_code: self.bank_code.clone(),
                    bank_name: self.bank_name.clone(),
                    details: self.details.clone(),
                }))
            }
            BeneficiaryKind::InternalUser => self.target_user_id.map(BeneficiaryTarget::Internal),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
