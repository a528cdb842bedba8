//! Beneficiaries and user withdrawals.

use super::pipeline::{SettlementPipeline, TransferRequest, check_settleable};
use super::{ProviderError, SettlementError};
use crate::entities::Currency;
use crate::entities::beneficiary::{Beneficiary, BeneficiaryKind, BeneficiaryTarget};
use crate::entities::transfer::TransferRecord;
use crate::entities::wallet::{TransactionPurpose, WalletTransaction};
use crate::ledger::MutationRequest;
use crate::utils::time::now;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewBeneficiary {
    pub currency: Currency,
    pub target: BeneficiaryTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Withdrawal {
    /// Paid out through a provider.
    External(TransferRecord),
    /// Moved between two users' wallets.
    Internal {
        debit: WalletTransaction,
        credit: WalletTransaction,
    },
}

impl SettlementPipeline {
    /// Save a destination. External accounts are verified through the
    /// currency's provider when it supports verification.
    pub async fn create_beneficiary(
        &self,
        user_id: Uuid,
        new: NewBeneficiary,
    ) -> Result<Beneficiary, SettlementError> {
        let mut beneficiary = Beneficiary {
            id: Uuid::now_v7(),
            user_id,
            currency: new.currency,
            kind: BeneficiaryKind::ExternalAccount,
            account_number: None,
            account_name: None,
            bank_code: None,
            bank_name: None,
            details: serde_json::Value::Null,
            target_user_id: None,
            created_at: now(),
            deleted_at: None,
        };

        match new.target {
            BeneficiaryTarget::External(account) => {
                if account.account_number.trim().is_empty() {
                    return Err(SettlementError::Validation("account number is required".into()));
                }
                let provider = self.registry.for_currency(new.currency)?;
                let verified = match provider.verify_account(new.currency, &account).await {
                    Ok(resolved) => resolved,
                    Err(ProviderError::Unsupported) => account,
                    Err(e) => {
                        return Err(SettlementError::Validation(format!(
                            "account could not be verified: {e}"
                        )));
                    }
                };
                beneficiary.account_number = Some(verified.account_number);
                beneficiary.account_name = Some(verified.account_name);
                beneficiary.bank_code = verified.bank_code;
                beneficiary.bank_name = verified.bank_name;
                beneficiary.details = verified.details;
            }
            BeneficiaryTarget::Internal(target) => {
                if target == user_id {
                    return Err(SettlementError::Validation(
                        "cannot add yourself as a beneficiary".into(),
                    ));
                }
                beneficiary.kind = BeneficiaryKind::InternalUser;
                beneficiary.target_user_id = Some(target);
            }
        }

        Ok(self.store.upsert_beneficiary(&beneficiary).await?)
    }

    pub async fn list_beneficiaries(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Beneficiary>, SettlementError> {
        Ok(self.store.beneficiaries(user_id).await?)
    }

    /// Soft delete. Records that already reference the beneficiary keep
    /// their own copy of the account details.
    pub async fn delete_beneficiary(
        &self,
        user_id: Uuid,
        beneficiary_id: Uuid,
    ) -> Result<(), SettlementError> {
        if self
            .store
            .delete_beneficiary(user_id, beneficiary_id)
            .await?
        {
            Ok(())
        } else {
            Err(SettlementError::Validation(format!(
                "unknown beneficiary {beneficiary_id}"
            )))
        }
    }

    /// Send `amount` to a saved beneficiary.
    #[tracing::instrument(skip_all, fields(%user_id, %beneficiary_id))]
    pub async fn withdraw(
        &self,
        user_id: Uuid,
        beneficiary_id: Uuid,
        amount: Decimal,
        note: Option<String>,
    ) -> Result<Withdrawal, SettlementError> {
        check_settleable(amount, Decimal::ZERO)?;
        let beneficiary = self
            .store
            .beneficiary(user_id, beneficiary_id)
            .await?
            .ok_or_else(|| {
                SettlementError::Validation(format!("unknown beneficiary {beneficiary_id}"))
            })?;
        self.ensure_withdrawal_enabled(beneficiary.currency)?;
        let target = beneficiary.target().ok_or_else(|| {
            SettlementError::InvariantViolation(format!(
                "beneficiary {beneficiary_id} has no destination for its kind"
            ))
        })?;

        match target {
            BeneficiaryTarget::External(account) => {
                let fee = self.settings.current().transfer_fee(beneficiary.currency);
                let record = self
                    .transfer_to_account(TransferRequest {
                        user_id,
                        currency: beneficiary.currency,
                        amount,
                        fee,
                        reference: format!("wd_{}", Uuid::now_v7().simple()),
                        account,
                        narration: note,
                    })
                    .await?;
                Ok(Withdrawal::External(record))
            }
            BeneficiaryTarget::Internal(target_user) => {
                self.internal_transfer(user_id, target_user, beneficiary.currency, amount, note)
                    .await
            }
        }
    }

    async fn internal_transfer(
        &self,
        from: Uuid,
        to: Uuid,
        currency: Currency,
        amount: Decimal,
        note: Option<String>,
    ) -> Result<Withdrawal, SettlementError> {
        let transfer_id = Uuid::now_v7();
        let meta = serde_json::json!({
            "transfer_id": transfer_id,
            "from_user_id": from,
            "to_user_id": to,
        });

        let debit = self
            .ledger
            .debit(
                MutationRequest::new(
                    from,
                    currency,
                    amount,
                    format!("xfer_{transfer_id}_debit"),
                    TransactionPurpose::TransferDebit,
                )
                .with_note(note.clone())
                .with_meta(meta.clone()),
            )
            .await?;

        let credit = self
            .ledger
            .credit(
                MutationRequest::new(
                    to,
                    currency,
                    amount,
                    format!("xfer_{transfer_id}_credit"),
                    TransactionPurpose::TransferCredit,
                )
                .with_note(note)
                .with_meta(meta.clone()),
            )
            .await;

        match credit {
            Ok(credit) => {
                info!(%transfer_id, %amount, %currency, "Internal transfer completed");
                Ok(Withdrawal::Internal { debit, credit })
            }
            Err(e) => {
                warn!(%transfer_id, error = %e, "Internal transfer credit failed, reversing debit");
                let reversal = MutationRequest::new(
                    from,
                    currency,
                    amount,
                    format!("xfer_{transfer_id}_reversal"),
                    TransactionPurpose::Refund,
                )
                .with_meta(meta);
                if let Err(reversal_error) = self.ledger.credit(reversal).await {
                    error!(%transfer_id, error = %reversal_error, "Reversal of internal transfer failed");
                }
                Err(e.into())
            }
        }
    }
}
