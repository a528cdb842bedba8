mod common;

use common::{balance, fund, ledger_harness};
use kassa_core::entities::Currency;
use kassa_core::entities::wallet::{BalanceKey, TransactionKind, TransactionPurpose};
use kassa_core::ledger::{LedgerError, MutationRequest};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn debit_scenario_on_a_funded_wallet() {
    let h = ledger_harness();
    let user = Uuid::now_v7();
    fund(&h.ledger, user, Currency::Usd, dec!(100)).await;

    let too_much = h
        .ledger
        .debit(MutationRequest::new(
            user,
            Currency::Usd,
            dec!(100.5),
            "over",
            TransactionPurpose::Withdrawal,
        ))
        .await;
    assert!(matches!(too_much, Err(LedgerError::InsufficientFunds { .. })));
    assert_eq!(balance(&h.ledger, user, Currency::Usd).await, dec!(100));

    let txn = h
        .ledger
        .debit(MutationRequest::new(
            user,
            Currency::Usd,
            dec!(50),
            "a",
            TransactionPurpose::Withdrawal,
        ))
        .await
        .unwrap();
    assert_eq!(txn.wallet_state_before.available_balance, dec!(100));
    assert_eq!(txn.wallet_state_after.available_balance, dec!(50));

    let again = h
        .ledger
        .debit(MutationRequest::new(
            user,
            Currency::Usd,
            dec!(50),
            "a",
            TransactionPurpose::Withdrawal,
        ))
        .await;
    assert!(matches!(again, Err(LedgerError::DuplicateReference(_))));
    assert_eq!(balance(&h.ledger, user, Currency::Usd).await, dec!(50));
}

#[tokio::test]
async fn reference_is_rejected_for_credits_too_once_used() {
    let h = ledger_harness();
    let user = Uuid::now_v7();
    fund(&h.ledger, user, Currency::Eur, dec!(10)).await;
    h.ledger
        .debit(MutationRequest::new(
            user,
            Currency::Eur,
            dec!(4),
            "r-1",
            TransactionPurpose::TransferDebit,
        ))
        .await
        .unwrap();

    let credit = h
        .ledger
        .credit(MutationRequest::new(
            user,
            Currency::Eur,
            dec!(4),
            "r-1",
            TransactionPurpose::Refund,
        ))
        .await;
    assert!(matches!(credit, Err(LedgerError::DuplicateReference(_))));
    assert_eq!(balance(&h.ledger, user, Currency::Eur).await, dec!(6));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mutations_sum_to_the_final_balance() {
    let h = ledger_harness();
    let user = Uuid::now_v7();
    fund(&h.ledger, user, Currency::Ngn, dec!(1000)).await;

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..64u32 {
        let ledger = Arc::clone(&h.ledger);
        tasks.spawn(async move {
            let amount = Decimal::from(i % 7 + 1);
            let request = MutationRequest::new(
                user,
                Currency::Ngn,
                amount,
                format!("op-{i}"),
                TransactionPurpose::TransferCredit,
            );
            if i % 2 == 0 {
                ledger.credit(request).await
            } else {
                ledger.debit(request).await
            }
        });
    }

    let mut expected = dec!(1000);
    while let Some(joined) = tasks.join_next().await {
        if let Ok(txn) = joined.unwrap() {
            match txn.kind {
                TransactionKind::Credit => expected += txn.delta(),
                TransactionKind::Debit => expected -= txn.delta(),
            }
        }
    }

    let final_balance = balance(&h.ledger, user, Currency::Ngn).await;
    assert_eq!(final_balance, expected);
    assert!(final_balance >= Decimal::ZERO);

    // Every entry chains onto the one before it.
    let history = h.store.user_transactions(user).await;
    for pair in history.windows(2) {
        assert_eq!(
            pair[0].wallet_state_after.available_balance,
            pair[1].wallet_state_before.available_balance
        );
    }
}

#[tokio::test]
async fn concurrent_debits_never_overdraw() {
    let h = ledger_harness();
    let user = Uuid::now_v7();
    fund(&h.ledger, user, Currency::Usd, dec!(10)).await;

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..25 {
        let ledger = Arc::clone(&h.ledger);
        tasks.spawn(async move {
            ledger
                .debit(MutationRequest::new(
                    user,
                    Currency::Usd,
                    dec!(1),
                    format!("spend-{i}"),
                    TransactionPurpose::Withdrawal,
                ))
                .await
        });
    }
    let mut succeeded = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::InsufficientFunds { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(succeeded, 10);
    assert_eq!(balance(&h.ledger, user, Currency::Usd).await, Decimal::ZERO);
}

#[tokio::test]
async fn pending_bucket_moves_independently() {
    let h = ledger_harness();
    let user = Uuid::now_v7();
    h.ledger
        .credit(
            MutationRequest::new(
                user,
                Currency::Gbp,
                dec!(30),
                "hold-1",
                TransactionPurpose::PendingCurrencyExchangeCredit,
            )
            .with_keys([BalanceKey::Pending]),
        )
        .await
        .unwrap();

    let wallet = h.ledger.wallet(user, Currency::Gbp).await.unwrap();
    assert_eq!(wallet.pending_balance, dec!(30));
    assert_eq!(wallet.available_balance, Decimal::ZERO);

    let overdraw = h
        .ledger
        .debit(
            MutationRequest::new(
                user,
                Currency::Gbp,
                dec!(31),
                "release-1",
                TransactionPurpose::PendingCurrencyExchangeDebit,
            )
            .with_keys([BalanceKey::Pending]),
        )
        .await;
    assert!(matches!(
        overdraw,
        Err(LedgerError::InsufficientFunds {
            key: BalanceKey::Pending,
            ..
        })
    ));
}

#[tokio::test]
async fn deposits_notify_and_other_credits_do_not() {
    let h = ledger_harness();
    let user = Uuid::now_v7();
    fund(&h.ledger, user, Currency::Kes, dec!(5)).await;
    h.ledger
        .credit(MutationRequest::new(
            user,
            Currency::Kes,
            dec!(5),
            "refund-1",
            TransactionPurpose::Refund,
        ))
        .await
        .unwrap();
    assert_eq!(h.notifier.count("wallet_funded"), 1);
}
