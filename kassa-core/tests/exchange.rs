mod common;

use common::{ExchangeHarness, FakeCounterparties, balance, exchange_harness, fund, published};
use kassa_core::entities::exchange::{ExchangeStatus, OfferingStatus};
use kassa_core::entities::{Currency, Page};
use kassa_core::exchange::ExchangeError;
use kassa_core::ledger::LedgerError;
use kassa_core::store::{ExchangeStore, RevenueLedger};
use kassa_sdk::objects::MessageKind;
use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;
use uuid::Uuid;

fn two_desks() -> FakeCounterparties {
    FakeCounterparties::default()
        .with_desk(
            "alpha",
            vec![
                published("usd-eur", "USD", "EUR", dec!(0.9)),
                published("usd-gbp", "USD", "GBP", dec!(0.78)),
            ],
        )
        .with_desk("beta", vec![published("eur-gbp", "EUR", "GBP", dec!(0.85))])
}

fn chain() -> Vec<String> {
    vec!["usd-eur".to_string(), "eur-gbp".to_string()]
}

/// Quote, then close successfully, polling after each step.
async fn settle_hop(h: &ExchangeHarness, thread: &str) {
    h.counterparties.quote(thread, dec!(1), dec!(1));
    h.router.poll_counterparties().await.unwrap();
    h.counterparties.close(thread, true);
    h.router.poll_counterparties().await.unwrap();
}

async fn funded(h: &ExchangeHarness) -> Uuid {
    let user = Uuid::now_v7();
    fund(&h.ledger, user, Currency::Usd, dec!(200)).await;
    user
}

#[tokio::test]
async fn routes_are_discovered_from_every_desk() {
    let h = exchange_harness(two_desks());
    let chains = h.router.find_paths(Currency::Usd, Currency::Gbp).await;
    let mut found: Vec<Vec<String>> = chains.iter().map(|c| c.offering_ids()).collect();
    found.sort();
    assert_eq!(found, vec![vec!["usd-eur", "eur-gbp"], vec!["usd-gbp"]]);
}

#[tokio::test]
async fn quoting_rejects_unknown_and_disconnected_chains() {
    let h = exchange_harness(two_desks());
    let unknown = h
        .router
        .quote(dec!(10), &["usd-eur".to_string(), "nope".to_string()])
        .await;
    assert!(matches!(unknown, Err(ExchangeError::Validation(_))));

    let disconnected = h
        .router
        .quote(dec!(10), &["usd-gbp".to_string(), "eur-gbp".to_string()])
        .await;
    assert!(matches!(disconnected, Err(ExchangeError::Validation(_))));
}

#[tokio::test]
async fn two_hop_exchange_completes_and_pays_out() {
    let h = exchange_harness(two_desks());
    let user = funded(&h).await;

    let details = h
        .router
        .create_exchange(user, dec!(100), &chain())
        .await
        .unwrap();
    let exchange_id = details.exchange.id;
    assert_eq!(details.exchange.total_payin_amount, dec!(102));
    assert_eq!(details.exchange.status, ExchangeStatus::Processing);
    assert_eq!(details.offerings[0].status, OfferingStatus::Processing);
    assert_eq!(details.offerings[1].status, OfferingStatus::Pending);
    assert_eq!(balance(&h.ledger, user, Currency::Usd).await, dec!(98));

    let first = h.counterparties.thread_ids("alpha")[0].clone();
    h.counterparties.quote(&first, dec!(100), dec!(90));
    let report = h.router.poll_counterparties().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(
        h.counterparties.kinds(&first),
        vec![MessageKind::Rfq, MessageKind::Quote, MessageKind::Order]
    );

    h.counterparties.order_status(&first, "PAYOUT_INITIATED");
    h.router.poll_counterparties().await.unwrap();
    let hop = &h.router.exchange_details(user, exchange_id).await.unwrap().offerings[0];
    assert_eq!(hop.status, OfferingStatus::OrderPlaced);
    assert_eq!(hop.order_status.as_deref(), Some("PAYOUT_INITIATED"));
    assert_eq!(hop.quote_fee, Some(dec!(1)));

    h.counterparties.close(&first, true);
    h.router.poll_counterparties().await.unwrap();
    let offerings = h.router.exchange_details(user, exchange_id).await.unwrap().offerings;
    assert_eq!(offerings[0].status, OfferingStatus::Completed);
    assert_eq!(offerings[1].status, OfferingStatus::Processing);

    let second = h.counterparties.thread_ids("beta")[0].clone();
    settle_hop(&h, &second).await;

    let done = h.router.exchange_details(user, exchange_id).await.unwrap();
    assert_eq!(done.exchange.status, ExchangeStatus::Completed);
    assert!(done.exchange.completed_at.is_some());
    assert_eq!(balance(&h.ledger, user, Currency::Gbp).await, dec!(76.5));
    assert_eq!(balance(&h.ledger, user, Currency::Usd).await, dec!(98));
    let revenue = h
        .store
        .revenue(&format!("rev_{exchange_id}"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(revenue.amount, dec!(2));
    assert_eq!(revenue.currency, Currency::Usd);

    // Re-driving a finished exchange is a no-op.
    h.router.process_exchange(exchange_id).await.unwrap();
    h.router.process_pending_exchanges().await.unwrap();
    assert_eq!(balance(&h.ledger, user, Currency::Gbp).await, dec!(76.5));
    assert_eq!(h.notifier.count("exchange_completed"), 1);
}

#[tokio::test]
async fn cancelled_later_hop_refunds_its_reserved_amount_once() {
    let h = exchange_harness(two_desks());
    let user = funded(&h).await;
    let exchange_id = h
        .router
        .create_exchange(user, dec!(100), &chain())
        .await
        .unwrap()
        .exchange
        .id;

    let first = h.counterparties.thread_ids("alpha")[0].clone();
    settle_hop(&h, &first).await;

    let second = h.counterparties.thread_ids("beta")[0].clone();
    h.counterparties.close(&second, false);
    h.router.poll_counterparties().await.unwrap();

    let details = h.router.exchange_details(user, exchange_id).await.unwrap();
    assert_eq!(details.exchange.status, ExchangeStatus::PartiallyCompleted);
    assert_eq!(details.offerings[0].status, OfferingStatus::Completed);
    assert_eq!(details.offerings[1].status, OfferingStatus::Cancelled);
    assert_eq!(
        details.offerings[1].cancellation_reason.as_deref(),
        Some("no liquidity")
    );
    assert!(details.offerings[1].refunded_at.is_some());
    // The second hop held 90 EUR.
    assert_eq!(balance(&h.ledger, user, Currency::Eur).await, dec!(90));

    let sweep = h.router.process_pending_exchanges().await.unwrap();
    assert_eq!(sweep.refunded, 0);
    h.router.poll_counterparties().await.unwrap();
    assert_eq!(balance(&h.ledger, user, Currency::Eur).await, dec!(90));
    assert_eq!(balance(&h.ledger, user, Currency::Gbp).await, dec!(0));
    assert_eq!(h.notifier.count("exchange_refunded"), 1);
}

#[tokio::test]
async fn user_can_close_a_hop_awaiting_its_quote() {
    let h = exchange_harness(two_desks());
    let user = funded(&h).await;
    let details = h
        .router
        .create_exchange(user, dec!(100), &chain())
        .await
        .unwrap();
    let offering_id = details.offerings[0].id;

    let stranger = h
        .router
        .close_offering(Uuid::now_v7(), offering_id, None)
        .await;
    assert!(matches!(stranger, Err(ExchangeError::Validation(_))));

    let closed = h
        .router
        .close_offering(user, offering_id, Some("changed my mind".into()))
        .await
        .unwrap();
    assert_eq!(closed.status, OfferingStatus::Cancelled);
    assert!(closed.refunded_at.is_some());

    let thread = h.counterparties.thread_ids("alpha")[0].clone();
    assert_eq!(
        h.counterparties.kinds(&thread),
        vec![MessageKind::Rfq, MessageKind::Close]
    );
    let exchange = h.router.exchange_details(user, details.exchange.id).await.unwrap().exchange;
    assert_eq!(exchange.status, ExchangeStatus::Cancelled);
    // The first hop held the whole debit, platform fee included.
    assert_eq!(balance(&h.ledger, user, Currency::Usd).await, dec!(200));

    let again = h.router.close_offering(user, offering_id, None).await;
    assert!(matches!(again, Err(ExchangeError::Validation(_))));
    assert_eq!(balance(&h.ledger, user, Currency::Usd).await, dec!(200));
}

#[tokio::test]
async fn rejected_rfq_cancels_and_refunds() {
    let h = exchange_harness(two_desks());
    let user = funded(&h).await;
    h.counterparties.reject_rfqs.store(true, Ordering::SeqCst);

    let details = h
        .router
        .create_exchange(user, dec!(100), &chain())
        .await
        .unwrap();
    assert_eq!(details.offerings[0].status, OfferingStatus::Cancelled);
    assert!(details.exchange.status.is_terminal());
    assert_eq!(balance(&h.ledger, user, Currency::Usd).await, dec!(200));
}

#[tokio::test]
async fn insufficient_funds_creates_nothing() {
    let h = exchange_harness(two_desks());
    let user = funded(&h).await;

    let result = h.router.create_exchange(user, dec!(500), &chain()).await;
    assert!(matches!(
        result,
        Err(ExchangeError::Ledger(LedgerError::InsufficientFunds { .. }))
    ));
    assert!(
        h.router
            .list_exchanges(user, Page::default())
            .await
            .unwrap()
            .is_empty()
    );
    assert!(h.counterparties.thread_ids("alpha").is_empty());
}

#[tokio::test]
async fn only_finished_exchanges_can_be_rated() {
    let h = exchange_harness(two_desks());
    let user = funded(&h).await;
    let exchange_id = h
        .router
        .create_exchange(user, dec!(10), &["usd-gbp".to_string()])
        .await
        .unwrap()
        .exchange
        .id;

    let early = h.router.rate_exchange(user, exchange_id, 5, None).await;
    assert!(matches!(early, Err(ExchangeError::Validation(_))));

    let thread = h.counterparties.thread_ids("alpha")[0].clone();
    settle_hop(&h, &thread).await;

    let out_of_range = h.router.rate_exchange(user, exchange_id, 6, None).await;
    assert!(matches!(out_of_range, Err(ExchangeError::Validation(_))));
    h.router
        .rate_exchange(user, exchange_id, 4, Some("quick".into()))
        .await
        .unwrap();

    let exchange = h.router.exchange_details(user, exchange_id).await.unwrap().exchange;
    assert_eq!(exchange.status, ExchangeStatus::Completed);
    assert_eq!(exchange.rating, Some(4));
    assert_eq!(balance(&h.ledger, user, Currency::Gbp).await, dec!(7.8));
}

#[tokio::test]
async fn messages_not_signed_by_the_desk_change_nothing() {
    let h = exchange_harness(two_desks());
    let user = funded(&h).await;
    let details = h
        .router
        .create_exchange(user, dec!(10), &["usd-gbp".to_string()])
        .await
        .unwrap();
    let offering_id = details.offerings[0].id;
    let thread = h.counterparties.thread_ids("alpha")[0].clone();

    h.counterparties.forged_quote(&thread, dec!(10), dec!(7.8));
    let report = h.router.poll_counterparties().await.unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(report.errors, 1);

    h.counterparties.unsigned_quote(&thread, dec!(10), dec!(7.8));
    let report = h.router.poll_counterparties().await.unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(report.errors, 1);

    let offering = h.store.offering(offering_id).await.unwrap().unwrap();
    assert_eq!(offering.status, OfferingStatus::Processing);
    assert_eq!(offering.quote_fee, None);
    assert_eq!(
        h.counterparties.kinds(&thread),
        vec![MessageKind::Rfq, MessageKind::Quote, MessageKind::Quote]
    );

    // The desk's own quote still goes through afterwards.
    h.counterparties.quote(&thread, dec!(10), dec!(7.8));
    h.router.poll_counterparties().await.unwrap();
    let offering = h.store.offering(offering_id).await.unwrap().unwrap();
    assert_eq!(offering.status, OfferingStatus::OrderPlaced);
}

#[tokio::test]
async fn overlapping_polls_place_one_order() {
    let h = exchange_harness(two_desks());
    let user = funded(&h).await;
    let details = h
        .router
        .create_exchange(user, dec!(10), &["usd-gbp".to_string()])
        .await
        .unwrap();
    let thread = h.counterparties.thread_ids("alpha")[0].clone();
    h.counterparties.quote(&thread, dec!(10), dec!(7.8));

    let (first, second) = tokio::join!(
        h.router.poll_counterparties(),
        h.router.poll_counterparties()
    );
    assert_eq!(first.unwrap().applied + second.unwrap().applied, 1);
    assert_eq!(
        h.counterparties.kinds(&thread),
        vec![MessageKind::Rfq, MessageKind::Quote, MessageKind::Order]
    );
    let offering = h.store.offering(details.offerings[0].id).await.unwrap().unwrap();
    assert_eq!(offering.status, OfferingStatus::OrderPlaced);
}

#[tokio::test]
async fn failed_order_send_is_retried_on_the_next_poll() {
    let h = exchange_harness(two_desks());
    let user = funded(&h).await;
    let details = h
        .router
        .create_exchange(user, dec!(10), &["usd-gbp".to_string()])
        .await
        .unwrap();
    let offering_id = details.offerings[0].id;
    let thread = h.counterparties.thread_ids("alpha")[0].clone();
    h.counterparties.quote(&thread, dec!(10), dec!(7.8));

    h.counterparties.fail_sends.store(true, Ordering::SeqCst);
    h.router.poll_counterparties().await.unwrap();
    let offering = h.store.offering(offering_id).await.unwrap().unwrap();
    assert_eq!(offering.status, OfferingStatus::AwaitingOrder);

    h.counterparties.fail_sends.store(false, Ordering::SeqCst);
    h.router.poll_counterparties().await.unwrap();
    let offering = h.store.offering(offering_id).await.unwrap().unwrap();
    assert_eq!(offering.status, OfferingStatus::OrderPlaced);
    assert_eq!(
        h.counterparties.kinds(&thread),
        vec![MessageKind::Rfq, MessageKind::Quote, MessageKind::Order]
    );
}

#[tokio::test]
async fn user_close_stands_when_the_desk_is_unreachable() {
    let h = exchange_harness(two_desks());
    let user = funded(&h).await;
    let details = h
        .router
        .create_exchange(user, dec!(10), &["usd-gbp".to_string()])
        .await
        .unwrap();
    let offering_id = details.offerings[0].id;
    let thread = h.counterparties.thread_ids("alpha")[0].clone();

    h.counterparties.fail_sends.store(true, Ordering::SeqCst);
    let closed = h
        .router
        .close_offering(user, offering_id, None)
        .await
        .unwrap();
    assert_eq!(closed.status, OfferingStatus::Cancelled);
    assert!(closed.refunded_at.is_some());
    assert_eq!(balance(&h.ledger, user, Currency::Usd).await, dec!(200));

    // A quote arriving after the close cannot revive the hop.
    h.counterparties.fail_sends.store(false, Ordering::SeqCst);
    h.counterparties.quote(&thread, dec!(10), dec!(7.8));
    h.router.poll_counterparties().await.unwrap();
    assert_eq!(
        h.counterparties.kinds(&thread),
        vec![MessageKind::Rfq, MessageKind::Quote]
    );
    let offering = h.store.offering(offering_id).await.unwrap().unwrap();
    assert_eq!(offering.status, OfferingStatus::Cancelled);
}
