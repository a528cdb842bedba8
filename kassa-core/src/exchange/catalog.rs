//! Aggregated view of every counterparty's published offerings.

use super::counterparty::{Counterparty, CounterpartyClient, CounterpartyDirectory};
use super::paths::CatalogOffering;
use crate::entities::Currency;
use kassa_sdk::objects::PublishedOffering;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

struct Snapshot {
    fetched_at: Instant,
    offerings: Arc<Vec<CatalogOffering>>,
}

pub struct OfferingCatalog {
    directory: CounterpartyDirectory,
    client: Arc<dyn CounterpartyClient>,
    ttl: Duration,
    cache: Mutex<Option<Snapshot>>,
}

impl OfferingCatalog {
    pub fn new(
        directory: CounterpartyDirectory,
        client: Arc<dyn CounterpartyClient>,
        ttl: Duration,
    ) -> Self {
        Self {
            directory,
            client,
            ttl,
            cache: Mutex::new(None),
        }
    }

    pub fn directory(&self) -> &CounterpartyDirectory {
        &self.directory
    }

    /// All usable offerings, refetched once the cached copy is older than
    /// the TTL. Concurrent callers share one refresh.
    pub async fn offerings(&self) -> Arc<Vec<CatalogOffering>> {
        let mut cache = self.cache.lock().await;
        if let Some(snapshot) = cache.as_ref() {
            if snapshot.fetched_at.elapsed() < self.ttl {
                return snapshot.offerings.clone();
            }
        }
        let offerings = Arc::new(self.fetch_all().await);
        *cache = Some(Snapshot {
            fetched_at: Instant::now(),
            offerings: offerings.clone(),
        });
        offerings
    }

    /// Drop the cached copy so the next read refetches.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    /// Look up `ids` in order. `None` for an id no counterparty publishes.
    pub async fn resolve(&self, ids: &[String]) -> Vec<Option<CatalogOffering>> {
        let offerings = self.offerings().await;
        ids.iter()
            .map(|id| offerings.iter().find(|o| &o.id == id).cloned())
            .collect()
    }

    async fn fetch_all(&self) -> Vec<CatalogOffering> {
        let mut tasks = JoinSet::new();
        for counterparty in self.directory.iter() {
            let counterparty: Arc<Counterparty> = counterparty.clone();
            let client = self.client.clone();
            tasks.spawn(async move {
                let result = client.offerings(&counterparty).await;
                (counterparty, result)
            });
        }

        let mut all = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (counterparty, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "Offering fetch task failed");
                    continue;
                }
            };
            match result {
                Ok(published) => {
                    let before = all.len();
                    all.extend(
                        published
                            .iter()
                            .filter_map(|o| to_catalog_offering(&counterparty.id, o)),
                    );
                    debug!(
                        counterparty = %counterparty.id,
                        published = published.len(),
                        usable = all.len() - before,
                        "Fetched offerings"
                    );
                }
                Err(e) => {
                    warn!(counterparty = %counterparty.id, error = %e, "Failed to fetch offerings");
                }
            }
        }
        // Keep the listing stable across refreshes.
        all.sort_by(|a, b| (&a.counterparty_id, &a.id).cmp(&(&b.counterparty_id, &b.id)));
        all
    }
}

/// `None` for pairs the platform does not support or nonsensical rates.
pub fn to_catalog_offering(
    counterparty_id: &str,
    published: &PublishedOffering,
) -> Option<CatalogOffering> {
    let payin_currency: Currency = published.payin_currency.parse().ok()?;
    let payout_currency: Currency = published.payout_currency.parse().ok()?;
    if payin_currency == payout_currency
        || published.rate <= Decimal::ZERO
        || published.fee < Decimal::ZERO
    {
        return None;
    }
    Some(CatalogOffering {
        id: published.id.clone(),
        counterparty_id: counterparty_id.to_owned(),
        payin_currency,
        payout_currency,
        rate: published.rate,
        fee: published.fee,
        settlement_secs: published.settlement_secs.max(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::counterparty::CounterpartyError;
    use async_trait::async_trait;
    use kassa_sdk::objects::{ExchangeThread, Message};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    struct StaticClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CounterpartyClient for StaticClient {
        async fn offerings(
            &self,
            counterparty: &Counterparty,
        ) -> Result<Vec<PublishedOffering>, CounterpartyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if counterparty.id == "down" {
                return Err(CounterpartyError::Rejected {
                    status: 503,
                    body: "maintenance".into(),
                });
            }
            Ok(vec![
                published("usd-eur", "USD", "EUR", dec!(0.9)),
                published("usd-xyz", "USD", "XYZ", dec!(3)),
            ])
        }

        async fn send_rfq(&self, _: &Counterparty, _: Message) -> Result<String, CounterpartyError> {
            unimplemented!()
        }

        async fn send_message(
            &self,
            _: &Counterparty,
            _: &str,
            _: Message,
        ) -> Result<(), CounterpartyError> {
            unimplemented!()
        }

        async fn threads(
            &self,
            _: &Counterparty,
            _: &[String],
        ) -> Result<Vec<ExchangeThread>, CounterpartyError> {
            unimplemented!()
        }
    }

    fn published(id: &str, from: &str, to: &str, rate: Decimal) -> PublishedOffering {
        PublishedOffering {
            id: id.into(),
            payin_currency: from.into(),
            payout_currency: to.into(),
            rate,
            fee: Decimal::ZERO,
            settlement_secs: 10,
            description: None,
        }
    }

    fn counterparty(id: &str) -> Counterparty {
        Counterparty {
            id: id.into(),
            name: id.into(),
            endpoint: Url::parse("https://cp.example/").unwrap(),
            public_key: Vec::new(),
        }
    }

    #[test]
    fn unsupported_pairs_are_skipped() {
        assert!(to_catalog_offering("cp", &published("a", "USD", "XYZ", dec!(1))).is_none());
        assert!(to_catalog_offering("cp", &published("b", "USD", "USD", dec!(1))).is_none());
        assert!(to_catalog_offering("cp", &published("c", "USD", "EUR", dec!(0))).is_none());
        let ok = to_catalog_offering("cp", &published("d", "usd", "eur", dec!(0.9))).unwrap();
        assert_eq!(ok.payin_currency, Currency::Usd);
        assert_eq!(ok.counterparty_id, "cp");
    }

    #[tokio::test(start_paused = true)]
    async fn failing_counterparty_contributes_nothing_and_cache_expires() {
        let client = Arc::new(StaticClient {
            calls: AtomicUsize::new(0),
        });
        let catalog = OfferingCatalog::new(
            CounterpartyDirectory::new([counterparty("up"), counterparty("down")]),
            client.clone(),
            Duration::from_secs(60),
        );

        let first = catalog.offerings().await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].counterparty_id, "up");
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);

        catalog.offerings().await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        catalog.offerings().await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 4);

        let resolved = catalog
            .resolve(&["usd-eur".to_string(), "missing".to_string()])
            .await;
        assert!(resolved[0].is_some());
        assert!(resolved[1].is_none());
    }
}
