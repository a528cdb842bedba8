//! Conversion path discovery.
//!
//! Offerings are directed edges between currencies. A chain is a simple
//! path from the payin to the payout currency: no currency appears twice,
//! the start included.

use crate::entities::Currency;
use rust_decimal::Decimal;
use std::collections::HashSet;

/// A published offering, normalized for routing.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogOffering {
    pub id: String,
    pub counterparty_id: String,
    pub payin_currency: Currency,
    pub payout_currency: Currency,
    /// Payout units per payin unit.
    pub rate: Decimal,
    pub fee: Decimal,
    pub settlement_secs: i64,
}

/// One candidate route.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub offerings: Vec<CatalogOffering>,
    /// Product of hop rates.
    pub rate: Decimal,
    /// Sum of hop fees.
    pub fee: Decimal,
    pub settlement_secs: i64,
}

impl Chain {
    /// `None` if the cumulative rate or fee overflows.
    fn from_hops(offerings: Vec<CatalogOffering>) -> Option<Self> {
        let mut rate = Decimal::ONE;
        let mut fee = Decimal::ZERO;
        let mut settlement_secs = 0i64;
        for o in &offerings {
            rate = rate.checked_mul(o.rate)?;
            fee = fee.checked_add(o.fee)?;
            settlement_secs = settlement_secs.saturating_add(o.settlement_secs);
        }
        Some(Self {
            offerings,
            rate,
            fee,
            settlement_secs,
        })
    }

    pub fn offering_ids(&self) -> Vec<String> {
        self.offerings.iter().map(|o| o.id.clone()).collect()
    }
}

/// Reusable view over an edge list. [`PathFinder::paths`] can be called
/// any number of times; each call starts a fresh traversal.
pub struct PathFinder<'a> {
    offerings: &'a [CatalogOffering],
    max_depth: usize,
}

impl<'a> PathFinder<'a> {
    pub fn new(offerings: &'a [CatalogOffering]) -> Self {
        let currencies: HashSet<Currency> = offerings
            .iter()
            .flat_map(|o| [o.payin_currency, o.payout_currency])
            .collect();
        Self {
            offerings,
            // A simple path has at most one edge fewer than there are
            // distinct currencies.
            max_depth: currencies.len().saturating_sub(1),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = self.max_depth.min(max_depth);
        self
    }

    pub fn paths(&self, from: Currency, to: Currency) -> Paths<'a> {
        let stack = if from == to || self.max_depth == 0 {
            Vec::new()
        } else {
            vec![Frame {
                currency: from,
                next_edge: 0,
            }]
        };
        Paths {
            offerings: self.offerings,
            to,
            max_depth: self.max_depth,
            stack,
            hops: Vec::new(),
            visited: HashSet::from([from]),
        }
    }
}

struct Frame {
    currency: Currency,
    /// Index of the next edge to try out of `currency`.
    next_edge: usize,
}

/// Lazy depth-first enumeration of chains, driven by an explicit stack.
pub struct Paths<'a> {
    offerings: &'a [CatalogOffering],
    to: Currency,
    max_depth: usize,
    stack: Vec<Frame>,
    /// Offering index taken out of each frame but the top one.
    hops: Vec<usize>,
    visited: HashSet<Currency>,
}

impl Paths<'_> {
    fn pop_frame(&mut self) {
        if let Some(frame) = self.stack.pop() {
            self.visited.remove(&frame.currency);
        }
        self.hops.pop();
    }
}

impl Iterator for Paths<'_> {
    type Item = Chain;

    fn next(&mut self) -> Option<Chain> {
        loop {
            let depth = self.stack.len();
            let frame = self.stack.last_mut()?;
            let currency = frame.currency;

            let Some((index, edge)) = self
                .offerings
                .iter()
                .enumerate()
                .skip(frame.next_edge)
                .find(|(_, o)| o.payin_currency == currency)
            else {
                self.pop_frame();
                continue;
            };
            frame.next_edge = index + 1;

            let target = edge.payout_currency;
            if target == self.to {
                let hops = self
                    .hops
                    .iter()
                    .chain(std::iter::once(&index))
                    .map(|&i| self.offerings[i].clone())
                    .collect();
                match Chain::from_hops(hops) {
                    Some(chain) => return Some(chain),
                    None => continue,
                }
            }
            // Never pass through the target or revisit a currency.
            if self.visited.contains(&target) || depth >= self.max_depth {
                continue;
            }
            self.visited.insert(target);
            self.hops.push(index);
            self.stack.push(Frame {
                currency: target,
                next_edge: 0,
            });
        }
    }
}

/// Every chain from `from` to `to`.
pub fn find_paths(offerings: &[CatalogOffering], from: Currency, to: Currency) -> Vec<Chain> {
    PathFinder::new(offerings).paths(from, to).collect()
}
