//! Per-source price slots for one pair
//!
//! One slot per configured source, overwritten on every update; nothing is
//! queued.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use flux_core::{FeedSource, Pair, Price};

/// Latest price per source
#[derive(Debug)]
pub struct SourceBook {
    pair: Pair,
    sources: Vec<FeedSource>,
    slots: DashMap<FeedSource, Price>,
    /// Reference point for sources that never reported
    created_at_ms: i64,
    update_count: AtomicU64,
}

impl SourceBook {
    pub fn new(pair: Pair, sources: &[FeedSource], now_ms: i64) -> Self {
        let mut sources = sources.to_vec();
        sources.sort();
        sources.dedup();

        Self {
            pair,
            sources,
            slots: DashMap::new(),
            created_at_ms: now_ms,
            update_count: AtomicU64::new(0),
        }
    }

    pub fn pair(&self) -> &Pair {
        &self.pair
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    /// Overwrite the slot for `price.source`. Prices for another pair or an
    /// unconfigured source are rejected.
    pub fn update(&self, price: Price) -> bool {
        if price.pair != self.pair || !self.sources.contains(&price.source) {
            return false;
        }
        self.slots.insert(price.source, price);
        self.update_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn get(&self, source: FeedSource) -> Option<Price> {
        self.slots.get(&source).map(|r| r.value().clone())
    }

    /// Values of non-zero slots observed less than `window_ms` ago
    pub fn candidates(&self, now_ms: i64, window_ms: i64) -> Vec<u64> {
        self.slots
            .iter()
            .filter(|entry| {
                let price = entry.value();
                !price.is_zero() && price.is_fresh(window_ms, now_ms)
            })
            .map(|entry| entry.value().value)
            .collect()
    }

    /// Configured sources silent for longer than `timeout_ms`
    pub fn stale_sources(&self, now_ms: i64, timeout_ms: i64) -> Vec<FeedSource> {
        self.sources
            .iter()
            .copied()
            .filter(|source| {
                let last = self
                    .slots
                    .get(source)
                    .map(|r| r.value().observed_at_ms)
                    .unwrap_or(self.created_at_ms);
                now_ms.saturating_sub(last) > timeout_ms
            })
            .collect()
    }

    pub fn stats(&self) -> SourceBookStats {
        SourceBookStats {
            source_count: self.sources.len(),
            reporting_count: self.slots.len(),
            update_count: self.update_count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBookStats {
    pub source_count: usize,
    pub reporting_count: usize,
    pub update_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn btc() -> Pair {
        Pair::new("btc", "usd")
    }

    fn price(source: FeedSource, value: u64, at: i64) -> Price {
        Price::new(source, btc(), 2, value).observed_at(at)
    }

    #[test]
    fn test_rejects_foreign_prices() {
        let book = SourceBook::new(btc(), &[FeedSource::Coinbase], 0);
        assert!(!book.update(price(FeedSource::Binance, 1, 0)));
        assert!(!book.update(Price::new(FeedSource::Coinbase, Pair::new("eth", "usd"), 2, 1)));
        assert!(book.update(price(FeedSource::Coinbase, 1, 0)));
        assert_eq!(book.stats().update_count, 1);
    }

    #[test]
    fn test_slot_overwrite() {
        let book = SourceBook::new(btc(), &[FeedSource::Coinbase, FeedSource::Ftx], 0);
        book.update(price(FeedSource::Coinbase, 100, 0));
        book.update(price(FeedSource::Coinbase, 105, 1));
        assert_eq!(book.get(FeedSource::Coinbase).unwrap().value, 105);
        assert_eq!(book.stats().reporting_count, 1);
    }

    #[test]
    fn test_candidates_exclude_stale_and_zero() {
        let book = SourceBook::new(
            btc(),
            &[FeedSource::Coinbase, FeedSource::Binance, FeedSource::Bitstamp],
            0,
        );
        book.update(price(FeedSource::Coinbase, 10_000, 1_000));
        book.update(price(FeedSource::Binance, 0, 1_000));
        book.update(price(FeedSource::Bitstamp, 10_050, 0));

        let mut fresh = book.candidates(1_500, 1_000);
        fresh.sort();
        assert_eq!(fresh, vec![10_000, 10_050]);

        // Bitstamp ages out at exactly the window
        assert_eq!(book.candidates(1_000, 1_000), vec![10_000]);
    }

    #[test]
    fn test_stale_sources_include_silent_ones() {
        let book = SourceBook::new(btc(), &[FeedSource::Coinbase, FeedSource::Okx], 0);
        book.update(price(FeedSource::Coinbase, 1, 5_000));

        assert!(book.stale_sources(1_000, 1_000).is_empty());
        assert_eq!(book.stale_sources(1_001, 1_000), vec![FeedSource::Okx]);
        assert_eq!(
            book.stale_sources(6_001, 1_000),
            vec![FeedSource::Coinbase, FeedSource::Okx]
        );
    }

    #[test]
    fn test_concurrent_updates() {
        let book = Arc::new(SourceBook::new(btc(), FeedSource::exchanges(), 0));
        let handles: Vec<_> = FeedSource::exchanges()
            .iter()
            .copied()
            .map(|source| {
                let book = Arc::clone(&book);
                thread::spawn(move || {
                    for j in 0..100 {
                        book.update(price(source, j + 1, j as i64));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let stats = book.stats();
        assert_eq!(stats.update_count, 500);
        assert_eq!(stats.reporting_count, 5);
    }
}
