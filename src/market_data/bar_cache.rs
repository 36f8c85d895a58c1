// =============================================================================
// Bar Cache — per (symbol, timeframe) ring buffer of closed bars
// =============================================================================
//
// Fed by a poller task that periodically calls `BrokerGateway::rates` and
// merges the result in. Readers (the analyzer, strategies) only ever see
// closed bars.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::domain::Bar;
use crate::types::Timeframe;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BarKey {
    symbol: String,
    timeframe: Timeframe,
}

/// Thread-safe ring buffer of bars, keyed by symbol + timeframe.
pub struct BarCache {
    buffers: RwLock<HashMap<BarKey, VecDeque<Bar>>>,
    max_bars: usize,
}

impl BarCache {
    pub fn new(max_bars: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_bars,
        }
    }

    /// Merge freshly polled bars into the cache. Bars are expected oldest
    /// first; duplicates (same `time`) are skipped.
    pub fn merge(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        let key = BarKey { symbol: symbol.to_string(), timeframe };
        let mut map = self.buffers.write();
        let buf = map.entry(key).or_insert_with(VecDeque::new);

        for bar in bars {
            if buf.back().map(|last| last.time == bar.time).unwrap_or(false) {
                // Replace the in-progress last bar with the refreshed close.
                buf.pop_back();
                buf.push_back(bar);
            } else if buf.back().map(|last| bar.time > last.time).unwrap_or(true) {
                buf.push_back(bar);
            }
            // Strictly older bars than what we already hold are ignored.
        }

        while buf.len() > self.max_bars {
            buf.pop_front();
        }
    }

    /// Snapshot of all cached bars for `symbol`/`timeframe`, oldest first.
    pub fn get(&self, symbol: &str, timeframe: Timeframe) -> Vec<Bar> {
        let key = BarKey { symbol: symbol.to_string(), timeframe };
        self.buffers
            .read()
            .get(&key)
            .map(|buf| buf.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn closes(&self, symbol: &str, timeframe: Timeframe) -> Vec<f64> {
        self.get(symbol, timeframe).iter().map(|b| b.close).collect()
    }

    pub fn last_close(&self, symbol: &str, timeframe: Timeframe) -> Option<f64> {
        let key = BarKey { symbol: symbol.to_string(), timeframe };
        self.buffers.read().get(&key).and_then(|buf| buf.back()).map(|b| b.close)
    }

    pub fn count(&self, symbol: &str, timeframe: Timeframe) -> usize {
        let key = BarKey { symbol: symbol.to_string(), timeframe };
        self.buffers.read().get(&key).map(|buf| buf.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn bar(t: chrono::DateTime<Utc>, close: f64) -> Bar {
        Bar { time: t, open: close, high: close, low: close, close, volume: 1.0 }
    }

    #[test]
    fn merge_appends_and_trims() {
        let cache = BarCache::new(3);
        let base = Utc::now();
        for i in 0..5 {
            cache.merge("EURUSD", Timeframe::M1, vec![bar(base + Duration::minutes(i), i as f64)]);
        }
        assert_eq!(cache.count("EURUSD", Timeframe::M1), 3);
        let closes = cache.closes("EURUSD", Timeframe::M1);
        assert_eq!(closes, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn merge_replaces_in_progress_bar() {
        let cache = BarCache::new(10);
        let t = Utc::now();
        cache.merge("EURUSD", Timeframe::M1, vec![bar(t, 1.0)]);
        cache.merge("EURUSD", Timeframe::M1, vec![bar(t, 1.5)]);
        assert_eq!(cache.count("EURUSD", Timeframe::M1), 1);
        assert_eq!(cache.last_close("EURUSD", Timeframe::M1), Some(1.5));
    }

    #[test]
    fn independent_keys_per_symbol_and_timeframe() {
        let cache = BarCache::new(10);
        let t = Utc::now();
        cache.merge("EURUSD", Timeframe::M1, vec![bar(t, 1.0)]);
        cache.merge("EURUSD", Timeframe::H1, vec![bar(t, 2.0)]);
        cache.merge("GBPUSD", Timeframe::M1, vec![bar(t, 3.0)]);
        assert_eq!(cache.last_close("EURUSD", Timeframe::M1), Some(1.0));
        assert_eq!(cache.last_close("EURUSD", Timeframe::H1), Some(2.0));
        assert_eq!(cache.last_close("GBPUSD", Timeframe::M1), Some(3.0));
    }

    #[test]
    fn empty_cache_returns_none() {
        let cache = BarCache::new(10);
        assert_eq!(cache.last_close("EURUSD", Timeframe::M1), None);
        assert!(cache.get("EURUSD", Timeframe::M1).is_empty());
    }
}
