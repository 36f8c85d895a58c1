// =============================================================================
// Technical Analyzer
// =============================================================================
//
// Computes an `IndicatorFrame` for a symbol/timeframe pair from cached bars,
// then folds a handful of indicators into a single `TrendVerdict` by simple
// majority vote. Results are cached with a TTL so concurrent callers during
// the same tick share one computation instead of recomputing the same
// indicator stack per strategy (single-flight via the cache lock).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::domain::{Bar, IndicatorFrame, TrendVerdict};
use crate::error::EngineError;
use crate::indicators::{adx, atr, bollinger, donchian, ema, keltner, macd, rsi, sma, stochastic};
use crate::market_data::BarCache;
use crate::types::Timeframe;

const DEFAULT_TTL: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct CacheEntry {
    frame: IndicatorFrame,
    computed_at: Instant,
}

/// Computes and caches `IndicatorFrame`s, single-flighting concurrent
/// requests for the same (symbol, timeframe) within the TTL window.
pub struct TechnicalAnalyzer {
    bars: Arc<BarCache>,
    cache: Mutex<HashMap<(String, Timeframe), CacheEntry>>,
    ttl: Duration,
}

impl TechnicalAnalyzer {
    pub fn new(bars: Arc<BarCache>) -> Self {
        Self {
            bars,
            cache: Mutex::new(HashMap::new()),
            ttl: DEFAULT_TTL,
        }
    }

    /// Compute (or return a cached) `IndicatorFrame` for `symbol`/`timeframe`.
    pub fn analyze(&self, symbol: &str, timeframe: Timeframe) -> Result<IndicatorFrame, EngineError> {
        let key = (symbol.to_string(), timeframe);

        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(&key) {
                if entry.computed_at.elapsed() < self.ttl {
                    return Ok(entry.frame.clone());
                }
            }
        }

        // Held across the recompute so a second caller for the same key
        // blocks on the lock instead of recomputing in parallel.
        let mut cache = self.cache.lock();
        if let Some(entry) = cache.get(&key) {
            if entry.computed_at.elapsed() < self.ttl {
                return Ok(entry.frame.clone());
            }
        }

        let bars = self.bars.get(symbol, timeframe);
        let frame = compute_frame(symbol, timeframe, &bars)?;
        cache.insert(
            key,
            CacheEntry {
                frame: frame.clone(),
                computed_at: Instant::now(),
            },
        );
        debug!(symbol, %timeframe, "indicator frame recomputed");
        Ok(frame)
    }

    /// Analyze the same symbol across several timeframes at once.
    pub fn analyze_multi(&self, symbol: &str, timeframes: &[Timeframe]) -> HashMap<Timeframe, IndicatorFrame> {
        let mut out = HashMap::new();
        for &tf in timeframes {
            if let Ok(frame) = self.analyze(symbol, tf) {
                out.insert(tf, frame);
            }
        }
        out
    }

    /// Majority-vote trend verdict across EMA stack, MACD histogram, and ADX
    /// directional dominance for a single frame.
    pub fn trend_verdict(frame: &IndicatorFrame) -> TrendVerdict {
        let mut score = 0i32;

        if frame.ema9 > frame.ema21 {
            score += 1;
        } else if frame.ema9 < frame.ema21 {
            score -= 1;
        }
        if frame.ema21 > frame.ema50 {
            score += 1;
        } else if frame.ema21 < frame.ema50 {
            score -= 1;
        }
        if frame.ema50 > frame.ema200 {
            score += 1;
        } else if frame.ema50 < frame.ema200 {
            score -= 1;
        }
        if frame.macd_histogram > 0.0 {
            score += 1;
        } else if frame.macd_histogram < 0.0 {
            score -= 1;
        }
        if frame.adx14 > 25.0 {
            if frame.di_plus > frame.di_minus {
                score += 1;
            } else {
                score -= 1;
            }
        }

        TrendVerdict::from_score(score.clamp(-2, 2))
    }
}

/// Minimum bar count to build a frame at all. Indicators that need more
/// history than this (e.g. EMA200) degrade to a neutral default rather than
/// failing the whole frame — see each indicator module's own minimum.
const MIN_BARS: usize = 50;

/// How far back the regime classifier's ATR average and Bollinger-width
/// percentile look when there's enough history available.
const REGIME_LOOKBACK: usize = 100;

/// Mean ATR14 over a trailing window, recomputed at each bar close so the
/// regime classifier can compare "now" against "usual" rather than a fixed
/// literal.
fn historical_atr_average(bars: &[Bar], period: usize, lookback: usize) -> Option<f64> {
    let start = bars.len().saturating_sub(lookback);
    let mut values = Vec::new();
    for end in (start + period + 1)..=bars.len() {
        if let Some(v) = atr::calculate_atr(&bars[..end], period) {
            values.push(v);
        }
    }
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Fraction of the trailing Bollinger-width history at or below the current
/// reading; a low percentile signals a volatility squeeze.
fn bollinger_width_percentile(closes: &[f64], period: usize, lookback: usize) -> f64 {
    let start = closes.len().saturating_sub(lookback);
    let mut widths = Vec::new();
    for end in (start + period)..=closes.len() {
        if let Some(bb) = bollinger::calculate_bollinger(&closes[..end], period, 2.0) {
            widths.push(bb.width);
        }
    }
    let Some(&current) = widths.last() else {
        return 0.5;
    };
    let below = widths.iter().filter(|&&w| w <= current).count();
    below as f64 / widths.len() as f64
}

fn compute_frame(symbol: &str, timeframe: Timeframe, bars: &[Bar]) -> Result<IndicatorFrame, EngineError> {
    if bars.len() < MIN_BARS {
        return Err(EngineError::DataInsufficient(format!(
            "{symbol}/{timeframe}: need at least {MIN_BARS} bars, have {}",
            bars.len()
        )));
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let close = *closes.last().unwrap();

    let ema9 = *ema::calculate_ema(&closes, 9).last().unwrap_or(&close);
    let ema21 = *ema::calculate_ema(&closes, 21).last().unwrap_or(&close);
    let ema50 = *ema::calculate_ema(&closes, 50).last().unwrap_or(&close);
    let ema200 = *ema::calculate_ema(&closes, 200).last().unwrap_or(&close);
    let sma20 = sma::calculate_sma(&closes, 20).unwrap_or(close);

    let rsi14 = rsi::current_rsi(&closes, 14).map(|(v, _)| v).unwrap_or(50.0);

    let macd_value = macd::calculate(&closes);
    let (macd_line, macd_signal, macd_histogram) = macd_value
        .map(|m| (m.line, m.signal, m.histogram))
        .unwrap_or((0.0, 0.0, 0.0));

    let atr14 = atr::calculate(bars).unwrap_or(0.0);
    let atr_pct = atr::calculate_atr_pct(bars, 14).unwrap_or(0.0);
    let atr_avg = historical_atr_average(bars, 14, REGIME_LOOKBACK).unwrap_or(atr14);
    let bb_width_percentile = bollinger_width_percentile(&closes, 20, REGIME_LOOKBACK);

    let adx_full = adx::calculate_adx_full(bars, 14);
    let (adx14, di_plus, di_minus) = adx_full
        .map(|a| (a.adx, a.di_plus, a.di_minus))
        .unwrap_or((0.0, 0.0, 0.0));

    let bb = bollinger::calculate_bollinger(&closes, 20, 2.0);
    let (bb_upper, bb_middle, bb_lower, bb_width) = bb
        .map(|b| (b.upper, b.middle, b.lower, b.width))
        .unwrap_or((close, close, close, 0.0));

    let stoch = stochastic::calculate_stochastic(bars, 14, 3);
    let (stoch_k, stoch_d) = stoch.map(|s| (s.k, s.d)).unwrap_or((50.0, 50.0));

    let dc = donchian::calculate_donchian(bars, 20);
    let (donchian_upper, donchian_lower) = dc.map(|d| (d.upper, d.lower)).unwrap_or((close, close));

    let kc = keltner::calculate_keltner(bars, 20, 10, 2.0);
    let (keltner_upper, keltner_lower) = kc.map(|k| (k.upper, k.lower)).unwrap_or((close, close));

    Ok(IndicatorFrame {
        symbol: symbol.to_string(),
        timeframe,
        computed_at: chrono::Utc::now(),
        close,
        ema9,
        ema21,
        ema50,
        ema200,
        sma20,
        rsi14,
        macd_line,
        macd_signal,
        macd_histogram,
        atr14,
        atr_pct,
        atr_avg,
        bb_width_percentile,
        adx14,
        di_plus,
        di_minus,
        bb_upper,
        bb_middle,
        bb_lower,
        bb_width,
        stoch_k,
        stoch_d,
        donchian_upper,
        donchian_lower,
        keltner_upper,
        keltner_lower,
    })
}
