// =============================================================================
// Strategy Manager
// =============================================================================
//
// Orchestrates the strategy set as three distinct pure steps: selection
// (which strategies get to vote this tick), evaluation (run them all),
// direction filtering (drop anything the market context disallows), then
// folds the survivors into a single decision via consensus — agreement
// produces a synthetic `consensus` signal, disagreement falls back to the
// single best vote. Strategies recommended by the market context for the
// current regime get a confidence boost before consensus runs.

use tracing::debug;

use crate::domain::Signal;
use crate::strategies::{Strategy, StrategyContext};
use crate::types::Action;

/// Share of non-HOLD votes that must agree on a direction for the manager
/// to synthesize a consensus signal instead of falling back to the single
/// best vote.
const CONSENSUS_THRESHOLD: f64 = 0.6;
/// Confidence boost applied to a strategy's signal when the market context
/// recommends it for the current regime.
const RECOMMENDED_BOOST: f64 = 0.10;

pub struct StrategyManager {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyManager {
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    /// Run the full selection -> evaluation -> filtering -> consensus
    /// pipeline for one symbol on one tick.
    pub fn evaluate(&self, ctx: &StrategyContext<'_>) -> Signal {
        let selected = self.select(ctx);
        let evaluated = Self::run(&selected, ctx);
        let boosted = Self::apply_recommended_boost(evaluated, ctx);
        let filtered = Self::filter_by_direction(boosted, ctx);
        Self::consensus(ctx.symbol, filtered)
    }

    /// Selection: every enabled strategy participates. Strategies are free
    /// to hold themselves out via their own gating (Catamilho's symbol
    /// allowlist, NewsTrading's blocking window) — the manager's job here
    /// is only the static enabled/disabled switch.
    fn select<'a>(&'a self, _ctx: &StrategyContext<'_>) -> Vec<&'a dyn Strategy> {
        self.strategies.iter().filter(|s| s.is_enabled()).map(|s| s.as_ref()).collect()
    }

    fn run(selected: &[&dyn Strategy], ctx: &StrategyContext<'_>) -> Vec<Signal> {
        selected.iter().map(|s| s.analyze(ctx)).collect()
    }

    fn apply_recommended_boost(signals: Vec<Signal>, ctx: &StrategyContext<'_>) -> Vec<Signal> {
        signals
            .into_iter()
            .map(|mut sig| {
                if sig.action != Action::Hold && ctx.market.recommended_strategies.contains(&sig.strategy_name) {
                    sig.confidence = (sig.confidence + RECOMMENDED_BOOST).min(1.0);
                }
                sig
            })
            .collect()
    }

    /// Direction filtering: a signal surviving to this point that proposes
    /// a direction the market context disallows is downgraded to HOLD.
    /// Defense in depth — every strategy already checks `market.allows`.
    fn filter_by_direction(signals: Vec<Signal>, ctx: &StrategyContext<'_>) -> Vec<Signal> {
        signals
            .into_iter()
            .map(|sig| match sig.side() {
                Some(side) if !ctx.market.allows(side) => {
                    Signal::hold(&sig.symbol, &sig.strategy_name, "direction_filtered_by_market_context")
                }
                _ => sig,
            })
            .collect()
    }

    fn consensus(symbol: &str, signals: Vec<Signal>) -> Signal {
        let votes: Vec<&Signal> = signals.iter().filter(|s| s.action != Action::Hold).collect();
        if votes.is_empty() {
            return Signal::hold(symbol, "strategy_manager", "no_signal");
        }

        let buy_votes: Vec<&&Signal> = votes.iter().filter(|s| s.action == Action::Buy).collect();
        let sell_votes: Vec<&&Signal> = votes.iter().filter(|s| s.action == Action::Sell).collect();

        let (majority, majority_count) =
            if buy_votes.len() >= sell_votes.len() { (Action::Buy, buy_votes.len()) } else { (Action::Sell, sell_votes.len()) };

        let agreement = majority_count as f64 / votes.len() as f64;

        if agreement >= CONSENSUS_THRESHOLD {
            let aligned: Vec<&&Signal> = if majority == Action::Buy { buy_votes } else { sell_votes };
            let mean_confidence = aligned.iter().map(|s| s.confidence).sum::<f64>() / aligned.len() as f64;
            let sample = aligned[0];
            let names: Vec<&str> = aligned.iter().map(|s| s.strategy_name.as_str()).collect();
            debug!(symbol, agreement, agreeing = ?names, "strategy manager: consensus reached");
            return Signal::trade(
                symbol,
                "consensus",
                sample.side().expect("aligned vote always has a side"),
                mean_confidence,
                sample.entry_price,
                sample.stop_loss,
                sample.take_profit,
                format!("consensus_{}of{}", majority_count, votes.len()),
            );
        }

        // No consensus: fall back to the single highest-confidence vote.
        let best = votes.into_iter().max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap()).unwrap();
        debug!(symbol, strategy = best.strategy_name, confidence = best.confidence, "strategy manager: no consensus, using best vote");
        best.clone()
    }
}
