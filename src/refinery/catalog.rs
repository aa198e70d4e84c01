use serde::Serialize;

use SignalCategory::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalCategory {
    Technical,
    Momentum,
    Value,
    Flow,
    Sentiment,
    Macro,
    Strategy,
}

impl SignalCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalCategory::Technical => "technical",
            SignalCategory::Momentum => "momentum",
            SignalCategory::Value => "value",
            SignalCategory::Flow => "flow",
            SignalCategory::Sentiment => "sentiment",
            SignalCategory::Macro => "macro",
            SignalCategory::Strategy => "strategy",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SignalMeta {
    pub name: &'static str,
    pub category: SignalCategory,
    /// Producer module in the signal pipeline.
    pub source_module: &'static str,
}

const fn meta(name: &'static str, category: SignalCategory, source_module: &'static str) -> SignalMeta {
    SignalMeta { name, category, source_module }
}

/// Every signal the production pipeline emits.
pub static SIGNAL_CATALOG: [SignalMeta; 46] = [
    meta("rsi_14", Technical, "features.technical"),
    meta("rsi_7", Technical, "features.technical"),
    meta("macd_histogram", Technical, "features.technical"),
    meta("macd_signal_cross", Technical, "features.technical"),
    meta("bb_position", Technical, "features.technical"),
    meta("bb_width", Technical, "features.technical"),
    meta("stochastic_k", Technical, "features.technical"),
    meta("stochastic_d", Technical, "features.technical"),
    meta("obv_trend", Technical, "features.technical"),
    meta("atr_pct", Technical, "features.technical"),
    meta("adx", Technical, "features.technical"),
    meta("cci", Technical, "features.technical"),
    meta("williams_r", Technical, "features.technical"),
    meta("ichimoku_signal", Technical, "features.technical"),
    meta("volume_ma_ratio", Technical, "features.technical"),
    meta("momentum_1w", Momentum, "signal.scoring"),
    meta("momentum_1m", Momentum, "signal.scoring"),
    meta("momentum_3m", Momentum, "signal.scoring"),
    meta("roc_5d", Momentum, "features.technical"),
    meta("roc_20d", Momentum, "features.technical"),
    meta("volatility_breakout", Momentum, "signal.volatility_breakout"),
    meta("gap_signal", Momentum, "signal.gap_trader"),
    meta("surge_score", Momentum, "signal.surge_detector"),
    meta("per_relative", Value, "signal.factor_scoring"),
    meta("pbr_relative", Value, "signal.factor_scoring"),
    meta("roe_rank", Value, "signal.factor_scoring"),
    meta("dividend_yield", Value, "signal.factor_scoring"),
    meta("earnings_surprise", Value, "signal.earnings_tracker"),
    meta("financial_health", Value, "signal.financial_analyzer"),
    meta("foreign_net_flow", Flow, "signal.foreign_predictor"),
    meta("institutional_flow", Flow, "signal.institutional_tracker"),
    meta("short_interest", Flow, "signal.short_selling"),
    meta("margin_balance", Flow, "signal.margin_balance"),
    meta("program_trade", Flow, "signal.contrarian_signal"),
    meta("stealth_accumulation", Flow, "signal.stealth_accumulation"),
    meta("news_sentiment", Sentiment, "ml.sentiment"),
    meta("market_psychology", Sentiment, "signal.market_psychology"),
    meta("vix_level", Macro, "signal.market_regime"),
    meta("market_regime", Macro, "signal.market_regime"),
    meta("sector_momentum", Macro, "core.sector_rotation"),
    meta("fx_signal", Macro, "signal.fx_strategy"),
    meta("swing_entry", Strategy, "signal.swing_trader"),
    meta("pair_spread", Strategy, "signal.pair_signal"),
    meta("tenbagger_score", Strategy, "signal.tenbagger_hunter"),
    meta("contrarian_composite", Strategy, "signal.contrarian_signal"),
    meta("consensus_divergence", Strategy, "signal.consensus_tracker"),
];

pub fn get_signal_catalog() -> &'static [SignalMeta] {
    &SIGNAL_CATALOG
}

pub fn lookup(name: &str) -> Option<&'static SignalMeta> {
    SIGNAL_CATALOG.iter().find(|m| m.name == name)
}

pub fn by_category(category: SignalCategory) -> Vec<&'static SignalMeta> {
    SIGNAL_CATALOG.iter().filter(|m| m.category == category).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn names_are_unique() {
        let names: BTreeSet<&str> = SIGNAL_CATALOG.iter().map(|m| m.name).collect();
        assert_eq!(names.len(), 46);
        assert_eq!(names.len(), SIGNAL_CATALOG.len());
    }

    #[test]
    fn lookup_and_categories() {
        assert_eq!(lookup("rsi_14").unwrap().category, SignalCategory::Technical);
        assert!(lookup("astrology").is_none());
        assert_eq!(by_category(SignalCategory::Technical).len(), 15);
        assert_eq!(by_category(SignalCategory::Momentum).len(), 8);
        assert_eq!(by_category(SignalCategory::Strategy).len(), 5);
        assert_eq!(by_category(SignalCategory::Value).len(), 6);
        assert_eq!(by_category(SignalCategory::Flow).len(), 6);
    }
}
