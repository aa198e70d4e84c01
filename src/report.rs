//! Plain-text summaries for the chat/bot layer. Pure functions over
//! snapshots; nothing here mutates state.

use crate::events::{EventLog, EventSeverity};
use crate::orders::ledger::LedgerStats;
use crate::orders::state_machine::{ManagedOrder, OrderState};
use crate::pit::registry::SourceSummary;
use crate::pit::validator::PitViolation;
use crate::reconcile::positions::{ReconStatus, ReconciliationReport};
use crate::reconcile::safety::{SafetyLevel, SafetyStatus};
use crate::refinery::pruner::RefineryReport;
use crate::replay::engine::{ReplayDashboard, SlippageAnalysis};

const RULE: &str = "-------------------------";

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

fn pct(v: f64) -> String {
    format!("{:.2}%", v * 100.0)
}

pub fn format_reconciliation_report(report: &ReconciliationReport) -> String {
    let mut out = String::new();
    match report.status {
        ReconStatus::Ok => {
            out.push_str(&format!(
                "Reconciliation OK: {} positions match\n",
                report.matched_positions
            ));
        }
        ReconStatus::Mismatch => {
            out.push_str(&format!("Reconciliation MISMATCH ({} issues)\n", report.mismatch_count));
            out.push_str(RULE);
            out.push('\n');
            for m in &report.mismatches {
                let label = if m.name.is_empty() { m.ticker.clone() } else { format!("{} ({})", m.name, m.ticker) };
                out.push_str(&format!("[{}] {} {}: {}\n", m.severity.as_str(), m.mismatch_type, label, m.description));
            }
            out.push_str(&format!("Matched: {}\n", report.matched_positions));
        }
    }
    if report.degraded {
        out.push_str("Broker snapshot unavailable; broker side treated as empty\n");
    }
    if report.safety_level_before != report.safety_level_after {
        out.push_str(&format!(
            "Safety level: {} -> {}\n",
            report.safety_level_before, report.safety_level_after
        ));
    } else {
        out.push_str(&format!("Safety level: {}\n", report.safety_level_after));
    }
    if report.has_critical {
        out.push_str("Kill switch armed: trading halted until cleared manually\n");
    }
    out
}

pub fn format_safety_status(status: &SafetyStatus) -> String {
    let mut out = String::new();
    out.push_str(&format!("Safety level: {} ({}/3)\n", status.level, status.level_value));
    out.push_str(&format!("Trading allowed: {}\n", yes_no(status.trading_allowed)));
    out.push_str(&format!("Buy allowed:     {}\n", yes_no(status.buy_allowed)));
    out.push_str(&format!("Sell allowed:    {}\n", yes_no(status.sell_allowed)));
    let ks = &status.kill_switch;
    if ks.active {
        let by = ks.activated_by.map(|a| a.as_str()).unwrap_or("unknown");
        out.push_str(&format!("Kill switch: ACTIVE ({}, by {})\n", ks.reason, by));
        if let Some(at) = ks.activated_at {
            out.push_str(&format!("  since {}\n", at.format("%Y-%m-%d %H:%M:%S")));
        }
    } else {
        out.push_str("Kill switch: off\n");
    }
    if status.level >= SafetyLevel::Safe {
        out.push_str("New buys are suspended\n");
    }
    out
}

pub fn format_order_status(order: &ManagedOrder) -> String {
    let mut out = String::new();
    let label = if order.name.is_empty() { order.ticker.clone() } else { format!("{} ({})", order.name, order.ticker) };
    out.push_str(&format!("Order {}\n", order.order_id));
    out.push_str(&format!("{} {} x{} @ {:.0}\n", label, order.side, order.quantity, order.price));
    out.push_str(&format!("State: {}\n", order.state));
    if order.filled_quantity > 0 {
        out.push_str(&format!(
            "Filled: {}/{} avg {:.0}\n",
            order.filled_quantity, order.quantity, order.avg_fill_price
        ));
    }
    if let Some(b) = &order.broker_order_id {
        out.push_str(&format!("Broker id: {}\n", b));
    }
    if order.state == OrderState::Blocked {
        if let Some(reason) = &order.block_reason {
            out.push_str(&format!("Blocked: {}\n", reason));
        }
    }
    out
}

pub fn format_order_ledger_summary(stats: &LedgerStats, active: &[&ManagedOrder]) -> String {
    let mut out = String::new();
    out.push_str("Order ledger\n");
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!(
        "Total {} | today {} | active {} | filled {} | blocked {}\n",
        stats.total_orders, stats.today_orders, stats.active_orders, stats.filled_orders, stats.blocked_orders
    ));
    if !active.is_empty() {
        out.push_str("Active:\n");
        for o in active.iter().take(10) {
            out.push_str(&format!(
                "  {} {} {} {}/{} [{}]\n",
                o.order_id, o.ticker, o.side, o.filled_quantity, o.quantity, o.state
            ));
        }
    }
    out
}

pub fn format_slippage_report(s: &SlippageAnalysis) -> String {
    if s.total_trades == 0 {
        return "Slippage: no executions recorded\n".to_string();
    }
    let mut out = String::new();
    out.push_str(&format!("Slippage over {} trades\n", s.total_trades));
    out.push_str(&format!("  average (raw):  {}\n", pct(s.avg_slippage_pct)));
    out.push_str(&format!("  average (cost): {}\n", pct(s.avg_cost_slippage_pct)));
    out.push_str(&format!("  worst:          {}\n", pct(s.max_slippage_pct)));
    out.push_str(&format!("  total cost:     {:.0}\n", s.total_slippage_cost));
    for (strategy, v) in &s.by_strategy {
        out.push_str(&format!("  {}: {}\n", strategy, pct(*v)));
    }
    out
}

pub fn format_replay_dashboard(d: &ReplayDashboard) -> String {
    let mut out = String::new();
    out.push_str("Execution replay\n");
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!(
        "Live trades {} | backtest predictions {}\n",
        d.total_live_trades, d.total_bt_predictions
    ));
    out.push_str(&format!(
        "Sharpe live {:.2} vs backtest {:.2} (deflated {:.2}, {} strategies)\n",
        d.overall_live_sharpe, d.overall_bt_sharpe, d.deflated_sharpe, d.strategies_tested
    ));
    out.push_str(&format!("Direction accuracy: {:.0}%\n", d.accuracy_rate * 100.0));
    out.push('\n');
    out.push_str(&format_slippage_report(&d.slippage));
    let drifting: Vec<_> = d.drift_results.iter().filter(|r| r.is_drifting).collect();
    if !drifting.is_empty() {
        out.push_str("\nDrifting strategies:\n");
        for r in drifting {
            out.push_str(&format!(
                "  {} score {:.2} (live Sharpe {:.2}, backtest {:.2})\n",
                r.strategy, r.drift_score, r.live_sharpe, r.bt_sharpe
            ));
        }
    }
    if !d.recommendations.is_empty() {
        out.push('\n');
        for rec in &d.recommendations {
            out.push_str(&format!("* {}\n", rec));
        }
    }
    out
}

pub fn format_refinery_report(r: &RefineryReport) -> String {
    if r.total_signals == 0 {
        return "Signal refinery: no data\n".to_string();
    }
    let mut out = String::new();
    out.push_str("Signal refinery\n");
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!("Total {} -> selected {}\n", r.total_signals, r.selected_signals));
    out.push_str(&format!("Removed {} (|r| >= {:.2})\n", r.removed_signals, r.threshold));
    if !r.clusters.is_empty() {
        out.push_str(&format!("Clusters: {}\n", r.clusters.len()));
        for c in r.clusters.iter().take(5) {
            let head: Vec<&str> = c.signals.iter().take(3).map(|s| s.as_str()).collect();
            let more = if c.signals.len() > 3 { "..." } else { "" };
            out.push_str(&format!("  [{}] {}{} -> {}\n", c.cluster_id, head.join(", "), more, c.representative));
        }
    }
    let top: Vec<_> = r.quality_scores.iter().filter(|q| q.is_selected).take(10).collect();
    if !top.is_empty() {
        out.push_str("Top signals:\n");
        for q in top {
            out.push_str(&format!("  {}: {:.1}\n", q.name, q.score));
        }
    }
    for rec in r.recommendations.iter().take(3) {
        out.push_str(&format!("* {}\n", rec));
    }
    out
}

pub fn format_event_summary(log: &EventLog) -> String {
    let mut out = String::new();
    out.push_str(&format!("Events retained: {}/{}\n", log.total_events(), log.max_memory()));
    let by_sev = log.count_by_severity();
    let sev: Vec<String> = EventSeverity::ALL
        .iter()
        .filter_map(|s| by_sev.get(s).map(|n| format!("{} {}", s.as_str(), n)))
        .collect();
    if !sev.is_empty() {
        out.push_str(&format!("By severity: {}\n", sev.join(", ")));
    }
    let mut by_type: Vec<_> = log.count_by_type().into_iter().collect();
    by_type.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (t, n) in by_type.into_iter().take(8) {
        out.push_str(&format!("  {}: {}\n", t, n));
    }
    out
}

pub fn format_recent_events(log: &EventLog, limit: usize) -> String {
    let recent = log.get_recent(limit);
    if recent.is_empty() {
        return "No events\n".to_string();
    }
    let mut out = String::new();
    for e in recent {
        let mut line = format!(
            "{} [{}] {} {}",
            e.timestamp.format("%H:%M:%S"),
            e.severity.as_str(),
            e.event_type,
            e.message
        );
        if let Some(t) = &e.ticker {
            line.push_str(&format!(" ({})", t));
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

pub fn format_pit_status(violations: &[PitViolation]) -> String {
    if violations.is_empty() {
        return "PIT integrity: clean\n".to_string();
    }
    let mut out = String::new();
    out.push_str("PIT integrity check\n");
    out.push_str(RULE);
    out.push('\n');
    let (critical, warnings): (Vec<_>, Vec<_>) = violations.iter().partition(|v| v.is_critical());
    if !critical.is_empty() {
        out.push_str("Critical:\n");
        for v in critical {
            out.push_str(&format!("  {}: {}\n", v.kind.as_str(), v.description));
        }
    }
    if !warnings.is_empty() {
        out.push_str("Warnings:\n");
        for v in warnings {
            out.push_str(&format!("  {}: {}\n", v.kind.as_str(), v.description));
        }
    }
    out
}

pub fn format_source_summary(summary: &[SourceSummary]) -> String {
    if summary.is_empty() {
        return "Data sources: none registered\n".to_string();
    }
    let mut out = String::new();
    out.push_str("Data sources\n");
    out.push_str(RULE);
    out.push('\n');
    for s in summary {
        out.push_str(&format!(
            "{}: reliability {:.0}%, {:.0}ms avg, {} fetches, {} tickers\n",
            s.source,
            s.reliability * 100.0,
            s.avg_latency_ms,
            s.total_fetches,
            s.tickers
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::reconcile::positions::{Position, PositionReconciler};
    use crate::reconcile::safety::SafetyModeManager;

    #[test]
    fn reconciliation_text_mentions_phantom_and_lockdown() {
        let mut safety = SafetyModeManager::new();
        let mut events = EventLog::new(50);
        let mut recon = PositionReconciler::new(0.05);
        let report = recon.reconcile(&[], &[Position::new("005930", 100, 75_000.0)], &mut safety, &mut events);
        let text = format_reconciliation_report(&report);
        assert!(text.contains("MISMATCH"));
        assert!(text.contains("phantom_position"));
        assert!(text.contains("lockdown"));
        assert!(text.contains("Kill switch armed"));

        let status = format_safety_status(&safety.get_status());
        assert!(status.contains("ACTIVE"));
        assert!(status.contains("reconciliation"));
    }

    #[test]
    fn empty_inputs_have_short_forms() {
        assert!(format_pit_status(&[]).contains("clean"));
        assert!(format_source_summary(&[]).contains("none"));
        assert!(format_recent_events(&EventLog::new(5), 5).contains("No events"));
    }

    #[test]
    fn event_summary_counts() {
        let mut log = EventLog::new(10);
        log.log_quick(EventType::SystemStart, "boot");
        log.log_quick(EventType::SystemStart, "boot again");
        let text = format_event_summary(&log);
        assert!(text.contains("2/10"));
        assert!(text.contains("system.start: 2"));
    }
}
