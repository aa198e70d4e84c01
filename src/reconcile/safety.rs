//! Kill switch and the four-rung safety ladder.
//!
//! The ladder gates which sides may trade; the kill switch gates trading as
//! a whole. Reaching Lockdown always arms the switch, but nothing except an
//! explicit `deactivate_kill_switch` ever disarms it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::events::{Event, EventLog, EventSeverity, EventType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Normal = 0,
    Caution = 1,
    Safe = 2,
    Lockdown = 3,
}

impl SafetyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyLevel::Normal => "normal",
            SafetyLevel::Caution => "caution",
            SafetyLevel::Safe => "safe",
            SafetyLevel::Lockdown => "lockdown",
        }
    }

    pub fn value(&self) -> u8 {
        *self as u8
    }

    pub fn from_value(v: u8) -> Option<SafetyLevel> {
        match v {
            0 => Some(SafetyLevel::Normal),
            1 => Some(SafetyLevel::Caution),
            2 => Some(SafetyLevel::Safe),
            3 => Some(SafetyLevel::Lockdown),
            _ => None,
        }
    }

    /// One rung up, saturating at Lockdown.
    pub fn next(&self) -> SafetyLevel {
        SafetyLevel::from_value(self.value() + 1).unwrap_or(SafetyLevel::Lockdown)
    }

    /// One rung down, saturating at Normal.
    pub fn prev(&self) -> SafetyLevel {
        self.value()
            .checked_sub(1)
            .and_then(SafetyLevel::from_value)
            .unwrap_or(SafetyLevel::Normal)
    }

    pub fn is_buy_allowed(&self) -> bool {
        *self <= SafetyLevel::Caution
    }

    /// De-risking stays possible under Caution and Safe.
    pub fn is_sell_allowed(&self) -> bool {
        *self < SafetyLevel::Lockdown
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activator {
    /// Direct escalation to Lockdown through the safety ladder.
    SafetyMode,
    /// Critical reconciliation mismatch.
    Reconciliation,
    Manual,
}

impl Activator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Activator::SafetyMode => "safety_mode",
            Activator::Reconciliation => "reconciliation",
            Activator::Manual => "manual",
        }
    }
}

impl fmt::Display for Activator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SwitchRecord {
    Activate {
        reason: String,
        by: Activator,
        at: DateTime<Utc>,
    },
    Deactivate {
        reason: String,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct KillSwitchStatus {
    pub active: bool,
    pub reason: String,
    pub activated_by: Option<Activator>,
    pub activated_at: Option<DateTime<Utc>>,
    pub history_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    active: bool,
    reason: String,
    activated_by: Option<Activator>,
    activated_at: Option<DateTime<Utc>>,
    history: Vec<SwitchRecord>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn activated_by(&self) -> Option<Activator> {
        self.activated_by
    }

    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.activated_at
    }

    pub fn history(&self) -> &[SwitchRecord] {
        &self.history
    }

    /// Arms the switch. Returns false, keeping the original reason and
    /// activator, if it was already active.
    pub fn activate(&mut self, reason: &str, by: Activator) -> bool {
        if self.active {
            return false;
        }
        let now = Utc::now();
        self.active = true;
        self.reason = reason.to_string();
        self.activated_by = Some(by);
        self.activated_at = Some(now);
        self.history.push(SwitchRecord::Activate { reason: reason.to_string(), by, at: now });
        true
    }

    pub fn deactivate(&mut self, reason: &str) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.reason.clear();
        self.activated_by = None;
        self.activated_at = None;
        self.history.push(SwitchRecord::Deactivate { reason: reason.to_string(), at: Utc::now() });
        true
    }

    pub fn get_status(&self) -> KillSwitchStatus {
        KillSwitchStatus {
            active: self.active,
            reason: self.reason.clone(),
            activated_by: self.activated_by,
            activated_at: self.activated_at,
            history_count: self.history.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelChange {
    pub from: SafetyLevel,
    pub to: SafetyLevel,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetyStatus {
    pub level: SafetyLevel,
    pub level_value: u8,
    pub trading_allowed: bool,
    pub buy_allowed: bool,
    pub sell_allowed: bool,
    pub kill_switch: KillSwitchStatus,
    pub history_count: usize,
}

/// The single shared trading gate. Owns the kill switch; every order
/// attempt reads it live.
#[derive(Debug, Clone)]
pub struct SafetyModeManager {
    level: SafetyLevel,
    kill_switch: KillSwitch,
    history: Vec<LevelChange>,
}

impl Default for SafetyModeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyModeManager {
    pub fn new() -> Self {
        Self { level: SafetyLevel::Normal, kill_switch: KillSwitch::new(), history: Vec::new() }
    }

    pub fn level(&self) -> SafetyLevel {
        self.level
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }

    pub fn history(&self) -> &[LevelChange] {
        &self.history
    }

    pub fn is_trading_allowed(&self) -> bool {
        !self.kill_switch.is_active()
    }

    pub fn is_buy_allowed(&self) -> bool {
        self.is_trading_allowed() && self.level.is_buy_allowed()
    }

    pub fn is_sell_allowed(&self) -> bool {
        self.is_trading_allowed() && self.level.is_sell_allowed()
    }

    /// Jump directly to `level`. Lockdown arms the kill switch as
    /// `safety_mode` unless it is already armed. Never disarms it.
    pub fn set_level(&mut self, level: SafetyLevel, reason: &str, events: &mut EventLog) -> SafetyLevel {
        let old = self.level;
        self.level = level;
        self.history.push(LevelChange { from: old, to: level, reason: reason.to_string(), at: Utc::now() });

        if old != level {
            let severity = if level > old { EventSeverity::Warning } else { EventSeverity::Info };
            events.log(
                Event::new(
                    EventType::RiskSafetyMode,
                    severity,
                    format!("safety level {} -> {}: {}", old, level, reason),
                )
                .from_source("safety")
                .with("from", json!(old.as_str()))
                .with("to", json!(level.as_str())),
            );
        }

        if level == SafetyLevel::Lockdown {
            self.arm(&format!("lockdown: {}", reason), Activator::SafetyMode, events);
        }
        self.level
    }

    pub fn escalate(&mut self, reason: &str, events: &mut EventLog) -> SafetyLevel {
        if self.level < SafetyLevel::Lockdown {
            self.set_level(self.level.next(), reason, events);
        }
        self.level
    }

    pub fn de_escalate(&mut self, reason: &str, events: &mut EventLog) -> SafetyLevel {
        if self.level > SafetyLevel::Normal {
            self.set_level(self.level.prev(), reason, events);
        }
        self.level
    }

    /// Arm the kill switch directly. Returns false if it was already armed.
    pub fn arm(&mut self, reason: &str, by: Activator, events: &mut EventLog) -> bool {
        let armed = self.kill_switch.activate(reason, by);
        if armed {
            events.log(
                Event::new(EventType::RiskKillSwitch, EventSeverity::Critical, format!("kill switch armed: {}", reason))
                    .from_source("safety")
                    .with("action", json!("activate"))
                    .with("activated_by", json!(by.as_str())),
            );
        }
        armed
    }

    /// The only path that disarms the kill switch. Leaves the level alone.
    pub fn deactivate_kill_switch(&mut self, reason: &str, events: &mut EventLog) -> bool {
        let previous = self.kill_switch.activated_by();
        let cleared = self.kill_switch.deactivate(reason);
        if cleared {
            events.log(
                Event::new(EventType::RiskKillSwitch, EventSeverity::Warning, format!("kill switch cleared: {}", reason))
                    .from_source("safety")
                    .with("action", json!("deactivate"))
                    .with("activated_by", json!(previous.map(|a| a.as_str()))),
            );
        }
        cleared
    }

    pub fn get_status(&self) -> SafetyStatus {
        SafetyStatus {
            level: self.level,
            level_value: self.level.value(),
            trading_allowed: self.is_trading_allowed(),
            buy_allowed: self.is_buy_allowed(),
            sell_allowed: self.is_sell_allowed(),
            kill_switch: self.kill_switch.get_status(),
            history_count: self.history.len(),
        }
    }
}
