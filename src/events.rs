//! Append-only, bounded audit log.
//!
//! Every safety-relevant action (order created/blocked, kill switch,
//! safety-level change, reconciliation outcome) lands here. The buffer is a
//! FIFO capped at `max_memory`; when a durable mirror is enabled, appended
//! events are also queued for the store and drained by the owner.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::logging::{self, Domain, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "order.created")]
    OrderCreated,
    #[serde(rename = "order.validated")]
    OrderValidated,
    #[serde(rename = "order.blocked")]
    OrderBlocked,
    #[serde(rename = "order.placed")]
    OrderPlaced,
    #[serde(rename = "order.filled")]
    OrderFilled,
    #[serde(rename = "order.rejected")]
    OrderRejected,
    #[serde(rename = "order.cancelled")]
    OrderCancelled,
    #[serde(rename = "order.anomaly")]
    OrderAnomaly,
    #[serde(rename = "data.fetch")]
    DataFetch,
    #[serde(rename = "data.fallback")]
    DataFallback,
    #[serde(rename = "data.stale")]
    DataStale,
    #[serde(rename = "data.pit_violation")]
    DataPitViolation,
    #[serde(rename = "risk.violation")]
    RiskViolation,
    #[serde(rename = "risk.kill_switch")]
    RiskKillSwitch,
    #[serde(rename = "risk.safety_mode")]
    RiskSafetyMode,
    #[serde(rename = "recon.ok")]
    ReconOk,
    #[serde(rename = "recon.mismatch")]
    ReconMismatch,
    #[serde(rename = "recon.degraded")]
    ReconDegraded,
    #[serde(rename = "signal.generated")]
    SignalGenerated,
    #[serde(rename = "signal.refined")]
    SignalRefined,
    #[serde(rename = "system.start")]
    SystemStart,
    #[serde(rename = "system.error")]
    SystemError,
    #[serde(rename = "system.health")]
    SystemHealth,
    #[serde(rename = "user.action")]
    UserAction,
    #[serde(rename = "user.confirm")]
    UserConfirm,
}

impl EventType {
    pub const ALL: [EventType; 25] = [
        EventType::OrderCreated,
        EventType::OrderValidated,
        EventType::OrderBlocked,
        EventType::OrderPlaced,
        EventType::OrderFilled,
        EventType::OrderRejected,
        EventType::OrderCancelled,
        EventType::OrderAnomaly,
        EventType::DataFetch,
        EventType::DataFallback,
        EventType::DataStale,
        EventType::DataPitViolation,
        EventType::RiskViolation,
        EventType::RiskKillSwitch,
        EventType::RiskSafetyMode,
        EventType::ReconOk,
        EventType::ReconMismatch,
        EventType::ReconDegraded,
        EventType::SignalGenerated,
        EventType::SignalRefined,
        EventType::SystemStart,
        EventType::SystemError,
        EventType::SystemHealth,
        EventType::UserAction,
        EventType::UserConfirm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "order.created",
            EventType::OrderValidated => "order.validated",
            EventType::OrderBlocked => "order.blocked",
            EventType::OrderPlaced => "order.placed",
            EventType::OrderFilled => "order.filled",
            EventType::OrderRejected => "order.rejected",
            EventType::OrderCancelled => "order.cancelled",
            EventType::OrderAnomaly => "order.anomaly",
            EventType::DataFetch => "data.fetch",
            EventType::DataFallback => "data.fallback",
            EventType::DataStale => "data.stale",
            EventType::DataPitViolation => "data.pit_violation",
            EventType::RiskViolation => "risk.violation",
            EventType::RiskKillSwitch => "risk.kill_switch",
            EventType::RiskSafetyMode => "risk.safety_mode",
            EventType::ReconOk => "recon.ok",
            EventType::ReconMismatch => "recon.mismatch",
            EventType::ReconDegraded => "recon.degraded",
            EventType::SignalGenerated => "signal.generated",
            EventType::SignalRefined => "signal.refined",
            EventType::SystemStart => "system.start",
            EventType::SystemError => "system.error",
            EventType::SystemHealth => "system.health",
            EventType::UserAction => "user.action",
            EventType::UserConfirm => "user.confirm",
        }
    }

    /// Prefix before the dot: "order", "data", "risk", ...
    pub fn category(&self) -> &'static str {
        let s = self.as_str();
        s.split('.').next().unwrap_or(s)
    }

    pub fn parse(s: &str) -> Option<EventType> {
        EventType::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    fn log_domain(&self) -> Domain {
        match self.category() {
            "order" => Domain::Order,
            "data" => Domain::Data,
            "risk" => Domain::Risk,
            "recon" => Domain::Recon,
            "signal" => Domain::Signal,
            _ => Domain::System,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl EventSeverity {
    pub const ALL: [EventSeverity; 5] = [
        EventSeverity::Debug,
        EventSeverity::Info,
        EventSeverity::Warning,
        EventSeverity::Error,
        EventSeverity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventSeverity::Debug => "debug",
            EventSeverity::Info => "info",
            EventSeverity::Warning => "warning",
            EventSeverity::Error => "error",
            EventSeverity::Critical => "critical",
        }
    }

    fn log_level(&self) -> Level {
        match self {
            EventSeverity::Debug => Level::Debug,
            EventSeverity::Info => Level::Info,
            EventSeverity::Warning => Level::Warn,
            EventSeverity::Error => Level::Error,
            EventSeverity::Critical => Level::Fatal,
        }
    }
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit entry. Handed out only by shared reference once appended.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Lifetime sequence number assigned by the log; 0 until appended.
    pub seq: u64,
    pub event_type: EventType,
    pub severity: EventSeverity,
    pub message: String,
    pub source: String,
    pub ticker: Option<String>,
    pub order_id: Option<String>,
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, severity: EventSeverity, message: impl Into<String>) -> Self {
        Self {
            seq: 0,
            event_type,
            severity,
            message: message.into(),
            source: String::new(),
            ticker: None,
            order_id: None,
            data: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn from_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    pub fn for_ticker(mut self, ticker: &str) -> Self {
        self.ticker = Some(ticker.to_string());
        self
    }

    pub fn for_order(mut self, order_id: &str) -> Self {
        self.order_id = Some(order_id.to_string());
        self
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn to_dict(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// AND-combined filters for [`EventLog::query`]. `None` means "any".
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub event_type: Option<EventType>,
    pub severity: Option<EventSeverity>,
    pub ticker: Option<String>,
    pub order_id: Option<String>,
    pub limit: Option<usize>,
}

impl EventQuery {
    fn matches(&self, e: &Event) -> bool {
        self.event_type.map_or(true, |t| e.event_type == t)
            && self.severity.map_or(true, |s| e.severity == s)
            && self.ticker.as_deref().map_or(true, |t| e.ticker.as_deref() == Some(t))
            && self.order_id.as_deref().map_or(true, |o| e.order_id.as_deref() == Some(o))
    }
}

#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<Event>,
    max_memory: usize,
    next_seq: u64,
    mirror: Option<Vec<Event>>,
}

impl EventLog {
    pub fn new(max_memory: usize) -> Self {
        let max_memory = max_memory.max(1);
        Self {
            events: VecDeque::with_capacity(max_memory.min(1024)),
            max_memory,
            next_seq: 1,
            mirror: None,
        }
    }

    /// Queue every appended event for [`EventLog::drain_mirror`].
    pub fn enable_mirror(&mut self) {
        if self.mirror.is_none() {
            self.mirror = Some(Vec::new());
        }
    }

    pub fn drain_mirror(&mut self) -> Vec<Event> {
        self.mirror.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Append an event, evicting the oldest when full. Returns its sequence number.
    pub fn log(&mut self, mut event: Event) -> u64 {
        event.seq = self.next_seq;
        self.next_seq += 1;

        let mut fields = event.data.clone();
        fields.insert("msg".to_string(), Value::String(event.message.clone()));
        fields.insert("source".to_string(), Value::String(event.source.clone()));
        if let Some(t) = &event.ticker {
            fields.insert("ticker".to_string(), Value::String(t.clone()));
        }
        if let Some(o) = &event.order_id {
            fields.insert("order_id".to_string(), Value::String(o.clone()));
        }
        logging::log(
            event.severity.log_level(),
            event.event_type.log_domain(),
            event.event_type.as_str(),
            fields,
        );

        if let Some(queue) = self.mirror.as_mut() {
            queue.push(event.clone());
        }
        while self.events.len() >= self.max_memory {
            self.events.pop_front();
        }
        let seq = event.seq;
        self.events.push_back(event);
        seq
    }

    /// Info-severity shortcut.
    pub fn log_quick(&mut self, event_type: EventType, message: impl Into<String>) -> u64 {
        self.log(Event::new(event_type, EventSeverity::Info, message))
    }

    /// Newest first.
    pub fn query(&self, q: &EventQuery) -> Vec<&Event> {
        let limit = q.limit.unwrap_or(usize::MAX);
        self.events.iter().rev().filter(|e| q.matches(e)).take(limit).collect()
    }

    /// Newest first, all events whose type falls under `category` (e.g. "order").
    pub fn query_prefix(&self, category: &str, limit: usize) -> Vec<&Event> {
        self.events
            .iter()
            .rev()
            .filter(|e| e.event_type.category() == category)
            .take(limit)
            .collect()
    }

    pub fn get_recent(&self, limit: usize) -> Vec<&Event> {
        self.events.iter().rev().take(limit).collect()
    }

    /// Severity error or worse, newest first.
    pub fn get_errors(&self, limit: usize) -> Vec<&Event> {
        self.events
            .iter()
            .rev()
            .filter(|e| e.severity >= EventSeverity::Error)
            .take(limit)
            .collect()
    }

    /// One order's history, oldest first.
    pub fn get_order_trail(&self, order_id: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.order_id.as_deref() == Some(order_id))
            .collect()
    }

    pub fn count_by_type(&self) -> BTreeMap<EventType, usize> {
        let mut out = BTreeMap::new();
        for e in &self.events {
            *out.entry(e.event_type).or_insert(0) += 1;
        }
        out
    }

    pub fn count_by_severity(&self) -> BTreeMap<EventSeverity, usize> {
        let mut out = BTreeMap::new();
        for e in &self.events {
            *out.entry(e.severity).or_insert(0) += 1;
        }
        out
    }

    /// Currently retained events, never more than `max_memory`.
    pub fn total_events(&self) -> usize {
        self.events.len()
    }

    pub fn max_memory(&self) -> usize {
        self.max_memory
    }
}
