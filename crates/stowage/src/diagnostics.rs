//! Structured diagnostic events emitted by the services.
//!
//! Emission is synchronous and infallible; nothing a sink does feeds back
//! into service behavior.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, warn};

/// Storage tier an event happened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Volatile,
    File,
    Record,
    KeyValue,
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Volatile => "volatile",
            Self::File => "file",
            Self::Record => "record",
            Self::KeyValue => "key_value",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Delete,
    NotFound,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::NotFound => "not_found",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticEvent {
    pub action: Action,
    pub tier: TierKind,
    /// Display form of the boundary, e.g. `domain/sub_domain`.
    pub boundary: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub trait DiagnosticsSink: Send + Sync {
    fn emit(&self, event: &DiagnosticEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn emit(&self, event: &DiagnosticEvent) {
        match &event.error {
            Some(error) => warn!(
                action = %event.action,
                tier = %event.tier,
                boundary = %event.boundary,
                key = %event.key,
                error = %error,
                "stowage operation failed"
            ),
            None => debug!(
                action = %event.action,
                tier = %event.tier,
                boundary = %event.boundary,
                key = %event.key,
                "stowage operation"
            ),
        }
    }
}

/// Keeps events in memory (for testing).
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DiagnosticsSink for MemorySink {
    fn emit(&self, event: &DiagnosticEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Enabled (tier, action) pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsFilter {
    enabled: HashSet<(TierKind, Action)>,
}

const ALL_TIERS: [TierKind; 4] = [
    TierKind::Volatile,
    TierKind::File,
    TierKind::Record,
    TierKind::KeyValue,
];
const ALL_ACTIONS: [Action; 4] = [Action::Read, Action::Write, Action::Delete, Action::NotFound];

impl DiagnosticsFilter {
    pub fn none() -> Self {
        Self {
            enabled: HashSet::new(),
        }
    }

    pub fn all() -> Self {
        let enabled = ALL_TIERS
            .iter()
            .flat_map(|tier| ALL_ACTIONS.iter().map(move |action| (*tier, *action)))
            .collect();
        Self { enabled }
    }

    pub fn enable(mut self, tier: TierKind, action: Action) -> Self {
        self.enabled.insert((tier, action));
        self
    }

    pub fn disable(mut self, tier: TierKind, action: Action) -> Self {
        self.enabled.remove(&(tier, action));
        self
    }

    pub fn allows(&self, tier: TierKind, action: Action) -> bool {
        self.enabled.contains(&(tier, action))
    }
}

impl Default for DiagnosticsFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// A sink with its filter, shared by a service.
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticsSink>,
    filter: DiagnosticsFilter,
}

impl Diagnostics {
    pub fn new(sink: Arc<dyn DiagnosticsSink>, filter: DiagnosticsFilter) -> Self {
        Self { sink, filter }
    }

    pub fn filter(&self) -> &DiagnosticsFilter {
        &self.filter
    }

    pub fn emit(
        &self,
        action: Action,
        tier: TierKind,
        boundary: &str,
        key: &str,
        error: Option<&dyn fmt::Display>,
    ) {
        if !self.filter.allows(tier, action) {
            return;
        }
        self.sink.emit(&DiagnosticEvent {
            action,
            tier,
            boundary: boundary.to_string(),
            key: key.to_string(),
            error: error.map(|e| e.to_string()),
        });
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink), DiagnosticsFilter::all())
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}
