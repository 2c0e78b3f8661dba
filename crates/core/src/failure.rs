//! Failure taxonomy and classifier.
//!
//! Every failed attempt is labeled with exactly one [`FailureKind`] from a
//! fixed taxonomy. [`classify`] is a pure function of coarse context
//! signals, the raw error text, and the observed postcondition snapshot;
//! it is deterministic and never errors (no signal at all falls back to
//! `Unknown` rather than propagating anything).

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::condition::{ConditionKind, ConditionProbe};
use crate::router::Layer;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Text patterns
// ---------------------------------------------------------------------------

/// Exception text indicating a permission / elevation problem.
static PERMISSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)permission denied|access (is )?denied|not authorized|elevation required|administrator (rights|privileges)")
        .expect("permission pattern must compile")
});

/// Exception text indicating a network-level failure.
static NETWORK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)econnreset|econnrefused|econnaborted|etimedout|timed out|dns|net::err|connection (reset|refused|closed)")
        .expect("network pattern must compile")
});

/// Exception text indicating the DOM/UI tree changed under us.
static STALE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)stale element|detached|not attached|obsolete element|node was removed")
        .expect("stale-element pattern must compile")
});

// ---------------------------------------------------------------------------
// FailureKind
// ---------------------------------------------------------------------------

/// Fixed taxonomy of action failure causes.
///
/// `Precondition` and `PostconditionTimeout` are contract outcomes raised
/// by the runner itself; the remaining kinds are produced by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Passing disturbance; retry is expected to succeed.
    Transient,
    /// The action clicked something but the expected navigation never came.
    Misclick,
    /// A blocking modal dialog swallowed the interaction.
    ModalDialog,
    /// Permission / elevation prompt blocked the action.
    Permission,
    /// The UI changed underneath the action (stale/detached element).
    UiUpdate,
    /// Network-level failure between the agent and the target.
    Network,
    /// The locator no longer resolves to anything on any check.
    LocatorStale,
    /// Navigation happened but the screen is not in the expected state.
    WrongState,
    /// A precondition did not hold before execution.
    Precondition,
    /// Postconditions never held simultaneously within the timeout.
    PostconditionTimeout,
    /// No signal allowed a more specific label.
    Unknown,
}

impl FailureKind {
    /// Uppercase tag used in trace records and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "TRANSIENT",
            FailureKind::Misclick => "MISCLICK",
            FailureKind::ModalDialog => "MODAL_DIALOG",
            FailureKind::Permission => "PERMISSION",
            FailureKind::UiUpdate => "UI_UPDATE",
            FailureKind::Network => "NETWORK",
            FailureKind::LocatorStale => "LOCATOR_STALE",
            FailureKind::WrongState => "WRONG_STATE",
            FailureKind::Precondition => "PRECONDITION",
            FailureKind::PostconditionTimeout => "POSTCONDITION_TIMEOUT",
            FailureKind::Unknown => "UNKNOWN",
        }
    }

    /// Parse from a trace tag, defaulting to `Unknown` for unrecognized
    /// values (trace consumers must tolerate unknown fields).
    pub fn from_tag(s: &str) -> Self {
        match s {
            "TRANSIENT" => FailureKind::Transient,
            "MISCLICK" => FailureKind::Misclick,
            "MODAL_DIALOG" => FailureKind::ModalDialog,
            "PERMISSION" => FailureKind::Permission,
            "UI_UPDATE" => FailureKind::UiUpdate,
            "NETWORK" => FailureKind::Network,
            "LOCATOR_STALE" => FailureKind::LocatorStale,
            "WRONG_STATE" => FailureKind::WrongState,
            "PRECONDITION" => FailureKind::Precondition,
            "POSTCONDITION_TIMEOUT" => FailureKind::PostconditionTimeout,
            _ => FailureKind::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// Context signals
// ---------------------------------------------------------------------------

/// Coarse context observations supplied by the caller alongside a failed
/// attempt. Checked before any text or snapshot inference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSignals {
    /// A permission / elevation prompt is currently showing.
    pub permission_prompt: bool,
    /// A blocking modal dialog is currently showing.
    pub blocking_modal: bool,
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Label a raw failure with a [`FailureKind`].
///
/// Classification order, first match wins:
/// 1. permission prompt signal
/// 2. blocking modal signal
/// 3. error-text patterns (permission, network, stale element)
/// 4. postcondition snapshot inference (misclick / locator stale /
///    wrong state / transient)
/// 5. no signal at all: `Unknown`
pub fn classify(
    signals: &ContextSignals,
    error_text: Option<&str>,
    snapshot: &[ConditionProbe],
) -> FailureKind {
    if signals.permission_prompt {
        return FailureKind::Permission;
    }
    if signals.blocking_modal {
        return FailureKind::ModalDialog;
    }

    if let Some(text) = error_text {
        if PERMISSION_RE.is_match(text) {
            return FailureKind::Permission;
        }
        if NETWORK_RE.is_match(text) {
            return FailureKind::Network;
        }
        if STALE_RE.is_match(text) {
            return FailureKind::UiUpdate;
        }
    }

    if !snapshot.is_empty() {
        let url_failed = snapshot
            .iter()
            .any(|p| p.kind == ConditionKind::UrlMatch && !p.ok);
        let url_passed = snapshot
            .iter()
            .any(|p| p.kind == ConditionKind::UrlMatch && p.ok);
        let presence: Vec<&ConditionProbe> = snapshot
            .iter()
            .filter(|p| p.kind == ConditionKind::ElementPresent)
            .collect();
        let presence_ok = presence.iter().any(|p| p.ok);
        let presence_all_failed = !presence.is_empty() && presence.iter().all(|p| !p.ok);

        // Clicked something, but the navigation check never turned over.
        if url_failed && presence_ok {
            return FailureKind::Misclick;
        }
        if presence_all_failed {
            return FailureKind::LocatorStale;
        }
        if url_passed && presence.iter().any(|p| !p.ok) {
            return FailureKind::WrongState;
        }
        return FailureKind::Transient;
    }

    FailureKind::Unknown
}

// ---------------------------------------------------------------------------
// FailureEvent
// ---------------------------------------------------------------------------

/// A classified failure, consumed by the circuit breaker, the metrics
/// store, and the trace. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEvent {
    pub ts: Timestamp,
    pub kind: FailureKind,
    /// Execution backend the attempt ran against.
    pub layer: Layer,
    pub action_kind: String,
    pub screen_key: String,
    pub locator_key: String,
    /// Free-text message or exception text, if any.
    pub message: Option<String>,
    /// Observed condition results at the time of failure.
    pub snapshot: Vec<ConditionProbe>,
    /// Arbitrary caller metadata.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl FailureEvent {
    /// Build an event, classifying the failure from its raw inputs.
    pub fn classified(
        layer: Layer,
        action_kind: impl Into<String>,
        screen_key: impl Into<String>,
        locator_key: impl Into<String>,
        signals: &ContextSignals,
        message: Option<String>,
        snapshot: Vec<ConditionProbe>,
    ) -> Self {
        let kind = classify(signals, message.as_deref(), &snapshot);
        Self {
            ts: chrono::Utc::now(),
            kind,
            layer,
            action_kind: action_kind.into(),
            screen_key: screen_key.into(),
            locator_key: locator_key.into(),
            message,
            snapshot,
            metadata: serde_json::Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(name: &str, kind: ConditionKind, ok: bool) -> ConditionProbe {
        ConditionProbe {
            name: name.to_string(),
            kind,
            ok,
        }
    }

    fn no_signals() -> ContextSignals {
        ContextSignals::default()
    }

    // -- signal precedence ----------------------------------------------------

    #[test]
    fn permission_prompt_wins_over_everything() {
        let signals = ContextSignals {
            permission_prompt: true,
            blocking_modal: true,
        };
        let snapshot = vec![probe("el", ConditionKind::ElementPresent, false)];
        assert_eq!(
            classify(&signals, Some("ECONNRESET"), &snapshot),
            FailureKind::Permission
        );
    }

    #[test]
    fn blocking_modal_wins_over_text() {
        let signals = ContextSignals {
            permission_prompt: false,
            blocking_modal: true,
        };
        assert_eq!(
            classify(&signals, Some("ECONNRESET"), &[]),
            FailureKind::ModalDialog
        );
    }

    // -- text patterns --------------------------------------------------------

    #[test]
    fn econnreset_classifies_as_network() {
        assert_eq!(
            classify(&no_signals(), Some("socket error: ECONNRESET"), &[]),
            FailureKind::Network
        );
    }

    #[test]
    fn connection_refused_classifies_as_network() {
        assert_eq!(
            classify(&no_signals(), Some("connection refused by host"), &[]),
            FailureKind::Network
        );
    }

    #[test]
    fn permission_denied_text() {
        assert_eq!(
            classify(&no_signals(), Some("open failed: Permission denied"), &[]),
            FailureKind::Permission
        );
    }

    #[test]
    fn elevation_required_text() {
        assert_eq!(
            classify(&no_signals(), Some("ELEVATION REQUIRED to continue"), &[]),
            FailureKind::Permission
        );
    }

    #[test]
    fn stale_element_text_is_ui_update() {
        assert_eq!(
            classify(
                &no_signals(),
                Some("stale element reference: element is not attached"),
                &[]
            ),
            FailureKind::UiUpdate
        );
    }

    #[test]
    fn detached_node_text_is_ui_update() {
        assert_eq!(
            classify(&no_signals(), Some("node detached from document"), &[]),
            FailureKind::UiUpdate
        );
    }

    #[test]
    fn permission_pattern_checked_before_network() {
        // Text matching both patterns takes the permission label.
        assert_eq!(
            classify(
                &no_signals(),
                Some("access denied: connection reset"),
                &[]
            ),
            FailureKind::Permission
        );
    }

    // -- snapshot inference ---------------------------------------------------

    #[test]
    fn url_failed_element_ok_is_misclick() {
        let snapshot = vec![
            probe("url_changed", ConditionKind::UrlMatch, false),
            probe("button_present", ConditionKind::ElementPresent, true),
        ];
        assert_eq!(
            classify(&no_signals(), None, &snapshot),
            FailureKind::Misclick
        );
    }

    #[test]
    fn all_presence_failed_is_locator_stale() {
        let snapshot = vec![
            probe("a_present", ConditionKind::ElementPresent, false),
            probe("b_present", ConditionKind::ElementPresent, false),
        ];
        assert_eq!(
            classify(&no_signals(), None, &snapshot),
            FailureKind::LocatorStale
        );
    }

    #[test]
    fn all_presence_failed_wins_over_wrong_state() {
        // First-match-wins: even with a successful navigation check, a
        // fully dead locator is reported as LOCATOR_STALE.
        let snapshot = vec![
            probe("url_changed", ConditionKind::UrlMatch, true),
            probe("a_present", ConditionKind::ElementPresent, false),
        ];
        assert_eq!(
            classify(&no_signals(), None, &snapshot),
            FailureKind::LocatorStale
        );
    }

    #[test]
    fn navigated_but_element_missing_is_wrong_state() {
        let snapshot = vec![
            probe("url_changed", ConditionKind::UrlMatch, true),
            probe("panel_present", ConditionKind::ElementPresent, false),
            probe("header_present", ConditionKind::ElementPresent, true),
        ];
        assert_eq!(
            classify(&no_signals(), None, &snapshot),
            FailureKind::WrongState
        );
    }

    #[test]
    fn inconclusive_snapshot_is_transient() {
        let snapshot = vec![probe("title_ok", ConditionKind::Title, false)];
        assert_eq!(
            classify(&no_signals(), None, &snapshot),
            FailureKind::Transient
        );
    }

    #[test]
    fn all_checks_passing_is_transient() {
        // Snapshot exists but points at nothing specific.
        let snapshot = vec![
            probe("url_changed", ConditionKind::UrlMatch, true),
            probe("el_present", ConditionKind::ElementPresent, true),
        ];
        assert_eq!(
            classify(&no_signals(), None, &snapshot),
            FailureKind::Transient
        );
    }

    // -- no signal ------------------------------------------------------------

    #[test]
    fn no_signal_at_all_is_unknown() {
        assert_eq!(classify(&no_signals(), None, &[]), FailureKind::Unknown);
    }

    #[test]
    fn unmatched_text_with_no_snapshot_is_unknown() {
        assert_eq!(
            classify(&no_signals(), Some("something odd happened"), &[]),
            FailureKind::Unknown
        );
    }

    // -- determinism ----------------------------------------------------------

    #[test]
    fn classify_is_deterministic() {
        let signals = no_signals();
        let snapshot = vec![
            probe("url", ConditionKind::UrlMatch, false),
            probe("el", ConditionKind::ElementPresent, true),
        ];
        let first = classify(&signals, Some("boom"), &snapshot);
        for _ in 0..10 {
            assert_eq!(classify(&signals, Some("boom"), &snapshot), first);
        }
    }

    // -- tags -----------------------------------------------------------------

    #[test]
    fn tag_round_trip() {
        for kind in [
            FailureKind::Transient,
            FailureKind::Misclick,
            FailureKind::ModalDialog,
            FailureKind::Permission,
            FailureKind::UiUpdate,
            FailureKind::Network,
            FailureKind::LocatorStale,
            FailureKind::WrongState,
            FailureKind::Precondition,
            FailureKind::PostconditionTimeout,
            FailureKind::Unknown,
        ] {
            assert_eq!(FailureKind::from_tag(kind.as_str()), kind);
        }
    }

    #[test]
    fn unknown_tag_defaults_to_unknown() {
        assert_eq!(FailureKind::from_tag("NOT_A_KIND"), FailureKind::Unknown);
        assert_eq!(FailureKind::from_tag(""), FailureKind::Unknown);
    }
}
