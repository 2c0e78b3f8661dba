//! Condition primitives: named, side-effect-free boolean predicates over
//! an opaque context, composable via AND/OR.
//!
//! The engine never evaluates live UI state itself. Concrete checks (DOM
//! element visible, URL matches, no blocking modal, ...) are supplied by
//! the caller as [`Condition`] implementations or wrapped closures; this
//! module only defines the composition contract and the result shape.

use serde::{Deserialize, Serialize};

use crate::failure::ContextSignals;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Opaque evaluation context handed to conditions and executors.
///
/// Carries the screen being driven, coarse context signals used by the
/// failure classifier, and arbitrary caller data.
#[derive(Debug, Clone, Default)]
pub struct CheckContext {
    /// Logical identifier of the screen/page being driven.
    pub screen_key: String,
    /// Coarse signals observed by the caller (modal present, permission
    /// prompt up). Consumed by the failure classifier.
    pub signals: ContextSignals,
    /// Arbitrary caller-owned data, opaque to the engine.
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl CheckContext {
    /// Context for a screen with no signals set.
    pub fn for_screen(screen_key: impl Into<String>) -> Self {
        Self {
            screen_key: screen_key.into(),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Condition kinds
// ---------------------------------------------------------------------------

/// What a condition observes. The classifier uses these tags to reason
/// about postcondition snapshots (e.g. "URL check failed but the element
/// check passed").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// URL contains / matches / changed.
    UrlMatch,
    /// Element exists / visible / enabled.
    ElementPresent,
    /// Window or page title check.
    Title,
    /// Anything else (modal absence, custom predicates).
    Other,
}

impl ConditionKind {
    /// String tag for trace records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::UrlMatch => "url_match",
            ConditionKind::ElementPresent => "element_present",
            ConditionKind::Title => "title",
            ConditionKind::Other => "other",
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome shapes
// ---------------------------------------------------------------------------

/// Result of evaluating one condition.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub ok: bool,
    /// Human-readable explanation, primarily for trace records.
    pub reason: String,
    /// Values observed while checking (opaque to the engine).
    pub observed: serde_json::Map<String, serde_json::Value>,
}

impl CheckOutcome {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            ok: true,
            reason: reason.into(),
            observed: serde_json::Map::new(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
            observed: serde_json::Map::new(),
        }
    }
}

/// One entry in a condition snapshot: which check, of which kind, and
/// whether it held. Snapshots feed the failure classifier and the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionProbe {
    pub name: String,
    pub kind: ConditionKind,
    pub ok: bool,
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// A named, side-effect-free boolean predicate over a [`CheckContext`].
pub trait Condition: Send + Sync {
    fn name(&self) -> &str;

    /// What this condition observes. Defaults to [`ConditionKind::Other`].
    fn kind(&self) -> ConditionKind {
        ConditionKind::Other
    }

    fn check(&self, ctx: &CheckContext) -> CheckOutcome;

    /// Evaluate and record the result as a snapshot probe.
    fn probe(&self, ctx: &CheckContext) -> ConditionProbe {
        let outcome = self.check(ctx);
        ConditionProbe {
            name: self.name().to_string(),
            kind: self.kind(),
            ok: outcome.ok,
        }
    }
}

// ---------------------------------------------------------------------------
// Closure wrapper
// ---------------------------------------------------------------------------

/// Wraps a caller-supplied closure as a [`Condition`].
pub struct FnCondition<F> {
    name: String,
    kind: ConditionKind,
    f: F,
}

impl<F> FnCondition<F>
where
    F: Fn(&CheckContext) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, kind: ConditionKind, f: F) -> Self {
        Self {
            name: name.into(),
            kind,
            f,
        }
    }
}

impl<F> Condition for FnCondition<F>
where
    F: Fn(&CheckContext) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ConditionKind {
        self.kind
    }

    fn check(&self, ctx: &CheckContext) -> CheckOutcome {
        if (self.f)(ctx) {
            CheckOutcome::pass(format!("{} held", self.name))
        } else {
            CheckOutcome::fail(format!("{} did not hold", self.name))
        }
    }
}

// ---------------------------------------------------------------------------
// Combinators
// ---------------------------------------------------------------------------

/// All inner conditions must hold. Short-circuits on the first failure.
pub struct AllOf {
    name: String,
    inner: Vec<Box<dyn Condition>>,
}

impl AllOf {
    pub fn new(name: impl Into<String>, inner: Vec<Box<dyn Condition>>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }
}

impl Condition for AllOf {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, ctx: &CheckContext) -> CheckOutcome {
        for cond in &self.inner {
            let outcome = cond.check(ctx);
            if !outcome.ok {
                return CheckOutcome {
                    ok: false,
                    reason: format!("{}: {} failed ({})", self.name, cond.name(), outcome.reason),
                    observed: outcome.observed,
                };
            }
        }
        CheckOutcome::pass(format!("{}: all {} checks held", self.name, self.inner.len()))
    }
}

/// At least one inner condition must hold. Short-circuits on the first
/// success.
pub struct AnyOf {
    name: String,
    inner: Vec<Box<dyn Condition>>,
}

impl AnyOf {
    pub fn new(name: impl Into<String>, inner: Vec<Box<dyn Condition>>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }
}

impl Condition for AnyOf {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, ctx: &CheckContext) -> CheckOutcome {
        for cond in &self.inner {
            let outcome = cond.check(ctx);
            if outcome.ok {
                return CheckOutcome {
                    ok: true,
                    reason: format!("{}: {} held", self.name, cond.name()),
                    observed: outcome.observed,
                };
            }
        }
        CheckOutcome::fail(format!(
            "{}: none of {} checks held",
            self.name,
            self.inner.len()
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn always(name: &str, value: bool) -> Box<dyn Condition> {
        Box::new(FnCondition::new(name, ConditionKind::Other, move |_| value))
    }

    /// Condition that panics when checked: proves short-circuiting.
    struct MustNotRun;

    impl Condition for MustNotRun {
        fn name(&self) -> &str {
            "must_not_run"
        }

        fn check(&self, _ctx: &CheckContext) -> CheckOutcome {
            panic!("short-circuit violated: condition was evaluated");
        }
    }

    // -- FnCondition ----------------------------------------------------------

    #[test]
    fn fn_condition_pass_and_fail() {
        let ctx = CheckContext::default();
        let yes = FnCondition::new("yes", ConditionKind::ElementPresent, |_| true);
        let no = FnCondition::new("no", ConditionKind::UrlMatch, |_| false);

        assert!(yes.check(&ctx).ok);
        assert!(!no.check(&ctx).ok);
        assert_eq!(yes.kind(), ConditionKind::ElementPresent);
    }

    #[test]
    fn fn_condition_reads_context() {
        let mut ctx = CheckContext::for_screen("login");
        ctx.data
            .insert("url".to_string(), serde_json::json!("https://a/login"));

        let cond = FnCondition::new("url_contains_login", ConditionKind::UrlMatch, |ctx| {
            ctx.data
                .get("url")
                .and_then(|v| v.as_str())
                .is_some_and(|u| u.contains("login"))
        });
        assert!(cond.check(&ctx).ok);
    }

    #[test]
    fn probe_captures_name_kind_ok() {
        let ctx = CheckContext::default();
        let cond = FnCondition::new("el", ConditionKind::ElementPresent, |_| false);
        let probe = cond.probe(&ctx);
        assert_eq!(probe.name, "el");
        assert_eq!(probe.kind, ConditionKind::ElementPresent);
        assert!(!probe.ok);
    }

    // -- AllOf ----------------------------------------------------------------

    #[test]
    fn all_of_passes_when_all_hold() {
        let ctx = CheckContext::default();
        let cond = AllOf::new("both", vec![always("a", true), always("b", true)]);
        assert!(cond.check(&ctx).ok);
    }

    #[test]
    fn all_of_fails_on_first_failure() {
        let ctx = CheckContext::default();
        let cond = AllOf::new("both", vec![always("a", true), always("b", false)]);
        let outcome = cond.check(&ctx);
        assert!(!outcome.ok);
        assert!(outcome.reason.contains("b failed"));
    }

    #[test]
    fn all_of_short_circuits() {
        let ctx = CheckContext::default();
        let cond = AllOf::new("sc", vec![always("a", false), Box::new(MustNotRun)]);
        assert!(!cond.check(&ctx).ok);
    }

    #[test]
    fn all_of_empty_passes() {
        let ctx = CheckContext::default();
        assert!(AllOf::new("empty", vec![]).check(&ctx).ok);
    }

    // -- AnyOf ----------------------------------------------------------------

    #[test]
    fn any_of_passes_when_one_holds() {
        let ctx = CheckContext::default();
        let cond = AnyOf::new("either", vec![always("a", false), always("b", true)]);
        assert!(cond.check(&ctx).ok);
    }

    #[test]
    fn any_of_fails_when_none_hold() {
        let ctx = CheckContext::default();
        let cond = AnyOf::new("either", vec![always("a", false), always("b", false)]);
        assert!(!cond.check(&ctx).ok);
    }

    #[test]
    fn any_of_short_circuits() {
        let ctx = CheckContext::default();
        let cond = AnyOf::new("sc", vec![always("a", true), Box::new(MustNotRun)]);
        assert!(cond.check(&ctx).ok);
    }

    #[test]
    fn any_of_empty_fails() {
        let ctx = CheckContext::default();
        assert!(!AnyOf::new("empty", vec![]).check(&ctx).ok);
    }

    // -- ConditionKind --------------------------------------------------------

    #[test]
    fn kind_as_str_values() {
        assert_eq!(ConditionKind::UrlMatch.as_str(), "url_match");
        assert_eq!(ConditionKind::ElementPresent.as_str(), "element_present");
        assert_eq!(ConditionKind::Title.as_str(), "title");
        assert_eq!(ConditionKind::Other.as_str(), "other");
    }
}
