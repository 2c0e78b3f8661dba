//! `axle-core` -- action execution and resilience engine.
//!
//! The control plane of a desktop/browser automation agent: callers
//! submit an [`action::Action`]; this crate decides which backend to use
//! ([`router`]), verifies pre/postconditions ([`condition`]), classifies
//! failures ([`failure`]), suppresses attempts against structurally
//! broken resources ([`breaker`]), and reports every attempt to an
//! attached sink for trace logging.
//!
//! Zero internal deps: the trace and KPI crates build on top of this one.

pub mod action;
pub mod breaker;
pub mod condition;
pub mod error;
pub mod executor;
pub mod failure;
pub mod metrics;
pub mod router;
pub mod types;

pub use action::{Action, ActionResult, AttemptRecord, AttemptSink, Runner};
pub use breaker::{BreakerKey, BreakerState, BreakerThreshold, CircuitBreaker};
pub use condition::{CheckContext, CheckOutcome, Condition, ConditionKind, ConditionProbe};
pub use error::CoreError;
pub use executor::{ExecError, Executor};
pub use failure::{classify, ContextSignals, FailureEvent, FailureKind};
pub use metrics::{MetricsStore, SuccessEstimate};
pub use router::{
    HealthChecker, HealthStatus, Layer, LocatorDescriptor, LocatorResolver, RouteDecision, Router,
    RouterConfig,
};
