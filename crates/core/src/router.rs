//! Multi-backend router.
//!
//! Given a logical UI target and an action kind, the router probes each
//! candidate execution layer's health, resolves a concrete locator for
//! it, looks up rolling success statistics, and orders the candidates by
//! a weighted score. The circuit breaker is deliberately NOT consulted
//! here; callers check it before invoking the runner so the two concerns
//! stay composable and independently testable.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::condition::CheckContext;
use crate::error::CoreError;
use crate::metrics::{MetricsStore, SuccessEstimate};

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

/// One of the interchangeable execution backends, most direct first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Direct protocol control of the browser DOM.
    Dom,
    /// OS-level UI automation.
    Uia,
    /// Image-based fallback. Highest risk; skipped unless the caller has
    /// explicitly raised the risk tolerance.
    Pixel,
}

/// Candidate layers in base-priority order (most direct and cheapest
/// first).
pub const ALL_LAYERS: &[Layer] = &[Layer::Dom, Layer::Uia, Layer::Pixel];

impl Layer {
    /// String tag for trace records and stat keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Dom => "dom",
            Layer::Uia => "uia",
            Layer::Pixel => "pixel",
        }
    }

    /// Parse from a trace tag.
    pub fn from_tag(s: &str) -> Option<Self> {
        match s {
            "dom" => Some(Layer::Dom),
            "uia" => Some(Layer::Uia),
            "pixel" => Some(Layer::Pixel),
            _ => None,
        }
    }

    /// Base routing priority. Higher is preferred before scoring.
    pub fn base_priority(&self) -> f64 {
        match self {
            Layer::Dom => 3.0,
            Layer::Uia => 2.0,
            Layer::Pixel => 1.0,
        }
    }

    /// Relative execution cost, used as a score divisor.
    pub fn relative_cost(&self) -> f64 {
        match self {
            Layer::Dom => 1.0,
            Layer::Uia => 1.5,
            Layer::Pixel => 2.5,
        }
    }

    /// `true` for the highest-risk fallback layer.
    pub fn is_risky(&self) -> bool {
        matches!(self, Layer::Pixel)
    }
}

// ---------------------------------------------------------------------------
// Boundary traits
// ---------------------------------------------------------------------------

/// Result of a bounded-latency health probe for one layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub reason: String,
    pub latency_ms: f64,
}

impl HealthStatus {
    pub fn healthy(latency_ms: f64) -> Self {
        Self {
            ok: true,
            reason: "ok".to_string(),
            latency_ms,
        }
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
            latency_ms: 0.0,
        }
    }
}

/// Probes whether a layer is currently usable. Implemented outside the
/// engine (each layer has its own probe).
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, ctx: &CheckContext, layer: Layer) -> HealthStatus;
}

/// A locator resolved for one concrete layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorDescriptor {
    pub layer: Layer,
    pub selector: String,
}

/// Resolves a logical locator key into a layer-specific descriptor.
pub trait LocatorResolver: Send + Sync {
    fn resolve_for_layer(
        &self,
        ctx: &CheckContext,
        locator_key: &str,
        screen_key: &str,
        layer: Layer,
    ) -> Result<LocatorDescriptor, CoreError>;
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Latency bands for the health weight factor.
const LATENCY_FAST_MS: f64 = 50.0;
const LATENCY_OK_MS: f64 = 200.0;
const LATENCY_SLOW_MS: f64 = 1000.0;

/// Weight a layer by its probe latency. Faster probes score higher.
pub fn health_weight(latency_ms: f64) -> f64 {
    if latency_ms <= LATENCY_FAST_MS {
        1.0
    } else if latency_ms <= LATENCY_OK_MS {
        0.9
    } else if latency_ms <= LATENCY_SLOW_MS {
        0.75
    } else {
        0.5
    }
}

/// Composite routing score.
///
/// `base_priority x health_weight(latency) x success_probability / cost`,
/// where the success probability already carries any cold-start penalty.
pub fn compute_score(
    base_priority: f64,
    latency_ms: f64,
    success_probability: f64,
    relative_cost: f64,
) -> f64 {
    base_priority * health_weight(latency_ms) * success_probability / relative_cost
}

/// Stat key under which a (layer, screen, action, locator) combination
/// accumulates success statistics.
pub fn stat_key(layer: Layer, screen_key: &str, action_kind: &str, locator_key: &str) -> String {
    format!(
        "{}|{}|{}|{}",
        layer.as_str(),
        screen_key,
        action_kind,
        locator_key
    )
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Router tuning supplied by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouterConfig {
    /// Allow the highest-risk fallback layer. The setting policy lives
    /// outside this engine; it is injected, never derived here.
    pub allow_risky: bool,
}

/// Result of backend selection for one candidate layer.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub layer: Layer,
    pub locator: LocatorDescriptor,
    pub score: f64,
    pub health: HealthStatus,
    pub stats: SuccessEstimate,
}

/// Orders candidate execution layers for a (screen, locator, action).
pub struct Router {
    health: Arc<dyn HealthChecker>,
    resolver: Arc<dyn LocatorResolver>,
    metrics: Arc<MetricsStore>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        health: Arc<dyn HealthChecker>,
        resolver: Arc<dyn LocatorResolver>,
        metrics: Arc<MetricsStore>,
        config: RouterConfig,
    ) -> Self {
        Self {
            health,
            resolver,
            metrics,
            config,
        }
    }

    /// Shared metrics store, for feeding attempt outcomes back.
    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.metrics
    }

    /// Score every usable layer for the target, best first.
    ///
    /// Unhealthy layers, the risky layer (unless allowed), and layers
    /// whose locator cannot be resolved are skipped entirely; a decision
    /// is only ever returned for a layer whose health check passed.
    pub async fn choose_order(
        &self,
        ctx: &CheckContext,
        locator_key: &str,
        action_kind: &str,
    ) -> Vec<RouteDecision> {
        let mut decisions = Vec::new();

        for &layer in ALL_LAYERS {
            if layer.is_risky() && !self.config.allow_risky {
                tracing::debug!(layer = layer.as_str(), "Skipping risky layer");
                continue;
            }

            let health = self.health.check(ctx, layer).await;
            if !health.ok {
                tracing::debug!(
                    layer = layer.as_str(),
                    reason = %health.reason,
                    "Skipping unhealthy layer",
                );
                continue;
            }

            let locator = match self
                .resolver
                .resolve_for_layer(ctx, locator_key, &ctx.screen_key, layer)
            {
                Ok(locator) => locator,
                Err(e) => {
                    tracing::debug!(
                        layer = layer.as_str(),
                        locator_key,
                        error = %e,
                        "Skipping layer without a resolvable locator",
                    );
                    continue;
                }
            };

            let stats = self
                .metrics
                .estimate(&stat_key(layer, &ctx.screen_key, action_kind, locator_key));
            let score = compute_score(
                layer.base_priority(),
                health.latency_ms,
                stats.penalized_probability(),
                layer.relative_cost(),
            );

            decisions.push(RouteDecision {
                layer,
                locator,
                score,
                health,
                stats,
            });
        }

        decisions.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        decisions
    }

    /// Best usable layer, or `None` when no layer is healthy.
    pub async fn get_best_layer(
        &self,
        ctx: &CheckContext,
        locator_key: &str,
        action_kind: &str,
    ) -> Option<RouteDecision> {
        self.choose_order(ctx, locator_key, action_kind)
            .await
            .into_iter()
            .next()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Health checker with a fixed verdict per layer.
    struct FixedHealth {
        dom: HealthStatus,
        uia: HealthStatus,
        pixel: HealthStatus,
    }

    impl FixedHealth {
        fn all_healthy() -> Self {
            Self {
                dom: HealthStatus::healthy(10.0),
                uia: HealthStatus::healthy(10.0),
                pixel: HealthStatus::healthy(10.0),
            }
        }
    }

    #[async_trait]
    impl HealthChecker for FixedHealth {
        async fn check(&self, _ctx: &CheckContext, layer: Layer) -> HealthStatus {
            match layer {
                Layer::Dom => self.dom.clone(),
                Layer::Uia => self.uia.clone(),
                Layer::Pixel => self.pixel.clone(),
            }
        }
    }

    /// Resolver that answers for every layer except those listed.
    struct FixedResolver {
        unresolvable: Vec<Layer>,
    }

    impl FixedResolver {
        fn all() -> Self {
            Self {
                unresolvable: vec![],
            }
        }
    }

    impl LocatorResolver for FixedResolver {
        fn resolve_for_layer(
            &self,
            _ctx: &CheckContext,
            locator_key: &str,
            _screen_key: &str,
            layer: Layer,
        ) -> Result<LocatorDescriptor, CoreError> {
            if self.unresolvable.contains(&layer) {
                return Err(CoreError::Resolution(format!(
                    "no {} locator for {locator_key}",
                    layer.as_str()
                )));
            }
            Ok(LocatorDescriptor {
                layer,
                selector: format!("{}:{locator_key}", layer.as_str()),
            })
        }
    }

    fn router(health: FixedHealth, resolver: FixedResolver, config: RouterConfig) -> Router {
        Router::new(
            Arc::new(health),
            Arc::new(resolver),
            Arc::new(MetricsStore::new()),
            config,
        )
    }

    // -- scoring ---------------------------------------------------------------

    #[test]
    fn health_weight_bands() {
        assert_eq!(health_weight(10.0), 1.0);
        assert_eq!(health_weight(50.0), 1.0);
        assert_eq!(health_weight(100.0), 0.9);
        assert_eq!(health_weight(500.0), 0.75);
        assert_eq!(health_weight(5000.0), 0.5);
    }

    #[test]
    fn higher_success_rate_scores_higher_all_else_equal() {
        let good = compute_score(2.0, 10.0, 0.95, 1.0);
        let bad = compute_score(2.0, 10.0, 0.40, 1.0);
        assert!(good > bad);
    }

    #[test]
    fn cost_divides_score() {
        let cheap = compute_score(1.0, 10.0, 0.9, 1.0);
        let expensive = compute_score(1.0, 10.0, 0.9, 2.5);
        assert!(cheap > expensive);
        assert!((expensive - cheap / 2.5).abs() < 1e-9);
    }

    #[test]
    fn stat_key_format() {
        assert_eq!(
            stat_key(Layer::Dom, "checkout", "click", "buy_btn"),
            "dom|checkout|click|buy_btn"
        );
    }

    // -- routing ---------------------------------------------------------------

    #[tokio::test]
    async fn healthy_layers_ordered_by_score() {
        let r = router(
            FixedHealth::all_healthy(),
            FixedResolver::all(),
            RouterConfig::default(),
        );
        let ctx = CheckContext::for_screen("checkout");
        let order = r.choose_order(&ctx, "buy_btn", "click").await;

        // Risky pixel layer skipped by default; dom outranks uia on
        // priority and cost with identical stats.
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].layer, Layer::Dom);
        assert_eq!(order[1].layer, Layer::Uia);
        assert!(order[0].score > order[1].score);
    }

    #[tokio::test]
    async fn success_stats_can_overturn_base_priority() {
        let r = router(
            FixedHealth::all_healthy(),
            FixedResolver::all(),
            RouterConfig::default(),
        );
        let ctx = CheckContext::for_screen("checkout");

        // Drive the dom estimate down and warm the uia estimate up.
        for _ in 0..30 {
            r.metrics()
                .record(&stat_key(Layer::Dom, "checkout", "click", "buy_btn"), false);
            r.metrics()
                .record(&stat_key(Layer::Uia, "checkout", "click", "buy_btn"), true);
        }

        let best = r.get_best_layer(&ctx, "buy_btn", "click").await.unwrap();
        assert_eq!(best.layer, Layer::Uia);
    }

    #[tokio::test]
    async fn unhealthy_layer_is_skipped() {
        let health = FixedHealth {
            dom: HealthStatus::unhealthy("browser not attached"),
            ..FixedHealth::all_healthy()
        };
        let r = router(health, FixedResolver::all(), RouterConfig::default());
        let ctx = CheckContext::for_screen("checkout");
        let order = r.choose_order(&ctx, "buy_btn", "click").await;

        assert_eq!(order.len(), 1);
        assert_eq!(order[0].layer, Layer::Uia);
    }

    #[tokio::test]
    async fn risky_layer_requires_opt_in() {
        let health = FixedHealth {
            dom: HealthStatus::unhealthy("down"),
            uia: HealthStatus::unhealthy("down"),
            ..FixedHealth::all_healthy()
        };
        let ctx = CheckContext::for_screen("checkout");

        let cautious = router(
            FixedHealth {
                dom: HealthStatus::unhealthy("down"),
                uia: HealthStatus::unhealthy("down"),
                pixel: HealthStatus::healthy(10.0),
            },
            FixedResolver::all(),
            RouterConfig::default(),
        );
        assert!(cautious.get_best_layer(&ctx, "buy_btn", "click").await.is_none());

        let risky = router(
            health,
            FixedResolver::all(),
            RouterConfig { allow_risky: true },
        );
        let best = risky.get_best_layer(&ctx, "buy_btn", "click").await.unwrap();
        assert_eq!(best.layer, Layer::Pixel);
    }

    #[tokio::test]
    async fn unresolvable_locator_skips_layer() {
        let r = router(
            FixedHealth::all_healthy(),
            FixedResolver {
                unresolvable: vec![Layer::Dom],
            },
            RouterConfig::default(),
        );
        let ctx = CheckContext::for_screen("checkout");
        let order = r.choose_order(&ctx, "buy_btn", "click").await;

        assert_eq!(order.len(), 1);
        assert_eq!(order[0].layer, Layer::Uia);
        assert_eq!(order[0].locator.selector, "uia:buy_btn");
    }

    #[tokio::test]
    async fn no_healthy_layer_returns_none() {
        let health = FixedHealth {
            dom: HealthStatus::unhealthy("down"),
            uia: HealthStatus::unhealthy("down"),
            pixel: HealthStatus::unhealthy("down"),
        };
        let r = router(health, FixedResolver::all(), RouterConfig { allow_risky: true });
        let ctx = CheckContext::for_screen("checkout");
        assert!(r.get_best_layer(&ctx, "buy_btn", "click").await.is_none());
    }

    // -- layer table -----------------------------------------------------------

    #[test]
    fn layer_tags_round_trip() {
        for &layer in ALL_LAYERS {
            assert_eq!(Layer::from_tag(layer.as_str()), Some(layer));
        }
        assert_eq!(Layer::from_tag("vnc"), None);
    }

    #[test]
    fn base_priority_is_most_direct_first() {
        assert!(Layer::Dom.base_priority() > Layer::Uia.base_priority());
        assert!(Layer::Uia.base_priority() > Layer::Pixel.base_priority());
    }

    #[test]
    fn pixel_is_the_risky_layer() {
        assert!(Layer::Pixel.is_risky());
        assert!(!Layer::Dom.is_risky());
        assert!(!Layer::Uia.is_risky());
    }
}
