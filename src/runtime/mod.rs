//! Subsystem wiring.
//!
//! Builds the long-lived pieces (policy registry, latency tracker, event bus
//! with its subscribers, tool registry, runner, orchestrator) and exposes the
//! per-turn entry point. Sessions are created here and owned by the caller;
//! the runtime itself is shareable across session tasks.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::config::BantzConfig;
use crate::events::subscribers::{AuditSink, IngestCache, RunTracker};
use crate::events::{wire_subscribers, Event, EventBus, EventType, SubscriberOptions, WiredSubscribers};
use crate::graph::GraphStore;
use crate::latency::LatencyTracker;
use crate::orchestrator::r#loop::OrchestratorConfig;
use crate::orchestrator::{OrchestratorState, TurnOrchestrator, TurnOutput};
use crate::policy::PolicyRegistry;
use crate::providers::{FinalizerLlm, RouterLlm};
use crate::scheduler::{ReminderScheduler, ReminderStore, SchedulerHandle};
use crate::tools::breaker::CircuitBreaker;
use crate::tools::formatter::{ResultFormatter, TurkishFormatter};
use crate::tools::runner::ToolRunner;
use crate::tools::ToolRegistry;

/// Builder for [`Runtime`]. Collaborators default to absent; only the router
/// is mandatory.
pub struct RuntimeBuilder {
    config: BantzConfig,
    router: Option<Arc<dyn RouterLlm>>,
    finalizer: Option<Arc<dyn FinalizerLlm>>,
    tools: ToolRegistry,
    formatter: Arc<dyn ResultFormatter>,
    run_tracker: Option<Arc<dyn RunTracker>>,
    ingest_cache: Option<Arc<dyn IngestCache>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    subscriber_options: SubscriberOptions,
    graph: Option<Arc<GraphStore>>,
    orchestrator_config: OrchestratorConfig,
}

impl RuntimeBuilder {
    /// Builder over a configuration.
    pub fn new(config: BantzConfig) -> Self {
        Self {
            config,
            router: None,
            finalizer: None,
            tools: ToolRegistry::new(),
            formatter: Arc::new(TurkishFormatter),
            run_tracker: None,
            ingest_cache: None,
            audit_sink: None,
            subscriber_options: SubscriberOptions::default(),
            graph: None,
            orchestrator_config: OrchestratorConfig::default(),
        }
    }

    /// The router LLM (required).
    pub fn router(mut self, router: Arc<dyn RouterLlm>) -> Self {
        self.router = Some(router);
        self
    }

    /// The finalizer LLM (optional; absence degrades to planner replies).
    pub fn finalizer(mut self, finalizer: Arc<dyn FinalizerLlm>) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    /// Register a tool.
    pub fn tool(mut self, tool: Arc<dyn crate::tools::Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    /// Override the result formatter.
    pub fn formatter(mut self, formatter: Arc<dyn ResultFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    /// Attach an observability run tracker.
    pub fn run_tracker(mut self, tracker: Arc<dyn RunTracker>) -> Self {
        self.run_tracker = Some(tracker);
        self
    }

    /// Attach an ingest cache.
    pub fn ingest_cache(mut self, cache: Arc<dyn IngestCache>) -> Self {
        self.ingest_cache = Some(cache);
        self
    }

    /// Attach an audit sink.
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Middleware options for the wired subscribers.
    pub fn subscriber_options(mut self, options: SubscriberOptions) -> Self {
        self.subscriber_options = options;
        self
    }

    /// Attach the entity graph store.
    pub fn graph(mut self, graph: Arc<GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Override orchestrator tuning.
    pub fn orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator_config = config;
        self
    }

    /// Assemble the runtime.
    ///
    /// # Errors
    ///
    /// Fails when no router was provided.
    pub fn build(self) -> anyhow::Result<Runtime> {
        let router = self
            .router
            .ok_or_else(|| anyhow::anyhow!("runtime requires a router LLM"))?;

        let policy = Arc::new(PolicyRegistry::load(&self.config.paths.policy_path));
        let latency = Arc::new(LatencyTracker::new(self.config.latency.clone()));
        let bus = Arc::new(EventBus::new());
        let tools = Arc::new(self.tools);
        let breaker = Arc::new(CircuitBreaker::default());
        let runner = Arc::new(ToolRunner::new(
            Arc::clone(&bus),
            Arc::clone(&policy),
            Arc::clone(&breaker),
        ));

        let wired = wire_subscribers(
            &bus,
            self.run_tracker,
            self.ingest_cache,
            self.audit_sink,
            &self.subscriber_options,
        );

        let orchestrator = TurnOrchestrator::new(
            router,
            self.finalizer,
            Arc::clone(&tools),
            runner,
            Arc::clone(&policy),
            Arc::clone(&latency),
            Arc::clone(&bus),
            self.formatter,
            self.orchestrator_config,
        );

        info!(tools = tools.len(), "runtime assembled");

        Ok(Runtime {
            config: self.config,
            policy,
            latency,
            bus,
            orchestrator,
            graph: self.graph,
            _wired: wired,
        })
    }
}

/// The assembled turn runtime. One per process; sessions share it.
pub struct Runtime {
    config: BantzConfig,
    policy: Arc<PolicyRegistry>,
    latency: Arc<LatencyTracker>,
    bus: Arc<EventBus>,
    orchestrator: TurnOrchestrator,
    graph: Option<Arc<GraphStore>>,
    _wired: WiredSubscribers,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}

impl Runtime {
    /// Start building a runtime.
    pub fn builder(config: BantzConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    /// Create fresh per-session state.
    pub fn new_session(&self, session_id: &str) -> OrchestratorState {
        OrchestratorState::with_memory_config(session_id, self.config.memory.clone())
    }

    /// Process one turn for a session.
    pub async fn process_turn(
        &self,
        user_text: &str,
        state: &mut OrchestratorState,
    ) -> TurnOutput {
        self.orchestrator.process_turn(user_text, state).await
    }

    /// Link two entities in the graph store and announce it on the bus.
    pub async fn link_entities(
        &self,
        source: &str,
        target: &str,
        relation: &str,
    ) -> anyhow::Result<()> {
        let Some(graph) = &self.graph else {
            return Ok(());
        };
        graph.link(source, target, relation).await?;

        let mut data = serde_json::Map::new();
        data.insert("source".to_owned(), json!(source));
        data.insert("target".to_owned(), json!(target));
        data.insert("relation".to_owned(), json!(relation));
        self.bus
            .publish(Event::new(EventType::GraphEntityLinked, "runtime", data));
        Ok(())
    }

    /// Open the reminder store and spawn the background scheduler.
    pub async fn start_scheduler(&self) -> anyhow::Result<SchedulerHandle> {
        std::fs::create_dir_all(&self.config.paths.data_dir)?;
        let store = Arc::new(ReminderStore::open(&self.config.paths.reminders_db()).await?);
        let scheduler = ReminderScheduler::new(store, Arc::clone(&self.bus));
        Ok(scheduler.spawn())
    }

    /// The event bus (for adapters and UI subscribers).
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The latency tracker (for dashboards).
    pub fn latency(&self) -> &Arc<LatencyTracker> {
        &self.latency
    }

    /// The policy registry (for reload).
    pub fn policy(&self) -> &Arc<PolicyRegistry> {
        &self.policy
    }

    /// Configuration in effect.
    pub fn config(&self) -> &BantzConfig {
        &self.config
    }
}
