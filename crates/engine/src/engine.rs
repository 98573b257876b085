//! The readiness-driven scheduler.
//!
//! One tokio task per node. A task suspends on [`Output::get`] for each of its
//! inputs, so it blocks on exactly its own dependencies and nothing else;
//! there are no level barriers. When a node finishes, resolving its ports is
//! what unblocks downstream tasks. Declared `depends_on` edges, which have no
//! output to await, are gated through an internal completion output per node.
//!
//! Every task drives its node to a terminal state and settles every port it
//! owns, resolved on success and failed otherwise, before returning. A port
//! that would otherwise be lost (a panicking provider, say) is caught by the
//! drop guard of [`OutputResolver`], so downstream tasks always wake.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use indexmap::IndexSet;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gantry_core::{ResourceKey, RunId};
use gantry_graph::{
    CREATED_PORT, CommandNode, Deployment, DependencyGraph, Export, FanOutNode, Input, Node,
    NodeState, ResourceNode, STDOUT_PORT,
};
use gantry_output::{Output, OutputError, OutputResolver};
use gantry_provider::{CommandRequest, CommandRunner, CreateRequest, Provider, ProviderContext};

use crate::budget::RunBudget;
use crate::error::EngineError;
use crate::report::{NodeKind, NodeReport, RunFailure, RunReport, RunStatus, SkipCause};

type PortResolvers = BTreeMap<String, OutputResolver<Value>>;
type GateMap = BTreeMap<ResourceKey, Output<()>>;

/// Executes deployments against a provider and a command runner.
///
/// The engine owns no per-run state; [`run`](Engine::run) can be called for
/// any number of deployments. Each run consumes its deployment: ports are
/// single-assignment, so a deployment cannot execute twice.
pub struct Engine {
    provider: Arc<dyn Provider>,
    runner: Arc<dyn CommandRunner>,
    budget: RunBudget,
}

impl Engine {
    /// Creates an engine with the default [`RunBudget`].
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            provider,
            runner,
            budget: RunBudget::default(),
        }
    }

    /// Overrides the run budget.
    #[must_use]
    pub fn with_budget(mut self, budget: RunBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Executes a deployment to completion.
    ///
    /// Returns `Err` only for pre-flight problems; failures during the run
    /// are contained per node and reported in the [`RunReport`].
    pub async fn run(
        &self,
        deployment: Deployment,
        ctx: ProviderContext,
    ) -> Result<RunReport, EngineError> {
        self.run_with_cancellation(deployment, ctx, CancellationToken::new())
            .await
    }

    /// Like [`run`](Engine::run), with an external cancellation handle.
    ///
    /// Cancelling stops new dispatches; creations already in flight run to
    /// completion (provider calls are not interruptible), and every node not
    /// yet dispatched ends `Skipped` with a cancellation cause.
    pub async fn run_with_cancellation(
        &self,
        deployment: Deployment,
        ctx: ProviderContext,
        cancel: CancellationToken,
    ) -> Result<RunReport, EngineError> {
        let run_id = RunId::new();
        let started_at = Utc::now();

        // Pre-flight: the deployment revalidates even though the builder
        // already did, so a graph constructed by other means cannot slip a
        // cycle past the scheduler.
        DependencyGraph::from_deployment(&deployment)?;
        info!(
            run = %run_id.short(),
            deployment = %deployment.name(),
            nodes = deployment.len(),
            provider = self.provider.name(),
            "starting run"
        );

        let deployment_name = deployment.name().to_owned();
        let mut gates = GateMap::new();
        let mut kinds: BTreeMap<ResourceKey, NodeKind> = BTreeMap::new();
        let mut intake = Vec::with_capacity(deployment.len());
        for (key, node) in deployment.into_nodes() {
            let resolvers = node
                .take_resolvers()
                .ok_or(EngineError::AlreadyExecuted {
                    resource: key.clone(),
                })?;
            let (done, gate) = Output::<()>::deferred(key.clone());
            gates.insert(key.clone(), gate);
            kinds.insert(key, kind_of(&node));
            intake.push((node, resolvers, done));
        }

        let shared = Arc::new(RunShared {
            provider: Arc::clone(&self.provider),
            runner: Arc::clone(&self.runner),
            ctx,
            semaphore: Semaphore::new(self.budget.max_concurrent),
            cancel: cancel.clone(),
            seq: AtomicU64::new(0),
            node_timeout: self.budget.node_timeout,
        });
        let gates = Arc::new(gates);

        // The whole-run ceiling: past it, nothing new dispatches.
        let watchdog = tokio::spawn({
            let cancel = cancel.clone();
            let ceiling = self.budget.run_timeout;
            async move {
                tokio::time::sleep(ceiling).await;
                warn!("run budget elapsed; cancelling remaining work");
                cancel.cancel();
            }
        });

        let mut tasks: JoinSet<Vec<NodeReport>> = JoinSet::new();
        for (node, resolvers, done) in intake {
            let shared = Arc::clone(&shared);
            let gates = Arc::clone(&gates);
            tasks.spawn(dispatch_node(shared, gates, node, resolvers, done));
        }

        let mut nodes: BTreeMap<ResourceKey, NodeReport> = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(reports) => {
                    for report in reports {
                        nodes.insert(report.key.clone(), report);
                    }
                }
                Err(join_err) => error!(?join_err, "node task panicked"),
            }
        }
        watchdog.abort();

        // A panicked task leaves no report behind; its dropped resolvers
        // already failed downstream, so only the entry itself is missing.
        for (key, kind) in kinds {
            if !nodes.contains_key(&key) {
                nodes.insert(
                    key.clone(),
                    failed_report(key, kind, None, None, "node task panicked".to_owned()),
                );
            }
        }

        let failure = select_failure(&nodes);
        let status = if failure.is_some() {
            RunStatus::Failed
        } else if nodes
            .values()
            .any(|n| n.skip_cause == Some(SkipCause::Cancelled))
        {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };

        let report = RunReport {
            run_id,
            deployment: deployment_name,
            status,
            started_at,
            finished_at: Utc::now(),
            nodes,
            failure,
        };
        match status {
            RunStatus::Completed => info!(
                run = %run_id.short(),
                created = report.count(NodeState::Created),
                "run completed"
            ),
            RunStatus::Failed => warn!(
                run = %run_id.short(),
                failed = report.count(NodeState::Failed),
                skipped = report.count(NodeState::Skipped),
                "run failed"
            ),
            RunStatus::Cancelled => warn!(
                run = %run_id.short(),
                skipped = report.count(NodeState::Skipped),
                "run cancelled"
            ),
        }
        Ok(report)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("provider", &self.provider.name())
            .field("budget", &self.budget)
            .finish()
    }
}

/// Facts every node task shares for one run.
struct RunShared {
    provider: Arc<dyn Provider>,
    runner: Arc<dyn CommandRunner>,
    ctx: ProviderContext,
    semaphore: Semaphore,
    cancel: CancellationToken,
    seq: AtomicU64,
    node_timeout: Duration,
}

impl RunShared {
    /// The next dispatch stamp. Taken immediately before a provider or runner
    /// call, so stamps order creations exactly as they were issued.
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

async fn dispatch_node(
    shared: Arc<RunShared>,
    gates: Arc<GateMap>,
    node: Node,
    resolvers: PortResolvers,
    done: OutputResolver<()>,
) -> Vec<NodeReport> {
    match node {
        Node::Resource(node) => vec![run_resource(&shared, &gates, node, resolvers, done).await],
        Node::Command(node) => vec![run_command(&shared, &gates, node, resolvers, done).await],
        Node::FanOut(node) => run_fan_out(&shared, &gates, node, resolvers, done).await,
    }
}

async fn run_resource(
    shared: &Arc<RunShared>,
    gates: &GateMap,
    node: ResourceNode,
    mut resolvers: PortResolvers,
    done: OutputResolver<()>,
) -> NodeReport {
    let key = node.key.clone();

    if let Err(observed) = await_gates(&node.depends_on, gates).await {
        return settle_skip(key, NodeKind::Resource, resolvers, done, &observed);
    }
    let inputs = match resolve_inputs(&node.inputs).await {
        Ok(inputs) => inputs,
        Err(observed) => return settle_skip(key, NodeKind::Resource, resolvers, done, &observed),
    };
    if shared.cancel.is_cancelled() {
        return settle_cancelled(key, NodeKind::Resource, resolvers, done);
    }
    let _permit = shared.semaphore.acquire().await.expect("run semaphore closed");
    if shared.cancel.is_cancelled() {
        return settle_cancelled(key, NodeKind::Resource, resolvers, done);
    }

    let seq = shared.next_seq();
    let timeout = node.timeout.unwrap_or(shared.node_timeout);
    debug!(resource = %key, seq, "creating resource");
    let request = CreateRequest {
        key: key.clone(),
        inputs,
        exports: node.exports.iter().map(|e| e.name.clone()).collect(),
    };
    let started = Instant::now();
    let outcome = match tokio::time::timeout(timeout, shared.provider.create(&shared.ctx, request))
        .await
    {
        Ok(Ok(created)) => harvest_exports(&node.exports, created.outputs, &mut resolvers),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
    };
    let elapsed = elapsed_ms(started);

    match outcome {
        Ok(previews) => {
            done.resolve(());
            info!(resource = %key, seq, elapsed_ms = elapsed, "created");
            created_report(key, NodeKind::Resource, Some(seq), Some(elapsed), previews)
        }
        Err(message) => {
            warn!(resource = %key, seq, error = %message, "creation failed");
            let own = OutputError::Provider {
                resource: key.clone(),
                message,
            };
            fail_ports(resolvers, done, &own);
            failed_report(key, NodeKind::Resource, Some(seq), Some(elapsed), own.to_string())
        }
    }
}

async fn run_command(
    shared: &Arc<RunShared>,
    gates: &GateMap,
    node: CommandNode,
    mut resolvers: PortResolvers,
    done: OutputResolver<()>,
) -> NodeReport {
    let key = node.key.clone();

    if let Err(observed) = await_gates(&node.depends_on, gates).await {
        return settle_skip(key, NodeKind::Command, resolvers, done, &observed);
    }
    let env = match resolve_inputs(&node.env).await {
        Ok(resolved) => resolved
            .into_iter()
            .map(|(name, value)| (name, env_text(value)))
            .collect::<BTreeMap<String, String>>(),
        Err(observed) => return settle_skip(key, NodeKind::Command, resolvers, done, &observed),
    };
    if shared.cancel.is_cancelled() {
        return settle_cancelled(key, NodeKind::Command, resolvers, done);
    }
    let _permit = shared.semaphore.acquire().await.expect("run semaphore closed");
    if shared.cancel.is_cancelled() {
        return settle_cancelled(key, NodeKind::Command, resolvers, done);
    }

    let seq = shared.next_seq();
    let timeout = node.timeout.unwrap_or(shared.node_timeout);
    debug!(step = %key, seq, program = %node.program, "running command");
    let request = CommandRequest {
        key: key.clone(),
        program: node.program,
        args: node.args,
        working_dir: node.working_dir,
        env,
    };
    let started = Instant::now();
    let outcome = match tokio::time::timeout(timeout, shared.runner.run(request)).await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
    };
    let elapsed = elapsed_ms(started);

    match outcome {
        Ok(outcome) => {
            let stdout = Value::String(outcome.stdout);
            let previews = BTreeMap::from([(STDOUT_PORT.to_owned(), preview(&stdout))]);
            if let Some(resolver) = resolvers.remove(STDOUT_PORT) {
                resolver.resolve(stdout);
            }
            done.resolve(());
            info!(step = %key, seq, elapsed_ms = elapsed, "command succeeded");
            created_report(key, NodeKind::Command, Some(seq), Some(elapsed), previews)
        }
        Err(message) => {
            warn!(step = %key, seq, error = %message, "command failed");
            let own = OutputError::Command {
                resource: key.clone(),
                message,
            };
            fail_ports(resolvers, done, &own);
            failed_report(key, NodeKind::Command, Some(seq), Some(elapsed), own.to_string())
        }
    }
}

async fn run_fan_out(
    shared: &Arc<RunShared>,
    gates: &GateMap,
    node: FanOutNode,
    mut resolvers: PortResolvers,
    done: OutputResolver<()>,
) -> Vec<NodeReport> {
    let key = node.key.clone();

    if let Err(observed) = await_gates(&node.depends_on, gates).await {
        return vec![settle_skip(key, NodeKind::FanOut, resolvers, done, &observed)];
    }
    let elements = match node.source.get().await {
        Ok(elements) => elements,
        Err(observed) => {
            return vec![settle_skip(key, NodeKind::FanOut, resolvers, done, &observed)];
        }
    };

    let distinct: IndexSet<String> = elements.into_iter().collect();
    let expected: Vec<ResourceKey> = distinct.iter().map(|e| node.child_key(e)).collect();
    debug!(group = %key, children = expected.len(), "expanding fan-out group");

    let timeout = node.timeout;
    let mut tasks: JoinSet<NodeReport> = JoinSet::new();
    for element in &distinct {
        let child_key = node.child_key(element);
        let inputs = (node.child_inputs)(element);
        let shared = Arc::clone(shared);
        tasks.spawn(async move { run_fan_out_child(&shared, child_key, inputs, timeout).await });
    }
    let mut children: BTreeMap<ResourceKey, NodeReport> = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(report) => {
                children.insert(report.key.clone(), report);
            }
            Err(join_err) => error!(group = %key, ?join_err, "fan-out child task panicked"),
        }
    }
    for child_key in &expected {
        if !children.contains_key(child_key) {
            children.insert(
                child_key.clone(),
                failed_report(
                    child_key.clone(),
                    NodeKind::FanOutChild,
                    None,
                    None,
                    "child task panicked".to_owned(),
                ),
            );
        }
    }

    let created_resolver = resolvers
        .remove(CREATED_PORT)
        .expect("fan-out group exposes a created port");
    let first_bad = expected
        .iter()
        .find(|child_key| children[*child_key].state != NodeState::Created);
    let group_report = match first_bad {
        None => {
            let child_keys: Vec<Value> = expected
                .iter()
                .map(|k| Value::String(k.to_string()))
                .collect();
            created_resolver.resolve(Value::Array(child_keys));
            done.resolve(());
            info!(group = %key, children = expected.len(), "fan-out group complete");
            let previews = BTreeMap::from([(
                CREATED_PORT.to_owned(),
                format!("{} children", expected.len()),
            )]);
            created_report(key, NodeKind::FanOut, None, None, previews)
        }
        Some(bad_key) => {
            let bad = &children[bad_key];
            if bad.state == NodeState::Failed {
                let message = format!("child `{bad_key}` failed");
                warn!(group = %key, child = %bad_key, "fan-out group failed");
                let prop = OutputError::Skipped {
                    resource: bad_key.clone(),
                };
                created_resolver.fail(prop.clone());
                done.fail(prop);
                failed_report(key, NodeKind::FanOut, None, None, message)
            } else {
                // A skipped child means something upstream of the group's
                // inputs failed; the group mirrors the child's cause.
                let cause = bad.skip_cause.unwrap_or(SkipCause::DependencyFailed);
                let message = bad
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("child `{bad_key}` skipped"));
                let prop = match cause {
                    SkipCause::Cancelled => OutputError::Cancelled {
                        resource: bad_key.clone(),
                    },
                    _ => OutputError::Skipped {
                        resource: bad_key.clone(),
                    },
                };
                created_resolver.fail(prop.clone());
                done.fail(prop);
                NodeReport {
                    key,
                    kind: NodeKind::FanOut,
                    state: NodeState::Skipped,
                    create_seq: None,
                    elapsed_ms: None,
                    error: Some(message),
                    skip_cause: Some(cause),
                    outputs: BTreeMap::new(),
                }
            }
        }
    };

    let mut reports = vec![group_report];
    reports.extend(children.into_values());
    reports
}

/// One child of a fan-out group. Children declare no ports; their identity in
/// the report is what downstream consumers see.
async fn run_fan_out_child(
    shared: &Arc<RunShared>,
    key: ResourceKey,
    inputs: BTreeMap<String, Input>,
    timeout: Option<Duration>,
) -> NodeReport {
    let inputs = match resolve_inputs(&inputs).await {
        Ok(inputs) => inputs,
        Err(observed) => {
            let prop = observed.propagated();
            return skipped_report(key, NodeKind::FanOutChild, &prop);
        }
    };
    if shared.cancel.is_cancelled() {
        return cancelled_report(key, NodeKind::FanOutChild);
    }
    let _permit = shared.semaphore.acquire().await.expect("run semaphore closed");
    if shared.cancel.is_cancelled() {
        return cancelled_report(key, NodeKind::FanOutChild);
    }

    let seq = shared.next_seq();
    let timeout = timeout.unwrap_or(shared.node_timeout);
    debug!(resource = %key, seq, "creating fan-out child");
    let request = CreateRequest {
        key: key.clone(),
        inputs,
        exports: Vec::new(),
    };
    let started = Instant::now();
    let outcome = match tokio::time::timeout(timeout, shared.provider.create(&shared.ctx, request))
        .await
    {
        Ok(Ok(_created)) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
    };
    let elapsed = elapsed_ms(started);

    match outcome {
        Ok(()) => {
            info!(resource = %key, seq, elapsed_ms = elapsed, "created");
            created_report(
                key,
                NodeKind::FanOutChild,
                Some(seq),
                Some(elapsed),
                BTreeMap::new(),
            )
        }
        Err(message) => {
            warn!(resource = %key, seq, error = %message, "creation failed");
            let own = OutputError::Provider {
                resource: key.clone(),
                message,
            };
            failed_report(
                key,
                NodeKind::FanOutChild,
                Some(seq),
                Some(elapsed),
                own.to_string(),
            )
        }
    }
}

/// Awaits the completion gates of every declared dependency.
async fn await_gates(depends_on: &[ResourceKey], gates: &GateMap) -> Result<(), OutputError> {
    for dependency in depends_on {
        if let Some(gate) = gates.get(dependency) {
            gate.get().await?;
        }
    }
    Ok(())
}

/// Awaits every input in name order and returns the resolved values.
///
/// The first failure wins; which one that is does not matter, since any
/// failure skips the node and the propagated error always names the root.
async fn resolve_inputs(
    inputs: &BTreeMap<String, Input>,
) -> Result<BTreeMap<String, Value>, OutputError> {
    let mut resolved = BTreeMap::new();
    for (name, input) in inputs {
        resolved.insert(name.clone(), input.get().await?);
    }
    Ok(resolved)
}

/// Checks that the provider answered every declared port, then resolves them.
///
/// No port is resolved until all are known present, so a half-answered
/// creation fails the node without leaking partial outputs downstream.
fn harvest_exports(
    exports: &[Export],
    mut outputs: BTreeMap<String, Value>,
    resolvers: &mut PortResolvers,
) -> Result<BTreeMap<String, String>, String> {
    if let Some(missing) = exports.iter().find(|e| !outputs.contains_key(&e.name)) {
        return Err(format!("provider returned no `{}` output", missing.name));
    }
    let mut previews = BTreeMap::new();
    for export in exports {
        let Some(value) = outputs.remove(&export.name) else {
            continue;
        };
        previews.insert(
            export.name.clone(),
            if export.secret {
                "[secret]".to_owned()
            } else {
                preview(&value)
            },
        );
        if let Some(resolver) = resolvers.remove(&export.name) {
            resolver.resolve(value);
        }
    }
    Ok(previews)
}

/// Fails every remaining port and the completion gate with the same error.
fn fail_ports(resolvers: PortResolvers, done: OutputResolver<()>, error: &OutputError) {
    for resolver in resolvers.into_values() {
        resolver.fail(error.clone());
    }
    done.fail(error.clone());
}

/// Settles a node that never dispatched because an upstream value failed.
fn settle_skip(
    key: ResourceKey,
    kind: NodeKind,
    resolvers: PortResolvers,
    done: OutputResolver<()>,
    observed: &OutputError,
) -> NodeReport {
    let prop = observed.propagated();
    fail_ports(resolvers, done, &prop);
    skipped_report(key, kind, &prop)
}

/// Settles a node that never dispatched because the run was cancelled.
fn settle_cancelled(
    key: ResourceKey,
    kind: NodeKind,
    resolvers: PortResolvers,
    done: OutputResolver<()>,
) -> NodeReport {
    let error = OutputError::Cancelled {
        resource: key.clone(),
    };
    fail_ports(resolvers, done, &error);
    cancelled_report(key, kind)
}

fn skipped_report(key: ResourceKey, kind: NodeKind, propagated: &OutputError) -> NodeReport {
    NodeReport {
        key,
        kind,
        state: NodeState::Skipped,
        create_seq: None,
        elapsed_ms: None,
        error: Some(propagated.to_string()),
        skip_cause: Some(cause_of(propagated)),
        outputs: BTreeMap::new(),
    }
}

fn cancelled_report(key: ResourceKey, kind: NodeKind) -> NodeReport {
    let error = OutputError::Cancelled {
        resource: key.clone(),
    };
    NodeReport {
        key,
        kind,
        state: NodeState::Skipped,
        create_seq: None,
        elapsed_ms: None,
        error: Some(error.to_string()),
        skip_cause: Some(SkipCause::Cancelled),
        outputs: BTreeMap::new(),
    }
}

fn created_report(
    key: ResourceKey,
    kind: NodeKind,
    create_seq: Option<u64>,
    elapsed_ms: Option<u64>,
    outputs: BTreeMap<String, String>,
) -> NodeReport {
    NodeReport {
        key,
        kind,
        state: NodeState::Created,
        create_seq,
        elapsed_ms,
        error: None,
        skip_cause: None,
        outputs,
    }
}

fn failed_report(
    key: ResourceKey,
    kind: NodeKind,
    create_seq: Option<u64>,
    elapsed_ms: Option<u64>,
    error: String,
) -> NodeReport {
    NodeReport {
        key,
        kind,
        state: NodeState::Failed,
        create_seq,
        elapsed_ms,
        error: Some(error),
        skip_cause: None,
        outputs: BTreeMap::new(),
    }
}

fn cause_of(error: &OutputError) -> SkipCause {
    match error {
        OutputError::Provider { .. } | OutputError::Command { .. } | OutputError::Skipped { .. } => {
            SkipCause::DependencyFailed
        }
        OutputError::Transform { .. } => SkipCause::TransformFailed,
        OutputError::Cancelled { .. } => SkipCause::Cancelled,
        OutputError::Dropped { .. } => SkipCause::PortDropped,
    }
}

fn kind_of(node: &Node) -> NodeKind {
    match node {
        Node::Resource(_) => NodeKind::Resource,
        Node::Command(_) => NodeKind::Command,
        Node::FanOut(_) => NodeKind::FanOut,
    }
}

/// The root cause of a failed run.
///
/// The earliest dispatched failure wins; a failure without a stamp (a failed
/// fan-out group, say) only wins when nothing dispatched failed. When nothing
/// failed outright, a transform error or dropped port among the skips is
/// still a failure of the run and is reported from the skipped node that
/// observed it.
fn select_failure(nodes: &BTreeMap<ResourceKey, NodeReport>) -> Option<RunFailure> {
    let mut candidates: Vec<&NodeReport> = nodes
        .values()
        .filter(|n| n.state == NodeState::Failed)
        .collect();
    if candidates.is_empty() {
        candidates = nodes
            .values()
            .filter(|n| {
                matches!(
                    n.skip_cause,
                    Some(SkipCause::TransformFailed | SkipCause::PortDropped)
                )
            })
            .collect();
    }
    candidates
        .into_iter()
        .min_by(|a, b| {
            let sa = a.create_seq.unwrap_or(u64::MAX);
            let sb = b.create_seq.unwrap_or(u64::MAX);
            sa.cmp(&sb).then_with(|| a.key.cmp(&b.key))
        })
        .map(|n| RunFailure {
            resource: n.key.clone(),
            error: n.error.clone().unwrap_or_default(),
        })
}

/// Environment rendering of a resolved value. Strings pass through verbatim
/// and null renders empty; everything else is compact JSON.
fn env_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

const PREVIEW_MAX: usize = 48;

/// A short, single-line rendering of a resolved port value for reports.
fn preview(value: &Value) -> String {
    let text = match value {
        Value::String(text) => text.trim_end().to_owned(),
        other => other.to_string(),
    };
    if text.chars().count() > PREVIEW_MAX {
        let head: String = text.chars().take(PREVIEW_MAX).collect();
        format!("{head}…")
    } else {
        text
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{ResourceName, ResourceType};
    use gantry_graph::{CommandSpec, FanOutSpec, ResourceSpec, literal};
    use gantry_provider::{SIM_OUTBOUND_IPS, SimProvider, SimRunner};
    use pretty_assertions::assert_eq;

    fn rtype(s: &str) -> ResourceType {
        s.parse().unwrap()
    }

    fn name(s: &str) -> ResourceName {
        s.parse().unwrap()
    }

    fn key(s: &str) -> ResourceKey {
        s.parse().unwrap()
    }

    fn ctx() -> ProviderContext {
        ProviderContext::new("test", "westeurope")
    }

    fn engine(provider: SimProvider, runner: SimRunner) -> (Engine, Arc<SimProvider>) {
        let provider = Arc::new(provider);
        let engine = Engine::new(provider.clone(), Arc::new(runner));
        (engine, provider)
    }

    fn seq_of(report: &RunReport, k: &str) -> u64 {
        report.node(&key(k)).unwrap().create_seq.unwrap()
    }

    fn state_of(report: &RunReport, k: &str) -> NodeState {
        report.node(&key(k)).unwrap().state
    }

    /// Splits comma-separated provider text into elements.
    fn split_ips(value: Value) -> Result<Vec<String>, String> {
        match value {
            Value::String(text) => Ok(text
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()),
            other => Err(format!("expected text, got {other}")),
        }
    }

    #[tokio::test]
    async fn chain_runs_in_dependency_order() {
        let mut builder = Deployment::builder("chain");
        let a = builder
            .add_resource(ResourceSpec::new(rtype("toy:box:A"), name("a")).with_export("id"));
        let b = builder.add_resource(
            ResourceSpec::new(rtype("toy:box:B"), name("b"))
                .with_input("a", a.output("id").unwrap())
                .with_export("id"),
        );
        builder.add_resource(
            ResourceSpec::new(rtype("toy:box:C"), name("c")).with_input("b", b.output("id").unwrap()),
        );
        let deployment = builder.build().unwrap();

        let (engine, provider) = engine(SimProvider::new(), SimRunner::new());
        let report = engine.run(deployment, ctx()).await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.count(NodeState::Created), 3);
        assert_eq!(
            provider.created_keys(),
            vec![key("toy:box:A::a"), key("toy:box:B::b"), key("toy:box:C::c")]
        );
        assert!(seq_of(&report, "toy:box:A::a") < seq_of(&report, "toy:box:B::b"));
        assert!(seq_of(&report, "toy:box:B::b") < seq_of(&report, "toy:box:C::c"));
    }

    #[tokio::test]
    async fn independent_branches_both_complete() {
        let mut builder = Deployment::builder("diamond");
        let root = builder
            .add_resource(ResourceSpec::new(rtype("toy:box:Root"), name("r")).with_export("id"));
        let left = builder.add_resource(
            ResourceSpec::new(rtype("toy:box:Left"), name("l"))
                .with_input("root", root.output("id").unwrap())
                .with_export("id"),
        );
        let right = builder.add_resource(
            ResourceSpec::new(rtype("toy:box:Right"), name("rt"))
                .with_input("root", root.output("id").unwrap())
                .with_export("id"),
        );
        builder.add_resource(
            ResourceSpec::new(rtype("toy:box:Join"), name("j"))
                .with_input("left", left.output("id").unwrap())
                .with_input("right", right.output("id").unwrap()),
        );
        let deployment = builder.build().unwrap();

        let (engine, _) = engine(SimProvider::new(), SimRunner::new());
        let report = engine.run(deployment, ctx()).await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        let root_seq = seq_of(&report, "toy:box:Root::r");
        let join_seq = seq_of(&report, "toy:box:Join::j");
        for mid in ["toy:box:Left::l", "toy:box:Right::rt"] {
            assert!(root_seq < seq_of(&report, mid));
            assert!(seq_of(&report, mid) < join_seq);
        }
    }

    #[tokio::test]
    async fn failure_skips_transitive_dependents_only() {
        let mut builder = Deployment::builder("contained");
        let root = builder
            .add_resource(ResourceSpec::new(rtype("toy:box:Root"), name("r")).with_export("id"));
        let mid = builder.add_resource(
            ResourceSpec::new(rtype("toy:box:Mid"), name("m"))
                .with_input("root", root.output("id").unwrap())
                .with_export("id"),
        );
        builder.add_resource(
            ResourceSpec::new(rtype("toy:box:Leaf"), name("leaf"))
                .with_input("mid", mid.output("id").unwrap()),
        );
        builder.add_resource(
            ResourceSpec::new(rtype("toy:box:Other"), name("o"))
                .with_input("root", root.output("id").unwrap()),
        );
        let deployment = builder.build().unwrap();

        let (engine, _) = engine(
            SimProvider::new().with_failure(key("toy:box:Mid::m")),
            SimRunner::new(),
        );
        let report = engine.run(deployment, ctx()).await.unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(state_of(&report, "toy:box:Root::r"), NodeState::Created);
        assert_eq!(state_of(&report, "toy:box:Mid::m"), NodeState::Failed);
        assert_eq!(state_of(&report, "toy:box:Leaf::leaf"), NodeState::Skipped);
        assert_eq!(state_of(&report, "toy:box:Other::o"), NodeState::Created);

        let leaf = report.node(&key("toy:box:Leaf::leaf")).unwrap();
        assert_eq!(leaf.skip_cause, Some(SkipCause::DependencyFailed));
        assert_eq!(
            leaf.error.as_deref(),
            Some("skipped: upstream resource `toy:box:Mid::m` failed")
        );

        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.resource, key("toy:box:Mid::m"));
        assert!(failure.error.contains("simulated failure"));
    }

    #[tokio::test]
    async fn transform_failure_skips_consumer_and_is_reported() {
        let mut builder = Deployment::builder("transforms");
        let a = builder
            .add_resource(ResourceSpec::new(rtype("toy:box:A"), name("a")).with_export("id"));
        let broken = a
            .output("id")
            .unwrap()
            .try_map(|_| -> Result<Value, String> { Err("bad split".to_owned()) });
        builder.add_resource(
            ResourceSpec::new(rtype("toy:box:B"), name("b")).with_input("a", broken),
        );
        builder.add_resource(ResourceSpec::new(rtype("toy:box:C"), name("c")));
        let deployment = builder.build().unwrap();

        let (engine, _) = engine(SimProvider::new(), SimRunner::new());
        let report = engine.run(deployment, ctx()).await.unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(state_of(&report, "toy:box:A::a"), NodeState::Created);
        assert_eq!(state_of(&report, "toy:box:C::c"), NodeState::Created);

        let consumer = report.node(&key("toy:box:B::b")).unwrap();
        assert_eq!(consumer.state, NodeState::Skipped);
        assert_eq!(consumer.skip_cause, Some(SkipCause::TransformFailed));

        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.resource, key("toy:box:B::b"));
        assert!(failure.error.contains("bad split"));
    }

    #[tokio::test]
    async fn fan_out_deduplicates_and_creates_children() {
        let mut builder = Deployment::builder("fan-out");
        let app = builder.add_resource(
            ResourceSpec::new(rtype("azure:web:AppService"), name("app"))
                .with_export("outbound_ips"),
        );
        let ips = app.output("outbound_ips").unwrap().try_map(split_ips);
        let group = builder.add_fan_out(FanOutSpec::new(
            name("app-firewall"),
            ips,
            rtype("azure:sql:FirewallRule"),
            "allow-",
            |ip| {
                BTreeMap::from([
                    ("start_ip".to_owned(), literal(ip)),
                    ("end_ip".to_owned(), literal(ip)),
                ])
            },
        ));
        let created = group.created();
        let deployment = builder.build().unwrap();

        let (engine, provider) = engine(SimProvider::new(), SimRunner::new());
        let report = engine.run(deployment, ctx()).await.unwrap();

        // Four entries, three distinct addresses.
        assert_eq!(SIM_OUTBOUND_IPS.split(',').count(), 4);
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.count(NodeState::Created), 5); // app + group + 3 children

        let expected_children = [
            "azure:sql:FirewallRule::allow-198.51.100.10",
            "azure:sql:FirewallRule::allow-203.0.113.5",
            "azure:sql:FirewallRule::allow-192.0.2.8",
        ];
        for child in expected_children {
            let node = report.node(&key(child)).unwrap();
            assert_eq!(node.state, NodeState::Created);
            assert_eq!(node.kind, NodeKind::FanOutChild);
        }
        // The created port lists children in first-seen element order.
        assert_eq!(
            created.get().await.unwrap(),
            Value::Array(
                expected_children
                    .iter()
                    .map(|k| Value::String((*k).to_owned()))
                    .collect()
            )
        );
        // Each distinct address was created exactly once.
        let firewall_creations = provider
            .created_keys()
            .into_iter()
            .filter(|k| k.rtype().as_str() == "azure:sql:FirewallRule")
            .count();
        assert_eq!(firewall_creations, 3);
    }

    #[tokio::test]
    async fn fan_out_over_empty_list_creates_nothing() {
        let mut builder = Deployment::builder("empty-fan-out");
        let group = builder.add_fan_out(FanOutSpec::new(
            name("rules"),
            Output::resolved(Vec::new()),
            rtype("azure:sql:FirewallRule"),
            "allow-",
            |_| BTreeMap::new(),
        ));
        let created = group.created();
        let deployment = builder.build().unwrap();

        let (engine, provider) = engine(SimProvider::new(), SimRunner::new());
        let report = engine.run(deployment, ctx()).await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.nodes.len(), 1);
        assert_eq!(state_of(&report, "group:fan-out::rules"), NodeState::Created);
        assert_eq!(created.get().await.unwrap(), Value::Array(Vec::new()));
        assert!(provider.created_keys().is_empty());
    }

    #[tokio::test]
    async fn fan_out_child_failure_fails_group_and_run() {
        let bad_child = key("azure:sql:FirewallRule::allow-10.0.0.1");
        let mut builder = Deployment::builder("fan-out-failure");
        builder.add_fan_out(FanOutSpec::new(
            name("rules"),
            Output::resolved(vec!["10.0.0.1".to_owned(), "10.0.0.2".to_owned()]),
            rtype("azure:sql:FirewallRule"),
            "allow-",
            |ip| {
                BTreeMap::from([
                    ("start_ip".to_owned(), literal(ip)),
                    ("end_ip".to_owned(), literal(ip)),
                ])
            },
        ));
        let deployment = builder.build().unwrap();

        let (engine, _) = engine(
            SimProvider::new().with_failure(bad_child.clone()),
            SimRunner::new(),
        );
        let report = engine.run(deployment, ctx()).await.unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(
            state_of(&report, "azure:sql:FirewallRule::allow-10.0.0.1"),
            NodeState::Failed
        );
        assert_eq!(
            state_of(&report, "azure:sql:FirewallRule::allow-10.0.0.2"),
            NodeState::Created
        );
        let group = report.node(&key("group:fan-out::rules")).unwrap();
        assert_eq!(group.state, NodeState::Failed);
        assert!(group.error.as_deref().unwrap().contains("allow-10.0.0.1"));

        // The child, not the group, is the root cause: it carries the stamp.
        assert_eq!(report.failure.as_ref().unwrap().resource, bad_child);
    }

    #[tokio::test]
    async fn command_env_is_injected_and_stdout_feeds_downstream() {
        let mut builder = Deployment::builder("commands");
        let discover = builder.add_command(
            CommandSpec::new(name("operator-ip"), "curl").with_arg("https://api.ipify.org"),
        );
        let ip = discover.stdout().try_map(|value| match value {
            Value::String(text) => Ok(Value::String(text.trim().to_owned())),
            other => Err(format!("stdout was not text: {other}")),
        });
        builder.add_resource(
            ResourceSpec::new(rtype("azure:sql:FirewallRule"), name("allow-operator"))
                .with_input("start_ip", ip.clone())
                .with_input("end_ip", ip)
                .with_export("start_ip")
                .with_export("end_ip"),
        );
        builder.add_command(
            CommandSpec::new(name("migrate"), "dotnet")
                .with_args(["ef", "database", "update"])
                .with_env("DATABASE_CONNECTION_STRING", {
                    Output::secret(Value::String("Password=s3cret;".to_owned()))
                }),
        );
        let deployment = builder.build().unwrap();

        let runner = SimRunner::new().with_stdout("operator-ip", "203.0.113.99\n");
        let provider = Arc::new(SimProvider::new());
        let runner = Arc::new(runner);
        let engine = Engine::new(provider.clone(), runner.clone());
        let report = engine.run(deployment, ctx()).await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        let rule = report
            .node(&key("azure:sql:FirewallRule::allow-operator"))
            .unwrap();
        assert_eq!(rule.outputs["start_ip"], "203.0.113.99");
        assert_eq!(rule.outputs["end_ip"], "203.0.113.99");

        let discover_seq = seq_of(&report, "exec:command::operator-ip");
        let rule_seq = seq_of(&report, "azure:sql:FirewallRule::allow-operator");
        assert!(discover_seq < rule_seq);

        let journal = runner.journal();
        let migrate = journal
            .iter()
            .find(|c| c.key.name().as_str() == "migrate")
            .unwrap();
        assert_eq!(migrate.env["DATABASE_CONNECTION_STRING"], "Password=s3cret;");
    }

    #[tokio::test]
    async fn declared_dependency_orders_unrelated_nodes() {
        let mut builder = Deployment::builder("declared");
        let build = builder.add_command(CommandSpec::new(name("build"), "dotnet").with_arg("publish"));
        builder.add_resource(
            ResourceSpec::new(rtype("azure:storage:Blob"), name("package"))
                .with_input("container", literal("zips"))
                .with_dependency(build.key().clone()),
        );
        let deployment = builder.build().unwrap();

        let (engine, _) = engine(SimProvider::new(), SimRunner::new());
        let report = engine.run(deployment, ctx()).await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert!(seq_of(&report, "exec:command::build") < seq_of(&report, "azure:storage:Blob::package"));
    }

    #[tokio::test]
    async fn declared_dependency_failure_skips_dependent() {
        let mut builder = Deployment::builder("declared-failure");
        let build = builder.add_command(CommandSpec::new(name("build"), "dotnet").with_arg("publish"));
        builder.add_resource(
            ResourceSpec::new(rtype("azure:storage:Blob"), name("package"))
                .with_input("container", literal("zips"))
                .with_dependency(build.key().clone()),
        );
        let deployment = builder.build().unwrap();

        let (engine, _) = engine(SimProvider::new(), SimRunner::new().with_failure("build"));
        let report = engine.run(deployment, ctx()).await.unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(state_of(&report, "exec:command::build"), NodeState::Failed);
        let blob = report.node(&key("azure:storage:Blob::package")).unwrap();
        assert_eq!(blob.state, NodeState::Skipped);
        assert_eq!(blob.skip_cause, Some(SkipCause::DependencyFailed));
        assert!(blob.error.as_deref().unwrap().contains("exec:command::build"));

        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.resource, key("exec:command::build"));
        assert!(failure.error.contains("exited with status 1"));
    }

    #[tokio::test]
    async fn cancelled_before_start_skips_everything() {
        let mut builder = Deployment::builder("cancelled");
        let a = builder
            .add_resource(ResourceSpec::new(rtype("toy:box:A"), name("a")).with_export("id"));
        builder.add_resource(
            ResourceSpec::new(rtype("toy:box:B"), name("b")).with_input("a", a.output("id").unwrap()),
        );
        let deployment = builder.build().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (engine, provider) = engine(SimProvider::new(), SimRunner::new());
        let report = engine
            .run_with_cancellation(deployment, ctx(), cancel)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Cancelled);
        assert!(report.failure.is_none());
        assert_eq!(report.count(NodeState::Skipped), 2);
        for node in report.nodes.values() {
            assert_eq!(node.skip_cause, Some(SkipCause::Cancelled));
        }
        assert!(provider.created_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn node_timeout_fails_the_node() {
        let slow = key("toy:box:Slow::s");
        let mut builder = Deployment::builder("timeouts");
        builder.add_resource(ResourceSpec::new(rtype("toy:box:Slow"), name("s")));
        let deployment = builder.build().unwrap();

        let provider = SimProvider::new().with_delay(slow.clone(), Duration::from_secs(60));
        let (engine, _) = engine(provider, SimRunner::new());
        let engine = engine.with_budget(RunBudget::default().with_node_timeout(Duration::from_secs(1)));
        let report = engine.run(deployment, ctx()).await.unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        let node = report.node(&slow).unwrap();
        assert_eq!(node.state, NodeState::Failed);
        assert!(node.error.as_deref().unwrap().contains("timed out after 1s"));
    }

    #[tokio::test]
    async fn already_executed_deployment_is_rejected() {
        let mut builder = Deployment::builder("spent");
        let a = builder.add_resource(ResourceSpec::new(rtype("toy:box:A"), name("a")));
        let deployment = builder.build().unwrap();
        // Spend the ports out from under the engine.
        deployment.get(a.key()).unwrap().take_resolvers().unwrap();

        let (engine, _) = engine(SimProvider::new(), SimRunner::new());
        let error = engine.run(deployment, ctx()).await.unwrap_err();
        assert!(matches!(
            error,
            EngineError::AlreadyExecuted { resource } if resource == *a.key()
        ));
    }

    #[tokio::test]
    async fn every_node_is_terminal_after_a_failed_run() {
        let mut builder = Deployment::builder("terminal");
        let root = builder
            .add_resource(ResourceSpec::new(rtype("toy:box:Root"), name("r")).with_export("id"));
        for i in 0..4 {
            builder.add_resource(
                ResourceSpec::new(rtype("toy:box:Leaf"), name(&format!("leaf-{i}")))
                    .with_input("root", root.output("id").unwrap()),
            );
        }
        let deployment = builder.build().unwrap();

        let (engine, _) = engine(
            SimProvider::new().with_failure(key("toy:box:Root::r")),
            SimRunner::new(),
        );
        let report = engine.run(deployment, ctx()).await.unwrap();

        assert_eq!(report.nodes.len(), 5);
        assert!(report.nodes.values().all(|n| n.state.is_terminal()));
        assert_eq!(report.count(NodeState::Failed), 1);
        assert_eq!(report.count(NodeState::Skipped), 4);
    }

    #[tokio::test]
    async fn secret_exports_are_redacted_in_report() {
        let mut builder = Deployment::builder("secrets");
        let account = builder.add_resource(
            ResourceSpec::new(rtype("azure:storage:Account"), name("media"))
                .with_export("name")
                .with_secret_export("primary_access_key"),
        );
        let access_key = account.output("primary_access_key").unwrap();
        assert!(access_key.is_secret());
        let deployment = builder.build().unwrap();

        let (engine, _) = engine(SimProvider::new(), SimRunner::new());
        let report = engine.run(deployment, ctx()).await.unwrap();

        let node = report.node(&key("azure:storage:Account::media")).unwrap();
        assert_eq!(node.outputs["name"], "media");
        assert_eq!(node.outputs["primary_access_key"], "[secret]");

        // The resolved value itself must appear nowhere in the rendering.
        let Value::String(raw_key) = access_key.get().await.unwrap() else {
            panic!("expected a string access key");
        };
        assert!(!report.render().contains(&raw_key));
    }

    #[test]
    fn preview_truncates_and_trims() {
        assert_eq!(preview(&Value::String("203.0.113.99\n".into())), "203.0.113.99");
        assert_eq!(preview(&Value::Bool(true)), "true");
        let long = "x".repeat(60);
        let shortened = preview(&Value::String(long));
        assert_eq!(shortened.chars().count(), PREVIEW_MAX + 1);
        assert!(shortened.ends_with('…'));
    }

    #[test]
    fn env_text_passes_strings_through() {
        assert_eq!(env_text(Value::String("a;b".into())), "a;b");
        assert_eq!(env_text(Value::Null), "");
        assert_eq!(env_text(serde_json::json!(42)), "42");
    }
}
