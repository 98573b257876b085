//! Spec types and the nodes they become once added to a builder.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gantry_core::{ResourceKey, ResourceName, ResourceType};
use gantry_output::{Output, OutputResolver};
use parking_lot::Mutex;
use serde_json::Value;

/// An input wires one JSON value, literal or not-yet-resolved, into a spec.
pub type Input = Output<Value>;

/// The port every command step exposes.
pub const STDOUT_PORT: &str = "stdout";

/// The port every fan-out group exposes: the keys of its created children.
pub const CREATED_PORT: &str = "created";

/// Builds an already-resolved input from a literal value.
pub fn literal(value: impl Into<Value>) -> Input {
    Output::resolved(value.into())
}

/// One declared output port of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    /// Port name, matched against the provider's returned outputs.
    pub name: String,
    /// Secret ports are redacted in reports and logs, and everything derived
    /// from them inherits the marking.
    pub secret: bool,
}

/// The output ports of one node.
///
/// Outputs are created eagerly at declaration time so later specs can embed
/// them; the matching resolvers are taken exactly once by the engine.
pub struct Ports {
    outputs: BTreeMap<String, Input>,
    resolvers: Mutex<Option<BTreeMap<String, OutputResolver<Value>>>>,
}

impl Ports {
    pub(crate) fn from_exports(key: &ResourceKey, exports: &[Export]) -> Self {
        let mut outputs = BTreeMap::new();
        let mut resolvers = BTreeMap::new();
        for export in exports {
            let (resolver, output) = if export.secret {
                Input::deferred_secret(key.clone())
            } else {
                Input::deferred(key.clone())
            };
            outputs.insert(export.name.clone(), output);
            resolvers.insert(export.name.clone(), resolver);
        }
        Self {
            outputs,
            resolvers: Mutex::new(Some(resolvers)),
        }
    }

    pub(crate) fn single(name: &str, output: Input, resolver: OutputResolver<Value>) -> Self {
        Self {
            outputs: BTreeMap::from([(name.to_owned(), output)]),
            resolvers: Mutex::new(Some(BTreeMap::from([(name.to_owned(), resolver)]))),
        }
    }

    /// A clone of the named port, if declared.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<Input> {
        self.outputs.get(name).cloned()
    }

    /// Declared port names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    pub(crate) fn outputs(&self) -> &BTreeMap<String, Input> {
        &self.outputs
    }

    /// Removes and returns the write halves of every port.
    ///
    /// Returns `None` on the second call: a deployment can only be executed
    /// once, and the engine turns a second take into a planning error.
    pub fn take_resolvers(&self) -> Option<BTreeMap<String, OutputResolver<Value>>> {
        self.resolvers.lock().take()
    }
}

impl fmt::Debug for Ports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ports")
            .field("names", &self.outputs.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Declares one infrastructure object to create.
#[derive(Debug)]
pub struct ResourceSpec {
    key: ResourceKey,
    inputs: BTreeMap<String, Input>,
    exports: Vec<Export>,
    depends_on: Vec<ResourceKey>,
    timeout: Option<Duration>,
}

impl ResourceSpec {
    /// Starts a spec for the given type and name.
    #[must_use]
    pub fn new(rtype: ResourceType, name: ResourceName) -> Self {
        Self {
            key: ResourceKey::new(rtype, name),
            inputs: BTreeMap::new(),
            exports: Vec::new(),
            depends_on: Vec::new(),
            timeout: None,
        }
    }

    /// Adds a named input. Later inserts with the same name win.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, input: Input) -> Self {
        self.inputs.insert(name.into(), input);
        self
    }

    /// Declares an output port the provider must return.
    #[must_use]
    pub fn with_export(mut self, name: impl Into<String>) -> Self {
        self.exports.push(Export {
            name: name.into(),
            secret: false,
        });
        self
    }

    /// Declares a sensitive output port.
    #[must_use]
    pub fn with_secret_export(mut self, name: impl Into<String>) -> Self {
        self.exports.push(Export {
            name: name.into(),
            secret: true,
        });
        self
    }

    /// Adds an explicit ordering edge on top of the inferred ones.
    #[must_use]
    pub fn with_dependency(mut self, key: ResourceKey) -> Self {
        self.depends_on.push(key);
        self
    }

    /// Overrides the engine's per-resource creation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The spec's identity.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub(crate) fn into_node(self) -> ResourceNode {
        let ports = Ports::from_exports(&self.key, &self.exports);
        ResourceNode {
            key: self.key,
            inputs: self.inputs,
            exports: self.exports,
            depends_on: self.depends_on,
            timeout: self.timeout,
            ports,
        }
    }
}

/// Declares one external command step.
#[derive(Debug)]
pub struct CommandSpec {
    key: ResourceKey,
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, Input>,
    depends_on: Vec<ResourceKey>,
    timeout: Option<Duration>,
}

impl CommandSpec {
    /// Starts a command spec; steps live under the reserved `exec:command`
    /// type.
    #[must_use]
    pub fn new(name: ResourceName, program: impl Into<String>) -> Self {
        Self {
            key: ResourceKey::new(ResourceType::command(), name),
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            depends_on: Vec::new(),
            timeout: None,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Injects a resolved value, secrets included, as an environment
    /// variable. Env values never appear in logs or reports.
    #[must_use]
    pub fn with_env(mut self, name: impl Into<String>, input: Input) -> Self {
        self.env.insert(name.into(), input);
        self
    }

    /// Adds an explicit ordering edge.
    #[must_use]
    pub fn with_dependency(mut self, key: ResourceKey) -> Self {
        self.depends_on.push(key);
        self
    }

    /// Overrides the engine's command timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The step's identity.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub(crate) fn into_node(self) -> (CommandNode, Input) {
        let (resolver, stdout) = Input::deferred(self.key.clone());
        let ports = Ports::single(STDOUT_PORT, stdout.clone(), resolver);
        let node = CommandNode {
            key: self.key,
            program: self.program,
            args: self.args,
            working_dir: self.working_dir,
            env: self.env,
            depends_on: self.depends_on,
            timeout: self.timeout,
            ports,
        };
        (node, stdout)
    }
}

/// The per-element input constructor of a fan-out group.
pub type ChildInputs = Arc<dyn Fn(&str) -> BTreeMap<String, Input> + Send + Sync>;

/// Declares a group that creates one child resource per element of a
/// collection that only resolves at run time.
///
/// Elements are deduplicated preserving first-seen order, so a repeated
/// element yields one child; within a run this makes children idempotent per
/// value. Across runs no pruning happens; children from earlier runs are
/// left alone, since reconciliation against existing state is out of scope.
pub struct FanOutSpec {
    key: ResourceKey,
    source: Output<Vec<String>>,
    child_type: ResourceType,
    child_prefix: String,
    child_inputs: ChildInputs,
    depends_on: Vec<ResourceKey>,
    timeout: Option<Duration>,
}

impl FanOutSpec {
    /// Starts a fan-out spec; groups live under the reserved `group:fan-out`
    /// type. Each child is keyed `{child_prefix}{element}` (sanitised into a
    /// valid name) under `child_type`.
    #[must_use]
    pub fn new<F>(
        name: ResourceName,
        source: Output<Vec<String>>,
        child_type: ResourceType,
        child_prefix: impl Into<String>,
        child_inputs: F,
    ) -> Self
    where
        F: Fn(&str) -> BTreeMap<String, Input> + Send + Sync + 'static,
    {
        Self {
            key: ResourceKey::new(ResourceType::fan_out(), name),
            source,
            child_type,
            child_prefix: child_prefix.into(),
            child_inputs: Arc::new(child_inputs),
            depends_on: Vec::new(),
            timeout: None,
        }
    }

    /// Adds an explicit ordering edge.
    #[must_use]
    pub fn with_dependency(mut self, key: ResourceKey) -> Self {
        self.depends_on.push(key);
        self
    }

    /// Overrides the engine's per-child creation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The group's identity.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub(crate) fn into_node(self) -> (FanOutNode, Input) {
        let (resolver, created) = Input::deferred(self.key.clone());
        let ports = Ports::single(CREATED_PORT, created.clone(), resolver);
        let node = FanOutNode {
            key: self.key,
            source: self.source,
            child_type: self.child_type,
            child_prefix: self.child_prefix,
            child_inputs: self.child_inputs,
            depends_on: self.depends_on,
            timeout: self.timeout,
            ports,
        };
        (node, created)
    }
}

impl fmt::Debug for FanOutSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutSpec")
            .field("key", &self.key)
            .field("child_type", &self.child_type)
            .field("child_prefix", &self.child_prefix)
            .finish()
    }
}

/// A built resource node.
#[derive(Debug)]
pub struct ResourceNode {
    /// Identity.
    pub key: ResourceKey,
    /// Named inputs awaited before creation.
    pub inputs: BTreeMap<String, Input>,
    /// Declared output ports.
    pub exports: Vec<Export>,
    /// Explicit ordering edges.
    pub depends_on: Vec<ResourceKey>,
    /// Per-node timeout override.
    pub timeout: Option<Duration>,
    /// The ports downstream specs embed.
    pub ports: Ports,
}

/// A built command node.
#[derive(Debug)]
pub struct CommandNode {
    /// Identity.
    pub key: ResourceKey,
    /// Program to execute.
    pub program: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// Working directory, if overridden.
    pub working_dir: Option<PathBuf>,
    /// Environment entries awaited before execution.
    pub env: BTreeMap<String, Input>,
    /// Explicit ordering edges.
    pub depends_on: Vec<ResourceKey>,
    /// Per-node timeout override.
    pub timeout: Option<Duration>,
    /// The single `stdout` port.
    pub ports: Ports,
}

/// A built fan-out group node.
pub struct FanOutNode {
    /// Identity of the group itself.
    pub key: ResourceKey,
    /// The collection driving expansion.
    pub source: Output<Vec<String>>,
    /// Type of every child.
    pub child_type: ResourceType,
    /// Prefix of every child name.
    pub child_prefix: String,
    /// Builds each child's inputs from its element.
    pub child_inputs: ChildInputs,
    /// Explicit ordering edges.
    pub depends_on: Vec<ResourceKey>,
    /// Per-child timeout override.
    pub timeout: Option<Duration>,
    /// The single `created` port.
    pub ports: Ports,
}

/// The deterministic key of a fan-out child for one element.
///
/// Sanitisation maps distinct raw elements onto valid names; callers keep
/// prefixes and elements distinct enough that no two elements collide.
#[must_use]
pub fn fan_out_child_key(
    child_type: &ResourceType,
    child_prefix: &str,
    element: &str,
) -> ResourceKey {
    let name = ResourceName::sanitized(&format!("{child_prefix}{element}"));
    ResourceKey::new(child_type.clone(), name)
}

impl FanOutNode {
    /// The deterministic key of the child for `element`.
    #[must_use]
    pub fn child_key(&self, element: &str) -> ResourceKey {
        fan_out_child_key(&self.child_type, &self.child_prefix, element)
    }
}

impl fmt::Debug for FanOutNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutNode")
            .field("key", &self.key)
            .field("child_type", &self.child_type)
            .field("child_prefix", &self.child_prefix)
            .field("source", &self.source)
            .finish()
    }
}

/// Any node of a deployment.
#[derive(Debug)]
pub enum Node {
    /// An infrastructure object.
    Resource(ResourceNode),
    /// An external command step.
    Command(CommandNode),
    /// A dynamic fan-out group.
    FanOut(FanOutNode),
}

impl Node {
    /// The node's identity.
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        match self {
            Self::Resource(n) => &n.key,
            Self::Command(n) => &n.key,
            Self::FanOut(n) => &n.key,
        }
    }

    /// Explicit ordering edges declared on the spec.
    #[must_use]
    pub fn depends_on(&self) -> &[ResourceKey] {
        match self {
            Self::Resource(n) => &n.depends_on,
            Self::Command(n) => &n.depends_on,
            Self::FanOut(n) => &n.depends_on,
        }
    }

    /// Per-node timeout override.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::Resource(n) => n.timeout,
            Self::Command(n) => n.timeout,
            Self::FanOut(n) => n.timeout,
        }
    }

    /// The node's output ports.
    #[must_use]
    pub fn ports(&self) -> &Ports {
        match self {
            Self::Resource(n) => &n.ports,
            Self::Command(n) => &n.ports,
            Self::FanOut(n) => &n.ports,
        }
    }

    /// Removes the write halves of this node's ports; see
    /// [`Ports::take_resolvers`].
    #[must_use]
    pub fn take_resolvers(&self) -> Option<BTreeMap<String, OutputResolver<Value>>> {
        self.ports().take_resolvers()
    }

    /// The resources this node's embedded outputs descend from, deduplicated.
    ///
    /// Together with [`depends_on`](Node::depends_on) these define the node's
    /// incoming dependency edges. Fan-out children are expanded at run time,
    /// so only the group's source contributes here.
    #[must_use]
    pub fn input_origins(&self) -> Vec<ResourceKey> {
        let mut origins: Vec<ResourceKey> = Vec::new();
        let mut extend = |keys: &[ResourceKey]| {
            for key in keys {
                if !origins.contains(key) {
                    origins.push(key.clone());
                }
            }
        };
        match self {
            Self::Resource(n) => {
                for input in n.inputs.values() {
                    extend(input.origins());
                }
            }
            Self::Command(n) => {
                for input in n.env.values() {
                    extend(input.origins());
                }
            }
            Self::FanOut(n) => extend(n.source.origins()),
        }
        origins
    }
}
