//! Deterministic in-memory backends for rehearsals and tests.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use gantry_core::ResourceKey;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::command::{CommandOutcome, CommandRequest, CommandRunner};
use crate::context::ProviderContext;
use crate::error::{CommandError, ProviderError};
use crate::provider::{CreateRequest, CreatedResource, Provider};

/// The simulated outbound address list of an app service.
///
/// Deliberately contains a duplicate: four entries, three distinct addresses.
pub const SIM_OUTBOUND_IPS: &str = "198.51.100.10,203.0.113.5,198.51.100.10,192.0.2.8";

/// One successful creation recorded by [`SimProvider`].
#[derive(Debug, Clone)]
pub struct SimCreation {
    /// The created resource.
    pub key: ResourceKey,
    /// The resolved inputs it was created with.
    pub inputs: BTreeMap<String, Value>,
}

/// A provider with stable, recognisable outputs derived from each request.
///
/// Two runs over the same deployment produce identical outputs, which is what
/// makes rehearsals meaningful: the wiring, ordering and formatting under
/// test are exactly those of a real run.
#[derive(Debug, Default)]
pub struct SimProvider {
    fail: BTreeSet<ResourceKey>,
    delays: BTreeMap<ResourceKey, Duration>,
    journal: Mutex<Vec<SimCreation>>,
}

impl SimProvider {
    /// Creates a simulator that succeeds on everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes creation of `key` fail.
    #[must_use]
    pub fn with_failure(mut self, key: ResourceKey) -> Self {
        self.fail.insert(key);
        self
    }

    /// Delays creation of `key`, for ordering and timeout tests.
    #[must_use]
    pub fn with_delay(mut self, key: ResourceKey, delay: Duration) -> Self {
        self.delays.insert(key, delay);
        self
    }

    /// Every successful creation so far, in creation order.
    #[must_use]
    pub fn journal(&self) -> Vec<SimCreation> {
        self.journal.lock().clone()
    }

    /// Keys of every successful creation so far, in creation order.
    #[must_use]
    pub fn created_keys(&self) -> Vec<ResourceKey> {
        self.journal.lock().iter().map(|c| c.key.clone()).collect()
    }
}

#[async_trait]
impl Provider for SimProvider {
    fn name(&self) -> &str {
        "sim"
    }

    async fn create(
        &self,
        _ctx: &ProviderContext,
        request: CreateRequest,
    ) -> Result<CreatedResource, ProviderError> {
        if let Some(delay) = self.delays.get(&request.key).copied() {
            tokio::time::sleep(delay).await;
        }
        if self.fail.contains(&request.key) {
            return Err(ProviderError::CreateFailed {
                resource: request.key,
                reason: "simulated failure".to_owned(),
            });
        }

        let rtype = request.key.rtype().as_str();
        // Command steps and fan-out groups are expanded by the engine and
        // must never reach a provider.
        if rtype == "exec:command" || rtype == "group:fan-out" {
            return Err(ProviderError::UnsupportedType {
                rtype: rtype.to_owned(),
            });
        }
        for input in required_inputs(rtype) {
            request.string_input(input)?;
        }

        let created = canned(&request);
        debug!(resource = %request.key, "simulated creation");
        self.journal.lock().push(SimCreation {
            key: request.key,
            inputs: request.inputs,
        });
        Ok(created)
    }
}

fn required_inputs(rtype: &str) -> &'static [&'static str] {
    match rtype {
        "azure:storage:Container" => &["account"],
        "azure:storage:Blob" => &["container"],
        "azure:sql:Server" => &["admin_password"],
        "azure:sql:Database" => &["server"],
        "azure:sql:FirewallRule" => &["start_ip", "end_ip"],
        _ => &[],
    }
}

fn canned(request: &CreateRequest) -> CreatedResource {
    let name = request.key.name().as_str();
    match request.key.rtype().as_str() {
        "azure:resources:ResourceGroup" | "azure:storage:Container" | "azure:sql:Database" => {
            CreatedResource::new().with_output("name", name)
        }
        "azure:storage:Account" => CreatedResource::new()
            .with_output("name", name)
            .with_output("primary_access_key", account_key(name)),
        "azure:storage:Blob" => {
            let blob_name = request
                .inputs
                .get("blob_name")
                .and_then(Value::as_str)
                .unwrap_or(name);
            CreatedResource::new().with_output("blob_name", blob_name)
        }
        "azure:sql:Server" => CreatedResource::new()
            .with_output("name", name)
            .with_output("fqdn", format!("{name}.database.sim")),
        "azure:sql:FirewallRule" => {
            let mut created = CreatedResource::new().with_output("name", name);
            for echo in ["start_ip", "end_ip"] {
                if let Some(value) = request.inputs.get(echo) {
                    created = created.with_output(echo, value.clone());
                }
            }
            created
        }
        "azure:insights:Component" => {
            CreatedResource::new().with_output("instrumentation_key", format!("sim-ikey-{name}"))
        }
        "azure:web:Plan" => CreatedResource::new().with_output("id", format!("/sim/web/plan/{name}")),
        "azure:web:AppService" => CreatedResource::new()
            .with_output("default_hostname", format!("{name}.azurewebsites.sim"))
            .with_output("outbound_ips", SIM_OUTBOUND_IPS),
        _ => {
            // Unknown types still answer every requested port, so toy graphs
            // in tests work without a catalogue entry.
            let mut created = CreatedResource::new();
            for export in &request.exports {
                let value = if export == "name" {
                    name.to_owned()
                } else {
                    format!("sim:{export}:{name}")
                };
                created = created.with_output(export.clone(), value);
            }
            created
        }
    }
}

fn account_key(name: &str) -> String {
    base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        format!("sim-storage-key-{name}"),
    )
}

/// One command execution recorded by [`SimRunner`].
///
/// Holds resolved environment values so tests can assert on injection; its
/// `Debug` rendering still hides them.
#[derive(Clone)]
pub struct SimCommand {
    /// The step's identity.
    pub key: ResourceKey,
    /// Program that would have been executed.
    pub program: String,
    /// Its arguments.
    pub args: Vec<String>,
    /// The injected environment, values included.
    pub env: BTreeMap<String, String>,
}

impl fmt::Debug for SimCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimCommand")
            .field("key", &self.key)
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A command runner with canned stdout keyed by step name.
///
/// Steps without a canned entry succeed with empty stdout.
#[derive(Debug, Default)]
pub struct SimRunner {
    stdout: BTreeMap<String, String>,
    fail: BTreeSet<String>,
    journal: Mutex<Vec<SimCommand>>,
}

impl SimRunner {
    /// Creates a runner that succeeds on everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stdout the named step will produce.
    #[must_use]
    pub fn with_stdout(mut self, step: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.stdout.insert(step.into(), stdout.into());
        self
    }

    /// Makes the named step exit non-zero.
    #[must_use]
    pub fn with_failure(mut self, step: impl Into<String>) -> Self {
        self.fail.insert(step.into());
        self
    }

    /// Every executed command so far, failing ones included, in order.
    #[must_use]
    pub fn journal(&self) -> Vec<SimCommand> {
        self.journal.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for SimRunner {
    async fn run(&self, request: CommandRequest) -> Result<CommandOutcome, CommandError> {
        let step = request.key.name().as_str().to_owned();
        self.journal.lock().push(SimCommand {
            key: request.key,
            program: request.program.clone(),
            args: request.args,
            env: request.env,
        });
        if self.fail.contains(&step) {
            return Err(CommandError::NonZero {
                program: request.program,
                code: Some(1),
                stderr: "simulated failure".to_owned(),
            });
        }
        let stdout = self.stdout.get(&step).cloned().unwrap_or_default();
        Ok(CommandOutcome {
            stdout,
            stderr: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx() -> ProviderContext {
        ProviderContext::new("dev", "westeurope")
    }

    fn request(key: &str, inputs: &[(&str, Value)], exports: &[&str]) -> CreateRequest {
        CreateRequest {
            key: key.parse().unwrap(),
            inputs: inputs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect(),
            exports: exports.iter().map(|&e| e.to_owned()).collect(),
        }
    }

    #[tokio::test]
    async fn outputs_are_deterministic_per_request() {
        let sim = SimProvider::new();
        let req = request(
            "azure:sql:Server::main",
            &[("admin_password", json!("pw"))],
            &["fqdn"],
        );
        let first = sim.create(&ctx(), req.clone()).await.unwrap();
        let second = sim.create(&ctx(), req).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.outputs["fqdn"], json!("main.database.sim"));
        assert_eq!(sim.journal().len(), 2);
    }

    #[tokio::test]
    async fn blob_echoes_its_blob_name() {
        let sim = SimProvider::new();
        let created = sim
            .create(
                &ctx(),
                request(
                    "azure:storage:Blob::package",
                    &[("container", json!("zips")), ("blob_name", json!("deploy.zip"))],
                    &["blob_name"],
                ),
            )
            .await
            .unwrap();
        assert_eq!(created.outputs["blob_name"], json!("deploy.zip"));
    }

    #[tokio::test]
    async fn account_key_is_valid_base64() {
        let sim = SimProvider::new();
        let created = sim
            .create(&ctx(), request("azure:storage:Account::media", &[], &[]))
            .await
            .unwrap();
        let key = created.outputs["primary_access_key"].as_str().unwrap();
        let decoded =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, key).unwrap();
        assert_eq!(decoded, b"sim-storage-key-media");
    }

    #[tokio::test]
    async fn reserved_types_never_reach_the_provider() {
        let sim = SimProvider::new();
        let err = sim
            .create(&ctx(), request("exec:command::build", &[], &[]))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::UnsupportedType {
                rtype: "exec:command".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn missing_required_input_is_rejected() {
        let sim = SimProvider::new();
        let err = sim
            .create(&ctx(), request("azure:sql:Database::app", &[], &["name"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::InvalidInput { ref input, .. } if input == "server"
        ));
        assert!(sim.journal().is_empty(), "failed creations are not recorded");
    }

    #[tokio::test]
    async fn injected_failure_surfaces() {
        let key: ResourceKey = "a:b:C::x".parse().unwrap();
        let sim = SimProvider::new().with_failure(key.clone());
        let err = sim
            .create(&ctx(), request("a:b:C::x", &[], &["id"]))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::CreateFailed {
                resource: key,
                reason: "simulated failure".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn unknown_types_answer_every_requested_port() {
        let sim = SimProvider::new();
        let created = sim
            .create(&ctx(), request("toy:box:Widget::w", &[], &["id", "name"]))
            .await
            .unwrap();
        assert_eq!(created.outputs["name"], json!("w"));
        assert_eq!(created.outputs["id"], json!("sim:id:w"));
    }

    #[tokio::test]
    async fn runner_returns_canned_stdout_and_records_env() {
        let runner = SimRunner::new().with_stdout("operator-ip", "203.0.113.99\n");
        let outcome = runner
            .run(CommandRequest {
                key: "exec:command::operator-ip".parse().unwrap(),
                program: "curl".to_owned(),
                args: vec!["https://api.ipify.org".to_owned()],
                working_dir: None,
                env: BTreeMap::from([("TOKEN".to_owned(), "t0p".to_owned())]),
            })
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "203.0.113.99\n");

        let journal = runner.journal();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].env["TOKEN"], "t0p");
        assert!(!format!("{:?}", journal[0]).contains("t0p"));
    }

    #[tokio::test]
    async fn runner_failure_is_recorded_then_raised() {
        let runner = SimRunner::new().with_failure("migrate");
        let err = runner
            .run(CommandRequest {
                key: "exec:command::migrate".parse().unwrap(),
                program: "dotnet".to_owned(),
                args: vec![],
                working_dir: None,
                env: BTreeMap::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NonZero { code: Some(1), .. }));
        assert_eq!(runner.journal().len(), 1);
    }
}
