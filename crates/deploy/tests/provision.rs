//! Full-blueprint rehearsals against the simulated provider and runner.
//!
//! These runs exercise the real engine over the real blueprint; only the
//! outermost collaborators are simulated, so wiring, ordering, redaction and
//! failure containment behave exactly as they would against a live provider.

use std::sync::Arc;

use gantry_core::ResourceKey;
use gantry_deploy::{DeployConfig, assemble};
use gantry_engine::{Engine, NodeKind, RunReport, RunStatus, SkipCause};
use gantry_graph::NodeState;
use gantry_provider::{ProviderContext, SimProvider, SimRunner};
use pretty_assertions::assert_eq;

const CONNECTION_PREFIX: &str = "Server=tcp:gantry-sql.database.sim,1433;Initial Catalog=appdb;\
                                 Persist Security Info=False;User ID=sqladmin;Password=";
const CONNECTION_SUFFIX: &str = ";MultipleActiveResultSets=False;Encrypt=True;\
                                 TrustServerCertificate=False;Connection Timeout=30;";

fn ctx() -> ProviderContext {
    ProviderContext::new("dev", "westeurope")
}

fn key(s: &str) -> ResourceKey {
    s.parse().unwrap()
}

fn state(report: &RunReport, k: &str) -> NodeState {
    report.nodes[&key(k)].state
}

fn seq(report: &RunReport, k: &str) -> u64 {
    report.nodes[&key(k)].create_seq.unwrap()
}

#[tokio::test]
async fn full_environment_provisions_end_to_end() {
    let provider = Arc::new(SimProvider::new());
    let runner = Arc::new(SimRunner::new().with_stdout("operator-ip", "203.0.113.99\n"));
    let engine = Engine::new(provider.clone(), runner.clone());

    let deployment = assemble(&DeployConfig::default()).unwrap();
    let report = engine.run(deployment, ctx()).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed, "{}", report.render());
    // Fourteen declared nodes plus one firewall rule per distinct outbound
    // address of the app.
    assert_eq!(report.nodes.len(), 17);
    assert_eq!(report.count(NodeState::Created), 17);

    // The package is uploaded only after the build step, and the migration
    // only runs once the operator's own firewall rule exists.
    assert!(seq(&report, "exec:command::build") < seq(&report, "azure:storage:Blob::deploy.zip"));
    assert!(
        seq(&report, "exec:command::operator-ip")
            < seq(&report, "azure:sql:FirewallRule::allow-operator")
    );
    assert!(
        seq(&report, "azure:sql:FirewallRule::allow-operator")
            < seq(&report, "exec:command::migrate")
    );

    // Each distinct outbound address became one child rule, after the app
    // resolved them.
    let group = &report.nodes[&key("group:fan-out::app-firewall")];
    assert_eq!(group.outputs["created"], "3 children");
    for ip in ["198.51.100.10", "203.0.113.5", "192.0.2.8"] {
        let child = &report.nodes[&key(&format!("azure:sql:FirewallRule::allow-{ip}"))];
        assert_eq!(child.state, NodeState::Created);
        assert_eq!(child.kind, NodeKind::FanOutChild);
        assert!(seq(&report, "azure:web:AppService::gantry-app") < child.create_seq.unwrap());
    }

    // The operator rule carries the trimmed discovered address.
    let creations = provider.journal();
    let operator_rule = creations
        .iter()
        .find(|c| c.key == key("azure:sql:FirewallRule::allow-operator"))
        .unwrap();
    assert_eq!(operator_rule.inputs["start_ip"], "203.0.113.99");
    assert_eq!(operator_rule.inputs["end_ip"], "203.0.113.99");

    let mut rules: Vec<&str> = creations
        .iter()
        .filter(|c| c.key.rtype().as_str() == "azure:sql:FirewallRule")
        .map(|c| c.key.name().as_str())
        .collect();
    rules.sort_unstable();
    assert_eq!(
        rules,
        [
            "allow-192.0.2.8",
            "allow-198.51.100.10",
            "allow-203.0.113.5",
            "allow-operator",
        ]
    );

    // The app runs from a signed URL over the uploaded package.
    let webapp = creations
        .iter()
        .find(|c| c.key == key("azure:web:AppService::gantry-app"))
        .unwrap();
    let url = webapp.inputs["package_url"].as_str().unwrap();
    assert!(
        url.starts_with("https://gantrystore.blob.core.windows.net/zips/deploy.zip?"),
        "{url}"
    );
    assert!(url.contains("sv=2022-11-02"));
    assert!(url.contains("&sr=c&"));
    assert!(url.contains("&rsct=application%2Fzip&"));
    assert!(url.contains("sig="));

    // The migration received the exact connection string, password included.
    let commands = runner.journal();
    let migrate = commands
        .iter()
        .find(|c| c.key == key("exec:command::migrate"))
        .unwrap();
    let conn = &migrate.env["DATABASE_CONNECTION_STRING"];
    assert!(conn.starts_with(CONNECTION_PREFIX), "{conn}");
    assert!(conn.ends_with(CONNECTION_SUFFIX), "{conn}");
    let password = conn[CONNECTION_PREFIX.len()..].split(';').next().unwrap();
    assert_eq!(password.len(), 16);

    // Nothing secret leaks into the rendered report: not the password, not
    // the signed query, and the account key only as its redaction marker.
    let rendered = report.render();
    assert!(!rendered.contains(password));
    assert!(!rendered.contains("sig="));
    let storage = &report.nodes[&key("azure:storage:Account::gantrystore")];
    assert_eq!(storage.outputs["primary_access_key"], "[secret]");
}

#[tokio::test]
async fn storage_failure_stays_contained_to_its_branch() {
    let storage_key = key("azure:storage:Account::gantrystore");
    let provider = Arc::new(SimProvider::new().with_failure(storage_key.clone()));
    let runner = Arc::new(SimRunner::new().with_stdout("operator-ip", "203.0.113.99\n"));
    let engine = Engine::new(provider, runner.clone());

    let deployment = assemble(&DeployConfig::default()).unwrap();
    let report = engine.run(deployment, ctx()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failure.as_ref().unwrap().resource, storage_key);

    // The storage branch and everything downstream of the signed URL skip
    // with the storage account as root cause; no rule children are attempted.
    assert_eq!(state(&report, "azure:storage:Account::gantrystore"), NodeState::Failed);
    for skipped in [
        "azure:storage:Container::zips",
        "azure:storage:Blob::deploy.zip",
        "azure:web:AppService::gantry-app",
        "group:fan-out::app-firewall",
    ] {
        assert_eq!(state(&report, skipped), NodeState::Skipped, "{skipped}");
    }
    let webapp = &report.nodes[&key("azure:web:AppService::gantry-app")];
    assert_eq!(webapp.skip_cause, Some(SkipCause::DependencyFailed));
    assert!(webapp.error.as_ref().unwrap().contains("gantrystore"));

    // The SQL branch is unaffected all the way through the migration.
    for created in [
        "azure:resources:ResourceGroup::gantry-rg",
        "exec:command::build",
        "azure:insights:Component::gantry-insights",
        "azure:sql:Server::gantry-sql",
        "azure:sql:Database::appdb",
        "azure:web:Plan::gantry-plan",
        "exec:command::operator-ip",
        "azure:sql:FirewallRule::allow-operator",
        "exec:command::migrate",
    ] {
        assert_eq!(state(&report, created), NodeState::Created, "{created}");
    }
    assert_eq!(report.nodes.len(), 14);
    assert_eq!(report.count(NodeState::Created), 9);
    assert_eq!(report.count(NodeState::Skipped), 4);
    assert_eq!(report.count(NodeState::Failed), 1);

    // The migration still received its connection string.
    let commands = runner.journal();
    let migrate = commands
        .iter()
        .find(|c| c.key == key("exec:command::migrate"))
        .unwrap();
    assert!(migrate.env["DATABASE_CONNECTION_STRING"].starts_with(CONNECTION_PREFIX));
}

#[tokio::test]
async fn operator_discovery_failure_skips_only_the_migration_path() {
    let provider = Arc::new(SimProvider::new());
    let runner = Arc::new(SimRunner::new().with_failure("operator-ip"));
    let engine = Engine::new(provider, runner.clone());

    let deployment = assemble(&DeployConfig::default()).unwrap();
    let report = engine.run(deployment, ctx()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.resource, key("exec:command::operator-ip"));
    assert!(failure.error.contains("exited with status 1"), "{}", failure.error);

    assert_eq!(state(&report, "exec:command::operator-ip"), NodeState::Failed);
    assert_eq!(
        state(&report, "azure:sql:FirewallRule::allow-operator"),
        NodeState::Skipped
    );
    assert_eq!(state(&report, "exec:command::migrate"), NodeState::Skipped);

    // Storage, web and fan-out all complete; only the operator path is lost.
    assert_eq!(state(&report, "azure:web:AppService::gantry-app"), NodeState::Created);
    assert_eq!(state(&report, "group:fan-out::app-firewall"), NodeState::Created);
    assert_eq!(report.nodes.len(), 17);
    assert_eq!(report.count(NodeState::Created), 14);
    assert_eq!(report.count(NodeState::Skipped), 2);
    assert_eq!(report.count(NodeState::Failed), 1);

    // The migration never executed.
    let executed: Vec<String> = runner
        .journal()
        .iter()
        .map(|c| c.key.name().as_str().to_owned())
        .collect();
    assert!(executed.contains(&"build".to_owned()));
    assert!(executed.contains(&"operator-ip".to_owned()));
    assert!(!executed.contains(&"migrate".to_owned()));
}
