//! The deployed environment, declared.
//!
//! [`assemble`] turns a [`DeployConfig`] into one [`Deployment`]: a resource
//! group holding a storage branch (account, container, uploaded package,
//! signed download URL), a SQL branch (server with a generated administrator
//! password, database, connection string), a web branch (plan, app service,
//! monitoring) and the firewall and migration steps that tie the branches
//! together. Nothing is created here; the engine does that later.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use gantry_graph::{
    CommandSpec, Deployment, DeploymentBuilder, FanOutSpec, ResourceSpec, literal,
};
use gantry_output::Output;
use gantry_secrets::{
    ContentHeaders, SecureString, SignedWindow, generate_password, sign_blob_url,
};
use serde_json::Value;
use tracing::debug;

use crate::config::DeployConfig;
use crate::connection::connection_string;
use crate::error::BlueprintError;

/// Longest accepted signing validity. Longer configured windows are clamped
/// so arithmetic on the window can never leave the representable range.
const MAX_SIGNING_HOURS: i64 = 24 * 366;

/// Declares the full environment described by `config`.
///
/// The blueprint wires runtime-discovered values between steps:
///
/// - the storage account's key signs the package URL the web app runs from
/// - a generated administrator password flows into the SQL server and into
///   the connection string handed to the migration step
/// - the web app's outbound addresses fan out into one firewall rule each
/// - a command step discovers the operator's own address and seeds one more
///   rule, which the migration step waits for
///
/// Everything secret stays marked: the account key, the password, the signed
/// URL and the connection string all render redacted in reports and logs.
///
/// # Errors
///
/// Fails if a configured name is not a valid resource name, if the password
/// or signing settings are unusable, or if the declared graph is rejected.
pub fn assemble(config: &DeployConfig) -> Result<Deployment, BlueprintError> {
    let mut builder = DeploymentBuilder::new(&config.name);

    let rg = builder.add_resource(
        ResourceSpec::new(
            "azure:resources:ResourceGroup".parse()?,
            config.resource_group.parse()?,
        )
        .with_export("name"),
    );
    let rg_name = rg.output("name")?;

    // Storage branch: account, container, the uploaded package and a
    // time-limited signed URL for it. The build step has to finish before
    // the package blob exists.
    let storage = builder.add_resource(
        ResourceSpec::new(
            "azure:storage:Account".parse()?,
            config.artifact.account.parse()?,
        )
        .with_input("resource_group", rg_name.clone())
        .with_export("name")
        .with_secret_export("primary_access_key"),
    );
    let container = builder.add_resource(
        ResourceSpec::new(
            "azure:storage:Container".parse()?,
            config.artifact.container.parse()?,
        )
        .with_input("account", storage.output("name")?)
        .with_export("name"),
    );
    let build = builder.add_command(
        CommandSpec::new("build".parse()?, &config.artifact.build_program)
            .with_args(config.artifact.build_args.iter().cloned()),
    );
    let package = builder.add_resource(
        ResourceSpec::new("azure:storage:Blob".parse()?, config.artifact.blob.parse()?)
            .with_input("container", container.output("name")?)
            .with_input("blob_name", literal(config.artifact.blob.as_str()))
            .with_dependency(build.key().clone())
            .with_export("blob_name"),
    );

    let hours = config.signing.valid_hours.clamp(1, MAX_SIGNING_HOURS);
    let window = SignedWindow::from_start(Utc::now(), Duration::hours(hours))?;
    let signing_container = config.artifact.container.clone();
    let package_headers = ContentHeaders {
        cache_control: config.signing.cache_control.clone(),
        content_disposition: config.signing.content_disposition.clone(),
        content_encoding: config.signing.content_encoding.clone(),
        content_type: config.signing.content_type.clone(),
    };
    let package_url = storage
        .output("name")?
        .zip3(storage.output("primary_access_key")?, package.output("blob_name")?)
        .try_map(move |(account, key, blob)| {
            let account = as_text(account, "storage account name")?;
            let key = as_text(key, "storage account key")?;
            let blob = as_text(blob, "blob name")?;
            sign_blob_url(
                &account,
                &SecureString::new(key),
                &signing_container,
                &blob,
                &window,
                &package_headers,
            )
            .map(Value::String)
            .map_err(|error| error.to_string())
        });

    // SQL branch: server, database and the connection string assembled from
    // their resolved identities plus the generated password.
    let admin_password = generate_password(config.sql.password_length)?;
    let admin_password =
        admin_password.with_exposed(|password| Output::secret(Value::String(password.to_owned())));

    let sql = builder.add_resource(
        ResourceSpec::new("azure:sql:Server".parse()?, config.sql.server.parse()?)
            .with_input("resource_group", rg_name.clone())
            .with_input("admin_login", literal(config.sql.admin_user.as_str()))
            .with_input("admin_password", admin_password.clone())
            .with_export("name")
            .with_export("fqdn"),
    );
    let sql_name = sql.output("name")?;
    let database = builder.add_resource(
        ResourceSpec::new("azure:sql:Database".parse()?, config.sql.database.parse()?)
            .with_input("server", sql_name.clone())
            .with_export("name"),
    );

    let admin_user = config.sql.admin_user.clone();
    let connection = sql
        .output("fqdn")?
        .zip3(database.output("name")?, admin_password)
        .try_map(move |(host, db, password)| {
            let host = as_text(host, "sql server fqdn")?;
            let db = as_text(db, "database name")?;
            let password = as_text(password, "administrator password")?;
            let built = connection_string(&host, &db, &admin_user, &SecureString::new(password));
            Ok::<_, String>(Value::String(built.expose().to_owned()))
        });

    // Web branch: plan, monitoring and the app itself, running from the
    // signed package and configured with the connection string.
    let insights = builder.add_resource(
        ResourceSpec::new(
            "azure:insights:Component".parse()?,
            config.web.insights.parse()?,
        )
        .with_input("resource_group", rg_name.clone())
        .with_export("instrumentation_key"),
    );
    let plan = builder.add_resource(
        ResourceSpec::new("azure:web:Plan".parse()?, config.web.plan.parse()?)
            .with_input("resource_group", rg_name)
            .with_export("id"),
    );
    let webapp = builder.add_resource(
        ResourceSpec::new("azure:web:AppService".parse()?, config.web.app.parse()?)
            .with_input("plan", plan.output("id")?)
            .with_input("package_url", package_url)
            .with_input("instrumentation_key", insights.output("instrumentation_key")?)
            .with_input("connection_string", connection.clone())
            .with_export("default_hostname")
            .with_export("outbound_ips"),
    );

    // One firewall rule per distinct outbound address of the app, plus one
    // for the operator's own address discovered at run time.
    let outbound_ips = webapp.output("outbound_ips")?.try_map(|value| {
        let raw = as_text(value, "outbound ip list")?;
        Ok::<_, String>(
            raw.split(',')
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(str::to_owned)
                .collect::<Vec<_>>(),
        )
    });
    let rule_server = sql_name.clone();
    builder.add_fan_out(FanOutSpec::new(
        "app-firewall".parse()?,
        outbound_ips,
        "azure:sql:FirewallRule".parse()?,
        "allow-",
        move |ip| {
            BTreeMap::from([
                ("start_ip".to_owned(), literal(ip)),
                ("end_ip".to_owned(), literal(ip)),
                ("server".to_owned(), rule_server.clone()),
            ])
        },
    ));

    let discover = builder.add_command(
        CommandSpec::new("operator-ip".parse()?, &config.operator.program)
            .with_args(config.operator.args.iter().cloned()),
    );
    let operator_ip = discover.stdout().try_map(|value| match value {
        Value::String(raw) => Ok(Value::String(raw.trim().to_owned())),
        other => Err(format!("operator address is not text: {other}")),
    });
    let operator_rule = builder.add_resource(
        ResourceSpec::new("azure:sql:FirewallRule".parse()?, "allow-operator".parse()?)
            .with_input("start_ip", operator_ip.clone())
            .with_input("end_ip", operator_ip)
            .with_input("server", sql_name)
            .with_export("name"),
    );

    // The migration runs from the operator's machine, so it needs the
    // operator rule in place; the app's own rules are not its concern.
    builder.add_command(
        CommandSpec::new("migrate".parse()?, &config.migration.program)
            .with_args(config.migration.args.iter().cloned())
            .with_env("DATABASE_CONNECTION_STRING", connection)
            .with_dependency(operator_rule.key().clone()),
    );

    let deployment = builder.build()?;
    debug!(
        deployment = %deployment.name(),
        nodes = deployment.len(),
        "blueprint assembled"
    );
    Ok(deployment)
}

fn as_text(value: Value, what: &str) -> Result<String, String> {
    match value {
        Value::String(text) => Ok(text),
        other => Err(format!("{what} is not a string: {other}")),
    }
}
