//! Deployment configuration.
//!
//! Every knob the blueprint reads lives here so a single TOML file (or a
//! handful of environment variables) describes a whole environment. All
//! fields default to the `dev` layout, which keeps `gantry up` runnable
//! with no configuration at all.

use serde::{Deserialize, Serialize};

/// Top-level configuration for one deployed environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Deployment name, used for the run label and log context.
    pub name: String,
    /// Environment tag passed to providers (`dev`, `staging`, ...).
    pub environment: String,
    /// Region every resource is created in.
    pub location: String,
    /// Resource group that owns everything else.
    pub resource_group: String,
    /// SQL server, database and administrator settings.
    pub sql: SqlConfig,
    /// Artifact build and storage settings.
    pub artifact: ArtifactConfig,
    /// App service plan, web app and monitoring component.
    pub web: WebConfig,
    /// Read-access signing for the deployed artifact.
    pub signing: SigningConfig,
    /// How the operator's public IP is discovered.
    pub operator: OperatorConfig,
    /// Database migration command.
    pub migration: MigrationConfig,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            name: "gantry".to_owned(),
            environment: "dev".to_owned(),
            location: "westeurope".to_owned(),
            resource_group: "gantry-rg".to_owned(),
            sql: SqlConfig::default(),
            artifact: ArtifactConfig::default(),
            web: WebConfig::default(),
            signing: SigningConfig::default(),
            operator: OperatorConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

/// SQL server and database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    /// Logical SQL server name.
    pub server: String,
    /// Database name.
    pub database: String,
    /// Administrator login. Not a resource name, so any string goes.
    pub admin_user: String,
    /// Length of the generated administrator password.
    pub password_length: usize,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            server: "gantry-sql".to_owned(),
            database: "appdb".to_owned(),
            admin_user: "sqladmin".to_owned(),
            password_length: 16,
        }
    }
}

/// Where the build artifact comes from and where it is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Storage account name.
    pub account: String,
    /// Blob container holding deployment packages.
    pub container: String,
    /// Blob name of the package for this deployment.
    pub blob: String,
    /// Program that produces the package.
    pub build_program: String,
    /// Arguments for the build program.
    pub build_args: Vec<String>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            account: "gantrystore".to_owned(),
            container: "zips".to_owned(),
            blob: "deploy.zip".to_owned(),
            build_program: "dotnet".to_owned(),
            build_args: vec!["publish".to_owned(), "-c".to_owned(), "Release".to_owned()],
        }
    }
}

/// App service plan, web app and monitoring names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// App service plan name.
    pub plan: String,
    /// Web app name.
    pub app: String,
    /// Monitoring component name.
    pub insights: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            plan: "gantry-plan".to_owned(),
            app: "gantry-app".to_owned(),
            insights: "gantry-insights".to_owned(),
        }
    }
}

/// Validity window and response headers for the signed artifact URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Hours the signed URL stays valid, counted from assembly time.
    pub valid_hours: i64,
    /// `Cache-Control` the service returns for the package.
    pub cache_control: String,
    /// `Content-Disposition` the service returns for the package.
    pub content_disposition: String,
    /// `Content-Encoding` the service returns for the package.
    pub content_encoding: String,
    /// `Content-Type` the service returns for the package.
    pub content_type: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            valid_hours: 24,
            cache_control: "no-cache".to_owned(),
            content_disposition: "attachment".to_owned(),
            content_encoding: "identity".to_owned(),
            content_type: "application/zip".to_owned(),
        }
    }
}

/// Command that prints the operator's public IP on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Program to run.
    pub program: String,
    /// Arguments for the program.
    pub args: Vec<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            program: "curl".to_owned(),
            args: vec!["-fsS".to_owned(), "https://api.ipify.org".to_owned()],
        }
    }
}

/// Command that applies database migrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Program to run.
    pub program: String,
    /// Arguments for the program.
    pub args: Vec<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            program: "dotnet".to_owned(),
            args: vec!["ef".to_owned(), "database".to_owned(), "update".to_owned()],
        }
    }
}
