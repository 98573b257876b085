//! ADO.NET connection string assembly.

use gantry_secrets::SecureString;

/// Builds the connection string the application and the migration step use.
///
/// The shape matches what the .NET SQL client expects field for field, so
/// the output is wired straight into `DATABASE_CONNECTION_STRING` without
/// further editing. The result is returned as a [`SecureString`] because it
/// embeds the administrator password.
#[must_use]
pub fn connection_string(
    host: &str,
    database: &str,
    user: &str,
    password: &SecureString,
) -> SecureString {
    password.with_exposed(|password| {
        SecureString::new(format!(
            "Server=tcp:{host},1433;Initial Catalog={database};Persist Security Info=False;\
             User ID={user};Password={password};MultipleActiveResultSets=False;Encrypt=True;\
             TrustServerCertificate=False;Connection Timeout=30;"
        ))
    })
}
