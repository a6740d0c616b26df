use crate::cmd::{self, CommandOutput, Shell};
use crate::error::{ProvisionError, ProvisionResult};
use crate::host::{Database, DatabaseSpec};

/// `Database` backed by the local PostgreSQL cluster via `psql`.
pub struct Postgres {
    shell: Shell,
}

impl Postgres {
    #[must_use]
    pub const fn new(shell: Shell) -> Self {
        Self { shell }
    }
}

impl Database for Postgres {
    fn is_provisioned(&self, spec: &DatabaseSpec) -> ProvisionResult<bool> {
        self.shell.clone().env("PGPASSWORD", &spec.password).check(
            "psql",
            &[
                "-h",
                "127.0.0.1",
                "-U",
                &spec.user,
                "-d",
                &spec.name,
                "-tAc",
                "SELECT 1",
            ],
        )
    }

    fn provision(&self, spec: &DatabaseSpec) -> ProvisionResult<()> {
        let script = provision_script(spec);
        let output = self
            .shell
            .output("runuser", PSQL, Some(script.as_bytes()))?;
        checked(&output, &spec.password)
    }
}

const PSQL: &[&str] = &["-u", "postgres", "--", "psql", "-v", "ON_ERROR_STOP=1"];

/// psql echoes failing statements, which carry the password, so it is
/// masked before the error reaches logs or the state record.
fn checked(output: &CommandOutput, password: &str) -> ProvisionResult<()> {
    if output.success() {
        return Ok(());
    }
    Err(ProvisionError::CommandFailed {
        command: cmd::format_command("runuser", PSQL),
        code: output.status.code(),
        stderr: redact(&output.stderr, password),
    })
}

fn redact(text: &str, password: &str) -> String {
    if password.is_empty() {
        return text.to_string();
    }
    text.replace(&quote_literal(password), "'********'")
        .replace(password, "********")
}

/// SQL that creates the role (or resets its password) and the
/// database owned by it. Safe to run any number of times.
#[must_use]
pub fn provision_script(spec: &DatabaseSpec) -> String {
    let user_ident = quote_ident(&spec.user);
    let db_ident = quote_ident(&spec.name);
    let user_lit = quote_literal(&spec.user);
    let db_lit = quote_literal(&spec.name);
    let password = quote_literal(&spec.password);

    format!(
        "BEGIN;\n\
         DO $$\n\
         BEGIN\n\
         \x20 IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = {user_lit}) THEN\n\
         \x20   CREATE ROLE {user_ident} LOGIN PASSWORD {password};\n\
         \x20 ELSE\n\
         \x20   ALTER ROLE {user_ident} WITH LOGIN PASSWORD {password};\n\
         \x20 END IF;\n\
         END\n\
         $$;\n\
         COMMIT;\n\
         SELECT 'CREATE DATABASE {db_ident} OWNER {user_ident}'\n\
         \x20 WHERE NOT EXISTS (SELECT FROM pg_database WHERE datname = {db_lit})\\gexec\n\
         GRANT ALL PRIVILEGES ON DATABASE {db_ident} TO {user_ident};\n"
    )
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    use super::*;

    fn spec() -> DatabaseSpec {
        DatabaseSpec {
            name: "shop".into(),
            user: "shop_app".into(),
            password: "it's-secret".into(),
        }
    }

    #[test]
    fn script_creates_or_updates_role() {
        let script = provision_script(&spec());

        assert!(script.contains("CREATE ROLE \"shop_app\" LOGIN PASSWORD 'it''s-secret'"));
        assert!(script.contains("ALTER ROLE \"shop_app\" WITH LOGIN PASSWORD"));
        assert!(script.contains("WHERE rolname = 'shop_app'"));
    }

    #[test]
    fn script_creates_database_once() {
        let script = provision_script(&spec());

        assert!(script.contains("CREATE DATABASE \"shop\" OWNER \"shop_app\""));
        assert!(script.contains("WHERE datname = 'shop')\\gexec"));
        assert!(script.contains("GRANT ALL PRIVILEGES ON DATABASE \"shop\" TO \"shop_app\""));
    }

    #[test]
    fn failed_provision_hides_password() {
        let output = CommandOutput {
            status: ExitStatus::from_raw(3 << 8),
            stdout: String::new(),
            stderr: "ERROR:  syntax error at or near \"LOGIN\"\n\
                     LINE 1: CREATE ROLE \"shop_app\" LOGIN PASSWORD 'it''s-secret';\n\
                     HINT: it's-secret"
                .into(),
        };

        let err = checked(&output, "it's-secret").unwrap_err();

        let ProvisionError::CommandFailed { code, stderr, .. } = err else {
            panic!("expected a command failure, got {err}");
        };
        assert_eq!(code, Some(3));
        assert!(!stderr.contains("secret"), "{stderr}");
        assert!(stderr.contains("PASSWORD '********'"));
    }

    #[test]
    fn empty_password_leaves_output_alone() {
        assert_eq!(redact("ERROR: role exists", ""), "ERROR: role exists");
    }
}
