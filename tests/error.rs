use std::path::PathBuf;
use std::time::Duration;

use alicerce::error::ProvisionError;

#[test]
fn display_command_not_found() {
    let err = ProvisionError::CommandNotFound("certbot".into());
    assert_eq!(err.to_string(), "command not found: certbot");
}

#[test]
fn display_command_failed_with_stderr() {
    let err = ProvisionError::CommandFailed {
        command: "apt-get install -y nginx".into(),
        code: Some(100),
        stderr: "E: Unable to locate package nginx".into(),
    };
    assert_eq!(
        err.to_string(),
        "command failed: apt-get install -y nginx (E: Unable to locate package nginx)"
    );
}

#[test]
fn display_command_failed_without_stderr() {
    let err = ProvisionError::CommandFailed {
        command: "nginx -t".into(),
        code: Some(1),
        stderr: String::new(),
    };
    assert_eq!(err.to_string(), "command failed: nginx -t");
}

#[test]
fn display_invalid_config() {
    let err = ProvisionError::InvalidConfig("'domain' is required".into());
    assert_eq!(
        err.to_string(),
        "invalid configuration: 'domain' is required"
    );
}

#[test]
fn display_cycle() {
    let err = ProvisionError::CyclicDependency(vec!["a".into(), "b".into(), "a".into()]);
    assert_eq!(err.to_string(), "dependency cycle between steps: a -> b -> a");
}

#[test]
fn display_unknown_dependency() {
    let err = ProvisionError::UnknownDependency {
        step: "deploy-backend".into(),
        dependency: "install-python".into(),
    };
    assert_eq!(
        err.to_string(),
        "step 'deploy-backend' depends on unknown step 'install-python'"
    );
}

#[test]
fn display_run_in_progress() {
    let err = ProvisionError::RunAlreadyInProgress {
        lock: PathBuf::from("/var/lib/alicerce/run-state.lock"),
    };
    assert_eq!(
        err.to_string(),
        "another run holds the lock at /var/lib/alicerce/run-state.lock"
    );
}

#[test]
fn display_collaborator_timeout() {
    let err = ProvisionError::CollaboratorTimeout {
        step: "update-system".into(),
        after: Duration::from_secs(900),
    };
    assert_eq!(
        err.to_string(),
        "step 'update-system' exceeded its 900s time budget"
    );
}

#[test]
fn in_step_wraps_collaborator_failure() {
    let err = ProvisionError::CommandNotFound("psql".into()).in_step("provision-database");

    assert!(matches!(
        &err,
        ProvisionError::CollaboratorError { step, .. } if step == "provision-database"
    ));
    assert_eq!(
        err.to_string(),
        "step 'provision-database' failed: command not found: psql"
    );
}

#[test]
fn in_step_turns_command_timeout_into_step_timeout() {
    let err = ProvisionError::CommandTimedOut {
        command: "apt-get upgrade -y".into(),
        after: Duration::from_secs(60),
    }
    .in_step("update-system");

    assert!(matches!(
        err,
        ProvisionError::CollaboratorTimeout { ref step, after }
            if step == "update-system" && after == Duration::from_secs(60)
    ));
}

#[test]
fn in_step_keeps_step_errors() {
    let err = ProvisionError::PostconditionViolation {
        step: "configure-proxy".into(),
    }
    .in_step("other");

    assert!(matches!(
        err,
        ProvisionError::PostconditionViolation { ref step } if step == "configure-proxy"
    ));
    assert!(matches!(
        ProvisionError::Cancelled.in_step("x"),
        ProvisionError::Cancelled
    ));
}

#[test]
fn from_io_error() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
    let err: ProvisionError = io_err.into();
    assert!(matches!(err, ProvisionError::Io(_)));
}

#[test]
fn from_json_error() {
    let json_err = serde_json::from_str::<Vec<u64>>("invalid").unwrap_err();
    let err: ProvisionError = json_err.into();
    assert!(matches!(err, ProvisionError::Json(_)));
}

#[test]
fn from_yaml_error() {
    let yaml_err = serde_yaml::from_str::<Vec<u64>>("{ not: [a list").unwrap_err();
    let err: ProvisionError = yaml_err.into();
    assert!(matches!(err, ProvisionError::Yaml(_)));
}
