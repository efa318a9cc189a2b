use super::*;
use crate::env::is_valid_env_key;
use std::collections::HashSet;

const MAX_NAME_LEN: usize = 64;

/// Validate the complete ecosystem
pub fn validate_config(config: &EcosystemConfig) -> ConfigResult<()> {
    validate_supervisor_settings(&config.supervisor)?;

    if config.apps.is_empty() {
        return Err(ConfigError::NoApps);
    }

    // Names identify processes in the supervisor registry
    let mut names = HashSet::new();
    for app in &config.apps {
        if !names.insert(app.name.as_str()) {
            return Err(ConfigError::DuplicateName {
                name: app.name.clone(),
            });
        }

        validate_descriptor(app)?;
    }

    Ok(())
}

/// Validate supervisor settings
fn validate_supervisor_settings(settings: &SupervisorSettings) -> ConfigResult<()> {
    match settings.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => {
            return Err(ConfigError::invalid_value(
                "supervisor.log_level",
                format!(
                    "{} is not one of: trace, debug, info, warn, error",
                    settings.log_level
                ),
            ))
        }
    }

    if settings.memory_check_interval.is_zero() {
        return Err(ConfigError::invalid_value(
            "supervisor.memory_check_interval",
            "must be greater than 0",
        ));
    }

    if settings.shutdown_timeout.is_zero() {
        return Err(ConfigError::invalid_value(
            "supervisor.shutdown_timeout",
            "must be greater than 0",
        ));
    }

    if let Some(ref home) = settings.home {
        if home.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "supervisor.home",
                "must not be empty",
            ));
        }
    }

    Ok(())
}

/// Validate a single descriptor
pub fn validate_descriptor(app: &ProcessDescriptor) -> ConfigResult<()> {
    validate_name(&app.name)?;

    if app.executable_path.trim().is_empty() {
        return Err(ConfigError::missing_field("executable_path"));
    }

    if app.executable_path.contains('\0') {
        return Err(ConfigError::invalid_value(
            "executable_path",
            "must not contain NUL bytes",
        ));
    }

    if let Some(ref dir) = app.working_directory {
        if dir.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "working_directory",
                "must not be empty",
            ));
        }
    }

    if let Interpreter::Program(ref program) = app.interpreter {
        if program.contains('\0') {
            return Err(ConfigError::invalid_value(
                "interpreter",
                "must not contain NUL bytes",
            ));
        }
    }

    if app.instances < 1 {
        return Err(ConfigError::invalid_value(
            "instances",
            format!("must be at least 1, got {}", app.instances),
        ));
    }

    validate_restart_policy(app)?;
    validate_environment(&app.env)?;
    validate_log_paths(app)?;

    Ok(())
}

fn validate_name(name: &str) -> ConfigResult<()> {
    if name.is_empty() {
        return Err(ConfigError::missing_field("name"));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(ConfigError::invalid_value(
            "name",
            format!("too long (max {} characters): {}", MAX_NAME_LEN, name),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ConfigError::invalid_value(
            "name",
            format!(
                "can only contain alphanumeric characters, '-', '_' and '.': {}",
                name
            ),
        ));
    }

    Ok(())
}

/// Restart thresholds are unsigned, so negatives are already rejected at parse time.
fn validate_restart_policy(app: &ProcessDescriptor) -> ConfigResult<()> {
    if let Some(ceiling) = app.max_memory_restart {
        if ceiling.as_u64() == 0 {
            return Err(ConfigError::invalid_value(
                "max_memory_restart",
                "must be greater than 0",
            ));
        }
    }

    if app.kill_timeout.is_zero() {
        return Err(ConfigError::invalid_value(
            "kill_timeout",
            "must be greater than 0",
        ));
    }

    if let Some(base) = app.exp_backoff_restart_delay {
        if base.is_zero() {
            return Err(ConfigError::invalid_value(
                "exp_backoff_restart_delay",
                "must be greater than 0",
            ));
        }
    }

    Ok(())
}

fn validate_environment(env: &BTreeMap<String, String>) -> ConfigResult<()> {
    for (key, value) in env {
        if !is_valid_env_key(key) {
            return Err(ConfigError::invalid_value(
                "env",
                format!(
                    "variable names can only contain alphanumeric characters and underscores: '{}'",
                    key
                ),
            ));
        }

        if value.contains('\0') {
            return Err(ConfigError::invalid_value(
                "env",
                format!("value of {} contains a NUL byte", key),
            ));
        }
    }

    Ok(())
}

fn validate_log_paths(app: &ProcessDescriptor) -> ConfigResult<()> {
    for (field, path) in [("out_file", &app.out_file), ("error_file", &app.error_file)] {
        if let Some(path) = path {
            if path.trim().is_empty() {
                return Err(ConfigError::invalid_value(field, "must not be empty"));
            }
        }
    }

    Ok(())
}
