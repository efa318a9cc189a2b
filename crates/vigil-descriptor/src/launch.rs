//! Launch plausibility checks.
//!
//! Resolves a descriptor into the concrete program, arguments and directory
//! the supervisor hands to the operating system, failing early when the
//! executable or working directory cannot possibly work.

use crate::{Interpreter, ProcessDescriptor};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use vigil_common::LaunchError;

/// A fully resolved command line for one supervised program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    pub fn resolve(descriptor: &ProcessDescriptor) -> Result<Self, LaunchError> {
        let working_directory = resolve_working_directory(descriptor.working_directory.as_deref())?;

        let (program, args) = match descriptor.interpreter {
            Interpreter::None => {
                let program = resolve_program(&descriptor.executable_path, &working_directory)?;
                (program, descriptor.args.clone())
            }
            Interpreter::Program(ref interpreter) => {
                let program = resolve_program(interpreter, &working_directory)?;

                let script = working_directory.join(&descriptor.executable_path);
                if !script.is_file() {
                    return Err(LaunchError::ScriptNotFound { path: script });
                }

                let mut args = descriptor.interpreter_args.clone();
                args.push(script.to_string_lossy().into_owned());
                args.extend(descriptor.args.iter().cloned());
                (program, args)
            }
        };

        debug!(
            "Resolved launch for {}: {} {:?} (cwd: {})",
            descriptor.name,
            program.display(),
            args,
            working_directory.display()
        );

        Ok(Self {
            program,
            args,
            working_directory,
            env: descriptor.env.clone(),
        })
    }
}

fn resolve_working_directory(configured: Option<&str>) -> Result<PathBuf, LaunchError> {
    let path = match configured {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };

    match std::fs::canonicalize(&path) {
        Ok(resolved) if resolved.is_dir() => Ok(resolved),
        _ => Err(LaunchError::WorkingDirectoryNotFound { path }),
    }
}

/// Paths with a separator are taken relative to the working directory;
/// bare names are looked up on `PATH`.
fn resolve_program(name: &str, working_directory: &Path) -> Result<PathBuf, LaunchError> {
    let candidate = Path::new(name);

    if candidate.is_absolute() || name.contains('/') || name.contains(std::path::MAIN_SEPARATOR) {
        let path = working_directory.join(candidate);
        if !path.exists() {
            return Err(LaunchError::ExecutableNotFound {
                path: path.to_string_lossy().into_owned(),
            });
        }
        if !is_executable(&path) {
            return Err(LaunchError::NotExecutable { path });
        }
        return Ok(path);
    }

    search_path(name).ok_or_else(|| LaunchError::ExecutableNotFound {
        path: name.to_string(),
    })
}

fn search_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConfigFormat, ProcessDescriptor};
    use std::fs;

    fn descriptor(yaml: &str) -> ProcessDescriptor {
        ProcessDescriptor::load_from_str(yaml, ConfigFormat::Yaml).unwrap()
    }

    #[cfg(unix)]
    fn write_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;

        fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_resolves_relative_executable_against_cwd() {
        let dir = tempfile::tempdir().unwrap();
        write_executable(&dir.path().join("main"));

        let app = descriptor(&format!(
            "name: voice-resolver\nscript: ./main\ncwd: {}\nargs: ['--verbose']\nenv:\n  PORT: 5000\n",
            dir.path().display()
        ));
        let launch = LaunchSpec::resolve(&app).unwrap();

        let cwd = fs::canonicalize(dir.path()).unwrap();
        assert_eq!(launch.program, cwd.join("./main"));
        assert_eq!(launch.args, vec!["--verbose".to_string()]);
        assert_eq!(launch.working_directory, cwd);
        assert_eq!(launch.env["PORT"], "5000");
    }

    #[test]
    fn test_missing_working_directory() {
        let app = descriptor("name: api\nscript: ./api\ncwd: /definitely/not/here\n");
        assert!(matches!(
            LaunchSpec::resolve(&app),
            Err(LaunchError::WorkingDirectoryNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let app = descriptor(&format!(
            "name: api\nscript: ./absent\ncwd: {}\n",
            dir.path().display()
        ));
        assert!(matches!(
            LaunchSpec::resolve(&app),
            Err(LaunchError::ExecutableNotFound { .. })
        ));

        let app = descriptor("name: api\nscript: no-such-binary-on-path-vigil\n");
        assert!(matches!(
            LaunchSpec::resolve(&app),
            Err(LaunchError::ExecutableNotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main"), "not a program").unwrap();

        let app = descriptor(&format!(
            "name: api\nscript: ./main\ncwd: {}\n",
            dir.path().display()
        ));
        assert!(matches!(
            LaunchSpec::resolve(&app),
            Err(LaunchError::NotExecutable { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_interpreter_wraps_script() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("job.sh"), "echo hi\n").unwrap();

        let app = descriptor(&format!(
            "name: job\nscript: job.sh\ncwd: {}\ninterpreter: sh\ninterpreter_args: ['-e']\nargs: ['one']\n",
            dir.path().display()
        ));
        let launch = LaunchSpec::resolve(&app).unwrap();

        assert!(launch.program.ends_with("sh"));
        let cwd = fs::canonicalize(dir.path()).unwrap();
        assert_eq!(
            launch.args,
            vec![
                "-e".to_string(),
                cwd.join("job.sh").to_string_lossy().into_owned(),
                "one".to_string(),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_interpreter_requires_script() {
        let dir = tempfile::tempdir().unwrap();
        let app = descriptor(&format!(
            "name: job\nscript: missing.sh\ncwd: {}\ninterpreter: sh\n",
            dir.path().display()
        ));
        assert!(matches!(
            LaunchSpec::resolve(&app),
            Err(LaunchError::ScriptNotFound { .. })
        ));
    }
}
