//! Log file locations for one instance.

use std::path::{Path, PathBuf};
use vigil_descriptor::ProcessDescriptor;

/// Where an instance's stdout and stderr end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub out: PathBuf,
    pub error: PathBuf,
}

impl LogPaths {
    /// Configured paths win; otherwise `<default_dir>/<name>-out.log` and
    /// `<default_dir>/<name>-error.log`. Relative configured paths are taken
    /// from the working directory.
    ///
    /// With several instances and `merge_logs` off, each instance writes to
    /// its own `-<instance>` suffixed file. With `merge_logs` on, every
    /// instance appends to the same pair of files.
    pub fn resolve(descriptor: &ProcessDescriptor, instance: u32, default_dir: &Path) -> Self {
        let base = descriptor.working_directory.as_deref().map(Path::new);

        let out = configured_or_default(
            descriptor.out_file.as_deref(),
            base,
            default_dir,
            &format!("{}-out.log", descriptor.name),
        );
        let error = configured_or_default(
            descriptor.error_file.as_deref(),
            base,
            default_dir,
            &format!("{}-error.log", descriptor.name),
        );

        if descriptor.instances > 1 && !descriptor.merge_logs {
            Self {
                out: with_instance_suffix(&out, instance),
                error: with_instance_suffix(&error, instance),
            }
        } else {
            Self { out, error }
        }
    }

    pub fn all(&self) -> [&Path; 2] {
        [self.out.as_path(), self.error.as_path()]
    }
}

fn configured_or_default(
    configured: Option<&str>,
    base: Option<&Path>,
    default_dir: &Path,
    default_name: &str,
) -> PathBuf {
    match (configured, base) {
        (Some(path), Some(base)) => base.join(path),
        (Some(path), None) => PathBuf::from(path),
        (None, _) => default_dir.join(default_name),
    }
}

/// `out.log` becomes `out-2.log`.
fn with_instance_suffix(path: &Path, instance: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file_name = match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, instance, ext.to_string_lossy()),
        None => format!("{}-{}", stem, instance),
    };

    path.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_descriptor::ConfigFormat;

    fn descriptor(extra: &str) -> ProcessDescriptor {
        ProcessDescriptor::load_from_str(
            &format!("name: voice-resolver\nscript: ./main\n{}", extra),
            ConfigFormat::Yaml,
        )
        .unwrap()
    }

    #[test]
    fn test_configured_paths() {
        let app = descriptor(
            "error_file: /root/voice_resolver/logs/error.log\nout_file: /root/voice_resolver/logs/out.log\n",
        );
        let paths = LogPaths::resolve(&app, 0, Path::new("/var/lib/vigil/logs"));

        assert_eq!(paths.out, PathBuf::from("/root/voice_resolver/logs/out.log"));
        assert_eq!(paths.error, PathBuf::from("/root/voice_resolver/logs/error.log"));
    }

    #[test]
    fn test_default_paths() {
        let app = descriptor("");
        let paths = LogPaths::resolve(&app, 0, Path::new("/var/lib/vigil/logs"));

        assert_eq!(paths.out, PathBuf::from("/var/lib/vigil/logs/voice-resolver-out.log"));
        assert_eq!(
            paths.error,
            PathBuf::from("/var/lib/vigil/logs/voice-resolver-error.log")
        );
    }

    #[test]
    fn test_relative_paths_use_working_directory() {
        let app = descriptor("cwd: /srv/app\nout_file: logs/out.log\n");
        let paths = LogPaths::resolve(&app, 0, Path::new("/var/lib/vigil/logs"));

        assert_eq!(paths.out, PathBuf::from("/srv/app/logs/out.log"));
    }

    #[test]
    fn test_instances_get_separate_files_unless_merged() {
        let app = descriptor("instances: 3\nout_file: /logs/out.log\nerror_file: /logs/err\n");
        let paths = LogPaths::resolve(&app, 2, Path::new("/unused"));
        assert_eq!(paths.out, PathBuf::from("/logs/out-2.log"));
        assert_eq!(paths.error, PathBuf::from("/logs/err-2"));

        let app = descriptor("instances: 3\nmerge_logs: true\nout_file: /logs/out.log\n");
        let paths = LogPaths::resolve(&app, 2, Path::new("/unused"));
        assert_eq!(paths.out, PathBuf::from("/logs/out.log"));
    }
}
