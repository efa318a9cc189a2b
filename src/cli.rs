use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use vigil_descriptor::ConfigFormat;

/// Keep a set of long-running programs alive.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log filter (`info`, `debug`, `vigil_supervisor=trace`, ...).
    /// Defaults to the ecosystem file's `log_level`; `RUST_LOG` wins over both.
    #[arg(long, global = true, env = "VIGIL_LOG")]
    pub log_level: Option<String>,

    /// Directory for default log files and PID files [default: ~/.vigil]
    #[arg(long, global = true, env = "VIGIL_HOME")]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check an ecosystem file and that every app could be launched
    Validate { file: PathBuf },

    /// Print the ecosystem file with every default filled in
    Show {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },

    /// Supervise the apps in the foreground until Ctrl+C
    Run {
        file: PathBuf,
        /// Start only these apps (repeatable)
        #[arg(long)]
        only: Vec<String>,
        /// Echo captured output to the terminal
        #[arg(long)]
        attach: bool,
    },
}

impl Commands {
    pub fn file(&self) -> &PathBuf {
        match self {
            Commands::Validate { file } | Commands::Show { file, .. } | Commands::Run { file, .. } => file,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Yaml,
    Json,
}

impl From<OutputFormat> for ConfigFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Yaml => ConfigFormat::Yaml,
            OutputFormat::Json => ConfigFormat::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "vigil",
            "run",
            "ecosystem.yaml",
            "--only",
            "voice-resolver",
            "--only",
            "api",
            "--attach",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Commands::Run { file, only, attach } => {
                assert_eq!(file, PathBuf::from("ecosystem.yaml"));
                assert_eq!(only, vec!["voice-resolver", "api"]);
                assert!(attach);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_show_format() {
        let cli = Cli::try_parse_from(["vigil", "--home", "/tmp/vigil", "show", "apps.json", "--format", "json"])
            .unwrap();

        assert_eq!(cli.home, Some(PathBuf::from("/tmp/vigil")));
        assert_eq!(cli.command.file(), &PathBuf::from("apps.json"));
        assert!(matches!(
            cli.command,
            Commands::Show {
                format: OutputFormat::Json,
                ..
            }
        ));
    }

    #[test]
    fn test_file_is_required() {
        assert!(Cli::try_parse_from(["vigil", "validate"]).is_err());
    }
}
