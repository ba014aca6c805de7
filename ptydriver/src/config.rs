//! TOML run configuration.
//!
//! Every policy constant (command, prompt, probe, markers, timeouts) lives
//! here rather than in code. All fields are optional; a missing file section
//! takes the defaults of [`AutomatedSettings`] and [`SpawnConfig`].
//!
//! ```toml
//! mode = "automated"
//! log_file = "spike_output.log"
//!
//! [spawn]
//! shell = "spike -d --log-commits prog 2> trace.log"
//!
//! [automated]
//! step_timeout_ms = 2000
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::driver::{AutomatedSettings, InteractiveStrategy};
use crate::error::ConfigError;
use crate::pty::{CommandSpec, DEFAULT_COLS, DEFAULT_ROWS, DEFAULT_TEARDOWN_GRACE, SpawnConfig};

/// Which strategy drives the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Single-step until the child gives a verdict.
    #[default]
    Automated,

    /// Relay a human operator.
    Interactive,

    /// Record output until the child exits.
    Capture,
}

/// Top-level run configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub mode: Mode,

    /// Transcript file, appended to.
    pub log_file: Option<PathBuf>,

    pub spawn: SpawnSection,
    pub prompt: PromptSection,
    pub automated: AutomatedSection,
    pub interactive: InteractiveSection,
}

/// How to start the child.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpawnSection {
    /// Command line for `/bin/sh -c`.
    pub shell: Option<String>,

    /// Program to exec directly.
    pub program: Option<String>,

    /// Arguments for `program`.
    pub args: Vec<String>,

    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub cols: u16,
    pub rows: u16,
    pub teardown_grace_ms: u64,
}

impl Default for SpawnSection {
    fn default() -> Self {
        Self {
            shell: None,
            program: None,
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            teardown_grace_ms: DEFAULT_TEARDOWN_GRACE.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromptSection {
    /// Text the child prints when ready for input.
    pub ready: String,
}

impl Default for PromptSection {
    fn default() -> Self {
        Self {
            ready: AutomatedSettings::default().prompt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutomatedSection {
    pub probe: String,
    pub continuation: String,
    pub completion_marker: String,
    pub step_header: String,
    pub initial_timeout_ms: u64,
    pub step_timeout_ms: u64,
    pub max_iterations: usize,
}

impl Default for AutomatedSection {
    fn default() -> Self {
        let settings = AutomatedSettings::default();
        Self {
            probe: settings.probe,
            continuation: settings.continuation,
            completion_marker: settings.completion_marker,
            step_header: settings.step_header,
            initial_timeout_ms: settings.initial_timeout.as_millis() as u64,
            step_timeout_ms: settings.step_timeout.as_millis() as u64,
            max_iterations: settings.max_iterations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InteractiveSection {
    /// Sent once after the first prompt, e.g. `"r\n"` to start running.
    pub startup_input: Option<String>,
    pub initial_timeout_ms: u64,
}

impl Default for InteractiveSection {
    fn default() -> Self {
        Self {
            startup_input: None,
            initial_timeout_ms: 5000,
        }
    }
}

impl RunConfig {
    /// Read and parse `path`.
    ///
    /// The result is not validated, so that command-line overrides can be
    /// applied first; call [`validate`](Self::validate) afterwards.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Check the configuration is usable.
    ///
    /// Checks:
    /// - exactly one of `spawn.shell` and `spawn.program` is set
    /// - the prompt and both markers are non-empty
    /// - `max_iterations` is positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.command()?;

        if self.prompt.ready.is_empty() {
            return Err(invalid("prompt.ready must not be empty"));
        }
        if self.automated.completion_marker.is_empty() {
            return Err(invalid("automated.completion_marker must not be empty"));
        }
        if self.automated.step_header.is_empty() {
            return Err(invalid("automated.step_header must not be empty"));
        }
        if self.automated.max_iterations == 0 {
            return Err(invalid("automated.max_iterations must be greater than zero"));
        }
        Ok(())
    }

    /// The configured command.
    pub fn command(&self) -> Result<CommandSpec, ConfigError> {
        match (&self.spawn.shell, &self.spawn.program) {
            (Some(shell), None) => Ok(CommandSpec::Shell(shell.clone())),
            (None, Some(program)) => Ok(CommandSpec::Exec {
                program: program.clone(),
                args: self.spawn.args.clone(),
            }),
            (Some(_), Some(_)) => Err(invalid("spawn.shell and spawn.program are mutually exclusive")),
            (None, None) => Err(invalid("no command configured; set spawn.shell or spawn.program")),
        }
    }

    /// Replace the command with a shell command line.
    pub fn set_shell(&mut self, command: impl Into<String>) {
        self.spawn.shell = Some(command.into());
        self.spawn.program = None;
        self.spawn.args.clear();
    }

    /// Replace the command with a direct exec.
    pub fn set_program(&mut self, program: impl Into<String>, args: Vec<String>) {
        self.spawn.shell = None;
        self.spawn.program = Some(program.into());
        self.spawn.args = args;
    }

    /// Spawn settings for the PTY bridge.
    pub fn spawn_config(&self) -> Result<SpawnConfig, ConfigError> {
        let mut config = SpawnConfig::new(self.command()?)
            .with_window_size(self.spawn.cols, self.spawn.rows)
            .with_teardown_grace(Duration::from_millis(self.spawn.teardown_grace_ms));
        if let Some(dir) = &self.spawn.working_dir {
            config = config.with_working_dir(dir);
        }
        for (key, value) in &self.spawn.env {
            config = config.with_env(key, value);
        }
        Ok(config)
    }

    /// Settings for the automated strategy.
    pub fn automated_settings(&self) -> AutomatedSettings {
        AutomatedSettings {
            prompt: self.prompt.ready.clone(),
            probe: self.automated.probe.clone(),
            continuation: self.automated.continuation.clone(),
            completion_marker: self.automated.completion_marker.clone(),
            step_header: self.automated.step_header.clone(),
            initial_timeout: Duration::from_millis(self.automated.initial_timeout_ms),
            step_timeout: Duration::from_millis(self.automated.step_timeout_ms),
            max_iterations: self.automated.max_iterations,
        }
    }

    /// Interactive strategy over the given operator streams.
    pub fn interactive_strategy<R, W>(&self, input: R, display: W) -> InteractiveStrategy<R, W>
    where
        R: tokio::io::AsyncRead + Send + Unpin,
        W: tokio::io::AsyncWrite + Send + Unpin,
    {
        let strategy = InteractiveStrategy::new(input, display)
            .with_prompt(&self.prompt.ready)
            .with_initial_timeout(Duration::from_millis(self.interactive.initial_timeout_ms));
        match &self.interactive.startup_input {
            Some(startup) => strategy.with_startup_input(startup.as_bytes()),
            None => strategy,
        }
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
mode = "interactive"
log_file = "spike_output.log"

[spawn]
program = "spike"
args = ["-d", "--log-commits", "rv64ui-p-and"]
working_dir = "/tmp"
env = { TERM = "dumb" }
cols = 132
rows = 50
teardown_grace_ms = 500

[prompt]
ready = "(spike) "

[automated]
probe = "reg 0 a0\n"
completion_marker = "tohost"
step_timeout_ms = 250
max_iterations = 10

[interactive]
startup_input = "r\n"
initial_timeout_ms = 1000
"#;

    #[test]
    fn test_parse_full_config() {
        let config = RunConfig::parse(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.mode, Mode::Interactive);
        assert_eq!(config.log_file, Some(PathBuf::from("spike_output.log")));

        let spawn = config.spawn_config().unwrap();
        assert_eq!(
            spawn.command,
            CommandSpec::Exec {
                program: "spike".to_string(),
                args: vec!["-d".to_string(), "--log-commits".to_string(), "rv64ui-p-and".to_string()],
            }
        );
        assert_eq!((spawn.cols, spawn.rows), (132, 50));
        assert_eq!(spawn.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(spawn.env, vec![("TERM".to_string(), "dumb".to_string())]);
        assert_eq!(spawn.teardown_grace, Duration::from_millis(500));

        let settings = config.automated_settings();
        assert_eq!(settings.probe, "reg 0 a0\n");
        assert_eq!(settings.continuation, "\n");
        assert_eq!(settings.step_timeout, Duration::from_millis(250));
        assert_eq!(settings.initial_timeout, Duration::from_secs(5));
        assert_eq!(settings.max_iterations, 10);
    }

    #[test]
    fn test_defaults_match_strategy_defaults() {
        let mut config = RunConfig::parse("").unwrap();
        config.set_shell("spike -d prog");
        config.validate().unwrap();

        assert_eq!(config.mode, Mode::Automated);
        assert_eq!(config.automated_settings(), AutomatedSettings::default());
        let spawn = config.spawn_config().unwrap();
        assert_eq!(spawn.command, CommandSpec::Shell("spike -d prog".to_string()));
        assert_eq!(spawn.teardown_grace, DEFAULT_TEARDOWN_GRACE);
    }

    #[test]
    fn test_command_is_required() {
        let config = RunConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_shell_and_program_are_exclusive() {
        let config = RunConfig::parse("[spawn]\nshell = \"a\"\nprogram = \"b\"\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_override_replaces_command() {
        let mut config = RunConfig::parse("[spawn]\nshell = \"a\"\n").unwrap();
        config.set_program("spike", vec!["-d".to_string()]);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.command().unwrap(),
            CommandSpec::Exec {
                program: "spike".to_string(),
                args: vec!["-d".to_string()],
            }
        );
    }

    #[test]
    fn test_rejects_empty_markers_and_zero_cap() {
        let cases = [
            "[prompt]\nready = \"\"\n",
            "[automated]\ncompletion_marker = \"\"\n",
            "[automated]\nstep_header = \"\"\n",
            "[automated]\nmax_iterations = 0\n",
        ];
        for case in cases {
            let mut config = RunConfig::parse(case).unwrap();
            config.set_shell("true");
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid { .. })),
                "accepted: {}",
                case
            );
        }
    }

    #[test]
    fn test_unknown_keys_and_modes_fail_to_parse() {
        assert!(matches!(RunConfig::parse("mode = \"batch\"\n"), Err(ConfigError::Parse(_))));
        assert!(matches!(RunConfig::parse("[spawn]\ncommand = \"x\"\n"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = RunConfig::load("/nonexistent/ptydriver.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
