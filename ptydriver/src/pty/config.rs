//! Spawn configuration for PTY sessions.

use std::ffi::{CString, OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use libc::c_char;

use crate::error::PtyError;

/// Shell used for [`CommandSpec::Shell`].
pub const SHELL_PATH: &str = "/bin/sh";

/// Terminal width when none is configured.
pub const DEFAULT_COLS: u16 = 80;

/// Terminal height when none is configured.
pub const DEFAULT_ROWS: u16 = 24;

/// Teardown grace period when none is configured.
pub const DEFAULT_TEARDOWN_GRACE: Duration = Duration::from_millis(200);

/// What to execute in the child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    /// A command line run through `/bin/sh -c`.
    Shell(String),

    /// A program executed directly with an argument list.
    ///
    /// Bare program names are looked up on `PATH` before forking.
    Exec {
        /// Program name or path.
        program: String,
        /// Arguments, not including `argv[0]`.
        args: Vec<String>,
    },
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandSpec::Shell(line) => write!(f, "{} -c {:?}", SHELL_PATH, line),
            CommandSpec::Exec { program, args } => {
                write!(f, "{}", program)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
        }
    }
}

/// Configuration for spawning a child on a pseudo-terminal.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Command to run.
    pub command: CommandSpec,

    /// Working directory for the child (inherited when `None`).
    pub working_dir: Option<PathBuf>,

    /// Environment overrides applied on top of the parent environment.
    pub env: Vec<(String, String)>,

    /// Terminal width.
    pub cols: u16,

    /// Terminal height.
    pub rows: u16,

    /// How long teardown waits for the child after hanging up the terminal
    /// before killing its process group.
    pub teardown_grace: Duration,
}

impl SpawnConfig {
    /// Run `command` through `/bin/sh -c`.
    pub fn shell(command: impl Into<String>) -> Self {
        Self::new(CommandSpec::Shell(command.into()))
    }

    /// Execute `program` directly with `args`.
    pub fn exec<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(CommandSpec::Exec {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        })
    }

    /// Create a config with default terminal settings.
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            working_dir: None,
            env: Vec::new(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            teardown_grace: DEFAULT_TEARDOWN_GRACE,
        }
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the terminal dimensions.
    pub fn with_window_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    /// Set the teardown grace period.
    pub fn with_teardown_grace(mut self, grace: Duration) -> Self {
        self.teardown_grace = grace;
        self
    }

    /// Build everything the child needs for `execve`, before forking.
    ///
    /// Nothing after `fork()` may allocate, so all strings and pointer
    /// arrays are produced here.
    pub(crate) fn prepare(&self) -> Result<ExecPlan, PtyError> {
        let (program, argv) = match &self.command {
            CommandSpec::Shell(line) => (
                PathBuf::from(SHELL_PATH),
                vec!["sh".to_string(), "-c".to_string(), line.clone()],
            ),
            CommandSpec::Exec { program, args } => {
                if program.is_empty() {
                    return Err(PtyError::InvalidCommand("empty program name".to_string()));
                }
                let path = resolve_program(program, self.path_override(), self.working_dir.as_deref())?;
                let mut argv = Vec::with_capacity(args.len() + 1);
                argv.push(program.clone());
                argv.extend(args.iter().cloned());
                (path, argv)
            }
        };

        let program = to_cstring(program.as_os_str().as_bytes(), "program path")?;
        let argv = argv
            .iter()
            .map(|arg| to_cstring(arg.as_bytes(), "argument"))
            .collect::<Result<Vec<_>, _>>()?;
        let envp = self.environment()?;
        let cwd = self
            .working_dir
            .as_ref()
            .map(|dir| to_cstring(dir.as_os_str().as_bytes(), "working directory"))
            .transpose()?;

        Ok(ExecPlan::new(program, argv, envp, cwd))
    }

    fn path_override(&self) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(key, _)| key == "PATH")
            .map(|(_, value)| value.as_str())
    }

    /// Parent environment with overrides applied, as `KEY=VALUE` strings.
    fn environment(&self) -> Result<Vec<CString>, PtyError> {
        let mut vars: Vec<(OsString, OsString)> = std::env::vars_os().collect();
        for (key, value) in &self.env {
            if key.is_empty() || key.contains('=') {
                return Err(PtyError::InvalidCommand(format!(
                    "invalid environment variable name {:?}",
                    key
                )));
            }
            vars.retain(|(k, _)| k != OsStr::new(key));
            vars.push((key.into(), value.into()));
        }

        vars.into_iter()
            .map(|(key, value)| {
                let mut entry = key.into_vec();
                entry.push(b'=');
                entry.extend(value.into_vec());
                to_cstring(&entry, "environment entry")
            })
            .collect()
    }
}

/// Strings and NULL-terminated pointer arrays handed to `execve` in the child.
///
/// The pointer arrays borrow from the owned `CString`s, whose heap buffers
/// do not move when the plan itself is moved.
#[derive(Debug)]
pub(crate) struct ExecPlan {
    program: CString,
    // Storage behind `argv_ptrs` and `envp_ptrs`.
    #[allow(dead_code)]
    arg_strings: Vec<CString>,
    #[allow(dead_code)]
    env_strings: Vec<CString>,
    cwd: Option<CString>,
    argv_ptrs: Vec<*const c_char>,
    envp_ptrs: Vec<*const c_char>,
}

impl ExecPlan {
    fn new(program: CString, argv: Vec<CString>, envp: Vec<CString>, cwd: Option<CString>) -> Self {
        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(&envp);
        Self {
            program,
            arg_strings: argv,
            env_strings: envp,
            cwd,
            argv_ptrs,
            envp_ptrs,
        }
    }

    pub(crate) fn program(&self) -> &CString {
        &self.program
    }

    pub(crate) fn cwd(&self) -> Option<&CString> {
        self.cwd.as_ref()
    }

    pub(crate) fn argv(&self) -> *const *const c_char {
        self.argv_ptrs.as_ptr()
    }

    pub(crate) fn envp(&self) -> *const *const c_char {
        self.envp_ptrs.as_ptr()
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

fn to_cstring(bytes: &[u8], what: &str) -> Result<CString, PtyError> {
    CString::new(bytes).map_err(|_| PtyError::InvalidCommand(format!("{} contains a NUL byte", what)))
}

/// Find `program` on `PATH` unless it already contains a slash.
///
/// Relative `PATH` entries are taken from the directory the child will run
/// in, since `execve` happens after the child changes into it.
fn resolve_program(program: &str, path_override: Option<&str>, working_dir: Option<&Path>) -> Result<PathBuf, PtyError> {
    if program.contains('/') {
        return Ok(PathBuf::from(program));
    }

    let cwd = child_cwd(working_dir)?;
    let search = match path_override {
        Some(path) => OsString::from(path),
        None => std::env::var_os("PATH").unwrap_or_else(|| OsString::from("/usr/bin:/bin")),
    };
    let search = std::env::join_paths(std::env::split_paths(&search).map(|dir| cwd.join(dir)))
        .map_err(|e| PtyError::InvalidCommand(format!("invalid PATH: {}", e)))?;

    which::which_in(program, Some(search), &cwd)
        .map_err(|e| PtyError::InvalidCommand(format!("{} not found on PATH: {}", program, e)))
}

/// Absolute directory the child will exec from.
fn child_cwd(working_dir: Option<&Path>) -> Result<PathBuf, PtyError> {
    match working_dir {
        Some(dir) if dir.is_absolute() => Ok(dir.to_path_buf()),
        _ => {
            let here = std::env::current_dir()
                .map_err(|e| PtyError::InvalidCommand(format!("cannot determine working directory: {}", e)))?;
            Ok(working_dir.map_or_else(|| here.clone(), |dir| here.join(dir)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_plan_uses_bin_sh() {
        let plan = SpawnConfig::shell("echo hi").prepare().unwrap();
        assert_eq!(plan.program().as_bytes(), SHELL_PATH.as_bytes());
        assert_eq!(plan.arg_strings.len(), 3);
        assert_eq!(plan.arg_strings[2].as_bytes(), b"echo hi");
        assert_eq!(plan.argv_ptrs.len(), 4);
        assert!(plan.argv_ptrs[3].is_null());
    }

    #[test]
    fn test_exec_resolves_on_path() {
        let plan = SpawnConfig::exec("sh", ["-c", "true"]).prepare().unwrap();
        let program = plan.program().to_str().unwrap();
        assert!(program.ends_with("/sh"), "resolved to {}", program);
        assert_eq!(plan.arg_strings[0].as_bytes(), b"sh");
    }

    #[test]
    fn test_exec_missing_program() {
        let err = SpawnConfig::exec("definitely-not-a-real-program-xyz", Vec::<String>::new())
            .prepare()
            .unwrap_err();
        assert!(matches!(err, PtyError::InvalidCommand(_)));
        assert!(err.is_spawn_failure());
    }

    #[test]
    fn test_relative_path_entry_is_searched_from_working_dir() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let sim = dir.path().join("fake-sim");
        std::fs::write(&sim, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&sim, std::fs::Permissions::from_mode(0o755)).unwrap();

        let plan = SpawnConfig::exec("fake-sim", Vec::<String>::new())
            .with_working_dir(dir.path())
            .with_env("PATH", ".")
            .prepare()
            .unwrap();

        let program = PathBuf::from(plan.program().to_str().unwrap());
        assert!(program.starts_with(dir.path()), "resolved to {}", program.display());
        assert!(program.ends_with("fake-sim"));
    }

    #[test]
    fn test_exec_with_slash_is_not_resolved() {
        let plan = SpawnConfig::exec("/nonexistent/spike", ["-d"]).prepare().unwrap();
        assert_eq!(plan.program().as_bytes(), b"/nonexistent/spike");
    }

    #[test]
    fn test_nul_byte_rejected() {
        let err = SpawnConfig::shell("echo \0oops").prepare().unwrap_err();
        assert!(matches!(err, PtyError::InvalidCommand(_)));
    }

    #[test]
    fn test_env_override_replaces_parent_value() {
        let plan = SpawnConfig::shell("true")
            .with_env("PTYDRIVER_TEST_VAR", "one")
            .with_env("PTYDRIVER_TEST_VAR", "two")
            .prepare()
            .unwrap();
        let matching: Vec<_> = plan
            .env_strings
            .iter()
            .filter(|e| e.as_bytes().starts_with(b"PTYDRIVER_TEST_VAR="))
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].as_bytes(), b"PTYDRIVER_TEST_VAR=two");
    }

    #[test]
    fn test_command_display() {
        assert_eq!(
            SpawnConfig::exec("spike", ["-d", "prog"]).command.to_string(),
            "spike -d prog"
        );
    }
}
