//! Command-line entry point.
//!
//! ```bash
//! # Single-step a test binary until it reaches tohost
//! ptydriver --log spike_output.log automated -- spike -d --log-commits rv64ui-p-and
//!
//! # Drive the simulator by hand, starting it running first
//! ptydriver interactive --startup r -- 'spike -d prog 2> trace.log'
//!
//! # Everything from a config file
//! ptydriver --config spike.toml automated
//! ```
//!
//! Exits 0 when the run ends normally and 1 on any error or when an
//! automated run times out or loses the child.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};
use log::info;

use ptydriver::driver::{AutomatedStrategy, CaptureStrategy, FailureCause, InteractiveStrategy, SessionBuilder};
use ptydriver::{Mode, RunConfig, Session, Strategy, Termination};

#[derive(Parser, Debug)]
#[command(name = "ptydriver", version, about = "Drive a prompt-based program over a pseudo-terminal")]
struct Cli {
    /// TOML run configuration
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Append everything the child prints to this file
    #[arg(long)]
    log: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    mode: ModeCommand,
}

#[derive(Subcommand, Debug)]
enum ModeCommand {
    /// Alternate probe and continuation until the child gives a verdict
    Automated {
        #[command(flatten)]
        common: Common,

        /// Probe command (a newline is appended)
        #[arg(long)]
        probe: Option<String>,

        /// Per-step prompt timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Give up after this many steps
        #[arg(long)]
        max_iterations: Option<usize>,
    },
    /// Relay this terminal to the child
    Interactive {
        #[command(flatten)]
        common: Common,

        /// Line sent after the first prompt (a newline is appended)
        #[arg(long)]
        startup: Option<String>,

        /// First-prompt timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Print the child's output until it exits
    Capture {
        #[command(flatten)]
        common: Common,
    },
}

#[derive(Args, Debug)]
struct Common {
    /// Prompt the child prints when ready
    #[arg(long)]
    prompt: Option<String>,

    /// Command to run; one argument goes through /bin/sh -c, several are exec'd
    #[arg(last = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ptydriver: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Stdin reads park a blocking thread that would stall a normal runtime
    // shutdown, so the runtime is built by hand and shut down in the background.
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("ptydriver: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(async {
        match run(config).await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("ptydriver: {}", e);
                ExitCode::FAILURE
            }
        }
    });
    runtime.shutdown_background();
    code
}

fn load_config(cli: &Cli) -> ptydriver::Result<RunConfig> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if let Some(log) = &cli.log {
        config.log_file = Some(log.clone());
    }

    let common = match &cli.mode {
        ModeCommand::Automated {
            common,
            probe,
            timeout_ms,
            max_iterations,
        } => {
            config.mode = Mode::Automated;
            if let Some(probe) = probe {
                config.automated.probe = line(probe);
            }
            if let Some(timeout_ms) = timeout_ms {
                config.automated.step_timeout_ms = *timeout_ms;
            }
            if let Some(max_iterations) = max_iterations {
                config.automated.max_iterations = *max_iterations;
            }
            common
        }
        ModeCommand::Interactive {
            common,
            startup,
            timeout_ms,
        } => {
            config.mode = Mode::Interactive;
            if let Some(startup) = startup {
                config.interactive.startup_input = Some(line(startup));
            }
            if let Some(timeout_ms) = timeout_ms {
                config.interactive.initial_timeout_ms = *timeout_ms;
            }
            common
        }
        ModeCommand::Capture { common } => {
            config.mode = Mode::Capture;
            common
        }
    };

    if let Some(prompt) = &common.prompt {
        config.prompt.ready = prompt.clone();
    }
    match common.command.as_slice() {
        [] => {}
        [shell] => config.set_shell(shell.clone()),
        [program, args @ ..] => config.set_program(program.clone(), args.to_vec()),
    }

    config.validate()?;
    Ok(config)
}

fn line(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{}\n", text)
    }
}

async fn run(config: RunConfig) -> ptydriver::Result<ExitCode> {
    let mut builder = SessionBuilder::from_config(config.spawn_config()?);
    if let Some(path) = &config.log_file {
        builder = builder.transcript_file(path);
    }
    let session = builder.build()?;
    info!("Spawned {}", session.pty().command());

    match config.mode {
        Mode::Automated => {
            let mut strategy = AutomatedStrategy::new(config.automated_settings()).with_display(tokio::io::stdout());
            let report = drive(session, &mut strategy).await?;

            eprintln!();
            match report.termination {
                Termination::Succeeded(reason) => {
                    eprintln!("ptydriver: finished after {} steps ({:?})", report.iterations(), reason);
                    Ok(ExitCode::SUCCESS)
                }
                Termination::Failed { phase, cause } => {
                    match cause {
                        FailureCause::TimedOut | FailureCause::EndOfStream => {
                            eprintln!("ptydriver: timeout or end of stream ({} during {:?})", cause, phase)
                        }
                        FailureCause::IterationLimit => eprintln!("ptydriver: {}", cause),
                    }
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Mode::Interactive => {
            let mut strategy: InteractiveStrategy<_, _> =
                config.interactive_strategy(tokio::io::stdin(), tokio::io::stdout());
            let report = drive(session, &mut strategy).await?;
            info!("Interactive session ended: {:?}", report.ended_by);
            Ok(ExitCode::SUCCESS)
        }
        Mode::Capture => {
            let report = drive(session, &mut CaptureStrategy::stdout()).await?;
            info!("Captured {} lines", report.lines);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run `strategy`, cancelling on Ctrl-C.
async fn drive<S: Strategy>(session: Session, strategy: &mut S) -> ptydriver::Result<S::Output> {
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let finished = session.run_until(strategy, shutdown).await?;
    if let Some(status) = finished.exit_status {
        info!("Child {}", status);
    }
    Ok(finished.output)
}
