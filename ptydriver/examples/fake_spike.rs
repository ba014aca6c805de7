//! Automated stepping against a scripted stand-in for `spike -d`
//!
//! The child is a small shell loop that prints the `(spike) ` prompt, answers
//! each line with a step header, and reports `tohost` after a few steps. It
//! needs nothing but `/bin/sh`, so it shows the whole flow without a real
//! simulator installed.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example fake_spike
//! cargo run --example fake_spike -- --steps 7 --log fake_spike.log
//! ```

use std::path::PathBuf;

use ptydriver::driver::{AutomatedSettings, AutomatedStrategy, SessionBuilder, StepInput, Termination};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let script = format!(
        "printf 'bbl loader\\n(spike) '; i=0; while read line; do i=$((i+1)); \
         if [ \"$i\" -ge {} ]; then printf 'core   0: 0x0000000080000044 tohost 1\\n(spike) '; \
         else printf 'core   0: 0x00000000800000%02x\\n(spike) ' \"$((i*4))\"; fi; done",
        args.steps
    );

    let mut builder = SessionBuilder::shell(script);
    if let Some(path) = &args.log {
        builder = builder.transcript_file(path);
    }
    let session = builder.build()?;

    let mut strategy = AutomatedStrategy::new(AutomatedSettings::default());
    let finished = session.run(&mut strategy).await?;
    let report = finished.output;

    println!("=== {} steps in {:?} ===", report.iterations(), report.elapsed);
    for step in &report.steps {
        let label = match step.input {
            StepInput::Probe => "probe",
            StepInput::Continuation => "continue",
        };
        println!("[{:>3}] {:<8} {:?}", step.iteration, label, step.output.trim());
    }

    match report.termination {
        Termination::Succeeded(reason) => println!("Succeeded: {:?}", reason),
        Termination::Failed { phase, cause } => println!("Failed: {} during {:?}", cause, phase),
    }
    if let Some(status) = finished.exit_status {
        println!("Child: {}", status);
    }

    Ok(())
}

struct Args {
    steps: usize,
    log: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut steps = 5;
        let mut log = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--steps" => {
                    i += 1;
                    steps = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(steps);
                }
                "--log" => {
                    i += 1;
                    log = args.get(i).map(PathBuf::from);
                }
                _ => {}
            }
            i += 1;
        }

        Self { steps, log }
    }
}
