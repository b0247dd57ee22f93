/*
Runs the external `aurora` program once and hands back what it printed.
*/

// USE STATEMENTS
    use log::{debug, warn};
    use std::{io, process::Stdio, time::Duration};
    use thiserror::Error;
    use tokio::{process::Command, time::timeout};

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("no acquisition command configured")]
    EmptyCommand,
    #[error("could not start '{program}': {source}")]
    Spawn { program: String, source: io::Error },
    #[error("command exited with {status}: {stderr}")]
    ExitStatus { status: String, stderr: String },
    #[error("command produced no output")]
    EmptyOutput,
    #[error("command did not finish within {0:?}")]
    TimedOut(Duration),
}

pub trait Acquire {
    /// Raw text printed by the acquisition tool on success.
    async fn acquire(&self) -> Result<String, AcquisitionError>;
}

/// Command line executed without a shell: first word is the program, the rest are its arguments.
#[derive(Clone, Debug)]
pub struct AuroraCommand {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl AuroraCommand {
    pub fn from_command_line(command_line: &str, timeout: Option<Duration>) -> Result<Self, AcquisitionError> {
        let mut words = command_line.split_whitespace().map(str::to_owned);
        match words.next() {
            Some(program) => Ok(Self { program, args: words.collect(), timeout }),
            None => Err(AcquisitionError::EmptyCommand),
        }
    }
}

impl Acquire for AuroraCommand {
    async fn acquire(&self) -> Result<String, AcquisitionError> {
        debug!("Running: {} {}", self.program, self.args.join(" "));
        let mut command = Command::new(&self.program);
        command.args(&self.args).stdin(Stdio::null()).kill_on_drop(true);
        let child = command.output();

        let output_res = match self.timeout {
            Some(limit) => match timeout(limit, child).await {
                Ok(res) => res,
                Err(_elapsed) => return Err(AcquisitionError::TimedOut(limit)),
            },
            None => child.await,
        };
        let output = output_res.map_err(|source| AcquisitionError::Spawn { program: self.program.clone(), source })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            warn!("{} exited with {}", self.program, output.status);
            return Err(AcquisitionError::ExitStatus { status: output.status.to_string(), stderr });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            return Err(AcquisitionError::EmptyOutput);
        }
        Ok(stdout)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::cell::Cell;

    /// Stand-in for the inverter: returns a fixed line (or a failure) and counts calls.
    pub struct FakeAcquire {
        behaviour: Behaviour,
        pub calls: Cell<usize>,
    }

    enum Behaviour {
        Print(String),
        ExitNonzero,
        TimeOut,
    }

    impl FakeAcquire {
        fn with(behaviour: Behaviour) -> Self {
            Self { behaviour, calls: Cell::new(0) }
        }

        pub fn printing(line: &str) -> Self {
            Self::with(Behaviour::Print(line.to_owned()))
        }

        pub fn exiting_nonzero() -> Self {
            Self::with(Behaviour::ExitNonzero)
        }

        pub fn timing_out() -> Self {
            Self::with(Behaviour::TimeOut)
        }
    }

    impl Acquire for FakeAcquire {
        async fn acquire(&self) -> Result<String, AcquisitionError> {
            self.calls.set(self.calls.get() + 1);
            match &self.behaviour {
                Behaviour::Print(line) => Ok(line.clone()),
                Behaviour::ExitNonzero => {
                    Err(AcquisitionError::ExitStatus { status: "exit status: 1".to_owned(), stderr: String::new() })
                }
                Behaviour::TimeOut => Err(AcquisitionError::TimedOut(Duration::from_secs(30))),
            }
        }
    }
}
