/*
One run: check daylight, read the inverter, parse, build the addstatus payload, upload.

The gate is checked first so the serial line to the inverter is left alone at night. Every stage
fails fast; the scheduler that started us is responsible for the next attempt.
*/

// USE STATEMENTS
    use chrono::{DateTime, TimeZone};
    use log::{info, warn};
    use std::{fmt, process::ExitCode};
    use thiserror::Error;

    use crate::acquisition::{Acquire, AcquisitionError};
    use crate::aurora::{self, ParseError};
    use crate::daylight::{DaylightWindow, InvalidLocationError, Location};
    use crate::pvoutput::{HttpReply, HttpTransport, PvOutputClient, TransportError, UploadError, UploadFailure, UploadPayload};

// CONSTANTS
    // process exit codes, 0 is a completed or skipped run
    pub const EXIT_CONFIG: u8 = 2;
    pub const EXIT_ACQUISITION: u8 = 3;
    pub const EXIT_PARSE: u8 = 4;
    pub const EXIT_LOCATION: u8 = 5;
    pub const EXIT_UPLOAD: u8 = 6;
    pub const EXIT_TRANSPORT: u8 = 7;
    pub const EXIT_TIMEOUT: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CheckDaylight,
    AcquireOutput,
    ParseOutput,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Stage::*;
        match self {
            CheckDaylight => write!(f, "check daylight"),
            AcquireOutput => write!(f, "acquire output"),
            ParseOutput => write!(f, "parse output"),
            Upload => write!(f, "upload"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("{stage}: {0}", stage = Stage::CheckDaylight)]
    InvalidLocation(#[from] InvalidLocationError),
    #[error("{stage}: {0}", stage = Stage::AcquireOutput)]
    Acquisition(#[from] AcquisitionError),
    #[error("{stage}: {0}", stage = Stage::ParseOutput)]
    Parse(#[from] ParseError),
    #[error("{stage}: {0}", stage = Stage::Upload)]
    Upload(UploadError),
    #[error("{stage}: {0}", stage = Stage::Upload)]
    Transport(TransportError),
}

impl From<UploadFailure> for RunError {
    fn from(failure: UploadFailure) -> Self {
        match failure {
            UploadFailure::Rejected(rejected) => RunError::Upload(rejected),
            UploadFailure::Transport(transport) => RunError::Transport(transport),
        }
    }
}

impl RunError {
    pub fn stage(&self) -> Stage {
        match self {
            RunError::InvalidLocation(_) => Stage::CheckDaylight,
            RunError::Acquisition(_) => Stage::AcquireOutput,
            RunError::Parse(_) => Stage::ParseOutput,
            RunError::Upload(_) | RunError::Transport(_) => Stage::Upload,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::InvalidLocation(_) => EXIT_LOCATION,
            RunError::Acquisition(AcquisitionError::TimedOut(_)) => EXIT_TIMEOUT,
            RunError::Acquisition(_) => EXIT_ACQUISITION,
            RunError::Parse(_) => EXIT_PARSE,
            RunError::Upload(_) => EXIT_UPLOAD,
            RunError::Transport(TransportError::TimedOut) => EXIT_TIMEOUT,
            RunError::Transport(_) => EXIT_TRANSPORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Outside the daylight window, nothing was read or sent.
    Skipped(DaylightWindow),
    Done { payload: UploadPayload, reply: HttpReply },
}

impl RunOutcome {
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::SUCCESS
    }
}

pub struct Orchestrator<A, T> {
    acquire: A,
    client: PvOutputClient<T>,
    // None disables the daylight gate
    location: Option<Location>,
    extended_status: bool,
}

impl<A: Acquire, T: HttpTransport> Orchestrator<A, T> {
    pub fn new(acquire: A, client: PvOutputClient<T>, location: Option<Location>, extended_status: bool) -> Self {
        Self { acquire, client, location, extended_status }
    }

    pub async fn run<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<RunOutcome, RunError>
    where
        Tz::Offset: fmt::Display,
    {
        info!("Date   : {}", now.format("%Y-%m-%d"));
        info!("Time   : {}", now.format("%H:%M:%S"));

        if let Some(location) = &self.location {
            let window = DaylightWindow::for_date(now.date_naive(), location)?;
            let adjusted = location.adjusted(now)?;
            let tz = now.timezone();
            info!("Sunrise: {}", window.sunrise.with_timezone(&tz).format("%H:%M:%S"));
            info!("Sunset : {}", window.sunset.with_timezone(&tz).format("%H:%M:%S"));
            info!("Delta  : {} min", location.minutes_delta);
            if !window.contains(&adjusted) {
                info!("Night time: exiting");
                return Ok(RunOutcome::Skipped(window));
            }
            info!("Daylight time");
        }

        let raw_output = self.acquire.acquire().await?;
        let reading = aurora::parse(&raw_output)?;
        info!(
            "Reading: daily={:.0}Wh power={:.1}W inv={:.1}°C grid={:.1}V",
            reading.daily_energy_wh, reading.total_power_w, reading.inverter_temp_c, reading.grid_voltage_v
        );

        let mut payload = UploadPayload::build(&reading, now);
        if self.extended_status {
            payload = payload.with_extended_status(&reading);
        }
        let reply = self.client.add_status(&payload).await?;
        Ok(RunOutcome::Done { payload, reply })
    }
}

/// Maps the result of a run to the process exit code, logging failures with their stage.
pub fn exit_code_for(result: &Result<RunOutcome, RunError>) -> ExitCode {
    match result {
        Ok(outcome) => outcome.exit_code(),
        Err(run_eff) => {
            warn!("Run failed at stage '{}' (exit {})", run_eff.stage(), run_eff.exit_code());
            ExitCode::from(run_eff.exit_code())
        }
    }
}
