/*
Program completes the following actions, once per invocation:
1)  Checks whether the sun is up at the configured location (skipped when no location is configured).
2)  Runs the aurora command to read the inverter status line and parses daily energy and string power.
3)  Uploads the values to pvoutput.org (addstatus service) and exits.

Meant to be started every few minutes by cron or a systemd timer; nothing is kept between runs.
*/

// MODULES
    mod acquisition;
    mod aurora;
    mod daylight;
    mod pvoutput;
    mod run;
    mod settings;

// USE STATEMENTS
    use chrono::Local;
    use clap::{ArgAction, Parser};
    use log::{LevelFilter, error, info};
    use log4rs::{
        append::console::{ConsoleAppender, Target},
        config::{Appender, Config as LogConfig, Root},
        encode::pattern::PatternEncoder,
    };
    use std::{error, path::Path, process::ExitCode};

    use crate::acquisition::AuroraCommand;
    use crate::pvoutput::{PvOutputClient, ReqwestTransport};
    use crate::run::{EXIT_CONFIG, EXIT_TRANSPORT, Orchestrator, RunOutcome, exit_code_for};
    use crate::settings::{Overrides, load_conf, verify_conf};

// CONSTANTS
    const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {l} {t} - {m}{n}";

/// Aurora power inverter uploader to pvoutput.org
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// configuration file, extension optional (config.toml, config.yaml, ...)
    #[arg(long, value_name = "FILE", default_value = "config")]
    config: String,

    /// log4rs configuration file; when missing, logs go to stderr at the -v level
    #[arg(long, value_name = "FILE", default_value = "log_config.yml")]
    log_config: String,

    /// set verbosity level (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    overrides: Overrides,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(log_eff) = init_logging(&cli.log_config, cli.verbose) {
        eprintln!("Fatal Error. Could not set up logging from {}: {}", cli.log_config, log_eff);
        return ExitCode::from(EXIT_CONFIG);
    }

    // load and verify config: file, environment, then command line
    let settings = match load_conf(&cli.config, &cli.overrides).and_then(verify_conf) {
        Ok(settings) => settings,
        Err(conf_eff) => {
            error!("Fatal Error. {}", conf_eff);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let acquire = match AuroraCommand::from_command_line(&settings.command, settings.aurora_timeout) {
        Ok(acquire) => acquire,
        Err(cmd_eff) => {
            error!("Fatal Error. {}", cmd_eff);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let transport = match ReqwestTransport::new(settings.pvoutput_timeout) {
        Ok(transport) => transport,
        Err(http_eff) => {
            error!("Fatal Error. {}", http_eff);
            return ExitCode::from(EXIT_TRANSPORT);
        }
    };
    let client = PvOutputClient::new(transport, &settings.url, &settings.api_key, &settings.system_id);
    let orchestrator = Orchestrator::new(acquire, client, settings.location, settings.extended_status);

    let result = orchestrator.run(&Local::now()).await;
    match &result {
        Ok(RunOutcome::Skipped(_)) => info!("Not daylight time, nothing uploaded"),
        Ok(RunOutcome::Done { payload, reply }) => info!("Status uploaded ({}): {}", reply.status, payload),
        Err(run_eff) => error!("{}", run_eff),
    }
    exit_code_for(&result)
}

fn init_logging(log_config: &str, verbosity: u8) -> Result<(), Box<dyn error::Error + Send + Sync>> {
    if Path::new(log_config).exists() {
        log4rs::init_file(log_config, Default::default())?;
        return Ok(());
    }

    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();
    let log_conf = LogConfig::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))?;
    log4rs::init_config(log_conf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_accepts_original_flags() {
        let cli = Cli::try_parse_from([
            "pvaurora", "-v", "-m", "-60", "--latitude", "45.07", "--longitude", "7.69",
            "-c", "/aurora -a 2 -c -d0 -e /dev/ttyUSB0", "-a", "key", "-i", "12345",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.config, "config");
        assert_eq!(cli.overrides.minutes_delta, Some(-60));
        assert_eq!(cli.overrides.latitude, Some(45.07));
        assert_eq!(cli.overrides.command.as_deref(), Some("/aurora -a 2 -c -d0 -e /dev/ttyUSB0"));
        assert_eq!(cli.overrides.system_id.as_deref(), Some("12345"));
    }
}
