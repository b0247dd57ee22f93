/*
Configuration: file (config.toml / .yaml / .json ...), then PVAURORA__* environment variables, then
command line flags, highest last. Verified once at start-up and handed to the run as typed values.
*/

// USE STATEMENTS
    use clap::Args;
    use config::Config;
    use log::{debug, error};
    use serde::Deserialize;
    use std::{fs, io, time::Duration};
    use thiserror::Error;

    use crate::daylight::{Location, MAX_MINUTES_DELTA};
    use crate::pvoutput::ADD_STATUS_URL;

#[derive(Debug, Error)]
pub enum ConfError {
    #[error("could not load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("configuration parameter {0} is missing or empty")]
    Missing(&'static str),
    #[error("could not read pvoutput api key from {path}: {source}")]
    ApiKeyFile { path: String, source: io::Error },
    #[error("latitude and longitude must be given together, or neither to disable the daylight check")]
    PartialLocation,
    #[error("location.minutes_delta {0} is outside [-{max}, {max}]", max = MAX_MINUTES_DELTA)]
    MinutesDelta(i64),
}

// Config structures
#[derive(Debug, Deserialize, Clone)]
pub struct Conf {
    #[serde(default = "AuroraConf::new")]
    pub aurora: AuroraConf,
    #[serde(default = "PvOutputConf::new")]
    pub pvoutput: PvOutputConf,
    #[serde(default = "LocationConf::new")]
    pub location: LocationConf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuroraConf {
    #[serde(default = "default_string")]
    pub command: String,
    // 0 disables the timeout
    #[serde(default = "default_aurora_timeout_ms")]
    pub timeout_ms: u64,
}
impl AuroraConf {
    fn new() -> Self {
        Self {
            command: String::new(),
            timeout_ms: default_aurora_timeout_ms(),
        }
    }
}
fn default_aurora_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PvOutputConf {
    #[serde(default = "default_string")]
    pub api_key: String,
    #[serde(default = "default_string")]
    pub api_key_path: String,
    #[serde(default = "default_string")]
    pub system_id: String,
    #[serde(default = "default_pvoutput_url")]
    pub url: String,
    #[serde(default = "default_pvoutput_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub extended_status: bool,
}
impl PvOutputConf {
    fn new() -> Self {
        Self {
            api_key: String::new(),
            api_key_path: String::new(),
            system_id: String::new(),
            url: default_pvoutput_url(),
            timeout_ms: default_pvoutput_timeout_ms(),
            extended_status: false,
        }
    }
}
fn default_pvoutput_url() -> String {
    ADD_STATUS_URL.to_owned()
}
fn default_pvoutput_timeout_ms() -> u64 {
    20_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocationConf {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub minutes_delta: i64,
}
impl LocationConf {
    fn new() -> Self {
        Self {
            latitude: None,
            longitude: None,
            minutes_delta: 0,
        }
    }
}

fn default_string() -> String {
    String::new()
}

/// Command line values that take precedence over the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// command to capture data from the power inverter
    #[arg(short = 'c', long, value_name = "CMD")]
    pub command: Option<String>,
    /// API key to access pvoutput.org services
    #[arg(short = 'a', long, value_name = "KEY")]
    pub api_key: Option<String>,
    /// system id on pvoutput.org where the data is stored
    #[arg(short = 'i', long, value_name = "SID")]
    pub system_id: Option<String>,
    /// minutes subtracted from the current time before comparing with sunrise and sunset
    #[arg(short = 'm', long, value_name = "NUM", allow_hyphen_values = true)]
    pub minutes_delta: Option<i64>,
    /// latitude for sunrise and sunset calculation
    #[arg(long, value_name = "LAT", allow_hyphen_values = true)]
    pub latitude: Option<f64>,
    /// longitude for sunrise and sunset calculation
    #[arg(long, value_name = "LON", allow_hyphen_values = true)]
    pub longitude: Option<f64>,
}

/// Verified configuration, ready to build a run from.
#[derive(Debug, Clone)]
pub struct Settings {
    pub command: String,
    pub aurora_timeout: Option<Duration>,
    pub api_key: String,
    pub system_id: String,
    pub url: String,
    pub pvoutput_timeout: Option<Duration>,
    pub extended_status: bool,
    pub location: Option<Location>,
}

pub fn load_conf(config_path: &str, overrides: &Overrides) -> Result<Conf, ConfError> {
    let settings = Config::builder()
        .add_source(config::File::with_name(config_path).required(false))
        .add_source(config::Environment::with_prefix("PVAURORA").separator("__"))
        .set_override_option("aurora.command", overrides.command.clone())?
        .set_override_option("pvoutput.api_key", overrides.api_key.clone())?
        .set_override_option("pvoutput.system_id", overrides.system_id.clone())?
        .set_override_option("location.minutes_delta", overrides.minutes_delta)?
        .set_override_option("location.latitude", overrides.latitude)?
        .set_override_option("location.longitude", overrides.longitude)?
        .build()?;
    let conf = settings.try_deserialize::<Conf>()?;
    debug!("Configuration loaded from {} and overrides", config_path);
    Ok(conf)
}

pub fn verify_conf(conf: Conf) -> Result<Settings, ConfError> {
    verify_aurora_conf(&conf.aurora)?;
    let pvoutput = verify_pvoutput_conf(conf.pvoutput)?;
    let location = verify_location_conf(&conf.location)?;

    Ok(Settings {
        command: conf.aurora.command,
        aurora_timeout: timeout_from_ms(conf.aurora.timeout_ms),
        api_key: pvoutput.api_key,
        system_id: pvoutput.system_id,
        url: pvoutput.url,
        pvoutput_timeout: timeout_from_ms(pvoutput.timeout_ms),
        extended_status: pvoutput.extended_status,
        location,
    })
}

fn timeout_from_ms(ms: u64) -> Option<Duration> {
    match ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    }
}

fn verify_aurora_conf(aurora_conf: &AuroraConf) -> Result<(), ConfError> {
    if aurora_conf.command.trim().is_empty() {
        error!("Aurora configuration parameter command is missing or empty");
        return Err(ConfError::Missing("aurora.command"));
    }
    Ok(())
}

fn verify_pvoutput_conf(pvoutput_conf: PvOutputConf) -> Result<PvOutputConf, ConfError> {
    // api key may be given directly or as a path to a file holding it; the direct value wins
    let mut conf = pvoutput_conf;
    if conf.system_id.trim().is_empty() {
        error!("pvoutput configuration parameter system_id is missing or empty");
        return Err(ConfError::Missing("pvoutput.system_id"));
    }
    if !conf.api_key.is_empty() {
        return Ok(conf);
    }
    if conf.api_key_path.is_empty() {
        error!("pvoutput configuration parameters api_key and api_key_path are both missing or empty. Must have at least one");
        return Err(ConfError::Missing("pvoutput.api_key"));
    }
    match fs::read_to_string(&conf.api_key_path) {
        Ok(api) if !api.trim().is_empty() => {
            conf.api_key = api.trim().to_owned();
            Ok(conf)
        }
        Ok(_) => {
            error!("pvoutput api key file {} is empty", conf.api_key_path);
            Err(ConfError::Missing("pvoutput.api_key"))
        }
        Err(api_eff) => {
            error!("Unable to retrieve pvoutput API key from file at {}. Err: {}", conf.api_key_path, api_eff);
            Err(ConfError::ApiKeyFile { path: conf.api_key_path, source: api_eff })
        }
    }
}

fn verify_location_conf(location_conf: &LocationConf) -> Result<Option<Location>, ConfError> {
    // coordinate range checks are left to the daylight gate so they surface with their own exit code
    let minutes_delta = location_conf.minutes_delta;
    if !(-MAX_MINUTES_DELTA..=MAX_MINUTES_DELTA).contains(&minutes_delta) {
        error!("Location configuration parameter minutes_delta {} is out of range", minutes_delta);
        return Err(ConfError::MinutesDelta(minutes_delta));
    }
    match (location_conf.latitude, location_conf.longitude) {
        (Some(latitude), Some(longitude)) => Ok(Some(Location {
            latitude,
            longitude,
            minutes_delta,
        })),
        (None, None) => Ok(None),
        _ => {
            error!("Location configuration has only one of latitude and longitude");
            Err(ConfError::PartialLocation)
        }
    }
}
