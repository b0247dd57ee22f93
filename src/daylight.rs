/*
Sunrise / sunset gate. Uses the NOAA general solar position equations (fractional year, equation of
time, declination, hour angle) which are good to about a minute for non-polar latitudes, more than
enough to decide whether the inverter is worth waking up.
*/

// USE STATEMENTS
    use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
    use std::f64::consts::PI;
    use thiserror::Error;

// CONSTANTS
    // zenith at sunrise/sunset: 90 degrees plus refraction and solar disc radius
    const SUNRISE_ZENITH_DEG: f64 = 90.833;
    const MINUTES_PER_DAY_HALF: f64 = 720.0;
    // one day either way
    pub const MAX_MINUTES_DELTA: i64 = 1440;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidLocationError {
    #[error("invalid location: latitude {latitude} must be within [-90, 90] and longitude {longitude} within [-180, 180]")]
    Coordinates { latitude: f64, longitude: f64 },
    #[error("invalid location: minutes delta {0} must be within [-1440, 1440]")]
    MinutesDelta(i64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    // minutes subtracted from the wall clock before comparing (daylight saving correction)
    pub minutes_delta: i64,
}

impl Location {
    pub fn validate(&self) -> Result<(), InvalidLocationError> {
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(InvalidLocationError::Coordinates { latitude: self.latitude, longitude: self.longitude });
        }
        if !(-MAX_MINUTES_DELTA..=MAX_MINUTES_DELTA).contains(&self.minutes_delta) {
            return Err(InvalidLocationError::MinutesDelta(self.minutes_delta));
        }
        Ok(())
    }

    /// `now` moved back by `minutes_delta`, the instant actually compared with the window.
    pub fn adjusted<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<DateTime<Tz>, InvalidLocationError> {
        self.validate()?;
        TimeDelta::try_minutes(self.minutes_delta)
            .and_then(|delta| now.clone().checked_sub_signed(delta))
            .ok_or(InvalidLocationError::MinutesDelta(self.minutes_delta))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaylightWindow {
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
}

impl DaylightWindow {
    /// Sunrise and sunset for `date` at `location`.
    pub fn for_date(date: NaiveDate, location: &Location) -> Result<Self, InvalidLocationError> {
        location.validate()?;

        let days_in_year = NaiveDate::from_ymd_opt(date.year(), 12, 31).map_or(365, |last| last.ordinal()) as f64;
        // fractional year at local noon, radians
        let gamma = 2.0 * PI / days_in_year * (date.ordinal0() as f64);

        let eq_time_min = 229.18
            * (0.000075 + 0.001868 * gamma.cos()
                - 0.032077 * gamma.sin()
                - 0.014615 * (2.0 * gamma).cos()
                - 0.040849 * (2.0 * gamma).sin());
        let decl = 0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin()
            - 0.006758 * (2.0 * gamma).cos()
            + 0.000907 * (2.0 * gamma).sin()
            - 0.002697 * (3.0 * gamma).cos()
            + 0.00148 * (3.0 * gamma).sin();

        let lat = location.latitude.to_radians();
        let cos_hour_angle = SUNRISE_ZENITH_DEG.to_radians().cos() / (lat.cos() * decl.cos()) - lat.tan() * decl.tan();
        // outside [-1, 1] the sun never sets (or never rises); clamping keeps the window well formed
        let hour_angle_deg = cos_hour_angle.clamp(-1.0, 1.0).acos().to_degrees();

        let sunrise_min = MINUTES_PER_DAY_HALF - 4.0 * (location.longitude + hour_angle_deg) - eq_time_min;
        let sunset_min = MINUTES_PER_DAY_HALF - 4.0 * (location.longitude - hour_angle_deg) - eq_time_min;

        let midnight_utc = date.and_time(NaiveTime::MIN).and_utc();
        Ok(Self {
            sunrise: midnight_utc + minutes_to_delta(sunrise_min),
            sunset: midnight_utc + minutes_to_delta(sunset_min),
        })
    }

    pub fn contains<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> bool {
        let instant = instant.with_timezone(&Utc);
        self.sunrise <= instant && instant <= self.sunset
    }
}

fn minutes_to_delta(minutes: f64) -> TimeDelta {
    TimeDelta::milliseconds((minutes * 60_000.0).round() as i64)
}

/// True when `now`, moved back by `minutes_delta`, is between today's sunrise and sunset.
/// The orchestrator keeps the window for logging and does the same two steps itself.
#[allow(dead_code)]
pub fn is_daylight<Tz: TimeZone>(now: &DateTime<Tz>, location: &Location) -> Result<bool, InvalidLocationError> {
    let window = DaylightWindow::for_date(now.date_naive(), location)?;
    Ok(window.contains(&location.adjusted(now)?))
}
