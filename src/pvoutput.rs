/*
pvoutput.org "add status" upload.

PvOutputClient builds the request (endpoint, auth headers, form fields) and decides what the reply
means. Sending bytes is left to an HttpTransport so the decision logic can be exercised without a
network; ReqwestTransport is the real one.
*/

// USE STATEMENTS
    use chrono::{DateTime, TimeZone};
    use log::{debug, error, info};
    use std::{fmt, time::Duration};
    use thiserror::Error;

    use crate::aurora::Reading;

// CONSTANTS
    pub const ADD_STATUS_URL: &str = "https://pvoutput.org/service/r2/addstatus.jsp";
    const HEADER_API_KEY: &str = "X-Pvoutput-Apikey";
    const HEADER_SYSTEM_ID: &str = "X-Pvoutput-SystemId";
    const DATE_FORMAT: &str = "%Y%m%d";
    const TIME_FORMAT: &str = "%H:%M";
    // the inverter reports three decimals, anything past that is float noise
    const DECIMALS: usize = 3;

// ERRORS
#[derive(Debug, Clone, PartialEq, Error)]
#[error("pvoutput returned HTTP {status}: {body}")]
pub struct UploadError {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    TimedOut,
    #[error("request could not be sent: {0}")]
    Send(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UploadFailure {
    #[error(transparent)]
    Rejected(#[from] UploadError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// PAYLOAD

/// Parameters of one addstatus call. `d`, `t`, `v1`, `v2` always; `v5`, `v6` only for extended status.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadPayload {
    pub date: String,
    pub time: String,
    pub energy_wh: f64,
    pub power_w: f64,
    pub temperature_c: Option<f64>,
    pub voltage_v: Option<f64>,
}

impl UploadPayload {
    pub fn build<Tz: TimeZone>(reading: &Reading, now: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self {
            date: now.format(DATE_FORMAT).to_string(),
            // minute resolution, seconds are dropped
            time: now.format(TIME_FORMAT).to_string(),
            energy_wh: reading.daily_energy_wh,
            power_w: reading.total_power_w,
            temperature_c: None,
            voltage_v: None,
        }
    }

    pub fn with_extended_status(mut self, reading: &Reading) -> Self {
        self.temperature_c = Some(reading.inverter_temp_c);
        self.voltage_v = Some(reading.grid_voltage_v);
        self
    }

    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("d", self.date.clone()),
            ("t", self.time.clone()),
            ("v1", decimal(self.energy_wh)),
            ("v2", decimal(self.power_w)),
        ];
        if let Some(temperature) = self.temperature_c {
            fields.push(("v5", decimal(temperature)));
        }
        if let Some(voltage) = self.voltage_v {
            fields.push(("v6", decimal(voltage)));
        }
        fields
    }
}

/// Rounded to `DECIMALS` places, trailing zeros dropped but always one decimal kept (`23456.0`, `123.4`).
fn decimal(value: f64) -> String {
    let fixed = format!("{:.*}", DECIMALS, value);
    let trimmed = fixed.trim_end_matches('0');
    let text = if trimmed.ends_with('.') { format!("{trimmed}0") } else { trimmed.to_owned() };
    if text == "-0.0" { "0.0".to_owned() } else { text }
}

impl fmt::Display for UploadPayload {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let pairs: Vec<String> = self.form_fields().iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", pairs.join("&"))
    }
}

// TRANSPORT

#[derive(Clone, Debug, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

pub trait HttpTransport {
    async fn post_form(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        form: &[(&'static str, String)],
    ) -> Result<HttpReply, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        match builder.build() {
            Ok(client) => Ok(Self { client }),
            Err(build_eff) => Err(TransportError::Send(format!("could not build http client: {build_eff}"))),
        }
    }
}

fn transport_error(req_eff: reqwest::Error) -> TransportError {
    if req_eff.is_timeout() {
        TransportError::TimedOut
    } else {
        TransportError::Send(req_eff.to_string())
    }
}

impl HttpTransport for ReqwestTransport {
    async fn post_form(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        form: &[(&'static str, String)],
    ) -> Result<HttpReply, TransportError> {
        let mut request = self.client.post(url);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        // form() also sets Content-Type: application/x-www-form-urlencoded
        let response = request.form(form).send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        Ok(HttpReply { status, body })
    }
}

// CLIENT

pub struct PvOutputClient<T> {
    transport: T,
    url: String,
    api_key: String,
    system_id: String,
}

impl<T: HttpTransport> PvOutputClient<T> {
    pub fn new(transport: T, url: &str, api_key: &str, system_id: &str) -> Self {
        Self {
            transport,
            url: url.to_owned(),
            api_key: api_key.to_owned(),
            system_id: system_id.to_owned(),
        }
    }

    /// Single POST to the addstatus endpoint. No retry, the next scheduled run is the retry.
    pub async fn add_status(&self, payload: &UploadPayload) -> Result<HttpReply, UploadFailure> {
        let headers = [
            ("Accept", "text/plain".to_owned()),
            (HEADER_API_KEY, self.api_key.clone()),
            (HEADER_SYSTEM_ID, self.system_id.clone()),
        ];
        info!("Connecting to {}", self.url);
        debug!("sending: {}", payload);

        let reply = self.transport.post_form(&self.url, &headers, &payload.form_fields()).await?;
        if (200..300).contains(&reply.status) {
            info!("POST ok: {} {}", reply.status, reply.body.trim());
            Ok(reply)
        } else {
            error!("POST failed: {} {}", reply.status, reply.body.trim());
            Err(UploadError { status: reply.status, body: reply.body }.into())
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingTransport;
    use super::*;
    use chrono::{FixedOffset, NaiveDate, NaiveTime, Utc};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reading() -> Reading {
        Reading { daily_energy_wh: 23456.0, total_power_w: 1689.316, inverter_temp_c: 60.5, grid_voltage_v: 234.2 }
    }

    fn payload() -> UploadPayload {
        let now = Utc.with_ymd_and_hms(2025, 6, 21, 9, 5, 59).unwrap();
        UploadPayload::build(&reading(), &now)
    }

    #[test]
    fn builds_basic_payload() {
        let payload = payload();
        assert_eq!(payload.date, "20250621");
        assert_eq!(payload.time, "09:05");
        assert_eq!(
            payload.form_fields(),
            vec![
                ("d", "20250621".to_owned()),
                ("t", "09:05".to_owned()),
                ("v1", "23456.0".to_owned()),
                ("v2", "1689.316".to_owned()),
            ]
        );
    }

    #[test]
    fn fractional_kwh_is_sent_without_float_noise() {
        let raw = " 296.853729 2.845379 844.661499 311.433472 5.791459 1803.654053 234.191910 10.472196 \
            2437.221436 49.983006 92.029121 60.095478 55.414928 0.1234 0.1234 0.000 844.658 844.659 68945.075 68945.075 OK";
        let reading = crate::aurora::parse(raw).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 21, 9, 5, 0).unwrap();
        let fields = UploadPayload::build(&reading, &now).form_fields();
        assert_eq!(fields[2], ("v1", "123.4".to_owned()));
        assert_eq!(fields[3], ("v2", "1689.317".to_owned()));
    }

    #[test]
    fn decimal_formatting() {
        for (value, text) in [
            (0.0, "0.0"),
            (23456.0, "23456.0"),
            (123.39999999999999, "123.4"),
            (1689.316, "1689.316"),
            (60.095478, "60.095"),
            (0.0004, "0.0"),
            (-4.5, "-4.5"),
        ] {
            assert_eq!(decimal(value), text, "{value}");
        }
    }

    #[test]
    fn build_is_pure() {
        let now = FixedOffset::east_opt(3600).unwrap().with_ymd_and_hms(2024, 12, 31, 23, 59, 1).unwrap();
        let first = UploadPayload::build(&reading(), &now);
        let second = UploadPayload::build(&reading(), &now);
        assert_eq!(first, second);
        assert_eq!(first.to_string(), second.to_string());
    }

    #[test]
    fn date_and_time_round_trip() {
        let now = FixedOffset::west_opt(5 * 3600).unwrap().with_ymd_and_hms(2024, 2, 29, 7, 3, 42).unwrap();
        let payload = UploadPayload::build(&reading(), &now);
        let date = NaiveDate::parse_from_str(&payload.date, DATE_FORMAT).unwrap();
        let time = NaiveTime::parse_from_str(&payload.time, TIME_FORMAT).unwrap();
        assert_eq!(date, now.date_naive());
        assert_eq!(time, NaiveTime::from_hms_opt(7, 3, 0).unwrap());
    }

    #[test]
    fn extended_status_adds_v5_v6() {
        let payload = payload().with_extended_status(&reading());
        let fields = payload.form_fields();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[4], ("v5", "60.5".to_owned()));
        assert_eq!(fields[5], ("v6", "234.2".to_owned()));
    }

    #[tokio::test]
    async fn add_status_sends_auth_and_payload() {
        let client = PvOutputClient::new(RecordingTransport::replying(200, "OK 200: Added Status"), ADD_STATUS_URL, "secret", "12345");
        let reply = client.add_status(&payload()).await.unwrap();
        assert_eq!(reply.status, 200);

        let sent = client.transport().sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, ADD_STATUS_URL);
        assert!(sent[0].headers.contains(&(HEADER_API_KEY, "secret".to_owned())));
        assert!(sent[0].headers.contains(&(HEADER_SYSTEM_ID, "12345".to_owned())));
        assert_eq!(sent[0].form, payload().form_fields());
    }

    #[tokio::test]
    async fn non_success_status_is_upload_error() {
        let client = PvOutputClient::new(RecordingTransport::replying(401, "Unauthorized 401: Invalid API Key"), ADD_STATUS_URL, "bad", "1");
        let err = client.add_status(&payload()).await.unwrap_err();
        assert_eq!(
            err,
            UploadFailure::Rejected(UploadError { status: 401, body: "Unauthorized 401: Invalid API Key".to_owned() })
        );
    }

    #[tokio::test]
    async fn transport_failure_passes_through() {
        let client = PvOutputClient::new(RecordingTransport::failing(TransportError::TimedOut), ADD_STATUS_URL, "k", "1");
        assert_eq!(client.add_status(&payload()).await, Err(UploadFailure::Transport(TransportError::TimedOut)));
    }

    #[tokio::test]
    async fn reqwest_transport_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/service/r2/addstatus.jsp"))
            .and(header(HEADER_API_KEY, "secret"))
            .and(header(HEADER_SYSTEM_ID, "12345"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("v1=23456.0"))
            .and(body_string_contains("t=09%3A05"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK 200: Added Status"))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/service/r2/addstatus.jsp", server.uri());
        let client = PvOutputClient::new(ReqwestTransport::new(None).unwrap(), &url, "secret", "12345");
        let reply = client.add_status(&payload()).await.unwrap();
        assert_eq!(reply.body, "OK 200: Added Status");
    }

    #[tokio::test]
    async fn reqwest_transport_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Bad request 400: Date is older than 14 days"))
            .mount(&server)
            .await;

        let client = PvOutputClient::new(ReqwestTransport::new(None).unwrap(), &server.uri(), "k", "1");
        match client.add_status(&payload()).await {
            Err(UploadFailure::Rejected(UploadError { status, body })) => {
                assert_eq!(status, 400);
                assert!(body.contains("older than 14 days"));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn reqwest_transport_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Some(Duration::from_millis(50))).unwrap();
        let reply = transport.post_form(&server.uri(), &[], &payload().form_fields()).await;
        assert_eq!(reply, Err(TransportError::TimedOut));
    }

    #[tokio::test]
    async fn reqwest_transport_unreachable_host() {
        let transport = ReqwestTransport::new(Some(Duration::from_secs(5))).unwrap();
        let reply = transport.post_form("http://127.0.0.1:1/", &[], &[]).await;
        assert!(matches!(reply, Err(TransportError::Send(_))), "{reply:?}");
    }
}
