//! ISAPI client for Hikvision acoustic imaging cameras
//!
//! Covers the two things the alarm listener needs from the device: telling it
//! where to push alarms (the HTTP host notification entries) and adjusting
//! the acoustic detection it runs. Requests carry HTTP basic credentials
//! until the device answers with a digest challenge; from then on every
//! request answers the device's challenge instead. The timeout defaults to
//! 10 seconds.

mod error;
mod params;
mod push_target;

pub use error::IsapiError;
pub use params::{AcousticParams, DEFAULT_ANALYSIS_TIME};
pub use push_target::{PushTarget, DEFAULT_ALARM_PATH, ISAPI_NAMESPACE};

use reqwest::header::{HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection settings for one device
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// `host`, `host:port` or a full `http://` base URL
    pub address: String,
    pub username: String,
    pub password: String,
    /// Audio input the acoustic endpoints address. Default: 1
    pub audio_in_id: u32,
    /// `security` query parameter of the httpHosts endpoints. Default: "none"
    pub security: String,
    /// `iv` query parameter of the httpHosts endpoints. Default: "0"
    pub iv: String,
    /// Default: 10 seconds
    pub timeout: Duration,
}

impl DeviceConfig {
    pub fn new(address: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            password: password.into(),
            audio_in_id: 1,
            security: "none".to_string(),
            iv: "0".to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_audio_in(mut self, audio_in_id: u32) -> Self {
        self.audio_in_id = audio_in_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn base_url(&self) -> String {
        let address = self.address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{address}")
        }
    }
}

/// Outcome of [`IsapiClient::register_push_target`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub target: PushTarget,
    /// False when the device already pointed at the target and nothing was written
    pub changed: bool,
    /// Whether the device-side connectivity test succeeded
    pub tested: bool,
}

/// Client for one device
#[derive(Debug, Clone)]
pub struct IsapiClient {
    http: Client,
    config: DeviceConfig,
    base_url: String,
    /// Set once the device has asked for digest authentication
    digest: Arc<AtomicBool>,
}

impl IsapiClient {
    pub fn new(config: DeviceConfig) -> Result<Self, IsapiError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        let base_url = config.base_url();
        Ok(Self {
            http,
            config,
            base_url,
            digest: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Verify the credentials against `/ISAPI/System/status`
    pub async fn check_login(&self) -> Result<(), IsapiError> {
        self.send(self.http.get(self.url("/ISAPI/System/status"))).await?;
        info!(device = %self.base_url, "Device login succeeded");
        Ok(())
    }

    /// Whether the device can be configured to push alarms over HTTP
    pub async fn supports_http_hosts(&self) -> Result<bool, IsapiError> {
        let request = self
            .http
            .get(self.url("/ISAPI/Event/notification/httpHosts/capabilities"));
        match self.send(request).await {
            Ok(body) => Ok(body.contains("HttpHostNotificationCap")),
            Err(IsapiError::Status { status, .. }) => {
                warn!(status, "Device has no HTTP host notification capabilities");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Push targets currently configured on the device
    pub async fn http_hosts(&self) -> Result<Vec<PushTarget>, IsapiError> {
        let request = self
            .http
            .get(self.url("/ISAPI/Event/notification/httpHosts"))
            .query(&self.security_query());
        let body = self.send(request).await?;
        let targets = PushTarget::parse_list(&body)?;
        debug!(count = targets.len(), "Read HTTP host notification entries");
        Ok(targets)
    }

    /// Write one push target slot
    pub async fn configure_http_host(&self, target: &PushTarget) -> Result<(), IsapiError> {
        let request = self
            .http
            .put(self.url(&format!("/ISAPI/Event/notification/httpHosts/{}", target.id)))
            .query(&self.security_query())
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(target.to_xml());
        self.send(request).await?;
        info!(url = %target.url(), "Device will push alarms to listener");
        Ok(())
    }

    /// Ask the device to test its connection to a configured push target
    pub async fn test_http_host(&self, id: u32) -> Result<(), IsapiError> {
        let request = self
            .http
            .post(self.url(&format!("/ISAPI/Event/notification/httpHosts/{id}/test")));
        let body = self.send(request).await?;
        debug!(id, response = %body, "HTTP host test succeeded");
        Ok(())
    }

    /// Make the device push alarms to `target`.
    ///
    /// Checks the credentials and the capability first. The slot is only
    /// written when it does not already point at the target. A failing
    /// device-side test is reported in the result, not as an error, since the
    /// listener may simply not be reachable yet.
    pub async fn register_push_target(&self, target: PushTarget) -> Result<Registration, IsapiError> {
        self.check_login().await?;

        if !self.supports_http_hosts().await? {
            return Err(IsapiError::Unsupported("HTTP host notification".to_string()));
        }

        let already_registered = match self.http_hosts().await {
            Ok(existing) => existing.iter().any(|entry| entry.same_destination(&target)),
            Err(e) => {
                warn!(error = %e, "Could not read existing push targets, writing unconditionally");
                false
            }
        };

        if already_registered {
            info!(url = %target.url(), "Device already pushes to listener");
        } else {
            self.configure_http_host(&target).await?;
        }

        let tested = match self.test_http_host(target.id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Device could not reach the listener during its test");
                false
            }
        };

        Ok(Registration {
            target,
            changed: !already_registered,
            tested,
        })
    }

    /// Enable or disable sound source location on the configured audio input
    pub async fn set_sound_source_location(&self, enabled: bool) -> Result<(), IsapiError> {
        let request = self
            .http
            .put(self.audio_in_url("/ISAPI/System/SoundSourceLocation/AudioIn", "SoundSourceLocationRuleParams"))
            .query(&[("format", "json")])
            .json(&json!({ "enabled": enabled }));
        self.send(request).await?;
        info!(enabled, "Sound source location updated");
        Ok(())
    }

    pub async fn acoustic_params(&self) -> Result<AcousticParams, IsapiError> {
        let value = self.get_json(&self.leak_detection_url("AlarmAnalysisParam")).await?;
        AcousticParams::from_value(value).map_err(|e| IsapiError::Parse(e.to_string()))
    }

    /// Write acoustic parameters and return the device's answer
    pub async fn set_acoustic_params(&self, params: &AcousticParams) -> Result<Value, IsapiError> {
        let request = self
            .http
            .put(self.leak_detection_url("AlarmAnalysisParam"))
            .query(&[("format", "json")])
            .json(params);
        let body = self.send(request).await?;
        info!(
            filter_time = params.filter_time,
            analysis_time = params.analysis_time,
            "Acoustic parameters updated"
        );
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    pub async fn acoustic_capabilities(&self) -> Result<Value, IsapiError> {
        self.get_json(&self.leak_detection_url("AlarmAnalysisParam/capabilities"))
            .await
    }

    pub async fn gas_leak_capabilities(&self) -> Result<Value, IsapiError> {
        self.get_json(&self.leak_detection_url("GasLeakageRuleParams/capabilities"))
            .await
    }

    /// Raw audio exception detection settings (XML) of the configured channel
    pub async fn audio_detection(&self) -> Result<String, IsapiError> {
        let url = self.url(&format!(
            "/ISAPI/Smart/AudioDetection/channels/{}",
            self.config.audio_in_id
        ));
        self.send(self.http.get(url)).await
    }

    async fn get_json(&self, url: &str) -> Result<Value, IsapiError> {
        let body = self
            .send(self.http.get(url).query(&[("format", "json")]))
            .await?;
        serde_json::from_str(&body).map_err(|e| IsapiError::Parse(e.to_string()))
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, IsapiError> {
        let response = self.authenticated(request).await?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED {
            warn!(device = %self.base_url, "Device rejected the credentials");
            return Err(IsapiError::Unauthorized);
        }
        if !status.is_success() {
            warn!(status = status.as_u16(), body = %body, "Device request failed");
            return Err(IsapiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// Send with basic credentials, or bare while the device is known to
    /// want digest, then answer a digest challenge once if one comes back.
    async fn authenticated(&self, request: RequestBuilder) -> Result<Response, IsapiError> {
        let retry = request.try_clone();
        let first = if self.digest.load(Ordering::Relaxed) {
            request
        } else {
            request.basic_auth(&self.config.username, Some(&self.config.password))
        };
        let response = first.send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let (Some(challenge), Some(retry)) = (digest_challenge(&response), retry) else {
            return Ok(response);
        };
        if !self.digest.swap(true, Ordering::Relaxed) {
            debug!(device = %self.base_url, "Device requested digest authentication");
        }
        self.send_digest(retry, &challenge).await
    }

    async fn send_digest(&self, request: RequestBuilder, challenge: &str) -> Result<Response, IsapiError> {
        let mut request = request.build()?;

        let header = {
            let url = request.url();
            let uri = match url.query() {
                Some(query) => format!("{}?{query}", url.path()),
                None => url.path().to_string(),
            };
            let context = digest_auth::AuthContext::new_with_method(
                self.config.username.as_str(),
                self.config.password.as_str(),
                uri.as_str(),
                request.body().and_then(|body| body.as_bytes()),
                digest_auth::HttpMethod::from(request.method().as_str()),
            );
            let mut prompt = digest_auth::parse(challenge).map_err(|e| IsapiError::Auth(e.to_string()))?;
            let answer = prompt
                .respond(&context)
                .map_err(|e| IsapiError::Auth(e.to_string()))?;
            HeaderValue::from_str(&answer.to_header_string()).map_err(|e| IsapiError::Auth(e.to_string()))?
        };

        request.headers_mut().insert(AUTHORIZATION, header);
        Ok(self.http.execute(request).await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn audio_in_url(&self, prefix: &str, resource: &str) -> String {
        self.url(&format!("{prefix}/{}/{resource}", self.config.audio_in_id))
    }

    fn leak_detection_url(&self, resource: &str) -> String {
        self.audio_in_url("/ISAPI/System/AcousticLeakDetection/AudioIn", resource)
    }

    fn security_query(&self) -> [(&str, &str); 2] {
        [("security", self.config.security.as_str()), ("iv", self.config.iv.as_str())]
    }
}

/// The `Digest` challenge of a 401, if the device offered one.
fn digest_challenge(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.trim_start().to_ascii_lowercase().starts_with("digest"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("192.168.31.64", "http://192.168.31.64")]
    #[case("192.168.31.64:8000", "http://192.168.31.64:8000")]
    #[case("http://camera.local/", "http://camera.local")]
    #[case("https://camera.local", "https://camera.local")]
    fn test_base_url(#[case] address: &str, #[case] expected: &str) {
        let config = DeviceConfig::new(address, "admin", "secret");
        assert_eq!(config.base_url(), expected);
    }

    #[test]
    fn test_device_config_defaults() {
        let config = DeviceConfig::new("192.168.31.64", "admin", "secret");
        assert_eq!(config.audio_in_id, 1);
        assert_eq!(config.security, "none");
        assert_eq!(config.iv, "0");
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_endpoint_urls() {
        let client = IsapiClient::new(DeviceConfig::new("10.0.0.2", "admin", "secret").with_audio_in(2)).unwrap();
        assert_eq!(
            client.leak_detection_url("AlarmAnalysisParam"),
            "http://10.0.0.2/ISAPI/System/AcousticLeakDetection/AudioIn/2/AlarmAnalysisParam"
        );
        assert_eq!(
            client.audio_in_url("/ISAPI/System/SoundSourceLocation/AudioIn", "SoundSourceLocationRuleParams"),
            "http://10.0.0.2/ISAPI/System/SoundSourceLocation/AudioIn/2/SoundSourceLocationRuleParams"
        );
    }
}
