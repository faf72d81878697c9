//! REST client for the camera control API (`/control/api/v1`).

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::types::{
    FocusState, GainState, IrisState, MonitoringToggle, Normalised, ShutterSetting, ShutterState,
    SupportedShutters, ToggleState, ZoomState,
};
use super::CameraControl;
use crate::config::CameraConfig;
use crate::error::{LensError, Result};

/// API root below the camera's base URL.
pub const API_PREFIX: &str = "control/api/v1/";

/// Camera reached over HTTP(S) with optional basic auth.
#[derive(Debug, Clone)]
pub struct RestCamera {
    client: Client,
    api_base: Url,
    username: String,
    password: String,
    display: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SupportedGains {
    #[serde(default)]
    supported_gains: Vec<i32>,
}

impl RestCamera {
    /// Build a client from the `[camera]` configuration section.
    pub fn new(config: &CameraConfig) -> Result<Self> {
        let mut base = Url::parse(&config.base_url)
            .map_err(|e| LensError::Configuration(format!("invalid camera URL: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let api_base = base
            .join(API_PREFIX)
            .map_err(|e| LensError::Configuration(format!("invalid camera URL: {e}")))?;

        // Cameras ship self-signed certificates
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| LensError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            api_base,
            username: config.username.clone(),
            password: config.password.clone(),
            display: config.display_name.clone(),
        })
    }

    /// Resolved `/control/api/v1` root.
    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_base
            .join(path.trim_start_matches('/'))
            .map_err(|e| LensError::Validation(format!("invalid endpoint '{path}': {e}")))
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let builder = self
            .client
            .request(method, self.endpoint(path)?)
            .header(reqwest::header::ACCEPT, "application/json");
        Ok(if self.username.is_empty() {
            builder
        } else {
            builder.basic_auth(&self.username, Some(&self.password))
        })
    }

    #[instrument(level = "debug", skip(self))]
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.request(Method::GET, path)?.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LensError::Status {
                status: status.as_u16(),
                operation: format!("GET {path}"),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| LensError::Protocol(format!("GET {path}: {e}")))
    }

    #[instrument(level = "debug", skip(self, body))]
    async fn put_json(&self, path: &str, body: Value) -> Result<()> {
        let response = self.request(Method::PUT, path)?.json(&body).send().await?;
        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => {
                debug!(path, "write accepted");
                Ok(())
            }
            status => Err(LensError::Status {
                status: status.as_u16(),
                operation: format!("PUT {path}"),
            }),
        }
    }

    fn monitoring_path(&self, toggle: MonitoringToggle) -> String {
        format!("/monitoring/{}/{}", self.display, toggle.api_segment())
    }
}

#[async_trait]
impl CameraControl for RestCamera {
    async fn focus(&self) -> Result<FocusState> {
        self.get_json("/lens/focus").await
    }

    async fn set_focus(&self, value: Normalised) -> Result<()> {
        self.put_json("/lens/focus", json!({ "normalised": value.get() }))
            .await
    }

    async fn set_focus_distance(&self, distance_cm: u32) -> Result<()> {
        self.put_json("/lens/focus", json!({ "focusDistance": distance_cm }))
            .await
    }

    async fn do_autofocus(&self, x: Normalised, y: Normalised) -> Result<()> {
        self.put_json(
            "/lens/focus/doAutoFocus",
            json!({ "position": { "x": x.get(), "y": y.get() } }),
        )
        .await
    }

    async fn iris(&self) -> Result<IrisState> {
        self.get_json("/lens/iris").await
    }

    async fn set_iris(&self, value: Normalised) -> Result<()> {
        self.put_json("/lens/iris", json!({ "normalised": value.get() }))
            .await
    }

    async fn zoom(&self) -> Result<ZoomState> {
        self.get_json("/lens/zoom").await
    }

    async fn set_zoom(&self, value: Normalised) -> Result<()> {
        self.put_json("/lens/zoom", json!({ "normalised": value.get() }))
            .await
    }

    async fn gain(&self) -> Result<GainState> {
        self.get_json("/video/gain").await
    }

    async fn set_gain(&self, gain_db: i32) -> Result<()> {
        self.put_json("/video/gain", json!({ "gain": gain_db })).await
    }

    async fn supported_gains(&self) -> Result<Vec<i32>> {
        let gains: SupportedGains = self.get_json("/video/supportedGains").await?;
        Ok(gains.supported_gains)
    }

    async fn shutter(&self) -> Result<ShutterState> {
        self.get_json("/video/shutter").await
    }

    async fn set_shutter(&self, setting: ShutterSetting) -> Result<()> {
        let setting = setting.validate()?;
        self.put_json("/video/shutter", setting.to_payload()).await
    }

    async fn supported_shutters(&self) -> Result<SupportedShutters> {
        self.get_json("/video/supportedShutters").await
    }

    async fn monitoring(&self, toggle: MonitoringToggle) -> Result<ToggleState> {
        self.get_json(&self.monitoring_path(toggle)).await
    }

    async fn set_monitoring(&self, toggle: MonitoringToggle, enabled: bool) -> Result<()> {
        self.put_json(&self.monitoring_path(toggle), json!({ "enabled": enabled }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> CameraConfig {
        CameraConfig {
            base_url: base_url.into(),
            ..CameraConfig::default()
        }
    }

    #[test]
    fn test_api_base_with_and_without_trailing_slash() {
        let a = RestCamera::new(&config("http://10.0.0.12")).unwrap();
        let b = RestCamera::new(&config("http://10.0.0.12/")).unwrap();
        assert_eq!(a.api_base().as_str(), "http://10.0.0.12/control/api/v1/");
        assert_eq!(a.api_base(), b.api_base());
        assert_eq!(
            a.endpoint("/lens/focus").unwrap().as_str(),
            "http://10.0.0.12/control/api/v1/lens/focus"
        );
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(RestCamera::new(&config("not a url")).is_err());
    }
}
