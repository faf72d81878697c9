//! Camera control seam
//!
//! Everything that talks to the camera goes through [`CameraControl`]: the
//! calibration builders, the sweep driver and the polling fallback all take an
//! `Arc<dyn CameraControl>`. Two implementations ship with the crate:
//!
//! - [`RestCamera`](http::RestCamera): the vendor REST API over `reqwest`
//! - [`MockCamera`](mock::MockCamera): an in-process lens model for tests and
//!   offline runs
//!
//! # Contract
//!
//! - Every operation resolves to a typed value or a classified
//!   [`LensError`](crate::error::LensError); nothing panics on camera errors.
//! - Normalised writes take a [`Normalised`], so out-of-range values are
//!   rejected before any request is built. [`CameraControl::set_normalised`]
//!   is the entry point for raw `f64` input.
//! - Implementations bound every request by a timeout.

pub mod http;
pub mod mock;
pub mod types;

pub use types::{
    FocusState, GainState, IrisState, MonitoringToggle, Normalised, Parameter, ParameterValue,
    ShutterSetting, ShutterState, SupportedShutters, ToggleState, ZoomState,
};

use async_trait::async_trait;

use crate::error::{LensError, Result};

/// Read/write access to the lens, video and monitoring parameters.
#[async_trait]
pub trait CameraControl: Send + Sync {
    /// Current focus position.
    async fn focus(&self) -> Result<FocusState>;

    /// Move focus to a normalised position.
    async fn set_focus(&self, value: Normalised) -> Result<()>;

    /// Move focus to an absolute subject distance in centimetres.
    ///
    /// The camera converts the distance internally; read back
    /// [`focus`](Self::focus) afterwards to learn the resulting position.
    async fn set_focus_distance(&self, distance_cm: u32) -> Result<()>;

    /// Run one-shot autofocus on the region centred at `(x, y)`.
    async fn do_autofocus(&self, x: Normalised, y: Normalised) -> Result<()>;

    async fn iris(&self) -> Result<IrisState>;

    async fn set_iris(&self, value: Normalised) -> Result<()>;

    async fn zoom(&self) -> Result<ZoomState>;

    async fn set_zoom(&self, value: Normalised) -> Result<()>;

    /// Current gain in dB.
    async fn gain(&self) -> Result<GainState>;

    async fn set_gain(&self, gain_db: i32) -> Result<()>;

    /// Gain values the camera accepts, in dB.
    async fn supported_gains(&self) -> Result<Vec<i32>>;

    async fn shutter(&self) -> Result<ShutterState>;

    async fn set_shutter(&self, setting: ShutterSetting) -> Result<()>;

    async fn supported_shutters(&self) -> Result<SupportedShutters>;

    async fn monitoring(&self, toggle: MonitoringToggle) -> Result<ToggleState>;

    async fn set_monitoring(&self, toggle: MonitoringToggle, enabled: bool) -> Result<()>;

    /// Validate a raw value and write it to a normalised parameter.
    ///
    /// Fails with a validation error, without contacting the camera, when
    /// `value` is outside `[0, 1]` or `parameter` has no normalised position.
    async fn set_normalised(&self, parameter: Parameter, value: f64) -> Result<()> {
        let value = Normalised::new(value)?;
        match parameter {
            Parameter::Focus => self.set_focus(value).await,
            Parameter::Iris => self.set_iris(value).await,
            Parameter::Zoom => self.set_zoom(value).await,
            other => Err(LensError::Validation(format!(
                "{other} is not a normalised parameter"
            ))),
        }
    }

    /// Read any tracked parameter as a structured value.
    async fn read(&self, parameter: Parameter) -> Result<ParameterValue> {
        Ok(match parameter {
            Parameter::Focus => ParameterValue::Focus(self.focus().await?),
            Parameter::Iris => ParameterValue::Iris(self.iris().await?),
            Parameter::Zoom => ParameterValue::Zoom(self.zoom().await?),
            Parameter::Gain => ParameterValue::Gain(self.gain().await?),
            Parameter::Shutter => ParameterValue::Shutter(self.shutter().await?),
            Parameter::Monitoring(toggle) => ParameterValue::Toggle(self.monitoring(toggle).await?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockCamera;
    use super::*;

    #[tokio::test]
    async fn test_set_normalised_rejects_out_of_range_without_writing() {
        let camera = MockCamera::new();
        let err = camera
            .set_normalised(Parameter::Focus, 1.5)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert_eq!(camera.normalised_writes(), 0);
    }

    #[tokio::test]
    async fn test_set_normalised_rejects_non_positional_parameter() {
        let camera = MockCamera::new();
        assert!(camera.set_normalised(Parameter::Gain, 0.5).await.is_err());
        assert_eq!(camera.normalised_writes(), 0);
    }

    #[tokio::test]
    async fn test_read_dispatches_per_parameter() {
        let camera = MockCamera::new();
        camera.set_normalised(Parameter::Iris, 0.25).await.unwrap();

        let value = camera.read(Parameter::Iris).await.unwrap();
        assert_eq!(value.normalised(), Some(0.25));

        let zebra = camera
            .read(Parameter::Monitoring(MonitoringToggle::Zebra))
            .await
            .unwrap();
        assert_eq!(zebra, ParameterValue::Toggle(ToggleState { enabled: false }));
    }
}
