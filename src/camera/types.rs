//! Parameter identifiers and value types exchanged with the camera.
//!
//! Field names follow the camera's camelCase JSON so the same structs decode
//! REST responses and push-event payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{LensError, Result};

/// A lens position in `[0, 1]`.
///
/// Construction is the only validation point; anything holding a
/// `Normalised` can be sent to the camera as-is.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Normalised(f64);

impl Normalised {
    /// Fully closed / nearest / widest.
    pub const MIN: Normalised = Normalised(0.0);
    /// Fully open / infinity / longest.
    pub const MAX: Normalised = Normalised(1.0);

    /// Validate `value` lies within `[0, 1]`.
    pub fn new(value: f64) -> Result<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(LensError::Validation(format!(
                "normalised value {value} outside [0.0, 1.0]"
            )))
        }
    }

    /// Raw value.
    pub fn get(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Normalised {
    type Error = LensError;

    fn try_from(value: f64) -> Result<Self> {
        Normalised::new(value)
    }
}

impl fmt::Display for Normalised {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// Monitoring overlay toggles on a display output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitoringToggle {
    Zebra,
    FocusAssist,
    FalseColor,
    CleanFeed,
}

impl MonitoringToggle {
    /// Path segment under `/monitoring/{display}/`.
    pub fn api_segment(self) -> &'static str {
        match self {
            MonitoringToggle::Zebra => "zebra",
            MonitoringToggle::FocusAssist => "focusAssist",
            MonitoringToggle::FalseColor => "falseColor",
            MonitoringToggle::CleanFeed => "cleanFeed",
        }
    }
}

/// A tracked camera parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    Focus,
    Iris,
    Zoom,
    Gain,
    Shutter,
    Monitoring(MonitoringToggle),
}

impl Parameter {
    /// Every parameter kept in sync, in polling order.
    pub const ALL: [Parameter; 9] = [
        Parameter::Focus,
        Parameter::Iris,
        Parameter::Zoom,
        Parameter::Gain,
        Parameter::Shutter,
        Parameter::Monitoring(MonitoringToggle::Zebra),
        Parameter::Monitoring(MonitoringToggle::FocusAssist),
        Parameter::Monitoring(MonitoringToggle::FalseColor),
        Parameter::Monitoring(MonitoringToggle::CleanFeed),
    ];

    /// Name reported to observers.
    pub fn name(self) -> &'static str {
        match self {
            Parameter::Focus => "focus",
            Parameter::Iris => "iris",
            Parameter::Zoom => "zoom",
            Parameter::Gain => "gain",
            Parameter::Shutter => "shutter",
            Parameter::Monitoring(MonitoringToggle::Zebra) => "zebra",
            Parameter::Monitoring(MonitoringToggle::FocusAssist) => "focusAssist",
            Parameter::Monitoring(MonitoringToggle::FalseColor) => "falseColor",
            Parameter::Monitoring(MonitoringToggle::CleanFeed) => "cleanfeed",
        }
    }

    /// Property path relative to `/control/api/v1`, as used by both the REST
    /// endpoints and event subscriptions.
    pub fn property_path(self, display: &str) -> String {
        match self {
            Parameter::Focus => "/lens/focus".into(),
            Parameter::Iris => "/lens/iris".into(),
            Parameter::Zoom => "/lens/zoom".into(),
            Parameter::Gain => "/video/gain".into(),
            Parameter::Shutter => "/video/shutter".into(),
            Parameter::Monitoring(toggle) => {
                format!("/monitoring/{}/{}", display, toggle.api_segment())
            }
        }
    }

    /// Map an event property path back to a parameter.
    ///
    /// Monitoring paths match regardless of the display name.
    pub fn from_property_path(path: &str) -> Option<Parameter> {
        let path = path.trim_end_matches('/');
        match path {
            "/lens/focus" => return Some(Parameter::Focus),
            "/lens/iris" => return Some(Parameter::Iris),
            "/lens/zoom" => return Some(Parameter::Zoom),
            "/video/gain" => return Some(Parameter::Gain),
            "/video/shutter" => return Some(Parameter::Shutter),
            _ => {}
        }
        if !path.starts_with("/monitoring/") {
            return None;
        }
        let segment = path.rsplit('/').next()?;
        [
            MonitoringToggle::Zebra,
            MonitoringToggle::FocusAssist,
            MonitoringToggle::FalseColor,
            MonitoringToggle::CleanFeed,
        ]
        .into_iter()
        .find(|t| t.api_segment() == segment)
        .map(Parameter::Monitoring)
    }

    /// Parameters whose value is a single normalised position.
    pub fn is_normalised(self) -> bool {
        matches!(self, Parameter::Focus | Parameter::Iris | Parameter::Zoom)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Parameter {
    type Err = LensError;

    fn from_str(s: &str) -> Result<Self> {
        Parameter::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| LensError::Validation(format!("unknown parameter '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusState {
    pub normalised: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrisState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalised: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aperture_stop: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aperture_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuous_aperture_auto_exposure: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoomState {
    /// Focal length in millimetres
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focal_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalised: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GainState {
    /// Gain in dB
    pub gain: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutterState {
    /// Denominator of the exposure time (1/x s)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutter_speed: Option<u32>,
    /// Degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutter_angle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuous_shutter_auto_exposure: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToggleState {
    pub enabled: bool,
}

/// Shutter write, either as exposure time or angle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShutterSetting {
    /// 1/x seconds
    Speed(u32),
    /// Degrees, `(0, 360]`
    Angle(f64),
}

impl ShutterSetting {
    /// Check the setting is physically meaningful.
    pub fn validate(self) -> Result<Self> {
        match self {
            ShutterSetting::Speed(0) => Err(LensError::Validation(
                "shutter speed must be > 0".into(),
            )),
            ShutterSetting::Angle(a) if !(a > 0.0 && a <= 360.0) => Err(LensError::Validation(
                format!("shutter angle {a} outside (0, 360]"),
            )),
            other => Ok(other),
        }
    }

    /// Request body for `PUT /video/shutter`.
    pub fn to_payload(self) -> Value {
        match self {
            ShutterSetting::Speed(speed) => serde_json::json!({ "shutterSpeed": speed }),
            ShutterSetting::Angle(angle) => serde_json::json!({ "shutterAngle": angle }),
        }
    }
}

/// Values the camera accepts for `/video/shutter`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupportedShutters {
    pub shutter_speeds: Vec<u32>,
    pub shutter_angles: Vec<f64>,
}

/// Structured value of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Focus(FocusState),
    Iris(IrisState),
    Zoom(ZoomState),
    Gain(GainState),
    Shutter(ShutterState),
    Toggle(ToggleState),
}

impl ParameterValue {
    /// Decode a property value for `parameter`.
    ///
    /// Bare scalars are accepted and wrapped into the parameter's primary
    /// field (`normalised`, `gain`, `shutterSpeed` or `enabled`).
    pub fn decode(parameter: Parameter, value: Value) -> Result<Self> {
        let value = match value {
            Value::Object(_) => value,
            scalar => {
                let key = match parameter {
                    Parameter::Focus | Parameter::Iris | Parameter::Zoom => "normalised",
                    Parameter::Gain => "gain",
                    Parameter::Shutter => "shutterSpeed",
                    Parameter::Monitoring(_) => "enabled",
                };
                serde_json::json!({ key: scalar })
            }
        };

        let protocol = |e: serde_json::Error| {
            LensError::Protocol(format!("invalid {} value: {}", parameter, e))
        };
        Ok(match parameter {
            Parameter::Focus => ParameterValue::Focus(serde_json::from_value(value).map_err(protocol)?),
            Parameter::Iris => ParameterValue::Iris(serde_json::from_value(value).map_err(protocol)?),
            Parameter::Zoom => ParameterValue::Zoom(serde_json::from_value(value).map_err(protocol)?),
            Parameter::Gain => ParameterValue::Gain(serde_json::from_value(value).map_err(protocol)?),
            Parameter::Shutter => {
                ParameterValue::Shutter(serde_json::from_value(value).map_err(protocol)?)
            }
            Parameter::Monitoring(_) => {
                ParameterValue::Toggle(serde_json::from_value(value).map_err(protocol)?)
            }
        })
    }

    /// JSON form handed to observers.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Normalised position, for the parameters that have one.
    pub fn normalised(&self) -> Option<f64> {
        match self {
            ParameterValue::Focus(f) => Some(f.normalised),
            ParameterValue::Iris(i) => i.normalised,
            ParameterValue::Zoom(z) => z.normalised,
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Focus(s) => write!(f, "{:.4}", s.normalised),
            ParameterValue::Iris(s) => match (s.normalised, s.aperture_stop) {
                (Some(n), Some(stop)) => write!(f, "{:.4} (f/{:.1})", n, stop),
                (Some(n), None) => write!(f, "{:.4}", n),
                _ => f.write_str("?"),
            },
            ParameterValue::Zoom(s) => match (s.normalised, s.focal_length) {
                (Some(n), Some(mm)) => write!(f, "{:.4} ({} mm)", n, mm),
                (Some(n), None) => write!(f, "{:.4}", n),
                (None, Some(mm)) => write!(f, "{} mm", mm),
                (None, None) => f.write_str("?"),
            },
            ParameterValue::Gain(s) => write!(f, "{} dB", s.gain),
            ParameterValue::Shutter(s) => match (s.shutter_speed, s.shutter_angle) {
                (Some(speed), _) => write!(f, "1/{}s", speed),
                (None, Some(angle)) => write!(f, "{}°", angle),
                _ => f.write_str("?"),
            },
            ParameterValue::Toggle(s) => f.write_str(if s.enabled { "on" } else { "off" }),
        }
    }
}
