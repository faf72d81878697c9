//! Event socket wire format.
//!
//! Every frame is a JSON object `{"type": ..., "data": {...}}`:
//!
//! - `event` / `propertyValueChanged`: a parameter changed; `data.property`
//!   is the property path and `data.value` its new value
//! - `event` / `websocketOpened`: handshake acknowledgement
//! - `response`: reply to a request we sent (ignored)
//!
//! Anything else is a protocol error, logged and dropped by the caller.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::camera::{Parameter, ParameterValue};
use crate::error::{LensError, Result};

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveMessage {
    PropertyChanged { property: String, value: Value },
    Opened,
    Response,
    /// Event with an action we do not handle
    OtherEvent(String),
}

/// A property change mapped onto a tracked parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterUpdate {
    pub parameter: Parameter,
    pub value: ParameterValue,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct EventData {
    action: String,
    #[serde(default)]
    property: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<LiveMessage> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| LensError::Protocol(format!("malformed frame: {e}")))?;

    match envelope.kind.as_str() {
        "event" => {
            let event: EventData = serde_json::from_value(envelope.data)
                .map_err(|e| LensError::Protocol(format!("malformed event: {e}")))?;
            match event.action.as_str() {
                "propertyValueChanged" => {
                    let property = event.property.ok_or_else(|| {
                        LensError::Protocol("propertyValueChanged without property".into())
                    })?;
                    let value = event.value.ok_or_else(|| {
                        LensError::Protocol(format!("propertyValueChanged for {property} without value"))
                    })?;
                    Ok(LiveMessage::PropertyChanged { property, value })
                }
                "websocketOpened" => Ok(LiveMessage::Opened),
                other => Ok(LiveMessage::OtherEvent(other.to_string())),
            }
        }
        "response" => Ok(LiveMessage::Response),
        other => Err(LensError::Protocol(format!(
            "unexpected message type '{other}'"
        ))),
    }
}

/// Map a property change onto a tracked parameter.
///
/// Returns `Ok(None)` for properties we do not track.
pub fn to_update(property: &str, value: Value) -> Result<Option<ParameterUpdate>> {
    let Some(parameter) = Parameter::from_property_path(property) else {
        return Ok(None);
    };
    let value = ParameterValue::decode(parameter, value)?;
    Ok(Some(ParameterUpdate { parameter, value }))
}

/// Subscription request for every tracked parameter on `display`.
pub fn subscribe_request(display: &str) -> String {
    let properties: Vec<String> = Parameter::ALL
        .iter()
        .map(|p| p.property_path(display))
        .collect();
    json!({
        "type": "request",
        "data": {
            "action": "subscribe",
            "properties": properties,
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::MonitoringToggle;

    #[test]
    fn test_decode_property_change() {
        let msg = decode(
            r#"{"type":"event","data":{"action":"propertyValueChanged","property":"/lens/focus","value":{"normalised":0.61}}}"#,
        )
        .unwrap();
        let LiveMessage::PropertyChanged { property, value } = msg else {
            panic!("expected property change");
        };
        let update = to_update(&property, value).unwrap().unwrap();
        assert_eq!(update.parameter, Parameter::Focus);
        assert_eq!(update.value.normalised(), Some(0.61));
    }

    #[test]
    fn test_decode_control_frames() {
        assert_eq!(
            decode(r#"{"type":"event","data":{"action":"websocketOpened"}}"#).unwrap(),
            LiveMessage::Opened
        );
        assert_eq!(
            decode(r#"{"type":"response","data":{"action":"subscribe","success":true}}"#).unwrap(),
            LiveMessage::Response
        );
        assert_eq!(decode(r#"{"type":"response"}"#).unwrap(), LiveMessage::Response);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"type":"telemetry","data":{}}"#).is_err());
        assert!(decode(r#"{"type":"event","data":{"action":"propertyValueChanged"}}"#).is_err());
    }

    #[test]
    fn test_untracked_property_is_ignored() {
        assert_eq!(
            to_update("/media/workingset", serde_json::json!({})).unwrap(),
            None
        );
    }

    #[test]
    fn test_scalar_toggle_value() {
        let update = to_update("/monitoring/HDMI/zebra", serde_json::json!(true))
            .unwrap()
            .unwrap();
        assert_eq!(
            update.parameter,
            Parameter::Monitoring(MonitoringToggle::Zebra)
        );
    }

    #[test]
    fn test_subscribe_request_lists_all_parameters() {
        let request: Value = serde_json::from_str(&subscribe_request("HDMI")).unwrap();
        assert_eq!(request["type"], "request");
        assert_eq!(request["data"]["action"], "subscribe");
        let properties = request["data"]["properties"].as_array().unwrap();
        assert_eq!(properties.len(), Parameter::ALL.len());
        assert!(properties.contains(&Value::from("/monitoring/HDMI/focusAssist")));
    }
}
