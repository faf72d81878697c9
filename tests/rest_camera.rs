//! REST camera client against a wiremock server.

use lens_control::camera::http::RestCamera;
use lens_control::camera::{CameraControl, MonitoringToggle, Normalised, Parameter, ShutterSetting};
use lens_control::config::CameraConfig;
use lens_control::{ErrorKind, LensError};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn camera(server: &MockServer) -> RestCamera {
    RestCamera::new(&CameraConfig {
        base_url: server.uri(),
        request_timeout_ms: 2_000,
        ..CameraConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_reads_focus() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/control/api/v1/lens/focus"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"normalised": 0.42})))
        .mount(&server)
        .await;

    let focus = camera(&server).focus().await.unwrap();
    assert_eq!(focus.normalised, 0.42);
}

#[tokio::test]
async fn test_focus_writes_use_expected_payloads() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/control/api/v1/lens/focus"))
        .and(body_json(json!({"focusDistance": 250})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/control/api/v1/lens/focus"))
        .and(body_json(json!({"normalised": 0.5})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let camera = camera(&server);
    camera.set_focus_distance(250).await.unwrap();
    camera.set_focus(Normalised::new(0.5).unwrap()).await.unwrap();
}

#[tokio::test]
async fn test_non_success_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/control/api/v1/lens/focus"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = camera(&server).set_focus_distance(300).await.unwrap_err();
    assert!(matches!(err, LensError::Status { status: 500, .. }));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn test_out_of_range_value_sends_nothing() {
    let server = MockServer::start().await;
    let camera = camera(&server);

    let err = camera.set_normalised(Parameter::Zoom, 1.01).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = camera
        .set_shutter(ShutterSetting::Angle(400.0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/control/api/v1/video/gain"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = camera(&server).gain().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn test_basic_auth_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/control/api/v1/lens/iris"))
        .and(header("authorization", "Basic YWRtaW46c2VjcmV0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"normalised": 0.3, "apertureStop": 4.0})),
        )
        .mount(&server)
        .await;

    let camera = RestCamera::new(&CameraConfig {
        base_url: server.uri(),
        username: "admin".into(),
        password: "secret".into(),
        ..CameraConfig::default()
    })
    .unwrap();

    let iris = camera.iris().await.unwrap();
    assert_eq!(iris.normalised, Some(0.3));
    assert_eq!(iris.aperture_stop, Some(4.0));
}

#[tokio::test]
async fn test_monitoring_and_capabilities() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/control/api/v1/monitoring/HDMI/focusAssist"))
        .and(body_json(json!({"enabled": true})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/control/api/v1/video/supportedGains"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"supportedGains": [-12, 0, 12, 24]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/control/api/v1/lens/focus/doAutoFocus"))
        .and(body_json(json!({"position": {"x": 0.5, "y": 0.25}})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let camera = camera(&server);
    camera
        .set_monitoring(MonitoringToggle::FocusAssist, true)
        .await
        .unwrap();
    assert_eq!(camera.supported_gains().await.unwrap(), vec![-12, 0, 12, 24]);
    camera
        .do_autofocus(Normalised::new(0.5).unwrap(), Normalised::new(0.25).unwrap())
        .await
        .unwrap();
}
