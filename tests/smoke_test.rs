//! Gateway smoke checks against a mock HTTP server

use eci_deploy::config::SmokeConfig;
use eci_deploy::orchestration::SmokeChecker;
use eci_deploy::DeployError;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn smoke_config(server: &MockServer, retries: u32) -> SmokeConfig {
    SmokeConfig {
        enabled: true,
        gateway_url: format!("{}/", server.uri()),
        username: "smoke".to_string(),
        retries,
        retry_delay_seconds: 0,
        request_timeout_seconds: 5,
    }
}

async fn mount_token(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(body_string_contains("username=smoke"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_health_retries_until_gateway_answers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    mount_token(
        &server,
        serde_json::json!({"access_token": "abc123", "token_type": "bearer"}),
    )
    .await;

    let checker = SmokeChecker::new(&smoke_config(&server, 5)).unwrap();
    let report = checker.run().await.unwrap();

    assert_eq!(report.health_attempts, 3);
    assert!(report.token_issued);
    assert_eq!(report.gateway_url, server.uri());
}

#[tokio::test]
async fn test_health_gives_up_after_configured_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let checker = SmokeChecker::new(&smoke_config(&server, 3)).unwrap();
    let err = checker.check_health().await.unwrap_err();

    match err {
        DeployError::Smoke { check, message } => {
            assert_eq!(check, "health");
            assert!(message.contains("3 attempt(s)"));
            assert!(message.contains("502"));
        }
        other => panic!("expected smoke failure, got {other}"),
    }
}

#[tokio::test]
async fn test_empty_token_is_rejected() {
    let server = MockServer::start().await;
    mount_token(&server, serde_json::json!({"access_token": ""})).await;

    let checker = SmokeChecker::new(&smoke_config(&server, 1)).unwrap();
    let err = checker.check_token().await.unwrap_err();

    assert!(err.to_string().contains("empty access_token"));
}

#[tokio::test]
async fn test_token_endpoint_error_status_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let checker = SmokeChecker::new(&smoke_config(&server, 1)).unwrap();
    let err = checker.check_token().await.unwrap_err();

    assert!(err.to_string().contains("401"));
}
