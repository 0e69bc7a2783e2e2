//! WebhookClient Tests
//!
//! Runs the client against a wiremock server.

use std::time::Duration;

use ms_common::{OutboundMessage, ValidationError};
use ms_processor::webhook::AUTH_HEADER;
use ms_processor::{DeliveryError, MessageDelivery, WebhookClient, WebhookConfig};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> WebhookClient {
    WebhookClient::new(WebhookConfig {
        url: format!("{}/webhook", server.uri()),
        api_key: "secret-key".to_string(),
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
    })
    .unwrap()
}

fn outbound() -> OutboundMessage {
    OutboundMessage {
        to: "+905551112233".to_string(),
        content: "hello".to_string(),
    }
}

#[tokio::test]
async fn test_successful_delivery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .and(header(AUTH_HEADER, "secret-key"))
        .and(body_json(json!({ "to": "+905551112233", "content": "hello" })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "message": "Accepted",
            "messageId": "67f2f8a8-ea58-4ed0-a6f9-ff217df4d849"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = client(&server).send(&outbound()).await.unwrap();
    assert_eq!(receipt.message_id, "67f2f8a8-ea58-4ed0-a6f9-ff217df4d849");
    assert_eq!(receipt.message, "Accepted");
}

#[tokio::test]
async fn test_non_success_status_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let err = client(&server).send(&outbound()).await.unwrap_err();
    match err {
        DeliveryError::Rejected { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "internal error");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_message_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message": "Accepted" })))
        .mount(&server)
        .await;

    let err = client(&server).send(&outbound()).await.unwrap_err();
    assert!(matches!(err, DeliveryError::MissingDeliveryId));
}

#[tokio::test]
async fn test_malformed_body_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client(&server).send(&outbound()).await.unwrap_err();
    assert!(matches!(err, DeliveryError::Transport(_)));
}

#[tokio::test]
async fn test_invalid_payload_never_reaches_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let too_long = OutboundMessage {
        to: "+905551112233".to_string(),
        content: "x".repeat(101),
    };
    let err = client(&server).send(&too_long).await.unwrap_err();
    assert!(matches!(
        err,
        DeliveryError::Validation(ValidationError::ContentTooLong { max: 100, actual: 101 })
    ));
}

#[tokio::test]
async fn test_request_timeout_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "messageId": "late" }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let err = client(&server).send(&outbound()).await.unwrap_err();
    match err {
        DeliveryError::Transport(e) => assert!(e.is_timeout()),
        other => panic!("unexpected error: {:?}", other),
    }
}
