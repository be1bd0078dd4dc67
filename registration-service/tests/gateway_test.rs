mod common;

use common::test_config;
use registration_service::config::{MidtransConfig, OracleConfig};
use registration_service::error::{GatewayError, OracleError};
use registration_service::services::midtrans::{CheckoutRequest, CustomerDetails, ItemDetail};
use registration_service::services::{
    CurrencyOracle, HttpCurrencyOracle, MidtransClient, PaymentGateway,
};
use rust_decimal::Decimal;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn midtrans_config(server: &MockServer) -> MidtransConfig {
    MidtransConfig {
        snap_base_url: server.uri(),
        api_base_url: format!("{}/", server.uri()),
        ..test_config().midtrans
    }
}

fn oracle_config(server: &MockServer) -> OracleConfig {
    OracleConfig {
        url: format!("{}/latest", server.uri()),
        fixed_rate: None,
        ..test_config().oracle
    }
}

fn checkout(order_id: &str) -> CheckoutRequest {
    CheckoutRequest {
        order_id: order_id.to_string(),
        gross_amount: 225_000,
        expiry_hours: 24,
        customer: CustomerDetails {
            first_name: "Ada Lovelace".to_string(),
            email: "ada@example.org".to_string(),
            phone: "+6281234567890".to_string(),
        },
        items: vec![ItemDetail {
            id: "RYLS-FULLY-FUNDED".to_string(),
            price: 225_000,
            quantity: 1,
            name: "RYLS Fully Funded Registration Fee".to_string(),
        }],
    }
}

#[tokio::test]
async fn snap_checkout_posts_order_and_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/snap/v1/transactions"))
        .and(header_exists("authorization"))
        .and(body_partial_json(json!({
            "transaction_details": { "order_id": "RYLS0001ABCDEFGH", "gross_amount": 225000 },
            "expiry": { "unit": "hours", "duration": 24 },
            "item_details": [{ "id": "RYLS-FULLY-FUNDED", "price": 225000, "quantity": 1 }]
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "token": "snap-token",
            "redirect_url": "https://app.sandbox.midtrans.com/snap/v2/vtweb/snap-token"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = MidtransClient::new(&midtrans_config(&server)).unwrap();
    let session = client
        .create_transaction(&checkout("RYLS0001ABCDEFGH"))
        .await
        .unwrap();
    assert_eq!(session.token, "snap-token");
    assert!(session.redirect_url.ends_with("/snap-token"));
}

#[tokio::test]
async fn snap_rejection_is_an_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/snap/v1/transactions"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({ "error_messages": ["gross_amount is invalid"] })),
        )
        .mount(&server)
        .await;

    let client = MidtransClient::new(&midtrans_config(&server)).unwrap();
    let err = client
        .create_transaction(&checkout("RYLS0002ABCDEFGH"))
        .await
        .unwrap_err();
    match err {
        GatewayError::Api { status, message } => {
            assert_eq!(status, 400);
            assert!(message.contains("gross_amount"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn status_query_reads_core_api_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/RYLS0003ABCDEFGH/status"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status_code": "200",
            "transaction_status": "settlement",
            "fraud_status": "accept",
            "order_id": "RYLS0003ABCDEFGH",
            "gross_amount": "225000.00",
            "payment_type": "qris",
            "transaction_id": "tx-1"
        })))
        .mount(&server)
        .await;

    let client = MidtransClient::new(&midtrans_config(&server)).unwrap();
    let transaction = client.status("RYLS0003ABCDEFGH").await.unwrap();
    assert_eq!(transaction.transaction_status.as_deref(), Some("settlement"));
    assert_eq!(transaction.gross_amount.as_deref(), Some("225000.00"));
    assert_eq!(transaction.payment_type.as_deref(), Some("qris"));
}

#[tokio::test]
async fn unknown_order_maps_to_order_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/RYLS0004ABCDEFGH/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status_code": "404",
            "status_message": "Transaction doesn't exist."
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/RYLS0005ABCDEFGH/status"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = MidtransClient::new(&midtrans_config(&server)).unwrap();
    assert!(matches!(
        client.status("RYLS0004ABCDEFGH").await,
        Err(GatewayError::OrderNotFound)
    ));
    assert!(matches!(
        client.status("RYLS0005ABCDEFGH").await,
        Err(GatewayError::OrderNotFound)
    ));
}

#[tokio::test]
async fn cancel_of_a_settled_order_is_invalid_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/RYLS0006ABCDEFGH/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status_code": 412,
            "status_message": "Merchant cannot modify the status of the transaction"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/RYLS0007ABCDEFGH/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status_code": "200",
            "transaction_status": "cancel",
            "order_id": "RYLS0007ABCDEFGH"
        })))
        .mount(&server)
        .await;

    let client = MidtransClient::new(&midtrans_config(&server)).unwrap();
    assert!(matches!(
        client.cancel("RYLS0006ABCDEFGH").await,
        Err(GatewayError::InvalidState)
    ));
    let cancelled = client.cancel("RYLS0007ABCDEFGH").await.unwrap();
    assert_eq!(cancelled.transaction_status.as_deref(), Some("cancel"));
}

#[tokio::test]
async fn server_errors_are_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/RYLS0008ABCDEFGH/status"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = MidtransClient::new(&midtrans_config(&server)).unwrap();
    assert!(matches!(
        client.status("RYLS0008ABCDEFGH").await,
        Err(GatewayError::Api { status: 503, .. })
    ));
}

#[tokio::test]
async fn oracle_quotes_idr_for_usd() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .and(query_param("base", "USD"))
        .and(query_param("symbols", "IDR"))
        .and(header("apikey", "oracle-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "base": "USD",
            "rates": { "IDR": 16250.5 }
        })))
        .mount(&server)
        .await;

    let oracle = HttpCurrencyOracle::new(&oracle_config(&server)).unwrap();
    let quote = oracle.quote_usd_to_idr(Decimal::from(15)).await.unwrap();
    assert_eq!(quote.rate, Decimal::new(162505, 1));
    assert_eq!(quote.idr_amount, Decimal::new(2437575, 1));
}

#[tokio::test]
async fn oracle_failures_are_typed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let oracle = HttpCurrencyOracle::new(&oracle_config(&server)).unwrap();
    assert!(matches!(
        oracle.quote_usd_to_idr(Decimal::from(15)).await,
        Err(OracleError::Status(429))
    ));

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rates": { "EUR": 0.9 } })))
        .mount(&server)
        .await;

    let oracle = HttpCurrencyOracle::new(&oracle_config(&server)).unwrap();
    assert!(matches!(
        oracle.quote_usd_to_idr(Decimal::from(15)).await,
        Err(OracleError::Parse(_))
    ));
}
