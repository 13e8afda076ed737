mod common;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{acquire_db_lock, body_json, TestApp, TestOptions};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|err| anyhow::anyhow!("invalid key: {err}"))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[tokio::test]
async fn duplicate_barcodes_are_processed_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.admin_token().await?;

    let due = (Utc::now() + Duration::days(1)).format("%Y-%m-%d").to_string();
    let body = serde_json::to_vec(&json!({
        "codigoBarras": "23790000000000000000000000000000000000000001",
        "valor": "1.234,56",
        "dataVencimento": due,
        "beneficiario": "Fornecedor de Gás Ltda",
        "conta": "12345-6"
    }))?;

    let response = app.post_raw("/api/webhooks/boletos/bradesco", &body, &[]).await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let first = body_json(response).await?;
    assert_eq!(first["status"], "received");
    assert_eq!(first["urgent"], true);

    let response = app.post_raw("/api/webhooks/boletos/bradesco", &body, &[]).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let second = body_json(response).await?;
    assert_eq!(second["status"], "already_processed");
    assert_eq!(second["boleto_id"], first["boleto_id"]);

    assert_eq!(app.count_rows("received_boletos").await?, 1);
    // Only the first delivery raised an urgent notification.
    assert_eq!(app.count_rows("notifications").await?, 1);

    let response = app.get("/api/webhooks/boletos", Some(&token)).await?;
    let listed = body_json(response).await?;
    assert_eq!(listed[0]["bank"], "BRADESCO");
    assert_eq!(listed[0]["amount_cents"], 123_456);

    let response = app.get("/api/webhooks/stats", Some(&token)).await?;
    let stats = body_json(response).await?;
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["urgent"], 1);
    assert_eq!(stats["by_bank"]["BRADESCO"]["count"], 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn malformed_payloads_are_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let response = app
        .post_raw("/api/webhooks/boletos/nubank", br#"{"barCode":"1"}"#, &[])
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_raw("/api/webhooks/boletos/itau", b"not json", &[])
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_raw("/api/webhooks/boletos/itau", br#"{"amount": 10}"#, &[])
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let oversized = serde_json::to_vec(&json!({ "barCode": "9".repeat(150) }))?;
    let response = app
        .post_raw("/api/webhooks/boletos/itau", &oversized, &[])
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await?;
    assert!(!body["error"]
        .as_str()
        .unwrap_or_default()
        .contains("character varying"));

    let response = app
        .post_raw(
            "/api/webhooks/boletos/itau",
            br#"{"barCode":"123","amount":1e20}"#,
            &[],
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.count_rows("received_boletos").await?, 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn signatures_are_enforced_when_required() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let options = TestOptions {
        require_signature: true,
        ..TestOptions::default()
    };
    let Some(app) = TestApp::with_options(options).await? else {
        return Ok(());
    };

    let due = (Utc::now() + Duration::days(30)).to_rfc3339();
    let body = serde_json::to_vec(&json!({
        "barCode": "34190000000000000000000000000000000000000002",
        "amount": 99.9,
        "dueDate": due,
        "payeeName": "Energia SA"
    }))?;

    let response = app.post_raw("/api/webhooks/boletos/itau", &body, &[]).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let forged = sign("wrong-secret", &body)?;
    let response = app
        .post_raw(
            "/api/webhooks/boletos/itau",
            &body,
            &[("x-webhook-signature", forged.as_str())],
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let signature = sign("itau-secret", &body)?;
    let response = app
        .post_raw(
            "/api/webhooks/boletos/itau",
            &body,
            &[("x-webhook-signature", signature.as_str())],
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await?;
    assert_eq!(created["urgent"], false);

    // No secret is configured for Banco do Brasil, so nothing it sends can verify.
    let response = app
        .post_raw(
            "/api/webhooks/boletos/banco_brasil",
            &body,
            &[("x-webhook-signature", signature.as_str())],
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}
