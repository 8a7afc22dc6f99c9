mod common;

use axum::http::StatusCode;
use common::{spawn_app, OWNER};
use creatorpay_core::domain::CampaignStatus;
use creatorpay_core::gateway::GatewayError;
use serde_json::json;

#[tokio::test]
async fn test_wallet_only_checkout_pays_immediately() {
    let app = spawn_app();
    app.fund(OWNER, 5000).await;
    app.campaigns
        .insert("c-1", OWNER, CampaignStatus::PendingPayment, 1500);

    let (status, body) = app
        .post_json(
            "/campaigns/c-1/payments",
            Some(OWNER),
            json!({ "use_wallet": true, "method": "wallet_only" }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["payment"]["status"], "paid");
    assert_eq!(body["payment"]["wallet_applied_cents"], 1500);
    assert_eq!(body["payment"]["gateway_amount_cents"], 0);
    assert_eq!(app.balance(OWNER).await, 3500);
    assert_eq!(app.campaigns.status("c-1"), Some(CampaignStatus::PendingReview));
}

#[tokio::test]
async fn test_blended_checkout_waits_for_gateway() {
    let app = spawn_app();
    app.fund(OWNER, 1000).await;
    app.campaigns
        .insert("c-2", OWNER, CampaignStatus::Draft, 1500);

    let (status, body) = app
        .post_json(
            "/campaigns/c-2/payments",
            Some(OWNER),
            json!({ "use_wallet": true, "method": "pix" }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["payment"]["status"], "awaiting_gateway");
    assert_eq!(body["payment"]["wallet_applied_cents"], 1000);
    assert_eq!(body["payment"]["gateway_amount_cents"], 500);
    assert!(body["payment"]["qr_payload"].is_string());
    assert_eq!(app.balance(OWNER).await, 0);

    let id = body["payment"]["id"].as_str().unwrap().to_string();
    let (status, snapshot) = app
        .get(&format!("/payments/{}/status", id), Some(OWNER))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["is_paid"], false);
    assert_eq!(snapshot["status"], "awaiting_gateway");
}

#[tokio::test]
async fn test_double_submit_returns_open_intent() {
    let app = spawn_app();
    app.campaigns
        .insert("c-3", OWNER, CampaignStatus::Draft, 900);
    let request = json!({ "method": "pix" });

    let (first_status, first) = app
        .post_json("/campaigns/c-3/payments", Some(OWNER), request.clone())
        .await;
    let (second_status, second) = app
        .post_json("/campaigns/c-3/payments", Some(OWNER), request)
        .await;

    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(second["reused"], true);
    assert_eq!(first["payment"]["id"], second["payment"]["id"]);
    assert_eq!(app.pix.create_calls(), 1);
}

#[tokio::test]
async fn test_wallet_only_without_funds_is_unprocessable() {
    let app = spawn_app();
    app.fund(OWNER, 100).await;
    app.campaigns
        .insert("c-4", OWNER, CampaignStatus::Draft, 1500);

    let (status, body) = app
        .post_json(
            "/campaigns/c-4/payments",
            Some(OWNER),
            json!({ "use_wallet": true, "method": "wallet_only" }),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "insufficient_balance");
    assert_eq!(body["retryable"], false);
    assert_eq!(app.balance(OWNER).await, 100);
}

#[tokio::test]
async fn test_campaign_under_review_is_not_payable() {
    let app = spawn_app();
    app.campaigns
        .insert("c-5", OWNER, CampaignStatus::PendingReview, 1500);

    let (status, body) = app
        .post_json("/campaigns/c-5/payments", Some(OWNER), json!({ "method": "pix" }))
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "campaign_not_payable");
    assert_eq!(app.pix.create_calls(), 0);
}

#[tokio::test]
async fn test_requests_without_identity_are_rejected() {
    let app = spawn_app();

    let (status, body) = app
        .post_json("/wallets/deposits", None, json!({ "amount_cents": 100, "method": "pix" }))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");
}

#[tokio::test]
async fn test_other_users_cannot_read_a_payment() {
    let app = spawn_app();
    let (_, created) = app
        .post_json(
            "/wallets/deposits",
            Some(OWNER),
            json!({ "amount_cents": 2500, "method": "pix" }),
        )
        .await;
    let id = created["payment"]["id"].as_str().unwrap().to_string();

    let (status, _) = app.get(&format!("/payments/{}", id), Some("intruder")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .get("/wallets/creator-1/balance", Some("intruder"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_gateway_outage_leaves_intent_retryable() {
    let app = spawn_app();
    app.fund(OWNER, 400).await;
    app.campaigns
        .insert("c-6", OWNER, CampaignStatus::Draft, 1000);
    app.pix
        .fail_next_create(GatewayError::Unavailable("connect timeout".to_string()));

    let (status, body) = app
        .post_json(
            "/campaigns/c-6/payments",
            Some(OWNER),
            json!({ "use_wallet": true, "method": "pix" }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["retry_pending"], true);
    assert!(body["payment"]["gateway_reference"].is_null());
    // The wallet portion stays reserved while the charge is retried.
    assert_eq!(app.balance(OWNER).await, 0);

    let id = body["payment"]["id"].as_str().unwrap().to_string();
    let (status, body) = app
        .post_json(&format!("/payments/{}/retry", id), Some(OWNER), json!({}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["retry_pending"], false);
    assert!(body["payment"]["gateway_reference"].is_string());
    assert_eq!(app.pix.create_calls(), 2);
    assert_eq!(app.balance(OWNER).await, 0);
}

#[tokio::test]
async fn test_cancel_releases_reserved_wallet_credit() {
    let app = spawn_app();
    app.fund(OWNER, 700).await;
    app.campaigns
        .insert("c-7", OWNER, CampaignStatus::Draft, 1000);

    let (_, body) = app
        .post_json(
            "/campaigns/c-7/payments",
            Some(OWNER),
            json!({ "use_wallet": true, "method": "pix" }),
        )
        .await;
    let id = body["payment"]["id"].as_str().unwrap().to_string();
    assert_eq!(app.balance(OWNER).await, 0);

    let (status, body) = app
        .post_json(&format!("/payments/{}/cancel", id), Some(OWNER), json!({}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "canceled");
    assert_eq!(app.balance(OWNER).await, 700);

    let (status, body) = app
        .post_json(&format!("/payments/{}/retry", id), Some(OWNER), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_transition");
}

#[tokio::test]
async fn test_admin_refund_restores_wallet_and_campaign() {
    let app = spawn_app();
    app.fund(OWNER, 2000).await;
    app.campaigns
        .insert("c-8", OWNER, CampaignStatus::Draft, 1200);

    let (_, body) = app
        .post_json(
            "/campaigns/c-8/payments",
            Some(OWNER),
            json!({ "use_wallet": true, "method": "wallet_only" }),
        )
        .await;
    let id = body["payment"]["id"].as_str().unwrap().to_string();
    assert_eq!(app.balance(OWNER).await, 800);

    let (status, body) = app
        .post_json(
            &format!("/admin/payments/{}/refund", id),
            Some("ops-1"),
            json!({}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "refunded");
    assert_eq!(app.balance(OWNER).await, 2000);
    assert_eq!(app.campaigns.status("c-8"), Some(CampaignStatus::Draft));

    let (status, audit) = app.get("/admin/ledger/audit", Some("ops-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(audit["discrepancies"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_parked_settlement_is_listed_and_retried_by_operator() {
    let app = spawn_app();
    app.campaigns
        .insert("c-11", OWNER, CampaignStatus::Draft, 700);
    let (_, body) = app
        .post_json(
            "/campaigns/c-11/payments",
            Some(OWNER),
            json!({ "use_wallet": false, "method": "pix" }),
        )
        .await;
    let id = body["payment"]["id"].as_str().unwrap().to_string();
    let reference = body["payment"]["gateway_reference"].as_str().unwrap().to_string();

    app.campaigns
        .insert("c-11", OWNER, CampaignStatus::Archived, 700);
    let (webhook_body, sig) = app.pix.signed_webhook(&reference, "paid", 700);
    let (status, _) = app.post_webhook("pix", webhook_body, Some(&sig)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, parked) = app.get("/admin/settlements/parked", Some("ops-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parked[0]["id"], id.as_str());
    assert_eq!(parked[0]["settle_attempts"], 1);

    let settle_uri = format!("/admin/payments/{}/settle", id);
    let (status, body) = app.post_json(&settle_uri, Some("ops-1"), json!({})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["settled_at"].is_null());

    app.campaigns
        .insert("c-11", OWNER, CampaignStatus::Draft, 700);
    let (status, body) = app.post_json(&settle_uri, Some("ops-1"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["settled_at"].is_string());
    assert_eq!(app.campaigns.status("c-11"), Some(CampaignStatus::PendingReview));

    let (_, parked) = app.get("/admin/settlements/parked", Some("ops-1")).await;
    assert!(parked.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_deposit_above_limit_is_a_validation_error() {
    let app = spawn_app();

    let (status, body) = app
        .post_json(
            "/wallets/deposits",
            Some(OWNER),
            json!({ "amount_cents": i64::MAX, "method": "pix" }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
    assert_eq!(app.pix.create_calls(), 0);
}

#[tokio::test]
async fn test_wallet_entries_and_payment_listing() {
    let app = spawn_app();
    app.fund(OWNER, 3000).await;
    app.campaigns
        .insert("c-9", OWNER, CampaignStatus::Draft, 1000);
    app.post_json(
        "/campaigns/c-9/payments",
        Some(OWNER),
        json!({ "use_wallet": true, "method": "wallet_only" }),
    )
    .await;

    let (status, body) = app
        .get("/wallets/creator-1/entries?limit=10", Some(OWNER))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entries"].as_array().unwrap().len(), 2);
    assert_eq!(body["limit"], 10);

    let (status, body) = app.get("/wallets/creator-1/balance", Some(OWNER)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance_cents"], 2000);
    assert_eq!(body["currency"], "BRL");

    let (status, body) = app.get("/payments", Some(OWNER)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payments"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_wallet_has_zero_balance() {
    let app = spawn_app();

    let (status, body) = app.get("/wallets/nobody/balance", Some("nobody")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance_cents"], 0);

    let (_, body) = app.get("/wallets/nobody/entries", Some("nobody")).await;
    assert!(body["entries"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_operational_endpoints() {
    let app = spawn_app();

    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = app.get("/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    app.state.readiness.mark_ready();
    let (status, body) = app.get("/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");

    let (status, _) = app.get("/metrics", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/api-docs/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/campaigns/{id}/payments"].is_object());
}
