use crate::domain::GatewayKind;
use crate::error::AppError;
use crate::gateway::signature::SIGNATURE_HEADER;
use crate::schemas::WebhookAck;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};

/// Gateway callback. The body is taken raw so the signature is checked over the
/// exact bytes the provider signed.
#[utoipa::path(
    post,
    path = "/webhooks/{provider}",
    params(("provider" = String, Path, description = "pix or card")),
    responses(
        (status = 200, description = "Accepted, including replays", body = WebhookAck),
        (status = 401, description = "Signature missing or invalid"),
        (status = 404, description = "Unknown provider or reference"),
        (status = 409, description = "Transition refused"),
        (status = 422, description = "Amount does not match the charge")
    ),
    tag = "Webhooks"
)]
pub async fn gateway_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let kind: GatewayKind = provider
        .parse()
        .map_err(|_| AppError::NotFound(format!("unknown payment provider {}", provider)))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    tracing::info!(gateway = %kind, bytes = body.len(), "Gateway webhook received");

    let outcome = state
        .coordinator
        .handle_webhook(kind, &body, signature)
        .await?;

    Ok(Json(outcome.into()))
}
