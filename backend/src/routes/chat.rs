use std::sync::Arc;

use axum::body::Bytes;
use axum::http::HeaderMap;
use axum::{extract::State, routing::get, Json, Router};
use chatlog_common::history::sort_chronological;
use chatlog_common::{ChatMessage, HistoryResponse, PostMessageRequest, PostMessageResponse, Role};

use crate::context::HISTORY_WINDOW;
use crate::error::ApiError;
use crate::AppState;

/// GET /chat - full conversation history of the caller, oldest first
async fn get_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<HistoryResponse>, ApiError> {
    let identity = state.verifier.authenticate(&headers).await?;

    let mut history = state.store.recent_history(&identity.user_id, None)?;
    sort_chronological(&mut history);

    tracing::info!(user_id = %identity.user_id, messages = history.len(), "Fetched chat history");

    Ok(Json(HistoryResponse {
        user_id: identity.user_id,
        chat_history: history,
    }))
}

/// POST /chat - record a message, ask the completion service, record its reply
///
/// The user's turn is written before the completion call and stays written
/// if that call fails; the bot turn is only written on success.
async fn post_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PostMessageResponse>, ApiError> {
    // Authenticate before looking at the body
    let identity = state.verifier.authenticate(&headers).await?;
    let message = parse_message(&body)?;

    let user_turn = ChatMessage::new(&identity.user_id, state.clock.now(), Role::User, &message);
    state.store.append(&user_turn)?;

    let history = state
        .store
        .recent_history(&identity.user_id, Some(HISTORY_WINDOW))?;
    let prompt = state.assembler.build(&history, &message);

    let reply = state
        .completion
        .complete(&prompt, state.config.completion.max_tokens)
        .await?;

    let bot_turn = ChatMessage::new(&identity.user_id, state.clock.now(), Role::Bot, &reply);
    state.store.append(&bot_turn)?;

    tracing::info!(
        user_id = %identity.user_id,
        prompt_messages = prompt.len(),
        "Recorded chat exchange"
    );

    Ok(Json(PostMessageResponse {
        user_id: identity.user_id,
        chatbot_reply: reply,
    }))
}

/// Extract a non-empty `message` from a JSON body.
fn parse_message(body: &[u8]) -> Result<String, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::BadRequest("Missing message".to_string()));
    }

    let request: PostMessageRequest = serde_json::from_slice(body)
        .map_err(|_| ApiError::BadRequest("Invalid JSON body".to_string()))?;

    match request.message {
        Some(message) if !message.is_empty() => Ok(message),
        _ => Err(ApiError::BadRequest("Missing message".to_string())),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat", get(get_history).post(post_message))
        .with_state(state)
}
