//! # HTTP API
//!
//! Two axum routers over one [`NodeState`]:
//!
//! - the **public** router, for wallets and operators;
//! - the **peer** router, for other Ember nodes, matching the routes that
//!   [`HttpPeerClient`](crate::peer_client::HttpPeerClient) calls.
//!
//! ## Public endpoints
//!
//! | Method | Path                              | Description                        |
//! |--------|-----------------------------------|------------------------------------|
//! | GET    | `/health`                         | Liveness probe                     |
//! | GET    | `/v1/genesis/list`                | Genesis document                   |
//! | GET    | `/v1/accounts/list`               | Every account                      |
//! | GET    | `/v1/accounts/list/:account`      | One account                        |
//! | GET    | `/v1/blocks/list/:from/:to`       | Blocks by number; `to` may be `latest` |
//! | GET    | `/v1/blocks/account/:account`     | Blocks touching an account         |
//! | GET    | `/v1/tx/uncommitted/list`         | Mempool contents                   |
//! | POST   | `/v1/tx/submit`                   | Submit a signed transaction        |
//! | GET    | `/ws`                             | Live [`NodeEvent`] stream          |
//!
//! Peer endpoints are listed in `ember_protocol::network::rpc`.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ember_protocol::crypto::Account;
use ember_protocol::events::NodeEvent;
use ember_protocol::network::node::{ErrorCategory, NodeState, StateError};
use ember_protocol::network::peers::Peer;
use ember_protocol::network::rpc::{self, Acknowledgement};
use ember_protocol::storage::Block;
use ember_protocol::transaction::{BlockTx, SignedTx};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared by every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<NodeState>,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/v1/genesis/list", get(genesis_handler))
        .route("/v1/accounts/list", get(accounts_handler))
        .route("/v1/accounts/list/:account", get(account_handler))
        .route("/v1/blocks/list/:from/:to", get(blocks_by_number_handler))
        .route("/v1/blocks/account/:account", get(blocks_by_account_handler))
        .route("/v1/tx/uncommitted/list", get(mempool_handler))
        .route("/v1/tx/submit", post(submit_wallet_tx_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Node-to-node routes. Proposals here can reset the chain, so this router
/// belongs on the peer listener only.
pub fn create_peer_router(state: AppState) -> Router {
    Router::new()
        .route(rpc::STATUS_PATH, get(peer_status_handler))
        .route(rpc::MEMPOOL_PATH, get(mempool_handler))
        .route(rpc::BLOCKS_PATH, get(peer_blocks_handler))
        .route(rpc::PROPOSE_BLOCK_PATH, post(propose_block_handler))
        .route(rpc::SUBMIT_TX_PATH, post(submit_node_tx_handler))
        .route(rpc::ANNOUNCE_PATH, post(announce_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub account: Account,
    pub balance: u64,
    pub nonce: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub key: String,
    pub status: String,
}

/// Generic error body returned on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: message.into() })).into_response()
}

fn state_error(err: StateError) -> Response {
    let status = match err.category() {
        ErrorCategory::Validation | ErrorCategory::Consensus => StatusCode::BAD_REQUEST,
        ErrorCategory::Resource | ErrorCategory::Cancellation => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::Network => StatusCode::BAD_GATEWAY,
        ErrorCategory::Storage | ErrorCategory::Internal => {
            tracing::error!(%err, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_body(status, err.to_string())
}

/// Peer pushes are answered with an acknowledgement; only faults on our
/// side are HTTP errors.
fn acknowledge(result: Result<(), StateError>) -> Response {
    match result {
        Ok(()) => Json(Acknowledgement::accepted()).into_response(),
        Err(err) => match err.category() {
            ErrorCategory::Storage | ErrorCategory::Internal => state_error(err),
            _ => Json(Acknowledgement::rejected(err.to_string())).into_response(),
        },
    }
}

fn parse_account(raw: &str) -> Result<Account, Response> {
    Account::parse(raw).map_err(|err| error_body(StatusCode::BAD_REQUEST, err.to_string()))
}

// ---------------------------------------------------------------------------
// Public Handlers
// ---------------------------------------------------------------------------

/// `GET /health`. Does not check internal subsystems.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "version": state.version,
            "host": state.node.host(),
        })),
    )
}

async fn genesis_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.node.genesis().clone())
}

async fn accounts_handler(State(state): State<AppState>) -> impl IntoResponse {
    let accounts: Vec<AccountResponse> = state
        .node
        .accounts()
        .into_iter()
        .map(|(account, record)| AccountResponse {
            account,
            balance: record.balance,
            nonce: record.nonce,
        })
        .collect();
    Json(accounts)
}

/// Unknown accounts are reported with a zero balance, not a 404.
async fn account_handler(
    Path(account): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let account = match parse_account(&account) {
        Ok(account) => account,
        Err(response) => return response,
    };
    let record = state.node.query_account(&account);
    Json(AccountResponse {
        account,
        balance: record.balance,
        nonce: record.nonce,
    })
    .into_response()
}

async fn blocks_by_number_handler(
    Path((from, to)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    let Ok(from) = from.parse::<u64>() else {
        return error_body(StatusCode::BAD_REQUEST, format!("invalid block number `{from}`"));
    };
    let to = match to.as_str() {
        "latest" => None,
        raw => match raw.parse::<u64>() {
            Ok(to) => Some(to),
            Err(_) => {
                return error_body(StatusCode::BAD_REQUEST, format!("invalid block number `{raw}`"))
            }
        },
    };

    match state.node.query_blocks_by_number(from, to) {
        Ok(blocks) => Json(blocks).into_response(),
        Err(err) => state_error(err),
    }
}

async fn blocks_by_account_handler(
    Path(account): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let account = match parse_account(&account) {
        Ok(account) => account,
        Err(response) => return response,
    };
    match state.node.query_blocks_by_account(&account) {
        Ok(blocks) => Json(blocks).into_response(),
        Err(err) => state_error(err),
    }
}

/// Served on both routers: wallets and peers read the same pool.
async fn mempool_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.node.mempool())
}

async fn submit_wallet_tx_handler(
    State(state): State<AppState>,
    Json(signed): Json<SignedTx>,
) -> Response {
    match state.node.upsert_wallet_transaction(signed) {
        Ok(tx) => (
            StatusCode::OK,
            Json(SubmitResponse {
                key: tx.unique_key(),
                status: "transaction added to mempool".into(),
            }),
        )
            .into_response(),
        Err(err) => state_error(err),
    }
}

/// `GET /ws`. Push-only; client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.node.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Peer Handlers
// ---------------------------------------------------------------------------

async fn peer_status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.node.status())
}

async fn peer_blocks_handler(Path(from): Path<u64>, State(state): State<AppState>) -> Response {
    match state.node.query_blocks_by_number(from, None) {
        Ok(blocks) => Json(blocks).into_response(),
        Err(err) => state_error(err),
    }
}

async fn propose_block_handler(
    State(state): State<AppState>,
    Json(block): Json<Block>,
) -> Response {
    let number = block.number();
    let result = state.node.process_proposed_block(block).await;
    if let Err(err) = &result {
        tracing::info!(number, %err, "proposed block refused");
    }
    acknowledge(result)
}

async fn submit_node_tx_handler(
    State(state): State<AppState>,
    Json(tx): Json<BlockTx>,
) -> Response {
    acknowledge(state.node.upsert_node_transaction(tx).map(|_| ()))
}

async fn announce_handler(State(state): State<AppState>, Json(peer): Json<Peer>) -> impl IntoResponse {
    state.node.add_known_peer(peer);
    Json(Acknowledgement::accepted())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
