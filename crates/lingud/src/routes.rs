//! HTTP routes for votes and tallies

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::debug;
use ttlcache::tally_key;
use votestore::{RawVoteRequest, VoteRequest, VoteResponse};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/votes", post(cast_vote))
        .route("/reviews/:review_id/tally", get(review_tally))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let cache = state.tallies.cache();
    let stats = cache.stats();
    Json(json!({
        "status": "ok",
        "votes": state.ledger.store().len(),
        "cache": {
            "entries": cache.size(),
            "hits": stats.hits,
            "misses": stats.misses,
            "expirations": stats.expirations,
            "hitRatio": stats.hit_ratio(),
        }
    }))
}

async fn cast_vote(
    State(state): State<AppState>,
    body: Result<Json<RawVoteRequest>, JsonRejection>,
) -> Result<Json<VoteResponse>, ApiError> {
    let Json(raw) = body?;
    let request = VoteRequest::try_from(raw)?;

    let tally = state.ledger.handle_vote(&request)?;
    state.tallies.invalidate(&tally_key(&request.review_id));

    Ok(Json(VoteResponse::ok(tally)))
}

async fn review_tally(
    State(state): State<AppState>,
    Path(review_id): Path<String>,
) -> Result<Json<VoteResponse>, ApiError> {
    let key = tally_key(&review_id);
    let tally = state
        .tallies
        .get_or_fetch(&key, || state.ledger.tally(&review_id, None))?;

    debug!("Tally for review {}: {:?}", review_id, tally);
    Ok(Json(VoteResponse::ok(tally)))
}
