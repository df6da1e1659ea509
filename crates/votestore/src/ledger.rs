//! Vote ledger: one vote per (review, user), tallied on every request
//!
//! Requests arrive as loosely typed JSON ([`RawVoteRequest`]) and are
//! validated into a [`VoteRequest`] before any store access.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::model::{NewVote, Vote, VoteTally, VoteType};
use crate::store::VoteStore;

/// Maximum number of votes scanned when tallying a review
pub const TALLY_SCAN_LIMIT: usize = 1000;

/// Message returned to clients for any store failure
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Request body as it arrives on the wire
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVoteRequest {
    /// Review being voted on
    pub review_id: Option<String>,
    /// Voting user
    pub user_id: Option<String>,
    /// `up`, `down`, or absent to withdraw
    pub vote_type: Option<String>,
}

/// What the caller wants done with their vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteAction {
    /// Cast a vote; casting the current direction again cancels it
    Cast(VoteType),
    /// Remove any existing vote
    Withdraw,
}

/// A validated vote request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRequest {
    /// Review being voted on
    pub review_id: String,
    /// Voting user
    pub user_id: String,
    /// Requested action
    pub action: VoteAction,
}

impl VoteRequest {
    /// Build a request from already-typed parts
    pub fn new(review_id: &str, user_id: &str, action: VoteAction) -> Self {
        Self {
            review_id: review_id.to_string(),
            user_id: user_id.to_string(),
            action,
        }
    }
}

fn required(value: Option<String>, name: &str) -> std::result::Result<String, LedgerError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(LedgerError::InvalidRequest(format!("Missing required field: {}", name))),
    }
}

impl TryFrom<RawVoteRequest> for VoteRequest {
    type Error = LedgerError;

    fn try_from(raw: RawVoteRequest) -> std::result::Result<Self, Self::Error> {
        let review_id = required(raw.review_id, "reviewId")?;
        let user_id = required(raw.user_id, "userId")?;

        let action = match raw.vote_type {
            None => VoteAction::Withdraw,
            Some(t) => VoteAction::Cast(t.parse().map_err(|_| {
                LedgerError::InvalidRequest(
                    "Invalid voteType: must be 'up' or 'down'".to_string(),
                )
            })?),
        };

        Ok(VoteRequest {
            review_id,
            user_id,
            action,
        })
    }
}

/// Ledger failure as seen by a client
#[derive(Debug)]
pub enum LedgerError {
    /// Missing or malformed input (HTTP 400)
    InvalidRequest(String),
    /// Store failure (HTTP 500); the detail is never sent to clients
    Internal(Error),
}

impl LedgerError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            LedgerError::InvalidRequest(_) => 400,
            LedgerError::Internal(_) => 500,
        }
    }

    /// Message safe to show to the client
    pub fn client_message(&self) -> &str {
        match self {
            LedgerError::InvalidRequest(msg) => msg,
            LedgerError::Internal(_) => INTERNAL_ERROR_MESSAGE,
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            LedgerError::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::Internal(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Error> for LedgerError {
    fn from(err: Error) -> Self {
        match err {
            // The store rejected caller-supplied text, not a store fault
            Error::InvalidField(field) => {
                LedgerError::InvalidRequest(format!("Invalid value for field: {}", field))
            }
            err => {
                error!("Vote store failure: {}", err);
                LedgerError::Internal(err)
            }
        }
    }
}

/// JSON envelope returned by the vote endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteResponse {
    /// Whether the request succeeded
    pub success: bool,
    /// Tally on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<VoteTally>,
    /// Client-safe message on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VoteResponse {
    /// Successful response carrying a tally
    pub fn ok(tally: VoteTally) -> Self {
        Self {
            success: true,
            data: Some(tally),
            error: None,
        }
    }

    /// Failed response; internal details are replaced by a generic message
    pub fn failure(err: &LedgerError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.client_message().to_string()),
        }
    }
}

/// Which branch of the vote state machine a request took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// First vote by this user on this review
    Created,
    /// Existing vote changed direction
    Switched,
    /// Same direction cast again, vote removed
    ToggledOff,
    /// Explicit withdrawal removed the vote
    Withdrawn,
    /// Nothing to do
    Unchanged,
}

/// Applies vote requests against a [`VoteStore`]
pub struct VoteLedger {
    store: Arc<dyn VoteStore>,
}

impl VoteLedger {
    /// Create a ledger over the given store
    pub fn new(store: Arc<dyn VoteStore>) -> Self {
        Self { store }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn VoteStore> {
        &self.store
    }

    /// Apply a vote request and return the updated tally for its review
    pub fn handle_vote(
        &self,
        request: &VoteRequest,
    ) -> std::result::Result<VoteTally, LedgerError> {
        let outcome = self.apply(request)?;
        debug!(
            "Vote {:?} on review {} by user {}: {:?}",
            request.action, request.review_id, request.user_id, outcome
        );

        self.tally(&request.review_id, Some(&request.user_id))
    }

    /// Parse and apply a raw request
    pub fn handle_raw(
        &self,
        raw: RawVoteRequest,
    ) -> std::result::Result<VoteTally, LedgerError> {
        let request = VoteRequest::try_from(raw)?;
        self.handle_vote(&request)
    }

    /// Recount votes on a review; `user_id` selects whose vote to report
    pub fn tally(
        &self,
        review_id: &str,
        user_id: Option<&str>,
    ) -> std::result::Result<VoteTally, LedgerError> {
        let votes = self.store.find_all(review_id, TALLY_SCAN_LIMIT)?;
        Ok(VoteTally::from_votes(&votes, user_id))
    }

    fn apply(&self, request: &VoteRequest) -> Result<VoteOutcome> {
        let existing = self.store.find(&request.review_id, &request.user_id)?;

        match self.transition(request, existing) {
            Err(Error::Conflict { .. }) => {
                // Another request created the pair between our find and create
                warn!(
                    "Concurrent vote on review {} by user {}, retrying against stored vote",
                    request.review_id, request.user_id
                );
                let existing = self.store.find(&request.review_id, &request.user_id)?;
                self.settle_conflict(request, existing)
            }
            other => other,
        }
    }

    fn transition(&self, request: &VoteRequest, existing: Option<Vote>) -> Result<VoteOutcome> {
        match (request.action, existing) {
            (VoteAction::Withdraw, Some(vote)) => {
                self.remove(&vote)?;
                Ok(VoteOutcome::Withdrawn)
            }
            (VoteAction::Withdraw, None) => Ok(VoteOutcome::Unchanged),
            (VoteAction::Cast(vote_type), Some(vote)) if vote.vote_type == vote_type => {
                self.remove(&vote)?;
                Ok(VoteOutcome::ToggledOff)
            }
            (VoteAction::Cast(vote_type), Some(vote)) => {
                match self.store.update(&vote.id, vote_type, Utc::now()) {
                    Ok(_) => Ok(VoteOutcome::Switched),
                    // Withdrawn since our read, so the pair is free again
                    Err(Error::NotFound(_)) => self.transition(request, None),
                    Err(err) => Err(err),
                }
            }
            (VoteAction::Cast(vote_type), None) => {
                self.store
                    .create(NewVote::now(&request.review_id, &request.user_id, vote_type))?;
                Ok(VoteOutcome::Created)
            }
        }
    }

    /// After losing a create race the caller's intent is "my vote is X",
    /// so a matching winner is kept rather than toggled off.
    fn settle_conflict(
        &self,
        request: &VoteRequest,
        existing: Option<Vote>,
    ) -> Result<VoteOutcome> {
        match (request.action, existing) {
            (VoteAction::Cast(vote_type), Some(vote)) if vote.vote_type == vote_type => {
                Ok(VoteOutcome::Unchanged)
            }
            (_, existing) => self.transition(request, existing),
        }
    }

    fn remove(&self, vote: &Vote) -> Result<()> {
        match self.store.delete(&vote.id) {
            // Already gone is the state we wanted
            Err(Error::NotFound(_)) => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryVoteStore;
    use chrono::DateTime;

    fn ledger() -> (VoteLedger, Arc<MemoryVoteStore>) {
        let store = Arc::new(MemoryVoteStore::new());
        (VoteLedger::new(store.clone()), store)
    }

    fn cast(review: &str, user: &str, vote_type: VoteType) -> VoteRequest {
        VoteRequest::new(review, user, VoteAction::Cast(vote_type))
    }

    fn tally(upvotes: u64, downvotes: u64, user_vote: Option<VoteType>) -> VoteTally {
        VoteTally {
            upvotes,
            downvotes,
            user_vote,
        }
    }

    #[test]
    fn test_vote_scenario() {
        let (ledger, _) = ledger();

        let result = ledger.handle_vote(&cast("rev1", "u1", VoteType::Up)).unwrap();
        assert_eq!(result, tally(1, 0, Some(VoteType::Up)));

        let result = ledger.handle_vote(&cast("rev1", "u1", VoteType::Up)).unwrap();
        assert_eq!(result, tally(0, 0, None));

        let result = ledger.handle_vote(&cast("rev1", "u1", VoteType::Down)).unwrap();
        assert_eq!(result, tally(0, 1, Some(VoteType::Down)));
    }

    #[test]
    fn test_single_vote_per_pair() {
        let (ledger, store) = ledger();
        let actions = [
            VoteAction::Cast(VoteType::Up),
            VoteAction::Cast(VoteType::Down),
            VoteAction::Cast(VoteType::Down),
            VoteAction::Withdraw,
            VoteAction::Cast(VoteType::Down),
            VoteAction::Cast(VoteType::Up),
            VoteAction::Withdraw,
            VoteAction::Withdraw,
            VoteAction::Cast(VoteType::Up),
        ];

        for action in actions {
            ledger
                .handle_vote(&VoteRequest::new("rev1", "u1", action))
                .unwrap();
            assert!(store.find_all("rev1", TALLY_SCAN_LIMIT).unwrap().len() <= 1);
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_toggle_off() {
        let (ledger, store) = ledger();
        ledger.handle_vote(&cast("rev1", "u2", VoteType::Up)).unwrap();

        ledger.handle_vote(&cast("rev1", "u1", VoteType::Up)).unwrap();
        let result = ledger.handle_vote(&cast("rev1", "u1", VoteType::Up)).unwrap();

        assert!(store.find("rev1", "u1").unwrap().is_none());
        assert_eq!(result, tally(1, 0, None));
    }

    #[test]
    fn test_switch() {
        let (ledger, store) = ledger();
        ledger.handle_vote(&cast("rev1", "u2", VoteType::Up)).unwrap();
        ledger.handle_vote(&cast("rev1", "u3", VoteType::Down)).unwrap();

        let before = ledger.handle_vote(&cast("rev1", "u1", VoteType::Up)).unwrap();
        let after = ledger.handle_vote(&cast("rev1", "u1", VoteType::Down)).unwrap();

        assert_eq!(after.upvotes, before.upvotes - 1);
        assert_eq!(after.downvotes, before.downvotes + 1);

        let stored = store.find("rev1", "u1").unwrap().unwrap();
        assert_eq!(stored.vote_type, VoteType::Down);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_withdrawal() {
        let (ledger, store) = ledger();
        ledger.handle_vote(&cast("rev1", "u1", VoteType::Up)).unwrap();

        let result = ledger
            .handle_vote(&VoteRequest::new("rev1", "u1", VoteAction::Withdraw))
            .unwrap();

        assert!(store.find("rev1", "u1").unwrap().is_none());
        assert_eq!(result, tally(0, 0, None));

        // Withdrawing with nothing cast is a no-op
        let result = ledger
            .handle_vote(&VoteRequest::new("rev1", "u1", VoteAction::Withdraw))
            .unwrap();
        assert_eq!(result, tally(0, 0, None));
    }

    #[test]
    fn test_votes_are_per_review() {
        let (ledger, _) = ledger();
        ledger.handle_vote(&cast("rev1", "u1", VoteType::Up)).unwrap();
        let result = ledger.handle_vote(&cast("rev2", "u1", VoteType::Down)).unwrap();

        assert_eq!(result, tally(0, 1, Some(VoteType::Down)));
        assert_eq!(ledger.tally("rev1", None).unwrap(), tally(1, 0, None));
    }

    #[test]
    fn test_validation() {
        let (ledger, store) = ledger();

        let missing_review = RawVoteRequest {
            user_id: Some("u1".to_string()),
            vote_type: Some("up".to_string()),
            ..Default::default()
        };
        let err = ledger.handle_raw(missing_review).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.client_message(), "Missing required field: reviewId");

        let blank_user = RawVoteRequest {
            review_id: Some("rev1".to_string()),
            user_id: Some("  ".to_string()),
            vote_type: None,
        };
        assert!(matches!(
            ledger.handle_raw(blank_user),
            Err(LedgerError::InvalidRequest(_))
        ));

        let bad_type = RawVoteRequest {
            review_id: Some("rev1".to_string()),
            user_id: Some("u1".to_string()),
            vote_type: Some("sideways".to_string()),
        };
        assert!(matches!(
            ledger.handle_raw(bad_type),
            Err(LedgerError::InvalidRequest(_))
        ));

        assert!(store.is_empty());
    }

    #[test]
    fn test_raw_request_parsing() {
        let body = r#"{"reviewId":"rev1","userId":"u1","voteType":"down"}"#;
        let raw: RawVoteRequest = serde_json::from_str(body).unwrap();
        let request = VoteRequest::try_from(raw).unwrap();
        assert_eq!(request, cast("rev1", "u1", VoteType::Down));

        let body = r#"{"reviewId":"rev1","userId":"u1","voteType":null}"#;
        let raw: RawVoteRequest = serde_json::from_str(body).unwrap();
        let request = VoteRequest::try_from(raw).unwrap();
        assert_eq!(request.action, VoteAction::Withdraw);
    }

    /// Store whose first `create` loses a race to a concurrent request
    struct RacingStore {
        inner: MemoryVoteStore,
        rival: VoteType,
        raced: parking_lot::Mutex<bool>,
    }

    impl VoteStore for RacingStore {
        fn find(&self, review_id: &str, user_id: &str) -> Result<Option<Vote>> {
            self.inner.find(review_id, user_id)
        }

        fn find_all(&self, review_id: &str, limit: usize) -> Result<Vec<Vote>> {
            self.inner.find_all(review_id, limit)
        }

        fn create(&self, vote: NewVote) -> Result<Vote> {
            let mut raced = self.raced.lock();
            if !*raced {
                *raced = true;
                self.inner
                    .create(NewVote::now(&vote.review_id, &vote.user_id, self.rival))?;
            }
            self.inner.create(vote)
        }

        fn update(
            &self,
            id: &str,
            vote_type: VoteType,
            voted_at: DateTime<Utc>,
        ) -> Result<Vote> {
            self.inner.update(id, vote_type, voted_at)
        }

        fn delete(&self, id: &str) -> Result<()> {
            self.inner.delete(id)
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    fn racing(rival: VoteType) -> Arc<RacingStore> {
        Arc::new(RacingStore {
            inner: MemoryVoteStore::new(),
            rival,
            raced: parking_lot::Mutex::new(false),
        })
    }

    #[test]
    fn test_create_race_same_type_keeps_vote() {
        let store = racing(VoteType::Up);
        let ledger = VoteLedger::new(store.clone());

        let result = ledger.handle_vote(&cast("rev1", "u1", VoteType::Up)).unwrap();

        assert_eq!(result, tally(1, 0, Some(VoteType::Up)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_create_race_other_type_switches() {
        let store = racing(VoteType::Down);
        let ledger = VoteLedger::new(store.clone());

        let result = ledger.handle_vote(&cast("rev1", "u1", VoteType::Up)).unwrap();

        assert_eq!(result, tally(1, 0, Some(VoteType::Up)));
        assert_eq!(store.len(), 1);
    }

    /// Store where the vote is withdrawn between our read and our update
    struct WithdrawingStore {
        inner: MemoryVoteStore,
        withdrawn: parking_lot::Mutex<bool>,
    }

    impl VoteStore for WithdrawingStore {
        fn find(&self, review_id: &str, user_id: &str) -> Result<Option<Vote>> {
            self.inner.find(review_id, user_id)
        }

        fn find_all(&self, review_id: &str, limit: usize) -> Result<Vec<Vote>> {
            self.inner.find_all(review_id, limit)
        }

        fn create(&self, vote: NewVote) -> Result<Vote> {
            self.inner.create(vote)
        }

        fn update(
            &self,
            id: &str,
            vote_type: VoteType,
            voted_at: DateTime<Utc>,
        ) -> Result<Vote> {
            let mut withdrawn = self.withdrawn.lock();
            if !*withdrawn {
                *withdrawn = true;
                self.inner.delete(id)?;
            }
            self.inner.update(id, vote_type, voted_at)
        }

        fn delete(&self, id: &str) -> Result<()> {
            self.inner.delete(id)
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    #[test]
    fn test_switch_after_concurrent_withdrawal_creates() {
        let store = Arc::new(WithdrawingStore {
            inner: MemoryVoteStore::new(),
            withdrawn: parking_lot::Mutex::new(false),
        });
        let ledger = VoteLedger::new(store.clone());

        ledger.handle_vote(&cast("rev1", "u1", VoteType::Up)).unwrap();
        let result = ledger
            .handle_vote(&cast("rev1", "u1", VoteType::Down))
            .unwrap();

        assert_eq!(result, tally(0, 1, Some(VoteType::Down)));
        assert_eq!(store.len(), 1);
    }

    /// Store that fails every operation
    struct BrokenStore;

    impl VoteStore for BrokenStore {
        fn find(&self, _: &str, _: &str) -> Result<Option<Vote>> {
            Err(Error::Closed)
        }

        fn find_all(&self, _: &str, _: usize) -> Result<Vec<Vote>> {
            Err(Error::Closed)
        }

        fn create(&self, _: NewVote) -> Result<Vote> {
            Err(Error::Closed)
        }

        fn update(&self, id: &str, _: VoteType, _: DateTime<Utc>) -> Result<Vote> {
            Err(Error::NotFound(id.to_string()))
        }

        fn delete(&self, id: &str) -> Result<()> {
            Err(Error::NotFound(id.to_string()))
        }

        fn len(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_store_failure_is_generic() {
        let ledger = VoteLedger::new(Arc::new(BrokenStore));

        let err = ledger
            .handle_vote(&cast("rev1", "u1", VoteType::Up))
            .unwrap_err();

        assert_eq!(err.status_code(), 500);
        assert_eq!(err.client_message(), INTERNAL_ERROR_MESSAGE);

        let response = VoteResponse::failure(&err);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": false, "error": "Internal server error"})
        );
    }

    #[test]
    fn test_unstorable_field_is_client_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(crate::storage::FileVoteStore::open(dir.path()).unwrap());
        let ledger = VoteLedger::new(store);

        let err = ledger
            .handle_vote(&cast("rev1", "user,with,commas", VoteType::Up))
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.client_message(), "Invalid value for field: userId");
    }

    #[test]
    fn test_success_envelope() {
        let response = VoteResponse::ok(tally(2, 1, Some(VoteType::Up)));
        let json = serde_json::to_value(response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": true,
                "data": {"upvotes": 2, "downvotes": 1, "userVote": "up"}
            })
        );
    }
}
