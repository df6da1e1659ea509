//! Document store abstraction and the in-memory implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::model::{NewVote, Vote, VoteType};
use crate::parser::validate_field;

/// CRUD operations the ledger needs from a vote collection.
///
/// Implementations must give read-your-writes consistency and must reject
/// a second vote for the same (review, user) pair with [`Error::Conflict`].
pub trait VoteStore: Send + Sync {
    /// Find the vote cast by `user_id` on `review_id`
    fn find(&self, review_id: &str, user_id: &str) -> Result<Option<Vote>>;

    /// All votes on `review_id`, at most `limit` of them
    fn find_all(&self, review_id: &str, limit: usize) -> Result<Vec<Vote>>;

    /// Insert a vote and return the stored document
    fn create(&self, vote: NewVote) -> Result<Vote>;

    /// Change direction and timestamp of an existing vote
    fn update(&self, id: &str, vote_type: VoteType, voted_at: DateTime<Utc>) -> Result<Vote>;

    /// Remove a vote by id
    fn delete(&self, id: &str) -> Result<()>;

    /// Number of stored votes
    fn len(&self) -> usize;

    /// Check if the store holds no votes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Vote documents plus a (review, user) -> id index.
///
/// Shared by the memory and file stores so both enforce uniqueness the same way.
#[derive(Debug, Default)]
pub(crate) struct VoteTable {
    votes: HashMap<String, Vote>,
    pairs: HashMap<(String, String), String>,
}

impl VoteTable {
    pub(crate) fn find(&self, review_id: &str, user_id: &str) -> Option<&Vote> {
        self.pairs
            .get(&(review_id.to_string(), user_id.to_string()))
            .and_then(|id| self.votes.get(id))
    }

    pub(crate) fn find_all(&self, review_id: &str, limit: usize) -> Vec<Vote> {
        let mut votes: Vec<Vote> = self
            .votes
            .values()
            .filter(|v| v.review_id == review_id)
            .cloned()
            .collect();
        // Stable order so the limit cuts the same documents every time
        votes.sort_by(|a, b| a.voted_at.cmp(&b.voted_at).then_with(|| a.id.cmp(&b.id)));
        votes.truncate(limit);
        votes
    }

    pub(crate) fn check_insert(&self, vote: &NewVote) -> Result<()> {
        validate_field("reviewId", &vote.review_id)?;
        validate_field("userId", &vote.user_id)?;

        if self.find(&vote.review_id, &vote.user_id).is_some() {
            return Err(Error::Conflict {
                review_id: vote.review_id.clone(),
                user_id: vote.user_id.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, vote: Vote) {
        self.pairs.insert(
            (vote.review_id.clone(), vote.user_id.clone()),
            vote.id.clone(),
        );
        self.votes.insert(vote.id.clone(), vote);
    }

    /// Insert or replace `vote`, evicting whatever held its id or its pair.
    ///
    /// Returns the number of documents displaced.
    pub(crate) fn upsert(&mut self, vote: Vote) -> usize {
        let mut displaced = 0;
        if self.remove(&vote.id).is_ok() {
            displaced += 1;
        }
        let holder = self
            .pairs
            .get(&(vote.review_id.clone(), vote.user_id.clone()))
            .cloned();
        if let Some(holder) = holder {
            if self.remove(&holder).is_ok() {
                displaced += 1;
            }
        }
        self.insert(vote);
        displaced
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Result<&mut Vote> {
        self.votes
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.votes.contains_key(id)
    }

    pub(crate) fn remove(&mut self, id: &str) -> Result<Vote> {
        let vote = self
            .votes
            .remove(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        self.pairs
            .remove(&(vote.review_id.clone(), vote.user_id.clone()));
        Ok(vote)
    }

    pub(crate) fn all(&self) -> Vec<Vote> {
        self.votes.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.votes.len()
    }
}

/// Volatile vote store, used by tests and `lingud --memory`
#[derive(Debug, Default)]
pub struct MemoryVoteStore {
    table: RwLock<VoteTable>,
    next_id: AtomicU64,
}

impl MemoryVoteStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl VoteStore for MemoryVoteStore {
    fn find(&self, review_id: &str, user_id: &str) -> Result<Option<Vote>> {
        Ok(self.table.read().find(review_id, user_id).cloned())
    }

    fn find_all(&self, review_id: &str, limit: usize) -> Result<Vec<Vote>> {
        Ok(self.table.read().find_all(review_id, limit))
    }

    fn create(&self, vote: NewVote) -> Result<Vote> {
        let mut table = self.table.write();
        table.check_insert(&vote)?;

        let id = format!("vote-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let vote = vote.into_vote(id);
        table.insert(vote.clone());
        Ok(vote)
    }

    fn update(&self, id: &str, vote_type: VoteType, voted_at: DateTime<Utc>) -> Result<Vote> {
        let mut table = self.table.write();
        let vote = table.get_mut(id)?;
        vote.vote_type = vote_type;
        vote.voted_at = voted_at;
        Ok(vote.clone())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.table.write().remove(id).map(|_| ())
    }

    fn len(&self) -> usize {
        self.table.read().len()
    }
}
