//! Vote documents and derived tallies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of a vote on a review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    /// Review was helpful
    Up,
    /// Review was not helpful
    Down,
}

impl VoteType {
    /// Wire representation (`up` / `down`)
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::Up => "up",
            VoteType::Down => "down",
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(VoteType::Up),
            "down" => Ok(VoteType::Down),
            other => Err(format!("unknown vote type '{}'", other)),
        }
    }
}

/// A stored vote document. At most one exists per (review, user) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    /// Store-assigned document id
    pub id: String,
    /// Review being voted on
    pub review_id: String,
    /// User who cast the vote
    pub user_id: String,
    /// Current direction
    pub vote_type: VoteType,
    /// Time of the last cast or switch
    pub voted_at: DateTime<Utc>,
}

/// A vote that has not been assigned an id yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVote {
    /// Review being voted on
    pub review_id: String,
    /// User who cast the vote
    pub user_id: String,
    /// Direction
    pub vote_type: VoteType,
    /// Time of the cast
    pub voted_at: DateTime<Utc>,
}

impl NewVote {
    /// Build a vote cast right now
    pub fn now(review_id: &str, user_id: &str, vote_type: VoteType) -> Self {
        Self {
            review_id: review_id.to_string(),
            user_id: user_id.to_string(),
            vote_type,
            voted_at: Utc::now(),
        }
    }

    /// Attach an id, producing the stored document
    pub fn into_vote(self, id: String) -> Vote {
        Vote {
            id,
            review_id: self.review_id,
            user_id: self.user_id,
            vote_type: self.vote_type,
            voted_at: self.voted_at,
        }
    }
}

/// Aggregate counts for one review, computed on demand
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTally {
    /// Number of `up` votes
    pub upvotes: u64,
    /// Number of `down` votes
    pub downvotes: u64,
    /// The requesting user's current vote, if any
    pub user_vote: Option<VoteType>,
}

impl VoteTally {
    /// Count votes, picking out `user_id`'s own vote when given
    pub fn from_votes<'a, I>(votes: I, user_id: Option<&str>) -> Self
    where
        I: IntoIterator<Item = &'a Vote>,
    {
        let mut tally = VoteTally::default();
        for vote in votes {
            match vote.vote_type {
                VoteType::Up => tally.upvotes += 1,
                VoteType::Down => tally.downvotes += 1,
            }
            if user_id == Some(vote.user_id.as_str()) {
                tally.user_vote = Some(vote.vote_type);
            }
        }
        tally
    }
}
