//! # votestore
//!
//! Review votes for LingUBible: the vote document store and the ledger
//! that keeps one vote per (review, user) pair.
//!
//! ## Layers
//! - **VoteStore**: CRUD trait with a unique (review, user) index
//! - **MemoryVoteStore / FileVoteStore**: volatile and append-log backends
//! - **VoteLedger**: cast / switch / toggle-off / withdraw, then recount

#![warn(missing_docs)]

mod error;
mod ledger;
mod model;
mod parser;
mod storage;
mod store;

pub use error::{Error, Result};
pub use ledger::{
    LedgerError, RawVoteRequest, VoteAction, VoteLedger, VoteOutcome, VoteRequest, VoteResponse,
    INTERNAL_ERROR_MESSAGE, TALLY_SCAN_LIMIT,
};
pub use model::{NewVote, Vote, VoteTally, VoteType};
pub use storage::FileVoteStore;
pub use store::{MemoryVoteStore, VoteStore};
