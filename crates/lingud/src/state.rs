//! Shared state handed to every request

use std::sync::Arc;
use std::time::Duration;

use ttlcache::{CachedService, TtlCache};
use votestore::{VoteLedger, VoteStore, VoteTally};

/// Ledger plus the tally cache in front of it
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<VoteLedger>,
    pub tallies: Arc<CachedService<VoteTally>>,
}

impl AppState {
    pub fn new(store: Arc<dyn VoteStore>, cache: Arc<TtlCache<VoteTally>>, ttl: Duration) -> Self {
        Self {
            ledger: Arc::new(VoteLedger::new(store)),
            tallies: Arc::new(CachedService::new(cache, ttl)),
        }
    }
}
