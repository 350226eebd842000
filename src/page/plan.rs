//! Page plans: which queries a page's snapshot must contain.

use serde_json::{Value, json};

use crate::domain::identity::PageIdentity;
use crate::rpc::procedures;

/// A query to prefetch into a page snapshot.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub procedure: &'static str,
    pub input: Value,
}

impl QuerySpec {
    pub fn new(procedure: &'static str, input: Value) -> Self {
        Self { procedure, input }
    }
}

/// Maps a page identity to the query set its snapshot must contain.
pub trait PagePlan: Send + Sync {
    fn queries(&self, identity: &PageIdentity) -> Vec<QuerySpec>;
}

/// Profile page plan: one profile lookup keyed by the identity's username.
pub struct ProfilePagePlan;

impl PagePlan for ProfilePagePlan {
    fn queries(&self, identity: &PageIdentity) -> Vec<QuerySpec> {
        vec![QuerySpec::new(
            procedures::PROFILE_GET_USER,
            json!({"username": identity.as_str()}),
        )]
    }
}
