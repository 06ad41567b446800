//! Graph expansion stage.
//!
//! For every direct match, fetches bounded neighbourhoods over three
//! relations (thread, case, shared people). All branch queries for a call
//! are issued concurrently and joined before merging. A failing branch is
//! logged and contributes nothing; it never fails the call.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RetrievalError;
use crate::models::Candidate;
use crate::store::{Relation, Store};

/// Which expansion branches to run when graph expansion is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionBranches {
    pub threads: bool,
    pub cases: bool,
    pub people: bool,
}

impl Default for ExpansionBranches {
    fn default() -> Self {
        Self {
            threads: true,
            cases: true,
            people: true,
        }
    }
}

impl ExpansionBranches {
    pub fn enabled(&self, relation: Relation) -> bool {
        match relation {
            Relation::ThreadMember => self.threads,
            Relation::SameCase => self.cases,
            Relation::SharedParticipant => self.people,
        }
    }
}

/// Union of all branch hits for one call, duplicates included.
#[derive(Debug, Default)]
pub struct Expansion {
    pub candidates: Vec<Candidate>,
    pub failed_branches: usize,
}

/// Expand `seeds` over the enabled relations, at most `branch_limit`
/// emails per (seed, relation) branch.
///
/// Expansion hits carry a similarity of `0.0` and the origin tag of the
/// relation that produced them.
///
/// # Errors
///
/// Only [`RetrievalError::Cancelled`], when `cancel` fires before all
/// branches have completed. In-flight branch results are discarded.
pub async fn expand_graph<S: Store + ?Sized>(
    store: &S,
    seeds: &[Candidate],
    branches: ExpansionBranches,
    branch_limit: usize,
    cancel: &CancellationToken,
) -> Result<Expansion, RetrievalError> {
    if cancel.is_cancelled() {
        return Err(RetrievalError::Cancelled);
    }
    if branch_limit == 0 {
        return Ok(Expansion::default());
    }

    let mut calls = Vec::new();
    for seed in seeds {
        for relation in Relation::ALL {
            if !branches.enabled(relation) {
                continue;
            }
            if relation == Relation::SameCase && seed.email.dossier_id.is_none() {
                continue;
            }
            let seed_id = seed.email.id.clone();
            calls.push(async move {
                let result = store
                    .traverse(std::slice::from_ref(&seed_id), relation, branch_limit)
                    .await;
                (seed_id, relation, result)
            });
        }
    }

    let branch_count = calls.len();
    let outcomes = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(RetrievalError::Cancelled),
        outcomes = join_all(calls) => outcomes,
    };

    let mut expansion = Expansion::default();
    for (seed_id, relation, result) in outcomes {
        match result {
            Ok(mut hits) => {
                hits.truncate(branch_limit);
                expansion
                    .candidates
                    .extend(hits.into_iter().map(|email| Candidate {
                        email,
                        similarity: 0.0,
                        origin: relation.origin(),
                    }));
            }
            Err(source) => {
                let err = RetrievalError::ExpansionBranch {
                    email_id: seed_id.clone(),
                    relation,
                    source,
                };
                warn!(
                    email_id = %seed_id,
                    relation = %relation,
                    error = %err,
                    "expansion branch failed; treating as empty"
                );
                expansion.failed_branches += 1;
            }
        }
    }

    debug!(
        branches = branch_count,
        failed = expansion.failed_branches,
        hits = expansion.candidates.len(),
        "graph expansion complete"
    );

    Ok(expansion)
}
