//! Round-robin reviewer assignment.
//!
//! The cursor is the id of the last reviewer handed an application. Selection is a pure
//! function of the sorted roster and that cursor; the backend applies the read, the
//! selection, and both writes (application + cursor) as a single transaction, so two
//! concurrent submissions can never read the same stale cursor. Document rows filed with a
//! submission land in that same transaction.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::domain::{ApplicationId, Document, NewDocument};
use crate::identity::UserId;
use crate::store::RepositoryError;

/// Roster snapshot taken inside the assignment transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewerRoster {
    /// Reviewer ids, ascending.
    pub reviewers: Vec<UserId>,
    pub cursor: Option<UserId>,
}

/// Pick the reviewer after `cursor` in `reviewers` (ascending), wrapping to the first.
///
/// An unset cursor, or one naming a reviewer no longer on the roster, restarts at the first
/// reviewer. Returns `None` only for an empty roster.
pub fn next_reviewer(reviewers: &[UserId], cursor: Option<UserId>) -> Option<UserId> {
    debug_assert!(reviewers.windows(2).all(|pair| pair[0] < pair[1]));
    let first = *reviewers.first()?;
    let Some(cursor) = cursor else {
        return Some(first);
    };
    let next = reviewers
        .iter()
        .position(|id| *id == cursor)
        .and_then(|index| reviewers.get(index + 1))
        .copied()
        .unwrap_or(first);
    Some(next)
}

/// Transactional home of the assignment cursor.
pub trait AssignmentLedger: Send + Sync {
    /// In one transaction: require `application` to exist and be unassigned, insert
    /// `documents`, load the roster and cursor, run `select`, then write the chosen reviewer
    /// to the application and the cursor. Nothing is written on any error.
    fn commit_submission(
        &self,
        application: ApplicationId,
        documents: Vec<NewDocument>,
        select: &dyn Fn(&ReviewerRoster) -> Option<UserId>,
    ) -> Result<(UserId, Vec<Document>), AssignmentError>;

    /// [`commit_submission`](Self::commit_submission) with no documents.
    fn commit_assignment(
        &self,
        application: ApplicationId,
        select: &dyn Fn(&ReviewerRoster) -> Option<UserId>,
    ) -> Result<UserId, AssignmentError> {
        self.commit_submission(application, Vec::new(), select)
            .map(|(reviewer, _)| reviewer)
    }

    fn cursor(&self) -> Result<Option<UserId>, RepositoryError>;
}

/// Outcome of a successful assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub application: ApplicationId,
    pub reviewer: UserId,
}

/// Assigns each submitted application to exactly one reviewer.
pub struct AssignmentScheduler<L> {
    ledger: Arc<L>,
}

impl<L> AssignmentScheduler<L>
where
    L: AssignmentLedger + 'static,
{
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }

    pub fn assign(&self, application: ApplicationId) -> Result<Assignment, AssignmentError> {
        self.assign_with(application, Vec::new())
            .map(|(assignment, _)| assignment)
    }

    /// Record `documents` and assign `application` together; neither happens without the
    /// other.
    pub fn assign_with(
        &self,
        application: ApplicationId,
        documents: Vec<NewDocument>,
    ) -> Result<(Assignment, Vec<Document>), AssignmentError> {
        let selected =
            self.ledger
                .commit_submission(application, documents, &|roster: &ReviewerRoster| {
                    next_reviewer(&roster.reviewers, roster.cursor)
                });

        match selected {
            Ok((reviewer, documents)) => {
                info!(
                    application_id = %application,
                    reviewer_id = %reviewer,
                    documents = documents.len(),
                    "application assigned"
                );
                let assignment = Assignment {
                    application,
                    reviewer,
                };
                Ok((assignment, documents))
            }
            Err(err) => {
                warn!(application_id = %application, error = %err, "assignment failed");
                Err(err)
            }
        }
    }

    /// Last reviewer assigned, if any.
    pub fn cursor(&self) -> Result<Option<UserId>, AssignmentError> {
        Ok(self.ledger.cursor()?)
    }
}

/// Error raised while assigning an application.
#[derive(Debug, thiserror::Error)]
pub enum AssignmentError {
    #[error("no reviewers available; retry once a reviewer exists")]
    NoReviewersAvailable,
    #[error("application {0} not found")]
    ApplicationNotFound(ApplicationId),
    #[error("application {application} is already assigned to reviewer {reviewer}")]
    AlreadyAssigned {
        application: ApplicationId,
        reviewer: UserId,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[i64]) -> Vec<UserId> {
        raw.iter().copied().map(UserId).collect()
    }

    #[test]
    fn empty_roster_selects_nobody() {
        assert_eq!(next_reviewer(&[], None), None);
        assert_eq!(next_reviewer(&[], Some(UserId(3))), None);
    }

    #[test]
    fn unset_cursor_starts_at_lowest_id() {
        assert_eq!(next_reviewer(&ids(&[3, 7, 9]), None), Some(UserId(3)));
    }

    #[test]
    fn cursor_advances_and_wraps() {
        let roster = ids(&[3, 7, 9]);
        assert_eq!(next_reviewer(&roster, Some(UserId(3))), Some(UserId(7)));
        assert_eq!(next_reviewer(&roster, Some(UserId(7))), Some(UserId(9)));
        assert_eq!(next_reviewer(&roster, Some(UserId(9))), Some(UserId(3)));
    }

    #[test]
    fn departed_cursor_falls_back_to_first() {
        assert_eq!(
            next_reviewer(&ids(&[3, 9]), Some(UserId(7))),
            Some(UserId(3))
        );
    }

    #[test]
    fn single_reviewer_always_selected() {
        let roster = ids(&[5]);
        assert_eq!(next_reviewer(&roster, None), Some(UserId(5)));
        assert_eq!(next_reviewer(&roster, Some(UserId(5))), Some(UserId(5)));
    }
}
