use chrono::Utc;
use clap::Args;
use mortgage_router::applications::{
    ApplicationId, ApplicationKind, ApplicationRepository, AssignmentScheduler,
};
use mortgage_router::error::AppError;
use mortgage_router::identity::{
    AccountService, AccountSettings, LogResetNotifier, Profile, Registration, UserId,
};
use mortgage_router::store::MemoryStore;
use std::collections::BTreeMap;
use std::sync::Arc;

const DEMO_PASSWORD: &str = "demo-password";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Number of reviewer accounts to create
    #[arg(long, default_value_t = 3)]
    pub(crate) reviewers: usize,
    /// Number of applications to submit
    #[arg(long, default_value_t = 10)]
    pub(crate) applications: usize,
}

#[derive(Debug, Default)]
pub(crate) struct DemoOutcome {
    pub(crate) reviewers: Vec<UserId>,
    pub(crate) assignments: Vec<(ApplicationId, UserId)>,
    pub(crate) deferred: Vec<(ApplicationId, String)>,
}

impl DemoOutcome {
    pub(crate) fn totals(&self) -> BTreeMap<UserId, usize> {
        let mut totals: BTreeMap<UserId, usize> =
            self.reviewers.iter().map(|id| (*id, 0)).collect();
        for (_, reviewer) in &self.assignments {
            *totals.entry(*reviewer).or_default() += 1;
        }
        totals
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    println!(
        "Round-robin assignment demo: {} reviewers, {} applications",
        args.reviewers, args.applications
    );
    let outcome = simulate(args.reviewers, args.applications)?;

    println!("\nAssignments");
    for (application, reviewer) in &outcome.assignments {
        println!("  application #{application} -> reviewer #{reviewer}");
    }
    if !outcome.deferred.is_empty() {
        println!("\nDeferred");
        for (application, reason) in &outcome.deferred {
            println!("  application #{application}: {reason}");
        }
    }

    println!("\nPer-reviewer totals");
    for (reviewer, count) in outcome.totals() {
        println!("  reviewer #{reviewer}: {count}");
    }
    Ok(())
}

/// Register `reviewers` reviewers and one broker, then submit and assign `applications`.
pub(crate) fn simulate(reviewers: usize, applications: usize) -> Result<DemoOutcome, AppError> {
    let store = Arc::new(MemoryStore::default());
    let accounts = AccountService::new(
        store.clone(),
        Arc::new(LogResetNotifier),
        AccountSettings::default(),
    );

    let mut outcome = DemoOutcome::default();
    for n in 1..=reviewers {
        let reviewer = accounts.create_reviewer(
            &format!("reviewer{n}@demo.local"),
            DEMO_PASSWORD,
            Profile::default(),
        )?;
        outcome.reviewers.push(reviewer.user_id);
    }
    let broker = accounts.register(Registration {
        email: "broker@demo.local".to_string(),
        password: DEMO_PASSWORD.to_string(),
        ..Registration::default()
    })?;

    let scheduler = AssignmentScheduler::new(store.clone());
    for n in 0..applications {
        let kind = if n % 2 == 0 {
            ApplicationKind::SelfApplicant
        } else {
            ApplicationKind::SomeoneElse
        };
        let application = store.insert_application(broker.user_id, kind, Utc::now())?;
        match scheduler.assign(application.id) {
            Ok(assignment) => outcome
                .assignments
                .push((assignment.application, assignment.reviewer)),
            Err(err) => outcome.deferred.push((application.id, err.to_string())),
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_rotate_through_reviewers() {
        let outcome = simulate(3, 7).expect("demo runs");
        let sequence: Vec<_> = outcome
            .assignments
            .iter()
            .map(|(_, reviewer)| *reviewer)
            .collect();
        let r = &outcome.reviewers;
        assert_eq!(sequence, vec![r[0], r[1], r[2], r[0], r[1], r[2], r[0]]);
        let totals: Vec<_> = outcome.totals().into_values().collect();
        assert_eq!(totals, vec![3, 2, 2]);
        assert!(outcome.deferred.is_empty());
    }

    #[test]
    fn without_reviewers_every_application_is_deferred() {
        let outcome = simulate(0, 2).expect("demo runs");
        assert!(outcome.assignments.is_empty());
        assert_eq!(outcome.deferred.len(), 2);
        assert!(outcome.totals().is_empty());
    }
}
