//! Property-based tests for the lifecycle model.

use proptest::prelude::*;

use crate::aggregate::{approval_progress, progress, total_value, value_locked};
use crate::invariants::{assert_all_project_invariants, assert_valid_status_change};
use crate::machine::{available_actions, check_transition, Action, GuardContext, ReleasePolicy};
use crate::test_support::{addr, milestone, project};
use crate::types::{Address, Approvers, Milestone, MilestoneStatus, Project};
use crate::viewer::ViewerContext;

// ===== STRATEGY HELPERS =====

fn any_status() -> impl Strategy<Value = MilestoneStatus> {
    prop_oneof![
        Just(MilestoneStatus::Initialized),
        Just(MilestoneStatus::Funded),
        Just(MilestoneStatus::Review),
        Just(MilestoneStatus::Approved),
        Just(MilestoneStatus::Completed),
        Just(MilestoneStatus::Cancelled),
    ]
}

fn any_action() -> impl Strategy<Value = Action> {
    (0..Action::ALL.len()).prop_map(|i| Action::ALL[i])
}

fn any_policy() -> impl Strategy<Value = ReleasePolicy> {
    prop_oneof![
        Just(ReleasePolicy::Payee),
        Just(ReleasePolicy::Initializer),
        Just(ReleasePolicy::InitializerOrPayee),
    ]
}

fn any_milestone() -> impl Strategy<Value = Milestone> {
    (
        any_status(),
        1u128..1_000_000_000_000u128,
        0u64..4,
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(status, amount, approver_count, locked, required, approved)| {
                let mut m = milestone(0, status);
                m.amount = amount;
                m.approvers = Approvers::opaque(approver_count);
                m.edit_locked = locked;
                m.initializer_approval_required = required;
                m.initializer_has_approved = approved;
                m
            },
        )
}

fn any_project() -> impl Strategy<Value = Project> {
    (prop::collection::vec(any_milestone(), 0..8), any::<bool>()).prop_map(
        |(milestones, completed)| {
            let milestones = milestones
                .into_iter()
                .enumerate()
                .map(|(i, mut m)| {
                    m.index = i as u64;
                    m
                })
                .collect::<Vec<_>>();
            let all_terminal = milestones.iter().all(|m| m.status.is_terminal());
            let mut p = project(milestones);
            p.completed = completed && all_terminal;
            p
        },
    )
}

fn any_viewer_address() -> impl Strategy<Value = Option<Address>> {
    prop_oneof![
        Just(None),
        Just(Some(addr(0x11))),
        Just(Some(addr(0x22))),
        Just(Some(addr(0xA1))),
        Just(Some(addr(0xEE))),
    ]
}

// ===== AGGREGATION =====

proptest! {
    /// Property: progress stays within [0, 1] and derived values are consistent
    #[test]
    fn test_project_invariants_hold(p in any_project()) {
        assert_all_project_invariants(&p);
        prop_assert!(value_locked(&p) <= total_value(&p));
        let prog = progress(&p);
        prop_assert!(prog.done <= prog.total);
    }

    /// Property: recording the initializer's sign-off never lowers approval progress
    #[test]
    fn test_approval_progress_monotonic(mut m in any_milestone()) {
        m.initializer_has_approved = false;
        let before = approval_progress(&m);
        m.initializer_has_approved = true;
        let after = approval_progress(&m);
        prop_assert!(after.ratio() >= before.ratio());
        prop_assert!(after.ratio() <= 1.0);
        prop_assert_eq!(before.required, after.required);
    }
}

// ===== GUARDS =====

proptest! {
    /// Property: a passing guard always describes a legal lifecycle step
    #[test]
    fn test_passing_guard_is_legal_step(
        p in any_project(),
        action in any_action(),
        viewer in any_viewer_address(),
        policy in any_policy(),
    ) {
        let viewer = ViewerContext::for_project(&p, viewer);
        let ctx = GuardContext { project: &p, viewer: &viewer, release_policy: policy };
        for m in &p.milestones {
            if let Ok(t) = check_transition(action, m, &ctx) {
                prop_assert_eq!(t.from, m.status);
                prop_assert!(action.sources().contains(&m.status));
                assert_valid_status_change(t.from, t.to);
            }
        }
    }

    /// Property: guards never mutate the milestone they inspect
    #[test]
    fn test_guard_never_mutates(m in any_milestone(), action in any_action()) {
        let p = project(vec![m]);
        let before = p.clone();
        let viewer = ViewerContext::for_project(&p, Some(p.initializer));
        let ctx = GuardContext { project: &p, viewer: &viewer, release_policy: ReleasePolicy::default() };
        let _ = check_transition(action, &p.milestones[0], &ctx);
        prop_assert_eq!(p, before);
    }

    /// Property: terminal milestones and locked projects offer nothing
    #[test]
    fn test_terminal_offers_no_actions(p in any_project(), viewer in any_viewer_address()) {
        let viewer = ViewerContext::for_project(&p, viewer);
        let ctx = GuardContext { project: &p, viewer: &viewer, release_policy: ReleasePolicy::default() };
        for m in &p.milestones {
            if m.status.is_terminal() || p.completed {
                prop_assert!(available_actions(m, &ctx).is_empty());
            }
        }
    }

    /// Property: anonymous viewers can never act
    #[test]
    fn test_anonymous_viewer_never_acts(m in any_milestone(), action in any_action()) {
        let p = project(vec![m]);
        let viewer = ViewerContext::anonymous();
        let ctx = GuardContext { project: &p, viewer: &viewer, release_policy: ReleasePolicy::default() };
        prop_assert!(check_transition(action, &p.milestones[0], &ctx).is_err());
    }
}
