use crate::errors::{ErrorClass, TransitionError};
use crate::invariants::assert_valid_status_change;
use crate::machine::{
    available_actions, check_add_milestone, check_transition, Action, GuardContext, ReleasePolicy,
};
use crate::test_support::{addr, milestone, project};
use crate::types::{Approvers, MilestoneStatus, Project};
use crate::viewer::ViewerContext;

use MilestoneStatus::*;

fn ctx<'a>(project: &'a Project, viewer: &'a ViewerContext) -> GuardContext<'a> {
    GuardContext {
        project,
        viewer,
        release_policy: ReleasePolicy::default(),
    }
}

fn initializer(p: &Project) -> ViewerContext {
    ViewerContext::for_project(p, Some(p.initializer))
}

fn payee(p: &Project) -> ViewerContext {
    ViewerContext::for_project(p, Some(p.payee))
}

#[test]
fn test_initializer_funds_initialized_milestone() {
    let p = project(vec![milestone(0, Initialized)]);
    let viewer = initializer(&p);
    let t = check_transition(Action::Fund, &p.milestones[0], &ctx(&p, &viewer)).unwrap();
    assert_eq!(t.from, Initialized);
    assert_eq!(t.to, Funded);
    assert_valid_status_change(t.from, t.to);
}

#[test]
fn test_fund_from_review_is_rejected_and_state_unchanged() {
    let p = project(vec![milestone(0, Review)]);
    let before = p.milestones[0].clone();
    let viewer = initializer(&p);

    let err = check_transition(Action::Fund, &p.milestones[0], &ctx(&p, &viewer)).unwrap_err();
    assert_eq!(
        err,
        TransitionError::WrongState {
            action: Action::Fund,
            status: Review
        }
    );
    assert_eq!(p.milestones[0], before);
}

#[test]
fn test_every_action_from_wrong_state_is_rejected() {
    for status in MilestoneStatus::ALL {
        let p = project(vec![milestone(0, status)]);
        // A viewer holding every role, so only the status can fail the guard.
        let mut viewer = initializer(&p);
        viewer.is_payee = true;
        viewer.address = Some(addr(0xA1));
        for action in Action::ALL {
            let result = check_transition(action, &p.milestones[0], &ctx(&p, &viewer));
            if !action.sources().contains(&status) {
                assert!(
                    matches!(result, Err(TransitionError::WrongState { .. })),
                    "{action:?} from {status:?} should be refused"
                );
            }
        }
    }
}

#[test]
fn test_only_payee_marks_for_review() {
    let p = project(vec![milestone(0, Funded)]);
    let viewer = payee(&p);
    let t = check_transition(Action::MarkForReview, &p.milestones[0], &ctx(&p, &viewer)).unwrap();
    assert_eq!(t.to, Review);

    let viewer = initializer(&p);
    let err =
        check_transition(Action::MarkForReview, &p.milestones[0], &ctx(&p, &viewer)).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Authorization);
    assert_eq!(err.user_message(), "Only the worker can mark work for review");
}

#[test]
fn test_approver_and_initializer_may_approve() {
    let p = project(vec![milestone(0, Review)]);
    let approver = ViewerContext::for_project(&p, Some(addr(0xA2)));
    assert!(check_transition(Action::Approve, &p.milestones[0], &ctx(&p, &approver)).is_ok());

    let init = initializer(&p);
    assert!(check_transition(Action::Approve, &p.milestones[0], &ctx(&p, &init)).is_ok());

    let stranger = ViewerContext::for_project(&p, Some(addr(0xEE)));
    assert!(matches!(
        check_transition(Action::Approve, &p.milestones[0], &ctx(&p, &stranger)),
        Err(TransitionError::WrongRole { .. })
    ));
}

#[test]
fn test_unknown_approver_membership_defers_to_contract() {
    let mut m = milestone(0, Review);
    m.approvers = Approvers::opaque(2);
    let p = project(vec![m]);
    let someone = ViewerContext::for_project(&p, Some(addr(0xEE)));
    assert!(check_transition(Action::Approve, &p.milestones[0], &ctx(&p, &someone)).is_ok());
}

#[test]
fn test_initializer_cannot_approve_twice() {
    let mut m = milestone(0, Review);
    m.initializer_approval_required = true;
    m.initializer_has_approved = true;
    let p = project(vec![m]);
    let viewer = initializer(&p);
    assert_eq!(
        check_transition(Action::Approve, &p.milestones[0], &ctx(&p, &viewer)),
        Err(TransitionError::AlreadyApproved)
    );
}

#[test]
fn test_complete_requires_initializer_sign_off_when_required() {
    let mut m = milestone(0, Review);
    m.initializer_approval_required = true;
    let p = project(vec![m]);
    let viewer = initializer(&p);
    assert_eq!(
        check_transition(Action::Complete, &p.milestones[0], &ctx(&p, &viewer)),
        Err(TransitionError::ApprovalsPending {
            approved: 0,
            required: 3
        })
    );

    let mut m = milestone(0, Review);
    m.initializer_approval_required = true;
    m.initializer_has_approved = true;
    let p = project(vec![m]);
    let t = check_transition(Action::Complete, &p.milestones[0], &ctx(&p, &viewer)).unwrap();
    assert_eq!(t.to, Approved);
}

#[test]
fn test_approve_and_complete_reach_same_state() {
    let p = project(vec![milestone(0, Review)]);
    let viewer = initializer(&p);
    let approve = check_transition(Action::Approve, &p.milestones[0], &ctx(&p, &viewer)).unwrap();
    let complete =
        check_transition(Action::Complete, &p.milestones[0], &ctx(&p, &viewer)).unwrap();
    assert_eq!(approve.to, complete.to);
}

#[test]
fn test_release_follows_policy() {
    let p = project(vec![milestone(0, Approved)]);
    let payee_ctx = payee(&p);
    let init_ctx = initializer(&p);
    let m = &p.milestones[0];

    let mut guard = ctx(&p, &payee_ctx);
    guard.release_policy = ReleasePolicy::Payee;
    assert!(check_transition(Action::Release, m, &guard).is_ok());
    let mut guard = ctx(&p, &init_ctx);
    guard.release_policy = ReleasePolicy::Payee;
    assert!(check_transition(Action::Release, m, &guard).is_err());

    let mut guard = ctx(&p, &init_ctx);
    guard.release_policy = ReleasePolicy::Initializer;
    assert_eq!(check_transition(Action::Release, m, &guard).unwrap().to, Completed);

    assert!(check_transition(Action::Release, m, &ctx(&p, &payee_ctx)).is_ok());
    assert!(check_transition(Action::Release, m, &ctx(&p, &init_ctx)).is_ok());
}

#[test]
fn test_cancel_only_before_funding() {
    let p = project(vec![milestone(0, Initialized), milestone(1, Funded)]);
    let viewer = initializer(&p);
    assert_eq!(
        check_transition(Action::Cancel, &p.milestones[0], &ctx(&p, &viewer))
            .unwrap()
            .to,
        Cancelled
    );
    assert!(matches!(
        check_transition(Action::Cancel, &p.milestones[1], &ctx(&p, &viewer)),
        Err(TransitionError::WrongState { .. })
    ));
}

#[test]
fn test_edit_lock_blocks_structural_actions() {
    let mut m = milestone(0, Initialized);
    m.edit_locked = true;
    let p = project(vec![m]);
    let viewer = initializer(&p);
    let guard = ctx(&p, &viewer);
    for action in [Action::Fund, Action::AddTasks, Action::Edit] {
        assert_eq!(
            check_transition(action, &p.milestones[0], &guard),
            Err(TransitionError::EditLocked)
        );
    }
    // Extending the deadline is an explicit transition, not an edit.
    assert!(check_transition(Action::ExtendDeadline, &p.milestones[0], &guard).is_ok());
    assert!(check_transition(Action::Cancel, &p.milestones[0], &guard).is_ok());
}

#[test]
fn test_completed_project_locks_everything() {
    let mut p = project(vec![milestone(0, Initialized)]);
    p.completed = true;
    let viewer = initializer(&p);
    let guard = ctx(&p, &viewer);
    assert!(available_actions(&p.milestones[0], &guard).is_empty());
    assert_eq!(
        check_transition(Action::Fund, &p.milestones[0], &guard),
        Err(TransitionError::ProjectLocked(1))
    );
    assert_eq!(
        check_add_milestone(&p, &viewer),
        Err(TransitionError::ProjectLocked(1))
    );
}

#[test]
fn test_available_actions_per_role() {
    let p = project(vec![
        milestone(0, Initialized),
        milestone(1, Funded),
        milestone(2, Review),
        milestone(3, Approved),
        milestone(4, Completed),
    ]);
    let init = initializer(&p);
    let pay = payee(&p);

    assert_eq!(
        available_actions(&p.milestones[0], &ctx(&p, &init)),
        vec![
            Action::Fund,
            Action::Cancel,
            Action::ExtendDeadline,
            Action::AddTasks,
            Action::Edit
        ]
    );
    // Funded milestones are edit-locked.
    assert_eq!(
        available_actions(&p.milestones[1], &ctx(&p, &init)),
        vec![Action::ExtendDeadline]
    );
    assert_eq!(
        available_actions(&p.milestones[1], &ctx(&p, &pay)),
        vec![Action::MarkForReview]
    );
    assert_eq!(
        available_actions(&p.milestones[2], &ctx(&p, &init)),
        vec![Action::Approve, Action::Complete]
    );
    assert!(available_actions(&p.milestones[2], &ctx(&p, &pay)).is_empty());
    assert_eq!(
        available_actions(&p.milestones[3], &ctx(&p, &pay)),
        vec![Action::Release]
    );
    assert!(available_actions(&p.milestones[4], &ctx(&p, &init)).is_empty());
}

#[test]
fn test_anonymous_viewer_gets_no_actions() {
    let p = project(vec![milestone(0, Initialized), milestone(1, Review)]);
    let viewer = ViewerContext::anonymous();
    for m in &p.milestones {
        assert!(available_actions(m, &ctx(&p, &viewer)).is_empty());
    }
}

#[test]
fn test_only_initializer_adds_milestones() {
    let p = project(vec![]);
    assert!(check_add_milestone(&p, &initializer(&p)).is_ok());
    assert!(matches!(
        check_add_milestone(&p, &payee(&p)),
        Err(TransitionError::WrongRole { .. })
    ));
}
