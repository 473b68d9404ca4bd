use crate::aggregate::{approval_progress, progress};
use crate::machine::is_forward_step;
use crate::types::{Milestone, MilestoneStatus, Project};

/// INV-1: Progress stays within `[0, 1]`.
pub fn assert_progress_bounded(project: &Project) {
    let ratio = progress(project).ratio();
    assert!(
        (0.0..=1.0).contains(&ratio),
        "INV-1 violated: project {} progress {} out of range",
        project.id,
        ratio
    );
}

/// INV-2: A project marked completed has only terminal milestones.
pub fn assert_completed_project_is_terminal(project: &Project) {
    if project.completed {
        assert!(
            project.milestones.iter().all(|m| m.status.is_terminal()),
            "INV-2 violated: project {} completed with open milestones",
            project.id
        );
    }
}

/// INV-3: Milestone indices are sequential starting from 0.
pub fn assert_sequential_indices(project: &Project) {
    for (i, milestone) in project.milestones.iter().enumerate() {
        assert_eq!(
            milestone.index, i as u64,
            "INV-3 violated: expected index {}, got {}",
            i, milestone.index
        );
    }
}

/// INV-4: Approval progress never exceeds 1.
pub fn assert_approval_progress_bounded(milestone: &Milestone) {
    let p = approval_progress(milestone);
    assert!(
        p.approved <= p.required || p.required == 0,
        "INV-4 violated: milestone {} approved {} of {}",
        milestone.index,
        p.approved,
        p.required
    );
    assert!(p.ratio() <= 1.0, "INV-4 violated: ratio above 1");
}

/// INV-5: Status only changes along the lifecycle graph.
pub fn assert_valid_status_change(from: MilestoneStatus, to: MilestoneStatus) {
    assert!(
        from == to || is_forward_step(from, to),
        "INV-5 violated: invalid status change from {:?} to {:?}",
        from,
        to
    );
}

/// Run all stateless project invariants.
pub fn assert_all_project_invariants(project: &Project) {
    assert_progress_bounded(project);
    assert_completed_project_is_terminal(project);
    assert_sequential_indices(project);
    for milestone in &project.milestones {
        assert_approval_progress_bounded(milestone);
    }
}
