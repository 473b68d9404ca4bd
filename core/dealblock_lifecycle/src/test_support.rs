use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::types::{Address, Approvers, Milestone, MilestoneStatus, Project, Task};

pub fn addr(byte: u8) -> Address {
    Address::from_bytes([byte; 20])
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

/// A 5000-unit milestone with approvers `0xA1…` and `0xA2…`, ending two
/// weeks after [`base_time`]. Edit-locked once past `Initialized`.
pub fn milestone(index: u64, status: MilestoneStatus) -> Milestone {
    Milestone {
        index,
        amount: 5000,
        starting_at: base_time(),
        ending_at: base_time() + Duration::days(14),
        status,
        approvers: Approvers::from_addresses(vec![addr(0xA1), addr(0xA2)]),
        tasks: vec![Task::new("Homepage Redesign", "Design and implement new homepage")],
        edit_locked: status != MilestoneStatus::Initialized,
        initializer_approval_required: false,
        initializer_has_approved: false,
    }
}

/// Project 1: initializer `0x11…`, payee `0x22…`, token `0x33…`, vault `0x44…`.
pub fn project(milestones: Vec<Milestone>) -> Project {
    Project {
        id: 1,
        vault: addr(0x44),
        initializer: addr(0x11),
        payee: addr(0x22),
        token: addr(0x33),
        completed: false,
        milestones,
        title: Some("Website Redesign Project".to_string()),
        description: None,
    }
}

pub fn project_with_statuses(statuses: &[MilestoneStatus]) -> Project {
    project(
        statuses
            .iter()
            .enumerate()
            .map(|(i, s)| milestone(i as u64, *s))
            .collect(),
    )
}
