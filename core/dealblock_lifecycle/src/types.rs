//! # Types
//!
//! Shared data structures used across all modules of the DealBlock lifecycle.
//!
//! ## Design decisions
//!
//! ### Chain is the source of truth
//!
//! Every [`Project`] and [`Milestone`] value is a snapshot of what the
//! DealBlock contract reported on the last read. Nothing in this crate
//! mutates a snapshot to reflect a transition; callers re-read after a
//! transaction is confirmed.
//!
//! ### Status as a Finite-State Machine
//!
//! [`MilestoneStatus`] follows a forward-only lifecycle:
//!
//! ```text
//! Initialized ──► Funded ──► Review ──► Approved ──► Completed
//!      └──► Cancelled
//! ```
//!
//! The ordinal of each status (0–5) is part of the contract's wire format.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// A 20-byte EVM account or contract address.
///
/// Rendered as lowercase `0x`-prefixed hex; parsing is case-insensitive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Parse a `0x` + 40 hex character address. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| ValidationError::InvalidAddress(raw.to_string()))?;
        if digits.len() != 40 {
            return Err(ValidationError::InvalidAddress(raw.to_string()));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|_| ValidationError::InvalidAddress(raw.to_string()))?;
        Ok(Address(bytes))
    }

    /// `0x1234…5678` form used on project cards.
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}…{}", &full[..6], &full[full.len() - 4..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

/// Lifecycle status of a milestone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneStatus {
    /// Created, not yet funded. Still editable.
    Initialized,
    /// Funds are held in the project vault.
    Funded,
    /// Payee marked the work as ready; approvers are signing off.
    Review,
    /// Sign-off complete; funds may be released.
    Approved,
    /// Funds released to the payee.
    Completed,
    /// Abandoned before funding.
    Cancelled,
}

impl MilestoneStatus {
    /// Statuses in wire-ordinal order.
    pub const ALL: [MilestoneStatus; 6] = [
        MilestoneStatus::Initialized,
        MilestoneStatus::Funded,
        MilestoneStatus::Review,
        MilestoneStatus::Approved,
        MilestoneStatus::Completed,
        MilestoneStatus::Cancelled,
    ];

    /// Decode the contract's `uint8` status.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// The contract's `uint8` status.
    pub fn code(self) -> u8 {
        match self {
            Self::Initialized => 0,
            Self::Funded => 1,
            Self::Review => 2,
            Self::Approved => 3,
            Self::Completed => 4,
            Self::Cancelled => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Funded but not yet released: the milestone's amount sits in the vault.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Funded | Self::Review | Self::Approved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::Funded => "FUNDED",
            Self::Review => "REVIEW",
            Self::Approved => "APPROVED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Presentation attributes for badges and timeline nodes.
    pub fn display(self) -> StatusDisplay {
        let (label, icon, tone) = match self {
            Self::Initialized => ("Initialized", "circle-dot", StatusTone::Muted),
            Self::Funded => ("Funded", "dollar-sign", StatusTone::Primary),
            Self::Review => ("In Review", "clock", StatusTone::Warning),
            Self::Approved => ("Approved", "check-circle", StatusTone::Success),
            Self::Completed => ("Completed", "check-circle", StatusTone::Success),
            Self::Cancelled => ("Cancelled", "x-circle", StatusTone::Destructive),
        };
        StatusDisplay { label, icon, tone }
    }
}

impl fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Colour family a status is rendered with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTone {
    Muted,
    Primary,
    Warning,
    Success,
    Destructive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StatusDisplay {
    pub label: &'static str,
    pub icon: &'static str,
    pub tone: StatusTone,
}

/// A descriptive work item attached to a milestone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub title: String,
    pub description: String,
}

impl Task {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Task {
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Approvers required to sign off a milestone.
///
/// `getMilestone` reports only how many approvers a milestone has, so the
/// member addresses are known only when they were supplied by the caller
/// (for instance when the milestone was created through this client).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approvers {
    count: u64,
    known: Vec<Address>,
}

impl Approvers {
    /// A fully known approver set.
    pub fn from_addresses(addresses: Vec<Address>) -> Self {
        Approvers {
            count: addresses.len() as u64,
            known: addresses,
        }
    }

    /// An approver set of which only the size is known.
    pub fn opaque(count: u64) -> Self {
        Approvers {
            count,
            known: Vec::new(),
        }
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn known(&self) -> &[Address] {
        &self.known
    }

    pub fn is_fully_known(&self) -> bool {
        self.known.len() as u64 >= self.count
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.known.contains(address)
    }

    /// `true` unless membership is known and excludes `address`.
    pub fn may_contain(&self, address: &Address) -> bool {
        self.contains(address) || !self.is_fully_known()
    }
}

/// A single milestone as read from the contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    /// Zero-based position within the project.
    pub index: u64,
    /// Funding amount in the token's smallest unit.
    #[serde(with = "amount_string")]
    pub amount: u128,
    pub starting_at: DateTime<Utc>,
    pub ending_at: DateTime<Utc>,
    pub status: MilestoneStatus,
    pub approvers: Approvers,
    pub tasks: Vec<Task>,
    pub edit_locked: bool,
    pub initializer_approval_required: bool,
    pub initializer_has_approved: bool,
}

/// Full client-side representation of a DealBlock project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Identifier assigned by the contract.
    pub id: u64,
    /// Custody address holding the project's funds.
    pub vault: Address,
    pub initializer: Address,
    pub payee: Address,
    /// Payment token used by every milestone.
    pub token: Address,
    /// Set by the contract once every milestone is terminal.
    pub completed: bool,
    pub milestones: Vec<Milestone>,
    /// Title and description are submitted at creation but not returned by
    /// `getProject`; they are present only when known to the caller.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Project {
    pub fn milestone(&self, index: u64) -> Option<&Milestone> {
        self.milestones.iter().find(|m| m.index == index)
    }
}

/// Serialize `u128` token amounts as decimal strings so JSON consumers
/// never round them through a float.
pub mod amount_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
