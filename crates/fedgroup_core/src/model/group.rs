//! Group and user identifiers.
//!
//! # Invariants
//! - Normalized group ids are trimmed, non-empty, at most
//!   [`MAX_GROUP_ID_CHARS`] characters and free of control characters.
//! - A blank uid denotes the guest pseudo-user and never owns memberships.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Upper bound for group id length, in characters.
pub const MAX_GROUP_ID_CHARS: usize = 255;

static CONTROL_CHAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x1f\x7f]").expect("valid control char regex"));

/// Group identifier, unique string key for a group.
pub type GroupId = String;

/// User identifier as supplied by the host framework.
pub type UserId = String;

/// One stored membership pair: user `uid` belongs to group `gid`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Membership {
    pub uid: UserId,
    pub gid: GroupId,
}

/// Group identifier validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupIdError {
    Empty,
    TooLong { chars: usize },
    ControlCharacter(String),
}

impl Display for GroupIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "group id must not be empty"),
            Self::TooLong { chars } => write!(
                f,
                "group id has {chars} characters; at most {MAX_GROUP_ID_CHARS} allowed"
            ),
            Self::ControlCharacter(value) => {
                write!(f, "group id contains control characters: {value:?}")
            }
        }
    }
}

impl Error for GroupIdError {}

/// Trims and validates one group identifier.
pub fn normalize_group_id(value: &str) -> Result<GroupId, GroupIdError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GroupIdError::Empty);
    }

    let chars = trimmed.chars().count();
    if chars > MAX_GROUP_ID_CHARS {
        return Err(GroupIdError::TooLong { chars });
    }

    if CONTROL_CHAR_RE.is_match(trimmed) {
        return Err(GroupIdError::ControlCharacter(trimmed.to_string()));
    }

    Ok(trimmed.to_string())
}

/// Returns whether `uid` denotes the unauthenticated guest pseudo-user.
pub fn is_guest_uid(uid: &str) -> bool {
    uid.trim().is_empty()
}
