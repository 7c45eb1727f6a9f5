//! Identifier and row types for seats and users.
//!
//! Ids are `i32` newtypes because the backing table uses `SERIAL` keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a user (claimant).
///
/// Users carry no mutable state; they exist only as identifiers passed into
/// claim attempts.
///
/// # Examples
///
/// ```
/// use seatclaim_core::UserId;
///
/// let user = UserId::new(42);
/// assert_eq!(user.get(), 42);
/// assert_eq!(user.to_string(), "42");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i32);

impl UserId {
    /// Create a new `UserId`.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for UserId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// Identifier of a seat (resource). Immutable once assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatId(i32);

impl SeatId {
    /// Create a new `SeatId`.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for SeatId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// Version stamp of a seat row, used by optimistic claims.
///
/// Starts at 1 and is incremented exactly once per successful binding.
///
/// # Examples
///
/// ```
/// use seatclaim_core::SeatVersion;
///
/// let v = SeatVersion::initial();
/// assert_eq!(v.get(), 1);
/// assert_eq!(v.next().map(SeatVersion::get), Some(2));
/// assert_eq!(SeatVersion::new(i32::MAX).next(), None);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatVersion(i32);

impl SeatVersion {
    /// Create a version from its raw value.
    #[must_use]
    pub const fn new(version: i32) -> Self {
        Self(version)
    }

    /// The version every freshly seeded seat starts at.
    #[must_use]
    pub const fn initial() -> Self {
        Self(1)
    }

    /// Get the raw version number.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }

    /// The version a successful bind moves the row to.
    ///
    /// `None` once the column is exhausted; such a row can no longer be bound.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl Default for SeatVersion {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for SeatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A seat row as read from the store.
///
/// A seat with `owner == None` is *free*; otherwise it is *bound*. Normal
/// allocation never moves a bound seat back to free.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    /// Seat identifier
    pub id: SeatId,
    /// Owning user, if bound
    pub owner: Option<UserId>,
    /// Current row version
    pub version: SeatVersion,
}

impl Seat {
    /// A free seat at the initial version.
    #[must_use]
    pub const fn free(id: SeatId) -> Self {
        Self {
            id,
            owner: None,
            version: SeatVersion::initial(),
        }
    }

    /// Whether no user owns this seat.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.owner.is_none()
    }
}
