//! Shared domain vocabulary: identifiers, relation kinds, ranking dimensions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// User identifier, matching the relational `BIGINT` column type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub i64);

/// Post identifier, matching the relational `BIGINT` column type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PostId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for UserId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<i64> for PostId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

/// Relationship edge kinds tracked by the mutation layer.
///
/// Each kind is stored in the fast store as a forward/inverse membership-set
/// pair and carries its own persistence policy (immediate for follow/block,
/// batched for like/favorite).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Follow,
    Like,
    Favorite,
    Block,
}

impl RelationKind {
    pub const ALL: [RelationKind; 4] = [
        RelationKind::Follow,
        RelationKind::Like,
        RelationKind::Favorite,
        RelationKind::Block,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::Follow => "follow",
            RelationKind::Like => "like",
            RelationKind::Favorite => "favorite",
            RelationKind::Block => "block",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-dimension ranking axes maintained by the ranking engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Likes,
    Favorites,
    Comments,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Likes, Dimension::Favorites, Dimension::Comments];

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Likes => "likes",
            Dimension::Favorites => "favorites",
            Dimension::Comments => "comments",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hot-ranking time periods. All periods share the composite formula and
/// differ only in pruning policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
    AllTime,
}

impl Period {
    pub const ALL: [Period; 4] = [
        Period::Daily,
        Period::Weekly,
        Period::Monthly,
        Period::AllTime,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
            Period::AllTime => "alltime",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engagement events consumed by the ranking engine.
///
/// Mutation call sites publish these instead of touching ranking keys
/// directly, so the composite-score invariant lives in exactly one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementEvent {
    Like,
    Unlike,
    Favorite,
    Unfavorite,
    Comment,
    Uncomment,
}

impl EngagementEvent {
    /// Dimension the event adjusts.
    pub fn dimension(self) -> Dimension {
        match self {
            EngagementEvent::Like | EngagementEvent::Unlike => Dimension::Likes,
            EngagementEvent::Favorite | EngagementEvent::Unfavorite => Dimension::Favorites,
            EngagementEvent::Comment | EngagementEvent::Uncomment => Dimension::Comments,
        }
    }

    /// Signed adjustment applied to the dimension score.
    pub fn delta(self) -> f64 {
        match self {
            EngagementEvent::Like | EngagementEvent::Favorite | EngagementEvent::Comment => 1.0,
            EngagementEvent::Unlike
            | EngagementEvent::Unfavorite
            | EngagementEvent::Uncomment => -1.0,
        }
    }
}
