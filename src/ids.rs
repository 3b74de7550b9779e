//! Marking identifiers and their sequential allocation.
//!
//! An identifier is the kind prefix (`F` or `B`) followed by six lowercase hex
//! digits, giving `16^6` identifiers per kind. Allocation is strictly sequential:
//! an [`IdentifierAllocator`] is a single-owner value that hands out the next
//! identifier through `&mut self`. It is not meant to be shared between workers;
//! parallel units produce id-less candidates and [`assign_marking_ids`] numbers
//! them in one pass after every unit has finished.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppResult, CatalogError};
use crate::markings::{Blotch, Fan, MarkingGeometry, MarkingKind};

/// Number of identifiers available per marking kind.
pub const ID_SPACE: u32 = 1 << 24;

const ID_DIGITS: usize = 6;

/// A globally unique marking identifier such as `F00abcd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MarkingId {
    kind: MarkingKind,
    index: u32,
}

impl MarkingId {
    /// Builds an identifier, rejecting indices outside the id space.
    pub fn new(kind: MarkingKind, index: u32) -> AppResult<Self> {
        if index >= ID_SPACE {
            return Err(CatalogError::IdentifierExhaustion { kind });
        }
        Ok(Self { kind, index })
    }

    /// Marking kind encoded in the prefix.
    pub fn kind(&self) -> MarkingKind {
        self.kind
    }

    /// Position of this identifier in its kind's sequence.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for MarkingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:06x}", self.kind.id_prefix(), self.index)
    }
}

impl FromStr for MarkingId {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CatalogError::InvalidMarkingId(s.to_string());
        let mut chars = s.chars();
        let kind = match chars.next() {
            Some('F') => MarkingKind::Fan,
            Some('B') => MarkingKind::Blotch,
            _ => return Err(invalid()),
        };
        let digits = chars.as_str();
        if digits.len() != ID_DIGITS
            || !digits
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(invalid());
        }
        let index = u32::from_str_radix(digits, 16).map_err(|_| invalid())?;
        Ok(Self { kind, index })
    }
}

impl TryFrom<String> for MarkingId {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MarkingId> for String {
    fn from(value: MarkingId) -> Self {
        value.to_string()
    }
}

/// Sequential identifier source for one marking kind.
///
/// Not safe for concurrent invocation: every call takes `&mut self`, and the
/// allocator is deliberately neither `Clone` nor shared through the worker pool.
#[derive(Debug)]
pub struct IdentifierAllocator {
    kind: MarkingKind,
    next: u32,
}

impl IdentifierAllocator {
    /// Allocator starting at `<prefix>000000`.
    pub fn new(kind: MarkingKind) -> Self {
        Self { kind, next: 0 }
    }

    /// Allocator continuing after `last`, used when resuming a production run.
    pub fn starting_after(last: MarkingId) -> Self {
        Self {
            kind: last.kind,
            next: last.index + 1,
        }
    }

    /// Kind this allocator serves.
    pub fn kind(&self) -> MarkingKind {
        self.kind
    }

    /// Identifiers still available.
    pub fn remaining(&self) -> u32 {
        ID_SPACE.saturating_sub(self.next)
    }

    /// Next identifier; fails once the space is consumed instead of wrapping.
    pub fn next_id(&mut self) -> AppResult<MarkingId> {
        let id = MarkingId::new(self.kind, self.next)?;
        self.next += 1;
        Ok(id)
    }
}

/// One allocator per marking kind.
#[derive(Debug)]
pub struct MarkingIdAllocators {
    /// Fan id sequence.
    pub fans: IdentifierAllocator,
    /// Blotch id sequence.
    pub blotches: IdentifierAllocator,
}

impl Default for MarkingIdAllocators {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkingIdAllocators {
    /// Fresh allocators for a full (overwriting) run.
    pub fn new() -> Self {
        Self {
            fans: IdentifierAllocator::new(MarkingKind::Fan),
            blotches: IdentifierAllocator::new(MarkingKind::Blotch),
        }
    }

    /// Allocators continuing after the highest identifiers already published.
    pub fn resuming(last_fan: Option<MarkingId>, last_blotch: Option<MarkingId>) -> Self {
        Self {
            fans: last_fan.map_or_else(
                || IdentifierAllocator::new(MarkingKind::Fan),
                IdentifierAllocator::starting_after,
            ),
            blotches: last_blotch.map_or_else(
                || IdentifierAllocator::new(MarkingKind::Blotch),
                IdentifierAllocator::starting_after,
            ),
        }
    }
}

/// Id-less clustering output of one tile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileCandidates {
    /// Tile identifier (`APF...`).
    pub tile_id: String,
    /// Fan candidates of the tile.
    pub fans: Vec<Fan>,
    /// Blotch candidates of the tile.
    pub blotches: Vec<Blotch>,
}

/// Clustering output of one observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitCandidates {
    /// Observation the candidates belong to.
    pub obsid: String,
    /// Per-tile candidates, in any order.
    pub tiles: Vec<TileCandidates>,
}

/// Assigns identifiers to every candidate of every unit.
///
/// Units are visited in obsid order, tiles in tile-id order, and rows in the
/// order the clustering engine emitted them. The same input therefore always
/// receives the same identifiers within a run.
pub fn assign_marking_ids(
    units: &mut [UnitCandidates],
    allocators: &mut MarkingIdAllocators,
) -> AppResult<usize> {
    units.sort_by(|a, b| a.obsid.cmp(&b.obsid));
    let mut assigned = 0;
    for unit in units.iter_mut() {
        unit.tiles.sort_by(|a, b| a.tile_id.cmp(&b.tile_id));
        for tile in unit.tiles.iter_mut() {
            for fan in tile.fans.iter_mut() {
                fan.set_marking_id(allocators.fans.next_id()?)?;
                assigned += 1;
            }
            for blotch in tile.blotches.iter_mut() {
                blotch.set_marking_id(allocators.blotches.next_id()?)?;
                assigned += 1;
            }
        }
    }
    Ok(assigned)
}
