//! Fan and blotch markings and their derived geometry.
//!
//! Both marking kinds are stored as flat CSV records so they can travel between the
//! clustering engine, the per-unit stage folders and the catalog aggregation without
//! any schema translation. Angles are in degrees everywhere except inside the arm
//! length formula, which works on half the spread in radians.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppResult, CatalogError};
use crate::ids::MarkingId;

/// Width of one Planet Four tile in pixels.
pub const TILE_WIDTH: f64 = 840.0;
/// Height of one Planet Four tile in pixels.
pub const TILE_HEIGHT: f64 = 648.0;
/// Horizontal stride between neighbouring tiles (tiles overlap by 100 px).
pub const TILE_X_STRIDE: f64 = 740.0;
/// Vertical stride between neighbouring tiles.
pub const TILE_Y_STRIDE: f64 = 548.0;

/// The two kinds of marking annotators can draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkingKind {
    /// A wedge-shaped deposit with a base point and two arms.
    Fan,
    /// An elliptical dark spot.
    Blotch,
}

impl MarkingKind {
    /// Both kinds, in the order every sequential pass walks them.
    pub const ALL: [MarkingKind; 2] = [MarkingKind::Fan, MarkingKind::Blotch];

    /// Prefix character of this kind's marking identifiers.
    pub fn id_prefix(self) -> char {
        match self {
            MarkingKind::Fan => 'F',
            MarkingKind::Blotch => 'B',
        }
    }

    /// Singular name used in catalog file suffixes (`*_fan.csv`).
    pub fn singular(self) -> &'static str {
        match self {
            MarkingKind::Fan => "fan",
            MarkingKind::Blotch => "blotch",
        }
    }

    /// Plural name used in per-tile file names (`<tile>_fans.csv`).
    pub fn plural(self) -> &'static str {
        match self {
            MarkingKind::Fan => "fans",
            MarkingKind::Blotch => "blotches",
        }
    }

    /// Period of this kind's angle: ellipses are symmetric under a half turn.
    pub fn angle_period(self) -> f64 {
        match self {
            MarkingKind::Fan => 360.0,
            MarkingKind::Blotch => 180.0,
        }
    }
}

impl fmt::Display for MarkingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.singular())
    }
}

/// Wraps `angle` into `[0, period)`.
///
/// Uses the euclidean remainder so negative inputs land in range too; the final
/// guard catches `-tiny % period` rounding up to exactly `period`.
pub fn normalize_angle(angle: f64, period: f64) -> f64 {
    let wrapped = angle.rem_euclid(period);
    if wrapped >= period {
        0.0
    } else {
        wrapped
    }
}

/// Rotates a 2D vector counter-clockwise by `angle` degrees.
pub fn rotate_vector(v: [f64; 2], angle: f64) -> [f64; 2] {
    let (sin, cos) = angle.to_radians().sin_cos();
    [cos * v[0] - sin * v[1], sin * v[0] + cos * v[1]]
}

/// Angle between two vectors in degrees, in `[0, 180]`.
pub fn angle_between(v1: [f64; 2], v2: [f64; 2]) -> f64 {
    let dot = v1[0] * v2[0] + v1[1] * v2[1];
    let cross = v1[0] * v2[1] - v1[1] * v2[0];
    cross.abs().atan2(dot).to_degrees()
}

/// Unit vector pointing along `angle` degrees.
pub fn unit_angle_vector(angle: f64) -> [f64; 2] {
    let (sin, cos) = angle.to_radians().sin_cos();
    [cos, sin]
}

/// Converts tile-local pixel coordinates into full-observation pixel coordinates.
///
/// Tile indices are 1-based, as delivered with the raw annotations.
pub fn tile_to_image_coords(x: f64, y: f64, x_tile: u32, y_tile: u32) -> (f64, f64) {
    let col = f64::from(x_tile.saturating_sub(1));
    let row = f64::from(y_tile.saturating_sub(1));
    (x + TILE_X_STRIDE * col, y + TILE_Y_STRIDE * row)
}

/// Fan arm length from the stored characteristic reach and the spread in degrees.
///
/// `distance` is not the literal arm length; it is `length * (cos(s/2) + sin(s/2))`.
pub fn arm_length(distance: f64, spread: f64) -> f64 {
    let half = (spread / 2.0).to_radians();
    distance / (half.cos() + half.sin())
}

/// Inverse of [`arm_length`].
pub fn distance_from_arm_length(length: f64, spread: f64) -> f64 {
    let half = (spread / 2.0).to_radians();
    length * (half.cos() + half.sin())
}

/// Behaviour shared by both marking kinds.
pub trait MarkingGeometry {
    /// Which kind this marking is.
    fn kind(&self) -> MarkingKind;

    /// Tile-local position (fan base or blotch center).
    fn position(&self) -> [f64; 2];

    /// Wraps the stored angle into the kind's canonical range.
    fn normalize(&mut self);

    /// Feature vector handed to the clustering engine.
    fn cluster_features(&self) -> Vec<f64>;

    /// Assigned identifier, if any.
    fn marking_id(&self) -> Option<&MarkingId>;

    /// Sets the identifier. Fails if one is already assigned.
    fn set_marking_id(&mut self, id: MarkingId) -> AppResult<()>;

    /// Confidence after fnotching; `None` means never compared.
    fn vote_ratio(&self) -> Option<f64>;

    /// Confidence with the "never fnotched" default of 1 applied.
    fn effective_vote_ratio(&self) -> f64 {
        self.vote_ratio().unwrap_or(1.0)
    }
}

fn assign_once(slot: &mut Option<MarkingId>, id: MarkingId) -> AppResult<()> {
    if let Some(current) = slot {
        return Err(CatalogError::MarkingIdReassigned {
            current: current.to_string(),
            attempted: id.to_string(),
        });
    }
    *slot = Some(id);
    Ok(())
}

/// A clustered fan candidate for one tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fan {
    /// Assigned after clustering; `None` before.
    pub marking_id: Option<MarkingId>,
    /// Tile identifier (`APF...`).
    pub image_id: String,
    /// Observation the tile belongs to.
    pub obsid: String,
    /// Tile-local x in pixels.
    pub x: f64,
    /// Tile-local y in pixels.
    pub y: f64,
    /// Observation-wide x in pixels.
    pub image_x: f64,
    /// Observation-wide y in pixels.
    pub image_y: f64,
    /// 1-based tile column.
    pub x_tile: u32,
    /// 1-based tile row.
    pub y_tile: u32,
    /// Orientation in degrees.
    pub angle: f64,
    /// Opening angle between the arms in degrees.
    pub spread: f64,
    /// Characteristic reach; see [`arm_length`].
    pub distance: f64,
    /// x component of the mean unit angle vector.
    pub x_angle: f64,
    /// y component of the mean unit angle vector.
    pub y_angle: f64,
    /// Annotator markings in the cluster.
    pub n_votes: u32,
    /// Marking tool version.
    pub version: u32,
    /// Set by fnotching; `None` when never compared.
    pub vote_ratio: Option<f64>,
}

impl Fan {
    /// Length of both arms.
    pub fn arm_length(&self) -> f64 {
        arm_length(self.distance, self.spread)
    }

    /// The two arm vectors relative to the base, at `angle -/+ spread/2`.
    pub fn arm_vectors(&self) -> ([f64; 2], [f64; 2]) {
        let length = self.arm_length();
        let half = self.spread / 2.0;
        (
            rotate_vector([length, 0.0], self.angle - half),
            rotate_vector([length, 0.0], self.angle + half),
        )
    }

    /// Absolute tile coordinates of both arm tips.
    pub fn arm_tips(&self) -> ([f64; 2], [f64; 2]) {
        let (v1, v2) = self.arm_vectors();
        (
            [self.x + v1[0], self.y + v1[1]],
            [self.x + v2[0], self.y + v2[1]],
        )
    }
}

impl MarkingGeometry for Fan {
    fn kind(&self) -> MarkingKind {
        MarkingKind::Fan
    }

    fn position(&self) -> [f64; 2] {
        [self.x, self.y]
    }

    fn normalize(&mut self) {
        self.angle = normalize_angle(self.angle, MarkingKind::Fan.angle_period());
    }

    fn cluster_features(&self) -> Vec<f64> {
        let (tip1, tip2) = self.arm_tips();
        vec![self.x, self.y, tip1[0], tip1[1], tip2[0], tip2[1]]
    }

    fn marking_id(&self) -> Option<&MarkingId> {
        self.marking_id.as_ref()
    }

    fn set_marking_id(&mut self, id: MarkingId) -> AppResult<()> {
        assign_once(&mut self.marking_id, id)
    }

    fn vote_ratio(&self) -> Option<f64> {
        self.vote_ratio
    }
}

/// A clustered blotch candidate for one tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blotch {
    /// Assigned after clustering; `None` before.
    pub marking_id: Option<MarkingId>,
    /// Tile identifier (`APF...`).
    pub image_id: String,
    /// Observation the tile belongs to.
    pub obsid: String,
    /// Tile-local x in pixels.
    pub x: f64,
    /// Tile-local y in pixels.
    pub y: f64,
    /// Observation-wide x in pixels.
    pub image_x: f64,
    /// Observation-wide y in pixels.
    pub image_y: f64,
    /// 1-based tile column.
    pub x_tile: u32,
    /// 1-based tile row.
    pub y_tile: u32,
    /// Orientation in degrees.
    pub angle: f64,
    /// Semi-major axis in pixels.
    pub radius_1: f64,
    /// Semi-minor axis in pixels.
    pub radius_2: f64,
    /// x component of the mean unit angle vector.
    pub x_angle: f64,
    /// y component of the mean unit angle vector.
    pub y_angle: f64,
    /// Annotator markings in the cluster.
    pub n_votes: u32,
    /// Marking tool version.
    pub version: u32,
    /// Set by fnotching; `None` when never compared.
    pub vote_ratio: Option<f64>,
}

impl MarkingGeometry for Blotch {
    fn kind(&self) -> MarkingKind {
        MarkingKind::Blotch
    }

    fn position(&self) -> [f64; 2] {
        [self.x, self.y]
    }

    fn normalize(&mut self) {
        self.angle = normalize_angle(self.angle, MarkingKind::Blotch.angle_period());
    }

    fn cluster_features(&self) -> Vec<f64> {
        // Doubling the angle maps the half-turn symmetry onto a full circle.
        let [ax, ay] = unit_angle_vector(2.0 * self.angle);
        vec![self.x, self.y, self.radius_1, self.radius_2, ax, ay]
    }

    fn marking_id(&self) -> Option<&MarkingId> {
        self.marking_id.as_ref()
    }

    fn set_marking_id(&mut self, id: MarkingId) -> AppResult<()> {
        assign_once(&mut self.marking_id, id)
    }

    fn vote_ratio(&self) -> Option<f64> {
        self.vote_ratio
    }
}
