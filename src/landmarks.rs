//! Hand observations as produced by the external landmark model.

use serde::Deserialize;
use thiserror::Error;

#[cfg(test)]
pub const WRIST: usize = 0;
pub const THUMB_MCP: usize = 2;
pub const THUMB_IP: usize = 3;
pub const THUMB_TIP: usize = 4;
pub const INDEX_MCP: usize = 5;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_TIP: usize = 12;
pub const RING_MCP: usize = 13;
pub const RING_TIP: usize = 16;
pub const PINKY_MCP: usize = 17;
pub const PINKY_TIP: usize = 20;

/// Number of landmarks in a complete hand.
pub const LANDMARK_COUNT: usize = 21;

/// One anatomical keypoint. x/y are normalized to the image, z is relative depth.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(from = "[f32; 3]")]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl From<[f32; 3]> for Landmark {
    fn from(p: [f32; 3]) -> Self {
        Self::new(p[0], p[1], p[2])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ObservationError {
    #[error("malformed observation: expected {LANDMARK_COUNT} landmarks, found {found}")]
    MalformedObservation { found: usize },
}

/// One detected hand for a single frame.
///
/// Landmark count is not enforced at construction; the classifier rejects
/// short observations so a bad hand only costs its own frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HandObservation {
    pub handedness: Handedness,
    #[serde(default = "full_confidence")]
    pub confidence: f32,
    pub landmarks: Vec<Landmark>,
}

fn full_confidence() -> f32 {
    1.0
}

impl HandObservation {
    #[cfg(test)]
    pub fn new(handedness: Handedness, confidence: f32, landmarks: Vec<Landmark>) -> Self {
        Self {
            handedness,
            confidence,
            landmarks,
        }
    }

    /// Borrow the landmarks as a fixed-size array, or fail if the model
    /// returned a partial hand.
    pub fn points(&self) -> Result<&[Landmark; LANDMARK_COUNT], ObservationError> {
        self.landmarks
            .as_slice()
            .try_into()
            .map_err(|_| ObservationError::MalformedObservation {
                found: self.landmarks.len(),
            })
    }
}
