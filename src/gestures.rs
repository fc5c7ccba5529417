use serde::Deserialize;
use std::collections::HashMap;

use crate::landmarks::{
    HandObservation, Handedness, INDEX_MCP, INDEX_TIP, MIDDLE_MCP, MIDDLE_TIP, ObservationError,
    PINKY_MCP, PINKY_TIP, RING_MCP, RING_TIP, THUMB_IP, THUMB_MCP, THUMB_TIP,
};

/// (tip, base) pairs for the four long fingers.
const FINGERS: [(usize, usize); 4] = [
    (INDEX_TIP, INDEX_MCP),
    (MIDDLE_TIP, MIDDLE_MCP),
    (RING_TIP, RING_MCP),
    (PINKY_TIP, PINKY_MCP),
];

/// Which joints must be folded for a hand to count as a fist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FistPolicy {
    /// Index, middle, ring and pinky tips below their base joints.
    #[default]
    FingersOnly,
    /// As `FingersOnly`, and the thumb tip below its IP joint as well.
    ThumbInclusive,
}

/// What turns a fist into a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickTrigger {
    /// A held fist clicks once it is confirmed.
    #[default]
    Fist,
    /// A confirmed fist clicks each time the index tip moves toward the
    /// camera by more than the push threshold between two frames.
    FistPush,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureSignal {
    pub handedness: Handedness,
    pub is_fist: bool,
    pub is_thumbs_up: bool,
    pub pointer: (f32, f32),
    /// Index tip z; smaller is closer to the camera.
    pub depth: f32,
}

/// Classify a single hand. Image-space y grows downward, so "below" means a
/// larger y.
pub fn classify(
    hand: &HandObservation,
    policy: FistPolicy,
) -> Result<GestureSignal, ObservationError> {
    let p = hand.points()?;

    let fingers_folded = FINGERS.iter().all(|&(tip, base)| p[tip].y > p[base].y);
    let is_fist = match policy {
        FistPolicy::FingersOnly => fingers_folded,
        FistPolicy::ThumbInclusive => fingers_folded && p[THUMB_TIP].y > p[THUMB_IP].y,
    };

    let thumb_up = p[THUMB_TIP].y < p[THUMB_MCP].y;
    let curled = FINGERS.iter().all(|&(tip, _)| p[tip].y > p[tip - 2].y);

    Ok(GestureSignal {
        handedness: hand.handedness,
        is_fist,
        is_thumbs_up: thumb_up && curled,
        pointer: (p[INDEX_TIP].x, p[INDEX_TIP].y),
        depth: p[INDEX_TIP].z,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gesture {
    Fist,
    ThumbsUp,
}

impl Gesture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fist => "fist",
            Self::ThumbsUp => "thumbs-up",
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Streak {
    frames: u32,
    fired: bool,
}

impl Streak {
    fn step(&mut self, present: bool, needed: u32) -> bool {
        if !present {
            *self = Streak::default();
            return false;
        }
        self.frames = self.frames.saturating_add(1);
        if !self.fired && self.frames >= needed {
            self.fired = true;
            return true;
        }
        false
    }
}

/// Turns per-frame signals into confirmed gestures.
///
/// A gesture is confirmed on the frame its streak reaches `confirm_frames`
/// and re-arms only once the hand lets go of it. Thumbs-up wins over fist:
/// a thumbs-up hand also has its four fingers folded.
#[derive(Debug)]
pub struct GestureDebouncer {
    confirm_frames: u32,
    click_trigger: ClickTrigger,
    push_threshold: f32,
    streaks: HashMap<(Handedness, Gesture), Streak>,
    last_depth: HashMap<Handedness, f32>,
}

impl GestureDebouncer {
    pub fn new(confirm_frames: u32) -> Self {
        Self {
            confirm_frames: confirm_frames.max(1),
            click_trigger: ClickTrigger::Fist,
            push_threshold: 0.02,
            streaks: HashMap::new(),
            last_depth: HashMap::new(),
        }
    }

    pub fn with_click_trigger(mut self, trigger: ClickTrigger, push_threshold: f32) -> Self {
        self.click_trigger = trigger;
        self.push_threshold = push_threshold;
        self
    }

    pub fn update(&mut self, signal: &GestureSignal) -> Option<Gesture> {
        let thumbs_up = signal.is_thumbs_up;
        let fist = signal.is_fist && !thumbs_up;
        let pushed = self
            .last_depth
            .insert(signal.handedness, signal.depth)
            .is_some_and(|prev| prev - signal.depth > self.push_threshold);

        let mut confirmed = None;
        for (gesture, present) in [(Gesture::ThumbsUp, thumbs_up), (Gesture::Fist, fist)] {
            let streak = self
                .streaks
                .entry((signal.handedness, gesture))
                .or_default();
            let first = streak.step(present, self.confirm_frames);
            let fire = match (gesture, self.click_trigger) {
                (Gesture::Fist, ClickTrigger::FistPush) => {
                    present && streak.frames >= self.confirm_frames && pushed
                }
                _ => first,
            };
            if fire {
                confirmed = Some(gesture);
            }
        }
        confirmed
    }

    /// Forget every streak for a hand that vanished from the frame.
    pub fn release(&mut self, handedness: Handedness) {
        self.streaks.retain(|(h, _), _| *h != handedness);
        self.last_depth.remove(&handedness);
    }

    pub fn reset(&mut self) {
        self.streaks.clear();
        self.last_depth.clear();
    }
}
