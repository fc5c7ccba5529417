use log::debug;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Independent suppression windows. A skip and a save never share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    /// Any recognized gesture reaching the dispatcher.
    Gesture,
    Click,
    MediaSkip,
}

impl ActionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gesture => "gesture",
            Self::Click => "click",
            Self::MediaSkip => "media-skip",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CooldownGate {
    durations: HashMap<ActionClass, Duration>,
    last_fired: HashMap<ActionClass, Instant>,
}

impl CooldownGate {
    pub fn new(durations: impl IntoIterator<Item = (ActionClass, Duration)>) -> Self {
        Self {
            durations: durations.into_iter().collect(),
            last_fired: HashMap::new(),
        }
    }

    fn duration(&self, class: ActionClass) -> Duration {
        self.durations.get(&class).copied().unwrap_or_default()
    }

    /// True when `class` may fire at `now`. Never mutates.
    pub fn is_ready(&self, class: ActionClass, now: Instant) -> bool {
        match self.last_fired.get(&class) {
            None => true,
            Some(&last) => now.saturating_duration_since(last) >= self.duration(class),
        }
    }

    /// Record a firing of `class` at `now`.
    pub fn record(&mut self, class: ActionClass, now: Instant) {
        self.last_fired.insert(class, now);
    }

    /// Check and record in one step.
    pub fn allow(&mut self, class: ActionClass, now: Instant) -> bool {
        if !self.is_ready(class, now) {
            debug!("cooldown: {} suppressed", class.as_str());
            return false;
        }
        self.record(class, now);
        true
    }

    pub fn reset(&mut self) {
        self.last_fired.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> CooldownGate {
        CooldownGate::new([
            (ActionClass::Gesture, Duration::from_millis(1000)),
            (ActionClass::MediaSkip, Duration::from_millis(2000)),
        ])
    }

    #[test]
    fn test_allow_suppress_allow() {
        let mut g = gate();
        let t0 = Instant::now();
        let cd = Duration::from_millis(1000);

        assert!(g.allow(ActionClass::Gesture, t0));
        assert!(!g.allow(ActionClass::Gesture, t0 + cd.mul_f32(0.1)));
        assert!(g.allow(ActionClass::Gesture, t0 + cd.mul_f32(1.1)));
    }

    #[test]
    fn test_suppressed_call_does_not_extend_window() {
        let mut g = gate();
        let t0 = Instant::now();
        assert!(g.allow(ActionClass::Gesture, t0));
        assert!(!g.allow(ActionClass::Gesture, t0 + Duration::from_millis(900)));
        // still measured from t0, not from the rejected attempt
        assert!(g.allow(ActionClass::Gesture, t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn test_classes_are_independent() {
        let mut g = gate();
        let t0 = Instant::now();
        assert!(g.allow(ActionClass::Gesture, t0));
        assert!(g.allow(ActionClass::MediaSkip, t0));
        assert!(g.allow(ActionClass::Click, t0));
        assert!(!g.allow(ActionClass::MediaSkip, t0 + Duration::from_millis(1500)));
        assert!(g.allow(ActionClass::Gesture, t0 + Duration::from_millis(1500)));
    }

    #[test]
    fn test_is_ready_is_read_only() {
        let mut g = gate();
        let t0 = Instant::now();
        assert!(g.is_ready(ActionClass::MediaSkip, t0));
        assert!(g.is_ready(ActionClass::MediaSkip, t0));
        g.record(ActionClass::MediaSkip, t0);
        assert!(!g.is_ready(ActionClass::MediaSkip, t0 + Duration::from_millis(10)));
        g.reset();
        assert!(g.is_ready(ActionClass::MediaSkip, t0 + Duration::from_millis(10)));
    }
}
