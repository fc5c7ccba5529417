//! Per-frame processing on the consumer thread: classify, move the cursor,
//! debounce, dispatch.

use log::{debug, error, warn};
use std::time::Instant;

use crate::actions::ActionSink;
use crate::config::{Profile, Tracking};
use crate::context::WindowContext;
use crate::cursor::CursorFilter;
use crate::dispatch::{ActionCommand, ActionDispatcher, WorkflowState};
use crate::gestures::{FistPolicy, Gesture, GestureDebouncer, classify};
use crate::landmarks::{HandObservation, Handedness};

/// All state a tracking session mutates. Built fresh for each session.
pub struct FrameProcessor {
    tracking: Tracking,
    policy: FistPolicy,
    screen: (u32, u32),
    cursor: CursorFilter,
    debouncer: GestureDebouncer,
    dispatcher: ActionDispatcher,
}

impl FrameProcessor {
    pub fn new(profile: &Profile) -> Self {
        Self {
            tracking: profile.tracking.clone(),
            policy: profile.classifier.fist_policy,
            screen: profile.screen(),
            cursor: CursorFilter::new(profile.cursor.alpha, profile.cursor.seed),
            debouncer: GestureDebouncer::new(profile.classifier.confirm_frames).with_click_trigger(
                profile.classifier.click_trigger,
                profile.classifier.push_threshold,
            ),
            dispatcher: ActionDispatcher::new(profile.dispatch_config()),
        }
    }

    #[cfg(test)]
    pub fn workflow_state(&self) -> WorkflowState {
        self.dispatcher.state()
    }

    /// Back to first-sample cursor, no streaks, idle workflow.
    pub fn reset(&mut self) {
        if self.dispatcher.state() != WorkflowState::Idle {
            warn!("session ended with a save pending; discarding it");
        }
        self.cursor.reset();
        self.debouncer.reset();
        self.dispatcher.reset();
    }

    /// Handle every hand detected in one frame. Errors never escape: a bad
    /// hand or a failed automation call only costs this frame.
    pub fn process<S: ActionSink + ?Sized>(
        &mut self,
        hands: &[HandObservation],
        now: Instant,
        sink: &mut S,
    ) -> Vec<ActionCommand> {
        let mut issued = Vec::new();

        if self.dispatcher.state() == WorkflowState::AwaitingSaveConfirmation {
            match sink.foreground_window_title() {
                Ok(title) => self.dispatcher.observe_foreground(&title),
                Err(e) => {
                    error!("foreground lookup failed: {e}");
                    self.dispatcher.force_idle();
                }
            }
        }

        let mut present = Vec::with_capacity(2);
        let accepted: Vec<&HandObservation> = hands
            .iter()
            .filter(|h| h.confidence >= self.tracking.min_confidence)
            .take(self.tracking.max_hands)
            .collect();

        for hand in accepted {
            let mut signal = match classify(hand, self.policy) {
                Ok(s) => s,
                Err(e) => {
                    warn!("skipping {} hand: {e}", hand.handedness.as_str());
                    continue;
                }
            };
            present.push(hand.handedness);
            if self.tracking.mirror_x {
                signal.pointer.0 = 1.0 - signal.pointer.0;
            }

            if self.tracking.pointer_hand.accepts(hand.handedness) {
                let (x, y) = self.cursor.filter(signal.pointer, self.screen);
                if let Err(e) = sink.move_pointer(x, y) {
                    error!("pointer move failed: {e}");
                }
            }

            if !self.tracking.gesture_hand.accepts(hand.handedness) {
                continue;
            }
            if let Some(gesture) = self.debouncer.update(&signal) {
                debug!("{} confirmed on {} hand", gesture.as_str(), hand.handedness.as_str());
                if let Some(cmd) = self.dispatch(gesture, now, sink) {
                    issued.push(cmd);
                }
            }
        }

        for hand in [Handedness::Left, Handedness::Right] {
            if !present.contains(&hand) {
                self.debouncer.release(hand);
            }
        }
        issued
    }

    fn dispatch<S: ActionSink + ?Sized>(
        &mut self,
        gesture: Gesture,
        now: Instant,
        sink: &mut S,
    ) -> Option<ActionCommand> {
        let ctx = match gesture {
            Gesture::Fist => WindowContext::default(),
            Gesture::ThumbsUp => match WindowContext::capture(sink) {
                Ok(ctx) => ctx,
                Err(e) => {
                    error!("window context unavailable: {e}");
                    self.dispatcher.force_idle();
                    return None;
                }
            },
        };
        match self.dispatcher.dispatch(gesture, &ctx, now, sink) {
            Ok(cmd) => cmd,
            Err(e) => {
                error!("{} action failed: {e}", gesture.as_str());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::{Call, RecordingSink};
    use crate::landmarks::fixtures::{fist, open_hand, thumbs_up};
    use crate::landmarks::{INDEX_TIP, Landmark};
    use std::time::Duration;

    fn profile(extra: &str) -> Profile {
        Profile::parse(&format!(
            "[meta]\n[classifier]\nconfirm_frames = 1\n[tracking]\n{extra}"
        ))
        .unwrap()
    }

    #[test]
    fn test_pointer_moves_with_smoothing() {
        let mut p = FrameProcessor::new(&profile(""));
        let mut sink = RecordingSink::default();
        let mut hand = open_hand(Handedness::Right);
        hand.landmarks[INDEX_TIP] = Landmark::new(0.5, 0.5, 0.0);

        p.process(&[hand.clone()], Instant::now(), &mut sink);
        p.process(&[hand], Instant::now(), &mut sink);
        assert_eq!(sink.calls, vec![Call::Move(480, 270), Call::Move(720, 405)]);
    }

    #[test]
    fn test_mirror_flips_x() {
        let mut p = FrameProcessor::new(&profile("mirror_x = true\n[cursor]\nseed = \"first_sample\"\n"));
        let mut sink = RecordingSink::default();
        let mut hand = open_hand(Handedness::Right);
        hand.landmarks[INDEX_TIP] = Landmark::new(0.25, 0.5, 0.0);
        p.process(&[hand], Instant::now(), &mut sink);
        assert_eq!(sink.calls, vec![Call::Move(1440, 540)]);
    }

    #[test]
    fn test_low_confidence_and_malformed_hands_are_skipped() {
        let mut p = FrameProcessor::new(&profile("max_hands = 2\n"));
        let mut sink = RecordingSink::default();
        let mut faint = fist(Handedness::Left);
        faint.confidence = 0.1;
        let mut broken = fist(Handedness::Right);
        broken.landmarks.truncate(5);

        let issued = p.process(&[faint, broken], Instant::now(), &mut sink);
        assert!(issued.is_empty());
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn test_hand_roles() {
        let mut p = FrameProcessor::new(&profile(
            "max_hands = 2\npointer_hand = \"right\"\ngesture_hand = \"left\"\n",
        ));
        let mut sink = RecordingSink::default();

        let issued = p.process(
            &[fist(Handedness::Right), fist(Handedness::Left)],
            Instant::now(),
            &mut sink,
        );
        assert_eq!(issued, vec![ActionCommand::Click]);
        let moves = sink.calls.iter().filter(|c| matches!(c, Call::Move(..))).count();
        assert_eq!(moves, 1, "only the right hand steers: {:?}", sink.calls);
    }

    #[test]
    fn test_two_hands_confirm_and_dispatch_independently() {
        let mut p = FrameProcessor::new(
            &Profile::parse(
                "[meta]\n[classifier]\nconfirm_frames = 2\n[tracking]\nmax_hands = 2\npointer_hand = \"left\"\n",
            )
            .unwrap(),
        );
        let mut sink = RecordingSink::with_title("YouTube - Chromium");
        let hands = [fist(Handedness::Left), thumbs_up(Handedness::Right), fist(Handedness::Right)];
        let t0 = Instant::now();

        assert!(p.process(&hands, t0, &mut sink).is_empty());
        let issued = p.process(&hands, t0 + Duration::from_millis(30), &mut sink);
        assert_eq!(
            issued,
            vec![ActionCommand::Click, ActionCommand::MediaSkip { window: None }]
        );
    }

    #[test]
    fn test_fist_push_trigger_clicks_on_forward_motion() {
        let mut p = FrameProcessor::new(
            &Profile::parse(
                "[meta]\n[classifier]\nconfirm_frames = 1\nclick_trigger = \"fist_push\"\npush_threshold = 0.02\n",
            )
            .unwrap(),
        );
        let mut sink = RecordingSink::default();
        let still = fist(Handedness::Left);
        let mut pushed = still.clone();
        pushed.landmarks[INDEX_TIP].z = -0.05;
        let t0 = Instant::now();

        assert!(p.process(&[still.clone()], t0, &mut sink).is_empty());
        assert!(p.process(&[still], t0 + Duration::from_millis(30), &mut sink).is_empty());
        assert_eq!(
            p.process(&[pushed], t0 + Duration::from_millis(60), &mut sink),
            vec![ActionCommand::Click]
        );
        assert_eq!(sink.calls.iter().filter(|c| **c == Call::Click).count(), 1);
    }

    #[test]
    fn test_end_to_end_media_skip_after_cooldown() {
        let mut p = FrameProcessor::new(&profile(
            "pointer_hand = \"left\"\n[cooldowns]\nmedia_skip_ms = 2000\n",
        ));
        let mut sink = RecordingSink::with_title("YouTube - Chrome");
        let up = thumbs_up(Handedness::Right);
        let open = open_hand(Handedness::Right);
        let t0 = Instant::now();

        assert_eq!(
            p.process(&[up.clone()], t0, &mut sink),
            vec![ActionCommand::MediaSkip { window: None }]
        );
        // release and re-confirm inside the cooldown window
        p.process(&[open.clone()], t0 + Duration::from_millis(100), &mut sink);
        assert!(p.process(&[up.clone()], t0 + Duration::from_millis(500), &mut sink).is_empty());

        p.process(&[open], t0 + Duration::from_millis(2100), &mut sink);
        assert_eq!(
            p.process(&[up], t0 + Duration::from_millis(2200), &mut sink),
            vec![ActionCommand::MediaSkip { window: None }]
        );
        let skips = sink.calls.iter().filter(|c| **c == Call::Key("L".into())).count();
        assert_eq!(skips, 2);
    }

    #[test]
    fn test_held_gesture_fires_once() {
        let mut p = FrameProcessor::new(&profile("pointer_hand = \"left\"\n"));
        let mut sink = RecordingSink::with_title("YouTube");
        let up = thumbs_up(Handedness::Right);
        let t0 = Instant::now();
        let mut total = 0;
        for i in 0..10 {
            total += p.process(&[up.clone()], t0 + Duration::from_secs(3 * i), &mut sink).len();
        }
        assert_eq!(total, 1);
    }

    #[test]
    fn test_pending_save_aborts_when_focus_leaves() {
        let mut p = FrameProcessor::new(&profile("pointer_hand = \"left\"\n"));
        let mut sink = RecordingSink::with_title("Untitled - Notepad");
        sink.clipboard = "notes".into();
        // context capture, then the dialog wait
        sink.upcoming_titles = ["Untitled - Notepad", "Save As"].map(String::from).into();

        let issued = p.process(&[thumbs_up(Handedness::Right)], Instant::now(), &mut sink);
        assert!(matches!(issued[..], [ActionCommand::SaveAs { .. }]), "{issued:?}");
        assert_eq!(p.workflow_state(), WorkflowState::AwaitingSaveConfirmation);

        sink.title = "Terminal".into();
        p.process(&[], Instant::now(), &mut sink);
        assert_eq!(p.workflow_state(), WorkflowState::Idle);
    }

    #[test]
    fn test_reset_restores_first_sample_state() {
        let mut p = FrameProcessor::new(&profile(""));
        let mut sink = RecordingSink::default();
        let mut hand = open_hand(Handedness::Right);
        hand.landmarks[INDEX_TIP] = Landmark::new(0.5, 0.5, 0.0);

        p.process(&[hand.clone()], Instant::now(), &mut sink);
        p.reset();
        p.process(&[hand], Instant::now(), &mut sink);
        assert_eq!(sink.calls, vec![Call::Move(480, 270), Call::Move(480, 270)]);
    }
}
