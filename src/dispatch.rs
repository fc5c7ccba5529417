//! Maps confirmed gestures plus the foreground context onto desktop actions,
//! including the two-phase save workflow.

use log::{debug, info, warn};
use std::time::{Duration, Instant};

use crate::actions::{ActionSink, AutomationError, WindowHandle};
use crate::context::{FocusLease, Poll, TitleMatcher, WindowContext};
use crate::cooldown::{ActionClass, CooldownGate};
use crate::gestures::Gesture;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub media_player: TitleMatcher,
    pub text_editor: TitleMatcher,
    pub save_dialog: TitleMatcher,
    pub target_app: TitleMatcher,
    pub media_skip_key: String,
    pub save_directory: String,
    pub default_filename: String,
    pub filename_max_len: usize,
    pub extension: String,
    pub poll: Poll,
    pub cooldowns: Vec<(ActionClass, Duration)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkflowState {
    #[default]
    Idle,
    AwaitingSaveConfirmation,
}

/// What the dispatcher actually did.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionCommand {
    Click,
    /// `None` targets the foreground window.
    MediaSkip { window: Option<WindowHandle> },
    SaveAs { directory: String, filename: String },
    ConfirmSave,
}

/// Owns the cooldown timers and the save workflow phase. Lives on the
/// processing thread; nothing else reads either.
#[derive(Debug)]
pub struct ActionDispatcher {
    cfg: DispatchConfig,
    gate: CooldownGate,
    state: WorkflowState,
}

impl ActionDispatcher {
    pub fn new(cfg: DispatchConfig) -> Self {
        let gate = CooldownGate::new(cfg.cooldowns.iter().copied());
        Self {
            cfg,
            gate,
            state: WorkflowState::Idle,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = WorkflowState::Idle;
        self.gate.reset();
    }

    /// Run the action for `gesture`. Any automation failure forces the
    /// workflow back to `Idle` before the error is returned.
    pub fn dispatch<S: ActionSink + ?Sized>(
        &mut self,
        gesture: Gesture,
        ctx: &WindowContext,
        now: Instant,
        sink: &mut S,
    ) -> Result<Option<ActionCommand>, AutomationError> {
        let result = match gesture {
            Gesture::Fist => self.click(now, sink),
            Gesture::ThumbsUp => self.thumbs_up(ctx, now, sink),
        };
        if result.is_err() {
            self.force_idle();
        }
        result
    }

    /// Drop any pending save after an automation failure.
    pub fn force_idle(&mut self) {
        if self.state != WorkflowState::Idle {
            warn!("workflow: automation failed mid-save; back to idle");
            self.state = WorkflowState::Idle;
        }
    }

    /// Abort a pending save once the foreground leaves the editor and its
    /// dialog. Called between gestures so a save never waits forever.
    pub fn observe_foreground(&mut self, title: &str) {
        if self.state == WorkflowState::AwaitingSaveConfirmation
            && !self.cfg.save_dialog.matches(title)
            && !self.cfg.text_editor.matches(title)
        {
            warn!("workflow: save aborted, foreground moved to '{title}'");
            self.state = WorkflowState::Idle;
        }
    }

    fn click<S: ActionSink + ?Sized>(
        &mut self,
        now: Instant,
        sink: &mut S,
    ) -> Result<Option<ActionCommand>, AutomationError> {
        if !self.gate.is_ready(ActionClass::Click, now) {
            return Ok(None);
        }
        sink.click()?;
        self.gate.record(ActionClass::Click, now);
        Ok(Some(ActionCommand::Click))
    }

    fn thumbs_up<S: ActionSink + ?Sized>(
        &mut self,
        ctx: &WindowContext,
        now: Instant,
        sink: &mut S,
    ) -> Result<Option<ActionCommand>, AutomationError> {
        let fg = ctx.foreground_title.as_str();

        if self.state == WorkflowState::AwaitingSaveConfirmation {
            if !self.gate.is_ready(ActionClass::Gesture, now) {
                return Ok(None);
            }
            return self.confirm_save(fg, now, sink);
        }

        if self.cfg.media_player.matches(fg) {
            return self.media_skip(None, now, sink);
        }

        let dialog_open = self.cfg.save_dialog.matches(fg);
        if dialog_open || self.cfg.text_editor.matches(fg) {
            if !self.gate.is_ready(ActionClass::Gesture, now) {
                return Ok(None);
            }
            return self.begin_save(dialog_open, now, sink).map(Some);
        }

        match ctx.find_window(&self.cfg.target_app) {
            Some(window) => self.media_skip(Some(window), now, sink),
            None => Ok(None),
        }
    }

    fn media_skip<S: ActionSink + ?Sized>(
        &mut self,
        window: Option<WindowHandle>,
        now: Instant,
        sink: &mut S,
    ) -> Result<Option<ActionCommand>, AutomationError> {
        if !self.gate.is_ready(ActionClass::MediaSkip, now) {
            return Ok(None);
        }
        match window {
            None => sink.press_key(&self.cfg.media_skip_key)?,
            Some(handle) => {
                let mut lease = FocusLease::acquire(sink, handle)?;
                self.cfg
                    .poll
                    .wait_for_title(lease.sink(), &self.cfg.target_app, "target window focus")?;
                lease.sink().press_key(&self.cfg.media_skip_key)?;
            }
        }
        self.gate.record(ActionClass::MediaSkip, now);
        info!(
            "media skip sent to {}",
            window.map_or("foreground".to_string(), |w| format!("background window {}", w.0))
        );
        Ok(Some(ActionCommand::MediaSkip { window }))
    }

    /// With `dialog_open` the user already opened the dialog: skip copying
    /// the document and name the file after whatever the clipboard holds.
    fn begin_save<S: ActionSink + ?Sized>(
        &mut self,
        dialog_open: bool,
        now: Instant,
        sink: &mut S,
    ) -> Result<ActionCommand, AutomationError> {
        let text = if dialog_open {
            sink.clipboard_text().unwrap_or_else(|e| {
                debug!("workflow: no clipboard text for the file name ({e})");
                String::new()
            })
        } else {
            sink.send_hotkey(&["CTRL", "A"])?;
            sink.send_hotkey(&["CTRL", "C"])?;
            sink.clipboard_text()?
        };
        let filename = filename_candidate(
            &text,
            self.cfg.filename_max_len,
            &self.cfg.default_filename,
            &self.cfg.extension,
        );

        if !dialog_open {
            sink.send_hotkey(&["CTRL", "SHIFT", "S"])?;
            self.cfg
                .poll
                .wait_for_title(sink, &self.cfg.save_dialog, "save dialog")?;
        }

        // navigate, then pre-fill without confirming
        sink.type_text(&self.cfg.save_directory)?;
        sink.press_key("ENTER")?;
        sink.type_text(&filename)?;

        self.gate.record(ActionClass::Gesture, now);
        self.state = WorkflowState::AwaitingSaveConfirmation;
        info!("workflow: save dialog primed with '{filename}'; awaiting confirmation");
        Ok(ActionCommand::SaveAs {
            directory: self.cfg.save_directory.clone(),
            filename,
        })
    }

    fn confirm_save<S: ActionSink + ?Sized>(
        &mut self,
        foreground: &str,
        now: Instant,
        sink: &mut S,
    ) -> Result<Option<ActionCommand>, AutomationError> {
        if !self.cfg.save_dialog.matches(foreground) {
            warn!("workflow: save aborted, foreground is '{foreground}'");
            self.state = WorkflowState::Idle;
            return Ok(None);
        }
        sink.press_key("ENTER")?;
        self.gate.record(ActionClass::Gesture, now);
        self.state = WorkflowState::Idle;
        info!("workflow: save confirmed");
        Ok(Some(ActionCommand::ConfirmSave))
    }
}

/// First line of `text`, restricted to alphanumerics, space, hyphen and
/// underscore, at most `max_len` characters. Empty results use `fallback`.
pub fn filename_candidate(text: &str, max_len: usize, fallback: &str, extension: &str) -> String {
    let first = text.lines().next().unwrap_or_default();
    let cleaned: String = first
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let stem: String = cleaned.trim().chars().take(max_len).collect();
    let stem = match stem.trim_end() {
        "" => fallback,
        s => s,
    };
    if extension.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{extension}")
    }
}
