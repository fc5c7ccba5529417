//! Foreground-window context and scoped focus borrowing.

use log::{debug, warn};
use std::{
    thread,
    time::{Duration, Instant},
};

use crate::actions::{ActionSink, AutomationError, WindowHandle};

/// Case-insensitive "title contains any of" predicate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TitleMatcher {
    needles: Vec<String>,
}

impl TitleMatcher {
    pub fn new<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            needles: needles
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        self.needles.iter().any(|n| title.contains(n.as_str()))
    }
}

/// Snapshot of the desktop taken when a gesture is dispatched.
#[derive(Debug, Clone, Default)]
pub struct WindowContext {
    pub foreground_title: String,
    pub windows: Vec<(WindowHandle, String)>,
}

impl WindowContext {
    pub fn capture<S: ActionSink + ?Sized>(sink: &mut S) -> Result<Self, AutomationError> {
        Ok(Self {
            foreground_title: sink.foreground_window_title()?,
            windows: sink.enumerate_visible_windows()?,
        })
    }

    pub fn find_window(&self, matcher: &TitleMatcher) -> Option<WindowHandle> {
        self.windows
            .iter()
            .find(|(_, title)| matcher.matches(title))
            .map(|(handle, _)| *handle)
    }
}

/// Bounded wait for the foreground title to satisfy `matcher`.
#[derive(Debug, Clone, Copy)]
pub struct Poll {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Poll {
    pub fn wait_for_title<S: ActionSink + ?Sized>(
        &self,
        sink: &mut S,
        matcher: &TitleMatcher,
        what: &str,
    ) -> Result<String, AutomationError> {
        let start = Instant::now();
        loop {
            let title = sink.foreground_window_title()?;
            if matcher.matches(&title) {
                debug!("'{what}' ready after {:?}", start.elapsed());
                return Ok(title);
            }
            if start.elapsed() >= self.timeout {
                return Err(AutomationError::Timeout {
                    what: what.to_string(),
                    waited_ms: self.timeout.as_millis() as u64,
                });
            }
            thread::sleep(self.interval);
        }
    }
}

/// Focus borrowed from the user. The prior foreground window gets its focus
/// back when the lease is dropped, whichever way the borrower exits.
pub struct FocusLease<'a, S: ActionSink + ?Sized> {
    sink: &'a mut S,
    prior: WindowHandle,
}

impl<'a, S: ActionSink + ?Sized> FocusLease<'a, S> {
    pub fn acquire(sink: &'a mut S, target: WindowHandle) -> Result<Self, AutomationError> {
        let prior = sink.foreground_window()?;
        sink.focus_window(target)?;
        Ok(Self { sink, prior })
    }

    pub fn sink(&mut self) -> &mut S {
        &mut *self.sink
    }
}

impl<S: ActionSink + ?Sized> Drop for FocusLease<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.sink.focus_window(self.prior) {
            warn!("failed to restore focus to window {}: {e}", self.prior.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::{Call, RecordingSink};

    #[test]
    fn test_matcher_is_case_insensitive() {
        let m = TitleMatcher::new(["YouTube", " "]);
        assert!(m.matches("Lo-fi beats - youtube - Chromium"));
        assert!(!m.matches("Untitled - Notepad"));
        assert!(!TitleMatcher::default().matches("anything"));
    }

    #[test]
    fn test_find_window() {
        let ctx = WindowContext {
            foreground_title: "Terminal".into(),
            windows: vec![
                (WindowHandle(7), "Terminal".into()),
                (WindowHandle(9), "Music - YouTube".into()),
            ],
        };
        assert_eq!(ctx.find_window(&TitleMatcher::new(["youtube"])), Some(WindowHandle(9)));
        assert_eq!(ctx.find_window(&TitleMatcher::new(["spotify"])), None);
    }

    #[test]
    fn test_wait_for_title_polls_until_match() {
        let mut sink = RecordingSink::with_title("Notepad");
        sink.upcoming_titles = ["Notepad", "Notepad", "Save As"].map(String::from).into();
        let poll = Poll {
            timeout: Duration::from_secs(1),
            interval: Duration::from_millis(1),
        };
        let title = poll
            .wait_for_title(&mut sink, &TitleMatcher::new(["save as"]), "save dialog")
            .unwrap();
        assert_eq!(title, "Save As");
    }

    #[test]
    fn test_wait_for_title_times_out() {
        let mut sink = RecordingSink::with_title("Notepad");
        let poll = Poll {
            timeout: Duration::from_millis(20),
            interval: Duration::from_millis(2),
        };
        let err = poll
            .wait_for_title(&mut sink, &TitleMatcher::new(["save as"]), "save dialog")
            .unwrap_err();
        assert!(matches!(err, AutomationError::Timeout { waited_ms: 20, .. }), "{err}");
    }

    #[test]
    fn test_lease_restores_focus_on_every_exit() {
        let mut sink = RecordingSink::with_title("Editor");
        sink.foreground = Some(WindowHandle(1));
        sink.windows = vec![
            (WindowHandle(1), "Editor".into()),
            (WindowHandle(2), "Video - YouTube".into()),
        ];

        let result: Result<(), AutomationError> = (|| {
            let mut lease = FocusLease::acquire(&mut sink, WindowHandle(2))?;
            lease.sink().fail_on = Some("key");
            lease.sink().press_key("L")
        })();
        assert!(result.is_err());
        assert_eq!(
            sink.calls,
            vec![Call::Focus(WindowHandle(2)), Call::Focus(WindowHandle(1))]
        );
        assert_eq!(sink.title, "Editor");
    }
}
