//! Presentation state of the form/chat pair and the scroll easing.
//!
//! Nothing here touches storage; the widget persists the collapse flag and
//! asks this module what the page should look like.

use std::time::Duration;

/// Viewports at or below this width show the chat full-screen.
pub const NARROW_BREAKPOINT: u32 = 768;

pub const SCROLL_DURATION: Duration = Duration::from_millis(1000);

pub fn is_narrow(width: u32) -> bool {
    width <= NARROW_BREAKPOINT
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// The lead form is shown; the chat is unavailable.
    Form,
    /// The form was accepted and the "start chatting" notice is up.
    Submitted,
    /// Chat box visible.
    Chat { full_screen: bool },
    /// Chat box hidden behind the floating expand button.
    Collapsed,
}

impl View {
    /// What a fresh page load shows.
    pub fn initial(locked: bool, collapsed: bool, width: u32) -> Self {
        match (locked, collapsed) {
            (false, _) => View::Form,
            (true, true) => View::Collapsed,
            (true, false) => View::Chat {
                full_screen: is_narrow(width),
            },
        }
    }

    /// Leaving the success notice (or the collapsed button) for the chat box.
    pub fn open_chat(self, width: u32) -> Self {
        match self {
            View::Form => View::Form,
            _ => View::Chat {
                full_screen: is_narrow(width),
            },
        }
    }

    pub fn collapse(self) -> Self {
        match self {
            View::Chat { .. } | View::Collapsed => View::Collapsed,
            other => other,
        }
    }

    pub fn expand(self, width: u32) -> Self {
        match self {
            View::Collapsed => View::Chat {
                full_screen: is_narrow(width),
            },
            other => other,
        }
    }

    pub fn form_visible(&self) -> bool {
        matches!(self, View::Form)
    }

    pub fn chat_visible(&self) -> bool {
        matches!(self, View::Chat { .. })
    }

    pub fn expand_button_visible(&self) -> bool {
        matches!(self, View::Collapsed)
    }

    /// Whether page scrolling should be locked behind a full-screen chat.
    pub fn locks_page_scroll(&self) -> bool {
        matches!(self, View::Chat { full_screen: true })
    }
}

/// Linear scroll from `start` to `target` over `duration`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnimation {
    pub start: f64,
    pub target: f64,
    pub duration: Duration,
}

impl ScrollAnimation {
    pub fn new(start: f64, target: f64) -> Self {
        Self {
            start,
            target,
            duration: SCROLL_DURATION,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    fn progress(&self, elapsed: Duration) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
    }

    pub fn position(&self, elapsed: Duration) -> f64 {
        self.start + (self.target - self.start) * self.progress(elapsed)
    }

    pub fn is_finished(&self, elapsed: Duration) -> bool {
        self.progress(elapsed) >= 1.0
    }

    /// Positions sampled every `step`, ending exactly on the target.
    pub fn frames(&self, step: Duration) -> Vec<f64> {
        let mut frames = Vec::new();
        if step.is_zero() {
            frames.push(self.target);
            return frames;
        }

        let mut elapsed = Duration::ZERO;
        loop {
            elapsed += step;
            frames.push(self.position(elapsed));
            if self.is_finished(elapsed) {
                break;
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_view_follows_lock_and_collapse() {
        assert_eq!(View::initial(false, true, 400), View::Form);
        assert_eq!(View::initial(true, true, 400), View::Collapsed);
        assert_eq!(View::initial(true, false, 400), View::Chat { full_screen: true });
        assert_eq!(View::initial(true, false, 1280), View::Chat { full_screen: false });
        assert_eq!(View::initial(true, false, 768), View::Chat { full_screen: true });
    }

    #[test]
    fn collapse_and_expand() {
        let chat = View::Chat { full_screen: true };
        let collapsed = chat.collapse();
        assert!(collapsed.expand_button_visible());
        assert!(!collapsed.locks_page_scroll());

        assert_eq!(collapsed.expand(1280), View::Chat { full_screen: false });
        // The form cannot be collapsed into a chat.
        assert_eq!(View::Form.collapse(), View::Form);
        assert_eq!(View::Form.open_chat(400), View::Form);
        assert_eq!(View::Submitted.open_chat(400), View::Chat { full_screen: true });
    }

    #[test]
    fn scroll_is_linear_and_clamped() {
        let anim = ScrollAnimation::new(100.0, 500.0);
        assert_eq!(anim.position(Duration::ZERO), 100.0);
        assert_eq!(anim.position(Duration::from_millis(250)), 200.0);
        assert_eq!(anim.position(Duration::from_millis(1000)), 500.0);
        assert_eq!(anim.position(Duration::from_secs(5)), 500.0);
        assert!(!anim.is_finished(Duration::from_millis(999)));
        assert!(anim.is_finished(Duration::from_millis(1000)));
    }

    #[test]
    fn frames_end_on_target() {
        let anim = ScrollAnimation::new(0.0, 90.0).with_duration(Duration::from_millis(100));
        let frames = anim.frames(Duration::from_millis(30));
        assert_eq!(frames.len(), 4);
        assert_eq!(*frames.last().unwrap(), 90.0);
        assert!(frames.windows(2).all(|w| w[0] <= w[1]));

        let instant = ScrollAnimation::new(10.0, 20.0).with_duration(Duration::ZERO);
        assert_eq!(instant.position(Duration::ZERO), 20.0);
        assert_eq!(instant.frames(Duration::ZERO), vec![20.0]);
    }
}
