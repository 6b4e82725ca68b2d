//! Logical edge detection for free-running signals sampled once per tick.

/// Turns a sampled boolean into rising/falling edge events.
///
/// The detector is unprimed after construction: the first sample only
/// records the level, so neither edge is ever reported for it regardless of
/// the initial value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeDetector {
    last: Option<bool>,
    rising: bool,
    falling: bool,
}

impl EdgeDetector {
    /// Creates an unprimed detector.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: None,
            rising: false,
            falling: false,
        }
    }

    /// Feeds the current sample and recomputes both edge flags.
    #[allow(clippy::missing_const_for_fn)]
    pub fn update(&mut self, value: bool) {
        match self.last {
            Some(previous) => {
                self.rising = value && !previous;
                self.falling = !value && previous;
            }
            None => {
                self.rising = false;
                self.falling = false;
            }
        }
        self.last = Some(value);
    }

    /// True when the latest sample was a false→true transition.
    #[must_use]
    pub const fn rising(&self) -> bool {
        self.rising
    }

    /// True when the latest sample was a true→false transition.
    #[must_use]
    pub const fn falling(&self) -> bool {
        self.falling
    }

    /// Last sampled level, `None` until the first update.
    #[must_use]
    pub const fn level(&self) -> Option<bool> {
        self.last
    }

    /// Returns the detector to its unprimed state.
    #[allow(clippy::missing_const_for_fn)]
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
