#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    LongPressStart,
    /// Emitted on every poll while the long press is held.
    DuringLongPress,
    LongPressStop,
}

/// Produced once when a long press is released; consumed by the reset path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetRequest;

/// Electrical sense of a push button input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonPolarity {
    ActiveHigh,
    ActiveLow,
}

impl ButtonPolarity {
    /// Maps the raw pin level to the logical pressed state.
    pub fn is_pressed(self, level_high: bool) -> bool {
        match self {
            Self::ActiveHigh => level_high,
            Self::ActiveLow => !level_high,
        }
    }
}

/// Polled long-press detector. `pressed` is the logical state, already
/// corrected for the button's [`ButtonPolarity`].
#[derive(Debug, Clone)]
pub struct LongPressButton {
    debounce_ms: u64,
    long_press_ms: u64,
    raw: bool,
    raw_since_ms: u64,
    stable: bool,
    long_press: bool,
}

impl LongPressButton {
    pub fn new(debounce_ms: u64, long_press_ms: u64) -> Self {
        Self {
            debounce_ms,
            long_press_ms,
            raw: false,
            raw_since_ms: 0,
            stable: false,
            long_press: false,
        }
    }

    pub fn tick(&mut self, pressed: bool, now_ms: u64) -> Option<ButtonEvent> {
        if pressed != self.raw {
            self.raw = pressed;
            self.raw_since_ms = now_ms;
        }

        let held_ms = now_ms.saturating_sub(self.raw_since_ms);
        if self.raw != self.stable && held_ms >= self.debounce_ms {
            self.stable = self.raw;
            if !self.stable && self.long_press {
                self.long_press = false;
                return Some(ButtonEvent::LongPressStop);
            }
        }

        if !self.stable {
            return None;
        }

        if self.long_press {
            Some(ButtonEvent::DuringLongPress)
        } else if held_ms >= self.long_press_ms {
            self.long_press = true;
            Some(ButtonEvent::LongPressStart)
        } else {
            None
        }
    }

    pub fn is_long_pressed(&self) -> bool {
        self.long_press
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn drive(
        button: &mut LongPressButton,
        pressed: bool,
        from_ms: u64,
        to_ms: u64,
    ) -> Vec<ButtonEvent> {
        (from_ms..=to_ms)
            .step_by(50)
            .filter_map(|now_ms| button.tick(pressed, now_ms))
            .collect()
    }

    #[test]
    fn short_press_emits_nothing() {
        let mut button = LongPressButton::new(50, 2_000);

        assert!(drive(&mut button, true, 0, 1_500).is_empty());
        assert!(drive(&mut button, false, 1_550, 2_500).is_empty());
        assert!(!button.is_long_pressed());
    }

    #[test]
    fn long_press_runs_start_during_stop() {
        let mut button = LongPressButton::new(50, 2_000);

        assert!(drive(&mut button, true, 0, 1_950).is_empty());
        assert_eq!(button.tick(true, 2_000), Some(ButtonEvent::LongPressStart));
        assert_eq!(button.tick(true, 2_050), Some(ButtonEvent::DuringLongPress));

        assert_eq!(button.tick(false, 2_100), Some(ButtonEvent::DuringLongPress));
        assert_eq!(button.tick(false, 2_150), Some(ButtonEvent::LongPressStop));
        assert_eq!(button.tick(false, 2_200), None);
        assert!(!button.is_long_pressed());
    }

    #[test]
    fn bounce_shorter_than_debounce_is_ignored() {
        let mut button = LongPressButton::new(50, 2_000);
        drive(&mut button, true, 0, 2_000);

        assert_eq!(button.tick(false, 2_010), Some(ButtonEvent::DuringLongPress));
        assert_eq!(button.tick(true, 2_030), Some(ButtonEvent::DuringLongPress));
        assert!(button.is_long_pressed());
    }

    #[test]
    fn polarity_maps_pin_level_to_pressed() {
        assert!(ButtonPolarity::ActiveHigh.is_pressed(true));
        assert!(!ButtonPolarity::ActiveHigh.is_pressed(false));
        assert!(ButtonPolarity::ActiveLow.is_pressed(false));
        assert!(!ButtonPolarity::ActiveLow.is_pressed(true));
    }
}
