//! Terminal rendition of the lighting surface.
//!
//! Each applied fill is composited over black and becomes the target of a linear colour
//! transition. A new fill retargets from whatever is on screen at that moment.

use crate::effect::Fill;
use crate::model::Rgb;
use std::time::{Duration, Instant};

pub(crate) const BLACK: Rgb = Rgb::new(0, 0, 0);

#[derive(Debug, Clone, Copy)]
pub(crate) struct Backdrop {
    from: Rgb,
    to: Rgb,
    started: Instant,
    duration: Duration,
}

impl Backdrop {
    pub(crate) fn new(initial: Rgb, now: Instant) -> Self {
        Self {
            from: initial,
            to: initial,
            started: now,
            duration: Duration::ZERO,
        }
    }

    pub(crate) fn paint(&mut self, fill: &Fill, now: Instant) {
        self.retarget(fill.over(BLACK), fill.transition, now);
    }

    pub(crate) fn retarget(&mut self, target: Rgb, duration: Duration, now: Instant) {
        self.from = self.color_at(now);
        self.to = target;
        self.started = now;
        self.duration = duration;
    }

    pub(crate) fn is_settled(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.duration
    }

    pub(crate) fn color_at(&self, now: Instant) -> Rgb {
        if self.is_settled(now) {
            return self.to;
        }
        let t = now.saturating_duration_since(self.started).as_secs_f64()
            / self.duration.as_secs_f64();
        let lerp = |a: u8, b: u8| {
            let v = f64::from(a) + (f64::from(b) - f64::from(a)) * t;
            v.round().clamp(0.0, 255.0) as u8
        };
        Rgb::new(
            lerp(self.from.r, self.to.r),
            lerp(self.from.g, self.to.g),
            lerp(self.from.b, self.to.b),
        )
    }
}

/// Black or white text, whichever reads better on `bg`.
pub(crate) fn contrast(bg: Rgb) -> Rgb {
    let luma = 0.299 * f64::from(bg.r) + 0.587 * f64::from(bg.g) + 0.114 * f64::from(bg.b);
    if luma > 140.0 {
        BLACK
    } else {
        Rgb::new(0xFF, 0xFF, 0xFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn transition_runs_from_start_to_target() {
        let t0 = Instant::now();
        let mut backdrop = Backdrop::new(BLACK, t0);
        backdrop.retarget(Rgb::new(200, 100, 50), 2 * SECOND, t0);

        assert_eq!(backdrop.color_at(t0), BLACK);
        assert_eq!(backdrop.color_at(t0 + SECOND), Rgb::new(100, 50, 25));
        assert_eq!(backdrop.color_at(t0 + 2 * SECOND), Rgb::new(200, 100, 50));
        assert_eq!(backdrop.color_at(t0 + 5 * SECOND), Rgb::new(200, 100, 50));
        assert!(backdrop.is_settled(t0 + 2 * SECOND));
    }

    #[test]
    fn zero_duration_jumps() {
        let t0 = Instant::now();
        let mut backdrop = Backdrop::new(BLACK, t0);
        backdrop.retarget(Rgb::new(10, 20, 30), Duration::ZERO, t0);
        assert_eq!(backdrop.color_at(t0), Rgb::new(10, 20, 30));
    }

    #[test]
    fn retarget_starts_from_what_is_on_screen() {
        let t0 = Instant::now();
        let mut backdrop = Backdrop::new(BLACK, t0);
        backdrop.retarget(Rgb::new(200, 0, 0), 2 * SECOND, t0);

        // Halfway through, a new fill arrives; last write wins.
        let mid = t0 + SECOND;
        backdrop.retarget(Rgb::new(0, 0, 200), 2 * SECOND, mid);
        assert_eq!(backdrop.color_at(mid), Rgb::new(100, 0, 0));
        assert_eq!(backdrop.color_at(mid + SECOND), Rgb::new(50, 0, 100));
        assert_eq!(backdrop.color_at(mid + 2 * SECOND), Rgb::new(0, 0, 200));
    }

    #[test]
    fn fills_are_painted_over_black() {
        let t0 = Instant::now();
        let mut backdrop = Backdrop::new(BLACK, t0);
        backdrop.paint(&Fill::compose(Rgb::new(255, 215, 0), 50, 0.0), t0);
        assert_eq!(backdrop.color_at(t0), Rgb::new(128, 108, 0));
    }

    #[test]
    fn text_contrasts_with_backdrop() {
        assert_eq!(contrast(Rgb::new(255, 215, 0)), BLACK);
        assert_eq!(contrast(Rgb::new(0, 0, 128)), Rgb::new(255, 255, 255));
    }
}
