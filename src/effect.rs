//! Presentation mapping and display effectors.
//!
//! `map` is a pure table lookup. Effectors turn the resulting parameters into a translucent
//! fill and push it at whatever surface they drive. Applying is last-write-wins: each call
//! replaces the target colour and transition duration, nothing is queued.

use crate::model::{EffectParameters, EmotionLabel, ParameterTable, Rgb, SyncEvent};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Look up the effect for `label`. No side effects.
pub fn map(label: EmotionLabel, table: &ParameterTable) -> Option<EffectParameters> {
    table.get(label).copied()
}

/// RGB colour with brightness folded into an alpha channel, plus its transition time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub color: Rgb,
    pub alpha: f64,
    #[serde(with = "humantime_serde")]
    pub transition: Duration,
}

impl Fill {
    pub fn compose(color: Rgb, brightness: u8, transition_seconds: f64) -> Self {
        Self {
            color,
            alpha: f64::from(brightness.min(100)) / 100.0,
            transition: Duration::try_from_secs_f64(transition_seconds).unwrap_or_default(),
        }
    }

    pub fn from_params(params: &EffectParameters) -> Self {
        Self::compose(params.color, params.brightness, params.transition_seconds)
    }

    /// CSS-style rendering, e.g. `rgba(255, 215, 0, 1)`.
    pub fn css(&self) -> String {
        format!(
            "rgba({}, {}, {}, {})",
            self.color.r, self.color.g, self.color.b, self.alpha
        )
    }

    /// Composite over an opaque backdrop colour.
    pub fn over(&self, backdrop: Rgb) -> Rgb {
        let mix = |fg: u8, bg: u8| {
            let v = f64::from(fg) * self.alpha + f64::from(bg) * (1.0 - self.alpha);
            v.round().clamp(0.0, 255.0) as u8
        };
        Rgb::new(
            mix(self.color.r, backdrop.r),
            mix(self.color.g, backdrop.g),
            mix(self.color.b, backdrop.b),
        )
    }
}

/// A display surface. Implementors only decide where a composed fill goes.
pub trait Effector: Send {
    fn paint(&mut self, fill: Fill);

    fn apply(&mut self, color: Rgb, brightness: u8, transition_seconds: f64) {
        self.paint(Fill::compose(color, brightness, transition_seconds));
    }

    fn apply_params(&mut self, params: &EffectParameters) {
        self.apply(params.color, params.brightness, params.transition_seconds);
    }
}

/// Forwards fills to front ends as [`SyncEvent::Applied`].
pub struct EventSurface {
    events: UnboundedSender<SyncEvent>,
}

impl EventSurface {
    pub fn new(events: UnboundedSender<SyncEvent>) -> Self {
        Self { events }
    }
}

impl Effector for EventSurface {
    fn paint(&mut self, fill: Fill) {
        tracing::debug!(fill = %fill.css(), transition = ?fill.transition, "paint");
        let _ = self.events.send(SyncEvent::Applied { fill });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every fill so tests can assert on what reached the surface.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSurface {
        fills: Arc<Mutex<Vec<Fill>>>,
    }

    impl RecordingSurface {
        pub(crate) fn fills(&self) -> Vec<Fill> {
            self.fills.lock().unwrap().clone()
        }
    }

    impl Effector for RecordingSurface {
        fn paint(&mut self, fill: Fill) {
            self.fills.lock().unwrap().push(fill);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSurface;
    use super::*;

    #[test]
    fn map_returns_exactly_the_table_entry() {
        let mut table = ParameterTable::default();
        for (i, label) in EmotionLabel::DETECTABLE.into_iter().enumerate() {
            let params = EffectParameters::new(Rgb::new(i as u8, 10, 20), 10 * i as u8, 0.25 + i as f64);
            table.set(label, params).unwrap();
            assert_eq!(map(label, &table), Some(params));
        }
        assert_eq!(map(EmotionLabel::None, &table), None);
    }

    #[test]
    fn brightness_becomes_alpha() {
        let fill = Fill::compose(Rgb::new(65, 105, 225), 30, 2.0);
        assert!((fill.alpha - 0.3).abs() < 1e-9);
        assert_eq!(fill.transition, Duration::from_secs(2));
        assert_eq!(fill.css(), "rgba(65, 105, 225, 0.3)");
    }

    #[test]
    fn compositing_over_black_scales_channels() {
        let fill = Fill::compose(Rgb::new(255, 215, 0), 50, 1.0);
        assert_eq!(fill.over(Rgb::new(0, 0, 0)), Rgb::new(128, 108, 0));
        let opaque = Fill::compose(Rgb::new(10, 20, 30), 100, 1.0);
        assert_eq!(opaque.over(Rgb::new(200, 200, 200)), Rgb::new(10, 20, 30));
    }

    #[test]
    fn repeated_applies_are_last_write_wins() {
        let mut surface = RecordingSurface::default();
        surface.apply(Rgb::new(255, 0, 0), 80, 0.5);
        surface.apply(Rgb::new(0, 0, 255), 20, 3.0);
        let fills = surface.fills();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[1].color, Rgb::new(0, 0, 255));
        assert_eq!(fills[1].transition, Duration::from_secs(3));
    }
}
