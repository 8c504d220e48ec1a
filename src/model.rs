use crate::effect::Fill;
use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub base_url: String,
    pub ws_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub fallback_after: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl SyncConfig {
    /// Derive the push endpoint from an HTTP base URL (`http` -> `ws`, `https` -> `wss`).
    pub fn ws_url_for(base_url: &str) -> String {
        let trimmed = base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = trimmed.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            trimmed.to_string()
        };
        format!("{ws_base}/ws/emotions")
    }
}

/// Detector output label. `None` is the "nothing detected yet" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Happy,
    Sad,
    Angry,
    Neutral,
    Surprise,
    Fear,
    Disgust,
    None,
}

impl EmotionLabel {
    /// Every label the detector can report, excluding the `None` sentinel.
    pub const DETECTABLE: [EmotionLabel; 7] = [
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Angry,
        EmotionLabel::Neutral,
        EmotionLabel::Surprise,
        EmotionLabel::Fear,
        EmotionLabel::Disgust,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Angry => "angry",
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Surprise => "surprise",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::None => "none",
        }
    }

    pub fn is_none(self) -> bool {
        self == EmotionLabel::None
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmotionLabel {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = match s.trim().to_ascii_lowercase().as_str() {
            "happy" => EmotionLabel::Happy,
            "sad" => EmotionLabel::Sad,
            "angry" => EmotionLabel::Angry,
            "neutral" => EmotionLabel::Neutral,
            "surprise" => EmotionLabel::Surprise,
            "fear" => EmotionLabel::Fear,
            "disgust" => EmotionLabel::Disgust,
            "none" | "" => EmotionLabel::None,
            other => return Err(SyncError::Decode(format!("unknown emotion `{other}`"))),
        };
        Ok(label)
    }
}

/// Detector certainty in percent, always within `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    pub const ZERO: Confidence = Confidence(0.0);

    pub fn new(value: f64) -> Result<Self, SyncError> {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(SyncError::Decode(format!(
                "confidence {value} outside [0, 100]"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl FromStr for Rgb {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .trim()
            .strip_prefix('#')
            .filter(|h| h.len() == 6 && h.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or_else(|| SyncError::InvalidMapping(format!("color `{s}` is not #RRGGBB")))?;
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| SyncError::InvalidMapping(format!("color `{s}` is not #RRGGBB")))
        };
        Ok(Rgb::new(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl TryFrom<String> for Rgb {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        value.to_string()
    }
}

/// Rendering instructions for one emotion. Serialises to the backend's mapping body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectParameters {
    pub color: Rgb,
    pub brightness: u8,
    #[serde(rename = "transition_speed")]
    pub transition_seconds: f64,
}

impl EffectParameters {
    pub const fn new(color: Rgb, brightness: u8, transition_seconds: f64) -> Self {
        Self {
            color,
            brightness,
            transition_seconds,
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.brightness > 100 {
            return Err(SyncError::InvalidMapping(format!(
                "brightness {} outside [0, 100]",
                self.brightness
            )));
        }
        if !self.transition_seconds.is_finite() || self.transition_seconds <= 0.0 {
            return Err(SyncError::InvalidMapping(format!(
                "transition {}s must be positive",
                self.transition_seconds
            )));
        }
        Ok(())
    }
}

/// Applied on teardown so the surface settles back to a neutral white wash.
pub const RESET_EFFECT: EffectParameters =
    EffectParameters::new(Rgb::new(0xFF, 0xFF, 0xFF), 50, 1.5);

/// Label -> effect lookup, seeded with a full default set and only ever replaced entry-by-entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterTable(BTreeMap<EmotionLabel, EffectParameters>);

impl Default for ParameterTable {
    fn default() -> Self {
        let entries = [
            (EmotionLabel::Happy, EffectParameters::new(Rgb::new(0xFF, 0xD7, 0x00), 100, 1.0)),
            (EmotionLabel::Sad, EffectParameters::new(Rgb::new(0x41, 0x69, 0xE1), 30, 2.0)),
            (EmotionLabel::Angry, EffectParameters::new(Rgb::new(0xFF, 0x00, 0x00), 80, 0.5)),
            (EmotionLabel::Neutral, EffectParameters::new(Rgb::new(0xFF, 0xFF, 0xFF), 50, 1.5)),
            (EmotionLabel::Surprise, EffectParameters::new(Rgb::new(0xFF, 0x69, 0xB4), 90, 0.3)),
            (EmotionLabel::Fear, EffectParameters::new(Rgb::new(0x80, 0x00, 0x80), 40, 0.8)),
            (EmotionLabel::Disgust, EffectParameters::new(Rgb::new(0x9A, 0xCD, 0x32), 60, 1.0)),
        ];
        Self(entries.into_iter().collect())
    }
}

impl ParameterTable {
    /// A table with no entries. Only useful to exercise the missing-mapping path.
    #[cfg(test)]
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, label: EmotionLabel) -> Option<&EffectParameters> {
        self.0.get(&label)
    }

    pub fn set(&mut self, label: EmotionLabel, params: EffectParameters) -> Result<(), SyncError> {
        if label.is_none() {
            return Err(SyncError::InvalidMapping(
                "the `none` sentinel cannot carry a mapping".into(),
            ));
        }
        params.validate()?;
        self.0.insert(label, params);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed,
    Errored,
}

impl ChannelState {
    /// Badge text for front ends. Never consulted for correctness decisions.
    pub fn badge(self) -> &'static str {
        match self {
            ChannelState::Idle => "Idle",
            ChannelState::Connecting => "Connecting…",
            ChannelState::Open => "Connected",
            ChannelState::Closed => "Disconnected",
            ChannelState::Errored => "Push failed (polling)",
        }
    }
}

/// Process-wide detection state, also the shape returned to front ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionSession {
    pub enabled: bool,
    pub label: EmotionLabel,
    pub confidence: Confidence,
}

impl Default for DetectionSession {
    fn default() -> Self {
        Self {
            enabled: false,
            label: EmotionLabel::Neutral,
            confidence: Confidence::ZERO,
        }
    }
}

/// Which channel delivered a candidate update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Push,
    Pull,
}

/// A decoded candidate update, not yet reconciled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelUpdate {
    pub label: EmotionLabel,
    pub confidence: Confidence,
}

/// `GET /api/status` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub is_running: bool,
    pub current_emotion: String,
    pub confidence: f64,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl StatusResponse {
    /// Candidate update carried by this status, or `None` when detection is idle.
    pub fn into_update(self) -> Result<Option<ChannelUpdate>, SyncError> {
        if !self.is_running {
            return Ok(None);
        }
        let label: EmotionLabel = self.current_emotion.parse()?;
        if label.is_none() {
            return Ok(None);
        }
        Ok(Some(ChannelUpdate {
            label,
            confidence: Confidence::new(self.confidence)?,
        }))
    }
}

/// Text frame pushed on `/ws/emotions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl PushPayload {
    /// Decode a raw frame. A missing emotion decodes to the `None` sentinel.
    pub fn decode(raw: &str) -> Result<ChannelUpdate, SyncError> {
        let payload: PushPayload = serde_json::from_str(raw)
            .map_err(|e| SyncError::Decode(format!("push frame: {e}")))?;
        let label = match payload.emotion.as_deref() {
            Some(emotion) => emotion.parse()?,
            None => EmotionLabel::None,
        };
        Ok(ChannelUpdate {
            label,
            confidence: Confidence::new(payload.confidence.unwrap_or(0.0))?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Disabled,
    NoDetection,
    Malformed,
}

/// Events emitted for presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    ChannelState {
        state: ChannelState,
    },
    Accepted {
        origin: Origin,
        label: EmotionLabel,
        confidence: Confidence,
    },
    Rejected {
        origin: Origin,
        reason: RejectReason,
    },
    MappingMissing {
        label: EmotionLabel,
    },
    MappingUpdated {
        label: EmotionLabel,
        params: EffectParameters,
    },
    Applied {
        fill: Fill,
    },
    Reset,
    Info {
        message: String,
    },
}

impl SyncEvent {
    pub fn info(message: impl Into<String>) -> Self {
        SyncEvent::Info {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_case_insensitively() {
        assert_eq!("Happy".parse::<EmotionLabel>().unwrap(), EmotionLabel::Happy);
        assert_eq!("none".parse::<EmotionLabel>().unwrap(), EmotionLabel::None);
        assert!("bored".parse::<EmotionLabel>().is_err());
    }

    #[test]
    fn rgb_parses_and_prints_hex() {
        let c: Rgb = "#4169e1".parse().unwrap();
        assert_eq!(c, Rgb::new(0x41, 0x69, 0xE1));
        assert_eq!(c.to_string(), "#4169E1");
        assert!("4169E1".parse::<Rgb>().is_err());
        assert!("#4169E".parse::<Rgb>().is_err());
        assert!("#GG69E1".parse::<Rgb>().is_err());
        assert!("#+F+F+F".parse::<Rgb>().is_err());
    }

    #[test]
    fn signed_hex_colour_is_not_a_valid_mapping() {
        let parsed = serde_json::from_str::<EffectParameters>(
            r##"{"color": "#+1+2+3", "brightness": 50, "transition_speed": 1.0}"##,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn default_table_covers_every_detectable_label() {
        let table = ParameterTable::default();
        for label in EmotionLabel::DETECTABLE {
            assert!(table.get(label).is_some(), "missing {label}");
        }
        assert!(table.get(EmotionLabel::None).is_none());
    }

    #[test]
    fn table_rejects_invalid_entries() {
        let mut table = ParameterTable::default();
        let bad_brightness = EffectParameters::new(Rgb::new(0, 0, 0), 101, 1.0);
        let bad_speed = EffectParameters::new(Rgb::new(0, 0, 0), 10, 0.0);
        assert!(table.set(EmotionLabel::Sad, bad_brightness).is_err());
        assert!(table.set(EmotionLabel::Sad, bad_speed).is_err());
        assert!(table.set(EmotionLabel::None, RESET_EFFECT).is_err());
        assert_eq!(table, ParameterTable::default());
    }

    #[test]
    fn mapping_body_uses_backend_field_names() {
        let params = EffectParameters::new(Rgb::new(0xFF, 0, 0), 80, 0.5);
        let json = serde_json::to_value(params).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"color": "#FF0000", "brightness": 80, "transition_speed": 0.5})
        );
    }

    #[test]
    fn status_only_yields_updates_while_running() {
        let idle = StatusResponse {
            is_running: false,
            current_emotion: "sad".into(),
            confidence: 61.0,
            timestamp: None,
        };
        assert_eq!(idle.into_update().unwrap(), None);

        let nothing_yet = StatusResponse {
            is_running: true,
            current_emotion: "none".into(),
            confidence: 0.0,
            timestamp: None,
        };
        assert_eq!(nothing_yet.into_update().unwrap(), None);

        let running: StatusResponse = serde_json::from_str(
            r#"{"is_running": true, "current_emotion": "sad", "confidence": 61.0}"#,
        )
        .unwrap();
        let update = running.into_update().unwrap().unwrap();
        assert_eq!(update.label, EmotionLabel::Sad);
        assert_eq!(update.confidence.value(), 61.0);
    }

    #[test]
    fn push_frames_decode_or_fail_cleanly() {
        let update = PushPayload::decode(r#"{"emotion": "happy", "confidence": 87.5}"#).unwrap();
        assert_eq!(update.label, EmotionLabel::Happy);
        assert_eq!(update.confidence.value(), 87.5);

        let absent = PushPayload::decode(r#"{"confidence": 12.0}"#).unwrap();
        assert!(absent.label.is_none());

        assert!(PushPayload::decode("not json").is_err());
        assert!(PushPayload::decode(r#"{"emotion": "happy", "confidence": 250}"#).is_err());
        assert!(PushPayload::decode(r#"{"emotion": "elated", "confidence": 50}"#).is_err());
    }

    #[test]
    fn ws_url_follows_base_scheme() {
        assert_eq!(
            SyncConfig::ws_url_for("http://localhost:8000/"),
            "ws://localhost:8000/ws/emotions"
        );
        assert_eq!(
            SyncConfig::ws_url_for("https://lights.example"),
            "wss://lights.example/ws/emotions"
        );
    }
}
