//! Static media capability registry and compatibility checks
//!
//! The registry describes what the router can route; peers hand us their own
//! `RtpCapabilities` and consumer creation is gated on a codec-level
//! intersection between the two.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Media kind of a track, producer or codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// One codec a router or peer can send/receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpCodecCapability {
    /// Media kind this codec applies to
    pub kind: MediaKind,

    /// MIME type, e.g. "audio/opus" or "video/VP8"
    pub mime_type: String,

    /// RTP clock rate in Hz
    pub clock_rate: u32,

    /// Channel count; audio only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,

    /// Codec-specific parameters
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl RtpCodecCapability {
    /// Whether `other` is the same codec for routing purposes.
    ///
    /// MIME types compare case-insensitively; channel count only matters for
    /// audio. Codec-specific parameters do not participate in matching.
    pub fn matches(&self, other: &RtpCodecCapability) -> bool {
        self.kind == other.kind
            && self.mime_type.eq_ignore_ascii_case(&other.mime_type)
            && self.clock_rate == other.clock_rate
            && (self.kind != MediaKind::Audio || self.channels == other.channels)
    }
}

/// Immutable description of what a router or peer can send/receive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtpCapabilities {
    /// Supported codecs
    pub codecs: Vec<RtpCodecCapability>,
}

impl RtpCapabilities {
    /// Whether these capabilities include a codec matching `codec`
    pub fn supports(&self, codec: &RtpCodecCapability) -> bool {
        self.codecs.iter().any(|c| c.matches(codec))
    }

    /// Whether a receiver with these capabilities can consume a stream
    /// described by `parameters`. True if at least one of the stream's codecs
    /// is supported.
    pub fn can_consume(&self, parameters: &RtpParameters) -> bool {
        parameters.codecs.iter().any(|c| self.supports(c))
    }

    /// The subset of `parameters` this receiver supports
    pub fn intersect(&self, parameters: &RtpParameters) -> RtpParameters {
        RtpParameters {
            codecs: parameters
                .codecs
                .iter()
                .filter(|c| self.supports(c))
                .cloned()
                .collect(),
        }
    }
}

/// RTP parameters describing the encoding of one published stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtpParameters {
    /// Codecs the stream is encoded with, in preference order
    pub codecs: Vec<RtpCodecCapability>,
}

/// Static registry of the codecs the router negotiates at creation
#[derive(Debug)]
pub struct CapabilityRegistry;

impl CapabilityRegistry {
    /// Codec set handed to the engine when the router is created:
    /// Opus 48 kHz stereo and VP8 with a 1 Mbps starting bitrate hint.
    pub fn router_codecs() -> Vec<RtpCodecCapability> {
        vec![
            RtpCodecCapability {
                kind: MediaKind::Audio,
                mime_type: "audio/opus".to_string(),
                clock_rate: 48_000,
                channels: Some(2),
                parameters: HashMap::new(),
            },
            RtpCodecCapability {
                kind: MediaKind::Video,
                mime_type: "video/VP8".to_string(),
                clock_rate: 90_000,
                channels: None,
                parameters: HashMap::from([(
                    "x-google-start-bitrate".to_string(),
                    serde_json::json!(1000),
                )]),
            },
        ]
    }

    /// Registry output as `RtpCapabilities`
    pub fn router_capabilities() -> RtpCapabilities {
        RtpCapabilities {
            codecs: Self::router_codecs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opus() -> RtpCodecCapability {
        RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            clock_rate: 48_000,
            channels: Some(2),
            parameters: HashMap::new(),
        }
    }

    fn vp8() -> RtpCodecCapability {
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            clock_rate: 90_000,
            channels: None,
            parameters: HashMap::new(),
        }
    }

    fn h264() -> RtpCodecCapability {
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/H264".to_string(),
            clock_rate: 90_000,
            channels: None,
            parameters: HashMap::new(),
        }
    }

    #[test]
    fn test_registry_has_opus_and_vp8() {
        let caps = CapabilityRegistry::router_capabilities();
        assert!(caps.supports(&opus()));
        assert!(caps.supports(&vp8()));
        assert!(!caps.supports(&h264()));
    }

    #[test]
    fn test_mime_type_matches_case_insensitively() {
        let mut lowered = vp8();
        lowered.mime_type = "video/vp8".to_string();
        assert!(vp8().matches(&lowered));
    }

    #[test]
    fn test_audio_channels_must_match() {
        let mut mono = opus();
        mono.channels = Some(1);
        assert!(!opus().matches(&mono));
    }

    #[test]
    fn test_video_ignores_channels() {
        let mut with_channels = vp8();
        with_channels.channels = Some(2);
        assert!(vp8().matches(&with_channels));
    }

    #[test]
    fn test_can_consume_requires_codec_overlap() {
        let receiver = RtpCapabilities {
            codecs: vec![opus()],
        };
        let audio_stream = RtpParameters {
            codecs: vec![opus()],
        };
        let video_stream = RtpParameters {
            codecs: vec![vp8()],
        };

        assert!(receiver.can_consume(&audio_stream));
        assert!(!receiver.can_consume(&video_stream));
    }

    #[test]
    fn test_intersect_filters_unsupported_codecs() {
        let receiver = CapabilityRegistry::router_capabilities();
        let stream = RtpParameters {
            codecs: vec![vp8(), h264()],
        };

        let negotiated = receiver.intersect(&stream);
        assert_eq!(negotiated.codecs.len(), 1);
        assert_eq!(negotiated.codecs[0].mime_type, "video/VP8");
    }

    #[test]
    fn test_capabilities_serialization() {
        let caps = CapabilityRegistry::router_capabilities();
        let json = serde_json::to_string(&caps).unwrap();
        let parsed: RtpCapabilities = serde_json::from_str(&json).unwrap();
        assert_eq!(caps, parsed);
    }
}
