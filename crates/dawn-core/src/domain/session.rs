//! Session classification and satellite identity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Satellite device classes.
///
/// Tier 1 devices run ASR/TTS locally and exchange text; Tier 2 devices
/// stream audio and rely on the server for ASR/TTS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SatelliteTier {
    Tier1,
    Tier2,
}

/// The kind of client a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    /// The immortal session 0 owned by the server itself.
    Local,
    SatelliteTier1,
    SatelliteTier2,
    Websocket,
}

impl SessionKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::SatelliteTier1 => "satellite-tier-1",
            Self::SatelliteTier2 => "satellite-tier-2",
            Self::Websocket => "websocket",
        }
    }

    #[must_use]
    pub const fn from_tier(tier: SatelliteTier) -> Self {
        match tier {
            SatelliteTier::Tier1 => Self::SatelliteTier1,
            SatelliteTier::Tier2 => Self::SatelliteTier2,
        }
    }
}

/// Identity a satellite presents at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatelliteIdentity {
    pub uuid: Uuid,
    pub name: String,
    pub location: String,
}
