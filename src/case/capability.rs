//! Capability probing for environment skips.
//!
//! A case that needs hardware or a framework the device lacks exits early via
//! [`PchError::Skipped`]. That is a scope exclusion, not a failure.

#![allow(missing_docs)]

use std::collections::BTreeSet;

use crate::core::config::CapabilityConfig;
use crate::core::errors::{PchError, Result};

/// Well-known capability names used by the bundled suites.
pub mod features {
    pub const CAMERA: &str = "camera";
    pub const MICROPHONE: &str = "microphone";
    pub const LIVE_TV: &str = "live_tv";
    pub const WEBVIEW: &str = "webview";
    pub const DEVICE_ADMIN: &str = "device_admin";
    pub const VIDEO_DECODER_AVC: &str = "video_decoder_avc";
}

/// Source of truth for what the device under test supports.
pub trait Capabilities: Send + Sync {
    fn has(&self, feature: &str) -> bool;

    /// `Ok` if present, otherwise an environment skip.
    fn require(&self, feature: &str) -> Result<()> {
        if self.has(feature) {
            Ok(())
        } else {
            Err(PchError::Skipped {
                capability: feature.to_string(),
            })
        }
    }
}

/// Capabilities declared in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredCapabilities {
    features: BTreeSet<String>,
}

impl DeclaredCapabilities {
    pub fn new<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            features: features.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(cfg: &CapabilityConfig) -> Self {
        Self::new(cfg.features.iter().cloned())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(String::as_str)
    }
}

impl Capabilities for DeclaredCapabilities {
    fn has(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }
}
