//! Platform detection and header injection.
//!
//! Before a socket is constructed, the factory runs the caller's headers
//! through a [`HeaderPolicy`]. The policy only ever adds headers; a value the
//! caller supplied (under any letter case) is never replaced.
//!
//! | Condition | Header added |
//! |-----------|--------------|
//! | Mobile OS | `User-Agent` |
//! | Non-browser host | `Origin`, `Referer` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use tracing::trace;
use url::Url;

use crate::transport::Headers;
use crate::transport::connector::has_header;

// ============================================================================
// Constants
// ============================================================================

/// User agent sent from iOS hosts.
pub const IOS_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
     AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

/// User agent sent from Android hosts.
pub const ANDROID_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36";

const USER_AGENT: &str = "User-Agent";
const ORIGIN: &str = "Origin";
const REFERER: &str = "Referer";

// ============================================================================
// Platform
// ============================================================================

/// Operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// Apple mobile.
    Ios,
    /// Android.
    Android,
    /// Anything else.
    #[default]
    Other,
}

impl Os {
    /// Returns `true` for mobile operating systems.
    #[inline]
    #[must_use]
    pub const fn is_mobile(self) -> bool {
        matches!(self, Self::Ios | Self::Android)
    }
}

/// Kind of process hosting the multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Host {
    /// A browser, which sets origin headers itself.
    Browser,
    /// A native process.
    #[default]
    Native,
}

/// Where the multiplexer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system family.
    pub os: Os,
    /// Host kind.
    pub host: Host,
}

impl Platform {
    /// Creates a platform description.
    #[inline]
    #[must_use]
    pub const fn new(os: Os, host: Host) -> Self {
        Self { os, host }
    }

    /// Detects the platform from the compile target.
    #[must_use]
    pub const fn detect() -> Self {
        let os = if cfg!(target_os = "ios") {
            Os::Ios
        } else if cfg!(target_os = "android") {
            Os::Android
        } else {
            Os::Other
        };

        let host = if cfg!(target_arch = "wasm32") {
            Host::Browser
        } else {
            Host::Native
        };

        Self { os, host }
    }
}

// ============================================================================
// HeaderPolicy
// ============================================================================

/// Platform-derived header defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeaderPolicy {
    /// User agent for iOS.
    pub ios_user_agent: String,

    /// User agent for Android.
    pub android_user_agent: String,

    /// Origin for native hosts. Derived from the endpoint when unset.
    pub default_origin: Option<String>,

    /// Referer for native hosts. Derived from the origin when unset.
    pub default_referer: Option<String>,
}

impl Default for HeaderPolicy {
    fn default() -> Self {
        Self {
            ios_user_agent: IOS_USER_AGENT.to_string(),
            android_user_agent: ANDROID_USER_AGENT.to_string(),
            default_origin: None,
            default_referer: None,
        }
    }
}

impl HeaderPolicy {
    /// Overrides the default origin.
    #[inline]
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.default_origin = Some(origin.into());
        self
    }

    /// Overrides the default referer.
    #[inline]
    #[must_use]
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.default_referer = Some(referer.into());
        self
    }

    /// Returns the user agent for `os`, if it needs one.
    #[must_use]
    pub fn user_agent(&self, os: Os) -> Option<&str> {
        match os {
            Os::Ios => Some(&self.ios_user_agent),
            Os::Android => Some(&self.android_user_agent),
            Os::Other => None,
        }
    }

    /// Adds platform defaults to `headers` without overwriting caller values.
    pub fn apply(&self, platform: Platform, endpoint: &str, headers: &mut Headers) {
        if let Some(agent) = self.user_agent(platform.os) {
            insert_missing(headers, USER_AGENT, agent);
        }

        if platform.host == Host::Browser {
            return;
        }

        let origin = self
            .default_origin
            .clone()
            .or_else(|| origin_of(endpoint));

        if let Some(origin) = &origin {
            insert_missing(headers, ORIGIN, origin);
        }

        let referer = self
            .default_referer
            .clone()
            .or_else(|| origin.map(|origin| format!("{origin}/")));

        if let Some(referer) = &referer {
            insert_missing(headers, REFERER, referer);
        }
    }
}

fn insert_missing(headers: &mut Headers, name: &str, value: &str) {
    if !has_header(headers, name) {
        trace!(header = name, "Injecting platform header");
        headers.insert(name.to_string(), value.to_string());
    }
}

/// Derives the HTTP origin that serves a socket endpoint.
fn origin_of(endpoint: &str) -> Option<String> {
    let mut url = Url::parse(endpoint).ok()?;

    let http_scheme = match url.scheme() {
        "ws" => Some("http"),
        "wss" => Some("https"),
        _ => None,
    };
    if let Some(scheme) = http_scheme {
        url.set_scheme(scheme).ok()?;
    }

    match url.origin() {
        origin @ url::Origin::Tuple(..) => Some(origin.ascii_serialization()),
        url::Origin::Opaque(_) => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
