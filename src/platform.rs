use crate::context::{ContextOptions, LatencyHint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    Ios,
    Android,
    Desktop,
}

/// Platform audio policy, kept apart from the engine so the quirks can be
/// swapped out in tests.
pub trait Platform {
    fn kind(&self) -> PlatformKind;

    /// Whether no output may start before the user has touched the page.
    fn requires_explicit_gesture(&self) -> bool;

    fn preferred_context_options(&self) -> ContextOptions;
}

/// Policy derived from a browser user-agent string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserAgentPlatform {
    kind: PlatformKind,
}

impl UserAgentPlatform {
    pub fn from_user_agent(user_agent: &str) -> Self {
        UserAgentPlatform { kind: detect(user_agent) }
    }

    pub fn with_kind(kind: PlatformKind) -> Self {
        UserAgentPlatform { kind }
    }
}

fn detect(user_agent: &str) -> PlatformKind {
    let ua = user_agent.to_lowercase();
    if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ipod") {
        PlatformKind::Ios
    } else if ua.contains("android") {
        PlatformKind::Android
    } else if ua.contains("macintosh") && ua.contains("mobile/") {
        // iPadOS 13+ asks for the desktop site but keeps the Mobile/ token
        PlatformKind::Ios
    } else {
        PlatformKind::Desktop
    }
}

impl Platform for UserAgentPlatform {
    fn kind(&self) -> PlatformKind {
        self.kind
    }

    fn requires_explicit_gesture(&self) -> bool {
        matches!(self.kind, PlatformKind::Ios | PlatformKind::Android)
    }

    fn preferred_context_options(&self) -> ContextOptions {
        match self.kind {
            // iOS resamples badly when a rate is forced, take the hardware rate
            PlatformKind::Ios => ContextOptions { sample_rate: None, latency: LatencyHint::Interactive },
            PlatformKind::Android => ContextOptions { sample_rate: None, latency: LatencyHint::Balanced },
            PlatformKind::Desktop => ContextOptions { sample_rate: None, latency: LatencyHint::Interactive },
        }
    }
}

/// Native hosts: no gesture policy, device defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePlatform;

impl Platform for NativePlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Desktop
    }

    fn requires_explicit_gesture(&self) -> bool {
        false
    }

    fn preferred_context_options(&self) -> ContextOptions {
        ContextOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const IPAD_DESKTOP: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const PIXEL: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Mobile Safari/537.36";
    const MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15";

    #[test]
    fn detects_platforms() {
        assert_eq!(UserAgentPlatform::from_user_agent(IPHONE).kind(), PlatformKind::Ios);
        assert_eq!(UserAgentPlatform::from_user_agent(IPAD_DESKTOP).kind(), PlatformKind::Ios);
        assert_eq!(UserAgentPlatform::from_user_agent(PIXEL).kind(), PlatformKind::Android);
        assert_eq!(UserAgentPlatform::from_user_agent(MAC).kind(), PlatformKind::Desktop);
    }

    #[test]
    fn desktop_is_not_gated() {
        assert!(!UserAgentPlatform::from_user_agent(MAC).requires_explicit_gesture());
        assert!(!NativePlatform.requires_explicit_gesture());
        assert!(UserAgentPlatform::from_user_agent(IPHONE).requires_explicit_gesture());
    }

    #[test]
    fn mobile_options_keep_hardware_rate() {
        let ios = UserAgentPlatform::with_kind(PlatformKind::Ios).preferred_context_options();
        assert_eq!(ios.sample_rate, None);
        assert_eq!(ios.latency, LatencyHint::Interactive);
        let android = UserAgentPlatform::with_kind(PlatformKind::Android).preferred_context_options();
        assert_eq!(android.latency, LatencyHint::Balanced);
    }
}
