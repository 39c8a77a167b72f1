//! Claims identity: the opaque bag of verified caller attributes used to
//! resolve per-call audience and scopes for outbound transport operations.
//!
//! This crate never validates tokens itself; it only reads claims the hosting
//! layer has already verified.

use std::collections::HashMap;

/// Well-known claim names.
pub mod claims {
    /// The application id of the caller.
    pub const APP_ID: &str = "appid";
    /// The audience the token was issued for.
    pub const AUDIENCE: &str = "aud";
    /// The authorized party (v2 tokens carry the app id here).
    pub const AUTHORIZED_PARTY: &str = "azp";
    /// Token version discriminator.
    pub const VERSION: &str = "ver";
}

/// A verified caller identity, read as an opaque claim bag.
#[derive(Debug, Clone, Default)]
pub struct ClaimsIdentity {
    claims: HashMap<String, String>,
    auth_type: Option<String>,
}

impl ClaimsIdentity {
    pub fn new(claims: HashMap<String, String>, auth_type: Option<String>) -> Self {
        Self { claims, auth_type }
    }

    /// An identity with no claims, used for unauthenticated channels and tests.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_type.is_some()
    }

    /// Looks up a single claim value by name.
    pub fn claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).map(String::as_str)
    }

    /// The caller's application id, honoring the v1/v2 token layout: v2 tokens
    /// carry the app id in the authorized-party claim.
    pub fn app_id(&self) -> Option<&str> {
        match self.claim(claims::VERSION) {
            Some("2.0") => self.claim(claims::AUTHORIZED_PARTY),
            _ => self.claim(claims::APP_ID),
        }
    }

    /// The audience the caller addressed.
    pub fn audience(&self) -> Option<&str> {
        self.claim(claims::AUDIENCE)
    }

    /// The app id outbound calls should present, which for channel-service
    /// traffic is the audience of the inbound token.
    pub fn outgoing_app_id(&self) -> Option<&str> {
        self.audience().or_else(|| self.app_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(pairs: &[(&str, &str)]) -> ClaimsIdentity {
        let claims = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClaimsIdentity::new(claims, Some("Bearer".to_string()))
    }

    #[test]
    fn test_app_id_v1_token() {
        let id = identity(&[(claims::APP_ID, "app-1"), (claims::VERSION, "1.0")]);
        assert_eq!(id.app_id(), Some("app-1"));
    }

    #[test]
    fn test_app_id_v2_token_uses_authorized_party() {
        let id = identity(&[
            (claims::AUTHORIZED_PARTY, "app-2"),
            (claims::VERSION, "2.0"),
        ]);
        assert_eq!(id.app_id(), Some("app-2"));
    }

    #[test]
    fn test_anonymous_identity_has_no_claims() {
        let id = ClaimsIdentity::anonymous();
        assert!(!id.is_authenticated());
        assert_eq!(id.app_id(), None);
        assert_eq!(id.outgoing_app_id(), None);
    }

    #[test]
    fn test_outgoing_app_id_prefers_audience() {
        let id = identity(&[(claims::AUDIENCE, "aud-1"), (claims::APP_ID, "app-1")]);
        assert_eq!(id.outgoing_app_id(), Some("aud-1"));
    }
}
