use subtle::ConstantTimeEq;

/// Bearer-token check for the cron endpoints.
///
/// The token is only demanded when a secret is configured and enforcement is
/// on (production). Otherwise every caller is let through.
#[derive(Debug, Clone, Default)]
pub struct CronGuard {
    secret: Option<String>,
    enforce: bool,
}

impl CronGuard {
    pub fn new(secret: Option<String>, enforce: bool) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            enforce,
        }
    }

    pub fn is_enforced(&self) -> bool {
        self.enforce && self.secret.is_some()
    }

    /// `header` is the raw `Authorization` value.
    pub fn authorize(&self, header: Option<&str>) -> bool {
        let Some(secret) = self.secret.as_deref().filter(|_| self.enforce) else {
            return true;
        };
        header
            .and_then(|h| h.strip_prefix("Bearer "))
            .is_some_and(|token| token.trim().as_bytes().ct_eq(secret.as_bytes()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_without_secret() {
        let guard = CronGuard::new(None, true);
        assert!(!guard.is_enforced());
        assert!(guard.authorize(None));
    }

    #[test]
    fn open_outside_production() {
        let guard = CronGuard::new(Some("s3cret".into()), false);
        assert!(guard.authorize(None));
        assert!(guard.authorize(Some("Bearer wrong")));
    }

    #[test]
    fn enforced_requires_matching_bearer() {
        let guard = CronGuard::new(Some("s3cret".into()), true);
        assert!(guard.is_enforced());
        assert!(guard.authorize(Some("Bearer s3cret")));
        assert!(!guard.authorize(Some("Bearer s3cre")));
        assert!(!guard.authorize(Some("s3cret")));
        assert!(!guard.authorize(Some("Basic s3cret")));
        assert!(!guard.authorize(None));
    }

    #[test]
    fn token_length_mismatch_is_rejected() {
        let guard = CronGuard::new(Some("s3cret".into()), true);
        assert!(!guard.authorize(Some("Bearer s3cret-and-more")));
        assert!(!guard.authorize(Some("Bearer ")));
        assert!(guard.authorize(Some("Bearer  s3cret ")));
    }

    #[test]
    fn empty_secret_counts_as_unset() {
        let guard = CronGuard::new(Some(String::new()), true);
        assert!(guard.authorize(None));
    }
}
