//! Cross-namespace profile policy.

use super::ReconcilerError;
use crate::crd::ProfileRef;

/// Namespace of the profile `profile` may be read from, or `Unauthorized`
/// when it lives elsewhere and cross-namespace profiles are disabled.
pub fn authorize_profile<'a>(
    own_namespace: &'a str,
    profile: &'a ProfileRef,
    allow_cross_namespace: bool,
) -> Result<&'a str, ReconcilerError> {
    let profile_namespace = profile.effective_namespace(own_namespace);
    if profile_namespace != own_namespace && !allow_cross_namespace {
        return Err(ReconcilerError::Unauthorized {
            namespace: own_namespace.to_string(),
            profile_namespace: profile_namespace.to_string(),
            profile: profile.name.clone(),
        });
    }
    Ok(profile_namespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(namespace: Option<&str>) -> ProfileRef {
        ProfileRef {
            name: "vault".to_string(),
            namespace: namespace.map(str::to_string),
        }
    }

    #[test]
    fn test_same_namespace_always_allowed() {
        assert_eq!(authorize_profile("apps", &profile(None), false).unwrap(), "apps");
        assert_eq!(
            authorize_profile("apps", &profile(Some("apps")), false).unwrap(),
            "apps"
        );
    }

    #[test]
    fn test_cross_namespace_denied_by_default() {
        let p = profile(Some("shared"));
        let err = authorize_profile("apps", &p, false).unwrap_err();
        match err {
            ReconcilerError::Unauthorized {
                namespace,
                profile_namespace,
                profile,
            } => {
                assert_eq!(namespace, "apps");
                assert_eq!(profile_namespace, "shared");
                assert_eq!(profile, "vault");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_cross_namespace_allowed_when_enabled() {
        let p = profile(Some("shared"));
        assert_eq!(authorize_profile("apps", &p, true).unwrap(), "shared");
    }
}
