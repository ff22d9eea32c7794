//! Test utilities for property-based testing
//!
//! This module provides generators and helpers for proptest.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    /// Generate a valid recipe id (lowercase alphanumeric with hyphens)
    pub fn recipe_id() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,14}[a-z0-9]?".prop_filter("Id must not be empty", |s| !s.is_empty())
    }

    /// Generate a valid semver version string
    pub fn semver_version() -> impl Strategy<Value = String> {
        (1u32..100, 0u32..100, 0u32..100)
            .prop_map(|(major, minor, patch)| format!("{major}.{minor}.{patch}"))
    }

    /// Generate a valid SHA256 hash (64 hex characters)
    pub fn sha256_hash() -> impl Strategy<Value = String> {
        "[0-9a-f]{64}"
    }

    /// Generate a macOS release string (`10.x` or a bare major)
    pub fn macos_release() -> impl Strategy<Value = String> {
        prop_oneof![
            (9u32..16).prop_map(|minor| format!("10.{minor}")),
            (11u32..16).prop_map(|major| major.to_string()),
            Just("26".to_string()),
        ]
    }

    /// Generate a CPU architecture name
    pub fn arch() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("arm64".to_string()),
            Just("x86_64".to_string()),
            Just("aarch64".to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_recipe_id_generator(id in recipe_id()) {
            prop_assert!(!id.is_empty());
            prop_assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }

        #[test]
        fn test_semver_version_generator(version in semver_version()) {
            prop_assert!(semver::Version::parse(&version).is_ok());
        }

        #[test]
        fn test_sha256_hash_generator(hash in sha256_hash()) {
            prop_assert_eq!(hash.len(), 64);
            prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        }

        #[test]
        fn test_macos_release_generator(release in macos_release()) {
            prop_assert!(release.parse::<crate::core::platform::OsVersion>().is_ok());
        }
    }
}
