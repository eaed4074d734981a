//! Test utilities for property-based testing
//!
//! This module provides generators and helpers for proptest.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    use crate::core::reason::BuildReason;

    /// Generate a valid package name (lowercase alphanumeric with hyphens)
    pub fn package_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,30}[a-z0-9]?".prop_filter("Name must not be empty", |s| !s.is_empty())
    }

    /// Generate an upstream version string
    pub fn version() -> impl Strategy<Value = String> {
        (1u32..100, 0u32..100, 0u32..100)
            .prop_map(|(major, minor, patch)| format!("{major}.{minor}.{patch}"))
    }

    /// Generate an arbitrary build reason
    pub fn build_reason() -> impl Strategy<Value = BuildReason> {
        prop_oneof![
            Just(BuildReason::UpdatedPkgrel),
            Just(BuildReason::UpdatedFailed),
            package_name().prop_map(|depender| BuildReason::Depended { depender }),
            prop::collection::vec(package_name(), 1..4)
                .prop_map(|deps| BuildReason::FailedByDeps { deps }),
            prop::option::of(package_name()).prop_map(|runner| BuildReason::Cmdline { runner }),
            prop::collection::vec(package_name(), 1..4)
                .prop_map(|update_on_build| BuildReason::OnBuild { update_on_build }),
            (
                prop::collection::vec((0usize..4, "[a-z]{3,8}"), 1..3),
                (version(), version()),
            )
                .prop_map(|(items, (old, new))| BuildReason::NvChecker {
                    items,
                    changes: vec![(old, new)],
                }),
        ]
    }
}
