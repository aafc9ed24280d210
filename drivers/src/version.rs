use semver::Version;

/// A direct-upgrade rule: any `from` whose `(major, minor)` matches this
/// version, at patch `>= patch`, may upgrade directly.
#[derive(Debug, Clone)]
pub struct DirectRule {
    pub version: Version,
}

/// A via-upgrade rule: `from` versions at or above `from_prefix` (matched
/// the same `(major, minor)`-plus-patch-floor way) must pass through every
/// listed intermediate runtime first.
#[derive(Debug, Clone)]
pub struct ViaRule {
    pub from_prefix: Version,
    pub intermediates: Vec<Version>,
}

/// Injected policy value; the package-level defaults other systems bake in
/// as singletons are seeded here at construction instead.
#[derive(Debug, Clone, Default)]
pub struct VersionPolicy {
    pub direct: Vec<DirectRule>,
    pub via: Vec<ViaRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeDecision {
    Direct,
    Via { required_intermediates: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeError {
    Downgrade,
    Unsupported,
    MissingIntermediates(Vec<String>),
}

impl std::fmt::Display for UpgradeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpgradeError::Downgrade => write!(f, "downgrade"),
            UpgradeError::Unsupported => write!(f, "unsupported upgrade path"),
            UpgradeError::MissingIntermediates(v) => {
                write!(f, "needs intermediate runtimes: {}", v.join(", "))
            }
        }
    }
}

fn same_minor_patch_ge(candidate: &Version, rule: &Version) -> bool {
    candidate.major == rule.major && candidate.minor == rule.minor && candidate.patch >= rule.patch
}

impl VersionPolicy {
    /// Packages whose upgrade-label version satisfies a via-rule's
    /// intermediate requirement. Passed in rather than fetched here so the
    /// policy stays a pure function of its inputs.
    pub fn check_upgrade_path(
        &self,
        from: &Version,
        to: &Version,
        available_runtime_packages: &[Version],
    ) -> Result<UpgradeDecision, UpgradeError> {
        if from > to {
            return Err(UpgradeError::Downgrade);
        }

        if self.direct.iter().any(|r| same_minor_patch_ge(from, &r.version)) {
            return Ok(UpgradeDecision::Direct);
        }

        if let Some(rule) = self.via.iter().find(|r| same_minor_patch_ge(from, &r.from_prefix)) {
            let missing: Vec<String> = rule
                .intermediates
                .iter()
                .filter(|required| {
                    !available_runtime_packages
                        .iter()
                        .any(|pkg| same_minor_patch_ge(pkg, required))
                })
                .map(|v| v.to_string())
                .collect();
            if missing.is_empty() {
                return Ok(UpgradeDecision::Via {
                    required_intermediates: rule.intermediates.iter().map(|v| v.to_string()).collect(),
                });
            }
            return Err(UpgradeError::MissingIntermediates(missing));
        }

        Err(UpgradeError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn policy() -> VersionPolicy {
        VersionPolicy {
            direct: vec![
                DirectRule { version: v("2.0.0") },
                DirectRule { version: v("3.0.0") },
            ],
            via: vec![
                ViaRule {
                    from_prefix: v("1.0.0"),
                    intermediates: vec![v("2.0.10")],
                },
                ViaRule {
                    from_prefix: v("1.1.0"),
                    intermediates: vec![v("2.1.0")],
                },
            ],
        }
    }

    #[test]
    fn direct_upgrade_paths() {
        let p = policy();
        let to = v("3.0.5");
        assert_eq!(p.check_upgrade_path(&v("2.0.5"), &to, &[]), Ok(UpgradeDecision::Direct));
        assert_eq!(p.check_upgrade_path(&v("3.0.1"), &to, &[]), Ok(UpgradeDecision::Direct));
    }

    #[test]
    fn via_upgrade_requires_intermediate_package() {
        let p = policy();
        let to = v("3.0.5");
        assert_eq!(
            p.check_upgrade_path(&v("1.0.0"), &to, &[]),
            Err(UpgradeError::MissingIntermediates(vec!["2.0.10".into()]))
        );
        assert_eq!(
            p.check_upgrade_path(&v("1.0.0"), &to, &[v("2.0.12")]),
            Ok(UpgradeDecision::Via {
                required_intermediates: vec!["2.0.10".into()]
            })
        );
    }

    #[test]
    fn via_without_matching_package_reports_needed() {
        let p = policy();
        let to = v("3.0.5");
        assert_eq!(
            p.check_upgrade_path(&v("1.1.0"), &to, &[]),
            Err(UpgradeError::MissingIntermediates(vec!["2.1.0".into()]))
        );
    }

    #[test]
    fn downgrade_and_unsupported() {
        let p = policy();
        let to = v("3.0.5");
        assert_eq!(p.check_upgrade_path(&v("3.0.7"), &to, &[]), Err(UpgradeError::Downgrade));
        assert_eq!(p.check_upgrade_path(&v("0.0.1"), &to, &[]), Err(UpgradeError::Unsupported));
    }
}
