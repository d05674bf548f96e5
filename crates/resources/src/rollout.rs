//! `required-rollout` policy for Deployments and DaemonSets.

use std::fmt;

use vigil_core::{ValidationError, REQUIRED_ROLLOUT_ANNOTATION};

use crate::ResourceBase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RolloutPolicy {
    /// Every replica updated and available.
    #[default]
    Full,
    /// Accept as soon as the controller has observed the new spec.
    None,
    /// Updated everywhere, with availability allowed to dip by the strategy's maxUnavailable.
    MaxUnavailable,
    /// At least this percentage (1..=100) of desired replicas updated and available.
    Percent(u8),
}

impl RolloutPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "full" => Some(Self::Full),
            "none" => Some(Self::None),
            "maxUnavailable" => Some(Self::MaxUnavailable),
            other => {
                let pct: u8 = other.strip_suffix('%')?.parse().ok()?;
                (1..=100).contains(&pct).then_some(Self::Percent(pct))
            }
        }
    }

    /// Read from the manifest annotation; absent means `full`.
    pub fn from_base(base: &ResourceBase) -> Result<Self, ValidationError> {
        match base.annotation(REQUIRED_ROLLOUT_ANNOTATION) {
            None => Ok(Self::Full),
            Some(raw) => Self::parse(raw).ok_or_else(|| ValidationError::InvalidRollout {
                id: base.id().to_string(),
                annotation: REQUIRED_ROLLOUT_ANNOTATION,
                value: raw.to_string(),
            }),
        }
    }

    /// `ceil(desired * pct / 100)` for percentage policies; `None` when that overflows.
    pub fn minimum_for(self, desired: i64) -> Option<i64> {
        match self {
            Self::Percent(p) => Some(desired.checked_mul(i64::from(p))?.checked_add(99)? / 100),
            _ => None,
        }
    }
}

impl fmt::Display for RolloutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::None => f.write_str("none"),
            Self::MaxUnavailable => f.write_str("maxUnavailable"),
            Self::Percent(p) => write!(f, "{}%", p),
        }
    }
}
