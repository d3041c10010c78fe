//! Conduit configuration
//!
//! A [ConduitCfg] is built [From::from] a [ConduitOpt] and passed by reference to each
//! stage that needs it. There is no process-wide configuration.

use std::convert::From;
use std::default::Default;
use std::time::Duration;

/// Re-export our clap version
pub use conduit_opt::clap;
/// Re-export our clap [clap::Args]
pub use conduit_opt::ConduitOpt;

use crate::select::cost::{Cost, CostEstimator};

/// A conduit configuration. Contructible [From::from] [ConduitOpt].
#[derive(Clone, Debug)]
pub struct ConduitCfg {
    opt: ConduitOpt,
    weights: Cost<i64>,
}

impl From<ConduitOpt> for ConduitCfg {
    fn from(opt: ConduitOpt) -> Self {
        let weights = CostEstimator::weights(opt.selection.cost_mode);
        Self { opt, weights }
    }
}

impl Default for ConduitCfg {
    fn default() -> Self {
        Self::from(ConduitOpt::default())
    }
}

/// Used to expose all fields of [ConduitOpt].
impl std::ops::Deref for ConduitCfg {
    type Target = ConduitOpt;

    fn deref(&self) -> &Self::Target {
        &self.opt
    }
}

/// Additional functionality
impl ConduitCfg {
    /// How long the optimizer may run; `None` if unlimited.
    pub fn timeout(&self) -> Option<Duration> {
        match self.opt.selection.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
    /// How much each cost feature counts
    pub fn weights(&self) -> Cost<i64> {
        self.weights
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use conduit_opt::CostMode;

    #[test]
    fn zero_timeout_is_unlimited() {
        let mut opt = ConduitOpt::default();
        assert_eq!(ConduitCfg::from(opt.clone()).timeout(), None);
        opt.selection.timeout_ms = 250;
        assert_eq!(
            ConduitCfg::from(opt).timeout(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn weights_follow_cost_mode() {
        let mut opt = ConduitOpt::default();
        assert_eq!(ConduitCfg::from(opt.clone()).weights().wan, 0);
        opt.selection.cost_mode = CostMode::Wan;
        let cfg = ConduitCfg::from(opt);
        assert_eq!(cfg.weights().lan, 0);
        assert!(cfg.weights().messages > ConduitCfg::default().weights().messages);
    }
}
