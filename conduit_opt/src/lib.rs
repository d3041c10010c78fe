//! Options for conduit.
//!
//! ## Contents
//!
//! * A type for conduit options [ConduitOpt] containing fields for module options:
//!    * `selection`: [SelectionOpt]
//!    * `ifc`: [IfcOpt]
//!    * all options types implement:
//!       * std's [Default]
//!       * clap's [Args]; all options are settable by
//!          * environmental variable (SHOUTY_SNEK_CASE), e.g., `"SELECTION_TIMEOUT_MS"`
//!          * long option (kebab-case), e.g., `"--selection-timeout-ms"`
//!       * these a guaranteed to agree (and we test this)
//!
//! ## Constructing custom options in a compiler
//!
//! Use our (rexported) version of clap ([crate::clap]) and include [ConduitOpt] in your
//! [clap::Parser].
//!
//! ```rust
//! use conduit_opt::{ConduitOpt, clap::Parser};
//!
//! #[derive(Parser, Debug)]
//! struct BinaryOpt {
//!     #[command(flatten)]
//!     pub conduit: ConduitOpt,
//! }
//!
//! fn main() {
//!     let opt = BinaryOpt::parse();
//! }
//! ```

use clap::{ArgAction, Args, ValueEnum};

use std::default::Default;

/// Re-export our version of clap.
pub use clap;

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
/// Options that configure conduit
pub struct ConduitOpt {
    /// Options for protocol selection
    #[command(flatten)]
    pub selection: SelectionOpt,
    /// Options for label inference
    #[command(flatten)]
    pub ifc: IfcOpt,
}

/// Options for protocol selection
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct SelectionOpt {
    /// Which network the cost model targets
    #[arg(
        long = "selection-cost-mode",
        env = "SELECTION_COST_MODE",
        value_enum,
        default_value = "lan"
    )]
    pub cost_mode: CostMode,

    /// How long the optimizer may run, in milliseconds (0 means no limit)
    #[arg(
        long = "selection-timeout-ms",
        env = "SELECTION_TIMEOUT_MS",
        default_value = "0"
    )]
    pub timeout_ms: u64,

    /// Re-check the assignment after solving
    #[arg(long = "selection-validate", env = "SELECTION_VALIDATE", action = ArgAction::Set, default_value = "true")]
    pub validate: bool,

    /// Which protocol families are in the catalog
    #[arg(
        long = "selection-protocols",
        env = "SELECTION_PROTOCOLS",
        value_enum,
        value_delimiter = ',',
        default_value = "all"
    )]
    pub protocols: Vec<ProtocolFamily>,
}

impl Default for SelectionOpt {
    fn default() -> Self {
        Self {
            cost_mode: CostMode::Lan,
            timeout_ms: 0,
            validate: true,
            protocols: vec![ProtocolFamily::All],
        }
    }
}

#[derive(ValueEnum, Debug, PartialEq, Eq, Clone, Copy)]
/// Which network the cost model targets
pub enum CostMode {
    /// Low latency; weigh local computation
    Lan,
    /// High latency; weigh messages
    Wan,
}

impl Default for CostMode {
    fn default() -> Self {
        CostMode::Lan
    }
}

#[derive(ValueEnum, Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
/// A family of protocols in the catalog
pub enum ProtocolFamily {
    /// Cleartext on a single host
    Local,
    /// Cleartext, replicated across hosts
    Replication,
    /// Two-party MPC (arithmetic, boolean and Yao sharing)
    Aby,
    /// Hash commitments
    Commitment,
    /// Zero-knowledge proofs
    Zkp,
    /// All of the above
    All,
}

/// Options for label inference
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct IfcOpt {
    /// Clone polymorphic functions per calling context
    #[arg(long = "ifc-specialize", env = "IFC_SPECIALIZE", action = ArgAction::Set, default_value = "true")]
    pub specialize: bool,
}

impl Default for IfcOpt {
    fn default() -> Self {
        Self { specialize: true }
    }
}

#[cfg(test)]
mod test {

    use super::*;

    use clap::{CommandFactory, Parser};
    use heck::{ToKebabCase, ToShoutySnekCase};

    #[derive(Parser, Debug)]
    struct BinaryOpt {
        #[command(flatten)]
        pub conduit: ConduitOpt,
    }

    #[test]
    fn std_and_clap_defaults_agree() {
        let std_default: ConduitOpt = Default::default();
        let clap_default: ConduitOpt =
            BinaryOpt::parse_from::<_, &str>(std::iter::once("bin")).conduit;
        assert_eq!(std_default, clap_default);
    }

    #[test]
    fn protocol_list_parses() {
        let opt = BinaryOpt::parse_from([
            "bin",
            "--selection-protocols",
            "local,aby",
            "--selection-cost-mode",
            "wan",
        ])
        .conduit;
        assert_eq!(
            opt.selection.protocols,
            vec![ProtocolFamily::Local, ProtocolFamily::Aby]
        );
        assert_eq!(opt.selection.cost_mode, CostMode::Wan);
    }

    #[test]
    fn long_and_env_names_agree() {
        for arg in BinaryOpt::command().get_arguments() {
            if let Some(long_name) = arg.get_long() {
                if let Some(env_name) = arg.get_env() {
                    let env_name = env_name.to_str().unwrap();
                    assert_eq!(
                        env_name,
                        long_name.TO_SHOUTY_SNEK_CASE(),
                        "The long name\n    '{}'\ndoes not match the envvar name\n    '{}'\n",
                        long_name,
                        env_name,
                    );
                    assert_eq!(
                        long_name,
                        long_name.to_kebab_case(),
                        "The long name '{}' is not in kebab-case",
                        long_name,
                    );
                } else {
                    panic!("Long option '{}' has no envvar", long_name);
                }
            } else if let Some(env_name) = arg.get_env() {
                let env_name = env_name.to_str().unwrap();
                panic!("Envar option '{}' has no long_name", env_name);
            }
        }
    }
}
