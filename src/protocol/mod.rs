//! Cryptographic execution protocols, with the hosts that run them.

pub mod compose;
pub mod factory;

use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

use crate::ir::{Host, ProgramError};
use crate::security::{HostTrustConfig, Label};

/// How ABY represents secrets.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub enum ShareType {
    /// Arithmetic sharing
    Arithmetic,
    /// Boolean (GMW) sharing
    Boolean,
    /// Yao garbled circuits
    Yao,
}

impl ShareType {
    /// All three, in order.
    pub const ALL: [ShareType; 3] = [ShareType::Arithmetic, ShareType::Boolean, ShareType::Yao];

    /// `A`, `B` or `Y`, as in the names of conversions like `A2Y`.
    pub fn char(&self) -> char {
        match self {
            ShareType::Arithmetic => 'A',
            ShareType::Boolean => 'B',
            ShareType::Yao => 'Y',
        }
    }
}

/// An execution strategy together with its hosts.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub enum Protocol {
    /// Cleartext on one host
    Local {
        /// The host
        host: Host,
    },
    /// Cleartext, replicated on two or more hosts
    Replication {
        /// The hosts
        hosts: BTreeSet<Host>,
    },
    /// Two-party MPC
    Aby {
        /// Representation
        share: ShareType,
        /// The smaller host name
        client: Host,
        /// The larger host name
        server: Host,
    },
    /// Cleartext on one host, hash commitments held by the others
    Commitment {
        /// Holder of the cleartext
        cleartext: Host,
        /// Holders of the commitment
        hashes: BTreeSet<Host>,
    },
    /// A prover convinces verifiers of a result
    Zkp {
        /// The prover
        prover: Host,
        /// The verifiers
        verifiers: BTreeSet<Host>,
    },
}

impl Protocol {
    /// `Local(host)`
    pub fn local(host: &str) -> Self {
        Protocol::Local {
            host: host.to_owned(),
        }
    }
    /// `Replication(hosts)`
    pub fn replication<'a>(hosts: impl IntoIterator<Item = &'a str>) -> Self {
        Protocol::Replication {
            hosts: hosts.into_iter().map(str::to_owned).collect(),
        }
    }
    /// ABY between two hosts, in either order.
    pub fn aby(share: ShareType, a: &str, b: &str) -> Self {
        let (client, server) = if a <= b { (a, b) } else { (b, a) };
        Protocol::Aby {
            share,
            client: client.to_owned(),
            server: server.to_owned(),
        }
    }
    /// `Commitment(cleartext, hashes)`
    pub fn commitment<'a>(cleartext: &str, hashes: impl IntoIterator<Item = &'a str>) -> Self {
        Protocol::Commitment {
            cleartext: cleartext.to_owned(),
            hashes: hashes.into_iter().map(str::to_owned).collect(),
        }
    }
    /// `ZKP(prover, verifiers)`
    pub fn zkp<'a>(prover: &str, verifiers: impl IntoIterator<Item = &'a str>) -> Self {
        Protocol::Zkp {
            prover: prover.to_owned(),
            verifiers: verifiers.into_iter().map(str::to_owned).collect(),
        }
    }

    /// The protocol's family name.
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Local { .. } => "Local",
            Protocol::Replication { .. } => "Replication",
            Protocol::Aby {
                share: ShareType::Arithmetic,
                ..
            } => "ArithABY",
            Protocol::Aby {
                share: ShareType::Boolean,
                ..
            } => "BoolABY",
            Protocol::Aby {
                share: ShareType::Yao,
                ..
            } => "YaoABY",
            Protocol::Commitment { .. } => "Commitment",
            Protocol::Zkp { .. } => "ZKP",
        }
    }

    /// Every host that runs part of the protocol.
    pub fn hosts(&self) -> BTreeSet<Host> {
        match self {
            Protocol::Local { host } => std::iter::once(host.clone()).collect(),
            Protocol::Replication { hosts } => hosts.clone(),
            Protocol::Aby { client, server, .. } => [client.clone(), server.clone()].into(),
            Protocol::Commitment { cleartext, hashes } => {
                let mut h = hashes.clone();
                h.insert(cleartext.clone());
                h
            }
            Protocol::Zkp { prover, verifiers } => {
                let mut h = verifiers.clone();
                h.insert(prover.clone());
                h
            }
        }
    }

    /// The ABY share type, if this is ABY.
    pub fn share(&self) -> Option<ShareType> {
        match self {
            Protocol::Aby { share, .. } => Some(*share),
            _ => None,
        }
    }

    /// Is this ABY?
    pub fn is_aby(&self) -> bool {
        self.share().is_some()
    }

    /// The strongest label this protocol can protect.
    pub fn authority(&self, trust: &HostTrustConfig) -> Result<Label, ProgramError> {
        let label = |h: &str| trust.host_label(h).cloned();
        Ok(match self {
            Protocol::Local { host } => label(host)?,
            Protocol::Replication { hosts } => {
                let or = fold_hosts(trust, hosts, Label::or)?;
                let and = fold_hosts(trust, hosts, Label::and)?;
                Label::new(or.conf, and.integ)
            }
            Protocol::Aby { client, server, .. } => label(client)?.and(&label(server)?),
            Protocol::Commitment { cleartext, hashes } => {
                label(cleartext)?.and(&fold_hosts(trust, hashes, Label::and)?.integrity())
            }
            Protocol::Zkp { prover, verifiers } => {
                label(prover)?.and(&fold_hosts(trust, verifiers, Label::and)?.integrity())
            }
        })
    }
}

/// Combine the labels of `hosts` with `f`; weakest when there are none.
fn fold_hosts<'a>(
    trust: &HostTrustConfig,
    hosts: impl IntoIterator<Item = &'a Host>,
    f: fn(&Label, &Label) -> Label,
) -> Result<Label, ProgramError> {
    let mut acc: Option<Label> = None;
    for h in hosts {
        let l = trust.host_label(h)?;
        acc = Some(match acc {
            Some(a) => f(&a, l),
            None => l.clone(),
        });
    }
    Ok(acc.unwrap_or_else(Label::weakest))
}

fn host_list(hosts: &BTreeSet<Host>) -> String {
    hosts.iter().cloned().collect::<Vec<_>>().join(", ")
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Protocol::Local { host } => write!(f, "Local({host})"),
            Protocol::Replication { hosts } => write!(f, "Replication({})", host_list(hosts)),
            Protocol::Aby { client, server, .. } => {
                write!(f, "{}({client}, {server})", self.name())
            }
            Protocol::Commitment { cleartext, hashes } => {
                write!(f, "Commitment({cleartext}, {{{}}})", host_list(hashes))
            }
            Protocol::Zkp { prover, verifiers } => {
                write!(f, "ZKP({prover}, {{{}}})", host_list(verifiers))
            }
        }
    }
}

/// A protocol with its authority under one trust configuration.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SpecializedProtocol {
    /// The protocol
    pub protocol: Protocol,
    /// Its authority label
    pub authority: Label,
}

impl SpecializedProtocol {
    /// Compute `protocol`'s authority.
    pub fn new(protocol: Protocol, trust: &HostTrustConfig) -> Result<Self, ProgramError> {
        let authority = protocol.authority(trust)?;
        Ok(SpecializedProtocol {
            protocol,
            authority,
        })
    }
    /// May this protocol hold data labelled `label`?
    pub fn protects(&self, label: &Label, trust: &HostTrustConfig) -> bool {
        trust.acts_for(&self.authority, label)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::build::Builder;
    use crate::ir::{HostDecl, Program};

    fn trust(hosts: &[&str]) -> HostTrustConfig {
        let b = Builder::new();
        HostTrustConfig::new(&Program {
            hosts: hosts
                .iter()
                .map(|h| HostDecl {
                    name: h.to_string(),
                    authority: None,
                })
                .collect(),
            delegations: vec![],
            functions: vec![b.main(vec![])],
        })
        .unwrap()
    }

    #[test]
    fn aby_orders_hosts() {
        assert_eq!(
            Protocol::aby(ShareType::Yao, "bob", "alice"),
            Protocol::aby(ShareType::Yao, "alice", "bob")
        );
        assert_eq!(
            Protocol::aby(ShareType::Boolean, "bob", "alice").to_string(),
            "BoolABY(alice, bob)"
        );
    }

    #[test]
    fn local_authority_is_host_label() {
        let t = trust(&["alice"]);
        let a = Protocol::local("alice").authority(&t).unwrap();
        assert_eq!(&a, t.host_label("alice").unwrap());
    }

    #[test]
    fn mpc_is_stronger_than_replication() {
        let t = trust(&["alice", "bob"]);
        let aby = Protocol::aby(ShareType::Yao, "alice", "bob").authority(&t).unwrap();
        let rep = Protocol::replication(["alice", "bob"]).authority(&t).unwrap();
        assert!(t.acts_for(&aby, &rep));
        assert!(!t.acts_for(&rep, &aby));
        // replication reveals to both hosts
        let alice = t.host_label("alice").unwrap();
        assert!(!t.acts_for(&rep, alice));
    }

    #[test]
    fn commitment_hosts() {
        let p = Protocol::commitment("alice", ["bob", "carol"]);
        assert_eq!(p.hosts().len(), 3);
        let t = trust(&["alice", "bob", "carol"]);
        let auth = p.authority(&t).unwrap();
        let alice = t.host_label("alice").unwrap();
        assert!(t.congruence().equiv(&auth.conf, &alice.conf));
    }
}
