//! How protocols exchange values, and which hosts each protocol needs.
//!
//! A value moving from one protocol to another becomes a set of [CommunicationEvent]s
//! between ports of the two protocols. Only the host-to-host topology is modelled: the cost
//! estimator counts remote messages and MPC conversions, nothing else.

use std::collections::BTreeSet;

use super::{Protocol, ShareType};
use crate::ir::{Host, If, Stmt};

/// What a port carries.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum PortId {
    /// From the same protocol, on the same host
    InternalInput,
    /// To the same protocol, on the same host
    InternalOutput,
    /// Cleartext in
    Input,
    /// Cleartext out
    Output,
    /// A secret input to MPC or a proof
    SecretInput,
    /// A public input to MPC or a proof
    CleartextInput,
    /// A revealed MPC output
    CleartextOutput,
    /// Sends shares converted from the first to the second representation
    ConversionOutput(ShareType, ShareType),
    /// Receives shares converted from the first to the second representation
    ConversionInput(ShareType, ShareType),
    /// Cleartext host sends a fresh commitment
    CreateCommitmentOutput,
    /// Hash host receives a fresh commitment
    CreateCommitmentInput,
    /// Cleartext host reveals the opened value
    OpenCleartextOutput,
    /// Receives an opened value
    OpenCleartextInput,
    /// Hash host sends the commitment to check an opening against
    OpenCommitmentOutput,
    /// Receives a commitment to check an opening against
    OpenCommitmentInput,
}

/// A protocol's endpoint on one host.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Port {
    /// The protocol
    pub protocol: Protocol,
    /// The host
    pub host: Host,
    /// What the port carries
    pub id: PortId,
}

/// One message from a port to another.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct CommunicationEvent {
    /// Sender
    pub send: Port,
    /// Receiver
    pub recv: Port,
}

impl CommunicationEvent {
    /// Does the message cross hosts?
    pub fn is_remote(&self) -> bool {
        self.send.host != self.recv.host
    }
}

fn port(protocol: &Protocol, host: &str, id: PortId) -> Port {
    Port {
        protocol: protocol.clone(),
        host: host.to_owned(),
        id,
    }
}

fn event(src: &Protocol, from: &str, out: PortId, dst: &Protocol, to: &str, inp: PortId) -> CommunicationEvent {
    CommunicationEvent {
        send: port(src, from, out),
        recv: port(dst, to, inp),
    }
}

/// The communication table between protocol families.
#[derive(Clone, Copy, Debug, Default)]
pub struct Composer;

impl Composer {
    /// May values move from `src` to `dst`?
    pub fn can_communicate(&self, src: &Protocol, dst: &Protocol) -> bool {
        use Protocol::*;
        if src == dst {
            return true;
        }
        let (sh, dh) = (src.hosts(), dst.hosts());
        match (src, dst) {
            (Local { .. }, Local { .. }) | (Local { .. }, Replication { .. }) => true,
            (Local { host }, Aby { .. }) => dh.contains(host),
            (Local { host }, Commitment { cleartext, .. }) => host == cleartext,
            (Local { host }, Zkp { prover, .. }) => host == prover,
            (Replication { .. }, Local { .. }) | (Replication { .. }, Replication { .. }) => true,
            (Replication { .. }, Aby { .. })
            | (Replication { .. }, Commitment { .. })
            | (Replication { .. }, Zkp { .. }) => sh.is_superset(&dh),
            (Aby { .. }, Local { host }) => sh.contains(host),
            (Aby { .. }, Replication { .. }) => sh.is_superset(&dh),
            (
                Aby {
                    client: c1,
                    server: s1,
                    ..
                },
                Aby {
                    client: c2,
                    server: s2,
                    ..
                },
            ) => c1 == c2 && s1 == s2,
            (Commitment { .. }, Local { .. }) | (Commitment { .. }, Replication { .. }) => true,
            (Zkp { .. }, Local { host }) => sh.contains(host),
            (Zkp { .. }, Replication { .. }) => sh.is_superset(&dh),
            _ => false,
        }
    }

    /// The messages that move a value from `src` to `dst`; `None` if they cannot communicate.
    pub fn communicate(&self, src: &Protocol, dst: &Protocol) -> Option<Vec<CommunicationEvent>> {
        use PortId::*;
        use Protocol::*;
        if !self.can_communicate(src, dst) {
            return None;
        }
        if src == dst {
            return Some(
                src.hosts()
                    .iter()
                    .map(|h| event(src, h, InternalOutput, dst, h, InternalInput))
                    .collect(),
            );
        }
        let to_each = |from: &dyn Fn(&str) -> Port, inp: PortId| -> Vec<CommunicationEvent> {
            dst.hosts()
                .iter()
                .map(|h| CommunicationEvent {
                    send: from(h),
                    recv: port(dst, h, inp),
                })
                .collect()
        };
        Some(match (src, dst) {
            (Local { host: s }, Local { host: d }) => vec![event(src, s, Output, dst, d, Input)],
            (Local { host: s }, Replication { .. }) => to_each(&|_| port(src, s, Output), Input),
            (Local { host }, Aby { .. }) => vec![event(src, host, Output, dst, host, SecretInput)],
            (Local { host }, Commitment { cleartext, .. }) => {
                vec![event(src, host, Output, dst, cleartext, Input)]
            }
            (Local { host }, Zkp { prover, .. }) => {
                vec![event(src, host, Output, dst, prover, SecretInput)]
            }
            (Replication { hosts }, Local { host }) => {
                if hosts.contains(host) {
                    vec![event(src, host, Output, dst, host, Input)]
                } else {
                    hosts
                        .iter()
                        .map(|s| event(src, s, Output, dst, host, Input))
                        .collect()
                }
            }
            (Replication { hosts: sh }, Replication { hosts: dh }) => {
                let kept: BTreeSet<&Host> = sh.intersection(dh).collect();
                let mut events: Vec<CommunicationEvent> = kept
                    .iter()
                    .map(|h| event(src, h, Output, dst, h, Input))
                    .collect();
                // New receivers hear from every retained host, or from every sender if none.
                let senders: Vec<&Host> = if kept.is_empty() {
                    sh.iter().collect()
                } else {
                    kept.iter().copied().collect()
                };
                for r in dh.difference(sh) {
                    for s in &senders {
                        events.push(event(src, s, Output, dst, r, Input));
                    }
                }
                events
            }
            (Replication { .. }, Aby { .. }) | (Replication { .. }, Zkp { .. }) => {
                to_each(&|h| port(src, h, Output), CleartextInput)
            }
            (Replication { .. }, Commitment { cleartext, hashes }) => {
                let mut events = vec![event(src, cleartext, Output, dst, cleartext, Input)];
                for h in hashes {
                    events.push(event(
                        dst,
                        cleartext,
                        CreateCommitmentOutput,
                        dst,
                        h,
                        CreateCommitmentInput,
                    ));
                }
                events
            }
            (Aby { .. }, Local { host }) => {
                vec![event(src, host, CleartextOutput, dst, host, Input)]
            }
            (Aby { .. }, Replication { .. }) => to_each(&|h| port(src, h, CleartextOutput), Input),
            (
                Aby {
                    share: s,
                    client,
                    server,
                },
                Aby { share: t, .. },
            ) => vec![
                event(src, client, ConversionOutput(*s, *t), dst, client, ConversionInput(*s, *t)),
                event(src, server, ConversionOutput(*s, *t), dst, server, ConversionInput(*s, *t)),
            ],
            (Commitment { cleartext, hashes }, _) => {
                let mut events = Vec::new();
                for r in dst.hosts() {
                    events.push(event(src, cleartext, OpenCleartextOutput, dst, &r, OpenCleartextInput));
                    for h in hashes {
                        events.push(event(src, h, OpenCommitmentOutput, dst, &r, OpenCommitmentInput));
                    }
                }
                events
            }
            (Zkp { .. }, _) => to_each(&|h| port(src, h, Output), Input),
            _ => return None,
        })
    }

    /// Hosts that must take part when `protocol` executes `stmt`.
    pub fn mandatory_participants(&self, protocol: &Protocol, stmt: &Stmt) -> BTreeSet<Host> {
        match stmt {
            Stmt::Let(_) => match protocol {
                Protocol::Replication { .. } => BTreeSet::new(),
                _ => protocol.hosts(),
            },
            Stmt::Decl(_) | Stmt::Update(_) | Stmt::OutInit(_) | Stmt::Output(_) => protocol.hosts(),
            _ => BTreeSet::new(),
        }
    }

    /// Hosts that learn a guard stored in `protocol` in the clear.
    pub fn visible_guard_hosts(&self, protocol: &Protocol) -> BTreeSet<Host> {
        match protocol {
            Protocol::Local { .. } | Protocol::Replication { .. } => protocol.hosts(),
            Protocol::Commitment { cleartext, .. } => std::iter::once(cleartext.clone()).collect(),
            Protocol::Aby { .. } | Protocol::Zkp { .. } => BTreeSet::new(),
        }
    }
}

/// Can a conditional be evaluated obliviously, as a multiplexer over both branches?
pub fn can_mux(i: &If) -> bool {
    i.then.stmts.iter().chain(&i.els.stmts).all(stmt_can_mux)
}

fn stmt_can_mux(s: &Stmt) -> bool {
    match s {
        Stmt::Let(l) => !matches!(l.value, crate::ir::Expr::Input { .. }),
        Stmt::Decl(_) | Stmt::Update(_) => true,
        Stmt::If(i) => can_mux(i),
        Stmt::Block(b) => b.stmts.iter().all(stmt_can_mux),
        Stmt::OutInit(_)
        | Stmt::Output(_)
        | Stmt::Call(_)
        | Stmt::Loop(_)
        | Stmt::Break(_)
        | Stmt::Assert(_) => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const C: Composer = Composer;

    fn remote(events: &[CommunicationEvent]) -> usize {
        events.iter().filter(|e| e.is_remote()).count()
    }

    #[test]
    fn local_to_local() {
        let e = C
            .communicate(&Protocol::local("a"), &Protocol::local("b"))
            .unwrap();
        assert_eq!(e.len(), 1);
        assert_eq!(remote(&e), 1);
    }

    #[test]
    fn same_protocol_stays_on_host() {
        let p = Protocol::replication(["a", "b"]);
        let e = C.communicate(&p, &p).unwrap();
        assert_eq!(e.len(), 2);
        assert_eq!(remote(&e), 0);
    }

    #[test]
    fn replication_uses_retained_hosts() {
        let src = Protocol::replication(["a", "b"]);
        let dst = Protocol::replication(["b", "c"]);
        let e = C.communicate(&src, &dst).unwrap();
        // b keeps its copy, c hears from b only
        assert_eq!(e.len(), 2);
        assert_eq!(remote(&e), 1);
        let disjoint = Protocol::replication(["c", "d"]);
        let e = C.communicate(&src, &disjoint).unwrap();
        assert_eq!(e.len(), 4);
    }

    #[test]
    fn mpc_needs_its_hosts() {
        let aby = Protocol::aby(ShareType::Yao, "a", "b");
        assert!(C.can_communicate(&Protocol::local("a"), &aby));
        assert!(!C.can_communicate(&Protocol::local("c"), &aby));
        assert!(!C.can_communicate(&Protocol::replication(["a", "c"]), &aby));
        assert!(C.can_communicate(&Protocol::replication(["a", "b", "c"]), &aby));
        let e = C.communicate(&Protocol::replication(["a", "b"]), &aby).unwrap();
        assert!(e.iter().all(|e| e.recv.id == PortId::CleartextInput));
        let other = Protocol::aby(ShareType::Yao, "a", "c");
        assert!(!C.can_communicate(&aby, &other));
        assert!(C.communicate(&aby, &other).is_none());
    }

    #[test]
    fn share_conversion() {
        let a = Protocol::aby(ShareType::Arithmetic, "a", "b");
        let y = Protocol::aby(ShareType::Yao, "a", "b");
        let e = C.communicate(&a, &y).unwrap();
        assert_eq!(e.len(), 2);
        assert!(e.iter().all(|e| e.send.id
            == PortId::ConversionOutput(ShareType::Arithmetic, ShareType::Yao)));
    }

    #[test]
    fn commitment_opens_to_each_receiver() {
        let c = Protocol::commitment("a", ["b"]);
        let e = C.communicate(&c, &Protocol::replication(["a", "c"])).unwrap();
        assert_eq!(e.len(), 4);
        assert!(!C.can_communicate(&c, &Protocol::aby(ShareType::Yao, "a", "b")));
    }

    #[test]
    fn guard_visibility() {
        assert!(C
            .visible_guard_hosts(&Protocol::aby(ShareType::Boolean, "a", "b"))
            .is_empty());
        assert_eq!(
            C.visible_guard_hosts(&Protocol::commitment("a", ["b", "c"])).len(),
            1
        );
    }
}
