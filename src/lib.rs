//! # Conduit
//!
//! The optimization core of a security-typed compiler for distributed programs.
//!
//! A program names hosts with trust labels and computes over their data. Conduit infers a
//! label for every variable, then assigns each one a cryptographic protocol (local execution,
//! replication, secret sharing, commitments or zero-knowledge proofs) strong enough for its
//! label, minimizing estimated cost with an integer linear program.

#![warn(missing_docs)]

pub mod cfg;
pub mod ctx;
pub mod ifc;
pub mod ir;
pub mod protocol;
pub mod security;
pub mod select;
pub mod util;
