//! Independent re-check of a protocol assignment.

use log::debug;

use super::gen::{viable_protocols, Problem};
use super::{Assignment, Result, SelectionError};
use crate::ctx::InternalError;
use crate::ifc::InformationFlow;
use crate::ir::names::NameAnalysis;
use crate::protocol::factory::ProtocolFactory;
use crate::security::HostTrustConfig;

/// Check that `assignment` gives every variable a viable protocol strong enough for its
/// label, and satisfies every constraint of `problem`.
///
/// Disagreement is an [InternalError::Validation]: the optimizer returned something the
/// generator never allowed.
pub fn validate(
    names: &NameAnalysis,
    trust: &HostTrustConfig,
    ifc: &InformationFlow,
    catalog: &dyn ProtocolFactory,
    problem: &Problem,
    assignment: &Assignment,
) -> Result<()> {
    let invalid = |msg: String| -> SelectionError { InternalError::Validation(msg).into() };
    for fv in problem.domains.keys() {
        let p = assignment.protocol(fv)?;
        let label = ifc.variable_label(names, fv)?;
        if !viable_protocols(names, trust, ifc, catalog, fv)?.contains(p) {
            return Err(invalid(format!("{p} is not viable for {fv}")));
        }
        if !trust.acts_for(&p.authority(trust)?, label) {
            return Err(invalid(format!(
                "{p} cannot protect {fv}, labelled {}",
                label.display(trust.atoms())
            )));
        }
    }
    for c in &problem.constraints {
        if !c.eval(assignment)? {
            return Err(invalid(format!("violated: {c}")));
        }
    }
    debug!("assignment of {} variables validated", problem.domains.len());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::build::*;
    use crate::ir::names::FunctionVar;
    use crate::ir::*;
    use crate::protocol::compose::Composer;
    use crate::protocol::factory::Catalog;
    use crate::protocol::Protocol;
    use crate::select::cost::CostEstimator;
    use crate::select::{gen, ilp};
    use conduit_opt::{CostMode, ProtocolFamily};

    fn program() -> Program {
        let b = Builder::new();
        let main = b.main(vec![
            b.let_("x", input(ValueType::Int, "alice")),
            b.let_("y", op(Operator::Add, vec![read("x"), read("x")])),
            b.output(read("y"), "alice"),
        ]);
        Program {
            hosts: ["alice", "bob"]
                .iter()
                .map(|h| HostDecl {
                    name: h.to_string(),
                    authority: None,
                })
                .collect(),
            delegations: vec![],
            functions: vec![main],
        }
    }

    fn generate(
        names: &NameAnalysis,
        trust: &HostTrustConfig,
        ifc: &InformationFlow,
        catalog: &Catalog,
    ) -> Problem {
        let composer = Composer;
        gen::generate(names, trust, ifc, catalog, &composer, &CostEstimator::new(composer))
            .unwrap()
    }

    #[test]
    fn accepts_the_optimum_every_time() {
        let p = program();
        let names = NameAnalysis::new(&p).unwrap();
        let trust = HostTrustConfig::new(&p).unwrap();
        let ifc = InformationFlow::analyze(&names, &trust).unwrap();
        let catalog = Catalog::for_families(&[ProtocolFamily::All], trust.hosts());
        let problem = generate(&names, &trust, &ifc, &catalog);
        let weights = CostEstimator::weights(CostMode::Lan);
        let a = ilp::solve(&problem, &weights, None, None).unwrap();
        assert_eq!(validate(&names, &trust, &ifc, &catalog, &problem, &a), Ok(()));
        assert_eq!(validate(&names, &trust, &ifc, &catalog, &problem, &a), Ok(()));
    }

    #[test]
    fn rejects_weak_protocol_and_is_idempotent() {
        let p = program();
        let names = NameAnalysis::new(&p).unwrap();
        let trust = HostTrustConfig::new(&p).unwrap();
        let ifc = InformationFlow::analyze(&names, &trust).unwrap();
        let catalog = Catalog::for_families(&[ProtocolFamily::All], trust.hosts());
        let problem = generate(&names, &trust, &ifc, &catalog);
        let mut a = Assignment::default();
        a.protocols
            .insert(FunctionVar::new("main", "x"), Protocol::local("alice"));
        a.protocols
            .insert(FunctionVar::new("main", "y"), Protocol::local("bob"));
        let first = validate(&names, &trust, &ifc, &catalog, &problem, &a);
        assert!(matches!(
            first,
            Err(SelectionError::Internal(InternalError::Validation(_)))
        ));
        assert_eq!(first, validate(&names, &trust, &ifc, &catalog, &problem, &a));
    }
}
