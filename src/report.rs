use std::fmt::Write;

use trusstopo::{OptimizationOutcome, RebuildOutcome, Strategy};

/// Render a textual summary of an optimisation run.
///
/// One line per recorded iteration keeps the report easy to compare against the history
/// document written next to it.
#[must_use]
pub fn render_summary(
    strategy: Strategy,
    outcome: &OptimizationOutcome,
    rebuild: Option<&RebuildOutcome>,
) -> String {
    let mut output = String::new();

    writeln!(
        &mut output,
        "{strategy} optimisation: {} after {} iterations",
        outcome.termination,
        outcome.history.len().saturating_sub(1)
    )
    .expect("writing to string cannot fail");

    for record in &outcome.history {
        write!(
            &mut output,
            "  #{:<4} fraction = {:.4}, compliance = {:.3e} J, peak stress = {:.3e} Pa",
            record.iteration, record.mass_fraction, record.compliance, record.max_stress
        )
        .expect("writing to string cannot fail");
        if let Some(eigen) = record.eigen {
            write!(&mut output, ", f1 = {:.3} Hz", eigen.frequency)
                .expect("writing to string cannot fail");
        }
        output.push('\n');
    }

    writeln!(
        &mut output,
        "Final design: {} active nodes, {} active elements, mass fraction {:.4}",
        outcome.structure.active_node_count(),
        outcome.structure.active_elements().len(),
        outcome.mass_fraction()
    )
    .expect("writing to string cannot fail");

    if let Some(rebuild) = rebuild {
        if rebuild.committed {
            writeln!(
                &mut output,
                "Rebuild: reactivated {} nodes, peak stress {:.3e} -> {:.3e} Pa (+{:.3e} kg)",
                rebuild.reactivated_nodes.len(),
                rebuild.stress_before,
                rebuild.stress_after,
                rebuild.added_mass
            )
            .expect("writing to string cannot fail");
        } else {
            writeln!(
                &mut output,
                "Rebuild: nothing committed after {} combinations (peak {:.3e} Pa, allowable {:.3e} Pa)",
                rebuild.combinations_tested, rebuild.stress_before, rebuild.allowable
            )
            .expect("writing to string cannot fail");
        }
    }

    output
}
