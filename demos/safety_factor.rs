use trusstopo::{
    force, steel, GridSpec, OptimizationConfig, Optimizer, Strategy, StressLimit,
    SupportRebuilder,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A slender grid under a heavy load so the stress limit is the binding constraint
    let grid = GridSpec {
        nx: 9,
        ny: 3,
        width: 8.0,
        height: 2.0,
        area: 2.0e-4,
    };
    let mut structure = grid.build(steel())?;
    grid.apply_simply_supported(&mut structure, force(0.0, -4.0e4))?;

    let mut config = OptimizationConfig::default();
    config.removal.target_mass_fraction = 0.2;
    config.removal.stress_limit = Some(StressLimit { safety_factor: 1.5 });
    config.rebuild.safety_factor = 1.5;

    let outcome = Optimizer::new(config).run(Strategy::Static, &structure)?;
    println!(
        "stopped after {} iterations ({}), mass fraction {:.3}",
        outcome.history.len() - 1,
        outcome.termination,
        outcome.mass_fraction()
    );

    let mut design = outcome.structure.clone();
    let rebuild = SupportRebuilder::new(config.rebuild, config.solver).rebuild(&mut design)?;
    if rebuild.committed {
        println!(
            "rebuilt {} nodes: peak stress {:.3e} -> {:.3e} Pa",
            rebuild.reactivated_nodes.len(),
            rebuild.stress_before,
            rebuild.stress_after
        );
    } else {
        println!(
            "peak stress {:.3e} Pa left as is (allowable {:.3e} Pa)",
            rebuild.stress_before, rebuild.allowable
        );
    }

    Ok(())
}
