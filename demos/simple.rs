use trusstopo::{force, steel, GridSpec, OptimizationConfig, Optimizer, Strategy};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let grid = GridSpec {
        nx: 9,
        ny: 4,
        width: 8.0,
        height: 3.0,
        area: 1.0e-4,
    };
    let mut structure = grid.build(steel())?;
    grid.apply_simply_supported(&mut structure, force(0.0, -5_000.0))?;

    let mut config = OptimizationConfig::default();
    config.removal.target_mass_fraction = 0.4;
    let outcome = Optimizer::new(config).run(Strategy::Static, &structure)?;

    for record in &outcome.history {
        println!(
            "iteration {:>3}: mass fraction {:.3}, peak stress {:.3e} Pa",
            record.iteration, record.mass_fraction, record.max_stress
        );
    }
    println!("stopped: {}", outcome.termination);

    Ok(())
}
