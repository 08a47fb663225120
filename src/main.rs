mod cli;
mod report;

use std::error::Error;
use std::fs;

use clap::Parser;
use cli::Args;
use log::info;
use report::render_summary;
use trusstopo::{HistoryDocument, Optimizer, Strategy, StructureDocument, SupportRebuilder};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    // Configuration problems are reported before any structure is built.
    let config = args.configuration()?;
    let structure = args.load_structure()?;
    let strategy = Strategy::from(args.strategy);
    info!(
        "optimising {} nodes and {} elements with the {strategy} strategy",
        structure.node_count(),
        structure.element_count()
    );

    let outcome = Optimizer::new(config).run(strategy, &structure)?;

    let mut design = outcome.structure.clone();
    let rebuild = if args.rebuild {
        Some(SupportRebuilder::new(config.rebuild, config.solver).rebuild(&mut design)?)
    } else {
        None
    };

    println!("{}", render_summary(strategy, &outcome, rebuild.as_ref()));

    if let Some(path) = &args.output {
        let document = HistoryDocument::from_outcome(strategy, &structure, &outcome);
        fs::write(path, document.to_json()?)?;
        info!("history written to {}", path.display());
    }
    if let Some(path) = &args.final_structure {
        fs::write(path, StructureDocument::from_structure(&design).to_json()?)?;
        info!("final structure written to {}", path.display());
    }

    Ok(())
}
