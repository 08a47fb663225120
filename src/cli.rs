use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use trusstopo::{force, steel, GridSpec, OptimizationConfig, Strategy, Structure, StructureDocument};

/// Command line options of the `trusstopo` binary.
#[derive(Debug, Parser)]
#[command(name = "trusstopo")]
#[command(about = "Topology optimisation of planar trusses", version)]
pub struct Args {
    /// Structure document to optimise; a simply supported grid is generated when omitted.
    #[arg(short, long)]
    pub structure: Option<PathBuf>,

    /// Node columns of the generated grid.
    #[arg(long, default_value_t = 7)]
    pub nx: usize,

    /// Node rows of the generated grid.
    #[arg(long, default_value_t = 4)]
    pub ny: usize,

    /// Width of the generated grid in metres.
    #[arg(long, default_value_t = 6.0)]
    pub width: f64,

    /// Height of the generated grid in metres.
    #[arg(long, default_value_t = 3.0)]
    pub height: f64,

    /// Element area of the generated grid in square metres.
    #[arg(long, default_value_t = 1.0e-4)]
    pub area: f64,

    /// Vertical load at the top-middle node of the generated grid in newtons.
    #[arg(long, default_value_t = -1.0e4, allow_hyphen_values = true)]
    pub load: f64,

    /// Optimisation strategy.
    #[arg(long, value_enum, default_value_t = StrategyArg::Static)]
    pub strategy: StrategyArg,

    /// JSON configuration file; missing fields keep their defaults.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Target mass or volume fraction, overriding the configuration.
    #[arg(short, long)]
    pub target: Option<f64>,

    /// Run the support rebuilder on the optimised design.
    #[arg(long)]
    pub rebuild: bool,

    /// Where to write the history document.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Where to write the final structure document.
    #[arg(long)]
    pub final_structure: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Strain-energy driven node removal
    Static,
    /// Node removal aware of the first vibration mode
    Dynamic,
    /// Density optimisation with penalisation
    Simp,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Static => Strategy::Static,
            StrategyArg::Dynamic => Strategy::Dynamic,
            StrategyArg::Simp => Strategy::Simp,
        }
    }
}

impl Args {
    /// Grid generated when no structure document is given.
    pub fn grid(&self) -> GridSpec {
        GridSpec {
            nx: self.nx,
            ny: self.ny,
            width: self.width,
            height: self.height,
            area: self.area,
        }
    }

    /// Read the configuration file, apply overrides and validate the result.
    pub fn configuration(&self) -> Result<OptimizationConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => OptimizationConfig::load(path)?,
            None => OptimizationConfig::default(),
        };
        if let Some(target) = self.target {
            config.removal.target_mass_fraction = target;
            config.simp.volume_fraction = target;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load the structure document or generate the default grid.
    pub fn load_structure(&self) -> Result<Structure, Box<dyn Error>> {
        if let Some(path) = &self.structure {
            let text = fs::read_to_string(path)?;
            return Ok(StructureDocument::from_json(&text)?.to_structure()?);
        }
        let grid = self.grid();
        let mut structure = grid.build(steel())?;
        grid.apply_simply_supported(&mut structure, force(0.0, self.load))?;
        Ok(structure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_generate_a_loaded_grid() {
        let args = Args::try_parse_from(["trusstopo"]).expect("defaults parse");
        assert_eq!(args.strategy, StrategyArg::Static);
        let structure = args.load_structure().expect("valid grid");
        assert_eq!(structure.node_count(), 28);
        assert_eq!(structure.loaded_nodes().len(), 1);
    }

    #[test]
    fn target_overrides_both_fractions() {
        let args = Args::try_parse_from(["trusstopo", "--strategy", "simp", "--target", "0.3"])
            .expect("valid arguments");
        let config = args.configuration().expect("valid configuration");
        assert_eq!(Strategy::from(args.strategy), Strategy::Simp);
        assert_eq!(config.removal.target_mass_fraction, 0.3);
        assert_eq!(config.simp.volume_fraction, 0.3);
    }

    #[test]
    fn out_of_range_target_is_rejected() {
        let args = Args::try_parse_from(["trusstopo", "--target", "1.5"]).expect("parses");
        assert!(args.configuration().is_err());
    }
}
