//! Material properties and the read-only material store interface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::MaterialError;

/// Linear elastic material shared by every element of a structure.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialProperties {
    /// Elastic modulus in pascals.
    pub elastic_modulus: f64,
    /// Yield strength in pascals.
    pub yield_strength: f64,
    /// Density in kilograms per cubic metre.
    pub density: f64,
}

impl MaterialProperties {
    /// Create a validated material.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialError`] when the modulus or yield strength is not strictly positive or
    /// the density is negative.
    pub fn new(
        elastic_modulus: f64,
        yield_strength: f64,
        density: f64,
    ) -> Result<Self, MaterialError> {
        let material = Self {
            elastic_modulus,
            yield_strength,
            density,
        };
        material.validate()?;
        Ok(material)
    }

    /// Check the physical plausibility of the stored values.
    ///
    /// # Errors
    ///
    /// See [`MaterialProperties::new`].
    pub fn validate(&self) -> Result<(), MaterialError> {
        if !(self.elastic_modulus > 0.0) {
            return Err(MaterialError::NonPositiveElasticModulus(
                self.elastic_modulus,
            ));
        }
        if !(self.yield_strength > 0.0) {
            return Err(MaterialError::NonPositiveYieldStrength(self.yield_strength));
        }
        if !(self.density >= 0.0) {
            return Err(MaterialError::NegativeDensity(self.density));
        }
        Ok(())
    }
}

/// Structural steel (S235-like): E = 210 GPa, fy = 235 MPa, rho = 7850 kg/m3.
#[must_use]
pub const fn steel() -> MaterialProperties {
    MaterialProperties {
        elastic_modulus: 210.0e9,
        yield_strength: 235.0e6,
        density: 7850.0,
    }
}

/// Read-only lookup of materials by name.
///
/// Optimisers never write to a store; a material is copied out once before a run starts.
pub trait MaterialStore {
    /// Return the material registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialError::UnknownMaterial`] when nothing is registered under `name`.
    fn material(&self, name: &str) -> Result<MaterialProperties, MaterialError>;

    /// Names of all registered materials in a stable order.
    fn names(&self) -> Vec<String>;
}

/// In-memory [`MaterialStore`] keyed by trimmed material name.
#[derive(Clone, Debug, Default)]
pub struct MaterialLibrary {
    entries: BTreeMap<String, MaterialProperties>,
}

impl MaterialLibrary {
    /// Create an empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Library containing the [`steel`] preset under the name `"steel"`.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut library = Self::new();
        library.entries.insert("steel".to_string(), steel());
        library
    }

    /// Register or replace a material.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialError`] when `material` fails validation.
    pub fn insert(
        &mut self,
        name: &str,
        material: MaterialProperties,
    ) -> Result<(), MaterialError> {
        material.validate()?;
        self.entries.insert(name.trim().to_string(), material);
        Ok(())
    }
}

impl MaterialStore for MaterialLibrary {
    fn material(&self, name: &str) -> Result<MaterialProperties, MaterialError> {
        self.entries
            .get(name.trim())
            .copied()
            .ok_or_else(|| MaterialError::UnknownMaterial(name.to_string()))
    }

    fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_physical_values() {
        assert_eq!(
            MaterialProperties::new(0.0, 1.0, 1.0),
            Err(MaterialError::NonPositiveElasticModulus(0.0))
        );
        assert_eq!(
            MaterialProperties::new(1.0, -1.0, 1.0),
            Err(MaterialError::NonPositiveYieldStrength(-1.0))
        );
        assert_eq!(
            MaterialProperties::new(1.0, 1.0, -2.0),
            Err(MaterialError::NegativeDensity(-2.0))
        );
    }

    #[test]
    fn library_looks_up_trimmed_names() {
        let mut library = MaterialLibrary::with_defaults();
        let aluminium = MaterialProperties::new(70.0e9, 95.0e6, 2700.0).expect("valid");
        library.insert(" aluminium ", aluminium).expect("inserted");

        assert_eq!(library.material("aluminium"), Ok(aluminium));
        assert_eq!(library.material("steel"), Ok(steel()));
        assert_eq!(
            library.material("titanium"),
            Err(MaterialError::UnknownMaterial("titanium".to_string()))
        );
        assert_eq!(library.names(), vec!["aluminium", "steel"]);
    }
}
