use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Interpolation weights of the mixture.
///
/// `lambda` weighs direct term sampling, `alpha` the document transform and
/// `beta` the collection transform; the remainder goes to the background model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixtureWeights {
    pub lambda: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl MixtureWeights {
    pub fn new(lambda: f64, alpha: f64, beta: f64) -> Result<Self> {
        let weights = Self { lambda, alpha, beta };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, w) in [("lambda", self.lambda), ("alpha", self.alpha), ("beta", self.beta)] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::Config(format!("{name} must be a non-negative number, got {w}")));
            }
        }
        // small slack so that thirds still add up
        let total = self.lambda + self.alpha + self.beta;
        if total > 1.0 + 1e-12 {
            return Err(Error::Config(format!("mixture weights sum to {total}, which exceeds 1")));
        }
        Ok(())
    }

    /// Weight of the background collection model, `1 - λ - α - β`.
    pub fn background(&self) -> f64 {
        (1.0 - self.lambda - self.alpha - self.beta).max(0.0)
    }
}

impl Default for MixtureWeights {
    fn default() -> Self {
        Self { lambda: 0.33, alpha: 0.33, beta: 0.33 }
    }
}

/// Which occurrence pairs contribute to a document's cohesion sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CohesionRegion {
    /// Pairs `(i, j)` with `1 <= i < j`: the first retained occurrence is left out.
    #[default]
    SkipFirstTerm,
    /// Every pair `(i, j)` with `i < j`.
    AllPairs,
}

impl CohesionRegion {
    /// Index of the first occurrence that takes part in the sum.
    pub fn first_index(self) -> usize {
        match self {
            CohesionRegion::SkipFirstTerm => 1,
            CohesionRegion::AllPairs => 0,
        }
    }
}

impl std::str::FromStr for CohesionRegion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "skip_first_term" | "skip-first-term" => Ok(Self::SkipFirstTerm),
            "all_pairs" | "all-pairs" => Ok(Self::AllPairs),
            other => Err(Error::Config(format!("unsupported cohesion region: {other}"))),
        }
    }
}

fn default_neighbours() -> usize {
    3
}

fn default_top_k() -> usize {
    1000
}

/// Parameters of a mixture-model run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub weights: MixtureWeights,
    /// Neighbours per query term for the collection transform.
    #[serde(default = "default_neighbours")]
    pub neighbours: usize,
    #[serde(default)]
    pub cohesion: CohesionRegion,
    /// Maximum ranked documents written per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            weights: MixtureWeights::default(),
            neighbours: default_neighbours(),
            cohesion: CohesionRegion::default(),
            top_k: default_top_k(),
        }
    }
}

impl ModelConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: ModelConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        if self.neighbours == 0 {
            return Err(Error::Config("neighbour count must be at least 1".into()));
        }
        if self.top_k == 0 {
            return Err(Error::Config("top_k must be at least 1".into()));
        }
        Ok(())
    }
}
