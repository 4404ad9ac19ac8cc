//! Input bundle of one computation: scene, sources, receivers and
//! configuration.

use log::warn;
use ndarray::Array1;

use crate::config::Config;
use crate::error::{CityraysError, Result};
use crate::geom::Coordinate;
use crate::index::AabbTree;
use crate::scene::Scene;
use crate::sources::{NoiseSource, SourceGeometry};

/// Everything the path finder needs, immutable during the run.
#[derive(Debug)]
pub struct PropagationData {
    pub scene: Scene,
    pub config: Config,
    sources: Vec<NoiseSource>,
    receivers: Vec<Coordinate>,
}

impl PropagationData {
    pub fn new(scene: Scene, config: Config) -> Self {
        Self {
            scene,
            config,
            sources: Vec::new(),
            receivers: Vec::new(),
        }
    }

    /// Registers a noise source with its maximal per-band power.
    /// Malformed geometries and band mismatches are skipped with a
    /// warning.
    pub fn add_source(&mut self, geometry: SourceGeometry, power: Array1<f64>) -> Result<usize> {
        if let Err(e) = geometry.validate() {
            warn!("skipping source: {e}");
            return Err(e);
        }
        if power.len() != self.config.band_count() {
            let e = CityraysError::InvalidGeometry {
                message: format!(
                    "source power has {} bands, configuration names {}",
                    power.len(),
                    self.config.band_count()
                ),
            };
            warn!("skipping source: {e}");
            return Err(e);
        }
        self.sources.push(NoiseSource { geometry, power });
        Ok(self.sources.len() - 1)
    }

    pub fn add_receiver(&mut self, position: Coordinate) -> usize {
        self.receivers.push(position);
        self.receivers.len() - 1
    }

    pub fn sources(&self) -> &[NoiseSource] {
        &self.sources
    }

    pub fn receivers(&self) -> &[Coordinate] {
        &self.receivers
    }

    /// Builds the source index tree, once per run.
    pub fn build_source_tree(&self) -> AabbTree {
        AabbTree::build(
            self.sources
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.geometry.envelope().map(|env| (env, i)))
                .collect(),
        )
    }
}
