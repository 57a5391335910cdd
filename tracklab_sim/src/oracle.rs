//! Ground truth oracle for simulation.
//!
//! The Oracle owns the true particle positions and renders them into
//! synthetic frames:
//! - Brownian motion in the xy plane (z stays 0)
//! - Optional blinking: a particle may be missing from one frame
//! - Clutter: small dim blobs at random positions, which a median filter
//!   should suppress

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// A ground truth particle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Particle {
    pub id: u64,

    /// True position in space units
    pub position: Vector3<f64>,

    /// Whether the particle was hidden in the last rendered frame
    pub blinked: bool,
}

/// One bright or dim object in a synthetic frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub position: Vector3<f64>,

    /// Peak intensity, used as detection quality
    pub intensity: f64,

    pub radius: f64,

    /// Particle that produced the blob; `None` for clutter
    pub particle: Option<u64>,
}

/// Everything visible at one time point.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticFrame {
    pub index: usize,
    pub blobs: Vec<Blob>,
}

impl SyntheticFrame {
    /// Blobs that come from a particle.
    pub fn particle_blobs(&self) -> usize {
        self.blobs.iter().filter(|b| b.particle.is_some()).count()
    }

    pub fn clutter_blobs(&self) -> usize {
        self.blobs.len() - self.particle_blobs()
    }
}

/// Oracle configuration.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Number of particles (default: 10)
    pub particles: usize,

    /// Grid spacing of the initial positions (default: 50.0)
    pub spacing: f64,

    /// Standard deviation of one Brownian step per axis (default: 1.0)
    pub diffusion_std: f64,

    /// Blob radius of a particle (default: 5.0)
    pub particle_radius: f64,

    /// Mean particle intensity (default: 100.0)
    pub intensity: f64,

    /// Probability that a particle is hidden in a frame (default: 0.0)
    pub blink_probability: f64,

    /// Clutter blobs per frame (default: 0)
    pub clutter_per_frame: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            particles: 10,
            spacing: 50.0,
            diffusion_std: 1.0,
            particle_radius: 5.0,
            intensity: 100.0,
            blink_probability: 0.0,
            clutter_per_frame: 0,
        }
    }
}

/// The Oracle - maintains ground truth and renders frames.
pub struct Oracle {
    config: OracleConfig,

    rng: ChaCha8Rng,

    particles: Vec<Particle>,

    step_noise: Normal<f64>,
    intensity_noise: Normal<f64>,
}

impl Oracle {
    /// Creates an Oracle and places the particles on a square grid.
    pub fn new(seed: u64, config: OracleConfig) -> Result<Self, SimError> {
        if !(config.spacing > 0.0) {
            return Err(SimError::InvalidConfig(format!("spacing must be positive, got {}", config.spacing)));
        }
        if !(config.diffusion_std >= 0.0 && config.diffusion_std.is_finite()) {
            return Err(SimError::InvalidConfig(format!(
                "diffusion_std must be finite and non-negative, got {}",
                config.diffusion_std
            )));
        }

        let side = (config.particles as f64).sqrt().ceil().max(1.0) as usize;
        let particles = (0..config.particles)
            .map(|i| Particle {
                id: i as u64,
                position: Vector3::new(
                    (i % side) as f64 * config.spacing,
                    (i / side) as f64 * config.spacing,
                    0.0,
                ),
                blinked: false,
            })
            .collect();

        let step_noise = Normal::new(0.0, config.diffusion_std)
            .map_err(|e| SimError::InvalidConfig(format!("diffusion_std: {}", e)))?;
        let intensity_noise = Normal::new(config.intensity, config.intensity.abs() * 0.05)
            .map_err(|e| SimError::InvalidConfig(format!("intensity: {}", e)))?;

        Ok(Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            particles,
            step_noise,
            intensity_noise,
        })
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Side length of the particle grid.
    fn field_extent(&self) -> f64 {
        let side = (self.config.particles as f64).sqrt().ceil().max(1.0);
        side * self.config.spacing
    }

    /// Advances every particle by one Brownian step.
    pub fn step(&mut self) {
        for particle in &mut self.particles {
            particle.position.x += self.step_noise.sample(&mut self.rng);
            particle.position.y += self.step_noise.sample(&mut self.rng);
        }
    }

    /// Renders the current state. A particle never blinks in the first or
    /// last frame, nor twice in a row.
    pub fn render(&mut self, index: usize, last: bool) -> SyntheticFrame {
        let mut blobs = Vec::with_capacity(self.particles.len() + self.config.clutter_per_frame);

        for particle in &mut self.particles {
            let may_blink = index > 0 && !last && !particle.blinked;
            let hidden = may_blink && self.rng.gen_bool(self.config.blink_probability.clamp(0.0, 1.0));
            particle.blinked = hidden;
            if hidden {
                continue;
            }
            blobs.push(Blob {
                position: particle.position,
                intensity: self.intensity_noise.sample(&mut self.rng).max(1.0),
                radius: self.config.particle_radius,
                particle: Some(particle.id),
            });
        }

        let extent = self.field_extent();
        for _ in 0..self.config.clutter_per_frame {
            let position = Vector3::new(
                self.rng.gen_range(-extent * 0.5..extent),
                self.rng.gen_range(-extent * 0.5..extent),
                0.0,
            );
            blobs.push(Blob {
                position,
                intensity: self.rng.gen_range(2.0..8.0),
                radius: 0.5,
                particle: None,
            });
        }

        SyntheticFrame { index, blobs }
    }

    /// Renders `count` frames, stepping between them.
    pub fn generate(&mut self, count: usize) -> Vec<SyntheticFrame> {
        (0..count)
            .map(|index| {
                if index > 0 {
                    self.step();
                }
                self.render(index, index + 1 == count)
            })
            .collect()
    }
}
