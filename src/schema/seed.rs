//! Particle seeds for the demo drivers and benches.

use super::{Centering, FieldBuffer, FieldData, FieldRegistry, ParticleCategory};
use crate::error::Result;

/// Gas particles on a square lattice clipped to a disk, falling inwards.
#[derive(Debug, Clone)]
pub struct DiskSeed {
    pub coordinates: FieldBuffer<[f32; 3]>,
    pub density: FieldBuffer<f32>,
    pub internal_energy: FieldBuffer<f32>,
    pub masses: FieldBuffer<f32>,
    pub particle_ids: FieldBuffer<i32>,
    pub smoothing_length: FieldBuffer<f32>,
    pub velocities: FieldBuffer<[f32; 3]>,
}

impl DiskSeed {
    /// Disk diameter.
    pub const DIAMETER: f32 = 1.0;
    /// Smoothing length in lattice spacings.
    pub const NEIGHBOURS: f32 = 14.0;
    pub const DENSITY: f32 = 1.0;
    pub const MASS: f32 = 1.0e-4;

    /// Lay out an `n1d` x `n1d` lattice over the disk's bounding square and
    /// keep the points inside it. Velocities are unit vectors towards the
    /// centre; the particle at the centre is at rest.
    pub fn generate(n1d: usize) -> Self {
        let n1d = n1d.max(2);
        let radius = Self::DIAMETER / 2.0;
        let dx = Self::DIAMETER / (n1d - 1) as f32;
        let h = Self::NEIGHBOURS * dx;

        let mut coordinates = Vec::new();
        let mut velocities = Vec::new();
        for ix in 0..n1d {
            let x = -radius + ix as f32 * dx;
            for iy in 0..n1d {
                let y = -radius + iy as f32 * dx;
                let r = (x * x + y * y).sqrt();
                if r > radius {
                    continue;
                }
                let (vx, vy) = if r > 0.0 { (-x / r, -y / r) } else { (0.0, 0.0) };
                coordinates.push([x, y, 0.0]);
                velocities.push([vx, vy, 0.0]);
            }
        }

        let n = coordinates.len();
        Self {
            coordinates: coordinates.into(),
            density: vec![Self::DENSITY; n].into(),
            internal_energy: vec![0.0; n].into(),
            masses: vec![Self::MASS; n].into(),
            particle_ids: (0..n as i32).collect::<Vec<_>>().into(),
            smoothing_length: vec![h; n].into(),
            velocities: velocities.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Register every array as a node-centred gas field.
    pub fn register(&self, registry: &mut FieldRegistry) -> Result<()> {
        let gas = ParticleCategory::Gas;
        registry.set_category_count(gas, self.len())?;
        let node = Centering::Node;
        registry.register(
            gas,
            node,
            "Coordinates",
            FieldData::Geometry3D(self.coordinates.clone()),
        );
        registry.register(gas, node, "Density", FieldData::Float1D(self.density.clone()));
        registry.register(
            gas,
            node,
            "InternalEnergy",
            FieldData::Float1D(self.internal_energy.clone()),
        );
        registry.register(gas, node, "Masses", FieldData::Float1D(self.masses.clone()));
        registry.register(
            gas,
            node,
            "ParticleIDs",
            FieldData::Integer1D(self.particle_ids.clone()),
        );
        registry.register(
            gas,
            node,
            "SmoothingLength",
            FieldData::Float1D(self.smoothing_length.clone()),
        );
        registry.register(gas, node, "Velocities", FieldData::Float3D(self.velocities.clone()));
        Ok(())
    }
}

/// Deterministic particle state for write/read verification.
///
/// Gas carries all five arrays; the bulge reuses the mass, velocity and
/// position arrays for its first half.
#[derive(Debug, Clone)]
pub struct SampleSeed {
    pub internal_energy: FieldBuffer<f32>,
    pub masses: FieldBuffer<f32>,
    pub particle_ids: FieldBuffer<i32>,
    pub velocities: FieldBuffer<[f32; 3]>,
    pub coordinates: FieldBuffer<[f32; 3]>,
}

impl SampleSeed {
    /// Zeroed arrays for `particles` particles.
    pub fn new(particles: usize) -> Self {
        Self {
            internal_energy: FieldBuffer::zeroed(particles),
            masses: FieldBuffer::zeroed(particles),
            particle_ids: FieldBuffer::zeroed(particles),
            velocities: FieldBuffer::zeroed(particles),
            coordinates: FieldBuffer::zeroed(particles),
        }
    }

    pub fn len(&self) -> usize {
        self.masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }

    /// Gas gets every particle, the bulge half of them (when there are any).
    pub fn register(&self, registry: &mut FieldRegistry) -> Result<()> {
        let node = Centering::Node;
        let gas = ParticleCategory::Gas;
        registry.set_category_count(gas, self.len())?;
        registry.register(
            gas,
            node,
            "InternalEnergy",
            FieldData::Float1D(self.internal_energy.clone()),
        );
        registry.register(gas, node, "Masses", FieldData::Float1D(self.masses.clone()));
        registry.register(
            gas,
            node,
            "ParticleIDs",
            FieldData::Integer1D(self.particle_ids.clone()),
        );
        registry.register(gas, node, "Velocities", FieldData::Float3D(self.velocities.clone()));
        registry.register(
            gas,
            node,
            "Coordinates",
            FieldData::Geometry3D(self.coordinates.clone()),
        );

        let bulge_count = self.len() / 2;
        if bulge_count > 0 {
            let bulge = ParticleCategory::Bulge;
            registry.set_category_count(bulge, bulge_count)?;
            registry.register(bulge, node, "Masses", FieldData::Float1D(self.masses.clone()));
            registry.register(
                bulge,
                node,
                "Velocities",
                FieldData::Float3D(self.velocities.clone()),
            );
            registry.register(
                bulge,
                node,
                "Coordinates",
                FieldData::Geometry3D(self.coordinates.clone()),
            );
        }
        Ok(())
    }

    /// Fill every array with the values expected at `time`.
    pub fn fill(&self, time: f32) {
        let t = 1.0 + time;
        let n = self.len();
        let base = [0.1f32, 0.2, 0.3];

        let mut energy = self.internal_energy.borrow_mut();
        let mut mass = self.masses.borrow_mut();
        let mut ids = self.particle_ids.borrow_mut();
        let mut vel = self.velocities.borrow_mut();
        let mut loc = self.coordinates.borrow_mut();
        for i in 0..n {
            let p = if n <= 1 {
                1.0
            } else {
                1.0 + i as f32 / (n - 1) as f32
            };
            let s = t * p;
            energy[i] = s;
            mass[i] = 2.0 * s;
            ids[i] = i as i32;
            loc[i] = base.map(|b| b * s);
            vel[i] = base.map(|b| 2.0 * b * s);
        }
    }

    /// Index of the first particle differing from `other` by more than
    /// `tolerance` (ids must match exactly).
    pub fn first_mismatch(&self, other: &SampleSeed, tolerance: f32) -> Option<usize> {
        let close = |a: f32, b: f32| (a - b).abs() < tolerance;
        let close3 = |a: [f32; 3], b: [f32; 3]| a.iter().zip(&b).all(|(x, y)| close(*x, *y));

        let (energy, other_energy) = (
            self.internal_energy.borrow(),
            other.internal_energy.borrow(),
        );
        let (mass, other_mass) = (self.masses.borrow(), other.masses.borrow());
        let (ids, other_ids) = (self.particle_ids.borrow(), other.particle_ids.borrow());
        let (vel, other_vel) = (self.velocities.borrow(), other.velocities.borrow());
        let (loc, other_loc) = (self.coordinates.borrow(), other.coordinates.borrow());

        let n = self.len().max(other.len());
        (0..n).find(|&i| {
            let same = i < self.len()
                && i < other.len()
                && close(energy[i], other_energy[i])
                && close(mass[i], other_mass[i])
                && ids[i] == other_ids[i]
                && close3(vel[i], other_vel[i])
                && close3(loc[i], other_loc[i]);
            !same
        })
    }
}
