//! Simulation geometry: box, periodic boundaries and interaction ranges.
//!
//! The box is centered around the origin, i.e. axis `a` spans `[-L_a/2, L_a/2)`.
use crate::error::{Error, Result};
use nalgebra::Vector3;

/// Axis-aligned simulation box centered at the origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimBox {
    size: Vector3<f64>,
    periodic: [bool; 3],
}

impl SimBox {
    pub fn new(size: [f64; 3], periodic: [bool; 3]) -> Result<Self> {
        if let Some(len) = size.iter().find(|len| !(len.is_finite() && **len > 0.0)) {
            return Err(Error::InvalidBox(format!(
                "edge lengths must be positive and finite, got {len} in {size:?}"
            )));
        }

        Ok(Self {
            size: Vector3::from(size),
            periodic,
        })
    }

    /// Cubic box with all axes periodic.
    pub fn periodic_cube(edge: f64) -> Result<Self> {
        Self::new([edge; 3], [true; 3])
    }

    pub fn size(&self) -> [f64; 3] {
        self.size.into()
    }

    pub fn periodic(&self) -> [bool; 3] {
        self.periodic
    }

    pub fn lower(&self) -> [f64; 3] {
        (-0.5 * self.size).into()
    }

    pub fn upper(&self) -> [f64; 3] {
        (0.5 * self.size).into()
    }

    /// Returns `true` if `pos` lies inside the box on every non-periodic axis.
    pub fn contains(&self, pos: &Vector3<f64>) -> bool {
        (0..3).all(|a| {
            self.periodic[a] || (-0.5 * self.size[a] <= pos[a] && pos[a] < 0.5 * self.size[a])
        })
    }

    /// Maps `pos` back into the box along periodic axes; non-periodic coordinates are left alone.
    pub fn wrap(&self, pos: Vector3<f64>) -> Vector3<f64> {
        let mut wrapped = pos;
        for a in 0..3 {
            if self.periodic[a] {
                let len = self.size[a];
                wrapped[a] = (pos[a] + 0.5 * len).rem_euclid(len) - 0.5 * len;
                // rem_euclid may round up to `len` for tiny negative inputs
                if wrapped[a] >= 0.5 * len {
                    wrapped[a] -= len;
                }
            }
        }
        wrapped
    }

    /// Minimum-image difference vector pointing from `from` to `to`.
    pub fn shortest_difference(&self, from: &Vector3<f64>, to: &Vector3<f64>) -> Vector3<f64> {
        let mut dr = to - from;
        for a in 0..3 {
            if self.periodic[a] {
                let len = self.size[a];
                if dr[a] > 0.5 * len {
                    dr[a] -= len;
                } else if dr[a] <= -0.5 * len {
                    dr[a] += len;
                }
            }
        }
        dr
    }

    pub fn distance_squared(&self, a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
        self.shortest_difference(a, b).norm_squared()
    }
}

/// Geometry plus the interaction ranges the neighbor search has to cover.
///
/// Order-2 potentials and bimolecular reactions register their ranges here;
/// the largest of them is the cutoff used to size the cell grid.
#[derive(Clone, Debug, PartialEq)]
pub struct Context {
    sim_box: SimBox,
    potential_cutoffs: Vec<f64>,
    reaction_radii: Vec<f64>,
}

impl Context {
    pub fn new(sim_box: SimBox) -> Self {
        Self {
            sim_box,
            potential_cutoffs: Vec::new(),
            reaction_radii: Vec::new(),
        }
    }

    pub fn sim_box(&self) -> &SimBox {
        &self.sim_box
    }

    pub fn set_sim_box(&mut self, sim_box: SimBox) {
        self.sim_box = sim_box;
    }

    /// Registers the cutoff radius of a pair potential.
    pub fn register_potential(&mut self, cutoff: f64) -> Result<()> {
        Self::check_radius(cutoff)?;
        self.potential_cutoffs.push(cutoff);
        Ok(())
    }

    /// Registers the educt distance (capture radius) of a bimolecular reaction.
    pub fn register_reaction(&mut self, educt_distance: f64) -> Result<()> {
        Self::check_radius(educt_distance)?;
        self.reaction_radii.push(educt_distance);
        Ok(())
    }

    /// Largest registered interaction range, `0.0` if nothing interacts.
    pub fn max_cutoff(&self) -> f64 {
        self.potential_cutoffs
            .iter()
            .chain(self.reaction_radii.iter())
            .copied()
            .fold(0.0, f64::max)
    }

    fn check_radius(radius: f64) -> Result<()> {
        if radius.is_finite() && radius >= 0.0 {
            Ok(())
        } else {
            Err(Error::InvalidRadius(radius))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_box() {
        assert!(SimBox::new([1.0, 0.0, 1.0], [false; 3]).is_err());
        assert!(SimBox::new([1.0, f64::NAN, 1.0], [false; 3]).is_err());
        assert!(SimBox::new([1.0, -2.0, 1.0], [true; 3]).is_err());
    }

    #[test]
    fn test_wrap() {
        let sim_box = SimBox::new([10.0, 10.0, 10.0], [true, true, false]).unwrap();
        let wrapped = sim_box.wrap(Vector3::new(6.0, -7.0, 8.0));

        assert!((wrapped.x - -4.0).abs() < 1e-12);
        assert!((wrapped.y - 3.0).abs() < 1e-12);
        // non-periodic axis is left alone
        assert_eq!(wrapped.z, 8.0);
        // upper boundary is mapped to the lower one
        assert_eq!(sim_box.wrap(Vector3::new(5.0, 0.0, 0.0)).x, -5.0);
    }

    #[test]
    fn test_minimum_image() {
        let sim_box = SimBox::periodic_cube(10.0).unwrap();
        let dr = sim_box.shortest_difference(&Vector3::zeros(), &Vector3::new(6.0, 3.0, -7.0));
        assert_eq!(dr, Vector3::new(-4.0, 3.0, 3.0));

        let open = SimBox::new([10.0; 3], [false; 3]).unwrap();
        let dr = open.shortest_difference(&Vector3::zeros(), &Vector3::new(6.0, 3.0, -7.0));
        assert_eq!(dr, Vector3::new(6.0, 3.0, -7.0));
    }

    #[test]
    fn test_contains() {
        let sim_box = SimBox::new([2.0, 2.0, 2.0], [false, true, false]).unwrap();
        assert!(sim_box.contains(&Vector3::new(-1.0, 0.0, 0.0)));
        assert!(!sim_box.contains(&Vector3::new(1.0, 0.0, 0.0)));
        assert!(sim_box.contains(&Vector3::new(0.0, 5.0, 0.0)));
    }

    #[test]
    fn test_max_cutoff() {
        let mut ctx = Context::new(SimBox::periodic_cube(10.0).unwrap());
        assert_eq!(ctx.max_cutoff(), 0.0);

        ctx.register_potential(1.5).unwrap();
        ctx.register_reaction(2.0).unwrap();
        ctx.register_potential(0.5).unwrap();
        assert_eq!(ctx.max_cutoff(), 2.0);

        assert!(ctx.register_reaction(-1.0).is_err());
    }
}
