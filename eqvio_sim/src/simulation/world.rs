// eqvio_sim/src/simulation/world.rs

use anyhow::{ensure, Result};
use nalgebra::{Point3, Vector3};
use rand::Rng;
use rand_distr::{Distribution, Uniform, UnitSphere};

use crate::config::World;

/// Point landmarks uniformly distributed in a spherical shell.
#[derive(Debug, Clone)]
pub struct LandmarkField {
    points: Vec<Point3<f64>>,
}

impl LandmarkField {
    pub fn generate<R: Rng + ?Sized>(config: &World, center: Vector3<f64>, rng: &mut R) -> Result<Self> {
        ensure!(
            0.0 < config.min_distance && config.min_distance < config.max_distance,
            "invalid landmark shell [{}, {}]",
            config.min_distance,
            config.max_distance
        );
        // Radius drawn so the density is uniform in volume.
        let (r0, r1) = (config.min_distance.powi(3), config.max_distance.powi(3));
        let cube = Uniform::new(r0, r1);
        let points = (0..config.num_landmarks)
            .map(|_| {
                let direction: [f64; 3] = UnitSphere.sample(rng);
                let radius = cube.sample(rng).cbrt();
                Point3::from(center + radius * Vector3::from(direction))
            })
            .collect();
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_landmarks_lie_in_shell() {
        let config = World {
            num_landmarks: 500,
            min_distance: 4.0,
            max_distance: 6.0,
        };
        let center = Vector3::new(1.0, -2.0, 0.5);
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let field = LandmarkField::generate(&config, center, &mut rng).unwrap();
        assert_eq!(field.len(), 500);
        for p in field.points() {
            let d = (p.coords - center).norm();
            assert!((4.0 - 1e-9..=6.0 + 1e-9).contains(&d), "distance {d}");
        }
    }

    #[test]
    fn test_same_seed_same_world() {
        let config = World::default();
        let a = LandmarkField::generate(&config, Vector3::zeros(), &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        let b = LandmarkField::generate(&config, Vector3::zeros(), &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        assert_eq!(a.points(), b.points());
    }
}
