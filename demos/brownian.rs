//! Overdamped Brownian dynamics of soft repulsive spheres in a periodic box.
//!
//! Run with `RUST_LOG=debug cargo run --release --example brownian` to see rebuild statistics.
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::error::Error;
use zellhaut::{CellGrid, Context, GridConfig, Mode, ParticleKind, ParticleStore, SimBox};

const N_PARTICLES: usize = 5_000;
const EDGE: f64 = 20.0;
const CUTOFF: f64 = 1.0;
const SKIN: f64 = 0.25;
const DT: f64 = 1e-3;
const DIFFUSION: f64 = 1.0;
const STIFFNESS: f64 = 100.0;
const STEPS: usize = 500;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut ctx = Context::new(SimBox::periodic_cube(EDGE)?);
    ctx.register_potential(CUTOFF)?;

    let mut rng = StdRng::seed_from_u64(7);
    let mut store = ParticleStore::with_capacity(N_PARTICLES);
    for _ in 0..N_PARTICLES {
        let point: [f64; 3] = std::array::from_fn(|_| rng.gen_range(-0.5..0.5) * EDGE);
        store.add(point, ParticleKind(0));
    }

    let config = GridConfig::default()
        .with_skin(SKIN)
        .with_neighbor_cache(true);
    let mut grid = CellGrid::new(config)?;
    let stats = grid.rebuild(&ctx, &mut store, Mode::Full)?;
    log::info!("initial build: {stats:?}");

    let noise = Normal::new(0.0, (2.0 * DIFFUSION * DT).sqrt())?;
    let mut forces = vec![Vector3::zeros(); store.n_slots()];
    let mut rebuilt_cells = 0;

    for step in 0..STEPS {
        forces.iter_mut().for_each(|f| *f = Vector3::zeros());
        let mut energy = 0.0;

        // harmonic repulsion, U = k/2 (cutoff - r)^2 for r < cutoff
        for (i, _) in store.iter() {
            let p = store.position(i).ok_or("inactive particle")?;
            for neighbor in grid.neighbors(i).iter().filter(|n| n.index > i) {
                if neighbor.distance_squared == 0.0 {
                    continue;
                }
                let q = store.position(neighbor.index).ok_or("inactive particle")?;
                let dr = ctx.sim_box().shortest_difference(p, q);
                let r = dr.norm();
                if r < CUTOFF {
                    let overlap = CUTOFF - r;
                    energy += 0.5 * STIFFNESS * overlap * overlap;
                    let f = dr * (STIFFNESS * overlap / r);
                    forces[i] -= f;
                    forces[neighbor.index] += f;
                }
            }
        }

        for (slot, force) in forces.iter().enumerate() {
            let kick: Vector3<f64> = Vector3::from_fn(|_, _| noise.sample(&mut rng));
            let delta = force * (DIFFUSION * DT) + kick;
            store.displace(slot, &delta, ctx.sim_box())?;
        }

        let stats = grid.rebuild(&ctx, &mut store, Mode::Incremental)?;
        rebuilt_cells += stats.rebuilt_cells;

        if step % 100 == 0 {
            log::info!("step {step}: energy {energy:.3}, {stats:?}");
        }
    }

    println!(
        "{STEPS} steps, {:.1} of {} cells rebuilt per step on average",
        rebuilt_cells as f64 / STEPS as f64,
        grid.n_cells()
    );
    Ok(())
}
