use linfa::Float;
use log::info;
use ndarray::{Array1, ArrayBase, Data, Ix1};
use ndarray_rand::rand::{thread_rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

/// Random generator seeded with the given seed or, when none is given,
/// with a seed drawn from entropy which is logged so that the run can be replayed
pub fn seeded_rng(seed: Option<u64>) -> Xoshiro256Plus {
    let seed = seed.unwrap_or_else(|| {
        let seed = thread_rng().next_u64();
        info!("No seed given, using seed={seed}");
        seed
    });
    Xoshiro256Plus::seed_from_u64(seed)
}

/// Clip every component of `x` to zero from below
pub(crate) fn clip_negative<F: Float>(x: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Array1<F> {
    x.mapv(|v| if v < F::zero() { F::zero() } else { v })
}
