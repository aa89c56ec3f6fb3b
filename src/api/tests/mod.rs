mod workspace_tests;

use crate::core::dimension::Dimension;
use crate::core::event::Event;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub(super) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `nd` axes spanning `[0, size)` each.
pub(super) fn cube(nd: usize, size: f64) -> Vec<Dimension> {
    const NAMES: [&str; 9] = ["x", "y", "z", "t", "u", "v", "w", "p", "q"];
    NAMES.iter().take(nd).map(|name| Dimension::new(*name, 0.0, size, 100)).collect()
}

/// Uniform events inside `dimensions` with integer signals, so sums are exact.
pub(super) fn uniform_events(n: usize, seed: u64, dimensions: &[Dimension]) -> Vec<Event> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let coords: Vec<f64> = dimensions.iter().map(|d| rng.gen_range(d.min..d.max)).collect();
            let signal = f64::from(rng.gen_range(1u32..=5));
            Event::new(&coords, signal, 1.0).unwrap()
        })
        .collect()
}

pub(super) fn signal_of(events: &[Event]) -> f64 {
    events.iter().map(|e| e.signal).sum()
}
