//! Random input generation for property-based checking

use crate::term::Sort;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Default number of sampled assignments.
pub const DEFAULT_SAMPLES: usize = 1000;

/// Configuration for sampled checking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingConfig {
    /// Number of uniformly random assignments
    pub samples: usize,
    /// Seed for the generator; a fixed default keeps runs reproducible
    pub seed: u64,
    /// Also try boundary values (zero, one, all ones, sign bit, ...)
    pub edge_cases: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            samples: DEFAULT_SAMPLES,
            seed: 0x5eed,
            edge_cases: true,
        }
    }
}

impl SamplingConfig {
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_edge_cases(mut self, enabled: bool) -> Self {
        self.edge_cases = enabled;
        self
    }
}

/// Boundary values for a sort, masked to its width and deduplicated.
pub fn edge_values(sort: Sort) -> Vec<u64> {
    let w = sort.width();
    let mask = sort.mask();
    let sign = 1u64 << (w - 1);
    let candidates = [
        0,
        1,
        mask,
        sign,
        sign.wrapping_sub(1),
        0x5555_5555_5555_5555,
        0xAAAA_AAAA_AAAA_AAAA,
        0x0000_0000_FFFF_FFFF,
    ];
    let mut out = Vec::new();
    for v in candidates {
        let v = v & mask;
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

/// Uniform value of a sort.
fn random_value(rng: &mut ChaCha8Rng, sort: Sort) -> u64 {
    rng.random::<u64>() & sort.mask()
}

/// Assignments for parameters of the given sorts: boundary combinations
/// first (when enabled), then `samples` uniform draws.
pub fn generate_inputs(config: &SamplingConfig, sorts: &[Sort]) -> Vec<Vec<u64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut inputs = Vec::with_capacity(config.samples);

    if config.edge_cases && !sorts.is_empty() {
        // every parameter at the same boundary, then pairs on the first two
        let per_sort: Vec<Vec<u64>> = sorts.iter().map(|s| edge_values(*s)).collect();
        let rounds = per_sort.iter().map(Vec::len).max().unwrap_or(0);
        for k in 0..rounds {
            inputs.push(per_sort.iter().map(|vals| vals[k % vals.len()]).collect());
        }
        if sorts.len() >= 2 {
            for &a in per_sort[0].iter().take(5) {
                for &b in per_sort[1].iter().take(5) {
                    let mut row: Vec<u64> = sorts.iter().map(|s| random_value(&mut rng, *s)).collect();
                    row[0] = a;
                    row[1] = b;
                    inputs.push(row);
                }
            }
        }
    }

    for _ in 0..config.samples {
        inputs.push(sorts.iter().map(|s| random_value(&mut rng, *s)).collect());
    }

    inputs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_inputs_count_without_edges() {
        let config = SamplingConfig::default().with_samples(5).with_edge_cases(false);
        let inputs = generate_inputs(&config, &[Sort::BitVec(32), Sort::BitVec(8)]);
        assert_eq!(inputs.len(), 5);
        assert!(inputs.iter().all(|row| row.len() == 2 && row[1] <= 0xff));
    }

    #[test]
    fn test_generate_inputs_reproducible() {
        let config = SamplingConfig::default().with_samples(20).with_seed(7);
        let a = generate_inputs(&config, &[Sort::BitVec(32)]);
        let b = generate_inputs(&config, &[Sort::BitVec(32)]);
        assert_eq!(a, b);
        let c = generate_inputs(&config.clone().with_seed(8), &[Sort::BitVec(32)]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_generate_inputs_varies() {
        let config = SamplingConfig::default().with_samples(10).with_edge_cases(false);
        let inputs = generate_inputs(&config, &[Sort::BitVec(64)]);
        let unique: std::collections::HashSet<_> = inputs.iter().collect();
        assert!(unique.len() > 1);
    }

    #[test]
    fn test_edge_values_masked() {
        let vals = edge_values(Sort::BitVec(8));
        assert!(vals.contains(&0));
        assert!(vals.contains(&0xff));
        assert!(vals.contains(&0x80));
        assert!(vals.contains(&0x7f));
        assert!(vals.iter().all(|v| *v <= 0xff));
        assert_eq!(edge_values(Sort::Bool), vec![0, 1]);
    }

    #[test]
    fn test_edge_cases_come_first() {
        let config = SamplingConfig::default().with_samples(3);
        let inputs = generate_inputs(&config, &[Sort::BitVec(16)]);
        assert_eq!(inputs[0], vec![0]);
        assert_eq!(inputs[2], vec![0xffff]);
    }
}
