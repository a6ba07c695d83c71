//! Gaussian mixture color models for GrabCut.
//!
//! Each model has a fixed number of full-covariance RGB components.
//! Models are initialised by k-means clustering and relearned from
//! hard component assignments every GrabCut iteration.

use nalgebra::{Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A color sample in RGB, as floating point.
pub type Color = Vector3<f64>;

/// Added to the diagonal of every covariance, in squared 8-bit color
/// units. Keeps flat regions from collapsing a component onto a point
/// mass that gives zero density to slightly blended colors.
const VARIANCE_FLOOR: f64 = 25.0;

/// Lloyd iterations run after k-means++ seeding.
const KMEANS_ITERATIONS: usize = 10;

#[derive(Debug, Clone)]
struct Component {
    weight: f64,
    mean: Color,
    inverse_covariance: Matrix3<f64>,
    /// `1 / sqrt(det(covariance))`.
    norm: f64,
}

impl Component {
    fn empty() -> Self {
        Self {
            weight: 0.0,
            mean: Color::zeros(),
            inverse_covariance: Matrix3::identity(),
            norm: 0.0,
        }
    }

    /// Unweighted density (without the constant `(2π)^-3/2` factor).
    fn density(&self, color: &Color) -> f64 {
        if self.weight <= 0.0 {
            return 0.0;
        }
        let d = color - self.mean;
        let mahalanobis = d.dot(&(self.inverse_covariance * d));
        self.norm * (-0.5 * mahalanobis).exp()
    }
}

/// A Gaussian mixture over RGB colors.
#[derive(Debug, Clone)]
pub struct Gmm {
    components: Vec<Component>,
}

/// Running sums used to learn one component.
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: usize,
    sum: Color,
    products: Matrix3<f64>,
}

impl Accumulator {
    fn zero() -> Self {
        Self {
            count: 0,
            sum: Color::zeros(),
            products: Matrix3::zeros(),
        }
    }

    fn add(&mut self, color: &Color) {
        self.count += 1;
        self.sum += color;
        self.products += color * color.transpose();
    }
}

impl Gmm {
    /// Fit a model with `components` components to `samples`, seeding
    /// the clustering with `seed`.
    ///
    /// An empty sample set yields a model whose density is zero
    /// everywhere.
    #[must_use]
    pub fn fit(samples: &[Color], components: usize, seed: u64) -> Self {
        let k = components.max(1);
        let labels = kmeans(samples, k, seed);
        Self::learn(samples, &labels, k)
    }

    /// Relearn every component from samples and their component labels.
    ///
    /// Components that receive no samples get zero weight.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn learn(samples: &[Color], labels: &[usize], components: usize) -> Self {
        let mut acc = vec![Accumulator::zero(); components];
        for (color, &label) in samples.iter().zip(labels) {
            if let Some(a) = acc.get_mut(label) {
                a.add(color);
            }
        }
        let total: usize = acc.iter().map(|a| a.count).sum();

        let components = acc
            .iter()
            .map(|a| {
                if a.count == 0 || total == 0 {
                    return Component::empty();
                }
                let n = a.count as f64;
                let mean = a.sum / n;
                let covariance = a.products / n - mean * mean.transpose()
                    + Matrix3::identity() * VARIANCE_FLOOR;
                let det = covariance.determinant();
                match covariance.try_inverse() {
                    Some(inverse) if det > 0.0 => Component {
                        weight: n / total as f64,
                        mean,
                        inverse_covariance: inverse,
                        norm: 1.0 / det.sqrt(),
                    },
                    _ => Component::empty(),
                }
            })
            .collect();
        Self { components }
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Returns `true` if the model has no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Mixture density at `color`.
    #[must_use]
    pub fn probability(&self, color: &Color) -> f64 {
        self.components
            .iter()
            .map(|c| c.weight * c.density(color))
            .sum()
    }

    /// Index of the component with the highest density at `color`.
    #[must_use]
    pub fn most_likely_component(&self, color: &Color) -> usize {
        let mut best = 0;
        let mut best_density = 0.0;
        for (i, c) in self.components.iter().enumerate() {
            let d = c.density(color);
            if d > best_density {
                best = i;
                best_density = d;
            }
        }
        best
    }
}

/// Cluster `samples` into `k` groups; returns one label per sample.
///
/// Seeds with k-means++ (deterministic for a given `seed`) and runs a
/// fixed number of Lloyd iterations.
fn kmeans(samples: &[Color], k: usize, seed: u64) -> Vec<usize> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut centers: Vec<Color> = Vec::with_capacity(k);
    centers.push(samples[rng.gen_range(0..samples.len())]);

    let mut nearest: Vec<f64> = samples
        .iter()
        .map(|s| (s - centers[0]).norm_squared())
        .collect();
    while centers.len() < k {
        let total: f64 = nearest.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.gen_range(0.0..total);
            let mut chosen = samples.len() - 1;
            for (i, &d) in nearest.iter().enumerate() {
                if target < d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            rng.gen_range(0..samples.len())
        };
        let center = samples[pick];
        for (d, s) in nearest.iter_mut().zip(samples) {
            *d = d.min((s - center).norm_squared());
        }
        centers.push(center);
    }

    let mut labels = vec![0usize; samples.len()];
    for _ in 0..KMEANS_ITERATIONS {
        let mut changed = false;
        for (label, s) in labels.iter_mut().zip(samples) {
            let best = nearest_center(&centers, s);
            if *label != best {
                *label = best;
                changed = true;
            }
        }

        let mut sums = vec![(Color::zeros(), 0usize); k];
        for (&label, s) in labels.iter().zip(samples) {
            sums[label].0 += s;
            sums[label].1 += 1;
        }
        for (center, (sum, count)) in centers.iter_mut().zip(&sums) {
            if *count > 0 {
                #[allow(clippy::cast_precision_loss)]
                let n = *count as f64;
                *center = sum / n;
            }
        }
        if !changed {
            break;
        }
    }
    // Labels from the final centers.
    for (label, s) in labels.iter_mut().zip(samples) {
        *label = nearest_center(&centers, s);
    }
    labels
}

fn nearest_center(centers: &[Color], sample: &Color) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, c) in centers.iter().enumerate() {
        let d = (sample - c).norm_squared();
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    best
}
