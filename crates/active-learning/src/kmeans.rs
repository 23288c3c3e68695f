//! Lloyd's k-means with k-means++ seeding and several restarts, keeping the lowest inertia.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::{
	distributions::{Distribution, WeightedIndex},
	rngs::StdRng,
	Rng, SeedableRng,
};
use tracing::trace;

use crate::distance::squared_euclidean;

#[derive(Debug, Clone, Copy)]
pub struct KMeans {
	pub seed: u64,
	pub restarts: usize,
	pub max_iterations: usize,
	/// Stop iterating once the summed squared center shift falls below this
	pub tolerance: f32,
}

impl Default for KMeans {
	fn default() -> Self {
		Self {
			seed: 42,
			restarts: 10,
			max_iterations: 300,
			tolerance: 1e-4,
		}
	}
}

#[derive(Debug, Clone)]
pub struct KMeansFit {
	/// One row per cluster, in cluster index order
	pub centers: Array2<f32>,
	/// Cluster index of every input row
	pub labels: Vec<usize>,
	/// Sum of squared distances of every row to its center
	pub inertia: f32,
}

impl KMeans {
	/// Clusters the rows of `data` into `k` clusters.
	///
	/// Callers guarantee `1 <= k <= data.nrows()`. The same seed over the same data always
	/// gives the same fit.
	#[must_use]
	pub fn fit(&self, data: ArrayView2<'_, f32>, k: usize) -> KMeansFit {
		let mut rng = StdRng::seed_from_u64(self.seed);

		let mut best: Option<KMeansFit> = None;

		for restart in 0..self.restarts.max(1) {
			let fit = self.fit_once(data, k, &mut rng);
			trace!(%restart, inertia = fit.inertia, "K-means restart finished");

			if best
				.as_ref()
				.map_or(true, |best| fit.inertia < best.inertia)
			{
				best = Some(fit);
			}
		}

		// At least one restart always runs
		best.unwrap_or_else(|| self.fit_once(data, k, &mut rng))
	}

	fn fit_once(&self, data: ArrayView2<'_, f32>, k: usize, rng: &mut StdRng) -> KMeansFit {
		let mut centers = plus_plus_init(data, k, rng);
		let mut labels = vec![0; data.nrows()];

		for iteration in 0..self.max_iterations {
			assign(data, centers.view(), &mut labels);

			let updated = recompute_centers(data, &labels, &centers);
			let shift = centers
				.outer_iter()
				.zip(updated.outer_iter())
				.map(|(old, new)| squared_euclidean(old, new))
				.sum::<f32>();

			centers = updated;

			if shift <= self.tolerance {
				trace!(%iteration, "K-means converged");
				break;
			}
		}

		let inertia = assign(data, centers.view(), &mut labels);

		KMeansFit {
			centers,
			labels,
			inertia,
		}
	}
}

/// k-means++ seeding: first center uniformly, then each next one with probability
/// proportional to its squared distance to the closest center so far.
fn plus_plus_init(data: ArrayView2<'_, f32>, k: usize, rng: &mut StdRng) -> Array2<f32> {
	let n = data.nrows();
	let mut centers = Array2::zeros((k, data.ncols()));

	let first = rng.gen_range(0..n);
	centers.row_mut(0).assign(&data.row(first));

	let mut closest = data
		.outer_iter()
		.map(|row| squared_euclidean(row, data.row(first)))
		.collect::<Array1<f32>>();

	for c in 1..k {
		let next = match WeightedIndex::new(closest.iter().map(|d| f64::from(*d))) {
			Ok(weights) => weights.sample(rng),
			// Every point sits on a center already
			Err(_) => rng.gen_range(0..n),
		};

		centers.row_mut(c).assign(&data.row(next));

		for (dist, row) in closest.iter_mut().zip(data.outer_iter()) {
			*dist = dist.min(squared_euclidean(row, data.row(next)));
		}
	}

	centers
}

/// Assigns every row to its nearest center, lowest index on ties, returning the inertia
fn assign(data: ArrayView2<'_, f32>, centers: ArrayView2<'_, f32>, labels: &mut [usize]) -> f32 {
	let mut inertia = 0.0;

	for (label, row) in labels.iter_mut().zip(data.outer_iter()) {
		let (best, dist) = centers
			.outer_iter()
			.map(|center| squared_euclidean(row, center))
			.enumerate()
			.fold((0, f32::INFINITY), |(best, best_dist), (idx, dist)| {
				if dist < best_dist {
					(idx, dist)
				} else {
					(best, best_dist)
				}
			});

		*label = best;
		inertia += dist;
	}

	inertia
}

/// Mean of every cluster, an empty cluster keeps its previous center
fn recompute_centers(
	data: ArrayView2<'_, f32>,
	labels: &[usize],
	previous: &Array2<f32>,
) -> Array2<f32> {
	let mut sums = Array2::<f32>::zeros(previous.raw_dim());
	let mut counts = vec![0_usize; previous.nrows()];

	for (label, row) in labels.iter().zip(data.outer_iter()) {
		let mut sum = sums.row_mut(*label);
		sum += &row;
		counts[*label] += 1;
	}

	for (c, (mut sum, count)) in sums.axis_iter_mut(Axis(0)).zip(counts).enumerate() {
		if count == 0 {
			sum.assign(&previous.row(c));
		} else {
			#[allow(clippy::cast_precision_loss)]
			let count = count as f32;
			sum /= count;
		}
	}

	sums
}
