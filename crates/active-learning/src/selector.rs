use std::collections::HashSet;

use ndarray::{ArrayView2, Axis};
use rand::{rngs::StdRng, seq::index, SeedableRng};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, instrument};

use super::{
	distance::euclidean,
	error::{InvalidArgument, SelectorError},
	kmeans::KMeans,
	max_distance::farthest_point_picks,
};

#[derive(
	Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Strategy {
	/// Uniform sample without replacement
	Random,
	/// One item per cluster, the closest to each cluster center
	Kmeans,
	/// Greedy farthest point from the labeled set
	#[default]
	MaxDistance,
}

#[derive(Debug, Clone, Default)]
pub struct Selector {
	kmeans: KMeans,
	random_seed: Option<u64>,
}

impl Selector {
	#[must_use]
	pub const fn new(kmeans: KMeans) -> Self {
		Self {
			kmeans,
			random_seed: None,
		}
	}

	/// Makes [`Strategy::Random`] reproducible
	#[must_use]
	pub const fn with_random_seed(mut self, seed: u64) -> Self {
		self.random_seed = Some(seed);
		self
	}

	/// Picks the next `batch_size` identities to label, in pick order.
	///
	/// `vectors` holds one row per entry of `identities`, `labeled` must be a subset of
	/// `identities`. Never returns a labeled identity nor the same identity twice, and returns
	/// exactly `min(batch_size, unlabeled count)` identities.
	#[instrument(
		skip(self, vectors, identities, labeled),
		fields(candidates = identities.len(), labeled = labeled.len()),
		err
	)]
	pub fn select_batch(
		&self,
		vectors: ArrayView2<'_, f32>,
		identities: &[String],
		labeled: &HashSet<String>,
		batch_size: usize,
		strategy: Strategy,
	) -> Result<Vec<String>, SelectorError> {
		validate(vectors, identities, labeled, batch_size)?;

		let (unlabeled, labeled_rows) = (0..identities.len())
			.partition::<Vec<_>, _>(|row| !labeled.contains(&identities[*row]));

		if unlabeled.is_empty() {
			debug!("Nothing left to label");
			return Ok(vec![]);
		}

		if unlabeled.len() <= batch_size {
			debug!(
				unlabeled = unlabeled.len(),
				"Fewer unlabeled items than the batch size, returning all of them"
			);
			return Ok(unlabeled
				.into_iter()
				.map(|row| identities[row].clone())
				.collect());
		}

		let strategy = if labeled_rows.is_empty() {
			Strategy::Kmeans
		} else {
			strategy
		};

		let unlabeled_vectors = vectors.select(Axis(0), &unlabeled);

		let picks = match strategy {
			Strategy::Random => self.random(unlabeled.len(), batch_size),
			Strategy::Kmeans => self.kmeans(unlabeled_vectors.view(), batch_size),
			Strategy::MaxDistance => farthest_point_picks(
				unlabeled_vectors.view(),
				vectors.select(Axis(0), &labeled_rows).view(),
				batch_size,
			)
			.into_iter()
			.map(|pick| pick.index)
			.collect(),
		};

		debug!(%strategy, picked = picks.len(), "Selected batch");

		Ok(picks
			.into_iter()
			.map(|pick| identities[unlabeled[pick]].clone())
			.collect())
	}

	fn random(&self, candidates: usize, amount: usize) -> Vec<usize> {
		let mut rng = self
			.random_seed
			.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

		index::sample(&mut rng, candidates, amount).into_vec()
	}

	/// For each cluster center in order, the closest candidate not picked yet
	fn kmeans(&self, candidates: ArrayView2<'_, f32>, k: usize) -> Vec<usize> {
		let fit = self.kmeans.fit(candidates, k);

		let mut picked = vec![false; candidates.nrows()];
		let mut picks = Vec::with_capacity(k);

		for center in fit.centers.outer_iter() {
			let mut by_distance = candidates
				.outer_iter()
				.map(|row| euclidean(row, center))
				.enumerate()
				.collect::<Vec<_>>();
			by_distance.sort_by(|(_, a), (_, b)| a.total_cmp(b));

			if let Some((row, _)) = by_distance.into_iter().find(|(row, _)| !picked[*row]) {
				picked[row] = true;
				picks.push(row);
			}
		}

		picks
	}
}

fn validate(
	vectors: ArrayView2<'_, f32>,
	identities: &[String],
	labeled: &HashSet<String>,
	batch_size: usize,
) -> Result<(), InvalidArgument> {
	if batch_size == 0 {
		return Err(InvalidArgument::ZeroBatchSize);
	}

	if vectors.nrows() != identities.len() {
		return Err(InvalidArgument::LengthMismatch {
			vectors: vectors.nrows(),
			identities: identities.len(),
		});
	}

	let mut known = HashSet::with_capacity(identities.len());
	for identity in identities {
		if !known.insert(identity.as_str()) {
			return Err(InvalidArgument::DuplicateIdentity(identity.clone()));
		}
	}

	if let Some(unknown) = labeled.iter().find(|id| !known.contains(id.as_str())) {
		return Err(InvalidArgument::UnknownLabeled(unknown.clone()));
	}

	Ok(())
}
