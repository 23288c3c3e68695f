//! Greedy farthest point selection.
//!
//! Each round picks the candidate whose closest reference vector is the farthest away, then adds
//! it to the reference set. Distances are recomputed from scratch every round, costing
//! `O(picks * candidates * references)`.
// TODO: keep a running minimum per candidate so each round only measures against the last pick

use ndarray::ArrayView2;

use crate::distance::euclidean;

/// A candidate picked by [`farthest_point_picks`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pick {
	/// Row of the candidate matrix
	pub index: usize,
	/// Distance to the closest reference at pick time
	pub distance: f32,
}

/// Picks up to `count` rows of `candidates`, in pick order. The reference set starts as every
/// row of `references` and grows with each pick. Ties go to the lowest candidate row.
#[must_use]
pub fn farthest_point_picks(
	candidates: ArrayView2<'_, f32>,
	references: ArrayView2<'_, f32>,
	count: usize,
) -> Vec<Pick> {
	let mut picks = Vec::<Pick>::with_capacity(count.min(candidates.nrows()));
	let mut picked = vec![false; candidates.nrows()];

	for _ in 0..count {
		let mut best: Option<Pick> = None;

		for (index, candidate) in candidates.outer_iter().enumerate() {
			if picked[index] {
				continue;
			}

			let distance = references
				.outer_iter()
				.chain(picks.iter().map(|pick| candidates.row(pick.index)))
				.map(|reference| euclidean(candidate, reference))
				.fold(f32::INFINITY, f32::min);

			if best.map_or(true, |best| distance > best.distance) {
				best = Some(Pick { index, distance });
			}
		}

		let Some(pick) = best else {
			break;
		};

		picked[pick.index] = true;
		picks.push(pick);
	}

	picks
}
