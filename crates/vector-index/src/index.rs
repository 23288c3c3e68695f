use std::collections::{HashMap, HashSet};

use ndarray::Array2;
use tracing::trace;

use super::error::Error;

#[derive(Debug, Clone)]
pub struct VectorIndex {
	dim: usize,
	/// Row major, `identities.len() * dim` values
	data: Vec<f32>,
	identities: Vec<String>,
	positions: HashMap<String, usize>,
}

impl VectorIndex {
	pub fn create(dim: usize) -> Result<Self, Error> {
		if dim == 0 {
			return Err(Error::Config("dimension must be greater than zero"));
		}

		Ok(Self {
			dim,
			data: Vec::new(),
			identities: Vec::new(),
			positions: HashMap::new(),
		})
	}

	/// Build an index from already validated parts, used when loading from disk
	pub(crate) fn from_parts(dim: usize, data: Vec<f32>, identities: Vec<String>) -> Self {
		let positions = identities
			.iter()
			.enumerate()
			.map(|(pos, identity)| (identity.clone(), pos))
			.collect();

		Self {
			dim,
			data,
			identities,
			positions,
		}
	}

	#[must_use]
	pub const fn dim(&self) -> usize {
		self.dim
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.identities.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.identities.is_empty()
	}

	#[must_use]
	pub fn identities(&self) -> &[String] {
		&self.identities
	}

	#[must_use]
	pub fn contains(&self, identity: &str) -> bool {
		self.positions.contains_key(identity)
	}

	pub(crate) fn data(&self) -> &[f32] {
		&self.data
	}

	/// Appends `vectors` with their parallel `identities`, in call order.
	///
	/// Everything is validated before anything is stored, so on error the index is left exactly
	/// as it was.
	pub fn add<V, S>(&mut self, vectors: &[V], identities: &[S]) -> Result<(), Error>
	where
		V: AsRef<[f32]>,
		S: AsRef<str>,
	{
		if vectors.len() != identities.len() {
			return Err(Error::CountMismatch {
				vectors: vectors.len(),
				identities: identities.len(),
			});
		}

		if let Some(found) = vectors
			.iter()
			.map(|vector| vector.as_ref().len())
			.find(|len| *len != self.dim)
		{
			return Err(Error::DimensionMismatch {
				expected: self.dim,
				found,
			});
		}

		let mut seen = HashSet::with_capacity(identities.len());
		for identity in identities.iter().map(AsRef::as_ref) {
			if self.contains(identity) || !seen.insert(identity) {
				return Err(Error::DuplicateIdentity(identity.to_string()));
			}
		}

		self.data.reserve(vectors.len() * self.dim);
		self.identities.reserve(identities.len());

		for (vector, identity) in vectors.iter().zip(identities) {
			let identity = identity.as_ref().to_string();
			self.data.extend_from_slice(vector.as_ref());
			self.positions.insert(identity.clone(), self.identities.len());
			self.identities.push(identity);
		}

		trace!(added = vectors.len(), size = self.len(), "Added vectors to index");

		Ok(())
	}

	/// The `k` nearest stored vectors to `query`, as `(identity, distance)` pairs sorted by
	/// ascending Euclidean distance. Ties go to the earlier inserted vector.
	pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>, Error> {
		if query.len() != self.dim {
			return Err(Error::DimensionMismatch {
				expected: self.dim,
				found: query.len(),
			});
		}

		let mut scored = self
			.rows()
			.enumerate()
			.map(|(pos, row)| (pos, euclidean(row, query)))
			.collect::<Vec<_>>();

		// Stable sort, so equal distances keep insertion order
		scored.sort_by(|(_, a), (_, b)| a.total_cmp(b));

		Ok(scored
			.into_iter()
			.take(k)
			.map(|(pos, distance)| (self.identities[pos].clone(), distance))
			.collect())
	}

	/// Every stored vector in insertion order, one row per vector
	#[must_use]
	pub fn reconstruct_all(&self) -> Array2<f32> {
		Array2::from_shape_fn((self.len(), self.dim), |(row, col)| {
			self.data[row * self.dim + col]
		})
	}

	#[must_use]
	pub fn reconstruct(&self, position: usize) -> Option<&[f32]> {
		(position < self.len()).then(|| &self.data[position * self.dim..(position + 1) * self.dim])
	}

	#[must_use]
	pub fn vector_of(&self, identity: &str) -> Option<&[f32]> {
		self.positions
			.get(identity)
			.and_then(|pos| self.reconstruct(*pos))
	}

	fn rows(&self) -> impl Iterator<Item = &[f32]> {
		self.data.chunks_exact(self.dim)
	}
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
	a.iter()
		.zip(b)
		.map(|(x, y)| (x - y) * (x - y))
		.sum::<f32>()
		.sqrt()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> VectorIndex {
		let mut index = VectorIndex::create(2).unwrap();
		index
			.add(
				&[vec![0.0, 0.0], vec![10.0, 10.0], vec![0.1, 0.1]],
				&["a", "b", "c"],
			)
			.unwrap();
		index
	}

	#[test]
	fn zero_dimension_is_rejected() {
		assert!(matches!(VectorIndex::create(0), Err(Error::Config(_))));
	}

	#[test]
	fn nearest_two_of_three() {
		let index = sample();

		let results = index.search(&[0.0, 0.0], 2).unwrap();

		assert_eq!(results.len(), 2);
		assert_eq!(results[0].0, "a");
		assert!(results[0].1.abs() < f32::EPSILON);
		assert_eq!(results[1].0, "c");
		assert!((results[1].1 - 0.141_421_36).abs() < 1e-5);
	}

	#[test]
	fn fewer_results_than_k() {
		let index = sample();

		let results = index.search(&[5.0, 5.0], 10).unwrap();

		assert_eq!(results.len(), 3);
		assert!(results.windows(2).all(|pair| pair[0].1 <= pair[1].1));
	}

	#[test]
	fn ties_go_to_earlier_insertion() {
		let mut index = VectorIndex::create(1).unwrap();
		index
			.add(&[vec![1.0], vec![-1.0], vec![1.0]], &["first", "second", "third"])
			.unwrap();

		let results = index.search(&[0.0], 3).unwrap();

		let order = results.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>();
		assert_eq!(order, ["first", "second", "third"]);
	}

	#[test]
	fn failed_add_leaves_index_untouched() {
		let mut index = sample();

		assert!(matches!(
			index.add(&[vec![1.0, 2.0], vec![1.0]], &["d", "e"]),
			Err(Error::DimensionMismatch {
				expected: 2,
				found: 1
			})
		));
		assert!(matches!(
			index.add(&[vec![1.0, 2.0]], &["d", "e"]),
			Err(Error::CountMismatch {
				vectors: 1,
				identities: 2
			})
		));
		assert!(matches!(
			index.add(&[vec![1.0, 2.0], vec![3.0, 4.0]], &["d", "a"]),
			Err(Error::DuplicateIdentity(id)) if id == "a"
		));
		assert!(matches!(
			index.add(&[vec![1.0, 2.0], vec![3.0, 4.0]], &["d", "d"]),
			Err(Error::DuplicateIdentity(id)) if id == "d"
		));

		assert_eq!(index.len(), 3);
		assert!(!index.contains("d"));
		assert_eq!(index.reconstruct_all(), sample().reconstruct_all());
	}

	#[test]
	fn search_rejects_wrong_query_dimension() {
		assert!(matches!(
			sample().search(&[0.0, 0.0, 0.0], 1),
			Err(Error::DimensionMismatch {
				expected: 2,
				found: 3
			})
		));
	}

	#[test]
	fn reconstruct_returns_rows_in_append_order() {
		let mut index = sample();
		index.add(&[[7.0_f32, 8.0]], &["d"]).unwrap();

		let matrix = index.reconstruct_all();

		assert_eq!(matrix.shape(), &[4, 2]);
		assert_eq!(matrix.row(1).to_vec(), vec![10.0, 10.0]);
		assert_eq!(matrix.row(3).to_vec(), vec![7.0, 8.0]);
		assert_eq!(index.vector_of("c"), Some(&[0.1_f32, 0.1][..]));
		assert_eq!(index.reconstruct(4), None);
	}
}
