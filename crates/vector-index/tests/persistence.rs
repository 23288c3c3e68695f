use al_vector_index::{
	Corruption, Error, VectorIndex, IDENTITIES_FILE_NAME, VECTORS_FILE_NAME,
};

use std::fs;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use tempfile::tempdir;
use uuid::Uuid;

fn random_index(rng: &mut StdRng, rows: usize, dim: usize) -> VectorIndex {
	let vectors = (0..rows)
		.map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect::<Vec<f32>>())
		.collect::<Vec<_>>();
	let identities = (0..rows).map(|i| format!("item-{i}")).collect::<Vec<_>>();

	let mut index = VectorIndex::create(dim).unwrap();
	index.add(&vectors, &identities).unwrap();
	index
}

#[test]
fn save_then_load_is_identical() {
	let dir = tempdir().unwrap();
	let mut rng = StdRng::seed_from_u64(7);
	let index = random_index(&mut rng, 57, 16);

	index.save(dir.path()).unwrap();
	let loaded = VectorIndex::load(dir.path()).unwrap();

	assert_eq!(loaded.dim(), 16);
	assert_eq!(loaded.identities(), index.identities());
	assert_eq!(loaded.reconstruct_all(), index.reconstruct_all());
	assert!(loaded.contains("item-56"));
}

#[test]
fn empty_index_round_trips() {
	let dir = tempdir().unwrap();

	VectorIndex::create(4).unwrap().save(dir.path()).unwrap();
	let loaded = VectorIndex::load(dir.path()).unwrap();

	assert!(loaded.is_empty());
	assert_eq!(loaded.dim(), 4);
}

#[test]
fn saving_again_replaces_previous_artifacts() {
	let dir = tempdir().unwrap();
	let mut rng = StdRng::seed_from_u64(11);
	let mut index = random_index(&mut rng, 3, 2);
	index.save(dir.path()).unwrap();

	index.add(&[[0.5_f32, 0.5]], &["late"]).unwrap();
	index.save(dir.path()).unwrap();

	let loaded = VectorIndex::load(dir.path()).unwrap();
	assert_eq!(loaded.len(), 4);
	assert_eq!(loaded.vector_of("late"), Some(&[0.5_f32, 0.5][..]));
}

#[test]
fn load_or_create_starts_empty() {
	let dir = tempdir().unwrap();

	assert!(!VectorIndex::exists_in(dir.path()));
	assert!(matches!(
		VectorIndex::load(dir.path()),
		Err(Error::NotFound(_))
	));

	let index = VectorIndex::load_or_create(dir.path(), 8).unwrap();
	assert!(index.is_empty());
	assert_eq!(index.dim(), 8);
}

#[test]
fn load_or_create_rejects_other_dimension() {
	let dir = tempdir().unwrap();
	VectorIndex::create(3).unwrap().save(dir.path()).unwrap();

	assert!(matches!(
		VectorIndex::load_or_create(dir.path(), 5),
		Err(Error::DimensionMismatch {
			expected: 5,
			found: 3
		})
	));
}

#[test]
fn single_artifact_is_corrupt() {
	let dir = tempdir().unwrap();
	let mut rng = StdRng::seed_from_u64(3);
	random_index(&mut rng, 4, 2).save(dir.path()).unwrap();

	fs::remove_file(dir.path().join(IDENTITIES_FILE_NAME)).unwrap();

	assert!(VectorIndex::exists_in(dir.path()));
	assert!(matches!(
		VectorIndex::load(dir.path()),
		Err(Error::CorruptIndex {
			kind: Corruption::MissingArtifact(IDENTITIES_FILE_NAME),
			..
		})
	));
}

#[test]
fn artifacts_from_different_saves_are_corrupt() {
	let first = tempdir().unwrap();
	let second = tempdir().unwrap();
	let mut rng = StdRng::seed_from_u64(5);
	let index = random_index(&mut rng, 4, 2);

	index.save(first.path()).unwrap();
	index.save(second.path()).unwrap();

	fs::copy(
		second.path().join(IDENTITIES_FILE_NAME),
		first.path().join(IDENTITIES_FILE_NAME),
	)
	.unwrap();

	assert!(matches!(
		VectorIndex::load(first.path()),
		Err(Error::CorruptIndex {
			kind: Corruption::GenerationMismatch,
			..
		})
	));
}

#[derive(Serialize)]
struct RawVectors {
	version: u32,
	generation: Uuid,
	dim: usize,
	rows: usize,
	data: Vec<f32>,
}

#[derive(Serialize)]
struct RawIdentities {
	version: u32,
	generation: Uuid,
	identities: Vec<String>,
}

fn write_raw(dir: &std::path::Path, vectors: &RawVectors, identities: &RawIdentities) {
	fs::write(
		dir.join(VECTORS_FILE_NAME),
		rmp_serde::to_vec_named(vectors).unwrap(),
	)
	.unwrap();
	fs::write(
		dir.join(IDENTITIES_FILE_NAME),
		rmp_serde::to_vec_named(identities).unwrap(),
	)
	.unwrap();
}

#[test]
fn count_mismatch_is_corrupt() {
	let dir = tempdir().unwrap();
	let generation = Uuid::new_v4();

	write_raw(
		dir.path(),
		&RawVectors {
			version: 1,
			generation,
			dim: 2,
			rows: 2,
			data: vec![0.0, 0.0, 1.0, 1.0],
		},
		&RawIdentities {
			version: 1,
			generation,
			identities: vec!["a".to_string()],
		},
	);

	assert!(matches!(
		VectorIndex::load(dir.path()),
		Err(Error::CorruptIndex {
			kind: Corruption::CountMismatch {
				vectors: 2,
				identities: 1
			},
			..
		})
	));
}

#[test]
fn truncated_vector_data_is_corrupt() {
	let dir = tempdir().unwrap();
	let generation = Uuid::new_v4();

	write_raw(
		dir.path(),
		&RawVectors {
			version: 1,
			generation,
			dim: 2,
			rows: 2,
			data: vec![0.0, 0.0, 1.0],
		},
		&RawIdentities {
			version: 1,
			generation,
			identities: vec!["a".to_string(), "b".to_string()],
		},
	);

	assert!(matches!(
		VectorIndex::load(dir.path()),
		Err(Error::CorruptIndex {
			kind: Corruption::DataLength {
				expected: 4,
				found: 3
			},
			..
		})
	));
}

#[test]
fn garbage_is_corrupt() {
	let dir = tempdir().unwrap();
	fs::write(dir.path().join(VECTORS_FILE_NAME), b"definitely not msgpack").unwrap();
	fs::write(dir.path().join(IDENTITIES_FILE_NAME), b"nope").unwrap();

	assert!(matches!(
		VectorIndex::load(dir.path()),
		Err(Error::CorruptIndex {
			kind: Corruption::Decode { .. },
			..
		})
	));
}
