//! Append-only, exact nearest neighbour index over fixed dimension `f32` vectors.
//!
//! Every stored vector is paired with the identity of the item it embeds, kept in a parallel
//! list with the same order and length. Searches are a linear scan by Euclidean distance, so
//! results are exact and reproducible, ties going to the earlier inserted vector.
//!
//! The index persists as two artifacts in a directory, see [`VectorIndex::save`].

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod error;
mod index;
mod persist;

pub use error::{Corruption, Error};
pub use index::VectorIndex;
pub use persist::{IDENTITIES_FILE_NAME, VECTORS_FILE_NAME};
