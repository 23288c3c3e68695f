//! Active learning batch selection.
//!
//! Given the embedding of every item, which items are already labeled and a batch size, the
//! [`Selector`] picks the next items a human should label. Three strategies are available, see
//! [`Strategy`]. With nothing labeled yet, distances to the labeled set are meaningless, so the
//! selector falls back to [`Strategy::Kmeans`] whatever was requested.

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

mod distance;
mod error;
pub mod kmeans;
pub mod max_distance;
mod selector;

pub use distance::euclidean;
pub use error::{InvalidArgument, SelectorError};
pub use kmeans::{KMeans, KMeansFit};
pub use max_distance::{farthest_point_picks, Pick};
pub use selector::{Selector, Strategy};
