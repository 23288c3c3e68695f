//! Core of the autolabel workbench.
//!
//! A project goes through upload, embedding, iterative human annotation of the batches the
//! selector proposes, detector training and automatic annotation of what is left. The heavy
//! steps run as background jobs on a long lived worker pool, each one committing its results
//! together with the project's next stage or not at all.

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

pub mod config;
pub mod domain;
mod error;
pub mod index;
pub mod job;
pub mod logging;
pub mod models;
pub mod store;
mod workbench;
pub mod workflow;

pub use error::Error;
pub use workbench::Workbench;

pub use al_active_learning::{KMeans, Strategy};
