use crate::config::WorkbenchConfig;

use al_utils::error::FileIOError;

use anyhow::Result;
use tracing_appender::{
	non_blocking::WorkerGuard,
	rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
	filter::LevelFilter,
	fmt::{self, Layer},
	prelude::*,
	EnvFilter,
};

#[cfg(debug_assertions)]
const CONSOLE_LOG_FILTER: LevelFilter = LevelFilter::DEBUG;

#[cfg(not(debug_assertions))]
const CONSOLE_LOG_FILTER: LevelFilter = LevelFilter::INFO;

/// Two weeks of daily files
const MAX_LOG_FILES: usize = 14;

const OUR_CRATES: [&str; 4] = [
	"al_core",
	"al_task_system",
	"al_vector_index",
	"al_active_learning",
];

/// `RUST_LOG` directives, then everything else at `warn` and our crates at `log_level`
pub fn env_filter(log_level: &str) -> Result<EnvFilter> {
	let mut filter = EnvFilter::from_default_env().add_directive("warn".parse()?);

	for krate in OUR_CRATES {
		filter = filter.add_directive(format!("{krate}={log_level}").parse()?);
	}

	Ok(filter)
}

/// Installs the global subscriber: console output plus daily rolling files under the logs
/// directory. The returned guard flushes the file writer when dropped, keep it alive.
pub fn init(config: &WorkbenchConfig) -> Result<WorkerGuard> {
	let logs_dir = config.logs_dir();
	std::fs::create_dir_all(&logs_dir)
		.map_err(|e| FileIOError::from((&logs_dir, e, "creating logs directory")))?;

	let (non_blocking, guard) = tracing_appender::non_blocking(
		RollingFileAppender::builder()
			.rotation(Rotation::DAILY)
			.filename_suffix("log")
			.max_log_files(MAX_LOG_FILES)
			.build(&logs_dir)?,
	);

	tracing_subscriber::registry()
		.with(env_filter(&config.log_level)?)
		.with(fmt::layer().with_filter(CONSOLE_LOG_FILTER))
		.with(
			Layer::default()
				.with_writer(non_blocking)
				.with_ansi(false)
				.with_filter(LevelFilter::DEBUG),
		)
		.try_init()?;

	Ok(guard)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn filter_carries_our_crates() {
		let filter = env_filter("trace").unwrap().to_string();

		for krate in OUR_CRATES {
			assert!(filter.contains(&format!("{krate}=trace")), "{filter}");
		}
	}

	#[test]
	fn bad_level_is_an_error() {
		assert!(env_filter("not a level").is_err());
	}
}
