use thiserror::Error;

/// Selection never fails for valid input, so this only surfaces caller bugs
#[derive(Debug, Error)]
pub enum SelectorError {
	#[error("invalid selection argument: {0}")]
	InvalidArgument(#[from] InvalidArgument),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidArgument {
	#[error("batch size must be at least 1")]
	ZeroBatchSize,
	#[error("received {vectors} vectors for {identities} identities")]
	LengthMismatch { vectors: usize, identities: usize },
	#[error("labeled identity is not one of the candidates <identity='{0}'>")]
	UnknownLabeled(String),
	#[error("identity appears more than once <identity='{0}'>")]
	DuplicateIdentity(String),
}
