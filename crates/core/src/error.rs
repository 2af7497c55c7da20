use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("invalid proxy string: {0}")]
	InvalidProxy(String),

	#[error("invalid profile name: {0}")]
	InvalidName(String),

	#[error("name generation exhausted after {attempts} attempts")]
	NameGeneration { attempts: u32 },

	#[error(transparent)]
	Service(#[from] anyhow::Error),
}
