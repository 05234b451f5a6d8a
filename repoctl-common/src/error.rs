use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepoctlError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unrecognized artifact format: {0}")]
    UnrecognizedFormat(String),

    #[error("Incompatible distribution for {0}")]
    IncompatibleDistro(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Index regeneration failed: {0}")]
    IndexRegeneration(String),

    #[error("No artifacts found for source {0}")]
    NoArtifactsFound(String),

    #[error("no distributions found in the repo and no packages with any distros added")]
    NoDistros,

    #[error("Repo path outside allowed paths: {0}")]
    DisallowedPath(String),

    #[error("Invalid path template: {0}")]
    Template(String),

    #[error("Failed to execute command: {0}")]
    CommandExec(String),

    #[error("Failed to download '{0}': {1}")]
    Download(String, String),
}

pub type Result<T> = std::result::Result<T, RepoctlError>;
