use update_engine::UpdateError;

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidBuild(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Engine(#[from] UpdateError),
}

pub type Result<T> = std::result::Result<T, PublishError>;
