use thiserror::Error;

use crate::models::ActorRef;

#[derive(Error, Debug)]
pub enum DialogueError {
    #[error("Invalid actor reference: {0:?}")]
    InvalidActor(ActorRef),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
