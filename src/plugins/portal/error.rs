use bevy::prelude::Entity;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("portal {0:?} cannot be connected to itself")]
    SelfLink(Entity),
    #[error("portal {0:?} is not registered")]
    UnknownPortal(Entity),
    #[error("invalid portal configuration: {0}")]
    Config(#[from] serde_json::Error),
}
