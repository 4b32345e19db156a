//! Top-level error type for the runtime.

use thiserror::Error;

use crate::config::ConfigError;
use crate::hooks::HookServerError;
use crate::pty::SupervisorError;
use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    HookServer(#[from] HookServerError),
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use deck_core::SessionId;

    #[test]
    fn test_errors_convert_transparently() {
        let err: CoreError = SupervisorError::SessionNotFound(SessionId::new(3)).into();
        assert_eq!(err.to_string(), "session not found: 3");

        let err: CoreError = RegistryError::ChannelClosed.into();
        assert!(matches!(err, CoreError::Registry(_)));
    }
}
