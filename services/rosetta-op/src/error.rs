use thiserror::Error;

use rosetta_op_runtime::TaskFailure;
use rosetta_op_types::ConfigError;

use crate::asserter::AsserterError;
use crate::client::ClientError;

/// Every way a `run` can end other than a clean return.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("unable to load configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("could not initialize server asserter: {0}")]
    ValidatorInit(#[from] AsserterError),

    #[error("cannot initialize optimism client: {0}")]
    ClientInit(#[from] ClientError),

    #[error("unable to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error(transparent)]
    Task(#[from] TaskFailure),

    /// Operator-requested stop; not a failure of any subsystem
    #[error("rosetta-op halted")]
    Halted,
}

impl SupervisorError {
    /// True for errors raised before any task was started.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::ValidatorInit(_) | Self::ClientInit(_) | Self::Signals(_)
        )
    }
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
