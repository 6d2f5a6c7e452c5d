use moor_config::ConfigError;
use moor_deploy::DeployError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error("{0}")]
    Output(String),
}

impl CliError {
    /// Exit codes: 2 for spec problems the caller can fix, 130 for Ctrl-C,
    /// 1 for everything that went wrong on the host.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 2,
            CliError::Deploy(DeployError::Interrupted) => 130,
            CliError::Deploy(_) | CliError::Output(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
