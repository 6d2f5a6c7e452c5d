use std::io;

/// Errors from the deployment executor and its helpers.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] moor_config::ConfigError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("'{command}' exited with {status}{}", detail_suffix(.detail))]
    CommandFailed { command: String, status: String, detail: String },

    #[error("'{command}' failed after {attempts} attempts: {last}")]
    RetriesExhausted { command: String, attempts: u32, last: String },

    #[error("port {port} on {bind} is unavailable: {reason}{}", suggestion_suffix(.suggestion))]
    PortConflict { bind: String, port: u16, reason: String, suggestion: Option<u16> },

    #[error("nginx rejected the generated configuration: {detail}")]
    NginxConfigRejected { detail: String },

    #[error("deployed, but nginx did not pick up the new configuration: {detail}")]
    ReloadFailed { detail: String },

    #[error("preflight: {0}")]
    Preflight(String),

    #[error("interrupted")]
    Interrupted,
}

fn detail_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {detail}")
    }
}

fn suggestion_suffix(suggestion: &Option<u16>) -> String {
    match suggestion {
        Some(port) => format!("; try {port}"),
        None => String::new(),
    }
}

impl DeployError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> DeployError {
        let context = context.into();
        move |source| DeployError::Io { context, source }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
