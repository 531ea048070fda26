//! Unified error types for the orchestration core.

use std::fmt;

// ---------------------------------------------------------------------------
// ToolError
// ---------------------------------------------------------------------------

/// Errors arising from tool execution.
#[derive(Debug)]
pub enum ToolError {
    /// The caller supplied arguments the tool couldn't parse or accept.
    InvalidArguments(String),
    /// The tool ran but encountered a failure.
    ExecutionFailed(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArguments(msg) => write!(f, "invalid arguments: {msg}"),
            Self::ExecutionFailed(msg) => write!(f, "execution failed: {msg}"),
        }
    }
}

impl std::error::Error for ToolError {}

impl From<ExecError> for ToolError {
    fn from(e: ExecError) -> Self {
        Self::ExecutionFailed(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading or parsing configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Toml(e) => write!(f, "toml: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml(e)
    }
}

// ---------------------------------------------------------------------------
// ExecError
// ---------------------------------------------------------------------------

/// Faults that prevent a subprocess from being started or observed.
///
/// Nonzero exits and timeouts are not errors: they are reported through
/// [`crate::tools::execution::ExitState`].
#[derive(Debug)]
pub enum ExecError {
    /// The shell could not be spawned.
    Spawn(std::io::Error),
    /// Waiting on the child failed.
    Wait(std::io::Error),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "failed to spawn shell: {e}"),
            Self::Wait(e) => write!(f, "failed to wait for command: {e}"),
        }
    }
}

impl std::error::Error for ExecError {}

// ---------------------------------------------------------------------------
// RunError
// ---------------------------------------------------------------------------

/// Named failures an agent runtime may raise for a single turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// No model has been configured for the runtime.
    LlmNotConfigured,
    /// The configured model lacks capabilities the turn requires.
    CapabilityUnsupported(Vec<String>),
    /// The turn hit the configured step ceiling.
    MaxStepsReached { steps: u32 },
    /// The runtime observed the cancellation signal and stopped.
    Cancelled,
    /// The model provider returned an error.
    Provider(String),
    /// Anything else.
    Other(String),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LlmNotConfigured => write!(f, "LLM not configured"),
            Self::CapabilityUnsupported(caps) => write!(
                f,
                "LLM model does not support required capability: {}",
                caps.join(", ")
            ),
            Self::MaxStepsReached { steps } => write!(f, "max steps reached ({steps})"),
            Self::Cancelled => write!(f, "run cancelled"),
            Self::Provider(msg) => write!(f, "provider error: {msg}"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for RunError {}
