pub(crate) mod config;
pub(crate) mod fetch;

/// How a command that ran without a fatal error ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunStatus {
    Completed,
    Interrupted,
}
