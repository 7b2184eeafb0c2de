use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("channel error: {0}")]
    Channel(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("command error: {0}")]
    Command(String),
    #[error("directory error: {0}")]
    Directory(String),
}

impl RecorderError {
    /// Channel, protocol and validation failures are absorbed where they are
    /// detected; they never end a session or drop accumulated code lines.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Channel(_) | Self::Protocol(_) | Self::Validation(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::ConfigParse(_) => "config_parse",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Cli(_) => "cli",
            Self::Channel(_) => "channel",
            Self::Protocol(_) => "protocol",
            Self::Validation(_) => "validation",
            Self::Command(_) => "command",
            Self::Directory(_) => "directory",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RecorderError;

    #[test]
    fn only_command_class_errors_surface() {
        assert!(RecorderError::Channel("x".into()).is_recoverable());
        assert!(RecorderError::Protocol("x".into()).is_recoverable());
        assert!(RecorderError::Validation("x".into()).is_recoverable());
        assert!(!RecorderError::Command("x".into()).is_recoverable());
        assert_eq!(RecorderError::Command("x".into()).kind(), "command");
    }
}
