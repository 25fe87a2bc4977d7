use std::{error::Error as StdError, fmt, io};

pub type Result<T> = ::std::result::Result<T, Error>;

pub enum Error {
    /// Invalid launch or supervisor configuration, including a host that
    /// does not resolve.
    Config(String),
    /// The OS refused to create the server process.
    Spawn { command: String, err: io::Error },
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Config(_) => None,
            Error::Spawn { err, .. } => Some(err),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} error: {}",
            match self {
                Error::Config(_) => "Config",
                Error::Spawn { .. } => "Spawn",
            },
            match self {
                Error::Config(msg) => msg.clone(),
                Error::Spawn { command, err } => {
                    format!("couldn't launch '{}':\n{}", command, err)
                }
            }
        )
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use std::io;

    #[test]
    fn spawn_error_names_the_command_line() {
        let err = Error::Spawn {
            command: "uv run ue5-analyzer".into(),
            err: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };

        let shown = err.to_string();
        assert!(shown.starts_with("Spawn error: couldn't launch 'uv run ue5-analyzer'"));
        assert!(shown.ends_with("No such file or directory"));
    }

    #[test]
    fn config_error_is_shown_verbatim() {
        let err = Error::Config("port must be set for http transport".into());
        assert_eq!(
            err.to_string(),
            "Config error: port must be set for http transport"
        );
    }
}
