//! Translation of a [`LaunchConfig`] into the server's command line.

use std::{fmt, path::PathBuf};

use crate::config::{LaunchConfig, Transport};

/// Program and arguments handed to the OS, in the stable order other tooling
/// relies on when reading the diagnostic rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Number of trailing `args` that came from the caller and are rendered
    /// as-is.
    verbatim: usize,
}

impl CommandLine {
    /// A command line taken as given, every argument quoted when rendered.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            verbatim: 0,
        }
    }

    /// Builds `<runner> run --directory <dir> <target> -- --transport ...`.
    pub fn build(config: &LaunchConfig) -> Self {
        let mut args = vec!["run".to_string()];

        if !config.working_directory.as_os_str().is_empty() {
            args.push("--directory".into());
            args.push(config.working_directory.display().to_string());
        }

        args.push(config.server_target.clone());
        args.push("--".into());
        args.push("--transport".into());
        args.push(config.transport.as_arg().into());

        if config.transport.has_endpoint() {
            args.push("--mcp-host".into());
            args.push(config.host.clone());
            args.push("--mcp-port".into());
            args.push(config.port.to_string());

            if config.transport == Transport::Http {
                args.push("--mcp-path".into());
                args.push(config.path.clone());
            }
        }

        args.push("--cpp-source-path".into());
        args.push(config.cpp_source_path().display().to_string());
        args.push("--ue-plugin-host".into());
        args.push(config.plugin_host.clone());
        args.push("--ue-plugin-port".into());
        args.push(config.plugin_port.to_string());

        args.extend(config.extra_args.iter().cloned());

        Self {
            program: config.executable_path.clone(),
            args,
            verbatim: config.extra_args.len(),
        }
    }
}

impl fmt::Display for CommandLine {
    /// Single-line rendering for logs and error messages.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", quote(&self.program.display().to_string()))?;

        let quoted = self.args.len() - self.verbatim;
        for (i, arg) in self.args.iter().enumerate() {
            if i < quoted {
                write!(f, " {}", quote(arg))?;
            } else {
                write!(f, " {}", arg)?;
            }
        }

        Ok(())
    }
}

fn needs_wrapping(s: &str) -> bool {
    s.contains(|ch: char| ch.is_whitespace() || ch == '"' || ch == '\'')
}

/// Minimal quoting: wrap in double quotes and backslash-escape embedded ones.
fn quote(s: &str) -> String {
    if needs_wrapping(s) {
        format!("\"{}\"", s.replace('"', "\\\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{quote, CommandLine};
    use crate::config::LaunchConfigBuilder;
    use crate::config::Transport;

    fn base() -> LaunchConfigBuilder {
        let mut builder = LaunchConfigBuilder::default();
        builder
            .working_directory("/work/plugin")
            .cpp_source_path("/work/game/Source");
        builder
    }

    #[test]
    fn http_carries_host_port_and_path() {
        let config = base()
            .transport(Transport::Http)
            .host("127.0.0.1")
            .port(8765u16)
            .path("/mcp")
            .build()
            .expect("valid config");

        let command = CommandLine::build(&config);
        assert_eq!(command.program.to_str(), Some("uv"));
        assert_eq!(
            command.args,
            vec![
                "run",
                "--directory",
                "/work/plugin",
                "ue5-analyzer",
                "--",
                "--transport",
                "http",
                "--mcp-host",
                "127.0.0.1",
                "--mcp-port",
                "8765",
                "--mcp-path",
                "/mcp",
                "--cpp-source-path",
                "/work/game/Source",
                "--ue-plugin-host",
                "127.0.0.1",
                "--ue-plugin-port",
                "8080",
            ]
        );
    }

    #[test]
    fn sse_has_no_path() {
        let config = base()
            .transport(Transport::Sse)
            .build()
            .expect("valid config");

        let command = CommandLine::build(&config);
        assert!(command.args.iter().any(|a| a == "--mcp-port"));
        assert!(!command.args.iter().any(|a| a == "--mcp-path"));
    }

    #[test]
    fn stdio_has_no_listener_flags() {
        let config = base()
            .transport(Transport::Stdio)
            .build()
            .expect("valid config");

        let rendered = CommandLine::build(&config).to_string();
        assert_eq!(
            rendered,
            "uv run --directory /work/plugin ue5-analyzer -- --transport stdio \
             --cpp-source-path /work/game/Source --ue-plugin-host 127.0.0.1 --ue-plugin-port 8080"
        );
    }

    #[test]
    fn empty_directory_drops_the_flag() {
        let config = base()
            .working_directory("")
            .transport(Transport::Stdio)
            .build()
            .expect("valid config");

        let command = CommandLine::build(&config);
        assert_eq!(command.args[0], "run");
        assert_eq!(command.args[1], "ue5-analyzer");
    }

    #[test]
    fn extra_args_come_last_and_unquoted() {
        let config = base()
            .transport(Transport::Stdio)
            .extra_args(vec!["--default-scope".to_string(), "all of it".to_string()])
            .build()
            .expect("valid config");

        let command = CommandLine::build(&config);
        let n = command.args.len();
        assert_eq!(command.args[n - 2], "--default-scope");
        assert_eq!(command.args[n - 1], "all of it");
        assert!(command.to_string().ends_with(" --default-scope all of it"));
    }

    #[test]
    fn paths_with_spaces_are_quoted_in_the_rendering_only() {
        let config = base()
            .working_directory("/Users/me/Unreal Projects/Plugin")
            .transport(Transport::Stdio)
            .build()
            .expect("valid config");

        let command = CommandLine::build(&config);
        assert_eq!(command.args[2], "/Users/me/Unreal Projects/Plugin");
        assert!(command
            .to_string()
            .contains("--directory \"/Users/me/Unreal Projects/Plugin\" ue5-analyzer"));
    }

    #[test]
    fn quoting() {
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote("hello world"), "\"hello world\"");
        assert_eq!(quote("tab\there"), "\"tab\there\"");
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote("it's"), "\"it's\"");
    }
}
