//! Command-line parsing and validation of the host configuration.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "langbridge", version)]
#[command(about = "Drive a language server over stdio on behalf of tool callers")]
pub struct Cli {
    /// Workspace directory the language server operates on
    #[arg(long)]
    pub workspace: PathBuf,
    /// Language server executable (name on PATH or a path)
    #[arg(long)]
    pub lsp: String,
    /// JSON file of initialization options, keyed by server executable name
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Append logs to this file instead of writing them to stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
    /// Arguments for the language server, given after `--`
    #[arg(last = true)]
    pub lsp_args: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("workspace directory does not exist: {}", .0.display())]
    WorkspaceMissing(PathBuf),
    #[error("workspace is not a directory: {}", .0.display())]
    WorkspaceNotDirectory(PathBuf),
    #[error("LSP command not found: {0}")]
    CommandNotFound(String),
    #[error("failed to read config file {}: {source}", path.display())]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config for {0} must be a JSON object")]
    NotAnObject(String),
}

/// Validated host configuration.
#[derive(Debug)]
pub struct Config {
    /// Canonical workspace root.
    pub workspace: PathBuf,
    /// The LSP command as given; resolved again when spawned.
    pub lsp_command: String,
    pub lsp_args: Vec<String>,
    /// Initialization options for this server from the config file.
    pub lsp_options: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let workspace = fs::canonicalize(&cli.workspace)
            .map_err(|_| ConfigError::WorkspaceMissing(cli.workspace.clone()))?;
        if !workspace.is_dir() {
            return Err(ConfigError::WorkspaceNotDirectory(workspace));
        }

        which::which(&cli.lsp).map_err(|_| ConfigError::CommandNotFound(cli.lsp.clone()))?;

        let lsp_options = match &cli.config {
            Some(path) => load_server_options(path, &server_name(&cli.lsp))?,
            None => None,
        };

        Ok(Self {
            workspace,
            lsp_command: cli.lsp,
            lsp_args: cli.lsp_args,
            lsp_options,
        })
    }
}

/// Executable file name without directory or extension: `/usr/bin/gopls` ->
/// `gopls`, `pyright.cmd` -> `pyright`.
pub fn server_name(command: &str) -> String {
    Path::new(command)
        .file_stem()
        .map_or_else(|| command.to_string(), |s| s.to_string_lossy().into_owned())
}

/// Read `path` and return the entry for `server`, if present.
pub fn load_server_options(
    path: &Path,
    server: &str,
) -> Result<Option<serde_json::Map<String, serde_json::Value>>, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    let mut all: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&raw).map_err(|source| ConfigError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })?;

    match all.remove(server) {
        None => Ok(None),
        Some(serde_json::Value::Object(options)) => Ok(Some(options)),
        Some(_) => Err(ConfigError::NotAnObject(server.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("langbridge").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_collects_args_after_separator() {
        let cli = parse(&[
            "--workspace",
            "/tmp",
            "--lsp",
            "gopls",
            "--",
            "serve",
            "-rpc.trace",
        ]);
        assert_eq!(cli.lsp, "gopls");
        assert_eq!(cli.lsp_args, vec!["serve", "-rpc.trace"]);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_requires_workspace_and_lsp() {
        assert!(Cli::try_parse_from(["langbridge", "--lsp", "gopls"]).is_err());
        assert!(Cli::try_parse_from(["langbridge", "--workspace", "/tmp"]).is_err());
    }

    #[test]
    fn test_server_name_strips_dir_and_extension() {
        assert_eq!(server_name("/usr/local/bin/gopls"), "gopls");
        assert_eq!(server_name("pyright-langserver.cmd"), "pyright-langserver");
        assert_eq!(server_name("rust-analyzer"), "rust-analyzer");
    }

    #[test]
    fn test_load_server_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lsp.json");
        fs::write(
            &path,
            r#"{"gopls": {"gofumpt": true}, "pyright": ["not", "an", "object"]}"#,
        )
        .unwrap();

        let gopls = load_server_options(&path, "gopls").unwrap().unwrap();
        assert_eq!(gopls["gofumpt"], true);
        assert!(load_server_options(&path, "clangd").unwrap().is_none());
        assert!(matches!(
            load_server_options(&path, "pyright"),
            Err(ConfigError::NotAnObject(name)) if name == "pyright"
        ));
    }

    #[test]
    fn test_load_server_options_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            load_server_options(&missing, "gopls"),
            Err(ConfigError::ReadConfig { .. })
        ));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ nope").unwrap();
        assert!(matches!(
            load_server_options(&broken, "gopls"),
            Err(ConfigError::ParseConfig { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_from_cli_validates_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.txt");
        fs::write(&file, "").unwrap();
        // `sh` stands in for a language server that exists on PATH.
        let cli = |workspace: &Path| Cli {
            workspace: workspace.to_path_buf(),
            lsp: String::from("sh"),
            config: None,
            log_file: None,
            lsp_args: Vec::new(),
        };

        assert!(matches!(
            Config::from_cli(cli(&dir.path().join("nope"))),
            Err(ConfigError::WorkspaceMissing(_))
        ));
        assert!(matches!(
            Config::from_cli(cli(&file)),
            Err(ConfigError::WorkspaceNotDirectory(_))
        ));

        let config = Config::from_cli(cli(dir.path())).unwrap();
        assert_eq!(config.workspace, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_from_cli_rejects_unknown_command() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli {
            workspace: dir.path().to_path_buf(),
            lsp: String::from("no-such-language-server-xyz"),
            config: None,
            log_file: None,
            lsp_args: Vec::new(),
        };
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::CommandNotFound(_))
        ));
    }
}
