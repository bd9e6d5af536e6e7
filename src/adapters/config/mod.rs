use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::adapters::mcp::McpServerConfig;
use crate::core::agent::{Scope, StepBudget, DEFAULT_MAX_STEPS};
use crate::error::CheckError;

pub const DEFAULT_MODEL_ID: &str = "openai/gpt-5-nano";

/// Optional `config.toml`. Every key may be omitted.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub model: Option<String>,
    pub netbox_url: Option<String>,
    pub netbox_token: Option<String>,
    pub mcp_dir: Option<String>,
    pub max_steps: Option<u32>,
    pub allowed_tools: Option<Vec<String>>,
    pub server_command: Option<String>,
    pub server_args: Option<Vec<String>>,
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("netbox-compliance").join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self, CheckError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CheckError::config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| CheckError::config(format!("invalid settings file {}: {e}", path.display())))
    }

    /// An explicit path must exist; the default location is only read if present.
    pub fn load_optional(explicit: Option<&Path>) -> Result<Self, CheckError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => {
                log::debug!("loading settings from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }
}

/// Values from the command line, already merged with their environment
/// variables by the argument parser.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    pub rule: String,
    pub site: Option<String>,
    pub rack: Option<String>,
    pub device: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub netbox_url: Option<String>,
    pub netbox_token: Option<String>,
    pub mcp_dir: Option<String>,
    pub limit: Option<u32>,
    pub max_steps: Option<u32>,
}

/// Everything a run needs, validated before anything is spawned.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub rule: String,
    pub scope: Scope,
    pub model_id: String,
    pub api_key: String,
    pub limit: Option<u32>,
    pub budget: StepBudget,
    pub server: McpServerConfig,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn require(value: Option<String>, what: &str, flag: &str, env: &str) -> Result<String, CheckError> {
    non_empty(value).ok_or_else(|| {
        CheckError::config(format!("missing {what}: pass {flag} or set {env}"))
    })
}

pub fn expand_tilde(raw: &str) -> PathBuf {
    let home = dirs::home_dir();
    match (raw, home) {
        ("~", Some(home)) => home,
        (path, Some(home)) if path.starts_with("~/") => home.join(&path[2..]),
        (path, _) => PathBuf::from(path),
    }
}

fn validate_mcp_dir(raw: &str) -> Result<PathBuf, CheckError> {
    let dir = expand_tilde(raw);
    if !dir.join("pyproject.toml").is_file() {
        return Err(CheckError::config(format!(
            "NetBox MCP server not found at {}: expected a pyproject.toml from netbox-mcp-server",
            dir.display()
        )));
    }
    Ok(dir)
}

impl CheckConfig {
    /// Flag or env value first, then the settings file, then the built-in default.
    pub fn resolve(options: CheckOptions, settings: &Settings) -> Result<Self, CheckError> {
        let scope = Scope::from_options(options.site, options.rack, options.device)?;

        let rule = options.rule.trim().to_string();
        if rule.is_empty() {
            return Err(CheckError::config("the compliance rule must not be empty"));
        }

        let netbox_url = require(
            options.netbox_url.or_else(|| settings.netbox_url.clone()),
            "NetBox URL",
            "--netbox-url",
            "NETBOX_URL",
        )?;
        let netbox_token = require(
            options.netbox_token.or_else(|| settings.netbox_token.clone()),
            "NetBox API token",
            "--netbox-token",
            "NETBOX_TOKEN",
        )?;
        let mcp_dir = require(
            options.mcp_dir.or_else(|| settings.mcp_dir.clone()),
            "NetBox MCP server directory",
            "--mcp-dir",
            "MCP_SERVER_DIR",
        )?;
        let api_key = require(options.api_key, "model API key", "--api-key", "API_KEY")?;

        let max_steps = options
            .max_steps
            .or(settings.max_steps)
            .unwrap_or(DEFAULT_MAX_STEPS);
        if max_steps == 0 {
            return Err(CheckError::config("--max-steps must be at least 1"));
        }

        let model_id = non_empty(options.model)
            .or_else(|| non_empty(settings.model.clone()))
            .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string());

        let mcp_dir = validate_mcp_dir(&mcp_dir)?;

        let mut server = McpServerConfig::netbox(&mcp_dir, &netbox_url, &netbox_token);
        if let Some(command) = non_empty(settings.server_command.clone()) {
            server.command = command;
        }
        if let Some(args) = &settings.server_args {
            server.args = args.clone();
        }
        if let Some(allowed) = &settings.allowed_tools {
            server.allowed_tools = Some(allowed.clone());
        }

        Ok(Self {
            rule,
            scope,
            model_id,
            api_key,
            limit: options.limit,
            budget: StepBudget::new(max_steps),
            server,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mcp_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("pyproject.toml"), "[project]\nname = \"netbox-mcp-server\"\n")
            .expect("write pyproject");
        dir
    }

    fn options(dir: &Path) -> CheckOptions {
        CheckOptions {
            rule: "every device should have a primary IPv4 or IPv6".to_string(),
            site: Some("DM-Akron".to_string()),
            api_key: Some("sk-test".to_string()),
            netbox_url: Some("https://demo.netbox.dev".to_string()),
            netbox_token: Some("nbt_123".to_string()),
            mcp_dir: Some(dir.display().to_string()),
            ..CheckOptions::default()
        }
    }

    fn config_message(err: CheckError) -> String {
        match err {
            CheckError::Config(msg) => msg,
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn resolves_defaults_for_a_complete_command_line() {
        let dir = mcp_dir();
        let config = CheckConfig::resolve(options(dir.path()), &Settings::default()).unwrap();

        assert_eq!(config.model_id, DEFAULT_MODEL_ID);
        assert_eq!(config.budget, StepBudget::new(25));
        assert_eq!(config.scope, Scope::Site("DM-Akron".into()));
        assert_eq!(config.server.command, "uv");
        assert!(config
            .server
            .env
            .contains(&("NETBOX_URL".to_string(), "https://demo.netbox.dev".to_string())));
    }

    #[test]
    fn missing_required_values_name_flag_and_variable() {
        let dir = mcp_dir();

        let mut opts = options(dir.path());
        opts.netbox_url = None;
        let msg = config_message(CheckConfig::resolve(opts, &Settings::default()).unwrap_err());
        assert!(msg.contains("--netbox-url") && msg.contains("NETBOX_URL"), "{msg}");

        let mut opts = options(dir.path());
        opts.netbox_token = Some("   ".to_string());
        let msg = config_message(CheckConfig::resolve(opts, &Settings::default()).unwrap_err());
        assert!(msg.contains("NETBOX_TOKEN"), "{msg}");

        let mut opts = options(dir.path());
        opts.api_key = None;
        let msg = config_message(CheckConfig::resolve(opts, &Settings::default()).unwrap_err());
        assert!(msg.contains("API_KEY"), "{msg}");
    }

    #[test]
    fn settings_fill_gaps_but_never_override_flags() {
        let dir = mcp_dir();
        let settings = Settings {
            model: Some("anthropic/claude-sonnet-4-20250514".to_string()),
            netbox_url: Some("https://from-file.example".to_string()),
            max_steps: Some(40),
            ..Settings::default()
        };

        let mut opts = options(dir.path());
        opts.netbox_url = None;
        let config = CheckConfig::resolve(opts, &settings).unwrap();
        assert_eq!(config.model_id, "anthropic/claude-sonnet-4-20250514");
        assert_eq!(config.budget.max_steps, 40);
        assert!(config
            .server
            .env
            .contains(&("NETBOX_URL".to_string(), "https://from-file.example".to_string())));

        let mut opts = options(dir.path());
        opts.model = Some("openrouter/openai/gpt-4.1".to_string());
        opts.max_steps = Some(3);
        let config = CheckConfig::resolve(opts, &settings).unwrap();
        assert_eq!(config.model_id, "openrouter/openai/gpt-4.1");
        assert_eq!(config.budget.max_steps, 3);
    }

    #[test]
    fn zero_step_budget_is_rejected() {
        let dir = mcp_dir();
        let mut opts = options(dir.path());
        opts.max_steps = Some(0);
        let msg = config_message(CheckConfig::resolve(opts, &Settings::default()).unwrap_err());
        assert!(msg.contains("--max-steps"));
    }

    #[test]
    fn conflicting_scope_is_rejected_before_anything_else() {
        let mut opts = CheckOptions {
            rule: "x".to_string(),
            ..CheckOptions::default()
        };
        opts.site = Some("DM-Akron".to_string());
        opts.rack = Some("R01".to_string());
        let msg = config_message(CheckConfig::resolve(opts, &Settings::default()).unwrap_err());
        assert!(msg.contains("--site"));
    }

    #[test]
    fn mcp_dir_without_pyproject_is_rejected() {
        let empty = tempfile::tempdir().unwrap();
        let msg = config_message(
            CheckConfig::resolve(options(empty.path()), &Settings::default()).unwrap_err(),
        );
        assert!(msg.contains("pyproject.toml"), "{msg}");
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~"), home);
            assert_eq!(
                expand_tilde("~/src/netbox-mcp-server"),
                home.join("src/netbox-mcp-server")
            );
        }
        assert_eq!(expand_tilde("/opt/mcp"), PathBuf::from("/opt/mcp"));
        assert_eq!(expand_tilde("~other/mcp"), PathBuf::from("~other/mcp"));
    }

    #[test]
    fn settings_file_overrides_server_launch() {
        let dir = mcp_dir();
        let file = dir.path().join("config.toml");
        std::fs::write(
            &file,
            r#"
model = "ollama/llama3.1:8b"
server_command = "python"
server_args = ["-m", "netbox_mcp_server"]
allowed_tools = ["netbox_get_objects"]
"#,
        )
        .unwrap();

        let settings = Settings::load_optional(Some(&file)).unwrap();
        let config = CheckConfig::resolve(options(dir.path()), &settings).unwrap();
        assert_eq!(config.model_id, "ollama/llama3.1:8b");
        assert_eq!(config.server.command, "python");
        assert_eq!(config.server.args, vec!["-m", "netbox_mcp_server"]);
        assert_eq!(
            config.server.allowed_tools,
            Some(vec!["netbox_get_objects".to_string()])
        );
    }

    #[test]
    fn broken_settings_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "max_steps = \"many\"").unwrap();
        let msg = config_message(Settings::load(&file).unwrap_err());
        assert!(msg.contains("invalid settings file"));

        let missing = dir.path().join("absent.toml");
        assert!(Settings::load_optional(Some(&missing)).is_err());
    }
}
