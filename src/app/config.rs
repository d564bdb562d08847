//! File configuration and merging with command-line values.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use hlsgrab_core::{BufferMode, DEFAULT_CONCURRENCY, DEFAULT_SEGMENT_RETRIES, VariantPolicy};

use crate::cli::Args;

/// Defaults read from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FileConfig {
    pub concurrency: Option<u8>,
    pub max_retries: Option<u8>,
    pub policy: Option<VariantPolicy>,
    pub workspace_root: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub memory_buffers: Option<bool>,
}

impl FileConfig {
    /// Validates values against the same ranges the CLI enforces.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(1..=100).contains(&concurrency)
        {
            bail!("Invalid config value for `concurrency`: {concurrency}. Expected range: 1..=100");
        }
        if let Some(retries) = self.max_retries
            && retries > 10
        {
            bail!("Invalid config value for `max_retries`: {retries}. Expected range: 0..=10");
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Resolves the config file location.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/hlsgrab/config.toml`
/// 2. `$HOME/.config/hlsgrab/config.toml`
#[must_use]
pub(crate) fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("hlsgrab").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("hlsgrab")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file if one exists at the default location.
pub(crate) fn load_default_file_config() -> Result<Option<FileConfig>> {
    match resolve_default_config_path() {
        Some(path) if path.exists() => load_file_config(&path).map(Some),
        _ => Ok(None),
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "concurrency" => cfg.concurrency = Some(parse_integer_u8(value).with_context(context)?),
            "max_retries" => cfg.max_retries = Some(parse_integer_u8(value).with_context(context)?),
            "policy" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                let policy = parsed
                    .parse::<VariantPolicy>()
                    .map_err(anyhow::Error::msg)
                    .with_context(context)?;
                cfg.policy = Some(policy);
            }
            "workspace_root" => {
                cfg.workspace_root =
                    Some(PathBuf::from(parse_string_literal(value).with_context(context)?));
            }
            "user_agent" => cfg.user_agent = Some(parse_string_literal(value).with_context(context)?),
            "referer" => cfg.referer = Some(parse_string_literal(value).with_context(context)?),
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "memory_buffers" => cfg.memory_buffers = Some(parse_boolean(value).with_context(context)?),
            unknown => bail!("Unknown configuration key: '{unknown}' on line {line_no}"),
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u8(raw_value: &str) -> Result<u8> {
    let value = raw_value.trim().parse::<u16>()?;
    u8::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u8"))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let value = raw_value.trim().parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

/// Effective settings after merging the command line over the config file.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Settings {
    pub concurrency: usize,
    pub segment_retries: u32,
    pub policy: VariantPolicy,
    pub headers: BTreeMap<String, String>,
    pub include_renditions: bool,
    pub buffer_mode: BufferMode,
    pub workspace_root: Option<PathBuf>,
    pub deadline: Option<Duration>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
}

impl Settings {
    /// CLI values win over file values; both win over built-in defaults.
    pub fn resolve(args: &Args, file: Option<&FileConfig>) -> Self {
        let file = file.cloned().unwrap_or_default();

        let mut headers = BTreeMap::new();
        for (name, value) in &args.headers {
            set_header(&mut headers, name, value);
        }
        if let Some(user_agent) = args.user_agent.as_ref().or(file.user_agent.as_ref()) {
            set_header(&mut headers, "User-Agent", user_agent);
        }
        if let Some(referer) = args.referer.as_ref().or(file.referer.as_ref()) {
            set_header(&mut headers, "Referer", referer);
        }

        let memory_buffers = args.memory_buffers || file.memory_buffers.unwrap_or(false);

        Self {
            concurrency: args
                .concurrency
                .or(file.concurrency)
                .map_or(DEFAULT_CONCURRENCY, usize::from),
            segment_retries: args
                .max_retries
                .or(file.max_retries)
                .map_or(DEFAULT_SEGMENT_RETRIES, u32::from),
            policy: args.policy.or(file.policy).unwrap_or_default(),
            headers,
            include_renditions: args.renditions,
            buffer_mode: if memory_buffers {
                BufferMode::Memory
            } else {
                BufferMode::Disk
            },
            workspace_root: args.workspace_root.clone().or(file.workspace_root),
            deadline: args.deadline_secs.map(Duration::from_secs),
            connect_timeout_secs: args.connect_timeout_secs.or(file.connect_timeout_secs),
            read_timeout_secs: args.read_timeout_secs.or(file.read_timeout_secs),
        }
    }
}

/// Inserts a header, replacing any existing entry with the same name in
/// another letter case.
fn set_header(headers: &mut BTreeMap<String, String>, name: &str, value: &str) {
    headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
    headers.insert(name.to_string(), value.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["hlsgrab"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_config_all_fields() {
        let cfg = parse_config_str(
            r#"
concurrency = 8
max_retries = 2 # per segment
policy = "bandwidth:800000"
workspace_root = "/var/tmp/hls"
user_agent = "Mozilla/5.0 # not a comment"
referer = "https://player.example/"
connect_timeout_secs = 10
read_timeout_secs = 60
memory_buffers = true
"#,
        )
        .unwrap();

        assert_eq!(cfg.concurrency, Some(8));
        assert_eq!(cfg.max_retries, Some(2));
        assert_eq!(cfg.policy, Some(VariantPolicy::ClosestBandwidth(800_000)));
        assert_eq!(cfg.workspace_root, Some(PathBuf::from("/var/tmp/hls")));
        assert_eq!(cfg.user_agent.as_deref(), Some("Mozilla/5.0 # not a comment"));
        assert_eq!(cfg.referer.as_deref(), Some("https://player.example/"));
        assert_eq!(cfg.connect_timeout_secs, Some(10));
        assert_eq!(cfg.read_timeout_secs, Some(60));
        assert_eq!(cfg.memory_buffers, Some(true));
    }

    #[test]
    fn test_parse_config_rejects_out_of_range_values() {
        let err = parse_config_str("concurrency = 0").unwrap_err();
        assert!(err.to_string().contains("concurrency"));

        let err = parse_config_str("max_retries = 11").unwrap_err();
        assert!(err.to_string().contains("max_retries"));

        let err = parse_config_str("read_timeout_secs = 0").unwrap_err();
        assert!(err.to_string().contains("read_timeout_secs"));
    }

    #[test]
    fn test_parse_config_rejects_bad_policy() {
        let err = parse_config_str(r#"policy = "sharpest""#).unwrap_err();
        assert!(format!("{err:#}").contains("policy"), "got {err:#}");
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys_and_syntax() {
        let err = parse_config_str("rate_limit = 5").unwrap_err();
        assert!(err.to_string().contains("Unknown configuration key"));

        let err = parse_config_str("concurrency 5").unwrap_err();
        assert!(err.to_string().contains("expected key = value"));

        let err = parse_config_str("user_agent = bare").unwrap_err();
        assert!(err.to_string().contains("user_agent"));
    }

    #[test]
    fn test_settings_defaults_without_config() {
        let settings = Settings::resolve(&args(&[]), None);
        assert_eq!(settings.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(settings.segment_retries, DEFAULT_SEGMENT_RETRIES);
        assert_eq!(settings.policy, VariantPolicy::HighestBandwidth);
        assert_eq!(settings.buffer_mode, BufferMode::Disk);
        assert!(settings.headers.is_empty());
        assert!(settings.deadline.is_none());
    }

    #[test]
    fn test_settings_cli_wins_over_file() {
        let file = FileConfig {
            concurrency: Some(3),
            max_retries: Some(4),
            policy: Some(VariantPolicy::LowestBandwidth),
            user_agent: Some("from-file".to_string()),
            memory_buffers: Some(true),
            ..FileConfig::default()
        };
        let settings = Settings::resolve(
            &args(&["-c", "12", "--user-agent", "from-cli", "--deadline-secs", "30"]),
            Some(&file),
        );

        assert_eq!(settings.concurrency, 12);
        assert_eq!(settings.segment_retries, 4);
        assert_eq!(settings.policy, VariantPolicy::LowestBandwidth);
        assert_eq!(settings.headers.get("User-Agent").map(String::as_str), Some("from-cli"));
        assert_eq!(settings.buffer_mode, BufferMode::Memory);
        assert_eq!(settings.deadline, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_settings_user_agent_flag_replaces_header_in_any_case() {
        let settings = Settings::resolve(
            &args(&["-H", "user-agent: from-header", "--user-agent", "from-flag"]),
            None,
        );
        assert_eq!(settings.headers.len(), 1);
        assert_eq!(settings.headers.get("User-Agent").map(String::as_str), Some("from-flag"));
    }
}
