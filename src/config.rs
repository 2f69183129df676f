use crate::{
    report, ANALYSIS_FILE, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_IMPORT_PATTERN, DEFAULT_NODES,
    DEFAULT_OUTPUT_DIR, DEFAULT_QUERY_LIMIT, DEFAULT_SEAL_PATTERN, REPORT_FILE, SECRETS_TOOL,
};
use chrono::{DateTime, Utc};
use clap::Args;
use glob::glob;
use regex::Regex;
use serde_derive::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    ffi::OsStr,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

#[derive(Args, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct RunArgs {
    /// Path to encrypted credentials file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Log backend base URL (overrides the config file)
    #[arg(short, long)]
    pub url: Option<String>,
    /// Custom header "Key: Value" (repeatable)
    #[arg(long)]
    pub header: Vec<String>,
    /// Start of the time window (RFC 3339)
    #[arg(long)]
    pub from_time: Option<DateTime<Utc>>,
    /// End of the time window (RFC 3339)
    #[arg(long)]
    pub to_time: Option<DateTime<Utc>>,
    /// Specific node name (repeatable)
    #[arg(short, long)]
    pub node: Vec<String>,
    /// File containing the list of nodes, one per line
    #[arg(long)]
    pub nodes_file: Option<PathBuf>,
    /// Base output directory for run directories
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,
    /// Skip the download and analyze logs already in --log-dir
    #[arg(long, default_value_t = false)]
    pub skip_download: bool,
    /// Path to an existing log directory (required with --skip-download)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    /// Regex matching the seal marker; must capture "height" and "ts"
    #[arg(long, default_value = DEFAULT_SEAL_PATTERN)]
    pub seal_pattern: String,
    /// Regex matching the import marker; must capture "height" and "ts"
    #[arg(long, default_value = DEFAULT_IMPORT_PATTERN)]
    pub import_pattern: String,
    /// Max number of log lines requested per node
    #[arg(long, default_value_t = DEFAULT_QUERY_LIMIT)]
    pub limit: u32,
    /// Per-request HTTP timeout in seconds
    #[arg(long, default_value_t = DEFAULT_HTTP_TIMEOUT_SECS)]
    pub timeout: u64,
}

#[derive(Args, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct AnalyzeArgs {
    /// Path to an existing log directory
    #[arg(short, long)]
    pub log_dir: PathBuf,
    /// Regex matching the seal marker; must capture "height" and "ts"
    #[arg(long, default_value = DEFAULT_SEAL_PATTERN)]
    pub seal_pattern: String,
    /// Regex matching the import marker; must capture "height" and "ts"
    #[arg(long, default_value = DEFAULT_IMPORT_PATTERN)]
    pub import_pattern: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no usable endpoint: supply --url or a credentials file with a url field")]
    MissingEndpoint,
    #[error("time window is required: supply --from-time and --to-time")]
    MissingWindow,
    #[error("time window is empty: {from} is not before {to}")]
    EmptyWindow { from: DateTime<Utc>, to: DateTime<Utc> },
    #[error("node list is empty")]
    EmptyNodeList,
    #[error("malformed header {0:?}: expected \"Key: Value\"")]
    MalformedHeader(String),
    #[error("invalid marker pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("--log-dir is required with --skip-download")]
    MissingLogDir,
    #[error("log directory {0:?} is not readable")]
    UnreadableLogDir(PathBuf),
    #[error("unable to read {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{tool} failed to decrypt {path:?}: {stderr}")]
    Decrypt {
        tool: &'static str,
        path: PathBuf,
        stderr: String,
    },
    #[error("credentials are not valid JSON: {0}")]
    InvalidCredentials(#[from] serde_json::Error),
}

/// Contents of the credentials file, after decryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct MarkerPatterns {
    pub seal: Regex,
    pub import: Regex,
}

impl MarkerPatterns {
    pub fn new(seal: &str, import: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            seal: compile_marker(seal)?,
            import: compile_marker(import)?,
        })
    }
}

fn compile_marker(pattern: &str) -> Result<Regex, ConfigError> {
    let regex = Regex::new(pattern).map_err(|err| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    })?;
    for required in ["height", "ts"] {
        if !regex.capture_names().flatten().any(|name| name == required) {
            return Err(ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: format!("missing named capture group {required:?}"),
            });
        }
    }
    Ok(regex)
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub endpoint: Option<Endpoint>,
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub nodes: Vec<String>,
    pub output_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub skip_download: bool,
    pub patterns: MarkerPatterns,
    pub limit: u32,
    pub timeout: Duration,
}

/// Validate the command line into an immutable [`RunConfig`].
///
/// Everything fatal happens here, before any log is fetched or parsed.
pub async fn resolve_run_args(args: RunArgs) -> Result<RunConfig, ConfigError> {
    let patterns = MarkerPatterns::new(&args.seal_pattern, &args.import_pattern)?;
    let timeout = Duration::from_secs(args.timeout);

    if args.skip_download {
        let log_dir = args.log_dir.ok_or(ConfigError::MissingLogDir)?;
        let nodes = nodes_for_analysis(&log_dir).await?;
        return Ok(RunConfig {
            endpoint: None,
            window: None,
            nodes,
            output_dir: args.output_dir,
            log_dir: Some(log_dir),
            skip_download: true,
            patterns,
            limit: args.limit,
            timeout,
        });
    }

    let (from, to) = match (args.from_time, args.to_time) {
        (Some(from), Some(to)) => (from, to),
        _ => return Err(ConfigError::MissingWindow),
    };
    if from >= to {
        return Err(ConfigError::EmptyWindow { from, to });
    }

    let mut url = None;
    let mut headers = Vec::new();
    if let Some(path) = &args.config {
        let credentials = decrypt_credentials(path).await?;
        url = Some(credentials.url);
        headers.extend(credentials.headers);
    }
    if let Some(flag_url) = args.url {
        url = Some(flag_url);
    }
    for raw in &args.header {
        headers.push(parse_header(raw)?);
    }
    let url = url.ok_or(ConfigError::MissingEndpoint)?;

    let nodes = if !args.node.is_empty() {
        args.node
    } else if let Some(path) = &args.nodes_file {
        nodes_from_file(path)?
    } else {
        DEFAULT_NODES.iter().map(|node| node.to_string()).collect()
    };
    if nodes.is_empty() {
        return Err(ConfigError::EmptyNodeList);
    }

    Ok(RunConfig {
        endpoint: Some(Endpoint { url, headers }),
        window: Some((from, to)),
        nodes,
        output_dir: args.output_dir,
        log_dir: args.log_dir,
        skip_download: false,
        patterns,
        limit: args.limit,
        timeout,
    })
}

/// Run the credentials file through the external secrets tool and parse
/// the decrypted JSON.
pub async fn decrypt_credentials(path: &Path) -> Result<Credentials, ConfigError> {
    let output = tokio::process::Command::new(SECRETS_TOOL)
        .arg("-d")
        .arg(path)
        .output()
        .await
        .map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
    if !output.status.success() {
        return Err(ConfigError::Decrypt {
            tool: SECRETS_TOOL,
            path: path.to_path_buf(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(serde_json::from_slice(&output.stdout)?)
}

pub fn parse_header(raw: &str) -> Result<(String, String), ConfigError> {
    match raw.split_once(':') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(ConfigError::MalformedHeader(raw.to_string())),
    }
}

pub fn nodes_from_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Infer node names from the `*.txt` files of an existing log directory,
/// skipping the report artifacts a prior run may have left there.
pub fn nodes_from_log_dir(dir: &Path) -> Result<Vec<String>, ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::UnreadableLogDir(dir.to_path_buf()));
    }
    let pattern = format!("{}/*.txt", dir.display());
    let mut nodes: Vec<String> = glob(&pattern)
        .expect("glob pattern is valid")
        .filter_map(Result::ok)
        .filter(|path| {
            path.file_name()
                .and_then(OsStr::to_str)
                .map(|name| name != REPORT_FILE && name != ANALYSIS_FILE)
                .unwrap_or(false)
        })
        .filter_map(|path| {
            path.file_stem()
                .and_then(OsStr::to_str)
                .map(str::to_string)
        })
        .collect();
    nodes.sort();
    Ok(nodes)
}

/// Node list for analyzing an existing directory.
///
/// Priority: `log_run_details.json` > `*.txt` filenames. The directory always
/// wins over `--node` flags so a re-analysis covers exactly what was
/// downloaded.
pub async fn nodes_for_analysis(dir: &Path) -> Result<Vec<String>, ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::UnreadableLogDir(dir.to_path_buf()));
    }
    if let Some(details) = report::read_run_details(dir).await {
        if !details.nodes.is_empty() {
            return Ok(details.nodes);
        }
    }
    let nodes = nodes_from_log_dir(dir)?;
    if nodes.is_empty() {
        return Err(ConfigError::EmptyNodeList);
    }
    Ok(nodes)
}
