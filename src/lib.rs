pub mod config;
pub mod extract;
pub mod fetch;
pub mod propagation;
pub mod report;

pub const ANALYSIS_FILE: &str = "analysis.txt";
pub const REPORT_FILE: &str = "block_propagation_report.txt";
pub const RUN_DETAILS_FILE: &str = "log_run_details.json";
pub const RUN_DIR_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";
pub const DEFAULT_OUTPUT_DIR: &str = "logs";
pub const DEFAULT_QUERY_LIMIT: u32 = 5000;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const SECRETS_TOOL: &str = "sops";
pub const LOKI_QUERY_PATH: &str = "loki/api/v1/query_range";
pub const NODE_LABEL: &str = "host";
pub const DEFAULT_SEAL_PATTERN: &str =
    r"Pre-sealed block for proposal #(?P<height>\d+) at (?P<ts>\S+)";
pub const DEFAULT_IMPORT_PATTERN: &str = r"Imported #(?P<height>\d+) at (?P<ts>\S+)";

/// Node names queried when neither `--node` nor `--nodes-file` is given.
pub const DEFAULT_NODES: [&str; 20] = [
    "validator-01",
    "validator-02",
    "validator-03",
    "validator-04",
    "validator-05",
    "validator-06",
    "validator-07",
    "validator-08",
    "validator-09",
    "validator-10",
    "validator-11",
    "validator-12",
    "validator-13",
    "validator-14",
    "validator-15",
    "validator-16",
    "validator-17",
    "validator-18",
    "validator-19",
    "validator-20",
];
