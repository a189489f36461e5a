use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub job: JobConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub launcher: LauncherConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub lookup: LookupConfig,
}

/// Job execution platform connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlatformConfig {
    /// API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.dnanexus.com".to_string()
}

fn default_timeout() -> u32 {
    30
}

/// Record store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("referrals.db")
}

/// Workbook job definition.
///
/// `inputs` holds the static parameters (reference files, app config) passed
/// unchanged to every job; values are whatever the executable accepts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobConfig {
    /// Executable identifier to run (e.g. "app-xxxx").
    pub executable_id: String,
    /// Executable name, used to recognise its executions in searches.
    #[serde(default = "default_executable_name")]
    pub executable_name: String,
    /// Project that holds the input documents (qualifies document links).
    #[serde(default)]
    pub input_project: Option<String>,
    /// Project the jobs run in.
    pub output_project: String,
    /// Job name prefix; the referral id is appended.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Executable input that receives the document.
    #[serde(default = "default_input_field")]
    pub input_field: String,
    /// Executable output that carries the artifact.
    #[serde(default = "default_output_field")]
    pub output_field: String,
    /// Static input parameters.
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
}

fn default_executable_name() -> String {
    "eggd_generate_rd_wgs_workbook".to_string()
}

fn default_name_prefix() -> String {
    "eggd_generate_rd_variant_workbook".to_string()
}

fn default_input_field() -> String {
    "json".to_string()
}

fn default_output_field() -> String {
    "xlsx_report".to_string()
}

/// Input document check
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifierConfig {
    /// Dotted path of the embedded identifier inside the document.
    #[serde(default = "default_identifier_path")]
    pub identifier_path: String,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            identifier_path: default_identifier_path(),
        }
    }
}

fn default_identifier_path() -> String {
    "family_id".to_string()
}

/// What the launcher does with records already in `JobStarted`.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelaunchPolicy {
    /// Describe the live job first; re-submit only if it failed or is gone.
    #[default]
    CheckLive,
    /// Re-submit unconditionally.
    Always,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LauncherConfig {
    #[serde(default)]
    pub relaunch: RelaunchPolicy,
}

/// Batch run settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Pause between launching and monitoring, in seconds.
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
    /// Records per stage when running in test mode.
    #[serde(default = "default_test_batch_size")]
    pub test_batch_size: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            wait_secs: default_wait_secs(),
            test_batch_size: default_test_batch_size(),
        }
    }
}

fn default_wait_secs() -> u64 {
    900 // 15 minutes; a workbook job takes about 3
}

fn default_test_batch_size() -> usize {
    5
}

/// Artifact download settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("workbooks")
}

/// Execution search settings for lookups by input document
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LookupConfig {
    /// How far back to search, in hours.
    #[serde(default = "default_created_after_hours")]
    pub created_after_hours: u32,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            created_after_hours: default_created_after_hours(),
        }
    }
}

fn default_created_after_hours() -> u32 {
    12
}
