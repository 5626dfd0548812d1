use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::DlctlError;

/// How a job receives its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamsMode {
    /// The program reads its own configuration; only the program is passed.
    #[serde(alias = "json")]
    Structured,
    /// The raw parameter string, split on spaces, follows the program.
    #[serde(alias = "cli")]
    Positional,
    /// Source/target database, table and location are passed explicitly.
    #[default]
    None,
}

impl ParamsMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamsMode::Structured => "structured",
            ParamsMode::Positional => "positional",
            ParamsMode::None => "none",
        }
    }
}

impl FromStr for ParamsMode {
    type Err = DlctlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "structured" | "json" => Ok(ParamsMode::Structured),
            "positional" | "cli" => Ok(ParamsMode::Positional),
            "none" | "" => Ok(ParamsMode::None),
            other => Err(DlctlError::InvalidParamsMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for ParamsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job configuration for everything staged under one staging directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCatalogEntry {
    pub staging_dir: String,
    /// Program location, e.g. `s3://programs/jobs/orders.py`
    pub program: String,
    #[serde(default)]
    pub params_mode: ParamsMode,
    pub params: Option<String>,
    pub source_database: String,
    pub source_table: String,
    pub target_database: String,
    pub target_table: String,
    pub target_location: String,
    pub partition_key: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl JobCatalogEntry {
    /// File name of the program, the part after the last `/`.
    pub fn program_name(&self) -> &str {
        self.program
            .rsplit_once('/')
            .map_or(self.program.as_str(), |(_, name)| name)
    }
}
