use std::{path::PathBuf, sync::Arc};

use ethreport_common::env_or;

pub const REPORT_PORT: u16 = 9997;
pub const REPORT_PATH: &str = "./dataX.json";
pub const COLLECTOR_SCRIPT: &str = "./Get-IntelEthernet.ps1";
pub const COLLECTOR_LABEL: &str = "Powershell Data: ";

#[derive(Clone)]
pub struct AppState {
    pub report_path: Arc<PathBuf>,
}

impl AppState {
    pub fn new(report_path: impl Into<PathBuf>) -> Self {
        Self {
            report_path: Arc::new(report_path.into()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CollectorConfig {
    pub shell: String,
    pub script: PathBuf,
    pub label: String,
}

impl CollectorConfig {
    pub fn from_env() -> Self {
        // Only the interpreter is swappable; the script and label stay fixed.
        Self {
            shell: env_or("COLLECTOR_SHELL", "powershell.exe".to_string()),
            script: PathBuf::from(COLLECTOR_SCRIPT),
            label: COLLECTOR_LABEL.to_string(),
        }
    }
}
