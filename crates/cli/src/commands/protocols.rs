//! List registered protocol adapters

use anyhow::Result;
use serde::Serialize;

use rtbench_harness::{AdapterRegistry, HarnessConfig};

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Serialize)]
pub struct ProtocolDisplay {
    pub protocol: String,
    pub send_mode: String,
    pub endpoint: String,
    pub compose_file: String,
}

impl TableDisplay for ProtocolDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Protocol", "Send Mode", "Endpoint", "Compose File"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.protocol.clone(),
            self.send_mode.clone(),
            self.endpoint.clone(),
            self.compose_file.clone(),
        ]
    }
}

pub fn execute(harness: &HarnessConfig, format: OutputFormat) -> Result<()> {
    let registry = AdapterRegistry::from_config(harness)?;

    let rows: Vec<ProtocolDisplay> = registry
        .iter()
        .map(|adapter| {
            let settings = harness.protocols.get(adapter.protocol());
            ProtocolDisplay {
                protocol: adapter.protocol().to_string(),
                send_mode: adapter.send_mode().to_string(),
                endpoint: settings.map(|s| s.endpoint.clone()).unwrap_or_default(),
                compose_file: settings
                    .map(|s| s.compose_file.display().to_string())
                    .unwrap_or_default(),
            }
        })
        .collect();

    print_list(&rows, format);
    Ok(())
}
