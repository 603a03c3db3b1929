//! Network Scanner
//!
//! Classifies established connections against the closed AI-service table.

use std::collections::BTreeMap;

use serde_json::json;

use super::inspect::ConnectionSource;
use super::signatures::AiService;
use super::types::{derive_threat_id, evidence, ThreatRecord, ThreatVector};
use super::ScanError;

/// Run the network vector. A connection only becomes a threat when its
/// resolved hostname and port match a service in the table; unresolved
/// samples are ignored.
pub fn scan_network(source: &dyn ConnectionSource) -> Result<Vec<ThreatRecord>, ScanError> {
    let connections = source.connections().map_err(|e| ScanError(e.to_string()))?;

    let mut threats = Vec::new();
    for conn in connections {
        let host = match conn.remote_host.as_deref() {
            Some(host) => host,
            None => continue,
        };
        let service = match AiService::classify(host, conn.remote_port) {
            Some(service) => service,
            None => continue,
        };

        let pid = conn.pid.unwrap_or(0);
        let mut evidence_map = BTreeMap::new();
        evidence_map.insert(evidence::REMOTE_IP.to_string(), json!(conn.remote_ip));
        evidence_map.insert(evidence::REMOTE_PORT.to_string(), json!(conn.remote_port));
        if let Some(name) = &conn.process_name {
            evidence_map.insert(evidence::PROCESS_NAME.to_string(), json!(name));
        }
        evidence_map.insert(evidence::PROCESS_ID.to_string(), json!(pid));
        evidence_map.insert(evidence::SERVICE.to_string(), json!(service.as_str()));

        threats.push(ThreatRecord::new(
            derive_threat_id(&format!("{}{}", pid, conn.remote_ip)),
            ThreatVector::Network,
            format!("Connection to {} detected", service),
            service.severity(),
            evidence_map,
        ));
    }

    Ok(threats)
}

// ============================================================================
// UNIT TESTS
// ============================================================================
