// merakictl - CLI for the Meraki Dashboard API
// Copyright (C) 2024 Mathias Uhl <mathiasuhl@gmx.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Bulk switch cloning.
//!
//! One source switch is resolved once, then its port configuration and
//! switch settings are cloned onto each target in order. Targets are
//! processed strictly one after another; a failed target is recorded and
//! the batch moves on.

use crate::client::{ApiClient, ApiError};
use crate::inventory;
use crate::paginate::{FetchError, Paginator};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloneError {
    #[error("looking up source switch: {0}")]
    Fetch(#[from] FetchError),
    #[error("source switch with serial {0} not found in organization {1}")]
    SourceNotFound(String, String),
}

/// The switch whose configuration is copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDevice {
    pub serial: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClonePayload<'a> {
    name: Option<&'a str>,
    clone_from_serial: &'a str,
    copy_port_configs: bool,
    copy_switch_settings: bool,
}

#[derive(Debug)]
pub enum Outcome {
    Succeeded,
    Failed(ApiError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

#[derive(Debug)]
pub struct TargetOutcome {
    pub serial: String,
    pub outcome: Outcome,
}

/// Emitted once per target, after its clone request completes.
#[derive(Debug)]
pub struct Progress<'a> {
    /// 1-based position in the target list
    pub index: usize,
    pub total: usize,
    pub target: &'a str,
    pub outcome: &'a Outcome,
}

#[derive(Debug)]
pub struct CloneReport {
    pub source: SourceDevice,
    pub outcomes: Vec<TargetOutcome>,
}

impl CloneReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn summary(&self) -> String {
        format!("{} succeeded, {} failed", self.succeeded(), self.failed())
    }
}

pub fn source_from_record(record: &Value) -> Option<SourceDevice> {
    SourceDevice::deserialize(record).ok()
}

/// Look up `serial` among the organization's switches.
pub fn resolve_source(
    pages: &Paginator,
    org_id: &str,
    serial: &str,
) -> Result<SourceDevice, CloneError> {
    let devices = inventory::organization_devices(pages, org_id)?;
    inventory::DeviceFamily::Switch
        .filter(devices)
        .into_iter()
        .find(|d| d.get("serial").and_then(|s| s.as_str()) == Some(serial))
        .and_then(|d| source_from_record(&d))
        .ok_or_else(|| CloneError::SourceNotFound(serial.to_string(), org_id.to_string()))
}

/// Clone `source` onto every target, in order.
///
/// Callers are expected to pass deduplicated targets that exclude the
/// source serial.
pub fn apply_clone<F>(
    client: &ApiClient,
    source: &SourceDevice,
    targets: &[String],
    mut on_progress: F,
) -> Vec<TargetOutcome>
where
    F: FnMut(&Progress<'_>),
{
    let payload = ClonePayload {
        name: source.name.as_deref(),
        clone_from_serial: &source.serial,
        copy_port_configs: true,
        copy_switch_settings: true,
    };
    let total = targets.len();
    let mut outcomes = Vec::with_capacity(total);

    for (idx, target) in targets.iter().enumerate() {
        let outcome = match client.post_json(&format!("devices/{target}/clone"), &payload) {
            Ok(resp) => {
                info!("cloned {} onto {} (HTTP {})", source.serial, target, resp.status);
                Outcome::Succeeded
            }
            Err(err) => {
                warn!("cloning {} onto {} failed: {}", source.serial, target, err);
                Outcome::Failed(err)
            }
        };
        on_progress(&Progress {
            index: idx + 1,
            total,
            target,
            outcome: &outcome,
        });
        outcomes.push(TargetOutcome {
            serial: target.clone(),
            outcome,
        });
    }

    outcomes
}

/// Resolve the source once, then clone it onto `targets`.
pub fn run_clone<F>(
    pages: &Paginator,
    org_id: &str,
    source_serial: &str,
    targets: &[String],
    on_progress: F,
) -> Result<CloneReport, CloneError>
where
    F: FnMut(&Progress<'_>),
{
    let source = resolve_source(pages, org_id, source_serial)?;
    let outcomes = apply_clone(pages.client(), &source, targets, on_progress);
    Ok(CloneReport { source, outcomes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn source() -> SourceDevice {
        SourceDevice {
            serial: "Q2HP-XXXX".into(),
            name: Some("Core-1".into()),
            model: Some("MS225-48".into()),
        }
    }

    fn targets(serials: &[&str]) -> Vec<String> {
        serials.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn posts_clone_payload_naming_the_source() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/devices/AAAA/clone")
                .header("X-Cisco-Meraki-API-Key", "k")
                .json_body(json!({
                    "name": "Core-1",
                    "cloneFromSerial": "Q2HP-XXXX",
                    "copyPortConfigs": true,
                    "copySwitchSettings": true
                }));
            then.status(200).json_body(json!({}));
        });

        let client = ApiClient::new(&server.base_url(), "k").unwrap();
        let outcomes = apply_clone(&client, &source(), &targets(&["AAAA"]), |_| {});

        mock.assert();
        assert!(outcomes[0].outcome.is_success());
    }

    #[test]
    fn failed_target_does_not_stop_the_batch() {
        let server = MockServer::start();
        let a = server.mock(|when, then| {
            when.method(POST).path("/devices/A/clone");
            then.status(200).json_body(json!({}));
        });
        let b = server.mock(|when, then| {
            when.method(POST).path("/devices/B/clone");
            then.status(500).body("oops");
        });
        let c = server.mock(|when, then| {
            when.method(POST).path("/devices/C/clone");
            then.status(201).json_body(json!({}));
        });

        let client = ApiClient::new(&server.base_url(), "k").unwrap();
        let outcomes = apply_clone(&client, &source(), &targets(&["A", "B", "C"]), |_| {});

        a.assert_hits(1);
        b.assert_hits(1);
        c.assert_hits(1);
        let summary: Vec<(&str, bool)> = outcomes
            .iter()
            .map(|o| (o.serial.as_str(), o.outcome.is_success()))
            .collect();
        assert_eq!(summary, vec![("A", true), ("B", false), ("C", true)]);
    }

    #[test]
    fn emits_one_progress_event_per_target_in_order() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).json_body(json!({}));
        });

        let client = ApiClient::new(&server.base_url(), "k").unwrap();
        let mut events = Vec::new();
        apply_clone(&client, &source(), &targets(&["S1", "S2", "S3", "S4"]), |p| {
            events.push((p.index, p.total, p.target.to_string()))
        });

        assert_eq!(
            events,
            vec![
                (1, 4, "S1".to_string()),
                (2, 4, "S2".to_string()),
                (3, 4, "S3".to_string()),
                (4, 4, "S4".to_string()),
            ]
        );
    }

    #[test]
    fn resolves_source_once_and_reports_mixed_results() {
        let server = MockServer::start();
        let lookup = server.mock(|when, then| {
            when.method(GET).path("/organizations/O1/devices");
            then.status(200).json_body(json!([
                {"serial": "Q2HP-XXXX", "name": "Core-1", "model": "MS225-48"},
                {"serial": "AAAA", "name": "Edge-1", "model": "MS120-8"},
                {"serial": "BBBB", "name": "Edge-2", "model": "MS120-8"},
                {"serial": "Q2MR-0000", "name": "AP", "model": "MR36"}
            ]));
        });
        let accepted = server.mock(|when, then| {
            when.method(POST).path("/devices/AAAA/clone");
            then.status(200).json_body(json!({}));
        });
        let rejected = server.mock(|when, then| {
            when.method(POST).path("/devices/BBBB/clone");
            then.status(400).body(r#"{"errors":["invalid"]}"#);
        });

        let client = ApiClient::new(&server.base_url(), "k").unwrap();
        let pages = Paginator::new(&client);
        let mut progress = 0;
        let report = run_clone(&pages, "O1", "Q2HP-XXXX", &targets(&["AAAA", "BBBB"]), |_| {
            progress += 1
        })
        .unwrap();

        lookup.assert_hits(1);
        accepted.assert_hits(1);
        rejected.assert_hits(1);
        assert_eq!(progress, 2);
        assert_eq!(report.source.name.as_deref(), Some("Core-1"));
        assert!(report.outcomes[0].outcome.is_success());
        match &report.outcomes[1].outcome {
            Outcome::Failed(err) => {
                assert_eq!(err.status(), Some(400));
                assert!(err.to_string().contains("invalid"));
            }
            Outcome::Succeeded => panic!("BBBB should have failed"),
        }
        assert_eq!(report.summary(), "1 succeeded, 1 failed");
    }

    #[test]
    fn unknown_or_non_switch_source_is_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/organizations/O1/devices");
            then.status(200)
                .json_body(json!([{"serial": "Q2MR-0000", "model": "MR36"}]));
        });
        let clone = server.mock(|when, then| {
            when.method(POST);
            then.status(200);
        });

        let client = ApiClient::new(&server.base_url(), "k").unwrap();
        let pages = Paginator::new(&client);
        let err = run_clone(&pages, "O1", "Q2MR-0000", &targets(&["AAAA"]), |_| {}).unwrap_err();

        clone.assert_hits(0);
        assert!(matches!(err, CloneError::SourceNotFound(..)));
    }
}
