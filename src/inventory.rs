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

//! Resource hierarchy of the Dashboard API: organizations, networks,
//! devices, switch ports and clients.

use crate::client::{ApiClient, ApiError, ResponseData};
use crate::paginate::{FetchError, Paginator};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceFamily {
    /// MS switches
    Switch,
    /// MR access points
    Wireless,
}

impl DeviceFamily {
    pub fn model_prefix(self) -> &'static str {
        match self {
            DeviceFamily::Switch => "MS",
            DeviceFamily::Wireless => "MR",
        }
    }

    pub fn matches(self, device: &Value) -> bool {
        device
            .get("model")
            .and_then(Value::as_str)
            .map(|model| model.starts_with(self.model_prefix()))
            .unwrap_or(false)
    }

    pub fn filter(self, devices: Vec<Value>) -> Vec<Value> {
        devices.into_iter().filter(|d| self.matches(d)).collect()
    }
}

pub fn organizations(pages: &Paginator) -> Result<Vec<Value>, FetchError> {
    pages.fetch_all("organizations", &[])
}

pub fn networks(pages: &Paginator, org_id: &str) -> Result<Vec<Value>, FetchError> {
    pages.fetch_all(&format!("organizations/{org_id}/networks"), &[])
}

pub fn organization_devices(pages: &Paginator, org_id: &str) -> Result<Vec<Value>, FetchError> {
    pages.fetch_all(&format!("organizations/{org_id}/devices"), &[])
}

pub fn network_devices(pages: &Paginator, network_id: &str) -> Result<Vec<Value>, FetchError> {
    pages.fetch_all(&format!("networks/{network_id}/devices"), &[])
}

pub fn network_clients(
    pages: &Paginator,
    network_id: &str,
    timespan: Option<u64>,
) -> Result<Vec<Value>, FetchError> {
    pages.fetch_all(
        &format!("networks/{network_id}/clients"),
        &timespan_query(timespan),
    )
}

pub fn device_clients(
    pages: &Paginator,
    serial: &str,
    timespan: Option<u64>,
) -> Result<Vec<Value>, FetchError> {
    pages.fetch_all(&format!("devices/{serial}/clients"), &timespan_query(timespan))
}

/// Port configuration of one switch. Not paginated; the response is kept
/// whole so the body can be echoed untouched.
pub fn switch_ports(client: &ApiClient, serial: &str) -> Result<ResponseData, ApiError> {
    client.get(&format!("devices/{serial}/switch/ports"), &[])
}

#[derive(Debug)]
pub struct ApClientCount {
    pub name: String,
    pub serial: String,
    pub clients: Result<usize, FetchError>,
}

/// Count connected clients per access point. A failure on one AP is kept
/// with that AP and does not stop the others.
pub fn count_clients_per_ap(
    pages: &Paginator,
    aps: &[Value],
    timespan: Option<u64>,
) -> Vec<ApClientCount> {
    aps.iter()
        .filter_map(|ap| {
            let serial = ap.get("serial").and_then(Value::as_str)?;
            let name = display_name(ap, "serial");
            let clients = device_clients(pages, serial, timespan).map(|c| c.len());
            if let Err(err) = &clients {
                log::warn!("counting clients for {name}: {err}");
            }
            Some(ApClientCount {
                name,
                serial: serial.to_string(),
                clients,
            })
        })
        .collect()
}

/// `name` if present and non-empty, otherwise the value of `id_field`.
pub fn display_name(item: &Value, id_field: &str) -> String {
    item.get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| item.get(id_field).and_then(Value::as_str))
        .unwrap_or("")
        .to_string()
}

fn timespan_query(timespan: Option<u64>) -> Vec<(&'static str, String)> {
    timespan
        .map(|t| vec![("timespan", t.to_string())])
        .unwrap_or_default()
}
