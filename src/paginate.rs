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

//! Cursor-following collection fetches.
//!
//! Dashboard collection endpoints page their results and advertise the next
//! page through a `Link` header. The server decides page boundaries; the
//! client only follows `rel="next"` until it disappears.

use crate::client::{ApiClient, ApiError};
use log::debug;
use reqwest::Url;
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

pub const DEFAULT_MAX_PAGES: usize = 1000;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("expected a JSON array from {url}")]
    NotAnArray { url: String },
    #[error("pagination loop: next link {url} was already fetched (after {pages} pages)")]
    Loop { url: String, pages: usize },
    #[error("pagination stopped after {limit} pages; next link was {url}")]
    TooManyPages { limit: usize, url: String },
}

/// Fetches whole collections through an [`ApiClient`].
#[derive(Debug, Clone, Copy)]
pub struct Paginator<'a> {
    client: &'a ApiClient,
    max_pages: usize,
}

impl<'a> Paginator<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self {
            client,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn client(&self) -> &'a ApiClient {
        self.client
    }

    /// Fetch every page of the collection at `path`, in page order.
    ///
    /// All-or-nothing: the first failed page fails the whole call and the
    /// records gathered so far are dropped.
    pub fn fetch_all(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<Value>, FetchError> {
        let mut records = Vec::new();
        let mut visited: HashSet<Url> = HashSet::new();

        let mut response = self.client.get(path, query)?;
        loop {
            visited.insert(response.url.clone());
            let page = match response.json {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(FetchError::NotAnArray {
                        url: response.url.to_string(),
                    });
                }
            };
            debug!(
                "page {} of {}: {} records",
                visited.len(),
                response.url.path(),
                page.len()
            );
            records.extend(page);

            let Some(next) = response
                .link
                .as_deref()
                .and_then(|header| next_link(header, &response.url))
            else {
                break;
            };

            if visited.contains(&next) {
                return Err(FetchError::Loop {
                    url: next.to_string(),
                    pages: visited.len(),
                });
            }
            if visited.len() >= self.max_pages {
                return Err(FetchError::TooManyPages {
                    limit: self.max_pages,
                    url: next.to_string(),
                });
            }

            response = self.client.get_url(next)?;
        }

        Ok(records)
    }
}

/// Find the `rel="next"` target in a `Link` header.
///
/// Entries look like `<url>; rel="next"`; relation values may be quoted or
/// bare and may list several space-separated relations. Relative targets are
/// resolved against `current`.
pub fn next_link(header: &str, current: &Url) -> Option<Url> {
    split_entries(header).into_iter().find_map(|entry| {
        let (target, params) = parse_entry(entry)?;
        let is_next = params.iter().any(|(name, value)| {
            name.eq_ignore_ascii_case("rel")
                && value
                    .split_ascii_whitespace()
                    .any(|rel| rel.eq_ignore_ascii_case("next"))
        });
        if is_next {
            current.join(target).ok()
        } else {
            None
        }
    })
}

// Commas may appear inside the <...> target, so split only outside brackets.
fn split_entries(header: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, ch) in header.char_indices() {
        match ch {
            '<' if !in_quotes => depth += 1,
            '>' if !in_quotes => depth = depth.saturating_sub(1),
            '"' => in_quotes = !in_quotes,
            ',' if depth == 0 && !in_quotes => {
                entries.push(&header[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    entries.push(&header[start..]);
    entries
}

fn parse_entry(entry: &str) -> Option<(&str, Vec<(&str, &str)>)> {
    let entry = entry.trim();
    let rest = entry.strip_prefix('<')?;
    let close = rest.find('>')?;
    let target = rest[..close].trim();
    let params = rest[close + 1..]
        .split(';')
        .filter_map(|param| {
            let (name, value) = param.split_once('=')?;
            Some((name.trim(), value.trim().trim_matches('"')))
        })
        .collect();
    Some((target, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn link_to(server: &MockServer, path: &str, rel: &str) -> String {
        format!("<{}>; rel=\"{}\"", server.url(path), rel)
    }

    #[test]
    fn picks_next_regardless_of_position() {
        let current = Url::parse("https://api.meraki.com/api/v1/networks/N/clients").unwrap();
        let header = concat!(
            "<https://api.meraki.com/api/v1/networks/N/clients?startingAfter=a>; rel=first, ",
            "<https://api.meraki.com/api/v1/networks/N/clients?startingAfter=k,2>; rel=\"next\", ",
            "<https://api.meraki.com/api/v1/networks/N/clients?endingBefore=z>; rel=last"
        );
        let next = next_link(header, &current).unwrap();
        assert_eq!(next.query(), Some("startingAfter=k,2"));
    }

    #[test]
    fn no_next_relation_means_last_page() {
        let current = Url::parse("https://api.meraki.com/api/v1/organizations").unwrap();
        let header = "<https://api.meraki.com/api/v1/organizations>; rel=first, \
                      <https://api.meraki.com/api/v1/organizations?endingBefore=9>; rel=prev";
        assert!(next_link(header, &current).is_none());
        assert!(next_link("", &current).is_none());
        assert!(next_link("garbage", &current).is_none());
    }

    #[test]
    fn resolves_relative_targets_and_multi_valued_rel() {
        let current = Url::parse("https://api.meraki.com/api/v1/organizations").unwrap();
        let next = next_link("</api/v1/organizations?startingAfter=5>; rel=\"last next\"", &current)
            .unwrap();
        assert_eq!(
            next.as_str(),
            "https://api.meraki.com/api/v1/organizations?startingAfter=5"
        );
    }

    #[test]
    fn follows_next_links_across_pages_in_order() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(GET).path("/networks/N_1/clients");
            then.status(200)
                .header("Link", link_to(&server, "/pages/2", "next"))
                .json_body(json!([{"mac": "aa"}, {"mac": "bb"}]));
        });
        let second = server.mock(|when, then| {
            when.method(GET).path("/pages/2");
            then.status(200)
                .header(
                    "Link",
                    format!(
                        "{}, {}",
                        link_to(&server, "/networks/N_1/clients", "first"),
                        link_to(&server, "/pages/3", "next")
                    ),
                )
                .json_body(json!([{"mac": "cc"}, {"mac": "dd"}]));
        });
        let third = server.mock(|when, then| {
            when.method(GET).path("/pages/3");
            then.status(200)
                .header("Link", link_to(&server, "/networks/N_1/clients", "first"))
                .json_body(json!([{"mac": "ee"}]));
        });

        let client = ApiClient::new(&server.base_url(), "k").unwrap();
        let records = Paginator::new(&client)
            .fetch_all("networks/N_1/clients", &[])
            .unwrap();

        first.assert_hits(1);
        second.assert_hits(1);
        third.assert_hits(1);
        let macs: Vec<&str> = records.iter().filter_map(|r| r["mac"].as_str()).collect();
        assert_eq!(macs, vec!["aa", "bb", "cc", "dd", "ee"]);
    }

    #[test]
    fn single_page_without_link_header() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/organizations");
            then.status(200).json_body(json!([{"id": "1"}]));
        });

        let client = ApiClient::new(&server.base_url(), "k").unwrap();
        let records = Paginator::new(&client).fetch_all("organizations", &[]).unwrap();

        mock.assert();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn error_on_later_page_discards_everything() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/networks/N_1/clients");
            then.status(200)
                .header("Link", link_to(&server, "/pages/2", "next"))
                .json_body(json!([{"mac": "aa"}]));
        });
        server.mock(|when, then| {
            when.method(GET).path("/pages/2");
            then.status(500).body("boom");
        });

        let client = ApiClient::new(&server.base_url(), "k").unwrap();
        let err = Paginator::new(&client)
            .fetch_all("networks/N_1/clients", &[])
            .unwrap_err();

        match err {
            FetchError::Api(api) => assert_eq!(api.status(), Some(500)),
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[test]
    fn self_referencing_next_link_is_a_loop() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/organizations");
            then.status(200)
                .header("Link", link_to(&server, "/pages/2", "next"))
                .json_body(json!([{"id": "1"}]));
        });
        let repeating = server.mock(|when, then| {
            when.method(GET).path("/pages/2");
            then.status(200)
                .header("Link", link_to(&server, "/pages/2", "next"))
                .json_body(json!([{"id": "2"}]));
        });

        let client = ApiClient::new(&server.base_url(), "k").unwrap();
        let err = Paginator::new(&client)
            .fetch_all("organizations", &[])
            .unwrap_err();

        repeating.assert_hits(1);
        assert!(matches!(err, FetchError::Loop { pages: 2, .. }));
    }

    #[test]
    fn page_cap_stops_runaway_collections() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/organizations");
            then.status(200)
                .header("Link", link_to(&server, "/pages/2", "next"))
                .json_body(json!([]));
        });
        server.mock(|when, then| {
            when.method(GET).path("/pages/2");
            then.status(200)
                .header("Link", link_to(&server, "/pages/3", "next"))
                .json_body(json!([]));
        });

        let client = ApiClient::new(&server.base_url(), "k").unwrap();
        let err = Paginator::new(&client)
            .with_max_pages(2)
            .fetch_all("organizations", &[])
            .unwrap_err();

        assert!(matches!(err, FetchError::TooManyPages { limit: 2, .. }));
    }

    #[test]
    fn object_body_is_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/organizations");
            then.status(200).json_body(json!({"errors": []}));
        });

        let client = ApiClient::new(&server.base_url(), "k").unwrap();
        let err = Paginator::new(&client)
            .fetch_all("organizations", &[])
            .unwrap_err();
        assert!(matches!(err, FetchError::NotAnArray { .. }));
    }
}
