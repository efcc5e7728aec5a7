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

use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use clap::ValueEnum;
use serde_json::Value;
use std::fmt::Write as _;

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    Json,
    Raw,
}

#[derive(Clone, Debug, Default)]
pub struct RenderOpts {
    pub columns_override: Option<Vec<String>>,
    pub sort_by: Option<String>,
    pub filter: Option<String>,
}

pub fn render_records(
    records: &[Value],
    output: OutputFormat,
    render_opts: &RenderOpts,
    columns: Option<&[&str]>,
) -> Result<()> {
    let json = Value::Array(records.to_vec());
    render_value(&json, output, render_opts, columns)
}

pub fn render_value(
    json: &Value,
    output: OutputFormat,
    render_opts: &RenderOpts,
    columns: Option<&[&str]>,
) -> Result<()> {
    print!("{}", format_output(json, output, render_opts, columns)?);
    Ok(())
}

/// Render `json` in the requested format, newline-terminated.
///
/// `Raw` writes a collection as one compact record per line; anything else
/// is written as a single compact document.
pub fn format_output(
    json: &Value,
    output: OutputFormat,
    render_opts: &RenderOpts,
    columns: Option<&[&str]>,
) -> Result<String> {
    let mut out = String::new();
    match output {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(json)?)?,
        OutputFormat::Raw => match json {
            Value::Array(items) => {
                for item in items {
                    writeln!(out, "{}", serde_json::to_string(item)?)?;
                }
            }
            other => writeln!(out, "{}", serde_json::to_string(other)?)?,
        },
        OutputFormat::Pretty => match format_table(json, columns, render_opts) {
            Some(table) => out.push_str(&table),
            None => writeln!(out, "{}", serde_json::to_string_pretty(json)?)?,
        },
    }
    Ok(out)
}

/// Lay out an array of objects as an aligned text table.
///
/// Returns `None` when `json` is not tabular, so the caller can fall back to
/// pretty JSON.
pub fn format_table(
    json: &Value,
    columns_hint: Option<&[&str]>,
    render_opts: &RenderOpts,
) -> Option<String> {
    let rows = match json {
        Value::Array(arr) => arr,
        _ => return None,
    };

    if rows.is_empty() {
        return Some("No resources found.\n".into());
    }

    let first_obj = match &rows[0] {
        Value::Object(map) => map,
        _ => return None,
    };

    let present = |key: &str| {
        rows.iter()
            .any(|row| row.get(key).map(is_non_empty).unwrap_or(false))
    };

    let mut columns: Vec<String> = Vec::new();

    if let Some(override_cols) = &render_opts.columns_override {
        columns.extend(override_cols.iter().filter(|k| present(k.as_str())).cloned());
    }

    if columns.is_empty()
        && let Some(hint) = columns_hint
    {
        columns.extend(hint.iter().filter(|k| present(**k)).map(|k| k.to_string()));
    }

    if columns.is_empty() {
        // Auto-select up to 8 non-empty fields present in the first object.
        for key in first_obj.keys() {
            if present(key.as_str()) {
                columns.push(key.to_string());
            }
            if columns.len() >= 8 {
                break;
            }
        }
    }

    if columns.is_empty() {
        return None;
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    let mut table: Vec<Vec<String>> = Vec::new();
    let needle = render_opts.filter.as_ref().map(|f| f.to_lowercase());

    for row in rows {
        if let Value::Object(map) = row {
            let out_row: Vec<String> = columns
                .iter()
                .map(|col| value_to_str(map.get(col).unwrap_or(&Value::Null)))
                .collect();
            if let Some(needle) = &needle
                && !out_row
                    .iter()
                    .any(|cell| cell.to_lowercase().contains(needle))
            {
                continue;
            }
            for (idx, cell) in out_row.iter().enumerate() {
                widths[idx] = widths[idx].max(cell.chars().count());
            }
            table.push(out_row);
        }
    }

    if table.is_empty() {
        return Some("No resources found.\n".into());
    }

    if let Some(sort) = &render_opts.sort_by
        && let Some(idx) = columns.iter().position(|c| c == sort)
    {
        table.sort_by(|a, b| a[idx].cmp(&b[idx]));
    }

    let mut out = String::new();
    write_row(&mut out, &columns, &widths);
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    write_row(&mut out, &separator, &widths);
    for row in &table {
        write_row(&mut out, row, &widths);
    }
    Some(out)
}

fn write_row(out: &mut String, cells: &[String], widths: &[usize]) {
    let mut line = String::new();
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            line.push_str("  ");
        }
        let _ = write!(line, "{:width$}", cell, width = widths[i]);
    }
    out.push_str(line.trim_end());
    out.push('\n');
}

pub fn value_to_str(value: &Value) -> String {
    match value {
        Value::Null => "".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn is_non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(_) => true,
        Value::Number(_) => true,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(arr) => !arr.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Render a UTC timestamp (RFC 3339 string or epoch seconds) in `offset`.
pub fn format_timestamp(value: &Value, offset: &FixedOffset) -> Option<String> {
    let utc = match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.naive_utc())
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ"))
            .ok()?,
        Value::Number(n) => DateTime::from_timestamp(n.as_i64()?, 0)?.naive_utc(),
        _ => return None,
    };
    let local = offset.from_utc_datetime(&utc);
    Some(format!("{} UTC{}", local.format("%Y-%m-%d %H:%M:%S"), offset))
}

/// Replace `field` in every record with its rendering in `offset`; values
/// that are not timestamps are left alone.
pub fn localize_field(records: &mut [Value], field: &str, offset: &FixedOffset) {
    for record in records.iter_mut() {
        if let Some(slot) = record.get_mut(field)
            && let Some(rendered) = format_timestamp(slot, offset)
        {
            *slot = Value::String(rendered);
        }
    }
}
