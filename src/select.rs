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

//! Numbered-menu selection over already-fetched collections.

use crate::inventory::display_name;
use dialoguer::{Input, theme::ColorfulTheme};
use serde_json::Value;
use std::collections::HashSet;
use std::io::IsTerminal;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("`{0}` is not a number")]
    NotANumber(String),
    #[error("choice {choice} is out of range (1-{max}, or 0 to exit)")]
    OutOfRange { choice: usize, max: usize },
    #[error("no {what} given; pass {flag} when not running in a terminal")]
    NotInteractive {
        what: &'static str,
        flag: &'static str,
    },
    #[error("reading input: {0}")]
    Prompt(String),
}

pub fn parse_choice(input: &str) -> Result<usize, SelectionError> {
    let trimmed = input.trim();
    trimmed
        .parse::<usize>()
        .map_err(|_| SelectionError::NotANumber(trimmed.to_string()))
}

/// Map a 1-based menu choice onto `items`; `0` means "none".
pub fn pick(items: &[Value], choice: usize) -> Result<Option<&Value>, SelectionError> {
    match choice {
        0 => Ok(None),
        n if n <= items.len() => Ok(Some(&items[n - 1])),
        n => Err(SelectionError::OutOfRange {
            choice: n,
            max: items.len(),
        }),
    }
}

pub fn find_by<'a>(items: &'a [Value], field: &str, value: &str) -> Option<&'a Value> {
    items
        .iter()
        .find(|item| item.get(field).and_then(Value::as_str) == Some(value))
}

pub fn menu_lines(items: &[Value], id_field: &str) -> Vec<String> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let id = item.get(id_field).and_then(Value::as_str).unwrap_or("");
            format!("{}. {} ({})", i + 1, display_name(item, id_field), id)
        })
        .collect()
}

/// Drop duplicates and the source serial, keeping first-seen order.
/// Returns the kept targets and the dropped entries.
pub fn normalize_targets(source: &str, targets: &[String]) -> (Vec<String>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    let mut dropped = Vec::new();
    for target in targets {
        if target == source || !seen.insert(target.as_str()) {
            dropped.push(target.clone());
        } else {
            kept.push(target.clone());
        }
    }
    (kept, dropped)
}

pub fn is_interactive() -> bool {
    std::io::stdin().is_terminal()
}

/// Print a numbered menu and ask until a valid choice (or 0) is entered.
pub fn prompt_choice<'a>(
    items: &'a [Value],
    what: &'static str,
    id_field: &str,
    flag: &'static str,
) -> Result<Option<&'a Value>, SelectionError> {
    if !is_interactive() {
        return Err(SelectionError::NotInteractive { what, flag });
    }
    let theme = ColorfulTheme::default();
    println!("Select {what}:");
    for line in menu_lines(items, id_field) {
        println!("  {line}");
    }
    loop {
        let input: String = Input::with_theme(&theme)
            .with_prompt(format!("Number of the {what} (0 to exit)"))
            .interact_text()
            .map_err(|e| SelectionError::Prompt(e.to_string()))?;
        match parse_choice(&input).and_then(|n| pick(items, n)) {
            Ok(choice) => return Ok(choice),
            Err(err) => eprintln!("Invalid choice: {err}"),
        }
    }
}

/// Collect several picks until 0 is entered.
pub fn prompt_many(
    items: &[Value],
    what: &'static str,
    id_field: &str,
    flag: &'static str,
) -> Result<Vec<String>, SelectionError> {
    if !is_interactive() {
        return Err(SelectionError::NotInteractive { what, flag });
    }
    let theme = ColorfulTheme::default();
    let mut picked = Vec::new();
    loop {
        let input: String = Input::with_theme(&theme)
            .with_prompt(format!("Number of a {what} (0 to finish)"))
            .interact_text()
            .map_err(|e| SelectionError::Prompt(e.to_string()))?;
        match parse_choice(&input).and_then(|n| pick(items, n)) {
            Ok(None) => return Ok(picked),
            Ok(Some(item)) => {
                if let Some(id) = item.get(id_field).and_then(Value::as_str) {
                    picked.push(id.to_string());
                }
            }
            Err(err) => eprintln!("Invalid choice: {err}"),
        }
    }
}
