//! Static device inventory.
//!
//! The inventory is a markdown document maintained next to the firmware; the
//! first table whose header starts with `| Device Name` lists the devices.

use crate::models::RosterEntry;
use std::path::PathBuf;

/// Source of inventory entries. Loading never fails: problems yield an empty list.
pub trait RosterProvider: Send + Sync {
    fn load(&self) -> Vec<RosterEntry>;
}

/// Fixed in-memory roster.
#[derive(Debug, Clone, Default)]
pub struct StaticRoster(pub Vec<RosterEntry>);

impl RosterProvider for StaticRoster {
    fn load(&self) -> Vec<RosterEntry> {
        self.0.clone()
    }
}

/// Inventory markdown file, re-read on every load so edits show up without a restart.
#[derive(Debug, Clone)]
pub struct MarkdownInventory {
    path: PathBuf,
}

impl MarkdownInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RosterProvider for MarkdownInventory {
    fn load(&self) -> Vec<RosterEntry> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let entries = parse_inventory(&content);
                tracing::debug!(path = %self.path.display(), devices = entries.len(), "inventory loaded");
                entries
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "device inventory unavailable");
                Vec::new()
            }
        }
    }
}

fn parse_row(line: &str) -> Option<RosterEntry> {
    let cells: Vec<&str> = line.split('|').map(str::trim).collect();
    // leading and trailing pipes produce empty outer cells
    let cells = cells.get(1..cells.len().saturating_sub(1))?;
    if cells.len() < 5 || cells[0].is_empty() || cells[0].starts_with('#') {
        return None;
    }
    let cell = |i: usize, default: &str| cells.get(i).map_or(default, |c| *c).to_string();
    Some(RosterEntry {
        name: cells[0].to_string(),
        chip_id: cells[1].to_string(),
        platform: cells[2].to_string(),
        display: cells[3].to_string(),
        ip: cells[4].to_string(),
        status: cell(5, "Unknown"),
        last_update: cell(6, "N/A"),
    })
}

pub fn parse_inventory(content: &str) -> Vec<RosterEntry> {
    let mut entries = Vec::new();
    let mut in_table = false;

    for line in content.lines() {
        if line.starts_with("| Device Name") {
            in_table = true;
            continue;
        }
        if !in_table {
            continue;
        }
        if line.starts_with("|---") {
            continue;
        }
        if !line.starts_with('|') {
            break;
        }
        match parse_row(line) {
            Some(entry) => entries.push(entry),
            None => tracing::debug!(row = line, "skipping inventory row"),
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const INVENTORY: &str = "\
# Device Inventory

Some notes.

| Device Name | Chip ID | Platform | Display | IP | Status | Last Update |
|-------------|---------|----------|---------|----|--------|-------------|
| Pump House | 0xA1B2 | ESP32 | SSD1306 | 192.168.1.40 | Deployed | 2026-01-02 |
| Garage | 0xC3D4 | ESP8266 | None | 192.168.1.41 |
| # spare | | | | | | |
| | 0xFFFF | ESP32 | None | - | | |

| Device Name | Chip ID | Platform | Display | IP |
|---|---|---|---|---|
| Ignored | 1 | 2 | 3 | 4 |
";

    #[test]
    fn test_parse_inventory() {
        let entries = parse_inventory(INVENTORY);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Pump House");
        assert_eq!(entries[0].chip_id, "0xA1B2");
        assert_eq!(entries[0].status, "Deployed");
        assert_eq!(entries[1].name, "Garage");
        assert_eq!(entries[1].status, "Unknown");
        assert_eq!(entries[1].last_update, "N/A");
    }

    #[test]
    fn test_no_table() {
        assert!(parse_inventory("# Nothing here\n").is_empty());
    }

    #[test]
    fn test_markdown_inventory_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(INVENTORY.as_bytes()).unwrap();
        let roster = MarkdownInventory::new(file.path());
        assert_eq!(roster.load().len(), 2);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let roster = MarkdownInventory::new("/nonexistent/DEVICE_INVENTORY.md");
        assert!(roster.load().is_empty());
    }
}
