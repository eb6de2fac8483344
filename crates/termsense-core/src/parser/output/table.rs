//! Table output classifier.
//!
//! The first non-empty line must look like a header row (all-caps words or
//! Title-Case, columns split by two or more spaces). Column start offsets
//! are computed from the header; each body line is sliced at those
//! offsets. Separator lines made of `-=+|` are skipped.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parser::{OutputData, OutputParser, ParserContext, ParserMeta, SemanticOutput};

static SEPARATOR_ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-=+|\s]+$").unwrap());
static COLUMN_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Parsed table payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableData {
    /// Header labels, left to right
    pub headers: Vec<String>,
    /// One map per row, keyed by header
    pub rows: Vec<HashMap<String, String>>,
}

/// Column-aligned table classifier (priority 55).
pub struct TableOutputParser {
    meta: ParserMeta,
}

impl Default for TableOutputParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TableOutputParser {
    pub fn new() -> Self {
        Self {
            meta: ParserMeta::new("table-output", 55)
                .with_description("Parses column-aligned tables such as `docker ps` output"),
        }
    }

    fn looks_like_header(line: &str) -> bool {
        let cells: Vec<&str> = COLUMN_SPLIT.split(line.trim()).collect();
        if cells.len() < 2 {
            return false;
        }
        cells.iter().all(|cell| {
            let cell = cell.trim();
            if cell.is_empty() {
                return false;
            }
            let all_caps = cell
                .chars()
                .all(|c| c.is_uppercase() || c.is_numeric() || c.is_whitespace() || c == '_' || c == '(' || c == ')' || c == '%');
            let title_case = cell
                .split_whitespace()
                .all(|w| w.chars().next().is_some_and(|c| c.is_uppercase()));
            all_caps || title_case
        })
    }

    /// Byte offsets where each header cell starts.
    fn column_starts(header: &str) -> Vec<usize> {
        let mut starts = Vec::new();
        let mut prev_spaces = 2usize; // treat line start as a boundary
        for (i, c) in header.char_indices() {
            if c == ' ' {
                prev_spaces += 1;
            } else {
                if prev_spaces >= 2 {
                    starts.push(i);
                }
                prev_spaces = 0;
            }
        }
        starts
    }

    fn slice_row(line: &str, starts: &[usize]) -> Vec<String> {
        let mut cells = Vec::with_capacity(starts.len());
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(line.len());
            let start = start.min(line.len());
            let end = end.min(line.len()).max(start);
            // Clamp to char boundaries so multibyte content cannot split.
            let start = floor_char_boundary(line, start);
            let end = floor_char_boundary(line, end);
            cells.push(line[start..end].trim().to_string());
        }
        cells
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

impl OutputParser for TableOutputParser {
    fn meta(&self) -> &ParserMeta {
        &self.meta
    }

    fn can_parse(&self, ctx: &ParserContext) -> bool {
        let mut lines = ctx.screen_text.lines().filter(|l| !l.trim().is_empty());
        let Some(first) = lines.next() else {
            return false;
        };
        Self::looks_like_header(first) && lines.next().is_some()
    }

    fn parse(&self, ctx: &ParserContext) -> Option<SemanticOutput> {
        let mut lines = ctx.screen_text.lines().filter(|l| !l.trim().is_empty());
        let header_line = lines.next()?;
        if !Self::looks_like_header(header_line) {
            return None;
        }

        let starts = Self::column_starts(header_line);
        let headers = Self::slice_row(header_line, &starts);
        if headers.len() < 2 {
            return None;
        }

        let mut rows = Vec::new();
        for line in lines {
            if SEPARATOR_ROW.is_match(line) {
                continue;
            }
            let cells = Self::slice_row(line, &starts);
            let row: HashMap<String, String> = headers
                .iter()
                .cloned()
                .zip(cells)
                .collect();
            rows.push(row);
        }

        if rows.is_empty() {
            return None;
        }

        Some(SemanticOutput {
            raw: ctx.screen_text.clone(),
            data: OutputData::Table(TableData { headers, rows }),
            confidence: 0.85,
            parser_name: self.meta.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(text: &str) -> ParserContext {
        ParserContext {
            screen_text: text.to_string(),
            last_lines: text.lines().map(|s| s.to_string()).collect(),
            ..ParserContext::default()
        }
    }

    fn table_of(out: &SemanticOutput) -> &TableData {
        match &out.data {
            OutputData::Table(t) => t,
            other => panic!("expected table payload, got {other:?}"),
        }
    }

    const DOCKER_PS: &str = "\
CONTAINER ID   IMAGE          STATUS         NAMES
a1b2c3d4e5f6   nginx:latest   Up 2 hours     web
0987654321ab   redis:7        Up 10 minutes  cache";

    #[test]
    fn test_docker_ps_style_table() {
        let parser = TableOutputParser::new();
        let out = parser.parse(&ctx(DOCKER_PS)).unwrap();
        assert_eq!(out.confidence, 0.85);

        let table = table_of(&out);
        assert_eq!(
            table.headers,
            vec!["CONTAINER ID", "IMAGE", "STATUS", "NAMES"]
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0]["IMAGE"], "nginx:latest");
        assert_eq!(table.rows[1]["NAMES"], "cache");
        assert_eq!(table.rows[1]["STATUS"], "Up 10 minutes");
    }

    #[test]
    fn test_title_case_headers_with_separator() {
        let parser = TableOutputParser::new();
        let text = "\
Name        Version     License
----        -------     -------
serde       1.0.200     MIT
tokio       1.38.0      MIT";
        let out = parser.parse(&ctx(text)).unwrap();
        let table = table_of(&out);
        assert_eq!(table.headers, vec!["Name", "Version", "License"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0]["Name"], "serde");
        assert_eq!(table.rows[1]["Version"], "1.38.0");
    }

    #[test]
    fn test_short_row_yields_empty_cells() {
        let parser = TableOutputParser::new();
        let text = "\
NAME    STATE    PORTS
db      running";
        let out = parser.parse(&ctx(text)).unwrap();
        let table = table_of(&out);
        assert_eq!(table.rows[0]["PORTS"], "");
        assert_eq!(table.rows[0]["STATE"], "running");
    }

    #[test]
    fn test_idempotent_reparse() {
        let parser = TableOutputParser::new();
        let out = parser.parse(&ctx(DOCKER_PS)).unwrap();
        let table = table_of(&out);

        // Re-serialise rows with ≥2-space alignment and parse again.
        let widths: Vec<usize> = table
            .headers
            .iter()
            .map(|h| {
                table
                    .rows
                    .iter()
                    .map(|r| r[h].len())
                    .chain(std::iter::once(h.len()))
                    .max()
                    .unwrap()
                    + 2
            })
            .collect();
        let mut text = String::new();
        let fmt_row = |cells: Vec<&str>| -> String {
            cells
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{c:<w$}", w = w))
                .collect::<String>()
                .trim_end()
                .to_string()
        };
        text.push_str(&fmt_row(table.headers.iter().map(|s| s.as_str()).collect()));
        for row in &table.rows {
            text.push('\n');
            text.push_str(&fmt_row(
                table.headers.iter().map(|h| row[h].as_str()).collect(),
            ));
        }

        let again = parser.parse(&ctx(&text)).unwrap();
        let reparsed = table_of(&again);
        assert_eq!(reparsed.headers, table.headers);
        assert_eq!(reparsed.rows, table.rows);
    }

    #[test]
    fn test_rejects_prose() {
        let parser = TableOutputParser::new();
        assert!(!parser.can_parse(&ctx("just a sentence of output\nand another one")));
        assert!(!parser.can_parse(&ctx("SINGLECOLUMN\nvalue")));
    }

    #[test]
    fn test_rejects_header_without_rows() {
        let parser = TableOutputParser::new();
        assert!(parser.parse(&ctx("NAME    STATUS")).is_none());
    }
}
