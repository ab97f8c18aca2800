use std::collections::HashMap;

use crate::import::RawRow;

/// Split one CSV line. Quotes toggle on `"`, and `""` inside quotes is a literal quote.
pub fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                buf.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => out.push(std::mem::take(&mut buf)),
            _ => buf.push(ch),
        }
    }
    out.push(buf);
    out
}

/// Map a header cell onto one of `fields`, case-insensitively, honouring a few
/// spreadsheet spellings seen in department exports.
fn canonical_field(header: &str, fields: &[&'static str]) -> Option<&'static str> {
    let h = header.trim().trim_start_matches('\u{feff}').to_ascii_lowercase();
    let alias = match h.as_str() {
        "name" | "full_name" | "full name" => "fullname",
        "mobile" | "phone" | "phone_number" => "phonenumber",
        "reg_no" | "reg no" | "registration" | "registration no" => "regno",
        "credits" | "credit_completed" | "credit completed" => "creditcompleted",
        "term_test" | "term test" => "termtest",
        "part_a" | "part a" => "parta",
        "part_b" | "part b" => "partb",
        other => other,
    };
    fields
        .iter()
        .copied()
        .find(|f| f.to_ascii_lowercase() == alias)
}

/// Turn CSV text (header row first) into raw import rows keyed by `fields`.
///
/// Unknown columns are dropped; blank lines are skipped; short lines only
/// carry the cells they have.
pub fn rows_from_csv(text: &str, fields: &[&'static str]) -> Vec<RawRow> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<Option<&'static str>> = parse_csv_record(header)
        .iter()
        .map(|h| canonical_field(h, fields))
        .collect();

    lines
        .map(|line| {
            let cells = parse_csv_record(line);
            let mut row = HashMap::new();
            for (cell, column) in cells.into_iter().zip(columns.iter()) {
                if let Some(field) = column {
                    row.insert((*field).to_string(), cell.trim().to_string());
                }
            }
            row
        })
        .collect()
}
