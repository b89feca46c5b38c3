use anyhow::{bail, Context, Result};
use std::collections::HashSet;

/// Parse an accepted-code list into a deduplicated vector of outcome codes.
///
/// Supported formats, comma- or line-separated:
/// - single code: `0`
/// - inclusive range: `200-204`
/// - comments: everything after `#` is ignored
/// - whitespace and blank entries are ignored
pub fn parse_codes_str(s: &str) -> Result<Vec<i32>> {
    let mut out: Vec<i32> = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        // Strip comments and trim
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }

        for entry in line.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            // Range `start-end`
            if let Some((a, b)) = entry.split_once('-') {
                let start = parse_code_str(a.trim())
                    .with_context(|| format!("line {line_no}: invalid start in range: {a}"))?;
                let end = parse_code_str(b.trim())
                    .with_context(|| format!("line {line_no}: invalid end in range: {b}"))?;
                if start > end {
                    bail!("line {line_no}: invalid range {start}-{end} (start > end)");
                }
                for c in start..=end {
                    if seen.insert(c) {
                        out.push(c);
                    }
                }
                continue;
            }

            // Single value
            let c = parse_code_str(entry)
                .with_context(|| format!("line {line_no}: invalid code value: {entry}"))?;
            if seen.insert(c) {
                out.push(c);
            }
        }
    }

    Ok(out)
}

/// Parse into the set form the filter consumes.
pub fn parse_codes_set(s: &str) -> Result<HashSet<i32>> {
    Ok(parse_codes_str(s)?.into_iter().collect())
}

fn parse_code_str(s: &str) -> Result<i32> {
    let val: i64 = s.parse::<i64>().map_err(|e| anyhow::anyhow!(e))?;
    if val < 0 || val > i64::from(i32::MAX) {
        bail!("code out of range: {val}");
    }
    Ok(val as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_codes() {
        let codes = parse_codes_str("0, 7, 200").unwrap();
        assert_eq!(codes, vec![0, 7, 200]);
    }

    #[test]
    fn parse_ranges_and_dedup() {
        let codes = parse_codes_str("200-202,0,201").unwrap();
        assert_eq!(codes, vec![200, 201, 202, 0]);
    }

    #[test]
    fn parse_with_comments_and_whitespace() {
        let input = r#"
            # relayed fine
            0
            200-204   # HTTP-ish buckets

            # blank lines and spaces should be fine
        "#;
        let codes = parse_codes_str(input).unwrap();
        assert_eq!(codes, vec![0, 200, 201, 202, 203, 204]);
    }

    #[test]
    fn invalid_values_error() {
        assert!(parse_codes_str("abc").is_err());
        assert!(parse_codes_str("-5").is_err()); // parses as an empty-start range
        assert!(parse_codes_str("9-1").is_err());
    }

    #[test]
    fn empty_input_is_empty_set() {
        assert!(parse_codes_set("").unwrap().is_empty());
    }
}
