use proxy_scan_rs::codes::{parse_codes_set, parse_codes_str};

#[test]
fn parse_commas_ranges_and_comments() {
    let input = r#"
        # relay success
        0
        200-202  # upstream HTTP buckets
        4, 7     # timeout-ish
        201      # duplicate
    "#;

    let codes = parse_codes_str(input).expect("parse ok");
    // Dedup, preserve first-appearance order
    assert_eq!(codes, vec![0, 200, 201, 202, 4, 7]);
}

#[test]
fn set_form_matches_list_form() {
    let set = parse_codes_set("0,4,7").unwrap();
    assert_eq!(set.len(), 3);
    assert!(set.contains(&0) && set.contains(&4) && set.contains(&7));
}

#[test]
fn invalid_code_rejected() {
    assert!(parse_codes_str("0,x").is_err());
    assert!(parse_codes_str("7-1").is_err());
}

#[test]
fn empty_input_yields_empty_filter() {
    assert!(parse_codes_str("").unwrap().is_empty());
    assert!(parse_codes_str("# only a comment\n").unwrap().is_empty());
}
