// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Instant;

use super::*;

#[test]
fn literal_and_star_matching() {
    assert!(glob_match("git push*", "git push origin main"));
    assert!(glob_match("git push*", "git push"));
    assert!(!glob_match("git push*", "git pull"));
    assert!(glob_match("git *", "git push origin main"));
    assert!(glob_match("*", "anything at all"));
    assert!(glob_match("**/auth.json", "/home/me/.config/tool/auth.json"));
    assert!(!glob_match("**/auth.json", "/home/me/auth.json.bak"));
}

#[test]
fn question_mark_matches_one_char() {
    assert!(glob_match("v?", "v1"));
    assert!(!glob_match("v?", "v12"));
    assert!(!glob_match("v?", "v"));
}

#[test]
fn empty_cases() {
    assert!(glob_match("", ""));
    assert!(!glob_match("", "x"));
    assert!(glob_match("*", ""));
    assert!(!glob_match("?", ""));
}

#[test]
fn specificity_is_literal_prefix() {
    assert_eq!(literal_prefix_len("git push*"), 9);
    assert_eq!(literal_prefix_len("git *"), 4);
    assert_eq!(literal_prefix_len("*"), 0);
    assert_eq!(literal_prefix_len("exact"), 5);
    assert!(is_literal("exact"));
    assert!(!is_literal("git *"));
}

#[test]
fn pathological_pattern_is_bounded() {
    // spec boundary: "a/"x100 + "b" against "*"x50 + "c" in under 500ms.
    let input = "a/".repeat(100) + "b";
    let pattern = "*".repeat(50) + "c";

    let start = Instant::now();
    let matched = glob_match(&pattern, &input);
    assert!(!matched);
    assert!(start.elapsed().as_millis() < 500);

    // And the matching variant stays fast too.
    let pattern = "*".repeat(50) + "b";
    let start = Instant::now();
    assert!(glob_match(&pattern, &input));
    assert!(start.elapsed().as_millis() < 500);
}

#[test]
fn nested_star_literal_alternation_is_bounded() {
    let input = "ab".repeat(50_000);
    let pattern = "*a*a*a*a*a*a*a*a*a*a*z";
    let start = Instant::now();
    assert!(!glob_match(pattern, &input));
    assert!(start.elapsed().as_millis() < 500);
}

#[test]
fn single_star_long_literal_is_bounded() {
    // A long literal after one star, failing only at the very end, must
    // not rescan the literal once per input position.
    let pattern = format!("*{}", "a".repeat(2_000));
    let input = "a".repeat(100_000) + "b";
    let start = Instant::now();
    assert!(!glob_match(&pattern, &input));
    assert!(start.elapsed().as_millis() < 500);

    // And the matching variant stays both correct and fast.
    let input = "x".repeat(100_000) + &"a".repeat(2_000);
    let start = Instant::now();
    assert!(glob_match(&pattern, &input));
    assert!(start.elapsed().as_millis() < 500);

    // Long anchored literal in front of the star, same property.
    let pattern = format!("{}*", "a".repeat(2_000));
    let input = "a".repeat(100_000);
    let start = Instant::now();
    assert!(glob_match(&pattern, &input));
    assert!(start.elapsed().as_millis() < 500);
}

#[test]
fn middle_segments_match_in_order() {
    assert!(glob_match("*foo*bar*", "xxfooyybarzz"));
    assert!(!glob_match("*foo*bar*", "xxbaryyfoozz"));
    assert!(glob_match("a*b*c", "aXbYc"));
    assert!(!glob_match("a*b*c", "aXcYb"));
    // The scan must not step past an overlapping viable start.
    assert!(glob_match("*aab*", "aaab"));
    assert!(glob_match("*aab*x", "aaabx"));
    // `?` inside a middle segment still matches one char.
    assert!(glob_match("*a?c*", "zzabczz"));
    assert!(!glob_match("*a?c*", "zzaczz"));
}

#[test]
fn anchored_segments_respect_both_ends() {
    assert!(glob_match("pre*post", "pre-middle-post"));
    assert!(glob_match("pre*post", "prepost"));
    assert!(!glob_match("pre*post", "prepos"));
    // Anchors may not overlap each other.
    assert!(!glob_match("abc*abc", "abcab"));
    assert!(glob_match("abc*abc", "abcabc"));
}

#[test]
fn home_variant_expansion() {
    let variants = home_variants("~/.ssh/**");
    assert!(variants.contains(&"~/.ssh/**".to_owned()));
    assert!(variants.contains(&"*/.ssh/**".to_owned()));

    let passthrough = home_variants("**/auth.json");
    assert_eq!(passthrough, vec!["**/auth.json".to_owned()]);
}
