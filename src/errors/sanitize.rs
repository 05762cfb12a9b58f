//! Redaction of byte-like payloads from error and log text
//!
//! Every message that leaves the classifier, and every error string that is
//! logged, goes through [`sanitize`]. Four kinds of payload are replaced, in
//! this order and without overlap:
//!
//! 1. hex runs of 20+ characters, optionally `0x` prefixed or written as
//!    separator-delimited byte pairs -> `[hex_string_data]`
//! 2. base58 runs of 20+ characters -> `[base58_string_data]`
//! 3. comma separated decimal lists of 20+ byte values -> `[uint8array_object]`
//! 4. runs of 12 or more BIP39 English words -> `[seed_phrase_removed]`
//!
//! Rule 4 is wider than the 12 and 24 word mnemonic lengths: any run of at
//! least 12 list words goes, whole, so 15/18/21 word phrases and phrases with
//! trailing list words are also covered. Runs of 11 or fewer are left alone.
//!
//! Replacement tokens are bracketed so that a second pass never finds a new
//! match, which makes the function idempotent.

use once_cell::sync::Lazy;
use regex::Regex;

pub const HEX_PLACEHOLDER: &str = "[hex_string_data]";
pub const BASE58_PLACEHOLDER: &str = "[base58_string_data]";
pub const UINT8_PLACEHOLDER: &str = "[uint8array_object]";
pub const SEED_PLACEHOLDER: &str = "[seed_phrase_removed]";

/// Minimum number of words that is treated as a mnemonic.
const SEED_PHRASE_MIN_WORDS: usize = 12;

static HEX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:0x)?(?:[0-9a-fA-F]{2}[:\- ]){6,}[0-9a-fA-F]{2}|(?:0x)?[0-9a-fA-F]{20,}")
        .expect("hex pattern is valid")
});

static BASE58_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[1-9A-HJ-NP-Za-km-z]{20,}").expect("base58 pattern is valid")
});

static UINT8_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{1,3}(?:\s*,\s*\d{1,3}){19,}\b")
        .expect("uint8 pattern is valid")
});

static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z]+\b").expect("word pattern is valid"));

/// Strip sensitive byte-like substrings from `text`.
///
/// Pure and infallible. Empty input is returned as is.
pub fn sanitize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let out = HEX_RE.replace_all(text, HEX_PLACEHOLDER);
    let out = BASE58_RE.replace_all(&out, BASE58_PLACEHOLDER);
    let out = UINT8_RE.replace_all(&out, UINT8_PLACEHOLDER);
    strip_seed_phrases(&out)
}

/// Returns `true` when `sanitize` would change `text`.
pub fn contains_sensitive_data(text: &str) -> bool {
    sanitize(text) != text
}

fn is_bip39_word(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    bip39::Language::English
        .word_list()
        .binary_search(&lower.as_str())
        .is_ok()
}

/// Replace every whitespace-separated run of BIP39 words that is long enough
/// to hold a 12 or 24 word mnemonic.
///
/// A run longer than 12 is removed whole: an ordinary word that happens to be
/// on the wordlist and sits next to a phrase must not let the phrase through.
fn strip_seed_phrases(text: &str) -> String {
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut run: Option<(usize, usize, usize)> = None; // (start, end, words)

    for m in WORD_RE.find_iter(text) {
        let joins_run = match run {
            Some((_, end, _)) => {
                let gap = &text[end..m.start()];
                !gap.is_empty() && gap.chars().all(char::is_whitespace)
            }
            None => false,
        };

        if is_bip39_word(m.as_str()) {
            run = match run {
                Some((start, _, words)) if joins_run => Some((start, m.end(), words + 1)),
                previous => {
                    close_run(previous, &mut spans);
                    Some((m.start(), m.end(), 1))
                }
            };
        } else {
            close_run(run.take(), &mut spans);
        }
    }
    close_run(run, &mut spans);

    if spans.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end) in spans {
        out.push_str(&text[cursor..start]);
        out.push_str(SEED_PLACEHOLDER);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

fn close_run(run: Option<(usize, usize, usize)>, spans: &mut Vec<(usize, usize)>) {
    if let Some((start, end, words)) = run {
        if words >= SEED_PHRASE_MIN_WORDS {
            spans.push((start, end));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_ordinary_log_lines_alone() {
        let line = "Program consumed: 4374 of 200000 compute units";
        assert_eq!(sanitize(line), line);
        assert!(!contains_sensitive_data(line));
    }

    #[test]
    fn replaces_prefixed_hex() {
        assert_eq!(
            sanitize("0x1234567890abcdef1234567890abcdef"),
            "[hex_string_data]"
        );
    }

    #[test]
    fn replaces_separated_byte_pairs() {
        assert_eq!(
            sanitize("key de:ad:be:ef:00:11:22:33 leaked"),
            "key [hex_string_data] leaked"
        );
    }

    #[test]
    fn replaces_base58_blobs() {
        let sig = "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW";
        assert_eq!(
            sanitize(&format!("signature {sig} failed")),
            "signature [base58_string_data] failed"
        );
    }

    #[test]
    fn replaces_uint8_arrays() {
        let bytes: Vec<String> = (1..=20).map(|b: u8| b.to_string()).collect();
        assert_eq!(sanitize(&bytes.join(",")), "[uint8array_object]");

        let short: Vec<String> = (1..=19).map(|b: u8| b.to_string()).collect();
        let short = short.join(",");
        assert_eq!(sanitize(&short), short);
    }

    #[test]
    fn replaces_twelve_word_mnemonic() {
        let phrase = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
        assert_eq!(
            sanitize(&format!("restore failed: {phrase}")),
            "restore failed: [seed_phrase_removed]"
        );
    }

    #[test]
    fn replaces_mnemonic_case_insensitively() {
        let phrase = "Legal Winner Thank Year Wave Sausage Worth Useful Legal Winner Thank Yellow";
        assert_eq!(sanitize(phrase), SEED_PLACEHOLDER);
    }

    #[test]
    fn keeps_short_word_runs() {
        let text = "abandon ability able about above absent";
        assert_eq!(sanitize(text), text);
    }

    #[test]
    fn empty_input_is_returned() {
        assert_eq!(sanitize(""), "");
    }

    #[test]
    fn second_pass_changes_nothing() {
        let text = "tx 0xdeadbeefdeadbeefdeadbeef from 4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T with 1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20";
        let once = sanitize(text);
        assert_eq!(sanitize(&once), once);
        assert!(once.contains(HEX_PLACEHOLDER));
        assert!(once.contains(BASE58_PLACEHOLDER));
        assert!(once.contains(UINT8_PLACEHOLDER));
    }
}
