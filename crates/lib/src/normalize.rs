//! Message normalizer: turn raw OneBot message text into a clean prompt.

use regex::Regex;
use std::sync::OnceLock;

/// CQ code for an inline mention, e.g. `[CQ:at,qq=12345]`.
const MENTION_PATTERN: &str = r"\[CQ:at,qq=\d+\]";

fn mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(MENTION_PATTERN).expect("valid mention pattern"))
}

/// Remove every numeric mention token, leaving all other text untouched and in order.
/// Tokens that don't match exactly (e.g. `[CQ:at,qq=all]`) are left as-is.
pub fn normalize(raw: &str) -> String {
    mention_regex().replace_all(raw, "").into_owned()
}
