use std::cmp::Reverse;
use std::sync::LazyLock;

use regex::Regex;

use crate::listing::DEFAULT_VARIANT;

static SPEED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b\d+-Speed\b").unwrap());

const STOPWORDS: &[&str] = &["for", "with", "in", "at", "by", "from", "on", "and", "the"];

/// Keyword table for one model. Keywords are matched case-insensitively
/// against the whole title, longest first.
struct Overrides {
    model: &'static str,
    keywords: Vec<(&'static str, &'static str)>,
    default: Option<&'static str>,
}

impl Overrides {
    fn new(
        model: &'static str,
        mut keywords: Vec<(&'static str, &'static str)>,
        default: Option<&'static str>,
    ) -> Self {
        keywords.sort_by_key(|(kw, _)| Reverse(kw.chars().count()));
        Overrides {
            model,
            keywords,
            default,
        }
    }

    fn lookup(&self, title: &str) -> Option<&'static str> {
        let lower = title.to_lowercase();
        self.keywords
            .iter()
            .find(|(kw, _)| lower.contains(&kw.to_lowercase()))
            .map(|(_, variant)| *variant)
            .or(self.default)
    }
}

static OVERRIDES: LazyLock<Vec<Overrides>> = LazyLock::new(|| {
    vec![
        Overrides::new(
            "SLR McLaren",
            vec![
                ("722", "722 Edition"),
                ("Roadster", "Roadster"),
                ("Stirling Moss", "Stirling Moss"),
                ("Coupe", "Coupe"),
                ("Coupé", "Coupe"),
            ],
            Some("Coupe"),
        ),
        Overrides::new(
            "911",
            vec![
                ("GT3 RS", "GT3 RS"),
                ("GT3", "GT3"),
                ("GT2 RS", "GT2 RS"),
                ("Turbo S", "Turbo S"),
            ],
            None,
        ),
    ]
});

/// Trim/variant label for a listing title.
///
/// A model with an override table resolves through it first. Otherwise the
/// label is whatever follows the make and the model in the title, cut at a
/// `<N>-Speed` token, or `Standard` when nothing usable remains.
pub fn classify(title: &str, make: &str, model: &str) -> String {
    if let Some(table) = OVERRIDES.iter().find(|o| o.model.eq_ignore_ascii_case(model.trim())) {
        if let Some(variant) = table.lookup(title) {
            return variant.to_string();
        }
    }
    remainder_variant(title, make, model).unwrap_or_else(|| DEFAULT_VARIANT.to_string())
}

fn remainder_variant(title: &str, make: &str, model: &str) -> Option<String> {
    let make = make.trim();
    let model = model.trim();
    if make.is_empty() || model.is_empty() {
        return None;
    }

    let after_make = find_ignore_case(title, make)? + make.len();
    let model_at = after_make + find_ignore_case(&title[after_make..], model)?;
    let mut rest = &title[model_at + model.len()..];

    if let Some(m) = SPEED_RE.find(rest) {
        rest = &rest[..m.start()];
    }
    let rest = rest.trim().trim_end_matches(',').trim();

    let first = rest.split_whitespace().next()?;
    if first.chars().count() < 2 || STOPWORDS.iter().any(|s| s.eq_ignore_ascii_case(first)) {
        return None;
    }
    Some(rest.to_string())
}

/// Byte offset of `needle` in `haystack`, ASCII case-insensitive.
fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
}
