//! Table-name inflection for `_id` column matching
//!
//! `customer_id` may point at `customer`, `customers` or (for a plural stem) its
//! singular. Irregular nouns common in schemas are looked up first; everything
//! else goes through `Inflector`.

use inflector::Inflector;

/// (singular, plural) pairs `Inflector` gets wrong or that are frequent in schemas
const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("leaf", "leaves"),
    ("life", "lives"),
    ("knife", "knives"),
    ("wife", "wives"),
    ("half", "halves"),
    ("shelf", "shelves"),
    ("hero", "heroes"),
    ("potato", "potatoes"),
    ("analysis", "analyses"),
    ("basis", "bases"),
    ("crisis", "crises"),
    ("criterion", "criteria"),
    ("datum", "data"),
    ("medium", "media"),
    ("index", "indices"),
    ("matrix", "matrices"),
    ("vertex", "vertices"),
    ("status", "statuses"),
    ("address", "addresses"),
];

/// How a candidate table name was derived from the column stem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    Exact,
    Plural,
    Singular,
}

/// Lower-case plural of `word`
#[must_use]
pub fn pluralize(word: &str) -> String {
    let lower = word.to_lowercase();
    if let Some((_, plural)) = IRREGULAR.iter().find(|(s, p)| *s == lower || *p == lower) {
        return (*plural).to_string();
    }
    lower.to_plural()
}

/// Lower-case singular of `word`
#[must_use]
pub fn singularize(word: &str) -> String {
    let lower = word.to_lowercase();
    if let Some((singular, _)) = IRREGULAR.iter().find(|(s, p)| *s == lower || *p == lower) {
        return (*singular).to_string();
    }
    lower.to_singular()
}

/// Table names a column stem may refer to, best match first, without repeats
#[must_use]
pub fn candidate_names(stem: &str) -> Vec<(String, MatchKind)> {
    let mut out: Vec<(String, MatchKind)> = Vec::with_capacity(3);
    for (name, kind) in [
        (stem.to_lowercase(), MatchKind::Exact),
        (pluralize(stem), MatchKind::Plural),
        (singularize(stem), MatchKind::Singular),
    ] {
        if !name.is_empty() && !out.iter().any(|(seen, _)| *seen == name) {
            out.push((name, kind));
        }
    }
    out
}
