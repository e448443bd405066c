//! Filename-based document categorisation.
//!
//! Categories come from an ordered table of `(keyword, category)` rules.
//! A file name is lower-cased and checked against each keyword as a
//! substring; the first rule that matches wins and anything unmatched is
//! [`Category::General`].

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Regulations,
    Maintenance,
    Cargo,
    Safety,
    General,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Regulations => "regulations",
            Category::Maintenance => "maintenance",
            Category::Cargo => "cargo",
            Category::Safety => "safety",
            Category::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "regulations" => Some(Category::Regulations),
            "maintenance" => Some(Category::Maintenance),
            "cargo" => Some(Category::Cargo),
            "safety" => Some(Category::Safety),
            "general" => Some(Category::General),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword rules in priority order. Keywords are lower-case.
pub const CATEGORY_RULES: &[(&str, Category)] = &[
    ("regulation", Category::Regulations),
    ("iata", Category::Regulations),
    ("maintenance", Category::Maintenance),
    ("procedure", Category::Maintenance),
    ("cargo", Category::Cargo),
    ("loading", Category::Cargo),
    ("safety", Category::Safety),
];

/// Categorise a file name with the default rule table.
pub fn categorize(filename: &str) -> Category {
    categorize_with(CATEGORY_RULES, filename)
}

pub fn categorize_with(rules: &[(&str, Category)], filename: &str) -> Category {
    let lower = filename.to_lowercase();
    rules
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, category)| *category)
        .unwrap_or(Category::General)
}
