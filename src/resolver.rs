//! Player-name resolution across data sources.
//!
//! Exchange runners, results feeds, and stats sites all spell players
//! differently ("Alcaraz C.", "Carlos Alcaraz", "Alcaraz Garfia Carlos").
//! The resolver maps free-form strings onto canonical roster ids. It never
//! creates players; ingestion carries unresolved names forward instead.

use crate::models::Tour;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Minimum similarity for the fuzzy fallback.
const FUZZY_THRESHOLD: f64 = 0.85;

/// Lowercase, strip diacritics, collapse separators. Both sides of every
/// comparison go through this.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let folded: &str = match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'ą' | 'ă' => "a",
            'é' | 'è' | 'ê' | 'ë' | 'ę' | 'ě' => "e",
            'í' | 'ì' | 'î' | 'ï' | 'ı' => "i",
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ø' | 'ő' => "o",
            'ú' | 'ù' | 'û' | 'ü' | 'ů' | 'ű' => "u",
            'ý' | 'ÿ' => "y",
            'ñ' | 'ń' => "n",
            'ç' | 'ć' | 'č' => "c",
            'ş' | 'ś' | 'š' | 'ș' => "s",
            'ž' | 'ź' | 'ż' => "z",
            'ł' => "l",
            'ř' => "r",
            'ğ' => "g",
            'đ' => "d",
            'ț' => "t",
            'ß' => "ss",
            'æ' => "ae",
            'œ' => "oe",
            'þ' => "th",
            '-' | '\'' | '.' | ',' => " ",
            _ => {
                out.extend(c.to_lowercase());
                continue;
            }
        };
        out.push_str(folded);
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Last surname-like token of a normalized name. Single-letter tokens are
/// initials ("Djokovic N.") and are skipped.
pub fn last_name(name: &str) -> String {
    let norm = normalize_name(name);
    let tokens: Vec<&str> = norm.split_whitespace().collect();
    tokens
        .iter()
        .rev()
        .find(|t| t.len() > 1)
        .or_else(|| tokens.last())
        .copied()
        .unwrap_or_default()
        .to_string()
}

pub fn first_name(name: &str) -> String {
    let norm = normalize_name(name);
    norm.split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// True when two selection strings refer to the same player by last name.
/// Used by settlement, where only the winner's runner name is available.
pub fn same_last_name(a: &str, b: &str) -> bool {
    let la = last_name(a);
    !la.is_empty() && la == last_name(b)
}

pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize_name(a), &normalize_name(b))
}

/// A candidate the resolver can pick from (id + display name).
#[derive(Debug, Clone)]
pub struct NameCandidate {
    pub id: i64,
    pub name: String,
}

/// Resolution contract: free-form name + optional tour hint in, canonical id
/// or unknown out.
pub trait NameResolver: Send + Sync {
    fn resolve(&self, name: &str, tour_hint: Option<Tour>, candidates: &[NameCandidate])
        -> Option<i64>;
}

/// Shape of the user-maintained mapping file. Values may be a player id or a
/// roster display name.
#[derive(Debug, Deserialize)]
struct MappingFile {
    #[serde(default)]
    mappings: HashMap<String, serde_json::Value>,
    #[serde(default)]
    aliases: HashMap<String, Vec<String>>,
}

/// Resolver backed by a user-maintained mapping table plus layered matching:
/// explicit mapping, normalized exact, last-name + first-initial, reversed
/// word order, then a fuzzy fallback.
pub struct MappingNameResolver {
    id_mappings: HashMap<String, i64>,
    name_mappings: HashMap<String, String>,
}

impl MappingNameResolver {
    pub fn empty() -> Self {
        Self {
            id_mappings: HashMap::new(),
            name_mappings: HashMap::new(),
        }
    }

    /// Load from a mappings JSON file; missing or unreadable files yield an
    /// empty table so a fresh install still resolves exact names.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::empty(),
        };
        let file: MappingFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!("could not parse name mappings {}: {}", path.display(), e);
                return Self::empty();
            }
        };

        let mut id_mappings = HashMap::new();
        let mut name_mappings = HashMap::new();
        for (source_name, target) in file.mappings {
            let key = normalize_name(&source_name);
            match target {
                serde_json::Value::Number(n) => {
                    if let Some(id) = n.as_i64() {
                        id_mappings.insert(key, id);
                    }
                }
                serde_json::Value::String(s) => {
                    name_mappings.insert(key, normalize_name(&s));
                }
                _ => {}
            }
        }
        for (canonical, alias_list) in file.aliases {
            let target = normalize_name(&canonical);
            for alias in alias_list {
                name_mappings.insert(normalize_name(&alias), target.clone());
            }
        }

        Self {
            id_mappings,
            name_mappings,
        }
    }

    pub fn add_id_mapping(&mut self, source_name: &str, id: i64) {
        self.id_mappings.insert(normalize_name(source_name), id);
    }

    fn mapped_target(&self, name: &str) -> Option<String> {
        self.name_mappings.get(&normalize_name(name)).cloned()
    }
}

impl NameResolver for MappingNameResolver {
    fn resolve(
        &self,
        name: &str,
        _tour_hint: Option<Tour>,
        candidates: &[NameCandidate],
    ) -> Option<i64> {
        let normalized = normalize_name(name);
        if normalized.is_empty() {
            return None;
        }

        // Explicit id mapping wins outright.
        if let Some(id) = self.id_mappings.get(&normalized) {
            return Some(*id);
        }

        // Explicit name mapping redirects the search target.
        let target = self.mapped_target(name).unwrap_or(normalized);

        // Normalized exact match.
        for c in candidates {
            if normalize_name(&c.name) == target {
                return Some(c.id);
            }
        }

        // Last name + first initial. Handles "LastName F." and "F. LastName".
        let parts: Vec<&str> = target.split_whitespace().collect();
        if parts.len() >= 2 {
            let tokens_without_initials: Vec<&str> =
                parts.iter().filter(|t| t.len() > 1).copied().collect();
            let initials: Vec<char> = parts
                .iter()
                .filter(|t| t.len() == 1)
                .filter_map(|t| t.chars().next())
                .collect();

            for c in candidates {
                let cand_norm = normalize_name(&c.name);
                let cand_last = cand_norm.split_whitespace().last().unwrap_or_default();
                let cand_first_initial = cand_norm.chars().next();

                let last_matches = tokens_without_initials.contains(&cand_last)
                    || cand_last == *parts.last().unwrap();
                let initial_matches = initials.is_empty()
                    || cand_first_initial.map_or(false, |fi| initials.contains(&fi));
                if last_matches && initial_matches && !tokens_without_initials.is_empty() {
                    // Require the surname token to actually appear on both sides.
                    if cand_norm
                        .split_whitespace()
                        .any(|t| tokens_without_initials.contains(&t))
                    {
                        return Some(c.id);
                    }
                }
            }

            // Reversed word order: "Sinner Jannik" vs "Jannik Sinner".
            let reversed: String = parts
                .iter()
                .rev()
                .copied()
                .collect::<Vec<_>>()
                .join(" ");
            for c in candidates {
                if normalize_name(&c.name) == reversed {
                    return Some(c.id);
                }
            }
        }

        // Fuzzy fallback.
        let mut best: Option<(i64, f64)> = None;
        for c in candidates {
            let score = strsim::normalized_levenshtein(&normalize_name(&c.name), &target);
            if score >= FUZZY_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
                best = Some((c.id, score));
            }
        }
        best.map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Vec<NameCandidate> {
        vec![
            NameCandidate {
                id: 1,
                name: "Novak Djokovic".into(),
            },
            NameCandidate {
                id: 2,
                name: "Carlos Alcaraz".into(),
            },
            NameCandidate {
                id: 3,
                name: "Félix Auger-Aliassime".into(),
            },
        ]
    }

    #[test]
    fn normalization_folds_diacritics_and_hyphens() {
        assert_eq!(
            normalize_name("Félix Auger-Aliassime"),
            "felix auger aliassime"
        );
        assert_eq!(normalize_name("Djokovic  N."), "djokovic n");
    }

    #[test]
    fn exact_and_reversed_order() {
        let r = MappingNameResolver::empty();
        assert_eq!(r.resolve("Carlos Alcaraz", None, &roster()), Some(2));
        assert_eq!(r.resolve("Alcaraz Carlos", None, &roster()), Some(2));
    }

    #[test]
    fn last_name_plus_initial() {
        let r = MappingNameResolver::empty();
        assert_eq!(r.resolve("Djokovic N.", None, &roster()), Some(1));
        assert_eq!(r.resolve("N. Djokovic", None, &roster()), Some(1));
        // Wrong initial must not match.
        assert_eq!(r.resolve("Djokovic X.", None, &roster()), None);
    }

    #[test]
    fn diacritic_variants_resolve() {
        let r = MappingNameResolver::empty();
        assert_eq!(r.resolve("Felix Auger Aliassime", None, &roster()), Some(3));
    }

    #[test]
    fn explicit_mapping_wins() {
        let mut r = MappingNameResolver::empty();
        r.add_id_mapping("Nole", 1);
        assert_eq!(r.resolve("Nole", None, &roster()), Some(1));
    }

    #[test]
    fn unknown_stays_unknown() {
        let r = MappingNameResolver::empty();
        assert_eq!(r.resolve("Roger Federer", None, &roster()), None);
    }

    #[test]
    fn settlement_last_name_comparison() {
        assert!(same_last_name("Novak Djokovic", "Djokovic"));
        assert!(same_last_name("Auger-Aliassime F.", "Felix Auger Aliassime"));
        assert!(!same_last_name("Novak Djokovic", "Carlos Alcaraz"));
    }
}
