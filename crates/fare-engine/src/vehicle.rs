//! Raw vehicle identifier normalisation.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{FareError, Result};
use crate::types::{CanonicalId, is_numeric_id};

const PREFIX_TOKENS: [&str; 3] = ["item-", "vehicle-", "cab-"];

const KNOWN_IDS: [&str; 13] = [
    "sedan",
    "dzire",
    "etios",
    "ertiga",
    "innova",
    "innova_crysta",
    "innova_hycross",
    "mpv",
    "suv",
    "luxury",
    "tempo_traveller",
    "urbania",
    "amaze",
];

const NUMERIC_ALIASES: [(&str, &str); 9] = [
    ("1", "sedan"),
    ("2", "ertiga"),
    ("3", "innova_crysta"),
    ("4", "luxury"),
    ("5", "tempo_traveller"),
    ("180", "etios"),
    ("592", "urbania"),
    ("1266", "mpv"),
    ("1270", "innova_hycross"),
];

/// Maps raw UI/legacy vehicle identifiers onto canonical ids.
///
/// The alias table is seeded once and read-only afterwards.
#[derive(Debug, Clone)]
pub struct VehicleIdentityResolver {
    known: HashSet<String>,
    aliases: HashMap<String, String>,
}

impl Default for VehicleIdentityResolver {
    fn default() -> Self {
        Self::new(
            KNOWN_IDS.iter().map(ToString::to_string),
            NUMERIC_ALIASES
                .iter()
                .map(|(alias, canonical)| ((*alias).to_string(), (*canonical).to_string())),
        )
    }
}

impl VehicleIdentityResolver {
    pub fn new(
        known: impl IntoIterator<Item = String>,
        aliases: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let known = known
            .into_iter()
            .map(|value| normalize(value.as_str()))
            .filter(|value| !value.is_empty())
            .collect::<HashSet<_>>();
        let declared = aliases
            .into_iter()
            .map(|(alias, canonical)| (normalize(alias.as_str()), normalize(canonical.as_str())))
            .filter(|(_, canonical)| !canonical.is_empty())
            .collect::<HashMap<_, _>>();
        let aliases = declared
            .iter()
            .filter_map(|(alias, target)| {
                let canonical = follow_aliases(&known, &declared, target)?;
                (!is_numeric_id(canonical)).then(|| (alias.clone(), canonical.to_string()))
            })
            .collect::<HashMap<_, _>>();
        Self { known, aliases }
    }

    /// Resolve `raw` into a canonical id. `resolve` is idempotent.
    pub fn resolve(&self, raw: &str) -> Result<CanonicalId> {
        let value = normalize(raw);
        if value.is_empty() {
            return Err(FareError::InvalidVehicleId(format!(
                "empty vehicle id (raw: {raw:?})"
            )));
        }
        if self.known.contains(value.as_str()) {
            return CanonicalId::new(value);
        }
        if let Some(canonical) = self.aliases.get(value.as_str()) {
            debug!(raw, canonical = %canonical, "resolved vehicle alias");
            return CanonicalId::new(canonical.clone());
        }
        if is_numeric_id(value.as_str()) {
            return Err(FareError::InvalidVehicleId(format!(
                "unmapped numeric vehicle id {value}"
            )));
        }
        CanonicalId::new(value)
    }

    #[must_use]
    pub fn is_known(&self, id: &CanonicalId) -> bool {
        self.known.contains(id.as_str())
    }
}

/// Chase `target` through the alias table until it stops at a known id or a
/// non-alias value. `None` for cycles.
fn follow_aliases<'a>(
    known: &HashSet<String>,
    aliases: &'a HashMap<String, String>,
    target: &'a str,
) -> Option<&'a str> {
    let mut current = target;
    for _ in 0..=aliases.len() {
        if known.contains(current) {
            return Some(current);
        }
        match aliases.get(current) {
            Some(next) => current = next.as_str(),
            None => return Some(current),
        }
    }
    None
}

fn normalize(raw: &str) -> String {
    let mut value = raw
        .trim()
        .to_ascii_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    // Strip repeatedly so `cab-item-sedan` and `sedan` resolve alike.
    loop {
        let stripped = PREFIX_TOKENS
            .iter()
            .find_map(|prefix| value.strip_prefix(prefix).map(ToString::to_string));
        match stripped {
            Some(rest) => value = rest.trim().to_string(),
            None => break,
        }
    }
    value
}
