//! Per-user medication lexicon
//!
//! Built once whenever the user's medication list changes and then shared
//! read-only by every parse call. Each entry carries the folded spellings a
//! speech recognizer is likely to produce for it.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::text::fold;
use crate::types::UserMedication;
use crate::vocab::is_dose_unit;

/// Shortest folded base name accepted into the lexicon
const MIN_NAME_LEN: usize = 3;

/// Length of the keys in the prefix index
pub const PREFIX_LEN: usize = 3;

/// Drug names shorter than this get no truncated-prefix variants
const MIN_LEN_FOR_PREFIXES: usize = 7;

/// Hand-curated misrecognitions, keyed by a folded stem of the drug name
const PHONETIC_VARIANTS: &[(&str, &[&str])] = &[
    (
        "ibuprofen",
        &["ibu", "iboprofen", "ibuprophen", "ibuprofin", "ibobrofen", "ibuprofeen"],
    ),
    (
        "paracetamol",
        &["parazetamol", "paracetamoll", "paracetamohl", "paracetamal"],
    ),
    (
        "sumatriptan",
        &["suma", "sumatryptan", "sumatripton", "summatriptan", "zumatriptan"],
    ),
    (
        "rizatriptan",
        &["riza", "ritzatriptan", "risatriptan", "rizatripan"],
    ),
    ("zolmitriptan", &["zolmi", "solmitriptan", "zolmitripton"]),
    ("naratriptan", &["nara", "naratripan", "naratryptan"]),
    ("almotriptan", &["almo", "almotripan"]),
    ("eletriptan", &["eletripan", "eletryptan", "relpax"]),
    ("frovatriptan", &["frova", "frowatriptan"]),
    ("acetylsalicyl", &["ass", "aspirin", "asperin", "aspirien"]),
    ("aspirin", &["ass", "asperin", "aspirien"]),
    ("metamizol", &["novalgin", "novaminsulfon", "metamizoll"]),
    ("novalgin", &["novalgien", "novalgine", "metamizol"]),
    (
        "diclofenac",
        &["diclo", "diklofenak", "diclofenak", "voltaren"],
    ),
    ("naproxen", &["naproxene", "naproxenn", "naproksen"]),
    ("metoclopramid", &["mcp", "metoclopramit"]),
    ("thomapyrin", &["thomapyrine", "tomapyrin", "tomapirin"]),
    ("topiramat", &["topiramate", "topamax"]),
    ("amitriptylin", &["amitriptilin", "amitryptilin"]),
];

/// One registered medication with its spellings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationLexiconEntry {
    pub canonical_name: String,
    pub medication_id: Option<String>,
    /// Name with the strength stripped ("Ibuprofen")
    pub base_name: String,
    /// Strength as written ("400 mg")
    pub strength: Option<String>,
    /// All folded spellings, including truncated prefixes
    pub variants: BTreeSet<String>,
    /// Truncated prefixes, matched by similarity only
    #[serde(default)]
    pub prefix_variants: BTreeSet<String>,
}

impl MedicationLexiconEntry {
    /// Leading number of the strength ("400 mg" → "400")
    pub fn strength_number(&self) -> Option<String> {
        let strength = self.strength.as_deref()?;
        let digits: String = strength
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
            .collect();
        (!digits.is_empty()).then(|| digits.replace(',', "."))
    }

    fn from_medication(med: &UserMedication) -> Option<Self> {
        let (base_name, strength) = split_strength(&med.name);
        let folded_base = fold(&base_name);
        if folded_base.chars().count() < MIN_NAME_LEN {
            return None;
        }

        let mut variants = BTreeSet::new();
        variants.insert(fold(&med.name));
        variants.insert(folded_base.clone());

        let words = name_words(&base_name);
        let drug_word = words.first().cloned().unwrap_or_else(|| folded_base.clone());
        if words.len() > 1 && drug_word.chars().count() >= 4 {
            variants.insert(drug_word.clone());
        }

        if let Some(ingredient) = med.active_ingredient.as_deref() {
            let (ingredient_base, _) = split_strength(ingredient);
            let folded = fold(&ingredient_base);
            if folded.chars().count() >= MIN_NAME_LEN {
                variants.insert(folded);
            }
        }

        let stems: Vec<String> = variants.iter().cloned().collect();
        for (stem, phonetic) in PHONETIC_VARIANTS {
            if stems.iter().any(|v| v.contains(stem)) {
                variants.extend(phonetic.iter().map(|p| p.to_string()));
            }
        }

        let prefix_variants = truncated_prefixes(&drug_word);
        variants.extend(prefix_variants.iter().cloned());

        Some(Self {
            canonical_name: med.name.trim().to_string(),
            medication_id: med.id.clone(),
            base_name,
            strength,
            variants,
            prefix_variants,
        })
    }

    /// Variants that count as an exact spelling
    pub fn exact_variants(&self) -> impl Iterator<Item = &String> {
        self.variants
            .iter()
            .filter(|v| !self.prefix_variants.contains(*v))
    }
}

/// Split "Ibuprofen 400 mg Filmtabletten" into ("Ibuprofen", Some("400 mg"))
pub fn split_strength(name: &str) -> (String, Option<String>) {
    let words: Vec<&str> = name.split_whitespace().collect();
    let Some(pos) = words
        .iter()
        .position(|w| w.starts_with(|c: char| c.is_ascii_digit()))
    else {
        return (words.join(" "), None);
    };

    let mut strength = words[pos].to_string();
    if let Some(unit) = words.get(pos + 1)
        && is_dose_unit(&fold(unit))
    {
        strength.push(' ');
        strength.push_str(unit);
    }
    (words[..pos].join(" "), Some(strength))
}

/// Folded words of a base name, splitting on spaces and hyphens
fn name_words(base: &str) -> Vec<String> {
    base.split(|c: char| c.is_whitespace() || c == '-' || c == '/')
        .map(fold)
        .filter(|w| !w.is_empty())
        .collect()
}

/// "ibuprofen" → {"ibupro", "ibuprof", "ibuprofe"}
fn truncated_prefixes(word: &str) -> BTreeSet<String> {
    let chars: Vec<char> = word.chars().collect();
    if chars.len() < MIN_LEN_FOR_PREFIXES {
        return BTreeSet::new();
    }
    let min_len = 5usize.max((chars.len() * 3).div_ceil(5));
    (min_len..chars.len())
        .map(|len| chars[..len].iter().collect())
        .collect()
}

fn prefix_key(folded: &str) -> Option<String> {
    let key: String = folded.chars().take(PREFIX_LEN).collect();
    (key.chars().count() == PREFIX_LEN).then_some(key)
}

/// Immutable lexicon for one user's medication list
#[derive(Debug, Clone, Default)]
pub struct MedicationLexicon {
    entries: Vec<MedicationLexiconEntry>,
    /// Exact folded spelling → entry indices
    exact: HashMap<String, Vec<usize>>,
    /// First three folded characters → entry indices
    prefix_index: HashMap<String, Vec<usize>>,
}

impl MedicationLexicon {
    /// Build a lexicon. Records with empty or too-short names are skipped.
    pub fn build(medications: &[UserMedication]) -> Self {
        let mut lexicon = Self::default();

        for med in medications {
            let Some(entry) = MedicationLexiconEntry::from_medication(med) else {
                debug!("Skipping medication with unusable name: '{}'", med.name);
                continue;
            };
            if lexicon
                .entries
                .iter()
                .any(|e| e.canonical_name == entry.canonical_name)
            {
                continue;
            }

            let idx = lexicon.entries.len();
            for variant in entry.exact_variants() {
                push_unique(lexicon.exact.entry(variant.clone()).or_default(), idx);
            }
            for variant in &entry.variants {
                if let Some(key) = prefix_key(variant) {
                    push_unique(lexicon.prefix_index.entry(key).or_default(), idx);
                }
            }
            lexicon.entries.push(entry);
        }

        lexicon
    }

    pub fn entries(&self) -> &[MedicationLexiconEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&MedicationLexiconEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries having `folded` as an exact spelling
    pub fn exact_candidates(&self, folded: &str) -> &[usize] {
        self.exact.get(folded).map_or(&[], Vec::as_slice)
    }

    /// Entries sharing the first three characters of `folded`
    pub fn prefix_candidates(&self, folded: &str) -> &[usize] {
        prefix_key(folded)
            .and_then(|key| self.prefix_index.get(&key))
            .map_or(&[], Vec::as_slice)
    }
}

fn push_unique(list: &mut Vec<usize>, idx: usize) {
    if !list.contains(&idx) {
        list.push(idx);
    }
}

/// Holds the current lexicon and rebuilds it only when the medication list
/// actually changed. Parsers take cheap `Arc` snapshots.
pub struct LexiconStore {
    state: RwLock<(Option<u64>, Arc<MedicationLexicon>)>,
}

impl LexiconStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new((None, Arc::new(MedicationLexicon::default()))),
        }
    }

    /// Rebuild if `medications` differs from the last list, return the
    /// current snapshot
    pub fn refresh(&self, medications: &[UserMedication]) -> Arc<MedicationLexicon> {
        let fingerprint = fingerprint(medications);
        {
            let state = self.state.read();
            if state.0 == Some(fingerprint) {
                return Arc::clone(&state.1);
            }
        }

        let lexicon = Arc::new(MedicationLexicon::build(medications));
        info!(
            "Rebuilt medication lexicon: {} of {} medications usable",
            lexicon.len(),
            medications.len()
        );
        *self.state.write() = (Some(fingerprint), Arc::clone(&lexicon));
        lexicon
    }

    /// The lexicon from the last refresh (empty before the first one)
    pub fn current(&self) -> Arc<MedicationLexicon> {
        Arc::clone(&self.state.read().1)
    }
}

impl Default for LexiconStore {
    fn default() -> Self {
        Self::new()
    }
}

fn fingerprint(medications: &[UserMedication]) -> u64 {
    let mut hasher = DefaultHasher::new();
    medications.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meds(names: &[&str]) -> Vec<UserMedication> {
        names.iter().map(|n| UserMedication::new(*n)).collect()
    }

    #[test]
    fn test_split_strength() {
        assert_eq!(
            split_strength("Ibuprofen 400 mg"),
            ("Ibuprofen".to_string(), Some("400 mg".to_string()))
        );
        assert_eq!(
            split_strength("Sumatriptan Hexal 50mg Filmtabletten"),
            ("Sumatriptan Hexal".to_string(), Some("50mg".to_string()))
        );
        assert_eq!(split_strength("Thomapyrin"), ("Thomapyrin".to_string(), None));
    }

    #[test]
    fn test_entry_variants() {
        let lexicon = MedicationLexicon::build(&meds(&["Ibuprofen 400 mg"]));
        let entry = &lexicon.entries()[0];
        assert_eq!(entry.base_name, "Ibuprofen");
        assert_eq!(entry.strength.as_deref(), Some("400 mg"));
        assert_eq!(entry.strength_number().as_deref(), Some("400"));
        assert!(entry.variants.contains("ibuprofen400mg"));
        assert!(entry.variants.contains("ibuprofen"));
        assert!(entry.variants.contains("ibu"));
        assert!(entry.variants.contains("ibuprof"));
        assert!(entry.prefix_variants.contains("ibuprof"));
        assert!(!entry.prefix_variants.contains("ibuprofen"));
    }

    #[test]
    fn test_multi_word_base_adds_drug_word() {
        let lexicon = MedicationLexicon::build(&meds(&["Sumatriptan-Hexal 50 mg"]));
        let entry = &lexicon.entries()[0];
        assert!(entry.variants.contains("sumatriptanhexal"));
        assert!(entry.variants.contains("sumatriptan"));
        assert!(entry.variants.contains("suma"));
    }

    #[test]
    fn test_active_ingredient_variant() {
        let med = UserMedication::new("Novalgin akut")
            .with_id("m-7")
            .with_active_ingredient("Metamizol 500 mg");
        let lexicon = MedicationLexicon::build(&[med]);
        assert_eq!(lexicon.exact_candidates("metamizol"), &[0]);
        assert_eq!(lexicon.entries()[0].medication_id.as_deref(), Some("m-7"));
    }

    #[test]
    fn test_short_and_empty_names_skipped() {
        let lexicon = MedicationLexicon::build(&meds(&["", "  ", "AB", "X 5 mg", "Ibuprofen 400 mg"]));
        assert_eq!(lexicon.len(), 1);
    }

    #[test]
    fn test_duplicate_names_collapsed() {
        let lexicon = MedicationLexicon::build(&meds(&["Ibuprofen 400 mg", "Ibuprofen 400 mg"]));
        assert_eq!(lexicon.len(), 1);
    }

    #[test]
    fn test_shared_base_name_maps_to_both_entries() {
        let lexicon = MedicationLexicon::build(&meds(&["Ibuprofen 400 mg", "Ibuprofen 600 mg"]));
        assert_eq!(lexicon.exact_candidates("ibuprofen"), &[0, 1]);
        assert_eq!(lexicon.exact_candidates("ibuprofen600mg"), &[1]);
    }

    #[test]
    fn test_prefix_index() {
        let lexicon =
            MedicationLexicon::build(&meds(&["Ibuprofen 400 mg", "Sumatriptan 50 mg"]));
        assert_eq!(lexicon.prefix_candidates("ibuxyz"), &[0]);
        assert_eq!(lexicon.prefix_candidates("sumo"), &[1]);
        assert!(lexicon.prefix_candidates("zz").is_empty());
        assert!(lexicon.prefix_candidates("xyz").is_empty());
    }

    #[test]
    fn test_prefixes_are_not_exact() {
        let lexicon = MedicationLexicon::build(&meds(&["Ibuprofen 400 mg"]));
        assert!(lexicon.exact_candidates("ibuprof").is_empty());
    }

    #[test]
    fn test_truncated_prefixes_bounds() {
        assert!(truncated_prefixes("ibu").is_empty());
        let prefixes = truncated_prefixes("sumatriptan");
        assert_eq!(prefixes.iter().map(|p| p.len()).min(), Some(7));
        assert_eq!(prefixes.iter().map(|p| p.len()).max(), Some(10));
    }

    // ========== Store ==========

    #[test]
    fn test_store_rebuilds_only_on_change() {
        let store = LexiconStore::new();
        assert!(store.current().is_empty());

        let list = meds(&["Ibuprofen 400 mg"]);
        let first = store.refresh(&list);
        let second = store.refresh(&list);
        assert!(Arc::ptr_eq(&first, &second));

        let changed = meds(&["Ibuprofen 400 mg", "Sumatriptan 50 mg"]);
        let third = store.refresh(&changed);
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(store.current().len(), 2);
    }
}
