//! Fixed German vocabulary tables
//!
//! All entries are folded (see [`crate::text::fold`]): lowercase, umlauts
//! transliterated, no punctuation.

use crate::text::in_list;

pub const TIME_UNITS: &[&str] = &[
    "min", "minute", "minuten", "minuetchen", "std", "stunde", "stunden", "stuendchen", "h",
    "uhr", "tag", "tage", "tagen", "woche", "wochen", "sekunden", "viertelstunde",
];

pub const DOSE_UNITS: &[&str] = &[
    "mg", "milligramm", "g", "gramm", "mcg", "ug", "µg", "mikrogramm", "ml", "milliliter",
    "tropfen", "ie",
];

pub const QUANTITY_NOUNS: &[&str] = &[
    "tablette", "tabletten", "tabl", "tbl", "tab", "tabs", "kapsel", "kapseln", "pille",
    "pillen", "stueck", "stk", "zaepfchen", "hub", "huebe", "spruehstoss", "spruehstoesse",
    "dosis", "dosen", "beutel", "brausetablette", "brausetabletten", "schmelztablette",
    "schmelztabletten", "spritze", "ampulle",
];

/// Words that express a fraction or count of a dose
pub const QUANTITY_WORDS: &[&str] = &[
    "ein", "eine", "einen", "einer", "halbe", "halben", "halb", "viertel", "dreiviertel",
    "anderthalb", "eineinhalb", "beide", "zwei",
];

pub const INTAKE_VERBS: &[&str] = &[
    "genommen", "eingenommen", "nehme", "nahm", "nehmen", "geschluckt", "gespritzt", "gesprueht",
    "gegeben", "eingeworfen", "eingeschmissen", "geschmissen", "intus",
];

pub const NEGATIONS: &[&str] = &[
    "kein", "keine", "keinen", "keiner", "nicht", "ohne", "nie", "niemals", "nichts",
];

/// Independent evidence that the utterance is about pain
pub const PAIN_CONTEXT: &[&str] = &[
    "schmerz", "schmerzen", "kopfschmerz", "kopfschmerzen", "kopfweh", "migraene", "attacke",
    "anfall", "weh", "tut", "pocht", "pochen", "pochend", "sticht", "stechen", "stechend",
    "druck", "drueckend", "schmerzt", "brummschaedel", "aua",
];

/// Event nouns that only restate that something happened
pub const EVENT_NOUNS: &[&str] = &[
    "migraene", "migraeneattacke", "attacke", "anfall", "kopfschmerz", "kopfschmerzen",
    "kopfweh", "schmerz", "schmerzen", "spannungskopfschmerz", "spannungskopfschmerzen",
    "cluster", "clusterkopfschmerz",
];

/// Fillers stripped from the start of a note
pub const LEADING_FILLERS: &[&str] = &[
    "ich", "habe", "hab", "hatte", "also", "und", "dann", "aeh", "aehm", "oehm", "hm", "hmm",
    "so", "ja", "okay", "ok", "naja", "trigger", "notiz", "kontext", "bitte", "eintrag", "noch",
    "mal", "heute", "gerade", "jetzt", "es", "gibt", "ist", "war", "wegen",
];

/// Connectives that must not dangle at the end of a note
pub const TRAILING_CONNECTIVES: &[&str] = &[
    "und", "oder", "mit", "aber", "dann", "bei", "von", "auf", "sowie", "plus", "also", "weil",
    "wegen", "nach", "vor", "um", "gegen", "zu", "ein", "eine", "einen", "der", "die", "das",
    "den", "dem", "habe", "hab", "ich",
];

/// Vocabulary that keeps a short note alive through the quality gate
pub const CLINICAL_VOCABULARY: &[&str] = &[
    "uebelkeit", "uebel", "erbrechen", "erbrochen", "lichtempfindlich", "lichtempfindlichkeit",
    "licht", "laerm", "laermempfindlich", "geraeusche", "geruch", "aura", "flimmern",
    "sehstoerung", "sehstoerungen", "schwindel", "links", "rechts", "linksseitig",
    "rechtsseitig", "beidseitig", "stirn", "schlaefe", "nacken", "auge", "augen", "stress",
    "schlaf", "schlecht", "wetter", "foehn", "periode", "menstruation", "regel", "alkohol",
    "wein", "kaffee", "bildschirm", "hunger", "fasten", "sport", "zyklus", "geschlafen",
    "muede", "muedigkeit", "taubheit", "kribbeln", "wortfindung",
];

pub fn is_time_unit(folded: &str) -> bool {
    in_list(TIME_UNITS, folded)
}

pub fn is_dose_unit(folded: &str) -> bool {
    in_list(DOSE_UNITS, folded)
}

pub fn is_quantity_noun(folded: &str) -> bool {
    in_list(QUANTITY_NOUNS, folded)
}

pub fn is_intake_verb(folded: &str) -> bool {
    in_list(INTAKE_VERBS, folded)
}

pub fn is_negation(folded: &str) -> bool {
    in_list(NEGATIONS, folded)
}

pub fn is_event_noun(folded: &str) -> bool {
    in_list(EVENT_NOUNS, folded)
}

/// Pain vocabulary, including any compound containing "schmerz"
pub fn is_pain_context(folded: &str) -> bool {
    in_list(PAIN_CONTEXT, folded) || folded.contains("schmerz")
}

/// Unit words a competing number would be attached to
pub fn is_unit_word(folded: &str) -> bool {
    is_time_unit(folded) || is_dose_unit(folded) || is_quantity_noun(folded)
}
