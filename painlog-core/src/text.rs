//! Small string helpers shared by every extraction stage

/// Lowercase, transliterate German umlauts and ß, drop everything that is not
/// a letter or digit. "Schmerz-Stärke!" becomes "schmerzstaerke".
pub fn fold(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars().flat_map(char::to_lowercase) {
        match c {
            'ä' => out.push_str("ae"),
            'ö' => out.push_str("oe"),
            'ü' => out.push_str("ue"),
            'ß' => out.push_str("ss"),
            c if c.is_alphanumeric() => out.push(c),
            _ => {}
        }
    }
    out
}

/// Strip quotes, brackets, dashes and sentence punctuation from both ends of a
/// word while keeping inner separators like "8/10", "7,5" or "20:30".
pub fn trim_punctuation(word: &str) -> &str {
    word.trim_matches(|c: char| {
        matches!(
            c,
            '.' | ',' | ';' | ':' | '!' | '?' | '"' | '\'' | '(' | ')' | '[' | ']' | '{'
                | '}' | '„' | '“' | '”' | '‚' | '‘' | '’' | '«' | '»' | '…' | '-' | '–' | '—'
        )
    })
}

/// Parse "7", "7,5" or "7.5"
pub fn parse_number(text: &str) -> Option<f32> {
    if text.is_empty() || !text.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let normalized = text.replace(',', ".");
    if normalized.matches('.').count() > 1
        || !normalized.chars().all(|c| c.is_ascii_digit() || c == '.')
    {
        return None;
    }
    normalized.parse::<f32>().ok().filter(|v| v.is_finite())
}

/// Parse a plain non-negative integer token
pub fn parse_int(text: &str) -> Option<u32> {
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Whether the folded word is in a vocabulary list
pub fn in_list(list: &[&str], folded: &str) -> bool {
    list.contains(&folded)
}
