//! Text helpers shared by the castle model and the source adapters.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::types::Country;

/// Separator used in place of whitespace inside a normalized name.
pub const NAME_SEPARATOR: &str = "_";

/// Fixed substitution table applied when normalizing a castle name.
const NAME_REPLACEMENTS: &[(char, &str)] = &[
    ('(', ""),
    (')', ""),
    ('ç', "c"),
    ('á', "a"),
    ('é', "e"),
    ('í', "i"),
    ('ó', "o"),
    ('ú', "u"),
    ('â', "a"),
    ('ê', "e"),
    ('î', "i"),
    ('ô', "o"),
    ('û', "u"),
    ('ã', "a"),
    ('õ', "o"),
    ('à', "a"),
    ('è', "e"),
    ('ì', "i"),
    ('ò', "o"),
    ('ù', "u"),
    ('ä', "a"),
    ('ë', "e"),
    ('ï', "i"),
    ('ö', "o"),
    ('ü', "u"),
    ('ñ', "n"),
    ('/', "_"),
];

const ENGLISH_NOISE: &[&str] = &[" castle", "castle ", " palace"];
const PORTUGUESE_NOISE: &[&str] = &["castelo de ", "torre"];

/// Locale-specific words stripped from a castle name before matching.
pub fn noise_words(country: Country) -> &'static [&'static str] {
    match country {
        Country::Portugal => PORTUGUESE_NOISE,
        Country::Uk | Country::Ireland => ENGLISH_NOISE,
        Country::Slovakia | Country::Denmark => &[],
    }
}

/// Lowercase `raw`, then remove every noise word for `country`.
///
/// The result is trimmed and inner whitespace collapsed to single spaces.
pub fn strip_noise(country: Country, raw: &str) -> String {
    let mut filtered = raw.to_lowercase();
    for noise in noise_words(country) {
        filtered = filtered.replace(noise, "");
    }
    collapse_whitespace(&filtered)
}

/// Whether `token` is a bare noise word for `country` (e.g. `castle`).
pub fn is_noise_token(country: Country, token: &str) -> bool {
    noise_words(country).iter().any(|n| n.trim() == token)
}

/// Lowercase, trim, join whitespace-separated parts with [`NAME_SEPARATOR`]
/// and apply the fixed diacritics/punctuation substitution table.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let joined = lowered.split_whitespace().collect::<Vec<_>>().join(NAME_SEPARATOR);

    let mut normalized = String::with_capacity(joined.len());
    for c in joined.chars() {
        match NAME_REPLACEMENTS.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => normalized.push_str(to),
            None => normalized.push(c),
        }
    }
    normalized
}

/// Trim and collapse runs of whitespace into a single space.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fold `s` to ASCII where a base letter exists: decompose, drop combining
/// marks and recompose. `ø` and `∅` have no decomposition and map to `o`.
pub fn to_ascii(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .nfkc()
        .map(|c| match c {
            'ø' | '∅' => 'o',
            'Ø' => 'O',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_name_strips_diacritics_and_parentheses() {
        assert_eq!(normalize_name("  Castelo de Guimarães "), "castelo_de_guimaraes");
        assert_eq!(normalize_name("Castelo do Mau Vizinho(Évora)"), "castelo_do_mau_vizinhoevora");
        assert_eq!(normalize_name("Torre/Menagem"), "torre_menagem");
    }

    #[test]
    fn normalize_name_ignores_case_and_surrounding_whitespace() {
        assert_eq!(normalize_name("WINDSOR Castle"), normalize_name("  windsor castle\t"));
    }

    #[test]
    fn strip_noise_by_country() {
        assert_eq!(strip_noise(Country::Uk, "Kirby Muxloe Castle"), "kirby muxloe");
        assert_eq!(strip_noise(Country::Uk, "Castle Rising"), "rising");
        assert_eq!(strip_noise(Country::Uk, "Buckingham Palace"), "buckingham");
        assert_eq!(strip_noise(Country::Portugal, "Castelo de Guimarães"), "guimarães");
        assert_eq!(strip_noise(Country::Slovakia, "Bojnický Zámok"), "bojnický zámok");
    }

    #[test]
    fn bare_noise_tokens() {
        assert!(is_noise_token(Country::Ireland, "castle"));
        assert!(is_noise_token(Country::Portugal, "torre"));
        assert!(!is_noise_token(Country::Denmark, "castle"));
    }

    #[test]
    fn to_ascii_folds_accents() {
        assert_eq!(to_ascii("Guimarães"), "Guimaraes");
        assert_eq!(to_ascii("hradište"), "hradiste");
        assert_eq!(to_ascii("zámok dechtice-hradišco"), "zamok dechtice-hradisco");
        assert_eq!(to_ascii("Loulé"), "Loule");
        assert_eq!(to_ascii("Vordingborg Slotsruin ø"), "Vordingborg Slotsruin o");
    }
}
