//! Search-text canonicalization.
//!
//! Both the search term and every searched field go through [`normalize`]
//! before substring comparison, so matching ignores case, diacritics,
//! Arabic/Persian presentation variants and the script of the digits.

/// Canonical form of `text`: lower-cased, trimmed, inner whitespace collapsed,
/// diacritics dropped, letter variants and native digits folded.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_whitespace() || c == '\u{200C}' {
            pending_space = !out.is_empty();
            continue;
        }
        if is_mark(c) { continue; }
        if pending_space { out.push(' '); pending_space = false; }
        fold_into(c, &mut out);
    }
    out
}

/// Same as [`normalize`], with a missing value normalizing to `""`.
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize).unwrap_or_default()
}

/// True when the normalized `haystack` contains the normalized `needle`.
/// An empty needle matches everything.
pub fn contains_normalized(haystack: &str, needle: &str) -> bool {
    let n = normalize(needle);
    n.is_empty() || normalize(haystack).contains(&n)
}

fn is_mark(c: char) -> bool {
    matches!(c,
        '\u{0300}'..='\u{036F}'   // combining diacritics
        | '\u{064B}'..='\u{065F}' // harakat
        | '\u{0670}'              // superscript alef
        | '\u{0640}'              // tatweel
        | '\u{06D6}'..='\u{06ED}' // quranic annotation marks
        | '\u{200D}' | '\u{200E}' | '\u{200F}' | '\u{FEFF}')
}

fn fold_into(c: char, out: &mut String) {
    let mapped = match c {
        // Arabic-Indic and Extended Arabic-Indic digits
        '\u{0660}'..='\u{0669}' => char::from_digit(c as u32 - 0x0660, 10).unwrap_or(c),
        '\u{06F0}'..='\u{06F9}' => char::from_digit(c as u32 - 0x06F0, 10).unwrap_or(c),
        // Yeh / Kaf / Alef / Heh variants
        '\u{064A}' | '\u{0649}' | '\u{0626}' => '\u{06CC}',
        '\u{0643}' => '\u{06A9}',
        '\u{0623}' | '\u{0625}' | '\u{0622}' | '\u{0671}' => '\u{0627}',
        '\u{0629}' | '\u{06C0}' | '\u{06C1}' => '\u{0647}',
        '\u{0624}' => '\u{0648}',
        // Latin letters with diacritics
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => 'c',
        'ď' | 'đ' | 'ð' => 'd',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => 'g',
        'ĥ' | 'ħ' => 'h',
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => 'i',
        'ĵ' => 'j',
        'ķ' => 'k',
        'ĺ' | 'ļ' | 'ľ' | 'ŀ' | 'ł' => 'l',
        'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => 'o',
        'ŕ' | 'ŗ' | 'ř' => 'r',
        'ś' | 'ŝ' | 'ş' | 'š' | 'ș' => 's',
        'ţ' | 'ť' | 'ŧ' | 'ț' => 't',
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
        'ŵ' => 'w',
        'ý' | 'ÿ' | 'ŷ' => 'y',
        'ź' | 'ż' | 'ž' => 'z',
        'ß' => { out.push_str("ss"); return; }
        'æ' => { out.push_str("ae"); return; }
        'œ' => { out.push_str("oe"); return; }
        // Fullwidth ASCII
        '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
        _ => c,
    };
    out.push(mapped);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_and_whitespace() {
        assert_eq!(normalize("  Apex   Transport \n"), "apex transport");
        assert_eq!(normalize("APEX"), normalize("ApEx"));
        assert_eq!(normalize(""), "");
        assert_eq!(normalize_opt(None), "");
    }

    #[test]
    fn latin_diacritics_fold() {
        assert_eq!(normalize("Âpéx Trånspört"), "apex transport");
        // decomposed e + combining acute
        assert_eq!(normalize("Ape\u{0301}x"), "apex");
        assert_eq!(normalize("Straße"), "strasse");
    }

    #[test]
    fn arabic_variants_fold() {
        // Arabic yeh/kaf vs Persian yeh/keheh
        assert_eq!(normalize("\u{0643}\u{064A}"), normalize("\u{06A9}\u{06CC}"));
        // alef with hamza, harakat and tatweel are dropped or folded
        assert_eq!(normalize("\u{0623}\u{064E}\u{0640}\u{0628}"), "\u{0627}\u{0628}");
    }

    #[test]
    fn native_digits_become_ascii() {
        assert_eq!(normalize("\u{06F1}\u{06F2}\u{06F3}"), "123");
        assert_eq!(normalize("\u{0661}\u{0660}"), "10");
        assert_eq!(normalize("ＡＢＣ１"), "abc1");
    }

    #[test]
    fn contains_after_normalization() {
        assert!(contains_normalized("Apex Transport", "apex"));
        assert!(contains_normalized("Âpex Transport", "APEX"));
        assert!(contains_normalized("anything", "   "));
        assert!(!contains_normalized("Apex", "transport"));
    }
}
