//! Comparison keys and script-based language helpers.
//! `normalize_for_match` is the key every glossary strategy compares on;
//! the script heuristics drive target-language switching and the
//! auto-detect retry.

/// Canonical comparison key: lower-cased, with everything except ASCII word
/// characters, CJK ideographs, Kana and Hangul syllables removed.
pub fn normalize_for_match(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .filter(|&c| is_match_char(c))
        .collect()
}

#[inline]
fn is_match_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || is_cjk(c) || is_kana(c) || is_hangul(c)
}

#[inline]
fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

#[inline]
fn is_kana(c: char) -> bool {
    ('\u{3040}'..='\u{30ff}').contains(&c) || ('\u{31f0}'..='\u{31ff}').contains(&c)
}

#[inline]
fn is_hangul(c: char) -> bool {
    ('\u{ac00}'..='\u{d7af}').contains(&c)
}

/// Guess a language code from the scripts present in `text`.
/// Priority: all-ASCII → en, Kana → ja, Hangul → ko, CJK ideographs → zh.
pub fn infer_lang_from_script(text: &str) -> Option<&'static str> {
    if text.trim().is_empty() {
        return None;
    }
    if text.is_ascii() {
        return Some("en");
    }
    if text.chars().any(is_kana) {
        return Some("ja");
    }
    if text.chars().any(is_hangul) {
        return Some("ko");
    }
    if text.chars().any(is_cjk) {
        return Some("zh");
    }
    None
}

/// Pick a target language for auto-detected input.
/// Pure Chinese goes to English; Japanese, Korean or Latin text goes to
/// Chinese. Anything else keeps `current`.
pub fn suggest_target_lang<'a>(text: &str, current: &'a str) -> &'a str {
    let has_cjk = text.chars().any(is_cjk);
    let has_kana_or_hangul = text.chars().any(|c| is_kana(c) || is_hangul(c));

    if has_cjk && !has_kana_or_hangul {
        "en"
    } else if has_kana_or_hangul || text.chars().any(|c| c.is_ascii_alphabetic()) {
        "zh"
    } else {
        current
    }
}

/// Detects the dominant language of `text` using whatlang.
/// Returns an ISO 639-1 code or None if detection is unreliable.
pub fn detect_language(text: &str) -> Option<String> {
    let info = whatlang::detect(text)?;
    if !info.is_reliable() {
        return None;
    }
    Some(lang_to_code(info.lang()))
}

fn lang_to_code(lang: whatlang::Lang) -> String {
    use whatlang::Lang::*;
    match lang {
        Eng => "en",
        Cmn => "zh",
        Jpn => "ja",
        Kor => "ko",
        Fra => "fr",
        Deu => "de",
        Spa => "es",
        Rus => "ru",
        _ => "other",
    }
    .to_string()
}
