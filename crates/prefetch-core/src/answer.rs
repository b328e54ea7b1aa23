//! Answer-alias matching used to precompute `has_answer`.

/// Lowercase, strip ASCII punctuation, drop the articles `a`, `an`, `the`
/// and collapse whitespace.
pub fn normalize_answer(s: &str) -> String {
    let lowered: String = s
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();
    let without_articles = remove_articles(&lowered);
    without_articles.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when any normalized alias occurs in the normalized text.
pub fn text_has_answer<S: AsRef<str>>(answers: &[S], text: &str) -> bool {
    let text = normalize_answer(text);
    answers
        .iter()
        .any(|a| text.contains(&normalize_answer(a.as_ref())))
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// Whole-word replacement, word boundaries as in `\b(a|an|the)\b`.
fn remove_articles(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut word = String::new();
    for c in s.chars() {
        if is_word_char(c) {
            word.push(c);
            continue;
        }
        flush_word(&mut out, &mut word);
        out.push(c);
    }
    flush_word(&mut out, &mut word);
    out
}

fn flush_word(out: &mut String, word: &mut String) {
    match word.as_str() {
        "a" | "an" | "the" => out.push(' '),
        _ => out.push_str(word),
    }
    word.clear();
}
