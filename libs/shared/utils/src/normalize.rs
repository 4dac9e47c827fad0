use unicode_normalization::UnicodeNormalization;

/// Fixed synonym map for the pt-BR salon lexicon. Keys and values are already
/// in normalized form so the whole pipeline stays idempotent.
const SYNONYMS: &[(&str, &str)] = &[
    ("progressiva", "escova progressiva"),
    ("luzes", "mechas luzes"),
    ("pe e mao", "mao e pe"),
];

/// Canonical text normalization applied once on catalog ingest and once on
/// every query: lowercase, strip accents, fold `/ - _ •` to spaces, collapse
/// whitespace, then the synonym map.
///
/// Idempotent: `normalize_text(normalize_text(s)) == normalize_text(s)`.
pub fn normalize_text(raw: &str) -> String {
    let lowered = raw.to_lowercase();

    // NFD decomposition, then drop the combining marks.
    let unaccented: String = lowered
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect();

    let folded: String = unaccented
        .chars()
        .map(|c| match c {
            '/' | '-' | '_' | '•' => ' ',
            _ => c,
        })
        .collect();

    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");

    apply_synonyms(&collapsed)
}

/// Whole-token synonym substitution. A mapping is skipped when its expansion
/// is already present, which keeps repeated application stable.
fn apply_synonyms(text: &str) -> String {
    let mut result = text.to_string();
    for (from, to) in SYNONYMS {
        if contains_tokens(&result, to) {
            continue;
        }
        result = replace_tokens(&result, from, to);
    }
    result
}

fn contains_tokens(haystack: &str, needle: &str) -> bool {
    let hay: Vec<&str> = haystack.split(' ').collect();
    let need: Vec<&str> = needle.split(' ').collect();
    if need.is_empty() || hay.len() < need.len() {
        return false;
    }
    hay.windows(need.len()).any(|w| w == need.as_slice())
}

fn replace_tokens(haystack: &str, from: &str, to: &str) -> String {
    let hay: Vec<&str> = haystack.split(' ').filter(|t| !t.is_empty()).collect();
    let need: Vec<&str> = from.split(' ').collect();
    if need.is_empty() || hay.len() < need.len() {
        return haystack.to_string();
    }

    let mut out: Vec<&str> = Vec::with_capacity(hay.len());
    let mut i = 0;
    while i < hay.len() {
        if i + need.len() <= hay.len() && &hay[i..i + need.len()] == need.as_slice() {
            out.extend(to.split(' '));
            i += need.len();
        } else {
            out.push(hay[i]);
            i += 1;
        }
    }
    out.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_strips_accents() {
        assert_eq!(normalize_text("Coloração"), "coloracao");
        assert_eq!(normalize_text("ESCOVA Modelada"), "escova modelada");
    }

    #[test]
    fn folds_separators_and_collapses_whitespace() {
        assert_eq!(normalize_text("corte  -  masculino"), "corte masculino");
        assert_eq!(normalize_text("mecha/californiana"), "mecha californiana");
        assert_eq!(normalize_text("unha_gel • simples"), "unha gel simples");
    }

    #[test]
    fn applies_synonym_map() {
        assert_eq!(normalize_text("Progressiva"), "escova progressiva");
        assert_eq!(normalize_text("luzes"), "mechas luzes");
        assert_eq!(normalize_text("Pé e Mão"), "mao e pe");
    }

    #[test]
    fn synonym_does_not_stack_on_expanded_form() {
        assert_eq!(normalize_text("escova progressiva"), "escova progressiva");
        assert_eq!(normalize_text("mechas luzes"), "mechas luzes");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            "Pé e Mão",
            "Progressiva",
            "Luzes / Mechas",
            "COLORAÇÃO-2025 completa",
            "escova progressiva",
        ] {
            let once = normalize_text(raw);
            assert_eq!(normalize_text(&once), once, "not idempotent for {:?}", raw);
        }
    }
}
