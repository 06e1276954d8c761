//! Derived reading metrics: word count, Flesch-Kincaid grade and reading
//! time. Everything here is a pure function of its inputs.

use scraper::{ElementRef, Html};
use serde::Serialize;

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "br", "div", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "blockquote",
    "tr", "td", "th", "section", "article",
];
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReadingMetrics {
    pub word_count: u32,
    pub reading_level: u32,
    /// Minutes
    pub reading_time: u32,
}

/// Compute metrics for `content` read at `words_per_minute`
pub fn compute(content: &str, words_per_minute: u32) -> ReadingMetrics {
    let text = plain_text(content);
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return ReadingMetrics::default();
    }

    let word_count = words.len() as u32;
    let reading_time = word_count.div_ceil(words_per_minute.max(1));

    ReadingMetrics {
        word_count,
        reading_level: flesch_kincaid_grade(&text, &words),
        reading_time,
    }
}

fn flesch_kincaid_grade(text: &str, words: &[&str]) -> u32 {
    let sentences = count_sentences(text).max(1) as f64;
    let syllables: usize = words.iter().map(|word| count_syllables(word)).sum();
    let words = words.len() as f64;

    let grade = 0.39 * (words / sentences) + 11.8 * (syllables as f64 / words) - 15.59;
    grade.round().max(0.0) as u32
}

/// Runs of `.`, `!` or `?` each end one sentence
fn count_sentences(text: &str) -> usize {
    let mut count = 0;
    let mut in_terminator = false;
    for c in text.chars() {
        if matches!(c, '.' | '!' | '?') {
            if !in_terminator {
                count += 1;
            }
            in_terminator = true;
        } else {
            in_terminator = false;
        }
    }
    count
}

/// Vowel-group heuristic: each run of vowels is a syllable, a trailing
/// silent `e` is dropped, and any word with letters has at least one.
fn count_syllables(word: &str) -> usize {
    let letters: Vec<char> = word
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if letters.is_empty() {
        return 0;
    }

    let is_vowel = |c: char| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
    let mut groups = 0;
    let mut previous_vowel = false;
    for &c in &letters {
        let vowel = is_vowel(c);
        if vowel && !previous_vowel {
            groups += 1;
        }
        previous_vowel = vowel;
    }

    let len = letters.len();
    if groups > 1 && letters[len - 1] == 'e' && !(len >= 2 && letters[len - 2] == 'l') {
        groups -= 1;
    }

    groups.max(1)
}

/// Strip markup and collapse whitespace
pub fn plain_text(markup: &str) -> String {
    if !markup.contains('<') {
        return normalize_whitespace(markup);
    }

    let fragment = Html::parse_fragment(markup);
    let mut text = String::new();
    for node in fragment.root_element().descendants() {
        if let Some(element) = node.value().as_element() {
            if BLOCK_ELEMENTS.contains(&element.name()) {
                text.push(' ');
            }
            continue;
        }
        let Some(fragment_text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|ancestor| HIDDEN_ELEMENTS.contains(&ancestor.value().name()));
        if !hidden {
            text.push_str(fragment_text);
        }
    }

    normalize_whitespace(&text)
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Excerpt of at most `max_chars` characters, cut on a word boundary
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let text = normalize_whitespace(text);
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text;
    };

    let head = &text[..cut];
    let head = match head.rfind(' ') {
        Some(space) if space > 0 => &head[..space],
        _ => head,
    };
    format!("{}...", head.trim_end_matches(|c: char| c.is_ascii_punctuation() || c == ' '))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_content() {
        assert_eq!(compute("", 238), ReadingMetrics::default());
        assert_eq!(compute("   \n\t", 238), ReadingMetrics::default());
        assert_eq!(compute("<p> </p>", 238).reading_time, 0);
    }

    #[test]
    fn test_reading_time_rounds_up() {
        let content = "word ".repeat(1190);
        let metrics = compute(&content, 238);
        assert_eq!(metrics.word_count, 1190);
        assert_eq!(metrics.reading_time, 5);

        let metrics = compute(&"word ".repeat(1191), 238);
        assert_eq!(metrics.reading_time, 6);
    }

    #[test]
    fn test_short_content_takes_a_minute() {
        assert_eq!(compute("Hello.", 238).reading_time, 1);
    }

    #[test]
    fn test_markup_is_stripped() {
        let metrics = compute("<p>One <b>two</b></p><p>three</p><script>var a = 1;</script>", 238);
        assert_eq!(metrics.word_count, 3);
    }

    #[test]
    fn test_deterministic() {
        let content = "The quick brown fox jumps over the lazy dog. It was not amused!";
        assert_eq!(compute(content, 200), compute(content, 200));
    }

    #[test]
    fn test_reading_level_simple_text_is_low() {
        let metrics = compute("The cat sat on the mat. The dog ran.", 238);
        assert_eq!(metrics.reading_level, 0);
    }

    #[test]
    fn test_reading_level_complex_text_is_higher() {
        let simple = compute("The cat sat on the mat. The dog ran.", 238);
        let complex = compute(
            "Interdisciplinary collaboration necessitates comprehensive communication \
             infrastructure, particularly regarding organizational responsibilities.",
            238,
        );
        assert!(complex.reading_level > simple.reading_level);
        assert!(complex.reading_level >= 12);
    }

    #[test]
    fn test_count_syllables() {
        assert_eq!(count_syllables("cat"), 1);
        assert_eq!(count_syllables("table"), 2);
        assert_eq!(count_syllables("make"), 1);
        assert_eq!(count_syllables("reading"), 2);
        assert_eq!(count_syllables("1999"), 0);
    }

    #[test]
    fn test_count_sentences() {
        assert_eq!(count_sentences("One. Two! Three?"), 3);
        assert_eq!(count_sentences("Wait... what?!"), 2);
        assert_eq!(count_sentences("no terminator"), 0);
    }

    #[test]
    fn test_plain_text_keeps_word_boundaries() {
        assert_eq!(plain_text("<p>one</p><p>two</p>"), "one two");
        assert_eq!(plain_text("bo<b>ld</b>"), "bold");
    }

    #[test]
    fn test_excerpt_cuts_on_word_boundary() {
        assert_eq!(excerpt("short text", 50), "short text");
        assert_eq!(excerpt("alpha beta gamma delta", 13), "alpha beta...");
    }
}
