//! Text cleanup and sentence segmentation for the audio pipeline.
//!
//! TTS engines want short, plain sentences: no markdown emphasis, no code
//! blocks, no headers. The audio worker synthesizes per sentence so playback
//! starts before the full reply is generated.

/// Upper bound on one synthesis unit, in characters. Sentences are merged
/// up to this limit; a single oversized sentence is split at clause
/// boundaries.
const MAX_SENTENCE_CHARS: usize = 320;

/// Strip formatting that reads badly when spoken.
#[must_use]
pub fn clean_for_speech(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_code_block = false;
    let mut code_noted = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            in_code_block = !in_code_block;
            code_noted = false;
            continue;
        }
        if in_code_block {
            if !code_noted {
                result.push_str("Code omitted. ");
                code_noted = true;
            }
            continue;
        }

        let line = trimmed
            .trim_start_matches('#')
            .trim_start_matches('>')
            .trim_start();
        let line = strip_emphasis(line);
        let line = strip_angle_tags(&line);
        let line = line.trim();
        if !line.is_empty() {
            if !result.is_empty() && !result.ends_with(' ') {
                result.push(' ');
            }
            result.push_str(line);
        }
    }

    collapse_spaces(&result)
}

fn strip_emphasis(text: &str) -> String {
    text.replace("**", "")
        .replace("__", "")
        .replace("~~", "")
        .replace(['*', '`'], "")
}

fn strip_angle_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn collapse_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

/// Split cleaned text into synthesis units: sentence boundaries at `.` `!`
/// `?` followed by whitespace, short sentences merged up to the cap,
/// oversized sentences split at clause boundaries.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let mut raw: Vec<String> = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = text.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let boundary = chars.get(i + 1).is_none_or(|next| next.is_whitespace());
            if boundary {
                let s = current.trim().to_string();
                if !s.is_empty() {
                    raw.push(s);
                }
                current.clear();
            }
        }
    }
    let tail = current.trim().to_string();
    if !tail.is_empty() {
        raw.push(tail);
    }

    // merge short sentences, split oversized ones
    let mut units: Vec<String> = Vec::new();
    let mut acc = String::new();
    for sentence in raw {
        if sentence.len() > MAX_SENTENCE_CHARS {
            if !acc.is_empty() {
                units.push(std::mem::take(&mut acc));
            }
            units.extend(split_clauses(&sentence));
            continue;
        }
        if !acc.is_empty() && acc.len() + 1 + sentence.len() > MAX_SENTENCE_CHARS {
            units.push(std::mem::take(&mut acc));
        }
        if !acc.is_empty() {
            acc.push(' ');
        }
        acc.push_str(&sentence);
    }
    if !acc.is_empty() {
        units.push(acc);
    }
    units
}

/// Split one oversized sentence at clause punctuation, hard-splitting at
/// word boundaries as a last resort.
fn split_clauses(sentence: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for part in sentence.split_inclusive([',', ';', ':']) {
        if !current.is_empty() && current.len() + part.len() > MAX_SENTENCE_CHARS {
            chunks.push(std::mem::take(&mut current).trim().to_string());
        }
        current.push_str(part);
    }
    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
        .into_iter()
        .flat_map(|c| {
            if c.len() > MAX_SENTENCE_CHARS {
                hard_split(&c)
            } else {
                vec![c]
            }
        })
        .collect()
}

fn hard_split(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > MAX_SENTENCE_CHARS {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emphasis_stripped() {
        assert_eq!(
            clean_for_speech("**Lights** are *on* now."),
            "Lights are on now."
        );
    }

    #[test]
    fn test_code_block_replaced() {
        let input = "Run this:\n```sh\nreboot\n```\nThen wait.";
        assert_eq!(clean_for_speech(input), "Run this: Code omitted. Then wait.");
    }

    #[test]
    fn test_headers_and_quotes_unwrapped() {
        assert_eq!(clean_for_speech("## Status\n> all good"), "Status all good");
    }

    #[test]
    fn test_angle_tags_removed() {
        assert_eq!(clean_for_speech("done <br> next"), "done next");
    }

    #[test]
    fn test_split_simple_sentences() {
        let units = split_sentences("First. Second! Third?");
        assert_eq!(units, vec!["First. Second! Third?"]);
    }

    #[test]
    fn test_split_respects_cap() {
        let long: Vec<String> = (0..12)
            .map(|i| format!("Sentence number {i} carries a reasonable amount of words to grow the total."))
            .collect();
        let text = long.join(" ");
        let units = split_sentences(&text);
        assert!(units.len() > 1);
        for unit in &units {
            assert!(unit.len() <= MAX_SENTENCE_CHARS + 80, "unit too long: {}", unit.len());
        }
    }

    #[test]
    fn test_abbreviation_mid_number_not_split() {
        let units = split_sentences("It costs 3.50 dollars today.");
        assert_eq!(units, vec!["It costs 3.50 dollars today."]);
    }

    #[test]
    fn test_empty_input() {
        assert!(split_sentences("   ").is_empty());
    }
}
