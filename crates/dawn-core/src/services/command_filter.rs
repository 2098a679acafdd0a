//! Streaming filter for legacy `<command>` markup.
//!
//! Backends without native tool calling embed tool invocations inline as
//! `<command>{json}</command>` blocks. The filter is a small state machine
//! over a growing input: it strips those blocks (nesting-aware) from the
//! visible token stream while the worker later extracts the full blocks from
//! the completed response for execution. Input arrives in arbitrary chunk
//! boundaries, so a partially-matched tag is held until it resolves.

const OPEN_TAG: &str = "<command>";
const CLOSE_TAG: &str = "</command>";

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    /// Visible text; `pending` is a proper prefix of the opening tag.
    Outside { pending: String },
    /// Hidden text at `depth` nested blocks; `pending` is a proper prefix
    /// of either tag.
    Inside { depth: usize, pending: String },
}

/// Nesting-aware `<command>` stripper for streamed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTagFilter {
    state: State,
}

impl CommandTagFilter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Outside {
                pending: String::new(),
            },
        }
    }

    /// Feed one chunk, returning the visible portion.
    pub fn push(&mut self, chunk: &str) -> String {
        let mut visible = String::with_capacity(chunk.len());
        for c in chunk.chars() {
            self.step(c, &mut visible);
        }
        visible
    }

    /// Flush at end of stream: an unresolved partial tag outside a block is
    /// ordinary visible text after all.
    pub fn finish(&mut self) -> String {
        match &mut self.state {
            State::Outside { pending } => std::mem::take(pending),
            State::Inside { .. } => String::new(),
        }
    }

    /// True while the filter is inside a command block.
    #[must_use]
    pub fn in_command(&self) -> bool {
        matches!(self.state, State::Inside { .. })
    }

    fn step(&mut self, c: char, visible: &mut String) {
        match &mut self.state {
            State::Outside { pending } => {
                let mut candidate = pending.clone();
                candidate.push(c);
                if candidate == OPEN_TAG {
                    self.state = State::Inside {
                        depth: 1,
                        pending: String::new(),
                    };
                } else if OPEN_TAG.starts_with(candidate.as_str()) {
                    *pending = candidate;
                } else {
                    // the held prefix turned out to be plain text
                    visible.push_str(pending);
                    pending.clear();
                    if c == '<' {
                        pending.push(c);
                    } else {
                        visible.push(c);
                    }
                }
            }
            State::Inside { depth, pending } => {
                let mut candidate = pending.clone();
                candidate.push(c);
                if candidate == OPEN_TAG {
                    *depth += 1;
                    pending.clear();
                } else if candidate == CLOSE_TAG {
                    *depth -= 1;
                    pending.clear();
                    if *depth == 0 {
                        self.state = State::Outside {
                            pending: String::new(),
                        };
                    }
                } else if OPEN_TAG.starts_with(candidate.as_str())
                    || CLOSE_TAG.starts_with(candidate.as_str())
                {
                    *pending = candidate;
                } else {
                    // hidden content; drop the held prefix
                    pending.clear();
                    if c == '<' {
                        pending.push(c);
                    }
                }
            }
        }
    }
}

impl Default for CommandTagFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the payloads of all outermost `<command>` blocks.
#[must_use]
pub fn extract_commands(text: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut cursor = 0;
    while let Some(open) = text[cursor..].find(OPEN_TAG) {
        let start = cursor + open + OPEN_TAG.len();
        // walk to the matching close, counting nested opens
        let mut depth = 1;
        let mut scan = start;
        let mut end = None;
        while depth > 0 {
            let next_open = text[scan..].find(OPEN_TAG);
            let next_close = text[scan..].find(CLOSE_TAG);
            match (next_open, next_close) {
                (Some(o), Some(cl)) if o < cl => {
                    depth += 1;
                    scan += o + OPEN_TAG.len();
                }
                (_, Some(cl)) => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(scan + cl);
                    }
                    scan += cl + CLOSE_TAG.len();
                }
                // unterminated block: ignore the remainder
                _ => break,
            }
        }
        match end {
            Some(end) => {
                commands.push(text[start..end].trim().to_string());
                cursor = end + CLOSE_TAG.len();
            }
            None => break,
        }
    }
    commands
}

/// Remove all command markup from a completed response.
#[must_use]
pub fn strip_command_markup(text: &str) -> String {
    let mut filter = CommandTagFilter::new();
    let mut out = filter.push(text);
    out.push_str(&filter.finish());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `text` one char at a time, the worst chunking the stream can
    /// produce, and collect the visible output.
    fn filter_char_by_char(text: &str) -> String {
        let mut filter = CommandTagFilter::new();
        let mut out = String::new();
        for c in text.chars() {
            out.push_str(&filter.push(&c.to_string()));
        }
        out.push_str(&filter.finish());
        out
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(filter_char_by_char("hello world"), "hello world");
    }

    #[test]
    fn test_command_block_hidden() {
        let input = "before <command>{\"device\":\"lamp\"}</command> after";
        assert_eq!(filter_char_by_char(input), "before  after");
    }

    #[test]
    fn test_nested_blocks_hidden() {
        let input = "a<command>x<command>y</command>z</command>b";
        assert_eq!(filter_char_by_char(input), "ab");
    }

    #[test]
    fn test_lookalike_tag_is_visible() {
        assert_eq!(filter_char_by_char("<comment>hi</comment>"), "<comment>hi</comment>");
        assert_eq!(filter_char_by_char("a < b and a <= c"), "a < b and a <= c");
    }

    #[test]
    fn test_partial_tag_at_end_flushes_as_text() {
        assert_eq!(filter_char_by_char("tail <comma"), "tail <comma");
        assert_eq!(filter_char_by_char("tail <comman"), "tail <comman");
    }

    #[test]
    fn test_unterminated_block_stays_hidden() {
        assert_eq!(filter_char_by_char("visible <command>never closed"), "visible ");
    }

    #[test]
    fn test_chunk_boundary_inside_tag() {
        let mut filter = CommandTagFilter::new();
        let mut out = String::new();
        out.push_str(&filter.push("text <com"));
        out.push_str(&filter.push("mand>hidden</com"));
        out.push_str(&filter.push("mand> more"));
        out.push_str(&filter.finish());
        assert_eq!(out, "text  more");
    }

    #[test]
    fn test_double_open_angle() {
        assert_eq!(filter_char_by_char("<<command>x</command>"), "<");
    }

    #[test]
    fn test_extract_commands() {
        let text = "a <command>{\"a\":1}</command> b <command> {\"b\":2} </command>";
        let commands = extract_commands(text);
        assert_eq!(commands, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_extract_outermost_only() {
        let text = "<command>outer <command>inner</command> tail</command>";
        let commands = extract_commands(text);
        assert_eq!(commands, vec!["outer <command>inner</command> tail"]);
    }

    #[test]
    fn test_extract_unterminated_ignored() {
        assert!(extract_commands("<command>{\"a\":1}").is_empty());
    }

    #[test]
    fn test_strip_command_markup() {
        let text = "turning it on <command>{\"device\":\"lamp\",\"on\":true}</command>done";
        assert_eq!(strip_command_markup(text), "turning it on done");
    }
}
