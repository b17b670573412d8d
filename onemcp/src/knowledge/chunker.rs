//! Semantic markdown chunker for DOCS_CHUNK nodes.
//!
//! Documents split along heading-scoped sections. Protected blocks (fenced
//! code, tables, lists, HTML) are emitted whole; oversized plain sections
//! split by paragraph then by sentence. Every chunk's estimated token count
//! lies in `[min_tokens, max_tokens]` except a single protected block that
//! alone exceeds the maximum. When overlap is configured, the trailing tokens
//! of the previous chunk are prepended to the next chunk only when the next
//! chunk does not already start with that text.

use regex::Regex;
use std::sync::OnceLock;

/// ≈4 characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[derive(Clone, Copy, Debug)]
pub struct ChunkerConfig {
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_tokens: 60,
            max_tokens: 400,
            overlap_tokens: 0,
        }
    }
}

/// One emitted chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Heading trail active at the chunk's first line (outermost first).
    pub section_path: Vec<String>,
    pub content: String,
    pub token_estimate: usize,
}

#[derive(Clone, Debug)]
struct Unit {
    text: String,
    tokens: usize,
    protected: bool,
    heading: bool,
    section_path: Vec<String>,
}

/// Heading-aware splitter.
pub struct MarkdownChunker {
    config: ChunkerConfig,
}

fn list_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*+]|\d+\.)\s+").unwrap())
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.*)$").unwrap())
}

impl MarkdownChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let units = self.into_units(text);
        let mut chunks = self.pack(units);
        self.merge_undersized(&mut chunks);
        if self.config.overlap_tokens > 0 {
            self.apply_overlap(&mut chunks);
        }
        chunks
    }

    /// First pass: segments with section paths. Protected blocks stay whole;
    /// oversized plain paragraphs split into sentence units.
    fn into_units(&self, text: &str) -> Vec<Unit> {
        let lines: Vec<&str> = text.lines().collect();
        let mut units = Vec::new();
        let mut section_path: Vec<String> = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            let line = lines[i];
            if line.trim().is_empty() {
                i += 1;
                continue;
            }

            if let Some(caps) = heading_re().captures(line) {
                let level = caps[1].len();
                let title = caps[2].trim().to_string();
                section_path.truncate(level.saturating_sub(1));
                section_path.push(title);
                units.push(Unit {
                    text: line.to_string(),
                    tokens: estimate_tokens(line),
                    protected: false,
                    heading: true,
                    section_path: section_path.clone(),
                });
                i += 1;
                continue;
            }

            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                let fence = &trimmed[..3];
                let mut block = vec![line];
                i += 1;
                while i < lines.len() {
                    block.push(lines[i]);
                    if lines[i].trim_start().starts_with(fence) {
                        i += 1;
                        break;
                    }
                    i += 1;
                }
                units.push(self.protected_unit(block.join("\n"), &section_path));
                continue;
            }

            if trimmed.starts_with('|') {
                let mut block = Vec::new();
                while i < lines.len() && lines[i].trim_start().starts_with('|') {
                    block.push(lines[i]);
                    i += 1;
                }
                units.push(self.protected_unit(block.join("\n"), &section_path));
                continue;
            }

            if list_line_re().is_match(line) {
                let mut block = Vec::new();
                while i < lines.len()
                    && (list_line_re().is_match(lines[i])
                        || (!lines[i].trim().is_empty() && lines[i].starts_with("  ")))
                {
                    block.push(lines[i]);
                    i += 1;
                }
                units.push(self.protected_unit(block.join("\n"), &section_path));
                continue;
            }

            if trimmed.starts_with('<') {
                let mut block = Vec::new();
                while i < lines.len() && !lines[i].trim().is_empty() {
                    block.push(lines[i]);
                    i += 1;
                }
                units.push(self.protected_unit(block.join("\n"), &section_path));
                continue;
            }

            // Plain paragraph: consecutive non-blank, non-structural lines.
            let mut block = Vec::new();
            while i < lines.len() {
                let l = lines[i];
                let t = l.trim_start();
                if l.trim().is_empty()
                    || heading_re().is_match(l)
                    || t.starts_with("```")
                    || t.starts_with("~~~")
                    || t.starts_with('|')
                    || list_line_re().is_match(l)
                {
                    break;
                }
                block.push(l);
                i += 1;
            }
            let paragraph = block.join("\n");
            let tokens = estimate_tokens(&paragraph);
            if tokens > self.config.max_tokens {
                for sentence in split_sentences(&paragraph) {
                    units.push(Unit {
                        tokens: estimate_tokens(&sentence),
                        text: sentence,
                        protected: false,
                        heading: false,
                        section_path: section_path.clone(),
                    });
                }
            } else {
                units.push(Unit {
                    text: paragraph,
                    tokens,
                    protected: false,
                    heading: false,
                    section_path: section_path.clone(),
                });
            }
        }
        units
    }

    fn protected_unit(&self, text: String, section_path: &[String]) -> Unit {
        Unit {
            tokens: estimate_tokens(&text),
            text,
            protected: true,
            heading: false,
            section_path: section_path.to_vec(),
        }
    }

    /// Second pass: greedy packing into `[min, max]` chunks. Headings prefer
    /// starting a new chunk once the current one has reached the minimum.
    fn pack(&self, units: Vec<Unit>) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut current: Vec<Unit> = Vec::new();
        let mut current_tokens = 0usize;

        let flush = |current: &mut Vec<Unit>, current_tokens: &mut usize, chunks: &mut Vec<Chunk>| {
            if current.is_empty() {
                return;
            }
            let section_path = current[0].section_path.clone();
            let content = current
                .iter()
                .map(|u| u.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            chunks.push(Chunk {
                token_estimate: estimate_tokens(&content),
                section_path,
                content,
            });
            current.clear();
            *current_tokens = 0;
        };

        for unit in units {
            let would_overflow = current_tokens + unit.tokens > self.config.max_tokens;
            let heading_break = unit.heading && current_tokens >= self.config.min_tokens;
            if !current.is_empty() && (would_overflow || heading_break) {
                flush(&mut current, &mut current_tokens, &mut chunks);
            }
            if unit.tokens > self.config.max_tokens {
                // Irreducible oversized block (protected, or a single giant
                // sentence): emitted alone.
                let mut single = vec![unit];
                let mut t = 0;
                flush(&mut single, &mut t, &mut chunks);
                continue;
            }
            current_tokens += unit.tokens;
            current.push(unit);
        }
        flush(&mut current, &mut current_tokens, &mut chunks);
        chunks
    }

    /// Post-pass: fold undersized chunks into a neighbor when the result
    /// stays within the maximum.
    fn merge_undersized(&self, chunks: &mut Vec<Chunk>) {
        let mut i = 0;
        while i < chunks.len() {
            if chunks[i].token_estimate >= self.config.min_tokens {
                i += 1;
                continue;
            }
            let merged_with_next = i + 1 < chunks.len()
                && chunks[i].token_estimate + chunks[i + 1].token_estimate
                    <= self.config.max_tokens;
            if merged_with_next {
                let next = chunks.remove(i + 1);
                let merged = format!("{}\n\n{}", chunks[i].content, next.content);
                chunks[i].token_estimate = estimate_tokens(&merged);
                chunks[i].content = merged;
                continue;
            }
            let merged_with_prev = i > 0
                && chunks[i - 1].token_estimate + chunks[i].token_estimate
                    <= self.config.max_tokens;
            if merged_with_prev {
                let small = chunks.remove(i);
                let prev = &mut chunks[i - 1];
                prev.content = format!("{}\n\n{}", prev.content, small.content);
                prev.token_estimate = estimate_tokens(&prev.content);
                continue;
            }
            i += 1;
        }
    }

    /// Prepends the previous chunk's trailing overlap to each chunk, skipping
    /// chunks that already start with that text so content never doubles.
    fn apply_overlap(&self, chunks: &mut [Chunk]) {
        for i in 1..chunks.len() {
            let tail = trailing_tokens(&chunks[i - 1].content, self.config.overlap_tokens);
            if tail.is_empty() {
                continue;
            }
            if chunks[i].content.starts_with(tail.trim_start()) {
                continue;
            }
            let merged = format!("{}\n\n{}", tail, chunks[i].content);
            chunks[i].token_estimate = estimate_tokens(&merged);
            chunks[i].content = merged;
        }
    }
}

/// Last ≈`tokens` tokens of `text`, rounded back to a word boundary.
fn trailing_tokens(text: &str, tokens: usize) -> String {
    let budget_chars = tokens * 4;
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= budget_chars {
        return text.to_string();
    }
    let mut start = chars.len() - budget_chars;
    while start < chars.len() && !chars[start].is_whitespace() {
        start += 1;
    }
    chars[start..].iter().collect::<String>().trim_start().to_string()
}

/// Sentence split on `.`, `!`, `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            if chars.peek().map(|n| n.is_whitespace()).unwrap_or(true) {
                let s = current.trim().to_string();
                if !s.is_empty() {
                    sentences.push(s);
                }
                current.clear();
            }
        }
    }
    let tail = current.trim().to_string();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}
