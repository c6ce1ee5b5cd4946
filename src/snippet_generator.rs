//! Sentence-scoring snippet extraction around query terms.
//!
//! Grounded in `original_source/src/snippet/snippet_generator.py`.

const MAX_LENGTH: usize = 120;

pub struct SnippetGenerator;

impl SnippetGenerator {
    /// Picks the first sentence scoring highest by distinct lowercased query-term
    /// membership, truncated to `MAX_LENGTH` characters with a trailing ellipsis. Falls
    /// back to a truncated head of `content` when no sentence contains any term, or
    /// when the (normalized) query has no terms at all.
    pub fn generate(content: &str, normalized_query: &str) -> String {
        if content.is_empty() {
            return String::new();
        }

        let terms: Vec<&str> = normalized_query
            .split_whitespace()
            .filter(|t| !t.is_empty())
            .collect();

        if terms.is_empty() {
            return Self::truncate(content);
        }

        let sentences = Self::split_sentences(content);

        let mut best_sentence: &str = "";
        let mut max_score: i64 = -1;

        for sentence in &sentences {
            let lower = sentence.to_lowercase();
            let score = terms.iter().filter(|term| lower.contains(*term)).count() as i64;
            if score > max_score {
                max_score = score;
                best_sentence = sentence;
            }
        }

        if max_score <= 0 {
            return Self::truncate(content);
        }

        Self::truncate(best_sentence)
    }

    /// Splits on `.`, `!`, `?`, and the Japanese full stop `。`, keeping the delimiter
    /// attached to its preceding sentence.
    fn split_sentences(content: &str) -> Vec<&str> {
        let mut sentences = Vec::new();
        let mut start = 0;
        let mut chars = content.char_indices().peekable();

        while let Some((idx, ch)) = chars.next() {
            if matches!(ch, '.' | '!' | '?' | '。') {
                let end = idx + ch.len_utf8();
                // Consume any run of immediately-following delimiters/whitespace as
                // part of the same break, mirroring the original's
                // `re.split(r'(?<=[.!。])\s+', content)`.
                let mut boundary = end;
                while let Some(&(next_idx, next_ch)) = chars.peek() {
                    if next_ch.is_whitespace() {
                        boundary = next_idx + next_ch.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                sentences.push(content[start..end].trim());
                start = boundary;
            }
        }
        if start < content.len() {
            sentences.push(content[start..].trim());
        }
        sentences.into_iter().filter(|s| !s.is_empty()).collect()
    }

    fn truncate(text: &str) -> String {
        if text.chars().count() <= MAX_LENGTH {
            return text.to_string();
        }
        let truncated: String = text.chars().take(MAX_LENGTH).collect();
        format!("{truncated}...")
    }
}
