//! Deterministic text-to-chunk splitter with overlap (§4.5).

use regex::Regex;
use std::sync::OnceLock;

fn sentence_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([.!?]+)").expect("sentence boundary regex is valid"))
}

/// Splits documents into overlapping chunks bounded by `chunk_size` characters.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.max(1).saturating_sub(1)),
        }
    }

    /// Splits `text` into chunks. Empty input yields an empty list; input at
    /// or under `chunk_size` yields a single chunk.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        if text.chars().count() <= self.chunk_size {
            return vec![text.to_string()];
        }

        let sentences = self.split_into_sentences(text);
        let mut chunks = Vec::new();
        let mut current = String::new();

        for sentence in sentences {
            if current.chars().count() + sentence.chars().count() > self.chunk_size {
                if !current.is_empty() {
                    chunks.push(current.trim().to_string());
                    current = self.carry_overlap(&current) + &sentence;
                } else if sentence.chars().count() > self.chunk_size {
                    chunks.extend(self.split_long_sentence(&sentence));
                    current = String::new();
                } else {
                    current = sentence;
                }
            } else if current.is_empty() {
                current = sentence;
            } else {
                current.push(' ');
                current.push_str(&sentence);
            }
        }

        if !current.is_empty() {
            chunks.push(current.trim().to_string());
        }

        chunks
    }

    fn carry_overlap(&self, chunk: &str) -> String {
        let chars: Vec<char> = chunk.chars().collect();
        let overlap_start = chars.len().saturating_sub(self.chunk_overlap);
        chars[overlap_start..].iter().collect()
    }

    fn split_into_sentences(&self, text: &str) -> Vec<String> {
        let parts: Vec<&str> = sentence_boundary().split(text).collect();
        let delimiters: Vec<&str> = sentence_boundary()
            .find_iter(text)
            .map(|m| m.as_str())
            .collect();

        let mut sentences = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            let delim = delimiters.get(i).copied().unwrap_or("");
            let sentence = format!("{part}{delim}");
            let trimmed = sentence.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
        }
        sentences
    }

    fn split_long_sentence(&self, sentence: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();

        for word in sentence.split_whitespace() {
            if current.chars().count() + word.chars().count() + 1 > self.chunk_size {
                if !current.is_empty() {
                    chunks.push(current.trim().to_string());
                    current = word.to_string();
                } else {
                    let truncated: String = word.chars().take(self.chunk_size).collect();
                    chunks.push(truncated);
                    current = String::new();
                }
            } else if current.is_empty() {
                current = word.to_string();
            } else {
                current.push(' ');
                current.push_str(word);
            }
        }

        if !current.is_empty() {
            chunks.push(current.trim().to_string());
        }
        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collapses runs of whitespace to single spaces, matching the property in §4.5:
    /// concatenating chunks' non-overlap regions equals the input modulo whitespace.
    fn normalize_whitespace(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(Chunker::new(100, 10).split("").is_empty());
    }

    #[test]
    fn short_input_yields_single_chunk() {
        let chunker = Chunker::new(1000, 200);
        let chunks = chunker.split("Machine learning is a subset of artificial intelligence.");
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn long_input_is_split_with_overlap() {
        let chunker = Chunker::new(40, 10);
        let text = "Sentence one is here. Sentence two follows it. Sentence three wraps up the paragraph. Sentence four adds more length still.";
        let chunks = chunker.split(text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 40 + 10);
        }
    }

    #[test]
    fn long_word_is_hard_truncated() {
        let chunker = Chunker::new(10, 2);
        let text = "supercalifragilisticexpialidocious is a long word that keeps going and going";
        let chunks = chunker.split(text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10 || c.chars().count() <= 10 + 2));
    }

    #[test]
    fn concatenation_preserves_input_modulo_whitespace() {
        let chunker = Chunker::new(30, 5);
        let text = "One short sentence. Another short sentence follows here. And a third one to be sure.";
        let chunks = chunker.split(text);
        let joined = normalize_whitespace(&chunks.join(" "));
        let normalized_input = normalize_whitespace(text);
        for word in normalized_input.split(' ') {
            assert!(joined.contains(word), "missing word: {word}");
        }
    }

    #[test]
    fn overlap_is_clamped_to_chunk_size() {
        let chunker = Chunker::new(5, 50);
        assert!(chunker.chunk_overlap < chunker.chunk_size);
    }
}
