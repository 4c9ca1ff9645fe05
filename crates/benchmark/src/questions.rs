//! Preset benchmark questions.

use std::io;
use std::path::Path;

/// Asked when no dataset file is available.
pub const FALLBACK_QUESTIONS: &[&str] = &[
    "What is the capital of France?",
    "Explain in two sentences how a rainbow forms.",
    "Write a short poem about the sea.",
    "What are the main differences between a virus and a bacterium?",
    "Summarize the plot of Romeo and Juliet in three sentences.",
];

/// One question per non-blank line, trimmed.
pub fn parse_questions(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read the dataset at `path`, falling back to [`FALLBACK_QUESTIONS`] when
/// no path is given, the file does not exist or it holds no questions.
pub fn load_questions(path: Option<&Path>) -> crate::Result<Vec<String>> {
    let fallback = || FALLBACK_QUESTIONS.iter().map(|q| q.to_string()).collect();

    let Some(path) = path else {
        return Ok(fallback());
    };

    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(path = ?path, "questions file missing, using built-in questions");
            return Ok(fallback());
        }
        Err(e) => return Err(e.into()),
    };

    let questions = parse_questions(&text);
    if questions.is_empty() {
        tracing::warn!(path = ?path, "questions file is empty, using built-in questions");
        return Ok(fallback());
    }
    tracing::debug!(path = ?path, count = questions.len(), "questions loaded");
    Ok(questions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_blank_lines() {
        let questions = parse_questions("  first?\n\n second? \r\n   \n");
        assert_eq!(questions, vec!["first?", "second?"]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qa_dataset.txt");
        std::fs::write(&path, "a?\nb?\nc?\n").unwrap();

        let questions = load_questions(Some(&path)).unwrap();
        assert_eq!(questions, vec!["a?", "b?", "c?"]);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let questions = load_questions(Some(&dir.path().join("nope.txt"))).unwrap();
        assert_eq!(questions.len(), FALLBACK_QUESTIONS.len());
        assert_eq!(load_questions(None).unwrap(), questions);
    }

    #[test]
    fn test_empty_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "\n\n").unwrap();
        assert_eq!(load_questions(Some(&path)).unwrap()[0], FALLBACK_QUESTIONS[0]);
    }
}
