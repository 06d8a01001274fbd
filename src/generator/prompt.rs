//! Prompt rendering and model-output cleaning

use std::fmt::Write as _;

use super::{GenerationError, GenerationRequest};
use crate::domain::ExchangeOutcome;
use crate::validation::where_predicates;

/// Phrases that mark an utterance as refining the previous question
const FOLLOW_UP_PHRASES: &[&str] = &[
    "only",
    "only from",
    "same",
    "those",
    "these",
    "them",
    "count them",
    "best",
    "more",
    "less",
    "also",
    "additionally",
    "and then",
    "now",
    "then",
    "instead",
    "similar",
    "like the",
    "such as",
    "what about",
    "how about",
];

const RULES: &str = "\
RESPONSIBILITIES:

1. Use the conversation history to maintain context.
2. For context-dependent requests (\"only from 2010\", \"same country\", \"those movies\",
   \"count them\", \"top 5\") modify the PREVIOUS SQL instead of starting from scratch.
3. Preserve previous filters unless the user changes the topic.
4. If the user changes the topic completely, ignore the old context.
5. When given an error from a previous attempt, analyze it and produce a corrected query.
6. For counts use SELECT COUNT(*) ... WHERE ...
7. For top/best use ORDER BY <column> DESC LIMIT n.
8. For free-text filters use LIKE '%value%'.

STRICT RULES:

- Output ONLY one raw SQL SELECT statement and nothing else.
- Do NOT use markdown, backticks, code blocks, explanations or comments.
- Do NOT generate INSERT, UPDATE, DELETE, DROP, ALTER, TRUNCATE, CREATE, GRANT, REVOKE or MERGE.
- Do NOT chain statements with ';'.
- Reference only the tables and columns listed in the schema, spelled exactly as listed.
- Use SQL accepted by SQLite.";

/// True when the utterance reads like a refinement of the previous question.
pub fn is_follow_up(utterance: &str) -> bool {
    let words: Vec<String> = utterance
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect();

    let padded = format!(" {} ", words.join(" "));
    if FOLLOW_UP_PHRASES.iter().any(|phrase| padded.contains(&format!(" {} ", phrase))) {
        return true;
    }

    // "top 5", "top 10"
    words
        .windows(2)
        .any(|pair| pair[0] == "top" && pair[1].chars().all(|c| c.is_ascii_digit()))
}

/// System prompt: role, schema, rules.
pub fn system_prompt(schema: &str) -> String {
    let mut out = String::from(
        "You are a SQL generation agent with conversation memory and self-correction ability. \
         You translate questions about the data into a single read-only SQL query.\n\n",
    );
    if schema.trim().is_empty() {
        out.push_str("SCHEMA: not available; use only tables and columns named by the user.\n\n");
    } else {
        let _ = write!(out, "SCHEMA:\n\n{}\n\n", schema.trim());
    }
    out.push_str(RULES);
    out
}

/// User prompt: history, follow-up hint, question, repair feedback.
pub fn user_prompt(request: &GenerationRequest) -> String {
    let mut out = String::new();

    if request.history.is_empty() {
        out.push_str("Conversation History: None (starting fresh)\n");
    } else {
        out.push_str("Conversation History:\n");
        for (i, exchange) in request.history.iter().enumerate() {
            let _ = writeln!(out, "{}. User: {}", i + 1, exchange.utterance);
            if let Some(sql) = &exchange.generated_statement {
                let _ = writeln!(out, "   SQL: {}", sql);
            }
            match &exchange.outcome {
                ExchangeOutcome::Success(summary) => {
                    let _ = writeln!(out, "   Result: {}", summary);
                }
                ExchangeOutcome::Failure { kind, message } => {
                    let _ = writeln!(out, "   Failed ({}): {}", kind, message);
                }
            }
        }
    }

    if is_follow_up(&request.utterance)
        && let Some(previous) = request.last_successful()
        && let Some(sql) = &previous.generated_statement
    {
        out.push_str(
            "\nHint: This appears to be a context-dependent request. Modify the previous SQL \
             instead of starting from scratch.\n",
        );
        let _ = writeln!(out, "Previous SQL: {}", sql);
        let filters = where_predicates(sql);
        if !filters.is_empty() {
            out.push_str("Filters in effect (keep them unless the user changes them):\n");
            for filter in filters {
                let _ = writeln!(out, "- {}", filter);
            }
        }
    }

    let _ = writeln!(out, "\nUser question: {}", request.utterance);

    if let Some(repair) = &request.repair {
        out.push_str("\n## Previous Attempt Feedback\n");
        let _ = writeln!(
            out,
            "Attempt {} failed with {}: {}",
            repair.attempt.saturating_sub(1),
            repair.kind,
            repair.message
        );
        if let Some(failed) = &repair.failed_statement {
            let _ = writeln!(out, "Failed SQL: {}", failed);
        }
        out.push_str("Fix this error while preserving the intent of the question.\n");
    }

    out.push_str("\nGenerate the SQL query now:");
    out
}

/// Strip markdown fences, a leading `sql` tag and surrounding whitespace,
/// then require something that looks like a query.
pub fn clean_output(raw: &str) -> Result<String, GenerationError> {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        text = rest;
        if let Some(end) = text.find("```") {
            text = &text[..end];
        }
    }
    text = text.trim();

    if let Some(tag) = text.get(..3)
        && tag.eq_ignore_ascii_case("sql")
    {
        let rest = &text[3..];
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            text = rest.trim_start();
        }
    }
    let text = text.trim();

    if text.is_empty() {
        return Err(GenerationError::Empty);
    }

    let first_word: String = text
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    if first_word != "SELECT" && first_word != "WITH" {
        let preview: String = text.chars().take(80).collect();
        return Err(GenerationError::NotAQuery(preview));
    }

    Ok(text.to_string())
}
