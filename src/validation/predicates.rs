//! WHERE-clause predicate extraction.
//!
//! Used to tell the generator which filters the previous statement had in
//! effect, so follow-ups like "only from 2020" can keep them.

use super::lexer::{Token, TokenKind, tokenize};

const CLAUSE_END: &[&str] = &[
    "GROUP", "ORDER", "HAVING", "LIMIT", "UNION", "EXCEPT", "INTERSECT", "WINDOW", "OFFSET", "FETCH",
];

/// Top-level AND-ed predicates of the outermost WHERE clause, whitespace-normalized.
///
/// A top-level OR makes the whole clause a single predicate.
pub fn where_predicates(sql: &str) -> Vec<String> {
    let tokens = tokenize(sql);

    let mut depth = 0usize;
    let mut start = None;
    for (i, token) in tokens.iter().enumerate() {
        match token.text {
            "(" if token.kind == TokenKind::Symbol => depth += 1,
            ")" if token.kind == TokenKind::Symbol => depth = depth.saturating_sub(1),
            _ if depth == 0 && token.is_word("WHERE") => {
                start = Some(i + 1);
                break;
            }
            _ => {}
        }
    }
    let Some(start) = start else {
        return Vec::new();
    };

    let mut clause: Vec<&Token<'_>> = Vec::new();
    depth = 0;
    for token in &tokens[start..] {
        if token.is_symbol('(') {
            depth += 1;
        } else if token.is_symbol(')') {
            if depth == 0 {
                break;
            }
            depth -= 1;
        } else if depth == 0 && (token.is_symbol(';') || CLAUSE_END.iter().any(|k| token.is_word(k))) {
            break;
        }
        clause.push(token);
    }

    if clause.is_empty() {
        return Vec::new();
    }

    let has_top_level_or = {
        let mut depth = 0usize;
        clause.iter().any(|t| {
            if t.is_symbol('(') {
                depth += 1;
            } else if t.is_symbol(')') {
                depth = depth.saturating_sub(1);
            }
            depth == 0 && t.is_word("OR")
        })
    };
    if has_top_level_or {
        return vec![render(sql, &clause)];
    }

    let mut predicates = Vec::new();
    let mut current: Vec<&Token<'_>> = Vec::new();
    let mut depth = 0usize;
    let mut pending_between = false;
    for token in clause {
        if token.is_symbol('(') {
            depth += 1;
        } else if token.is_symbol(')') {
            depth = depth.saturating_sub(1);
        } else if depth == 0 && token.is_word("BETWEEN") {
            pending_between = true;
        } else if depth == 0 && token.is_word("AND") {
            if pending_between {
                pending_between = false;
            } else {
                if !current.is_empty() {
                    predicates.push(render(sql, &current));
                }
                current.clear();
                continue;
            }
        }
        current.push(token);
    }
    if !current.is_empty() {
        predicates.push(render(sql, &current));
    }
    predicates
}

/// Source text spanned by `tokens`, with whitespace runs collapsed.
fn render(sql: &str, tokens: &[&Token<'_>]) -> String {
    let (Some(first), Some(last)) = (tokens.first(), tokens.last()) else {
        return String::new();
    };
    sql[first.start..last.end()].split_whitespace().collect::<Vec<_>>().join(" ")
}
