//! Statement validator - the safety gate in front of execution.
//!
//! Rules run in a fixed order and the first violation wins:
//! 1. read-only (must start with SELECT)
//! 2. no denylisted verb anywhere in the text
//! 3. a single statement (one trailing terminator allowed)
//! 4. identifiers resolve against the schema allowlist, when one is configured
//! 5. length ceiling

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::lexer::{Token, TokenKind, raw_words, tokenize};
use super::schema::SchemaAllowlist;

/// Verbs rejected by default
pub const DEFAULT_DENIED_VERBS: [&str; 10] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "CREATE", "GRANT", "REVOKE", "MERGE",
];

/// Default statement length ceiling, in characters
pub const DEFAULT_MAX_STATEMENT_CHARS: usize = 4000;

/// Words that never name a table or column.
const KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "AND", "OR", "NOT", "IN", "IS", "NULL", "LIKE", "ILIKE", "GLOB", "REGEXP",
    "BETWEEN", "AS", "ON", "JOIN", "LEFT", "RIGHT", "INNER", "OUTER", "FULL", "CROSS", "NATURAL", "USING",
    "GROUP", "BY", "ORDER", "HAVING", "LIMIT", "OFFSET", "DISTINCT", "ALL", "ASC", "DESC", "NULLS", "CASE",
    "WHEN", "THEN", "ELSE", "END", "UNION", "EXCEPT", "INTERSECT", "WITH", "RECURSIVE", "TRUE", "FALSE",
    "EXISTS", "CAST", "COLLATE", "ESCAPE", "OVER", "PARTITION", "UNBOUNDED", "PRECEDING", "FOLLOWING",
    "WINDOW", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP",
];

/// Keywords that end a FROM list
const CLAUSE_BREAKERS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "ON", "USING", "UNION", "EXCEPT", "INTERSECT", "WINDOW",
    "SELECT", "OFFSET", "FETCH",
];

/// Closed set of rule violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotReadOnly,
    ForbiddenVerb,
    MultiStatement,
    UnknownIdentifier,
    TooLong,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NotReadOnly => "not_read_only",
            RejectReason::ForbiddenVerb => "forbidden_verb",
            RejectReason::MultiStatement => "multi_statement",
            RejectReason::UnknownIdentifier => "unknown_identifier",
            RejectReason::TooLong => "too_long",
        }
    }

    /// The rule as stated back to the generator.
    pub fn rule(&self) -> &'static str {
        match self {
            RejectReason::NotReadOnly => "the statement must be a single read-only SELECT query",
            RejectReason::ForbiddenVerb => "the statement must not contain data-modifying or schema-changing verbs",
            RejectReason::MultiStatement => "only one statement is allowed; do not chain statements with ';'",
            RejectReason::UnknownIdentifier => "only tables and columns from the provided schema may be referenced",
            RejectReason::TooLong => "the statement exceeds the maximum allowed length",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Accepted,
    Rejected { reason: RejectReason, detail: String },
}

impl ValidationVerdict {
    fn rejected(reason: RejectReason, detail: impl Into<String>) -> Self {
        ValidationVerdict::Rejected {
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationVerdict::Accepted)
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            ValidationVerdict::Accepted => None,
            ValidationVerdict::Rejected { reason, .. } => Some(*reason),
        }
    }

    /// Message fed back into generation after a rejection.
    pub fn repair_message(&self) -> Option<String> {
        match self {
            ValidationVerdict::Accepted => None,
            ValidationVerdict::Rejected { reason, detail } => Some(format!(
                "Your query violated rule '{}': {} ({})",
                reason.as_str(),
                reason.rule(),
                detail
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub max_statement_chars: usize,
    pub denied_verbs: Vec<String>,
    pub allowlist: Option<SchemaAllowlist>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_statement_chars: DEFAULT_MAX_STATEMENT_CHARS,
            denied_verbs: DEFAULT_DENIED_VERBS.iter().map(|v| v.to_string()).collect(),
            allowlist: None,
        }
    }
}

/// Stateless statement gate. Same input, same verdict.
#[derive(Debug, Clone)]
pub struct StatementValidator {
    max_statement_chars: usize,
    denied_verbs: HashSet<String>,
    allowlist: Option<SchemaAllowlist>,
}

impl Default for StatementValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

impl StatementValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            max_statement_chars: config.max_statement_chars,
            denied_verbs: config.denied_verbs.iter().map(|v| v.to_ascii_uppercase()).collect(),
            allowlist: config.allowlist.filter(|a| !a.is_empty()),
        }
    }

    pub fn allowlist(&self) -> Option<&SchemaAllowlist> {
        self.allowlist.as_ref()
    }

    pub fn validate(&self, statement: &str) -> ValidationVerdict {
        let tokens = tokenize(statement);

        match tokens.first() {
            Some(first) if first.is_word("SELECT") => {}
            Some(first) => {
                return ValidationVerdict::rejected(
                    RejectReason::NotReadOnly,
                    format!("statement starts with '{}'", first.text),
                );
            }
            None => return ValidationVerdict::rejected(RejectReason::NotReadOnly, "statement is empty"),
        }

        if let Some(verb) = raw_words(statement).find(|w| self.denied_verbs.contains(w)) {
            return ValidationVerdict::rejected(RejectReason::ForbiddenVerb, format!("forbidden verb {}", verb));
        }

        if let Some(pos) = tokens.iter().position(|t| t.is_symbol(';'))
            && pos + 1 < tokens.len()
        {
            return ValidationVerdict::rejected(
                RejectReason::MultiStatement,
                format!("content after terminator: '{}'", tokens[pos + 1].text),
            );
        }

        if let Some(allowlist) = &self.allowlist {
            let unknown = unknown_identifiers(&tokens, allowlist);
            if !unknown.is_empty() {
                return ValidationVerdict::rejected(
                    RejectReason::UnknownIdentifier,
                    format!("unknown identifiers: {}", unknown.join(", ")),
                );
            }
        }

        let length = statement.chars().count();
        if length > self.max_statement_chars {
            return ValidationVerdict::rejected(
                RejectReason::TooLong,
                format!("{} characters, limit is {}", length, self.max_statement_chars),
            );
        }

        ValidationVerdict::Accepted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefRole {
    Table,
    /// Name before a `.`
    Qualifier,
    /// Name after a `.`
    Column,
    /// Bare name: column, table or alias
    Any,
}

fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

/// Words that are keywords only in one position (`NULLS FIRST`, `CURRENT ROW`,
/// `ROWS BETWEEN`) and otherwise may name a column.
fn is_contextual_keyword(tokens: &[Token<'_>], i: usize) -> bool {
    let token = &tokens[i];
    if token.kind != TokenKind::Word {
        return false;
    }
    let prev = i.checked_sub(1).map(|p| &tokens[p]);
    let next = tokens.get(i + 1);

    match token.text.to_ascii_uppercase().as_str() {
        "FIRST" | "LAST" => prev.is_some_and(|p| p.is_word("NULLS")),
        "CURRENT" => next.is_some_and(|n| n.is_word("ROW")),
        "ROW" => prev.is_some_and(|p| p.is_word("CURRENT")),
        "ROWS" | "RANGE" | "GROUPS" => next.is_some_and(|n| {
            n.is_word("BETWEEN") || n.is_word("UNBOUNDED") || n.is_word("CURRENT") || n.kind == TokenKind::Number
        }),
        _ => false,
    }
}

/// Alias written without `AS`: any name right after `)`, or a name closing a
/// select-list item (`title name,` / `'x' label FROM`).
fn is_implicit_alias(prev: Option<&Token<'_>>, next: Option<&Token<'_>>, in_select_list: bool) -> bool {
    let Some(prev) = prev else {
        return false;
    };
    if prev.is_symbol(')') {
        return true;
    }

    let ends_expression = match prev.kind {
        TokenKind::Word => !is_keyword(prev.text),
        TokenKind::QuotedIdent | TokenKind::StringLit | TokenKind::Number => true,
        TokenKind::Symbol => false,
    };
    let ends_item = next.is_none_or(|n| n.is_symbol(',') || n.is_symbol(';') || n.is_word("FROM"));
    in_select_list && ends_expression && ends_item
}

fn is_clause_breaker(token: &Token<'_>) -> bool {
    token.kind == TokenKind::Word && CLAUSE_BREAKERS.iter().any(|k| token.text.eq_ignore_ascii_case(k))
}

/// Identifiers that resolve to nothing in the allowlist, in order of appearance.
fn unknown_identifiers(tokens: &[Token<'_>], allowlist: &SchemaAllowlist) -> Vec<String> {
    let mut aliases: HashSet<String> = HashSet::new();
    let mut refs: Vec<(String, RefRole)> = Vec::new();

    // true for parens opened by a function call
    let mut paren_stack: Vec<bool> = Vec::new();
    let mut in_from_list = false;
    let mut in_select_list = false;
    let mut after_table = false;

    for (i, token) in tokens.iter().enumerate() {
        let prev = i.checked_sub(1).map(|p| &tokens[p]);
        let next = tokens.get(i + 1);

        if token.kind == TokenKind::Symbol {
            match token.text {
                "(" => paren_stack.push(prev.is_some_and(|p| p.kind == TokenKind::Word && !is_keyword(p.text))),
                ")" => {
                    paren_stack.pop();
                }
                _ => {}
            }
            if !token.is_symbol(',') {
                after_table = false;
            }
            continue;
        }

        let Some(name) = token.ident_name() else {
            after_table = false;
            continue;
        };

        if token.kind == TokenKind::Word && (is_keyword(token.text) || is_contextual_keyword(tokens, i)) {
            let inside_function = paren_stack.last().copied().unwrap_or(false);
            if (token.is_word("FROM") || token.is_word("JOIN")) && !inside_function {
                in_from_list = true;
                in_select_list = false;
            } else if is_clause_breaker(token) {
                in_from_list = false;
                in_select_list = token.is_word("SELECT");
            }
            after_table = false;
            continue;
        }

        let lowered = name.to_lowercase();

        // function call
        if token.kind == TokenKind::Word && next.is_some_and(|n| n.is_symbol('(')) {
            after_table = false;
            continue;
        }

        if prev.is_some_and(|p| p.is_word("AS")) {
            aliases.insert(lowered);
            after_table = false;
            continue;
        }

        if prev.is_some_and(|p| p.is_symbol('.')) {
            refs.push((lowered, RefRole::Column));
            after_table = false;
            continue;
        }

        if next.is_some_and(|n| n.is_symbol('.')) {
            refs.push((lowered, RefRole::Qualifier));
            after_table = false;
            continue;
        }

        if is_implicit_alias(prev, next, in_select_list) {
            aliases.insert(lowered);
            after_table = false;
            continue;
        }

        if in_from_list {
            let starts_table_ref = prev.is_some_and(|p| p.is_word("FROM") || p.is_word("JOIN") || p.is_symbol(','));
            if starts_table_ref {
                refs.push((lowered, RefRole::Table));
                after_table = true;
                continue;
            }
            if after_table {
                aliases.insert(lowered);
                after_table = false;
                continue;
            }
        }

        refs.push((lowered, RefRole::Any));
        after_table = false;
    }

    let mut unknown: Vec<String> = Vec::new();
    for (name, role) in refs {
        let known = match role {
            RefRole::Table => allowlist.has_table(&name),
            RefRole::Qualifier => allowlist.has_table(&name) || aliases.contains(&name),
            RefRole::Column => allowlist.has_column(&name),
            RefRole::Any => allowlist.has_column(&name) || allowlist.has_table(&name) || aliases.contains(&name),
        };
        if !known && !unknown.contains(&name) {
            unknown.push(name);
        }
    }
    unknown
}
