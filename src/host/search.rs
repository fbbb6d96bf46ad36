//! Gmail-style search for the local mailbox.
//!
//! # Supported syntax
//!
//! **Free text**: `invoice` matches subject, from and to.
//!
//! **Field-specific**:
//! - `from:user@example.com` / `to:dest@example.com`
//! - `subject:invoice`
//! - `label:inbox`
//! - `filename:report.pdf`
//! - `rfc822msgid:<message-id@domain>`
//! - `has:attachment`
//!
//! **Date filters** (`YYYY-MM-DD` or `YYYY/MM/DD`, local calendar):
//! - `after:2024-01-01`: on or after that day
//! - `before:2024-06-01`: strictly before that day
//!
//! **Operators**: implicit AND, `OR`, `-term`, `"exact phrase"`.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, Utc};

use crate::model::query::tokenize;

/// Which field to search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchField {
    /// Subject + from + to.
    All,
    From,
    To,
    Subject,
    Label,
    Filename,
    MessageId,
}

/// How to match text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOperator {
    /// Case-insensitive substring match.
    Contains(String),
    /// Exact quoted phrase (still case-insensitive).
    Exact(String),
}

#[derive(Debug, Clone)]
pub struct SearchTerm {
    pub field: SearchField,
    pub operator: SearchOperator,
    pub negated: bool,
}

/// A parsed search string.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub terms: Vec<SearchTerm>,
    /// Inclusive lower bound on the local date.
    pub after: Option<NaiveDate>,
    /// Exclusive upper bound on the local date.
    pub before: Option<NaiveDate>,
    pub has_attachment: Option<bool>,
    /// Any term may match instead of all.
    pub is_or: bool,
}

/// What the matcher needs to know about a message.
#[derive(Debug, Clone, Default)]
pub struct MessageMeta {
    pub date: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub message_id: String,
    pub labels: Vec<String>,
    pub filenames: Vec<String>,
}

/// Parse a query string. Never fails; unknown syntax is free text.
pub fn parse_query(input: &str) -> SearchQuery {
    let mut query = SearchQuery::default();
    let tokens = tokenize(input.trim());
    query.is_or = tokens.iter().any(|t| t == "OR");

    for token in &tokens {
        if token == "OR" {
            continue;
        }

        let (negated, token) = match token.strip_prefix('-') {
            Some(stripped) if !stripped.is_empty() => (true, stripped),
            _ => (false, token.as_str()),
        };

        let field_term = |field: SearchField, value: &str| SearchTerm {
            field,
            operator: make_operator(value),
            negated,
        };

        if let Some(value) = token.strip_prefix("from:") {
            query.terms.push(field_term(SearchField::From, value));
        } else if let Some(value) = token.strip_prefix("to:") {
            query.terms.push(field_term(SearchField::To, value));
        } else if let Some(value) = token.strip_prefix("subject:") {
            query.terms.push(field_term(SearchField::Subject, value));
        } else if let Some(value) = token.strip_prefix("label:") {
            query.terms.push(field_term(SearchField::Label, value));
        } else if let Some(value) = token.strip_prefix("filename:") {
            query.terms.push(field_term(SearchField::Filename, value));
        } else if let Some(value) = token.strip_prefix("rfc822msgid:") {
            let bare = value.trim_start_matches('<').trim_end_matches('>');
            query.terms.push(field_term(SearchField::MessageId, bare));
        } else if let Some(value) = token.strip_prefix("has:") {
            if matches!(value, "attachment" | "attachments") {
                query.has_attachment = Some(!negated);
            }
        } else if let Some(value) = token.strip_prefix("after:") {
            query.after = parse_day(value);
        } else if let Some(value) = token.strip_prefix("before:") {
            query.before = parse_day(value);
        } else {
            query.terms.push(field_term(SearchField::All, token));
        }
    }

    query
}

/// Check a message against a parsed query.
///
/// Dates are compared in the calendar of `offset`, or the process timezone.
pub fn matches(meta: &MessageMeta, query: &SearchQuery, offset: Option<FixedOffset>) -> bool {
    let day = match offset {
        Some(tz) => meta.date.with_timezone(&tz).date_naive(),
        None => meta.date.with_timezone(&Local).date_naive(),
    };
    if query.after.is_some_and(|after| day < after) {
        return false;
    }
    if query.before.is_some_and(|before| day >= before) {
        return false;
    }
    if let Some(want) = query.has_attachment {
        if meta.filenames.is_empty() == want {
            return false;
        }
    }

    if query.terms.is_empty() {
        return true;
    }
    if query.is_or {
        query.terms.iter().any(|t| term_matches(meta, t))
    } else {
        query.terms.iter().all(|t| term_matches(meta, t))
    }
}

fn term_matches(meta: &MessageMeta, term: &SearchTerm) -> bool {
    let op = &term.operator;
    let raw_match = match term.field {
        SearchField::All => {
            matches_text(&meta.subject, op)
                || matches_text(&meta.from, op)
                || matches_text(&meta.to, op)
        }
        SearchField::From => matches_text(&meta.from, op),
        SearchField::To => matches_text(&meta.to, op),
        SearchField::Subject => matches_text(&meta.subject, op),
        SearchField::Label => meta.labels.iter().any(|l| matches_text(l, op)),
        SearchField::Filename => meta.filenames.iter().any(|f| matches_text(f, op)),
        SearchField::MessageId => matches_text(&meta.message_id, op),
    };

    raw_match != term.negated
}

fn matches_text(haystack: &str, op: &SearchOperator) -> bool {
    let haystack_lower = haystack.to_lowercase();
    match op {
        SearchOperator::Contains(needle) => haystack_lower.contains(needle),
        SearchOperator::Exact(phrase) => haystack_lower == *phrase,
    }
}

/// Quoted values match exactly, anything else as a substring.
fn make_operator(value: &str) -> SearchOperator {
    match value.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(unquoted) => SearchOperator::Exact(unquoted.to_lowercase()),
        None => SearchOperator::Contains(value.to_lowercase()),
    }
}

fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y/%m/%d"))
        .ok()
}
