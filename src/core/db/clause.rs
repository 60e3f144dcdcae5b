/// SQL Clause Model
///
/// Rewrites such as "turn this SELECT into a COUNT" or "replace the ORDER BY"
/// work on a structured view of the statement rather than on regex surgery of
/// its text. A small scanner splits the SQL into tokens while tracking string
/// literals, quoted identifiers and parenthesis depth, so keywords inside
/// subqueries or literals are never mistaken for clause boundaries. Clause
/// bodies are kept verbatim.
use crate::core::{GatewayError, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Word,
    Quoted,
    Placeholder,
    Open,
    Close,
    Comma,
    Other,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    /// Parenthesis depth the token sits at (an opening paren sits outside)
    pub depth: usize,
}

/// Splits `sql` into tokens. Quoted runs (`'..'`, `".."`, `` `..` ``) are
/// single tokens; backslash escapes inside string literals are honoured.
pub(crate) fn tokenize(sql: &str) -> Vec<Token> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let start = i;
        let kind = match b {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
                continue;
            }
            b'\'' | b'"' | b'`' => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\\' && b != b'`' {
                        i += 2;
                        continue;
                    }
                    if bytes[i] == b {
                        break;
                    }
                    i += 1;
                }
                i = (i + 1).min(bytes.len());
                TokenKind::Quoted
            }
            b'?' => {
                i += 1;
                TokenKind::Placeholder
            }
            b'(' => {
                i += 1;
                TokenKind::Open
            }
            b')' => {
                i += 1;
                TokenKind::Close
            }
            b',' => {
                i += 1;
                TokenKind::Comma
            }
            _ if is_word_byte(b) => {
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                TokenKind::Word
            }
            _ => {
                // Advance over a whole UTF-8 sequence
                i += 1;
                while i < bytes.len() && (bytes[i] & 0xC0) == 0x80 {
                    i += 1;
                }
                TokenKind::Other
            }
        };

        if kind == TokenKind::Close {
            depth = depth.saturating_sub(1);
        }
        tokens.push(Token {
            kind,
            start,
            end: i,
            depth,
        });
        if kind == TokenKind::Open {
            depth += 1;
        }
    }

    tokens
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b == b'.' || b == b'*'
}

/// Number of `?` placeholders outside literals.
pub(crate) fn count_placeholders(sql: &str) -> usize {
    tokenize(sql)
        .iter()
        .filter(|t| t.kind == TokenKind::Placeholder)
        .count()
}

/// Finds the keyword sequence `words` at depth 0, starting at token `from`.
/// Returns the token index of the first word and the byte offsets spanning the
/// whole keyword.
fn find_keyword(sql: &str, tokens: &[Token], words: &[&str], from: usize) -> Option<(usize, usize, usize)> {
    'outer: for idx in from..tokens.len() {
        for (offset, word) in words.iter().enumerate() {
            match tokens.get(idx + offset) {
                Some(t)
                    if t.kind == TokenKind::Word
                        && t.depth == 0
                        && sql[t.start..t.end].eq_ignore_ascii_case(word) => {}
                _ => continue 'outer,
            }
        }
        let last = &tokens[idx + words.len() - 1];
        return Some((idx, tokens[idx].start, last.end));
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Clause {
    Where,
    GroupBy,
    Having,
    OrderBy,
    Limit,
}

const CLAUSE_KEYWORDS: [(Clause, &[&str]); 5] = [
    (Clause::Where, &["WHERE"]),
    (Clause::GroupBy, &["GROUP", "BY"]),
    (Clause::Having, &["HAVING"]),
    (Clause::OrderBy, &["ORDER", "BY"]),
    (Clause::Limit, &["LIMIT"]),
];

/// A SELECT statement split into its top-level clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectStatement {
    pub select: String,
    pub from: String,
    pub where_clause: Option<String>,
    pub group_by: Option<String>,
    pub having: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<String>,
}

impl SelectStatement {
    pub fn parse(sql: &str) -> Result<Self> {
        let sql = sql.trim().trim_end_matches(';').trim_end();
        let tokens = tokenize(sql);

        let (_, _, select_end) = match tokens.first() {
            Some(t) if sql[t.start..t.end].eq_ignore_ascii_case("SELECT") => (0, t.start, t.end),
            _ => {
                return Err(GatewayError::Validation(format!(
                    "Invalid SQL statement: expected SELECT in `{}`",
                    sql
                )))
            }
        };
        let (from_idx, from_start, from_end) = find_keyword(sql, &tokens, &["FROM"], 1)
            .ok_or_else(|| {
                GatewayError::Validation(format!("Invalid SQL statement: missing FROM in `{}`", sql))
            })?;

        let mut found: Vec<(Clause, usize, usize)> = CLAUSE_KEYWORDS
            .iter()
            .filter_map(|(clause, words)| {
                find_keyword(sql, &tokens, words, from_idx + 1).map(|(_, start, end)| (*clause, start, end))
            })
            .collect();
        found.sort_by_key(|(_, start, _)| *start);

        let from_body_end = found.first().map(|(_, start, _)| *start).unwrap_or(sql.len());
        let mut statement = SelectStatement {
            select: sql[select_end..from_start].trim().to_string(),
            from: sql[from_end..from_body_end].trim().to_string(),
            where_clause: None,
            group_by: None,
            having: None,
            order_by: None,
            limit: None,
        };

        for (i, (clause, _, body_start)) in found.iter().enumerate() {
            let body_end = found.get(i + 1).map(|(_, start, _)| *start).unwrap_or(sql.len());
            let body = Some(sql[*body_start..body_end].trim().to_string());
            match clause {
                Clause::Where => statement.where_clause = body,
                Clause::GroupBy => statement.group_by = body,
                Clause::Having => statement.having = body,
                Clause::OrderBy => statement.order_by = body,
                Clause::Limit => statement.limit = body,
            }
        }

        Ok(statement)
    }

    /// Adds a predicate to the WHERE clause with AND. An existing clause that
    /// contains a top-level OR is parenthesized first.
    pub fn and_where(&mut self, predicate: &str) {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) if has_top_level_or(&existing) => format!("({}) AND {}", existing, predicate),
            Some(existing) => format!("{} AND {}", existing, predicate),
            None => predicate.to_string(),
        });
    }

    /// Output column names of the select list: aliases where given, otherwise
    /// the bare column of a (possibly qualified) identifier. Expressions
    /// without an alias and `*` are skipped.
    pub fn output_columns(&self) -> Vec<String> {
        split_top_level(&self.select)
            .into_iter()
            .filter_map(|item| {
                let tokens = tokenize(item);
                let words: Vec<&Token> = tokens.iter().filter(|t| t.depth == 0).collect();
                if let Some(pos) = words
                    .iter()
                    .position(|t| t.kind == TokenKind::Word && item[t.start..t.end].eq_ignore_ascii_case("AS"))
                {
                    return words.get(pos + 1).map(|t| unquote_identifier(&item[t.start..t.end]));
                }
                match tokens.as_slice() {
                    [single] if single.kind == TokenKind::Word || single.kind == TokenKind::Quoted => {
                        let text = &item[single.start..single.end];
                        let column = text.rsplit('.').next().unwrap_or(text);
                        if column == "*" {
                            None
                        } else {
                            Some(unquote_identifier(column))
                        }
                    }
                    _ => None,
                }
            })
            .collect()
    }
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT {} FROM {}", self.select, self.from)?;
        if let Some(where_clause) = &self.where_clause {
            write!(f, " WHERE {}", where_clause)?;
        }
        if let Some(group_by) = &self.group_by {
            write!(f, " GROUP BY {}", group_by)?;
        }
        if let Some(having) = &self.having {
            write!(f, " HAVING {}", having)?;
        }
        if let Some(order_by) = &self.order_by {
            write!(f, " ORDER BY {}", order_by)?;
        }
        if let Some(limit) = &self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        Ok(())
    }
}

/// An UPDATE statement reduced to its target and filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStatement {
    pub target: String,
    pub assignments: String,
    pub where_clause: Option<String>,
}

impl UpdateStatement {
    pub fn parse(sql: &str) -> Result<Self> {
        let sql = sql.trim().trim_end_matches(';').trim_end();
        let tokens = tokenize(sql);

        let update_end = match tokens.first() {
            Some(t) if sql[t.start..t.end].eq_ignore_ascii_case("UPDATE") => t.end,
            _ => {
                return Err(GatewayError::Validation(format!(
                    "Invalid SQL statement: expected UPDATE in `{}`",
                    sql
                )))
            }
        };
        let (set_idx, set_start, set_end) = find_keyword(sql, &tokens, &["SET"], 1).ok_or_else(|| {
            GatewayError::Validation(format!("Invalid SQL statement: missing SET in `{}`", sql))
        })?;

        let tail_start = [&["ORDER", "BY"][..], &["LIMIT"][..]]
            .iter()
            .filter_map(|words| find_keyword(sql, &tokens, words, set_idx + 1))
            .map(|(_, start, _)| start)
            .min()
            .unwrap_or(sql.len());

        let (assignments, where_clause) = match find_keyword(sql, &tokens, &["WHERE"], set_idx + 1) {
            Some((_, where_start, where_end)) if where_start < tail_start => (
                sql[set_end..where_start].trim().to_string(),
                Some(sql[where_end..tail_start].trim().to_string()),
            ),
            _ => (sql[set_end..tail_start].trim().to_string(), None),
        };

        Ok(UpdateStatement {
            target: sql[update_end..set_start].trim().to_string(),
            assignments,
            where_clause,
        })
    }
}

/// Splits on commas at depth 0.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for token in tokenize(text) {
        if token.kind == TokenKind::Comma && token.depth == 0 {
            parts.push(text[start..token.start].trim());
            start = token.end;
        }
    }
    parts.push(text[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

fn has_top_level_or(text: &str) -> bool {
    tokenize(text)
        .iter()
        .any(|t| t.depth == 0 && t.kind == TokenKind::Word && text[t.start..t.end].eq_ignore_ascii_case("OR"))
}

fn unquote_identifier(text: &str) -> String {
    text.trim_matches('`').to_string()
}
