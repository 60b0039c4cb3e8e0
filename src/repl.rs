use nu_ansi_term::{Color, Style};
use reedline::{
    Highlighter, Prompt, PromptEditMode, PromptHistorySearch, PromptHistorySearchStatus,
    StyledText, ValidationResult, Validator,
};
use std::borrow::Cow;

use crate::parser::Number;
use crate::tokenizer::{tokenize, TokenKind};

#[derive(Clone)]
pub struct ReplPrompt;

impl Prompt for ReplPrompt {
    fn render_prompt_left(&self) -> Cow<str> {
        Cow::Borrowed("cloak")
    }

    fn render_prompt_right(&self) -> Cow<str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _edit_mode: PromptEditMode) -> Cow<str> {
        Cow::Borrowed("❯ ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<str> {
        Cow::Borrowed("  ... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "failing ",
        };
        Cow::Owned(format!(
            "({}reverse-search: {}) ",
            prefix, history_search.term
        ))
    }
}

pub struct ReplValidator;

impl Validator for ReplValidator {
    fn validate(&self, line: &str) -> ValidationResult {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            return ValidationResult::Complete;
        }

        let mut delimiters = Vec::new();
        let mut in_string: Option<char> = None;
        let mut escaped = false;
        let mut in_comment = false;

        for c in line.chars() {
            if c == '\n' {
                in_comment = false;
            }
            if in_comment {
                continue;
            }
            match (in_string, c) {
                (Some(_), _) if escaped => escaped = false,
                (Some(_), '\\') => escaped = true,
                (Some(quote), _) if c == quote => in_string = None,
                (Some(_), _) => {}

                (None, '"') | (None, '\'') => in_string = Some(c),
                (None, '#') => in_comment = true,
                (None, '{') | (None, '(') | (None, '[') => delimiters.push(c),
                (None, '}') => {
                    if delimiters.pop() != Some('{') {
                        return ValidationResult::Complete;
                    }
                }
                (None, ')') => {
                    if delimiters.pop() != Some('(') {
                        return ValidationResult::Complete;
                    }
                }
                (None, ']') => {
                    if delimiters.pop() != Some('[') {
                        return ValidationResult::Complete;
                    }
                }
                _ => {}
            }
        }

        if in_string.is_some() || !delimiters.is_empty() {
            return ValidationResult::Incomplete;
        }

        // A line ending in ':' opens a block, and an open block stays open
        // until the editor sees a blank final line.
        if trimmed.ends_with(':') {
            return ValidationResult::Incomplete;
        }
        if line.contains('\n') {
            let last_line = line.rsplit('\n').next().unwrap_or("");
            if !last_line.trim().is_empty() {
                return ValidationResult::Incomplete;
            }
        }

        ValidationResult::Complete
    }
}

pub static KEYWORD_COLOR: Color = Color::LightBlue;
pub static LITERAL_COLOR: Color = Color::Yellow;
pub static DEFAULT_COLOR: Color = Color::White;
pub static OPERATOR_COLOR: Color = Color::DarkGray;

pub struct SyntaxHighlighter;

impl Highlighter for SyntaxHighlighter {
    fn highlight(&self, line: &str, _cursor: usize) -> StyledText {
        let mut styled_text = StyledText::new();

        let tokens = match tokenize(line) {
            Ok(t) => t,
            Err(_) => {
                styled_text.push((Style::new().fg(DEFAULT_COLOR), line.to_string()));
                return styled_text;
            }
        };

        let mut remaining = line;

        for token in tokens {
            let mut token_str = match lexeme(&token.kind) {
                Some(s) => s,
                None => continue,
            };

            // String literals may be single-quoted in the source.
            let mut pos = remaining.find(&token_str);
            if pos.is_none() {
                if let TokenKind::Str(s) = &token.kind {
                    token_str = format!("'{}'", s);
                    pos = remaining.find(&token_str);
                }
            }

            if let Some(pos) = pos {
                if pos > 0 {
                    styled_text
                        .push((Style::new().fg(DEFAULT_COLOR), remaining[..pos].to_string()));
                }

                let color = match &token.kind {
                    TokenKind::Truth
                    | TokenKind::Lie
                    | TokenKind::Alibi
                    | TokenKind::Universe
                    | TokenKind::If
                    | TokenKind::Else
                    | TokenKind::Elif
                    | TokenKind::Loop
                    | TokenKind::Plot
                    | TokenKind::Plan
                    | TokenKind::Suicide
                    | TokenKind::Escape
                    | TokenKind::Files
                    | TokenKind::And
                    | TokenKind::Or
                    | TokenKind::Not => KEYWORD_COLOR,
                    TokenKind::Int(_) | TokenKind::Float(_) | TokenKind::Str(_) => LITERAL_COLOR,
                    TokenKind::Assign
                    | TokenKind::Plus
                    | TokenKind::Minus
                    | TokenKind::Star
                    | TokenKind::Slash
                    | TokenKind::Percent
                    | TokenKind::EqualEqual
                    | TokenKind::BangEqual
                    | TokenKind::Less
                    | TokenKind::Greater
                    | TokenKind::LessEqual
                    | TokenKind::GreaterEqual
                    | TokenKind::LeftParen
                    | TokenKind::RightParen
                    | TokenKind::LeftBracket
                    | TokenKind::RightBracket
                    | TokenKind::LeftBrace
                    | TokenKind::RightBrace
                    | TokenKind::Comma
                    | TokenKind::Colon => OPERATOR_COLOR,
                    _ => DEFAULT_COLOR,
                };

                styled_text.push((Style::new().fg(color), token_str.clone()));
                remaining = &remaining[pos + token_str.len()..];
            }
        }

        if !remaining.is_empty() {
            styled_text.push((Style::new().fg(DEFAULT_COLOR), remaining.to_string()));
        }

        styled_text
    }
}

/// The source spelling of a token, for re-styling it in place. Structural
/// tokens have no spelling of their own.
fn lexeme(kind: &TokenKind) -> Option<String> {
    let s = match kind {
        TokenKind::Int(n) => n.to_string(),
        TokenKind::Float(x) => Number::Float(*x).to_string(),
        TokenKind::Str(s) => format!("\"{}\"", s),
        TokenKind::Identifier(name) => name.clone(),
        TokenKind::Truth => "truth".to_string(),
        TokenKind::Lie => "lie".to_string(),
        TokenKind::Alibi => "alibi".to_string(),
        TokenKind::Universe => "universe".to_string(),
        TokenKind::If => "if".to_string(),
        TokenKind::Else => "else".to_string(),
        TokenKind::Elif => "elif".to_string(),
        TokenKind::Loop => "loop".to_string(),
        TokenKind::Plot => "plot".to_string(),
        TokenKind::Plan => "plan".to_string(),
        TokenKind::Suicide => "suicide".to_string(),
        TokenKind::Escape => "escape".to_string(),
        TokenKind::Files => "files".to_string(),
        TokenKind::And => "and".to_string(),
        TokenKind::Or => "or".to_string(),
        TokenKind::Not => "not".to_string(),
        TokenKind::Assign => "=".to_string(),
        TokenKind::Plus => "+".to_string(),
        TokenKind::Minus => "-".to_string(),
        TokenKind::Star => "*".to_string(),
        TokenKind::Slash => "/".to_string(),
        TokenKind::Percent => "%".to_string(),
        TokenKind::EqualEqual => "==".to_string(),
        TokenKind::BangEqual => "!=".to_string(),
        TokenKind::Less => "<".to_string(),
        TokenKind::Greater => ">".to_string(),
        TokenKind::LessEqual => "<=".to_string(),
        TokenKind::GreaterEqual => ">=".to_string(),
        TokenKind::LeftParen => "(".to_string(),
        TokenKind::RightParen => ")".to_string(),
        TokenKind::LeftBracket => "[".to_string(),
        TokenKind::RightBracket => "]".to_string(),
        TokenKind::LeftBrace => "{".to_string(),
        TokenKind::RightBrace => "}".to_string(),
        TokenKind::Comma => ",".to_string(),
        TokenKind::Colon => ":".to_string(),
        TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent | TokenKind::Eof => {
            return None
        }
    };
    Some(s)
}
