//! Command-chain lexer and segment folding.
//!
//! A chain is one line of commands joined by `&&`, `||` or `&`. Parsing runs
//! in two passes: the lexer turns characters into [`Token`]s (quotes and
//! backslashes protect operator characters), then [`parse_chain`] folds the
//! token stream into [`CommandSegment`]s.

use serde::Serialize;

use crate::error::{EngineError, EngineResult};

/// Condition on the outcome of the immediately preceding segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    None,
    RequirePreviousSucceeded,
    RequirePreviousFailed,
}

/// One command of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSegment {
    pub command: String,
    pub dependency: Dependency,
    /// Failures of a muted segment are ignored.
    pub muted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Text(String),
    AndAnd,
    And,
    OrOr,
}

impl Token {
    fn operator(&self) -> &'static str {
        match self {
            Token::AndAnd => "&&",
            Token::And => "&",
            Token::OrOr => "||",
            Token::Text(_) => "",
        }
    }
}

/// Split chain text into text runs and operators.
///
/// Quoted text and backslash escapes are kept verbatim in the text run so
/// the argument splitter sees them; a lone `|` is ordinary text.
pub(crate) fn tokenize(chain: &str) -> EngineResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut quote: Option<char> = None;
    let mut chars = chain.chars().peekable();

    fn flush(text: &mut String, tokens: &mut Vec<Token>) {
        if !text.is_empty() {
            tokens.push(Token::Text(std::mem::take(text)));
        }
    }

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                text.push(c);
            }
            (Some('"'), '\\') | (None, '\\') => {
                text.push(c);
                match chars.next() {
                    Some(escaped) => text.push(escaped),
                    None => {
                        return Err(EngineError::CommandParse(
                            "trailing backslash at end of command chain".to_string(),
                        ))
                    }
                }
            }
            (Some(_), c) => text.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                text.push(c);
            }
            (None, '&') => {
                flush(&mut text, &mut tokens);
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::AndAnd);
                } else {
                    tokens.push(Token::And);
                }
            }
            (None, '|') if chars.peek() == Some(&'|') => {
                chars.next();
                flush(&mut text, &mut tokens);
                tokens.push(Token::OrOr);
            }
            (None, c) => text.push(c),
        }
    }

    if let Some(q) = quote {
        return Err(EngineError::CommandParse(format!("unterminated {} quote", q)));
    }
    flush(&mut text, &mut tokens);
    Ok(tokens)
}

/// Parse a chain into ordered segments.
///
/// Each segment's dependency refers only to the segment right before it.
/// A trailing `&` is allowed and leaves no empty final segment; any other
/// empty segment is an error.
pub fn parse_chain(chain: &str) -> EngineResult<Vec<CommandSegment>> {
    let mut segments = Vec::new();
    let mut command = String::new();
    let mut dependency = Dependency::None;
    let mut last_operator: Option<Token> = None;

    for token in tokenize(chain)? {
        let next = match &token {
            Token::Text(text) => {
                command.push_str(text);
                continue;
            }
            Token::And => Dependency::None,
            Token::AndAnd => Dependency::RequirePreviousSucceeded,
            Token::OrOr => Dependency::RequirePreviousFailed,
        };

        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err(EngineError::CommandParse(format!(
                "missing command before `{}`",
                token.operator()
            )));
        }
        segments.push(CommandSegment {
            command: trimmed.to_string(),
            dependency,
            muted: token == Token::And,
        });
        command.clear();
        dependency = next;
        last_operator = Some(token);
    }

    let trimmed = command.trim();
    if !trimmed.is_empty() {
        segments.push(CommandSegment {
            command: trimmed.to_string(),
            dependency,
            muted: false,
        });
    } else {
        match last_operator {
            Some(Token::And) => {}
            Some(op) => {
                return Err(EngineError::CommandParse(format!(
                    "missing command after `{}`",
                    op.operator()
                )))
            }
            None => return Err(EngineError::CommandParse("empty command chain".to_string())),
        }
    }

    Ok(segments)
}

/// Split one segment into program and arguments.
///
/// Whitespace separates arguments. `"..."` and `'...'` group text with the
/// quotes removed; a backslash outside single quotes takes the next character
/// literally.
pub fn split_args(command: &str) -> EngineResult<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') | (None, '\\') => match chars.next() {
                Some(escaped) => {
                    current.push(escaped);
                    in_arg = true;
                }
                None => {
                    return Err(EngineError::CommandParse(format!(
                        "trailing backslash in `{}`",
                        command
                    )))
                }
            },
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                in_arg = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_arg = true;
            }
        }
    }

    if let Some(q) = quote {
        return Err(EngineError::CommandParse(format!(
            "unterminated {} quote in `{}`",
            q, command
        )));
    }
    if in_arg {
        args.push(current);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(command: &str, dependency: Dependency, muted: bool) -> CommandSegment {
        CommandSegment {
            command: command.to_string(),
            dependency,
            muted,
        }
    }

    #[test]
    fn test_tokenize_operators() {
        assert_eq!(
            tokenize("a && b || c & d").unwrap(),
            vec![
                Token::Text("a ".to_string()),
                Token::AndAnd,
                Token::Text(" b ".to_string()),
                Token::OrOr,
                Token::Text(" c ".to_string()),
                Token::And,
                Token::Text(" d".to_string()),
            ]
        );
    }

    #[test]
    fn test_single_pipe_is_text() {
        assert_eq!(
            tokenize("a | b").unwrap(),
            vec![Token::Text("a | b".to_string())]
        );
    }

    #[test]
    fn test_quotes_protect_operators() {
        assert_eq!(
            tokenize(r#"echo "a && b" 'c || d' e\&f"#).unwrap(),
            vec![Token::Text(r#"echo "a && b" 'c || d' e\&f"#.to_string())]
        );
    }

    #[test]
    fn test_parse_dependencies() {
        assert_eq!(
            parse_chain("make && make test || echo failed & echo done").unwrap(),
            vec![
                seg("make", Dependency::None, false),
                seg("make test", Dependency::RequirePreviousSucceeded, false),
                seg("echo failed", Dependency::RequirePreviousFailed, true),
                seg("echo done", Dependency::None, false),
            ]
        );
    }

    #[test]
    fn test_trailing_ampersand() {
        assert_eq!(
            parse_chain("sleep 1 &").unwrap(),
            vec![seg("sleep 1", Dependency::None, true)]
        );
    }

    #[test]
    fn test_empty_segments_are_errors() {
        for chain in ["", "   ", "&& ls", "ls &&", "ls || ", "a && && b", "& ls"] {
            assert!(
                matches!(parse_chain(chain), Err(EngineError::CommandParse(_))),
                "expected parse error for {chain:?}"
            );
        }
    }

    #[test]
    fn test_unterminated_quote() {
        assert!(matches!(
            parse_chain(r#"echo "oops && ls"#),
            Err(EngineError::CommandParse(_))
        ));
    }

    #[test]
    fn test_split_args() {
        assert_eq!(
            split_args(r#"echo "hello world" 'a b' plain"#).unwrap(),
            vec!["echo", "hello world", "a b", "plain"]
        );
        assert_eq!(
            split_args(r#"printf "say \"hi\"" it\'s 'no\escape'"#).unwrap(),
            vec!["printf", r#"say "hi""#, "it's", r"no\escape"]
        );
        assert_eq!(split_args(r#"cmd "" x"#).unwrap(), vec!["cmd", "", "x"]);
        assert_eq!(split_args("  spaced   out  ").unwrap(), vec!["spaced", "out"]);
        assert_eq!(split_args(r#"a"b c"d"#).unwrap(), vec!["ab cd"]);
    }

    #[test]
    fn test_split_args_unterminated() {
        assert!(matches!(
            split_args("echo 'nope"),
            Err(EngineError::CommandParse(_))
        ));
    }
}
