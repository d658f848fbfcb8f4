//! Query-string parsing.
//!
//! A query names tasks to evaluate with their inputs:
//!
//! ```text
//! query       := command (';' command)*
//! command     := scoped-task input*
//! scoped-task := (identifier '/')? (identifier ':')* identifier
//! input       := (identifier '=')? text
//! ```
//!
//! The separators `/`, `:`, `=`, `;` and whitespace may be
//! backslash-escaped; double-quoted strings escape everything except `\`
//! and `"`. Identifiers are letters, digits, `_`, `-` and `.`, starting
//! with a letter, digit or `_`.
//!
//! Printing a parsed query re-escapes it; `parse(print(q)) == q` for
//! queries without ambiguous whitespace.

use crate::core::KilnError;
use std::fmt;

/// A parsed query: one or more commands separated by `;`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    /// The commands in declaration order
    pub commands: Vec<Command>,
}

/// One task invocation with its inputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    /// What to evaluate and where
    pub task: ScopedTask,
    /// Ordered inputs; `None` keys are free inputs
    pub inputs: Vec<(Option<String>, String)>,
}

/// A key addressed through an optional project and configuration stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopedTask {
    /// Project name before `/`, when given
    pub project: Option<String>,
    /// Configuration names in layering order
    pub configurations: Vec<String>,
    /// The key to evaluate
    pub key: String,
}

/// Parse a query string.
///
/// # Errors
///
/// [`KilnError::QueryParseError`] on malformed input, with the byte
/// offset of the failure.
pub fn parse(input: &str) -> Result<Query, KilnError> {
    let tokens = tokenize(input)?;
    let mut commands = Vec::new();

    for group in split_commands(tokens) {
        if group.is_empty() {
            continue;
        }
        commands.push(parse_command(group)?);
    }

    if commands.is_empty() {
        return Err(KilnError::QueryParseError {
            offset: 0,
            reason: "empty query".to_string(),
        });
    }
    Ok(Query { commands })
}

/// Whether `text` is a valid identifier for project, configuration, key
/// and input-key names.
pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_alphanumeric() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
}

#[derive(Debug, PartialEq, Eq, Clone)]
enum Token {
    /// Decoded text fragment and the offset where it started
    Text(String, usize),
    /// One of `/ : = ;`
    Sep(char, usize),
    /// A run of unescaped whitespace
    Space,
}

fn tokenize(input: &str) -> Result<Vec<Token>, KilnError> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut text_start = 0;
    let mut chars = input.char_indices().peekable();

    let flush = |tokens: &mut Vec<Token>, text: &mut String, start: usize| {
        if !text.is_empty() {
            tokens.push(Token::Text(std::mem::take(text), start));
        }
    };

    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' => {
                if text.is_empty() {
                    text_start = offset;
                }
                match chars.next() {
                    Some((_, escaped)) => text.push(escaped),
                    None => {
                        return Err(KilnError::QueryParseError {
                            offset,
                            reason: "dangling backslash".to_string(),
                        })
                    }
                }
            }
            '"' => {
                if text.is_empty() {
                    text_start = offset;
                }
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((inner, '\\')) => match chars.next() {
                            Some((_, escaped @ ('\\' | '"'))) => text.push(escaped),
                            Some((_, other)) => {
                                // Inside quotes only \ and " are escapable.
                                text.push('\\');
                                text.push(other);
                            }
                            None => {
                                return Err(KilnError::QueryParseError {
                                    offset: inner,
                                    reason: "dangling backslash in quoted string".to_string(),
                                })
                            }
                        },
                        Some((_, other)) => text.push(other),
                        None => {
                            return Err(KilnError::QueryParseError {
                                offset,
                                reason: "unterminated quoted string".to_string(),
                            })
                        }
                    }
                }
            }
            '/' | ':' | '=' | ';' => {
                flush(&mut tokens, &mut text, text_start);
                tokens.push(Token::Sep(c, offset));
            }
            c if c.is_whitespace() => {
                flush(&mut tokens, &mut text, text_start);
                if !matches!(tokens.last(), Some(Token::Space) | None) {
                    tokens.push(Token::Space);
                }
            }
            other => {
                if text.is_empty() {
                    text_start = offset;
                }
                text.push(other);
            }
        }
    }
    flush(&mut tokens, &mut text, text_start);
    Ok(tokens)
}

fn split_commands(tokens: Vec<Token>) -> Vec<Vec<Token>> {
    let mut groups = Vec::new();
    let mut current = Vec::new();
    for token in tokens {
        if matches!(token, Token::Sep(';', _)) {
            groups.push(std::mem::take(&mut current));
        } else {
            current.push(token);
        }
    }
    groups.push(current);
    groups
}

fn parse_command(tokens: Vec<Token>) -> Result<Command, KilnError> {
    // Words: token runs between whitespace.
    let mut words: Vec<Vec<Token>> = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    for token in tokens {
        match token {
            Token::Space => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            other => current.push(other),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }

    let mut words = words.into_iter();
    let task_word = words.next().ok_or(KilnError::QueryParseError {
        offset: 0,
        reason: "expected a task".to_string(),
    })?;
    let task = parse_scoped_task(task_word)?;

    let mut inputs = Vec::new();
    for word in words {
        inputs.push(parse_input(word)?);
    }
    Ok(Command { task, inputs })
}

fn parse_scoped_task(tokens: Vec<Token>) -> Result<ScopedTask, KilnError> {
    let mut project = None;
    let mut parts: Vec<String> = Vec::new();
    let mut iter = tokens.into_iter().peekable();

    while let Some(token) = iter.next() {
        match token {
            Token::Text(text, offset) => {
                if !is_identifier(&text) {
                    return Err(KilnError::QueryParseError {
                        offset,
                        reason: format!("'{text}' is not a valid identifier"),
                    });
                }
                match iter.peek() {
                    Some(Token::Sep('/', offset)) => {
                        let offset = *offset;
                        if project.is_some() || !parts.is_empty() {
                            return Err(KilnError::QueryParseError {
                                offset,
                                reason: "'/' is only valid after the leading project name"
                                    .to_string(),
                            });
                        }
                        project = Some(text);
                        iter.next();
                    }
                    Some(Token::Sep(':', _)) => {
                        parts.push(text);
                        iter.next();
                    }
                    None => {
                        parts.push(text);
                    }
                    Some(Token::Sep(sep, offset)) => {
                        return Err(KilnError::QueryParseError {
                            offset: *offset,
                            reason: format!("unexpected '{sep}' in task"),
                        })
                    }
                    Some(_) => unreachable!("words contain no spaces"),
                }
            }
            Token::Sep(sep, offset) => {
                return Err(KilnError::QueryParseError {
                    offset,
                    reason: format!("unexpected '{sep}', expected an identifier"),
                })
            }
            Token::Space => unreachable!("words contain no spaces"),
        }
    }

    let key = parts.pop().ok_or(KilnError::QueryParseError {
        offset: 0,
        reason: "expected a key name".to_string(),
    })?;
    Ok(ScopedTask {
        project,
        configurations: parts,
        key,
    })
}

fn parse_input(tokens: Vec<Token>) -> Result<(Option<String>, String), KilnError> {
    // A named input is `identifier '=' text`; anything else is free text
    // with separators taken literally.
    if let Some(eq_pos) = tokens.iter().position(|t| matches!(t, Token::Sep('=', _))) {
        if eq_pos == 1 {
            if let Token::Text(name, _) = &tokens[0] {
                if is_identifier(name) {
                    let value = join_literal(&tokens[eq_pos + 1..]);
                    return Ok((Some(name.clone()), value));
                }
            }
        }
    }
    Ok((None, join_literal(&tokens)))
}

fn join_literal(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Text(text, _) => out.push_str(text),
            Token::Sep(sep, _) => out.push(*sep),
            Token::Space => out.push(' '),
        }
    }
    out
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '"' | '/' | ':' | '=' | ';') || c.is_whitespace() {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl fmt::Display for ScopedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(project) = &self.project {
            write!(f, "{project}/")?;
        }
        for configuration in &self.configurations {
            write!(f, "{configuration}:")?;
        }
        f.write_str(&self.key)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.task)?;
        for (key, text) in &self.inputs {
            match key {
                Some(key) => write!(f, " {key}={}", escape(text))?,
                None => write!(f, " {}", escape(text))?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, command) in self.commands.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{command}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(project: Option<&str>, configs: &[&str], key: &str) -> ScopedTask {
        ScopedTask {
            project: project.map(str::to_string),
            configurations: configs.iter().map(|c| c.to_string()).collect(),
            key: key.to_string(),
        }
    }

    #[test]
    fn test_bare_key() {
        let query = parse("compile").unwrap();
        assert_eq!(query.commands.len(), 1);
        assert_eq!(query.commands[0].task, task(None, &[], "compile"));
    }

    #[test]
    fn test_full_scoped_task() {
        let query = parse("app/testing:compiling:classpath").unwrap();
        assert_eq!(
            query.commands[0].task,
            task(Some("app"), &["testing", "compiling"], "classpath")
        );
    }

    #[test]
    fn test_inputs_named_and_free() {
        let query = parse("run main=com.example.Main extra").unwrap();
        assert_eq!(
            query.commands[0].inputs,
            vec![
                (Some("main".to_string()), "com.example.Main".to_string()),
                (None, "extra".to_string()),
            ]
        );
    }

    #[test]
    fn test_multiple_commands() {
        let query = parse("clean; app/assembly").unwrap();
        assert_eq!(query.commands.len(), 2);
        assert_eq!(query.commands[0].task, task(None, &[], "clean"));
        assert_eq!(query.commands[1].task, task(Some("app"), &[], "assembly"));
    }

    #[test]
    fn test_escaped_separators_are_literal() {
        let query = parse(r"run arg\=with\=equals").unwrap();
        assert_eq!(
            query.commands[0].inputs,
            vec![(None, "arg=with=equals".to_string())]
        );
    }

    #[test]
    fn test_quoted_input_keeps_spaces() {
        let query = parse(r#"run message="hello world""#).unwrap();
        assert_eq!(
            query.commands[0].inputs,
            vec![(Some("message".to_string()), "hello world".to_string())]
        );
    }

    #[test]
    fn test_quote_escapes_only_backslash_and_quote() {
        let query = parse(r#"run "a\"b\\c\d""#).unwrap();
        // Inside quotes \" and \\ decode; \d is not an escape and stays.
        assert_eq!(
            query.commands[0].inputs,
            vec![(None, "a\"b\\c\\d".to_string())]
        );
    }

    #[test]
    fn test_unterminated_quote_rejected() {
        let err = parse(r#"run "open"#).unwrap_err();
        assert!(matches!(err, KilnError::QueryParseError { .. }));
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        assert!(parse("bad*name").is_err());
        assert!(parse("/key").is_err());
    }

    #[test]
    fn test_round_trip() {
        for input in [
            "compile",
            "app/assembly",
            "app/testing:compiling:classpath",
            "run main=com.example.Main",
            "clean; app/assembly",
        ] {
            let parsed = parse(input).unwrap();
            let printed = parsed.to_string();
            assert_eq!(parse(&printed).unwrap(), parsed, "round-trip of {input}");
        }
    }

    #[test]
    fn test_round_trip_with_escaping() {
        let query = Query {
            commands: vec![Command {
                task: task(Some("app"), &[], "run"),
                inputs: vec![(None, "a b;c=d".to_string())],
            }],
        };
        assert_eq!(parse(&query.to_string()).unwrap(), query);
    }
}
