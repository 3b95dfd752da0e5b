use crate::error::{ExpressionError, Result};
use crate::expr::stream::ExpressionStream;
use crate::expr::token::TokenStream;

/// Returns true if a template string is an expression, i.e. `[...]` and not
/// an escaped literal beginning with `[[`.
pub fn is_expression(s: &str) -> bool {
    s.len() >= 5 && s.starts_with('[') && s.ends_with(']') && !s.starts_with("[[")
}

/// Returns the literal text of a non-expression template string. A leading
/// `[[` escapes the bracket and is reduced to a single `[`.
pub fn literal_text(s: &str) -> &str {
    if s.starts_with("[[") && s.ends_with(']') {
        &s[1..]
    } else {
        s
    }
}

/// Parses a bracketed expression such as `[concat('a', parameters('b'))]`
/// into a flat token stream.
pub fn parse(expression: &str) -> Result<TokenStream> {
    let mut stream = ExpressionStream::new(expression)?;
    let mut tokens = TokenStream::new();
    if !stream.start() {
        return Err(parse_error(&stream, "expected '[' at the start of the expression"));
    }

    loop {
        stream.skip_whitespace();
        if stream.eof() || stream.at_end() {
            break;
        }
        let start = stream.position();
        if let Some(name) = stream.try_element() {
            element(&mut stream, &mut tokens, name)?;
        } else if stream.is_index_start() {
            index(&mut stream, &mut tokens)?;
        } else if let Some(property) = stream.capture_property() {
            tokens.property(property);
        } else if let Some(literal) = stream.capture_string() {
            tokens.string(literal);
        }
        if stream.position() == start {
            return Err(unexpected(&stream));
        }
    }

    if !stream.end() {
        return Err(parse_error(&stream, "expected ']' at the end of the expression"));
    }
    Ok(tokens)
}

fn element(stream: &mut ExpressionStream<'_>, tokens: &mut TokenStream, name: String) -> Result<()> {
    if let Ok(value) = name.parse::<i64>() {
        tokens.numeric(value);
        return Ok(());
    }
    tokens.element(name);
    stream.skip_whitespace();
    if !stream.is_group_start() {
        return Ok(());
    }

    tokens.group_start();
    stream.separator();
    while !stream.is_group_end() {
        if stream.eof() {
            return Err(parse_error(stream, "unterminated function call"));
        }
        let start = stream.position();
        inner(stream, tokens)?;
        if stream.position() == start {
            return Err(unexpected(stream));
        }
        stream.separator();
    }
    tokens.group_end();
    Ok(())
}

fn index(stream: &mut ExpressionStream<'_>, tokens: &mut TokenStream) -> Result<()> {
    tokens.index_start();
    stream.skip_whitespace();
    while !stream.is_index_end() {
        if stream.eof() {
            return Err(parse_error(stream, "unterminated index"));
        }
        let start = stream.position();
        inner(stream, tokens)?;
        if stream.position() == start {
            return Err(unexpected(stream));
        }
        stream.skip_whitespace();
    }
    tokens.index_end();
    Ok(())
}

fn inner(stream: &mut ExpressionStream<'_>, tokens: &mut TokenStream) -> Result<()> {
    stream.skip_whitespace();
    if let Some(literal) = stream.capture_string() {
        tokens.string(literal);
    } else if stream.is_index_start() {
        index(stream, tokens)?;
    } else if let Some(property) = stream.capture_property() {
        tokens.property(property);
    } else if let Some(name) = stream.try_element() {
        element(stream, tokens, name)?;
    }
    Ok(())
}

fn unexpected(stream: &ExpressionStream<'_>) -> ExpressionError {
    let reason = if stream.eof() {
        "unexpected end of expression".to_string()
    } else {
        format!(
            "unexpected character '{}' at position {}",
            stream.current(),
            stream.position()
        )
    };
    parse_error(stream, reason)
}

fn parse_error(stream: &ExpressionStream<'_>, reason: impl Into<String>) -> ExpressionError {
    ExpressionError::Parse {
        expression: stream.expression().to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::token::{Token, TokenKind};
    use pretty_assertions::assert_eq;

    fn kinds(tokens: &TokenStream) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    fn strings(tokens: &TokenStream) -> Vec<&str> {
        tokens
            .iter()
            .filter(|t| t.kind == TokenKind::String)
            .map(Token::text)
            .collect()
    }

    #[test]
    fn test_parse_simple_function() {
        let tokens = parse("[parameters('vnetName')]").unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Element,
                TokenKind::GroupStart,
                TokenKind::String,
                TokenKind::GroupEnd
            ]
        );
        assert_eq!(tokens.tokens()[0].text(), "parameters");
        assert_eq!(tokens.tokens()[2].text(), "vnetName");
    }

    #[test]
    fn test_parse_nested_index_and_property() {
        let tokens =
            parse("[concat('route-', parameters('subnets')[ copyIndex('routeIndex') ].name)]")
                .unwrap();
        assert_eq!(tokens.len(), 15);
        assert_eq!(tokens.tokens()[13].kind, TokenKind::Property);
        assert_eq!(tokens.tokens()[13].text(), "name");
    }

    #[test]
    fn test_parse_space_before_group() {
        let tokens = parse(
            "[resourceId ('Microsoft.Network/virtualNetworks/subnets', parameters('vnet'), 'default')]",
        )
        .unwrap();
        assert_eq!(tokens.len(), 9);
        assert_eq!(tokens.tokens()[1].kind, TokenKind::GroupStart);

        let tokens = parse(
            "[resourceId ('Microsoft.Network/virtualNetworks/subnets', parameters ('vnet'), variables('subnet'))]",
        )
        .unwrap();
        assert_eq!(tokens.len(), 12);
    }

    #[test]
    fn test_parse_chained_properties() {
        let tokens = parse("[variables('eventGridSubscription').filter.includedEventTypes]").unwrap();
        assert_eq!(tokens.len(), 6);
        assert_eq!(tokens.tokens()[4].text(), "filter");
        assert_eq!(tokens.tokens()[5].text(), "includedEventTypes");
    }

    #[test]
    fn test_parse_quoting() {
        let tokens = parse("[format('A''{0}''', 'B')]").unwrap();
        assert_eq!(strings(&tokens), vec!["A'{0}'", "B"]);

        let tokens = parse("[format('''{0}''', 'B')]").unwrap();
        assert_eq!(strings(&tokens), vec!["'{0}'", "B"]);

        let tokens = parse("[concat('''', 'x')]").unwrap();
        assert_eq!(strings(&tokens), vec!["'", "x"]);

        let tokens = parse("[split('a'',''b', ''',''')]").unwrap();
        assert_eq!(strings(&tokens), vec!["a','b", "','"]);

        let tokens = parse("[concat('\\\"', 'x')]").unwrap();
        assert_eq!(strings(&tokens), vec!["\\\"", "x"]);
    }

    #[test]
    fn test_parse_numeric() {
        let tokens = parse("[ 0 ]").unwrap();
        assert_eq!(kinds(&tokens), vec![TokenKind::Numeric]);
        assert_eq!(tokens.tokens()[0].value, Some(0));

        let tokens = parse("[add(1, -2)]").unwrap();
        assert_eq!(tokens.tokens()[3].value, Some(-2));
    }

    #[test]
    fn test_parse_top_level_string() {
        let tokens = parse("['subnet1']").unwrap();
        assert_eq!(kinds(&tokens), vec![TokenKind::String]);
        assert_eq!(tokens.tokens()[0].text(), "subnet1");
    }

    #[test]
    fn test_parse_multiline_arguments() {
        let tokens = parse("[createArray(\r\n'item1',\r\n 'item2'\r\n)]").unwrap();
        assert_eq!(strings(&tokens), vec!["item1", "item2"]);
    }

    #[test]
    fn test_parse_index_on_array_literal() {
        let tokens = parse("[createArray(\r\n'item1')[\r\n0]]").unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Element,
                TokenKind::GroupStart,
                TokenKind::String,
                TokenKind::GroupEnd,
                TokenKind::IndexStart,
                TokenKind::Numeric,
                TokenKind::IndexEnd
            ]
        );
    }

    #[test]
    fn test_parse_escaped_brackets_in_string() {
        let tokens = parse("[concat('\\[', 'a')]").unwrap();
        assert_eq!(strings(&tokens), vec!["[", "a"]);
    }

    #[test]
    fn test_parse_balanced_groups() {
        let tokens =
            parse("[if(equals(parameters('a'), 1), createObject('k', 'v'), json('null'))]").unwrap();
        let opens = tokens.iter().filter(|t| t.kind == TokenKind::GroupStart).count();
        let closes = tokens.iter().filter(|t| t.kind == TokenKind::GroupEnd).count();
        assert_eq!(opens, closes);
        assert_eq!(opens, 5);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse("[concat('a'"),
            Err(ExpressionError::Parse { .. })
        ));
        assert!(matches!(
            parse("[concat('a'))]"),
            Err(ExpressionError::Parse { .. })
        ));
        assert!(matches!(parse("concat()"), Err(ExpressionError::Parse { .. })));
    }

    #[test]
    fn test_is_expression() {
        assert!(is_expression("[parameters('a')]"));
        assert!(!is_expression("[[parameters('a')]"));
        assert!(!is_expression("[a]"));
        assert!(!is_expression("plain text"));
        assert_eq!(literal_text("[[parameters('a')]"), "[parameters('a')]");
        assert_eq!(literal_text("plain"), "plain");
    }
}
