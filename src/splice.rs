//! Flat-map emission splicing
//!
//! A flat-map compute fragment emits its output through exactly one
//! `__SEND(expr);` call. Splicing replaces that call with backend code that
//! builds the output tuple from `expr` and dispatches it downstream.

use std::ops::Range;

use crate::error::{CodegenError, CodegenResult};
use crate::lexer::{Lexer, Token, EMIT_PRIMITIVE};

/// One emission call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitCall {
    /// From the primitive up to and including the closing `;` (or `)`)
    pub span: Range<usize>,
    /// Argument expression, trimmed
    pub argument: String,
}

/// Locate every emission call in `fragment`
pub fn find_emit_calls(fragment: &str) -> Result<Vec<EmitCall>, String> {
    let mut calls = Vec::new();
    let mut lexer = Lexer::new(fragment);

    while let Some((tok, span)) = lexer.next() {
        if tok != Token::Send {
            continue;
        }
        let start = span.start;
        let open = match lexer.next() {
            Some((Token::LParen, s)) => s,
            _ => return Err(format!("'{}' must be followed by '('", EMIT_PRIMITIVE)),
        };

        let mut depth = 1usize;
        let mut close = None;
        for (tok, s) in lexer.by_ref() {
            match tok {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(s);
                        break;
                    }
                }
                Token::Send => return Err(format!("nested '{}' call", EMIT_PRIMITIVE)),
                _ => {}
            }
        }
        let Some(close) = close else {
            return Err(format!("unterminated '{}' call", EMIT_PRIMITIVE));
        };

        let argument = fragment[open.end..close.start].trim().to_string();
        if argument.is_empty() {
            return Err(format!("'{}' needs an argument", EMIT_PRIMITIVE));
        }

        let mut end = close.end;
        if lexer.check(&Token::Semicolon) {
            if let Some((_, s)) = lexer.next() {
                end = s.end;
            }
        }
        calls.push(EmitCall { span: start..end, argument });
    }
    Ok(calls)
}

/// Rewrite the emission call of a flat-map fragment.
///
/// `snippet` receives the argument expression and returns the replacement
/// code; lines after the first are indented like the call site. A fragment
/// without a call is returned unchanged only when `requires_call` is unset.
pub fn splice_flat_map<F>(
    operator: &str,
    fragment: &str,
    requires_call: bool,
    snippet: F,
) -> CodegenResult<String>
where
    F: FnOnce(&str) -> String,
{
    let calls = find_emit_calls(fragment).map_err(|msg| CodegenError::splice(operator, msg))?;

    let call = match calls.as_slice() {
        [] if requires_call => {
            return Err(CodegenError::splice(
                operator,
                format!("no '{}' emission call found", EMIT_PRIMITIVE),
            ))
        }
        [] => return Ok(fragment.to_string()),
        [call] => call,
        _ => {
            return Err(CodegenError::splice(
                operator,
                "multiple emission calls not allowed",
            ))
        }
    };

    let indent = line_indent(fragment, call.span.start);
    let code = snippet(&call.argument);
    let replacement = code
        .trim_end_matches('\n')
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 || line.is_empty() {
                line.to_string()
            } else {
                format!("{}{}", indent, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut out = String::with_capacity(fragment.len() + replacement.len());
    out.push_str(&fragment[..call.span.start]);
    out.push_str(&replacement);
    out.push_str(&fragment[call.span.end..]);
    Ok(out)
}

/// Leading whitespace of the line containing `pos`
fn line_indent(text: &str, pos: usize) -> &str {
    let line_start = text[..pos].rfind('\n').map_or(0, |i| i + 1);
    let line = &text[line_start..pos];
    let width = line.len() - line.trim_start().len();
    &line[..width]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SPLITTER: &str = "void splitter_function(input_t in) {
    for (int i = 0; i < in.value; ++i) {
        const input_t out = {in.key, (float)i};
        __SEND(out);
    }
}
";

    fn dispatch(arg: &str) -> String {
        format!("const t_out_t t_out = create_t_out_t({});\nwrite(t_out);\n", arg)
    }

    #[test]
    fn test_single_call_spliced() {
        let out = splice_flat_map("splitter", SPLITTER, true, dispatch).unwrap();
        assert_eq!(
            out,
            "void splitter_function(input_t in) {
    for (int i = 0; i < in.value; ++i) {
        const input_t out = {in.key, (float)i};
        const t_out_t t_out = create_t_out_t(out);
        write(t_out);
    }
}
"
        );
        assert!(!out.contains(EMIT_PRIMITIVE));
    }

    #[test]
    fn test_multiple_calls_rejected() {
        let fragment = "__SEND(a);\nif (x) { __SEND(b); }";
        let err = splice_flat_map("splitter", fragment, true, dispatch).unwrap_err();
        match err {
            CodegenError::Splice { operator, message } => {
                assert_eq!(operator, "splitter");
                assert_eq!(message, "multiple emission calls not allowed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_call() {
        let fragment = "void f() {}";
        assert!(matches!(
            splice_flat_map("splitter", fragment, true, dispatch),
            Err(CodegenError::Splice { .. })
        ));
        assert_eq!(splice_flat_map("splitter", fragment, false, dispatch).unwrap(), fragment);
    }

    #[test]
    fn test_complex_argument() {
        let calls = find_emit_calls("  __SEND( make(a[i], f(b)) );").unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].argument, "make(a[i], f(b))");
        assert_eq!(calls[0].span, 2..29);
    }

    #[test]
    fn test_commented_call_ignored() {
        let fragment = "// __SEND(old);\n__SEND(new_t);";
        let calls = find_emit_calls(fragment).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].argument, "new_t");
    }

    #[test]
    fn test_unterminated_call() {
        assert!(find_emit_calls("__SEND(out;").is_err());
        assert!(find_emit_calls("__SEND out;").is_err());
    }
}
