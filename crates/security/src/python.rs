//! Token-level walker for Python source.
//!
//! Produces the import statements and bare-name call sites of a module, or the
//! first syntax error that prevents a reliable walk (unterminated strings,
//! unbalanced brackets, inconsistent indentation).

/// An imported module reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    /// Full dotted module name (`os.path`).
    pub module: String,
    pub line: usize,
    pub column: usize,
}

impl ImportRef {
    /// First component of the dotted name.
    pub fn top_level(&self) -> &str {
        self.module.split('.').next().unwrap_or(&self.module)
    }
}

/// A call through a bare name (`eval(...)`, not `obj.eval(...)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRef {
    pub name: String,
    pub line: usize,
    pub column: usize,
}

/// Expression text embedded in an f-string literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedExpr {
    pub text: String,
    pub line: usize,
}

#[derive(Debug, Default)]
pub struct PyScan {
    pub imports: Vec<ImportRef>,
    pub calls: Vec<CallRef>,
    pub fstring_exprs: Vec<EmbeddedExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PySyntaxError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Name(String),
    Op(char),
    Literal,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
    column: usize,
}

const STRING_PREFIXES: [&str; 12] = [
    "r", "u", "b", "f", "br", "rb", "fr", "rf", "R", "B", "F", "U",
];

fn is_string_prefix(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    STRING_PREFIXES.iter().any(|p| p.eq_ignore_ascii_case(&lower))
}

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    scan: &'a mut PyScan,
}

impl<'a> Lexer<'a> {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>, line: usize, column: usize) -> PySyntaxError {
        PySyntaxError {
            message: message.into(),
            line,
            column,
        }
    }

    /// Consume a string literal whose opening quote is at the current position.
    fn string(&mut self, is_fstring: bool, line: usize, column: usize) -> Result<(), PySyntaxError> {
        let quote = self.bump().unwrap_or('"');
        let triple = self.peek(0) == Some(quote) && self.peek(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut content = String::new();
        loop {
            let c = match self.bump() {
                Some(c) => c,
                None => {
                    let what = if triple {
                        "unterminated triple-quoted string literal"
                    } else {
                        "unterminated string literal"
                    };
                    return Err(self.error(what, line, column));
                }
            };
            match c {
                '\\' => {
                    if let Some(next) = self.bump() {
                        content.push(next);
                    }
                }
                '\n' if !triple => {
                    return Err(self.error("unterminated string literal", line, column));
                }
                c if c == quote => {
                    if !triple {
                        break;
                    }
                    if self.peek(0) == Some(quote) && self.peek(1) == Some(quote) {
                        self.bump();
                        self.bump();
                        break;
                    }
                    content.push(c);
                }
                c => content.push(c),
            }
        }

        if is_fstring {
            self.collect_fstring_exprs(&content, line);
        }
        Ok(())
    }

    fn collect_fstring_exprs(&mut self, content: &str, line: usize) {
        let mut depth = 0usize;
        let mut current = String::new();
        let mut chars = content.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if depth == 0 && chars.peek() == Some(&'{') => {
                    chars.next();
                }
                '{' => {
                    if depth > 0 {
                        current.push(c);
                    }
                    depth += 1;
                }
                '}' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        self.scan.fstring_exprs.push(EmbeddedExpr {
                            text: std::mem::take(&mut current),
                            line,
                        });
                    } else {
                        current.push(c);
                    }
                }
                c if depth > 0 => current.push(c),
                _ => {}
            }
        }
    }
}

/// Walk Python source and collect imports and bare-name calls.
pub fn scan(source: &str) -> Result<PyScan, PySyntaxError> {
    let mut scan = PyScan::default();
    let mut logical_lines: Vec<Vec<Token>> = Vec::new();
    {
        let mut lx = Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            scan: &mut scan,
        };

        let mut brackets: Vec<(char, usize, usize)> = Vec::new();
        let mut indents: Vec<usize> = vec![0];
        let mut current: Vec<Token> = Vec::new();
        let mut at_line_start = true;
        let mut expect_indent = false;

        while lx.pos < lx.chars.len() {
            if at_line_start && brackets.is_empty() {
                at_line_start = false;
                let mut width = 0usize;
                while let Some(c) = lx.peek(0) {
                    match c {
                        ' ' => width += 1,
                        '\t' => width = (width / 8 + 1) * 8,
                        '\x0c' => width = 0,
                        _ => break,
                    }
                    lx.bump();
                }
                match lx.peek(0) {
                    // Blank and comment-only lines do not affect indentation.
                    None | Some('\n') | Some('#') | Some('\r') => {}
                    Some(_) => {
                        let (line, column) = (lx.line, lx.column);
                        let top = *indents.last().unwrap_or(&0);
                        if expect_indent {
                            if width <= top {
                                return Err(lx.error("expected an indented block", line, column));
                            }
                            indents.push(width);
                        } else if width > top {
                            return Err(lx.error("unexpected indent", line, column));
                        } else if width < top {
                            while indents.last().is_some_and(|&t| t > width) {
                                indents.pop();
                            }
                            if indents.last().copied() != Some(width) {
                                return Err(lx.error(
                                    "unindent does not match any outer indentation level",
                                    line,
                                    column,
                                ));
                            }
                        }
                        expect_indent = false;
                    }
                }
                continue;
            }

            let (line, column) = (lx.line, lx.column);
            let c = match lx.peek(0) {
                Some(c) => c,
                None => break,
            };

            match c {
                '\n' => {
                    lx.bump();
                    if brackets.is_empty() {
                        if let Some(last) = current.last() {
                            expect_indent = last.tok == Tok::Op(':');
                            logical_lines.push(std::mem::take(&mut current));
                        }
                        at_line_start = true;
                    }
                }
                '#' => {
                    while lx.peek(0).is_some_and(|c| c != '\n') {
                        lx.bump();
                    }
                }
                '\\' if lx.peek(1) == Some('\n') => {
                    lx.bump();
                    lx.bump();
                }
                '\\' if lx.peek(1) == Some('\r') && lx.peek(2) == Some('\n') => {
                    lx.bump();
                    lx.bump();
                    lx.bump();
                }
                c if c.is_whitespace() => {
                    lx.bump();
                }
                '"' | '\'' => {
                    lx.string(false, line, column)?;
                    current.push(Token {
                        tok: Tok::Literal,
                        line,
                        column,
                    });
                }
                c if c.is_alphabetic() || c == '_' => {
                    let mut name = String::new();
                    while let Some(c) = lx.peek(0) {
                        if c.is_alphanumeric() || c == '_' {
                            name.push(c);
                            lx.bump();
                        } else {
                            break;
                        }
                    }
                    if matches!(lx.peek(0), Some('"') | Some('\'')) && is_string_prefix(&name) {
                        let is_fstring = name.to_ascii_lowercase().contains('f');
                        lx.string(is_fstring, line, column)?;
                        current.push(Token {
                            tok: Tok::Literal,
                            line,
                            column,
                        });
                    } else {
                        current.push(Token {
                            tok: Tok::Name(name),
                            line,
                            column,
                        });
                    }
                }
                c if c.is_ascii_digit() => {
                    while lx
                        .peek(0)
                        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
                    {
                        lx.bump();
                    }
                    current.push(Token {
                        tok: Tok::Literal,
                        line,
                        column,
                    });
                }
                '(' | '[' | '{' => {
                    lx.bump();
                    brackets.push((c, line, column));
                    current.push(Token {
                        tok: Tok::Op(c),
                        line,
                        column,
                    });
                }
                ')' | ']' | '}' => {
                    lx.bump();
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match brackets.pop() {
                        Some((open, _, _)) if open == expected => {}
                        Some((open, _, _)) => {
                            return Err(lx.error(
                                format!(
                                    "closing parenthesis '{}' does not match opening parenthesis '{}'",
                                    c, open
                                ),
                                line,
                                column,
                            ));
                        }
                        None => {
                            return Err(lx.error(format!("unmatched '{}'", c), line, column));
                        }
                    }
                    current.push(Token {
                        tok: Tok::Op(c),
                        line,
                        column,
                    });
                }
                _ => {
                    lx.bump();
                    current.push(Token {
                        tok: Tok::Op(c),
                        line,
                        column,
                    });
                }
            }
        }

        if let Some((open, line, column)) = brackets.pop() {
            return Err(lx.error(format!("'{}' was never closed", open), line, column));
        }
        if !current.is_empty() {
            if current.last().map(|t| &t.tok) == Some(&Tok::Op(':')) {
                let last = &current[current.len() - 1];
                return Err(lx.error(
                    "expected an indented block",
                    last.line,
                    last.column + 1,
                ));
            }
            logical_lines.push(current);
        } else if expect_indent {
            return Err(lx.error("expected an indented block", lx.line, 1));
        }
    }

    for tokens in &logical_lines {
        walk_line(tokens, &mut scan);
    }
    Ok(scan)
}

fn name_at(tokens: &[Token], i: usize) -> Option<&str> {
    match tokens.get(i).map(|t| &t.tok) {
        Some(Tok::Name(n)) => Some(n.as_str()),
        _ => None,
    }
}

fn op_at(tokens: &[Token], i: usize) -> Option<char> {
    match tokens.get(i).map(|t| &t.tok) {
        Some(Tok::Op(c)) => Some(*c),
        _ => None,
    }
}

/// Read a dotted name starting at `i`, returning it and the index after it.
fn dotted_name(tokens: &[Token], mut i: usize) -> (String, usize) {
    let mut name = String::new();
    while op_at(tokens, i) == Some('.') {
        name.push('.');
        i += 1;
    }
    while let Some(part) = name_at(tokens, i) {
        name.push_str(part);
        i += 1;
        if op_at(tokens, i) == Some('.') && name_at(tokens, i + 1).is_some() {
            name.push('.');
            i += 1;
        } else {
            break;
        }
    }
    (name, i)
}

fn walk_line(tokens: &[Token], scan: &mut PyScan) {
    let mut i = 0;
    while i < tokens.len() {
        match name_at(tokens, i) {
            Some("from") => {
                let (module, next) = dotted_name(tokens, i + 1);
                if name_at(tokens, next) == Some("import") {
                    let module = module.trim_start_matches('.').to_string();
                    if !module.is_empty() {
                        scan.imports.push(ImportRef {
                            module,
                            line: tokens[i].line,
                            column: tokens[i].column,
                        });
                    }
                    // Names after `import` are attributes of the module, skip them.
                    i = next + 1;
                    while i < tokens.len() && op_at(tokens, i) != Some(';') {
                        i += 1;
                    }
                    continue;
                }
                i += 1;
            }
            Some("import") => {
                let (line, column) = (tokens[i].line, tokens[i].column);
                i += 1;
                loop {
                    let (module, next) = dotted_name(tokens, i);
                    if module.is_empty() {
                        break;
                    }
                    scan.imports.push(ImportRef {
                        module,
                        line,
                        column,
                    });
                    i = next;
                    if name_at(tokens, i) == Some("as") {
                        i += 2;
                    }
                    if op_at(tokens, i) == Some(',') {
                        i += 1;
                    } else {
                        break;
                    }
                }
            }
            Some(name) => {
                let is_attribute = i > 0 && op_at(tokens, i - 1) == Some('.');
                let is_definition =
                    i > 0 && matches!(name_at(tokens, i - 1), Some("def") | Some("class"));
                if op_at(tokens, i + 1) == Some('(') && !is_attribute && !is_definition {
                    scan.calls.push(CallRef {
                        name: name.to_string(),
                        line: tokens[i].line,
                        column: tokens[i].column,
                    });
                }
                i += 1;
            }
            None => i += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modules(scan: &PyScan) -> Vec<&str> {
        scan.imports.iter().map(|i| i.module.as_str()).collect()
    }

    #[test]
    fn test_import_forms() {
        let scan = scan(
            "import os\nimport os.path as p, sys\nfrom subprocess import run, call\nfrom . import sibling\n",
        )
        .unwrap();
        assert_eq!(modules(&scan), vec!["os", "os.path", "sys", "subprocess"]);
        assert_eq!(scan.imports[1].top_level(), "os");
        assert_eq!(scan.imports[3].line, 3);
    }

    #[test]
    fn test_bare_calls_only() {
        let scan = scan("def eval(x):\n    return x\nresult = obj.exec('1')\nprint(eval('2'))\n").unwrap();
        let names: Vec<&str> = scan.calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["print", "eval"]);
        assert_eq!(scan.calls[1].line, 4);
    }

    #[test]
    fn test_strings_and_comments_are_ignored() {
        let scan = scan("# import os\ntext = 'import sys'\ndoc = \"\"\"\nexec(1)\n\"\"\"\n").unwrap();
        assert!(scan.imports.is_empty());
        assert!(scan.calls.is_empty());
    }

    #[test]
    fn test_fstring_expressions_are_collected() {
        let scan = scan("name = 'x'\nprint(f\"{{literal}} {eval(name)}\")\n").unwrap();
        assert_eq!(scan.fstring_exprs.len(), 1);
        assert_eq!(scan.fstring_exprs[0].text, "eval(name)");
    }

    #[test]
    fn test_multiline_brackets_and_continuations() {
        let source = "values = [\n    1,\n    2,\n]\ntotal = 1 + \\\n    2\nif total:\n    print(total)\n";
        let scan = scan(source).unwrap();
        assert_eq!(scan.calls.len(), 1);
    }

    #[test]
    fn test_unterminated_string_reports_position() {
        let err = scan("x = 1\ny = 'oops\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 5);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_unbalanced_brackets() {
        let err = scan("print((1)\n").unwrap_err();
        assert!(err.message.contains("never closed"));
        assert_eq!((err.line, err.column), (1, 6));

        let err = scan("x = [1, 2)\n").unwrap_err();
        assert!(err.message.contains("does not match"));
    }

    #[test]
    fn test_indentation_errors() {
        assert!(scan("x = 1\n    y = 2\n").unwrap_err().message.contains("unexpected indent"));
        assert!(scan("if True:\nprint(1)\n")
            .unwrap_err()
            .message
            .contains("expected an indented block"));
        assert!(scan("if True:\n        a = 1\n    b = 2\n")
            .unwrap_err()
            .message
            .contains("unindent"));
        assert!(scan("def f():\n").is_err());
    }

    #[test]
    fn test_blank_and_comment_lines_inside_blocks() {
        let source = "def f():\n\n    # comment\n    return 1\n\nprint(f())\n";
        assert!(scan(source).is_ok());
    }
}
