//! The Sable lexer.
//!
//! Transforms UTF-8 source text into a finite token sequence terminated by
//! `Eof`. Sable uses significant indentation: the lexer measures the
//! indentation prefix of each non-blank, non-comment line and synthesizes
//! one `Indent` token per unit of increase and one `Dedent` per unit of
//! decrease, with trailing `Dedent`s emitted at end of input so the stream
//! always balances.
//!
//! Recovery is isolated: an invalid character or unterminated literal
//! produces a diagnostic plus an `Error` token and lexing continues. A
//! configurable error budget (default 100) promotes to fatal `L004` and
//! halts tokenization.

use sablec_util::{Pos, ReportCode, Reporter, Symbol};

use crate::cursor::Cursor;
use crate::token::{keyword_from_str, Token, TokenKind};

/// Lexer configuration.
#[derive(Clone, Copy, Debug)]
pub struct LexOptions {
    /// Spaces per indentation level; a tab counts as one level.
    pub indent_width: u32,
    /// Error budget before fatal `L004`.
    pub max_errors: u32,
}

impl Default for LexOptions {
    fn default() -> Self {
        Self {
            indent_width: 4,
            max_errors: 100,
        }
    }
}

/// Tokenize with default options.
pub fn tokenize_source(source: &str, filename: &str, reporter: &Reporter) -> Vec<Token> {
    Lexer::new(source, filename, reporter).tokenize()
}

/// Tokenize with explicit options.
pub fn tokenize_with(
    source: &str,
    filename: &str,
    reporter: &Reporter,
    options: LexOptions,
) -> Vec<Token> {
    Lexer::with_options(source, filename, reporter, options).tokenize()
}

/// Evaluate an integer literal lexeme (any base, optional suffixes).
///
/// The lexer has already validated the literal; this helper is how the
/// parser recovers the value from the lexeme.
pub fn int_value(lexeme: &str) -> i64 {
    let text: String = lexeme
        .chars()
        .filter(|c| !matches!(c, '_' | 'l' | 'L' | 'u' | 'U'))
        .collect();
    let (digits, radix) = if let Some(rest) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        (rest, 16)
    } else if let Some(rest) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        (rest, 2)
    } else if text.len() > 1 && text.starts_with('0') && text.chars().all(|c| c.is_ascii_digit()) {
        (&text[1..], 8)
    } else if let Some(rest) = text.strip_prefix("0o").or_else(|| text.strip_prefix("0O")) {
        (rest, 8)
    } else {
        (text.as_str(), 10)
    };
    i64::from_str_radix(digits, radix).unwrap_or(0)
}

/// Evaluate a float literal lexeme (optional `f`/`F` suffix).
pub fn float_value(lexeme: &str) -> f64 {
    let text: String = lexeme.chars().filter(|c| !matches!(c, 'f' | 'F' | '_')).collect();
    text.parse().unwrap_or(0.0)
}

/// The Sable lexer.
///
/// # Example
///
/// ```
/// use sablec_lex::lexer::tokenize_source;
/// use sablec_lex::token::TokenKind;
/// use sablec_util::Reporter;
///
/// let reporter = Reporter::new();
/// let tokens = tokenize_source("let x = 42", "main.sbl", &reporter);
/// assert_eq!(tokens[0].kind, TokenKind::Let);
/// assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
/// ```
pub struct Lexer<'a> {
    /// Character cursor over the source.
    cursor: Cursor<'a>,
    /// Diagnostic sink.
    reporter: &'a Reporter,
    /// Interned filename for positions.
    file: Symbol,
    /// Output token buffer.
    tokens: Vec<Token>,
    /// Current indentation level, in units of `indent_width`.
    indent_level: u32,
    /// True while the next content begins a logical line.
    at_line_start: bool,
    /// Start position of the token being scanned.
    token_start: usize,
    token_line: u32,
    token_column: u32,
    /// Options.
    indent_width: u32,
    max_errors: u32,
    /// Errors recorded by this lexer so far.
    error_count: u32,
    /// Set when the error budget trips; stops the scan loop.
    halted: bool,
}

impl<'a> Lexer<'a> {
    /// Create a lexer with default options.
    pub fn new(source: &'a str, filename: &str, reporter: &'a Reporter) -> Self {
        Self::with_options(source, filename, reporter, LexOptions::default())
    }

    /// Create a lexer with explicit options.
    pub fn with_options(
        source: &'a str,
        filename: &str,
        reporter: &'a Reporter,
        options: LexOptions,
    ) -> Self {
        Self {
            cursor: Cursor::new(source),
            reporter,
            file: Symbol::intern(filename),
            tokens: Vec::new(),
            indent_level: 0,
            at_line_start: true,
            token_start: 0,
            token_line: 1,
            token_column: 1,
            indent_width: options.indent_width.max(1),
            max_errors: options.max_errors.max(1),
            error_count: 0,
            halted: false,
        }
    }

    /// Tokenize the whole source.
    ///
    /// The returned stream always ends with `Eof`, preceded by enough
    /// `Dedent` tokens to return the indentation level to zero.
    pub fn tokenize(mut self) -> Vec<Token> {
        loop {
            if self.halted {
                break;
            }
            if self.at_line_start {
                self.handle_line_start();
                if self.halted {
                    break;
                }
            }
            self.skip_inline_trivia();
            if self.at_line_start {
                continue;
            }
            if self.cursor.is_at_end() {
                break;
            }
            self.begin_token();
            self.scan_token();
        }

        if !self.halted {
            self.begin_token();
            while self.indent_level > 0 {
                self.push_simple(TokenKind::Dedent);
                self.indent_level -= 1;
            }
        }
        self.begin_token();
        self.push_simple(TokenKind::Eof);
        self.tokens
    }

    // =========================================================================
    // INDENTATION
    // =========================================================================

    /// Measure the indentation of the next logical line and synthesize
    /// `Indent`/`Dedent` tokens. Blank lines and comment-only lines do not
    /// affect indentation.
    fn handle_line_start(&mut self) {
        loop {
            let mut spaces = 0u32;
            let mut used_tab = false;
            let mut used_space = false;

            loop {
                match self.cursor.current_char() {
                    ' ' => {
                        spaces += 1;
                        used_space = true;
                        self.cursor.advance();
                    }
                    '\t' => {
                        spaces += self.indent_width;
                        used_tab = true;
                        self.cursor.advance();
                    }
                    _ => break,
                }
            }

            if used_tab && used_space {
                self.begin_token();
                self.report_error(
                    ReportCode::L001,
                    "mixed tabs and spaces in indentation".to_owned(),
                );
                if self.halted {
                    return;
                }
            }

            match self.cursor.current_char() {
                // Blank line: consume and keep looking.
                '\n' => {
                    self.cursor.advance();
                    continue;
                }
                '\r' => {
                    self.cursor.advance();
                    continue;
                }
                // End of input: trailing dedents are emitted by `tokenize`.
                '\0' => {
                    self.at_line_start = false;
                    return;
                }
                // Comment-only prefix: skip it; if the line held nothing
                // else, keep looking for the next content line.
                '#' => {
                    self.skip_comment();
                    match self.cursor.current_char() {
                        '\n' => {
                            self.cursor.advance();
                            continue;
                        }
                        '\0' => {
                            self.at_line_start = false;
                            return;
                        }
                        // A block comment followed by code on the same
                        // line: the measured prefix still governs.
                        _ => {}
                    }
                }
                _ => {}
            }

            let new_level = spaces / self.indent_width;
            self.begin_token();
            if new_level > self.indent_level {
                for _ in self.indent_level..new_level {
                    self.push_simple(TokenKind::Indent);
                }
            } else if new_level < self.indent_level {
                for _ in new_level..self.indent_level {
                    self.push_simple(TokenKind::Dedent);
                }
            }
            self.indent_level = new_level;
            self.at_line_start = false;
            return;
        }
    }

    /// Skip spaces, carriage returns, and comments between tokens on a
    /// line. Consuming a newline flips `at_line_start` and returns.
    fn skip_inline_trivia(&mut self) {
        loop {
            match self.cursor.current_char() {
                ' ' | '\r' | '\t' => {
                    self.cursor.advance();
                }
                '\n' => {
                    self.cursor.advance();
                    self.at_line_start = true;
                    return;
                }
                '#' => {
                    self.skip_comment();
                }
                _ => return,
            }
        }
    }

    /// Skip a `#` line comment (to end of line, exclusive) or a `##` block
    /// comment (through the closing `##`, newlines included).
    fn skip_comment(&mut self) {
        self.cursor.advance(); // '#'
        if self.cursor.match_char('#') {
            // Block comment; the cursor keeps the line counter advancing.
            while !self.cursor.is_at_end()
                && !(self.cursor.current_char() == '#' && self.cursor.peek_char(1) == '#')
            {
                self.cursor.advance();
            }
            if self.cursor.match_char('#') {
                self.cursor.advance();
            }
        } else {
            while !self.cursor.is_at_end() && self.cursor.current_char() != '\n' {
                self.cursor.advance();
            }
        }
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    fn begin_token(&mut self) {
        self.token_start = self.cursor.position();
        self.token_line = self.cursor.line();
        self.token_column = self.cursor.column();
    }

    fn token_pos(&self) -> Pos {
        Pos::new(self.file, self.token_line, self.token_column)
    }

    fn scan_token(&mut self) {
        let c = self.cursor.current_char();

        if c.is_ascii_alphabetic() || c == '_' {
            self.lex_identifier();
            return;
        }
        if c.is_ascii_digit() {
            self.lex_number();
            return;
        }

        match c {
            '"' | '\'' => self.lex_string(),
            '`' => self.lex_template(),
            _ => {
                self.cursor.advance();
                self.lex_operator(c);
            }
        }
    }

    fn lex_operator(&mut self, c: char) {
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '~' => TokenKind::Tilde,
            ':' => {
                if self.cursor.match_char(':') {
                    TokenKind::ColonColon
                } else {
                    TokenKind::Colon
                }
            }
            '.' => {
                if self.cursor.match_char('.') {
                    if self.cursor.match_char('.') {
                        TokenKind::DotDotDot
                    } else {
                        TokenKind::DotDot
                    }
                } else {
                    TokenKind::Dot
                }
            }
            '+' => {
                if self.cursor.match_char('=') {
                    TokenKind::PlusEq
                } else if self.cursor.match_char('+') {
                    TokenKind::PlusPlus
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if self.cursor.match_char('<') {
                    TokenKind::RecvArrow
                } else if self.cursor.match_char('=') {
                    TokenKind::MinusEq
                } else if self.cursor.match_char('-') {
                    TokenKind::MinusMinus
                } else if self.cursor.match_char('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '*' => {
                if self.cursor.match_char('=') {
                    TokenKind::StarEq
                } else if self.cursor.match_char('*') {
                    if self.cursor.match_char('=') {
                        TokenKind::StarStarEq
                    } else {
                        TokenKind::StarStar
                    }
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if self.cursor.match_char('=') {
                    TokenKind::SlashEq
                } else {
                    TokenKind::Slash
                }
            }
            '%' => {
                if self.cursor.match_char('=') {
                    TokenKind::PercentEq
                } else {
                    TokenKind::Percent
                }
            }
            '=' => {
                if self.cursor.match_char('=') {
                    if self.cursor.match_char('=') {
                        TokenKind::EqEqEq
                    } else {
                        TokenKind::EqEq
                    }
                } else {
                    TokenKind::Eq
                }
            }
            '!' => {
                if self.cursor.match_char('=') {
                    if self.cursor.match_char('=') {
                        TokenKind::BangEqEq
                    } else {
                        TokenKind::BangEq
                    }
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.cursor.match_char('-') {
                    TokenKind::ArrowLeft
                } else if self.cursor.match_char('=') {
                    TokenKind::LtEq
                } else if self.cursor.match_char('<') {
                    if self.cursor.match_char('=') {
                        TokenKind::ShlEq
                    } else {
                        TokenKind::Shl
                    }
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.cursor.match_char('=') {
                    TokenKind::GtEq
                } else if self.cursor.match_char('>') {
                    if self.cursor.match_char('=') {
                        TokenKind::ShrEq
                    } else {
                        TokenKind::Shr
                    }
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                if self.cursor.match_char('&') {
                    TokenKind::AmpAmp
                } else if self.cursor.match_char('=') {
                    TokenKind::AmpEq
                } else {
                    TokenKind::Amp
                }
            }
            '|' => {
                if self.cursor.match_char('|') {
                    TokenKind::PipePipe
                } else if self.cursor.match_char('=') {
                    TokenKind::PipeEq
                } else {
                    TokenKind::Pipe
                }
            }
            '^' => {
                if self.cursor.match_char('=') {
                    TokenKind::CaretEq
                } else {
                    TokenKind::Caret
                }
            }
            '?' => {
                if self.cursor.match_char('.') {
                    TokenKind::SafeDot
                } else if self.cursor.match_char('?') {
                    TokenKind::QuestionQuestion
                } else if self.cursor.match_char(':') {
                    TokenKind::Elvis
                } else {
                    TokenKind::Question
                }
            }
            _ => {
                self.report_error(ReportCode::L001, format!("unexpected character '{}'", c));
                self.push_lexeme(TokenKind::Error, &c.to_string());
                return;
            }
        };
        let text = self.cursor.slice_from(self.token_start).to_owned();
        self.push_lexeme(kind, &text);
    }

    // =========================================================================
    // IDENTIFIERS AND NUMBERS
    // =========================================================================

    fn lex_identifier(&mut self) {
        while {
            let c = self.cursor.current_char();
            c.is_ascii_alphanumeric() || c == '_'
        } {
            self.cursor.advance();
        }
        let text = self.cursor.slice_from(self.token_start).to_owned();
        let kind = keyword_from_str(&text).unwrap_or(TokenKind::Ident);
        self.push_lexeme(kind, &text);
    }

    fn lex_number(&mut self) {
        // Base prefixes and leading-zero octal.
        if self.cursor.current_char() == '0' {
            match self.cursor.peek_char(1) {
                'x' | 'X' => {
                    self.cursor.advance();
                    self.cursor.advance();
                    self.lex_radix_digits(16);
                    return;
                }
                'b' | 'B' => {
                    self.cursor.advance();
                    self.cursor.advance();
                    self.lex_radix_digits(2);
                    return;
                }
                'o' | 'O' => {
                    self.cursor.advance();
                    self.cursor.advance();
                    self.lex_radix_digits(8);
                    return;
                }
                c if c.is_ascii_digit() => {
                    self.lex_octal_leading_zero();
                    return;
                }
                _ => {}
            }
        }

        let mut is_float = false;

        while self.cursor.current_char().is_ascii_digit() {
            self.cursor.advance();
        }

        // Fractional part: only when a digit follows the dot, so ranges
        // like `0..10` keep their operator.
        if self.cursor.current_char() == '.' && self.cursor.peek_char(1).is_ascii_digit() {
            is_float = true;
            self.cursor.advance();
            while self.cursor.current_char().is_ascii_digit() {
                self.cursor.advance();
            }
        }

        // Exponent.
        if matches!(self.cursor.current_char(), 'e' | 'E') {
            is_float = true;
            self.cursor.advance();
            if matches!(self.cursor.current_char(), '+' | '-') {
                self.cursor.advance();
            }
            if !self.cursor.current_char().is_ascii_digit() {
                self.report_error(
                    ReportCode::L003,
                    "missing digits in float exponent".to_owned(),
                );
                let text = self.cursor.slice_from(self.token_start).to_owned();
                self.push_lexeme(TokenKind::Error, &text);
                return;
            }
            while self.cursor.current_char().is_ascii_digit() {
                self.cursor.advance();
            }
        }

        // Suffixes: `f`/`F` forces float32, `l`/`u` recorded in the lexeme.
        let mut is_f32 = false;
        match self.cursor.current_char() {
            'f' | 'F' => {
                is_float = true;
                is_f32 = true;
                self.cursor.advance();
            }
            'l' | 'L' | 'u' | 'U' => {
                self.cursor.advance();
            }
            _ => {}
        }

        let text = self.cursor.slice_from(self.token_start).to_owned();
        if is_float {
            let value: String = text.chars().filter(|c| !matches!(c, 'f' | 'F')).collect();
            match value.parse::<f64>() {
                Ok(v) if v.is_finite() => {
                    let kind = if is_f32 { TokenKind::Float32 } else { TokenKind::Float64 };
                    self.push_lexeme(kind, &text);
                }
                _ => {
                    self.report_error(
                        ReportCode::L003,
                        format!("invalid float literal '{}'", text),
                    );
                    self.push_lexeme(TokenKind::Error, &text);
                }
            }
        } else {
            let digits: String = text
                .chars()
                .filter(|c| !matches!(c, 'l' | 'L' | 'u' | 'U'))
                .collect();
            match digits.parse::<i64>() {
                Ok(_) => self.push_lexeme(TokenKind::Int, &text),
                Err(_) => {
                    self.report_error(
                        ReportCode::L003,
                        format!("integer literal '{}' out of range", text),
                    );
                    self.push_lexeme(TokenKind::Error, &text);
                }
            }
        }
    }

    fn lex_radix_digits(&mut self, radix: u32) {
        let digits_start = self.cursor.position();
        while self.cursor.current_char().is_digit(radix) || self.cursor.current_char() == '_' {
            self.cursor.advance();
        }
        if self.cursor.position() == digits_start {
            self.report_error(
                ReportCode::L003,
                format!("missing digits after base-{} prefix", radix),
            );
            let text = self.cursor.slice_from(self.token_start).to_owned();
            self.push_lexeme(TokenKind::Error, &text);
            return;
        }
        // Optional integer suffixes.
        if matches!(self.cursor.current_char(), 'l' | 'L' | 'u' | 'U') {
            self.cursor.advance();
        }
        let text = self.cursor.slice_from(self.token_start).to_owned();
        let digits: String = text[2..]
            .chars()
            .filter(|c| !matches!(c, '_' | 'l' | 'L' | 'u' | 'U'))
            .collect();
        match i64::from_str_radix(&digits, radix) {
            Ok(_) => self.push_lexeme(TokenKind::Int, &text),
            Err(_) => {
                self.report_error(
                    ReportCode::L003,
                    format!("integer literal '{}' out of range", text),
                );
                self.push_lexeme(TokenKind::Error, &text);
            }
        }
    }

    fn lex_octal_leading_zero(&mut self) {
        self.cursor.advance(); // leading '0'
        let mut bad_digit = false;
        while self.cursor.current_char().is_ascii_digit() {
            if !matches!(self.cursor.current_char(), '0'..='7') {
                bad_digit = true;
            }
            self.cursor.advance();
        }
        let text = self.cursor.slice_from(self.token_start).to_owned();
        if bad_digit {
            self.report_error(
                ReportCode::L003,
                format!("invalid octal literal '{}'", text),
            );
            self.push_lexeme(TokenKind::Error, &text);
            return;
        }
        match i64::from_str_radix(&text[1..], 8) {
            Ok(_) => self.push_lexeme(TokenKind::Int, &text),
            Err(_) => {
                self.report_error(
                    ReportCode::L003,
                    format!("integer literal '{}' out of range", text),
                );
                self.push_lexeme(TokenKind::Error, &text);
            }
        }
    }

    // =========================================================================
    // STRINGS AND TEMPLATES
    // =========================================================================

    fn lex_string(&mut self) {
        let quote = self.cursor.advance();
        let mut value = String::new();

        loop {
            match self.cursor.current_char() {
                '\0' | '\n' => {
                    // Unterminated: diagnose, leave the newline for the
                    // layout machinery, resume on the next line.
                    self.report_error(
                        ReportCode::L002,
                        "unterminated string literal".to_owned(),
                    );
                    self.push_lexeme(TokenKind::Error, &value);
                    return;
                }
                '\\' => {
                    self.cursor.advance();
                    self.lex_escape(&mut value);
                }
                c if c == quote => {
                    self.cursor.advance();
                    self.push_lexeme(TokenKind::Str, &value);
                    return;
                }
                c => {
                    value.push(c);
                    self.cursor.advance();
                }
            }
        }
    }

    /// One escape sequence, cursor positioned after the backslash.
    fn lex_escape(&mut self, value: &mut String) {
        let c = self.cursor.current_char();
        match c {
            'n' => {
                value.push('\n');
                self.cursor.advance();
            }
            'r' => {
                value.push('\r');
                self.cursor.advance();
            }
            't' => {
                value.push('\t');
                self.cursor.advance();
            }
            'b' => {
                value.push('\u{0008}');
                self.cursor.advance();
            }
            'f' => {
                value.push('\u{000C}');
                self.cursor.advance();
            }
            'v' => {
                value.push('\u{000B}');
                self.cursor.advance();
            }
            'a' => {
                value.push('\u{0007}');
                self.cursor.advance();
            }
            '\\' => {
                value.push('\\');
                self.cursor.advance();
            }
            '\'' => {
                value.push('\'');
                self.cursor.advance();
            }
            '"' => {
                value.push('"');
                self.cursor.advance();
            }
            '0' => {
                value.push('\0');
                self.cursor.advance();
            }
            'x' => {
                self.cursor.advance();
                let mut hex = String::new();
                while hex.len() < 2 && self.cursor.current_char().is_ascii_hexdigit() {
                    hex.push(self.cursor.advance());
                }
                if hex.is_empty() {
                    self.report_error(
                        ReportCode::L005,
                        "invalid hex escape sequence".to_owned(),
                    );
                    value.push('x');
                } else {
                    let byte = u8::from_str_radix(&hex, 16).unwrap_or(0);
                    value.push(byte as char);
                }
            }
            'u' => {
                self.cursor.advance();
                if !self.cursor.match_char('{') {
                    self.report_error(
                        ReportCode::L006,
                        "invalid unicode escape sequence".to_owned(),
                    );
                    value.push('u');
                    return;
                }
                let mut hex = String::new();
                while self.cursor.current_char().is_ascii_hexdigit() {
                    hex.push(self.cursor.advance());
                }
                let closed = self.cursor.match_char('}');
                if !closed || hex.is_empty() || hex.len() > 6 {
                    self.report_error(
                        ReportCode::L006,
                        "invalid unicode escape sequence".to_owned(),
                    );
                    value.push_str("u{");
                    value.push_str(&hex);
                    return;
                }
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => value.push(decoded),
                    None => {
                        self.report_error(
                            ReportCode::L006,
                            format!("invalid unicode codepoint U+{}", hex.to_uppercase()),
                        );
                    }
                }
            }
            other => {
                self.report_error(
                    ReportCode::L005,
                    format!("invalid escape sequence '\\{}'", other),
                );
                value.push(other);
                self.cursor.advance();
            }
        }
    }

    /// Template literal: `` `text ${expr} text` ``.
    ///
    /// Emits `TemplateStart(text0)`, one `TemplateExpr(source)` per
    /// substitution, and `TemplateEnd(textN)` at the closing backtick. The
    /// substitution source is re-lexed by the parser; brace nesting is
    /// tracked here so nested maps and templates survive.
    fn lex_template(&mut self) {
        self.cursor.advance(); // opening backtick
        let mut text = String::new();
        let mut emitted_start = false;

        loop {
            match self.cursor.current_char() {
                '\0' => {
                    self.report_error(
                        ReportCode::L007,
                        "unterminated template literal".to_owned(),
                    );
                    self.push_lexeme(TokenKind::Error, &text);
                    return;
                }
                '`' => {
                    self.cursor.advance();
                    if !emitted_start {
                        // A template with no substitutions is still a
                        // Start/End pair so the parser sees one shape.
                        self.push_lexeme(TokenKind::TemplateStart, &text);
                        self.push_lexeme(TokenKind::TemplateEnd, "");
                    } else {
                        self.push_lexeme(TokenKind::TemplateEnd, &text);
                    }
                    return;
                }
                '$' if self.cursor.peek_char(1) == '{' => {
                    self.cursor.advance();
                    self.cursor.advance();
                    self.push_lexeme(TokenKind::TemplateStart, &text);
                    emitted_start = true;
                    text.clear();

                    let mut depth = 1u32;
                    let mut expr = String::new();
                    loop {
                        match self.cursor.current_char() {
                            '\0' => {
                                self.report_error(
                                    ReportCode::L007,
                                    "unterminated template substitution".to_owned(),
                                );
                                self.push_lexeme(TokenKind::Error, &expr);
                                return;
                            }
                            '\n' => {
                                self.report_error(
                                    ReportCode::L007,
                                    "newline inside template substitution".to_owned(),
                                );
                                self.push_lexeme(TokenKind::Error, &expr);
                                return;
                            }
                            '{' => {
                                depth += 1;
                                expr.push(self.cursor.advance());
                            }
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    self.cursor.advance();
                                    break;
                                }
                                expr.push(self.cursor.advance());
                            }
                            _ => expr.push(self.cursor.advance()),
                        }
                    }
                    self.push_lexeme(TokenKind::TemplateExpr, &expr);
                }
                '\\' => {
                    self.cursor.advance();
                    match self.cursor.current_char() {
                        'n' => text.push('\n'),
                        'r' => text.push('\r'),
                        't' => text.push('\t'),
                        '`' => text.push('`'),
                        '$' => text.push('$'),
                        '\\' => text.push('\\'),
                        other => {
                            text.push('\\');
                            text.push(other);
                        }
                    }
                    self.cursor.advance();
                }
                c => {
                    text.push(c);
                    self.cursor.advance();
                }
            }
        }
    }

    // =========================================================================
    // OUTPUT AND ERRORS
    // =========================================================================

    fn push_simple(&mut self, kind: TokenKind) {
        self.tokens
            .push(Token::new(kind, Symbol::empty(), self.token_pos()));
    }

    fn push_lexeme(&mut self, kind: TokenKind, lexeme: &str) {
        self.tokens
            .push(Token::new(kind, Symbol::intern(lexeme), self.token_pos()));
    }

    fn report_error(&mut self, code: ReportCode, message: String) {
        self.error_count += 1;
        self.reporter.error(code, message, self.token_pos());
        if self.error_count >= self.max_errors {
            self.reporter.fatal(
                ReportCode::L004,
                format!("too many lexical errors ({}); giving up", self.error_count),
                self.token_pos(),
            );
            self.halted = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sablec_util::Severity;

    fn lex(source: &str) -> (Vec<Token>, Reporter) {
        let reporter = Reporter::new();
        let tokens = tokenize_source(source, "test.sbl", &reporter);
        (tokens, reporter)
    }

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty_source_yields_only_eof() {
        let (tokens, reporter) = lex("");
        assert_eq!(kinds(&tokens), vec![TokenKind::Eof]);
        assert!(!reporter.has_errors());
    }

    #[test]
    fn test_simple_let() {
        let (tokens, reporter) = lex("let x = 42");
        assert!(!reporter.has_errors());
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Let,
                TokenKind::Ident,
                TokenKind::Eq,
                TokenKind::Int,
                TokenKind::Eof
            ]
        );
        assert_eq!(tokens[1].lexeme.as_str(), "x");
        assert_eq!(tokens[3].lexeme.as_str(), "42");
    }

    #[test]
    fn test_indent_dedent_balance() {
        let source = "def f():\n    let a = 1\n    if a:\n        let b = 2\nlet c = 3\n";
        let (tokens, reporter) = lex(source);
        assert!(!reporter.has_errors());
        let indents = tokens.iter().filter(|t| t.kind == TokenKind::Indent).count();
        let dedents = tokens.iter().filter(|t| t.kind == TokenKind::Dedent).count();
        assert_eq!(indents, dedents);
        assert_eq!(indents, 2);
    }

    #[test]
    fn test_trailing_dedents_at_eof() {
        let source = "def f():\n    if x:\n        return 1";
        let (tokens, _) = lex(source);
        let indents = tokens.iter().filter(|t| t.kind == TokenKind::Indent).count();
        let dedents = tokens.iter().filter(|t| t.kind == TokenKind::Dedent).count();
        assert_eq!(indents, 2);
        assert_eq!(dedents, 2);
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn test_blank_and_comment_lines_do_not_indent() {
        let source = "def f():\n    let a = 1\n\n    # comment only\n    let b = 2\n";
        let (tokens, reporter) = lex(source);
        assert!(!reporter.has_errors());
        let indents = tokens.iter().filter(|t| t.kind == TokenKind::Indent).count();
        assert_eq!(indents, 1);
    }

    #[test]
    fn test_mixed_tabs_and_spaces() {
        let (_, reporter) = lex("def f():\n \tlet a = 1\n");
        let diags = reporter.diagnostics();
        assert!(diags.iter().any(|d| d.code == ReportCode::L001));
    }

    #[test]
    fn test_tab_counts_as_one_level() {
        let source = "def f():\n\tlet a = 1\n";
        let (tokens, reporter) = lex(source);
        assert!(!reporter.has_errors());
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Indent));
    }

    #[test]
    fn test_block_comment_spans_lines() {
        let (tokens, reporter) = lex("let a ## spanning\nseveral lines ## = 1");
        assert!(!reporter.has_errors());
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Let, TokenKind::Ident, TokenKind::Eq, TokenKind::Int, TokenKind::Eof]
        );
    }

    #[test]
    fn test_string_escapes() {
        let (tokens, reporter) = lex(r#"let s = "a\tb\n\x41\u{1F600}""#);
        assert!(!reporter.has_errors());
        let s = tokens.iter().find(|t| t.kind == TokenKind::Str).unwrap();
        assert_eq!(s.lexeme.as_str(), "a\tb\nA\u{1F600}");
    }

    #[test]
    fn test_single_quoted_string() {
        let (tokens, reporter) = lex("let s = 'hi'");
        assert!(!reporter.has_errors());
        let s = tokens.iter().find(|t| t.kind == TokenKind::Str).unwrap();
        assert_eq!(s.lexeme.as_str(), "hi");
    }

    #[test]
    fn test_unterminated_string_recovers_on_next_line() {
        let (tokens, reporter) = lex("let s = \"oops\nlet t = 1\n");
        let diags = reporter.diagnostics();
        assert!(diags.iter().any(|d| d.code == ReportCode::L002));
        // Lexing continues: the second let is tokenized.
        let lets = tokens.iter().filter(|t| t.kind == TokenKind::Let).count();
        assert_eq!(lets, 2);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Error));
    }

    #[test]
    fn test_bad_escape() {
        let (_, reporter) = lex(r#"let s = "\q""#);
        assert!(reporter.diagnostics().iter().any(|d| d.code == ReportCode::L005));
    }

    #[test]
    fn test_bad_unicode_escape() {
        let (_, reporter) = lex(r#"let s = "\u{}""#);
        assert!(reporter.diagnostics().iter().any(|d| d.code == ReportCode::L006));
    }

    #[test]
    fn test_template_literal_emission() {
        let (tokens, reporter) = lex("let s = `a ${x} b ${y} c`");
        assert!(!reporter.has_errors());
        let shape: Vec<_> = tokens
            .iter()
            .filter(|t| {
                matches!(
                    t.kind,
                    TokenKind::TemplateStart | TokenKind::TemplateExpr | TokenKind::TemplateEnd
                )
            })
            .map(|t| (t.kind, t.lexeme.as_str()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (TokenKind::TemplateStart, "a "),
                (TokenKind::TemplateExpr, "x"),
                (TokenKind::TemplateStart, " b "),
                (TokenKind::TemplateExpr, "y"),
                (TokenKind::TemplateEnd, " c"),
            ]
        );
    }

    #[test]
    fn test_template_without_substitution() {
        let (tokens, reporter) = lex("let s = `plain`");
        assert!(!reporter.has_errors());
        let start = tokens.iter().find(|t| t.kind == TokenKind::TemplateStart).unwrap();
        assert_eq!(start.lexeme.as_str(), "plain");
        assert!(tokens.iter().any(|t| t.kind == TokenKind::TemplateEnd));
    }

    #[test]
    fn test_template_brace_nesting() {
        let (tokens, reporter) = lex("let s = `v=${ {1: 2}[1] }`");
        assert!(!reporter.has_errors());
        let expr = tokens.iter().find(|t| t.kind == TokenKind::TemplateExpr).unwrap();
        assert_eq!(expr.lexeme.as_str(), " {1: 2}[1] ");
    }

    #[test]
    fn test_template_newline_in_substitution() {
        let (_, reporter) = lex("let s = `a ${x\n} b`");
        assert!(reporter.diagnostics().iter().any(|d| d.code == ReportCode::L007));
    }

    #[test]
    fn test_number_bases() {
        let (tokens, reporter) = lex("0xFF 0b1010 0o17 017 42 0");
        assert!(!reporter.has_errors());
        let ints: Vec<_> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Int)
            .map(|t| int_value(t.lexeme.as_str()))
            .collect();
        assert_eq!(ints, vec![255, 10, 15, 15, 42, 0]);
    }

    #[test]
    fn test_float_forms() {
        let (tokens, reporter) = lex("3.14 1e10 2.5e-3 1.5f");
        assert!(!reporter.has_errors());
        let floats: Vec<_> = tokens
            .iter()
            .filter(|t| matches!(t.kind, TokenKind::Float32 | TokenKind::Float64))
            .collect();
        assert_eq!(floats.len(), 4);
        assert_eq!(floats[3].kind, TokenKind::Float32);
        assert!((float_value(floats[0].lexeme.as_str()) - 3.14).abs() < 1e-9);
        assert!((float_value(floats[2].lexeme.as_str()) - 0.0025).abs() < 1e-12);
    }

    #[test]
    fn test_integer_suffixes_recorded_in_lexeme() {
        let (tokens, reporter) = lex("10l 7u");
        assert!(!reporter.has_errors());
        let ints: Vec<_> = tokens.iter().filter(|t| t.kind == TokenKind::Int).collect();
        assert_eq!(ints[0].lexeme.as_str(), "10l");
        assert_eq!(ints[1].lexeme.as_str(), "7u");
    }

    #[test]
    fn test_max_int_and_overflow() {
        let (tokens, reporter) = lex("9223372036854775807");
        assert!(!reporter.has_errors());
        assert_eq!(int_value(tokens[0].lexeme.as_str()), i64::MAX);

        let (tokens, reporter) = lex("9223372036854775808");
        assert!(reporter.diagnostics().iter().any(|d| d.code == ReportCode::L003));
        assert_eq!(tokens[0].kind, TokenKind::Error);
    }

    #[test]
    fn test_missing_exponent_digits() {
        let (_, reporter) = lex("1e+");
        assert!(reporter.diagnostics().iter().any(|d| d.code == ReportCode::L003));
    }

    #[test]
    fn test_operator_maximal_munch() {
        let (tokens, reporter) = lex("a === b !== c <<= d **= e ?: f ?? g ?. h");
        assert!(!reporter.has_errors());
        let ops: Vec<_> = kinds(&tokens)
            .into_iter()
            .filter(|k| !matches!(k, TokenKind::Ident | TokenKind::Eof))
            .collect();
        assert_eq!(
            ops,
            vec![
                TokenKind::EqEqEq,
                TokenKind::BangEqEq,
                TokenKind::ShlEq,
                TokenKind::StarStarEq,
                TokenKind::Elvis,
                TokenKind::QuestionQuestion,
                TokenKind::SafeDot,
            ]
        );
    }

    #[test]
    fn test_channel_operators() {
        let (tokens, reporter) = lex("ch <- v; x = -< ch");
        assert!(!reporter.has_errors());
        assert!(tokens.iter().any(|t| t.kind == TokenKind::ArrowLeft));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::RecvArrow));
    }

    #[test]
    fn test_range_operators() {
        let (tokens, reporter) = lex("0..10 0...10");
        assert!(!reporter.has_errors());
        assert!(tokens.iter().any(|t| t.kind == TokenKind::DotDot));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::DotDotDot));
    }

    #[test]
    fn test_invalid_character_recovery() {
        let (tokens, reporter) = lex("@");
        let diags = reporter.diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, ReportCode::L001);
        assert_eq!(kinds(&tokens), vec![TokenKind::Error, TokenKind::Eof]);
    }

    #[test]
    fn test_error_budget_saturation() {
        let source = "@".repeat(150);
        let reporter = Reporter::new();
        let options = LexOptions { indent_width: 4, max_errors: 100 };
        tokenize_with(&source, "test.sbl", &reporter, options);
        assert!(reporter.has_fatal());
        let diags = reporter.diagnostics();
        assert!(diags
            .iter()
            .any(|d| d.code == ReportCode::L004 && d.severity == Severity::Fatal));
        // The budget stops the scan: 100 L001 errors plus the L004 fatal.
        assert_eq!(diags.len(), 101);
    }

    #[test]
    fn test_lexing_is_deterministic() {
        let source = "def f(x: int) -> int:\n    return x * 2\n";
        let (a, _) = lex(source);
        let (b, _) = lex(source);
        assert_eq!(a, b);
    }

    #[test]
    fn test_positions() {
        let (tokens, _) = lex("let x\nlet y");
        assert_eq!(tokens[0].pos.line, 1);
        assert_eq!(tokens[0].pos.column, 1);
        assert_eq!(tokens[1].pos.column, 5);
        assert_eq!(tokens[2].pos.line, 2);
    }

    #[test]
    fn test_every_token_has_a_position() {
        let (tokens, _) = lex("def f():\n    return 1\n");
        for t in &tokens {
            assert!(t.pos.line >= 1 || t.kind == TokenKind::Eof);
        }
    }
}
