//! sablec-par - Parser
//!
//! Tokens in, AST out. Statements are parsed by recursive descent;
//! expressions by Pratt precedence climbing (see [`expr`]). The parser
//! consumes the token stream linearly with one-token lookahead (`peek`,
//! `peek_next`).
//!
//! # Error recovery
//!
//! On a mismatched token the parser records an [`ErrorContext`] (message,
//! offending token, expected kinds) and resynchronizes to the next
//! statement boundary: a statement-leading keyword, a `Dedent` exiting the
//! enclosing block, a `;`, or end of input. `synchronize_to` recovers to a
//! specific delimiter after missing-`)`/`]`/`}` errors. Errors accumulate
//! and parsing continues, leaving `Error` holes in the AST that the type
//! checker tolerates; a count-based circuit breaker promotes to fatal when
//! the budget is exhausted.

pub mod ast;

mod expr;
mod items;
mod pattern;
mod stmt;
mod types;

pub use ast::*;

use sablec_lex::{Token, TokenKind};
use sablec_util::{Pos, ReportCode, Reporter, Symbol};

/// Parse errors tolerated before the circuit breaker trips.
const MAX_PARSE_ERRORS: u32 = 50;

/// Context recorded for each syntax error before recovery runs.
#[derive(Clone, Debug)]
pub struct ErrorContext {
    /// Human-readable description.
    pub message: String,
    /// The offending token.
    pub found: Token,
    /// Token kinds that would have been accepted.
    pub expected: Vec<TokenKind>,
    /// True when the error promoted to fatal.
    pub fatal: bool,
}

/// The Sable parser.
///
/// # Example
///
/// ```
/// use sablec_par::parse_source;
/// use sablec_util::Reporter;
///
/// let reporter = Reporter::new();
/// let ast = parse_source("let x = 1", "main.sbl", &reporter);
/// assert!(!reporter.has_errors());
/// assert_eq!(ast.len(), 1);
/// ```
pub struct Parser<'a> {
    tokens: Vec<Token>,
    cursor: usize,
    reporter: &'a Reporter,
    next_expr_id: u32,
    error_count: u32,
    fatal: bool,
    last_error: Option<ErrorContext>,
}

/// Lex and parse a single source string with default options.
pub fn parse_source(source: &str, filename: &str, reporter: &Reporter) -> Vec<Stmt> {
    let tokens = sablec_lex::tokenize_source(source, filename, reporter);
    Parser::new(tokens, reporter).parse()
}

impl<'a> Parser<'a> {
    /// Create a parser over a token stream.
    pub fn new(tokens: Vec<Token>, reporter: &'a Reporter) -> Self {
        Self::with_start_id(tokens, reporter, 0)
    }

    /// Create a parser whose expression ids start at `start_id`.
    ///
    /// Expression ids key the checker's resolved-type table and must be
    /// unique across a whole compilation unit, so multi-module loads thread
    /// a shared counter through each parse.
    pub fn with_start_id(tokens: Vec<Token>, reporter: &'a Reporter, start_id: u32) -> Self {
        Self {
            tokens,
            cursor: 0,
            reporter,
            next_expr_id: start_id,
            error_count: 0,
            fatal: false,
            last_error: None,
        }
    }

    /// The id the next expression node would receive.
    pub fn next_expr_id(&self) -> u32 {
        self.next_expr_id
    }

    /// The most recent error context, if any.
    pub fn last_error(&self) -> Option<&ErrorContext> {
        self.last_error.as_ref()
    }

    /// Parse a whole module: statements until end of input.
    pub fn parse(&mut self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        while !self.at_end() && !self.fatal {
            // Stray layout at top level: diagnose once and skip.
            if self.check(TokenKind::Indent) {
                let tok = self.advance();
                self.error_at(ReportCode::S001, "unexpected indentation".to_owned(), tok);
                continue;
            }
            if self.check(TokenKind::Dedent) || self.check(TokenKind::Semicolon) {
                self.advance();
                continue;
            }
            stmts.push(self.parse_stmt());
        }
        stmts
    }

    // =========================================================================
    // TOKEN ACCESS
    // =========================================================================

    pub(crate) fn peek(&self) -> Token {
        self.tokens
            .get(self.cursor)
            .copied()
            .unwrap_or_else(|| self.eof_token())
    }

    pub(crate) fn peek_next(&self) -> Token {
        self.tokens
            .get(self.cursor + 1)
            .copied()
            .unwrap_or_else(|| self.eof_token())
    }

    pub(crate) fn previous(&self) -> Token {
        if self.cursor == 0 {
            self.peek()
        } else {
            self.tokens[self.cursor - 1]
        }
    }

    fn eof_token(&self) -> Token {
        let pos = self
            .tokens
            .last()
            .map(|t| t.pos)
            .unwrap_or_else(Pos::dummy);
        Token::new(TokenKind::Eof, Symbol::empty(), pos)
    }

    pub(crate) fn at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    pub(crate) fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    pub(crate) fn check_next(&self, kind: TokenKind) -> bool {
        self.peek_next().kind == kind
    }

    pub(crate) fn advance(&mut self) -> Token {
        let tok = self.peek();
        if self.cursor < self.tokens.len() {
            self.cursor += 1;
        }
        tok
    }

    /// Consume the next token if it has the given kind.
    pub(crate) fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Require a token kind; on mismatch record an error context and return
    /// `None` without consuming. The caller chooses the recovery strategy.
    pub(crate) fn expect(
        &mut self,
        kind: TokenKind,
        code: ReportCode,
        what: &str,
    ) -> Option<Token> {
        if self.check(kind) {
            return Some(self.advance());
        }
        let found = self.peek();
        self.record_error(
            code,
            format!("expected {}, found {}", what, found.kind.describe()),
            found,
            vec![kind],
        );
        None
    }

    // =========================================================================
    // EXPRESSION IDS
    // =========================================================================

    pub(crate) fn fresh_id(&mut self) -> ExprId {
        let id = ExprId(self.next_expr_id);
        self.next_expr_id += 1;
        id
    }

    /// Build an expression node with a fresh id.
    pub(crate) fn mk(&mut self, pos: Pos, kind: ExprKind) -> Expr {
        Expr {
            id: self.fresh_id(),
            pos,
            kind,
        }
    }

    /// Build an error-hole expression at the current token.
    pub(crate) fn error_expr(&mut self) -> Expr {
        let pos = self.peek().pos;
        let id = self.fresh_id();
        Expr::error(id, pos)
    }

    // =========================================================================
    // ERROR RECOVERY
    // =========================================================================

    /// Record a syntax error at the given token.
    pub(crate) fn error_at(&mut self, code: ReportCode, message: String, found: Token) {
        self.record_error(code, message, found, Vec::new());
    }

    fn record_error(
        &mut self,
        code: ReportCode,
        message: String,
        found: Token,
        expected: Vec<TokenKind>,
    ) {
        self.error_count += 1;
        let fatal = self.error_count >= MAX_PARSE_ERRORS;
        self.last_error = Some(ErrorContext {
            message: message.clone(),
            found,
            expected,
            fatal,
        });
        if fatal {
            self.fatal = true;
            self.reporter.error(code, message, found.pos);
            self.reporter.fatal(
                ReportCode::S001,
                format!("too many syntax errors ({}); giving up", self.error_count),
                found.pos,
            );
        } else {
            self.reporter.error(code, message, found.pos);
        }
    }

    /// Skip tokens until the next statement boundary: a statement-leading
    /// keyword, a `Dedent` that exits the enclosing block, a `;`, or end of
    /// input. The boundary token itself is not consumed (except `;`).
    pub(crate) fn synchronize(&mut self) {
        while !self.at_end() {
            let kind = self.peek().kind;
            if kind == TokenKind::Semicolon {
                self.advance();
                return;
            }
            if kind == TokenKind::Dedent || kind.starts_statement() {
                return;
            }
            self.advance();
        }
    }

    /// Skip tokens until `kind` is the next token (not consumed), used
    /// after missing-delimiter recoveries.
    pub(crate) fn synchronize_to(&mut self, kind: TokenKind) {
        while !self.at_end() && !self.check(kind) {
            // Never run past the enclosing block.
            if self.check(TokenKind::Dedent) {
                return;
            }
            self.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_module() {
        let reporter = Reporter::new();
        let ast = parse_source("", "t.sbl", &reporter);
        assert!(ast.is_empty());
        assert!(!reporter.has_errors());
    }

    #[test]
    fn test_recovery_leaves_later_statements_intact() {
        let reporter = Reporter::new();
        // First line is malformed; the let on the next line must survive.
        let ast = parse_source("def (:\nlet x = 1\n", "t.sbl", &reporter);
        assert!(reporter.has_errors());
        assert!(ast
            .iter()
            .any(|s| matches!(s.kind, StmtKind::Let(ref l) if l.name.as_str() == "x")));
    }

    #[test]
    fn test_error_context_recorded() {
        let reporter = Reporter::new();
        let tokens = sablec_lex::tokenize_source("def 5", "t.sbl", &reporter);
        let mut parser = Parser::new(tokens, &reporter);
        parser.parse();
        let ctx = parser.last_error().expect("error context");
        assert!(!ctx.expected.is_empty() || !ctx.message.is_empty());
    }

    #[test]
    fn test_circuit_breaker() {
        let reporter = Reporter::new();
        // A long run of junk tokens trips the parse-error budget.
        let junk = "def (:\n".repeat(80);
        parse_source(&junk, "t.sbl", &reporter);
        assert!(reporter.has_fatal());
    }

    #[test]
    fn test_expr_ids_are_unique() {
        let reporter = Reporter::new();
        let ast = parse_source("let a = 1 + 2\nlet b = a * 3\n", "t.sbl", &reporter);
        let mut seen = std::collections::HashSet::new();
        fn walk(e: &Expr, seen: &mut std::collections::HashSet<u32>) {
            assert!(seen.insert(e.id.0), "duplicate expr id {:?}", e.id);
            match &e.kind {
                ExprKind::Binary(_, l, r) => {
                    walk(l, seen);
                    walk(r, seen);
                }
                ExprKind::Lit(_) | ExprKind::Var(_) => {}
                _ => {}
            }
        }
        for stmt in &ast {
            if let StmtKind::Let(l) = &stmt.kind {
                if let Some(init) = &l.init {
                    walk(init, &mut seen);
                }
            }
        }
        assert!(seen.len() >= 5);
    }
}
