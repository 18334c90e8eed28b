//! Statement parsing.
//!
//! Statements are parsed by recursive descent. Suites follow the layout
//! rules: after a `:`, either an `Indent`-delimited block or a single
//! statement on the same line.

use sablec_lex::TokenKind;
use sablec_util::ReportCode;

use crate::ast::*;
use crate::Parser;

impl<'a> Parser<'a> {
    /// Parse one statement.
    pub(crate) fn parse_stmt(&mut self) -> Stmt {
        let tok = self.peek();
        let pos = tok.pos;

        match tok.kind {
            TokenKind::Let | TokenKind::Const => self.parse_let(),
            TokenKind::Def => self.parse_func_stmt(false),
            TokenKind::Async => {
                self.advance();
                if self.check(TokenKind::Def) {
                    self.parse_func_stmt(true)
                } else {
                    let found = self.peek();
                    self.error_at(
                        ReportCode::S006,
                        "expected 'def' after 'async'".to_owned(),
                        found,
                    );
                    self.synchronize();
                    Stmt {
                        pos,
                        kind: StmtKind::Error,
                    }
                }
            }
            TokenKind::Class | TokenKind::Struct => self.parse_class_stmt(),
            TokenKind::Enum => self.parse_enum_stmt(),
            TokenKind::Trait | TokenKind::Interface => self.parse_trait_stmt(),
            TokenKind::Impl => self.parse_impl_stmt(),
            TokenKind::Module => self.parse_module_stmt(),
            TokenKind::Import | TokenKind::From => self.parse_import_stmt(),
            TokenKind::Export => self.parse_export_stmt(),
            TokenKind::If => self.parse_if_stmt(),
            TokenKind::While => {
                self.advance();
                let cond = self.parse_expr();
                let body = self.parse_suite();
                Stmt {
                    pos,
                    kind: StmtKind::While(cond, body),
                }
            }
            TokenKind::For => {
                self.advance();
                let name = match self.expect(TokenKind::Ident, ReportCode::S011, "loop variable") {
                    Some(t) => t.lexeme,
                    None => {
                        self.synchronize();
                        return Stmt {
                            pos,
                            kind: StmtKind::Error,
                        };
                    }
                };
                self.expect(TokenKind::In, ReportCode::S011, "'in'");
                let iterable = self.parse_expr();
                let body = self.parse_suite();
                Stmt {
                    pos,
                    kind: StmtKind::For(name, iterable, body),
                }
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expr())
                };
                self.matches(TokenKind::Semicolon);
                Stmt {
                    pos,
                    kind: StmtKind::Return(value),
                }
            }
            TokenKind::Match => self.parse_match_stmt(),
            TokenKind::Try => self.parse_try_stmt(),
            TokenKind::Throw => {
                self.advance();
                let value = self.parse_expr();
                self.matches(TokenKind::Semicolon);
                Stmt {
                    pos,
                    kind: StmtKind::Throw(value),
                }
            }
            TokenKind::Break => {
                self.advance();
                self.matches(TokenKind::Semicolon);
                Stmt {
                    pos,
                    kind: StmtKind::Break,
                }
            }
            TokenKind::Continue => {
                self.advance();
                self.matches(TokenKind::Semicolon);
                Stmt {
                    pos,
                    kind: StmtKind::Continue,
                }
            }
            TokenKind::Defer => {
                self.advance();
                let inner = self.parse_stmt();
                if !matches!(inner.kind, StmtKind::Expr(_) | StmtKind::Block(_)) {
                    self.reporter.error(
                        ReportCode::S020,
                        "deferred statement must be an expression or block".to_owned(),
                        pos,
                    );
                }
                Stmt {
                    pos,
                    kind: StmtKind::Defer(Box::new(inner)),
                }
            }
            TokenKind::Go => {
                self.advance();
                let call = self.parse_expr();
                self.matches(TokenKind::Semicolon);
                Stmt {
                    pos,
                    kind: StmtKind::Go(call),
                }
            }
            TokenKind::Select => self.parse_select_stmt(),
            _ => {
                let expr = self.parse_expr();
                let is_error = matches!(expr.kind, ExprKind::Error);
                if !expr.has_effects() {
                    self.reporter.error(
                        ReportCode::S004,
                        "expression statement has no effect".to_owned(),
                        expr.pos,
                    );
                }
                self.matches(TokenKind::Semicolon);
                if is_error {
                    // parse_expr did not consume the offending token.
                    self.synchronize();
                    return Stmt {
                        pos,
                        kind: StmtKind::Error,
                    };
                }
                Stmt {
                    pos,
                    kind: StmtKind::Expr(expr),
                }
            }
        }
    }

    fn at_statement_end(&self) -> bool {
        let kind = self.peek().kind;
        matches!(
            kind,
            TokenKind::Dedent | TokenKind::Eof | TokenKind::Semicolon
        ) || kind.starts_statement()
    }

    /// Parse a suite: `:` followed by an indented block, or a single
    /// statement on the same line.
    pub(crate) fn parse_suite(&mut self) -> Vec<Stmt> {
        if self
            .expect(TokenKind::Colon, ReportCode::S002, "':'")
            .is_none()
        {
            self.synchronize();
            return Vec::new();
        }
        if self.matches(TokenKind::Indent) {
            let stmts = self.parse_block_stmts();
            self.matches(TokenKind::Dedent);
            stmts
        } else {
            vec![self.parse_stmt()]
        }
    }

    /// Statements inside an indented block, stopping before the `Dedent`.
    fn parse_block_stmts(&mut self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        while !self.check(TokenKind::Dedent) && !self.at_end() {
            if self.matches(TokenKind::Semicolon) {
                continue;
            }
            if self.check(TokenKind::Indent) {
                let tok = self.advance();
                self.error_at(ReportCode::S001, "unexpected indentation".to_owned(), tok);
                continue;
            }
            stmts.push(self.parse_stmt());
        }
        stmts
    }

    fn parse_let(&mut self) -> Stmt {
        let tok = self.advance();
        let mutable = tok.kind == TokenKind::Let;
        let name = match self.expect(TokenKind::Ident, ReportCode::S002, "binding name") {
            Some(t) => t.lexeme,
            None => {
                self.synchronize();
                return Stmt {
                    pos: tok.pos,
                    kind: StmtKind::Error,
                };
            }
        };
        let ty = if self.matches(TokenKind::Colon) {
            Some(self.parse_type())
        } else {
            None
        };
        let init = if self.matches(TokenKind::Eq) {
            Some(self.parse_expr())
        } else {
            None
        };
        self.matches(TokenKind::Semicolon);
        Stmt {
            pos: tok.pos,
            kind: StmtKind::Let(LetStmt {
                name,
                ty,
                init,
                mutable,
            }),
        }
    }

    fn parse_if_stmt(&mut self) -> Stmt {
        let tok = self.advance();
        let cond = self.parse_expr();
        let then_body = self.parse_suite();

        let mut elifs = Vec::new();
        while self.check(TokenKind::Elif) {
            self.advance();
            let elif_cond = self.parse_expr();
            let elif_body = self.parse_suite();
            elifs.push((elif_cond, elif_body));
        }

        let else_body = if self.matches(TokenKind::Else) {
            Some(self.parse_suite())
        } else {
            None
        };

        Stmt {
            pos: tok.pos,
            kind: StmtKind::If(IfStmt {
                cond,
                then_body,
                elifs,
                else_body,
            }),
        }
    }

    fn parse_match_stmt(&mut self) -> Stmt {
        let tok = self.advance();
        let scrutinee = self.parse_expr();
        if self
            .expect(TokenKind::Colon, ReportCode::S009, "':' after match scrutinee")
            .is_none()
        {
            self.synchronize();
            return Stmt {
                pos: tok.pos,
                kind: StmtKind::Error,
            };
        }
        if self
            .expect(TokenKind::Indent, ReportCode::S009, "indented match arms")
            .is_none()
        {
            self.synchronize();
            return Stmt {
                pos: tok.pos,
                kind: StmtKind::Error,
            };
        }

        let mut arms = Vec::new();
        while !self.check(TokenKind::Dedent) && !self.at_end() {
            let arm_tok = self.peek();
            let pattern = if self.matches(TokenKind::Default) {
                Pattern {
                    pos: arm_tok.pos,
                    kind: PatternKind::Wildcard,
                }
            } else if self.matches(TokenKind::Case) {
                self.parse_pattern()
            } else {
                self.error_at(
                    ReportCode::S009,
                    "expected 'case' or 'default' in match".to_owned(),
                    arm_tok,
                );
                self.synchronize();
                continue;
            };
            let guard = if self.matches(TokenKind::If) {
                Some(self.parse_expr())
            } else {
                None
            };
            let body = self.parse_suite();
            arms.push(MatchArm {
                pattern,
                guard,
                body,
                pos: arm_tok.pos,
            });
        }
        self.matches(TokenKind::Dedent);

        Stmt {
            pos: tok.pos,
            kind: StmtKind::Match(MatchStmt { scrutinee, arms }),
        }
    }

    fn parse_try_stmt(&mut self) -> Stmt {
        let tok = self.advance();
        let body = self.parse_suite();

        let mut catches = Vec::new();
        while self.check(TokenKind::Catch) {
            let catch_tok = self.advance();
            self.expect(TokenKind::LParen, ReportCode::S010, "'(' after 'catch'");
            let name = match self.expect(TokenKind::Ident, ReportCode::S010, "exception binding") {
                Some(t) => t.lexeme,
                None => {
                    self.synchronize();
                    continue;
                }
            };
            let ty = if self.matches(TokenKind::Colon) {
                Some(self.parse_type())
            } else {
                None
            };
            if self
                .expect(TokenKind::RParen, ReportCode::S010, "')'")
                .is_none()
            {
                self.synchronize_to(TokenKind::RParen);
                self.matches(TokenKind::RParen);
            }
            let catch_body = self.parse_suite();
            catches.push(CatchClause {
                name,
                ty,
                body: catch_body,
                pos: catch_tok.pos,
            });
        }

        let finally = if self.matches(TokenKind::Finally) {
            Some(self.parse_suite())
        } else {
            None
        };

        if catches.is_empty() && finally.is_none() {
            self.reporter.error(
                ReportCode::S010,
                "try requires at least one catch or finally clause".to_owned(),
                tok.pos,
            );
        }

        Stmt {
            pos: tok.pos,
            kind: StmtKind::Try(TryStmt {
                body,
                catches,
                finally,
            }),
        }
    }

    fn parse_select_stmt(&mut self) -> Stmt {
        let tok = self.advance();
        if self
            .expect(TokenKind::Colon, ReportCode::S002, "':' after 'select'")
            .is_none()
        {
            self.synchronize();
            return Stmt {
                pos: tok.pos,
                kind: StmtKind::Error,
            };
        }
        if self
            .expect(TokenKind::Indent, ReportCode::S002, "indented select arms")
            .is_none()
        {
            self.synchronize();
            return Stmt {
                pos: tok.pos,
                kind: StmtKind::Error,
            };
        }

        let mut arms = Vec::new();
        while !self.check(TokenKind::Dedent) && !self.at_end() {
            let arm_tok = self.peek();
            if self.matches(TokenKind::Default) {
                let body = self.parse_suite();
                arms.push(SelectArm {
                    op: SelectOp::Default,
                    body,
                    pos: arm_tok.pos,
                });
                continue;
            }
            if !self.matches(TokenKind::Case) {
                self.error_at(
                    ReportCode::S001,
                    "expected 'case' or 'default' in select".to_owned(),
                    arm_tok,
                );
                self.synchronize();
                continue;
            }

            // The arm's channel operation parses as an ordinary expression:
            // `ch <- v` is a send, `<- ch` a receive, `v = <- ch` a
            // receive-and-bind.
            let op_expr = self.parse_expr();
            let op = match op_expr.kind {
                ExprKind::Send(chan, value) => SelectOp::Send {
                    chan: *chan,
                    value: *value,
                },
                ExprKind::Recv(chan) => SelectOp::Recv {
                    bind: None,
                    chan: *chan,
                },
                ExprKind::Assign(target, None, value) => match (target.kind, value.kind) {
                    (ExprKind::Var(name), ExprKind::Recv(chan)) => SelectOp::Recv {
                        bind: Some(name),
                        chan: *chan,
                    },
                    _ => {
                        self.reporter.error(
                            ReportCode::C012,
                            "select arm must be a channel send or receive".to_owned(),
                            arm_tok.pos,
                        );
                        SelectOp::Default
                    }
                },
                _ => {
                    self.reporter.error(
                        ReportCode::C012,
                        "select arm must be a channel send or receive".to_owned(),
                        arm_tok.pos,
                    );
                    SelectOp::Default
                }
            };
            let body = self.parse_suite();
            arms.push(SelectArm {
                op,
                body,
                pos: arm_tok.pos,
            });
        }
        self.matches(TokenKind::Dedent);

        Stmt {
            pos: tok.pos,
            kind: StmtKind::Select(arms),
        }
    }

    fn parse_module_stmt(&mut self) -> Stmt {
        let tok = self.advance();
        let name = match self.expect(TokenKind::Ident, ReportCode::S018, "module name") {
            Some(t) => t.lexeme,
            None => {
                self.synchronize();
                return Stmt {
                    pos: tok.pos,
                    kind: StmtKind::Error,
                };
            }
        };
        let body = self.parse_suite();
        Stmt {
            pos: tok.pos,
            kind: StmtKind::Module(name, body),
        }
    }

    fn parse_import_stmt(&mut self) -> Stmt {
        let tok = self.advance();
        if tok.kind == TokenKind::Import {
            // import M
            let module = match self.expect(TokenKind::Ident, ReportCode::S008, "module name") {
                Some(t) => t.lexeme,
                None => {
                    self.synchronize();
                    return Stmt {
                        pos: tok.pos,
                        kind: StmtKind::Error,
                    };
                }
            };
            self.matches(TokenKind::Semicolon);
            return Stmt {
                pos: tok.pos,
                kind: StmtKind::Import(ImportStmt {
                    module,
                    items: None,
                    pos: tok.pos,
                }),
            };
        }

        // from M import a, b as c
        let module = match self.expect(TokenKind::Ident, ReportCode::S008, "module name") {
            Some(t) => t.lexeme,
            None => {
                self.synchronize();
                return Stmt {
                    pos: tok.pos,
                    kind: StmtKind::Error,
                };
            }
        };
        if self
            .expect(TokenKind::Import, ReportCode::S008, "'import'")
            .is_none()
        {
            self.synchronize();
            return Stmt {
                pos: tok.pos,
                kind: StmtKind::Error,
            };
        }
        let mut items = Vec::new();
        loop {
            let name = match self.expect(TokenKind::Ident, ReportCode::S008, "imported name") {
                Some(t) => t.lexeme,
                None => break,
            };
            let alias = if self.matches(TokenKind::As) {
                self.expect(TokenKind::Ident, ReportCode::S008, "alias name")
                    .map(|t| t.lexeme)
            } else {
                None
            };
            items.push((name, alias));
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.matches(TokenKind::Semicolon);
        Stmt {
            pos: tok.pos,
            kind: StmtKind::Import(ImportStmt {
                module,
                items: Some(items),
                pos: tok.pos,
            }),
        }
    }

    fn parse_export_stmt(&mut self) -> Stmt {
        let tok = self.advance();

        // `export name` re-exports an existing declaration.
        if self.check(TokenKind::Ident) {
            let name = self.advance().lexeme;
            self.matches(TokenKind::Semicolon);
            return Stmt {
                pos: tok.pos,
                kind: StmtKind::Export(ExportStmt::Name(name)),
            };
        }

        let decl = self.parse_stmt();
        if !matches!(
            decl.kind,
            StmtKind::Func(_)
                | StmtKind::Class(_)
                | StmtKind::Enum(_)
                | StmtKind::Trait(_)
                | StmtKind::Let(_)
        ) {
            self.reporter.error(
                ReportCode::M010,
                "only declarations may be exported".to_owned(),
                tok.pos,
            );
        }
        Stmt {
            pos: tok.pos,
            kind: StmtKind::Export(ExportStmt::Decl(Box::new(decl))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_source;
    use sablec_util::Reporter;

    fn parse_ok(source: &str) -> Vec<Stmt> {
        let reporter = Reporter::new();
        let ast = parse_source(source, "t.sbl", &reporter);
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        ast
    }

    #[test]
    fn test_hello_world_shape() {
        let ast = parse_ok("def main() -> int:\n    print(\"hello\")\n    return 0\n");
        assert_eq!(ast.len(), 1);
        match &ast[0].kind {
            StmtKind::Func(f) => {
                assert_eq!(f.name.as_str(), "main");
                assert!(!f.is_async);
                assert_eq!(f.body.len(), 2);
                assert!(matches!(f.body[0].kind, StmtKind::Expr(_)));
                assert!(matches!(f.body[1].kind, StmtKind::Return(Some(_))));
            }
            other => panic!("expected func, got {:?}", other),
        }
    }

    #[test]
    fn test_if_elif_else() {
        let ast = parse_ok(
            "if a:\n    f()\nelif b:\n    g()\nelif c:\n    h()\nelse:\n    i()\n",
        );
        match &ast[0].kind {
            StmtKind::If(s) => {
                assert_eq!(s.elifs.len(), 2);
                assert!(s.else_body.is_some());
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_single_line_suite() {
        let ast = parse_ok("if ready: launch()\n");
        match &ast[0].kind {
            StmtKind::If(s) => assert_eq!(s.then_body.len(), 1),
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_while_and_for() {
        let ast = parse_ok("while x < 10:\n    x += 1\nfor i in 0..10:\n    f(i)\n");
        assert!(matches!(ast[0].kind, StmtKind::While(..)));
        match &ast[1].kind {
            StmtKind::For(name, _, body) => {
                assert_eq!(name.as_str(), "i");
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_return() {
        let ast = parse_ok("def f() -> void:\n    return\n");
        match &ast[0].kind {
            StmtKind::Func(f) => assert!(matches!(f.body[0].kind, StmtKind::Return(None))),
            other => panic!("expected func, got {:?}", other),
        }
    }

    #[test]
    fn test_match_statement() {
        let ast = parse_ok("match v:\n    case Some(x):\n        print(x)\n    default:\n        pass()\n");
        match &ast[0].kind {
            StmtKind::Match(m) => {
                assert_eq!(m.arms.len(), 2);
                assert!(matches!(m.arms[1].pattern.kind, PatternKind::Wildcard));
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn test_try_catch_finally() {
        let ast = parse_ok(
            "try:\n    risky()\ncatch (e: IoError):\n    handle(e)\nfinally:\n    cleanup()\n",
        );
        match &ast[0].kind {
            StmtKind::Try(t) => {
                assert_eq!(t.catches.len(), 1);
                assert_eq!(t.catches[0].name.as_str(), "e");
                assert!(t.finally.is_some());
            }
            other => panic!("expected try, got {:?}", other),
        }
    }

    #[test]
    fn test_throw_break_continue() {
        let ast = parse_ok("while x:\n    throw err\n    break\n    continue\n");
        match &ast[0].kind {
            StmtKind::While(_, body) => {
                assert!(matches!(body[0].kind, StmtKind::Throw(_)));
                assert!(matches!(body[1].kind, StmtKind::Break));
                assert!(matches!(body[2].kind, StmtKind::Continue));
            }
            other => panic!("expected while, got {:?}", other),
        }
    }

    #[test]
    fn test_defer() {
        let ast = parse_ok("def f() -> void:\n    defer close(h)\n    use(h)\n");
        match &ast[0].kind {
            StmtKind::Func(f) => assert!(matches!(f.body[0].kind, StmtKind::Defer(_))),
            other => panic!("expected func, got {:?}", other),
        }
    }

    #[test]
    fn test_go_statement() {
        let ast = parse_ok("go worker(1)\n");
        assert!(matches!(ast[0].kind, StmtKind::Go(_)));
    }

    #[test]
    fn test_select_statement() {
        let ast = parse_ok(
            "select:\n    case v = <- ch1:\n        use(v)\n    case ch2 <- 1:\n        sent()\n    default:\n        idle()\n",
        );
        match &ast[0].kind {
            StmtKind::Select(arms) => {
                assert_eq!(arms.len(), 3);
                assert!(matches!(
                    arms[0].op,
                    SelectOp::Recv { bind: Some(b), .. } if b.as_str() == "v"
                ));
                assert!(matches!(arms[1].op, SelectOp::Send { .. }));
                assert!(matches!(arms[2].op, SelectOp::Default));
            }
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn test_import_forms() {
        let ast = parse_ok("import math\nfrom geom import area, perim as p\n");
        assert!(matches!(
            &ast[0].kind,
            StmtKind::Import(i) if i.items.is_none() && i.module.as_str() == "math"
        ));
        match &ast[1].kind {
            StmtKind::Import(i) => {
                let items = i.items.as_ref().unwrap();
                assert_eq!(items.len(), 2);
                assert_eq!(items[1].0.as_str(), "perim");
                assert_eq!(items[1].1.unwrap().as_str(), "p");
            }
            other => panic!("expected import, got {:?}", other),
        }
    }

    #[test]
    fn test_export_forms() {
        let ast = parse_ok("export def f() -> int:\n    return 1\nexport f\n");
        assert!(matches!(&ast[0].kind, StmtKind::Export(ExportStmt::Decl(_))));
        assert!(matches!(&ast[1].kind, StmtKind::Export(ExportStmt::Name(n)) if n.as_str() == "f"));
    }

    #[test]
    fn test_module_block() {
        let ast = parse_ok("module geo:\n    def area() -> int:\n        return 4\n");
        match &ast[0].kind {
            StmtKind::Module(name, body) => {
                assert_eq!(name.as_str(), "geo");
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected module, got {:?}", other),
        }
    }

    #[test]
    fn test_non_effect_expression_statement() {
        let reporter = Reporter::new();
        parse_source("1 + 2\n", "t.sbl", &reporter);
        assert!(reporter
            .diagnostics()
            .iter()
            .any(|d| d.code == ReportCode::S004));
    }

    #[test]
    fn test_effectful_expression_statements_accepted() {
        let ast = parse_ok("f()\nx = 1\nch <- 2\ni++\n");
        assert_eq!(ast.len(), 4);
        for stmt in &ast {
            assert!(matches!(stmt.kind, StmtKind::Expr(_)));
        }
    }
}
