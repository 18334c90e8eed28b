//! Declaration parsing: functions, classes, enums, traits, impl blocks.

use sablec_lex::TokenKind;
use sablec_util::{ReportCode, Symbol};

use crate::ast::*;
use crate::Parser;

impl<'a> Parser<'a> {
    /// `def name(...)` / `async def ...` / extension `def Type.name(...)`.
    /// The `async` keyword, if any, is already consumed.
    pub(crate) fn parse_func_stmt(&mut self, is_async: bool) -> Stmt {
        let tok = self.advance(); // `def`
        let func = self.parse_func_decl(is_async, tok.pos);
        Stmt {
            pos: tok.pos,
            kind: StmtKind::Func(func),
        }
    }

    fn parse_func_decl(&mut self, is_async: bool, pos: sablec_util::Pos) -> FuncDecl {
        let mut name = match self.expect(TokenKind::Ident, ReportCode::S006, "function name") {
            Some(t) => t.lexeme,
            None => {
                self.synchronize();
                return FuncDecl {
                    name: Symbol::intern("<error>"),
                    generics: Vec::new(),
                    params: Vec::new(),
                    ret: None,
                    body: Vec::new(),
                    is_async,
                    receiver: None,
                    pos,
                };
            }
        };

        // Extension function `def Type.name(...)`.
        let receiver = if self.matches(TokenKind::Dot) {
            let recv = name;
            name = self
                .expect(TokenKind::Ident, ReportCode::S006, "extension method name")
                .map(|t| t.lexeme)
                .unwrap_or_else(|| Symbol::intern("<error>"));
            Some(recv)
        } else {
            None
        };

        let generics = self.parse_generic_params();

        if self
            .expect(TokenKind::LParen, ReportCode::S006, "'('")
            .is_none()
        {
            self.synchronize();
            return FuncDecl {
                name,
                generics,
                params: Vec::new(),
                ret: None,
                body: Vec::new(),
                is_async,
                receiver,
                pos,
            };
        }
        let params = self.parse_params();

        let ret = if self.matches(TokenKind::Arrow) {
            Some(self.parse_type())
        } else {
            None
        };

        let body = self.parse_suite();

        FuncDecl {
            name,
            generics,
            params,
            ret,
            body,
            is_async,
            receiver,
            pos,
        }
    }

    /// Generic parameter list `<T, U>`, or empty.
    pub(crate) fn parse_generic_params(&mut self) -> Vec<Symbol> {
        let mut generics = Vec::new();
        if self.check(TokenKind::Lt) {
            self.advance();
            loop {
                match self.expect(TokenKind::Ident, ReportCode::S006, "type parameter name") {
                    Some(t) => generics.push(t.lexeme),
                    None => break,
                }
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            self.expect_generic_close();
        }
        generics
    }

    /// Parameter list; the opening `(` is already consumed, and the
    /// closing `)` is consumed here.
    pub(crate) fn parse_params(&mut self) -> Vec<Param> {
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let tok = self.peek();
                let name = if tok.kind == TokenKind::SelfKw {
                    self.advance();
                    Symbol::intern("self")
                } else {
                    match self.expect(TokenKind::Ident, ReportCode::S006, "parameter name") {
                        Some(t) => t.lexeme,
                        None => break,
                    }
                };
                let ty = if self.matches(TokenKind::Colon) {
                    Some(self.parse_type())
                } else {
                    None
                };
                let default = if self.matches(TokenKind::Eq) {
                    Some(self.parse_expr())
                } else {
                    None
                };
                let moved = matches!(
                    ty.as_ref().map(|t| &t.kind),
                    Some(TypeExprKind::RvalueRef(_))
                );
                params.push(Param {
                    name,
                    ty,
                    default,
                    moved,
                    pos: tok.pos,
                });
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        if self
            .expect(TokenKind::RParen, ReportCode::S002, "')'")
            .is_none()
        {
            self.synchronize_to(TokenKind::RParen);
            self.matches(TokenKind::RParen);
        }
        params
    }

    /// `class Name<T>(Base):` with fields and methods in the suite.
    /// `struct` shares this grammar.
    pub(crate) fn parse_class_stmt(&mut self) -> Stmt {
        let tok = self.advance(); // `class` or `struct`
        let name = match self.expect(TokenKind::Ident, ReportCode::S007, "class name") {
            Some(t) => t.lexeme,
            None => {
                self.synchronize();
                return Stmt {
                    pos: tok.pos,
                    kind: StmtKind::Error,
                };
            }
        };
        let generics = self.parse_generic_params();
        let base = if self.matches(TokenKind::LParen) {
            let base = self
                .expect(TokenKind::Ident, ReportCode::S007, "base class name")
                .map(|t| t.lexeme);
            if self
                .expect(TokenKind::RParen, ReportCode::S002, "')'")
                .is_none()
            {
                self.synchronize_to(TokenKind::RParen);
                self.matches(TokenKind::RParen);
            }
            base
        } else {
            None
        };

        let mut fields = Vec::new();
        let mut methods = Vec::new();

        if self
            .expect(TokenKind::Colon, ReportCode::S007, "':' after class header")
            .is_none()
        {
            self.synchronize();
            return Stmt {
                pos: tok.pos,
                kind: StmtKind::Error,
            };
        }
        if self.matches(TokenKind::Indent) {
            while !self.check(TokenKind::Dedent) && !self.at_end() {
                let member_tok = self.peek();
                match member_tok.kind {
                    TokenKind::Def => {
                        self.advance();
                        methods.push(self.parse_func_decl(false, member_tok.pos));
                    }
                    TokenKind::Async => {
                        self.advance();
                        if self
                            .expect(TokenKind::Def, ReportCode::S006, "'def' after 'async'")
                            .is_some()
                        {
                            methods.push(self.parse_func_decl(true, member_tok.pos));
                        } else {
                            self.synchronize();
                        }
                    }
                    TokenKind::Ident => {
                        self.advance();
                        if self
                            .expect(TokenKind::Colon, ReportCode::S007, "':' after field name")
                            .is_none()
                        {
                            self.synchronize();
                            continue;
                        }
                        let ty = self.parse_type();
                        let default = if self.matches(TokenKind::Eq) {
                            Some(self.parse_expr())
                        } else {
                            None
                        };
                        self.matches(TokenKind::Semicolon);
                        fields.push(FieldDecl {
                            name: member_tok.lexeme,
                            ty,
                            default,
                            pos: member_tok.pos,
                        });
                    }
                    TokenKind::Semicolon => {
                        self.advance();
                    }
                    _ => {
                        self.error_at(
                            ReportCode::S007,
                            "expected field or method in class body".to_owned(),
                            member_tok,
                        );
                        self.synchronize();
                    }
                }
            }
            self.matches(TokenKind::Dedent);
        }

        Stmt {
            pos: tok.pos,
            kind: StmtKind::Class(ClassDecl {
                name,
                generics,
                base,
                fields,
                methods,
                pos: tok.pos,
            }),
        }
    }

    /// `enum Name<T>:` with one variant per line.
    pub(crate) fn parse_enum_stmt(&mut self) -> Stmt {
        let tok = self.advance();
        let name = match self.expect(TokenKind::Ident, ReportCode::S013, "enum name") {
            Some(t) => t.lexeme,
            None => {
                self.synchronize();
                return Stmt {
                    pos: tok.pos,
                    kind: StmtKind::Error,
                };
            }
        };
        let generics = self.parse_generic_params();
        let mut variants = Vec::new();

        if self
            .expect(TokenKind::Colon, ReportCode::S013, "':' after enum header")
            .is_none()
        {
            self.synchronize();
            return Stmt {
                pos: tok.pos,
                kind: StmtKind::Error,
            };
        }
        if self.matches(TokenKind::Indent) {
            while !self.check(TokenKind::Dedent) && !self.at_end() {
                if self.matches(TokenKind::Semicolon) {
                    continue;
                }
                let var_tok = self.peek();
                let var_name = match self.expect(TokenKind::Ident, ReportCode::S013, "variant name")
                {
                    Some(t) => t.lexeme,
                    None => {
                        self.synchronize();
                        continue;
                    }
                };
                let mut payload = Vec::new();
                if self.matches(TokenKind::LParen) {
                    if !self.check(TokenKind::RParen) {
                        loop {
                            payload.push(self.parse_type());
                            if !self.matches(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    if self
                        .expect(TokenKind::RParen, ReportCode::S002, "')'")
                        .is_none()
                    {
                        self.synchronize_to(TokenKind::RParen);
                        self.matches(TokenKind::RParen);
                    }
                }
                variants.push(VariantDecl {
                    name: var_name,
                    payload,
                    pos: var_tok.pos,
                });
            }
            self.matches(TokenKind::Dedent);
        }

        Stmt {
            pos: tok.pos,
            kind: StmtKind::Enum(EnumDecl {
                name,
                generics,
                variants,
                pos: tok.pos,
            }),
        }
    }

    /// `trait Name:` with method signatures. `interface` shares this
    /// grammar.
    pub(crate) fn parse_trait_stmt(&mut self) -> Stmt {
        let tok = self.advance();
        let name = match self.expect(TokenKind::Ident, ReportCode::S016, "trait name") {
            Some(t) => t.lexeme,
            None => {
                self.synchronize();
                return Stmt {
                    pos: tok.pos,
                    kind: StmtKind::Error,
                };
            }
        };
        let generics = self.parse_generic_params();
        let mut methods = Vec::new();

        if self
            .expect(TokenKind::Colon, ReportCode::S016, "':' after trait header")
            .is_none()
        {
            self.synchronize();
            return Stmt {
                pos: tok.pos,
                kind: StmtKind::Error,
            };
        }
        if self.matches(TokenKind::Indent) {
            while !self.check(TokenKind::Dedent) && !self.at_end() {
                if self.matches(TokenKind::Semicolon) {
                    continue;
                }
                let sig_tok = self.peek();
                if !self.matches(TokenKind::Def) {
                    self.error_at(
                        ReportCode::S016,
                        "expected method signature in trait body".to_owned(),
                        sig_tok,
                    );
                    self.synchronize();
                    continue;
                }
                let sig_name = match self.expect(TokenKind::Ident, ReportCode::S016, "method name")
                {
                    Some(t) => t.lexeme,
                    None => {
                        self.synchronize();
                        continue;
                    }
                };
                self.expect(TokenKind::LParen, ReportCode::S006, "'('");
                let params = self.parse_params();
                let ret = if self.matches(TokenKind::Arrow) {
                    Some(self.parse_type())
                } else {
                    None
                };
                self.matches(TokenKind::Semicolon);
                methods.push(FuncSig {
                    name: sig_name,
                    params,
                    ret,
                    pos: sig_tok.pos,
                });
            }
            self.matches(TokenKind::Dedent);
        }

        Stmt {
            pos: tok.pos,
            kind: StmtKind::Trait(TraitDecl {
                name,
                generics,
                methods,
                pos: tok.pos,
            }),
        }
    }

    /// `impl Trait for Type:` or inherent `impl Type:`.
    pub(crate) fn parse_impl_stmt(&mut self) -> Stmt {
        let tok = self.advance();
        let first = match self.expect(TokenKind::Ident, ReportCode::S017, "type or trait name") {
            Some(t) => t.lexeme,
            None => {
                self.synchronize();
                return Stmt {
                    pos: tok.pos,
                    kind: StmtKind::Error,
                };
            }
        };
        let (trait_name, self_ty) = if self.matches(TokenKind::For) {
            match self.expect(TokenKind::Ident, ReportCode::S017, "type name after 'for'") {
                Some(t) => (Some(first), t.lexeme),
                None => {
                    self.synchronize();
                    return Stmt {
                        pos: tok.pos,
                        kind: StmtKind::Error,
                    };
                }
            }
        } else {
            (None, first)
        };

        let mut methods = Vec::new();
        if self
            .expect(TokenKind::Colon, ReportCode::S017, "':' after impl header")
            .is_none()
        {
            self.synchronize();
            return Stmt {
                pos: tok.pos,
                kind: StmtKind::Error,
            };
        }
        if self.matches(TokenKind::Indent) {
            while !self.check(TokenKind::Dedent) && !self.at_end() {
                let member_tok = self.peek();
                if self.matches(TokenKind::Def) {
                    methods.push(self.parse_func_decl(false, member_tok.pos));
                } else if self.matches(TokenKind::Async) {
                    if self
                        .expect(TokenKind::Def, ReportCode::S006, "'def' after 'async'")
                        .is_some()
                    {
                        methods.push(self.parse_func_decl(true, member_tok.pos));
                    } else {
                        self.synchronize();
                    }
                } else if self.matches(TokenKind::Semicolon) {
                    continue;
                } else {
                    self.error_at(
                        ReportCode::S017,
                        "expected method in impl body".to_owned(),
                        member_tok,
                    );
                    self.synchronize();
                }
            }
            self.matches(TokenKind::Dedent);
        }

        Stmt {
            pos: tok.pos,
            kind: StmtKind::Impl(ImplBlock {
                trait_name,
                self_ty,
                methods,
                pos: tok.pos,
            }),
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
    fn test_generic_function() {
        let ast = parse_ok("def id<T>(x: T) -> T:\n    return x\n");
        match &ast[0].kind {
            StmtKind::Func(f) => {
                assert_eq!(f.generics.len(), 1);
                assert_eq!(f.generics[0].as_str(), "T");
                assert_eq!(f.params.len(), 1);
            }
            other => panic!("expected func, got {:?}", other),
        }
    }

    #[test]
    fn test_async_function() {
        let ast = parse_ok("async def fetch(url: string) -> string:\n    return url\n");
        match &ast[0].kind {
            StmtKind::Func(f) => assert!(f.is_async),
            other => panic!("expected func, got {:?}", other),
        }
    }

    #[test]
    fn test_extension_function() {
        let ast = parse_ok("def string.shout(self) -> string:\n    return self\n");
        match &ast[0].kind {
            StmtKind::Func(f) => {
                assert_eq!(f.receiver.unwrap().as_str(), "string");
                assert_eq!(f.name.as_str(), "shout");
            }
            other => panic!("expected func, got {:?}", other),
        }
    }

    #[test]
    fn test_default_parameter() {
        let ast = parse_ok("def greet(name: string = \"world\") -> void:\n    print(name)\n");
        match &ast[0].kind {
            StmtKind::Func(f) => assert!(f.params[0].default.is_some()),
            other => panic!("expected func, got {:?}", other),
        }
    }

    #[test]
    fn test_class_with_fields_and_methods() {
        let ast = parse_ok(
            "class Point:\n    x: float64\n    y: float64 = 0.0\n    def dist(self) -> float64:\n        return self.x\n",
        );
        match &ast[0].kind {
            StmtKind::Class(c) => {
                assert_eq!(c.name.as_str(), "Point");
                assert_eq!(c.fields.len(), 2);
                assert!(c.fields[1].default.is_some());
                assert_eq!(c.methods.len(), 1);
            }
            other => panic!("expected class, got {:?}", other),
        }
    }

    #[test]
    fn test_class_inheritance_and_generics() {
        let ast = parse_ok("class Box<T>(Container):\n    value: T\n");
        match &ast[0].kind {
            StmtKind::Class(c) => {
                assert_eq!(c.generics.len(), 1);
                assert_eq!(c.base.unwrap().as_str(), "Container");
            }
            other => panic!("expected class, got {:?}", other),
        }
    }

    #[test]
    fn test_enum_with_payloads() {
        let ast = parse_ok("enum Shape:\n    Circle(float64)\n    Rect(float64, float64)\n    Empty\n");
        match &ast[0].kind {
            StmtKind::Enum(e) => {
                assert_eq!(e.variants.len(), 3);
                assert_eq!(e.variants[1].payload.len(), 2);
                assert!(e.variants[2].payload.is_empty());
            }
            other => panic!("expected enum, got {:?}", other),
        }
    }

    #[test]
    fn test_trait_and_impl() {
        let ast = parse_ok(
            "trait Printable:\n    def fmt(self) -> string\nimpl Printable for Point:\n    def fmt(self) -> string:\n        return \"point\"\n",
        );
        match &ast[0].kind {
            StmtKind::Trait(t) => {
                assert_eq!(t.name.as_str(), "Printable");
                assert_eq!(t.methods.len(), 1);
            }
            other => panic!("expected trait, got {:?}", other),
        }
        match &ast[1].kind {
            StmtKind::Impl(i) => {
                assert_eq!(i.trait_name.unwrap().as_str(), "Printable");
                assert_eq!(i.self_ty.as_str(), "Point");
                assert_eq!(i.methods.len(), 1);
            }
            other => panic!("expected impl, got {:?}", other),
        }
    }

    #[test]
    fn test_struct_keyword_parses_as_class() {
        let ast = parse_ok("struct Pair:\n    a: int\n    b: int\n");
        assert!(matches!(&ast[0].kind, StmtKind::Class(c) if c.fields.len() == 2));
    }

    #[test]
    fn test_nested_function() {
        let ast = parse_ok("def outer() -> int:\n    def inner() -> int:\n        return 1\n    return inner()\n");
        match &ast[0].kind {
            StmtKind::Func(f) => {
                assert!(matches!(f.body[0].kind, StmtKind::Func(_)));
            }
            other => panic!("expected func, got {:?}", other),
        }
    }
}
