//! Type syntax parsing.
//!
//! Grammar (tightest first):
//!
//! ```text
//! type         = postfix_type { "|" postfix_type } ;
//! postfix_type = primary_type { "?" | "&&" } ;
//! primary_type = name [ "::" name ] [ "<" type { "," type } ">" ]
//!              | "(" [ type { "," type } ] ")" "->" type ;
//! ```

use sablec_lex::TokenKind;
use sablec_util::{ReportCode, Symbol};

use crate::ast::{TypeExpr, TypeExprKind};
use crate::Parser;

impl<'a> Parser<'a> {
    /// Parse a full type, including unions.
    pub(crate) fn parse_type(&mut self) -> TypeExpr {
        let first = self.parse_postfix_type();
        if !self.check(TokenKind::Pipe) {
            return first;
        }
        let pos = first.pos;
        let mut alts = vec![first];
        while self.matches(TokenKind::Pipe) {
            alts.push(self.parse_postfix_type());
        }
        TypeExpr {
            pos,
            kind: TypeExprKind::Union(alts),
        }
    }

    /// Parse a type with `?` and `&&` suffixes applied.
    pub(crate) fn parse_postfix_type(&mut self) -> TypeExpr {
        let mut ty = self.parse_primary_type();
        loop {
            if self.matches(TokenKind::Question) {
                ty = TypeExpr {
                    pos: ty.pos,
                    kind: TypeExprKind::Nullable(Box::new(ty)),
                };
            } else if self.matches(TokenKind::AmpAmp) {
                ty = TypeExpr {
                    pos: ty.pos,
                    kind: TypeExprKind::RvalueRef(Box::new(ty)),
                };
            } else {
                break;
            }
        }
        ty
    }

    fn parse_primary_type(&mut self) -> TypeExpr {
        let tok = self.peek();

        // Function type: (T1, ..., Tn) -> R
        if self.matches(TokenKind::LParen) {
            let mut params = Vec::new();
            if !self.check(TokenKind::RParen) {
                loop {
                    params.push(self.parse_type());
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
            }
            if self.expect(TokenKind::RParen, ReportCode::S002, "')'").is_none() {
                self.synchronize_to(TokenKind::RParen);
                self.matches(TokenKind::RParen);
            }
            self.expect(TokenKind::Arrow, ReportCode::S002, "'->' in function type");
            let ret = self.parse_postfix_type();
            return TypeExpr {
                pos: tok.pos,
                kind: TypeExprKind::Fn(params, Box::new(ret)),
            };
        }

        // `void` is a keyword token but names a type.
        if self.matches(TokenKind::Void) {
            return TypeExpr {
                pos: tok.pos,
                kind: TypeExprKind::Name(Symbol::intern("void")),
            };
        }
        if self.matches(TokenKind::Nil) {
            return TypeExpr {
                pos: tok.pos,
                kind: TypeExprKind::Name(Symbol::intern("nil")),
            };
        }

        if self.check(TokenKind::Ident) {
            let name_tok = self.advance();
            let name = name_tok.lexeme;

            // Qualified name `module::Name`.
            if self.matches(TokenKind::ColonColon) {
                if let Some(member) = self.expect(TokenKind::Ident, ReportCode::S002, "name after '::'") {
                    return TypeExpr {
                        pos: tok.pos,
                        kind: TypeExprKind::Qualified(name, member.lexeme),
                    };
                }
                return TypeExpr {
                    pos: tok.pos,
                    kind: TypeExprKind::Name(name),
                };
            }

            // Generic application `Name<T, ...>`.
            if self.check(TokenKind::Lt) {
                self.advance();
                let mut args = Vec::new();
                if !self.check(TokenKind::Gt) && !self.check(TokenKind::Shr) {
                    loop {
                        args.push(self.parse_type());
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect_generic_close();
                return TypeExpr {
                    pos: tok.pos,
                    kind: TypeExprKind::Generic(name, args),
                };
            }

            return TypeExpr {
                pos: tok.pos,
                kind: TypeExprKind::Name(name),
            };
        }

        let found = self.peek();
        self.error_at(
            ReportCode::S002,
            format!("expected type, found {}", found.kind.describe()),
            found,
        );
        TypeExpr {
            pos: tok.pos,
            kind: TypeExprKind::Name(Symbol::intern("<error>")),
        }
    }

    /// Consume the `>` closing a generic argument list, splitting a `>>`
    /// token in two for nested generics like `Map<string, list<int>>`.
    pub(crate) fn expect_generic_close(&mut self) {
        if self.matches(TokenKind::Gt) {
            return;
        }
        if self.check(TokenKind::Shr) {
            // Rewrite the `>>` into a single `>` and leave it for the
            // enclosing generic argument list.
            let tok = self.peek();
            self.tokens[self.cursor] =
                sablec_lex::Token::new(TokenKind::Gt, tok.lexeme, tok.pos);
            return;
        }
        let found = self.peek();
        self.error_at(
            ReportCode::S002,
            format!(
                "expected '>' to close generic arguments, found {}",
                found.kind.describe()
            ),
            found,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{StmtKind, TypeExprKind};
    use crate::parse_source;
    use sablec_util::Reporter;

    fn parse_let_type(source: &str) -> TypeExpr {
        let reporter = Reporter::new();
        let ast = parse_source(source, "t.sbl", &reporter);
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        match &ast[0].kind {
            StmtKind::Let(l) => l.ty.clone().expect("type annotation"),
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn test_primitive_name() {
        let ty = parse_let_type("let x: int = 1");
        assert!(matches!(ty.kind, TypeExprKind::Name(n) if n.as_str() == "int"));
    }

    #[test]
    fn test_nullable_suffix() {
        let ty = parse_let_type("let x: int? = nil");
        assert!(matches!(ty.kind, TypeExprKind::Nullable(_)));
    }

    #[test]
    fn test_generic_application() {
        let ty = parse_let_type("let x: list<int> = []");
        match ty.kind {
            TypeExprKind::Generic(name, args) => {
                assert_eq!(name.as_str(), "list");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected generic, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_generic_shr_split() {
        let ty = parse_let_type("let x: Map<string, list<int>> = {}");
        match ty.kind {
            TypeExprKind::Generic(name, args) => {
                assert_eq!(name.as_str(), "Map");
                assert_eq!(args.len(), 2);
                assert!(matches!(args[1].kind, TypeExprKind::Generic(..)));
            }
            other => panic!("expected generic, got {:?}", other),
        }
    }

    #[test]
    fn test_function_type() {
        let ty = parse_let_type("let f: (int, string) -> bool = g");
        match ty.kind {
            TypeExprKind::Fn(params, ret) => {
                assert_eq!(params.len(), 2);
                assert!(matches!(ret.kind, TypeExprKind::Name(n) if n.as_str() == "bool"));
            }
            other => panic!("expected fn type, got {:?}", other),
        }
    }

    #[test]
    fn test_union_type() {
        let ty = parse_let_type("let x: int | string = 1");
        assert!(matches!(ty.kind, TypeExprKind::Union(ref alts) if alts.len() == 2));
    }

    #[test]
    fn test_rvalue_ref_suffix() {
        let reporter = Reporter::new();
        let ast = parse_source("def f(x: string&&) -> void:\n    return\n", "t.sbl", &reporter);
        assert!(!reporter.has_errors());
        match &ast[0].kind {
            StmtKind::Func(f) => {
                assert!(f.params[0].moved);
            }
            other => panic!("expected func, got {:?}", other),
        }
    }

    #[test]
    fn test_qualified_type() {
        let ty = parse_let_type("let x: geom::Point = p");
        assert!(matches!(ty.kind, TypeExprKind::Qualified(m, n)
            if m.as_str() == "geom" && n.as_str() == "Point"));
    }
}
