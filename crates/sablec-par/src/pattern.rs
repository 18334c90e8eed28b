//! Pattern parsing.
//!
//! Grammar:
//!
//! ```text
//! pattern  = primary { "|" primary } ;
//! primary  = literal [ ".." literal | "..." literal ]
//!          | "is" type
//!          | "(" pattern { "," pattern } ")"
//!          | name "(" [ pattern { "," pattern } ] ")"
//!          | name "{" [ field_pat { "," field_pat } ] [ ".." ] "}"
//!          | name ;
//! ```
//!
//! A bare lowercase-or-uppercase name parses as a binding; the checker
//! reinterprets it as a nullary enum variant when the scrutinee's type has
//! one by that name.

use sablec_lex::TokenKind;
use sablec_util::ReportCode;

use crate::ast::{Lit, Pattern, PatternKind};
use crate::Parser;

impl<'a> Parser<'a> {
    /// Parse a pattern, including or-alternation.
    pub(crate) fn parse_pattern(&mut self) -> Pattern {
        let mut lhs = self.parse_pattern_primary();
        while self.matches(TokenKind::Pipe) {
            let rhs = self.parse_pattern_primary();
            let pos = lhs.pos;
            lhs = Pattern {
                pos,
                kind: PatternKind::Or(Box::new(lhs), Box::new(rhs)),
            };
        }
        lhs
    }

    fn parse_pattern_primary(&mut self) -> Pattern {
        let tok = self.peek();
        let pos = tok.pos;

        // Literal patterns, possibly the start of a range.
        if let Some(lit) = self.try_parse_pattern_lit() {
            if self.check(TokenKind::DotDot) || self.check(TokenKind::DotDotDot) {
                let inclusive = self.advance().kind == TokenKind::DotDotDot;
                match self.try_parse_pattern_lit() {
                    Some(hi) => {
                        return Pattern {
                            pos,
                            kind: PatternKind::Range(lit, hi, inclusive),
                        }
                    }
                    None => {
                        let found = self.peek();
                        self.error_at(
                            ReportCode::S009,
                            "expected literal after range operator in pattern".to_owned(),
                            found,
                        );
                        return Pattern {
                            pos,
                            kind: PatternKind::Lit(lit),
                        };
                    }
                }
            }
            return Pattern {
                pos,
                kind: PatternKind::Lit(lit),
            };
        }

        // Type-test pattern.
        if self.matches(TokenKind::Is) {
            let ty = self.parse_postfix_type();
            return Pattern {
                pos,
                kind: PatternKind::TypeTest(ty),
            };
        }

        // Tuple pattern.
        if self.matches(TokenKind::LParen) {
            let mut elems = Vec::new();
            if !self.check(TokenKind::RParen) {
                loop {
                    elems.push(self.parse_pattern());
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
            }
            if self.expect(TokenKind::RParen, ReportCode::S002, "')'").is_none() {
                self.synchronize_to(TokenKind::RParen);
                self.matches(TokenKind::RParen);
            }
            return Pattern {
                pos,
                kind: PatternKind::Tuple(elems),
            };
        }

        if self.check(TokenKind::Ident) {
            let name = self.advance().lexeme;

            if name.as_str() == "_" {
                return Pattern {
                    pos,
                    kind: PatternKind::Wildcard,
                };
            }

            // Constructor pattern.
            if self.matches(TokenKind::LParen) {
                let mut subs = Vec::new();
                if !self.check(TokenKind::RParen) {
                    loop {
                        subs.push(self.parse_pattern());
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                if self.expect(TokenKind::RParen, ReportCode::S002, "')'").is_none() {
                    self.synchronize_to(TokenKind::RParen);
                    self.matches(TokenKind::RParen);
                }
                return Pattern {
                    pos,
                    kind: PatternKind::Ctor(name, subs),
                };
            }

            // Struct pattern.
            if self.matches(TokenKind::LBrace) {
                let mut fields = Vec::new();
                let mut rest = false;
                while !self.check(TokenKind::RBrace) && !self.at_end() {
                    if self.matches(TokenKind::DotDot) {
                        rest = true;
                        break;
                    }
                    let field = match self.expect(TokenKind::Ident, ReportCode::S002, "field name") {
                        Some(t) => t.lexeme,
                        None => break,
                    };
                    let sub = if self.matches(TokenKind::Colon) {
                        self.parse_pattern()
                    } else {
                        // `Point { x }` binds the field to a same-named name.
                        Pattern {
                            pos,
                            kind: PatternKind::Bind(field),
                        }
                    };
                    fields.push((field, sub));
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                if self.expect(TokenKind::RBrace, ReportCode::S002, "'}'").is_none() {
                    self.synchronize_to(TokenKind::RBrace);
                    self.matches(TokenKind::RBrace);
                }
                return Pattern {
                    pos,
                    kind: PatternKind::Struct(name, fields, rest),
                };
            }

            return Pattern {
                pos,
                kind: PatternKind::Bind(name),
            };
        }

        let found = self.peek();
        self.error_at(
            ReportCode::S009,
            format!("expected pattern, found {}", found.kind.describe()),
            found,
        );
        Pattern {
            pos,
            kind: PatternKind::Wildcard,
        }
    }

    fn try_parse_pattern_lit(&mut self) -> Option<Lit> {
        let tok = self.peek();
        let lit = match tok.kind {
            TokenKind::Int => Lit::Int(sablec_lex::int_value(tok.lexeme.as_str())),
            TokenKind::Float32 => Lit::Float32(sablec_lex::float_value(tok.lexeme.as_str()) as f32),
            TokenKind::Float64 => Lit::Float64(sablec_lex::float_value(tok.lexeme.as_str())),
            TokenKind::Str => Lit::Str(tok.lexeme),
            TokenKind::True => Lit::Bool(true),
            TokenKind::False => Lit::Bool(false),
            TokenKind::Nil => Lit::Nil,
            TokenKind::Minus if self.check_next(TokenKind::Int) => {
                self.advance();
                let val = self.peek();
                self.advance();
                return Some(Lit::Int(-sablec_lex::int_value(val.lexeme.as_str())));
            }
            _ => return None,
        };
        self.advance();
        Some(lit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{MatchArm, StmtKind};
    use crate::parse_source;
    use sablec_util::Reporter;

    fn parse_arms(source: &str) -> Vec<MatchArm> {
        let reporter = Reporter::new();
        let ast = parse_source(source, "t.sbl", &reporter);
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        match ast.into_iter().next().unwrap().kind {
            StmtKind::Match(m) => m.arms,
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn test_wildcard_and_binding() {
        let arms = parse_arms("match v:\n    case _: return\n    case x: return\n");
        assert!(matches!(arms[0].pattern.kind, PatternKind::Wildcard));
        assert!(matches!(arms[1].pattern.kind, PatternKind::Bind(n) if n.as_str() == "x"));
    }

    #[test]
    fn test_constructor_pattern() {
        let arms = parse_arms("match v:\n    case Some(x): return\n    case None: return\n");
        match &arms[0].pattern.kind {
            PatternKind::Ctor(name, subs) => {
                assert_eq!(name.as_str(), "Some");
                assert_eq!(subs.len(), 1);
            }
            other => panic!("expected ctor, got {:?}", other),
        }
        // Bare `None` parses as a binding; the checker resolves it to the
        // nullary variant.
        assert!(matches!(arms[1].pattern.kind, PatternKind::Bind(n) if n.as_str() == "None"));
    }

    #[test]
    fn test_literal_and_range_patterns() {
        let arms = parse_arms("match v:\n    case 0: return\n    case 1..10: return\n    case -3: return\n");
        assert!(matches!(arms[0].pattern.kind, PatternKind::Lit(Lit::Int(0))));
        assert!(matches!(
            arms[1].pattern.kind,
            PatternKind::Range(Lit::Int(1), Lit::Int(10), false)
        ));
        assert!(matches!(arms[2].pattern.kind, PatternKind::Lit(Lit::Int(-3))));
    }

    #[test]
    fn test_or_pattern() {
        let arms = parse_arms("match v:\n    case 1 | 2 | 3: return\n");
        assert!(matches!(arms[0].pattern.kind, PatternKind::Or(..)));
    }

    #[test]
    fn test_struct_pattern_with_rest() {
        let arms = parse_arms("match v:\n    case Point { x: a, .. }: return\n");
        match &arms[0].pattern.kind {
            PatternKind::Struct(name, fields, rest) => {
                assert_eq!(name.as_str(), "Point");
                assert_eq!(fields.len(), 1);
                assert!(*rest);
            }
            other => panic!("expected struct pattern, got {:?}", other),
        }
    }

    #[test]
    fn test_type_test_pattern() {
        let arms = parse_arms("match v:\n    case is Circle: return\n");
        assert!(matches!(arms[0].pattern.kind, PatternKind::TypeTest(_)));
    }

    #[test]
    fn test_guard() {
        let arms = parse_arms("match v:\n    case x if x > 0: return\n");
        assert!(arms[0].guard.is_some());
    }
}
