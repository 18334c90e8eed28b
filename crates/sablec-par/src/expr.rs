//! Expression parsing via Pratt precedence climbing.
//!
//! Each infix operator has a left binding power; the parser consumes
//! operators while their binding power is at least the current minimum,
//! parsing right-hand sides at the operator's right binding power.
//! Left-associative operators use `rbp = lbp + 1`, right-associative ones
//! `rbp = lbp - 1`.
//!
//! Precedence (lowest to highest): assignment and channel send, Elvis `?:`,
//! `??`, `||`, `&&`, `|`, `^`, `&`, equality, relational (`is`/`as`
//! included), shift, range, additive, multiplicative, `**` (right), unary
//! prefix, postfix (call, index, member, `?.`, `!`, `++`/`--`).

use sablec_lex::{Token, TokenKind};
use sablec_util::ReportCode;

use crate::ast::*;
use crate::Parser;

/// Binding power levels; higher binds tighter.
pub(crate) mod bp {
    pub const MIN: u8 = 0;
    /// `=` and compound assignments; channel send. Right-associative.
    pub const ASSIGN: u8 = 2;
    /// `?:`. Right-associative.
    pub const ELVIS: u8 = 4;
    /// `??`. Right-associative.
    pub const COALESCE: u8 = 6;
    /// `||`
    pub const OR: u8 = 8;
    /// `&&`
    pub const AND: u8 = 10;
    /// `|`
    pub const BIT_OR: u8 = 12;
    /// `^`
    pub const BIT_XOR: u8 = 14;
    /// `&`
    pub const BIT_AND: u8 = 16;
    /// `==` `!=` `===` `!==`
    pub const EQUALITY: u8 = 18;
    /// `<` `<=` `>` `>=` `is` `as`
    pub const RELATIONAL: u8 = 20;
    /// `<<` `>>`
    pub const SHIFT: u8 = 22;
    /// `..` `...`
    pub const RANGE: u8 = 23;
    /// `+` `-`
    pub const ADDITIVE: u8 = 24;
    /// `*` `/` `%`
    pub const MULTIPLICATIVE: u8 = 26;
    /// `**`. Right-associative.
    pub const POWER: u8 = 28;
    /// Unary prefix operators.
    pub const UNARY: u8 = 30;
    /// Call, index, member access, `!`, `++`/`--`.
    pub const POSTFIX: u8 = 32;
}

/// `(lbp, rbp)` for an infix or postfix token, or `None` when the token
/// cannot continue an expression.
fn infix_binding_power(kind: TokenKind) -> Option<(u8, u8)> {
    use TokenKind::*;
    let powers = match kind {
        k if k.is_assignment() => (bp::ASSIGN, bp::ASSIGN - 1),
        ArrowLeft => (bp::ASSIGN, bp::ASSIGN + 1),
        Elvis => (bp::ELVIS, bp::ELVIS - 1),
        QuestionQuestion => (bp::COALESCE, bp::COALESCE - 1),
        PipePipe => (bp::OR, bp::OR + 1),
        AmpAmp => (bp::AND, bp::AND + 1),
        Pipe => (bp::BIT_OR, bp::BIT_OR + 1),
        Caret => (bp::BIT_XOR, bp::BIT_XOR + 1),
        Amp => (bp::BIT_AND, bp::BIT_AND + 1),
        EqEq | BangEq | EqEqEq | BangEqEq => (bp::EQUALITY, bp::EQUALITY + 1),
        Lt | LtEq | Gt | GtEq | Is | As => (bp::RELATIONAL, bp::RELATIONAL + 1),
        Shl | Shr => (bp::SHIFT, bp::SHIFT + 1),
        DotDot | DotDotDot => (bp::RANGE, bp::RANGE + 1),
        Plus | Minus => (bp::ADDITIVE, bp::ADDITIVE + 1),
        Star | Slash | Percent => (bp::MULTIPLICATIVE, bp::MULTIPLICATIVE + 1),
        StarStar => (bp::POWER, bp::POWER - 1),
        LParen | LBracket | Dot | SafeDot | Bang | PlusPlus | MinusMinus => (bp::POSTFIX, 0),
        _ => return None,
    };
    Some(powers)
}

fn compound_op(kind: TokenKind) -> Option<BinOp> {
    let op = match kind {
        TokenKind::PlusEq => BinOp::Add,
        TokenKind::MinusEq => BinOp::Sub,
        TokenKind::StarEq => BinOp::Mul,
        TokenKind::SlashEq => BinOp::Div,
        TokenKind::PercentEq => BinOp::Rem,
        TokenKind::StarStarEq => BinOp::Pow,
        TokenKind::AmpEq => BinOp::BitAnd,
        TokenKind::PipeEq => BinOp::BitOr,
        TokenKind::CaretEq => BinOp::BitXor,
        TokenKind::ShlEq => BinOp::Shl,
        TokenKind::ShrEq => BinOp::Shr,
        _ => return None,
    };
    Some(op)
}

fn binary_op(kind: TokenKind) -> Option<BinOp> {
    let op = match kind {
        TokenKind::Plus => BinOp::Add,
        TokenKind::Minus => BinOp::Sub,
        TokenKind::Star => BinOp::Mul,
        TokenKind::Slash => BinOp::Div,
        TokenKind::Percent => BinOp::Rem,
        TokenKind::StarStar => BinOp::Pow,
        TokenKind::EqEq => BinOp::Eq,
        TokenKind::BangEq => BinOp::Ne,
        TokenKind::EqEqEq => BinOp::StrictEq,
        TokenKind::BangEqEq => BinOp::StrictNe,
        TokenKind::Lt => BinOp::Lt,
        TokenKind::LtEq => BinOp::Le,
        TokenKind::Gt => BinOp::Gt,
        TokenKind::GtEq => BinOp::Ge,
        TokenKind::Shl => BinOp::Shl,
        TokenKind::Shr => BinOp::Shr,
        TokenKind::Amp => BinOp::BitAnd,
        TokenKind::Pipe => BinOp::BitOr,
        TokenKind::Caret => BinOp::BitXor,
        _ => return None,
    };
    Some(op)
}

impl<'a> Parser<'a> {
    /// Parse a full expression.
    pub(crate) fn parse_expr(&mut self) -> Expr {
        self.parse_expr_bp(bp::MIN)
    }

    /// Pratt core: parse an expression whose operators all have binding
    /// power at least `min_bp`.
    pub(crate) fn parse_expr_bp(&mut self, min_bp: u8) -> Expr {
        let mut lhs = self.parse_prefix();

        loop {
            let kind = self.peek().kind;
            let Some((lbp, rbp)) = infix_binding_power(kind) else {
                break;
            };
            if lbp < min_bp {
                break;
            }
            let op_tok = self.advance();

            lhs = match kind {
                TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::Dot
                | TokenKind::SafeDot
                | TokenKind::Bang
                | TokenKind::PlusPlus
                | TokenKind::MinusMinus => self.parse_postfix(lhs, op_tok),

                TokenKind::Is => {
                    let ty = self.parse_postfix_type();
                    self.mk(op_tok.pos, ExprKind::TypeTest(Box::new(lhs), ty))
                }
                TokenKind::As => {
                    let ty = self.parse_postfix_type();
                    self.mk(op_tok.pos, ExprKind::Cast(Box::new(lhs), ty))
                }

                k if k.is_assignment() => {
                    if !lhs.is_place() {
                        self.error_at(
                            ReportCode::S005,
                            "invalid assignment target".to_owned(),
                            op_tok,
                        );
                    }
                    let rhs = self.parse_expr_bp(rbp);
                    self.mk(
                        op_tok.pos,
                        ExprKind::Assign(Box::new(lhs), compound_op(k), Box::new(rhs)),
                    )
                }

                TokenKind::ArrowLeft => {
                    let value = self.parse_expr_bp(rbp);
                    self.mk(op_tok.pos, ExprKind::Send(Box::new(lhs), Box::new(value)))
                }
                TokenKind::Elvis => {
                    let fallback = self.parse_expr_bp(rbp);
                    self.mk(op_tok.pos, ExprKind::Elvis(Box::new(lhs), Box::new(fallback)))
                }
                TokenKind::QuestionQuestion => {
                    let fallback = self.parse_expr_bp(rbp);
                    self.mk(
                        op_tok.pos,
                        ExprKind::Coalesce(Box::new(lhs), Box::new(fallback)),
                    )
                }
                TokenKind::PipePipe => {
                    let rhs = self.parse_expr_bp(rbp);
                    self.mk(
                        op_tok.pos,
                        ExprKind::Logical(LogOp::Or, Box::new(lhs), Box::new(rhs)),
                    )
                }
                TokenKind::AmpAmp => {
                    let rhs = self.parse_expr_bp(rbp);
                    self.mk(
                        op_tok.pos,
                        ExprKind::Logical(LogOp::And, Box::new(lhs), Box::new(rhs)),
                    )
                }
                TokenKind::DotDot | TokenKind::DotDotDot => {
                    let hi = self.parse_expr_bp(rbp);
                    let inclusive = kind == TokenKind::DotDotDot;
                    self.mk(
                        op_tok.pos,
                        ExprKind::Range(Box::new(lhs), Box::new(hi), inclusive),
                    )
                }

                _ => {
                    let op = binary_op(kind).expect("binding power without operator");
                    let rhs = self.parse_expr_bp(rbp);
                    self.mk(
                        op_tok.pos,
                        ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                    )
                }
            };
        }

        lhs
    }

    fn parse_postfix(&mut self, lhs: Expr, op_tok: Token) -> Expr {
        match op_tok.kind {
            TokenKind::LParen => {
                let args = self.parse_call_args();
                self.mk(op_tok.pos, ExprKind::Call(Box::new(lhs), args))
            }
            TokenKind::LBracket => {
                let index = self.parse_expr();
                if self
                    .expect(TokenKind::RBracket, ReportCode::S002, "']'")
                    .is_none()
                {
                    self.synchronize_to(TokenKind::RBracket);
                    self.matches(TokenKind::RBracket);
                }
                self.mk(op_tok.pos, ExprKind::Index(Box::new(lhs), Box::new(index)))
            }
            TokenKind::Dot => {
                match self.expect(TokenKind::Ident, ReportCode::S002, "member name after '.'") {
                    Some(name) => self.mk(op_tok.pos, ExprKind::Member(Box::new(lhs), name.lexeme)),
                    None => self.error_expr(),
                }
            }
            TokenKind::SafeDot => {
                match self.expect(TokenKind::Ident, ReportCode::S002, "member name after '?.'") {
                    Some(name) => {
                        self.mk(op_tok.pos, ExprKind::SafeMember(Box::new(lhs), name.lexeme))
                    }
                    None => self.error_expr(),
                }
            }
            TokenKind::Bang => self.mk(op_tok.pos, ExprKind::NotNull(Box::new(lhs))),
            TokenKind::PlusPlus => self.mk(op_tok.pos, ExprKind::Incr(Box::new(lhs), false)),
            TokenKind::MinusMinus => self.mk(op_tok.pos, ExprKind::Decr(Box::new(lhs), false)),
            _ => unreachable!("not a postfix token"),
        }
    }

    /// Argument list; the opening `(` is already consumed.
    pub(crate) fn parse_call_args(&mut self) -> Vec<Expr> {
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.parse_expr());
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
        args
    }

    fn parse_prefix(&mut self) -> Expr {
        let tok = self.peek();
        match tok.kind {
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_expr_bp(bp::UNARY);
                self.mk(tok.pos, ExprKind::Unary(UnOp::Neg, Box::new(operand)))
            }
            TokenKind::Bang => {
                self.advance();
                let operand = self.parse_expr_bp(bp::UNARY);
                self.mk(tok.pos, ExprKind::Unary(UnOp::Not, Box::new(operand)))
            }
            TokenKind::Tilde => {
                self.advance();
                let operand = self.parse_expr_bp(bp::UNARY);
                self.mk(tok.pos, ExprKind::Unary(UnOp::BitNot, Box::new(operand)))
            }
            TokenKind::PlusPlus => {
                self.advance();
                let operand = self.parse_expr_bp(bp::UNARY);
                self.mk(tok.pos, ExprKind::Incr(Box::new(operand), true))
            }
            TokenKind::MinusMinus => {
                self.advance();
                let operand = self.parse_expr_bp(bp::UNARY);
                self.mk(tok.pos, ExprKind::Decr(Box::new(operand), true))
            }
            TokenKind::Await => {
                self.advance();
                let operand = self.parse_expr_bp(bp::UNARY);
                self.mk(tok.pos, ExprKind::Await(Box::new(operand)))
            }
            TokenKind::Move => {
                self.advance();
                let operand = self.parse_expr_bp(bp::UNARY);
                self.mk(tok.pos, ExprKind::Move(Box::new(operand)))
            }
            TokenKind::Delete => {
                self.advance();
                let operand = self.parse_expr_bp(bp::UNARY);
                self.mk(tok.pos, ExprKind::Delete(Box::new(operand)))
            }
            TokenKind::ArrowLeft | TokenKind::RecvArrow => {
                self.advance();
                let chan = self.parse_expr_bp(bp::UNARY);
                self.mk(tok.pos, ExprKind::Recv(Box::new(chan)))
            }
            TokenKind::New => {
                self.advance();
                let ty = self.parse_postfix_type();
                let args = if self.matches(TokenKind::LParen) {
                    self.parse_call_args()
                } else {
                    let found = self.peek();
                    self.error_at(
                        ReportCode::S002,
                        "expected '(' after constructor type".to_owned(),
                        found,
                    );
                    Vec::new()
                };
                self.mk(tok.pos, ExprKind::New(ty, args))
            }
            TokenKind::Lambda => self.parse_lambda(),
            TokenKind::Match => self.parse_match_expr(),
            _ => self.parse_primary(),
        }
    }

    fn parse_lambda(&mut self) -> Expr {
        let tok = self.advance(); // `lambda`
        self.expect(TokenKind::LParen, ReportCode::S006, "'(' after 'lambda'");
        let params = self.parse_params();
        let ret = if self.matches(TokenKind::Arrow) {
            Some(self.parse_type())
        } else {
            None
        };
        self.expect(TokenKind::Colon, ReportCode::S006, "':' before lambda body");
        let body = self.parse_expr();
        self.mk(tok.pos, ExprKind::Lambda(params, ret, Box::new(body)))
    }

    /// Match in expression position: arms are `case pattern: expr` lines in
    /// an indented suite, with `default:` as the wildcard spelling.
    fn parse_match_expr(&mut self) -> Expr {
        let tok = self.advance(); // `match`
        let scrutinee = self.parse_expr();
        self.expect(TokenKind::Colon, ReportCode::S009, "':' after match scrutinee");
        self.expect(TokenKind::Indent, ReportCode::S009, "indented match arms");

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
            self.expect(TokenKind::Colon, ReportCode::S009, "':' after pattern");
            let body = self.parse_expr();
            self.matches(TokenKind::Semicolon);
            arms.push(MatchExprArm {
                pattern,
                guard,
                body,
                pos: arm_tok.pos,
            });
        }
        self.matches(TokenKind::Dedent);
        self.mk(tok.pos, ExprKind::Match(Box::new(scrutinee), arms))
    }

    fn parse_primary(&mut self) -> Expr {
        let tok = self.peek();
        match tok.kind {
            TokenKind::Int => {
                self.advance();
                let value = sablec_lex::int_value(tok.lexeme.as_str());
                self.mk(tok.pos, ExprKind::Lit(Lit::Int(value)))
            }
            TokenKind::Float32 => {
                self.advance();
                let value = sablec_lex::float_value(tok.lexeme.as_str()) as f32;
                self.mk(tok.pos, ExprKind::Lit(Lit::Float32(value)))
            }
            TokenKind::Float64 => {
                self.advance();
                let value = sablec_lex::float_value(tok.lexeme.as_str());
                self.mk(tok.pos, ExprKind::Lit(Lit::Float64(value)))
            }
            TokenKind::Str => {
                self.advance();
                self.mk(tok.pos, ExprKind::Lit(Lit::Str(tok.lexeme)))
            }
            TokenKind::True => {
                self.advance();
                self.mk(tok.pos, ExprKind::Lit(Lit::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                self.mk(tok.pos, ExprKind::Lit(Lit::Bool(false)))
            }
            TokenKind::Nil => {
                self.advance();
                self.mk(tok.pos, ExprKind::Lit(Lit::Nil))
            }
            TokenKind::SelfKw => {
                self.advance();
                self.mk(tok.pos, ExprKind::Var(sablec_util::Symbol::intern("self")))
            }
            TokenKind::Ident => {
                self.advance();
                if self.check(TokenKind::ColonColon) && self.check_next(TokenKind::Ident) {
                    self.advance();
                    let member = self.advance();
                    self.mk(tok.pos, ExprKind::Qualified(tok.lexeme, member.lexeme))
                } else {
                    self.mk(tok.pos, ExprKind::Var(tok.lexeme))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr();
                if self
                    .expect(TokenKind::RParen, ReportCode::S002, "')'")
                    .is_none()
                {
                    self.synchronize_to(TokenKind::RParen);
                    self.matches(TokenKind::RParen);
                }
                self.mk(tok.pos, ExprKind::Group(Box::new(inner)))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elems = Vec::new();
                if !self.check(TokenKind::RBracket) {
                    loop {
                        elems.push(self.parse_expr());
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                if self
                    .expect(TokenKind::RBracket, ReportCode::S002, "']'")
                    .is_none()
                {
                    self.synchronize_to(TokenKind::RBracket);
                    self.matches(TokenKind::RBracket);
                }
                self.mk(tok.pos, ExprKind::List(elems))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                if !self.check(TokenKind::RBrace) {
                    loop {
                        let key = self.parse_expr();
                        self.expect(TokenKind::Colon, ReportCode::S002, "':' in map literal");
                        let value = self.parse_expr();
                        entries.push((key, value));
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                if self
                    .expect(TokenKind::RBrace, ReportCode::S002, "'}'")
                    .is_none()
                {
                    self.synchronize_to(TokenKind::RBrace);
                    self.matches(TokenKind::RBrace);
                }
                self.mk(tok.pos, ExprKind::Map(entries))
            }
            TokenKind::TemplateStart => self.parse_interpolation(),
            TokenKind::Error => {
                // The lexer already diagnosed this token.
                self.advance();
                self.error_expr()
            }
            _ => {
                self.error_at(
                    ReportCode::S003,
                    format!("expected expression, found {}", tok.kind.describe()),
                    tok,
                );
                // Do not consume: the statement synchronizer decides how
                // far to skip.
                self.error_expr()
            }
        }
    }

    /// Assemble a string interpolation from template-literal fragments.
    ///
    /// The lexer emits `TemplateStart(text)` before each substitution and
    /// `TemplateEnd(text)` at the close; each `TemplateExpr` carries the raw
    /// substitution source, re-lexed and re-parsed here with the shared
    /// expression-id counter.
    fn parse_interpolation(&mut self) -> Expr {
        let tok = self.peek();
        let mut parts = Vec::new();

        loop {
            let frag = self.peek();
            match frag.kind {
                TokenKind::TemplateStart => {
                    self.advance();
                    if !frag.lexeme.as_str().is_empty() {
                        parts.push(InterpPart::Text(frag.lexeme));
                    }
                }
                TokenKind::TemplateExpr => {
                    self.advance();
                    let sub = self.parse_embedded_expr(frag);
                    parts.push(InterpPart::Expr(Box::new(sub)));
                }
                TokenKind::TemplateEnd => {
                    self.advance();
                    if !frag.lexeme.as_str().is_empty() {
                        parts.push(InterpPart::Text(frag.lexeme));
                    }
                    break;
                }
                _ => break,
            }
        }

        self.mk(tok.pos, ExprKind::Interp(parts))
    }

    /// Re-lex and parse one `${...}` substitution source.
    fn parse_embedded_expr(&mut self, frag: Token) -> Expr {
        let source = frag.lexeme.as_str();
        let tokens = sablec_lex::tokenize_source(source, frag.pos.file.as_str(), self.reporter);
        let mut sub = Parser::with_start_id(tokens, self.reporter, self.next_expr_id);
        let expr = sub.parse_expr();
        if !sub.at_end() {
            self.reporter.error(
                ReportCode::S003,
                "trailing input in template substitution".to_owned(),
                frag.pos,
            );
        }
        self.next_expr_id = sub.next_expr_id();
        expr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_source;
    use sablec_util::Reporter;

    /// Parse a single expression statement.
    fn parse_expr_source(source: &str) -> (Expr, Reporter) {
        let reporter = Reporter::new();
        let tokens = sablec_lex::tokenize_source(source, "t.sbl", &reporter);
        let mut parser = Parser::new(tokens, &reporter);
        let expr = parser.parse_expr();
        (expr, reporter)
    }

    fn assert_binary(expr: &Expr, op: BinOp) -> (&Expr, &Expr) {
        match &expr.kind {
            ExprKind::Binary(actual, l, r) => {
                assert_eq!(*actual, op, "expected {:?}", op);
                (l, r)
            }
            other => panic!("expected binary {:?}, got {:?}", op, other),
        }
    }

    #[test]
    fn test_literals() {
        let (e, r) = parse_expr_source("42");
        assert!(!r.has_errors());
        assert!(matches!(e.kind, ExprKind::Lit(Lit::Int(42))));

        let (e, _) = parse_expr_source("3.5");
        assert!(matches!(e.kind, ExprKind::Lit(Lit::Float64(f)) if (f - 3.5).abs() < 1e-9));

        let (e, _) = parse_expr_source("nil");
        assert!(matches!(e.kind, ExprKind::Lit(Lit::Nil)));
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let (e, r) = parse_expr_source("a + b * c");
        assert!(!r.has_errors());
        let (_, rhs) = assert_binary(&e, BinOp::Add);
        assert_binary(rhs, BinOp::Mul);
    }

    #[test]
    fn test_left_associativity() {
        let (e, _) = parse_expr_source("a - b - c");
        let (lhs, _) = assert_binary(&e, BinOp::Sub);
        assert_binary(lhs, BinOp::Sub);
    }

    #[test]
    fn test_power_right_associative() {
        let (e, _) = parse_expr_source("a ** b ** c");
        let (_, rhs) = assert_binary(&e, BinOp::Pow);
        assert_binary(rhs, BinOp::Pow);
    }

    #[test]
    fn test_assignment_right_associative() {
        let (e, r) = parse_expr_source("a = b = c");
        assert!(!r.has_errors());
        match &e.kind {
            ExprKind::Assign(_, None, rhs) => {
                assert!(matches!(rhs.kind, ExprKind::Assign(..)));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_compound_assignment() {
        let (e, _) = parse_expr_source("a += 1");
        assert!(matches!(e.kind, ExprKind::Assign(_, Some(BinOp::Add), _)));
    }

    #[test]
    fn test_invalid_assignment_target() {
        let (_, r) = parse_expr_source("1 = 2");
        assert!(r
            .diagnostics()
            .iter()
            .any(|d| d.code == ReportCode::S005));
    }

    #[test]
    fn test_strict_equality() {
        let (e, _) = parse_expr_source("a === b");
        assert_binary(&e, BinOp::StrictEq);
    }

    #[test]
    fn test_elvis_and_coalesce() {
        let (e, r) = parse_expr_source("x ?: 0");
        assert!(!r.has_errors());
        assert!(matches!(e.kind, ExprKind::Elvis(..)));

        let (e, _) = parse_expr_source("x ?? y ?? z");
        match &e.kind {
            ExprKind::Coalesce(_, rhs) => assert!(matches!(rhs.kind, ExprKind::Coalesce(..))),
            other => panic!("expected coalesce, got {:?}", other),
        }
    }

    #[test]
    fn test_postfix_chain() {
        let (e, r) = parse_expr_source("a.b.c(1)[2]!");
        assert!(!r.has_errors());
        match &e.kind {
            ExprKind::NotNull(inner) => match &inner.kind {
                ExprKind::Index(base, _) => {
                    assert!(matches!(base.kind, ExprKind::Call(..)));
                }
                other => panic!("expected index, got {:?}", other),
            },
            other => panic!("expected not-null, got {:?}", other),
        }
    }

    #[test]
    fn test_safe_member() {
        let (e, _) = parse_expr_source("user?.name");
        assert!(matches!(e.kind, ExprKind::SafeMember(..)));
    }

    #[test]
    fn test_unary_and_prefix_forms() {
        let (e, _) = parse_expr_source("-x");
        assert!(matches!(e.kind, ExprKind::Unary(UnOp::Neg, _)));

        let (e, _) = parse_expr_source("!flag");
        assert!(matches!(e.kind, ExprKind::Unary(UnOp::Not, _)));

        let (e, _) = parse_expr_source("~mask");
        assert!(matches!(e.kind, ExprKind::Unary(UnOp::BitNot, _)));

        let (e, _) = parse_expr_source("++i");
        assert!(matches!(e.kind, ExprKind::Incr(_, true)));

        let (e, _) = parse_expr_source("i++");
        assert!(matches!(e.kind, ExprKind::Incr(_, false)));
    }

    #[test]
    fn test_await_and_move() {
        let (e, _) = parse_expr_source("await fut");
        assert!(matches!(e.kind, ExprKind::Await(_)));

        let (e, _) = parse_expr_source("move x");
        assert!(matches!(e.kind, ExprKind::Move(_)));
    }

    #[test]
    fn test_new_and_delete() {
        let (e, r) = parse_expr_source("new Point(1, 2)");
        assert!(!r.has_errors());
        match &e.kind {
            ExprKind::New(ty, args) => {
                assert!(matches!(ty.kind, TypeExprKind::Name(n) if n.as_str() == "Point"));
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected new, got {:?}", other),
        }

        let (e, _) = parse_expr_source("delete p");
        assert!(matches!(e.kind, ExprKind::Delete(_)));
    }

    #[test]
    fn test_channel_send_and_receive() {
        let (e, r) = parse_expr_source("ch <- 42");
        assert!(!r.has_errors());
        assert!(matches!(e.kind, ExprKind::Send(..)));

        let (e, _) = parse_expr_source("<- ch");
        assert!(matches!(e.kind, ExprKind::Recv(_)));

        let (e, _) = parse_expr_source("-< ch");
        assert!(matches!(e.kind, ExprKind::Recv(_)));
    }

    #[test]
    fn test_list_and_map_literals() {
        let (e, r) = parse_expr_source("[1, 2, 3]");
        assert!(!r.has_errors());
        assert!(matches!(e.kind, ExprKind::List(ref xs) if xs.len() == 3));

        let (e, r) = parse_expr_source("{\"a\": 1, \"b\": 2}");
        assert!(!r.has_errors());
        assert!(matches!(e.kind, ExprKind::Map(ref kv) if kv.len() == 2));

        let (e, _) = parse_expr_source("[]");
        assert!(matches!(e.kind, ExprKind::List(ref xs) if xs.is_empty()));
    }

    #[test]
    fn test_lambda() {
        let (e, r) = parse_expr_source("lambda (x: int, y: int) -> int: x + y");
        assert!(!r.has_errors());
        match &e.kind {
            ExprKind::Lambda(params, ret, body) => {
                assert_eq!(params.len(), 2);
                assert!(ret.is_some());
                assert!(matches!(body.kind, ExprKind::Binary(BinOp::Add, ..)));
            }
            other => panic!("expected lambda, got {:?}", other),
        }
    }

    #[test]
    fn test_interpolation() {
        let (e, r) = parse_expr_source("`sum=${a + b}!`");
        assert!(!r.has_errors(), "{:?}", r.diagnostics());
        match &e.kind {
            ExprKind::Interp(parts) => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(parts[0], InterpPart::Text(t) if t.as_str() == "sum="));
                assert!(matches!(&parts[1], InterpPart::Expr(e)
                    if matches!(e.kind, ExprKind::Binary(BinOp::Add, ..))));
                assert!(matches!(parts[2], InterpPart::Text(t) if t.as_str() == "!"));
            }
            other => panic!("expected interpolation, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_templates() {
        // Templates nest through substitutions; four levels deep here.
        let (e, r) = parse_expr_source("`a${`b${`c${`d`}`}`}`");
        assert!(!r.has_errors(), "{:?}", r.diagnostics());
        assert!(matches!(e.kind, ExprKind::Interp(_)));
    }

    #[test]
    fn test_deeply_nested_templates_no_overflow() {
        // 64 levels of template nesting must parse without stack overflow.
        let mut source = String::new();
        for _ in 0..64 {
            source.push_str("`${");
        }
        source.push('x');
        for _ in 0..64 {
            source.push_str("}`");
        }
        let (_, r) = parse_expr_source(&source);
        assert!(!r.has_errors(), "{:?}", r.diagnostics());
    }

    #[test]
    fn test_match_expression() {
        let reporter = Reporter::new();
        let ast = parse_source(
            "let d = match v:\n    case Some(x): x\n    default: 0\n",
            "t.sbl",
            &reporter,
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        match &ast[0].kind {
            StmtKind::Let(l) => match &l.init.as_ref().unwrap().kind {
                ExprKind::Match(_, arms) => assert_eq!(arms.len(), 2),
                other => panic!("expected match expr, got {:?}", other),
            },
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn test_cast_and_type_test() {
        let (e, _) = parse_expr_source("x as float64");
        assert!(matches!(e.kind, ExprKind::Cast(..)));

        let (e, _) = parse_expr_source("x is Circle");
        assert!(matches!(e.kind, ExprKind::TypeTest(..)));
    }

    #[test]
    fn test_range_expr() {
        let (e, _) = parse_expr_source("0..10");
        assert!(matches!(e.kind, ExprKind::Range(_, _, false)));

        let (e, _) = parse_expr_source("0...10");
        assert!(matches!(e.kind, ExprKind::Range(_, _, true)));
    }

    #[test]
    fn test_qualified_reference() {
        let (e, _) = parse_expr_source("math::sqrt");
        assert!(matches!(e.kind, ExprKind::Qualified(m, n)
            if m.as_str() == "math" && n.as_str() == "sqrt"));
    }

    #[test]
    fn test_missing_rparen_recovery() {
        let (_, r) = parse_expr_source("f(1, 2");
        assert!(r.diagnostics().iter().any(|d| d.code == ReportCode::S002));
    }
}
