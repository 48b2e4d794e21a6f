use std::fmt::Display;
use std::sync::Arc;

use super::arena::Arena;
use super::node::{AttrKey, Binding, BindingValue, Formal, NodeId, NodeKind, Param};
use crate::op::{BinOp, UnaryOp};
use crate::token::{ParseError, Position, Span, Token, Tokenizer, offset_to_position};

type PResult<T> = Result<T, ParseError>;

/// Deepest nesting of expressions the parser follows before giving up.
/// Parentheses, lists and attribute sets each count twice per level.
pub const MAX_NESTING: usize = 256;

/// A parsed document: the arena holding its nodes and the root expression.
#[derive(Debug, Clone)]
pub struct Tree {
    pub arena: Arena,
    pub root: NodeId,
}

impl Tree {
    pub fn root_node(&self) -> &super::Node {
        self.arena.node(self.root)
    }
}

/// Parse a whole document into a fresh arena.
pub fn parse(text: &str) -> Result<Tree, ParseError> {
    let mut arena = Arena::new();
    let root = parse_into(&mut arena, text)?;
    Ok(Tree { arena, root })
}

/// Parse `text` as one expression, allocating into an existing arena.
pub fn parse_into(arena: &mut Arena, text: &str) -> Result<NodeId, ParseError> {
    let (tokens, spans) = Tokenizer::tokenize_with_spans(text)?;
    let end = offset_to_position(text, text.chars().count());
    Parser::new(&tokens, &spans, arena, end).parse()
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    spans: &'a [Span],
    pos: usize,
    len: usize,
    arena: &'a mut Arena,
    /// Position just past the input, used for end-of-input errors.
    end: Position,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token], spans: &'a [Span], arena: &'a mut Arena, end: Position) -> Self {
        Self {
            tokens,
            spans,
            pos: 0,
            len: tokens.len(),
            arena,
            end,
            depth: 0,
        }
    }

    pub fn parse(&mut self) -> PResult<NodeId> {
        if self.eof() {
            return Err(ParseError::with_position(
                "Syntax error: empty expression".to_string(),
                self.end,
            ));
        }
        let root = self.parse_expr()?;
        if !self.eof() {
            return Err(self.unexpected("end of input"));
        }
        Ok(root)
    }

    fn parse_expr(&mut self) -> PResult<NodeId> {
        self.nested(Self::parse_expr_form)
    }

    fn parse_expr_form(&mut self) -> PResult<NodeId> {
        match self.peek() {
            Some(Token::Let) => self.parse_let(),
            Some(Token::If) => self.parse_if(),
            Some(Token::Assert) => self.parse_assert(),
            Some(Token::With) => self.parse_with(),
            Some(Token::Id(_)) if matches!(self.peek_at(1), Some(Token::Colon)) => self.parse_simple_lambda(),
            Some(Token::Id(_)) if matches!(self.peek_at(1), Some(Token::At)) => self.parse_formals_lambda(),
            Some(Token::LBrace) if self.looks_like_formals() => self.parse_formals_lambda(),
            _ => self.parse_impl(),
        }
    }

    /// `let bindings in body`
    fn parse_let(&mut self) -> PResult<NodeId> {
        let start = self.advance_span();
        let bindings = self.parse_bindings(&Token::In, "'in'")?;
        self.expect(&Token::In, "'in'")?;
        let body = self.parse_expr()?;
        let span = start.cover(self.span_of(body));
        Ok(self.alloc(span, NodeKind::Let { bindings, body }))
    }

    fn parse_if(&mut self) -> PResult<NodeId> {
        let start = self.advance_span();
        let cond = self.parse_expr()?;
        self.expect(&Token::Then, "'then'")?;
        let then = self.parse_expr()?;
        self.expect(&Token::Else, "'else'")?;
        let otherwise = self.parse_expr()?;
        let span = start.cover(self.span_of(otherwise));
        Ok(self.alloc(span, NodeKind::If { cond, then, otherwise }))
    }

    fn parse_assert(&mut self) -> PResult<NodeId> {
        let start = self.advance_span();
        let cond = self.parse_expr()?;
        self.expect(&Token::Semicolon, "';' after assertion")?;
        let body = self.parse_expr()?;
        let span = start.cover(self.span_of(body));
        Ok(self.alloc(span, NodeKind::Assert { cond, body }))
    }

    fn parse_with(&mut self) -> PResult<NodeId> {
        let start = self.advance_span();
        let scope = self.parse_expr()?;
        self.expect(&Token::Semicolon, "';' after with expression")?;
        let body = self.parse_expr()?;
        let span = start.cover(self.span_of(body));
        Ok(self.alloc(span, NodeKind::With { scope, body }))
    }

    /// `x: body`
    fn parse_simple_lambda(&mut self) -> PResult<NodeId> {
        let start = self.current_span();
        let (name, _) = self.ident()?;
        self.expect(&Token::Colon, "':'")?;
        let body = self.parse_expr()?;
        let span = start.cover(self.span_of(body));
        Ok(self.alloc(
            span,
            NodeKind::Lambda {
                param: Param::Ident(name),
                body,
            },
        ))
    }

    /// `{ a, b ? 1, ... } @ args: body`, alias optionally in front.
    fn parse_formals_lambda(&mut self) -> PResult<NodeId> {
        let start = self.current_span();
        let mut alias = None;
        if matches!(self.peek(), Some(Token::Id(_))) {
            let (name, _) = self.ident()?;
            self.expect(&Token::At, "'@'")?;
            alias = Some(name);
        }
        self.expect(&Token::LBrace, "'{'")?;

        let mut formals: Vec<Formal> = Vec::new();
        let mut ellipsis = false;
        loop {
            match self.peek() {
                Some(Token::RBrace) => break,
                Some(Token::Ellipsis) => {
                    self.pos += 1;
                    ellipsis = true;
                    break;
                }
                Some(Token::Id(_)) => {
                    let (name, name_span) = self.ident()?;
                    if formals.iter().any(|f| f.name == name) {
                        return Err(ParseError::with_span(
                            format!("Syntax error: duplicate formal function argument '{}'", name),
                            name_span,
                        ));
                    }
                    let default = if self.eat(&Token::Question) {
                        Some(self.parse_expr()?)
                    } else {
                        None
                    };
                    formals.push(Formal { name, default });
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                _ => return Err(self.unexpected("formal argument name")),
            }
        }
        self.expect(&Token::RBrace, "'}'")?;

        if alias.is_none() && self.eat(&Token::At) {
            let (name, _) = self.ident()?;
            alias = Some(name);
        }
        self.expect(&Token::Colon, "':' after formal arguments")?;
        let body = self.parse_expr()?;
        let span = start.cover(self.span_of(body));
        Ok(self.alloc(
            span,
            NodeKind::Lambda {
                param: Param::Formals {
                    formals,
                    ellipsis,
                    alias,
                },
                body,
            },
        ))
    }

    /// Cursor is on `{`; decide whether it opens formals or an attribute set.
    fn looks_like_formals(&self) -> bool {
        match (self.peek_at(1), self.peek_at(2)) {
            (Some(Token::RBrace), Some(Token::Colon | Token::At)) => true,
            (Some(Token::Ellipsis), _) => true,
            (Some(Token::Id(_)), Some(Token::Comma | Token::Question)) => true,
            (Some(Token::Id(_)), Some(Token::RBrace)) => {
                matches!(self.peek_at(3), Some(Token::Colon | Token::At))
            }
            _ => false,
        }
    }

    /// - `expr -> expr` (right-assoc)
    fn parse_impl(&mut self) -> PResult<NodeId> {
        self.binary_right(Self::parse_or, |t| {
            matches!(t, Token::Impl).then_some(BinOp::Impl)
        })
    }

    /// - `expr || expr`
    fn parse_or(&mut self) -> PResult<NodeId> {
        self.binary_left(Self::parse_and, |t| matches!(t, Token::Or).then_some(BinOp::Or))
    }

    /// - `expr && expr`
    fn parse_and(&mut self) -> PResult<NodeId> {
        self.binary_left(Self::parse_eq, |t| matches!(t, Token::And).then_some(BinOp::And))
    }

    fn parse_eq(&mut self) -> PResult<NodeId> {
        self.binary_left(Self::parse_cmp, |t| match t {
            Token::Eq => Some(BinOp::Eq),
            Token::Ne => Some(BinOp::Ne),
            _ => None,
        })
    }

    fn parse_cmp(&mut self) -> PResult<NodeId> {
        self.binary_left(Self::parse_update, |t| match t {
            Token::Lt => Some(BinOp::Lt),
            Token::Gt => Some(BinOp::Gt),
            Token::Le => Some(BinOp::Le),
            Token::Ge => Some(BinOp::Ge),
            _ => None,
        })
    }

    /// - `expr // expr` (right-assoc)
    fn parse_update(&mut self) -> PResult<NodeId> {
        self.binary_right(Self::parse_not, |t| {
            matches!(t, Token::Update).then_some(BinOp::Update)
        })
    }

    /// - `!expr`
    fn parse_not(&mut self) -> PResult<NodeId> {
        if !matches!(self.peek(), Some(Token::Not)) {
            return self.parse_add();
        }
        let op_span = self.advance_span();
        let operand = self.operand(UnaryOp::Not, op_span, Self::parse_not)?;
        let span = op_span.cover(self.span_of(operand));
        Ok(self.alloc(
            span,
            NodeKind::Unary {
                op: UnaryOp::Not,
                operand,
            },
        ))
    }

    fn parse_add(&mut self) -> PResult<NodeId> {
        self.binary_left(Self::parse_mul, |t| match t {
            Token::Add => Some(BinOp::Add),
            Token::Sub => Some(BinOp::Sub),
            _ => None,
        })
    }

    fn parse_mul(&mut self) -> PResult<NodeId> {
        self.binary_left(Self::parse_concat, |t| match t {
            Token::Mul => Some(BinOp::Mul),
            Token::Div => Some(BinOp::Div),
            _ => None,
        })
    }

    /// - `list ++ list` (right-assoc)
    fn parse_concat(&mut self) -> PResult<NodeId> {
        self.binary_right(Self::parse_has_attr, |t| {
            matches!(t, Token::Concat).then_some(BinOp::Concat)
        })
    }

    /// - `expr ? a.b`
    fn parse_has_attr(&mut self) -> PResult<NodeId> {
        let mut target = self.parse_neg()?;
        while matches!(self.peek(), Some(Token::Question)) {
            let q = self.advance_span();
            if !matches!(self.peek(), Some(Token::Id(_) | Token::Str(_))) {
                return Err(ParseError::with_span(
                    "Syntax error: expected attribute name after '?'".to_string(),
                    q,
                ));
            }
            let (path, end) = self.attr_path()?;
            let span = self.span_of(target).cover(end);
            target = self.alloc(span, NodeKind::HasAttr { target, path });
        }
        Ok(target)
    }

    /// - `-expr`
    fn parse_neg(&mut self) -> PResult<NodeId> {
        if !matches!(self.peek(), Some(Token::Sub)) {
            return self.parse_apply();
        }
        let op_span = self.advance_span();
        let operand = self.operand(UnaryOp::Neg, op_span, Self::parse_neg)?;
        let span = op_span.cover(self.span_of(operand));
        Ok(self.alloc(
            span,
            NodeKind::Unary {
                op: UnaryOp::Neg,
                operand,
            },
        ))
    }

    /// - `f a b` (left-assoc juxtaposition)
    fn parse_apply(&mut self) -> PResult<NodeId> {
        let mut func = self.parse_select()?;
        while self.starts_atom() {
            let arg = self.parse_select()?;
            let span = self.span_of(func).cover(self.span_of(arg));
            func = self.alloc(span, NodeKind::Apply { func, arg });
        }
        Ok(func)
    }

    /// - `expr.a.b`
    /// - `expr.a.b or default`
    fn parse_select(&mut self) -> PResult<NodeId> {
        let target = self.parse_primary()?;
        if !matches!(self.peek(), Some(Token::Dot)) {
            return Ok(target);
        }

        let mut path: Vec<AttrKey> = Vec::new();
        let mut end = self.span_of(target);
        while matches!(self.peek(), Some(Token::Dot)) {
            let dot = self.advance_span();
            let (name, name_span) = self.attr_name().map_err(|_| {
                ParseError::with_span("Syntax error: expected attribute name after '.'".to_string(), dot)
            })?;
            path.push(name);
            end = name_span;
        }

        let mut default = None;
        if matches!(self.peek(), Some(Token::Id(kw)) if kw == "or") {
            let kw = self.advance_span();
            let fallback = self.operand("or", kw, Self::parse_select)?;
            end = self.span_of(fallback);
            default = Some(fallback);
        }

        let span = self.span_of(target).cover(end);
        Ok(self.alloc(span, NodeKind::Select { target, path, default }))
    }

    fn parse_primary(&mut self) -> PResult<NodeId> {
        self.nested(Self::parse_atom)
    }

    fn parse_atom(&mut self) -> PResult<NodeId> {
        let Some(tok) = self.peek() else {
            return Err(self.unexpected("expression"));
        };
        let span = self.current_span();
        let kind = match tok {
            Token::Int(i) => NodeKind::Int(*i),
            Token::Float(f) => NodeKind::Float(*f),
            Token::Str(s) => NodeKind::Str(Arc::from(s.as_str())),
            Token::Bool(b) => NodeKind::Bool(*b),
            Token::Null => NodeKind::Null,
            Token::Id(name) => NodeKind::Var(Arc::from(name.as_str())),
            Token::LParen => return self.parse_paren(),
            Token::LBracket => return self.parse_list(),
            Token::LBrace | Token::Rec => return self.parse_attrs(),
            _ => return Err(self.unexpected("expression")),
        };
        self.pos += 1;
        Ok(self.alloc(span, kind))
    }

    fn parse_paren(&mut self) -> PResult<NodeId> {
        let open = self.advance_span();
        let inner = self.parse_expr()?;
        let close = self.expect(&Token::RParen, "')'")?;
        Ok(self.alloc(open.cover(close), NodeKind::Paren(inner)))
    }

    fn parse_list(&mut self) -> PResult<NodeId> {
        let open = self.advance_span();
        let mut items = Vec::new();
        while !matches!(self.peek(), Some(Token::RBracket)) {
            if !self.starts_atom() {
                return Err(self.unexpected("list element or ']'"));
            }
            items.push(self.parse_select()?);
        }
        let close = self.advance_span();
        Ok(self.alloc(open.cover(close), NodeKind::List(items)))
    }

    /// `{ ... }` or `rec { ... }`; both are self-referential.
    fn parse_attrs(&mut self) -> PResult<NodeId> {
        let start = self.current_span();
        self.eat(&Token::Rec);
        self.expect(&Token::LBrace, "'{'")?;
        let bindings = self.parse_bindings(&Token::RBrace, "'}'")?;
        let close = self.expect(&Token::RBrace, "'}'")?;
        Ok(self.alloc(start.cover(close), NodeKind::Attrs(bindings)))
    }

    fn parse_bindings(&mut self, terminator: &Token, what: &str) -> PResult<Vec<Binding>> {
        let mut bindings: Vec<Binding> = Vec::new();
        loop {
            match self.peek() {
                Some(tok) if tok == terminator => break,
                Some(Token::Inherit) => {
                    let before = bindings.len();
                    self.parse_inherit(&mut bindings)?;
                    for idx in before..bindings.len() {
                        check_duplicate(&bindings[..idx], &bindings[idx])?;
                    }
                }
                Some(Token::Id(_) | Token::Str(_)) => {
                    let (name, name_span) = self.attr_name()?;
                    if matches!(self.peek(), Some(Token::Dot)) {
                        return Err(ParseError::with_span(
                            "Syntax error: nested attribute paths in bindings are not supported".to_string(),
                            self.current_span(),
                        ));
                    }
                    self.expect(&Token::Assign, "'='")?;
                    let value = self.parse_expr()?;
                    self.expect(&Token::Semicolon, "';'")?;
                    let binding = Binding {
                        name,
                        name_span,
                        value: BindingValue::Expr(value),
                    };
                    check_duplicate(&bindings, &binding)?;
                    bindings.push(binding);
                }
                Some(_) => return Err(self.unexpected(&format!("attribute name or {}", what))),
                None => return Err(self.unexpected(what)),
            }
        }
        Ok(bindings)
    }

    /// `inherit a b;` or `inherit (source) a b;`
    fn parse_inherit(&mut self, bindings: &mut Vec<Binding>) -> PResult<()> {
        self.pos += 1;
        let source = if matches!(self.peek(), Some(Token::LParen)) {
            self.pos += 1;
            let source = self.parse_expr()?;
            self.expect(&Token::RParen, "')'")?;
            Some(source)
        } else {
            None
        };
        while matches!(self.peek(), Some(Token::Id(_) | Token::Str(_))) {
            let (name, name_span) = self.attr_name()?;
            let value = match source {
                Some(target) => BindingValue::Expr(self.alloc(
                    name_span,
                    NodeKind::Select {
                        target,
                        path: vec![name.clone()],
                        default: None,
                    },
                )),
                None => BindingValue::Inherit,
            };
            bindings.push(Binding { name, name_span, value });
        }
        self.expect(&Token::Semicolon, "';' after inherit")?;
        Ok(())
    }

    fn binary_left(
        &mut self,
        next: fn(&mut Self) -> PResult<NodeId>,
        op_of: fn(&Token) -> Option<BinOp>,
    ) -> PResult<NodeId> {
        let mut lhs = next(self)?;
        while let Some(op) = self.peek().and_then(op_of) {
            let op_span = self.advance_span();
            let rhs = self.operand(op, op_span, next)?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    /// Right-associative chain, folded from the right once all operands are
    /// read so long chains do not recurse.
    fn binary_right(
        &mut self,
        next: fn(&mut Self) -> PResult<NodeId>,
        op_of: fn(&Token) -> Option<BinOp>,
    ) -> PResult<NodeId> {
        let mut operands = vec![next(self)?];
        let mut ops = Vec::new();
        while let Some(op) = self.peek().and_then(op_of) {
            let op_span = self.advance_span();
            operands.push(self.operand(op, op_span, next)?);
            ops.push(op);
        }

        let mut rhs = operands[operands.len() - 1];
        for (op, lhs) in ops.into_iter().rev().zip(operands.into_iter().rev().skip(1)) {
            rhs = self.binary(op, lhs, rhs);
        }
        Ok(rhs)
    }

    fn binary(&mut self, op: BinOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        let span = self.span_of(lhs).cover(self.span_of(rhs));
        self.alloc(span, NodeKind::Binary { op, lhs, rhs })
    }

    /// Parse the operand following an operator; a missing operand is reported
    /// at the operator itself.
    fn operand(
        &mut self,
        op: impl Display,
        op_span: Span,
        parse: fn(&mut Self) -> PResult<NodeId>,
    ) -> PResult<NodeId> {
        if !self.starts_expr() {
            return Err(ParseError::with_span(
                format!("Syntax error: expected expression after '{}'", op),
                op_span,
            ));
        }
        self.nested(parse)
    }

    fn nested(&mut self, parse: fn(&mut Self) -> PResult<NodeId>) -> PResult<NodeId> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::with_span(
                "Syntax error: expression is nested too deeply".to_string(),
                self.current_span(),
            ));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn attr_path(&mut self) -> PResult<(Vec<AttrKey>, Span)> {
        let (first, mut end) = self.attr_name()?;
        let mut path = vec![first];
        while matches!(self.peek(), Some(Token::Dot))
            && matches!(self.peek_at(1), Some(Token::Id(_) | Token::Str(_)))
        {
            self.pos += 1;
            let (name, span) = self.attr_name()?;
            path.push(name);
            end = span;
        }
        Ok((path, end))
    }

    fn attr_name(&mut self) -> PResult<(AttrKey, Span)> {
        match self.peek() {
            Some(Token::Id(name) | Token::Str(name)) => {
                let span = self.advance_span();
                Ok((Arc::from(name.as_str()), span))
            }
            _ => Err(self.unexpected("attribute name")),
        }
    }

    fn ident(&mut self) -> PResult<(Arc<str>, Span)> {
        match self.peek() {
            Some(Token::Id(name)) => {
                let span = self.advance_span();
                Ok((Arc::from(name.as_str()), span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn starts_expr(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Not | Token::Sub | Token::Let | Token::If | Token::Assert | Token::With)
        ) || self.starts_atom()
    }

    /// Tokens that can begin an application argument or list element.
    fn starts_atom(&self) -> bool {
        match self.peek() {
            Some(Token::Id(name)) => name != "or",
            Some(
                Token::LParen
                | Token::LBrace
                | Token::LBracket
                | Token::Rec
                | Token::Null
                | Token::Str(_)
                | Token::Int(_)
                | Token::Float(_)
                | Token::Bool(_),
            ) => true,
            _ => false,
        }
    }

    fn expect(&mut self, tok: &Token, what: &str) -> PResult<Span> {
        if self.peek() == Some(tok) {
            Ok(self.advance_span())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(tok) => ParseError::with_span(
                format!("Syntax error: expected {}, found {}", expected, tok.describe()),
                self.current_span(),
            ),
            None => ParseError::with_position(
                format!("Syntax error: unexpected end of input, expected {}", expected),
                self.end,
            ),
        }
    }

    fn alloc(&mut self, span: Span, kind: NodeKind) -> NodeId {
        self.arena.alloc(span, kind)
    }

    fn span_of(&self, id: NodeId) -> Span {
        self.arena.node(id).span
    }

    fn current_span(&self) -> Span {
        self.spans
            .get(self.pos)
            .copied()
            .unwrap_or_else(|| Span::single(self.end))
    }

    /// Consume the current token and return its span.
    fn advance_span(&mut self) -> Span {
        let span = self.current_span();
        self.pos += 1;
        span
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, ahead: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + ahead)
    }

    fn eof(&self) -> bool {
        self.pos >= self.len
    }
}

fn check_duplicate(existing: &[Binding], binding: &Binding) -> PResult<()> {
    if existing.iter().any(|b| b.name == binding.name) {
        return Err(ParseError::with_span(
            format!("Syntax error: attribute '{}' already defined", binding.name),
            binding.name_span,
        ));
    }
    Ok(())
}
