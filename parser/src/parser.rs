use std::collections::HashMap;

use crate::ast::{
    BinaryOp, Block, CatchClause, Expr, ExprKind, FunctionLiteral, LogicalOp,
    Program, Stmt, StmtKind, TableKey, UnaryOp,
};
use crate::lexer::Lexer;
use crate::scope::{
    self, LexicalScope, ScopeKind, ScopeRef, SlotKind, SlotSource,
};
use crate::span::Span;
use crate::token::{Token, TokenKind};

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
    /// The source row the error points into.
    pub line: String,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Span, line: &str) -> Self {
        Self {
            message: message.into(),
            span,
            line: line.to_string(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.message, self.span)?;
        if !self.line.is_empty() {
            let caret_at = self.span.start.column.saturating_sub(1);
            write!(
                f,
                "\n  {}\n  {}^",
                self.line,
                " ".repeat(caret_at)
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

// ═══════════════════════════════════════════════════════════════════
// Rule table
// ═══════════════════════════════════════════════════════════════════

type PrefixHandler = fn(&mut Parser, Token, u8) -> Result<Expr, ParseError>;
type InfixHandler =
    fn(&mut Parser, Expr, Token, u8) -> Result<Expr, ParseError>;
type StmtHandler = fn(&mut Parser, Token) -> Result<Stmt, ParseError>;

#[derive(Clone, Copy)]
struct BinaryRule {
    left: u8,
    right: u8,
    handler: InfixHandler,
}

/// The rules registered for one token identity.
#[derive(Default, Clone, Copy)]
struct TokenRules {
    primitive: Option<(u8, PrefixHandler)>,
    binary: Option<BinaryRule>,
    statement: Option<StmtHandler>,
    declaration: Option<StmtHandler>,
}

/// Per-token-identity rule table: exact text first, then the generic
/// word/number/string entries.
struct RuleSet {
    text: HashMap<&'static str, TokenRules>,
    word: TokenRules,
    number: TokenRules,
    string: TokenRules,
}

impl RuleSet {
    fn entry(&mut self, text: &'static str) -> &mut TokenRules {
        self.text.entry(text).or_default()
    }

    fn primitive(&mut self, text: &'static str, power: u8, h: PrefixHandler) {
        self.entry(text).primitive = Some((power, h));
    }

    fn left_binary(&mut self, text: &'static str, power: u8, h: InfixHandler) {
        self.entry(text).binary = Some(BinaryRule {
            left: power,
            right: power,
            handler: h,
        });
    }

    fn right_binary(
        &mut self,
        text: &'static str,
        power: u8,
        h: InfixHandler,
    ) {
        // right = left − 1 gives right associativity.
        self.entry(text).binary = Some(BinaryRule {
            left: power,
            right: power - 1,
            handler: h,
        });
    }

    fn statement(&mut self, text: &'static str, h: StmtHandler) {
        self.entry(text).statement = Some(h);
    }

    fn declaration(&mut self, text: &'static str, h: StmtHandler) {
        self.entry(text).declaration = Some(h);
    }

    fn rules_for(&self, token: &Token) -> Option<TokenRules> {
        match &token.kind {
            TokenKind::Word(w) => {
                Some(self.text.get(w.as_str()).copied().unwrap_or(self.word))
            }
            TokenKind::Punct(p) => self.text.get(p.as_str()).copied(),
            TokenKind::Number(_) => Some(self.number),
            TokenKind::Str(_) => Some(self.string),
            TokenKind::End => None,
        }
    }

    /// Whether a word is reserved (carries an exact-text rule).
    fn is_keyword(&self, word: &str) -> bool {
        self.text.contains_key(word)
    }
}

/// The language: every construct is a rule registration.
fn language_rules() -> RuleSet {
    let mut r = RuleSet {
        text: HashMap::new(),
        word: TokenRules {
            primitive: Some((0, name_expr)),
            ..TokenRules::default()
        },
        number: TokenRules {
            primitive: Some((0, number_expr)),
            ..TokenRules::default()
        },
        string: TokenRules {
            primitive: Some((0, string_expr)),
            ..TokenRules::default()
        },
    };

    // Literals and primaries.
    r.primitive("null", 0, null_expr);
    r.primitive("true", 0, boolean_expr);
    r.primitive("false", 0, boolean_expr);
    r.primitive("this", 0, this_expr);
    r.primitive("function", 0, function_expr);
    r.primitive("throw", 0, throw_expr);
    r.primitive("(", 0, paren_expr);
    r.primitive("[", 0, list_expr);
    r.primitive("{", 0, table_expr);

    // Postfix: call, index, member.
    r.left_binary("(", 90, call_expr);
    r.left_binary("[", 90, index_expr);
    r.left_binary(".", 90, member_expr);

    // Prefix operators.
    r.primitive("-", 80, unary_expr);
    r.primitive("+", 80, unary_expr);
    r.primitive("!", 80, unary_expr);

    // Binary operators, loosest last.
    for op in ["*", "/", "%"] {
        r.left_binary(op, 70, binary_expr);
    }
    r.left_binary("+", 65, binary_expr);
    r.left_binary("-", 65, binary_expr);
    for op in ["<", "<=", ">", ">="] {
        r.left_binary(op, 60, binary_expr);
    }
    r.left_binary("&", 55, binary_expr);
    r.left_binary("^", 50, binary_expr);
    r.left_binary("|", 45, binary_expr);
    r.left_binary("==", 40, binary_expr);
    r.left_binary("!=", 40, binary_expr);
    r.left_binary("&&", 35, logical_expr);
    r.left_binary("||", 30, logical_expr);
    r.right_binary("?", 20, ternary_expr);
    for op in ["=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^="] {
        r.right_binary(op, 10, assign_expr);
    }

    // Statements.
    r.statement("if", if_stmt);
    r.statement("while", while_stmt);
    r.statement("for", for_stmt);
    r.statement("try", try_stmt);
    r.statement("break", break_stmt);
    r.statement("continue", continue_stmt);
    r.statement("return", return_stmt);

    // Declarations.
    r.declaration("var", var_decl);
    r.declaration("const", var_decl);
    r.declaration("import", import_decl);
    r.declaration("export", export_decl);

    // Reserved words without their own primitive rule.
    r.entry("else");
    r.entry("catch");
    r.entry("finally");
    r.entry("from");

    r
}

fn binary_op_for(text: &str) -> Option<BinaryOp> {
    Some(match text {
        "+" | "+=" => BinaryOp::Add,
        "-" | "-=" => BinaryOp::Subtract,
        "*" | "*=" => BinaryOp::Multiply,
        "/" | "/=" => BinaryOp::Divide,
        "%" | "%=" => BinaryOp::Remainder,
        "&" | "&=" => BinaryOp::And,
        "|" | "|=" => BinaryOp::Or,
        "^" | "^=" => BinaryOp::Xor,
        "==" => BinaryOp::Equal,
        "!=" => BinaryOp::NotEqual,
        "<" => BinaryOp::Less,
        "<=" => BinaryOp::LessOrEqual,
        ">" => BinaryOp::Greater,
        ">=" => BinaryOp::GreaterOrEqual,
        _ => return None,
    })
}

/// Lookahead pattern for [`Parser::match_sequence`].
#[derive(Clone, Copy)]
enum Pat {
    /// Exact word or punctuation text.
    T(&'static str),
    /// Any identifier.
    Word,
}

// ═══════════════════════════════════════════════════════════════════
// Parser
// ═══════════════════════════════════════════════════════════════════

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    rules: RuleSet,
    scope: ScopeRef,
    loop_depth: usize,
}

/// Parse a full module from source text.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::tokenize(source).map_err(|err| {
        let (row, column) = match err {
            crate::lexer::LexError::UnrecognizedCharacter {
                row,
                column,
                ..
            } => (row, column),
            crate::lexer::LexError::UnterminatedString { row, column } => {
                (row, column)
            }
        };
        let line = source
            .lines()
            .nth(row.saturating_sub(1))
            .unwrap_or_default();
        ParseError::new(
            err.to_string(),
            Span::point(crate::span::Pos::new(0, row, column)),
            line,
        )
    })?;
    Parser::new(tokens).parse_module()
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            rules: language_rules(),
            scope: LexicalScope::module(),
            loop_depth: 0,
        }
    }

    pub fn parse_module(mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        loop {
            while self.optional(";").is_some() {}
            if self.peek().is_end() {
                break;
            }
            statements.push(self.statement()?);
        }
        Ok(Program {
            scope: self.scope,
            statements,
        })
    }

    // ── token helpers ──────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let index = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, text: &str) -> bool {
        self.peek().text() == Some(text)
    }

    /// Consume the next token when its exact text matches.
    fn optional(&mut self, text: &str) -> Option<Token> {
        if self.check(text) {
            Some(self.advance())
        } else {
            None
        }
    }

    /// Consume the next token, failing unless its exact text matches.
    fn required(&mut self, text: &str) -> Result<Token, ParseError> {
        if self.check(text) {
            Ok(self.advance())
        } else {
            let token = self.peek().clone();
            Err(self.error(
                format!("expected `{}`, found {}", text, token.describe()),
                &token,
            ))
        }
    }

    /// Non-consuming lookahead over the next tokens.
    fn match_sequence(&self, patterns: &[Pat]) -> bool {
        patterns.iter().enumerate().all(|(i, pat)| {
            let token = self.peek_at(i);
            match pat {
                Pat::T(text) => token.text() == Some(text),
                Pat::Word => matches!(token.kind, TokenKind::Word(_)),
            }
        })
    }

    fn error(&self, message: impl Into<String>, token: &Token) -> ParseError {
        ParseError::new(message, token.span, &token.line)
    }

    /// Consume an identifier usable as a binding name (keywords are
    /// rejected).
    fn identifier(&mut self) -> Result<(String, Token), ParseError> {
        let token = self.advance();
        match token.word().map(str::to_string) {
            Some(w) if !self.rules.is_keyword(&w) => Ok((w, token)),
            Some(w) => Err(self.error(
                format!("`{}` is a reserved word", w),
                &token,
            )),
            None => Err(self.error(
                format!("expected a name, found {}", token.describe()),
                &token,
            )),
        }
    }

    /// Consume a member name after `.` (any word, keywords included).
    fn member_name(&mut self) -> Result<(String, Token), ParseError> {
        let token = self.advance();
        match token.word().map(str::to_string) {
            Some(w) => Ok((w, token)),
            None => Err(self.error(
                format!("expected a member name, found {}", token.describe()),
                &token,
            )),
        }
    }

    // ── scope helpers ──────────────────────────────────────────────

    fn enter_scope(&mut self, scope: ScopeRef) -> ScopeRef {
        std::mem::replace(&mut self.scope, scope)
    }

    fn leave_scope(&mut self, previous: ScopeRef) {
        self.scope = previous;
    }

    fn declare(
        &mut self,
        name: &str,
        token: &Token,
        kind: SlotKind,
        read_only: bool,
    ) -> Result<scope::SlotRef, ParseError> {
        scope::declare(&self.scope, name, kind, read_only).map_err(|_| {
            self.error(format!("duplicate declaration of `{}`", name), token)
        })
    }

    // ── grammar entry points ───────────────────────────────────────

    /// Parse one expression with a minimum binding power.
    pub fn expression(&mut self, min_power: u8) -> Result<Expr, ParseError> {
        let token = self.advance();
        let rules = self.rules.rules_for(&token);
        let Some((power, handler)) =
            rules.as_ref().and_then(|r| r.primitive)
        else {
            return Err(self.error(
                format!("unexpected {}", token.describe()),
                &token,
            ));
        };
        let mut left = handler(self, token, power)?;

        loop {
            let next = self.peek();
            let Some(rule) =
                self.rules.rules_for(next).and_then(|r| r.binary)
            else {
                break;
            };
            if rule.left <= min_power {
                break;
            }
            let token = self.advance();
            left = (rule.handler)(self, left, token, rule.right)?;
        }
        Ok(left)
    }

    /// Parse one statement (declarations included).
    pub fn statement(&mut self) -> Result<Stmt, ParseError> {
        while self.optional(";").is_some() {}

        let token = self.peek().clone();
        let rules = self.rules.rules_for(&token);
        if let Some(handler) =
            rules.as_ref().and_then(|r| r.statement.or(r.declaration))
        {
            let token = self.advance();
            let stmt = handler(self, token)?;
            self.optional(";");
            return Ok(stmt);
        }

        let expr = self.expression(0)?;
        if !matches!(
            expr.kind,
            ExprKind::Assign { .. } | ExprKind::Call { .. } | ExprKind::Throw(_)
        ) {
            return Err(ParseError::new(
                "only assignments, calls and throws can stand alone",
                expr.span,
                &token.line,
            ));
        }
        self.optional(";");
        let span = expr.span;
        Ok(Stmt::new(StmtKind::Expr(expr), span))
    }

    /// Parse one declaration (`var`, `const`, `import`, `export`).
    pub fn declaration(&mut self) -> Result<Stmt, ParseError> {
        let token = self.peek().clone();
        let rules = self.rules.rules_for(&token);
        let Some(handler) = rules.as_ref().and_then(|r| r.declaration) else {
            return Err(self.error(
                format!("expected a declaration, found {}", token.describe()),
                &token,
            ));
        };
        let token = self.advance();
        handler(self, token)
    }

    // ── shared pieces ──────────────────────────────────────────────

    /// Parse `{ statements }` in a fresh block scope.
    fn block(&mut self) -> Result<Block, ParseError> {
        let scope = LexicalScope::child(&self.scope, ScopeKind::Block);
        self.block_in_scope(scope)
    }

    /// Parse `{ statements }` into an existing scope (used by catch,
    /// which declares its binding first).
    fn block_in_scope(&mut self, scope: ScopeRef) -> Result<Block, ParseError> {
        self.required("{")?;
        let previous = self.enter_scope(scope.clone());
        let mut statements = Vec::new();
        loop {
            while self.optional(";").is_some() {}
            if self.check("}") || self.peek().is_end() {
                break;
            }
            match self.statement() {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    self.leave_scope(previous);
                    return Err(err);
                }
            }
        }
        self.leave_scope(previous);
        self.required("}")?;
        Ok(Block { scope, statements })
    }

    /// Parse a parameter list up to `)`, declaring slots in `scope`.
    fn parameters(
        &mut self,
        scope: &ScopeRef,
    ) -> Result<(Vec<scope::SlotRef>, Option<scope::SlotRef>), ParseError>
    {
        let mut params = Vec::new();
        let mut rest = None;
        if !self.check(")") {
            loop {
                if self.optional("...").is_some() {
                    let (name, token) = self.identifier()?;
                    let slot = scope::declare(
                        scope,
                        &name,
                        SlotKind::Parameter,
                        false,
                    )
                    .map_err(|_| {
                        self.error(
                            format!("duplicate parameter `{}`", name),
                            &token,
                        )
                    })?;
                    slot.borrow_mut().source =
                        SlotSource::ArgumentSlice(params.len());
                    rest = Some(slot);
                    if !self.check(")") {
                        let token = self.peek().clone();
                        return Err(self.error(
                            "a rest parameter must be last",
                            &token,
                        ));
                    }
                    break;
                }
                let (name, token) = self.identifier()?;
                let slot =
                    scope::declare(scope, &name, SlotKind::Parameter, false)
                        .map_err(|_| {
                            self.error(
                                format!("duplicate parameter `{}`", name),
                                &token,
                            )
                        })?;
                slot.borrow_mut().source = SlotSource::Argument(params.len());
                params.push(slot);
                if self.optional(",").is_none() || self.check(")") {
                    break;
                }
            }
        }
        self.required(")")?;
        Ok((params, rest))
    }

    /// Parse a function body (statements in the function's own scope).
    fn function_body(
        &mut self,
        scope: ScopeRef,
        params: Vec<scope::SlotRef>,
        rest: Option<scope::SlotRef>,
        start: Span,
    ) -> Result<Expr, ParseError> {
        let previous = self.enter_scope(scope.clone());
        let saved_loops = std::mem::take(&mut self.loop_depth);

        let result = (|| {
            let mut body = Vec::new();
            let end;
            if self.check("{") {
                self.required("{")?;
                loop {
                    while self.optional(";").is_some() {}
                    if self.check("}") || self.peek().is_end() {
                        break;
                    }
                    body.push(self.statement()?);
                }
                end = self.required("}")?.span;
            } else {
                // Arrow expression body: the value is returned.
                let expr = self.expression(0)?;
                end = expr.span;
                body.push(Stmt::new(
                    StmtKind::Return(Some(expr)),
                    end,
                ));
            }
            Ok((body, end))
        })();

        self.loop_depth = saved_loops;
        self.leave_scope(previous);

        let (body, end) = result?;
        Ok(Expr::new(
            ExprKind::Function(Box::new(FunctionLiteral {
                name: None,
                params,
                rest,
                scope,
                body,
            })),
            start.merge(end),
        ))
    }

    /// Parse an expression list up to `close` (call arguments, list
    /// literal elements).
    fn expression_list(
        &mut self,
        close: &str,
    ) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        if !self.check(close) {
            loop {
                items.push(self.expression(0)?);
                if self.optional(",").is_none() || self.check(close) {
                    break;
                }
            }
        }
        self.required(close)?;
        Ok(items)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Expression handlers
// ═══════════════════════════════════════════════════════════════════

fn null_expr(_p: &mut Parser, t: Token, _power: u8) -> Result<Expr, ParseError> {
    Ok(Expr::new(ExprKind::Null, t.span))
}

fn boolean_expr(
    _p: &mut Parser,
    t: Token,
    _power: u8,
) -> Result<Expr, ParseError> {
    let value = t.word() == Some("true");
    Ok(Expr::new(ExprKind::Boolean(value), t.span))
}

fn this_expr(_p: &mut Parser, t: Token, _power: u8) -> Result<Expr, ParseError> {
    Ok(Expr::new(ExprKind::This, t.span))
}

fn number_expr(
    _p: &mut Parser,
    t: Token,
    _power: u8,
) -> Result<Expr, ParseError> {
    let TokenKind::Number(value) = t.kind else {
        unreachable!("number rule on non-number token");
    };
    Ok(Expr::new(ExprKind::Number(value), t.span))
}

fn string_expr(
    _p: &mut Parser,
    t: Token,
    _power: u8,
) -> Result<Expr, ParseError> {
    let TokenKind::Str(value) = t.kind else {
        unreachable!("string rule on non-string token");
    };
    Ok(Expr::new(ExprKind::Str(value), t.span))
}

/// A bare identifier: either the start of `name => body` or a reference.
fn name_expr(p: &mut Parser, t: Token, _power: u8) -> Result<Expr, ParseError> {
    let name = t.word().unwrap_or_default().to_string();
    if p.check("=>") {
        let scope = LexicalScope::child(&p.scope, ScopeKind::Function);
        let slot = scope::declare(&scope, &name, SlotKind::Parameter, false)
            .map_err(|_| {
                p.error(format!("duplicate parameter `{}`", name), &t)
            })?;
        slot.borrow_mut().source = SlotSource::Argument(0);
        p.required("=>")?;
        return p.function_body(scope, vec![slot], None, t.span);
    }
    Ok(Expr::new(ExprKind::Name { name, slot: None }, t.span))
}

/// `(` — either a parenthesized expression or an arrow function head,
/// disambiguated by lookahead.
fn paren_expr(p: &mut Parser, t: Token, _power: u8) -> Result<Expr, ParseError> {
    let is_arrow = p.match_sequence(&[Pat::T(")"), Pat::T("=>")])
        || p.match_sequence(&[Pat::T("...")])
        || p.match_sequence(&[Pat::Word, Pat::T(",")])
        || p.match_sequence(&[Pat::Word, Pat::T(")"), Pat::T("=>")]);

    if is_arrow {
        let scope = LexicalScope::child(&p.scope, ScopeKind::Function);
        let (params, rest) = p.parameters(&scope)?;
        p.required("=>")?;
        return p.function_body(scope, params, rest, t.span);
    }

    let mut inner = p.expression(0)?;
    let close = p.required(")")?;
    inner.span = t.span.merge(close.span);
    Ok(inner)
}

fn list_expr(p: &mut Parser, t: Token, _power: u8) -> Result<Expr, ParseError> {
    let items = p.expression_list("]")?;
    let end = p
        .tokens
        .get(p.pos.saturating_sub(1))
        .map(|tok| tok.span)
        .unwrap_or(t.span);
    Ok(Expr::new(ExprKind::List(items), t.span.merge(end)))
}

fn table_expr(p: &mut Parser, t: Token, _power: u8) -> Result<Expr, ParseError> {
    let mut entries = Vec::new();
    if !p.check("}") {
        loop {
            let key = if p.optional("[").is_some() {
                let expr = p.expression(0)?;
                p.required("]")?;
                TableKey::Computed(expr)
            } else {
                let (name, _) = p.member_name()?;
                TableKey::Word(name)
            };
            p.required(":")?;
            let mut value = p.expression(0)?;
            if let TableKey::Word(name) = &key {
                name_function(&mut value, name);
            }
            entries.push((key, value));
            if p.optional(",").is_none() || p.check("}") {
                break;
            }
        }
    }
    let close = p.required("}")?;
    Ok(Expr::new(ExprKind::Table(entries), t.span.merge(close.span)))
}

fn function_expr(
    p: &mut Parser,
    t: Token,
    _power: u8,
) -> Result<Expr, ParseError> {
    p.required("(")?;
    let scope = LexicalScope::child(&p.scope, ScopeKind::Function);
    let (params, rest) = p.parameters(&scope)?;
    p.function_body(scope, params, rest, t.span)
}

fn throw_expr(p: &mut Parser, t: Token, power: u8) -> Result<Expr, ParseError> {
    let operand = p.expression(power)?;
    let span = t.span.merge(operand.span);
    Ok(Expr::new(ExprKind::Throw(Box::new(operand)), span))
}

fn unary_expr(p: &mut Parser, t: Token, power: u8) -> Result<Expr, ParseError> {
    let op = match t.punct() {
        Some("-") => UnaryOp::Negate,
        Some("+") => UnaryOp::Plus,
        _ => UnaryOp::Not,
    };
    let operand = p.expression(power)?;
    let span = t.span.merge(operand.span);
    Ok(Expr::new(
        ExprKind::Unary {
            op,
            operand: Box::new(operand),
        },
        span,
    ))
}

fn binary_expr(
    p: &mut Parser,
    left: Expr,
    t: Token,
    right_power: u8,
) -> Result<Expr, ParseError> {
    let op = binary_op_for(t.text().unwrap_or_default())
        .unwrap_or(BinaryOp::Add);
    let right = p.expression(right_power)?;
    let span = left.span.merge(right.span);
    Ok(Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    ))
}

fn logical_expr(
    p: &mut Parser,
    left: Expr,
    t: Token,
    right_power: u8,
) -> Result<Expr, ParseError> {
    let op = if t.punct() == Some("&&") {
        LogicalOp::And
    } else {
        LogicalOp::Or
    };
    let right = p.expression(right_power)?;
    let span = left.span.merge(right.span);
    Ok(Expr::new(
        ExprKind::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    ))
}

fn ternary_expr(
    p: &mut Parser,
    condition: Expr,
    _t: Token,
    right_power: u8,
) -> Result<Expr, ParseError> {
    let then = p.expression(0)?;
    p.required(":")?;
    let otherwise = p.expression(right_power)?;
    let span = condition.span.merge(otherwise.span);
    Ok(Expr::new(
        ExprKind::Ternary {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        },
        span,
    ))
}

fn assign_expr(
    p: &mut Parser,
    target: Expr,
    t: Token,
    right_power: u8,
) -> Result<Expr, ParseError> {
    match &target.kind {
        ExprKind::Name { name, .. } => {
            if let Some(slot) = scope::lookup(&p.scope, name) {
                if slot.borrow().read_only {
                    return Err(ParseError::new(
                        format!("cannot assign to constant `{}`", name),
                        target.span,
                        &t.line,
                    ));
                }
            }
        }
        ExprKind::Member { .. } | ExprKind::Index { .. } => {}
        _ => {
            return Err(ParseError::new(
                "invalid assignment target",
                target.span,
                &t.line,
            ));
        }
    }

    let text = t.punct().unwrap_or_default();
    let op = if text == "=" {
        None
    } else {
        binary_op_for(text)
    };
    let mut value = p.expression(right_power)?;
    if op.is_none() {
        match &target.kind {
            ExprKind::Name { name, .. } => name_function(&mut value, name),
            ExprKind::Member { name, .. } => name_function(&mut value, name),
            _ => {}
        }
    }
    let span = target.span.merge(value.span);
    Ok(Expr::new(
        ExprKind::Assign {
            target: Box::new(target),
            op,
            value: Box::new(value),
        },
        span,
    ))
}

fn call_expr(
    p: &mut Parser,
    callee: Expr,
    t: Token,
    _right_power: u8,
) -> Result<Expr, ParseError> {
    let args = p.expression_list(")")?;
    let end = p
        .tokens
        .get(p.pos.saturating_sub(1))
        .map(|tok| tok.span)
        .unwrap_or(t.span);
    let span = callee.span.merge(end);
    Ok(Expr::new(
        ExprKind::Call {
            callee: Box::new(callee),
            args,
        },
        span,
    ))
}

fn index_expr(
    p: &mut Parser,
    object: Expr,
    _t: Token,
    _right_power: u8,
) -> Result<Expr, ParseError> {
    let index = p.expression(0)?;
    let close = p.required("]")?;
    let span = object.span.merge(close.span);
    Ok(Expr::new(
        ExprKind::Index {
            object: Box::new(object),
            index: Box::new(index),
        },
        span,
    ))
}

fn member_expr(
    p: &mut Parser,
    object: Expr,
    _t: Token,
    _right_power: u8,
) -> Result<Expr, ParseError> {
    let (name, token) = p.member_name()?;
    let span = object.span.merge(token.span);
    Ok(Expr::new(
        ExprKind::Member {
            object: Box::new(object),
            name,
        },
        span,
    ))
}

/// Give an anonymous function literal the name it is being bound to.
fn name_function(value: &mut Expr, name: &str) {
    if let ExprKind::Function(func) = &mut value.kind {
        if func.name.is_none() {
            func.name = Some(name.to_string());
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Statement and declaration handlers
// ═══════════════════════════════════════════════════════════════════

fn if_stmt(p: &mut Parser, t: Token) -> Result<Stmt, ParseError> {
    p.required("(")?;
    let condition = p.expression(0)?;
    p.required(")")?;
    let then_block = p.block()?;

    let mut else_block = None;
    let mut end = then_block
        .statements
        .last()
        .map(|s| s.span)
        .unwrap_or(t.span);
    if p.optional("else").is_some() {
        if p.check("if") {
            // `else if` chains as an else block holding the nested if.
            let scope = LexicalScope::child(&p.scope, ScopeKind::Block);
            let previous = p.enter_scope(scope.clone());
            let token = p.advance();
            let nested = if_stmt(p, token);
            p.leave_scope(previous);
            let nested = nested?;
            end = nested.span;
            else_block = Some(Block {
                scope,
                statements: vec![nested],
            });
        } else {
            let block = p.block()?;
            end = block.statements.last().map(|s| s.span).unwrap_or(end);
            else_block = Some(block);
        }
    }

    Ok(Stmt::new(
        StmtKind::If {
            condition,
            then_block,
            else_block,
        },
        t.span.merge(end),
    ))
}

fn while_stmt(p: &mut Parser, t: Token) -> Result<Stmt, ParseError> {
    let scope = LexicalScope::child(&p.scope, ScopeKind::Loop);
    let previous = p.enter_scope(scope.clone());
    p.loop_depth += 1;

    let result = (|| {
        p.required("(")?;
        let condition = p.expression(0)?;
        p.required(")")?;
        let body = p.block()?;
        Ok((condition, body))
    })();

    p.loop_depth -= 1;
    p.leave_scope(previous);
    let (condition, body) = result?;

    Ok(Stmt::new(
        StmtKind::While {
            scope,
            condition,
            body,
        },
        t.span,
    ))
}

fn for_stmt(p: &mut Parser, t: Token) -> Result<Stmt, ParseError> {
    let scope = LexicalScope::child(&p.scope, ScopeKind::Loop);
    let previous = p.enter_scope(scope.clone());
    p.loop_depth += 1;

    let result = (|| {
        p.required("(")?;
        let init = if p.check(";") {
            None
        } else {
            let token = p.peek().clone();
            let rules = p.rules.rules_for(&token);
            if rules.as_ref().and_then(|r| r.declaration).is_some() {
                Some(Box::new(p.declaration()?))
            } else {
                let expr = p.expression(0)?;
                if !matches!(
                    expr.kind,
                    ExprKind::Assign { .. } | ExprKind::Call { .. }
                ) {
                    return Err(ParseError::new(
                        "a for-loop initializer must assign or call",
                        expr.span,
                        &token.line,
                    ));
                }
                let span = expr.span;
                Some(Box::new(Stmt::new(StmtKind::Expr(expr), span)))
            }
        };
        p.required(";")?;
        let condition = if p.check(";") {
            None
        } else {
            Some(p.expression(0)?)
        };
        p.required(";")?;
        let next = if p.check(")") {
            None
        } else {
            Some(p.expression(0)?)
        };
        p.required(")")?;
        let body = p.block()?;
        Ok((init, condition, next, body))
    })();

    p.loop_depth -= 1;
    p.leave_scope(previous);
    let (init, condition, next, body) = result?;

    Ok(Stmt::new(
        StmtKind::For {
            scope,
            init,
            condition,
            next,
            body,
        },
        t.span,
    ))
}

fn try_stmt(p: &mut Parser, t: Token) -> Result<Stmt, ParseError> {
    let body = p.block()?;

    let catch = if p.optional("catch").is_some() {
        let scope = LexicalScope::child(&p.scope, ScopeKind::Block);
        let binding = if p.optional("(").is_some() {
            let (name, token) = p.identifier()?;
            let slot = scope::declare(&scope, &name, SlotKind::Variable, false)
                .map_err(|_| {
                    p.error(
                        format!("duplicate declaration of `{}`", name),
                        &token,
                    )
                })?;
            p.required(")")?;
            Some(slot)
        } else {
            None
        };
        let body = p.block_in_scope(scope)?;
        Some(CatchClause { binding, body })
    } else {
        None
    };

    let finally = if p.optional("finally").is_some() {
        Some(p.block()?)
    } else {
        None
    };

    if catch.is_none() && finally.is_none() {
        return Err(p.error(
            "a try statement needs a catch or a finally",
            &t,
        ));
    }

    Ok(Stmt::new(
        StmtKind::Try {
            body,
            catch,
            finally,
        },
        t.span,
    ))
}

fn break_stmt(p: &mut Parser, t: Token) -> Result<Stmt, ParseError> {
    if p.loop_depth == 0 {
        return Err(p.error("`break` outside of a loop", &t));
    }
    Ok(Stmt::new(StmtKind::Break, t.span))
}

fn continue_stmt(p: &mut Parser, t: Token) -> Result<Stmt, ParseError> {
    if p.loop_depth == 0 {
        return Err(p.error("`continue` outside of a loop", &t));
    }
    Ok(Stmt::new(StmtKind::Continue, t.span))
}

fn return_stmt(p: &mut Parser, t: Token) -> Result<Stmt, ParseError> {
    let value = if p.check(";") || p.check("}") || p.peek().is_end() {
        None
    } else {
        Some(p.expression(0)?)
    };
    let span = value
        .as_ref()
        .map(|v| t.span.merge(v.span))
        .unwrap_or(t.span);
    Ok(Stmt::new(StmtKind::Return(value), span))
}

/// `var name [= init]` and `const name = init`.
fn var_decl(p: &mut Parser, t: Token) -> Result<Stmt, ParseError> {
    let read_only = t.word() == Some("const");
    let (name, name_token) = p.identifier()?;

    let init = if p.optional("=").is_some() {
        let mut expr = p.expression(0)?;
        name_function(&mut expr, &name);
        Some(expr)
    } else if read_only {
        let token = p.peek().clone();
        return Err(p.error("a constant needs an initializer", &token));
    } else {
        None
    };

    let slot =
        p.declare(&name, &name_token, SlotKind::Variable, read_only)?;
    let end = init.as_ref().map(|e| e.span).unwrap_or(name_token.span);
    Ok(Stmt::new(
        StmtKind::Declaration { slot, init },
        t.span.merge(end),
    ))
}

/// `import name from 'path'`, module scope only.
fn import_decl(p: &mut Parser, t: Token) -> Result<Stmt, ParseError> {
    if !p.scope.borrow().is_module() {
        return Err(p.error("imports belong at module scope", &t));
    }
    let (name, name_token) = p.identifier()?;
    p.required("from")?;
    let token = p.advance();
    let TokenKind::Str(path) = token.kind.clone() else {
        return Err(p.error(
            format!("expected a module path, found {}", token.describe()),
            &token,
        ));
    };
    let slot = p.declare(&name, &name_token, SlotKind::Import, true)?;
    Ok(Stmt::new(
        StmtKind::Import { slot, path },
        t.span.merge(token.span),
    ))
}

/// `export const name = expr`, module scope only.
fn export_decl(p: &mut Parser, t: Token) -> Result<Stmt, ParseError> {
    if !p.scope.borrow().is_module() {
        return Err(p.error("exports belong at module scope", &t));
    }
    p.required("const")?;
    let (name, name_token) = p.identifier()?;
    p.required("=")?;
    let mut init = p.expression(0)?;
    name_function(&mut init, &name);
    let slot = p.declare(&name, &name_token, SlotKind::Variable, true)?;
    let span = t.span.merge(init.span);
    Ok(Stmt::new(StmtKind::Export { slot, name, init }, span))
}
