//! Recursive-descent / Pratt parser producing the surface AST.
//!
//! Binding powers, lowest to highest: lambda, `<-`, `||`, `&&`, equality,
//! comparison, `++`, additive, multiplicative, unary, application and field
//! access. The parser is panic-free on arbitrary token streams: errors
//! produce reports plus `Error` recovery nodes and parsing continues at the
//! next synchronization point.

use crate::{
    diagnostic::{Phase, Report},
    lexer::{Token, TokenKind, tokenize},
    source::{Span, normalize},
    surface::{
        BinOp, ClassDecl, CtorDecl, Decl, Expr, ExprKind, File, FuncDecl, ImportDecl, InstanceDecl, Literal,
        MatchArm, ModuleDecl, Param, Pattern, PatternKind, TestDecl, TypeBody, TypeDecl, TypeExpr, UnOp,
    },
};

/// Maximum nesting depth for expressions and types during parsing.
///
/// Prevents stack overflow from adversarial inputs like `((((((...))))))`.
#[cfg(not(debug_assertions))]
const MAX_NESTING_DEPTH: u16 = 200;
/// Debug builds use far larger stack frames, so the guard trips earlier.
#[cfg(debug_assertions)]
const MAX_NESTING_DEPTH: u16 = 60;

/// Parses raw source bytes into a [`File`].
///
/// Returns the file plus all reports (lexical and syntactic). The file is
/// usable for best-effort tooling even when reports are present; callers
/// that need a valid tree must check for error-severity reports first.
pub fn parse_source(file_name: &str, bytes: &[u8]) -> (File, Vec<Report>) {
    match normalize(bytes) {
        Ok(text) => parse_text(file_name, &text),
        Err(err) => {
            let report = Report::new(Phase::Parse, "PAR001", err.to_string());
            (empty_file(), vec![report])
        }
    }
}

/// Parses already-normalized text into a [`File`].
pub fn parse_text(file_name: &str, text: &str) -> (File, Vec<Report>) {
    let (tokens, mut reports) = tokenize(file_name, text);
    let mut parser = Parser::new(file_name, tokens);
    let file = parser.parse_file();
    reports.append(&mut parser.reports);
    (file, reports)
}

fn empty_file() -> File {
    File {
        module: None,
        imports: Vec::new(),
        decls: Vec::new(),
        statements: Vec::new(),
    }
}

struct Parser<'a> {
    file_name: &'a str,
    tokens: Vec<Token>,
    index: usize,
    depth: u16,
    reports: Vec<Report>,
}

impl<'a> Parser<'a> {
    fn new(file_name: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            file_name,
            tokens,
            index: 0,
            depth: 0,
            reports: Vec::new(),
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_ahead(&self, n: usize) -> &Token {
        let idx = (self.index + n).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn span(&self) -> Span {
        self.peek().span
    }

    fn error(&mut self, code: &str, message: String) {
        let span = self.span();
        self.reports
            .push(Report::new(Phase::Parse, code, message).with_span(self.file_name, span));
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> bool {
        if self.eat(kind) {
            true
        } else {
            let found = self.peek().clone();
            let found_desc = if found.text.is_empty() {
                found.kind.to_string()
            } else {
                format!("`{}`", found.text)
            };
            self.error("PAR011", format!("expected {what}, found {found_desc}"));
            false
        }
    }

    fn expect_ident(&mut self, what: &str) -> Option<String> {
        if matches!(self.peek_kind(), TokenKind::Ident) {
            Some(self.bump().text)
        } else {
            self.error("PAR010", format!("expected {what}"));
            None
        }
    }

    /// Skips tokens until a likely statement/declaration boundary.
    fn synchronize(&mut self) {
        while !self.at_eof() {
            match self.peek_kind() {
                TokenKind::Semi => {
                    self.bump();
                    return;
                }
                TokenKind::RBrace
                | TokenKind::Func
                | TokenKind::Type
                | TokenKind::Class
                | TokenKind::Instance
                | TokenKind::Import
                | TokenKind::Export
                | TokenKind::Module => return,
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn enter(&mut self) -> bool {
        if self.depth >= MAX_NESTING_DEPTH {
            self.error("PAR010", "expression nesting too deep".to_owned());
            false
        } else {
            self.depth += 1;
            true
        }
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ── File structure ─────────────────────────────────────────────────

    fn parse_file(&mut self) -> File {
        let mut file = empty_file();
        if self.at(&TokenKind::Module) {
            file.module = self.parse_module_decl();
        }
        while self.at(&TokenKind::Import) {
            if let Some(import) = self.parse_import_decl() {
                file.imports.push(import);
            }
        }
        while !self.at_eof() {
            let before = self.index;
            match self.peek_kind() {
                TokenKind::Module => {
                    let span = self.span();
                    self.reports.push(
                        Report::new(
                            Phase::Module,
                            "MOD002",
                            "multiple module headers; only one is allowed per file".to_owned(),
                        )
                        .with_span(self.file_name, span),
                    );
                    self.bump();
                    self.synchronize();
                }
                TokenKind::Import => {
                    if let Some(import) = self.parse_import_decl() {
                        file.imports.push(import);
                    }
                }
                TokenKind::Export | TokenKind::Func | TokenKind::Type | TokenKind::Class | TokenKind::Instance => {
                    if let Some(decl) = self.parse_decl() {
                        file.decls.push(decl);
                    }
                }
                TokenKind::Ident
                    if (self.peek().is_ident("test") || self.peek().is_ident("tests") || self.peek().is_ident("property"))
                        && matches!(self.peek_ahead(1).kind, TokenKind::Str(_)) =>
                {
                    if let Some(decl) = self.parse_test_decl() {
                        file.decls.push(decl);
                    }
                }
                TokenKind::Semi => {
                    self.bump();
                }
                _ => {
                    let expr = self.parse_expr();
                    file.statements.push(expr);
                    self.eat(&TokenKind::Semi);
                }
            }
            if self.index == before {
                // no forward progress; drop the offending token
                self.error("PAR010", format!("unexpected token `{}`", self.peek().text));
                self.bump();
            }
        }
        file
    }

    fn parse_module_decl(&mut self) -> Option<ModuleDecl> {
        let start = self.span();
        self.bump(); // module
        let path = self.parse_module_path()?;
        Some(ModuleDecl {
            path,
            span: start.merge(self.span()),
        })
    }

    /// `a/b/c` — identifiers joined by `/`, with optional `./` and `../`
    /// prefixes for file-relative imports.
    fn parse_module_path(&mut self) -> Option<String> {
        let mut path = String::new();
        loop {
            if self.eat(&TokenKind::Dot) {
                path.push('.');
            } else if self.eat(&TokenKind::DotDot) {
                path.push_str("..");
            } else {
                break;
            }
            if !self.expect(&TokenKind::Slash, "`/` after relative path prefix") {
                return None;
            }
            path.push('/');
        }
        path.push_str(&self.expect_ident("module path")?);
        while self.at(&TokenKind::Slash) {
            self.bump();
            let segment = self.expect_ident("module path segment")?;
            path.push('/');
            path.push_str(&segment);
        }
        Some(path)
    }

    fn parse_import_decl(&mut self) -> Option<ImportDecl> {
        let start = self.span();
        self.bump(); // import
        let path = match self.parse_module_path() {
            Some(path) => path,
            None => {
                self.synchronize();
                return None;
            }
        };
        let symbols = if self.eat(&TokenKind::LParen) {
            let mut names = Vec::new();
            while !self.at(&TokenKind::RParen) && !self.at_eof() {
                if let Some(name) = self.expect_ident("imported symbol") {
                    names.push(name);
                } else {
                    break;
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen, "`)` after import list");
            Some(names)
        } else {
            None
        };
        Some(ImportDecl {
            path,
            symbols,
            span: start.merge(self.span()),
        })
    }

    fn parse_decl(&mut self) -> Option<Decl> {
        let is_export = self.eat(&TokenKind::Export);
        match self.peek_kind() {
            TokenKind::Func => self.parse_func_decl(is_export).map(Decl::Func),
            TokenKind::Type => self.parse_type_decl(is_export).map(Decl::Type),
            TokenKind::Class => self.parse_class_decl().map(Decl::Class),
            TokenKind::Instance => self.parse_instance_decl().map(Decl::Instance),
            _ => {
                self.error("PAR012", "expected `func` or `type` after `export`".to_owned());
                self.synchronize();
                None
            }
        }
    }

    fn parse_func_decl(&mut self, is_export: bool) -> Option<FuncDecl> {
        let start = self.span();
        self.bump(); // func
        let name = match self.expect_ident("function name") {
            Some(name) => name,
            None => {
                self.synchronize();
                return None;
            }
        };
        let params = self.parse_params()?;
        let ret = if self.eat(&TokenKind::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let effects = if self.at(&TokenKind::Bang) {
            self.parse_effect_row()
        } else {
            Vec::new()
        };
        let body = if self.eat(&TokenKind::Assign) {
            self.parse_expr()
        } else if self.at(&TokenKind::LBrace) {
            self.parse_block()
        } else {
            self.error("PAR012", "expected `{` or `=` to start function body".to_owned());
            self.synchronize();
            return None;
        };
        Some(FuncDecl {
            name,
            params,
            ret,
            effects,
            body,
            is_export,
            span: start.merge(self.span()),
        })
    }

    fn parse_params(&mut self) -> Option<Vec<Param>> {
        if !self.expect(&TokenKind::LParen, "`(` to start parameter list") {
            self.synchronize();
            return None;
        }
        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) && !self.at_eof() {
            let span = self.span();
            let Some(name) = self.expect_ident("parameter name") else {
                self.synchronize();
                return None;
            };
            let annotation = if self.eat(&TokenKind::Colon) {
                Some(self.parse_type()?)
            } else {
                None
            };
            params.push(Param {
                name,
                annotation,
                span: span.merge(self.span()),
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "`)` after parameters");
        Some(params)
    }

    /// `! {IO, FS}` — also accepts a single bare effect `! IO`.
    fn parse_effect_row(&mut self) -> Vec<String> {
        self.bump(); // !
        let mut effects = Vec::new();
        if self.eat(&TokenKind::LBrace) {
            while !self.at(&TokenKind::RBrace) && !self.at_eof() {
                if let Some(name) = self.expect_ident("effect name") {
                    effects.push(name);
                } else {
                    break;
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RBrace, "`}` after effect row");
        } else if let Some(name) = self.expect_ident("effect name") {
            effects.push(name);
        }
        effects
    }

    fn parse_type_decl(&mut self, is_export: bool) -> Option<TypeDecl> {
        let start = self.span();
        self.bump(); // type
        let name = match self.expect_ident("type name") {
            Some(name) => name,
            None => {
                self.synchronize();
                return None;
            }
        };
        let mut params = Vec::new();
        if self.eat(&TokenKind::LBracket) {
            while !self.at(&TokenKind::RBracket) && !self.at_eof() {
                if let Some(param) = self.expect_ident("type parameter") {
                    params.push(param);
                } else {
                    break;
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RBracket, "`]` after type parameters");
        }
        if !self.expect(&TokenKind::Assign, "`=` in type declaration") {
            self.synchronize();
            return None;
        }
        let body = self.parse_type_body()?;
        Some(TypeDecl {
            name,
            params,
            body,
            is_export,
            span: start.merge(self.span()),
        })
    }

    /// Distinguishes `type T = Red | Green` (sum) from `type T = [Int]`
    /// (alias) from `type T = {x: Int}` (record).
    fn parse_type_body(&mut self) -> Option<TypeBody> {
        // A sum type starts with an uppercase constructor name and is either
        // followed by `|`, `(`, or ends the declaration. A lone uppercase
        // name that is a known primitive-style reference is also a valid
        // alias, so the constructor interpretation wins only when a `|` or
        // `(` makes it unambiguous, or the name is not followed by type
        // arguments.
        if matches!(self.peek_kind(), TokenKind::Ident) && starts_upper(&self.peek().text) {
            let is_sum = match self.peek_ahead(1).kind {
                TokenKind::Pipe | TokenKind::LParen => true,
                TokenKind::LBracket => false, // `Name[..]` is a type application alias
                _ => false,
            };
            if is_sum {
                return self.parse_sum_ctors().map(TypeBody::Sum);
            }
        }
        if self.at(&TokenKind::LBrace) {
            // record type body
            let ty = self.parse_type()?;
            if let TypeExpr::Record(fields) = ty {
                return Some(TypeBody::Record(fields));
            }
            return Some(TypeBody::Alias(ty));
        }
        self.parse_type().map(TypeBody::Alias)
    }

    fn parse_sum_ctors(&mut self) -> Option<Vec<CtorDecl>> {
        let mut ctors = Vec::new();
        loop {
            let span = self.span();
            let Some(name) = self.expect_ident("constructor name") else {
                return None;
            };
            let mut fields = Vec::new();
            if self.eat(&TokenKind::LParen) {
                while !self.at(&TokenKind::RParen) && !self.at_eof() {
                    fields.push(self.parse_type()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RParen, "`)` after constructor fields");
            }
            ctors.push(CtorDecl {
                name,
                fields,
                span: span.merge(self.span()),
            });
            if !self.eat(&TokenKind::Pipe) {
                break;
            }
        }
        Some(ctors)
    }

    fn parse_class_decl(&mut self) -> Option<ClassDecl> {
        let start = self.span();
        self.bump(); // class
        let name = self.expect_ident("class name")?;
        self.expect(&TokenKind::LBracket, "`[` after class name");
        let param = self.expect_ident("class type parameter")?;
        self.expect(&TokenKind::RBracket, "`]` after class type parameter");
        self.expect(&TokenKind::LBrace, "`{` to open class body");
        let mut methods = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at_eof() {
            self.expect(&TokenKind::Func, "`func` method signature");
            let Some(method) = self.expect_ident("method name") else { break };
            let params = self.parse_params()?;
            self.expect(&TokenKind::Arrow, "`->` in method signature");
            let ret = self.parse_type()?;
            let ty = TypeExpr::Func {
                params: params.into_iter().map(|p| p.annotation.unwrap_or(TypeExpr::Unit)).collect(),
                ret: Box::new(ret),
                effects: Vec::new(),
            };
            methods.push((method, ty));
            self.eat(&TokenKind::Semi);
        }
        self.expect(&TokenKind::RBrace, "`}` to close class body");
        Some(ClassDecl {
            name,
            param,
            methods,
            span: start.merge(self.span()),
        })
    }

    fn parse_instance_decl(&mut self) -> Option<InstanceDecl> {
        let start = self.span();
        self.bump(); // instance
        let class = self.expect_ident("class name")?;
        self.expect(&TokenKind::LBracket, "`[` after class name");
        let head = self.parse_type()?;
        self.expect(&TokenKind::RBracket, "`]` after instance head");
        self.expect(&TokenKind::LBrace, "`{` to open instance body");
        let mut methods = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at_eof() {
            if !self.at(&TokenKind::Func) {
                self.error("PAR012", "expected `func` inside instance body".to_owned());
                self.synchronize();
                break;
            }
            if let Some(method) = self.parse_func_decl(false) {
                methods.push(method);
            }
        }
        self.expect(&TokenKind::RBrace, "`}` to close instance body");
        Some(InstanceDecl {
            class,
            head,
            methods,
            span: start.merge(self.span()),
        })
    }

    fn parse_test_decl(&mut self) -> Option<Decl> {
        let start = self.span();
        let keyword = self.bump(); // test | tests | property
        let is_property = keyword.is_ident("property");
        let name = match self.bump().kind {
            TokenKind::Str(s) => s,
            _ => {
                self.error("PAR012", "expected test name string".to_owned());
                return None;
            }
        };
        let body = self.parse_block();
        Some(Decl::Test(TestDecl {
            name,
            is_property,
            body,
            span: start.merge(self.span()),
        }))
    }

    // ── Types ──────────────────────────────────────────────────────────

    fn parse_type(&mut self) -> Option<TypeExpr> {
        if !self.enter() {
            return None;
        }
        let result = self.parse_type_inner();
        self.leave();
        result
    }

    fn parse_type_inner(&mut self) -> Option<TypeExpr> {
        let (atom, was_paren_group) = self.parse_type_atom()?;
        if self.eat(&TokenKind::Arrow) {
            let ret = self.parse_type()?;
            let effects = if self.at(&TokenKind::Bang) {
                self.parse_effect_row()
            } else {
                Vec::new()
            };
            // `(A, B) -> C` is a two-parameter function; a genuine tuple
            // parameter needs double parens: `((A, B)) -> C`.
            let params = match atom {
                TypeExpr::Tuple(elems) if was_paren_group => elems,
                TypeExpr::Unit if was_paren_group => Vec::new(),
                other => vec![other],
            };
            return Some(TypeExpr::Func {
                params,
                ret: Box::new(ret),
                effects,
            });
        }
        Some(atom)
    }

    /// Returns the parsed atom plus whether it came from a parenthesized
    /// group at this level (which makes a following `->` treat it as a
    /// parameter list).
    fn parse_type_atom(&mut self) -> Option<(TypeExpr, bool)> {
        match self.peek_kind().clone() {
            TokenKind::Ident => {
                let name = self.bump().text;
                if starts_upper(&name) {
                    if self.eat(&TokenKind::LBracket) {
                        let mut args = Vec::new();
                        while !self.at(&TokenKind::RBracket) && !self.at_eof() {
                            args.push(self.parse_type()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(&TokenKind::RBracket, "`]` after type arguments");
                        Some((TypeExpr::App { ctor: name, args }, false))
                    } else {
                        Some((TypeExpr::Con(name), false))
                    }
                } else {
                    Some((TypeExpr::Var(name), false))
                }
            }
            TokenKind::LBracket => {
                self.bump();
                let elem = self.parse_type()?;
                self.expect(&TokenKind::RBracket, "`]` after list element type");
                Some((TypeExpr::List(Box::new(elem)), false))
            }
            TokenKind::LParen => {
                self.bump();
                if self.eat(&TokenKind::RParen) {
                    return Some((TypeExpr::Unit, true));
                }
                let first = self.parse_type()?;
                if self.eat(&TokenKind::Comma) {
                    let mut elems = vec![first];
                    while !self.at(&TokenKind::RParen) && !self.at_eof() {
                        elems.push(self.parse_type()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RParen, "`)` after tuple type");
                    Some((TypeExpr::Tuple(elems), true))
                } else {
                    self.expect(&TokenKind::RParen, "`)` after type");
                    Some((first, true))
                }
            }
            TokenKind::LBrace => {
                self.bump();
                let mut fields = Vec::new();
                while !self.at(&TokenKind::RBrace) && !self.at_eof() {
                    let Some(name) = self.expect_ident("record field name") else { break };
                    self.expect(&TokenKind::Colon, "`:` after field name");
                    let ty = self.parse_type()?;
                    fields.push((name, ty));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBrace, "`}` after record type");
                Some((TypeExpr::Record(fields), false))
            }
            _ => {
                self.error("PAR010", format!("expected a type, found `{}`", self.peek().text));
                None
            }
        }
    }

    // ── Expressions ────────────────────────────────────────────────────

    fn parse_expr(&mut self) -> Expr {
        self.parse_expr_bp(0)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> Expr {
        if !self.enter() {
            let span = self.span();
            // consume one token so callers always make progress
            self.bump();
            return Expr::new(ExprKind::Error, span);
        }
        let mut lhs = self.parse_prefix();
        loop {
            let Some((op, l_bp, r_bp)) = self.peek_binop() else { break };
            if l_bp < min_bp {
                break;
            }
            self.bump();
            if op_is_send(op) {
                let rhs = self.parse_expr_bp(r_bp);
                let span = lhs.span.merge(rhs.span);
                lhs = Expr::new(
                    ExprKind::Send {
                        channel: Box::new(lhs),
                        value: Box::new(rhs),
                    },
                    span,
                );
                continue;
            }
            let rhs = self.parse_expr_bp(r_bp);
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op: op_to_binop(op),
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        self.leave();
        lhs
    }

    fn peek_binop(&self) -> Option<(&'static str, u8, u8)> {
        let entry = match self.peek_kind() {
            TokenKind::LeftArrow => ("<-", 2, 3),
            TokenKind::OrOr => ("||", 10, 11),
            TokenKind::AndAnd => ("&&", 20, 21),
            TokenKind::EqEq => ("==", 30, 31),
            TokenKind::NotEq => ("!=", 30, 31),
            TokenKind::Lt => ("<", 40, 41),
            TokenKind::Le => ("<=", 40, 41),
            TokenKind::Gt => (">", 40, 41),
            TokenKind::Ge => (">=", 40, 41),
            TokenKind::PlusPlus => ("++", 50, 51),
            TokenKind::Plus => ("+", 60, 61),
            TokenKind::Minus => ("-", 60, 61),
            TokenKind::Star => ("*", 70, 71),
            TokenKind::Slash => ("/", 70, 71),
            TokenKind::Percent => ("%", 70, 71),
            _ => return None,
        };
        Some(entry)
    }

    fn parse_prefix(&mut self) -> Expr {
        let start = self.span();
        let mut expr = match self.peek_kind().clone() {
            TokenKind::Minus => {
                self.bump();
                let operand = self.parse_expr_bp(80);
                let span = start.merge(operand.span);
                Expr::new(
                    ExprKind::Unary {
                        op: UnOp::Neg,
                        expr: Box::new(operand),
                    },
                    span,
                )
            }
            TokenKind::Bang => {
                self.bump();
                let operand = self.parse_expr_bp(80);
                let span = start.merge(operand.span);
                Expr::new(
                    ExprKind::Unary {
                        op: UnOp::Not,
                        expr: Box::new(operand),
                    },
                    span,
                )
            }
            TokenKind::LeftArrow => {
                self.bump();
                let channel = self.parse_expr_bp(80);
                let span = start.merge(channel.span);
                Expr::new(ExprKind::Recv(Box::new(channel)), span)
            }
            TokenKind::Backtick => {
                self.bump();
                let quoted = self.parse_expr_bp(80);
                let span = start.merge(quoted.span);
                Expr::new(ExprKind::Quasiquote(Box::new(quoted)), span)
            }
            TokenKind::Backslash => self.parse_lambda(),
            TokenKind::Func => self.parse_func_literal(),
            TokenKind::Let => self.parse_let(),
            TokenKind::Letrec => self.parse_letrec(),
            TokenKind::If => self.parse_if(),
            TokenKind::Match => self.parse_match(),
            _ => self.parse_primary(),
        };
        // postfix: application and field access bind tightest
        loop {
            match self.peek_kind() {
                TokenKind::LParen => {
                    self.bump();
                    let mut args = Vec::new();
                    while !self.at(&TokenKind::RParen) && !self.at_eof() {
                        args.push(self.parse_expr());
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RParen, "`)` after arguments");
                    let span = expr.span.merge(self.span());
                    expr = Expr::new(
                        ExprKind::App {
                            func: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                TokenKind::Dot => {
                    self.bump();
                    let Some(field) = self.expect_ident("field name after `.`") else {
                        break;
                    };
                    let span = expr.span.merge(self.span());
                    expr = Expr::new(
                        ExprKind::FieldAccess {
                            base: Box::new(expr),
                            field,
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        expr
    }

    fn parse_lambda(&mut self) -> Expr {
        let start = self.span();
        self.bump(); // backslash
        let mut params = Vec::new();
        while matches!(self.peek_kind(), TokenKind::Ident | TokenKind::Underscore) {
            let token = self.bump();
            params.push(if token.kind == TokenKind::Underscore {
                "_".to_owned()
            } else {
                token.text
            });
        }
        if params.is_empty() {
            self.error("PAR010", "lambda needs at least one parameter".to_owned());
        }
        self.expect(&TokenKind::Dot, "`.` after lambda parameters");
        let body = self.parse_expr_bp(0);
        let span = start.merge(body.span);
        Expr::new(
            ExprKind::Lambda {
                params,
                body: Box::new(body),
            },
            span,
        )
    }

    fn parse_func_literal(&mut self) -> Expr {
        let start = self.span();
        self.bump(); // func
        let Some(params) = self.parse_params() else {
            return Expr::new(ExprKind::Error, start);
        };
        let ret = if self.eat(&TokenKind::Arrow) { self.parse_type() } else { None };
        let effects = if self.at(&TokenKind::Bang) {
            self.parse_effect_row()
        } else {
            Vec::new()
        };
        let body = self.parse_block();
        let span = start.merge(body.span);
        Expr::new(
            ExprKind::FuncLit {
                params,
                ret,
                effects,
                body: Box::new(body),
            },
            span,
        )
    }

    fn parse_let(&mut self) -> Expr {
        let start = self.span();
        self.bump(); // let
        let Some(name) = self.expect_ident("binding name") else {
            return Expr::new(ExprKind::Error, start);
        };
        let annotation = if self.eat(&TokenKind::Colon) { self.parse_type() } else { None };
        if !self.expect(&TokenKind::Assign, "`=` in let binding") {
            return Expr::new(ExprKind::Error, start);
        }
        let value = self.parse_expr();
        let body = if self.eat(&TokenKind::In) {
            Some(Box::new(self.parse_expr()))
        } else {
            None
        };
        let span = start.merge(self.span());
        Expr::new(
            ExprKind::Let {
                name,
                annotation,
                value: Box::new(value),
                body,
            },
            span,
        )
    }

    fn parse_letrec(&mut self) -> Expr {
        let start = self.span();
        self.bump(); // letrec
        let mut bindings = Vec::new();
        loop {
            let Some(name) = self.expect_ident("binding name") else {
                return Expr::new(ExprKind::Error, start);
            };
            if !self.expect(&TokenKind::Assign, "`=` in letrec binding") {
                return Expr::new(ExprKind::Error, start);
            }
            let value = self.parse_expr();
            bindings.push((name, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        if !self.expect(&TokenKind::In, "`in` after letrec bindings") {
            return Expr::new(ExprKind::Error, start);
        }
        let body = self.parse_expr();
        let span = start.merge(body.span);
        Expr::new(
            ExprKind::LetRec {
                bindings,
                body: Box::new(body),
            },
            span,
        )
    }

    fn parse_if(&mut self) -> Expr {
        let start = self.span();
        self.bump(); // if
        let cond = self.parse_expr();
        self.expect(&TokenKind::Then, "`then` after condition");
        let then = self.parse_expr();
        self.expect(&TokenKind::Else, "`else` branch");
        let els = self.parse_expr();
        let span = start.merge(els.span);
        Expr::new(
            ExprKind::If {
                cond: Box::new(cond),
                then: Box::new(then),
                els: Box::new(els),
            },
            span,
        )
    }

    fn parse_match(&mut self) -> Expr {
        let start = self.span();
        self.bump(); // match
        let scrutinee = self.parse_expr();
        self.expect(&TokenKind::LBrace, "`{` to open match arms");
        let mut arms = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at_eof() {
            let arm_start = self.span();
            let Some(pattern) = self.parse_pattern() else {
                self.synchronize();
                break;
            };
            let guard = if self.eat(&TokenKind::If) {
                Some(self.parse_expr())
            } else {
                None
            };
            self.expect(&TokenKind::FatArrow, "`=>` after pattern");
            let body = self.parse_expr();
            arms.push(MatchArm {
                pattern,
                guard,
                body,
                span: arm_start.merge(self.span()),
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace, "`}` to close match arms");
        if arms.is_empty() {
            self.error("PAR010", "match expression needs at least one arm".to_owned());
        }
        let span = start.merge(self.span());
        Expr::new(
            ExprKind::Match {
                scrutinee: Box::new(scrutinee),
                arms,
            },
            span,
        )
    }

    fn parse_primary(&mut self) -> Expr {
        let start = self.span();
        match self.peek_kind().clone() {
            TokenKind::Int(value) => {
                self.bump();
                Expr::new(ExprKind::Lit(Literal::Int(value)), start)
            }
            TokenKind::Float(value) => {
                self.bump();
                Expr::new(ExprKind::Lit(Literal::Float(value)), start)
            }
            TokenKind::Str(value) => {
                self.bump();
                Expr::new(ExprKind::Lit(Literal::Str(value)), start)
            }
            TokenKind::Char(value) => {
                self.bump();
                Expr::new(ExprKind::Lit(Literal::Char(value)), start)
            }
            TokenKind::True => {
                self.bump();
                Expr::new(ExprKind::Lit(Literal::Bool(true)), start)
            }
            TokenKind::False => {
                self.bump();
                Expr::new(ExprKind::Lit(Literal::Bool(false)), start)
            }
            TokenKind::Ident | TokenKind::Underscore => {
                let token = self.bump();
                let name = if token.kind == TokenKind::Underscore {
                    "_".to_owned()
                } else {
                    token.text
                };
                Expr::new(ExprKind::Var(name), start)
            }
            TokenKind::LParen => self.parse_paren(),
            TokenKind::LBracket => self.parse_list(),
            TokenKind::LBrace => self.parse_brace(),
            _ => {
                self.error("PAR010", format!("unexpected token `{}`", self.peek().text));
                self.bump();
                Expr::new(ExprKind::Error, start)
            }
        }
    }

    /// `()` is unit, `(x)` is grouping, `(x,)` and `(x, y)` are tuples.
    fn parse_paren(&mut self) -> Expr {
        let start = self.span();
        self.bump(); // (
        if self.eat(&TokenKind::RParen) {
            let span = start.merge(self.span());
            return Expr::new(ExprKind::Lit(Literal::Unit), span);
        }
        let first = self.parse_expr();
        if self.eat(&TokenKind::Comma) {
            let mut elems = vec![first];
            while !self.at(&TokenKind::RParen) && !self.at_eof() {
                elems.push(self.parse_expr());
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen, "`)` after tuple");
            let span = start.merge(self.span());
            Expr::new(ExprKind::Tuple(elems), span)
        } else {
            self.expect(&TokenKind::RParen, "`)` after expression");
            first
        }
    }

    fn parse_list(&mut self) -> Expr {
        let start = self.span();
        self.bump(); // [
        let mut elems = Vec::new();
        while !self.at(&TokenKind::RBracket) && !self.at_eof() {
            elems.push(self.parse_expr());
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBracket, "`]` after list");
        let span = start.merge(self.span());
        Expr::new(ExprKind::List(elems), span)
    }

    /// Disambiguates `{}` (empty record), `{f: v}` (record literal),
    /// `{base | f: v}` (record update), and `{e1; e2}` (block).
    fn parse_brace(&mut self) -> Expr {
        let start = self.span();
        self.bump(); // {
        if self.eat(&TokenKind::RBrace) {
            let span = start.merge(self.span());
            return Expr::new(ExprKind::Record(Vec::new()), span);
        }
        // `{ ident: ...` begins a record literal
        if matches!(self.peek_kind(), TokenKind::Ident) && self.peek_ahead(1).kind == TokenKind::Colon {
            return self.parse_record_fields_into(start, None);
        }
        let first = self.parse_expr();
        if self.eat(&TokenKind::Pipe) {
            return self.parse_record_fields_into(start, Some(first));
        }
        // block
        let mut items = vec![first];
        while self.eat(&TokenKind::Semi) {
            if self.at(&TokenKind::RBrace) {
                break;
            }
            items.push(self.parse_expr());
        }
        self.expect(&TokenKind::RBrace, "`}` to close block");
        let span = start.merge(self.span());
        Expr::new(ExprKind::Block(items), span)
    }

    fn parse_record_fields_into(&mut self, start: Span, base: Option<Expr>) -> Expr {
        let mut fields = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at_eof() {
            let Some(name) = self.expect_ident("record field name") else { break };
            self.expect(&TokenKind::Colon, "`:` after field name");
            let value = self.parse_expr();
            fields.push((name, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace, "`}` to close record");
        let span = start.merge(self.span());
        match base {
            Some(base) => Expr::new(
                ExprKind::RecordUpdate {
                    base: Box::new(base),
                    fields,
                },
                span,
            ),
            None => Expr::new(ExprKind::Record(fields), span),
        }
    }

    /// Parses a `{ ... }` block as an expression (function bodies).
    fn parse_block(&mut self) -> Expr {
        if self.at(&TokenKind::LBrace) {
            self.parse_brace()
        } else {
            let span = self.span();
            self.error("PAR011", "expected `{` to open a block".to_owned());
            Expr::new(ExprKind::Error, span)
        }
    }

    // ── Patterns ───────────────────────────────────────────────────────

    fn parse_pattern(&mut self) -> Option<Pattern> {
        if !self.enter() {
            return None;
        }
        let result = self.parse_pattern_inner();
        self.leave();
        // `p as name`
        if let Some(pattern) = result {
            if self.peek().is_ident("as") {
                self.bump();
                let name = self.expect_ident("binding name after `as`")?;
                let span = pattern.span.merge(self.span());
                return Some(Pattern {
                    kind: PatternKind::Binding {
                        pattern: Box::new(pattern),
                        name,
                    },
                    span,
                });
            }
            return Some(pattern);
        }
        None
    }

    fn parse_pattern_inner(&mut self) -> Option<Pattern> {
        let start = self.span();
        let kind = match self.peek_kind().clone() {
            TokenKind::Underscore => {
                self.bump();
                PatternKind::Wildcard
            }
            TokenKind::Int(value) => {
                self.bump();
                PatternKind::Lit(Literal::Int(value))
            }
            TokenKind::Float(value) => {
                self.bump();
                PatternKind::Lit(Literal::Float(value))
            }
            TokenKind::Str(value) => {
                self.bump();
                PatternKind::Lit(Literal::Str(value))
            }
            TokenKind::Char(value) => {
                self.bump();
                PatternKind::Lit(Literal::Char(value))
            }
            TokenKind::True => {
                self.bump();
                PatternKind::Lit(Literal::Bool(true))
            }
            TokenKind::False => {
                self.bump();
                PatternKind::Lit(Literal::Bool(false))
            }
            TokenKind::Minus => {
                self.bump();
                match self.peek_kind().clone() {
                    TokenKind::Int(value) => {
                        self.bump();
                        PatternKind::Lit(Literal::Int(-value))
                    }
                    TokenKind::Float(value) => {
                        self.bump();
                        PatternKind::Lit(Literal::Float(-value))
                    }
                    _ => {
                        self.error("PAR010", "expected numeric literal after `-` in pattern".to_owned());
                        return None;
                    }
                }
            }
            TokenKind::Ident => {
                let name = self.bump().text;
                if starts_upper(&name) {
                    let mut args = Vec::new();
                    if self.eat(&TokenKind::LParen) {
                        while !self.at(&TokenKind::RParen) && !self.at_eof() {
                            args.push(self.parse_pattern()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(&TokenKind::RParen, "`)` after constructor pattern");
                    }
                    PatternKind::Ctor { name, args }
                } else {
                    PatternKind::Var(name)
                }
            }
            TokenKind::LParen => {
                self.bump();
                if self.eat(&TokenKind::RParen) {
                    PatternKind::Lit(Literal::Unit)
                } else {
                    let first = self.parse_pattern()?;
                    if self.eat(&TokenKind::Comma) {
                        let mut elems = vec![first];
                        while !self.at(&TokenKind::RParen) && !self.at_eof() {
                            elems.push(self.parse_pattern()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(&TokenKind::RParen, "`)` after tuple pattern");
                        PatternKind::Tuple(elems)
                    } else {
                        self.expect(&TokenKind::RParen, "`)` after pattern");
                        return Some(first);
                    }
                }
            }
            TokenKind::LBracket => {
                self.bump();
                let mut items = Vec::new();
                let mut rest = None;
                while !self.at(&TokenKind::RBracket) && !self.at_eof() {
                    if self.eat(&TokenKind::Ellipsis) {
                        rest = Some(match self.peek_kind() {
                            TokenKind::Ident => self.bump().text,
                            _ => "_".to_owned(),
                        });
                        break;
                    }
                    items.push(self.parse_pattern()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket, "`]` after list pattern");
                PatternKind::List { items, rest }
            }
            TokenKind::LBrace => {
                self.bump();
                let mut fields = Vec::new();
                let mut open = false;
                while !self.at(&TokenKind::RBrace) && !self.at_eof() {
                    if self.eat(&TokenKind::Ellipsis) {
                        open = true;
                        break;
                    }
                    let Some(name) = self.expect_ident("record field name") else { break };
                    let pattern = if self.eat(&TokenKind::Colon) {
                        self.parse_pattern()?
                    } else {
                        // field pun `{x}` binds `x`
                        Pattern {
                            kind: PatternKind::Var(name.clone()),
                            span: self.span(),
                        }
                    };
                    fields.push((name, pattern));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBrace, "`}` after record pattern");
                PatternKind::Record { fields, open }
            }
            _ => {
                self.error("PAR010", format!("expected a pattern, found `{}`", self.peek().text));
                return None;
            }
        };
        Some(Pattern {
            kind,
            span: start.merge(self.span()),
        })
    }
}

fn starts_upper(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

fn op_is_send(op: &str) -> bool {
    op == "<-"
}

fn op_to_binop(op: &str) -> BinOp {
    match op {
        "||" => BinOp::Or,
        "&&" => BinOp::And,
        "==" => BinOp::Eq,
        "!=" => BinOp::Ne,
        "<" => BinOp::Lt,
        "<=" => BinOp::Le,
        ">" => BinOp::Gt,
        ">=" => BinOp::Ge,
        "++" => BinOp::Concat,
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Mod,
        _ => unreachable!("unknown operator {op}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(text: &str) -> File {
        let (file, reports) = parse_text("test.ail", text);
        let errors: Vec<_> = reports.iter().filter(|r| r.is_error()).collect();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        file
    }

    #[test]
    fn module_header_and_imports() {
        let file = parse_ok("module examples/demo\nimport std/io (println, readLine)\nimport lib/util\n");
        assert_eq!(file.module.as_ref().unwrap().path, "examples/demo");
        assert_eq!(file.imports.len(), 2);
        assert_eq!(file.imports[0].symbols.as_ref().unwrap().len(), 2);
        assert!(file.imports[1].symbols.is_none());
    }

    #[test]
    fn func_decl_with_effects() {
        let file = parse_ok("export func main() -> Int ! {IO} { 1 }");
        let Decl::Func(f) = &file.decls[0] else { panic!("expected func") };
        assert!(f.is_export);
        assert_eq!(f.effects, vec!["IO".to_owned()]);
        assert_eq!(f.ret, Some(TypeExpr::Con("Int".to_owned())));
    }

    #[test]
    fn equals_body_form() {
        let file = parse_ok("export func main() = fact(5)");
        let Decl::Func(f) = &file.decls[0] else { panic!("expected func") };
        assert!(matches!(f.body.kind, ExprKind::App { .. }));
    }

    #[test]
    fn sum_type_vs_alias() {
        let file = parse_ok("type Color = Red | Green | Blue\ntype Ints = [Int]\n");
        let Decl::Type(sum) = &file.decls[0] else { panic!() };
        assert!(matches!(&sum.body, TypeBody::Sum(ctors) if ctors.len() == 3));
        let Decl::Type(alias) = &file.decls[1] else { panic!() };
        assert!(matches!(&alias.body, TypeBody::Alias(TypeExpr::List(_))));
    }

    #[test]
    fn option_type_decl() {
        let file = parse_ok("export type Option[a] = Some(a) | None");
        let Decl::Type(t) = &file.decls[0] else { panic!() };
        assert_eq!(t.params, vec!["a".to_owned()]);
        let TypeBody::Sum(ctors) = &t.body else { panic!() };
        assert_eq!(ctors[0].fields.len(), 1);
        assert_eq!(ctors[1].fields.len(), 0);
    }

    #[test]
    fn unit_grouping_tuple_disambiguation() {
        let file = parse_ok("()\n(1)\n(1,)\n(1, 2)\n");
        assert!(matches!(file.statements[0].kind, ExprKind::Lit(Literal::Unit)));
        assert!(matches!(file.statements[1].kind, ExprKind::Lit(Literal::Int(1))));
        assert!(matches!(&file.statements[2].kind, ExprKind::Tuple(elems) if elems.len() == 1));
        assert!(matches!(&file.statements[3].kind, ExprKind::Tuple(elems) if elems.len() == 2));
    }

    #[test]
    fn record_block_and_update_disambiguation() {
        let file = parse_ok("{name: \"Alice\", age: 30}\n{r | age: 31}\n{f(); g()}\n");
        assert!(matches!(&file.statements[0].kind, ExprKind::Record(fields) if fields.len() == 2));
        assert!(matches!(&file.statements[1].kind, ExprKind::RecordUpdate { .. }));
        assert!(matches!(&file.statements[2].kind, ExprKind::Block(items) if items.len() == 2));
    }

    #[test]
    fn precedence_mul_binds_tighter_than_add() {
        let file = parse_ok("1 + 2 * 3");
        let ExprKind::Binary { op: BinOp::Add, rhs, .. } = &file.statements[0].kind else {
            panic!("expected +")
        };
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn comparison_looser_than_concat() {
        let file = parse_ok("\"a\" ++ \"b\" == \"ab\"");
        assert!(matches!(
            &file.statements[0].kind,
            ExprKind::Binary { op: BinOp::Eq, .. }
        ));
    }

    #[test]
    fn lambda_extends_right() {
        let file = parse_ok(r"\x. x + 1");
        let ExprKind::Lambda { params, body } = &file.statements[0].kind else {
            panic!("expected lambda")
        };
        assert_eq!(params, &["x".to_owned()]);
        assert!(matches!(body.kind, ExprKind::Binary { op: BinOp::Add, .. }));
    }

    #[test]
    fn match_with_guard_and_patterns() {
        let file = parse_ok("match xs { [x, ...rest] if x > 0 => x, [] => 0, _ => 1 }");
        let ExprKind::Match { arms, .. } = &file.statements[0].kind else { panic!() };
        assert_eq!(arms.len(), 3);
        assert!(arms[0].guard.is_some());
        assert!(matches!(
            &arms[0].pattern.kind,
            PatternKind::List { items, rest: Some(r) } if items.len() == 1 && r == "rest"
        ));
    }

    #[test]
    fn let_in_and_letrec() {
        let file = parse_ok("let x = 1 in x + 1\nletrec f = \\n. f(n) in f(0)\n");
        assert!(matches!(&file.statements[0].kind, ExprKind::Let { body: Some(_), .. }));
        assert!(matches!(&file.statements[1].kind, ExprKind::LetRec { .. }));
    }

    #[test]
    fn test_decl_is_contextual() {
        let file = parse_ok("test \"adds\" { 1 + 1 }\nfunc test() -> Int { 1 }\n");
        assert!(matches!(&file.decls[0], Decl::Test(t) if t.name == "adds"));
        assert!(matches!(&file.decls[1], Decl::Func(f) if f.name == "test"));
    }

    #[test]
    fn error_recovery_continues_parsing() {
        let (file, reports) = parse_text("test.ail", "func broken( { 1 }\nfunc fine() -> Int { 2 }\n");
        assert!(reports.iter().any(Report::is_error));
        assert!(file.decls.iter().any(|d| matches!(d, Decl::Func(f) if f.name == "fine")));
    }

    #[test]
    fn parser_never_panics_on_garbage() {
        let inputs = [
            "((((((((((((((((((((",
            "}}}}]]))",
            "match { } =>",
            "func f(x: ) -> { }",
            "let = in in in",
            "\\. .",
            "{ | }",
            "1 + + 2",
            "type = |",
            "import (a, b",
        ];
        for input in inputs {
            let _ = parse_text("fuzz.ail", input);
        }
    }

    #[test]
    fn function_type_annotation() {
        let file = parse_ok("func apply(f: (Int) -> Int, x: Int) -> Int { f(x) }");
        let Decl::Func(decl) = &file.decls[0] else { panic!() };
        let TypeExpr::Func { params, .. } = decl.params[0].annotation.as_ref().unwrap() else {
            panic!("expected function type")
        };
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn send_and_recv_parse() {
        let file = parse_ok("ch <- 1\n");
        assert!(matches!(&file.statements[0].kind, ExprKind::Send { .. }));
    }

    #[test]
    fn quasiquote_parses() {
        let file = parse_ok("`f(1)\n");
        let ExprKind::Quasiquote(quoted) = &file.statements[0].kind else {
            panic!("expected quasiquote")
        };
        assert!(matches!(quoted.kind, ExprKind::App { .. }));
    }
}
