//! Source printer for the surface AST.
//!
//! Printing is canonical rather than style-preserving: binary operands are
//! parenthesized, blocks print one item per statement, and record fields
//! keep source order. `parse(print(parse(s)))` is equivalent to `parse(s)`;
//! printing the reparsed tree reproduces the same text (a fixed point),
//! which is how the round-trip law is tested.

use std::fmt::Write as _;

use crate::surface::{
    BinOp, Decl, Expr, ExprKind, File, FuncDecl, Literal, Pattern, PatternKind, TypeBody, TypeExpr, UnOp,
};

/// Renders a file back to source text.
#[must_use]
pub fn print_file(file: &File) -> String {
    let mut out = String::new();
    if let Some(module) = &file.module {
        let _ = writeln!(out, "module {}", module.path);
    }
    for import in &file.imports {
        match &import.symbols {
            Some(symbols) => {
                let _ = writeln!(out, "import {} ({})", import.path, symbols.join(", "));
            }
            None => {
                let _ = writeln!(out, "import {}", import.path);
            }
        }
    }
    for decl in &file.decls {
        print_decl(&mut out, decl);
    }
    for statement in &file.statements {
        let _ = writeln!(out, "{}", print_expr(statement));
    }
    out
}

fn print_decl(out: &mut String, decl: &Decl) {
    match decl {
        Decl::Func(f) => print_func(out, f, "func"),
        Decl::Type(t) => {
            if t.is_export {
                out.push_str("export ");
            }
            let params = if t.params.is_empty() {
                String::new()
            } else {
                format!("[{}]", t.params.join(", "))
            };
            let body = match &t.body {
                TypeBody::Alias(ty) => print_type(ty),
                TypeBody::Record(fields) => print_type(&TypeExpr::Record(fields.clone())),
                TypeBody::Sum(ctors) => ctors
                    .iter()
                    .map(|c| {
                        if c.fields.is_empty() {
                            c.name.clone()
                        } else {
                            let fields: Vec<String> = c.fields.iter().map(print_type).collect();
                            format!("{}({})", c.name, fields.join(", "))
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(" | "),
            };
            let _ = writeln!(out, "type {}{params} = {body}", t.name);
        }
        Decl::Class(c) => {
            let _ = writeln!(out, "class {}[{}] {{", c.name, c.param);
            for (name, ty) in &c.methods {
                if let TypeExpr::Func { params, ret, .. } = ty {
                    let rendered: Vec<String> = params
                        .iter()
                        .enumerate()
                        .map(|(i, p)| format!("x{i}: {}", print_type(p)))
                        .collect();
                    let _ = writeln!(out, "  func {name}({}) -> {}", rendered.join(", "), print_type(ret));
                }
            }
            out.push_str("}\n");
        }
        Decl::Instance(instance) => {
            let _ = writeln!(out, "instance {}[{}] {{", instance.class, print_type(&instance.head));
            for method in &instance.methods {
                out.push_str("  ");
                print_func(out, method, "func");
            }
            out.push_str("}\n");
        }
        Decl::Test(t) => {
            let keyword = if t.is_property { "property" } else { "test" };
            // the body is a block and prints its own braces
            let _ = writeln!(out, "{keyword} {:?} {}", t.name, print_expr(&t.body));
        }
    }
}

fn print_func(out: &mut String, f: &FuncDecl, keyword: &str) {
    if f.is_export {
        out.push_str("export ");
    }
    let params: Vec<String> = f
        .params
        .iter()
        .map(|p| match &p.annotation {
            Some(ty) => format!("{}: {}", p.name, print_type(ty)),
            None => p.name.clone(),
        })
        .collect();
    let _ = write!(out, "{keyword} {}({})", f.name, params.join(", "));
    if let Some(ret) = &f.ret {
        let _ = write!(out, " -> {}", print_type(ret));
    }
    if !f.effects.is_empty() {
        let _ = write!(out, " ! {{{}}}", f.effects.join(", "));
    }
    let _ = writeln!(out, " = {}", print_expr(&f.body));
}

/// Renders a type expression.
#[must_use]
pub fn print_type(ty: &TypeExpr) -> String {
    match ty {
        TypeExpr::Con(name) | TypeExpr::Var(name) => name.clone(),
        TypeExpr::App { ctor, args } => {
            let args: Vec<String> = args.iter().map(print_type).collect();
            format!("{ctor}[{}]", args.join(", "))
        }
        TypeExpr::List(elem) => format!("[{}]", print_type(elem)),
        TypeExpr::Tuple(elems) => {
            let elems: Vec<String> = elems.iter().map(print_type).collect();
            format!("({})", elems.join(", "))
        }
        TypeExpr::Record(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(name, ty)| format!("{name}: {}", print_type(ty)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
        TypeExpr::Func { params, ret, effects } => {
            let params: Vec<String> = params.iter().map(print_type).collect();
            let mut rendered = format!("({}) -> {}", params.join(", "), print_type(ret));
            if !effects.is_empty() {
                let _ = write!(rendered, " ! {{{}}}", effects.join(", "));
            }
            rendered
        }
        TypeExpr::Unit => "()".to_owned(),
    }
}

fn binop_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Concat => "++",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::And => "&&",
        BinOp::Or => "||",
    }
}

/// Renders an expression, fully parenthesized where grouping matters.
#[must_use]
pub fn print_expr(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Lit(lit) => print_literal(lit),
        ExprKind::Var(name) => name.clone(),
        ExprKind::Unary { op, expr } => {
            let symbol = match op {
                UnOp::Neg => "-",
                UnOp::Not => "!",
            };
            format!("{symbol}({})", print_expr(expr))
        }
        ExprKind::Binary { op, lhs, rhs } => {
            format!("({}) {} ({})", print_expr(lhs), binop_symbol(*op), print_expr(rhs))
        }
        ExprKind::Lambda { params, body } => format!("\\{}. {}", params.join(" "), print_expr(body)),
        ExprKind::FuncLit { params, body, .. } => {
            let params: Vec<String> = params
                .iter()
                .map(|p| match &p.annotation {
                    Some(ty) => format!("{}: {}", p.name, print_type(ty)),
                    None => p.name.clone(),
                })
                .collect();
            format!("func({}) {{ {} }}", params.join(", "), print_expr(body))
        }
        ExprKind::App { func, args } => {
            let args: Vec<String> = args.iter().map(print_expr).collect();
            let callee = if matches!(func.kind, ExprKind::Var(_) | ExprKind::FieldAccess { .. }) {
                print_expr(func)
            } else {
                format!("({})", print_expr(func))
            };
            format!("{callee}({})", args.join(", "))
        }
        ExprKind::Let {
            name,
            annotation,
            value,
            body,
        } => {
            let annotation = annotation
                .as_ref()
                .map(|ty| format!(": {}", print_type(ty)))
                .unwrap_or_default();
            match body {
                Some(body) => format!("let {name}{annotation} = {} in {}", print_expr(value), print_expr(body)),
                None => format!("let {name}{annotation} = {}", print_expr(value)),
            }
        }
        ExprKind::LetRec { bindings, body } => {
            let bindings: Vec<String> = bindings
                .iter()
                .map(|(name, value)| format!("{name} = {}", print_expr(value)))
                .collect();
            format!("letrec {} in {}", bindings.join(", "), print_expr(body))
        }
        ExprKind::If { cond, then, els } => format!(
            "if {} then {} else {}",
            print_expr(cond),
            print_expr(then),
            print_expr(els)
        ),
        ExprKind::Match { scrutinee, arms } => {
            let arms: Vec<String> = arms
                .iter()
                .map(|arm| {
                    let guard = arm
                        .guard
                        .as_ref()
                        .map(|g| format!(" if {}", print_expr(g)))
                        .unwrap_or_default();
                    format!("{}{guard} => {}", print_pattern(&arm.pattern), print_expr(&arm.body))
                })
                .collect();
            format!("match {} {{ {} }}", print_expr(scrutinee), arms.join(", "))
        }
        ExprKind::List(elems) => {
            let elems: Vec<String> = elems.iter().map(print_expr).collect();
            format!("[{}]", elems.join(", "))
        }
        ExprKind::Tuple(elems) => {
            let elems: Vec<String> = elems.iter().map(print_expr).collect();
            if elems.len() == 1 {
                format!("({},)", elems[0])
            } else {
                format!("({})", elems.join(", "))
            }
        }
        ExprKind::Record(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(name, value)| format!("{name}: {}", print_expr(value)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
        ExprKind::FieldAccess { base, field } => {
            if matches!(base.kind, ExprKind::Var(_) | ExprKind::FieldAccess { .. } | ExprKind::Record(_)) {
                format!("{}.{field}", print_expr(base))
            } else {
                format!("({}).{field}", print_expr(base))
            }
        }
        ExprKind::RecordUpdate { base, fields } => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(name, value)| format!("{name}: {}", print_expr(value)))
                .collect();
            format!("{{{} | {}}}", print_expr(base), fields.join(", "))
        }
        ExprKind::Block(items) => {
            let items: Vec<String> = items.iter().map(print_expr).collect();
            format!("{{{}}}", items.join("; "))
        }
        ExprKind::Send { channel, value } => format!("({}) <- ({})", print_expr(channel), print_expr(value)),
        ExprKind::Recv(channel) => format!("<-({})", print_expr(channel)),
        ExprKind::Quasiquote(quoted) => format!("`({})", print_expr(quoted)),
        ExprKind::Error => "()".to_owned(),
    }
}

fn print_literal(lit: &Literal) -> String {
    match lit {
        Literal::Int(v) => v.to_string(),
        Literal::Float(v) => {
            let mut buffer = ryu::Buffer::new();
            buffer.format(*v).to_owned()
        }
        Literal::Str(s) => format!("{s:?}"),
        Literal::Char(c) => format!("{c:?}"),
        Literal::Bool(v) => v.to_string(),
        Literal::Unit => "()".to_owned(),
    }
}

/// Renders a pattern.
#[must_use]
pub fn print_pattern(pattern: &Pattern) -> String {
    match &pattern.kind {
        PatternKind::Wildcard => "_".to_owned(),
        PatternKind::Var(name) => name.clone(),
        PatternKind::Lit(lit) => print_literal(lit),
        PatternKind::Ctor { name, args } => {
            if args.is_empty() {
                name.clone()
            } else {
                let args: Vec<String> = args.iter().map(print_pattern).collect();
                format!("{name}({})", args.join(", "))
            }
        }
        PatternKind::Tuple(elems) => {
            let elems: Vec<String> = elems.iter().map(print_pattern).collect();
            format!("({})", elems.join(", "))
        }
        PatternKind::List { items, rest } => {
            let mut parts: Vec<String> = items.iter().map(print_pattern).collect();
            if let Some(rest) = rest {
                parts.push(format!("...{rest}"));
            }
            format!("[{}]", parts.join(", "))
        }
        PatternKind::Record { fields, open } => {
            let mut parts: Vec<String> = fields
                .iter()
                .map(|(name, sub)| format!("{name}: {}", print_pattern(sub)))
                .collect();
            if *open {
                parts.push("...".to_owned());
            }
            format!("{{{}}}", parts.join(", "))
        }
        PatternKind::Binding { pattern, name } => format!("{} as {name}", print_pattern(pattern)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_text;

    /// The round-trip law: printing a parse, reparsing, and printing again
    /// reaches a fixed point after one iteration.
    fn assert_round_trip(source: &str) {
        let (first, reports) = parse_text("rt.ail", source);
        assert!(reports.iter().all(|r| !r.is_error()), "parse failed: {reports:?}");
        let printed = print_file(&first);
        let (second, reports) = parse_text("rt.ail", &printed);
        assert!(
            reports.iter().all(|r| !r.is_error()),
            "printed source failed to reparse: {reports:?}\n{printed}"
        );
        let reprinted = print_file(&second);
        assert_eq!(printed, reprinted, "printer is not a fixed point for:\n{source}");
    }

    #[test]
    fn round_trips_declarations() {
        assert_round_trip("module t\nimport std/io (println)\nexport func main() -> Int ! {IO} { println(\"x\"); 0 }");
        assert_round_trip("export type Option[a] = Some(a) | None\nfunc get(o: Option[Int]) -> Int { match o { Some(x) => x, None => 0 } }");
        assert_round_trip("type Ints = [Int]\ntype Point = {x: Int, y: Int}");
    }

    #[test]
    fn round_trips_expressions() {
        assert_round_trip("1 + 2 * 3 == 7 && true");
        assert_round_trip("let r = {name: \"A\", age: 1} in {r | age: 2}.age");
        assert_round_trip(r"(\x y. x)(1, 2)");
        assert_round_trip("letrec f = \\n. if n <= 1 then 1 else n * f(n - 1) in f(5)");
        assert_round_trip("match xs { [] => 0, [x, ...rest] if x > 0 => x, _ => 1 }");
    }

    #[test]
    fn round_trips_operator_precedence_flattening() {
        // explicit parens in the printed form must not change the tree
        let (tree, _) = parse_text("rt.ail", "1 + 2 * 3");
        let printed = print_file(&tree);
        assert_eq!(printed.trim(), "(1) + ((2) * (3))");
    }
}
