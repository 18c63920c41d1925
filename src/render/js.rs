//! # JavaScript Module Renderer
//!
//! Walks a parsed program, folding `typeof x`/`x.y.z` lookups that are fully
//! determined by a build's `globalDefines`/`globalTypeof` tables, and
//! registering a deferred rewrite for every `require("...")` call and every
//! free reference to `process` (the loader injects a `process` shim module
//! ahead of any module that reads it, mirroring Node's ambient global).
//!
//! Folding only collapses whole `if` statements: the surviving branch's
//! original source text replaces the entire `if`, which keeps every edit in
//! the log non-overlapping without needing sub-expression spans. A branch is
//! left alone (walked normally instead) whenever it might itself contain a
//! `require`/`process` rewrite, since splicing the whole branch in one edit
//! while also patching a byte range inside it would overlap.

use crate::module::{DependencyType, ModuleDependency, RewriteFormat};
use crate::parser::ast_types::{
    ArrowFunctionBody, BinaryOperator, ClassElement, Expression, ForInit, Identifier, Literal,
    ObjectProperty, Pattern, Program, Statement, UnaryOperator,
};
use crate::scope::{BindingKind, ScopeChain};
use crate::text_document::{EditError, TextDocument, TextWriter};
use std::collections::HashMap;

/// A value `globalDefines`/`globalTypeof` resolve an expression to.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    Undefined,
}

impl ConstValue {
    fn from_literal(lit: &Literal) -> Option<Self> {
        match lit {
            Literal::String(s) => Some(ConstValue::Str(s.value.clone())),
            Literal::Number(n) => Some(ConstValue::Num(n.value)),
            Literal::Boolean(b) => Some(ConstValue::Bool(b.value)),
            Literal::Null => Some(ConstValue::Null),
            Literal::RegExp(_) => None,
        }
    }

    fn truthy(&self) -> bool {
        match self {
            ConstValue::Str(s) => !s.is_empty(),
            ConstValue::Num(n) => *n != 0.0 && !n.is_nan(),
            ConstValue::Bool(b) => *b,
            ConstValue::Null | ConstValue::Undefined => false,
        }
    }

    fn as_number(&self) -> f64 {
        match self {
            ConstValue::Num(n) => *n,
            ConstValue::Bool(b) => if *b { 1.0 } else { 0.0 },
            ConstValue::Str(s) => s.trim().parse().unwrap_or(f64::NAN),
            ConstValue::Null => 0.0,
            ConstValue::Undefined => f64::NAN,
        }
    }

    fn to_js_string(&self) -> String {
        match self {
            ConstValue::Str(s) => s.clone(),
            ConstValue::Num(n) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
            ConstValue::Num(n) => n.to_string(),
            ConstValue::Bool(b) => b.to_string(),
            ConstValue::Null => "null".to_string(),
            ConstValue::Undefined => "undefined".to_string(),
        }
    }

    fn strict_eq(&self, other: &ConstValue) -> bool {
        match (self, other) {
            (ConstValue::Str(a), ConstValue::Str(b)) => a == b,
            (ConstValue::Num(a), ConstValue::Num(b)) => a == b,
            (ConstValue::Bool(a), ConstValue::Bool(b)) => a == b,
            (ConstValue::Null, ConstValue::Null) => true,
            (ConstValue::Undefined, ConstValue::Undefined) => true,
            _ => false,
        }
    }

    fn loose_eq(&self, other: &ConstValue) -> bool {
        self.strict_eq(other) || self.as_number() == other.as_number()
    }
}

/// The subset of a build's configuration the renderer needs to fold
/// environment-dependent branches: dotted-path lookups (`process.env.FOO`)
/// and `typeof` results for ambient globals.
#[derive(Debug, Clone, Default)]
pub struct JsRendererConfig {
    pub global_defines: HashMap<String, ConstValue>,
    pub global_typeof: HashMap<String, String>,
}

impl From<crate::config::JsConfig> for JsRendererConfig {
    fn from(c: crate::config::JsConfig) -> Self {
        Self {
            global_defines: c.global_defines.into_iter().map(|(k, v)| (k, ConstValue::Str(v))).collect(),
            global_typeof: c.global_typeof,
        }
    }
}

/// Reconstructs `a.b.c` from a chain of non-computed `MemberExpression`s.
fn dotted_path(expr: &Expression) -> Option<String> {
    match expr {
        Expression::Identifier(id) => Some(id.name.clone()),
        Expression::MemberExpression { object, property, computed: false } => {
            let base = dotted_path(object)?;
            match property.as_ref() {
                Expression::Identifier(p) => Some(format!("{base}.{name}", name = p.name)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn apply_unary(op: &UnaryOperator, val: ConstValue) -> Option<ConstValue> {
    match op {
        UnaryOperator::LogicalNot => Some(ConstValue::Bool(!val.truthy())),
        UnaryOperator::Minus => Some(ConstValue::Num(-val.as_number())),
        UnaryOperator::Plus => Some(ConstValue::Num(val.as_number())),
        UnaryOperator::BitwiseNot => Some(ConstValue::Num(!(val.as_number() as i64 as i32) as f64)),
        UnaryOperator::Void => Some(ConstValue::Undefined),
        UnaryOperator::Typeof | UnaryOperator::Delete => None,
    }
}

fn apply_binary(op: &BinaryOperator, l: ConstValue, r: ConstValue) -> Option<ConstValue> {
    use BinaryOperator::*;
    let as_i32 = |v: &ConstValue| v.as_number() as i64 as i32;
    Some(match op {
        Add => {
            if matches!(l, ConstValue::Str(_)) || matches!(r, ConstValue::Str(_)) {
                ConstValue::Str(format!("{}{}", l.to_js_string(), r.to_js_string()))
            } else {
                ConstValue::Num(l.as_number() + r.as_number())
            }
        }
        Subtract => ConstValue::Num(l.as_number() - r.as_number()),
        Multiply => ConstValue::Num(l.as_number() * r.as_number()),
        Divide => ConstValue::Num(l.as_number() / r.as_number()),
        Remainder => ConstValue::Num(l.as_number() % r.as_number()),
        Exponentiation => ConstValue::Num(l.as_number().powf(r.as_number())),
        Equal => ConstValue::Bool(l.loose_eq(&r)),
        NotEqual => ConstValue::Bool(!l.loose_eq(&r)),
        StrictEqual => ConstValue::Bool(l.strict_eq(&r)),
        StrictNotEqual => ConstValue::Bool(!l.strict_eq(&r)),
        LessThan => ConstValue::Bool(l.as_number() < r.as_number()),
        LessThanEqual => ConstValue::Bool(l.as_number() <= r.as_number()),
        GreaterThan => ConstValue::Bool(l.as_number() > r.as_number()),
        GreaterThanEqual => ConstValue::Bool(l.as_number() >= r.as_number()),
        LeftShift => ConstValue::Num((as_i32(&l) << (as_i32(&r) & 31)) as f64),
        RightShift => ConstValue::Num((as_i32(&l) >> (as_i32(&r) & 31)) as f64),
        UnsignedRightShift => {
            ConstValue::Num(((l.as_number() as i64 as u32) >> ((r.as_number() as i64 as u32) & 31)) as f64)
        }
        BitwiseAnd => ConstValue::Num((as_i32(&l) & as_i32(&r)) as f64),
        BitwiseOr => ConstValue::Num((as_i32(&l) | as_i32(&r)) as f64),
        BitwiseXor => ConstValue::Num((as_i32(&l) ^ as_i32(&r)) as f64),
        LogicalAnd | LogicalOr => unreachable!("short-circuited by the caller"),
        In | Instanceof => return None,
    })
}

/// Attempts to reduce `expr` to a single value given `config` and the
/// bindings visible at this point in `scope`. A free identifier rooting a
/// `globalDefines`/`globalTypeof` lookup must actually be free (not
/// shadowed by a local `process`, say) for the lookup to apply.
fn try_fold(expr: &Expression, config: &JsRendererConfig, scope: &ScopeChain) -> Option<ConstValue> {
    match expr {
        Expression::Literal(lit) => ConstValue::from_literal(lit),
        Expression::UnaryExpression { operator, argument, .. } => {
            if matches!(operator, UnaryOperator::Typeof) {
                if let Expression::Identifier(id) = argument.as_ref() {
                    return if scope.is_free(&id.name) {
                        config.global_typeof.get(&id.name).map(|t| ConstValue::Str(t.clone()))
                    } else {
                        None
                    };
                }
                return None;
            }
            let val = try_fold(argument, config, scope)?;
            apply_unary(operator, val)
        }
        Expression::BinaryExpression { left, operator, right } => match operator {
            BinaryOperator::LogicalAnd => {
                let l = try_fold(left, config, scope)?;
                if !l.truthy() { Some(l) } else { try_fold(right, config, scope) }
            }
            BinaryOperator::LogicalOr => {
                let l = try_fold(left, config, scope)?;
                if l.truthy() { Some(l) } else { try_fold(right, config, scope) }
            }
            _ => {
                let l = try_fold(left, config, scope)?;
                let r = try_fold(right, config, scope)?;
                apply_binary(operator, l, r)
            }
        },
        Expression::ConditionalExpression { test, consequent, alternate } => {
            let t = try_fold(test, config, scope)?;
            if t.truthy() { try_fold(consequent, config, scope) } else { try_fold(alternate, config, scope) }
        }
        Expression::MemberExpression { computed: false, .. } => {
            let path = dotted_path(expr)?;
            let root = path.split('.').next()?;
            if !scope.is_free(root) {
                return None;
            }
            config.global_defines.get(&path).cloned()
        }
        _ => None,
    }
}

/// Crude, deliberately conservative scan over a branch's own source slice:
/// true means "might contain a require()/process rewrite", which rules out
/// splicing the whole branch as one literal edit (it would overlap an inner
/// rewrite's byte range). Combining whole-branch folding with a rewrite
/// inside the surviving branch isn't supported; such an `if` is left
/// unfolded and walked normally instead.
fn maybe_contains_rewrite(source_slice: &str) -> bool {
    source_slice.contains("require") || source_slice.contains("process")
}

pub struct JsRenderOutput {
    pub document: TextDocument,
    pub dependencies: Vec<ModuleDependency>,
}

struct Renderer<'a> {
    source: &'a str,
    config: &'a JsRendererConfig,
    scope: ScopeChain,
    document: TextDocument,
    dependencies: Vec<ModuleDependency>,
    needs_process: bool,
}

pub fn render(source: &str, program: &Program, config: &JsRendererConfig) -> Result<JsRenderOutput, EditError> {
    let mut renderer = Renderer {
        source,
        config,
        scope: ScopeChain::new(),
        document: TextDocument::new(),
        dependencies: Vec::new(),
        needs_process: false,
    };

    for stmt in &program.body {
        renderer.walk_statement(stmt)?;
    }

    if renderer.needs_process {
        let rewrite = RewriteFormat::ProcessPrelude;
        let dep = ModuleDependency::new(DependencyType::StaticImport, 0, 0).with_rewrite(rewrite);
        let replacement = dep.rewrite.clone().unwrap().into_replacement();
        renderer.document.insert(0, replacement)?;
        renderer.dependencies.push(dep);
    }

    Ok(JsRenderOutput { document: renderer.document, dependencies: renderer.dependencies })
}

impl<'a> Renderer<'a> {
    fn walk_statement(&mut self, stmt: &Statement) -> Result<(), EditError> {
        match stmt {
            Statement::VariableDeclaration { declarations, kind, .. } => {
                let binding_kind = match kind {
                    crate::parser::ast_types::VariableDeclarationKind::Var => BindingKind::Var,
                    _ => BindingKind::LexicalOrParam,
                };
                for decl in declarations {
                    self.declare_pattern(&decl.id, binding_kind);
                    if let Some(init) = &decl.init {
                        self.walk_expression(init)?;
                    }
                }
            }
            Statement::FunctionDeclaration { id, params, body, .. } => {
                if let Some(id) = id {
                    self.scope.declare(&id.name, BindingKind::Var);
                }
                self.scope.push(true);
                for param in params {
                    self.declare_pattern(param, BindingKind::LexicalOrParam);
                }
                for s in &body.body {
                    self.walk_statement(s)?;
                }
                self.scope.pop();
            }
            Statement::ClassDeclaration { id, super_class, body, .. } => {
                if let Some(id) = id {
                    self.scope.declare(&id.name, BindingKind::LexicalOrParam);
                }
                if let Some(sc) = super_class {
                    self.walk_expression(sc)?;
                }
                for elem in &body.body {
                    self.walk_class_element(elem)?;
                }
            }
            Statement::ExpressionStatement { expression, .. } => {
                self.walk_expression(expression)?;
            }
            Statement::BlockStatement { body, .. } => {
                self.scope.push(false);
                for s in body {
                    self.walk_statement(s)?;
                }
                self.scope.pop();
            }
            Statement::ReturnStatement { argument, .. } => {
                if let Some(arg) = argument {
                    self.walk_expression(arg)?;
                }
            }
            Statement::IfStatement { test, consequent, alternate, span } => {
                if let Some(folded) = try_fold(test, self.config, &self.scope) {
                    let chosen = if folded.truthy() { Some(consequent.as_ref()) } else { alternate.as_deref() };
                    let eligible = chosen
                        .map(|c| !maybe_contains_rewrite(self.slice(c.span())))
                        .unwrap_or(true);
                    if eligible {
                        let text = match chosen {
                            Some(stmt) => self.branch_text(stmt),
                            None => String::new(),
                        };
                        self.document.replace(span.start, span.end, text)?;
                        return Ok(());
                    }
                }
                self.walk_expression(test)?;
                self.walk_statement(consequent)?;
                if let Some(alt) = alternate {
                    self.walk_statement(alt)?;
                }
            }
            Statement::WhileStatement { test, body, .. } => {
                self.walk_expression(test)?;
                self.walk_statement(body)?;
            }
            Statement::ForStatement { init, test, update, body, .. } => {
                if let Some(ForInit::Expression(expr)) = init {
                    self.walk_expression(expr)?;
                }
                if let Some(ForInit::VariableDeclaration { declarations, kind }) = init {
                    let binding_kind = match kind {
                        crate::parser::ast_types::VariableDeclarationKind::Var => BindingKind::Var,
                        _ => BindingKind::LexicalOrParam,
                    };
                    for decl in declarations {
                        self.declare_pattern(&decl.id, binding_kind);
                        if let Some(e) = &decl.init {
                            self.walk_expression(e)?;
                        }
                    }
                }
                if let Some(t) = test {
                    self.walk_expression(t)?;
                }
                if let Some(u) = update {
                    self.walk_expression(u)?;
                }
                self.walk_statement(body)?;
            }
            Statement::ImportDeclaration { .. } => {}
            Statement::ExportNamedDeclaration { declaration, .. } => {
                if let Some(decl) = declaration {
                    self.walk_statement(decl)?;
                }
            }
        }
        Ok(())
    }

    /// Text a folded `if`'s surviving branch contributes: a single-statement
    /// block unwraps to just that statement's source (matching how a human
    /// would hand-delete the dead branch), anything else keeps its own span.
    fn branch_text(&self, stmt: &Statement) -> String {
        if let Statement::BlockStatement { body, .. } = stmt {
            if body.len() == 1 {
                return self.slice(body[0].span()).to_string();
            }
        }
        self.slice(stmt.span()).to_string()
    }

    fn slice(&self, span: crate::parser::ast_types::Span) -> &str {
        &self.source[span.start as usize..span.end as usize]
    }

    fn walk_class_element(&mut self, elem: &ClassElement) -> Result<(), EditError> {
        match elem {
            ClassElement::PropertyDefinition { value, .. } => {
                if let Some(v) = value {
                    self.walk_expression(v)?;
                }
            }
            ClassElement::MethodDefinition { value, .. } => {
                self.scope.push(true);
                for param in &value.params {
                    self.declare_pattern(param, BindingKind::LexicalOrParam);
                }
                for s in &value.body.body {
                    self.walk_statement(s)?;
                }
                self.scope.pop();
            }
        }
        Ok(())
    }

    fn declare_pattern(&mut self, pattern: &Pattern, kind: BindingKind) {
        match pattern {
            Pattern::Identifier(Identifier { name }) => self.scope.declare(name, kind),
            Pattern::ArrayPattern { elements } => {
                for el in elements.iter().flatten() {
                    self.declare_pattern(el, kind);
                }
            }
            Pattern::ObjectPattern { properties } => {
                for prop in properties {
                    match prop {
                        crate::parser::ast_types::ObjectPatternProperty::Property { value, .. } => {
                            self.declare_pattern(value, kind)
                        }
                        crate::parser::ast_types::ObjectPatternProperty::RestElement { argument } => {
                            self.declare_pattern(argument, kind)
                        }
                    }
                }
            }
            Pattern::AssignmentPattern { left, .. } => self.declare_pattern(left, kind),
            Pattern::RestElement { argument } => self.declare_pattern(argument, kind),
        }
    }

    fn walk_expression(&mut self, expr: &Expression) -> Result<(), EditError> {
        match expr {
            Expression::Identifier(id) => {
                if id.name == "process" && self.scope.is_free("process") {
                    self.needs_process = true;
                }
            }
            Expression::Literal(_) => {}
            Expression::BinaryExpression { left, right, .. } => {
                self.walk_expression(left)?;
                self.walk_expression(right)?;
            }
            Expression::UnaryExpression { argument, .. } => self.walk_expression(argument)?,
            Expression::AssignmentExpression { left, right, .. } => {
                self.walk_expression(left)?;
                self.walk_expression(right)?;
            }
            Expression::UpdateExpression { argument, .. } => self.walk_expression(argument)?,
            Expression::CallExpression { callee, arguments, span } => {
                if let Some(dep) = self.try_register_require(callee, arguments, *span) {
                    let replacement = dep.rewrite.clone().unwrap().into_replacement();
                    let (start, end) = match arguments.first() {
                        Some(Expression::Literal(Literal::String(s))) => (s.span.start, s.span.end),
                        _ => (dep.index, dep.end_index),
                    };
                    self.document.replace(start, end, replacement)?;
                    self.dependencies.push(dep);
                } else {
                    self.walk_expression(callee)?;
                }
                for arg in arguments {
                    self.walk_expression(arg)?;
                }
            }
            Expression::MemberExpression { object, property, .. } => {
                self.walk_expression(object)?;
                self.walk_expression(property)?;
            }
            Expression::FunctionExpression(func) => {
                self.scope.push(true);
                for param in &func.params {
                    self.declare_pattern(param, BindingKind::LexicalOrParam);
                }
                for s in &func.body.body {
                    self.walk_statement(s)?;
                }
                self.scope.pop();
            }
            Expression::ArrowFunctionExpression { params, body, .. } => {
                self.scope.push(true);
                for param in params {
                    self.declare_pattern(param, BindingKind::LexicalOrParam);
                }
                match body {
                    ArrowFunctionBody::BlockStatement(block) => {
                        for s in &block.body {
                            self.walk_statement(s)?;
                        }
                    }
                    ArrowFunctionBody::Expression(expr) => self.walk_expression(expr)?,
                }
                self.scope.pop();
            }
            Expression::ObjectExpression { properties } => {
                for prop in properties {
                    match prop {
                        ObjectProperty::Property { value, .. } => self.walk_expression(value)?,
                        ObjectProperty::SpreadElement { argument } => self.walk_expression(argument)?,
                    }
                }
            }
            Expression::ArrayExpression { elements } => {
                for el in elements.iter().flatten() {
                    self.walk_expression(el)?;
                }
            }
            Expression::TemplateLiteral { expressions, .. } => {
                for e in expressions {
                    self.walk_expression(e)?;
                }
            }
            Expression::ConditionalExpression { test, consequent, alternate } => {
                self.walk_expression(test)?;
                self.walk_expression(consequent)?;
                self.walk_expression(alternate)?;
            }
        }
        Ok(())
    }

    fn try_register_require(
        &self,
        callee: &Expression,
        arguments: &[Expression],
        span: crate::parser::ast_types::Span,
    ) -> Option<ModuleDependency> {
        let Expression::Identifier(id) = callee else { return None };
        if id.name != "require" || !self.scope.is_free("require") {
            return None;
        }
        let [Expression::Literal(Literal::String(s))] = arguments else { return None };

        let mut dep = ModuleDependency::new(DependencyType::StaticImport, s.span.start, s.span.end)
            .with_rewrite(RewriteFormat::QuotedId);
        dep.source = Some(s.value.clone());
        dep.detail = Some(format!("require() at {}..{}", span.start, span.end));
        Some(dep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_js, ParserConfig};

    fn parse(source: &str) -> Program {
        let result = parse_js(source, "test.js", &ParserConfig::default());
        assert!(result.errors.is_empty(), "unexpected parse errors: {:?}", result.errors);
        result.ast.expect("ast present when there are no errors")
    }

    fn write(document: TextDocument, source: &str) -> String {
        let mut writer = TextWriter::new();
        document.write(source, "test.js", &mut writer);
        writer.output
    }

    #[test]
    fn folds_typeof_and_env_check_keeping_live_branch() {
        let source = r#"if (typeof process !== "undefined" && process.env.NODE_ENV === "production") { a(); } else { b(); }"#;
        let program = parse(source);

        let mut config = JsRendererConfig::default();
        config.global_typeof.insert("process".to_string(), "object".to_string());
        config.global_defines.insert("process.env.NODE_ENV".to_string(), ConstValue::Str("production".to_string()));

        let output = render(source, &program, &config).expect("render succeeds");
        let text = write(output.document, source);

        // Both operands of the `&&` fold true under the configured defines,
        // so the consequent survives and the whole `if` collapses to it.
        assert_eq!(text.trim(), "a();");
        assert!(output.dependencies.is_empty());
    }

    #[test]
    fn registers_require_dependency_with_quoted_id_rewrite() {
        let source = r#"var x = require("./foo");"#;
        let program = parse(source);
        let config = JsRendererConfig::default();

        let output = render(source, &program, &config).expect("render succeeds");
        assert_eq!(output.dependencies.len(), 1);
        let dep = &output.dependencies[0];
        assert_eq!(dep.source.as_deref(), Some("./foo"));

        dep.rewrite.as_ref().unwrap().resolve("mod-1");
        let text = write(output.document, source);
        assert_eq!(text, r#"var x = require("mod-1");"#);
    }

    #[test]
    fn free_process_identifier_triggers_prelude_insert() {
        let source = "console.log(process.platform);";
        let program = parse(source);
        let config = JsRendererConfig::default();

        let output = render(source, &program, &config).expect("render succeeds");
        let prelude_dep = output.dependencies.iter().find(|d| d.index == 0 && d.end_index == 0);
        assert!(prelude_dep.is_some(), "expected a process-prelude dependency");

        prelude_dep.unwrap().rewrite.as_ref().unwrap().resolve("process-shim");
        let text = write(output.document, source);
        assert!(text.starts_with("var process = require(\"process-shim\");\n"));
    }

    #[test]
    fn shadowed_process_is_left_alone() {
        let source = "function f(process) { return process.env; }";
        let program = parse(source);
        let config = JsRendererConfig::default();

        let output = render(source, &program, &config).expect("render succeeds");
        assert!(output.dependencies.is_empty());
    }
}
