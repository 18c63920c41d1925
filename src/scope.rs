//! # Scope Tracking (JavaScript renderer)
//!
//! A chain of name->binding maps with a function-level flag, trimmed from the
//! full scope/symbol-table analysis to exactly what the renderer needs:
//! `hasBinding` for free-identifier detection so `require`/`process` aren't
//! rewritten when shadowed, and `var` vs `let/const` binding-scope rules.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Var,
    LexicalOrParam,
}

struct ScopeFrame {
    bindings: std::collections::HashSet<String>,
    is_function_scope: bool,
}

/// A chain of scopes, innermost last. `push`/`pop` bracket entry into
/// `Program`, any function, and blocks, matching §4.3 "Entering `Program`,
/// any `FunctionExpression`/`FunctionDeclaration`, and blocks pushes a new
/// scope".
pub struct ScopeChain {
    frames: Vec<ScopeFrame>,
}

impl ScopeChain {
    pub fn new() -> Self {
        Self {
            frames: vec![ScopeFrame { bindings: Default::default(), is_function_scope: true }],
        }
    }

    pub fn push(&mut self, is_function_scope: bool) {
        self.frames.push(ScopeFrame { bindings: Default::default(), is_function_scope });
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Binds `name` in the nearest function-level scope (`var`) or the
    /// current scope (`let`/`const`/catch param/for-header).
    pub fn declare(&mut self, name: &str, kind: BindingKind) {
        match kind {
            BindingKind::Var => {
                let idx = self
                    .frames
                    .iter()
                    .rposition(|f| f.is_function_scope)
                    .unwrap_or(0);
                self.frames[idx].bindings.insert(name.to_string());
            }
            BindingKind::LexicalOrParam => {
                self.frames.last_mut().unwrap().bindings.insert(name.to_string());
            }
        }
    }

    /// Walks the chain from innermost to outermost looking for `name`.
    pub fn has_binding(&self, name: &str) -> bool {
        self.frames.iter().rev().any(|f| f.bindings.contains(name))
    }

    /// `name` is free (not locally bound anywhere in the chain) — the
    /// predicate §4.3 requires to avoid rewriting a shadowed `require` or
    /// `process`.
    pub fn is_free(&self, name: &str) -> bool {
        !self.has_binding(name)
    }
}

impl Default for ScopeChain {
    fn default() -> Self {
        Self::new()
    }
}
