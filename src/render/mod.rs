//! # Module Renderers
//!
//! Each renderer turns a parsed source document into an edit log of
//! dependency-rewrite and dead-code-removal edits against the original text,
//! rather than regenerating source from the AST. The renderers share the
//! `module::RewriteFormat`/`RewriteSpec` deferred-rewrite primitive: a
//! renderer decides *how* a dependency reference should be rewritten at
//! render time, and linking fills in *what* it resolves to later.

pub mod css;
pub mod html;
pub mod js;
