//! First compilation pass: groups macro/struct bodies out of the flat
//! reducer stream, expands `.include`, registers macro definitions, and
//! substitutes macro calls with their bound body.
//!
//! Grounded in `examples/original_source/xcomp/preprocessor.py`'s
//! `PreProcessor._process` (a `singledispatchmethod` over statement type)
//! and `_process_macro_call`'s `Scope() / Define(param, arg) / body / EndScope()`
//! expansion shape. The block-grouping step has no Python analogue because
//! that parser builds nested `Macro`/`Struct` bodies directly during
//! parsing; this reducer emits a flat stream instead (see `reducer.rs`),
//! so grouping happens here as an explicit first step.

use std::collections::HashMap;

use crate::ast::{Statement, StructField};
use crate::context::ContextManager;
use crate::error::{Error, Pos, Result};
use crate::reducer::reduce;

#[derive(Clone, Debug)]
struct MacroDef {
    pos: Pos,
    params: Vec<String>,
    body: Vec<Statement>,
}

/// Runs the full first pass starting from `root`, returning the expanded
/// statement stream with all includes inlined and all macro calls
/// substituted. Struct definitions are left in the stream (the code
/// generator consumes them directly) but with their fields grouped.
pub fn preprocess(ctx: &mut ContextManager, root: &str) -> Result<Vec<Statement>> {
    let mut pass = Pass { ctx, macros: HashMap::new(), including: Vec::new() };
    pass.run(root)
}

struct Pass<'a> {
    ctx: &'a mut ContextManager,
    macros: HashMap<String, MacroDef>,
    including: Vec<String>,
}

impl<'a> Pass<'a> {
    fn run(&mut self, name: &str) -> Result<Vec<Statement>> {
        let flat = self.parse_file(name)?;
        let grouped = group_blocks(flat)?;
        self.expand(grouped)
    }

    fn parse_file(&mut self, name: &str) -> Result<Vec<Statement>> {
        let text = self.ctx.get_text(name)?.to_owned();
        reduce(&text, name)
    }

    fn expand(&mut self, stmts: Vec<Statement>) -> Result<Vec<Statement>> {
        let mut out = Vec::new();
        for stmt in stmts {
            match stmt {
                Statement::Include { pos, path } => {
                    if self.including.contains(&path) {
                        return Err(Error::ParseError {
                            pos,
                            message: format!("circular include of \"{}\"", path),
                        });
                    }
                    log::debug!("including \"{}\"", path);
                    self.including.push(path.clone());
                    let expanded = self.run(&path)?;
                    self.including.pop();
                    out.extend(expanded);
                }
                Statement::MacroDef { pos, name, params, body } => {
                    if let Some(prior) = self.macros.get(&name) {
                        return Err(Error::DuplicateMacro { pos, name, prior_pos: prior.pos.clone() });
                    }
                    self.macros.insert(
                        name,
                        MacroDef { pos, params: params.into_iter().map(|p| p.name).collect(), body },
                    );
                }
                Statement::MacroCall { pos, name, args } => {
                    let def = self
                        .macros
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| Error::UndefinedName { pos: pos.clone(), name: name.clone() })?;
                    if args.len() != def.params.len() {
                        return Err(Error::ArityMismatch {
                            pos,
                            name,
                            expected: def.params.len(),
                            got: args.len(),
                        });
                    }
                    log::debug!("expanding macro \"{}\" with {} argument(s) at {}", name, args.len(), pos);
                    out.push(Statement::ScopeBegin { pos: pos.clone(), name: None });
                    for (param, arg) in def.params.iter().zip(args.into_iter()) {
                        out.push(Statement::Define { pos: pos.clone(), name: param.clone(), value: arg });
                    }
                    // Recursively expand in case the macro body itself calls
                    // other macros or includes.
                    out.extend(self.expand(group_blocks(def.body.clone())?)?);
                    out.push(Statement::ScopeEnd { pos });
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }
}

/// Nests macro/struct bodies: a `MacroDef`/`Struct` with an empty
/// body/fields list absorbs every statement up to its matching
/// `ScopeEnd` (emitted by the reducer for both `.endmacro` and `.end`).
fn group_blocks(stmts: Vec<Statement>) -> Result<Vec<Statement>> {
    let mut out = Vec::new();
    let mut iter = stmts.into_iter().peekable();
    while let Some(stmt) = iter.next() {
        match stmt {
            Statement::MacroDef { pos, name, params, .. } => {
                let body = take_until_scope_end(&mut iter)?;
                out.push(Statement::MacroDef { pos, name, params, body });
            }
            Statement::Struct { pos, name, offset, .. } => {
                let body = take_until_scope_end(&mut iter)?;
                let fields = body
                    .into_iter()
                    .map(|s| match s {
                        Statement::Var { pos, name, size, .. } => {
                            Ok(StructField { pos, name, width: size })
                        }
                        other => Err(Error::ParseError {
                            pos: other.pos(),
                            message: format!(
                                "only field declarations are allowed inside a struct, found {:?}",
                                other
                            ),
                        }),
                    })
                    .collect::<Result<Vec<_>>>()?;
                out.push(Statement::Struct { pos, name, offset, fields });
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Collects statements up to the `ScopeEnd` that matches the block whose
/// body is being gathered. `.scope`/`.struct`/`.macro` all reduce to their
/// own opener (`ScopeBegin`/`Struct`/`MacroDef`) paired with a `ScopeEnd`
/// (emitted for `.endscope`, `.end`, and `.endmacro` alike), so a body
/// containing any of those nested blocks carries its own `ScopeEnd` before
/// the one actually closing this body — depth must be tracked rather than
/// stopping at the first `ScopeEnd` seen.
fn take_until_scope_end(
    iter: &mut std::iter::Peekable<std::vec::IntoIter<Statement>>,
) -> Result<Vec<Statement>> {
    let mut body = Vec::new();
    let mut depth: usize = 0;
    loop {
        match iter.next() {
            Some(Statement::ScopeEnd { .. }) if depth == 0 => return Ok(body),
            Some(stmt @ Statement::ScopeEnd { .. }) => {
                depth -= 1;
                body.push(stmt);
            }
            Some(
                stmt @ (Statement::ScopeBegin { .. }
                | Statement::Struct { .. }
                | Statement::MacroDef { .. }),
            ) => {
                depth += 1;
                body.push(stmt);
            }
            Some(other) => body.push(other),
            None => {
                return Err(Error::ParseError {
                    pos: Pos::synthetic(),
                    message: "unterminated block: missing .endmacro or .end".to_owned(),
                })
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::Statement;

    #[test]
    fn expands_macro_call_with_bound_argument() {
        let mut ctx = ContextManager::new();
        ctx.inject(
            "root.asm",
            ".macro inc_a (n)\n  lda #n\n.endmacro\ninc_a 5\n",
        );
        let stmts = preprocess(&mut ctx, "root.asm").unwrap();
        assert!(matches!(stmts[0], Statement::ScopeBegin { .. }));
        assert!(matches!(&stmts[1], Statement::Define { name, .. } if name == "n"));
        assert!(matches!(&stmts[2], Statement::Operation { mnemonic, .. } if mnemonic == "lda"));
        assert!(matches!(stmts[3], Statement::ScopeEnd { .. }));
    }

    #[test]
    fn duplicate_macro_definition_fails() {
        let mut ctx = ContextManager::new();
        ctx.inject("root.asm", ".macro foo\n.endmacro\n.macro foo\n.endmacro\n");
        let err = preprocess(&mut ctx, "root.asm").unwrap_err();
        assert!(matches!(err, Error::DuplicateMacro { .. }));
    }

    #[test]
    fn arity_mismatch_fails() {
        let mut ctx = ContextManager::new();
        ctx.inject("root.asm", ".macro foo (a, b)\n.endmacro\nfoo 1\n");
        let err = preprocess(&mut ctx, "root.asm").unwrap_err();
        assert!(matches!(err, Error::ArityMismatch { .. }));
    }

    #[test]
    fn include_is_inlined() {
        let mut ctx = ContextManager::new();
        ctx.inject("root.asm", ".include \"child.asm\"\nnop\n");
        ctx.inject("child.asm", "lda #1\n");
        let stmts = preprocess(&mut ctx, "root.asm").unwrap();
        assert!(matches!(&stmts[0], Statement::Operation { mnemonic, .. } if mnemonic == "lda"));
        assert!(matches!(&stmts[1], Statement::Operation { mnemonic, .. } if mnemonic == "nop"));
    }

    #[test]
    fn struct_fields_are_grouped() {
        let mut ctx = ContextManager::new();
        ctx.inject("root.asm", ".struct point\n.var x, 1\n.var y, 1\n.end\n");
        let stmts = preprocess(&mut ctx, "root.asm").unwrap();
        match &stmts[0] {
            Statement::Struct { fields, .. } => assert_eq!(fields.len(), 2),
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn macro_body_with_nested_scope_is_not_truncated() {
        // The inner `.endscope` must not be mistaken for the macro's own
        // `.endmacro`: everything after the nested scope has to survive
        // into the expanded body.
        let mut ctx = ContextManager::new();
        ctx.inject(
            "root.asm",
            ".macro foo\n.scope\nnop\n.endscope\nlda #1\n.endmacro\nfoo\n",
        );
        let stmts = preprocess(&mut ctx, "root.asm").unwrap();
        assert!(matches!(stmts[0], Statement::ScopeBegin { .. }));
        assert!(matches!(&stmts[1], Statement::ScopeBegin { name: None, .. }));
        assert!(matches!(&stmts[2], Statement::Operation { mnemonic, .. } if mnemonic == "nop"));
        assert!(matches!(stmts[3], Statement::ScopeEnd { .. }));
        assert!(matches!(&stmts[4], Statement::Operation { mnemonic, .. } if mnemonic == "lda"));
        assert!(matches!(stmts[5], Statement::ScopeEnd { .. }));
    }

    #[test]
    fn macro_body_with_nested_struct_is_not_truncated() {
        let mut ctx = ContextManager::new();
        ctx.inject(
            "root.asm",
            ".macro foo\n.struct point\n.var x, 1\n.end\nlda #1\n.endmacro\nfoo\n",
        );
        let stmts = preprocess(&mut ctx, "root.asm").unwrap();
        match &stmts[1] {
            Statement::Struct { fields, .. } => assert_eq!(fields.len(), 1),
            other => panic!("unexpected statement: {:?}", other),
        }
        assert!(matches!(&stmts[2], Statement::Operation { mnemonic, .. } if mnemonic == "lda"));
    }
}
