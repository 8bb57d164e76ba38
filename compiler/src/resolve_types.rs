// resolve_types.rs — Expression type resolution.
//
// Propagates types bottom-up across expression subtrees, using header
// declarations for template variables and document order for `{let}` /
// `{for}` bindings. A node whose children could not be typed receives
// Unknown and the enclosing expression short-circuits silently, so a
// single root error does not cascade into a diagnostic per ancestor.
//
// Preconditions: ResolveHeaders and ResolveNames have run.
// Postconditions: every expression node carries a type (possibly
//   Unknown).
// Failure modes: operand mismatches and unknown functions produce
//   diagnostics; resolution continues.

use std::collections::HashMap;

use crate::ast::*;
use crate::diag::{codes, Diagnostic, ErrorSink};
use crate::id::{IdGenerator, NodeId};
use crate::pass::{FilePass, PassId};
use crate::types::TempoType;

pub struct ResolveExpressionTypesPass;

impl FilePass for ResolveExpressionTypesPass {
    fn id(&self) -> PassId {
        PassId::ResolveExpressionTypes
    }

    fn run(&mut self, file: &mut FileNode, _ids: &mut IdGenerator, sink: &mut ErrorSink) {
        for template in &mut file.templates {
            let header: HashMap<String, TempoType> = template
                .decls
                .iter()
                .map(|d| (d.name.clone(), d.ty.clone()))
                .collect();
            let mut typer = Typer {
                header,
                locals: HashMap::new(),
                sink,
            };
            typer.type_block(&mut template.body);
        }
    }
}

struct Typer<'a> {
    header: HashMap<String, TempoType>,
    /// Types of `{let}` bindings and `{for}` loop variables, keyed by
    /// the id of the binding statement. Document order guarantees a
    /// binding is typed before any reference to it.
    locals: HashMap<NodeId, TempoType>,
    sink: &'a mut ErrorSink,
}

impl<'a> Typer<'a> {
    fn type_block(&mut self, stmts: &mut [StmtNode]) {
        for stmt in stmts {
            let own_id = stmt.base.id;
            for expr in stmt.exprs_mut() {
                self.infer(expr);
            }
            match &mut stmt.kind {
                StmtKind::Let(n) => {
                    let ty = match &n.value {
                        LetValue::Expr(e) => e.ty.clone(),
                        LetValue::Block { kind, .. } => content_type(*kind),
                    };
                    self.locals.insert(own_id, ty);
                    if let LetValue::Block { body, .. } = &mut n.value {
                        self.type_block(body);
                    }
                }
                StmtKind::For(n) => {
                    let elem = match &n.seq.ty {
                        TempoType::List(inner) => (**inner).clone(),
                        _ => TempoType::Unknown,
                    };
                    self.locals.insert(own_id, elem);
                    self.type_block(&mut n.body);
                    if let Some(if_empty) = n.if_empty.as_mut() {
                        self.type_block(if_empty);
                    }
                }
                _ => {
                    for (_, block) in stmt.child_blocks_mut() {
                        self.type_block(block);
                    }
                }
            }
        }
    }

    fn infer(&mut self, expr: &mut ExprNode) {
        for child in expr.children_mut() {
            self.infer(child);
        }
        expr.ty = match &expr.kind {
            ExprKind::Null => TempoType::Null,
            ExprKind::Bool(_) => TempoType::Bool,
            ExprKind::Int(_) => TempoType::Int,
            ExprKind::Float(_) => TempoType::Float,
            ExprKind::Str(_) => TempoType::String,
            ExprKind::List(items) => {
                let elem = items
                    .iter()
                    .map(|i| i.ty.clone())
                    .reduce(|a, b| TempoType::common(&a, &b))
                    .unwrap_or(TempoType::Unknown);
                TempoType::List(Box::new(elem))
            }
            ExprKind::Var { name, defn } => match defn {
                Some(VarDefn::Header { .. }) => self
                    .header
                    .get(name)
                    .cloned()
                    .unwrap_or(TempoType::Unknown),
                Some(VarDefn::Let { node }) | Some(VarDefn::LoopVar { node }) => self
                    .locals
                    .get(node)
                    .cloned()
                    .unwrap_or(TempoType::Unknown),
                // Unresolved references degrade to Unknown; the
                // ResolveNames diagnostic already covers them.
                None => TempoType::Unknown,
            },
            ExprKind::Global { .. } => TempoType::Unknown,
            ExprKind::V1Expression(_) => TempoType::Unknown,
            ExprKind::Not(_) => TempoType::Bool,
            ExprKind::Neg(inner) => {
                if !inner.ty.is_numeric() && inner.ty != TempoType::Unknown {
                    self.mismatch(&expr.base.loc, "-", &inner.ty, None);
                    TempoType::Unknown
                } else {
                    inner.ty.clone()
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.binary_type(*op, &lhs.ty, &rhs.ty, &expr.base.loc)
            }
            ExprKind::Conditional { then, otherwise, .. } => {
                TempoType::common(&then.ty, &otherwise.ty)
            }
            ExprKind::Call { name, args } => self.function_type(name, args, &expr.base.loc),
        };
    }

    fn binary_type(
        &mut self,
        op: BinOp,
        lhs: &TempoType,
        rhs: &TempoType,
        loc: &SourceLocation,
    ) -> TempoType {
        use TempoType::*;
        // Errored subtrees short-circuit without further diagnostics.
        if *lhs == Unknown || *rhs == Unknown {
            return match op {
                BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne
                | BinOp::And | BinOp::Or => Bool,
                _ => Unknown,
            };
        }
        match op {
            BinOp::Add => {
                if *lhs == String || *rhs == String {
                    String
                } else if lhs.is_numeric() && rhs.is_numeric() {
                    if *lhs == Int && *rhs == Int {
                        Int
                    } else {
                        Float
                    }
                } else {
                    self.mismatch(loc, "+", lhs, Some(rhs));
                    Unknown
                }
            }
            BinOp::Sub | BinOp::Mul | BinOp::Mod => {
                if lhs.is_numeric() && rhs.is_numeric() {
                    if *lhs == Int && *rhs == Int {
                        Int
                    } else {
                        Float
                    }
                } else {
                    self.mismatch(loc, op.as_str(), lhs, Some(rhs));
                    Unknown
                }
            }
            BinOp::Div => {
                if lhs.is_numeric() && rhs.is_numeric() {
                    Float
                } else {
                    self.mismatch(loc, "/", lhs, Some(rhs));
                    Unknown
                }
            }
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                if (lhs.is_numeric() && rhs.is_numeric())
                    || (*lhs == String && *rhs == String)
                {
                    Bool
                } else {
                    self.mismatch(loc, op.as_str(), lhs, Some(rhs));
                    Bool
                }
            }
            BinOp::Eq | BinOp::Ne => {
                if !lhs.is_assignable_from(rhs) && !rhs.is_assignable_from(lhs) {
                    self.mismatch(loc, op.as_str(), lhs, Some(rhs));
                }
                Bool
            }
            BinOp::And | BinOp::Or => Bool,
        }
    }

    fn function_type(
        &mut self,
        name: &str,
        args: &[ExprNode],
        loc: &SourceLocation,
    ) -> TempoType {
        let (arity, result) = match name {
            "length" => (1, TempoType::Int),
            "isNonnull" => (1, TempoType::Bool),
            "round" | "floor" | "ceiling" => (1, TempoType::Int),
            "abs" => (1, TempoType::Float),
            "min" | "max" => (2, TempoType::Float),
            "strLen" => (1, TempoType::Int),
            "toLowerCase" | "toUpperCase" => (1, TempoType::String),
            _ => {
                self.sink.report(
                    Diagnostic::error(loc.clone(), format!("unknown function '{name}'"))
                        .with_code(codes::E0301),
                );
                return TempoType::Unknown;
            }
        };
        if args.len() != arity {
            self.sink.report(
                Diagnostic::error(
                    loc.clone(),
                    format!(
                        "function '{name}' expects {arity} argument(s), found {}",
                        args.len()
                    ),
                )
                .with_code(codes::E0301),
            );
            return TempoType::Unknown;
        }
        result
    }

    fn mismatch(
        &mut self,
        loc: &SourceLocation,
        op: &str,
        lhs: &TempoType,
        rhs: Option<&TempoType>,
    ) {
        let message = match rhs {
            Some(rhs) => format!("operator '{op}' cannot be applied to {lhs} and {rhs}"),
            None => format!("operator '{op}' cannot be applied to {lhs}"),
        };
        self.sink
            .report(Diagnostic::error(loc.clone(), message).with_code(codes::E0300));
    }
}

pub(crate) fn content_type(kind: ContentKind) -> TempoType {
    match kind {
        ContentKind::Html => TempoType::Html,
        ContentKind::Text => TempoType::String,
        ContentKind::Attributes => TempoType::Attributes,
        ContentKind::Uri => TempoType::Uri,
        ContentKind::Js => TempoType::Js,
        ContentKind::Css => TempoType::Css,
    }
}
