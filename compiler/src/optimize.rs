// optimize.rs — Constant folding and dead-branch elimination.
//
// Pure tree simplification: expressions with constant operands collapse
// to literals, `{if}` branches with constant conditions are pruned or
// spliced into the parent block, and `{switch}` statements with a
// constant scrutinee reduce to the matching arm. Literal results are
// written into the existing node in place; subtrees promoted from a
// branch keep their identity. Idempotent.
//
// Division and modulo by a zero constant are left unfolded so the
// backend keeps the source semantics.

use crate::ast::*;
use crate::diag::ErrorSink;
use crate::id::{IdGenerator, NodeId};
use crate::pass::{FileSetPass, PassId, PassResult};
use crate::registry::TemplateRegistry;

pub struct OptimizePass;

impl FileSetPass for OptimizePass {
    fn id(&self) -> PassId {
        PassId::Optimize
    }

    fn run(
        &mut self,
        fileset: &mut FileSetNode,
        _ids: &mut IdGenerator,
        _registry: &mut TemplateRegistry,
        _sink: &mut ErrorSink,
    ) -> PassResult {
        for file in fileset
            .files
            .iter_mut()
            .filter(|f| f.kind == FileKind::Src)
        {
            for template in &mut file.templates {
                let template_id = template.base.id;
                optimize_block(&mut template.body, template_id);
            }
        }
        PassResult::Continue
    }
}

pub(crate) fn optimize_block(stmts: &mut Vec<StmtNode>, owner: NodeId) {
    let old = std::mem::take(stmts);
    for mut stmt in old {
        for expr in stmt.exprs_mut() {
            fold_expr(expr);
        }
        for (block_owner, block) in stmt.child_blocks_mut() {
            optimize_block(block, block_owner);
        }

        let replacement = match &mut stmt.kind {
            StmtKind::If(n) => simplify_if(n),
            StmtKind::Switch(n) => simplify_switch(n),
            _ => None,
        };
        match replacement {
            Some(children) => {
                for mut child in children {
                    child.base.parent = Some(owner);
                    stmts.push(child);
                }
            }
            None => stmts.push(stmt),
        }
    }
}

// ── Dead branches ───────────────────────────────────────────────────────────

/// Returns the statements to splice in place of the `{if}` when it can
/// be decided at compile time; None keeps the node.
fn simplify_if(n: &mut IfNode) -> Option<Vec<StmtNode>> {
    n.branches
        .retain(|b| !matches!(b.cond.kind, ExprKind::Bool(false)));
    if let Some(pos) = n
        .branches
        .iter()
        .position(|b| matches!(b.cond.kind, ExprKind::Bool(true)))
    {
        if pos == 0 {
            return Some(std::mem::take(&mut n.branches[0].body));
        }
        // Earlier branches are dynamic; the constant-true branch becomes
        // the else.
        n.branches.truncate(pos + 1);
        let last = n.branches.pop().expect("truncated to pos + 1");
        n.else_body = Some(last.body);
        return None;
    }
    if n.branches.is_empty() {
        return Some(n.else_body.take().unwrap_or_default());
    }
    None
}

fn simplify_switch(n: &mut SwitchNode) -> Option<Vec<StmtNode>> {
    if !n.scrutinee.is_constant() {
        return None;
    }
    if n.cases
        .iter()
        .any(|c| c.exprs.iter().any(|e| !e.is_constant()))
    {
        return None;
    }
    for case in &mut n.cases {
        if case.exprs.iter().any(|e| const_eq(e, &n.scrutinee)) {
            return Some(std::mem::take(&mut case.body));
        }
    }
    Some(n.default.take().unwrap_or_default())
}

fn const_eq(a: &ExprNode, b: &ExprNode) -> bool {
    match (&a.kind, &b.kind) {
        (ExprKind::Int(x), ExprKind::Float(y)) | (ExprKind::Float(y), ExprKind::Int(x)) => {
            *x as f64 == *y
        }
        (x, y) => x == y,
    }
}

// ── Constant folding ────────────────────────────────────────────────────────

pub(crate) fn fold_expr(expr: &mut ExprNode) {
    for child in expr.children_mut() {
        fold_expr(child);
    }

    // Promotions first: a constant operand selects one side and the
    // surviving subtree keeps its identity.
    let promoted = match &mut expr.kind {
        ExprKind::Binary { op: BinOp::And, lhs, rhs } => match lhs.kind {
            ExprKind::Bool(true) => Some(std::mem::replace(rhs.as_mut(), placeholder())),
            ExprKind::Bool(false) => Some(std::mem::replace(lhs.as_mut(), placeholder())),
            _ => None,
        },
        ExprKind::Binary { op: BinOp::Or, lhs, rhs } => match lhs.kind {
            ExprKind::Bool(false) => Some(std::mem::replace(rhs.as_mut(), placeholder())),
            ExprKind::Bool(true) => Some(std::mem::replace(lhs.as_mut(), placeholder())),
            _ => None,
        },
        ExprKind::Conditional { cond, then, otherwise } => match cond.kind {
            ExprKind::Bool(true) => Some(std::mem::replace(then.as_mut(), placeholder())),
            ExprKind::Bool(false) => Some(std::mem::replace(otherwise.as_mut(), placeholder())),
            _ => None,
        },
        _ => None,
    };
    if let Some(node) = promoted {
        *expr = node;
        return;
    }

    // In-place literal folds.
    let folded = match &expr.kind {
        ExprKind::Not(inner) => match inner.kind {
            ExprKind::Bool(b) => Some(ExprKind::Bool(!b)),
            _ => None,
        },
        ExprKind::Neg(inner) => match inner.kind {
            ExprKind::Int(n) => Some(ExprKind::Int(-n)),
            ExprKind::Float(x) => Some(ExprKind::Float(-x)),
            _ => None,
        },
        ExprKind::Binary { op, lhs, rhs } => fold_binary(*op, lhs, rhs),
        _ => None,
    };
    if let Some(kind) = folded {
        expr.kind = kind;
    }
}

fn placeholder() -> ExprNode {
    ExprNode::new(
        NodeId(u32::MAX),
        SourceLocation::new("<folded>", 0, 0),
        ExprKind::Null,
    )
}

fn fold_binary(op: BinOp, lhs: &ExprNode, rhs: &ExprNode) -> Option<ExprKind> {
    use ExprKind::*;
    match (&lhs.kind, &rhs.kind) {
        (Int(a), Int(b)) => {
            let (a, b) = (*a, *b);
            Some(match op {
                BinOp::Add => Int(a.checked_add(b)?),
                BinOp::Sub => Int(a.checked_sub(b)?),
                BinOp::Mul => Int(a.checked_mul(b)?),
                BinOp::Div => {
                    if b == 0 {
                        return None;
                    }
                    Float(a as f64 / b as f64)
                }
                BinOp::Mod => {
                    if b == 0 {
                        return None;
                    }
                    Int(a % b)
                }
                BinOp::Lt => Bool(a < b),
                BinOp::Gt => Bool(a > b),
                BinOp::Le => Bool(a <= b),
                BinOp::Ge => Bool(a >= b),
                BinOp::Eq => Bool(a == b),
                BinOp::Ne => Bool(a != b),
                BinOp::And | BinOp::Or => return None,
            })
        }
        (Float(_), Int(_)) | (Int(_), Float(_)) | (Float(_), Float(_)) => {
            let a = as_f64(&lhs.kind)?;
            let b = as_f64(&rhs.kind)?;
            Some(match op {
                BinOp::Add => Float(a + b),
                BinOp::Sub => Float(a - b),
                BinOp::Mul => Float(a * b),
                BinOp::Div => {
                    if b == 0.0 {
                        return None;
                    }
                    Float(a / b)
                }
                BinOp::Mod => {
                    if b == 0.0 {
                        return None;
                    }
                    Float(a % b)
                }
                BinOp::Lt => Bool(a < b),
                BinOp::Gt => Bool(a > b),
                BinOp::Le => Bool(a <= b),
                BinOp::Ge => Bool(a >= b),
                BinOp::Eq => Bool(a == b),
                BinOp::Ne => Bool(a != b),
                BinOp::And | BinOp::Or => return None,
            })
        }
        (Str(a), _) if op == BinOp::Add => {
            let b = const_to_string(&rhs.kind)?;
            Some(Str(format!("{a}{b}")))
        }
        (_, Str(b)) if op == BinOp::Add => {
            let a = const_to_string(&lhs.kind)?;
            Some(Str(format!("{a}{b}")))
        }
        (Str(a), Str(b)) => match op {
            BinOp::Eq => Some(Bool(a == b)),
            BinOp::Ne => Some(Bool(a != b)),
            _ => None,
        },
        (Bool(a), Bool(b)) => match op {
            BinOp::Eq => Some(Bool(a == b)),
            BinOp::Ne => Some(Bool(a != b)),
            _ => None,
        },
        _ => None,
    }
}

fn as_f64(kind: &ExprKind) -> Option<f64> {
    match kind {
        ExprKind::Int(n) => Some(*n as f64),
        ExprKind::Float(x) => Some(*x),
        _ => None,
    }
}

fn const_to_string(kind: &ExprKind) -> Option<String> {
    match kind {
        ExprKind::Str(s) => Some(s.clone()),
        ExprKind::Int(n) => Some(n.to_string()),
        ExprKind::Float(x) => Some(x.to_string()),
        ExprKind::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
