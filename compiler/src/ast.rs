// ast.rs — AST node types for Tempo .tpl template files.
//
// The tree the pass pipeline rewrites: a fileset owns files, a file owns
// templates, each node owns its children exclusively. Node kind is a
// closed tagged union per family (statements, expressions) with the
// shared prefix fields (id, location, parent back-reference) factored
// into NodeBase. The parent back-reference is metadata maintained by the
// containing parent: it is a NodeId for lookup, never ownership, and must
// be repaired after every structural edit (see `assign_parents`).
//
// Preconditions: produced by the parser from a valid or partially-valid
//   token stream; ids come from a shared IdGenerator.
// Postconditions: each node's location covers the source range of the
//   construct; parent links are consistent after `assign_parents`.

use chumsky::span::SimpleSpan;
use std::fmt;

use crate::id::{IdGenerator, NodeId};
use crate::types::TempoType;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Source location ─────────────────────────────────────────────────────────

/// A file path plus a byte-offset span within that file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLocation {
    pub file: String,
    pub span: Span,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, start: usize, end: usize) -> Self {
        use chumsky::span::Span as _;
        Self {
            file: file.into(),
            span: Span::new((), start..end),
        }
    }

    pub fn from_span(file: impl Into<String>, span: Span) -> Self {
        Self {
            file: file.into(),
            span,
        }
    }

    /// Location covering `self` through `other` (same file expected).
    /// Used when coalescing sibling nodes: the merged location spans the
    /// first component's start to the last component's end.
    pub fn span_to(&self, other: &SourceLocation) -> SourceLocation {
        use chumsky::span::Span as _;
        SourceLocation {
            file: self.file.clone(),
            span: Span::new((), self.span.start()..other.span.end()),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use chumsky::span::Span as _;
        write!(f, "{}:{}-{}", self.file, self.span.start(), self.span.end())
    }
}

// ── Shared node prefix ──────────────────────────────────────────────────────

/// Fields common to every node: stable id, source location, and the
/// parent back-reference (repaired by `assign_parents` after edits).
#[derive(Debug, Clone, PartialEq)]
pub struct NodeBase {
    pub id: NodeId,
    pub loc: SourceLocation,
    pub parent: Option<NodeId>,
}

impl NodeBase {
    pub fn new(id: NodeId, loc: SourceLocation) -> Self {
        Self {
            id,
            loc,
            parent: None,
        }
    }
}

// ── File family ─────────────────────────────────────────────────────────────

/// How a file participates in the compile: only SRC files are rewritten;
/// DEP and INDIRECT_DEP files are registry-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Src,
    Dep,
    IndirectDep,
}

/// Root of one compile invocation: all participating template files.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSetNode {
    pub base: NodeBase,
    pub files: Vec<FileNode>,
}

impl FileSetNode {
    /// All templates in the fileset, paired with their containing file.
    pub fn templates(&self) -> impl Iterator<Item = (&FileNode, &TemplateNode)> {
        self.files
            .iter()
            .flat_map(|f| f.templates.iter().map(move |t| (f, t)))
    }
}

/// One source file: a namespace and an ordered list of templates.
#[derive(Debug, Clone, PartialEq)]
pub struct FileNode {
    pub base: NodeBase,
    pub kind: FileKind,
    pub path: String,
    pub namespace: String,
    pub templates: Vec<TemplateNode>,
}

// ── Template family ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateKind {
    Regular,
    Element,
    Delegate {
        variant: Option<String>,
        priority: u32,
        /// Activation package of an override candidate. None marks the
        /// default implementation of its delegate group.
        package: Option<String>,
    },
}

impl TemplateKind {
    /// Whether this is the default implementation of a delegate group:
    /// a delegate candidate with no activation package.
    pub fn is_default_delegate(&self) -> bool {
        matches!(self, TemplateKind::Delegate { package: None, .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoescapeMode {
    Strict,
    Contextual,
}

/// Output content kind of a template or block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Text,
    Attributes,
    Uri,
    Js,
    Css,
}

impl ContentKind {
    pub fn parse(s: &str) -> Option<ContentKind> {
        match s {
            "html" => Some(ContentKind::Html),
            "text" => Some(ContentKind::Text),
            "attributes" => Some(ContentKind::Attributes),
            "uri" => Some(ContentKind::Uri),
            "js" => Some(ContentKind::Js),
            "css" => Some(ContentKind::Css),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Html => "html",
            ContentKind::Text => "text",
            ContentKind::Attributes => "attributes",
            ContentKind::Uri => "uri",
            ContentKind::Js => "js",
            ContentKind::Css => "css",
        }
    }
}

/// Header declaration kind: `{@param}` or `{@prop}` (element templates).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Param,
    Prop,
}

/// One header variable declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub kind: DeclKind,
    pub name: String,
    pub name_span: Span,
    /// Declared type as written (e.g. `list<string>`). Parsed into `ty`
    /// by the ResolveHeaders pass.
    pub type_text: String,
    pub ty: TempoType,
    pub required: bool,
}

/// A template: header plus ordered body.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateNode {
    pub base: NodeBase,
    pub kind: TemplateKind,
    /// Fully-qualified name: `ns.foo` for regular/element templates, the
    /// delegate name for delegates.
    pub fq_name: String,
    pub visibility: Visibility,
    pub autoescape: AutoescapeMode,
    pub content_kind: ContentKind,
    pub required_css: Vec<String>,
    pub decls: Vec<VarDecl>,
    pub body: Vec<StmtNode>,
}

// ── Statement family ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StmtNode {
    pub base: NodeBase,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    RawText(String),
    Print(PrintNode),
    Msg(MsgNode),
    If(IfNode),
    Switch(SwitchNode),
    For(ForNode),
    Let(LetNode),
    Call(CallNode),
    VeLog(VeLogNode),
    HtmlOpenTag(HtmlOpenTagNode),
    HtmlCloseTag(HtmlCloseTagNode),
    HtmlAttribute(HtmlAttributeNode),
    HtmlAttributeValue(HtmlAttributeValueNode),
    Placeholder(PlaceholderNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrintNode {
    pub expr: ExprNode,
    pub directives: Vec<PrintDirective>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrintDirective {
    pub name: String,
    pub args: Vec<ExprNode>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MsgNode {
    pub desc: String,
    pub children: Vec<StmtNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfNode {
    pub branches: Vec<IfBranch>,
    pub else_body: Option<Vec<StmtNode>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBranch {
    pub cond: ExprNode,
    pub body: Vec<StmtNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchNode {
    pub scrutinee: ExprNode,
    pub cases: Vec<SwitchCase>,
    pub default: Option<Vec<StmtNode>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub exprs: Vec<ExprNode>,
    pub body: Vec<StmtNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForNode {
    pub var: String,
    pub var_span: Span,
    pub seq: ExprNode,
    pub body: Vec<StmtNode>,
    pub if_empty: Option<Vec<StmtNode>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LetNode {
    pub var: String,
    pub var_span: Span,
    pub value: LetValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LetValue {
    Expr(ExprNode),
    Block {
        kind: ContentKind,
        body: Vec<StmtNode>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// `{call .foo}` / `{call ns.foo}`. `resolved` is the fully-qualified
    /// name, filled in by ResolveNames.
    Template {
        name: String,
        resolved: Option<String>,
    },
    /// `{delcall del.name variant="..."}`.
    Delegate {
        name: String,
        variant: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallNode {
    pub target: CallTarget,
    pub params: Vec<CallParam>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallParam {
    pub name: String,
    pub name_span: Span,
    pub value: CallParamValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallParamValue {
    Expr(ExprNode),
    Block {
        kind: ContentKind,
        body: Vec<StmtNode>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VeLogNode {
    pub name: String,
    pub name_span: Span,
    pub children: Vec<StmtNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HtmlOpenTagNode {
    pub tag_name: String,
    /// Attribute children: HtmlAttribute nodes, or dynamic nodes (prints,
    /// conditionals) contributing attributes.
    pub attrs: Vec<StmtNode>,
    /// Self-contained tags (`<br/>`, void elements) carry no close pair.
    pub self_closing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HtmlCloseTagNode {
    pub tag_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HtmlAttributeNode {
    pub name: String,
    /// Value node (kind HtmlAttributeValue), absent for bare attributes.
    pub value: Option<Box<StmtNode>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HtmlAttributeValueNode {
    pub children: Vec<StmtNode>,
}

/// A synthetic node standing in for a non-text substructure inside a
/// translatable message. The name is stable across later rewrites.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderNode {
    pub name: String,
    pub children: Vec<StmtNode>,
}

// ── Expression family ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ExprNode {
    pub base: NodeBase,
    pub kind: ExprKind,
    /// Filled in by ResolveExpressionTypes; Unknown until then.
    pub ty: TempoType,
}

impl ExprNode {
    pub fn new(id: NodeId, loc: SourceLocation, kind: ExprKind) -> Self {
        Self {
            base: NodeBase::new(id, loc),
            kind,
            ty: TempoType::Unknown,
        }
    }
}

/// Where a variable reference was resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum VarDefn {
    /// Header declaration of the enclosing template.
    Header { template: String },
    /// A `{let}` binding; the id of the Let statement node.
    Let { node: NodeId },
    /// A `{for}` loop variable; the id of the For statement node.
    LoopVar { node: NodeId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ExprNode>),
    /// `$name`; `defn` is filled in by ResolveNames.
    Var {
        name: String,
        defn: Option<VarDefn>,
    },
    /// Dotted compile-time global, e.g. `app.flags.DEBUG`.
    Global {
        name: String,
    },
    Not(Box<ExprNode>),
    Neg(Box<ExprNode>),
    Binary {
        op: BinOp,
        lhs: Box<ExprNode>,
        rhs: Box<ExprNode>,
    },
    Conditional {
        cond: Box<ExprNode>,
        then: Box<ExprNode>,
        otherwise: Box<ExprNode>,
    },
    /// Built-in function call, e.g. `length($xs)`.
    Call {
        name: String,
        args: Vec<ExprNode>,
    },
    /// Legacy `v1Expression('...')` escape hatch.
    V1Expression(String),
}

impl ExprNode {
    /// Direct expression children, in source order.
    pub fn children(&self) -> Vec<&ExprNode> {
        match &self.kind {
            ExprKind::Null
            | ExprKind::Bool(_)
            | ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Var { .. }
            | ExprKind::Global { .. }
            | ExprKind::V1Expression(_) => Vec::new(),
            ExprKind::List(items) => items.iter().collect(),
            ExprKind::Not(e) | ExprKind::Neg(e) => vec![e],
            ExprKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => vec![cond, then, otherwise],
            ExprKind::Call { args, .. } => args.iter().collect(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut ExprNode> {
        match &mut self.kind {
            ExprKind::Null
            | ExprKind::Bool(_)
            | ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Var { .. }
            | ExprKind::Global { .. }
            | ExprKind::V1Expression(_) => Vec::new(),
            ExprKind::List(items) => items.iter_mut().collect(),
            ExprKind::Not(e) | ExprKind::Neg(e) => vec![e],
            ExprKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => vec![cond, then, otherwise],
            ExprKind::Call { args, .. } => args.iter_mut().collect(),
        }
    }

    /// True for literal leaves (the result of constant folding).
    pub fn is_constant(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Null
                | ExprKind::Bool(_)
                | ExprKind::Int(_)
                | ExprKind::Float(_)
                | ExprKind::Str(_)
        )
    }
}

// ── Statement traversal helpers ─────────────────────────────────────────────

impl StmtNode {
    pub fn new(id: NodeId, loc: SourceLocation, kind: StmtKind) -> Self {
        Self {
            base: NodeBase::new(id, loc),
            kind,
        }
    }

    /// Short tag for dumps and diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            StmtKind::RawText(_) => "raw_text",
            StmtKind::Print(_) => "print",
            StmtKind::Msg(_) => "msg",
            StmtKind::If(_) => "if",
            StmtKind::Switch(_) => "switch",
            StmtKind::For(_) => "for",
            StmtKind::Let(_) => "let",
            StmtKind::Call(_) => "call",
            StmtKind::VeLog(_) => "velog",
            StmtKind::HtmlOpenTag(_) => "html_open_tag",
            StmtKind::HtmlCloseTag(_) => "html_close_tag",
            StmtKind::HtmlAttribute(_) => "html_attribute",
            StmtKind::HtmlAttributeValue(_) => "html_attribute_value",
            StmtKind::Placeholder(_) => "placeholder",
        }
    }

    /// Every statement block directly owned by this node, paired with the
    /// id of the owning node (the block's children must carry that id as
    /// their parent). For attributes the owner is the value node.
    pub fn child_blocks_mut(&mut self) -> Vec<(NodeId, &mut Vec<StmtNode>)> {
        let own = self.base.id;
        match &mut self.kind {
            StmtKind::RawText(_)
            | StmtKind::Print(_)
            | StmtKind::HtmlCloseTag(_) => Vec::new(),
            StmtKind::Msg(n) => vec![(own, &mut n.children)],
            StmtKind::If(n) => {
                let mut blocks: Vec<(NodeId, &mut Vec<StmtNode>)> = n
                    .branches
                    .iter_mut()
                    .map(|b| (own, &mut b.body))
                    .collect();
                if let Some(e) = n.else_body.as_mut() {
                    blocks.push((own, e));
                }
                blocks
            }
            StmtKind::Switch(n) => {
                let mut blocks: Vec<(NodeId, &mut Vec<StmtNode>)> =
                    n.cases.iter_mut().map(|c| (own, &mut c.body)).collect();
                if let Some(d) = n.default.as_mut() {
                    blocks.push((own, d));
                }
                blocks
            }
            StmtKind::For(n) => {
                let mut blocks = vec![(own, &mut n.body)];
                if let Some(e) = n.if_empty.as_mut() {
                    blocks.push((own, e));
                }
                blocks
            }
            StmtKind::Let(n) => match &mut n.value {
                LetValue::Expr(_) => Vec::new(),
                LetValue::Block { body, .. } => vec![(own, body)],
            },
            StmtKind::Call(n) => n
                .params
                .iter_mut()
                .filter_map(|p| match &mut p.value {
                    CallParamValue::Expr(_) => None,
                    CallParamValue::Block { body, .. } => Some((own, body)),
                })
                .collect(),
            StmtKind::VeLog(n) => vec![(own, &mut n.children)],
            StmtKind::HtmlOpenTag(n) => vec![(own, &mut n.attrs)],
            StmtKind::HtmlAttribute(n) => match n.value.as_mut() {
                Some(value) => {
                    let value_id = value.base.id;
                    match &mut value.kind {
                        StmtKind::HtmlAttributeValue(v) => vec![(value_id, &mut v.children)],
                        _ => Vec::new(),
                    }
                }
                None => Vec::new(),
            },
            StmtKind::HtmlAttributeValue(n) => vec![(own, &mut n.children)],
            StmtKind::Placeholder(n) => vec![(own, &mut n.children)],
        }
    }

    /// Top-level expressions owned directly by this statement (not those
    /// nested in child statement blocks).
    pub fn exprs_mut(&mut self) -> Vec<&mut ExprNode> {
        match &mut self.kind {
            StmtKind::Print(n) => {
                let mut out = vec![&mut n.expr];
                for d in &mut n.directives {
                    out.extend(d.args.iter_mut());
                }
                out
            }
            StmtKind::If(n) => n.branches.iter_mut().map(|b| &mut b.cond).collect(),
            StmtKind::Switch(n) => {
                let mut out = vec![&mut n.scrutinee];
                for c in &mut n.cases {
                    out.extend(c.exprs.iter_mut());
                }
                out
            }
            StmtKind::For(n) => vec![&mut n.seq],
            StmtKind::Let(n) => match &mut n.value {
                LetValue::Expr(e) => vec![e],
                LetValue::Block { .. } => Vec::new(),
            },
            StmtKind::Call(n) => n
                .params
                .iter_mut()
                .filter_map(|p| match &mut p.value {
                    CallParamValue::Expr(e) => Some(e),
                    CallParamValue::Block { .. } => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

// ── Parent repair ───────────────────────────────────────────────────────────

/// Rebuild every parent back-reference reachable from the fileset. Cheap
/// relative to pass work; called after parsing and after passes that
/// restructure whole subtrees.
pub fn assign_parents(fileset: &mut FileSetNode) {
    let root = fileset.base.id;
    fileset.base.parent = None;
    for file in &mut fileset.files {
        file.base.parent = Some(root);
        assign_parents_file(file);
    }
}

/// Rebuild parent links within one file (the file's own parent is left
/// untouched).
pub fn assign_parents_file(file: &mut FileNode) {
    let file_id = file.base.id;
    for template in &mut file.templates {
        template.base.parent = Some(file_id);
        let template_id = template.base.id;
        for stmt in &mut template.body {
            assign_parents_stmt(stmt, template_id);
        }
    }
}

fn assign_parents_stmt(stmt: &mut StmtNode, parent: NodeId) {
    stmt.base.parent = Some(parent);
    let own = stmt.base.id;
    // Attribute value nodes hang off the attribute, not a block.
    if let StmtKind::HtmlAttribute(attr) = &mut stmt.kind {
        if let Some(value) = attr.value.as_mut() {
            assign_parents_stmt(value, own);
        }
    }
    for expr in stmt.exprs_mut() {
        assign_parents_expr(expr, own);
    }
    for (owner, block) in stmt.child_blocks_mut() {
        for child in block.iter_mut() {
            assign_parents_stmt(child, owner);
        }
    }
}

fn assign_parents_expr(expr: &mut ExprNode, parent: NodeId) {
    expr.base.parent = Some(parent);
    let own = expr.base.id;
    for child in expr.children_mut() {
        assign_parents_expr(child, own);
    }
}

/// Check that every reachable node's parent pointer matches its
/// container. Returns the ids of mismatching nodes (empty when
/// consistent).
pub fn parent_mismatches(fileset: &FileSetNode) -> Vec<NodeId> {
    let mut bad = Vec::new();
    let root = fileset.base.id;
    for file in &fileset.files {
        if file.base.parent != Some(root) {
            bad.push(file.base.id);
        }
        for template in &file.templates {
            if template.base.parent != Some(file.base.id) {
                bad.push(template.base.id);
            }
            for stmt in &template.body {
                check_parents_stmt(stmt, template.base.id, &mut bad);
            }
        }
    }
    bad
}

fn check_parents_stmt(stmt: &StmtNode, expected: NodeId, bad: &mut Vec<NodeId>) {
    if stmt.base.parent != Some(expected) {
        bad.push(stmt.base.id);
    }
    let own = stmt.base.id;
    for expr in stmt_exprs(stmt) {
        check_parents_expr(expr, own, bad);
    }
    match &stmt.kind {
        StmtKind::HtmlAttribute(attr) => {
            if let Some(value) = attr.value.as_deref() {
                check_parents_stmt(value, own, bad);
            }
        }
        _ => {
            for (owner, block) in stmt_blocks(stmt) {
                for child in block {
                    check_parents_stmt(child, owner, bad);
                }
            }
        }
    }
}

fn check_parents_expr(expr: &ExprNode, expected: NodeId, bad: &mut Vec<NodeId>) {
    if expr.base.parent != Some(expected) {
        bad.push(expr.base.id);
    }
    for child in expr.children() {
        check_parents_expr(child, expr.base.id, bad);
    }
}

/// Shared-reference view of a statement's blocks (owner id, children).
fn stmt_blocks(stmt: &StmtNode) -> Vec<(NodeId, &[StmtNode])> {
    let own = stmt.base.id;
    match &stmt.kind {
        StmtKind::RawText(_) | StmtKind::Print(_) | StmtKind::HtmlCloseTag(_) => Vec::new(),
        StmtKind::Msg(n) => vec![(own, n.children.as_slice())],
        StmtKind::If(n) => {
            let mut blocks: Vec<(NodeId, &[StmtNode])> = n
                .branches
                .iter()
                .map(|b| (own, b.body.as_slice()))
                .collect();
            if let Some(e) = n.else_body.as_ref() {
                blocks.push((own, e.as_slice()));
            }
            blocks
        }
        StmtKind::Switch(n) => {
            let mut blocks: Vec<(NodeId, &[StmtNode])> =
                n.cases.iter().map(|c| (own, c.body.as_slice())).collect();
            if let Some(d) = n.default.as_ref() {
                blocks.push((own, d.as_slice()));
            }
            blocks
        }
        StmtKind::For(n) => {
            let mut blocks = vec![(own, n.body.as_slice())];
            if let Some(e) = n.if_empty.as_ref() {
                blocks.push((own, e.as_slice()));
            }
            blocks
        }
        StmtKind::Let(n) => match &n.value {
            LetValue::Expr(_) => Vec::new(),
            LetValue::Block { body, .. } => vec![(own, body.as_slice())],
        },
        StmtKind::Call(n) => n
            .params
            .iter()
            .filter_map(|p| match &p.value {
                CallParamValue::Expr(_) => None,
                CallParamValue::Block { body, .. } => Some((own, body.as_slice())),
            })
            .collect(),
        StmtKind::VeLog(n) => vec![(own, n.children.as_slice())],
        StmtKind::HtmlOpenTag(n) => vec![(own, n.attrs.as_slice())],
        StmtKind::HtmlAttribute(n) => match n.value.as_deref() {
            Some(value) => match &value.kind {
                StmtKind::HtmlAttributeValue(v) => vec![(value.base.id, v.children.as_slice())],
                _ => Vec::new(),
            },
            None => Vec::new(),
        },
        StmtKind::HtmlAttributeValue(n) => vec![(own, n.children.as_slice())],
        StmtKind::Placeholder(n) => vec![(own, n.children.as_slice())],
    }
}

/// Shared-reference view of a statement's own expressions.
fn stmt_exprs(stmt: &StmtNode) -> Vec<&ExprNode> {
    match &stmt.kind {
        StmtKind::Print(n) => {
            let mut out = vec![&n.expr];
            for d in &n.directives {
                out.extend(d.args.iter());
            }
            out
        }
        StmtKind::If(n) => n.branches.iter().map(|b| &b.cond).collect(),
        StmtKind::Switch(n) => {
            let mut out = vec![&n.scrutinee];
            for c in &n.cases {
                out.extend(c.exprs.iter());
            }
            out
        }
        StmtKind::For(n) => vec![&n.seq],
        StmtKind::Let(n) => match &n.value {
            LetValue::Expr(e) => vec![e],
            LetValue::Block { .. } => Vec::new(),
        },
        StmtKind::Call(n) => n
            .params
            .iter()
            .filter_map(|p| match &p.value {
                CallParamValue::Expr(e) => Some(e),
                CallParamValue::Block { .. } => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

// ── Id collection and renumbering ───────────────────────────────────────────

/// Collect every node id reachable from the fileset, in document order.
pub fn collect_ids(fileset: &FileSetNode) -> Vec<NodeId> {
    let mut ids = vec![fileset.base.id];
    for file in &fileset.files {
        ids.push(file.base.id);
        for template in &file.templates {
            ids.push(template.base.id);
            for stmt in &template.body {
                collect_ids_stmt(stmt, &mut ids);
            }
        }
    }
    ids
}

fn collect_ids_stmt(stmt: &StmtNode, ids: &mut Vec<NodeId>) {
    ids.push(stmt.base.id);
    for expr in stmt_exprs(stmt) {
        collect_ids_expr(expr, ids);
    }
    if let StmtKind::HtmlAttribute(attr) = &stmt.kind {
        if let Some(value) = attr.value.as_deref() {
            collect_ids_stmt(value, ids);
            return;
        }
    }
    for (_, block) in stmt_blocks(stmt) {
        for child in block {
            collect_ids_stmt(child, ids);
        }
    }
}

fn collect_ids_expr(expr: &ExprNode, ids: &mut Vec<NodeId>) {
    ids.push(expr.base.id);
    for child in expr.children() {
        collect_ids_expr(child, ids);
    }
}

// ── Generic visitors ────────────────────────────────────────────────────────

/// Visit every statement node in the blocks, pre-order (a node before
/// its children). Attribute value nodes are visited between the
/// attribute and its children.
pub fn visit_stmts<'a>(stmts: &'a [StmtNode], f: &mut impl FnMut(&'a StmtNode)) {
    for stmt in stmts {
        f(stmt);
        if let StmtKind::HtmlAttribute(attr) = &stmt.kind {
            if let Some(value) = attr.value.as_deref() {
                visit_stmts(std::slice::from_ref(value), f);
                continue;
            }
        }
        for (_, block) in stmt_blocks(stmt) {
            visit_stmts(block, f);
        }
    }
}

/// Mutable pre-order statement visitor. The callback must not change
/// the node's kind discriminant.
pub fn visit_stmts_mut(stmts: &mut [StmtNode], f: &mut impl FnMut(&mut StmtNode)) {
    for stmt in stmts {
        f(stmt);
        if let StmtKind::HtmlAttribute(attr) = &mut stmt.kind {
            if let Some(value) = attr.value.as_mut() {
                visit_stmts_mut(std::slice::from_mut(value.as_mut()), f);
                continue;
            }
        }
        for (_, block) in stmt.child_blocks_mut() {
            visit_stmts_mut(block, f);
        }
    }
}

/// Visit every expression node reachable from the blocks, pre-order.
pub fn visit_exprs<'a>(stmts: &'a [StmtNode], f: &mut impl FnMut(&'a ExprNode)) {
    visit_stmts(stmts, &mut |stmt| {
        for expr in stmt_exprs(stmt) {
            visit_expr_tree(expr, f);
        }
    });
}

fn visit_expr_tree<'a>(expr: &'a ExprNode, f: &mut impl FnMut(&'a ExprNode)) {
    f(expr);
    for child in expr.children() {
        visit_expr_tree(child, f);
    }
}

/// Mutable pre-order expression visitor.
pub fn visit_exprs_mut(stmts: &mut [StmtNode], f: &mut impl FnMut(&mut ExprNode)) {
    visit_stmts_mut(stmts, &mut |stmt| {
        for expr in stmt.exprs_mut() {
            visit_expr_tree_mut(expr, f);
        }
    });
}

fn visit_expr_tree_mut(expr: &mut ExprNode, f: &mut impl FnMut(&mut ExprNode)) {
    f(expr);
    for child in expr.children_mut() {
        visit_expr_tree_mut(child, f);
    }
}

/// Assign fresh ids to every node in a cloned template subtree. Parent
/// links must be repaired afterwards (`assign_parents_file`).
pub fn renumber_template(template: &mut TemplateNode, ids: &mut IdGenerator) {
    template.base.id = ids.fresh();
    for stmt in &mut template.body {
        renumber_stmt(stmt, ids);
    }
}

/// Assign fresh ids to a cloned statement subtree.
pub fn renumber_stmt(stmt: &mut StmtNode, ids: &mut IdGenerator) {
    stmt.base.id = ids.fresh();
    for expr in stmt.exprs_mut() {
        renumber_expr(expr, ids);
    }
    if let StmtKind::HtmlAttribute(attr) = &mut stmt.kind {
        if let Some(value) = attr.value.as_mut() {
            renumber_stmt(value, ids);
            return;
        }
    }
    for (_, block) in stmt.child_blocks_mut() {
        for child in block.iter_mut() {
            renumber_stmt(child, ids);
        }
    }
}

fn renumber_expr(expr: &mut ExprNode, ids: &mut IdGenerator) {
    expr.base.id = ids.fresh();
    for child in expr.children_mut() {
        renumber_expr(child, ids);
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation::new("t.tpl", 0, 1)
    }

    fn raw(ids: &mut IdGenerator, text: &str) -> StmtNode {
        StmtNode::new(ids.fresh(), loc(), StmtKind::RawText(text.to_string()))
    }

    fn small_fileset(ids: &mut IdGenerator) -> FileSetNode {
        let cond = ExprNode::new(ids.fresh(), loc(), ExprKind::Bool(true));
        let body = vec![raw(ids, "hi")];
        let if_stmt = StmtNode::new(
            ids.fresh(),
            loc(),
            StmtKind::If(IfNode {
                branches: vec![IfBranch { cond, body }],
                else_body: None,
            }),
        );
        let template = TemplateNode {
            base: NodeBase::new(ids.fresh(), loc()),
            kind: TemplateKind::Regular,
            fq_name: "ns.foo".to_string(),
            visibility: Visibility::Public,
            autoescape: AutoescapeMode::Strict,
            content_kind: ContentKind::Html,
            required_css: Vec::new(),
            decls: Vec::new(),
            body: vec![if_stmt],
        };
        let file = FileNode {
            base: NodeBase::new(ids.fresh(), loc()),
            kind: FileKind::Src,
            path: "t.tpl".to_string(),
            namespace: "ns".to_string(),
            templates: vec![template],
        };
        FileSetNode {
            base: NodeBase::new(ids.fresh(), loc()),
            files: vec![file],
        }
    }

    #[test]
    fn assign_parents_makes_tree_consistent() {
        let mut ids = IdGenerator::new();
        let mut fileset = small_fileset(&mut ids);
        assert!(!parent_mismatches(&fileset).is_empty());
        assign_parents(&mut fileset);
        assert!(parent_mismatches(&fileset).is_empty());
    }

    #[test]
    fn collect_ids_sees_every_node() {
        let mut ids = IdGenerator::new();
        let fileset = small_fileset(&mut ids);
        // fileset + file + template + if + cond expr + raw text
        assert_eq!(collect_ids(&fileset).len(), 6);
    }

    #[test]
    fn renumber_allocates_fresh_unique_ids() {
        let mut ids = IdGenerator::new();
        let mut fileset = small_fileset(&mut ids);
        let original: Vec<NodeId> = collect_ids(&fileset);
        let mut clone = fileset.files[0].templates[0].clone();
        renumber_template(&mut clone, &mut ids);
        fileset.files[0].templates.push(clone);
        assign_parents(&mut fileset);

        let all = collect_ids(&fileset);
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), unique.len(), "ids must stay unique after cloning");
        assert_eq!(all.len(), original.len() + 4);
    }

    #[test]
    fn span_to_merges_locations() {
        let a = SourceLocation::new("t.tpl", 2, 5);
        let b = SourceLocation::new("t.tpl", 7, 11);
        let merged = a.span_to(&b);
        use chumsky::span::Span as _;
        assert_eq!(merged.span.start(), 2);
        assert_eq!(merged.span.end(), 11);
    }
}
