// parser.rs — Parser for Tempo .tpl template files.
//
// Consumes the segment stream from the lexer and produces the AST the
// pass pipeline rewrites. Command structure (matching `{if}`/`{/if}`
// pairs, headers, call bodies) is driven directly off the segment
// stream; expression interiors are parsed with chumsky combinators over
// the command token stream.
//
// Preconditions: sources are valid UTF-8; ids come from the fileset's
//   shared IdGenerator.
// Postconditions: returns a FileSetNode with consistent parent links;
//   every syntax problem is recorded in the sink and parsing continues.
// Failure modes: none; syntax errors are diagnostics, a malformed
//   construct is dropped and its block consumed for recovery.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::diag::{codes, DiagCode, Diagnostic, ErrorSink};
use crate::id::IdGenerator;
use crate::lexer::{self, ByteSpan, Segment, Token};
use crate::types::TempoType;

// ── Inputs ──────────────────────────────────────────────────────────────────

/// One template source handed to the parser.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub text: String,
    pub kind: FileKind,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, text: impl Into<String>, kind: FileKind) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
            kind,
        }
    }
}

/// Parse a whole fileset. Files appear in input order; parent links are
/// consistent on return.
pub fn parse_fileset(
    inputs: Vec<SourceFile>,
    ids: &mut IdGenerator,
    sink: &mut ErrorSink,
) -> FileSetNode {
    let base = NodeBase::new(ids.fresh(), SourceLocation::new("<fileset>", 0, 0));
    let mut files = Vec::with_capacity(inputs.len());
    for input in &inputs {
        files.push(parse_file(&input.path, &input.text, input.kind, ids, sink));
    }
    let mut fileset = FileSetNode { base, files };
    assign_parents(&mut fileset);
    fileset
}

/// Parse one template file.
pub fn parse_file(
    path: &str,
    source: &str,
    kind: FileKind,
    ids: &mut IdGenerator,
    sink: &mut ErrorSink,
) -> FileNode {
    let lex_result = lexer::lex(source);
    for err in &lex_result.errors {
        let code = if err.message.contains("unterminated") {
            codes::E0101
        } else {
            codes::E0100
        };
        sink.report(
            Diagnostic::error(
                SourceLocation::new(path, err.span.start, err.span.end),
                err.message.clone(),
            )
            .with_code(code),
        );
    }

    let mut parser = FileParser {
        path,
        source,
        segments: lex_result.segments,
        pos: 0,
        ids,
        sink,
    };
    parser.parse_file_body(kind)
}

// ── Command classification ──────────────────────────────────────────────────

/// A command segment, classified by its leading token.
enum Cmd {
    /// `{/name}`
    Close { name: String, span: ByteSpan },
    /// `{@param ...}` / `{@prop ...}`
    Decl {
        rest: Vec<(Token, ByteSpan)>,
        span: ByteSpan,
    },
    /// `{$...}` — implicit print; carries all interior tokens.
    ImplicitPrint {
        tokens: Vec<(Token, ByteSpan)>,
        span: ByteSpan,
    },
    /// `{name ...}`
    Named {
        name: String,
        rest: Vec<(Token, ByteSpan)>,
        span: ByteSpan,
    },
    /// `{}` or an unclassifiable head.
    Malformed { span: ByteSpan },
}

/// How a block parse ended.
enum BlockEnd {
    /// Consumed a `{/name}` matching a requested closer.
    Close,
    /// Consumed a structural keyword command (`elseif`, `case`, ...).
    Keyword {
        name: String,
        rest: Vec<(Token, ByteSpan)>,
        span: ByteSpan,
    },
    /// Ran out of segments.
    Eof,
}

// ── File parser ─────────────────────────────────────────────────────────────

struct FileParser<'a> {
    path: &'a str,
    source: &'a str,
    segments: Vec<Segment>,
    pos: usize,
    ids: &'a mut IdGenerator,
    sink: &'a mut ErrorSink,
}

impl<'a> FileParser<'a> {
    fn loc(&self, span: ByteSpan) -> SourceLocation {
        SourceLocation::new(self.path, span.start, span.end)
    }

    fn text_of(&self, span: ByteSpan) -> &'a str {
        &self.source[span.start..span.end]
    }

    fn error(&mut self, code: DiagCode, span: ByteSpan, message: impl Into<String>) {
        let loc = self.loc(span);
        self.sink.report(Diagnostic::error(loc, message).with_code(code));
    }

    fn peek(&self) -> Option<&Segment> {
        self.segments.get(self.pos)
    }

    fn bump(&mut self) -> Option<Segment> {
        let seg = self.segments.get(self.pos).cloned();
        if seg.is_some() {
            self.pos += 1;
        }
        seg
    }

    fn classify(&self, tokens: Vec<(Token, ByteSpan)>, span: ByteSpan) -> Cmd {
        match tokens.first() {
            None => Cmd::Malformed { span },
            Some((Token::Slash, _)) => match tokens.get(1) {
                Some((Token::Ident, name_span)) if tokens.len() == 2 => Cmd::Close {
                    name: self.text_of(*name_span).to_string(),
                    span,
                },
                _ => Cmd::Malformed { span },
            },
            Some((Token::At, _)) => Cmd::Decl {
                rest: tokens[1..].to_vec(),
                span,
            },
            Some((Token::Dollar, _)) => Cmd::ImplicitPrint { tokens, span },
            Some((Token::Ident, name_span)) => Cmd::Named {
                name: self.text_of(*name_span).to_string(),
                rest: tokens[1..].to_vec(),
                span,
            },
            Some(_) => Cmd::Malformed { span },
        }
    }

    // ── File level ──────────────────────────────────────────────────────────

    fn parse_file_body(&mut self, kind: FileKind) -> FileNode {
        let file_span = ByteSpan {
            start: 0,
            end: self.source.len(),
        };
        let base = NodeBase::new(self.ids.fresh(), self.loc(file_span));
        let mut namespace = String::new();
        let mut templates = Vec::new();

        while let Some(seg) = self.bump() {
            match seg {
                Segment::RawText { text, span } => {
                    if !text.trim().is_empty() {
                        self.error(codes::E0102, span, "text is not allowed outside templates");
                    }
                }
                Segment::Command { tokens, span } => match self.classify(tokens, span) {
                    Cmd::Named { name, rest, .. } if name == "namespace" => {
                        if !namespace.is_empty() {
                            self.error(codes::E0104, span, "duplicate {namespace} declaration");
                            continue;
                        }
                        match parse_dotted_name(self.source, &rest, 0) {
                            Some((ns, _, next)) if next == rest.len() => namespace = ns,
                            _ => {
                                self.error(codes::E0104, span, "malformed {namespace} declaration")
                            }
                        }
                    }
                    Cmd::Named { name, rest, span }
                        if name == "template" || name == "element" || name == "deltemplate" =>
                    {
                        if namespace.is_empty() {
                            self.error(
                                codes::E0104,
                                span,
                                "{namespace} must be declared before the first template",
                            );
                        }
                        let ns = namespace.clone();
                        if let Some(t) = self.parse_template(&name, &rest, span, &ns) {
                            templates.push(t);
                        }
                    }
                    Cmd::Malformed { span } => {
                        self.error(codes::E0102, span, "malformed command");
                    }
                    Cmd::Close { name, span } => {
                        self.error(codes::E0102, span, format!("unexpected {{/{name}}}"));
                    }
                    _ => {
                        self.error(
                            codes::E0102,
                            span,
                            "only {namespace} and template declarations are allowed at file level",
                        );
                    }
                },
            }
        }

        FileNode {
            base,
            kind,
            path: self.path.to_string(),
            namespace,
            templates,
        }
    }

    // ── Templates ───────────────────────────────────────────────────────────

    fn parse_template(
        &mut self,
        keyword: &str,
        rest: &[(Token, ByteSpan)],
        span: ByteSpan,
        namespace: &str,
    ) -> Option<TemplateNode> {
        let mut idx = 0;

        // Name: `.partial` for template/element, a dotted name for
        // deltemplate.
        let fq_name = if keyword == "deltemplate" {
            match parse_dotted_name(self.source, rest, idx) {
                Some((name, _, next)) => {
                    idx = next;
                    name
                }
                None => {
                    self.error(
                        codes::E0102,
                        span,
                        "expected a delegate name after {deltemplate",
                    );
                    self.consume_block(keyword);
                    return None;
                }
            }
        } else {
            match (rest.first(), rest.get(1)) {
                (Some((Token::Dot, _)), Some((Token::Ident, name_span))) => {
                    idx = 2;
                    format!("{}.{}", namespace, self.text_of(*name_span))
                }
                _ => {
                    self.error(
                        codes::E0102,
                        span,
                        format!("expected .name after {{{keyword}"),
                    );
                    self.consume_block(keyword);
                    return None;
                }
            }
        };

        let attrs = self.parse_attrs(&rest[idx..], span);
        let mut visibility = Visibility::Public;
        let mut autoescape = AutoescapeMode::Strict;
        let mut content_kind = ContentKind::Html;
        let mut required_css = Vec::new();
        let mut variant = None;
        let mut priority = 0u32;
        let mut package = None;

        for (name, value, attr_span) in attrs {
            match name.as_str() {
                "visibility" => match value.as_str() {
                    "public" => visibility = Visibility::Public,
                    "private" => visibility = Visibility::Private,
                    other => self.error(
                        codes::E0102,
                        attr_span,
                        format!("unknown visibility '{other}'"),
                    ),
                },
                "kind" => match ContentKind::parse(&value) {
                    Some(k) => content_kind = k,
                    None => self.error(
                        codes::E0102,
                        attr_span,
                        format!("unknown content kind '{value}'"),
                    ),
                },
                "autoescape" => match value.as_str() {
                    "strict" => autoescape = AutoescapeMode::Strict,
                    "contextual" | "deprecated-contextual" => {
                        autoescape = AutoescapeMode::Contextual
                    }
                    other => self.error(
                        codes::E0102,
                        attr_span,
                        format!("unknown autoescape mode '{other}'"),
                    ),
                },
                "requirecss" => {
                    required_css = value.split(',').map(|s| s.trim().to_string()).collect();
                }
                "variant" if keyword == "deltemplate" => variant = Some(value),
                "package" if keyword == "deltemplate" => package = Some(value),
                "priority" if keyword == "deltemplate" => match value.parse() {
                    Ok(p) => priority = p,
                    Err(_) => self.error(
                        codes::E0102,
                        attr_span,
                        format!("invalid delegate priority '{value}'"),
                    ),
                },
                other => self.error(
                    codes::E0102,
                    attr_span,
                    format!("unknown template attribute '{other}'"),
                ),
            }
        }

        let template_kind = match keyword {
            "element" => TemplateKind::Element,
            "deltemplate" => TemplateKind::Delegate {
                variant,
                priority,
                package,
            },
            _ => TemplateKind::Regular,
        };

        // Header declarations come first, then the body.
        let mut decls = Vec::new();
        loop {
            match self.peek() {
                Some(Segment::Command { tokens, .. })
                    if matches!(tokens.first(), Some((Token::At, _))) =>
                {
                    if let Some(Segment::Command { tokens, span }) = self.bump() {
                        if let Some(decl) = self.parse_decl(&tokens[1..], span) {
                            decls.push(decl);
                        }
                    }
                }
                Some(Segment::RawText { text, .. })
                    if text.trim().is_empty() && self.decl_follows() =>
                {
                    self.bump();
                }
                _ => break,
            }
        }

        let (body, end) = self.parse_block(&[keyword], &[]);
        if matches!(end, BlockEnd::Eof) {
            self.error(codes::E0105, span, format!("unclosed {{{keyword}}} block"));
        }

        Some(TemplateNode {
            base: NodeBase::new(self.ids.fresh(), self.loc(span)),
            kind: template_kind,
            fq_name,
            visibility,
            autoescape,
            content_kind,
            required_css,
            decls,
            body,
        })
    }

    /// Whether the segment after the current whitespace run is another
    /// header declaration (so the whitespace belongs to the header).
    fn decl_follows(&self) -> bool {
        matches!(
            self.segments.get(self.pos + 1),
            Some(Segment::Command { tokens, .. })
                if matches!(tokens.first(), Some((Token::At, _)))
        )
    }

    fn parse_decl(&mut self, rest: &[(Token, ByteSpan)], span: ByteSpan) -> Option<VarDecl> {
        let kind = match rest.first() {
            Some((Token::Ident, kw_span)) => match self.text_of(*kw_span) {
                "param" => DeclKind::Param,
                "prop" => DeclKind::Prop,
                other => {
                    self.error(codes::E0102, span, format!("unknown declaration '@{other}'"));
                    return None;
                }
            },
            _ => {
                self.error(codes::E0102, span, "malformed declaration");
                return None;
            }
        };

        let mut idx = 1;
        let mut required = true;
        if matches!(rest.get(idx), Some((Token::Question, _))) {
            required = false;
            idx += 1;
        }
        let (name, name_span) = match rest.get(idx) {
            Some((Token::Ident, name_span)) => (self.text_of(*name_span).to_string(), *name_span),
            _ => {
                self.error(codes::E0102, span, "expected a name in declaration");
                return None;
            }
        };
        idx += 1;
        if !matches!(rest.get(idx), Some((Token::Colon, _))) {
            self.error(codes::E0102, span, "expected ':' and a type in declaration");
            return None;
        }
        idx += 1;
        let type_text = match (rest.get(idx), rest.last()) {
            (Some((_, first)), Some((_, last))) => {
                self.source[first.start..last.end].to_string()
            }
            _ => {
                self.error(codes::E0102, span, "missing type in declaration");
                return None;
            }
        };

        Some(VarDecl {
            kind,
            name,
            name_span: to_span(name_span),
            type_text,
            ty: TempoType::Unknown,
            required,
        })
    }

    /// Parse an `ident="value"` attribute list.
    fn parse_attrs(
        &mut self,
        tokens: &[(Token, ByteSpan)],
        span: ByteSpan,
    ) -> Vec<(String, String, ByteSpan)> {
        let mut out = Vec::new();
        let mut idx = 0;
        while idx < tokens.len() {
            match (tokens.get(idx), tokens.get(idx + 1), tokens.get(idx + 2)) {
                (
                    Some((Token::Ident, name_span)),
                    Some((Token::Assign, _)),
                    Some((Token::Str(value), value_span)),
                ) => {
                    out.push((
                        self.text_of(*name_span).to_string(),
                        value.clone(),
                        ByteSpan {
                            start: name_span.start,
                            end: value_span.end,
                        },
                    ));
                    idx += 3;
                }
                _ => {
                    self.error(codes::E0102, span, "malformed attribute list");
                    break;
                }
            }
        }
        out
    }

    // ── Blocks ──────────────────────────────────────────────────────────────

    /// Parse statements until a closing command in `closes`, a structural
    /// keyword in `keywords`, or end of input. The terminating segment is
    /// consumed.
    fn parse_block(&mut self, closes: &[&str], keywords: &[&str]) -> (Vec<StmtNode>, BlockEnd) {
        let mut stmts = Vec::new();
        while let Some(seg) = self.bump() {
            match seg {
                Segment::RawText { text, span } => {
                    stmts.push(StmtNode::new(
                        self.ids.fresh(),
                        self.loc(span),
                        StmtKind::RawText(text),
                    ));
                }
                Segment::Command { tokens, span } => match self.classify(tokens, span) {
                    Cmd::Close { name, span } => {
                        if closes.contains(&name.as_str()) {
                            return (stmts, BlockEnd::Close);
                        }
                        self.error(codes::E0102, span, format!("unexpected {{/{name}}}"));
                    }
                    Cmd::Decl { span, .. } => {
                        self.error(
                            codes::E0102,
                            span,
                            "declarations must appear at the start of a template",
                        );
                    }
                    Cmd::ImplicitPrint { tokens, span } => {
                        if let Some(stmt) = self.parse_print_stmt(&tokens, span) {
                            stmts.push(stmt);
                        }
                    }
                    Cmd::Named { name, rest, span } => {
                        if keywords.contains(&name.as_str()) {
                            return (stmts, BlockEnd::Keyword { name, rest, span });
                        }
                        if let Some(stmt) = self.parse_named(&name, &rest, span) {
                            stmts.push(stmt);
                        }
                    }
                    Cmd::Malformed { span } => {
                        self.error(codes::E0102, span, "malformed command");
                    }
                },
            }
        }
        (stmts, BlockEnd::Eof)
    }

    /// Consume segments until `{/keyword}` to recover from a malformed
    /// opening command.
    fn consume_block(&mut self, keyword: &str) {
        let _ = self.parse_block(&[keyword], &[]);
    }

    fn parse_named(
        &mut self,
        name: &str,
        rest: &[(Token, ByteSpan)],
        span: ByteSpan,
    ) -> Option<StmtNode> {
        match name {
            "if" => self.parse_if(rest, span),
            "switch" => self.parse_switch(rest, span),
            "for" => self.parse_for(rest, span),
            "let" => self.parse_let(rest, span),
            "msg" => self.parse_msg(rest, span),
            "call" => self.parse_call(rest, span, false),
            "delcall" => self.parse_call(rest, span, true),
            "velog" => self.parse_velog(rest, span),
            "print" => self.parse_print_stmt(rest, span),
            "sp" => Some(self.raw_stmt(span, " ")),
            "nil" => None,
            "lb" => Some(self.raw_stmt(span, "{")),
            "rb" => Some(self.raw_stmt(span, "}")),
            "elseif" | "else" | "case" | "default" | "ifempty" => {
                self.error(codes::E0102, span, format!("misplaced {{{name}}}"));
                None
            }
            "namespace" | "template" | "deltemplate" | "element" => {
                self.error(
                    codes::E0102,
                    span,
                    format!("{{{name}}} is only allowed at file level"),
                );
                None
            }
            other => {
                self.error(codes::E0102, span, format!("unknown command '{{{other}}}'"));
                None
            }
        }
    }

    fn raw_stmt(&mut self, span: ByteSpan, text: &str) -> StmtNode {
        StmtNode::new(
            self.ids.fresh(),
            self.loc(span),
            StmtKind::RawText(text.to_string()),
        )
    }

    // ── Statements ──────────────────────────────────────────────────────────

    fn parse_if(&mut self, rest: &[(Token, ByteSpan)], span: ByteSpan) -> Option<StmtNode> {
        let id = self.ids.fresh();
        let mut branches = Vec::new();
        let mut else_body = None;
        let mut pending_cond = self.parse_expr_or_err(rest, span);
        loop {
            let (body, end) = self.parse_block(&["if"], &["elseif", "else"]);
            branches.push(IfBranch {
                cond: pending_cond,
                body,
            });
            match end {
                BlockEnd::Keyword {
                    name,
                    rest,
                    span: kspan,
                } if name == "elseif" => {
                    pending_cond = self.parse_expr_or_err(&rest, kspan);
                }
                BlockEnd::Keyword { .. } => {
                    let (ebody, eend) = self.parse_block(&["if"], &[]);
                    if matches!(eend, BlockEnd::Eof) {
                        self.error(codes::E0105, span, "unclosed {if} block");
                    }
                    else_body = Some(ebody);
                    break;
                }
                BlockEnd::Close => break,
                BlockEnd::Eof => {
                    self.error(codes::E0105, span, "unclosed {if} block");
                    break;
                }
            }
        }
        Some(StmtNode::new(
            id,
            self.loc(span),
            StmtKind::If(IfNode {
                branches,
                else_body,
            }),
        ))
    }

    fn parse_switch(&mut self, rest: &[(Token, ByteSpan)], span: ByteSpan) -> Option<StmtNode> {
        let id = self.ids.fresh();
        let scrutinee = self.parse_expr_or_err(rest, span);
        let mut cases = Vec::new();
        let mut default = None;

        // Anything before the first {case} must be whitespace.
        let (lead, mut end) = self.parse_block(&["switch"], &["case", "default"]);
        for stmt in &lead {
            if !matches!(&stmt.kind, StmtKind::RawText(t) if t.trim().is_empty()) {
                let loc = stmt.base.loc.clone();
                self.sink.report(
                    Diagnostic::error(loc, "content is not allowed before the first {case}")
                        .with_code(codes::E0102),
                );
            }
        }

        loop {
            match end {
                BlockEnd::Keyword {
                    name,
                    rest,
                    span: kspan,
                } if name == "case" => {
                    let exprs = self.parse_expr_list_or_err(&rest, kspan);
                    let (body, next) = self.parse_block(&["switch"], &["case", "default"]);
                    cases.push(SwitchCase { exprs, body });
                    end = next;
                }
                BlockEnd::Keyword { span: kspan, .. } => {
                    if default.is_some() {
                        self.error(codes::E0102, kspan, "duplicate {default}");
                    }
                    let (body, next) = self.parse_block(&["switch"], &["case", "default"]);
                    default = Some(body);
                    match next {
                        BlockEnd::Close => break,
                        BlockEnd::Keyword { span: kspan, .. } => {
                            self.error(codes::E0102, kspan, "{case} is not allowed after {default}");
                            let (_, drain) = self.parse_block(&["switch"], &[]);
                            if matches!(drain, BlockEnd::Eof) {
                                self.error(codes::E0105, span, "unclosed {switch} block");
                            }
                            break;
                        }
                        BlockEnd::Eof => {
                            self.error(codes::E0105, span, "unclosed {switch} block");
                            break;
                        }
                    }
                }
                BlockEnd::Close => break,
                BlockEnd::Eof => {
                    self.error(codes::E0105, span, "unclosed {switch} block");
                    break;
                }
            }
        }

        Some(StmtNode::new(
            id,
            self.loc(span),
            StmtKind::Switch(SwitchNode {
                scrutinee,
                cases,
                default,
            }),
        ))
    }

    fn parse_for(&mut self, rest: &[(Token, ByteSpan)], span: ByteSpan) -> Option<StmtNode> {
        let id = self.ids.fresh();
        let (var, var_span) = match (rest.first(), rest.get(1), rest.get(2)) {
            (Some((Token::Dollar, _)), Some((Token::Ident, var_span)), Some((Token::In, _))) => {
                (self.text_of(*var_span).to_string(), *var_span)
            }
            _ => {
                self.error(codes::E0102, span, "expected {for $var in expr}");
                self.consume_block("for");
                return None;
            }
        };
        let seq = self.parse_expr_or_err(&rest[3..], span);

        let (body, end) = self.parse_block(&["for"], &["ifempty"]);
        let mut if_empty = None;
        match end {
            BlockEnd::Keyword { .. } => {
                let (ebody, eend) = self.parse_block(&["for"], &[]);
                if matches!(eend, BlockEnd::Eof) {
                    self.error(codes::E0105, span, "unclosed {for} block");
                }
                if_empty = Some(ebody);
            }
            BlockEnd::Close => {}
            BlockEnd::Eof => self.error(codes::E0105, span, "unclosed {for} block"),
        }

        Some(StmtNode::new(
            id,
            self.loc(span),
            StmtKind::For(ForNode {
                var,
                var_span: to_span(var_span),
                seq,
                body,
                if_empty,
            }),
        ))
    }

    fn parse_let(&mut self, rest: &[(Token, ByteSpan)], span: ByteSpan) -> Option<StmtNode> {
        let id = self.ids.fresh();
        let (var, var_span) = match (rest.first(), rest.get(1)) {
            (Some((Token::Dollar, _)), Some((Token::Ident, var_span))) => {
                (self.text_of(*var_span).to_string(), *var_span)
            }
            _ => {
                self.error(codes::E0102, span, "expected {let $var ...}");
                return None;
            }
        };

        let value = if matches!(rest.get(2), Some((Token::Colon, _))) {
            let (expr_tokens, self_closing) = strip_self_close(&rest[3..]);
            if !self_closing {
                self.error(
                    codes::E0102,
                    span,
                    "expression {let} must be self-closing: {let $x: ... /}",
                );
            }
            LetValue::Expr(self.parse_expr_or_err(expr_tokens, span))
        } else {
            let attrs = self.parse_attrs(&rest[2..], span);
            let mut kind = None;
            for (name, value, attr_span) in attrs {
                match (name.as_str(), ContentKind::parse(&value)) {
                    ("kind", Some(k)) => kind = Some(k),
                    ("kind", None) => self.error(
                        codes::E0102,
                        attr_span,
                        format!("unknown content kind '{value}'"),
                    ),
                    _ => self.error(
                        codes::E0102,
                        attr_span,
                        format!("unknown {{let}} attribute '{name}'"),
                    ),
                }
            }
            let kind = match kind {
                Some(k) => k,
                None => {
                    self.error(codes::E0102, span, "block {let} requires a kind attribute");
                    ContentKind::Text
                }
            };
            let (body, end) = self.parse_block(&["let"], &[]);
            if matches!(end, BlockEnd::Eof) {
                self.error(codes::E0105, span, "unclosed {let} block");
            }
            LetValue::Block { kind, body }
        };

        Some(StmtNode::new(
            id,
            self.loc(span),
            StmtKind::Let(LetNode {
                var,
                var_span: to_span(var_span),
                value,
            }),
        ))
    }

    fn parse_msg(&mut self, rest: &[(Token, ByteSpan)], span: ByteSpan) -> Option<StmtNode> {
        let id = self.ids.fresh();
        let attrs = self.parse_attrs(rest, span);
        let mut desc = None;
        for (name, value, attr_span) in attrs {
            match name.as_str() {
                "desc" => desc = Some(value),
                other => self.error(
                    codes::E0102,
                    attr_span,
                    format!("unknown {{msg}} attribute '{other}'"),
                ),
            }
        }
        let desc = match desc {
            Some(d) => d,
            None => {
                self.error(codes::E0102, span, "{msg} requires a desc attribute");
                String::new()
            }
        };
        let (children, end) = self.parse_block(&["msg"], &[]);
        if matches!(end, BlockEnd::Eof) {
            self.error(codes::E0105, span, "unclosed {msg} block");
        }
        Some(StmtNode::new(
            id,
            self.loc(span),
            StmtKind::Msg(MsgNode { desc, children }),
        ))
    }

    fn parse_call(
        &mut self,
        rest: &[(Token, ByteSpan)],
        span: ByteSpan,
        delegate: bool,
    ) -> Option<StmtNode> {
        let id = self.ids.fresh();
        let keyword = if delegate { "delcall" } else { "call" };
        let (head, self_closing) = strip_self_close(rest);

        let (name, idx) = if !delegate && matches!(head.first(), Some((Token::Dot, _))) {
            match head.get(1) {
                Some((Token::Ident, name_span)) => {
                    (format!(".{}", self.text_of(*name_span)), 2)
                }
                _ => {
                    self.error(codes::E0102, span, format!("expected a name after {{{keyword}"));
                    if !self_closing {
                        self.consume_block(keyword);
                    }
                    return None;
                }
            }
        } else {
            match parse_dotted_name(self.source, head, 0) {
                Some((name, _, next)) => (name, next),
                None => {
                    self.error(codes::E0102, span, format!("expected a name after {{{keyword}"));
                    if !self_closing {
                        self.consume_block(keyword);
                    }
                    return None;
                }
            }
        };

        let mut variant = None;
        let attrs = self.parse_attrs(&head[idx..], span);
        for (name, value, attr_span) in attrs {
            match name.as_str() {
                "variant" if delegate => variant = Some(value),
                other => self.error(
                    codes::E0102,
                    attr_span,
                    format!("unknown {{{keyword}}} attribute '{other}'"),
                ),
            }
        }

        let params = if self_closing {
            Vec::new()
        } else {
            self.parse_call_params(span, keyword)
        };

        let target = if delegate {
            CallTarget::Delegate { name, variant }
        } else {
            CallTarget::Template {
                name,
                resolved: None,
            }
        };

        Some(StmtNode::new(
            id,
            self.loc(span),
            StmtKind::Call(CallNode { target, params }),
        ))
    }

    fn parse_call_params(&mut self, call_span: ByteSpan, keyword: &str) -> Vec<CallParam> {
        let mut params = Vec::new();
        while let Some(seg) = self.bump() {
            match seg {
                Segment::RawText { text, span } => {
                    if !text.trim().is_empty() {
                        self.error(
                            codes::E0102,
                            span,
                            format!("only {{param}} is allowed inside {{{keyword}}}"),
                        );
                    }
                }
                Segment::Command { tokens, span } => match self.classify(tokens, span) {
                    Cmd::Close { name, span } => {
                        if name == keyword {
                            return params;
                        }
                        self.error(codes::E0102, span, format!("unexpected {{/{name}}}"));
                    }
                    Cmd::Named { name, rest, span } if name == "param" => {
                        if let Some(p) = self.parse_call_param(&rest, span) {
                            params.push(p);
                        }
                    }
                    _ => {
                        self.error(
                            codes::E0102,
                            span,
                            format!("only {{param}} is allowed inside {{{keyword}}}"),
                        );
                    }
                },
            }
        }
        self.error(
            codes::E0105,
            call_span,
            format!("unclosed {{{keyword}}} block"),
        );
        params
    }

    fn parse_call_param(
        &mut self,
        rest: &[(Token, ByteSpan)],
        span: ByteSpan,
    ) -> Option<CallParam> {
        let (name, name_span) = match rest.first() {
            Some((Token::Ident, name_span)) => {
                (self.text_of(*name_span).to_string(), *name_span)
            }
            _ => {
                self.error(codes::E0102, span, "expected a name after {param");
                return None;
            }
        };

        if matches!(rest.get(1), Some((Token::Colon, _))) {
            let (expr_tokens, self_closing) = strip_self_close(&rest[2..]);
            if !self_closing {
                self.error(
                    codes::E0102,
                    span,
                    "expression {param} must be self-closing: {param x: ... /}",
                );
            }
            let expr = self.parse_expr_or_err(expr_tokens, span);
            return Some(CallParam {
                name,
                name_span: to_span(name_span),
                value: CallParamValue::Expr(expr),
            });
        }

        let attrs = self.parse_attrs(&rest[1..], span);
        let mut kind = ContentKind::Html;
        for (attr_name, value, attr_span) in attrs {
            match (attr_name.as_str(), ContentKind::parse(&value)) {
                ("kind", Some(k)) => kind = k,
                ("kind", None) => self.error(
                    codes::E0102,
                    attr_span,
                    format!("unknown content kind '{value}'"),
                ),
                _ => self.error(
                    codes::E0102,
                    attr_span,
                    format!("unknown {{param}} attribute '{attr_name}'"),
                ),
            }
        }
        let (body, end) = self.parse_block(&["param"], &[]);
        if matches!(end, BlockEnd::Eof) {
            self.error(codes::E0105, span, "unclosed {param} block");
        }
        Some(CallParam {
            name,
            name_span: to_span(name_span),
            value: CallParamValue::Block { kind, body },
        })
    }

    fn parse_velog(&mut self, rest: &[(Token, ByteSpan)], span: ByteSpan) -> Option<StmtNode> {
        let id = self.ids.fresh();
        let (name, name_span) = match parse_dotted_name(self.source, rest, 0) {
            Some((name, name_span, next)) if next == rest.len() => (name, name_span),
            _ => {
                self.error(codes::E0102, span, "expected an element name after {velog");
                self.consume_block("velog");
                return None;
            }
        };
        let (children, end) = self.parse_block(&["velog"], &[]);
        if matches!(end, BlockEnd::Eof) {
            self.error(codes::E0105, span, "unclosed {velog} block");
        }
        Some(StmtNode::new(
            id,
            self.loc(span),
            StmtKind::VeLog(VeLogNode {
                name,
                name_span: to_span(name_span),
                children,
            }),
        ))
    }

    fn parse_print_stmt(
        &mut self,
        tokens: &[(Token, ByteSpan)],
        span: ByteSpan,
    ) -> Option<StmtNode> {
        if tokens.is_empty() {
            self.error(codes::E0103, span, "expected an expression to print");
            return None;
        }
        let id = self.ids.fresh();
        let end_off = tokens.last().map(|(_, s)| s.end).unwrap_or(span.end);
        let iter = tokens
            .to_vec()
            .into_iter()
            .map(|(t, s)| (t, SimpleSpan::from(s.start..s.end)));
        let eoi: SimpleSpan = (end_off..end_off).into();
        let stream = Stream::from_iter(iter).map(eoi, |(t, s): (_, _)| (t, s));
        let parser = print_parser(self.source);
        let (out, errors) = parser.parse(stream).into_output_errors();
        self.report_expr_errors(errors);
        let print = out?;
        let expr = self.lower_expr(print.expr);
        let directives = print
            .directives
            .into_iter()
            .map(|d| PrintDirective {
                name: d.name,
                args: d.args.into_iter().map(|a| self.lower_expr(a)).collect(),
                span: d.span,
            })
            .collect();
        Some(StmtNode::new(
            id,
            self.loc(span),
            StmtKind::Print(PrintNode { expr, directives }),
        ))
    }

    // ── Expressions ─────────────────────────────────────────────────────────

    /// Parse an expression from command tokens; on failure the errors are
    /// already reported and a null literal stands in so the surrounding
    /// structure survives.
    fn parse_expr_or_err(&mut self, tokens: &[(Token, ByteSpan)], fallback: ByteSpan) -> ExprNode {
        if tokens.is_empty() {
            self.error(codes::E0103, fallback, "expected an expression");
            return self.null_expr(fallback);
        }
        let end_off = tokens.last().map(|(_, s)| s.end).unwrap_or(fallback.end);
        let iter = tokens
            .to_vec()
            .into_iter()
            .map(|(t, s)| (t, SimpleSpan::from(s.start..s.end)));
        let eoi: SimpleSpan = (end_off..end_off).into();
        let stream = Stream::from_iter(iter).map(eoi, |(t, s): (_, _)| (t, s));
        let parser = expr_parser(self.source).then_ignore(end());
        let (out, errors) = parser.parse(stream).into_output_errors();
        self.report_expr_errors(errors);
        match out {
            Some(p) => self.lower_expr(p),
            None => self.null_expr(fallback),
        }
    }

    /// Parse a comma-separated expression list (switch case labels).
    fn parse_expr_list_or_err(
        &mut self,
        tokens: &[(Token, ByteSpan)],
        fallback: ByteSpan,
    ) -> Vec<ExprNode> {
        if tokens.is_empty() {
            self.error(codes::E0103, fallback, "expected case expressions");
            return Vec::new();
        }
        let end_off = tokens.last().map(|(_, s)| s.end).unwrap_or(fallback.end);
        let iter = tokens
            .to_vec()
            .into_iter()
            .map(|(t, s)| (t, SimpleSpan::from(s.start..s.end)));
        let eoi: SimpleSpan = (end_off..end_off).into();
        let stream = Stream::from_iter(iter).map(eoi, |(t, s): (_, _)| (t, s));
        let parser = expr_parser(self.source)
            .separated_by(just(Token::Comma))
            .at_least(1)
            .collect::<Vec<_>>()
            .then_ignore(end());
        let (out, errors) = parser.parse(stream).into_output_errors();
        self.report_expr_errors(errors);
        out.map(|exprs| exprs.into_iter().map(|p| self.lower_expr(p)).collect())
            .unwrap_or_default()
    }

    fn report_expr_errors(&mut self, errors: Vec<Rich<'_, Token, SimpleSpan>>) {
        for e in errors {
            let span = e.span();
            self.sink.report(
                Diagnostic::error(
                    SourceLocation::new(self.path, span.start, span.end),
                    format!("expression syntax error: {}", e),
                )
                .with_code(codes::E0103),
            );
        }
    }

    fn null_expr(&mut self, span: ByteSpan) -> ExprNode {
        ExprNode::new(self.ids.fresh(), self.loc(span), ExprKind::Null)
    }

    fn lower_expr(&mut self, p: PExpr) -> ExprNode {
        let loc = SourceLocation::from_span(self.path, p.span);
        let kind = match p.kind {
            PExprKind::Null => ExprKind::Null,
            PExprKind::Bool(b) => ExprKind::Bool(b),
            PExprKind::Int(n) => ExprKind::Int(n),
            PExprKind::Float(x) => ExprKind::Float(x),
            PExprKind::Str(s) => ExprKind::Str(s),
            PExprKind::List(items) => {
                ExprKind::List(items.into_iter().map(|i| self.lower_expr(i)).collect())
            }
            PExprKind::Var(name) => ExprKind::Var { name, defn: None },
            PExprKind::Global(name) => ExprKind::Global { name },
            PExprKind::Not(inner) => ExprKind::Not(Box::new(self.lower_expr(*inner))),
            PExprKind::Neg(inner) => ExprKind::Neg(Box::new(self.lower_expr(*inner))),
            PExprKind::Binary(op, lhs, rhs) => ExprKind::Binary {
                op,
                lhs: Box::new(self.lower_expr(*lhs)),
                rhs: Box::new(self.lower_expr(*rhs)),
            },
            PExprKind::Conditional(cond, then, otherwise) => ExprKind::Conditional {
                cond: Box::new(self.lower_expr(*cond)),
                then: Box::new(self.lower_expr(*then)),
                otherwise: Box::new(self.lower_expr(*otherwise)),
            },
            PExprKind::Call(name, args) => ExprKind::Call {
                name,
                args: args.into_iter().map(|a| self.lower_expr(a)).collect(),
            },
            PExprKind::V1(text) => ExprKind::V1Expression(text),
        };
        ExprNode::new(self.ids.fresh(), loc, kind)
    }
}

// ── Free helpers ────────────────────────────────────────────────────────────

fn to_span(span: ByteSpan) -> Span {
    use chumsky::span::Span as _;
    Span::new((), span.start..span.end)
}

fn strip_self_close(tokens: &[(Token, ByteSpan)]) -> (&[(Token, ByteSpan)], bool) {
    match tokens.last() {
        Some((Token::Slash, _)) => (&tokens[..tokens.len() - 1], true),
        _ => (tokens, false),
    }
}

/// Parse a dotted name (`a.b.c`) from `tokens` starting at `start`.
/// Returns (name, span, next index).
fn parse_dotted_name(
    source: &str,
    tokens: &[(Token, ByteSpan)],
    start: usize,
) -> Option<(String, ByteSpan, usize)> {
    let (first_tok, first_span) = tokens.get(start)?;
    if !matches!(first_tok, Token::Ident) {
        return None;
    }
    let mut name = source[first_span.start..first_span.end].to_string();
    let mut span = *first_span;
    let mut idx = start + 1;
    while matches!(tokens.get(idx), Some((Token::Dot, _))) {
        match tokens.get(idx + 1) {
            Some((Token::Ident, seg_span)) => {
                name.push('.');
                name.push_str(&source[seg_span.start..seg_span.end]);
                span.end = seg_span.end;
                idx += 2;
            }
            _ => return None,
        }
    }
    Some((name, span, idx))
}

// ── Expression grammar (chumsky) ────────────────────────────────────────────

#[derive(Debug, Clone)]
struct PExpr {
    span: SimpleSpan,
    kind: PExprKind,
}

#[derive(Debug, Clone)]
enum PExprKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<PExpr>),
    Var(String),
    Global(String),
    Not(Box<PExpr>),
    Neg(Box<PExpr>),
    Binary(BinOp, Box<PExpr>, Box<PExpr>),
    Conditional(Box<PExpr>, Box<PExpr>, Box<PExpr>),
    Call(String, Vec<PExpr>),
    V1(String),
}

#[derive(Debug, Clone)]
struct PDirective {
    name: String,
    args: Vec<PExpr>,
    span: SimpleSpan,
}

#[derive(Debug, Clone)]
struct PPrint {
    expr: PExpr,
    directives: Vec<PDirective>,
}

fn bin(op: BinOp, lhs: PExpr, rhs: PExpr, span: SimpleSpan) -> PExpr {
    PExpr {
        span,
        kind: PExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
    }
}

fn expr_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, PExpr, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    recursive(|expr: Recursive<dyn Parser<'tokens, I, PExpr, extra::Err<Rich<'tokens, Token, SimpleSpan>>>>| {
        let ident_text = just(Token::Ident).map_with(move |_, e| {
            let span: SimpleSpan = e.span();
            source[span.start()..span.end()].to_string()
        });

        let literal = select! {
            Token::Null = e => PExpr { span: e.span(), kind: PExprKind::Null },
            Token::True = e => PExpr { span: e.span(), kind: PExprKind::Bool(true) },
            Token::False = e => PExpr { span: e.span(), kind: PExprKind::Bool(false) },
            Token::Int(n) = e => PExpr { span: e.span(), kind: PExprKind::Int(n) },
            Token::Float(x) = e => PExpr { span: e.span(), kind: PExprKind::Float(x) },
            Token::Str(s) = e => PExpr { span: e.span(), kind: PExprKind::Str(s) },
        };

        let var = just(Token::Dollar)
            .ignore_then(ident_text.clone())
            .map_with(|name, e| PExpr {
                span: e.span(),
                kind: PExprKind::Var(name),
            });

        let dotted = ident_text.clone().foldl(
            just(Token::Dot).ignore_then(ident_text.clone()).repeated(),
            |mut acc, seg| {
                acc.push('.');
                acc.push_str(&seg);
                acc
            },
        );

        let call_args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let call_or_global = dotted.then(call_args.or_not()).map_with(|(name, args), e| {
            let span: SimpleSpan = e.span();
            match args {
                Some(args) => {
                    if name == "v1Expression" && args.len() == 1 {
                        if let PExprKind::Str(s) = &args[0].kind {
                            return PExpr {
                                span,
                                kind: PExprKind::V1(s.clone()),
                            };
                        }
                    }
                    PExpr {
                        span,
                        kind: PExprKind::Call(name, args),
                    }
                }
                None => PExpr {
                    span,
                    kind: PExprKind::Global(name),
                },
            }
        });

        let list = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map_with(|items, e| PExpr {
                span: e.span(),
                kind: PExprKind::List(items),
            });

        let paren = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let atom = literal.or(var).or(list).or(paren).or(call_or_global);

        let unary_op = just(Token::Not).to(true).or(just(Token::Minus).to(false));
        let unary = unary_op.repeated().foldr_with(atom, |is_not, inner, e| {
            let span: SimpleSpan = e.span();
            PExpr {
                span,
                kind: if is_not {
                    PExprKind::Not(Box::new(inner))
                } else {
                    PExprKind::Neg(Box::new(inner))
                },
            }
        });

        let product_op = just(Token::Star)
            .to(BinOp::Mul)
            .or(just(Token::Slash).to(BinOp::Div))
            .or(just(Token::Percent).to(BinOp::Mod));
        let product = unary.clone().foldl_with(
            product_op.then(unary).repeated(),
            |lhs, (op, rhs), e| bin(op, lhs, rhs, e.span()),
        );

        let sum_op = just(Token::Plus)
            .to(BinOp::Add)
            .or(just(Token::Minus).to(BinOp::Sub));
        let sum = product.clone().foldl_with(
            sum_op.then(product).repeated(),
            |lhs, (op, rhs), e| bin(op, lhs, rhs, e.span()),
        );

        let cmp_op = just(Token::EqEq)
            .to(BinOp::Eq)
            .or(just(Token::NotEq).to(BinOp::Ne))
            .or(just(Token::Le).to(BinOp::Le))
            .or(just(Token::Ge).to(BinOp::Ge))
            .or(just(Token::Lt).to(BinOp::Lt))
            .or(just(Token::Gt).to(BinOp::Gt));
        let comparison = sum
            .clone()
            .foldl_with(cmp_op.then(sum).repeated(), |lhs, (op, rhs), e| {
                bin(op, lhs, rhs, e.span())
            });

        let conjunction = comparison.clone().foldl_with(
            just(Token::And).to(BinOp::And).then(comparison).repeated(),
            |lhs, (op, rhs), e| bin(op, lhs, rhs, e.span()),
        );

        let disjunction = conjunction.clone().foldl_with(
            just(Token::Or).to(BinOp::Or).then(conjunction).repeated(),
            |lhs, (op, rhs), e| bin(op, lhs, rhs, e.span()),
        );

        let ternary = disjunction
            .clone()
            .then(
                just(Token::Question)
                    .ignore_then(expr.clone())
                    .then_ignore(just(Token::Colon))
                    .then(expr.clone())
                    .or_not(),
            )
            .map_with(|(cond, rest), e| match rest {
                Some((then, otherwise)) => PExpr {
                    span: e.span(),
                    kind: PExprKind::Conditional(
                        Box::new(cond),
                        Box::new(then),
                        Box::new(otherwise),
                    ),
                },
                None => cond,
            });

        ternary
    })
}

fn print_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, PPrint, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let expr = expr_parser(source);
    let ident_text = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        source[span.start()..span.end()].to_string()
    });
    let directive = just(Token::Pipe)
        .ignore_then(ident_text)
        .then(
            just(Token::Colon)
                .ignore_then(
                    expr.clone()
                        .separated_by(just(Token::Comma))
                        .at_least(1)
                        .collect::<Vec<_>>(),
                )
                .or_not(),
        )
        .map_with(|(name, args), e| PDirective {
            name,
            args: args.unwrap_or_default(),
            span: e.span(),
        });
    expr.then(directive.repeated().collect::<Vec<_>>())
        .then_ignore(end())
        .map(|(expr, directives)| PPrint { expr, directives })
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;

    fn parse_one(src: &str) -> (FileSetNode, ErrorSink) {
        let mut ids = IdGenerator::new();
        let mut sink = ErrorSink::new();
        let fileset = parse_fileset(
            vec![SourceFile::new("test.tpl", src, FileKind::Src)],
            &mut ids,
            &mut sink,
        );
        (fileset, sink)
    }

    fn parse_ok(src: &str) -> FileSetNode {
        let (fileset, sink) = parse_one(src);
        assert!(
            !sink.has_errors(),
            "unexpected parse errors: {:#?}",
            sink.diagnostics()
        );
        fileset
    }

    fn only_template(fileset: &FileSetNode) -> &TemplateNode {
        assert_eq!(fileset.files.len(), 1);
        assert_eq!(fileset.files[0].templates.len(), 1);
        &fileset.files[0].templates[0]
    }

    #[test]
    fn namespace_and_template() {
        let fileset = parse_ok("{namespace ns}\n{template .foo}Hello{/template}\n");
        let file = &fileset.files[0];
        assert_eq!(file.namespace, "ns");
        let t = only_template(&fileset);
        assert_eq!(t.fq_name, "ns.foo");
        assert_eq!(t.kind, TemplateKind::Regular);
        assert_eq!(t.body.len(), 1);
        assert!(matches!(&t.body[0].kind, StmtKind::RawText(s) if s == "Hello"));
    }

    #[test]
    fn template_attributes() {
        let fileset = parse_ok(
            "{namespace ns}\n{template .foo visibility=\"private\" kind=\"text\"}x{/template}\n",
        );
        let t = only_template(&fileset);
        assert_eq!(t.visibility, Visibility::Private);
        assert_eq!(t.content_kind, ContentKind::Text);
    }

    #[test]
    fn if_else_structure() {
        let fileset =
            parse_ok("{namespace ns}\n{template .foo}{if true}hi{elseif false}mid{else}lo{/if}{/template}\n");
        let t = only_template(&fileset);
        let body: Vec<_> = t
            .body
            .iter()
            .filter(|s| !matches!(&s.kind, StmtKind::RawText(t) if t.trim().is_empty()))
            .collect();
        assert_eq!(body.len(), 1);
        match &body[0].kind {
            StmtKind::If(n) => {
                assert_eq!(n.branches.len(), 2);
                assert!(matches!(n.branches[0].cond.kind, ExprKind::Bool(true)));
                assert!(matches!(n.branches[1].cond.kind, ExprKind::Bool(false)));
                assert!(n.else_body.is_some());
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn implicit_and_explicit_print() {
        let fileset =
            parse_ok("{namespace ns}\n{template .foo}{$name}{print $name}{/template}\n");
        let t = only_template(&fileset);
        let prints: Vec<_> = t
            .body
            .iter()
            .filter(|s| matches!(&s.kind, StmtKind::Print(_)))
            .collect();
        assert_eq!(prints.len(), 2);
        for p in prints {
            match &p.kind {
                StmtKind::Print(n) => {
                    assert!(matches!(&n.expr.kind, ExprKind::Var { name, .. } if name == "name"))
                }
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn print_directives() {
        let fileset = parse_ok("{namespace ns}\n{template .foo}{$x|escapeUri|truncate:8,true}{/template}\n");
        let t = only_template(&fileset);
        match &t.body[0].kind {
            StmtKind::Print(n) => {
                assert_eq!(n.directives.len(), 2);
                assert_eq!(n.directives[0].name, "escapeUri");
                assert!(n.directives[0].args.is_empty());
                assert_eq!(n.directives[1].name, "truncate");
                assert_eq!(n.directives[1].args.len(), 2);
            }
            other => panic!("expected print, got {:?}", other),
        }
    }

    #[test]
    fn expression_precedence() {
        let fileset = parse_ok("{namespace ns}\n{template .foo}{$a + 2 * 3}{/template}\n");
        let t = only_template(&fileset);
        match &t.body[0].kind {
            StmtKind::Print(n) => match &n.expr.kind {
                ExprKind::Binary { op, rhs, .. } => {
                    assert_eq!(*op, BinOp::Add);
                    assert!(matches!(
                        rhs.kind,
                        ExprKind::Binary { op: BinOp::Mul, .. }
                    ));
                }
                other => panic!("expected binary add, got {:?}", other),
            },
            other => panic!("expected print, got {:?}", other),
        }
    }

    #[test]
    fn header_declarations() {
        let fileset = parse_ok(
            "{namespace ns}\n{template .foo}\n{@param name: string}\n{@param? age: int}\nx{/template}\n",
        );
        let t = only_template(&fileset);
        assert_eq!(t.decls.len(), 2);
        assert_eq!(t.decls[0].name, "name");
        assert!(t.decls[0].required);
        assert_eq!(t.decls[0].type_text, "string");
        assert_eq!(t.decls[1].name, "age");
        assert!(!t.decls[1].required);
    }

    #[test]
    fn element_with_prop() {
        let fileset =
            parse_ok("{namespace ns}\n{element .btn}\n{@prop label: string}\nx{/element}\n");
        let t = only_template(&fileset);
        assert_eq!(t.kind, TemplateKind::Element);
        assert_eq!(t.decls[0].kind, DeclKind::Prop);
    }

    #[test]
    fn call_with_params() {
        let fileset = parse_ok(
            "{namespace ns}\n{template .foo}{call .bar}{param x: 1 /}{param y kind=\"text\"}hi{/param}{/call}{/template}\n",
        );
        let t = only_template(&fileset);
        match &t.body[0].kind {
            StmtKind::Call(n) => {
                assert!(matches!(&n.target, CallTarget::Template { name, .. } if name == ".bar"));
                assert_eq!(n.params.len(), 2);
                assert!(matches!(n.params[0].value, CallParamValue::Expr(_)));
                assert!(matches!(
                    n.params[1].value,
                    CallParamValue::Block {
                        kind: ContentKind::Text,
                        ..
                    }
                ));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn self_closing_call() {
        let fileset = parse_ok("{namespace ns}\n{template .foo}{call .bar /}{/template}\n");
        let t = only_template(&fileset);
        assert!(matches!(&t.body[0].kind, StmtKind::Call(n) if n.params.is_empty()));
    }

    #[test]
    fn delcall_with_variant() {
        let fileset = parse_ok(
            "{namespace ns}\n{template .foo}{delcall ui.button variant=\"compact\" /}{/template}\n",
        );
        let t = only_template(&fileset);
        match &t.body[0].kind {
            StmtKind::Call(n) => match &n.target {
                CallTarget::Delegate { name, variant } => {
                    assert_eq!(name, "ui.button");
                    assert_eq!(variant.as_deref(), Some("compact"));
                }
                other => panic!("expected delegate target, got {:?}", other),
            },
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn deltemplate_parses() {
        let fileset = parse_ok(
            "{namespace ns}\n{deltemplate ui.button variant=\"compact\" priority=\"1\"}x{/deltemplate}\n",
        );
        let t = only_template(&fileset);
        assert_eq!(t.fq_name, "ui.button");
        assert_eq!(
            t.kind,
            TemplateKind::Delegate {
                variant: Some("compact".to_string()),
                priority: 1,
                package: None,
            }
        );
        assert!(t.kind.is_default_delegate());
    }

    #[test]
    fn deltemplate_package_marks_override() {
        let fileset = parse_ok(
            "{namespace ns}\n{deltemplate ui.button package=\"experiment\" priority=\"1\"}x{/deltemplate}\n",
        );
        let t = only_template(&fileset);
        assert_eq!(
            t.kind,
            TemplateKind::Delegate {
                variant: None,
                priority: 1,
                package: Some("experiment".to_string()),
            }
        );
        assert!(!t.kind.is_default_delegate());
    }

    #[test]
    fn msg_block() {
        let fileset =
            parse_ok("{namespace ns}\n{template .foo}{msg desc=\"greeting\"}Hello {$name}{/msg}{/template}\n");
        let t = only_template(&fileset);
        match &t.body[0].kind {
            StmtKind::Msg(n) => {
                assert_eq!(n.desc, "greeting");
                assert_eq!(n.children.len(), 2);
                assert!(matches!(&n.children[0].kind, StmtKind::RawText(s) if s == "Hello "));
                assert!(matches!(&n.children[1].kind, StmtKind::Print(_)));
            }
            other => panic!("expected msg, got {:?}", other),
        }
    }

    #[test]
    fn for_with_ifempty() {
        let fileset = parse_ok(
            "{namespace ns}\n{template .foo}{for $x in $items}{$x}{ifempty}none{/for}{/template}\n",
        );
        let t = only_template(&fileset);
        match &t.body[0].kind {
            StmtKind::For(n) => {
                assert_eq!(n.var, "x");
                assert!(n.if_empty.is_some());
            }
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn let_forms() {
        let fileset = parse_ok(
            "{namespace ns}\n{template .foo}{let $a: 1 + 2 /}{let $b kind=\"text\"}hi{/let}{/template}\n",
        );
        let t = only_template(&fileset);
        assert!(matches!(
            &t.body[0].kind,
            StmtKind::Let(LetNode { value: LetValue::Expr(_), .. })
        ));
        assert!(matches!(
            &t.body[1].kind,
            StmtKind::Let(LetNode { value: LetValue::Block { kind: ContentKind::Text, .. }, .. })
        ));
    }

    #[test]
    fn switch_cases() {
        let fileset = parse_ok(
            "{namespace ns}\n{template .foo}{switch $x}{case 1, 2}a{case 3}b{default}c{/switch}{/template}\n",
        );
        let t = only_template(&fileset);
        match &t.body[0].kind {
            StmtKind::Switch(n) => {
                assert_eq!(n.cases.len(), 2);
                assert_eq!(n.cases[0].exprs.len(), 2);
                assert!(n.default.is_some());
            }
            other => panic!("expected switch, got {:?}", other),
        }
    }

    #[test]
    fn velog_block() {
        let fileset =
            parse_ok("{namespace ns}\n{template .foo}{velog ui.Button}<b>x</b>{/velog}{/template}\n");
        let t = only_template(&fileset);
        assert!(matches!(&t.body[0].kind, StmtKind::VeLog(n) if n.name == "ui.Button"));
    }

    #[test]
    fn specials_produce_raw_text() {
        let fileset = parse_ok("{namespace ns}\n{template .foo}{lb}{sp}{rb}{/template}\n");
        let t = only_template(&fileset);
        let texts: Vec<_> = t
            .body
            .iter()
            .filter_map(|s| match &s.kind {
                StmtKind::RawText(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["{", " ", "}"]);
    }

    #[test]
    fn undefined_variable_still_parses() {
        let (fileset, sink) = parse_one("{namespace ns}\n{template .foo}{$x}{/template}\n");
        assert!(!sink.has_errors());
        assert_eq!(only_template(&fileset).body.len(), 1);
    }

    #[test]
    fn unclosed_template_reports() {
        let (_, sink) = parse_one("{namespace ns}\n{template .foo}hello");
        assert!(sink.has_errors());
        assert!(sink
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("unclosed {template}")));
    }

    #[test]
    fn missing_namespace_reports() {
        let (_, sink) = parse_one("{template .foo}x{/template}");
        assert!(sink
            .diagnostics()
            .iter()
            .any(|d| d.code == Some(codes::E0104)));
    }

    #[test]
    fn expression_error_recovers() {
        let (fileset, sink) = parse_one("{namespace ns}\n{template .foo}{if + +}x{/if}{/template}\n");
        assert!(sink.has_errors());
        // Structure survives: the if block is still present.
        let t = only_template(&fileset);
        assert!(t.body.iter().any(|s| matches!(&s.kind, StmtKind::If(_))));
    }

    #[test]
    fn parents_consistent_after_parse() {
        let fileset = parse_ok(
            "{namespace ns}\n{template .foo}{if $a}{for $x in $xs}{$x}{/for}{/if}{/template}\n",
        );
        assert!(ast::parent_mismatches(&fileset).is_empty());
    }

    #[test]
    fn ids_unique_after_parse() {
        let fileset = parse_ok(
            "{namespace ns}\n{template .foo}{if $a}{$a}{else}{$b}{/if}{/template}\n{template .bar}x{/template}\n",
        );
        let all = ast::collect_ids(&fileset);
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), unique.len());
    }

    #[test]
    fn v1_expression_literal() {
        let fileset =
            parse_ok("{namespace ns}\n{template .foo}{print v1Expression('$a.b')}{/template}\n");
        let t = only_template(&fileset);
        match &t.body[0].kind {
            StmtKind::Print(n) => {
                assert!(matches!(&n.expr.kind, ExprKind::V1Expression(s) if s == "$a.b"))
            }
            other => panic!("expected print, got {:?}", other),
        }
    }
}
