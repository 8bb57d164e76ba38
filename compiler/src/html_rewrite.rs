// html_rewrite.rs — HTML rewriting and strict-HTML validation.
//
// HtmlRewrite scans raw text inside templates whose content kind is
// HTML and partitions it into tag-open / tag-close / attribute /
// attribute-value / text nodes. A tag may be split across commands
// (`<a href="{$url}">`), so scanning state carries over between raw
// text siblings: command nodes encountered mid-tag become dynamic
// attribute content, command nodes inside a quoted value become value
// children. Must run before any pass that depends on HTML structure.
//
// ValidateStrictHtml checks tag balance per template. The classic
// matcher walks the whole template linearly; the `new_html_matcher`
// experiment requires every block (each branch of a conditional) to
// balance on its own.

use crate::ast::*;
use crate::diag::{codes, Diagnostic, ErrorSink};
use crate::id::IdGenerator;
use crate::pass::{FilePass, PassId};

/// Tags with no close pair.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

pub fn is_void_element(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name.to_ascii_lowercase().as_str())
}

// ── HtmlRewrite ─────────────────────────────────────────────────────────────

pub struct HtmlRewritePass;

impl FilePass for HtmlRewritePass {
    fn id(&self) -> PassId {
        PassId::HtmlRewrite
    }

    fn run(&mut self, file: &mut FileNode, ids: &mut IdGenerator, sink: &mut ErrorSink) {
        let path = file.path.clone();
        for template in &mut file.templates {
            if template.content_kind != ContentKind::Html {
                continue;
            }
            let mut rewriter = Rewriter {
                path: &path,
                ids,
                sink,
            };
            let body = std::mem::take(&mut template.body);
            template.body = rewriter.rewrite_block(body);
        }
        assign_parents_file(file);
    }
}

struct TagBuilder {
    name: String,
    start: usize,
    attrs: Vec<StmtNode>,
}

struct AttrBuilder {
    name: String,
    start: usize,
    quote: u8,
    children: Vec<StmtNode>,
}

enum Mode {
    Text,
    Tag(TagBuilder),
    AttrValue(TagBuilder, AttrBuilder),
}

struct Rewriter<'a> {
    path: &'a str,
    ids: &'a mut IdGenerator,
    sink: &'a mut ErrorSink,
}

impl<'a> Rewriter<'a> {
    fn loc(&self, start: usize, end: usize) -> SourceLocation {
        SourceLocation::new(self.path, start, end)
    }

    fn raw(&mut self, start: usize, end: usize, text: &str) -> StmtNode {
        StmtNode::new(
            self.ids.fresh(),
            self.loc(start, end),
            StmtKind::RawText(text.to_string()),
        )
    }

    fn rewrite_block(&mut self, children: Vec<StmtNode>) -> Vec<StmtNode> {
        use chumsky::span::Span as _;
        let mut out = Vec::new();
        let mut mode = Mode::Text;
        let mut block_end = 0;
        for mut child in children {
            block_end = child.base.loc.span.end();
            if matches!(child.kind, StmtKind::RawText(_)) {
                mode = self.scan_text(child, mode, &mut out);
                continue;
            }
            match &mut mode {
                Mode::Text => {
                    self.rewrite_child_blocks(&mut child);
                    out.push(child);
                }
                Mode::Tag(tag) => {
                    if !command_allowed_in_tag(&child) {
                        self.sink.report(
                            Diagnostic::error(
                                child.base.loc.clone(),
                                format!(
                                    "{{{}}} is not allowed inside an HTML tag",
                                    child.kind_name()
                                ),
                            )
                            .with_code(codes::E0502),
                        );
                    }
                    tag.attrs.push(child);
                }
                Mode::AttrValue(_, attr) => {
                    attr.children.push(child);
                }
            }
        }
        match mode {
            Mode::Text => {}
            Mode::Tag(tag) => {
                self.sink.report(
                    Diagnostic::error(
                        self.loc(tag.start, block_end),
                        format!("HTML tag <{}> is not closed before the end of the block", tag.name),
                    )
                    .with_code(codes::E0500),
                );
                let node = self.finish_tag(tag, false, block_end);
                out.push(node);
            }
            Mode::AttrValue(mut tag, attr) => {
                self.sink.report(
                    Diagnostic::error(
                        self.loc(attr.start, block_end),
                        format!(
                            "attribute '{}' value is not closed before the end of the block",
                            attr.name
                        ),
                    )
                    .with_code(codes::E0500),
                );
                let attr_node = self.finish_attr(attr, true, block_end);
                tag.attrs.push(attr_node);
                let node = self.finish_tag(tag, false, block_end);
                out.push(node);
            }
        }
        out
    }

    fn rewrite_child_blocks(&mut self, stmt: &mut StmtNode) {
        match &mut stmt.kind {
            StmtKind::Let(n) => {
                if let LetValue::Block { kind, body } = &mut n.value {
                    if *kind == ContentKind::Html {
                        *body = self.rewrite_block(std::mem::take(body));
                    }
                }
            }
            StmtKind::Call(n) => {
                for param in &mut n.params {
                    if let CallParamValue::Block { kind, body } = &mut param.value {
                        if *kind == ContentKind::Html {
                            *body = self.rewrite_block(std::mem::take(body));
                        }
                    }
                }
            }
            _ => {
                for (_, block) in stmt.child_blocks_mut() {
                    *block = self.rewrite_block(std::mem::take(block));
                }
            }
        }
    }

    /// Consume one raw text node in the current mode, emitting completed
    /// nodes into `out`, and return the mode after the chunk.
    fn scan_text(&mut self, stmt: StmtNode, mut mode: Mode, out: &mut Vec<StmtNode>) -> Mode {
        use chumsky::span::Span as _;
        let base = stmt.base.loc.span.start();
        let text = match &stmt.kind {
            StmtKind::RawText(t) => t.clone(),
            _ => unreachable!("scan_text requires raw text"),
        };
        let bytes = text.as_bytes();
        let len = bytes.len();

        // Fast path: plain text with no markup, already in text mode.
        if matches!(mode, Mode::Text) && !text.contains('<') {
            out.push(stmt);
            return mode;
        }

        let mut i = 0;
        while i < len {
            mode = match mode {
                Mode::Text => {
                    match text[i..].find('<') {
                        None => {
                            if i < len {
                                let node = self.raw(base + i, base + len, &text[i..]);
                                out.push(node);
                            }
                            i = len;
                            Mode::Text
                        }
                        Some(rel) => {
                            let lt = i + rel;
                            if lt > i {
                                let node = self.raw(base + i, base + lt, &text[i..lt]);
                                out.push(node);
                            }
                            // Close tag?
                            if bytes.get(lt + 1) == Some(&b'/') {
                                let name_start = lt + 2;
                                let name_end = scan_name(bytes, name_start);
                                match text[name_end..].find('>') {
                                    Some(gt_rel) if name_end > name_start => {
                                        let gt = name_end + gt_rel;
                                        out.push(StmtNode::new(
                                            self.ids.fresh(),
                                            self.loc(base + lt, base + gt + 1),
                                            StmtKind::HtmlCloseTag(HtmlCloseTagNode {
                                                tag_name: text[name_start..name_end].to_string(),
                                            }),
                                        ));
                                        i = gt + 1;
                                        Mode::Text
                                    }
                                    _ => {
                                        self.sink.report(
                                            Diagnostic::error(
                                                self.loc(base + lt, base + len),
                                                "malformed HTML close tag",
                                            )
                                            .with_code(codes::E0500),
                                        );
                                        let node =
                                            self.raw(base + lt, base + len, &text[lt..]);
                                        out.push(node);
                                        i = len;
                                        Mode::Text
                                    }
                                }
                            } else if bytes
                                .get(lt + 1)
                                .map(|b| b.is_ascii_alphabetic())
                                .unwrap_or(false)
                            {
                                let name_start = lt + 1;
                                let name_end = scan_name(bytes, name_start);
                                i = name_end;
                                Mode::Tag(TagBuilder {
                                    name: text[name_start..name_end].to_string(),
                                    start: base + lt,
                                    attrs: Vec::new(),
                                })
                            } else {
                                // A literal '<' in text.
                                let node = self.raw(base + lt, base + lt + 1, "<");
                                out.push(node);
                                i = lt + 1;
                                Mode::Text
                            }
                        }
                    }
                }
                Mode::Tag(mut tag) => {
                    while i < len && bytes[i].is_ascii_whitespace() {
                        i += 1;
                    }
                    if i >= len {
                        Mode::Tag(tag)
                    } else if bytes[i] == b'>' {
                        i += 1;
                        let node = self.finish_tag(tag, false, base + i);
                        out.push(node);
                        Mode::Text
                    } else if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'>') {
                        i += 2;
                        let node = self.finish_tag(tag, true, base + i);
                        out.push(node);
                        Mode::Text
                    } else if is_name_byte(bytes[i]) {
                        let name_start = i;
                        let name_end = scan_name(bytes, name_start);
                        i = name_end;
                        while i < len && bytes[i].is_ascii_whitespace() {
                            i += 1;
                        }
                        if bytes.get(i) == Some(&b'=') {
                            i += 1;
                            while i < len && bytes[i].is_ascii_whitespace() {
                                i += 1;
                            }
                            match bytes.get(i) {
                                Some(&q) if q == b'"' || q == b'\'' => {
                                    let value_start = i + 1;
                                    match text[value_start..].find(q as char) {
                                        Some(end_rel) => {
                                            let value_end = value_start + end_rel;
                                            let mut attr = AttrBuilder {
                                                name: text[name_start..name_end].to_string(),
                                                start: base + name_start,
                                                quote: q,
                                                children: Vec::new(),
                                            };
                                            if value_end > value_start {
                                                let node = self.raw(
                                                    base + value_start,
                                                    base + value_end,
                                                    &text[value_start..value_end],
                                                );
                                                attr.children.push(node);
                                            }
                                            let attr_node = self.finish_attr(
                                                attr,
                                                true,
                                                base + value_end + 1,
                                            );
                                            tag.attrs.push(attr_node);
                                            i = value_end + 1;
                                            Mode::Tag(tag)
                                        }
                                        None => {
                                            let mut attr = AttrBuilder {
                                                name: text[name_start..name_end].to_string(),
                                                start: base + name_start,
                                                quote: q,
                                                children: Vec::new(),
                                            };
                                            if value_start < len {
                                                let node = self.raw(
                                                    base + value_start,
                                                    base + len,
                                                    &text[value_start..],
                                                );
                                                attr.children.push(node);
                                            }
                                            i = len;
                                            Mode::AttrValue(tag, attr)
                                        }
                                    }
                                }
                                _ => {
                                    // Unquoted value.
                                    let value_start = i;
                                    while i < len
                                        && !bytes[i].is_ascii_whitespace()
                                        && bytes[i] != b'>'
                                        && bytes[i] != b'/'
                                    {
                                        i += 1;
                                    }
                                    let mut attr = AttrBuilder {
                                        name: text[name_start..name_end].to_string(),
                                        start: base + name_start,
                                        quote: 0,
                                        children: Vec::new(),
                                    };
                                    if i > value_start {
                                        let node = self.raw(
                                            base + value_start,
                                            base + i,
                                            &text[value_start..i],
                                        );
                                        attr.children.push(node);
                                    }
                                    let attr_node = self.finish_attr(attr, true, base + i);
                                    tag.attrs.push(attr_node);
                                    Mode::Tag(tag)
                                }
                            }
                        } else {
                            // Bare attribute.
                            let attr = AttrBuilder {
                                name: text[name_start..name_end].to_string(),
                                start: base + name_start,
                                quote: 0,
                                children: Vec::new(),
                            };
                            let attr_node = self.finish_attr(attr, false, base + name_end);
                            tag.attrs.push(attr_node);
                            Mode::Tag(tag)
                        }
                    } else {
                        self.sink.report(
                            Diagnostic::error(
                                self.loc(base + i, base + i + 1),
                                format!(
                                    "unexpected character '{}' in HTML tag",
                                    bytes[i] as char
                                ),
                            )
                            .with_code(codes::E0502),
                        );
                        i += 1;
                        Mode::Tag(tag)
                    }
                }
                Mode::AttrValue(mut tag, mut attr) => {
                    match text[i..].find(attr.quote as char) {
                        Some(rel) => {
                            let end = i + rel;
                            if end > i {
                                let node = self.raw(base + i, base + end, &text[i..end]);
                                attr.children.push(node);
                            }
                            let attr_node = self.finish_attr(attr, true, base + end + 1);
                            tag.attrs.push(attr_node);
                            i = end + 1;
                            Mode::Tag(tag)
                        }
                        None => {
                            if i < len {
                                let node = self.raw(base + i, base + len, &text[i..]);
                                attr.children.push(node);
                            }
                            i = len;
                            Mode::AttrValue(tag, attr)
                        }
                    }
                }
            };
        }
        mode
    }

    fn finish_tag(&mut self, tag: TagBuilder, explicit_self_close: bool, end: usize) -> StmtNode {
        let self_closing = explicit_self_close || is_void_element(&tag.name);
        StmtNode::new(
            self.ids.fresh(),
            self.loc(tag.start, end),
            StmtKind::HtmlOpenTag(HtmlOpenTagNode {
                tag_name: tag.name,
                attrs: tag.attrs,
                self_closing,
            }),
        )
    }

    fn finish_attr(&mut self, attr: AttrBuilder, has_value: bool, end: usize) -> StmtNode {
        let value = if has_value {
            Some(Box::new(StmtNode::new(
                self.ids.fresh(),
                self.loc(attr.start, end),
                StmtKind::HtmlAttributeValue(HtmlAttributeValueNode {
                    children: attr.children,
                }),
            )))
        } else {
            None
        };
        StmtNode::new(
            self.ids.fresh(),
            self.loc(attr.start, end),
            StmtKind::HtmlAttribute(HtmlAttributeNode {
                name: attr.name,
                value,
            }),
        )
    }
}

fn command_allowed_in_tag(stmt: &StmtNode) -> bool {
    matches!(
        stmt.kind,
        StmtKind::Print(_) | StmtKind::Call(_) | StmtKind::If(_) | StmtKind::Let(_)
    )
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b':'
}

fn scan_name(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < bytes.len() && is_name_byte(bytes[i]) {
        i += 1;
    }
    i
}

// ── ValidateStrictHtml ──────────────────────────────────────────────────────

pub struct ValidateStrictHtmlPass {
    /// Selected by the `new_html_matcher` experimental feature.
    pub new_matcher: bool,
}

impl FilePass for ValidateStrictHtmlPass {
    fn id(&self) -> PassId {
        PassId::ValidateStrictHtml
    }

    fn run(&mut self, file: &mut FileNode, _ids: &mut IdGenerator, sink: &mut ErrorSink) {
        for template in &file.templates {
            if template.content_kind != ContentKind::Html {
                continue;
            }
            if self.new_matcher {
                check_block_balanced(&template.body, sink);
            } else {
                check_linear(&template.body, sink);
            }
        }
    }
}

/// Classic matcher: flatten the template in document order and match
/// tags with one stack.
fn check_linear(body: &[StmtNode], sink: &mut ErrorSink) {
    let mut stack: Vec<(String, SourceLocation)> = Vec::new();
    visit_stmts(body, &mut |stmt| match &stmt.kind {
        StmtKind::HtmlOpenTag(n) if !n.self_closing => {
            stack.push((n.tag_name.clone(), stmt.base.loc.clone()));
        }
        StmtKind::HtmlCloseTag(n) => match stack.pop() {
            Some((open, _)) if open.eq_ignore_ascii_case(&n.tag_name) => {}
            Some((open, open_loc)) => {
                sink.report(
                    Diagnostic::error(
                        stmt.base.loc.clone(),
                        format!("</{}> does not match open tag <{}>", n.tag_name, open),
                    )
                    .with_code(codes::E0501)
                    .with_related(open_loc, "opened here"),
                );
            }
            None => {
                sink.report(
                    Diagnostic::error(
                        stmt.base.loc.clone(),
                        format!("</{}> has no matching open tag", n.tag_name),
                    )
                    .with_code(codes::E0501),
                );
            }
        },
        _ => {}
    });
    for (name, loc) in stack {
        sink.report(
            Diagnostic::error(loc, format!("<{name}> is never closed")).with_code(codes::E0500),
        );
    }
}

/// Experimental matcher: every block must balance on its own, so each
/// branch of a conditional is checked independently.
fn check_block_balanced(block: &[StmtNode], sink: &mut ErrorSink) {
    let mut stack: Vec<(String, SourceLocation)> = Vec::new();
    for stmt in block {
        match &stmt.kind {
            StmtKind::HtmlOpenTag(n) if !n.self_closing => {
                stack.push((n.tag_name.clone(), stmt.base.loc.clone()));
            }
            StmtKind::HtmlCloseTag(n) => match stack.pop() {
                Some((open, _)) if open.eq_ignore_ascii_case(&n.tag_name) => {}
                Some((open, open_loc)) => {
                    sink.report(
                        Diagnostic::error(
                            stmt.base.loc.clone(),
                            format!("</{}> does not match open tag <{}>", n.tag_name, open),
                        )
                        .with_code(codes::E0501)
                        .with_related(open_loc, "opened here"),
                    );
                }
                None => {
                    sink.report(
                        Diagnostic::error(
                            stmt.base.loc.clone(),
                            format!(
                                "</{}> is not balanced within its enclosing block",
                                n.tag_name
                            ),
                        )
                        .with_code(codes::E0501),
                    );
                }
            },
            _ => {
                for (_, child_block) in stmt_block_view(stmt) {
                    check_block_balanced(child_block, sink);
                }
            }
        }
    }
    for (name, loc) in stack {
        sink.report(
            Diagnostic::error(loc, format!("<{name}> is never closed")).with_code(codes::E0500),
        );
    }
}

/// Shared view of a statement's blocks for validation walks.
fn stmt_block_view(stmt: &StmtNode) -> Vec<(&'static str, &[StmtNode])> {
    let mut out: Vec<(&'static str, &[StmtNode])> = Vec::new();
    match &stmt.kind {
        StmtKind::Msg(n) => out.push(("msg", &n.children)),
        StmtKind::If(n) => {
            for b in &n.branches {
                out.push(("if", &b.body));
            }
            if let Some(e) = &n.else_body {
                out.push(("else", e));
            }
        }
        StmtKind::Switch(n) => {
            for c in &n.cases {
                out.push(("case", &c.body));
            }
            if let Some(d) = &n.default {
                out.push(("default", d));
            }
        }
        StmtKind::For(n) => {
            out.push(("for", &n.body));
            if let Some(e) = &n.if_empty {
                out.push(("ifempty", e));
            }
        }
        StmtKind::Let(n) => {
            if let LetValue::Block { body, .. } = &n.value {
                out.push(("let", body));
            }
        }
        StmtKind::Call(n) => {
            for p in &n.params {
                if let CallParamValue::Block { body, .. } = &p.value {
                    out.push(("param", body));
                }
            }
        }
        StmtKind::VeLog(n) => out.push(("velog", &n.children)),
        StmtKind::Placeholder(n) => out.push(("placeholder", &n.children)),
        _ => {}
    }
    out
}

// ── Tests ───────────────────────────────────────────────────────────────────
