// debug_attrs.rs — Debug attribute injection.
//
// Adds a `data-tpl` attribute naming the template to the root open tag
// of each HTML template so rendered output can be traced back to its
// source. Skipped when the tag already carries the attribute.

use crate::ast::*;
use crate::diag::ErrorSink;
use crate::id::IdGenerator;
use crate::pass::{FilePass, PassId};

pub const DEBUG_ATTR: &str = "data-tpl";

pub struct AddDebugAttributesPass;

impl FilePass for AddDebugAttributesPass {
    fn id(&self) -> PassId {
        PassId::AddDebugAttributes
    }

    fn run(&mut self, file: &mut FileNode, ids: &mut IdGenerator, _sink: &mut ErrorSink) {
        for template in &mut file.templates {
            if template.content_kind != ContentKind::Html {
                continue;
            }
            let fq_name = template.fq_name.clone();
            let Some(root) = template.body.iter_mut().find_map(|stmt| match &mut stmt.kind {
                StmtKind::HtmlOpenTag(tag) => Some((stmt.base.id, &mut stmt.base.loc, tag)),
                _ => None,
            }) else {
                continue;
            };
            let (tag_id, tag_loc, tag) = root;
            let already_tagged = tag.attrs.iter().any(|attr| {
                matches!(&attr.kind, StmtKind::HtmlAttribute(a) if a.name == DEBUG_ATTR)
            });
            if already_tagged {
                continue;
            }
            let loc = tag_loc.clone();
            let text = StmtNode::new(ids.fresh(), loc.clone(), StmtKind::RawText(fq_name));
            let value = StmtNode::new(
                ids.fresh(),
                loc.clone(),
                StmtKind::HtmlAttributeValue(HtmlAttributeValueNode {
                    children: vec![text],
                }),
            );
            let mut attr = StmtNode::new(
                ids.fresh(),
                loc,
                StmtKind::HtmlAttribute(HtmlAttributeNode {
                    name: DEBUG_ATTR.to_string(),
                    value: Some(Box::new(value)),
                }),
            );
            attr.base.parent = Some(tag_id);
            tag.attrs.push(attr);
        }
        assign_parents_file(file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html_rewrite::HtmlRewritePass;
    use crate::parser::{parse_fileset, SourceFile};

    fn run(src: &str) -> FileSetNode {
        let mut ids = IdGenerator::new();
        let mut sink = ErrorSink::new();
        let mut fileset = parse_fileset(
            vec![SourceFile::new("test.tpl", src, FileKind::Src)],
            &mut ids,
            &mut sink,
        );
        assert!(!sink.has_errors());
        HtmlRewritePass.run(&mut fileset.files[0], &mut ids, &mut sink);
        AddDebugAttributesPass.run(&mut fileset.files[0], &mut ids, &mut sink);
        fileset
    }

    fn root_attr_names(fileset: &FileSetNode) -> Vec<String> {
        match &fileset.files[0].templates[0].body[0].kind {
            StmtKind::HtmlOpenTag(tag) => tag
                .attrs
                .iter()
                .filter_map(|a| match &a.kind {
                    StmtKind::HtmlAttribute(attr) => Some(attr.name.clone()),
                    _ => None,
                })
                .collect(),
            other => panic!("expected open tag, got {:?}", other),
        }
    }

    #[test]
    fn adds_attribute_to_root_tag() {
        let fileset = run("{namespace ns}\n{template .foo}<div>x</div>{/template}\n");
        assert_eq!(root_attr_names(&fileset), vec!["data-tpl"]);
        // The value names the template.
        let mut found = false;
        visit_stmts(&fileset.files[0].templates[0].body, &mut |stmt| {
            if let StmtKind::RawText(t) = &stmt.kind {
                if t == "ns.foo" {
                    found = true;
                }
            }
        });
        assert!(found);
    }

    #[test]
    fn existing_attribute_not_duplicated() {
        let fileset =
            run("{namespace ns}\n{template .foo}<div data-tpl=\"custom\">x</div>{/template}\n");
        assert_eq!(root_attr_names(&fileset), vec!["data-tpl"]);
    }

    #[test]
    fn text_template_untouched() {
        let fileset = run("{namespace ns}\n{template .foo kind=\"text\"}plain{/template}\n");
        assert!(matches!(
            &fileset.files[0].templates[0].body[0].kind,
            StmtKind::RawText(_)
        ));
    }

    #[test]
    fn parents_consistent_after_insertion() {
        let fileset = run("{namespace ns}\n{template .foo}<div>x</div>{/template}\n");
        assert!(crate::ast::parent_mismatches(&fileset).is_empty());
    }
}
