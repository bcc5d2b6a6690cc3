//! Versioned XML codec for whole preference trees.
//!
//! Document shape: a `prefstore` element carrying the format version, one
//! `root` element naming its kind, and per node a `map` of `entry`
//! key/value attributes followed by nested `node` elements. Attribute
//! values are escaped by the library, so arbitrary strings round-trip.

use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

use crate::tree::{PrefNode, PrefTree, RootKind, TreeError};

const DOC_TAG: &str = "prefstore";
const DOC_VERSION: &str = "1";

#[derive(Debug, Error)]
pub(crate) enum XmlError {
    #[error("xml syntax: {0}")]
    Syntax(#[from] quick_xml::Error),
    #[error("xml attribute: {0}")]
    Attr(#[from] AttrError),
    #[error("unsupported document version `{got}` (expected `{DOC_VERSION}`)")]
    Version { got: String },
    #[error("document root kind `{got}` does not match the requested `{want}` root")]
    KindMismatch { want: RootKind, got: String },
    #[error("malformed document: {reason}")]
    Malformed { reason: &'static str },
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Parse one document into a fresh tree of the requested kind.
pub(crate) fn import(kind: RootKind, doc: &str) -> Result<PrefTree, XmlError> {
    let mut reader = Reader::from_str(doc);
    let tree = PrefTree::empty(kind);
    let mut stack: Vec<PrefNode> = Vec::new();
    let mut saw_document = false;
    let mut saw_root = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => open(&tree, &mut stack, &mut saw_document, &mut saw_root, &e, true)?,
            Event::Empty(e) => {
                open(&tree, &mut stack, &mut saw_document, &mut saw_root, &e, false)?
            }
            Event::End(e) => {
                if matches!(e.name().as_ref(), b"node" | b"root") {
                    stack.pop();
                }
            }
            Event::Eof => break,
            // Text, comments, declarations and the like carry no tree data.
            _ => {}
        }
    }

    if !saw_document {
        return Err(XmlError::Malformed {
            reason: "missing prefstore document element",
        });
    }
    if !saw_root {
        return Err(XmlError::Malformed {
            reason: "missing root element",
        });
    }
    if !stack.is_empty() {
        return Err(XmlError::Malformed {
            reason: "unexpected end of document",
        });
    }
    Ok(tree)
}

fn open(
    tree: &PrefTree,
    stack: &mut Vec<PrefNode>,
    saw_document: &mut bool,
    saw_root: &mut bool,
    e: &BytesStart<'_>,
    is_start: bool,
) -> Result<(), XmlError> {
    match e.name().as_ref() {
        tag if tag == DOC_TAG.as_bytes() => {
            match attr_value(e, b"version")? {
                Some(version) if version == DOC_VERSION => {}
                Some(version) => return Err(XmlError::Version { got: version }),
                None => {
                    return Err(XmlError::Malformed {
                        reason: "missing version attribute",
                    })
                }
            }
            *saw_document = true;
        }
        b"root" => {
            if !*saw_document {
                return Err(XmlError::Malformed {
                    reason: "root element outside the document element",
                });
            }
            if let Some(got) = attr_value(e, b"kind")? {
                if RootKind::parse(&got) != Some(tree.kind()) {
                    return Err(XmlError::KindMismatch {
                        want: tree.kind(),
                        got,
                    });
                }
            }
            *saw_root = true;
            if is_start {
                stack.push(tree.root());
            }
        }
        b"map" => {}
        b"entry" => {
            let node = stack.last().ok_or(XmlError::Malformed {
                reason: "entry element outside a node",
            })?;
            let key = attr_value(e, b"key")?.ok_or(XmlError::Malformed {
                reason: "entry without key attribute",
            })?;
            let value = attr_value(e, b"value")?.ok_or(XmlError::Malformed {
                reason: "entry without value attribute",
            })?;
            node.put(key, value)?;
        }
        b"node" => {
            let parent = stack.last().ok_or(XmlError::Malformed {
                reason: "node element outside the root",
            })?;
            let name = attr_value(e, b"name")?.ok_or(XmlError::Malformed {
                reason: "node without name attribute",
            })?;
            let child = parent.child(&name)?;
            if is_start {
                stack.push(child);
            }
        }
        _ => {
            return Err(XmlError::Malformed {
                reason: "unknown element",
            })
        }
    }
    Ok(())
}

fn attr_value(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, XmlError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Serialize a whole tree to its document bytes.
pub(crate) fn export(tree: &PrefTree) -> Result<Vec<u8>, XmlError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut doc = BytesStart::new(DOC_TAG);
    doc.push_attribute(("version", DOC_VERSION));
    writer.write_event(Event::Start(doc))?;

    let mut root = BytesStart::new("root");
    root.push_attribute(("kind", tree.kind().as_str()));
    writer.write_event(Event::Start(root))?;
    write_node_body(&mut writer, &tree.root())?;
    writer.write_event(Event::End(BytesEnd::new("root")))?;

    writer.write_event(Event::End(BytesEnd::new(DOC_TAG)))?;
    Ok(writer.into_inner())
}

fn write_node_body(writer: &mut Writer<Vec<u8>>, node: &PrefNode) -> Result<(), XmlError> {
    let entries = node.entries()?;
    if entries.is_empty() {
        writer.write_event(Event::Empty(BytesStart::new("map")))?;
    } else {
        writer.write_event(Event::Start(BytesStart::new("map")))?;
        for (key, value) in &entries {
            let mut entry = BytesStart::new("entry");
            entry.push_attribute(("key", key.as_str()));
            entry.push_attribute(("value", value.as_str()));
            writer.write_event(Event::Empty(entry))?;
        }
        writer.write_event(Event::End(BytesEnd::new("map")))?;
    }

    for name in node.child_names()? {
        let child = node.child(&name)?;
        let mut open = BytesStart::new("node");
        open.push_attribute(("name", name.as_str()));
        writer.write_event(Event::Start(open))?;
        write_node_body(writer, &child)?;
        writer.write_event(Event::End(BytesEnd::new("node")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> PrefTree {
        let tree = PrefTree::empty(RootKind::User);
        tree.root().put("top", "level").expect("put");
        let a = tree.root().child("a").expect("child");
        a.put("k", "v").expect("put");
        let grand = a.child("grand").expect("grandchild");
        grand.put("deep", "value").expect("put");
        tree.root().child("empty").expect("empty child");
        tree
    }

    #[test]
    fn export_import_round_trip() {
        let tree = sample_tree();
        let doc = export(&tree).expect("export");
        let text = String::from_utf8(doc).expect("utf8");
        assert!(text.contains("version=\"1\""));
        assert!(text.contains("kind=\"user\""));

        let reloaded = import(RootKind::User, &text).expect("import");
        assert_eq!(
            reloaded.root().get("top").expect("get"),
            Some("level".to_string())
        );
        let a = reloaded.root().child("a").expect("child");
        assert_eq!(a.get("k").expect("get"), Some("v".to_string()));
        let grand = a.child("grand").expect("grandchild");
        assert_eq!(grand.get("deep").expect("get"), Some("value".to_string()));
        assert!(reloaded.root().has_child("empty").expect("has_child"));
    }

    #[test]
    fn hostile_strings_round_trip() {
        let tree = PrefTree::empty(RootKind::System);
        let node = tree.root().child("n").expect("child");
        node.put("a<b&c\"d", "x<y>&\"'z").expect("put");
        node.put("newline", "line1\nline2").expect("put");

        let doc = export(&tree).expect("export");
        let text = String::from_utf8(doc).expect("utf8");
        let reloaded = import(RootKind::System, &text).expect("import");
        let node = reloaded.root().child("n").expect("child");
        assert_eq!(
            node.get("a<b&c\"d").expect("get"),
            Some("x<y>&\"'z".to_string())
        );
        assert_eq!(
            node.get("newline").expect("get"),
            Some("line1\nline2".to_string())
        );
    }

    #[test]
    fn empty_tree_round_trips() {
        let doc = export(&PrefTree::empty(RootKind::System)).expect("export");
        let text = String::from_utf8(doc).expect("utf8");
        let reloaded = import(RootKind::System, &text).expect("import");
        assert!(reloaded.root().keys().expect("keys").is_empty());
        assert!(reloaded.root().child_names().expect("names").is_empty());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let doc = r#"<?xml version="1.0"?><prefstore version="99"><root kind="user"><map/></root></prefstore>"#;
        assert!(matches!(
            import(RootKind::User, doc),
            Err(XmlError::Version { .. })
        ));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let doc = r#"<?xml version="1.0"?><prefstore version="1"><root kind="system"><map/></root></prefstore>"#;
        assert!(matches!(
            import(RootKind::User, doc),
            Err(XmlError::KindMismatch { .. })
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(import(RootKind::User, "not xml at all").is_err());
        assert!(import(RootKind::User, "").is_err());
        assert!(import(RootKind::User, "<entry key=\"k\" value=\"v\"/>").is_err());
    }
}
