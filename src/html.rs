//! Text extraction from section HTML.
//!
//! Section content is Parsoid HTML. Attribute values routinely carry markup
//! (`data-mw` JSON), so text is read from a parsed tree, never by stripping
//! tags.

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};

fn parse(html: &str) -> RcDom {
    parse_document(RcDom::default(), Default::default()).one(html)
}

fn collect_text(node: &Handle, out: &mut String) {
    if let NodeData::Text { contents } = &node.data {
        out.push_str(&contents.borrow());
    }
    for child in node.children.borrow().iter() {
        collect_text(child, out);
    }
}

fn find_element(node: &Handle, tag: &str) -> Option<Handle> {
    if let NodeData::Element { name, .. } = &node.data {
        if (*name.local).eq_ignore_ascii_case(tag) {
            return Some(node.clone());
        }
    }
    node.children
        .borrow()
        .iter()
        .find_map(|child| find_element(child, tag))
}

/// Text content of an HTML fragment, entities decoded.
pub fn plain_text(html: &str) -> String {
    if !html.contains(['<', '&']) {
        return html.to_string();
    }
    let dom = parse(html);
    let mut text = String::new();
    collect_text(&dom.document, &mut text);
    text
}

/// Text of the first element named `tag`, if any.
pub fn first_element_text(html: &str, tag: &str) -> Option<String> {
    let dom = parse(html);
    let element = find_element(&dom.document, tag)?;
    let mut text = String::new();
    collect_text(&element, &mut text);
    Some(text)
}
