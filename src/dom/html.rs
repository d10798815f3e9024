//! HTML serialization and a small fragment parser.
//!
//! The parser understands elements, quoted and unquoted attributes, text,
//! comments and the common character references. It is used for trusted
//! HTML insertion and for loading server output before rehydration; it is
//! not a conforming HTML5 tree builder.

use super::node::{NodeKind, NodeRef, SVG_NAMESPACE};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

pub fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Outer markup of a node.
pub fn serialize(node: &NodeRef) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out
}

/// Markup of a node's children.
pub fn serialize_children(node: &NodeRef) -> String {
    let mut out = String::new();
    for child in node.children() {
        write_node(&child, &mut out);
    }
    out
}

fn write_node(node: &NodeRef, out: &mut String) {
    node.with_data(|data| match &data.kind {
        NodeKind::Text(text) => out.push_str(&escape_text(text)),
        NodeKind::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        NodeKind::Fragment => {}
        NodeKind::Element(element) => {
            out.push('<');
            out.push_str(&element.tag);
            for attribute in &element.attributes {
                out.push(' ');
                out.push_str(&attribute.name);
                out.push_str("=\"");
                out.push_str(&escape_attribute(&attribute.value));
                out.push('"');
            }
            out.push('>');
        }
    });

    if node.is_text() || node.is_comment() {
        return;
    }
    for child in node.children() {
        write_node(&child, out);
    }
    if let Some(tag) = node.tag_name() {
        if !is_void(&tag) {
            out.push_str("</");
            out.push_str(&tag);
            out.push('>');
        }
    }
}

/// Decode character references in text.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail.find(';').filter(|end| *end <= 10) {
            Some(end) => {
                let entity = &tail[1..end];
                match decode_entity(entity) {
                    Some(c) => out.push(c),
                    None => out.push_str(&tail[..=end]),
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let number = entity.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Parse `html` into a detached fragment.
pub fn parse_fragment(html: &str) -> NodeRef {
    let fragment = NodeRef::new_fragment();
    let mut stack: Vec<NodeRef> = vec![fragment.clone()];
    let mut rest = html;

    while !rest.is_empty() {
        let current = stack.last().cloned().unwrap_or_else(|| fragment.clone());

        if let Some(after) = rest.strip_prefix("<!--") {
            let end = after.find("-->").unwrap_or(after.len());
            current.insert_child(&NodeRef::new_comment(&after[..end]), None);
            rest = after.get(end + 3..).unwrap_or("");
            continue;
        }

        if let Some(after) = rest.strip_prefix("</") {
            let end = after.find('>').unwrap_or(after.len());
            let tag = after[..end].trim().to_ascii_lowercase();
            if let Some(position) = stack
                .iter()
                .rposition(|n| n.tag_name().as_deref() == Some(tag.as_str()))
            {
                if position > 0 {
                    stack.truncate(position);
                }
            }
            rest = after.get(end + 1..).unwrap_or("");
            continue;
        }

        if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
            let (element, self_closing, remaining) = parse_open_tag(&rest[1..], &current);
            current.insert_child(&element, None);
            let tag = element.tag_name().unwrap_or_default();
            if !self_closing && !is_void(&tag) {
                stack.push(element);
            }
            rest = remaining;
            continue;
        }

        let first = rest.chars().next().map(char::len_utf8).unwrap_or(1);
        let end = rest[first..]
            .find('<')
            .map(|i| i + first)
            .unwrap_or(rest.len());
        current.insert_child(&NodeRef::new_text(&decode_entities(&rest[..end])), None);
        rest = &rest[end..];
    }

    fragment
}

fn parse_open_tag<'a>(input: &'a str, parent: &NodeRef) -> (NodeRef, bool, &'a str) {
    let name_end = input
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(input.len());
    let tag = input[..name_end].to_ascii_lowercase();
    let namespace = if tag == "svg"
        || (parent.namespace().as_deref() == Some(SVG_NAMESPACE)
            && !parent
                .tag_name()
                .is_some_and(|t| t.eq_ignore_ascii_case("foreignObject")))
    {
        Some(SVG_NAMESPACE)
    } else {
        None
    };
    let element = NodeRef::new_element(&tag, namespace);
    let mut rest = &input[name_end..];
    let mut self_closing = false;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        if let Some(after) = rest.strip_prefix("/>") {
            self_closing = true;
            rest = after;
            break;
        }
        if let Some(after) = rest.strip_prefix('>') {
            rest = after;
            break;
        }
        if let Some(after) = rest.strip_prefix('/') {
            rest = after;
            continue;
        }

        let name_end = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '>' || c == '/')
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_string();
        rest = rest[name_end..].trim_start();

        let mut value = String::new();
        if let Some(after) = rest.strip_prefix('=') {
            let after = after.trim_start();
            let (raw, remaining) = match after.chars().next() {
                Some(quote @ ('"' | '\'')) => {
                    let body = &after[1..];
                    let end = body.find(quote).unwrap_or(body.len());
                    (&body[..end], body.get(end + 1..).unwrap_or(""))
                }
                _ => {
                    let end = after
                        .find(|c: char| c.is_whitespace() || c == '>')
                        .unwrap_or(after.len());
                    (&after[..end], &after[end..])
                }
            };
            value = decode_entities(raw);
            rest = remaining;
        }

        if !name.is_empty() {
            element.with_element_mut(|e| e.set_attribute(&name, &value, None));
        }
    }

    (element, self_closing, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_serialize() {
        let html = r#"<div class="a &amp; b"><p>Hi &lt;you&gt;</p><br><!--note--><img src='x.png'/></div>"#;
        let fragment = parse_fragment(html);
        assert_eq!(fragment.child_count(), 1);
        let div = fragment.first_child().unwrap();
        assert_eq!(div.attribute("class").as_deref(), Some("a & b"));
        assert_eq!(div.child_count(), 4);
        assert_eq!(
            serialize_children(&fragment),
            r#"<div class="a &amp; b"><p>Hi &lt;you&gt;</p><br><!--note--><img src="x.png"></div>"#
        );
    }

    #[test]
    fn test_text_and_siblings() {
        let fragment = parse_fragment("one<b>two</b>three");
        assert_eq!(fragment.child_count(), 3);
        assert_eq!(fragment.text_content(), "onetwothree");
    }

    #[test]
    fn test_unclosed_and_stray_close() {
        let fragment = parse_fragment("<ul><li>a<li>b</ul></span>tail");
        let ul = fragment.first_child().unwrap();
        assert_eq!(ul.tag_name().as_deref(), Some("ul"));
        assert_eq!(fragment.last_child().unwrap().data().as_deref(), Some("tail"));
    }

    #[test]
    fn test_svg_namespace() {
        let fragment = parse_fragment("<svg><circle r=\"1\"></circle></svg>");
        let svg = fragment.first_child().unwrap();
        let circle = svg.first_child().unwrap();
        assert_eq!(svg.namespace().as_deref(), Some(SVG_NAMESPACE));
        assert_eq!(circle.namespace().as_deref(), Some(SVG_NAMESPACE));
    }

    #[test]
    fn test_numeric_entities() {
        assert_eq!(decode_entities("&#65;&#x42;&unknown;&"), "AB&unknown;&");
    }
}
