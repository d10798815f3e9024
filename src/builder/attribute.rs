// Dynamic attribute writes. A logical attribute name is normalized to either a DOM
// property or a DOM attribute: names an element exposes as properties are written as
// properties, except `style`, anything on an SVG element, and a few form-related names
// that are read-only properties on specific tags. Values headed for URL-bearing
// attributes are sanitized first; a `javascript:` or `vbscript:` URL is rewritten to an
// inert `unsafe:` string, and any `<embed src>` is always marked unsafe.
//
// `<input value>` and `<option selected>` are live user state. Their updates compare
// against the element's current property instead of the last value written, so a
// rerender does not clobber what the user typed unless the bound value really moved.

//! Dynamic attributes and properties with sanitization.

use super::ElementBuilder;
use crate::core::VmResult;
use crate::dom::node::property_for;
use crate::dom::{DomOperations, NodeRef, Prop, SVG_NAMESPACE};
use crate::value::Value;
use std::rc::Rc;

/// A dynamic attribute of one element. `set` runs while the element is
/// being constructed, `update` on rerender.
pub trait DynamicAttribute {
    fn set(&mut self, builder: &mut ElementBuilder, value: &Value) -> VmResult<()>;
    fn update(&mut self, value: &Value, dom: &dyn DomOperations);
}

const ATTRIBUTE_OVERRIDES: &[(&str, &[&str])] = &[
    ("BUTTON", &["type", "form"]),
    ("INPUT", &["type", "form", "autocorrect", "list"]),
    ("SELECT", &["form"]),
    ("OPTION", &["form"]),
    ("TEXTAREA", &["form"]),
    ("LABEL", &["form"]),
    ("FIELDSET", &["form"]),
    ("LEGEND", &["form"]),
    ("OBJECT", &["form"]),
];

const BAD_PROTOCOLS: &[&str] = &["javascript:", "vbscript:"];
const BAD_TAGS: &[&str] = &["A", "BODY", "LINK", "IMG", "IFRAME", "BASE", "FORM"];
const BAD_ATTRIBUTES: &[&str] = &["href", "src", "background", "action"];
const BAD_TAGS_FOR_DATA_URI: &[&str] = &["EMBED"];
const BAD_ATTRIBUTES_FOR_DATA_URI: &[&str] = &["src"];

fn prefer_attribute(tag: &str, name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    ATTRIBUTE_OVERRIDES
        .iter()
        .any(|(t, names)| *t == tag && names.contains(&name.as_str()))
}

enum Normalized {
    Attribute(Rc<str>),
    Property(&'static str),
}

fn normalize_property(tag: &str, name: &str) -> Normalized {
    match property_for(&tag.to_ascii_lowercase(), name) {
        Some(property) if name != "style" && !prefer_attribute(tag, property) => {
            Normalized::Property(property)
        }
        _ => Normalized::Attribute(Rc::from(name)),
    }
}

fn check_uri(tag: Option<&str>, attribute: &str) -> bool {
    tag.map_or(true, |tag| BAD_TAGS.contains(&tag)) && BAD_ATTRIBUTES.contains(&attribute)
}

fn check_data_uri(tag: Option<&str>, attribute: &str) -> bool {
    tag.is_some_and(|tag| BAD_TAGS_FOR_DATA_URI.contains(&tag))
        && BAD_ATTRIBUTES_FOR_DATA_URI.contains(&attribute)
}

pub fn requires_sanitization(tag: Option<&str>, attribute: &str) -> bool {
    check_uri(tag, attribute) || check_data_uri(tag, attribute)
}

/// Scheme of `url` as `scheme:`, lowercase. Tabs and newlines are ignored
/// the way browsers ignore them; relative URLs have no protocol.
pub fn protocol_for_url(url: &str) -> Option<String> {
    let cleaned: String = url
        .trim_start_matches(|c: char| c <= ' ')
        .chars()
        .filter(|c| !matches!(c, '\t' | '\n' | '\r'))
        .collect();
    let (scheme, _) = cleaned.split_once(':')?;
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then(|| format!("{}:", scheme.to_ascii_lowercase()))
}

/// Sanitize a value bound to `attribute` of an element with the given
/// uppercase tag name.
pub fn sanitize_attribute_value(tag: Option<&str>, attribute: &str, value: &Value) -> Value {
    if value.is_nullish() {
        return value.clone();
    }
    if let Value::SafeString(html) = value {
        return Value::String(html.clone());
    }
    let text = value.to_display_string();
    if check_uri(tag, attribute) {
        let protocol = protocol_for_url(&text);
        if protocol.is_some_and(|p| BAD_PROTOCOLS.contains(&p.as_str())) {
            return Value::from(format!("unsafe:{text}"));
        }
    }
    if check_data_uri(tag, attribute) {
        return Value::from(format!("unsafe:{text}"));
    }
    Value::from(text)
}

/// Attribute string for a value; `false` and nullish mean "absent".
fn normalize_attribute_value(value: &Value) -> Option<String> {
    match value {
        Value::Bool(false) | Value::Null | Value::Undefined => None,
        Value::Bool(true) => Some(String::new()),
        other => Some(other.to_display_string()),
    }
}

fn to_prop(value: &Value) -> Prop {
    match value {
        Value::Bool(flag) => Prop::Flag(*flag),
        other if other.is_nullish() => Prop::Text(String::new()),
        other => Prop::Text(other.to_display_string()),
    }
}

struct Target {
    element: NodeRef,
    name: Rc<str>,
    namespace: Option<Rc<str>>,
}

impl Target {
    fn tag(&self) -> String {
        self.element
            .tag_name()
            .unwrap_or_default()
            .to_ascii_uppercase()
    }
}

struct SimpleAttribute {
    target: Target,
    sanitize: bool,
}

impl SimpleAttribute {
    fn prepare(&self, value: &Value) -> Option<String> {
        if self.sanitize {
            let tag = self.target.tag();
            normalize_attribute_value(&sanitize_attribute_value(
                Some(&tag),
                &self.target.name,
                value,
            ))
        } else {
            normalize_attribute_value(value)
        }
    }
}

impl DynamicAttribute for SimpleAttribute {
    fn set(&mut self, builder: &mut ElementBuilder, value: &Value) -> VmResult<()> {
        if let Some(text) = self.prepare(value) {
            builder.set_constructing_attribute(
                &self.target.name,
                &text,
                self.target.namespace.as_deref(),
            )?;
        }
        Ok(())
    }

    fn update(&mut self, value: &Value, dom: &dyn DomOperations) {
        let Target {
            element,
            name,
            namespace,
        } = &self.target;
        match self.prepare(value) {
            Some(text) => dom.set_attribute(element, name, &text, namespace.as_deref()),
            None => dom.remove_attribute(element, name, namespace.as_deref()),
        }
    }
}

struct DefaultProperty {
    target: Target,
    property: &'static str,
    sanitize: bool,
    last: Option<Value>,
}

impl DefaultProperty {
    fn prepare(&self, value: &Value) -> Value {
        if self.sanitize {
            sanitize_attribute_value(Some(&self.target.tag()), self.property, value)
        } else {
            value.clone()
        }
    }
}

impl DynamicAttribute for DefaultProperty {
    fn set(&mut self, builder: &mut ElementBuilder, value: &Value) -> VmResult<()> {
        let value = self.prepare(value);
        if !value.is_nullish() {
            builder.set_constructing_property(self.property, to_prop(&value))?;
        }
        self.last = Some(value);
        Ok(())
    }

    fn update(&mut self, value: &Value, dom: &dyn DomOperations) {
        let value = self.prepare(value);
        if self.last.as_ref().is_some_and(|last| last.identical(&value)) {
            return;
        }
        let element = &self.target.element;
        dom.set_property(element, self.property, to_prop(&value));
        if value.is_nullish() {
            dom.remove_attribute(element, &self.target.name, self.target.namespace.as_deref());
        }
        self.last = Some(value);
    }
}

/// `value` of text inputs and textareas.
struct InputValue {
    target: Target,
}

fn input_text(value: &Value) -> String {
    if value.is_nullish() {
        String::new()
    } else {
        value.to_display_string()
    }
}

impl DynamicAttribute for InputValue {
    fn set(&mut self, builder: &mut ElementBuilder, value: &Value) -> VmResult<()> {
        builder.set_constructing_property("value", Prop::Text(input_text(value)))
    }

    fn update(&mut self, value: &Value, dom: &dyn DomOperations) {
        let element = &self.target.element;
        let text = input_text(value);
        let current = element.property("value").map(|p| p.as_text()).unwrap_or_default();
        if current != text {
            dom.set_property(element, "value", Prop::Text(text));
        }
    }
}

/// `selected` of options.
struct OptionSelected {
    target: Target,
}

impl DynamicAttribute for OptionSelected {
    fn set(&mut self, builder: &mut ElementBuilder, value: &Value) -> VmResult<()> {
        if !value.is_nullish() && !matches!(value, Value::Bool(false)) {
            builder.set_constructing_property("selected", Prop::Flag(true))?;
        }
        Ok(())
    }

    fn update(&mut self, value: &Value, dom: &dyn DomOperations) {
        dom.set_property(&self.target.element, "selected", Prop::Flag(value.is_truthy()));
    }
}

/// Pick the write strategy for `name` on `element`.
pub fn dynamic_attribute_for(
    element: &NodeRef,
    name: &str,
    namespace: Option<&str>,
) -> Box<dyn DynamicAttribute> {
    let tag = element.tag_name().unwrap_or_default().to_ascii_uppercase();
    let target = |name: &str| Target {
        element: element.clone(),
        name: Rc::from(name),
        namespace: namespace.map(Rc::from),
    };
    let attribute = |name: &str| -> Box<dyn DynamicAttribute> {
        Box::new(SimpleAttribute {
            target: target(name),
            sanitize: requires_sanitization(Some(&tag), name),
        })
    };

    if element.namespace().as_deref() == Some(SVG_NAMESPACE) {
        return attribute(name);
    }

    match normalize_property(&tag, name) {
        Normalized::Attribute(name) => attribute(&*name),
        Normalized::Property(property) => {
            let sanitize = requires_sanitization(Some(&tag), property);
            if !sanitize && property == "value" && (tag == "INPUT" || tag == "TEXTAREA") {
                Box::new(InputValue {
                    target: target(name),
                })
            } else if !sanitize && property == "selected" && tag == "OPTION" {
                Box::new(OptionSelected {
                    target: target(name),
                })
            } else {
                Box::new(DefaultProperty {
                    target: target(name),
                    property,
                    sanitize,
                    last: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_for_url() {
        assert_eq!(protocol_for_url("JavaScript:alert(1)").as_deref(), Some("javascript:"));
        assert_eq!(protocol_for_url(" java\tscript:x").as_deref(), Some("javascript:"));
        assert_eq!(protocol_for_url("/relative/path"), None);
        assert_eq!(protocol_for_url("https://example.com").as_deref(), Some("https:"));
    }

    #[test]
    fn test_sanitization() {
        let unsafe_url = Value::from("javascript:alert(1)");
        assert_eq!(
            sanitize_attribute_value(Some("A"), "href", &unsafe_url).to_display_string(),
            "unsafe:javascript:alert(1)"
        );
        assert_eq!(
            sanitize_attribute_value(Some("DIV"), "href", &unsafe_url).to_display_string(),
            "javascript:alert(1)"
        );
        assert_eq!(
            sanitize_attribute_value(None, "src", &unsafe_url).to_display_string(),
            "unsafe:javascript:alert(1)"
        );
        assert_eq!(
            sanitize_attribute_value(Some("EMBED"), "src", &Value::from("movie.swf"))
                .to_display_string(),
            "unsafe:movie.swf"
        );
        assert!(sanitize_attribute_value(Some("A"), "href", &Value::Null).is_nullish());
    }

    #[test]
    fn test_normalization_table() {
        assert!(matches!(normalize_property("INPUT", "value"), Normalized::Property("value")));
        assert!(matches!(normalize_property("INPUT", "form"), Normalized::Attribute(_)));
        assert!(matches!(normalize_property("BUTTON", "type"), Normalized::Attribute(_)));
        assert!(matches!(normalize_property("DIV", "style"), Normalized::Attribute(_)));
        assert!(matches!(normalize_property("DIV", "class"), Normalized::Attribute(_)));
        assert!(matches!(normalize_property("DIV", "data-x"), Normalized::Attribute(_)));
    }

    #[test]
    fn test_attribute_values() {
        assert_eq!(normalize_attribute_value(&Value::Bool(true)).as_deref(), Some(""));
        assert_eq!(normalize_attribute_value(&Value::Bool(false)), None);
        assert_eq!(normalize_attribute_value(&Value::from(2)).as_deref(), Some("2"));
    }
}
