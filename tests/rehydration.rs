//! Server serialization followed by client rehydration of the same template.

use reflow::dom::html::serialize_children;
use reflow::value::{ListModel, ObjectModel};
use reflow::{Document, DomOperations, Environment, NodeRef, RenderMode, RenderOptions, Template, Value};
use serde_json::json;
use std::rc::Rc;

fn page() -> Rc<Template> {
    let block = json!({
        "symbols": ["i"],
        "hasEval": false,
        "statements": [
            [6, "p"], [9, "class", "intro"], [7], [0, "Hello "], [1, [19, 0, ["name"]], false], [8],
            [4, "if", [[19, 0, ["show"]]], null, {"statements": [[6, "b"], [7], [0, "yes"], [8]]}, null],
            [6, "ul"], [7],
            [4, "each", [[19, 0, ["items"]]], [["key"], ["@primitive"]],
                {"statements": [[6, "li"], [7], [1, [19, 1], false], [8]], "parameters": [1]}, null],
            [8]
        ]
    });
    let envelope = json!({"id": "page", "meta": {}, "block": block.to_string()});
    Template::from_json(&envelope.to_string()).unwrap()
}

struct Data {
    object: Rc<ObjectModel>,
    items: Rc<ListModel>,
}

fn data(env: &Environment) -> Data {
    let items = ListModel::from_values(env.clock(), vec![Value::from("a"), Value::from("b")]);
    let object = ObjectModel::from_pairs(
        env.clock(),
        [
            ("name", Value::from("Ada")),
            ("show", Value::from(true)),
            ("items", Value::List(items.clone())),
        ],
    );
    Data { object, items }
}

fn render_to_string(mode: RenderMode) -> String {
    let document = Rc::new(Document::new());
    let env = Environment::with_dom(document.clone());
    let root = document.create_element("div", None);
    let data = data(&env);
    page()
        .render(&env, RenderOptions::new(Value::Object(data.object), root.clone()).mode(mode))
        .unwrap()
        .sync()
        .unwrap();
    serialize_children(&root)
}

/// Drop the `<!--%...%-->` marker comments serialize mode adds.
fn strip_markers(html: &str) -> String {
    let mut out = String::new();
    let mut rest = html;
    while let Some(start) = rest.find("<!--%") {
        out.push_str(&rest[..start]);
        match rest[start..].find("%-->") {
            Some(end) => rest = &rest[start + end + 4..],
            None => {
                rest = &rest[start..];
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

#[test]
fn test_serialize_emits_block_markers() {
    let _ = env_logger::builder().is_test(true).try_init();
    let html = render_to_string(RenderMode::Serialize);
    assert!(html.starts_with("<!--%+block:0%-->"));
    assert!(html.ends_with("<!--%-block:0%-->"));
    assert!(html.contains("<p class=\"intro\">"));
    // Every item block and its dynamic text carry their own markers.
    assert!(html.contains("<li><!--%+block:"));
    assert!(strip_markers(&html).contains("<ul><li>a</li><li>b</li></ul>"));
}

#[test]
fn test_rehydrate_adopts_server_markup() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = render_to_string(RenderMode::Serialize);
    let expected = render_to_string(RenderMode::Append);

    let document = Rc::new(Document::new());
    let env = Environment::with_dom(document.clone());
    let root = document.element_with_html("div", &server);
    let paragraph = root
        .children()
        .into_iter()
        .find(NodeRef::is_element)
        .unwrap();

    let data = data(&env);
    let result = page()
        .render(
            &env,
            RenderOptions::new(Value::Object(data.object.clone()), root.clone())
                .mode(RenderMode::Rehydrate),
        )
        .unwrap()
        .sync()
        .unwrap();

    assert_eq!(serialize_children(&root), expected);
    let adopted = root.children().into_iter().find(NodeRef::is_element).unwrap();
    assert!(adopted.ptr_eq(&paragraph));

    // The rehydrated tree is live.
    data.object.set("name", Value::from("Grace"));
    data.object.set("show", Value::from(false));
    data.items.push(Value::from("c"));
    result.rerender().unwrap();
    assert_eq!(adopted.text_content(), "Hello Grace");
    assert!(!serialize_children(&root).contains("<b>yes</b>"));
    assert!(serialize_children(&root).contains("<li>a</li><li>b</li><li>c</li>"));
}

#[test]
fn test_rehydrate_replaces_mismatched_markup() {
    let _ = env_logger::builder().is_test(true).try_init();
    let expected = render_to_string(RenderMode::Append);
    let server = render_to_string(RenderMode::Serialize).replace("Ada", "Stale");

    let document = Rc::new(Document::new());
    let env = Environment::with_dom(document.clone());
    let root = document.element_with_html("div", &server);
    let data = data(&env);
    page()
        .render(
            &env,
            RenderOptions::new(Value::Object(data.object), root.clone())
                .mode(RenderMode::Rehydrate),
        )
        .unwrap()
        .sync()
        .unwrap();
    assert_eq!(serialize_children(&root), expected);
}

#[test]
fn test_rehydrate_with_next_sibling_is_unsupported() {
    let _ = env_logger::builder().is_test(true).try_init();
    let document = Rc::new(Document::new());
    let env = Environment::with_dom(document.clone());
    let root = document.element_with_html("div", "<i></i>");
    let sibling = root.first_child().unwrap();
    let data = data(&env);
    let error = page()
        .render(
            &env,
            RenderOptions::new(Value::Object(data.object), root.clone())
                .mode(RenderMode::Rehydrate)
                .next_sibling(sibling),
        )
        .err();
    assert!(error.is_some());
    assert!(!env.in_transaction());
}

#[test]
fn test_rehydrate_adopts_trusted_html() {
    let _ = env_logger::builder().is_test(true).try_init();
    let block = json!({
        "symbols": [],
        "hasEval": false,
        "statements": [[6, "div"], [7], [1, [19, 0, ["body"]], true], [8]]
    });
    let envelope = json!({"id": "raw", "meta": {}, "block": block.to_string()});
    let raw = Template::from_json(&envelope.to_string()).unwrap();
    let render_with = |mode: RenderMode, root: &NodeRef, env: &Rc<Environment>| {
        let object = ObjectModel::from_pairs(env.clock(), [("body", Value::from("<b>bold</b> text"))]);
        raw.render(env, RenderOptions::new(Value::Object(object), root.clone()).mode(mode))
            .unwrap()
            .sync()
            .unwrap()
    };

    let document = Rc::new(Document::new());
    let env = Environment::with_dom(document.clone());
    let server_root = document.create_element("div", None);
    render_with(RenderMode::Serialize, &server_root, &env);
    let server = serialize_children(&server_root);
    assert!(server.contains("<!--%glimmer%--><b>bold</b> text<!--%glimmer%-->"));

    let first_element = |node: &NodeRef| node.children().into_iter().find(NodeRef::is_element);
    let root = document.element_with_html("div", &server);
    let bold = first_element(&root).and_then(|div| first_element(&div)).unwrap();
    render_with(RenderMode::Rehydrate, &root, &env);
    assert_eq!(serialize_children(&root), "<div><b>bold</b> text</div>");
    let adopted = first_element(&root).and_then(|div| first_element(&div)).unwrap();
    assert!(adopted.ptr_eq(&bold));
}
