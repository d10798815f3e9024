//! Keyed `#each` lists: first render, reconciliation and the else branch.

use proptest::prelude::*;
use reflow::dom::html::serialize_children;
use reflow::value::{ListModel, ObjectModel};
use reflow::{Document, DomOperations, Environment, NodeRef, RenderOptions, RenderResult, Template, Value};
use serde_json::json;
use std::rc::Rc;

fn template(id: &str, symbols: &[&str], statements: serde_json::Value) -> Rc<Template> {
    let block = json!({"symbols": symbols, "hasEval": false, "statements": statements});
    let envelope = json!({"id": id, "meta": {}, "block": block.to_string()});
    Template::from_json(&envelope.to_string()).unwrap()
}

/// `<ul>{{#each items key=... as |item|}}<li>{{item}}</li>{{else}}<p>empty</p>{{/each}}</ul>`
fn list_template(key: &str) -> Rc<Template> {
    template(
        "list",
        &["item"],
        json!([[6, "ul"], [7],
            [4, "each", [[19, 0, ["items"]]], [["key"], [key]],
                {"statements": [[6, "li"], [7], [1, [19, 1], false], [8]], "parameters": [1]},
                {"statements": [[6, "p"], [7], [0, "empty"], [8]]}],
            [8]]),
    )
}

struct Fixture {
    document: Rc<Document>,
    env: Rc<Environment>,
    list: Rc<ListModel>,
    root: NodeRef,
    result: RenderResult,
}

fn render_list(key: &str, items: &[&str]) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let document = Rc::new(Document::new());
    let env = Environment::with_dom(document.clone());
    let list = ListModel::from_values(env.clock(), items.iter().map(|s| Value::from(*s)).collect());
    let data = ObjectModel::from_pairs(env.clock(), [("items", Value::List(list.clone()))]);
    let root = document.create_element("div", None);
    let result = list_template(key)
        .render(&env, RenderOptions::new(Value::Object(data), root.clone()))
        .unwrap()
        .sync()
        .unwrap();
    Fixture {
        document,
        env,
        list,
        root,
        result,
    }
}

fn items(root: &NodeRef) -> Vec<NodeRef> {
    root.first_child()
        .map(|ul| ul.children().into_iter().filter(NodeRef::is_element).collect())
        .unwrap_or_default()
}

fn texts(root: &NodeRef) -> Vec<String> {
    items(root).iter().map(NodeRef::text_content).collect()
}

#[test]
fn test_first_render() {
    let fixture = render_list("@primitive", &["a", "b", "c"]);
    assert_eq!(
        serialize_children(&fixture.root),
        "<ul><li>a</li><li>b</li><li>c</li></ul>"
    );
}

#[test]
fn test_keyed_reorder_keeps_nodes() {
    let fixture = render_list("@primitive", &["a", "b", "c"]);
    let before = items(&fixture.root);

    fixture
        .list
        .replace(vec![Value::from("c"), Value::from("a"), Value::from("d")]);
    fixture.result.rerender().unwrap();

    assert_eq!(
        serialize_children(&fixture.root),
        "<ul><li>c</li><li>a</li><li>d</li></ul>"
    );
    let after = items(&fixture.root);
    assert!(after[0].ptr_eq(&before[2]));
    assert!(after[1].ptr_eq(&before[0]));
    assert!(before.iter().all(|old| !old.ptr_eq(&after[2])));
    // "b" is gone from the document after the first reconciliation.
    assert!(before[1].parent().is_none());
}

#[test]
fn test_first_reconciliation_deletes_dropped_items() {
    let fixture = render_list("@primitive", &["a", "b", "c"]);
    let before = items(&fixture.root);
    fixture.list.remove(0);
    fixture.result.rerender().unwrap();
    assert_eq!(texts(&fixture.root), vec!["b", "c"]);
    assert!(before[0].parent().is_none());
    assert!(items(&fixture.root)[0].ptr_eq(&before[1]));
}

#[test]
fn test_append_and_remove() {
    let fixture = render_list("@primitive", &["a", "b"]);
    fixture.list.push(Value::from("c"));
    fixture.result.rerender().unwrap();
    assert_eq!(texts(&fixture.root), vec!["a", "b", "c"]);

    fixture.list.remove(0);
    fixture.result.rerender().unwrap();
    assert_eq!(texts(&fixture.root), vec!["b", "c"]);
}

#[test]
fn test_key_by_property() {
    let _ = env_logger::builder().is_test(true).try_init();
    let document = Rc::new(Document::new());
    let env = Environment::with_dom(document.clone());
    let row = |id: &str, label: &str| {
        Value::Object(ObjectModel::from_pairs(
            env.clock(),
            [("id", Value::from(id)), ("label", Value::from(label))],
        ))
    };
    let first = row("1", "one");
    let list = ListModel::from_values(env.clock(), vec![first.clone(), row("2", "two")]);
    let data = ObjectModel::from_pairs(env.clock(), [("rows", Value::List(list.clone()))]);
    let t = template(
        "rows",
        &["row"],
        json!([[4, "each", [[19, 0, ["rows"]]], [["key"], ["id"]],
            {"statements": [[6, "span"], [7], [1, [19, 1, ["label"]], false], [8]], "parameters": [1]},
            null]]),
    );
    let root = document.create_element("div", None);
    let result = t
        .render(&env, RenderOptions::new(Value::Object(data), root.clone()))
        .unwrap()
        .sync()
        .unwrap();
    assert_eq!(root.text_content(), "onetwo");
    let span = root.first_child().unwrap();

    // Same key, new object: the item updates in place.
    list.set(0, row("1", "uno"));
    result.rerender().unwrap();
    assert_eq!(root.text_content(), "unotwo");
    assert!(root.first_child().unwrap().ptr_eq(&span));
}

#[test]
fn test_else_branch_on_empty() {
    let fixture = render_list("@primitive", &[]);
    assert_eq!(serialize_children(&fixture.root), "<ul><p>empty</p></ul>");

    fixture.list.push(Value::from("x"));
    fixture.result.rerender().unwrap();
    assert_eq!(serialize_children(&fixture.root), "<ul><li>x</li></ul>");

    fixture.list.replace(Vec::new());
    fixture.result.rerender().unwrap();
    assert_eq!(serialize_children(&fixture.root), "<ul><p>empty</p></ul>");
}

#[test]
fn test_index_keys_update_in_place() {
    let fixture = render_list("@index", &["a", "b"]);
    let before = items(&fixture.root);
    fixture
        .list
        .replace(vec![Value::from("b"), Value::from("a")]);
    fixture.result.rerender().unwrap();
    assert_eq!(texts(&fixture.root), vec!["b", "a"]);
    let after = items(&fixture.root);
    assert!(after[0].ptr_eq(&before[0]));
    assert!(after[1].ptr_eq(&before[1]));
}

#[test]
fn test_unchanged_list_touches_nothing() {
    let fixture = render_list("@primitive", &["a", "b"]);
    let mutations = fixture.document.mutation_count();
    fixture.result.rerender().unwrap();
    assert_eq!(fixture.document.mutation_count(), mutations);
    assert!(!fixture.env.in_transaction());
}

#[test]
fn test_destroy_clears_list() {
    let fixture = render_list("@primitive", &["a", "b"]);
    let Fixture { root, result, .. } = fixture;
    result.destroy();
    assert_eq!(serialize_children(&root), "");
}

fn unique_keys() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::hash_set("[a-h]", 0..8).prop_map(|set| set.into_iter().collect())
}

proptest! {
    #[test]
    fn prop_reconciliation_matches_fresh_render(
        initial in unique_keys(),
        next in unique_keys(),
    ) {
        let initial_refs: Vec<&str> = initial.iter().map(String::as_str).collect();
        let fixture = render_list("@primitive", &initial_refs);
        let before: Vec<(String, NodeRef)> = texts(&fixture.root)
            .into_iter()
            .zip(items(&fixture.root))
            .filter(|(text, _)| text != "empty")
            .collect();

        fixture
            .list
            .replace(next.iter().map(|s| Value::from(s.as_str())).collect());
        fixture.result.rerender().unwrap();

        let next_refs: Vec<&str> = next.iter().map(String::as_str).collect();
        let fresh = render_list("@primitive", &next_refs);
        prop_assert_eq!(
            serialize_children(&fixture.root),
            serialize_children(&fresh.root)
        );

        // Items whose key survived keep their element.
        if !next.is_empty() {
            for node in items(&fixture.root) {
                let text = node.text_content();
                if let Some((_, old)) = before.iter().find(|(key, _)| *key == text) {
                    prop_assert!(node.ptr_eq(old));
                }
            }
        }
    }
}
