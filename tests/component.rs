//! Component invocation: layouts, attributes, yields and lifecycle hooks.

use reflow::builder::Destroyable;
use reflow::component::{Component, ComponentInstance};
use reflow::dom::html::serialize_children;
use reflow::reference::{ReferenceRef, Tag};
use reflow::value::{ListModel, ObjectModel};
use reflow::vm::{CapturedArguments, DynamicScope};
use reflow::{
    BasicComponentManager, ComponentDefinition, ComponentManager, Document, DomOperations,
    Environment, NodeRef, RenderOptions, RenderResult, RerenderOptions, SimpleHelper, Template,
    Value,
};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

fn template(id: &str, symbols: &[&str], statements: serde_json::Value) -> Rc<Template> {
    let block = json!({"symbols": symbols, "hasEval": false, "statements": statements});
    let envelope = json!({"id": id, "meta": {}, "block": block.to_string()});
    Template::from_json(&envelope.to_string()).unwrap()
}

fn setup() -> (Rc<Environment>, NodeRef) {
    let _ = env_logger::builder().is_test(true).try_init();
    let document = Rc::new(Document::new());
    let env = Environment::with_dom(document.clone());
    let parent = document.create_element("div", None);
    (env, parent)
}

fn register(env: &Environment, name: &str, layout: Rc<Template>) {
    env.register_component(ComponentDefinition::new(
        name,
        Rc::new(BasicComponentManager),
        layout,
    ));
}

fn render(env: &Rc<Environment>, template: &Template, data: Value, parent: &NodeRef) -> RenderResult {
    template
        .render(env, RenderOptions::new(data, parent.clone()))
        .unwrap()
        .sync()
        .unwrap()
}

fn classes(node: &NodeRef) -> Vec<String> {
    node.attribute("class")
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_angle_bracket_component_merges_attributes() {
    let (env, parent) = setup();
    // <div class="card" ...attributes>{{yield this.title}}</div>
    register(
        &env,
        "x-card",
        template(
            "x-card",
            &["&default"],
            json!([[6, "div"], [9, "class", "card"], [7], [11, 1, [[19, 0, ["title"]]]], [8]]),
        ),
    );
    // <x-card class="big" id="main" @title={{heading}} as |t|>{{t}}!</x-card>
    let data = ObjectModel::from_pairs(env.clock(), [("heading", Value::from("Hello"))]);
    let t = template(
        "page",
        &["t"],
        json!([[5, "x-card", [[9, "class", "big"], [9, "id", "main"]],
            [["@title"], [[19, 0, ["heading"]]]],
            {"statements": [[1, [19, 1], false], [0, "!"]], "parameters": [1]}]]),
    );
    let result = render(&env, &t, Value::Object(data.clone()), &parent);

    let card = parent.children().into_iter().find(NodeRef::is_element).unwrap();
    assert_eq!(card.tag_name().as_deref(), Some("div"));
    let class = classes(&card);
    assert!(class.contains(&"card".to_string()));
    assert!(class.contains(&"big".to_string()));
    assert_eq!(card.attribute("id").as_deref(), Some("main"));
    assert_eq!(card.text_content(), "Hello!");

    data.set("heading", Value::from("Bye"));
    result.rerender().unwrap();
    assert_eq!(card.text_content(), "Bye!");
}

#[test]
fn test_invocation_attribute_overrides_layout() {
    let (env, parent) = setup();
    register(
        &env,
        "x-box",
        template("x-box", &[], json!([[6, "section"], [9, "title", "inner"], [7], [8]])),
    );
    let t = template(
        "page",
        &[],
        json!([[5, "x-box", [[9, "title", "outer"]], null, null]]),
    );
    render(&env, &t, Value::Object(ObjectModel::new(env.clock())), &parent);
    let section = parent.children().into_iter().find(NodeRef::is_element).unwrap();
    assert_eq!(section.attribute("title").as_deref(), Some("outer"));
}

#[test]
fn test_curly_component_gets_named_arguments() {
    let (env, parent) = setup();
    register(
        &env,
        "x-greeting",
        template("x-greeting", &[], json!([[6, "b"], [7], [0, "Hi "], [1, [19, 0, ["name"]], false], [8]])),
    );
    let data = ObjectModel::from_pairs(env.clock(), [("who", Value::from("Ada"))]);
    let t = template(
        "page",
        &[],
        json!([[1, [25, "x-greeting", [], [["name"], [[19, 0, ["who"]]]]], false]]),
    );
    let result = render(&env, &t, Value::Object(data.clone()), &parent);
    assert!(serialize_children(&parent).contains("<b>Hi Ada</b>"));

    data.set("who", Value::from("Grace"));
    result.rerender().unwrap();
    assert!(serialize_children(&parent).contains("<b>Hi Grace</b>"));
}

#[test]
fn test_named_argument_symbols_in_layout() {
    let (env, parent) = setup();
    register(
        &env,
        "x-label",
        template("x-label", &["@text"], json!([[6, "label"], [7], [1, [19, 1], false], [8]])),
    );
    let t = template(
        "page",
        &[],
        json!([[4, "x-label", [], [["text"], ["Name"]], null, null]]),
    );
    render(&env, &t, Value::Object(ObjectModel::new(env.clock())), &parent);
    assert!(serialize_children(&parent).contains("<label>Name</label>"));
}

#[test]
fn test_helper_shadows_component() {
    let (env, parent) = setup();
    register(&env, "thing", template("thing", &[], json!([[0, "component"]])));
    env.register_helper("thing", Rc::new(SimpleHelper::new(|_| Value::from("helper"))));
    let t = template("page", &[], json!([[1, [25, "thing", []], false]]));
    render(&env, &t, Value::Object(ObjectModel::new(env.clock())), &parent);
    assert_eq!(parent.text_content(), "helper");
}

#[test]
fn test_has_block() {
    let (env, parent) = setup();
    register(
        &env,
        "x-probe",
        template("x-probe", &["&default"], json!([[6, "i"], [7], [1, [22, 1], false], [8]])),
    );
    let t = template(
        "page",
        &[],
        json!([
            [4, "x-probe", [], null, {"statements": [[0, "body"]]}, null],
            [4, "x-probe", [], null, null, null]
        ]),
    );
    render(&env, &t, Value::Object(ObjectModel::new(env.clock())), &parent);
    let probes: Vec<String> = parent
        .children()
        .into_iter()
        .filter(NodeRef::is_element)
        .map(|node| node.text_content())
        .collect();
    assert_eq!(probes, vec!["true", "false"]);
}

#[test]
fn test_dynamic_component_switches_definition() {
    let (env, parent) = setup();
    register(&env, "x-a", template("x-a", &[], json!([[0, "A:"], [1, [19, 0, ["n"]], false]])));
    register(&env, "x-b", template("x-b", &[], json!([[0, "B:"], [1, [19, 0, ["n"]], false]])));
    let data = ObjectModel::from_pairs(env.clock(), [("which", Value::from("x-a"))]);
    let t = template(
        "page",
        &[],
        json!([[1, [25, "component", [[19, 0, ["which"]]], [["n"], [1]]], false]]),
    );
    let result = render(&env, &t, Value::Object(data.clone()), &parent);
    assert_eq!(parent.text_content(), "A:1");

    data.set("which", Value::from("x-b"));
    result.rerender().unwrap();
    assert_eq!(parent.text_content(), "B:1");

    // An unknown name renders nothing.
    data.set("which", Value::from("x-missing"));
    result.rerender().unwrap();
    assert_eq!(parent.text_content(), "");
}

#[test]
fn test_component_value_in_content_position() {
    let (env, parent) = setup();
    let definition = ComponentDefinition::new(
        "x-inline",
        Rc::new(BasicComponentManager),
        template("x-inline", &[], json!([[6, "em"], [7], [0, "inline"], [8]])),
    );
    let data = ObjectModel::from_pairs(
        env.clock(),
        [("widget", Value::Component(definition)), ("other", Value::from("text"))],
    );
    let t = template(
        "page",
        &[],
        json!([[1, [19, 0, ["widget"]], false], [1, [19, 0, ["other"]], false]]),
    );
    render(&env, &t, Value::Object(data), &parent);
    let html = serialize_children(&parent);
    assert!(html.contains("<em>inline</em>"));
    assert!(html.ends_with("text"));
}

type Log = Rc<RefCell<Vec<String>>>;

struct Recorder {
    log: Log,
    inner: BasicComponentManager,
}

struct Teardown(Log);

impl Destroyable for Teardown {
    fn destroy(&self) {
        self.0.borrow_mut().push("destroy".to_string());
    }
}

impl ComponentManager for Recorder {
    fn create(
        &self,
        env: &Environment,
        definition: &Rc<ComponentDefinition>,
        args: CapturedArguments,
        dynamic_scope: &DynamicScope,
        caller_self: &ReferenceRef,
        has_default_block: bool,
    ) -> reflow::VmResult<Component> {
        self.log.borrow_mut().push("create".to_string());
        self.inner
            .create(env, definition, args, dynamic_scope, caller_self, has_default_block)
    }

    fn get_self(&self, component: &Component) -> ReferenceRef {
        self.inner.get_self(component)
    }

    fn get_tag(&self, component: &Component) -> Tag {
        self.inner.get_tag(component)
    }

    fn did_create_element(
        &self,
        component: &Component,
        element: &NodeRef,
        operations: &mut reflow::component::ComponentElementOperations,
    ) {
        self.log.borrow_mut().push(format!(
            "element {}",
            element.tag_name().unwrap_or_default()
        ));
        self.inner.did_create_element(component, element, operations);
    }

    fn did_create(&self, _component: &Component) {
        self.log.borrow_mut().push("did_create".to_string());
    }

    fn update(&self, component: &Component, dynamic_scope: &DynamicScope) {
        self.log.borrow_mut().push("update".to_string());
        self.inner.update(component, dynamic_scope);
    }

    fn did_update(&self, _component: &Component) {
        self.log.borrow_mut().push("did_update".to_string());
    }

    fn get_destructor(&self, _component: &Component) -> Option<Rc<dyn Destroyable>> {
        Some(Rc::new(Teardown(self.log.clone())))
    }
}

/// Registers `x-life`, a `<p>{{value}}</p>` component whose hooks go to `log`.
fn register_recorded(env: &Environment, log: &Log) {
    env.register_component(ComponentDefinition::new(
        "x-life",
        Rc::new(Recorder {
            log: log.clone(),
            inner: BasicComponentManager,
        }),
        template("x-life", &[], json!([[6, "p"], [7], [1, [19, 0, ["value"]], false], [8]])),
    ));
}

fn destroys(log: &Log) -> usize {
    log.borrow().iter().filter(|entry| *entry == "destroy").count()
}

/// `{{#each items key="@primitive" as |item|}}{{x-life value=item}}{{/each}}`
fn recorded_list(env: &Environment, log: &Log, items: &[&str]) -> (Rc<ListModel>, Rc<Template>, Value) {
    register_recorded(env, log);
    let list = ListModel::from_values(env.clock(), items.iter().map(|s| Value::from(*s)).collect());
    let data = ObjectModel::from_pairs(env.clock(), [("items", Value::List(list.clone()))]);
    let t = template(
        "page",
        &["item"],
        json!([[4, "each", [[19, 0, ["items"]]], [["key"], ["@primitive"]],
            {"statements": [[4, "x-life", [], [["value"], [[19, 1]]], null, null]], "parameters": [1]},
            null]]),
    );
    (list, t, Value::Object(data))
}

#[test]
fn test_list_delete_runs_item_destructor() {
    let (env, parent) = setup();
    let log: Log = Rc::default();
    let (list, t, data) = recorded_list(&env, &log, &["a", "b"]);
    let result = render(&env, &t, data, &parent);
    assert_eq!(parent.text_content(), "ab");

    log.borrow_mut().clear();
    list.remove(1);
    result.rerender().unwrap();
    assert_eq!(parent.text_content(), "a");
    assert_eq!(destroys(&log), 1);
}

#[test]
fn test_destroy_runs_destructors_inside_each() {
    let (env, parent) = setup();
    let log: Log = Rc::default();
    let (_list, t, data) = recorded_list(&env, &log, &["a", "b"]);
    let result = render(&env, &t, data, &parent);

    log.borrow_mut().clear();
    result.destroy();
    assert_eq!(*log.borrow(), vec!["destroy", "destroy"]);
    assert_eq!(parent.child_count(), 0);
}

#[test]
fn test_emptied_list_runs_destructors_on_replay() {
    let (env, parent) = setup();
    let log: Log = Rc::default();
    let (list, t, data) = recorded_list(&env, &log, &["a"]);
    let result = render(&env, &t, data, &parent);
    assert_eq!(parent.text_content(), "a");

    // Emptying the list flips the presence check and re-runs the whole block.
    log.borrow_mut().clear();
    list.replace(Vec::new());
    result.rerender().unwrap();
    assert_eq!(parent.text_content(), "");
    assert_eq!(destroys(&log), 1);
}

#[test]
fn test_cache_group_skips_unchanged_component() {
    let (env, parent) = setup();
    let log: Log = Rc::default();
    register_recorded(&env, &log);
    let data = ObjectModel::from_pairs(env.clock(), [("v", Value::from(1))]);
    let t = template(
        "page",
        &[],
        json!([[4, "x-life", [], [["value"], [[19, 0, ["v"]]]], null, null]]),
    );
    let result = render(&env, &t, Value::Object(data), &parent);

    log.borrow_mut().clear();
    result.rerender().unwrap();
    assert!(log.borrow().is_empty());

    // Without the guard every opcode in the group runs, hooks included.
    result
        .rerender_with(RerenderOptions {
            always_revalidate: true,
        })
        .unwrap();
    assert_eq!(*log.borrow(), vec!["update", "did_update"]);
    assert_eq!(parent.text_content(), "1");

    log.borrow_mut().clear();
    result.rerender().unwrap();
    assert!(log.borrow().is_empty());
}

#[test]
fn test_lifecycle_hooks() {
    let (env, parent) = setup();
    let log: Log = Rc::default();
    register_recorded(&env, &log);
    let data = ObjectModel::from_pairs(env.clock(), [("v", Value::from(1))]);
    let t = template(
        "page",
        &[],
        json!([[4, "x-life", [], [["value"], [[19, 0, ["v"]]]], null, null]]),
    );
    let result = render(&env, &t, Value::Object(data.clone()), &parent);
    assert_eq!(*log.borrow(), vec!["create", "element p", "did_create"]);
    assert_eq!(parent.text_content(), "1");

    // Unchanged arguments: no hooks run.
    log.borrow_mut().clear();
    result.rerender().unwrap();
    assert!(log.borrow().is_empty());

    data.set("v", Value::from(2));
    result.rerender().unwrap();
    assert_eq!(parent.text_content(), "2");
    assert_eq!(*log.borrow(), vec!["update", "did_update"]);

    log.borrow_mut().clear();
    result.destroy();
    assert_eq!(*log.borrow(), vec!["destroy"]);
    assert_eq!(parent.child_count(), 0);
}

#[test]
fn test_component_instance_exposes_element() {
    let (env, parent) = setup();
    let definition = ComponentDefinition::new(
        "x-el",
        Rc::new(BasicComponentManager),
        template("x-el", &[], json!([[6, "article"], [7], [8]])),
    );
    let instance: Component = ComponentInstance::new(
        definition.clone(),
        CapturedArguments::empty(),
        ObjectModel::new(env.clock()),
        false,
    );
    assert!(instance.element().is_none());
    assert!(!instance.has_default_block());

    env.register_component(definition);
    let t = template("page", &[], json!([[5, "x-el", [], null, null]]));
    render(&env, &t, Value::Object(ObjectModel::new(env.clock())), &parent);
    assert!(serialize_children(&parent).contains("<article></article>"));
}
