//! Templates: decoded wire statements plus their compiled forms.
//!
//! A [`Template`] is environment independent. It is compiled lazily into
//! the program of whichever environment renders it, once per environment
//! and use (entry point, component layout, partial).

use crate::builder::ElementBuilder;
use crate::compiler::layout;
use crate::compiler::wire::{self, SerializedTemplate};
use crate::compiler::{compile, CompileMode, Statement};
use crate::core::{CompileResult, RenderOptions, VmResult};
use crate::environment::Environment;
use crate::program::CompiledBlock;
use crate::reference::ConstReference;
use crate::vm::{AppendVM, DynamicScope, TemplateIterator};
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

const ATTRS: &str = "&attrs";

pub struct Template {
    id: Rc<str>,
    meta: serde_json::Value,
    symbols: Rc<[Rc<str>]>,
    has_eval: bool,
    statements: Vec<Statement>,
    compiled: RefCell<HashMap<(usize, CompileMode), Rc<CompiledBlock>>>,
}

impl Template {
    /// Decode a precompiled template envelope.
    pub fn from_json(json: &str) -> CompileResult<Rc<Template>> {
        let serialized: SerializedTemplate = serde_json::from_str(json)?;
        let block = serialized.block.decode()?;
        let statements = wire::decode_statements(&block.statements)?;
        Ok(Rc::new(Template {
            id: Rc::from(serialized.id.as_deref().unwrap_or("anonymous")),
            meta: serialized.meta,
            symbols: block.symbols.iter().map(|s| Rc::from(s.as_str())).collect(),
            has_eval: block.has_eval,
            statements,
            compiled: RefCell::new(HashMap::new()),
        }))
    }

    pub fn from_statements(id: &str, statements: Vec<Statement>, symbols: &[&str]) -> Rc<Template> {
        Rc::new(Template {
            id: Rc::from(id),
            meta: serde_json::Value::Null,
            symbols: symbols.iter().map(|s| Rc::from(*s)).collect(),
            has_eval: false,
            statements,
            compiled: RefCell::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn meta(&self) -> &serde_json::Value {
        &self.meta
    }

    pub fn symbols(&self) -> &[Rc<str>] {
        &self.symbols
    }

    pub fn has_eval(&self) -> bool {
        self.has_eval
    }

    fn compiled(
        &self,
        env: &Environment,
        mode: CompileMode,
        build: impl FnOnce() -> CompileResult<Rc<CompiledBlock>>,
    ) -> VmResult<Rc<CompiledBlock>> {
        let key = (env.id(), mode);
        if let Some(block) = self.compiled.borrow().get(&key) {
            return Ok(block.clone());
        }
        let block = build()?;
        self.compiled.borrow_mut().insert(key, block.clone());
        Ok(block)
    }

    pub fn compile_entry(&self, env: &Environment) -> VmResult<Rc<CompiledBlock>> {
        self.compiled(env, CompileMode::Entry, || {
            compile(
                env,
                &self.id,
                self.symbols.clone(),
                self.has_eval,
                &self.statements,
                CompileMode::Entry,
            )
        })
    }

    /// Compile as a component layout. The layout always has an `&attrs`
    /// symbol for the invocation's attributes.
    pub fn compile_layout(&self, env: &Environment) -> VmResult<Rc<CompiledBlock>> {
        self.compiled(env, CompileMode::Layout, || {
            let mut symbols: Vec<Rc<str>> = self.symbols.to_vec();
            let attrs_slot = match symbols.iter().position(|s| &**s == ATTRS) {
                Some(index) => index + 1,
                None => {
                    symbols.push(Rc::from(ATTRS));
                    symbols.len()
                }
            };
            let statements = layout::scan(&self.statements, attrs_slot);
            compile(
                env,
                &self.id,
                Rc::from(symbols),
                self.has_eval,
                &statements,
                CompileMode::Layout,
            )
        })
    }

    pub fn compile_partial(&self, env: &Environment) -> VmResult<Rc<CompiledBlock>> {
        self.compiled(env, CompileMode::Partial, || {
            compile(
                env,
                &self.id,
                self.symbols.clone(),
                self.has_eval,
                &self.statements,
                CompileMode::Partial,
            )
        })
    }

    /// Start rendering into `options.parent`. Opens a transaction when none
    /// is active; it is committed when the iterator finishes.
    pub fn render(&self, env: &Rc<Environment>, options: RenderOptions) -> VmResult<TemplateIterator> {
        let entry = self.compile_entry(env)?;
        let RenderOptions {
            self_value,
            parent,
            next_sibling,
            dynamic_scope,
            mode,
        } = options;

        let owns_transaction = !env.in_transaction();
        if owns_transaction {
            env.begin();
        }
        let vm = ElementBuilder::for_initial_render(env.dom().clone(), parent, next_sibling, mode)
            .and_then(|builder| {
                AppendVM::initial(
                    env.clone(),
                    ConstReference::create(self_value),
                    dynamic_scope.unwrap_or_else(DynamicScope::new),
                    builder,
                    &entry,
                )
            });
        match vm {
            Ok(vm) => {
                log::debug!("rendering {} ({mode:?})", self.id);
                Ok(TemplateIterator::new(vm, owns_transaction))
            }
            Err(error) => {
                if owns_transaction {
                    env.rollback();
                }
                Err(error)
            }
        }
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("id", &self.id)
            .field("symbols", &self.symbols)
            .field("statements", &self.statements.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Document, DomOperations};
    use crate::value::Value;

    const GREETING: &str = r#"{
        "id": "greeting",
        "meta": {"moduleName": "greeting.hbs"},
        "block": "{\"symbols\":[],\"hasEval\":false,\"statements\":[[6,\"p\"],[7],[0,\"Hello \"],[1,[19,0,[\"name\"]],false],[8]]}"
    }"#;

    #[test]
    fn test_from_json() {
        let template = Template::from_json(GREETING).unwrap();
        assert_eq!(template.id(), "greeting");
        assert_eq!(template.meta()["moduleName"], "greeting.hbs");
        assert!(template.symbols().is_empty());
        assert!(Template::from_json("{\"block\": 4}").is_err());
    }

    #[test]
    fn test_compiled_once_per_environment() {
        let template = Template::from_json(GREETING).unwrap();
        let env = Environment::new();
        let first = template.compile_entry(&env).unwrap();
        let second = template.compile_entry(&env).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(env.stats().templates_compiled, 1);

        let other = Environment::new();
        template.compile_entry(&other).unwrap();
        assert_eq!(other.stats().templates_compiled, 1);
    }

    #[test]
    fn test_layout_gains_attrs_symbol() {
        let template = Template::from_statements("layout", vec![], &["@title"]);
        let env = Environment::new();
        let layout = template.compile_layout(&env).unwrap();
        assert_eq!(layout.symbol_slot("&attrs"), Some(2));
        assert_eq!(template.symbols().len(), 1);
    }

    #[test]
    fn test_render_greeting() {
        let document = Rc::new(Document::new());
        let env = Environment::with_dom(document.clone());
        let template = Template::from_json(GREETING).unwrap();
        let self_value = Value::from_json(env.clock(), &serde_json::json!({"name": "Ada"}));
        let parent = document.create_element("div", None);
        let result = template
            .render(&env, RenderOptions::new(self_value, parent.clone()))
            .unwrap()
            .sync()
            .unwrap();
        assert_eq!(
            crate::dom::html::serialize_children(&parent),
            "<p>Hello Ada</p>"
        );
        assert!(!env.in_transaction());
        result.rerender().unwrap();
    }
}
