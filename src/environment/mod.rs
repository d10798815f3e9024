// The environment is everything a template render needs from its host: the DOM operations
// to build with, the revision clock every tag of this render ticks against, the program
// that compiled templates are committed to, the arena holding the updating opcodes, and
// the registries the compiler resolves helper, modifier, component and partial names in.
// It also owns the transaction that batches lifecycle hooks until the DOM of a pass is
// complete. When no transaction is open, hooks run as soon as they are scheduled.
//
// Environments are always shared through Rc because updating opcodes, block trackers and
// builtin helpers keep handles to them across render passes.

//! Host environment: DOM, clock, program, registries and transactions.

pub mod helper;
pub mod transaction;

pub use helper::{Helper, SimpleHelper};
pub use transaction::Transaction;

use crate::builder::Destroyable;
use crate::component::{Component, ComponentDefinition, ComponentManager, ModifierInstance, ModifierManager};
use crate::core::SessionStats;
use crate::dom::{Document, DomOperations};
use crate::program::Program;
use crate::reference::{
    ConditionalReference, Iterable, KeyPath, ReferenceRef, RevisionClock, ValueIterable,
};
use crate::template::Template;
use crate::value::Value;
use crate::vm::updating::UpdatingArena;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

/// What a `{{debugger}}` statement can see.
pub struct DebugContext {
    pub self_value: Value,
    pub locals: Vec<(Rc<str>, Value)>,
}

pub type DebuggerCallback = Rc<dyn Fn(&DebugContext)>;

pub struct Environment {
    id: usize,
    dom: Rc<dyn DomOperations>,
    clock: RevisionClock,
    program: RefCell<Program>,
    arena: Rc<RefCell<UpdatingArena>>,
    helpers: RefCell<HashMap<Rc<str>, Rc<dyn Helper>>>,
    modifiers: RefCell<HashMap<Rc<str>, Rc<dyn ModifierManager>>>,
    components: RefCell<HashMap<Rc<str>, Rc<ComponentDefinition>>>,
    partials: RefCell<HashMap<Rc<str>, Rc<Template>>>,
    transaction: RefCell<Option<Transaction>>,
    stats: RefCell<SessionStats>,
    debugger: RefCell<Option<DebuggerCallback>>,
}

impl Environment {
    /// Environment over a fresh in-memory document.
    pub fn new() -> Rc<Environment> {
        Self::with_dom(Rc::new(Document::new()))
    }

    pub fn with_dom(dom: Rc<dyn DomOperations>) -> Rc<Environment> {
        let env = Environment {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            dom,
            clock: RevisionClock::new(),
            program: RefCell::new(Program::new()),
            arena: Rc::new(RefCell::new(UpdatingArena::new())),
            helpers: RefCell::new(HashMap::new()),
            modifiers: RefCell::new(HashMap::new()),
            components: RefCell::new(HashMap::new()),
            partials: RefCell::new(HashMap::new()),
            transaction: RefCell::new(None),
            stats: RefCell::new(SessionStats::default()),
            debugger: RefCell::new(None),
        };
        helper::register_builtins(&env);
        Rc::new(env)
    }

    /// Unique per environment; keys compiled template caches.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn dom(&self) -> &Rc<dyn DomOperations> {
        &self.dom
    }

    pub fn clock(&self) -> &RevisionClock {
        &self.clock
    }

    pub fn program(&self) -> &RefCell<Program> {
        &self.program
    }

    pub fn arena(&self) -> &Rc<RefCell<UpdatingArena>> {
        &self.arena
    }

    pub fn register_helper(&self, name: &str, helper: Rc<dyn Helper>) {
        self.helpers.borrow_mut().insert(Rc::from(name), helper);
    }

    pub fn register_modifier(&self, name: &str, manager: Rc<dyn ModifierManager>) {
        self.modifiers.borrow_mut().insert(Rc::from(name), manager);
    }

    pub fn register_component(&self, definition: Rc<ComponentDefinition>) {
        self.components
            .borrow_mut()
            .insert(Rc::from(definition.name()), definition);
    }

    pub fn register_partial(&self, name: &str, template: Rc<Template>) {
        self.partials.borrow_mut().insert(Rc::from(name), template);
    }

    pub fn lookup_helper(&self, name: &str) -> Option<Rc<dyn Helper>> {
        self.helpers.borrow().get(name).cloned()
    }

    pub fn lookup_modifier(&self, name: &str) -> Option<Rc<dyn ModifierManager>> {
        self.modifiers.borrow().get(name).cloned()
    }

    pub fn lookup_component(&self, name: &str) -> Option<Rc<ComponentDefinition>> {
        self.components.borrow().get(name).cloned()
    }

    pub fn lookup_partial(&self, name: &str) -> Option<Rc<Template>> {
        self.partials.borrow().get(name).cloned()
    }

    pub fn set_debugger(&self, callback: impl Fn(&DebugContext) + 'static) {
        *self.debugger.borrow_mut() = Some(Rc::new(callback));
    }

    pub fn debugger(&self) -> Option<DebuggerCallback> {
        self.debugger.borrow().clone()
    }

    /// Adapt the value of `reference` for `each`, keyed by `key`
    /// (`@index` when empty).
    pub fn iterable_for(&self, reference: ReferenceRef, key: &str) -> Rc<dyn Iterable> {
        let key = if key.is_empty() { "@index" } else { key };
        Rc::new(ValueIterable::new(reference, KeyPath::parse(key), &self.clock))
    }

    pub fn to_conditional_reference(&self, reference: ReferenceRef) -> ReferenceRef {
        ConditionalReference::create(reference)
    }

    pub(crate) fn record_stats(&self, stats: &SessionStats) {
        self.stats.borrow_mut().merge(stats);
    }

    /// Compilation statistics accumulated by every template compiled here.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.borrow().is_some()
    }

    pub fn begin(&self) {
        let mut transaction = self.transaction.borrow_mut();
        if transaction.is_some() {
            log::warn!("transaction begun while another one is open; keeping the open one");
            return;
        }
        *transaction = Some(Transaction::new());
    }

    pub fn commit(&self) {
        let transaction = self.transaction.borrow_mut().take();
        if let Some(transaction) = transaction {
            transaction.commit();
        }
    }

    /// Drop the open transaction without running its hooks.
    pub(crate) fn rollback(&self) {
        if let Some(transaction) = self.transaction.borrow_mut().take() {
            if !transaction.is_empty() {
                log::warn!("render failed; discarding pending lifecycle hooks");
            }
        }
    }

    /// Queue into the open transaction; hands the work back when there is none.
    fn enqueue<T>(&self, work: T, queue: impl FnOnce(&mut Transaction, T)) -> Option<T> {
        match self.transaction.borrow_mut().as_mut() {
            Some(transaction) => {
                queue(transaction, work);
                None
            }
            None => Some(work),
        }
    }

    pub fn did_create(&self, component: Component, manager: Rc<dyn ComponentManager>) {
        if let Some((component, manager)) =
            self.enqueue((component, manager), |t, (c, m)| t.did_create(c, m))
        {
            manager.did_create(&component);
        }
    }

    pub fn did_update(&self, component: Component, manager: Rc<dyn ComponentManager>) {
        if let Some((component, manager)) =
            self.enqueue((component, manager), |t, (c, m)| t.did_update(c, m))
        {
            manager.did_update(&component);
        }
    }

    pub fn did_destroy(&self, destroyable: Rc<dyn Destroyable>) {
        destroyable.will_destroy();
        if let Some(destroyable) = self.enqueue(destroyable, |t, d| t.did_destroy(d)) {
            destroyable.destroy();
        }
    }

    pub fn schedule_install_modifier(
        &self,
        modifier: Rc<ModifierInstance>,
        manager: Rc<dyn ModifierManager>,
    ) {
        if let Some((modifier, manager)) = self.enqueue((modifier, manager), |t, (m, mgr)| {
            t.schedule_install_modifier(m, mgr)
        }) {
            manager.install(&modifier);
        }
    }

    pub fn schedule_update_modifier(
        &self,
        modifier: Rc<ModifierInstance>,
        manager: Rc<dyn ModifierManager>,
    ) {
        if let Some((modifier, manager)) = self.enqueue((modifier, manager), |t, (m, mgr)| {
            t.schedule_update_modifier(m, mgr)
        }) {
            manager.update(&modifier);
        }
    }
}
