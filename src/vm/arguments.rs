//! Call arguments read off the evaluation stack.
//!
//! `PushArgs` runs after the compiler has pushed
//! `[p0 .. pn-1, n, v0 .. vm-1, names]`. [`Arguments::setup`] reads that
//! layout without popping it so invokers can still consume the raw values;
//! [`Arguments::clear`] pops it once the callee has captured what it needs.

use super::stack::{EvaluationStack, StackValue};
use crate::core::VmResult;
use crate::reference::{combine, undefined_reference, ReferenceRef, Tag};
use crate::value::Value;
use std::rc::Rc;

/// Positional and named references that outlive the stack frame.
#[derive(Clone)]
pub struct CapturedArguments {
    positional: Rc<[ReferenceRef]>,
    names: Rc<[Rc<str>]>,
    named: Rc<[ReferenceRef]>,
    tag: Tag,
}

impl CapturedArguments {
    pub fn new(positional: Vec<ReferenceRef>, named: Vec<(Rc<str>, ReferenceRef)>) -> Self {
        let (names, named): (Vec<_>, Vec<_>) = named.into_iter().unzip();
        let tag = combine(positional.iter().chain(named.iter()).map(|r| r.tag()));
        Self {
            positional: Rc::from(positional),
            names: Rc::from(names),
            named: Rc::from(named),
            tag,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn tag(&self) -> Tag {
        self.tag.clone()
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    /// Positional reference `index`, undefined when absent.
    pub fn at(&self, index: usize) -> ReferenceRef {
        self.positional
            .get(index)
            .cloned()
            .unwrap_or_else(undefined_reference)
    }

    pub fn positional(&self) -> &[ReferenceRef] {
        &self.positional
    }

    pub fn positional_value(&self, index: usize) -> Value {
        self.at(index).value()
    }

    pub fn positional_values(&self) -> Vec<Value> {
        self.positional.iter().map(|r| r.value()).collect()
    }

    /// Argument names without the `@` sigil.
    pub fn names(&self) -> &[Rc<str>] {
        &self.names
    }

    pub fn named(&self, name: &str) -> Option<ReferenceRef> {
        self.names
            .iter()
            .position(|n| &**n == name)
            .and_then(|i| self.named.get(i).cloned())
    }

    pub fn named_value(&self, name: &str) -> Value {
        self.named(name).map(|r| r.value()).unwrap_or_default()
    }

    pub fn named_values(&self) -> Vec<(Rc<str>, Value)> {
        self.names
            .iter()
            .cloned()
            .zip(self.named.iter().map(|r| r.value()))
            .collect()
    }
}

/// Arguments of one call, as laid out on the stack.
pub struct Arguments {
    captured: CapturedArguments,
    raw_names: Rc<[Rc<str>]>,
    length: usize,
}

impl Arguments {
    /// Read the argument layout ending at the top of the stack. With
    /// `synthetic` unset, named arguments were written with a leading `@`.
    pub fn setup(stack: &EvaluationStack, synthetic: bool) -> VmResult<Arguments> {
        let raw_names = stack.from_top(0)?.into_names()?;
        let named_count = raw_names.len() as isize;
        let positional_count = stack.from_top(named_count + 1)?.into_int()?;

        let mut named = Vec::with_capacity(raw_names.len());
        for (i, name) in raw_names.iter().enumerate() {
            let reference = stack.from_top(named_count - i as isize)?.into_reference()?;
            let name: Rc<str> = match (synthetic, name.strip_prefix('@')) {
                (false, Some(stripped)) => Rc::from(stripped),
                _ => name.clone(),
            };
            named.push((name, reference));
        }

        let mut positional = Vec::with_capacity(positional_count.max(0) as usize);
        for i in 0..positional_count {
            let offset = named_count + 1 + positional_count - i;
            positional.push(stack.from_top(offset)?.into_reference()?);
        }

        Ok(Arguments {
            captured: CapturedArguments::new(positional, named),
            length: (positional_count + named_count) as usize,
            raw_names,
        })
    }

    pub fn capture(&self) -> CapturedArguments {
        self.captured.clone()
    }

    pub fn captured(&self) -> &CapturedArguments {
        &self.captured
    }

    /// Names exactly as the caller wrote them.
    pub fn raw_names(&self) -> &Rc<[Rc<str>]> {
        &self.raw_names
    }

    pub fn tag(&self) -> Tag {
        self.captured.tag()
    }

    /// Pop the argument layout (the values, the count and the names).
    pub fn clear(&self, stack: &mut EvaluationStack) -> VmResult<()> {
        stack.pop_n(self.length + 2).map(|_| ())
    }

    /// Push a replacement layout, as `PrepareArgs` does for managers that
    /// rewrite their arguments.
    pub fn push_layout(stack: &mut EvaluationStack, prepared: &CapturedArguments) {
        for reference in prepared.positional() {
            stack.push(reference.clone());
        }
        stack.push(StackValue::Int(prepared.len() as isize));
        let mut names = Vec::with_capacity(prepared.names().len());
        for name in prepared.names() {
            if let Some(reference) = prepared.named(name) {
                stack.push(reference);
            }
            names.push(Rc::from(format!("@{name}")));
        }
        stack.push(StackValue::Names(Rc::from(names)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{ConstReference, DirtyableTag, RevisionClock};

    fn constant(value: impl Into<Value>) -> StackValue {
        StackValue::Reference(ConstReference::create(value.into()))
    }

    fn push_layout(stack: &mut EvaluationStack, names: &[&str]) {
        stack.push(constant("first"));
        stack.push(constant("second"));
        stack.push(StackValue::Int(2));
        stack.push(constant(1));
        stack.push(constant(true));
        let names: Vec<Rc<str>> = names.iter().map(|n| Rc::from(*n)).collect();
        stack.push(StackValue::Names(Rc::from(names)));
    }

    #[test]
    fn test_setup_reads_positional_and_named() {
        let mut stack = EvaluationStack::empty();
        push_layout(&mut stack, &["count", "open"]);
        let args = Arguments::setup(&stack, true).unwrap();
        let captured = args.capture();

        assert_eq!(captured.len(), 2);
        assert_eq!(captured.positional_value(0).to_display_string(), "first");
        assert_eq!(captured.positional_value(1).to_display_string(), "second");
        assert_eq!(captured.named_value("count").to_display_string(), "1");
        assert_eq!(captured.named_value("open").to_display_string(), "true");
        assert!(captured.at(7).value().is_nullish());
        assert!(args.tag().is_const());
    }

    #[test]
    fn test_at_names_are_stripped_for_components() {
        let mut stack = EvaluationStack::empty();
        push_layout(&mut stack, &["@count", "@open"]);
        let args = Arguments::setup(&stack, false).unwrap();
        assert_eq!(&*args.captured().names()[0], "count");
        assert_eq!(&*args.raw_names()[1], "@open");
    }

    #[test]
    fn test_clear_pops_the_layout() {
        let mut stack = EvaluationStack::empty();
        stack.push(StackValue::Int(42));
        push_layout(&mut stack, &["a", "b"]);
        let args = Arguments::setup(&stack, true).unwrap();
        args.clear(&mut stack).unwrap();
        assert_eq!(stack.sp(), 0);
        assert_eq!(stack.pop().unwrap().into_int().unwrap(), 42);
    }

    #[test]
    fn test_captured_tag_combines_arguments() {
        let clock = RevisionClock::new();
        let tag = DirtyableTag::new(&clock);
        let dynamic: ReferenceRef = Rc::new(crate::reference::ComputedReference::new(
            tag.tag(),
            || Value::from("x"),
        ));
        let captured = CapturedArguments::new(vec![dynamic], vec![]);
        let snapshot = captured.tag().value();
        tag.dirty();
        assert!(!captured.tag().validate(snapshot));
    }
}
