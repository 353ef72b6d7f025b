use std::collections::BTreeMap;
use std::rc::Rc;

use super::Bridge;

/// Native side of a bound function.
///
/// `args` is the serialised argument array exactly as the script sent it; the
/// return value is a serialised result, or `None` for "no value".
pub trait CallHandler {
    fn call(&self, bridge: &Bridge, name: &str, args: &str) -> Option<String>;
}

impl<F> CallHandler for F
where
    F: Fn(&Bridge, &str, &str) -> Option<String>,
{
    fn call(&self, bridge: &Bridge, name: &str, args: &str) -> Option<String> {
        self(bridge, name, args)
    }
}

/// A handler with a caller-owned context and an optional destructor that
/// receives the context back when the binding goes away.
pub(crate) struct ContextHandler<T, F> {
    context: Option<T>,
    handler: F,
    destroy: Option<Box<dyn FnOnce(T)>>,
}

impl<T, F> ContextHandler<T, F> {
    pub(crate) fn new(context: T, handler: F, destroy: Option<Box<dyn FnOnce(T)>>) -> Self {
        Self {
            context: Some(context),
            handler,
            destroy,
        }
    }
}

impl<T, F> CallHandler for ContextHandler<T, F>
where
    F: Fn(&Bridge, &str, &str, &T) -> Option<String>,
{
    fn call(&self, bridge: &Bridge, name: &str, args: &str) -> Option<String> {
        let context = self.context.as_ref()?;
        (self.handler)(bridge, name, args, context)
    }
}

impl<T, F> Drop for ContextHandler<T, F> {
    fn drop(&mut self) {
        if let (Some(destroy), Some(context)) = (self.destroy.take(), self.context.take()) {
            destroy(context);
        }
    }
}

pub(crate) type Binding = Rc<dyn CallHandler>;

/// Bound functions of one bridge, keyed by name.
///
/// Dropping a [`Binding`] runs its destructor, so every path that removes an
/// entry (replacement, unbind, teardown) cleans up exactly once.
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    bindings: BTreeMap<String, Binding>,
}

impl CallbackRegistry {
    /// Returns the previous binding so the caller decides where it is dropped.
    pub(crate) fn insert(&mut self, name: String, binding: Binding) -> Option<Binding> {
        self.bindings.insert(name, binding)
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Binding> {
        self.bindings.remove(name)
    }

    pub(crate) fn get(&self, name: &str) -> Option<Binding> {
        self.bindings.get(name).cloned()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.bindings.len()
    }

    pub(crate) fn take_all(&mut self) -> BTreeMap<String, Binding> {
        std::mem::take(&mut self.bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn tracked(log: &Rc<RefCell<Vec<String>>>, label: &str) -> Binding {
        let sink = Rc::clone(log);
        Rc::new(ContextHandler::new(
            label.to_string(),
            |_: &Bridge, _: &str, _: &str, _: &String| -> Option<String> { None },
            Some(Box::new(move |context: String| {
                sink.borrow_mut().push(context)
            })),
        ))
    }

    #[test]
    fn replacing_returns_previous_binding() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = CallbackRegistry::default();
        assert!(registry
            .insert("add".into(), tracked(&log, "first"))
            .is_none());

        let previous = registry.insert("add".into(), tracked(&log, "second"));
        assert!(log.borrow().is_empty());
        drop(previous);
        assert_eq!(*log.borrow(), vec!["first".to_string()]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn destructor_waits_for_outstanding_clones() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = CallbackRegistry::default();
        registry.insert("slow".into(), tracked(&log, "ctx"));

        let in_flight = registry.get("slow");
        drop(registry.remove("slow"));
        assert!(log.borrow().is_empty());
        drop(in_flight);
        assert_eq!(*log.borrow(), vec!["ctx".to_string()]);
    }

    #[test]
    fn take_all_empties_in_name_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = CallbackRegistry::default();
        registry.insert("b".into(), tracked(&log, "b"));
        registry.insert("a".into(), tracked(&log, "a"));
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(registry.contains("a"));

        drop(registry.take_all());
        assert_eq!(registry.len(), 0);
        assert_eq!(*log.borrow(), vec!["a".to_string(), "b".to_string()]);
    }
}
