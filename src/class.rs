//! Class and instance representation.
//!
//! Per the design note on avoiding name-mangling, methods and class-level
//! data attributes are kept in two separate maps rather than encoding the
//! distinction into a method name (the reference compiler's
//! `__classvar__X` convention). `Class::base` is an owning forward reference
//! (a class outlives nothing that points back at it); `Instance::class` is
//! likewise forward-only, so no reference cycle exists to break.

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::{Function, Value};

pub struct Class {
    pub name: String,
    pub base: Option<Rc<Class>>,
    pub methods: Vec<(String, Rc<Function>)>,
    pub class_vars: Vec<(String, Value)>,
}

impl Class {
    /// Depth-first method lookup along the base chain.
    pub fn find_method(&self, name: &str) -> Option<Rc<Function>> {
        if let Some((_, f)) = self.methods.iter().find(|(n, _)| n == name) {
            return Some(f.clone());
        }
        self.base.as_ref().and_then(|b| b.find_method(name))
    }

    pub fn find_class_var(&self, name: &str) -> Option<Value> {
        if let Some((_, v)) = self.class_vars.iter().find(|(n, _)| n == name) {
            return Some(v.clone());
        }
        self.base.as_ref().and_then(|b| b.find_class_var(name))
    }

    pub fn is_subclass_or_self(&self, name: &str) -> bool {
        if self.name == name {
            return true;
        }
        self.base.as_ref().map(|b| b.is_subclass_or_self(name)).unwrap_or(false)
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub attributes: Vec<(String, Value)>,
}

impl Instance {
    pub fn get_attr(&self, name: &str) -> Option<Value> {
        self.attributes.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone())
    }

    pub fn set_attr(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.attributes.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.attributes.push((name.to_string(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_lookup_walks_base_chain() {
        let base = Rc::new(Class {
            name: "A".to_string(),
            base: None,
            methods: vec![("bagi".to_string(), Rc::new(crate::value::Function {
                name: "bagi".to_string(),
                params: vec![],
                defaults: vec![],
                var_args: None,
                kw_args: None,
                body: crate::value::FunctionBody::Tree(Rc::new(vec![])),
                closure: None,
            }))],
            class_vars: vec![],
        });
        let derived = Class { name: "B".to_string(), base: Some(base), methods: vec![], class_vars: vec![] };
        assert!(derived.find_method("bagi").is_some());
        assert!(derived.find_method("tiada").is_none());
    }
}
