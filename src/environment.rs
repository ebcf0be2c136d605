//! The lexical environment chain shared by the tree interpreter and, via the
//! VM's top-level module scope, the compiled path's `STORE_NAME`/`LOAD_NAME`
//! family.
//!
//! Grounded on the reference `Environment`, but with statement-kind-dependent
//! assignment semantics made explicit per the language's data model: a plain
//! assignment always *defines* in the current scope unless the name was
//! declared `global` (walks to the root scope) or `nonlokal` (walks to the
//! nearest enclosing scope that already binds it), while augmented
//! assignment always walks to whichever scope already binds the name and
//! mutates there, declaration or not.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::value::Value;

pub struct Environment {
    variables: RefCell<Vec<(String, Value)>>,
    parent: Option<Rc<RefCell<Environment>>>,
    globals: RefCell<HashSet<String>>,
    nonlocals: RefCell<HashSet<String>>,
    /// Set once any statement other than `global`/`nonlokal` has run
    /// anywhere in this scope (including nested `if`/`selagi`/`cuba` blocks,
    /// which share this `Environment` rather than pushing their own). A
    /// later `Global`/`Nonlocal` is rejected as a late declaration.
    scope_closed: RefCell<bool>,
}

impl Environment {
    pub fn new(parent: Option<Rc<RefCell<Environment>>>) -> Rc<RefCell<Environment>> {
        Rc::new(RefCell::new(Environment {
            variables: RefCell::new(Vec::new()),
            parent,
            globals: RefCell::new(HashSet::new()),
            nonlocals: RefCell::new(HashSet::new()),
            scope_closed: RefCell::new(false),
        }))
    }

    pub fn is_scope_closed(this: &Rc<RefCell<Environment>>) -> bool {
        *this.borrow().scope_closed.borrow()
    }

    pub fn close_scope(this: &Rc<RefCell<Environment>>) {
        *this.borrow().scope_closed.borrow_mut() = true;
    }

    fn find_local(&self, name: &str) -> Option<usize> {
        self.variables.borrow().iter().position(|(n, _)| n == name)
    }

    /// `STORE_NAME_DEFINE` / a plain `Assign`: binds in *this* scope, unless
    /// `name` was declared `global` here (walks to the root scope) or
    /// `nonlokal` here (walks to the nearest enclosing scope that already
    /// binds it, per `set_existing`'s rule — a `nonlokal` declaration is only
    /// valid when such a binding exists).
    pub fn define(this: &Rc<RefCell<Environment>>, name: &str, value: Value) {
        if this.borrow().globals.borrow().contains(name) {
            let root = Self::root(this);
            Self::define_local(&root, name, value);
            return;
        }
        if this.borrow().nonlocals.borrow().contains(name) {
            let parent = this.borrow().parent.clone();
            if let Some(p) = parent {
                if Self::set_existing(&p, name, value.clone(), 0).is_ok() {
                    return;
                }
            }
            // No enclosing binding found; fall through and define locally
            // rather than panicking — the parser/compiler already rejects
            // `nonlokal` declarations with no matching outer binding at
            // compile time for the bytecode path.
        }
        Self::define_local(this, name, value);
    }

    pub fn declare_nonlocal(this: &Rc<RefCell<Environment>>, name: &str) {
        this.borrow().nonlocals.borrow_mut().insert(name.to_string());
    }

    fn define_local(this: &Rc<RefCell<Environment>>, name: &str, value: Value) {
        let env = this.borrow();
        let mut vars = env.variables.borrow_mut();
        if let Some(idx) = vars.iter().position(|(n, _)| n == name) {
            vars[idx].1 = value;
        } else {
            vars.push((name.to_string(), value));
        }
    }

    fn root(this: &Rc<RefCell<Environment>>) -> Rc<RefCell<Environment>> {
        let mut cur = this.clone();
        loop {
            let next = cur.borrow().parent.clone();
            match next {
                Some(p) => cur = p,
                None => return cur,
            }
        }
    }

    /// `LOAD_NAME`: nearest scope containing `name`, walking outward.
    pub fn get(this: &Rc<RefCell<Environment>>, name: &str, line: u32) -> Result<Value> {
        let mut cur = this.clone();
        loop {
            if let Some(idx) = cur.borrow().find_local(name) {
                return Ok(cur.borrow().variables.borrow()[idx].1.clone());
            }
            let next = cur.borrow().parent.clone();
            match next {
                Some(p) => cur = p,
                None => {
                    return Err(Error::runtime(format!("Pembolehubah tidak ditakrifkan: '{}'", name), line));
                }
            }
        }
    }

    /// `AugAssign`: walks outward to the first scope that already binds
    /// `name` and mutates it there. Errors if no scope binds it, rather than
    /// silently defining locally.
    pub fn set_existing(this: &Rc<RefCell<Environment>>, name: &str, value: Value, line: u32) -> Result<()> {
        let mut cur = this.clone();
        loop {
            if let Some(idx) = cur.borrow().find_local(name) {
                cur.borrow().variables.borrow_mut()[idx].1 = value;
                return Ok(());
            }
            let next = cur.borrow().parent.clone();
            match next {
                Some(p) => cur = p,
                None => {
                    return Err(Error::runtime(format!("Pembolehubah tidak ditakrifkan: '{}'", name), line));
                }
            }
        }
    }

    pub fn declare_global(this: &Rc<RefCell<Environment>>, name: &str) {
        this.borrow().globals.borrow_mut().insert(name.to_string());
    }

    pub fn delete(this: &Rc<RefCell<Environment>>, name: &str, line: u32) -> Result<()> {
        let env = this.borrow();
        let mut vars = env.variables.borrow_mut();
        if let Some(idx) = vars.iter().position(|(n, _)| n == name) {
            vars.remove(idx);
            Ok(())
        } else {
            Err(Error::runtime(format!("Pembolehubah tidak ditakrifkan: '{}'", name), line))
        }
    }

    pub fn has(this: &Rc<RefCell<Environment>>, name: &str) -> bool {
        let mut cur = this.clone();
        loop {
            if cur.borrow().find_local(name).is_some() {
                return true;
            }
            let next = cur.borrow().parent.clone();
            match next {
                Some(p) => cur = p,
                None => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_then_get() {
        let env = Environment::new(None);
        Environment::define(&env, "x", Value::int(1));
        assert!(matches!(Environment::get(&env, "x", 1).unwrap(), Value::Int(_)));
    }

    #[test]
    fn child_sees_parent_binding() {
        let parent = Environment::new(None);
        Environment::define(&parent, "x", Value::int(1));
        let child = Environment::new(Some(parent));
        assert!(Environment::get(&child, "x", 1).is_ok());
    }

    #[test]
    fn aug_assign_requires_existing_binding() {
        let env = Environment::new(None);
        assert!(Environment::set_existing(&env, "x", Value::int(1), 1).is_err());
    }

    #[test]
    fn global_declares_route_to_root() {
        let root = Environment::new(None);
        let child = Environment::new(Some(root.clone()));
        Environment::declare_global(&child, "x");
        Environment::define(&child, "x", Value::int(5));
        assert!(Environment::get(&root, "x", 1).is_ok());
    }
}
