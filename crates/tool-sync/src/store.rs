//! Value accessors.
//!
//! A leaf never touches its value directly; it goes through a [`ValueStore`].
//! Swapping the store (for example for one shared with domain code) changes
//! where the value lives without changing any node logic.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

/// Minimal get/set indirection around one opaque value.
pub trait ValueStore: fmt::Debug {
    fn get(&self) -> Value;
    fn set(&mut self, value: Value);
}

/// Store that owns its value. The default for every leaf.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LocalValue(Value);

impl LocalValue {
    pub fn new(value: Value) -> Self {
        Self(value)
    }
}

impl ValueStore for LocalValue {
    fn get(&self) -> Value {
        self.0.clone()
    }

    fn set(&mut self, value: Value) {
        self.0 = value;
    }
}

/// Store whose value cell is shared with code outside the tree.
///
/// Clones share the same cell, so a domain object can keep one handle and
/// observe every value the engine writes (or pre-seed one before the leaf
/// exists).
#[derive(Debug, Default, Clone)]
pub struct SharedValue(Rc<RefCell<Value>>);

impl SharedValue {
    pub fn new(value: Value) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    /// Read the current value without going through a tree.
    pub fn snapshot(&self) -> Value {
        self.0.borrow().clone()
    }
}

impl ValueStore for SharedValue {
    fn get(&self) -> Value {
        self.0.borrow().clone()
    }

    fn set(&mut self, value: Value) {
        *self.0.borrow_mut() = value;
    }
}
