//! Shared, interior-mutable host values: objects, arrays, and callables.
//!
//! Every handle here is a reference-counted pointer into the page heap. Two
//! handles compare equal under `ptr_eq` exactly when they name the same heap
//! cell, which is the identity notion the probe relies on for id assignment
//! and for checking that patched entry points were restored.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use thiserror::Error;

use super::Value;

// ---------------------------------------------------------------------------
// Thrown
// ---------------------------------------------------------------------------

/// An exception raised by page code.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct Thrown {
    pub message: String,
}

impl Thrown {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

type Props = RefCell<Vec<(String, Value)>>;

/// A property bag with insertion-ordered keys.
#[derive(Clone, Default)]
pub struct Object(Rc<Props>);

/// A non-owning reference to an [`Object`].
#[derive(Clone)]
pub struct WeakObject(Weak<Props>);

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an object from `(key, value)` pairs.
    pub fn from_props<K, I>(props: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let obj = Self::new();
        for (key, value) in props {
            obj.set(key, value);
        }
        obj
    }

    /// Read a property. Missing keys read as `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        self.0
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    /// Walk a chain of property names, stopping at the first non-object.
    pub fn get_path(&self, path: &[&str]) -> Value {
        let mut current = Value::Object(self.clone());
        for key in path {
            current = current.get(key);
            if current.is_nullish() {
                return current;
            }
        }
        current
    }

    /// True if the key is present and not `undefined`.
    pub fn has(&self, key: &str) -> bool {
        !self.get(key).is_undefined()
    }

    /// True if the key is present at all, even when its value is `undefined`
    /// or `null`.
    pub fn has_own(&self, key: &str) -> bool {
        self.0.borrow().iter().any(|(k, _)| k == key)
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let mut props = self.0.borrow_mut();
        match props.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => props.push((key, value)),
        }
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut props = self.0.borrow_mut();
        let pos = props.iter().position(|(k, _)| k == key)?;
        Some(props.remove(pos).1)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Invoke the function stored under `key` with this object as receiver.
    ///
    /// The property is read before the call, so the callee may freely mutate
    /// this object (including replacing the very property being called).
    pub fn call_method(&self, key: &str, args: &[Value]) -> Result<Value, Thrown> {
        match self.get(key) {
            Value::Function(f) => f.call(&Value::Object(self.clone()), args),
            _ => Err(Thrown::new(format!("{key} is not a function"))),
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the heap cell. Stable for as long as any strong or weak
    /// handle to the object exists.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn downgrade(&self) -> WeakObject {
        WeakObject(Rc::downgrade(&self.0))
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys only: values may form cycles back to this object.
        f.debug_struct("Object")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("keys", &self.keys())
            .finish()
    }
}

impl WeakObject {
    pub fn upgrade(&self) -> Option<Object> {
        self.0.upgrade().map(Object)
    }

    /// True once every strong handle to the object has been dropped.
    pub fn is_dead(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl fmt::Debug for WeakObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakObject(alive: {})", !self.is_dead())
    }
}

// ---------------------------------------------------------------------------
// Array
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct Array(Rc<RefCell<Vec<Value>>>);

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Self(Rc::new(RefCell::new(values)))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Value {
        self.0.borrow().get(index).cloned().unwrap_or_default()
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.0.borrow_mut().push(value.into());
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    /// Copy of the current elements. Iterating the copy is safe even if page
    /// code mutates the array meanwhile.
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Self::from_values(iter.into_iter().collect())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Array(len: {})", self.len())
    }
}

// ---------------------------------------------------------------------------
// Function
// ---------------------------------------------------------------------------

type NativeFn = dyn Fn(&Value, &[Value]) -> Result<Value, Thrown>;

struct FunctionInner {
    name: String,
    body: Box<NativeFn>,
}

/// A callable page value. Receives the receiver (`this`) and arguments.
#[derive(Clone)]
pub struct Function(Rc<FunctionInner>);

impl Function {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, Thrown> + 'static,
    {
        Self(Rc::new(FunctionInner {
            name: name.into(),
            body: Box::new(body),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value, Thrown> {
        (self.0.body)(this, args)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.0.name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
