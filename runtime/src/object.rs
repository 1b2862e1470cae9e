use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use vm::{AsAny, MethodBody, Object, Value};

use crate::builtins::Builtin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone)]
pub enum Method {
    Bytecode(Arc<MethodBody>),
    Builtin(&'static Builtin),
    /// `attr_reader`: returns the named instance variable.
    Reader(String),
    /// `attr_writer`: sets the named instance variable.
    Writer(String),
}

#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub method: Method,
    pub visibility: Visibility,
}

/// A class or module.
pub struct Class {
    pub name: String,
    pub superclass: Option<Arc<Class>>,
    pub is_module: bool,
    /// Enclosing class or module, for constant lookup.
    pub lexical_parent: Option<Arc<Class>>,
    methods: RwLock<HashMap<String, MethodEntry>>,
    /// Methods called on the class itself, e.g. `Fiber.yield`.
    singleton: RwLock<HashMap<String, MethodEntry>>,
    constants: RwLock<HashMap<String, Value>>,
    ivars: Mutex<HashMap<String, Value>>,
}

impl Object for Class {}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Class {
    pub fn new(
        name: impl Into<String>,
        superclass: Option<Arc<Class>>,
        is_module: bool,
        lexical_parent: Option<Arc<Class>>,
    ) -> Arc<Class> {
        Arc::new(Class {
            name: name.into(),
            superclass,
            is_module,
            lexical_parent,
            methods: RwLock::default(),
            singleton: RwLock::default(),
            constants: RwLock::default(),
            ivars: Mutex::default(),
        })
    }

    pub fn value(self: &Arc<Self>) -> Value {
        Value::Object(Arc::clone(self) as Arc<dyn Object>)
    }

    /// The class behind `value`, if it is one.
    pub fn from_value(value: &Value) -> Option<Arc<Class>> {
        match value {
            Value::Object(object) => AsAny::into_any(Arc::clone(object)).downcast::<Class>().ok(),
            _ => None,
        }
    }

    /// `self` followed by its superclasses.
    pub fn ancestors(self: &Arc<Self>) -> impl Iterator<Item = Arc<Class>> {
        std::iter::successors(Some(Arc::clone(self)), |class| class.superclass.clone())
    }

    pub fn inherits_from(self: &Arc<Self>, other: &Arc<Class>) -> bool {
        self.ancestors().any(|class| Arc::ptr_eq(&class, other))
    }

    pub fn define(&self, name: &str, method: Method, visibility: Visibility) {
        self.methods.write().insert(name.to_string(), MethodEntry { method, visibility });
    }

    pub fn define_singleton(&self, name: &str, method: Method) {
        self.singleton
            .write()
            .insert(name.to_string(), MethodEntry { method, visibility: Visibility::Public });
    }

    /// Instance method lookup along the superclass chain. Returns the
    /// class the method was found in.
    pub fn find_method(self: &Arc<Self>, name: &str) -> Option<(Arc<Class>, MethodEntry)> {
        self.ancestors().find_map(|class| {
            let entry = class.methods.read().get(name).cloned();
            entry.map(|entry| (class, entry))
        })
    }

    pub fn find_singleton(self: &Arc<Self>, name: &str) -> Option<(Arc<Class>, MethodEntry)> {
        self.ancestors().find_map(|class| {
            let entry = class.singleton.read().get(name).cloned();
            entry.map(|entry| (class, entry))
        })
    }

    /// Public instance methods defined directly on this class.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .methods
            .read()
            .iter()
            .filter(|(_, entry)| entry.visibility == Visibility::Public)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn constant(&self, name: &str) -> Option<Value> {
        self.constants.read().get(name).cloned()
    }

    pub fn set_constant(&self, name: &str, value: Value) {
        self.constants.write().insert(name.to_string(), value);
    }

    pub fn ivar(&self, name: &str) -> Value {
        self.ivars.lock().get(name).cloned().unwrap_or_default()
    }

    pub fn set_ivar(&self, name: &str, value: Value) {
        self.ivars.lock().insert(name.to_string(), value);
    }
}

/// An instance of a user-defined or exception class.
pub struct Instance {
    pub class: Arc<Class>,
    ivars: Mutex<Vec<(String, Value)>>,
}

impl Object for Instance {}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<{}>", self.class.name)
    }
}

impl Instance {
    pub fn new(class: Arc<Class>) -> Self {
        Self { class, ivars: Mutex::default() }
    }

    pub fn ivar(&self, name: &str) -> Value {
        self.ivars
            .lock()
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
            .unwrap_or_default()
    }

    pub fn has_ivar(&self, name: &str) -> bool {
        self.ivars.lock().iter().any(|(key, _)| key == name)
    }

    pub fn set_ivar(&self, name: &str, value: Value) {
        let mut ivars = self.ivars.lock();
        match ivars.iter_mut().find(|(key, _)| key == name) {
            Some(slot) => slot.1 = value,
            None => ivars.push((name.to_string(), value)),
        }
    }

    /// Guest-visible instance variables in assignment order.
    pub fn ivars(&self) -> Vec<(String, Value)> {
        self.ivars.lock().iter().filter(|(key, _)| key.starts_with('@')).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_superclasses() {
        let base = Class::new("Base", None, false, None);
        let derived = Class::new("Derived", Some(base.clone()), false, None);
        base.define("greet", Method::Reader("@greeting".into()), Visibility::Public);
        assert!(derived.find_method("greet").is_some());
        assert!(base.find_method("missing").is_none());
        assert!(derived.inherits_from(&base));
        assert!(!base.inherits_from(&derived));
    }

    #[test]
    fn class_values_round_trip() {
        let class = Class::new("Point", None, false, None);
        let value = class.value();
        let back = Class::from_value(&value).unwrap();
        assert!(Arc::ptr_eq(&class, &back));
        assert!(value.identical(&class.value()));
        assert!(Class::from_value(&Value::Integer(1)).is_none());
    }

    #[test]
    fn instance_variables_keep_order() {
        let instance = Instance::new(Class::new("Point", None, false, None));
        instance.set_ivar("@y", Value::Integer(2));
        instance.set_ivar("@x", Value::Integer(1));
        instance.set_ivar("@y", Value::Integer(3));
        instance.set_ivar("backtrace", Value::Nil);
        let names: Vec<String> = instance.ivars().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["@y", "@x"]);
        assert_eq!(instance.ivar("@y").as_int(), Some(3));
        assert!(instance.ivar("@z").is_nil());
    }
}
