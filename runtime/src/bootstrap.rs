//! The core class hierarchy, built once per runtime.

use std::collections::HashMap;
use std::sync::Arc;

use vm::ErrorKind;

use crate::builtins;
use crate::object::Class;

pub struct Core {
    pub object: Arc<Class>,
    pub module: Arc<Class>,
    pub class: Arc<Class>,
    pub nil: Arc<Class>,
    pub true_: Arc<Class>,
    pub false_: Arc<Class>,
    pub integer: Arc<Class>,
    pub float: Arc<Class>,
    pub string: Arc<Class>,
    pub symbol: Arc<Class>,
    pub array: Arc<Class>,
    pub hash: Arc<Class>,
    pub proc: Arc<Class>,
    pub fiber: Arc<Class>,
    pub exception: Arc<Class>,
    errors: HashMap<ErrorKind, Arc<Class>>,
}

impl Core {
    pub fn bootstrap() -> Core {
        let object = Class::new("Object", None, false, None);
        let subclass = |name: &str, superclass: &Arc<Class>| {
            let class = Class::new(name, Some(Arc::clone(superclass)), false, None);
            object.set_constant(name, class.value());
            class
        };
        object.set_constant("Object", object.value());
        let module = subclass("Module", &object);
        let class = subclass("Class", &module);

        let exception = subclass("Exception", &object);
        let standard = subclass("StandardError", &exception);
        let name_error = subclass("NameError", &standard);
        let index_error = subclass("IndexError", &standard);
        let mut errors = HashMap::new();
        errors.insert(ErrorKind::Standard, Arc::clone(&standard));
        errors.insert(ErrorKind::Name, Arc::clone(&name_error));
        errors.insert(ErrorKind::Index, Arc::clone(&index_error));
        errors.insert(ErrorKind::NoMethod, subclass("NoMethodError", &name_error));
        errors.insert(ErrorKind::Key, subclass("KeyError", &index_error));
        errors.insert(ErrorKind::StopIteration, subclass("StopIteration", &index_error));
        errors.insert(ErrorKind::Interrupt, subclass("Interrupt", &exception));
        errors.insert(ErrorKind::SystemStack, subclass("SystemStackError", &exception));
        for kind in [
            ErrorKind::Runtime,
            ErrorKind::Argument,
            ErrorKind::Type,
            ErrorKind::ZeroDivision,
            ErrorKind::LocalJump,
            ErrorKind::Fiber,
            ErrorKind::NoMatchingPattern,
        ] {
            errors.insert(kind, subclass(kind.class_name(), &standard));
        }

        let nil = subclass("NilClass", &object);
        let true_ = subclass("TrueClass", &object);
        let false_ = subclass("FalseClass", &object);
        let integer = subclass("Integer", &object);
        let float = subclass("Float", &object);
        let string = subclass("String", &object);
        let symbol = subclass("Symbol", &object);
        let array = subclass("Array", &object);
        let hash = subclass("Hash", &object);
        let proc = subclass("Proc", &object);
        let fiber = subclass("Fiber", &object);
        let core = Core {
            object,
            module,
            class,
            nil,
            true_,
            false_,
            integer,
            float,
            string,
            symbol,
            array,
            hash,
            proc,
            fiber,
            exception,
            errors,
        };
        builtins::install(&core);
        core
    }

    pub fn error_class(&self, kind: ErrorKind) -> Arc<Class> {
        self.errors.get(&kind).cloned().unwrap_or_else(|| Arc::clone(&self.exception))
    }
}
