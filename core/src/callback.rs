//! Deferred request handlers.
//!
//! A request never carries a closure. It carries a [`Callback`]: a live
//! [`Component`] plus the name of one of its handlers. Only the
//! [`CallbackRef`] part is written to queue records; when a record is read
//! back the reference is resolved again through a [`CallbackRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::async_trait;
use crate::error::{Error, Result};
use crate::response::{ParseOutput, Response};

/// Identity of a component type: its module path and type name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId {
    /// Module path, e.g. `news::spiders`
    pub path: String,

    /// Type name, e.g. `FrontPageSpider`
    pub name: String,
}

impl ComponentId {
    /// Create a component id from its two parts
    pub fn new<P: Into<String>, N: Into<String>>(path: P, name: N) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }

    /// Derive the id of a Rust type from its type path
    pub fn of<T: ?Sized>() -> Self {
        Self::parse(std::any::type_name::<T>())
    }

    /// Split a `path::to::Type` string; generic arguments stay on the name
    pub fn parse(type_path: &str) -> Self {
        let generics_at = type_path.find('<').unwrap_or(type_path.len());
        match type_path[..generics_at].rfind("::") {
            Some(split) => Self::new(&type_path[..split], &type_path[split + 2..]),
            None => Self::new("", type_path),
        }
    }

    /// The fully qualified `path::Type` form
    pub fn qualified_name(&self) -> String {
        if self.path.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.path, self.name)
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// A serializable pointer to a handler: owning component plus handler name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackRef {
    /// The component that owns the handler
    pub component: ComponentId,

    /// The handler name
    pub handler: String,
}

impl CallbackRef {
    /// Create a new reference
    pub fn new<H: Into<String>>(component: ComponentId, handler: H) -> Self {
        Self {
            component,
            handler: handler.into(),
        }
    }
}

impl fmt::Display for CallbackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.handler)
    }
}

/// A type that owns named response handlers
#[async_trait]
pub trait Component: Send + Sync + 'static {
    /// The identity recorded in queue records, usually `ComponentId::of::<Self>()`
    fn component_id(&self) -> ComponentId;

    /// Whether a handler with this name exists
    fn has_handler(&self, handler: &str) -> bool;

    /// Run a handler
    async fn invoke(&self, handler: &str, response: Response) -> Result<ParseOutput>;
}

/// A handler bound to a live component instance
#[derive(Clone)]
pub struct Callback {
    reference: CallbackRef,
    target: Arc<dyn Component>,
}

impl Callback {
    /// Bind `handler` on `target`; fails if the component has no such handler
    pub fn new<H: Into<String>>(target: Arc<dyn Component>, handler: H) -> Result<Self> {
        let reference = CallbackRef::new(target.component_id(), handler);
        if !target.has_handler(&reference.handler) {
            return Err(Error::resolution(
                reference.to_string(),
                "component has no such handler",
            ));
        }
        Ok(Self { reference, target })
    }

    /// The serializable part of this callback
    pub fn reference(&self) -> &CallbackRef {
        &self.reference
    }

    /// The component instance the handler is bound to
    pub fn target(&self) -> &Arc<dyn Component> {
        &self.target
    }

    /// Invoke the bound handler
    pub async fn call(&self, response: Response) -> Result<ParseOutput> {
        self.target.invoke(&self.reference.handler, response).await
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback").field(&self.reference.to_string()).finish()
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

type Factory = Arc<dyn Fn() -> Arc<dyn Component> + Send + Sync>;

/// Lookup table used to turn a [`CallbackRef`] back into a [`Callback`].
///
/// Stateless components are registered with a factory and get a fresh
/// instance per resolution. Stateful collaborators (the spider itself,
/// typically) are registered as shared instances, which take precedence.
#[derive(Default, Clone)]
pub struct CallbackRegistry {
    factories: HashMap<ComponentId, Factory>,
    shared: HashMap<ComponentId, Arc<dyn Component>>,
}

impl CallbackRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for component type `T`, keyed by the
    /// `component_id` of a first instance
    pub fn register<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Component,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let id = factory().component_id();
        self.factories.insert(
            id,
            Arc::new(move || Arc::new(factory()) as Arc<dyn Component>),
        );
        self
    }

    /// Register a shared instance, resolved by its own `component_id`
    pub fn register_shared(&mut self, component: Arc<dyn Component>) -> &mut Self {
        self.shared.insert(component.component_id(), component);
        self
    }

    /// Whether the registry knows a component
    pub fn contains(&self, id: &ComponentId) -> bool {
        self.shared.contains_key(id) || self.factories.contains_key(id)
    }

    /// Bind a reference to a live handler
    pub fn resolve(&self, reference: &CallbackRef) -> Result<Callback> {
        let target = match self.shared.get(&reference.component) {
            Some(shared) => shared.clone(),
            None => match self.factories.get(&reference.component) {
                Some(factory) => factory(),
                None => {
                    return Err(Error::resolution(
                        reference.to_string(),
                        "component type is not registered",
                    ))
                }
            },
        };
        Callback::new(target, reference.handler.clone())
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut factories: Vec<String> = self.factories.keys().map(ToString::to_string).collect();
        factories.sort();
        let mut shared: Vec<String> = self.shared.keys().map(ToString::to_string).collect();
        shared.sort();
        f.debug_struct("CallbackRegistry")
            .field("factories", &factories)
            .field("shared", &shared)
            .finish()
    }
}
