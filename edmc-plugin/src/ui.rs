//! Opaque UI handles passed between the host's widget toolkit and plugins.
//!
//! The engine never renders anything; it only needs to hand a parent to a
//! plugin and carry back whatever the plugin built.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A toolkit widget owned by the host
#[derive(Clone)]
pub struct Widget {
    inner: Arc<dyn Any + Send + Sync>,
}

impl Widget {
    pub fn new<T: Any + Send + Sync>(widget: T) -> Self {
        Self {
            inner: Arc::new(widget),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Whether both handles refer to the same widget
    pub fn ptr_eq(&self, other: &Widget) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The container, if this widget is one
    pub fn as_container(&self) -> Option<&Container> {
        self.downcast_ref::<Container>()
    }
}

impl fmt::Debug for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_container() {
            Some(container) => container.fmt(f),
            None => f.write_str("Widget(..)"),
        }
    }
}

/// Widgets gridded side by side in a single row
#[derive(Debug, Clone)]
pub struct Container {
    children: Vec<Widget>,
}

impl Container {
    pub fn row(children: Vec<Widget>) -> Self {
        Self { children }
    }

    pub fn children(&self) -> &[Widget] {
        &self.children
    }

    pub fn into_widget(self) -> Widget {
        Widget::new(self)
    }
}
