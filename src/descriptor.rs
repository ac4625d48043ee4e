//! Shape descriptors: which call sites a feature cares about
//!
//! A descriptor names the acceptable receivers, the acceptable method or
//! function names and the argument slot holding the interesting literal.
//! Descriptors are validated when built, so the matcher never has to guess
//! what a half-filled descriptor meant.

use std::collections::BTreeSet;

use crate::error::DescriptorError;

/// Which receivers a descriptor accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverFilter {
    /// Bare function calls only: `config('x')`
    Function,
    /// Static calls or fluent chains on one of these fully qualified classes
    Classes(BTreeSet<String>),
}

/// Where the literal lives in the argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentSlot {
    /// Zero-based index among positional arguments
    Position(usize),
    /// PHP 8 named argument only
    Named(String),
    /// Named argument if the call supplies it, otherwise the position
    NamedOrPosition { name: String, index: usize },
}

impl ArgumentSlot {
    pub fn name(&self) -> Option<&str> {
        match self {
            ArgumentSlot::Named(name) | ArgumentSlot::NamedOrPosition { name, .. } => Some(name),
            ArgumentSlot::Position(_) => None,
        }
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            ArgumentSlot::Position(index) | ArgumentSlot::NamedOrPosition { index, .. } => {
                Some(*index)
            }
            ArgumentSlot::Named(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeDescriptor {
    receiver: ReceiverFilter,
    names: BTreeSet<String>,
    slot: ArgumentSlot,
}

impl ShapeDescriptor {
    pub fn new<I, S>(receiver: ReceiverFilter, names: I, slot: ArgumentSlot) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(DescriptorError::NoNames);
        }
        if let ReceiverFilter::Classes(classes) = &receiver {
            if classes.is_empty() {
                return Err(DescriptorError::NoClasses);
            }
        }
        if slot.name().is_some_and(str::is_empty) {
            return Err(DescriptorError::EmptyArgumentName);
        }

        Ok(Self { receiver, names, slot })
    }

    /// Descriptor for bare function calls such as `config()` or `__()`.
    pub fn function<I, S>(names: I, slot: ArgumentSlot) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ReceiverFilter::Function, names, slot)
    }

    /// Descriptor for static calls on one of `classes` (fully qualified).
    pub fn method<C, I, S>(classes: C, names: I, slot: ArgumentSlot) -> Result<Self, DescriptorError>
    where
        C: IntoIterator<Item = S>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let classes = classes
            .into_iter()
            .map(|c| {
                let class: String = c.into();
                class.trim_start_matches('\\').to_string()
            })
            .collect();
        Self::new(ReceiverFilter::Classes(classes), names, slot)
    }

    pub fn receiver(&self) -> &ReceiverFilter {
        &self.receiver
    }

    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    pub fn slot(&self) -> &ArgumentSlot {
        &self.slot
    }

    pub fn accepts_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// `None` class means a bare function call.
    pub fn accepts_receiver(&self, class: Option<&str>, is_function: bool) -> bool {
        match (&self.receiver, class) {
            (ReceiverFilter::Function, _) => is_function,
            (ReceiverFilter::Classes(classes), Some(class)) => classes.contains(class),
            (ReceiverFilter::Classes(_), None) => false,
        }
    }
}
