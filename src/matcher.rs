//! Call-site matcher
//!
//! Pure function over a lowered call tree and a descriptor list. Every
//! (call, descriptor) pair is judged independently, so two descriptors that
//! both accept the same call produce two matches; consumers deduplicate by
//! range when they need to.

use lsp_types::Range;

use crate::descriptor::{ArgumentSlot, ShapeDescriptor};
use crate::document::{Argument, CallNode, Receiver, StringLiteral};

/// A call expression that satisfied a descriptor, plus the literal to check.
#[derive(Debug, Clone, Copy)]
pub struct CallSiteMatch<'a> {
    pub call: &'a CallNode,
    pub descriptor: &'a ShapeDescriptor,
    /// Position of `descriptor` in the list handed to the matcher
    pub descriptor_index: usize,
    /// Index into `call.arguments` of the selected argument
    pub argument_index: usize,
    pub literal: &'a StringLiteral,
}

impl<'a> CallSiteMatch<'a> {
    pub fn value(&self) -> &'a str {
        &self.literal.value
    }

    pub fn range(&self) -> Range {
        self.literal.range
    }

    pub fn method(&self) -> &'a str {
        &self.call.name
    }

    pub fn receiver_class(&self) -> Option<&'a str> {
        self.call.receiver_class()
    }

    pub fn arguments(&self) -> &'a [Argument] {
        &self.call.arguments
    }

    pub fn argument(&self) -> &'a Argument {
        &self.call.arguments[self.argument_index]
    }

    /// True when the literal was supplied as a named argument.
    pub fn is_named(&self) -> bool {
        self.argument().name.is_some()
    }

    /// Index among the call's positional arguments, `None` for named ones.
    pub fn positional_index(&self) -> Option<usize> {
        if self.is_named() {
            return None;
        }
        Some(
            self.call.arguments[..self.argument_index]
                .iter()
                .filter(|arg| arg.name.is_none())
                .count(),
        )
    }
}

/// Run every descriptor against every call, in source order.
pub fn match_calls<'a>(
    calls: &'a [CallNode],
    descriptors: &'a [ShapeDescriptor],
) -> Vec<CallSiteMatch<'a>> {
    let mut matches = Vec::new();
    for call in calls {
        for (descriptor_index, descriptor) in descriptors.iter().enumerate() {
            if let Some(found) = match_call(call, descriptor, descriptor_index) {
                matches.push(found);
            }
        }
    }
    matches
}

pub fn match_call<'a>(
    call: &'a CallNode,
    descriptor: &'a ShapeDescriptor,
    descriptor_index: usize,
) -> Option<CallSiteMatch<'a>> {
    if !descriptor.accepts_name(&call.name) {
        return None;
    }

    let is_function = call.receiver == Receiver::Function;
    if !descriptor.accepts_receiver(call.receiver_class(), is_function) {
        return None;
    }

    let (argument_index, argument) = select_argument(call, descriptor.slot())?;
    let literal = argument.literal()?;

    Some(CallSiteMatch {
        call,
        descriptor,
        descriptor_index,
        argument_index,
        literal,
    })
}

/// Named argument wins when the call supplies it; otherwise fall back to
/// the positional index.
pub fn select_argument<'a>(call: &'a CallNode, slot: &ArgumentSlot) -> Option<(usize, &'a Argument)> {
    match slot {
        ArgumentSlot::Position(index) => call.positional(*index),
        ArgumentSlot::Named(name) => call.named(name),
        ArgumentSlot::NamedOrPosition { name, index } => {
            call.named(name).or_else(|| call.positional(*index))
        }
    }
}
