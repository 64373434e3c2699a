//! Typed event registry: name → (parameter shapes, callable).
//!
//! The registry is built once, before any connection is accepted, and
//! is immutable afterwards. Registration is statically typed: the
//! argument tuple of each callable fixes the parameter shapes checked
//! against every decoded envelope, so the hot dispatch path is a map
//! lookup plus a shape comparison with no runtime introspection.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::connection::Connection;
use crate::envelope::{ArgShape, Envelope, EventArgs};
use crate::error::DispatchError;

type Callable<H> = Box<dyn Fn(&H, &Connection, &[Value]) -> Result<(), DispatchError> + Send + Sync>;

struct RegisteredEvent<H> {
    shapes: Vec<ArgShape>,
    invoke: Callable<H>,
}

/// Immutable event-name → handler table for handler instances of type
/// `H`.
///
/// Built with [`EventRegistry::builder`]. Event names are matched
/// case-insensitively; lookups and validation never panic on malformed
/// client input.
pub struct EventRegistry<H> {
    events: HashMap<String, RegisteredEvent<H>>,
}

impl<H> fmt::Debug for EventRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.events.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("EventRegistry")
            .field("events", &names)
            .finish()
    }
}

impl<H> EventRegistry<H> {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> RegistryBuilder<H> {
        RegistryBuilder {
            events: HashMap::new(),
            duplicate: None,
        }
    }

    /// Number of registered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` when no events are registered. Never true for a
    /// registry that came out of [`RegistryBuilder::build`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns `true` if `name` (case-insensitive) is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.events.contains_key(&name.to_lowercase())
    }

    /// Validates a decoded envelope and invokes the matching callable
    /// synchronously with `handler` as receiver.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::UnexpectedEvent`] if no handler matches the
    ///   envelope's name.
    /// - [`DispatchError::ArgsMismatch`] if the argument count or any
    ///   argument's shape differs from the registered parameter list,
    ///   carrying both the expected and the observed shapes.
    pub fn dispatch(
        &self,
        handler: &H,
        conn: &Connection,
        envelope: &Envelope,
    ) -> Result<(), DispatchError> {
        let Some(event) = self.events.get(&envelope.name.to_lowercase()) else {
            return Err(DispatchError::UnexpectedEvent(envelope.name.clone()));
        };

        let actual: Vec<ArgShape> = envelope.args.iter().map(ArgShape::of).collect();
        if actual.len() != event.shapes.len()
            || !event.shapes.iter().zip(&actual).all(|(e, a)| e.accepts(*a))
        {
            return Err(DispatchError::ArgsMismatch {
                expected: event.shapes.clone(),
                actual,
            });
        }

        (event.invoke)(handler, conn, &envelope.args)
    }
}

/// Chainable builder for an [`EventRegistry`].
pub struct RegistryBuilder<H> {
    events: HashMap<String, RegisteredEvent<H>>,
    duplicate: Option<String>,
}

impl<H> fmt::Debug for RegistryBuilder<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("registered", &self.events.len())
            .field("duplicate", &self.duplicate)
            .finish()
    }
}

impl<H> RegistryBuilder<H> {
    /// Registers `callable` for the event `name` (stored lower-cased).
    ///
    /// The callable's argument tuple `A` fixes the event's positional
    /// parameter shapes; decoded envelopes are validated against them
    /// before invocation, so the callable never sees partially bound
    /// arguments.
    #[must_use]
    pub fn on<A, F>(mut self, name: &str, callable: F) -> Self
    where
        A: EventArgs + 'static,
        F: Fn(&H, &Connection, A) + Send + Sync + 'static,
    {
        let key = name.to_lowercase();
        if self.events.contains_key(&key) {
            self.duplicate.get_or_insert(key);
            return self;
        }
        let shapes = A::shapes();
        let invoke: Callable<H> = Box::new(move |handler, conn, args| {
            // Shapes are pre-checked, but binding can still fail (e.g.
            // a float where an i64 parameter was declared).
            let Some(bound) = A::bind(args) else {
                return Err(DispatchError::ArgsMismatch {
                    expected: A::shapes(),
                    actual: args.iter().map(ArgShape::of).collect(),
                });
            };
            callable(handler, conn, bound);
            Ok(())
        });
        self.events.insert(key, RegisteredEvent { shapes, invoke });
        self
    }

    /// Finalizes the registry.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NoEventHandlers`] if nothing was registered;
    ///   a dispatcher without events is a configuration error caught
    ///   here, not per message.
    /// - [`DispatchError::DuplicateEvent`] if the same name (after
    ///   lower-casing) was registered twice.
    pub fn build(self) -> Result<EventRegistry<H>, DispatchError> {
        if let Some(name) = self.duplicate {
            return Err(DispatchError::DuplicateEvent(name));
        }
        if self.events.is_empty() {
            return Err(DispatchError::NoEventHandlers);
        }
        Ok(EventRegistry {
            events: self.events,
        })
    }
}
