//! Transport, marshaller and transformer registries
//!
//! Lookup tables the managers resolve subscriptions against: URI scheme to
//! transport factory, MIME type to marshaller, name to transformer.

use std::collections::HashMap;
use std::sync::Arc;

use contracts::{Marshaller, Message, TransportFactory, Transformer, DEFAULT_MIME_TYPE};

use crate::marshal::{BinaryMarshaller, JsonMarshaller};

/// URI scheme to transport factory table.
pub struct TransportRegistry<M: Message> {
    factories: HashMap<String, Arc<dyn TransportFactory<M>>>,
}

impl<M: Message> TransportRegistry<M> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory for every scheme it claims; a later registration
    /// replaces an earlier one for the same scheme
    pub fn register(&mut self, factory: Arc<dyn TransportFactory<M>>) {
        for scheme in factory.schemes() {
            self.factories
                .insert(scheme.to_ascii_lowercase(), Arc::clone(&factory));
        }
    }

    /// Whether a scheme has a registered factory
    pub fn contains(&self, scheme: &str) -> bool {
        self.factories.contains_key(scheme)
    }

    /// Look up the factory for a scheme
    pub fn get(&self, scheme: &str) -> Option<Arc<dyn TransportFactory<M>>> {
        self.factories.get(scheme).cloned()
    }

    /// All registered schemes, sorted for deterministic listing
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.factories.keys().cloned().collect();
        schemes.sort();
        schemes
    }
}

impl<M: Message> Default for TransportRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// MIME type to marshaller table, pre-populated with the JSON and binary
/// built-ins.
pub struct MarshallerRegistry<M: Message> {
    marshallers: HashMap<String, Arc<dyn Marshaller<M>>>,
}

impl<M: Message> MarshallerRegistry<M> {
    /// Create a registry with the built-in marshallers
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            marshallers: HashMap::new(),
        };
        registry.register(Arc::new(JsonMarshaller));
        registry.register(Arc::new(BinaryMarshaller));
        registry
    }

    /// Register a marshaller under its MIME type
    pub fn register(&mut self, marshaller: Arc<dyn Marshaller<M>>) {
        self.marshallers
            .insert(marshaller.mime_type().to_string(), marshaller);
    }

    /// Whether a MIME type has a registered marshaller
    pub fn contains(&self, mime_type: &str) -> bool {
        self.marshallers.contains_key(mime_type)
    }

    /// Look up the marshaller for a MIME type
    pub fn get(&self, mime_type: &str) -> Option<Arc<dyn Marshaller<M>>> {
        self.marshallers.get(mime_type).cloned()
    }
}

impl<M: Message> Default for MarshallerRegistry<M> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Name to transformer table; empty by default, script engines and other
/// transformation backends register themselves here.
pub struct TransformerRegistry<M> {
    transformers: HashMap<String, Arc<dyn Transformer<M>>>,
}

impl<M> TransformerRegistry<M> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            transformers: HashMap::new(),
        }
    }

    /// Register a transformer under its name
    pub fn register(&mut self, transformer: Arc<dyn Transformer<M>>) {
        self.transformers
            .insert(transformer.name().to_string(), transformer);
    }

    /// Whether a name has a registered transformer
    pub fn contains(&self, name: &str) -> bool {
        self.transformers.contains_key(name)
    }

    /// Look up a transformer by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Transformer<M>>> {
        self.transformers.get(name).cloned()
    }
}

impl<M> Default for TransformerRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bundle of the three lookup tables a manager resolves against.
pub struct Registries<M: Message> {
    pub transports: TransportRegistry<M>,
    pub marshallers: MarshallerRegistry<M>,
    pub transformers: TransformerRegistry<M>,
}

impl<M: Message> Registries<M> {
    /// Create registries with default marshallers and no transformers
    pub fn new(transports: TransportRegistry<M>) -> Self {
        Self {
            transports,
            marshallers: MarshallerRegistry::with_defaults(),
            transformers: TransformerRegistry::new(),
        }
    }

    /// Resolve the effective MIME type of a property bag
    pub(crate) fn effective_mime_type<'a>(
        &self,
        properties: &'a contracts::Properties,
    ) -> &'a str {
        properties
            .get(contracts::keys::MIME_TYPE)
            .unwrap_or(DEFAULT_MIME_TYPE)
    }
}
