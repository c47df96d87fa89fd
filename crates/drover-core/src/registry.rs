//! Handler registry. Maps stored handler names to factories that rebuild a
//! handler from its persisted JSON.
//!
//! Lookup order: the cache (explicit registrations and earlier hits), then
//! plugin resolvers, then extra resolvers. A resolver hit is cached for the
//! lifetime of the process.

use serde::de::DeserializeOwned;
use std::{
	collections::HashMap,
	sync::{Arc, RwLock},
};

use crate::handler::TaskHandler;
use crate::prelude::*;

pub type HandlerFactory<S> = dyn Fn(&str) -> DrResult<Arc<dyn TaskHandler<S>>> + Send + Sync;

type FactoryMap<S> = HashMap<Box<str>, Arc<HandlerFactory<S>>>;

/// Factory that rebuilds `H` from its serialized JSON
pub fn json_factory<S, H>() -> Arc<HandlerFactory<S>>
where
	S: Clone + Send + Sync + 'static,
	H: TaskHandler<S> + DeserializeOwned + 'static,
{
	Arc::new(|data: &str| {
		let handler: H = serde_json::from_str(data)?;
		Ok(Arc::new(handler) as Arc<dyn TaskHandler<S>>)
	})
}

/// A source of handler factories consulted when a name is not in the cache
pub trait HandlerResolver<S: Clone>: Send + Sync {
	fn name(&self) -> &str;
	fn resolve(&self, handler_name: &str) -> Option<Arc<HandlerFactory<S>>>;
}

/// A named bundle of handlers, e.g. everything one plugin module provides
pub struct PluginHandlers<S: Clone> {
	name: Box<str>,
	factories: FactoryMap<S>,
}

impl<S: Clone + Send + Sync + 'static> PluginHandlers<S> {
	pub fn new(name: impl Into<Box<str>>) -> Self {
		Self { name: name.into(), factories: HashMap::new() }
	}

	#[must_use]
	pub fn with<H: TaskHandler<S> + DeserializeOwned + 'static>(mut self) -> Self {
		self.factories.insert(H::kind().into(), json_factory::<S, H>());
		self
	}
}

impl<S: Clone + Send + Sync + 'static> HandlerResolver<S> for PluginHandlers<S> {
	fn name(&self) -> &str {
		&self.name
	}

	fn resolve(&self, handler_name: &str) -> Option<Arc<HandlerFactory<S>>> {
		self.factories.get(handler_name).cloned()
	}
}

pub struct TaskRegistry<S: Clone> {
	cache: RwLock<FactoryMap<S>>,
	plugins: RwLock<Vec<Arc<dyn HandlerResolver<S>>>>,
	extra: RwLock<Vec<Arc<dyn HandlerResolver<S>>>>,
}

impl<S: Clone + Send + Sync + 'static> Default for TaskRegistry<S> {
	fn default() -> Self {
		Self::new()
	}
}

impl<S: Clone + Send + Sync + 'static> TaskRegistry<S> {
	pub fn new() -> Self {
		Self {
			cache: RwLock::new(HashMap::new()),
			plugins: RwLock::new(Vec::new()),
			extra: RwLock::new(Vec::new()),
		}
	}

	pub fn register<H: TaskHandler<S> + DeserializeOwned + 'static>(&self) -> DrResult<&Self> {
		info!("Registering task handler {}", H::kind());
		self.insert(H::kind(), json_factory::<S, H>())
	}

	pub fn register_fn<F>(&self, name: &str, factory: F) -> DrResult<&Self>
	where
		F: Fn(&str) -> DrResult<Arc<dyn TaskHandler<S>>> + Send + Sync + 'static,
	{
		info!("Registering task handler {}", name);
		self.insert(name, Arc::new(factory))
	}

	fn insert(&self, name: &str, factory: Arc<HandlerFactory<S>>) -> DrResult<&Self> {
		if name.trim().is_empty() {
			return Err(Error::Configuration("handler name must not be blank".into()));
		}
		let mut cache = self
			.cache
			.write()
			.map_err(|_| Error::Internal("handler cache RwLock poisoned".into()))?;
		cache.insert(name.into(), factory);
		Ok(self)
	}

	pub fn register_plugin(&self, resolver: Arc<dyn HandlerResolver<S>>) -> DrResult<&Self> {
		info!("Registering handler plugin {}", resolver.name());
		self.plugins
			.write()
			.map_err(|_| Error::Internal("plugin resolvers RwLock poisoned".into()))?
			.push(resolver);
		Ok(self)
	}

	pub fn register_resolver(&self, resolver: Arc<dyn HandlerResolver<S>>) -> DrResult<&Self> {
		info!("Registering extra handler resolver {}", resolver.name());
		self.extra
			.write()
			.map_err(|_| Error::Internal("extra resolvers RwLock poisoned".into()))?
			.push(resolver);
		Ok(self)
	}

	/// Find the factory for `handler_name`, consulting resolvers on a cache miss.
	pub fn resolve(&self, handler_name: &str) -> DrResult<Arc<HandlerFactory<S>>> {
		if let Some(factory) = self
			.cache
			.read()
			.map_err(|_| Error::Internal("handler cache RwLock poisoned".into()))?
			.get(handler_name)
		{
			return Ok(Arc::clone(factory));
		}

		let found = self.resolve_in(&self.plugins, handler_name)?;
		let found = match found {
			Some(found) => Some(found),
			None => self.resolve_in(&self.extra, handler_name)?,
		};
		let Some((resolver_name, factory)) = found else {
			warn!("No handler found for {}", handler_name);
			return Err(Error::HandlerNotFound(handler_name.into()));
		};

		debug!("Handler {} resolved by {}", handler_name, resolver_name);
		self.cache
			.write()
			.map_err(|_| Error::Internal("handler cache RwLock poisoned".into()))?
			.insert(handler_name.into(), Arc::clone(&factory));
		Ok(factory)
	}

	/// Resolve and build a handler instance for a stored record
	pub fn build(&self, task: &TaskRecord) -> DrResult<Arc<dyn TaskHandler<S>>> {
		let factory = self.resolve(&task.handler_name)?;
		factory(&task.data_json)
	}

	pub fn is_registered(&self, handler_name: &str) -> bool {
		self.resolve(handler_name).is_ok()
	}

	fn resolve_in(
		&self,
		resolvers: &RwLock<Vec<Arc<dyn HandlerResolver<S>>>>,
		handler_name: &str,
	) -> DrResult<Option<(Box<str>, Arc<HandlerFactory<S>>)>> {
		let resolvers =
			resolvers.read().map_err(|_| Error::Internal("resolvers RwLock poisoned".into()))?;
		Ok(resolvers
			.iter()
			.find_map(|r| r.resolve(handler_name).map(|f| (r.name().into(), f))))
	}
}


// vim: ts=4
