//! Resolves a backend URI (`posix:///mnt/x`, `mongo://host/db`) or a
//! named config entry to a running [crate::backend::Backend], by tag.
//!
//! Adapted from the teacher's store-composition registry: a `type` tag on
//! an internally-tagged serde enum (or a URL scheme) selects a config
//! struct, which then builds the concrete backend. Unlike the teacher,
//! composition here is a flat lookup rather than a general service graph:
//! RobinHood backends don't wrap one another at config time (branching is
//! a runtime call, see [crate::backend::branch]), so [Composition] only
//! needs single-entry resolution, not the teacher's recursive
//! `CompositionContext`.

use erased_serde::deserialize;
use serde::de::DeserializeOwned;
use serde_tagged::de::{BoxFnSeed, SeedFactory};
use serde_tagged::util::TagString;
use std::any::{Any, TypeId};
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;
use tonic::async_trait;

use crate::backend::Backend;

#[derive(Default)]
pub struct Registry(BTreeMap<(TypeId, &'static str), Box<dyn Any + Sync>>);

pub type FromUrlSeed<T> =
    Box<dyn Fn(url::Url) -> Result<T, Box<dyn std::error::Error + Send + Sync>> + Sync>;

struct RegistryEntry<T> {
    serde_deserialize_seed: BoxFnSeed<DeserializeWithRegistry<T>>,
    from_url_seed: FromUrlSeed<DeserializeWithRegistry<T>>,
}

struct RegistryWithFakeType<'r, T>(&'r Registry, PhantomData<T>);

impl<'r, 'de: 'r, T: 'static> SeedFactory<'de, TagString<'de>> for RegistryWithFakeType<'r, T> {
    type Value = DeserializeWithRegistry<T>;
    type Seed = &'r BoxFnSeed<Self::Value>;

    fn seed<E>(self, tag: TagString<'de>) -> Result<Self::Seed, E>
    where
        E: serde::de::Error,
    {
        let seed: &Box<dyn Any + Sync> = self
            .0
             .0
            .iter()
            .find(|(k, _)| *k == &(TypeId::of::<T>(), tag.as_ref()))
            .ok_or_else(|| serde::de::Error::custom("unknown backend tag"))?
            .1;
        let entry: &RegistryEntry<T> = <dyn Any>::downcast_ref(&**seed).unwrap();
        Ok(&entry.serde_deserialize_seed)
    }
}

/// Wraps a value to deserialize it through the registry, e.g.
/// `DeserializeWithRegistry<Box<dyn ServiceBuilder<Output = dyn Backend>>>`.
pub struct DeserializeWithRegistry<T>(pub T);

impl Registry {
    pub fn register<
        T: 'static,
        C: DeserializeOwned
            + TryFrom<url::Url, Error = Box<dyn std::error::Error + Send + Sync>>
            + Into<T>,
    >(
        &mut self,
        type_name: &'static str,
    ) {
        self.0.insert(
            (TypeId::of::<T>(), type_name),
            Box::new(RegistryEntry {
                serde_deserialize_seed: BoxFnSeed::new(|x| {
                    deserialize::<C>(x)
                        .map(Into::into)
                        .map(DeserializeWithRegistry)
                }),
                from_url_seed: Box::new(|url| {
                    C::try_from(url)
                        .map(Into::into)
                        .map(DeserializeWithRegistry)
                }),
            }),
        );
    }
}

impl<'de, T: 'static> serde::Deserialize<'de> for DeserializeWithRegistry<T> {
    fn deserialize<D>(de: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        serde_tagged::de::internal::deserialize(
            de,
            "type",
            RegistryWithFakeType(
                ACTIVE_REG
                    .get()
                    .expect("deserialize a DeserializeWithRegistry<T> inside with_registry()"),
                PhantomData::<T>,
            ),
        )
    }
}

#[derive(Debug, thiserror::Error)]
enum TryFromUrlError {
    #[error("unknown backend scheme: {0}")]
    UnknownTag(String),
}

impl<T: 'static> TryFrom<url::Url> for DeserializeWithRegistry<T> {
    type Error = Box<dyn std::error::Error + Send + Sync>;
    fn try_from(url: url::Url) -> Result<Self, Self::Error> {
        let tag = url.scheme().split('+').next().unwrap();
        let seed = ACTIVE_REG
            .get()
            .expect("build a DeserializeWithRegistry<T> from a url inside with_registry()")
            .0
            .iter()
            .find(|(k, _)| *k == &(TypeId::of::<T>(), tag))
            .ok_or_else(|| Box::new(TryFromUrlError::UnknownTag(tag.into())))?
            .1;
        let entry: &RegistryEntry<T> = <dyn Any>::downcast_ref(&**seed).unwrap();
        (entry.from_url_seed)(url)
    }
}

thread_local! {
    static ACTIVE_REG: Cell<Option<&'static Registry>> = Cell::new(None);
}

pub fn with_registry<R>(reg: &'static Registry, f: impl FnOnce() -> R) -> R {
    ACTIVE_REG.set(Some(reg));
    let result = f();
    ACTIVE_REG.set(None);
    result
}

lazy_static::lazy_static! {
    /// The built-in registry: `posix`, `lustre`, `mongo`. Consumers wanting
    /// third-party backends build their own [Registry] and call
    /// [add_default_backends] plus their own `register` calls.
    pub static ref REG: Registry = {
        let mut reg = Registry::default();
        add_default_backends(&mut reg);
        reg
    };
}

/// Registers `robinhood-store`'s builtin backend configs. Left as a no-op
/// here: `robinhood-core` defines the trait and registry machinery, but
/// the concrete backend configs (which need `robinhood-store`'s mongo
/// driver and posix walker) register themselves via [Registry::register]
/// from their own crate to avoid a dependency cycle.
pub fn add_default_backends(_reg: &mut Registry) {}

#[async_trait]
pub trait ServiceBuilder: Send + Sync {
    type Output: ?Sized;
    async fn build(
        &self,
        instance_name: &str,
    ) -> Result<Arc<Self::Output>, Box<dyn std::error::Error + Send + Sync + 'static>>;
}

impl<T: ?Sized, S: ServiceBuilder<Output = T> + 'static> From<S>
    for Box<dyn ServiceBuilder<Output = T>>
{
    fn from(t: S) -> Self {
        Box::new(t)
    }
}

#[derive(thiserror::Error, Clone, Debug)]
pub enum CompositionError {
    #[error("backend not found: {0}")]
    NotFound(String),
    #[error("instantiation of backend {0} failed: {1}")]
    Failed(String, Arc<dyn std::error::Error + Send + Sync>),
}

/// A flat set of named backend configs, built lazily and cached by name.
pub struct Composition {
    configs: HashMap<String, Box<dyn ServiceBuilder<Output = dyn Backend>>>,
    built: std::sync::Mutex<HashMap<String, Arc<dyn Backend>>>,
}

impl Composition {
    pub fn from_configs(
        configs: HashMap<String, DeserializeWithRegistry<Box<dyn ServiceBuilder<Output = dyn Backend>>>>,
    ) -> Self {
        Composition {
            configs: configs.into_iter().map(|(k, v)| (k, v.0)).collect(),
            built: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub async fn build(&self, name: &str) -> Result<Arc<dyn Backend>, CompositionError> {
        if let Some(existing) = self.built.lock().unwrap().get(name) {
            return Ok(existing.clone());
        }
        let config = self
            .configs
            .get(name)
            .ok_or_else(|| CompositionError::NotFound(name.to_string()))?;
        let built = config
            .build(name)
            .await
            .map_err(|e| CompositionError::Failed(name.to_string(), e.into()))?;
        self.built
            .lock()
            .unwrap()
            .insert(name.to_string(), built.clone());
        Ok(built)
    }
}
