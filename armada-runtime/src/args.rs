//! Building invocation arguments on the client and decoding them in task bodies.

use crate::handle::{ResultHandle, ResultHandleCollection};
use armada_core::codec::{Codec, sealed};
use armada_core::{Argument, ArmadaError, LazyArgs, Materialize, Result, SessionToken};
use bytes::Bytes;
use once_cell::sync::OnceCell;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type AnyValue = Box<dyn Any + Send + Sync>;

/// Arguments of one invocation, built fluently from a session.
///
/// Positional arguments keep their order. [`named`](Self::named) turns the most
/// recently added positional argument into a keyword argument. The first
/// invalid argument is remembered and reported when the invocation is
/// submitted, before anything reaches the backend.
///
/// ```rust,ignore
/// let args = session.args().value(&8).handle(&previous).value(&"sum").named("label");
/// let handle = session.invoke(&add, args).await?;
/// ```
pub struct Args<C> {
    codec: Arc<C>,
    session: SessionToken,
    positional: Vec<Argument>,
    named: BTreeMap<String, Argument>,
    materializations: Vec<Materialize>,
    error: Option<ArmadaError>,
}

#[derive(Debug)]
pub(crate) struct ArgsParts {
    pub(crate) positional: Vec<Argument>,
    pub(crate) named: BTreeMap<String, Argument>,
    pub(crate) materializations: Vec<Materialize>,
}

impl<C: Codec> Args<C> {
    pub(crate) fn new(codec: Arc<C>, session: SessionToken) -> Self {
        Self {
            codec,
            session,
            positional: Vec::new(),
            named: BTreeMap::new(),
            materializations: Vec::new(),
            error: None,
        }
    }

    /// An immediate value, encoded now.
    pub fn value<T: ?Sized>(mut self, value: &T) -> Self
    where
        C: sealed::EncodeValue<T>,
    {
        if self.error.is_some() {
            return self;
        }
        match self.codec.encode(value) {
            Ok(bytes) => self.positional.push(Argument::Value(bytes)),
            Err(e) => {
                let index = self.positional.len();
                self.error = Some(ArmadaError::Argument(format!(
                    "failed to encode argument {index}: {e:#}"
                )));
            }
        }
        self
    }

    /// Already encoded bytes, passed through untouched.
    pub fn encoded(mut self, bytes: Bytes) -> Self {
        if self.error.is_none() {
            self.positional.push(Argument::Value(bytes));
        }
        self
    }

    /// The value behind a handle; the invocation waits until it is terminal.
    pub fn handle(mut self, handle: &ResultHandle<C>) -> Self {
        if self.error.is_some() {
            return self;
        }
        if handle.session_token() != &self.session {
            self.error = Some(self.foreign(handle.session_token()));
            return self;
        }
        self.positional
            .push(Argument::Handle(handle.result_id().clone()));
        self
    }

    /// All values of a collection, delivered to the task as one list.
    pub fn collection(mut self, collection: &ResultHandleCollection<C>) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Some(foreign) = collection
            .iter()
            .find(|h| h.session_token() != &self.session)
        {
            self.error = Some(self.foreign(foreign.session_token()));
            return self;
        }
        self.positional
            .push(Argument::Collection(collection.ids()));
        self
    }

    /// An uploaded materialization. The worker places its content before the
    /// task body runs; the argument itself decodes to the [`Materialize`] record.
    pub fn materialized(mut self, record: &Materialize) -> Self
    where
        C: sealed::EncodeValue<Materialize>,
    {
        if self.error.is_some() {
            return self;
        }
        if record.uploaded_id().is_none() {
            self.error = Some(ArmadaError::Argument(format!(
                "{} has not been uploaded; call upload_materialize first",
                record.source_path.display()
            )));
            return self;
        }
        self.materializations.push(record.clone());
        self.value(record)
    }

    /// Turn the last positional argument into a keyword argument called `name`.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        if self.error.is_some() {
            return self;
        }
        let name = name.into();
        match self.positional.pop() {
            Some(_) if self.named.contains_key(&name) => {
                self.error = Some(ArmadaError::Argument(format!(
                    "keyword argument '{name}' given twice"
                )));
            }
            Some(argument) => {
                self.named.insert(name, argument);
            }
            None => {
                self.error = Some(ArmadaError::Argument(format!(
                    "keyword '{name}' has no preceding argument"
                )));
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn foreign(&self, other: &SessionToken) -> ArmadaError {
        ArmadaError::Argument(format!(
            "handle from session {other} used in session {}",
            self.session
        ))
    }

    pub(crate) fn finish(self) -> Result<ArgsParts> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(ArgsParts {
            positional: self.positional,
            named: self.named,
            materializations: self.materializations,
        })
    }
}

impl<C> fmt::Debug for Args<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("session", &self.session)
            .field("positional", &self.positional.len())
            .field("named", &self.named.keys().collect::<Vec<_>>())
            .field("materializations", &self.materializations.len())
            .field("error", &self.error)
            .finish()
    }
}

/// A fully resolved argument as received by a worker.
pub(crate) enum ResolvedArg {
    One(Bytes),
    Many(Vec<Bytes>),
}

enum Slot {
    One(LazyArgs<AnyValue>),
    Many {
        items: Vec<Bytes>,
        decoded: OnceCell<AnyValue>,
    },
}

impl From<ResolvedArg> for Slot {
    fn from(arg: ResolvedArg) -> Self {
        match arg {
            ResolvedArg::One(bytes) => Slot::One(LazyArgs::from_encoded(bytes)),
            ResolvedArg::Many(items) => Slot::Many {
                items,
                decoded: OnceCell::new(),
            },
        }
    }
}

/// Arguments handed to a task body.
///
/// Each argument is decoded on first access and cached; decoding the same slot
/// as a different type is an error.
pub struct TaskArgs<C> {
    codec: Arc<C>,
    positional: Vec<Slot>,
    named: BTreeMap<String, Slot>,
}

impl<C: Codec> TaskArgs<C> {
    pub(crate) fn from_resolved(
        codec: Arc<C>,
        positional: Vec<ResolvedArg>,
        named: BTreeMap<String, ResolvedArg>,
    ) -> Self {
        Self {
            codec,
            positional: positional.into_iter().map(Slot::from).collect(),
            named: named.into_iter().map(|(k, v)| (k, Slot::from(v))).collect(),
        }
    }

    /// Positional argument `index`.
    pub fn get<T>(&self, index: usize) -> Result<&T>
    where
        T: Any + Send + Sync,
        C: sealed::DecodeValue<T>,
    {
        let slot = self.positional.get(index).ok_or_else(|| missing(&index))?;
        self.decode_one(slot, &index)
    }

    /// Keyword argument `name`.
    pub fn get_named<T>(&self, name: &str) -> Result<&T>
    where
        T: Any + Send + Sync,
        C: sealed::DecodeValue<T>,
    {
        let slot = self.named.get(name).ok_or_else(|| missing(&name))?;
        self.decode_one(slot, &name)
    }

    /// Keyword argument `name`, if it was passed.
    pub fn get_named_opt<T>(&self, name: &str) -> Result<Option<&T>>
    where
        T: Any + Send + Sync,
        C: sealed::DecodeValue<T>,
    {
        match self.named.get(name) {
            Some(slot) => self.decode_one(slot, &name).map(Some),
            None => Ok(None),
        }
    }

    /// Positional argument `index`, passed as a handle collection.
    pub fn collection<T>(&self, index: usize) -> Result<&[T]>
    where
        T: Any + Send + Sync,
        C: sealed::DecodeValue<T>,
    {
        let slot = self.positional.get(index).ok_or_else(|| missing(&index))?;
        self.decode_many(slot, &index)
    }

    /// Keyword argument `name`, passed as a handle collection.
    pub fn named_collection<T>(&self, name: &str) -> Result<&[T]>
    where
        T: Any + Send + Sync,
        C: sealed::DecodeValue<T>,
    {
        let slot = self.named.get(name).ok_or_else(|| missing(&name))?;
        self.decode_many(slot, &name)
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.named.keys().map(String::as_str)
    }

    fn decode_one<'a, T>(&'a self, slot: &'a Slot, label: &dyn fmt::Display) -> Result<&'a T>
    where
        T: Any + Send + Sync,
        C: sealed::DecodeValue<T>,
    {
        let Slot::One(lazy) = slot else {
            return Err(ArmadaError::Argument(format!(
                "argument {label} is a collection"
            )));
        };
        let value = lazy
            .get_or_decode(|bytes| Ok(Box::new(self.codec.decode::<T>(bytes)?) as AnyValue))
            .map_err(ArmadaError::Codec)?;
        (**value)
            .downcast_ref::<T>()
            .ok_or_else(|| mismatched(label))
    }

    fn decode_many<'a, T>(&'a self, slot: &'a Slot, label: &dyn fmt::Display) -> Result<&'a [T]>
    where
        T: Any + Send + Sync,
        C: sealed::DecodeValue<T>,
    {
        let Slot::Many { items, decoded } = slot else {
            return Err(ArmadaError::Argument(format!(
                "argument {label} is not a collection"
            )));
        };
        let value = decoded
            .get_or_try_init(|| {
                items
                    .iter()
                    .map(|bytes| self.codec.decode::<T>(bytes.clone()))
                    .collect::<anyhow::Result<Vec<T>>>()
                    .map(|values| Box::new(values) as AnyValue)
            })
            .map_err(ArmadaError::Codec)?;
        (**value)
            .downcast_ref::<Vec<T>>()
            .map(Vec::as_slice)
            .ok_or_else(|| mismatched(label))
    }
}

fn missing(label: &dyn fmt::Display) -> ArmadaError {
    ArmadaError::Argument(format!("missing argument {label}"))
}

fn mismatched(label: &dyn fmt::Display) -> ArmadaError {
    ArmadaError::Argument(format!(
        "argument {label} was already decoded as a different type"
    ))
}

impl<C> fmt::Debug for TaskArgs<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskArgs")
            .field("positional", &self.positional.len())
            .field("named", &self.named.keys().collect::<Vec<_>>())
            .finish()
    }
}
