// SPDX-License-Identifier: Apache-2.0

//! The embedder-populated registry binding catalog members to runnable
//! behaviors.
//!
//! This is the seam between the search core and the program under test:
//! introspection happens elsewhere and lands here as a catalog plus one
//! closure per invocable member. The registry is immutable once built and
//! shared across harness workers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use testsynth_tc::catalog::{Catalog, CatalogBuilder, ClassId, EnumId, FieldId, MemberId};
use testsynth_tc::types::Type;

use crate::context::PutCtx;
use crate::value::Value;

/// How a behavior signals failure. `Explicit` is the program deliberately
/// raising; the rest map to implicit runtime conditions. `Cancelled` is the
/// cooperative reaction to the harness's cancellation flag and never shows
/// up as a recorded failure.
#[derive(Debug, Clone, PartialEq)]
pub enum PutRaise {
    Explicit(String),
    NullDeref(String),
    IndexOutOfBounds(String),
    Arithmetic(String),
    Cancelled,
}

impl PutRaise {
    pub fn explicit(msg: impl Into<String>) -> PutRaise {
        PutRaise::Explicit(msg.into())
    }
}

/// Read-only view of one invocation a behavior receives.
pub struct CallView<'a> {
    pub member: MemberId,
    pub receiver: Option<&'a Value>,
    pub args: &'a [Value],
}

impl<'a> CallView<'a> {
    /// The receiver, which the interpreter has already null-checked.
    pub fn receiver(&self) -> &Value {
        match self.receiver {
            Some(v) => v,
            None => panic!("behavior expected a receiver"),
        }
    }

    pub fn arg(&self, i: usize) -> &Value {
        &self.args[i]
    }
}

pub type Behavior =
    Box<dyn Fn(&mut PutCtx, &CallView) -> Result<Value, PutRaise> + Send + Sync>;

pub struct PutRegistry {
    catalog: Arc<Catalog>,
    behaviors: HashMap<MemberId, Behavior>,
}

impl PutRegistry {
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_arc(&self) -> Arc<Catalog> {
        self.catalog.clone()
    }

    pub fn behavior(&self, member: MemberId) -> Option<&Behavior> {
        self.behaviors.get(&member)
    }
}

impl fmt::Debug for PutRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PutRegistry")
            .field("catalog", &self.catalog.to_string())
            .field("behaviors", &self.behaviors.len())
            .finish()
    }
}

/// Builds the catalog and its behaviors together so member ids line up by
/// construction.
#[derive(Default)]
pub struct RegistryBuilder {
    catalog: CatalogBuilder,
    behaviors: HashMap<MemberId, Behavior>,
}

impl RegistryBuilder {
    pub fn new() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn add_class(&mut self, name: &str, parent: Option<ClassId>) -> ClassId {
        self.catalog.add_class(name, parent)
    }

    pub fn add_enum(&mut self, name: &str, variants: &[&str]) -> EnumId {
        self.catalog.add_enum(name, variants)
    }

    pub fn add_field(&mut self, owner: ClassId, name: &str, ty: Type) -> FieldId {
        self.catalog.add_field(owner, name, ty)
    }

    pub fn add_constructor<F>(
        &mut self,
        class: ClassId,
        name: &str,
        params: Vec<Type>,
        behavior: F,
    ) -> MemberId
    where
        F: Fn(&mut PutCtx, &CallView) -> Result<Value, PutRaise> + Send + Sync + 'static,
    {
        let id = self.catalog.add_constructor(class, name, params);
        self.behaviors.insert(id, Box::new(behavior));
        id
    }

    pub fn add_method<F>(
        &mut self,
        class: ClassId,
        name: &str,
        params: Vec<Type>,
        ret: Option<Type>,
        behavior: F,
    ) -> MemberId
    where
        F: Fn(&mut PutCtx, &CallView) -> Result<Value, PutRaise> + Send + Sync + 'static,
    {
        let id = self.catalog.add_method(class, name, params, ret);
        self.behaviors.insert(id, Box::new(behavior));
        id
    }

    pub fn add_static_method<F>(
        &mut self,
        class: ClassId,
        name: &str,
        params: Vec<Type>,
        ret: Option<Type>,
        behavior: F,
    ) -> MemberId
    where
        F: Fn(&mut PutCtx, &CallView) -> Result<Value, PutRaise> + Send + Sync + 'static,
    {
        let id = self.catalog.add_static_method(class, name, params, ret);
        self.behaviors.insert(id, Box::new(behavior));
        id
    }

    pub fn add_function<F>(
        &mut self,
        name: &str,
        params: Vec<Type>,
        ret: Option<Type>,
        behavior: F,
    ) -> MemberId
    where
        F: Fn(&mut PutCtx, &CallView) -> Result<Value, PutRaise> + Send + Sync + 'static,
    {
        let id = self.catalog.add_function(name, params, ret);
        self.behaviors.insert(id, Box::new(behavior));
        id
    }

    /// Declares a member in the catalog without a runnable behavior.
    /// Executing it is an engine error; useful for negative tests.
    pub fn add_unimplemented_function(
        &mut self,
        name: &str,
        params: Vec<Type>,
        ret: Option<Type>,
    ) -> MemberId {
        self.catalog.add_function(name, params, ret)
    }

    pub fn build(self) -> Arc<PutRegistry> {
        Arc::new(PutRegistry {
            catalog: Arc::new(self.catalog.build()),
            behaviors: self.behaviors,
        })
    }
}
