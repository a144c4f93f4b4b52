//! Closure-backed cog sources
//!
//! A builtin cog has no file to re-read, so "compiling" it means calling the
//! constructor closure it was registered with.

use std::sync::Arc;

use crate::domain::entities::CogTemplate;
use crate::plugins::trait_def::{Cog, CogModule, CogSource};

type Compile = Arc<dyn Fn() -> Result<Arc<dyn CogModule>, String> + Send + Sync>;
type Construct = Arc<dyn Fn() -> Result<Box<dyn Cog>, String> + Send + Sync>;

/// Module built from a template and a constructor closure
pub struct FnModule {
    template: CogTemplate,
    construct: Construct,
}

impl FnModule {
    pub fn new<F>(template: CogTemplate, construct: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Cog>, String> + Send + Sync + 'static,
    {
        Self {
            template,
            construct: Arc::new(construct),
        }
    }
}

impl CogModule for FnModule {
    fn template(&self) -> CogTemplate {
        self.template.clone()
    }

    fn construct(&self) -> Result<Box<dyn Cog>, String> {
        (self.construct)()
    }
}

/// Source whose compile step is a closure
pub struct BuiltinSource {
    origin: String,
    compile: Compile,
}

impl BuiltinSource {
    pub fn new<F>(origin: impl Into<String>, compile: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn CogModule>, String> + Send + Sync + 'static,
    {
        Self {
            origin: origin.into(),
            compile: Arc::new(compile),
        }
    }

    /// Source for a cog type that always compiles to the same module
    pub fn of<C, F>(origin: impl Into<String>, template: CogTemplate, make: F) -> Self
    where
        C: Cog + 'static,
        F: Fn() -> C + Send + Sync + 'static,
    {
        let make = Arc::new(make);
        Self::new(origin, move || {
            let make = Arc::clone(&make);
            let module = FnModule::new(template.clone(), move || Ok(Box::new(make()) as Box<dyn Cog>));
            Ok(Arc::new(module) as Arc<dyn CogModule>)
        })
    }
}

impl CogSource for BuiltinSource {
    fn origin(&self) -> String {
        format!("builtin:{}", self.origin)
    }

    fn compile(&self) -> Result<Arc<dyn CogModule>, String> {
        (self.compile)()
    }
}

/// Source for a configured module that does not exist
pub struct MissingSource {
    module: String,
}

impl MissingSource {
    pub fn new(module: impl Into<String>) -> Self {
        Self { module: module.into() }
    }
}

impl CogSource for MissingSource {
    fn origin(&self) -> String {
        format!("missing:{}", self.module)
    }

    fn compile(&self) -> Result<Arc<dyn CogModule>, String> {
        Err(format!("no module named `{}`", self.module))
    }
}
