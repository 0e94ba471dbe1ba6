// crates/core/src/catalog.rs
//! Resolution of `func` names to job callables.
//!
//! Job code is compiled in, so modules are registered up front under a
//! dotted path that starts with the jobs directory. A request for
//! `func = "demo.echo"` with `jobs_dir = "jobs"` resolves function `echo`
//! in module `jobs.demo`; `jobs_dir = "a/b"` maps to the `a.b` prefix.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{JobError, JobFailure};
use crate::jobs::{job_fn, Job, JobFn};

/// A named set of job callables.
#[derive(Clone, Default)]
pub struct JobModule {
    functions: HashMap<String, JobFn>,
}

impl JobModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fn<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Job) -> Result<(), JobFailure> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), job_fn(f));
        self
    }

    pub fn get(&self, name: &str) -> Option<JobFn> {
        self.functions.get(name).cloned()
    }
}

/// Every job module the daemon can run, keyed by full module path.
#[derive(Clone, Default)]
pub struct JobCatalog {
    modules: HashMap<String, JobModule>,
}

impl JobCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: impl Into<String>, module: JobModule) -> &mut Self {
        self.modules.insert(path.into(), module);
        self
    }

    pub fn with_module(mut self, path: impl Into<String>, module: JobModule) -> Self {
        self.register(path, module);
        self
    }

    pub fn module_paths(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Resolve `func` (`"mod.sub.name"`) under `jobs_dir`.
    ///
    /// Both an unknown module and an unknown function are `Loading` errors.
    pub fn resolve(&self, jobs_dir: &str, func: &str) -> Result<JobFn, JobError> {
        let mut segments: Vec<&str> = jobs_dir.split('/').filter(|s| !s.is_empty()).collect();
        segments.extend(func.split('.'));

        let Some((name, module_segments)) = segments.split_last() else {
            return Err(JobError::Loading("failed to import: empty module path".into()));
        };
        let module_path = module_segments.join(".");

        let module = self.modules.get(&module_path).ok_or_else(|| {
            JobError::Loading(format!(
                "failed to import {module_path}: no module named '{module_path}'"
            ))
        })?;
        debug!(module = %module_path, func = %name, "job module resolved");

        module
            .get(name)
            .ok_or_else(|| JobError::Loading(format!("function not found: '{name}'")))
    }
}

impl std::fmt::Debug for JobCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut paths: Vec<_> = self.module_paths().collect();
        paths.sort_unstable();
        f.debug_struct("JobCatalog").field("modules", &paths).finish()
    }
}
