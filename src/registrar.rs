//! Function registry.
//!
//! Maps a task's `func_name` to a converter that builds a [`Performer`] from
//! the task. The registrar is an ordinary value: construct it, register
//! converters, then hand it to the processor behind an `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::Task;

/// Error type returned by converters and performers.
pub type PerformError = Box<dyn std::error::Error + Send + Sync>;

/// An executable unit of work built from a task's arguments.
#[async_trait]
pub trait Performer: Send {
    async fn perform(&mut self) -> std::result::Result<(), PerformError>;
}

/// Builds a performer from a task. Construction may fail, e.g. on malformed
/// arguments; that is distinct from the performer failing later.
pub type Converter =
    Arc<dyn Fn(&Task) -> std::result::Result<Box<dyn Performer>, PerformError> + Send + Sync>;

/// Name → converter lookup table.
#[derive(Default)]
pub struct Registrar {
    converters: RwLock<HashMap<String, Converter>>,
}

impl Registrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `name` with a converter. Registering the same name again
    /// replaces the previous converter.
    pub fn register<F, P>(&self, name: impl Into<String>, converter: F)
    where
        F: Fn(&Task) -> std::result::Result<P, PerformError> + Send + Sync + 'static,
        P: Performer + 'static,
    {
        let converter: Converter = Arc::new(move |task: &Task| {
            converter(task).map(|p| Box::new(p) as Box<dyn Performer>)
        });
        self.register_converter(name, converter);
    }

    /// Register an already type-erased converter.
    pub fn register_converter(&self, name: impl Into<String>, converter: Converter) {
        let name = name.into();
        let mut converters = self
            .converters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if converters.insert(name.clone(), converter).is_some() {
            tracing::debug!(func_name = %name, "converter replaced");
        }
    }

    /// Look up the converter for `name`.
    pub fn fetch(&self, name: &str) -> Result<Converter> {
        let converters = self
            .converters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        converters
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ConverterNotFound(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let converters = self
            .converters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = converters.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Performer backed by an async closure. Handy for small functions that do
/// not need their own type.
pub struct FnPerformer<F>(Option<F>);

impl<F, Fut> FnPerformer<F>
where
    F: FnOnce() -> Fut + Send,
    Fut: std::future::Future<Output = std::result::Result<(), PerformError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self(Some(f))
    }
}

#[async_trait]
impl<F, Fut> Performer for FnPerformer<F>
where
    F: FnOnce() -> Fut + Send,
    Fut: std::future::Future<Output = std::result::Result<(), PerformError>> + Send,
{
    async fn perform(&mut self) -> std::result::Result<(), PerformError> {
        match self.0.take() {
            Some(f) => f().await,
            None => Err("performer already ran".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Performer for Noop {
        async fn perform(&mut self) -> std::result::Result<(), PerformError> {
            Ok(())
        }
    }

    struct Named(&'static str);

    #[async_trait]
    impl Performer for Named {
        async fn perform(&mut self) -> std::result::Result<(), PerformError> {
            Err(self.0.into())
        }
    }

    #[test]
    fn fetch_unknown_name_fails() {
        let registrar = Registrar::new();
        let err = registrar.fetch("missing").err().unwrap();
        assert!(matches!(err, Error::ConverterNotFound(ref name) if name == "missing"));
        assert!(err.to_string().contains("no converter"));
    }

    #[tokio::test]
    async fn fetch_builds_performer() {
        let registrar = Registrar::new();
        registrar.register("noop", |_task: &Task| Ok(Noop));

        let converter = registrar.fetch("noop").unwrap();
        let mut performer = converter(&Task::new("noop", Vec::new())).unwrap();
        assert!(performer.perform().await.is_ok());
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registrar = Registrar::new();
        registrar.register("job", |_task: &Task| Ok(Named("first")));
        registrar.register("job", |_task: &Task| Ok(Named("second")));

        let converter = registrar.fetch("job").unwrap();
        let mut performer = converter(&Task::new("job", Vec::new())).unwrap();
        let err = performer.perform().await.unwrap_err();
        assert_eq!(err.to_string(), "second");
        assert_eq!(registrar.names(), vec!["job".to_string()]);
    }

    #[test]
    fn converter_errors_surface() {
        let registrar = Registrar::new();
        registrar.register("strict", |task: &Task| {
            task.json_args::<u32>()?;
            Ok(Noop)
        });

        let converter = registrar.fetch("strict").unwrap();
        assert!(converter(&Task::new("strict", b"nope".to_vec())).is_err());
        assert!(converter(&Task::new("strict", b"7".to_vec())).is_ok());
    }

    #[tokio::test]
    async fn fn_performer_runs_once() {
        let mut performer = FnPerformer::new(|| async { Ok(()) });
        assert!(performer.perform().await.is_ok());
        assert!(performer.perform().await.is_err());
    }
}
