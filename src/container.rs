//! Application models, descriptors, and the container seam
//!
//! An isolate hosts one application container chosen by the closed
//! [`AppModel`] set. The container interface is the narrow boundary the
//! messaging core depends on; model-specific containers can be supplied by
//! embedders. [`BasicContainer`] is the in-crate reference implementation
//! with a per-app running/paused table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{ContainerError, ContainerResult};

/// Application execution flavor hosted by an isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppModel {
    /// Plain main-entry application
    Main,
    /// Xlet application
    Xlet,
    /// MIDlet application
    Midlet,
}

impl AppModel {
    /// Canonical model name used in process arguments and descriptors
    pub fn name(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Xlet => "xlet",
            Self::Midlet => "midlet",
        }
    }

    /// Parse a model name; `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "main" => Some(Self::Main),
            "xlet" => Some(Self::Xlet),
            "midlet" => Some(Self::Midlet),
            _ => None,
        }
    }
}

impl fmt::Display for AppModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Application identifier, allocated by the container at start time
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AppId(pub i32);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app-{}", self.0)
    }
}

/// Application descriptor carried in `START_APP` requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    /// Display title
    pub title: String,

    /// Icon location, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<String>,

    /// Execution model the application requires
    pub app_model: AppModel,

    /// Free-form descriptor properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Application {
    /// Descriptor with a title and model and no extra properties.
    pub fn new(title: impl Into<String>, app_model: AppModel) -> Self {
        Self {
            title: title.into(),
            icon_path: None,
            app_model,
            properties: HashMap::new(),
        }
    }

    /// Add a descriptor property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Look up a descriptor property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Descriptor property marking an application that refuses non-forced
/// destroys.
pub const RESIDENT_PROPERTY: &str = "resident";

/// Container hosting applications inside an isolate
pub trait AppContainer: Send {
    /// Start an application, allocating its app id.
    fn start_app(&mut self, app: &Application, args: &[String]) -> ContainerResult<AppId>;

    /// Pause a running application.
    fn pause_app(&mut self, app_id: AppId) -> ContainerResult<()>;

    /// Resume a paused application.
    fn resume_app(&mut self, app_id: AppId) -> ContainerResult<()>;

    /// Destroy an application. With `unconditional` the application is torn
    /// down even if it objects.
    fn destroy_app(&mut self, app_id: AppId, unconditional: bool) -> ContainerResult<()>;

    /// Number of applications currently hosted.
    fn app_count(&self) -> usize;
}

/// Client notified at defined lifecycle points (windowing, service
/// registries). Internals are out of scope here; defaults are no-ops.
pub trait LifecycleObserver: Send + Sync {
    /// Called before the container starts an application.
    fn on_before_application_started(&self, _app: &Application) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppStatus {
    Running,
    Paused,
}

impl AppStatus {
    fn name(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

struct AppEntry {
    app: Application,
    status: AppStatus,
}

/// Reference container with a per-app status table
///
/// Applications carrying the [`RESIDENT_PROPERTY`] reject destroys unless
/// forced.
pub struct BasicContainer {
    model: AppModel,
    next_id: i32,
    apps: HashMap<AppId, AppEntry>,
}

impl BasicContainer {
    /// Empty container for the given model.
    pub fn new(model: AppModel) -> Self {
        Self {
            model,
            next_id: 0,
            apps: HashMap::new(),
        }
    }

    fn entry_mut(&mut self, app_id: AppId) -> ContainerResult<&mut AppEntry> {
        self.apps
            .get_mut(&app_id)
            .ok_or(ContainerError::UnknownApp(app_id))
    }
}

impl AppContainer for BasicContainer {
    fn start_app(&mut self, app: &Application, args: &[String]) -> ContainerResult<AppId> {
        if app.app_model != self.model {
            return Err(ContainerError::StartFailed(format!(
                "container hosts {} applications, descriptor wants {}",
                self.model, app.app_model
            )));
        }

        let app_id = AppId(self.next_id);
        self.next_id += 1;
        self.apps.insert(
            app_id,
            AppEntry {
                app: app.clone(),
                status: AppStatus::Running,
            },
        );
        tracing::info!(%app_id, title = app.title, ?args, "application started");
        Ok(app_id)
    }

    fn pause_app(&mut self, app_id: AppId) -> ContainerResult<()> {
        let entry = self.entry_mut(app_id)?;
        if entry.status != AppStatus::Running {
            return Err(ContainerError::InvalidState {
                app: app_id,
                expected: AppStatus::Running.name(),
                actual: entry.status.name(),
            });
        }
        entry.status = AppStatus::Paused;
        Ok(())
    }

    fn resume_app(&mut self, app_id: AppId) -> ContainerResult<()> {
        let entry = self.entry_mut(app_id)?;
        if entry.status != AppStatus::Paused {
            return Err(ContainerError::InvalidState {
                app: app_id,
                expected: AppStatus::Paused.name(),
                actual: entry.status.name(),
            });
        }
        entry.status = AppStatus::Running;
        Ok(())
    }

    fn destroy_app(&mut self, app_id: AppId, unconditional: bool) -> ContainerResult<()> {
        let entry = self
            .apps
            .get(&app_id)
            .ok_or(ContainerError::UnknownApp(app_id))?;

        let resident = entry.app.property(RESIDENT_PROPERTY) == Some("true");
        if resident && !unconditional {
            return Err(ContainerError::DestroyRejected(app_id));
        }

        self.apps.remove(&app_id);
        tracing::info!(%app_id, "application destroyed");
        Ok(())
    }

    fn app_count(&self) -> usize {
        self.apps.len()
    }
}

/// Container for an app model. The model set is closed; adding a model is
/// a compile-time change.
pub fn container_for(model: AppModel) -> Box<dyn AppContainer> {
    match model {
        AppModel::Main => Box::new(BasicContainer::new(AppModel::Main)),
        AppModel::Xlet => Box::new(BasicContainer::new(AppModel::Xlet)),
        AppModel::Midlet => Box::new(BasicContainer::new(AppModel::Midlet)),
    }
}
