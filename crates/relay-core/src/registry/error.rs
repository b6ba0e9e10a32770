use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("module id must not be empty")]
    EmptyId,
    #[error("module '{0}' is already registered")]
    DuplicateId(String),
    #[error("module '{0}' failed to load: {1}")]
    LoadFailed(String, String),
    #[error("unknown registry event '{0}'")]
    UnknownEvent(String),
    #[error("module load error: {0}")]
    ModuleLoadError(String),
    #[error("circular dependency detected: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),
    #[error("module '{0}' requires missing dependency '{1}'")]
    MissingDependency(String, String),
    #[error("duplicate discovery namespace '{0}'")]
    DuplicateNamespace(String),
    #[error("discovery io error: {0}")]
    Io(String),
    #[error("binding error: {0}")]
    Binding(#[from] crate::binding::BindingError),
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::EmptyId | RegistryError::DuplicateId(_) => "MODULE_LOAD_ERROR",
            RegistryError::LoadFailed(_, _) => "MODULE_LOAD_ERROR",
            RegistryError::UnknownEvent(_) => "GENERAL_INVALID_INPUT",
            RegistryError::ModuleLoadError(_) => "MODULE_LOAD_ERROR",
            RegistryError::CircularDependency(_) => "CIRCULAR_DEPENDENCY",
            RegistryError::MissingDependency(_, _) => "MODULE_LOAD_ERROR",
            RegistryError::DuplicateNamespace(_) => "MODULE_LOAD_ERROR",
            RegistryError::Io(_) => "MODULE_LOAD_ERROR",
            RegistryError::Binding(e) => e.code(),
        }
    }
}
