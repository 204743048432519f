pub mod artifacts;
pub mod compiler;
pub mod discovery;
pub mod error;
pub mod launcher;
pub mod process;
pub mod secrets;

pub use artifacts::{Artifact, ArtifactRegistry, ArtifactResolver};
pub use compiler::{CompileInput, ExtraVars, Topology, compile, compile_vars, topology};
pub use error::{ArtifactError, CompileError, LaunchError, SecretError};
pub use launcher::Launcher;
pub use process::{AnsiblePlaybook, AutomationProcess, Invocation};
pub use secrets::{OsCredentials, SecretStore};
