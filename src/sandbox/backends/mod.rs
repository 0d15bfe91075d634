mod docker;
mod remote;

pub use docker::{DockerProvider, DockerSandbox};
pub use remote::{RemoteProvider, RemoteSandbox};
