mod host_runtime;
mod options;
mod runner;
mod shutdown;

pub use host_runtime::{RunningSockets, SocketRuntime};
pub use options::{CurrentUserProvider, SocketControllersOptions, UserSocketLocator};
pub use runner::{run, ShutdownOptions};
pub use shutdown::wait_for_shutdown;
