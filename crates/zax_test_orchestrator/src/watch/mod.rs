//! Watch mode: filesystem events, change resolution and debounced reruns.

pub mod resolver;
pub mod scheduler;
pub mod watcher;

pub use resolver::DependencyGraphResolver;
pub use scheduler::WatchScheduler;
pub use watcher::{start_watcher, WatchEvent, WatchEventKind, WatcherConfig};
