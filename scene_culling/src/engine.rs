/// Engine - per-process service holder for the culling subsystems
///
/// Embedding hosts register their rendering, physics and navigation
/// servers here once, and get the main-thread message queue and the
/// global logger from here. Subsystems themselves take an explicit
/// `ServerSet`; the holder only saves hosts from threading it through.

use std::fmt;
use std::sync::{OnceLock, RwLock, Arc};
use std::time::SystemTime;
use crate::dispatch::MessageQueue;
use crate::error::{Result, Error};
use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
use crate::servers::ServerSet;

// ===== INTERNAL STATE =====

/// Global engine state storage
static ENGINE_STATE: OnceLock<EngineState> = OnceLock::new();

/// Global logger, a `DefaultLogger` until replaced
static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

/// Internal state structure holding all engine singletons
struct EngineState {
    /// Default server set
    servers: RwLock<Option<ServerSet>>,
    /// Main-thread deferred call queue
    message_queue: Arc<MessageQueue>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            servers: RwLock::new(None),
            message_queue: Arc::new(MessageQueue::new()),
        }
    }
}

// ===== PUBLIC API =====

/// Per-process service holder
///
/// # Example
///
/// ```no_run
/// use scene_culling::culling::{Engine, servers::ServerSet};
///
/// Engine::initialize()?;
/// Engine::create_servers(ServerSet::mock())?;
///
/// // Once per frame, after input and before draw
/// Engine::message_queue()?.flush();
///
/// Engine::shutdown();
/// # Ok::<(), scene_culling::culling::Error>(())
/// ```
pub struct Engine;

impl Engine {
    /// Helper to log errors before returning them (internal use)
    fn log_and_return_error(error: Error) -> Error {
        match &error {
            Error::InitializationFailed(msg) => {
                crate::engine_error!("culling::Engine", "Initialization failed: {}", msg);
            }
            Error::BackendError(msg) => {
                crate::engine_error!("culling::Engine", "Backend error: {}", msg);
            }
            _ => {
                crate::engine_error!("culling::Engine", "Engine error: {}", error);
            }
        }
        error
    }

    fn state() -> Result<&'static EngineState> {
        ENGINE_STATE.get().ok_or_else(|| Self::log_and_return_error(
            Error::InitializationFailed("Engine not initialized. Call Engine::initialize() first.".to_string())
        ))
    }

    /// Initialize the engine
    ///
    /// Idempotent. Must be called before registering servers or using the
    /// message queue.
    pub fn initialize() -> Result<()> {
        ENGINE_STATE.get_or_init(EngineState::new);
        Ok(())
    }

    /// Drop the registered servers and discard pending deferred calls
    pub fn shutdown() {
        if let Some(state) = ENGINE_STATE.get() {
            if let Ok(mut servers) = state.servers.write() {
                *servers = None;
            }
        }
    }

    /// Register the default server set
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The engine is not initialized
    /// - A server set is already registered
    /// - The server lock is poisoned
    pub fn create_servers(servers: ServerSet) -> Result<()> {
        let state = Self::state()?;

        let mut lock = state.servers.write()
            .map_err(|_| Self::log_and_return_error(
                Error::BackendError("Server set lock poisoned".to_string())
            ))?;

        if lock.is_some() {
            return Err(Self::log_and_return_error(
                Error::InitializationFailed("Servers already registered. Call Engine::destroy_servers() first.".to_string())
            ));
        }

        *lock = Some(servers);
        crate::engine_info!("culling::Engine", "Server set registered");
        Ok(())
    }

    /// Get the default server set
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not initialized or no servers
    /// were registered.
    pub fn servers() -> Result<ServerSet> {
        let state = Self::state()?;

        let lock = state.servers.read()
            .map_err(|_| Self::log_and_return_error(
                Error::BackendError("Server set lock poisoned".to_string())
            ))?;

        lock.clone()
            .ok_or_else(|| Self::log_and_return_error(
                Error::MissingDependency("Servers not registered. Call Engine::create_servers() first.".to_string())
            ))
    }

    /// Unregister the default server set
    ///
    /// Existing clones held by subsystems stay valid until dropped.
    pub fn destroy_servers() -> Result<()> {
        let state = Self::state()?;

        let mut lock = state.servers.write()
            .map_err(|_| Self::log_and_return_error(
                Error::BackendError("Server set lock poisoned".to_string())
            ))?;

        *lock = None;
        crate::engine_info!("culling::Engine", "Server set destroyed");
        Ok(())
    }

    /// Main-thread deferred call queue
    ///
    /// Worker threads post completion callbacks here; the host flushes it
    /// once per frame.
    pub fn message_queue() -> Result<Arc<MessageQueue>> {
        Ok(Self::state()?.message_queue.clone())
    }

    /// Reset all singletons for testing (only available in test builds)
    #[cfg(test)]
    pub fn reset_for_testing() {
        if let Some(state) = ENGINE_STATE.get() {
            if let Ok(mut servers) = state.servers.write() {
                *servers = None;
            }
            state.message_queue.flush();
        }
    }

    // ===== LOGGING API =====

    /// Replace the global logger
    ///
    /// ```no_run
    /// use scene_culling::culling::{Engine, log::{Logger, LogEntry}};
    ///
    /// struct EditorPanel;
    /// impl Logger for EditorPanel {
    ///     fn log(&self, entry: &LogEntry) {
    ///         eprintln!("{}: {}", entry.source, entry.message);
    ///     }
    /// }
    ///
    /// Engine::set_logger(EditorPanel);
    /// ```
    pub fn set_logger<L: Logger + 'static>(logger: L) {
        if let Ok(mut lock) = Self::logger().write() {
            *lock = Box::new(logger);
        }
    }

    /// Restore the console logger
    pub fn reset_logger() {
        Self::set_logger(DefaultLogger::default());
    }

    /// Log without a call site (used by `engine_log!` and its wrappers)
    pub fn log(severity: LogSeverity, source: &str, message: impl fmt::Display) {
        Self::dispatch(severity, source, message, None);
    }

    /// Log with the call site attached (used by `engine_error!`)
    pub fn log_detailed(
        severity: LogSeverity,
        source: &str,
        message: impl fmt::Display,
        file: &'static str,
        line: u32,
    ) {
        Self::dispatch(severity, source, message, Some((file, line)));
    }

    fn logger() -> &'static RwLock<Box<dyn Logger>> {
        LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger::default())))
    }

    fn dispatch(
        severity: LogSeverity,
        source: &str,
        message: impl fmt::Display,
        site: Option<(&'static str, u32)>,
    ) {
        let Ok(logger) = Self::logger().read() else {
            return;
        };
        if !logger.enabled(severity) {
            return;
        }
        logger.log(&LogEntry {
            severity,
            timestamp: SystemTime::now(),
            source: source.to_string(),
            message: message.to_string(),
            file: site.map(|(file, _)| file),
            line: site.map(|(_, line)| line),
        });
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
