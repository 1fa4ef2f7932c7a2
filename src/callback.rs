//! User callbacks and the dispatch boundary that contains their failures.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::types::Input;

/// What a fallible callback returns.
pub type CallbackResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type InputFn = dyn Fn(Input, u16) -> BoxFuture<'static, CallbackResult> + Send + Sync;
type DisconnectFn = dyn Fn() -> BoxFuture<'static, CallbackResult> + Send + Sync;

/// Handler for raw value changes on one input.
///
/// Synchronous and asynchronous handlers are wrapped into the same shape and always
/// run through one async call path.
#[derive(Clone)]
pub struct InputCallback(Arc<InputFn>);

impl InputCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Input, u16) + Send + Sync + 'static,
    {
        Self::fallible(move |input, value| {
            f(input, value);
            Ok(())
        })
    }

    pub fn fallible<F>(f: F) -> Self
    where
        F: Fn(Input, u16) -> CallbackResult + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self(Arc::new(move |input, value| {
            let f = Arc::clone(&f);
            async move { f(input, value) }.boxed()
        }))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Input, u16) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        let f = Arc::new(f);
        Self(Arc::new(move |input, value| {
            let f = Arc::clone(&f);
            async move { f(input, value).await }.boxed()
        }))
    }

    fn call(&self, input: Input, value: u16) -> BoxFuture<'static, CallbackResult> {
        (self.0)(input, value)
    }
}

impl std::fmt::Debug for InputCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InputCallback")
    }
}

/// Handler for unexpected link loss.
#[derive(Clone)]
pub struct DisconnectCallback(Arc<DisconnectFn>);

impl DisconnectCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self(Arc::new(move || {
            let f = Arc::clone(&f);
            async move {
                f();
                CallbackResult::Ok(())
            }
            .boxed()
        }))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        let f = Arc::new(f);
        Self(Arc::new(move || {
            let f = Arc::clone(&f);
            async move { f().await }.boxed()
        }))
    }
}

impl std::fmt::Debug for DisconnectCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DisconnectCallback")
    }
}

/// Connection lifecycle of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug)]
struct Session {
    state: ConnectionState,
    id: u64,
}

#[derive(Debug)]
struct Shared {
    inputs: Mutex<[Option<InputCallback>; 4]>,
    on_disconnect: Mutex<Option<DisconnectCallback>>,
    session: Mutex<Session>,
}

/// Callback tables and connection state shared between a controller and its backend.
///
/// Backends report what they observe here; whether anything is delivered depends on
/// the connection state. Only the controller moves that state:
///
/// ```compile_fail
/// let dispatcher = btsmart::Dispatcher::new();
/// dispatcher.transition(btsmart::ConnectionState::Connected);
/// ```
#[derive(Debug, Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inputs: Mutex::new([None, None, None, None]),
                on_disconnect: Mutex::new(None),
                session: Mutex::new(Session {
                    state: ConnectionState::Disconnected,
                    id: 0,
                }),
            }),
        }
    }

    /// Installs the callback for `input`, replacing any previous one.
    pub fn set_input_callback(&self, input: Input, callback: Option<InputCallback>) {
        let mut inputs = self.shared.inputs.lock().unwrap_or_else(PoisonError::into_inner);
        inputs[input.index()] = callback;
    }

    pub fn set_disconnect_callback(&self, callback: Option<DisconnectCallback>) {
        let mut slot = self
            .shared
            .on_disconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = callback;
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.shared.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        self.session().state
    }

    /// Identifies the current connection attempt. Link-loss reports carry it.
    pub fn session_id(&self) -> u64 {
        self.session().id
    }

    /// Moves to `next` and returns the previous state.
    pub(crate) fn transition(&self, next: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut self.session().state, next)
    }

    /// Starts a new session in [`ConnectionState::Connecting`] and returns its id.
    pub(crate) fn begin_session(&self) -> u64 {
        let mut session = self.session();
        session.id = session.id.wrapping_add(1);
        session.state = ConnectionState::Connecting;
        session.id
    }

    /// Delivers a raw value change for `input` to its callback, if connected.
    ///
    /// Errors and panics raised by the callback are logged and contained here.
    pub async fn input_changed(&self, input: Input, value: u16) {
        if self.state() != ConnectionState::Connected {
            debug!(%input, value, "dropping input change while not connected");
            return;
        }

        let callback = {
            let inputs = self.shared.inputs.lock().unwrap_or_else(PoisonError::into_inner);
            inputs[input.index()].clone()
        };
        let Some(callback) = callback else {
            return;
        };

        match AssertUnwindSafe(callback.call(input, value)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%input, value, error = %err, "input callback failed"),
            Err(_) => warn!(%input, value, "input callback panicked"),
        }
    }

    /// Reports an unexpected loss of the link that carried `session`.
    ///
    /// Only the current session, and only while connected, is torn down; the
    /// disconnect callback runs once. Stale reports are ignored.
    pub async fn link_lost(&self, session: u64) {
        {
            let mut current = self.session();
            if current.id != session || current.state != ConnectionState::Connected {
                debug!(session, current = current.id, "ignoring stale link loss");
                return;
            }
            current.state = ConnectionState::Disconnected;
        }

        let callback = self
            .shared
            .on_disconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(callback) = callback else {
            return;
        };

        match AssertUnwindSafe((callback.0)()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "disconnect callback failed"),
            Err(_) => warn!("disconnect callback panicked"),
        }
    }
}
