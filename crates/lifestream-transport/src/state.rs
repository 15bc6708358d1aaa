//! Lifecycle states shared by clients, servers and sessions.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};

/// Enums that can live inside an [`AtomicState`].
pub trait StateRepr: Copy + fmt::Debug {
    fn to_u8(self) -> u8;
    fn from_u8(value: u8) -> Self;
}

macro_rules! state_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl StateRepr for $name {
            fn to_u8(self) -> u8 {
                self as u8
            }

            fn from_u8(value: u8) -> Self {
                match value {
                    $($value => $name::$variant,)+
                    other => unreachable!(concat!("invalid ", stringify!($name), " {}"), other),
                }
            }
        }
    };
}

state_enum! {
    /// Client connection state. Connected ⇄ Disconnected may repeat.
    ConnectionState {
        Disconnected = 0,
        Connecting = 1,
        Connected = 2,
        Closing = 3,
    }
}

state_enum! {
    /// Server lifecycle.
    ServerState {
        Stopped = 0,
        Starting = 1,
        Running = 2,
        Stopping = 3,
    }
}

state_enum! {
    /// Session lifecycle. One-directional; a closed session is discarded.
    SessionState {
        Accepting = 0,
        Open = 1,
        Closing = 2,
        Closed = 3,
    }
}

/// Lock-free cell holding one of the state enums.
pub struct AtomicState<S> {
    inner: AtomicU8,
    _marker: PhantomData<S>,
}

impl<S: StateRepr> AtomicState<S> {
    pub fn new(initial: S) -> Self {
        Self {
            inner: AtomicU8::new(initial.to_u8()),
            _marker: PhantomData,
        }
    }

    pub fn load(&self) -> S {
        S::from_u8(self.inner.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: S) {
        self.inner.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Move `from -> to` atomically. Returns false if the current state was
    /// not `from`.
    pub fn transition(&self, from: S, to: S) -> bool {
        self.inner
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Set `state` and return the previous one.
    pub fn swap(&self, state: S) -> S {
        S::from_u8(self.inner.swap(state.to_u8(), Ordering::SeqCst))
    }
}

impl<S: StateRepr> fmt::Debug for AtomicState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicState").field(&self.load()).finish()
    }
}
