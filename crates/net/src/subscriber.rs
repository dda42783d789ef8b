//! Subscription registries (spec §3 "Subscriber / Desubscriber"). A plain
//! `Subscriber<N>` fans a notification of type `N` out to every registered
//! handler, dropping handlers that return `false` to unsubscribe. A
//! `KeyedSubscriber<K, N>` additionally indexes handlers by a key, refuses
//! duplicate keys, and supports notifying a single key.
//!
//! Handlers are `FnMut(N) -> impl Future<Output = bool>`, since running a
//! handler usually means sending on a channel or touching a strand-owned
//! struct — operations that are naturally `async` in this implementation
//! rather than the synchronous bound member function the source uses.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;

use tokio::sync::Mutex;

use crate::error::Code;

type BoxFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
type AsyncHandler<N> = Box<dyn FnMut(N) -> BoxFuture<'static> + Send>;

enum State<N> {
    Open(Vec<AsyncHandler<N>>),
    Stopped(Code),
}

pub struct Subscriber<N> {
    state: Mutex<State<N>>,
}

impl<N> Default for Subscriber<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> Subscriber<N>
where
    N: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Subscriber {
            state: Mutex::new(State::Open(Vec::new())),
        }
    }

    /// Registers `handler`. Returns `Code::Success`, or `SubscriberStopped`
    /// if `stop` has already been called.
    pub async fn subscribe<F, Fut>(&self, mut handler: F) -> Code
    where
        F: FnMut(N) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let boxed: AsyncHandler<N> = Box::new(move |n| Box::pin(handler(n)));
        let mut guard = self.state.lock().await;
        match &mut *guard {
            State::Open(handlers) => {
                handlers.push(boxed);
                Code::Success
            }
            State::Stopped(code) => *code,
        }
    }

    /// Invokes every subscribed handler with `note`, keeping only those
    /// that returned `true`. A no-op (returns `Success`) if there are no
    /// handlers and the fast-path callers rely on that (Distributor skips
    /// deserialisation entirely when this would be a no-op — see
    /// `has_subscribers`).
    pub async fn notify(&self, note: N) -> Code {
        let mut guard = self.state.lock().await;
        match &mut *guard {
            State::Open(handlers) => {
                let drained = std::mem::take(handlers);
                let mut keep = Vec::with_capacity(drained.len());
                for mut handler in drained {
                    if handler(note.clone()).await {
                        keep.push(handler);
                    }
                }
                *handlers = keep;
                Code::Success
            }
            State::Stopped(code) => *code,
        }
    }

    pub async fn has_subscribers(&self) -> bool {
        matches!(&*self.state.lock().await, State::Open(h) if !h.is_empty())
    }

    /// Terminal: notifies every handler once via `to_note(code)` and
    /// refuses further subscription. Idempotent — the first call's code is
    /// the one every handler (including latecomers who call `subscribe`
    /// after) observes.
    pub async fn stop(&self, code: Code, to_note: impl Fn(Code) -> N) -> Code {
        let mut guard = self.state.lock().await;
        let handlers = match std::mem::replace(&mut *guard, State::Stopped(code)) {
            State::Open(handlers) => handlers,
            State::Stopped(recorded) => {
                *guard = State::Stopped(recorded);
                return recorded;
            }
        };
        drop(guard);
        for mut handler in handlers {
            let _ = handler(to_note(code)).await;
        }
        code
    }
}

enum KeyedState<K, N> {
    Open(HashMap<K, AsyncHandler<N>>),
    Stopped(Code),
}

pub struct KeyedSubscriber<K, N> {
    state: Mutex<KeyedState<K, N>>,
}

impl<K, N> Default for KeyedSubscriber<K, N>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, N> KeyedSubscriber<K, N>
where
    K: Eq + Hash + Clone + Send + 'static,
    N: Clone + Send + 'static,
{
    pub fn new() -> Self {
        KeyedSubscriber {
            state: Mutex::new(KeyedState::Open(HashMap::new())),
        }
    }

    /// Registers `handler` under `key`. Returns `SubscriberExists` if the
    /// key is already taken, `SubscriberStopped` if the registry is
    /// stopped, else `Success`.
    pub async fn subscribe<F, Fut>(&self, key: K, mut handler: F) -> Code
    where
        F: FnMut(N) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut guard = self.state.lock().await;
        match &mut *guard {
            KeyedState::Open(handlers) => {
                if handlers.contains_key(&key) {
                    return Code::SubscriberExists;
                }
                let boxed: AsyncHandler<N> = Box::new(move |n| Box::pin(handler(n)));
                handlers.insert(key, boxed);
                Code::Success
            }
            KeyedState::Stopped(code) => *code,
        }
    }

    pub async fn notify(&self, note: N) -> Code {
        let mut guard = self.state.lock().await;
        match &mut *guard {
            KeyedState::Open(handlers) => {
                let drained: Vec<(K, AsyncHandler<N>)> = handlers.drain().collect();
                let mut keep = HashMap::with_capacity(drained.len());
                for (key, mut handler) in drained {
                    if handler(note.clone()).await {
                        keep.insert(key, handler);
                    }
                }
                *handlers = keep;
                Code::Success
            }
            KeyedState::Stopped(code) => *code,
        }
    }

    pub async fn notify_one(&self, key: &K, note: N) -> Code {
        let mut guard = self.state.lock().await;
        match &mut *guard {
            KeyedState::Open(handlers) => {
                if let Some(handler) = handlers.get_mut(key) {
                    let keep = handler(note).await;
                    if !keep {
                        handlers.remove(key);
                    }
                    Code::Success
                } else {
                    Code::AddressNotFound
                }
            }
            KeyedState::Stopped(code) => *code,
        }
    }

    /// Removes `key`, notifying only that subscriber with `Desubscribed`
    /// (via `to_note`), then removing it regardless of its return value.
    pub async fn unsubscribe(&self, key: &K, to_note: impl Fn(Code) -> N) {
        let mut guard = self.state.lock().await;
        if let KeyedState::Open(handlers) = &mut *guard
            && let Some(mut handler) = handlers.remove(key)
        {
            let _ = handler(to_note(Code::Desubscribed)).await;
        }
    }

    pub async fn stop(&self, code: Code, to_note: impl Fn(Code) -> N) -> Code {
        let mut guard = self.state.lock().await;
        let handlers = match std::mem::replace(&mut *guard, KeyedState::Stopped(code)) {
            KeyedState::Open(handlers) => handlers,
            KeyedState::Stopped(recorded) => {
                *guard = KeyedState::Stopped(recorded);
                return recorded;
            }
        };
        drop(guard);
        for (_, mut handler) in handlers {
            let _ = handler(to_note(code)).await;
        }
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn stop_is_idempotent_and_first_code_wins() {
        let sub: Subscriber<Code> = Subscriber::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        sub.subscribe(move |code| {
            let seen = seen2.clone();
            async move {
                assert_eq!(code, Code::ChannelStopped);
                seen.fetch_add(1, Ordering::SeqCst);
                false
            }
        })
        .await;
        let first = sub.stop(Code::ChannelStopped, |c| c).await;
        let second = sub.stop(Code::ChannelExpired, |c| c).await;
        assert_eq!(first, Code::ChannelStopped);
        assert_eq!(second, Code::ChannelStopped);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(sub.subscribe(|_| async { true }).await, Code::ChannelStopped);
    }

    #[tokio::test]
    async fn keyed_subscriber_rejects_duplicate_keys() {
        let sub: KeyedSubscriber<u64, Code> = KeyedSubscriber::new();
        assert_eq!(sub.subscribe(1, |_| async { true }).await, Code::Success);
        assert_eq!(
            sub.subscribe(1, |_| async { true }).await,
            Code::SubscriberExists
        );
    }
}
