//! Per-channel, per-message-type subscription fan-out (spec §4.5). One
//! `Distributor` belongs to exactly one `Channel`; `Proxy`'s frame handler
//! calls `notify` with the raw payload bytes for each successfully framed
//! message, and the distributor deserialises and dispatches to whichever
//! protocol subscribed to that `MessageId` — skipping deserialisation
//! entirely when nobody is listening (P1, and the "important optimisation"
//! called out in spec §4.5).

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Code;
use crate::framing::MessageId;
use crate::subscriber::Subscriber;

/// A typed message that can be framed on the wire. Decoding/encoding is
/// parameterised by the negotiated protocol version, since field presence
/// for several message types (e.g. the BIP37 relay byte) depends on it.
pub trait Message: Send + Sync + Sized + 'static {
    const ID: MessageId;

    fn decode(bytes: &[u8], version: u32) -> Result<Self, Code>;
    fn encode(&self, version: u32) -> Result<Vec<u8>, Code>;
}

type Note = (Code, Option<Arc<dyn Any + Send + Sync>>);
type Decoder = Arc<dyn Fn(&[u8], u32) -> Result<Arc<dyn Any + Send + Sync>, Code> + Send + Sync>;

struct Entry {
    subscriber: Arc<Subscriber<Note>>,
    decode: Decoder,
}

pub struct Distributor {
    entries: Mutex<HashMap<MessageId, Entry>>,
    stopped: std::sync::Mutex<Option<Code>>,
}

impl Default for Distributor {
    fn default() -> Self {
        Self::new()
    }
}

impl Distributor {
    pub fn new() -> Self {
        Distributor {
            entries: Mutex::new(HashMap::new()),
            stopped: std::sync::Mutex::new(None),
        }
    }

    pub async fn subscribe<M, F, Fut>(&self, mut handler: F) -> Code
    where
        M: Message,
        F: FnMut(Code, Option<Arc<M>>) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        if let Some(code) = *self.stopped.lock().unwrap() {
            let _ = code;
            return Code::SubscriberStopped;
        }
        let subscriber = {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(M::ID).or_insert_with(|| Entry {
                subscriber: Arc::new(Subscriber::new()),
                decode: Arc::new(|bytes, version| {
                    M::decode(bytes, version).map(|m| Arc::new(m) as Arc<dyn Any + Send + Sync>)
                }),
            });
            entry.subscriber.clone()
        };
        subscriber
            .subscribe(move |(code, any): Note| {
                let typed: Option<Arc<M>> = any.and_then(|a| a.downcast::<M>().ok());
                handler(code, typed)
            })
            .await
    }

    /// Deserialises `bytes` into whatever message type is subscribed to
    /// `id` and notifies it. Returns `Success` immediately, without
    /// touching `bytes`, if nobody subscribed to `id`.
    pub async fn notify(&self, id: MessageId, version: u32, bytes: &[u8]) -> Code {
        if let Some(code) = *self.stopped.lock().unwrap() {
            return code;
        }
        let entry = {
            let entries = self.entries.lock().await;
            entries
                .get(&id)
                .map(|e| (e.subscriber.clone(), e.decode.clone()))
        };
        let Some((subscriber, decode)) = entry else {
            return Code::Success;
        };
        if !subscriber.has_subscribers().await {
            return Code::Success;
        }
        match decode(bytes, version) {
            Ok(message) => subscriber.notify((Code::Success, Some(message))).await,
            Err(_) => Code::InvalidMessage,
        }
    }

    /// Notifies every subscriber, of every message type, exactly once with
    /// `(code, None)`, then refuses further subscription (P3).
    pub async fn stop(&self, code: Code) {
        {
            let mut stopped = self.stopped.lock().unwrap();
            if stopped.is_some() {
                return;
            }
            *stopped = Some(code);
        }
        let entries: Vec<Arc<Subscriber<Note>>> = {
            let entries = self.entries.lock().await;
            entries.values().map(|e| e.subscriber.clone()).collect()
        };
        for subscriber in entries {
            subscriber.stop(code, |c| (c, None)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Ping {
        nonce: u64,
    }

    impl Message for Ping {
        const ID: MessageId = MessageId::Ping;

        fn decode(bytes: &[u8], _version: u32) -> Result<Self, Code> {
            if bytes.len() != 8 {
                return Err(Code::InvalidMessage);
            }
            Ok(Ping {
                nonce: u64::from_le_bytes(bytes.try_into().unwrap()),
            })
        }

        fn encode(&self, _version: u32) -> Result<Vec<u8>, Code> {
            Ok(self.nonce.to_le_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn skips_decode_with_no_subscribers() {
        let distributor = Distributor::new();
        // Malformed bytes for Ping, but nobody is subscribed: must be Success.
        let code = distributor.notify(MessageId::Ping, 0, &[1, 2, 3]).await;
        assert_eq!(code, Code::Success);
    }

    #[tokio::test]
    async fn dispatches_to_subscriber_exactly_once() {
        let distributor = Distributor::new();
        let count = Arc::new(AtomicU32::new(0));
        let seen_nonce = Arc::new(std::sync::Mutex::new(0u64));
        let count2 = count.clone();
        let seen2 = seen_nonce.clone();
        distributor
            .subscribe::<Ping, _, _>(move |code, msg| {
                count2.fetch_add(1, Ordering::SeqCst);
                if let Some(msg) = msg {
                    *seen2.lock().unwrap() = msg.nonce;
                }
                assert_eq!(code, Code::Success);
                async move { true }
            })
            .await;
        let bytes = 42u64.to_le_bytes();
        let code = distributor.notify(MessageId::Ping, 0, &bytes).await;
        assert_eq!(code, Code::Success);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*seen_nonce.lock().unwrap(), 42);
    }

    #[tokio::test]
    async fn bad_bytes_yield_invalid_message() {
        let distributor = Distributor::new();
        distributor
            .subscribe::<Ping, _, _>(|_, _| async { true })
            .await;
        let code = distributor.notify(MessageId::Ping, 0, &[1, 2, 3]).await;
        assert_eq!(code, Code::InvalidMessage);
    }
}
