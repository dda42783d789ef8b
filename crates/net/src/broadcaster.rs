//! Keyed fan-out registry, one entry per message type, keyed by channel
//! `identifier` (spec §4.6). Unlike the `Distributor`, the broadcaster
//! never deserialises — it fans out an already-typed `Arc<M>` that some
//! channel already decoded, to every *other* (or the same — self-broadcast
//! is not suppressed, see S4) channel subscribed to that type.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::distributor::Message;
use crate::error::Code;
use crate::framing::MessageId;
use crate::subscriber::KeyedSubscriber;

type Note = (Code, Option<Arc<dyn Any + Send + Sync>>, u64);

struct Entry {
    subscriber: Arc<KeyedSubscriber<u64, Note>>,
}

pub struct Broadcaster {
    entries: Mutex<HashMap<MessageId, Entry>>,
    stopped: std::sync::Mutex<Option<Code>>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Broadcaster {
            entries: Mutex::new(HashMap::new()),
            stopped: std::sync::Mutex::new(None),
        }
    }

    async fn entry_for(&self, id: MessageId) -> Arc<KeyedSubscriber<u64, Note>> {
        let mut entries = self.entries.lock().await;
        entries
            .entry(id)
            .or_insert_with(|| Entry {
                subscriber: Arc::new(KeyedSubscriber::new()),
            })
            .subscriber
            .clone()
    }

    pub async fn subscribe<M, F, Fut>(&self, channel_id: u64, mut handler: F) -> Code
    where
        M: Message,
        F: FnMut(Code, Option<Arc<M>>, u64) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        if let Some(code) = *self.stopped.lock().unwrap() {
            return code;
        }
        let subscriber = self.entry_for(M::ID).await;
        subscriber
            .subscribe(channel_id, move |(code, any, sender): Note| {
                let typed: Option<Arc<M>> = any.and_then(|a| a.downcast::<M>().ok());
                handler(code, typed, sender)
            })
            .await
    }

    pub async fn notify<M: Message>(&self, msg: Arc<M>, sender: u64) -> Code {
        if let Some(code) = *self.stopped.lock().unwrap() {
            return code;
        }
        let subscriber = self.entry_for(M::ID).await;
        let any: Arc<dyn Any + Send + Sync> = msg;
        subscriber.notify((Code::Success, Some(any), sender)).await
    }

    /// Removes `channel_id` from `M`'s subscribers, notifying it once with
    /// `Desubscribed`.
    pub async fn unsubscribe<M: Message>(&self, channel_id: u64) {
        let subscriber = self.entry_for(M::ID).await;
        subscriber
            .unsubscribe(&channel_id, |c| (c, None, channel_id))
            .await;
    }

    pub async fn stop(&self, code: Code) {
        {
            let mut stopped = self.stopped.lock().unwrap();
            if stopped.is_some() {
                return;
            }
            *stopped = Some(code);
        }
        let subscribers: Vec<Arc<KeyedSubscriber<u64, Note>>> = {
            let entries = self.entries.lock().await;
            entries.values().map(|e| e.subscriber.clone()).collect()
        };
        for subscriber in subscribers {
            subscriber.stop(code, |c| (c, None, 0)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Block;
    impl Message for Block {
        const ID: MessageId = MessageId::Unknown;
        fn decode(_: &[u8], _: u32) -> Result<Self, Code> {
            Ok(Block)
        }
        fn encode(&self, _: u32) -> Result<Vec<u8>, Code> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn self_broadcast_is_not_suppressed() {
        let broadcaster = Broadcaster::new();
        let hits = Arc::new(std::sync::Mutex::new(Vec::new()));
        for id in [1u64, 2, 3] {
            let hits = hits.clone();
            broadcaster
                .subscribe::<Block, _, _>(id, move |code, _msg, sender| {
                    assert_eq!(code, Code::Success);
                    hits.lock().unwrap().push((id, sender));
                    async move { true }
                })
                .await;
        }
        broadcaster.notify(Arc::new(Block), 2).await;
        let hits = hits.lock().unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.contains(&(1, 2)));
        assert!(hits.contains(&(2, 2))); // channel 2 sees its own broadcast
        assert!(hits.contains(&(3, 2)));
    }
}
