//! One-shot address exchange for seed sessions (spec §4.10 "ProtocolSeed").
//! Seed channels are `quiet`: they still receive inbound `address` messages
//! but never advertise themselves unless `advertise_self` is set. Completes
//! (stopping the channel with `Success`) once both a `get_address` has been
//! sent and an `address` has been received, or on `channel_germination`
//! timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::address::{AddressItem, Hosts};
use crate::channel::Channel;
use crate::deadline::Deadline;
use crate::error::Code;
use crate::protocol::{AddressMessage, GetAddressMessage, Protocol};

pub struct ProtocolSeed {
    channel: Arc<Channel>,
    pool: Arc<Hosts>,
    advertise_self: Option<AddressItem>,
    sent_get_address: AtomicBool,
    received_address: AtomicBool,
    germination: Deadline,
}

impl ProtocolSeed {
    pub fn new(
        channel: Arc<Channel>,
        pool: Arc<Hosts>,
        advertise_self: Option<AddressItem>,
        germination_timeout: Duration,
    ) -> Arc<Self> {
        channel.set_quiet(advertise_self.is_none());
        let germination = Deadline::new(channel.strand().clone(), germination_timeout);
        Arc::new(ProtocolSeed {
            channel,
            pool,
            advertise_self,
            sent_get_address: AtomicBool::new(false),
            received_address: AtomicBool::new(false),
            germination,
        })
    }

    fn maybe_complete(self: &Arc<Self>) {
        if self.sent_get_address.load(Ordering::SeqCst) && self.received_address.load(Ordering::SeqCst) {
            self.germination.stop();
            let this = self.clone();
            tokio::spawn(async move { this.channel.stop(Code::Success).await });
        }
    }
}

#[async_trait::async_trait]
impl Protocol for ProtocolSeed {
    async fn start(self: Arc<Self>) {
        let this = self.clone();
        self.germination.start(move |code| {
            if code == Code::Success {
                let this = this.clone();
                tokio::spawn(async move {
                    this.channel.stop(Code::SeedingUnsuccessful).await;
                });
            }
        });

        let this = self.clone();
        self.channel
            .subscribe::<AddressMessage, _, _>(move |code, msg| {
                let this = this.clone();
                async move {
                    if code.is_success()
                        && let Some(addr) = msg
                    {
                        this.pool.save(&addr.items).await;
                        this.received_address.store(true, Ordering::SeqCst);
                        this.maybe_complete();
                    }
                    false
                }
            })
            .await;

        if !self.channel.quiet()
            && let Some(self_item) = self.advertise_self
        {
            let advertisement = AddressMessage {
                items: vec![self_item],
            };
            self.channel.send(&advertisement, |_| {}).await;
        }

        let this = self.clone();
        self.channel
            .send(&GetAddressMessage, move |code| {
                if code.is_success() {
                    this.sent_get_address.store(true, Ordering::SeqCst);
                    this.maybe_complete();
                }
            })
            .await;
    }

    async fn stopping(self: Arc<Self>, _code: Code) {
        self.germination.stop();
    }
}
