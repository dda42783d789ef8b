//! Minimal diagnostic `reject` protocol (supplemented from
//! `libbitcoin-network`'s `protocol_reject`, gated by
//! `Settings::enable_reject`). The core never sends `reject` itself; it
//! only logs an incoming one and keeps the handler subscribed, since a
//! peer sending `reject` is informational, not a protocol violation.

use std::sync::Arc;

use tracing::warn;

use crate::channel::Channel;
use crate::error::Code;
use crate::protocol::{Protocol, RejectMessage};

pub struct ProtocolReject {
    channel: Arc<Channel>,
}

impl ProtocolReject {
    pub fn new(channel: Arc<Channel>) -> Arc<Self> {
        Arc::new(ProtocolReject { channel })
    }
}

#[async_trait::async_trait]
impl Protocol for ProtocolReject {
    async fn start(self: Arc<Self>) {
        let identifier = self.channel.identifier();
        self.channel
            .subscribe::<RejectMessage, _, _>(move |code, msg| async move {
                if code.is_success()
                    && let Some(reject) = msg
                {
                    warn!(
                        channel = identifier,
                        command = %reject.rejected_command,
                        code = reject.code,
                        reason = %reject.reason,
                        "peer sent reject"
                    );
                }
                true
            })
            .await;
    }

    async fn stopping(self: Arc<Self>, _code: Code) {}
}
