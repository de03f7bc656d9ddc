//! Per-Client Session
//!
//! A [`Session`] wraps a [`CommandHandler`] with the state one client
//! carries between commands:
//!
//! - an open transaction: after `MULTI` every command except `EXEC`,
//!   `DISCARD`, `MULTI` and `QUIT` is queued and answered with `+QUEUED`.
//!   `EXEC` runs the queue back to back and replies with an array of the
//!   results. A queued command the server does not know aborts the
//!   transaction at `EXEC`.
//! - channel subscriptions: `SUBSCRIBE` registers the session's message
//!   queue with [`PubSub`]; the connection loop drains it with
//!   [`Session::next_message`].
//!
//! `SAVE` is also routed through here so the snapshot write runs on a
//! blocking thread instead of the connection's task.

use super::handler::{is_known_command, wrong_arity, CommandHandler};
use crate::protocol::RespValue;
use crate::pubsub::{MessageReceiver, MessageSender, PubSub};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

#[derive(Debug, Default)]
struct Transaction {
    queued: Vec<Vec<Bytes>>,
    /// Set when a command could not be queued
    aborted: bool,
}

/// Command state for one client connection.
pub struct Session {
    handler: CommandHandler,
    pubsub: Arc<PubSub>,
    /// Subscriber id in `pubsub`
    id: u64,
    transaction: Option<Transaction>,
    outbox: MessageSender,
    inbox: MessageReceiver,
}

impl Session {
    pub fn new(handler: CommandHandler, pubsub: Arc<PubSub>) -> Self {
        let (outbox, inbox) = mpsc::unbounded_channel();
        let id = pubsub.register();

        Self {
            handler,
            pubsub,
            id,
            transaction: None,
            outbox,
            inbox,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Waits for the next published message. Never resolves while the
    /// session has no subscriptions.
    pub async fn next_message(&mut self) -> Option<RespValue> {
        self.inbox.recv().await
    }

    /// Executes one command and appends its replies to `replies`.
    ///
    /// Most commands produce exactly one reply; `SUBSCRIBE` and
    /// `UNSUBSCRIBE` produce one per channel.
    pub async fn execute(&mut self, args: &[Bytes], replies: &mut Vec<RespValue>) {
        let cmd = command_name(args);

        match cmd.as_str() {
            "MULTI" => replies.push(self.multi(&args[1..])),
            "EXEC" => replies.push(self.exec(&args[1..]).await),
            "DISCARD" => replies.push(self.discard(&args[1..])),
            _ => {
                if let Some(txn) = self.transaction.as_mut() {
                    if cmd != "QUIT" {
                        replies.push(txn.queue(&cmd, args));
                        return;
                    }
                }
                self.run(&cmd, args, replies).await;
            }
        }
    }

    /// Executes a command outside the transaction machinery.
    async fn run(&mut self, cmd: &str, args: &[Bytes], replies: &mut Vec<RespValue>) {
        match cmd {
            "PUBLISH" => replies.push(self.publish(&args[1..])),
            "SUBSCRIBE" => self.subscribe(&args[1..], replies),
            "UNSUBSCRIBE" => self.unsubscribe(&args[1..], replies),
            "SAVE" => replies.push(self.save(args).await),
            _ => replies.push(self.handler.execute(args)),
        }
    }

    /// MULTI
    fn multi(&mut self, args: &[Bytes]) -> RespValue {
        if !args.is_empty() {
            return wrong_arity("multi");
        }
        if self.transaction.is_some() {
            return RespValue::error("ERR MULTI calls can not be nested");
        }
        self.transaction = Some(Transaction::default());
        RespValue::ok()
    }

    /// EXEC
    async fn exec(&mut self, args: &[Bytes]) -> RespValue {
        if !args.is_empty() {
            return wrong_arity("exec");
        }
        let Some(txn) = self.transaction.take() else {
            return RespValue::error("ERR EXEC without MULTI");
        };
        if txn.aborted {
            return RespValue::error(
                "EXECABORT Transaction discarded because of previous errors.",
            );
        }

        debug!(commands = txn.queued.len(), "Executing transaction");
        let mut results = Vec::with_capacity(txn.queued.len());
        for queued in &txn.queued {
            let cmd = command_name(queued);
            self.run(&cmd, queued, &mut results).await;
        }
        RespValue::array(results)
    }

    /// DISCARD
    fn discard(&mut self, args: &[Bytes]) -> RespValue {
        if !args.is_empty() {
            return wrong_arity("discard");
        }
        match self.transaction.take() {
            Some(_) => RespValue::ok(),
            None => RespValue::error("ERR DISCARD without MULTI"),
        }
    }

    /// PUBLISH channel message
    fn publish(&self, args: &[Bytes]) -> RespValue {
        match args {
            [channel, message] => {
                RespValue::count(self.pubsub.publish(channel, message.clone()))
            }
            _ => wrong_arity("publish"),
        }
    }

    /// SUBSCRIBE channel [channel ...]
    fn subscribe(&self, channels: &[Bytes], replies: &mut Vec<RespValue>) {
        if channels.is_empty() {
            replies.push(wrong_arity("subscribe"));
            return;
        }
        for channel in channels {
            let count = self.pubsub.subscribe(self.id, channel.clone(), &self.outbox);
            replies.push(confirmation("subscribe", Some(channel.clone()), count));
        }
    }

    /// UNSUBSCRIBE [channel ...]
    ///
    /// Without arguments, leaves every channel.
    fn unsubscribe(&self, channels: &[Bytes], replies: &mut Vec<RespValue>) {
        let channels = if channels.is_empty() {
            self.pubsub.channels_of(self.id)
        } else {
            channels.to_vec()
        };

        if channels.is_empty() {
            replies.push(confirmation("unsubscribe", None, 0));
            return;
        }
        for channel in channels {
            let count = self.pubsub.unsubscribe(self.id, &channel);
            replies.push(confirmation("unsubscribe", Some(channel), count));
        }
    }

    /// SAVE, on a blocking thread.
    async fn save(&self, args: &[Bytes]) -> RespValue {
        let handler = self.handler.clone();
        let args = args.to_vec();

        match tokio::task::spawn_blocking(move || handler.execute(&args)).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "SAVE task failed");
                RespValue::error("ERR snapshot failed, see server log")
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.pubsub.unsubscribe_all(self.id);
    }
}

impl Transaction {
    fn queue(&mut self, cmd: &str, args: &[Bytes]) -> RespValue {
        if !is_known_command(cmd) {
            self.aborted = true;
            return RespValue::error(format!(
                "ERR unknown command '{}'",
                cmd.to_ascii_lowercase()
            ));
        }
        self.queued.push(args.to_vec());
        RespValue::simple_string("QUEUED")
    }
}

fn command_name(args: &[Bytes]) -> String {
    args.first()
        .map(|name| String::from_utf8_lossy(name).to_ascii_uppercase())
        .unwrap_or_default()
}

/// `[kind, channel, count]` reply to SUBSCRIBE/UNSUBSCRIBE.
fn confirmation(kind: &'static str, channel: Option<Bytes>, count: usize) -> RespValue {
    RespValue::array(vec![
        RespValue::bulk_string(Bytes::from_static(kind.as_bytes())),
        RespValue::optional(channel),
        RespValue::count(count),
    ])
}
