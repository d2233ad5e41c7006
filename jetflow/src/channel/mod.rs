//! named bounded channels for the tick-driven data plane. senders and
//! receivers are polled with try-semantics from scheduler ticks, never
//! awaited.

use crate::core::element::Element;

pub type TrySendError<T> = crossbeam::channel::TrySendError<T>;
pub type TryRecvError = crossbeam::channel::TryRecvError;

pub type ElementSender = ChannelSender<Element>;
pub type ElementReceiver = ChannelReceiver<Element>;

#[derive(Clone, Debug)]
pub struct ChannelSender<T> {
    name: String,
    sender: crossbeam::channel::Sender<T>,
}

impl<T> ChannelSender<T> {
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.sender.try_send(value)
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}

#[derive(Clone, Debug)]
pub struct ChannelReceiver<T> {
    name: String,
    receiver: crossbeam::channel::Receiver<T>,
}

impl<T> ChannelReceiver<T> {
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}

pub fn named_channel<T>(name: &str, cap: usize) -> (ChannelSender<T>, ChannelReceiver<T>)
where
    T: Send,
{
    debug!("create channel named with {}, capacity: {}", name, cap);

    let (sender, receiver) = crossbeam::channel::bounded(cap);
    (
        ChannelSender {
            name: name.to_string(),
            sender,
        },
        ChannelReceiver {
            name: name.to_string(),
            receiver,
        },
    )
}
