use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use log::{error, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

const ACTOR_CHANNEL_SIZE: usize = 64;

/// A unit of state that processes messages sequentially.
/// All mutation happens inside [Actor::receive], so the actor state
/// never needs internal locking even though the rest of the system
/// runs concurrently.
#[tonic::async_trait]
pub trait Actor: Sized + Send + 'static {
    type Message: Send + 'static;
    type Options: Send + 'static;

    fn new(options: Self::Options) -> Self;
    async fn start(&mut self, ctx: &mut ActorContext<Self>);
    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: Self::Message) -> ActorAction;
    async fn stop(self, ctx: &mut ActorContext<Self>);
}

pub enum ActorAction {
    Continue,
    /// Log a warning and continue processing messages.
    Warn(String),
    /// Log an error and stop the actor.
    Fail(String),
    Stop,
}

impl ActorAction {
    pub fn warn(message: impl ToString) -> Self {
        Self::Warn(message.to_string())
    }

    pub fn fail(message: impl ToString) -> Self {
        Self::Fail(message.to_string())
    }
}

pub struct ActorHandle<T>
where
    T: Actor,
{
    sender: mpsc::Sender<T::Message>,
    stopped: watch::Receiver<bool>,
}

impl<T> Clone for ActorHandle<T>
where
    T: Actor,
{
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<T: Actor> ActorHandle<T> {
    pub async fn send(
        &self,
        message: T::Message,
    ) -> Result<(), mpsc::error::SendError<T::Message>> {
        self.sender.send(message).await
    }

    pub async fn wait_for_stop(mut self) {
        // We ignore the receiver error since the sender must have been dropped
        // in this case, which means the actor has stopped.
        let _ = self.stopped.wait_for(|x| *x).await;
    }
}

/// The execution context available to an actor while it processes a message.
/// Messages sent via the context are delivered to the actor itself, before
/// any message from external senders, so that an actor can drive its own
/// state machine with deterministic ordering.
pub struct ActorContext<T>
where
    T: Actor,
{
    handle: ActorHandle<T>,
    queue: VecDeque<T::Message>,
}

impl<T: Actor> ActorContext<T> {
    fn new(handle: &ActorHandle<T>) -> Self {
        Self {
            handle: handle.clone(),
            queue: VecDeque::new(),
        }
    }

    pub fn handle(&self) -> &ActorHandle<T> {
        &self.handle
    }

    /// Sends a message to the actor itself.
    pub fn send(&mut self, message: T::Message) {
        self.queue.push_back(message);
    }

    /// Sends a message to the actor itself after a delay.
    /// This is the building block for probes and periodic ticks.
    pub fn send_with_delay(&mut self, message: T::Message, delay: Duration) {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = handle.send(message).await;
        });
    }

    /// Spawns a fire-and-forget future. The future must communicate its
    /// outcome back to the actor (or another actor) via messages.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn next_queued(&mut self) -> Option<T::Message> {
        self.queue.pop_front()
    }
}

pub struct ActorSystem {
    tasks: JoinSet<()>,
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorSystem {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
        }
    }

    pub fn spawn<T: Actor>(&mut self, options: T::Options) -> ActorHandle<T> {
        let (tx, rx) = mpsc::channel(ACTOR_CHANNEL_SIZE);
        let (stopped_tx, stopped_rx) = watch::channel(false);
        let handle = ActorHandle {
            sender: tx,
            stopped: stopped_rx,
        };
        let actor = T::new(options);
        let out = handle.clone();
        self.tasks.spawn(async move {
            run_actor(actor, handle, rx).await;
            let _ = stopped_tx.send(true);
        });
        out
    }

    /// Waits for all actors spawned in this system to stop.
    pub async fn join(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }
}

async fn run_actor<T: Actor>(
    mut actor: T,
    handle: ActorHandle<T>,
    mut receiver: mpsc::Receiver<T::Message>,
) {
    let mut ctx = ActorContext::new(&handle);
    actor.start(&mut ctx).await;
    loop {
        let message = match ctx.next_queued() {
            Some(x) => x,
            None => match receiver.recv().await {
                Some(x) => x,
                None => break,
            },
        };
        match actor.receive(&mut ctx, message) {
            ActorAction::Continue => {}
            ActorAction::Warn(message) => {
                warn!("{message}");
            }
            ActorAction::Fail(message) => {
                error!("{message}");
                break;
            }
            ActorAction::Stop => break,
        }
    }
    receiver.close();
    actor.stop(&mut ctx).await;
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    struct CounterActor {
        count: usize,
    }

    enum CounterMessage {
        Add {
            value: usize,
        },
        AddTwice {
            value: usize,
        },
        Get {
            reply: oneshot::Sender<usize>,
        },
        Stop,
    }

    #[tonic::async_trait]
    impl Actor for CounterActor {
        type Message = CounterMessage;
        type Options = usize;

        fn new(options: Self::Options) -> Self {
            Self { count: options }
        }

        async fn start(&mut self, _ctx: &mut ActorContext<Self>) {}

        fn receive(
            &mut self,
            ctx: &mut ActorContext<Self>,
            message: Self::Message,
        ) -> ActorAction {
            match message {
                CounterMessage::Add { value } => {
                    self.count += value;
                    ActorAction::Continue
                }
                CounterMessage::AddTwice { value } => {
                    // Internal sends are processed before external messages.
                    ctx.send(CounterMessage::Add { value });
                    ctx.send(CounterMessage::Add { value });
                    ActorAction::Continue
                }
                CounterMessage::Get { reply } => {
                    let _ = reply.send(self.count);
                    ActorAction::Continue
                }
                CounterMessage::Stop => ActorAction::Stop,
            }
        }

        async fn stop(self, _ctx: &mut ActorContext<Self>) {}
    }

    #[tokio::test]
    async fn test_actor_send_and_reply() {
        let mut system = ActorSystem::new();
        let handle = system.spawn::<CounterActor>(1);
        assert!(handle.send(CounterMessage::Add { value: 2 }).await.is_ok());
        assert!(handle
            .send(CounterMessage::AddTwice { value: 3 })
            .await
            .is_ok());
        let (tx, rx) = oneshot::channel();
        assert!(handle.send(CounterMessage::Get { reply: tx }).await.is_ok());
        assert_eq!(rx.await, Ok(9));
    }

    #[tokio::test]
    async fn test_actor_stop() {
        let mut system = ActorSystem::new();
        let handle = system.spawn::<CounterActor>(0);
        assert!(handle.send(CounterMessage::Stop).await.is_ok());
        handle.clone().wait_for_stop().await;
        // Multiple handles can wait for the actor to stop.
        handle.wait_for_stop().await;
        system.join().await;
    }

    #[tokio::test]
    async fn test_actor_delayed_message() {
        struct TickActor {
            ticks: usize,
        }

        enum TickMessage {
            Start,
            Tick,
            Get { reply: oneshot::Sender<usize> },
        }

        #[tonic::async_trait]
        impl Actor for TickActor {
            type Message = TickMessage;
            type Options = ();

            fn new(_options: Self::Options) -> Self {
                Self { ticks: 0 }
            }

            async fn start(&mut self, _ctx: &mut ActorContext<Self>) {}

            fn receive(
                &mut self,
                ctx: &mut ActorContext<Self>,
                message: Self::Message,
            ) -> ActorAction {
                match message {
                    TickMessage::Start => {
                        ctx.send_with_delay(TickMessage::Tick, Duration::from_millis(10));
                        ActorAction::Continue
                    }
                    TickMessage::Tick => {
                        self.ticks += 1;
                        ActorAction::Continue
                    }
                    TickMessage::Get { reply } => {
                        let _ = reply.send(self.ticks);
                        ActorAction::Continue
                    }
                }
            }

            async fn stop(self, _ctx: &mut ActorContext<Self>) {}
        }

        let mut system = ActorSystem::new();
        let handle = system.spawn::<TickActor>(());
        assert!(handle.send(TickMessage::Start).await.is_ok());
        tokio::time::sleep(Duration::from_millis(100)).await;
        let (tx, rx) = oneshot::channel();
        assert!(handle.send(TickMessage::Get { reply: tx }).await.is_ok());
        assert_eq!(rx.await, Ok(1));
    }
}
