use anyhow::Result;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

/// Minimal actor trait. `Self: Sized` avoids object-safety issues when using `Context<Self>`.
#[async_trait::async_trait]
pub trait Actor: Send + Sized + 'static {
    type Msg: Send + 'static;

    /// Handle a single message. Return `Err` to stop the actor.
    async fn handle(&mut self, msg: Self::Msg, ctx: &mut Context<Self>) -> Result<()>;
}

/// Runtime context for an actor instance.
pub struct Context<A: Actor> {
    addr: Addr<A>,
    stop: bool,
}

impl<A: Actor> Context<A> {
    /// Address of the running actor, for messages it sends to itself from
    /// spawned tasks.
    pub fn addr(&self) -> Addr<A> {
        self.addr.clone()
    }

    /// Stop after the current message.
    pub fn stop(&mut self) {
        self.stop = true;
    }
}

/// Address for sending messages to an actor.
pub struct Addr<A: Actor>(mpsc::Sender<A::Msg>);

/// Manual Clone to avoid unnecessary bounds on `A`/`A::Msg`.
impl<A: Actor> Clone for Addr<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<A: Actor> Addr<A> {
    /// Async send; awaits backpressure. Returns the message if the actor is gone.
    pub async fn send(&self, msg: A::Msg) -> std::result::Result<(), A::Msg> {
        self.0.send(msg).await.map_err(|e| e.0)
    }

    /// Send without waiting. Returns the message if the mailbox is full or closed.
    pub fn try_send(&self, msg: A::Msg) -> std::result::Result<(), A::Msg> {
        self.0.try_send(msg).map_err(|e| e.into_inner())
    }

    /// True once the actor task has exited.
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.0.max_capacity()
    }
}

/// Handle to a running actor task.
pub struct ActorHandle<A: Actor> {
    pub addr: Addr<A>,
    pub task: JoinHandle<Result<()>>,
}

/// Spawn an actor with a bounded mailbox.
///
/// The task ends when `handle` returns `Err`, when every `Addr` is dropped,
/// or after `ctx.stop()`.
///
/// ```
/// # use anyhow::Result;
/// # use async_trait::async_trait;
/// # use backpocket_actors::actor::{self, Actor, Context};
/// struct Tally(u32);
///
/// #[async_trait]
/// impl Actor for Tally {
///     type Msg = u32;
///     async fn handle(&mut self, msg: u32, ctx: &mut Context<Self>) -> Result<()> {
///         self.0 += msg;
///         if self.0 >= 5 {
///             ctx.stop();
///         }
///         Ok(())
///     }
/// }
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// rt.block_on(async {
///     let actor::ActorHandle { addr, task } = actor::spawn_actor(Tally(0), 8);
///     addr.send(2).await.unwrap();
///     addr.send(3).await.unwrap();
///     task.await.unwrap().unwrap();
///     assert!(addr.is_closed());
/// });
/// ```
pub fn spawn_actor<A: Actor>(actor: A, capacity: usize) -> ActorHandle<A> {
    spawn_actor_with_shutdown(actor, capacity, None)
}

/// Like [`spawn_actor`], but also stops when `shutdown` fires.
pub fn spawn_actor_with_shutdown<A: Actor>(
    actor: A,
    capacity: usize,
    shutdown: Option<broadcast::Receiver<()>>,
) -> ActorHandle<A> {
    let (tx, rx) = mpsc::channel::<A::Msg>(capacity.max(1));
    let addr = Addr(tx);
    let ctx = Context {
        addr: addr.clone(),
        stop: false,
    };
    let task = tokio::spawn(run_loop(actor, ctx, rx, shutdown));
    ActorHandle { addr, task }
}

async fn run_loop<A: Actor>(
    mut actor: A,
    mut ctx: Context<A>,
    mut rx: mpsc::Receiver<A::Msg>,
    mut shutdown: Option<broadcast::Receiver<()>>,
) -> Result<()> {
    loop {
        let next = match shutdown.as_mut() {
            Some(shutdown_rx) => tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::debug!(target: "backpocket-actors", "actor.shutdown");
                    None
                }
                msg = rx.recv() => msg,
            },
            None => rx.recv().await,
        };
        let Some(msg) = next else { break };
        if let Err(e) = actor.handle(msg, &mut ctx).await {
            tracing::error!(target: "backpocket-actors", error = ?e, "actor.handle.failed");
            return Err(e);
        }
        if ctx.stop {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::oneshot;

    enum Msg {
        Add(u32),
        Get(oneshot::Sender<u32>),
        Fail,
    }

    struct Sum(u32);

    #[async_trait]
    impl Actor for Sum {
        type Msg = Msg;
        async fn handle(&mut self, msg: Msg, _ctx: &mut Context<Self>) -> Result<()> {
            match msg {
                Msg::Add(n) => self.0 += n,
                Msg::Get(reply) => {
                    let _ = reply.send(self.0);
                }
                Msg::Fail => anyhow::bail!("asked to fail"),
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn processes_in_order_and_stops_on_drop() {
        let ActorHandle { addr, task } = spawn_actor(Sum(0), 4);
        addr.send(Msg::Add(2)).await.ok();
        addr.send(Msg::Add(3)).await.ok();
        let (tx, rx) = oneshot::channel();
        addr.send(Msg::Get(tx)).await.ok();
        assert_eq!(rx.await.unwrap(), 5);
        drop(addr);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn handler_error_stops_actor() {
        let ActorHandle { addr, task } = spawn_actor(Sum(0), 4);
        addr.send(Msg::Fail).await.ok();
        assert!(task.await.unwrap().is_err());
        assert!(addr.send(Msg::Add(1)).await.is_err());
    }

    #[tokio::test]
    async fn broadcast_shutdown_stops_actor() {
        let (tx, rx) = broadcast::channel(1);
        let ActorHandle { addr, task } = spawn_actor_with_shutdown(Sum(0), 4, Some(rx));
        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(addr.is_closed());
    }
}
