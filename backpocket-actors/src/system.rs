//! Task tracking and broadcast shutdown for the actors in one process.
//!
//! Actors spawned through [`ActorSystem::spawn`] subscribe to the shared
//! shutdown channel and are awaited by [`ActorSystem::graceful_shutdown`].
use crate::actor::{spawn_actor_with_shutdown, Actor, ActorHandle, Addr};
use anyhow::Result;
use std::time::Duration;
use tokio::{sync::broadcast, task::JoinSet};

#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn signal(&self) {
        let _ = self.tx.send(());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

pub struct ActorSystem {
    joinset: JoinSet<Result<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorSystem {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(8);
        Self {
            joinset: JoinSet::new(),
            shutdown_tx,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Spawn an actor wired to this system's shutdown signal.
    pub fn spawn<A: Actor>(&mut self, actor: A, capacity: usize) -> Addr<A> {
        let ActorHandle { addr, task } =
            spawn_actor_with_shutdown(actor, capacity, Some(self.shutdown_tx.subscribe()));
        self.joinset.spawn(async move { task.await? });
        addr
    }

    pub fn tracked(&self) -> usize {
        self.joinset.len()
    }

    /// Signal every actor and wait for them, giving up after `grace`.
    pub async fn graceful_shutdown(mut self, grace: Duration) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        let drain = async {
            while let Some(res) = self.joinset.join_next().await {
                res??;
            }
            Ok::<_, anyhow::Error>(())
        };
        let drained = tokio::time::timeout(grace, drain).await;
        match drained {
            Ok(res) => res,
            Err(_) => {
                tracing::warn!(grace_ms = grace.as_millis() as u64, "system.shutdown.timeout");
                self.joinset.abort_all();
                Ok(())
            }
        }
    }
}
