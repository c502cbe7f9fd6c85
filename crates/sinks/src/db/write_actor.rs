use super::DbPool;
use crate::errors::StorageError;
use diesel::SqliteConnection;
use log::{debug, error};
use std::any::Any;
use tokio::sync::{mpsc, oneshot};

type Job<T> = Box<dyn FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static>;
type Reply = oneshot::Sender<Result<Box<dyn Any + Send + 'static>, StorageError>>;

/// Handle for sending jobs to the writer actor.
#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::Sender<(Job<Box<dyn Any + Send + 'static>>, Reply)>,
}

impl WriteHandle {
    /// Runs `job` on the actor's dedicated connection inside an immediate
    /// transaction. Jobs from all handles execute one at a time, in send order.
    pub async fn exec<F, T>(&self, job: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static + Any,
    {
        let (ret_tx, ret_rx) = oneshot::channel();

        self.tx
            .send((
                Box::new(move |c| job(c).map(|v| Box::new(v) as Box<dyn Any + Send>)),
                ret_tx,
            ))
            .await
            .map_err(|_| StorageError::WriterStopped)?;

        let boxed = ret_rx.await.map_err(|_| StorageError::WriterStopped)??;
        boxed
            .downcast::<T>()
            .map(|v| *v)
            .map_err(|_| StorageError::Internal("writer actor returned an unexpected type".into()))
    }
}

/// Spawns the single writer for `pool`.
///
/// The actor holds one pooled connection for its whole life and stops when
/// every [`WriteHandle`] is dropped. If no connection can be acquired it stops
/// immediately and every `exec` fails with [`StorageError::WriterStopped`].
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (tx, mut rx) = mpsc::channel::<(Job<Box<dyn Any + Send + 'static>>, Reply)>(1024);

    tokio::spawn(async move {
        let mut conn = match pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                error!("Writer actor could not acquire a connection: {}", e);
                return;
            }
        };

        while let Some((job, reply_tx)) = rx.recv().await {
            let result = conn.immediate_transaction::<_, StorageError, _>(|c| job(c));
            // the caller may have timed out
            let _ = reply_tx.send(result);
        }
        debug!("Writer actor stopped");
    });

    WriteHandle { tx }
}
