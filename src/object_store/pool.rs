use std::{ops::Deref, time::Duration};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

use super::{ObjectClient, ObjectStoreError};

/// A fixed set of object store connections, handed out one thread at a time.
///
/// The free list is a bounded channel holding every idle connection.
pub struct ConnectionPool {
    sender: Sender<Box<dyn ObjectClient>>,
    receiver: Receiver<Box<dyn ObjectClient>>,
    size: usize,
}

impl ConnectionPool {
    pub fn new(clients: Vec<Box<dyn ObjectClient>>) -> Result<Self, ObjectStoreError> {
        if clients.is_empty() {
            return Err(ObjectStoreError::Runtime(
                "connection pool needs at least one connection".to_owned(),
            ));
        }
        let size = clients.len();
        let (sender, receiver) = bounded(size);
        for c in clients {
            sender
                .send(c)
                .map_err(|_| ObjectStoreError::Runtime("connection pool closed".to_owned()))?;
        }
        debug!("Created connection pool with {size} connections");
        Ok(Self {
            sender,
            receiver,
            size,
        })
    }

    /// Build `size` connections with the given constructor.
    pub fn from_fn<F>(size: usize, mut make: F) -> Result<Self, ObjectStoreError>
    where
        F: FnMut() -> Result<Box<dyn ObjectClient>, ObjectStoreError>,
    {
        let clients = (0..size).map(|_| make()).collect::<Result<Vec<_>, _>>()?;
        Self::new(clients)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of idle connections.
    pub fn available(&self) -> usize {
        self.receiver.len()
    }

    /// Block until a connection is free.
    pub fn get(&self) -> Result<PooledConnection<'_>, ObjectStoreError> {
        let client = self
            .receiver
            .recv()
            .map_err(|_| ObjectStoreError::Runtime("connection pool closed".to_owned()))?;
        Ok(self.wrap(client))
    }

    pub fn try_get(&self) -> Option<PooledConnection<'_>> {
        self.receiver.try_recv().ok().map(|c| self.wrap(c))
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<PooledConnection<'_>, ObjectStoreError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(c) => Ok(self.wrap(c)),
            Err(RecvTimeoutError::Timeout) => Err(ObjectStoreError::Runtime(format!(
                "no connection free after {timeout:?}"
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(ObjectStoreError::Runtime(
                "connection pool closed".to_owned(),
            )),
        }
    }

    fn wrap(&self, client: Box<dyn ObjectClient>) -> PooledConnection<'_> {
        PooledConnection {
            client: Some(client),
            pool: self,
        }
    }
}

/// A connection on loan from a [ConnectionPool]; returned to it when dropped.
pub struct PooledConnection<'p> {
    client: Option<Box<dyn ObjectClient>>,
    pool: &'p ConnectionPool,
}

impl Deref for PooledConnection<'_> {
    type Target = dyn ObjectClient;

    fn deref(&self) -> &Self::Target {
        // only None during drop
        match self.client.as_ref() {
            Some(c) => c.as_ref(),
            None => unreachable!("connection used after release"),
        }
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(c) = self.client.take() {
            if self.pool.sender.try_send(c).is_err() {
                warn!("Dropping connection which does not fit back into its pool");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
    };

    use super::*;
    use crate::object_store::MemoryObjectStore;

    fn pool(n: usize) -> (MemoryObjectStore, ConnectionPool) {
        let store = MemoryObjectStore::with_bucket("b");
        let s = store.clone();
        let pool = ConnectionPool::from_fn(n, move || Ok(Box::new(s.clone()) as Box<dyn ObjectClient>))
            .unwrap();
        (store, pool)
    }

    #[test]
    fn empty_pool_rejected() {
        assert!(ConnectionPool::new(Vec::new()).is_err());
    }

    #[test]
    fn connections_return_on_drop() {
        let (_, pool) = pool(2);
        {
            let a = pool.get().unwrap();
            let _b = pool.get().unwrap();
            assert_eq!(pool.available(), 0);
            assert!(pool.try_get().is_none());
            assert!(a.bucket_exists("b").unwrap());
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn connection_returns_on_error_path() {
        let (_, pool) = pool(1);
        let f = || -> Result<(), ObjectStoreError> {
            let c = pool.get()?;
            c.put_object("missing", "k", bytes::Bytes::from_static(b"x"))?;
            Ok(())
        };
        assert!(f().is_err());
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn get_times_out_when_exhausted() {
        let (_, pool) = pool(1);
        let _held = pool.get().unwrap();
        assert!(pool.get_timeout(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn concurrent_use_never_exceeds_size() {
        let (store, pool) = pool(3);
        let pool = Arc::new(pool);
        let in_use = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..12)
            .map(|i| {
                let pool = pool.clone();
                let in_use = in_use.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    let c = pool.get().unwrap();
                    let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    c.put_object("b", &format!("k{i}"), bytes::Bytes::from_static(b"x"))
                        .unwrap();
                    thread::sleep(Duration::from_millis(2));
                    in_use.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 3);
        assert_eq!(store.keys("b").len(), 12);
        assert_eq!(pool.available(), 3);
    }
}
