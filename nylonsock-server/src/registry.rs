//! Registry of live connections.

use nylonsock_session::Connection;
use parking_lot::Mutex;
use std::sync::Arc;

/// A connection shared between the event loop and application threads.
pub type SharedConnection<S> = Arc<Mutex<Connection<S>>>;

/// Thread-safe set of live connections, in acceptance order.
///
/// The registry lock is only held to insert, remove, count or copy out the
/// member list. It is never held while a connection is locked, so holding a
/// connection lock and calling back into the registry cannot deadlock.
pub struct ConnectionRegistry<S> {
    connections: Mutex<Vec<Entry<S>>>,
}

// The ID is kept outside the connection lock so lookups never block on it
struct Entry<S> {
    id: u64,
    conn: SharedConnection<S>,
}

impl<S> Clone for Entry<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            conn: Arc::clone(&self.conn),
        }
    }
}

impl<S> ConnectionRegistry<S> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Adds a connection and returns the shared handle to it.
    pub fn insert(&self, connection: Connection<S>) -> SharedConnection<S> {
        let id = connection.id();
        let conn = Arc::new(Mutex::new(connection));
        self.connections.lock().push(Entry {
            id,
            conn: Arc::clone(&conn),
        });
        conn
    }

    /// Returns the number of registered connections.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Returns true if no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Returns the connection at `index` in acceptance order.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<SharedConnection<S>> {
        self.connections
            .lock()
            .get(index)
            .map(|entry| Arc::clone(&entry.conn))
    }

    /// Copies out the current member list.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SharedConnection<S>> {
        self.connections
            .lock()
            .iter()
            .map(|entry| Arc::clone(&entry.conn))
            .collect()
    }

    /// Returns the IDs of the registered connections.
    #[must_use]
    pub fn ids(&self) -> Vec<u64> {
        self.connections.lock().iter().map(|entry| entry.id).collect()
    }

    /// Finds the connection with the given ID.
    #[must_use]
    pub fn find(&self, id: u64) -> Option<SharedConnection<S>> {
        self.connections
            .lock()
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| Arc::clone(&entry.conn))
    }

    /// Removes every destroyed connection and returns their IDs.
    pub fn reap(&self) -> Vec<u64> {
        // Destroyed is terminal, so the answer cannot change between phases
        let members: Vec<Entry<S>> = self.connections.lock().clone();
        let dead: Vec<u64> = members
            .iter()
            .filter(|entry| entry.conn.lock().is_destroyed())
            .map(|entry| entry.id)
            .collect();

        if !dead.is_empty() {
            self.connections
                .lock()
                .retain(|entry| !dead.contains(&entry.id));
        }
        dead
    }

    /// Removes every connection and returns them in acceptance order.
    pub fn drain(&self) -> Vec<SharedConnection<S>> {
        std::mem::take(&mut *self.connections.lock())
            .into_iter()
            .map(|entry| entry.conn)
            .collect()
    }
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nylonsock_transport::TcpTransport;
    use std::time::Duration;

    fn connection() -> (Connection<u32>, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, _) = listener.accept().unwrap();
        let transport = TcpTransport::from_std(stream, true, Duration::from_secs(1)).unwrap();
        (Connection::new(transport, 0).unwrap(), peer)
    }

    #[test]
    fn test_registry_new() {
        let registry: ConnectionRegistry<u32> = ConnectionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.count(), 0);
        assert!(registry.get(0).is_none());
    }

    #[test]
    fn test_insert_and_get() {
        let registry = ConnectionRegistry::default();
        let (a, _pa) = connection();
        let (b, _pb) = connection();
        let (a_id, b_id) = (a.id(), b.id());

        registry.insert(a);
        registry.insert(b);

        assert_eq!(registry.count(), 2);
        assert_eq!(registry.get(0).unwrap().lock().id(), a_id);
        assert_eq!(registry.get(1).unwrap().lock().id(), b_id);
        assert!(registry.get(2).is_none());
        assert_eq!(registry.ids(), vec![a_id, b_id]);
    }

    #[test]
    fn test_find_by_id() {
        let registry = ConnectionRegistry::new();
        let (conn, _peer) = connection();
        let id = conn.id();
        *registry.insert(conn).lock().state_mut() = 7;

        assert_eq!(*registry.find(id).unwrap().lock().state(), 7);
        assert!(registry.find(id + 1_000_000).is_none());
    }

    #[test]
    fn test_reap_removes_only_destroyed() {
        let registry = ConnectionRegistry::new();
        let (a, _pa) = connection();
        let (b, _pb) = connection();
        let a_id = a.id();
        let b_id = b.id();
        let shared_a = registry.insert(a);
        registry.insert(b);

        assert!(registry.reap().is_empty());

        shared_a.lock().close();
        assert_eq!(registry.reap(), vec![a_id]);
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get(0).unwrap().lock().id(), b_id);
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = ConnectionRegistry::new();
        let (a, _pa) = connection();
        let (b, _pb) = connection();
        let a_id = a.id();
        registry.insert(a);
        registry.insert(b);

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].lock().id(), a_id);
        assert!(registry.is_empty());
        assert!(registry.drain().is_empty());
    }

    #[test]
    fn test_reap_with_connection_held_elsewhere() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _peer) = connection();
        let shared = registry.insert(conn);

        let guard = shared.lock();
        // Registry operations stay available while a connection is locked
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.snapshot().len(), 1);
        drop(guard);

        shared.lock().close();
        assert_eq!(registry.reap().len(), 1);
        assert!(registry.is_empty());
    }
}
