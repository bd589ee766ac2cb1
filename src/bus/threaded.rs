//! Bus variant that fans packets out on a worker pool (§4.3).

use std::sync::Arc;

use super::{Bus, BusConnection, RoutingTable};
use crate::message::Packet;
use crate::thread_pool::ThreadPool;

/// `send_message` deep-clones the packet and schedules the fan-out on the
/// thread pool, so the caller may destroy its own packet the instant
/// `send_message` returns. No ordering is promised between distinct calls.
pub struct ThreadedBus {
    routing: Arc<RoutingTable>,
    pool: ThreadPool,
}

impl ThreadedBus {
    pub fn new(pool: ThreadPool) -> Self {
        Self {
            routing: Arc::new(RoutingTable::new()),
            pool,
        }
    }
}

impl Bus for ThreadedBus {
    fn connected(&self, connection: Arc<dyn BusConnection>) {
        self.routing.connected(connection);
    }

    fn disconnected(&self, connection: &Arc<dyn BusConnection>) {
        self.routing.disconnected(connection);
    }

    fn send_message(&self, sender: &Arc<dyn BusConnection>, packet: Packet) {
        let cloned = packet.clone_deep();
        let sender = sender.clone();
        let routing = self.routing.clone();
        self.pool.schedule(move || {
            routing.route(&sender, &cloned, |recipient, packet| {
                recipient.receive_from_bus(&sender, packet);
            });
            // `cloned` is dropped here, at the end of the scheduled task.
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DataMessage;
    use std::sync::mpsc;

    struct RelayConnection {
        conn_type: i32,
        conn_instance: i32,
        tx: mpsc::Sender<String>,
    }

    impl BusConnection for RelayConnection {
        fn connection_type(&self) -> i32 {
            self.conn_type
        }
        fn connection_instance(&self) -> i32 {
            self.conn_instance
        }
        fn receive_from_bus(&self, _sender: &Arc<dyn BusConnection>, packet: &crate::message::Packet) {
            let data = crate::message::downcast::<String>(packet.message())
                .unwrap()
                .data()
                .clone();
            self.tx.send(data).unwrap();
        }
    }

    #[test]
    fn delivers_a_clone_after_the_original_is_destroyed() {
        let pool = ThreadPool::new(1, true).unwrap();
        let bus = ThreadedBus::new(pool);

        let (tx, rx) = mpsc::channel();
        let a: Arc<dyn BusConnection> = Arc::new(RelayConnection {
            conn_type: 1,
            conn_instance: 1,
            tx: mpsc::channel().0, // A never receives; it only sends.
        });
        let b: Arc<dyn BusConnection> = Arc::new(RelayConnection {
            conn_type: 1,
            conn_instance: 2,
            tx,
        });
        bus.connected(a.clone());
        bus.connected(b.clone());

        {
            let message = DataMessage::new("Echo", "hello".to_string());
            let packet = crate::message::Packet::new(Box::new(message), 1, 2);
            bus.send_message(&a, packet);
            // `packet` and its message are dropped here, before the
            // scheduled task necessarily runs.
        }

        let received = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        assert_eq!(received, "hello");
    }
}
