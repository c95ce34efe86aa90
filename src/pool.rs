//! Per-endpoint Modbus/TCP connection pooling (§4.3).
//!
//! Generalizes the teacher's `tokio_async_safe_client::SafeClient`
//! (one `Arc<Mutex<Context>>` per meter) to many endpoints: one client
//! per `(host, port)`, each behind its own lock so every exchange on
//! that endpoint is serialized, with lazy connect-on-first-use and
//! transparent reconnect on error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_modbus::prelude::{Reader, SlaveContext, Writer};
use tokio_modbus::{client::Context, Slave};

use crate::device::Endpoint;
use crate::error::{Error, Result};

const OPERATION_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: u32 = 3;

type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = Result<T>> + Send + 'a>>;

/// Abstraction over a live Modbus exchange, so the hub can be driven by
/// a mock in tests without a TCP socket. The real implementation wraps
/// `tokio_modbus::client::Context`.
#[async_trait]
pub trait ModbusTransport: Send {
    async fn read_input_registers(&mut self, unit_id: u8, address: u16, count: u16)
        -> Result<Vec<u16>>;
    async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>>;
    async fn write_multiple_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        words: &[u16],
    ) -> Result<()>;
    async fn write_single_register(&mut self, unit_id: u8, address: u16, word: u16)
        -> Result<()>;
}

/// Creates transports for a pool. Exists so tests can inject a mock
/// factory instead of dialing real TCP sockets.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn ModbusTransport>>;
}

struct TcpTransport {
    ctx: Context,
}

#[async_trait]
impl ModbusTransport for TcpTransport {
    async fn read_input_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        self.ctx.set_slave(Slave(unit_id));
        Ok(self.ctx.read_input_registers(address, count).await??)
    }

    async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        self.ctx.set_slave(Slave(unit_id));
        Ok(self.ctx.read_holding_registers(address, count).await??)
    }

    async fn write_multiple_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        words: &[u16],
    ) -> Result<()> {
        self.ctx.set_slave(Slave(unit_id));
        Ok(self.ctx.write_multiple_registers(address, words).await??)
    }

    async fn write_single_register(
        &mut self,
        unit_id: u8,
        address: u16,
        word: u16,
    ) -> Result<()> {
        self.ctx.set_slave(Slave(unit_id));
        Ok(self.ctx.write_single_register(address, word).await??)
    }
}

/// Default [`TransportFactory`]: dials real Modbus/TCP sockets.
pub struct TcpTransportFactory;

#[async_trait]
impl TransportFactory for TcpTransportFactory {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn ModbusTransport>> {
        let socket_addr = endpoint
            .socket_addr()
            .map_err(|e| Error::Connection(endpoint.clone(), e.to_string()))?;
        let ctx = tokio_modbus::client::tcp::connect_slave(socket_addr, Slave(1))
            .await
            .map_err(|e| Error::Connection(endpoint.clone(), e.to_string()))?;
        Ok(Box::new(TcpTransport { ctx }))
    }
}

struct PooledConnection {
    transport: Option<Box<dyn ModbusTransport>>,
    connected: bool,
}

/// One Modbus client per `(host, port)` endpoint, lazily connected,
/// serialized by a per-endpoint lock, reconnecting transparently on error.
pub struct ConnectionPool {
    connections: Mutex<HashMap<Endpoint, Arc<Mutex<PooledConnection>>>>,
    factory: Arc<dyn TransportFactory>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            factory,
        }
    }

    pub fn tcp() -> Self {
        Self::new(Arc::new(TcpTransportFactory))
    }

    async fn slot(&self, endpoint: &Endpoint) -> Arc<Mutex<PooledConnection>> {
        let mut connections = self.connections.lock().await;
        connections
            .entry(endpoint.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(PooledConnection {
                    transport: None,
                    connected: false,
                }))
            })
            .clone()
    }

    /// Whether the endpoint's last exchange succeeded. Unknown (never
    /// used) endpoints report `false`.
    pub async fn is_connected(&self, endpoint: &Endpoint) -> bool {
        let slot = self.slot(endpoint).await;
        let connected = slot.lock().await.connected;
        connected
    }

    async fn with_transport<T, F>(&self, endpoint: &Endpoint, op: F) -> Result<T>
    where
        F: for<'a> Fn(&'a mut dyn ModbusTransport) -> BoxFuture<'a, T>,
    {
        let slot = self.slot(endpoint).await;
        let mut conn = slot.lock().await;

        let mut last_err = None;
        for _attempt in 0..=MAX_RETRIES {
            if conn.transport.is_none() {
                match self.factory.connect(endpoint).await {
                    Ok(t) => {
                        conn.transport = Some(t);
                        conn.connected = true;
                    }
                    Err(e) => {
                        conn.connected = false;
                        last_err = Some(e);
                        continue;
                    }
                }
            }

            let transport = conn.transport.as_mut().unwrap().as_mut();
            let fut = op(transport);
            match tokio::time::timeout(OPERATION_TIMEOUT, fut).await {
                Ok(Ok(value)) => {
                    conn.connected = true;
                    return Ok(value);
                }
                Ok(Err(Error::ModbusException(code))) => {
                    // A valid Modbus response carrying an error code, not a
                    // communication failure (§7, §4.3): the connection stays
                    // up and this is not retried.
                    return Err(Error::ModbusException(code));
                }
                Ok(Err(e)) => {
                    conn.transport = None;
                    conn.connected = false;
                    last_err = Some(e);
                }
                Err(_elapsed) => {
                    conn.transport = None;
                    conn.connected = false;
                    last_err = Some(Error::Timeout(endpoint.clone()));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Connection(endpoint.clone(), "exhausted retries".into())))
    }

    pub async fn read_input_registers(
        &self,
        endpoint: &Endpoint,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        self.with_transport(endpoint, move |t| {
            Box::pin(async move { t.read_input_registers(unit_id, address, count).await })
        })
        .await
    }

    pub async fn read_holding_registers(
        &self,
        endpoint: &Endpoint,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        self.with_transport(endpoint, move |t| {
            Box::pin(async move { t.read_holding_registers(unit_id, address, count).await })
        })
        .await
    }

    pub async fn write_multiple_registers(
        &self,
        endpoint: &Endpoint,
        unit_id: u8,
        address: u16,
        words: Vec<u16>,
    ) -> Result<()> {
        self.with_transport(endpoint, move |t| {
            let words = words.clone();
            Box::pin(async move { t.write_multiple_registers(unit_id, address, &words).await })
        })
        .await
    }

    pub async fn write_single_register(
        &self,
        endpoint: &Endpoint,
        unit_id: u8,
        address: u16,
        word: u16,
    ) -> Result<()> {
        self.with_transport(endpoint, move |t| {
            Box::pin(async move { t.write_single_register(unit_id, address, word).await })
        })
        .await
    }

    /// Drops every cached client, closing their sockets.
    pub async fn close_all(&self) {
        let mut connections = self.connections.lock().await;
        connections.clear();
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    pub enum MockBehavior {
        AllOk,
        AllExceptions,
        RejectAddress(u16),
    }

    #[derive(Clone)]
    pub struct MockTransportFactory {
        behavior: Arc<std::sync::Mutex<MockBehavior>>,
        read_count: Arc<AtomicUsize>,
    }

    impl MockTransportFactory {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Arc::new(std::sync::Mutex::new(behavior)),
                read_count: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn read_count(&self) -> usize {
            self.read_count.load(Ordering::SeqCst)
        }

        /// Changes the behavior live, visible to every transport already
        /// handed out by this factory. Lets a test simulate a device that
        /// was working and later goes unreachable.
        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }
    }

    #[async_trait]
    impl TransportFactory for MockTransportFactory {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn ModbusTransport>> {
            Ok(Box::new(MockTransport {
                behavior: self.behavior.clone(),
                read_count: self.read_count.clone(),
            }))
        }
    }

    struct MockTransport {
        behavior: Arc<std::sync::Mutex<MockBehavior>>,
        read_count: Arc<AtomicUsize>,
    }

    fn exception() -> Error {
        Error::ModbusException(tokio_modbus::ExceptionCode::IllegalDataAddress)
    }

    #[async_trait]
    impl ModbusTransport for MockTransport {
        async fn read_input_registers(
            &mut self,
            _unit_id: u8,
            _address: u16,
            count: u16,
        ) -> Result<Vec<u16>> {
            self.read_count.fetch_add(1, Ordering::SeqCst);
            match *self.behavior.lock().unwrap() {
                MockBehavior::AllExceptions => Err(exception()),
                _ => Ok(vec![0; count as usize]),
            }
        }

        async fn read_holding_registers(
            &mut self,
            _unit_id: u8,
            _address: u16,
            count: u16,
        ) -> Result<Vec<u16>> {
            self.read_count.fetch_add(1, Ordering::SeqCst);
            match *self.behavior.lock().unwrap() {
                MockBehavior::AllExceptions => Err(exception()),
                _ => Ok(vec![0; count as usize]),
            }
        }

        async fn write_multiple_registers(
            &mut self,
            _unit_id: u8,
            address: u16,
            _words: &[u16],
        ) -> Result<()> {
            match *self.behavior.lock().unwrap() {
                MockBehavior::AllExceptions => Err(exception()),
                MockBehavior::RejectAddress(reject) if address == reject => Err(exception()),
                _ => Ok(()),
            }
        }

        async fn write_single_register(
            &mut self,
            _unit_id: u8,
            address: u16,
            _word: u16,
        ) -> Result<()> {
            match *self.behavior.lock().unwrap() {
                MockBehavior::AllExceptions => Err(exception()),
                MockBehavior::RejectAddress(reject) if address == reject => Err(exception()),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn reconnects_after_a_failed_exchange() {
        let factory = MockTransportFactory::new(MockBehavior::AllOk);
        let pool = ConnectionPool::new(Arc::new(factory));
        let endpoint = Endpoint::new("mock", 502);
        let words = pool
            .read_input_registers(&endpoint, 1, 100, 1)
            .await
            .unwrap();
        assert_eq!(words, vec![0]);
        assert!(pool.is_connected(&endpoint).await);
    }
}
