//! Local cell nucleus and mailbox
//!
//! [`LocalCellNucleus`] is the per-cell handle onto the [`LocalRouter`]: it
//! sends on behalf of the cell, owns the cell's wait queue and diagnostic
//! span, and gates delivery until the cell is started. The matching
//! [`Mailbox`] is the receiving half a delivery loop reads from.

use crate::endpoint::{CellEndpoint, CellNucleus};
use crate::error::{Result, SendError, TransportError};
use crate::router::{CellRoute, LocalRouter};
use crate::wait_queue::{ReplyResult, WaitQueue};
use cell_types::{CellAddress, CellMessage};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, info_span, warn, Span};

/// Delivery state of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NucleusState {
    /// Attached, messages are queued but not delivered
    Created,
    /// Delivery enabled
    Running,
    /// Detached from the router
    Killed,
}

struct NucleusInner {
    address: CellAddress,
    router: Arc<LocalRouter>,
    wait_queue: Arc<WaitQueue>,
    span: Span,
    state: watch::Sender<NucleusState>,
    cell_class: RwLock<Option<String>>,
}

/// Cloneable handle to one cell's substrate services
#[derive(Clone)]
pub struct LocalCellNucleus {
    inner: Arc<NucleusInner>,
}

impl LocalCellNucleus {
    /// Attach a new cell named `name` to `router`
    pub fn attach(router: &Arc<LocalRouter>, name: &str) -> Result<(Self, Mailbox)> {
        let address = CellAddress::new(name, router.domain());
        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        let wait_queue = Arc::new(WaitQueue::new());

        router.attach(
            name,
            CellRoute {
                mailbox: mailbox_tx,
                wait_queue: Arc::clone(&wait_queue),
            },
        )?;

        let (state_tx, state_rx) = watch::channel(NucleusState::Created);
        let span = info_span!("cell", cell = %address);

        let nucleus = Self {
            inner: Arc::new(NucleusInner {
                address,
                router: Arc::clone(router),
                wait_queue,
                span,
                state: state_tx,
                cell_class: RwLock::new(None),
            }),
        };
        let mailbox = Mailbox {
            receiver: mailbox_rx,
            state: state_rx,
        };
        Ok((nucleus, mailbox))
    }

    pub fn state(&self) -> NucleusState {
        *self.inner.state.borrow()
    }

    pub fn cell_class(&self) -> Option<String> {
        self.inner.cell_class.read().clone()
    }

    pub fn wait_queue(&self) -> &Arc<WaitQueue> {
        &self.inner.wait_queue
    }

    pub fn router(&self) -> &Arc<LocalRouter> {
        &self.inner.router
    }

    /// Send a request and register it in the wait queue.
    ///
    /// The receiver yields the reply, or a timeout error once a wait queue
    /// sweep finds the request overdue.
    pub fn send_and_wait(
        &self,
        message: CellMessage,
        timeout: Duration,
    ) -> std::result::Result<oneshot::Receiver<ReplyResult>, SendError> {
        let uoid = message.uoid();
        let receiver = self.inner.wait_queue.register(uoid, timeout);
        if let Err(err) = self.send_message(message) {
            self.inner.wait_queue.cancel(&uoid);
            return Err(err);
        }
        Ok(receiver)
    }
}

impl CellEndpoint for LocalCellNucleus {
    fn send_message(&self, message: CellMessage) -> std::result::Result<(), SendError> {
        self.inner.router.route(&self.inner.address, message)
    }
}

impl CellNucleus for LocalCellNucleus {
    fn cell_name(&self) -> &str {
        self.inner.address.cell()
    }

    fn address(&self) -> &CellAddress {
        &self.inner.address
    }

    fn diagnostic_span(&self) -> Span {
        self.inner.span.clone()
    }

    fn new_thread(&self, name: &str, task: Box<dyn FnOnce() + Send>) -> Result<JoinHandle<()>> {
        let span = self.inner.span.clone();
        let thread_name = format!("{}-{}", self.cell_name(), name);
        std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let _entered = span.enter();
                task()
            })
            .map_err(|e| TransportError::thread(thread_name, e))
    }

    fn update_wait_queue(&self) {
        let expired = self.inner.wait_queue.expire_overdue(Instant::now());
        if expired > 0 {
            debug!(expired, "Expired overdue requests");
        }
    }

    fn start(&self) {
        let started = self.inner.state.send_if_modified(|state| {
            if *state == NucleusState::Created {
                *state = NucleusState::Running;
                true
            } else {
                false
            }
        });
        if started {
            info!(cell = %self.inner.address, "Message delivery enabled");
        } else if self.state() == NucleusState::Killed {
            warn!(cell = %self.inner.address, "Ignoring start of killed cell");
        }
    }

    fn kill(&self) {
        let previous = self.inner.state.send_replace(NucleusState::Killed);
        if previous != NucleusState::Killed {
            self.inner.router.detach(self.cell_name());
            info!(cell = %self.inner.address, "Cell killed");
        }
    }

    fn set_cell_class(&self, class: &str) {
        *self.inner.cell_class.write() = Some(class.to_string());
    }

    fn execute_domain_context(&self, name: &str) -> Result<()> {
        let setup = self
            .inner
            .router
            .context(name)
            .ok_or_else(|| TransportError::domain_context(name, "context is not defined"))?;
        info!(context = %name, "Executing defined setup");
        setup(&self.inner.address).map_err(|e| TransportError::domain_context(name, e.to_string()))
    }

    fn endpoint(&self) -> Arc<dyn CellEndpoint> {
        Arc::new(self.clone())
    }
}

impl std::fmt::Debug for LocalCellNucleus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCellNucleus")
            .field("address", &self.inner.address)
            .field("state", &self.state())
            .finish()
    }
}

/// Receiving half of a cell's message queue
#[derive(Debug)]
pub struct Mailbox {
    receiver: mpsc::UnboundedReceiver<CellMessage>,
    state: watch::Receiver<NucleusState>,
}

impl Mailbox {
    /// Next envelope, once delivery is enabled.
    ///
    /// Returns `None` after the cell was killed and its queue drained.
    pub async fn recv(&mut self) -> Option<CellMessage> {
        if self
            .state
            .wait_for(|state| *state != NucleusState::Created)
            .await
            .is_err()
        {
            return None;
        }
        let mut message = self.receiver.recv().await?;
        message.mark_received();
        Some(message)
    }

    /// Next queued envelope without waiting
    pub fn try_recv(&mut self) -> Option<CellMessage> {
        if *self.state.borrow() == NucleusState::Created {
            return None;
        }
        let mut message = self.receiver.try_recv().ok()?;
        message.mark_received();
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cell_types::{CacheError, CellFailure, CellPath};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn message(to: &str) -> CellMessage {
        CellMessage::new(CellAddress::local(to), CellFailure::new(0, "hello"))
    }

    #[tokio::test]
    async fn test_delivery_gated_until_start() {
        let router = LocalRouter::new("testDomain");
        let (client, _client_box) = LocalCellNucleus::attach(&router, "client").unwrap();
        let (server, mut server_box) = LocalCellNucleus::attach(&router, "server").unwrap();

        client.send_message(message("server")).unwrap();
        assert!(server_box.try_recv().is_none());

        server.start();
        let received = server_box.recv().await.unwrap();
        assert_eq!(received.source().hops(), &[CellAddress::new("client", "testDomain")]);
        assert!(received.age().is_some());
    }

    #[test]
    fn test_duplicate_attach_rejected() {
        let router = LocalRouter::new("testDomain");
        let _first = LocalCellNucleus::attach(&router, "pool").unwrap();
        let err = LocalCellNucleus::attach(&router, "pool").unwrap_err();
        assert!(matches!(err, TransportError::DuplicateCell { .. }));
    }

    #[test]
    fn test_no_route_returns_envelope() {
        let router = LocalRouter::new("testDomain");
        let (client, _mailbox) = LocalCellNucleus::attach(&router, "client").unwrap();

        let msg = message("missing");
        let uoid = msg.uoid();
        let err = client.send_message(msg).unwrap_err();
        let (msg, _) = err.into_parts();
        assert_eq!(msg.uoid(), uoid);
        assert!(msg.source().is_empty());

        let foreign = CellMessage::new(CellAddress::new("client", "otherDomain"), CellFailure::new(0, "x"));
        assert!(client.send_message(foreign).is_err());
        assert_eq!(router.stats().failed_routes, 2);
    }

    #[tokio::test]
    async fn test_send_and_wait_correlates_reply() {
        let router = LocalRouter::new("testDomain");
        let (client, _client_box) = LocalCellNucleus::attach(&router, "client").unwrap();
        let (server, mut server_box) = LocalCellNucleus::attach(&router, "server").unwrap();
        server.start();
        client.start();

        let reply_rx = client
            .send_and_wait(message("server"), Duration::from_secs(10))
            .unwrap();

        let mut request = server_box.recv().await.unwrap();
        request.revert_direction();
        server.send_message(request).unwrap();

        let reply = reply_rx.await.unwrap().unwrap();
        assert!(reply.header().is_reply());
        assert!(client.wait_queue().is_empty());
        assert_eq!(router.stats().correlated_replies, 1);
    }

    #[tokio::test]
    async fn test_update_wait_queue_expires_requests() {
        let router = LocalRouter::new("testDomain");
        let (client, _client_box) = LocalCellNucleus::attach(&router, "client").unwrap();
        let (_server, _server_box) = LocalCellNucleus::attach(&router, "server").unwrap();

        let reply_rx = client.send_and_wait(message("server"), Duration::ZERO).unwrap();
        client.update_wait_queue();

        let err = reply_rx.await.unwrap().unwrap_err();
        assert_eq!(err.code(), CacheError::TIMEOUT);
    }

    #[tokio::test]
    async fn test_kill_detaches_cell() {
        let router = LocalRouter::new("testDomain");
        let (client, _client_box) = LocalCellNucleus::attach(&router, "client").unwrap();
        let (server, mut server_box) = LocalCellNucleus::attach(&router, "server").unwrap();

        client.send_message(message("server")).unwrap();
        server.kill();
        assert_eq!(server.state(), NucleusState::Killed);
        assert_eq!(router.cell_names(), vec!["client".to_string()]);

        // Queued envelopes drain, then the mailbox closes
        assert!(server_box.recv().await.is_some());
        assert!(server_box.recv().await.is_none());
        assert!(client.send_message(message("server")).is_err());

        server.start();
        assert_eq!(server.state(), NucleusState::Killed);
    }

    #[test]
    fn test_new_thread_is_named_after_cell() {
        let router = LocalRouter::new("testDomain");
        let (nucleus, _mailbox) = LocalCellNucleus::attach(&router, "pool_1").unwrap();

        let handle = nucleus
            .new_thread(
                "init",
                Box::new(|| {
                    assert_eq!(std::thread::current().name(), Some("pool_1-init"));
                }),
            )
            .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_execute_domain_context() {
        let router = LocalRouter::new("testDomain");
        let (nucleus, _mailbox) = LocalCellNucleus::attach(&router, "pool_1").unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        router.register_context(
            "pool_1Setup",
            Arc::new(move |address: &CellAddress| {
                assert_eq!(address.cell(), "pool_1");
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
        );

        nucleus.execute_domain_context("pool_1Setup").unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert!(nucleus.execute_domain_context("missing").is_err());

        nucleus.set_cell_class("Pool");
        assert_eq!(nucleus.cell_class().as_deref(), Some("Pool"));

        let path = CellPath::parse("pool_1@testDomain").unwrap();
        assert!(router.is_own_domain(path.current().unwrap()));
    }
}
