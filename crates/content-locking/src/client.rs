/// Async driver for an editing session
///
/// One task owns the [`EditingSession`] and drains a single event queue fed by
/// the channel reader and by the [`LockingClientHandle`], so every mutation is
/// applied in arrival order by one writer.
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{
    ChannelAdapter, ChannelConfig, EditSurface, EditingSession, LockingError, Result,
    SessionEvent, SessionView,
};

pub struct LockingClient;

impl LockingClient {
    /// Capture the surface baseline, connect and start the session task
    pub async fn spawn<S>(
        config: ChannelConfig,
        surface: S,
    ) -> Result<(LockingClientHandle<S>, watch::Receiver<SessionView>)>
    where
        S: EditSurface + Send + 'static,
    {
        let session = EditingSession::start(surface)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let adapter = ChannelAdapter::connect(&config, events_tx.clone()).await?;

        let (view_tx, view_rx) = watch::channel(session.view());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_session(
            session,
            adapter,
            events_rx,
            view_tx,
            shutdown_rx,
        ));

        let handle = LockingClientHandle {
            events: events_tx,
            shutdown: shutdown_tx,
            task,
        };
        Ok((handle, view_rx))
    }
}

/// User-facing operations on a running session
pub struct LockingClientHandle<S> {
    events: mpsc::UnboundedSender<SessionEvent>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<S>,
}

impl<S> LockingClientHandle<S> {
    pub fn edit(&self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.dispatch(SessionEvent::FieldEdited {
            name: name.into(),
            value: value.into(),
        })
    }

    pub fn request_unlock(&self) -> Result<()> {
        self.dispatch(SessionEvent::RequestUnlock)
    }

    pub fn confirm_force_unlock(&self) -> Result<()> {
        self.dispatch(SessionEvent::ConfirmForceUnlock)
    }

    pub fn cancel_unlock(&self) -> Result<()> {
        self.dispatch(SessionEvent::CancelUnlock)
    }

    /// Close the channel and hand the edit surface back
    pub async fn shutdown(self) -> Result<S> {
        let _ = self.shutdown.send(());
        self.task
            .await
            .map_err(|e| LockingError::Network(format!("session task failed: {}", e)))
    }

    fn dispatch(&self, event: SessionEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|e| LockingError::Network(e.to_string()))
    }
}

async fn run_session<S: EditSurface>(
    mut session: EditingSession<S>,
    adapter: ChannelAdapter,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    view_tx: watch::Sender<SessionView>,
    mut shutdown: oneshot::Receiver<()>,
) -> S {
    loop {
        let event = tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        debug!("Session event: {:?}", event);
        for message in session.handle(event) {
            if let Err(e) = adapter.send(message) {
                error!("Failed to queue {:?}: {}", message, e);
            }
        }

        let next = session.view();
        view_tx.send_if_modified(|view| {
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });
    }

    adapter.close().await;
    info!("Editing session closed");
    session.into_surface()
}
