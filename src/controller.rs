//! Owns the session for whichever instance the view is showing.

use crate::console::ConsoleStore;
use crate::error::{AppError, Result};
use crate::session::{InstanceRef, LaunchOptions, Session, SessionDeps, SessionSnapshot};

/// At most one session is mounted at a time. Switching instances tears the
/// old session down completely before the new one subscribes.
pub struct SessionController {
    deps: SessionDeps,
    current: Option<Session>,
}

impl SessionController {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            deps,
            current: None,
        }
    }

    /// Mount a session for `instance`, replacing any other. Showing the
    /// instance that is already mounted keeps the existing session.
    pub async fn show(&mut self, instance: InstanceRef) -> Result<&Session> {
        let already_shown = self
            .current
            .as_ref()
            .is_some_and(|session| session.instance_id() == instance.id);

        if !already_shown {
            self.close().await;
            let session = Session::mount(instance, self.deps.clone()).await?;
            self.current = Some(session);
        }
        self.session()
    }

    /// Tear down the mounted session, if any.
    pub async fn close(&mut self) {
        if let Some(session) = self.current.take() {
            session.teardown().await;
        }
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn console(&self) -> &ConsoleStore {
        &self.deps.console
    }

    fn session(&self) -> Result<&Session> {
        self.current.as_ref().ok_or_else(AppError::no_session)
    }

    pub async fn start(&self, launch: LaunchOptions) -> Result<()> {
        self.session()?.start(launch).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.session()?.stop().await
    }

    pub async fn send_command(&self, command: &str) -> Result<()> {
        self.session()?.send_command(command).await
    }

    pub async fn begin_auth(&self) -> Result<()> {
        self.session()?.begin_auth().await
    }

    pub async fn save_auth_persistence(&self) -> Result<()> {
        self.session()?.save_auth_persistence().await
    }

    pub fn snapshot(&self) -> Result<SessionSnapshot> {
        Ok(self.session()?.snapshot())
    }
}
