use std::rc::Rc;

use tokio::sync::watch;

use crate::common::error::GridgateError;
use crate::define_wrapped_type;
use crate::gridengine::parse::BackendInfo;
use crate::session::{Session, SessionBackend};
use crate::Map;

/// One-time readiness of the backend. It starts as `Pending` and is resolved exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready(BackendInfo),
    Failed(String),
}

pub struct SessionManager {
    backend: Rc<dyn SessionBackend>,
    sessions: Map<String, Rc<dyn Session>>,
    readiness: watch::Sender<Readiness>,
}

define_wrapped_type!(SessionManagerRef, SessionManager, pub);

impl SessionManager {
    pub fn new(backend: Rc<dyn SessionBackend>) -> Self {
        let (readiness, _) = watch::channel(Readiness::Pending);
        Self {
            backend,
            sessions: Default::default(),
            readiness,
        }
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.readiness.borrow(), Readiness::Ready(_))
    }

    pub fn backend_info(&self) -> Option<BackendInfo> {
        match &*self.readiness.borrow() {
            Readiness::Ready(info) => Some(info.clone()),
            _ => None,
        }
    }

    /// Resolves the readiness signal. Later calls are ignored.
    pub fn resolve(&mut self, readiness: Readiness) {
        if readiness == Readiness::Pending {
            return;
        }
        self.readiness.send_if_modified(|current| {
            if *current == Readiness::Pending {
                *current = readiness;
                true
            } else {
                false
            }
        });
    }

    fn check_ready(&self) -> crate::Result<()> {
        match &*self.readiness.borrow() {
            Readiness::Ready(_) => Ok(()),
            Readiness::Pending => Err(GridgateError::BackendUnavailable(
                "Grid engine has not been probed yet".to_string(),
            )),
            Readiness::Failed(error) => Err(GridgateError::BackendUnavailable(error.clone())),
        }
    }

    pub fn create_session(&mut self, name: &str) -> crate::Result<Rc<dyn Session>> {
        self.check_ready()?;
        if self.sessions.contains_key(name) {
            return Err(GridgateError::SessionError(format!(
                "Session {name} already exists"
            )));
        }
        let session = self.backend.open_session(name);
        self.sessions.insert(name.to_string(), session.clone());
        log::info!("Session {name} created");
        Ok(session)
    }

    pub fn get_session(&self, name: &str) -> crate::Result<Rc<dyn Session>> {
        self.sessions
            .get(name)
            .cloned()
            .ok_or_else(|| GridgateError::SessionError(format!("Session {name} does not exist")))
    }

    pub fn get_or_create_session(&mut self, name: &str) -> crate::Result<Rc<dyn Session>> {
        match self.sessions.get(name) {
            Some(session) => Ok(session.clone()),
            None => self.create_session(name),
        }
    }

    /// Closes the session and releases its job handles. Closing an unknown session is a no-op.
    pub fn close_session(&mut self, name: &str) {
        if let Some(session) = self.sessions.remove(name) {
            session.close();
            log::info!("Session {name} closed");
        }
    }

    pub fn session_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn close_all(&mut self) {
        for name in self.session_names() {
            self.close_session(&name);
        }
    }
}

impl SessionManagerRef {
    /// Probes the backend once and resolves readiness with the outcome.
    pub async fn initialize(&self) -> Readiness {
        let backend = self.get().backend.clone();
        let readiness = match backend.backend_info().await {
            Ok(info) => {
                log::info!("Grid engine {} {} is ready", info.name, info.version);
                Readiness::Ready(info)
            }
            Err(error) => {
                log::error!("Grid engine is not available: {error}");
                Readiness::Failed(error.to_string())
            }
        };
        self.get_mut().resolve(readiness);
        self.get().readiness()
    }

    /// Waits until readiness is resolved.
    pub async fn wait_ready(&self) -> crate::Result<BackendInfo> {
        let mut receiver = self.get().readiness.subscribe();
        let readiness = receiver
            .wait_for(|readiness| *readiness != Readiness::Pending)
            .await
            .map_err(|_| {
                GridgateError::BackendUnavailable("Session manager was dropped".to_string())
            })?
            .clone();
        match readiness {
            Readiness::Ready(info) => Ok(info),
            Readiness::Failed(error) => Err(GridgateError::BackendUnavailable(error)),
            Readiness::Pending => unreachable!(),
        }
    }
}
